use super::{
    incomplete, read_credential_fields, require_entry_fields, unshaped_fields, CredentialField,
    SourceContext,
};
use crate::auth::{declared_provider, AuthConfig, AzureKeyVault, PodIdentityProvider};
use crate::error::ResolveError;
use crate::identity::request_oauth_token;
use crate::resolver::{ResolveRequest, SecretSource};
use crate::secret::ResolvedSecret;
use async_trait::async_trait;
use futures_util::future::try_join_all;
use serde::Deserialize;
use tracing::debug;

const ID: &str = "azureKeyVault";
const CONTEXT: &str = "key vault";
const API_VERSION: &str = "7.4";
const ALLOWED_IDENTITIES: &[PodIdentityProvider] =
    &[PodIdentityProvider::None, PodIdentityProvider::AzureWorkload];
const MISSING_CREDENTIALS: &str =
    "clientID, tenantID and clientSecret are expected when not using a pod identity provider";

/// Active Directory endpoint and Key Vault resource for one Azure cloud.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AzureCloud {
    pub active_directory_endpoint: String,
    pub key_vault_resource: String,
}

impl AzureCloud {
    fn known(active_directory_endpoint: &str, key_vault_resource: &str) -> Self {
        Self {
            active_directory_endpoint: active_directory_endpoint.to_string(),
            key_vault_resource: key_vault_resource.to_string(),
        }
    }

    /// Resolve the `cloud` block. Names compare case-insensitively; an
    /// absent block or empty type is the public cloud.
    pub fn from_config(vault: &AzureKeyVault) -> Result<Self, ResolveError> {
        let Some(cloud) = vault.cloud.as_ref() else {
            return Ok(Self::public());
        };
        match cloud.cloud_type.to_ascii_lowercase().as_str() {
            "" | "azurepubliccloud" => Ok(Self::public()),
            "azureusgovernmentcloud" => Ok(Self::known(
                "https://login.microsoftonline.us/",
                "https://vault.usgovcloudapi.net",
            )),
            "azurechinacloud" => Ok(Self::known(
                "https://login.chinacloudapi.cn/",
                "https://vault.azure.cn",
            )),
            "azuregermancloud" => Ok(Self::known(
                "https://login.microsoftonline.de/",
                "https://vault.microsoftazure.de",
            )),
            "private" => {
                let ad = cloud
                    .active_directory_endpoint
                    .as_deref()
                    .filter(|v| !v.is_empty());
                let resource = cloud.key_vault_resource_url.as_deref().filter(|v| !v.is_empty());
                match (ad, resource) {
                    (Some(ad), Some(resource)) => Ok(Self {
                        active_directory_endpoint: format!("{}/", ad.trim_end_matches('/')),
                        key_vault_resource: resource.trim_end_matches('/').to_string(),
                    }),
                    _ => Err(ResolveError::configuration(
                        "activeDirectoryEndpoint and keyVaultResourceURL are required for a Private cloud",
                    )),
                }
            }
            other => Err(ResolveError::configuration(format!(
                "unknown azure cloud type {}",
                other
            ))),
        }
    }

    pub fn public() -> Self {
        Self::known(
            "https://login.microsoftonline.com/",
            "https://vault.azure.net",
        )
    }

    fn scope(&self) -> String {
        format!("{}/.default", self.key_vault_resource)
    }

    fn is_public(&self) -> bool {
        *self == Self::public()
    }
}

#[derive(Debug, Deserialize)]
struct KeyVaultSecretBundle {
    value: String,
}

/// Azure Key Vault, reached with a service principal secret or Azure AD
/// workload identity.
pub struct AzureKeyVaultSource {
    ctx: SourceContext,
}

impl AzureKeyVaultSource {
    pub fn new(ctx: SourceContext) -> Self {
        Self { ctx }
    }

    async fn access_token(
        &self,
        vault: &AzureKeyVault,
        cloud: &AzureCloud,
        namespace: &str,
    ) -> Result<String, ResolveError> {
        let provider = declared_provider(vault.pod_identity.as_ref(), CONTEXT, ALLOWED_IDENTITIES)?;
        let scope = cloud.scope();

        let credential = match (provider, vault.pod_identity.as_ref()) {
            (PodIdentityProvider::AzureWorkload, Some(identity)) => {
                let mut identity = identity.clone();
                if identity.identity_authority_host.is_none() && !cloud.is_public() {
                    identity.identity_authority_host = Some(cloud.active_directory_endpoint.clone());
                }
                self.ctx
                    .identities
                    .issue(PodIdentityProvider::AzureWorkload, &identity, &scope)
                    .await?
            }
            _ => {
                let credentials = vault.credentials.clone().unwrap_or_default();
                let values = read_credential_fields(
                    self.ctx.store.as_ref(),
                    namespace,
                    ID,
                    MISSING_CREDENTIALS,
                    &[CredentialField::required(
                        "clientSecret",
                        credentials.client_secret.as_ref(),
                    )],
                )
                .await?;
                let client_secret = values.get("clientSecret").cloned().unwrap_or_default();

                let token_url = format!(
                    "{}{}/oauth2/v2.0/token",
                    cloud.active_directory_endpoint, credentials.tenant_id
                );
                let key = format!(
                    "azure-client-secret|{}|{}|{}",
                    token_url, credentials.client_id, scope
                );
                self.ctx
                    .identities
                    .cache()
                    .get_or_fetch(&key, || async {
                        request_oauth_token(
                            &self.ctx.http,
                            ID,
                            &token_url,
                            &[
                                ("client_id", credentials.client_id.as_str()),
                                ("client_secret", client_secret.as_str()),
                                ("grant_type", "client_credentials"),
                                ("scope", scope.as_str()),
                            ],
                        )
                        .await
                    })
                    .await?
            }
        };

        credential
            .access_token()
            .map(str::to_string)
            .ok_or_else(|| ResolveError::identity(ID, "token response carried no access token"))
    }

    async fn read_secret(
        &self,
        vault_uri: &str,
        token: &str,
        name: &str,
        version: Option<&str>,
    ) -> Result<String, ResolveError> {
        let url = format!(
            "{}/secrets/{}/{}?api-version={}",
            vault_uri,
            name,
            version.unwrap_or_default(),
            API_VERSION
        );
        debug!(vault = %vault_uri, secret = %name, "Reading Key Vault secret");

        let response = self
            .ctx
            .http
            .get(&url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| ResolveError::backend(ID, format!("HTTP request failed: {}", e)))?;

        match response.status().as_u16() {
            200 => response
                .json::<KeyVaultSecretBundle>()
                .await
                .map(|bundle| bundle.value)
                .map_err(|e| ResolveError::backend(ID, format!("Failed to parse response: {}", e))),
            404 => Err(ResolveError::not_found(format!("key vault {}", vault_uri), name)),
            _ => Err(ResolveError::backend(
                ID,
                format!("Unexpected status: {}", response.status()),
            )),
        }
    }
}

#[async_trait]
impl SecretSource for AzureKeyVaultSource {
    fn id(&self) -> &'static str {
        ID
    }

    fn applies(&self, auth: &AuthConfig) -> bool {
        auth.azure_key_vault.is_some()
    }

    fn validate(
        &self,
        auth: &AuthConfig,
        request: &ResolveRequest<'_>,
    ) -> Result<(), ResolveError> {
        let Some(vault) = auth.azure_key_vault.as_ref() else {
            return Ok(());
        };

        let provider = declared_provider(vault.pod_identity.as_ref(), CONTEXT, ALLOWED_IDENTITIES)?;
        match (provider, vault.credentials.as_ref()) {
            (PodIdentityProvider::None, None) => {
                return Err(incomplete(
                    ID,
                    MISSING_CREDENTIALS,
                    vec![
                        "clientId".to_string(),
                        "tenantId".to_string(),
                        "clientSecret".to_string(),
                    ],
                ));
            }
            (PodIdentityProvider::None, Some(credentials)) => {
                let mut missing = Vec::new();
                if credentials.client_id.is_empty() {
                    missing.push("clientId".to_string());
                }
                if credentials.tenant_id.is_empty() {
                    missing.push("tenantId".to_string());
                }
                missing.extend(unshaped_fields(
                    &[CredentialField::required(
                        "clientSecret",
                        credentials.client_secret.as_ref(),
                    )],
                    request.namespace,
                ));
                if !missing.is_empty() {
                    return Err(incomplete(ID, MISSING_CREDENTIALS, missing));
                }
            }
            (_, Some(_)) => {
                return Err(ResolveError::configuration(
                    "azureKeyVault credentials and podIdentity are mutually exclusive",
                ));
            }
            (_, None) => {}
        }

        if vault.vault_uri.is_empty() {
            return Err(ResolveError::configuration("azureKeyVault requires vaultUri"));
        }
        AzureCloud::from_config(vault)?;

        for (index, secret) in vault.secrets.iter().enumerate() {
            require_entry_fields(
                ID,
                index,
                &[
                    ("parameter", secret.parameter.as_str()),
                    ("name", secret.name.as_str()),
                ],
            )?;
        }
        Ok(())
    }

    async fn fetch(
        &self,
        auth: &AuthConfig,
        request: &ResolveRequest<'_>,
    ) -> Result<ResolvedSecret, ResolveError> {
        let mut resolved = ResolvedSecret::new();
        let Some(vault) = auth.azure_key_vault.as_ref() else {
            return Ok(resolved);
        };

        let cloud = AzureCloud::from_config(vault)?;
        let token = self.access_token(vault, &cloud, request.namespace).await?;
        let vault_uri = vault.vault_uri.trim_end_matches('/');

        let values = try_join_all(vault.secrets.iter().map(|secret| {
            self.read_secret(vault_uri, &token, &secret.name, secret.version.as_deref())
        }))
        .await?;

        for (secret, value) in vault.secrets.iter().zip(values) {
            resolved.insert(&secret.parameter, value, ID);
        }
        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{AzureKeyVaultCloud, AzureKeyVaultCredentials, PodIdentity, SecretValueRef};
    use crate::cache::TokenCache;
    use crate::endpoints::ProviderEndpoints;
    use crate::identity::IdentityRegistry;
    use crate::store::InMemorySecretStore;
    use std::sync::Arc;

    fn source() -> AzureKeyVaultSource {
        let cache = Arc::new(TokenCache::default());
        AzureKeyVaultSource::new(SourceContext {
            store: Arc::new(InMemorySecretStore::new()),
            http: reqwest::Client::new(),
            endpoints: ProviderEndpoints::default(),
            identities: Arc::new(IdentityRegistry::new(cache)),
        })
    }

    fn validate(vault: AzureKeyVault, namespace: &str) -> Result<(), ResolveError> {
        let auth = AuthConfig {
            azure_key_vault: Some(vault),
            ..Default::default()
        };
        source().validate(&auth, &ResolveRequest::new(namespace))
    }

    fn credentials(name: &str, key: &str) -> AzureKeyVaultCredentials {
        AzureKeyVaultCredentials {
            client_id: String::new(),
            tenant_id: String::new(),
            client_secret: Some(SecretValueRef::new(name, key)),
        }
    }

    fn with_identity(provider: &str) -> Option<PodIdentity> {
        Some(PodIdentity {
            provider: provider.to_string(),
            ..Default::default()
        })
    }

    #[test]
    fn test_invalid_pod_identity_provider() {
        let err = validate(
            AzureKeyVault {
                pod_identity: with_identity("xyz"),
                ..Default::default()
            },
            "testNamespace",
        )
        .unwrap_err();
        assert!(err
            .to_string()
            .contains("key vault does not support pod identity provider - xyz"));
    }

    #[test]
    fn test_missing_credentials_and_pod_identity() {
        let err = validate(
            AzureKeyVault {
                credentials: None,
                pod_identity: with_identity(""),
                ..Default::default()
            },
            "testNamespace",
        )
        .unwrap_err();
        assert!(err.to_string().contains(MISSING_CREDENTIALS));
    }

    #[test]
    fn test_empty_namespace_or_secret_reference() {
        let cases = [
            (credentials("testSecretName", "testSecretKey"), ""),
            (credentials("", "testSecretKey"), "testNamespace"),
            (credentials("testSecretName", ""), "testNamespace"),
        ];
        for (creds, namespace) in cases {
            let err = validate(
                AzureKeyVault {
                    credentials: Some(creds),
                    pod_identity: with_identity("none"),
                    ..Default::default()
                },
                namespace,
            )
            .unwrap_err();
            assert!(err.to_string().contains(MISSING_CREDENTIALS), "{err}");
        }
    }

    #[test]
    fn test_other_platform_identity_is_rejected() {
        let err = validate(
            AzureKeyVault {
                pod_identity: with_identity("gcp"),
                ..Default::default()
            },
            "apps",
        )
        .unwrap_err();
        assert!(matches!(err, ResolveError::UnsupportedProvider { .. }));
    }

    #[test]
    fn test_credentials_with_pod_identity_conflict() {
        let mut creds = credentials("sp", "secret");
        creds.client_id = "id".to_string();
        creds.tenant_id = "tenant".to_string();
        let err = validate(
            AzureKeyVault {
                vault_uri: "https://kv.vault.azure.net".to_string(),
                credentials: Some(creds),
                pod_identity: with_identity("azure-workload"),
                ..Default::default()
            },
            "apps",
        )
        .unwrap_err();
        assert!(matches!(err, ResolveError::Configuration { .. }));
    }

    #[test]
    fn test_cloud_resolution() {
        let mut vault = AzureKeyVault::default();
        assert_eq!(AzureCloud::from_config(&vault).unwrap(), AzureCloud::public());

        vault.cloud = Some(AzureKeyVaultCloud {
            cloud_type: "AzureChinaCloud".to_string(),
            ..Default::default()
        });
        assert_eq!(
            AzureCloud::from_config(&vault).unwrap().key_vault_resource,
            "https://vault.azure.cn"
        );

        vault.cloud = Some(AzureKeyVaultCloud {
            cloud_type: "Private".to_string(),
            active_directory_endpoint: Some("https://login.local".to_string()),
            key_vault_resource_url: None,
        });
        assert!(AzureCloud::from_config(&vault).is_err());

        vault.cloud = Some(AzureKeyVaultCloud {
            cloud_type: "Mars".to_string(),
            ..Default::default()
        });
        assert!(AzureCloud::from_config(&vault).is_err());
    }
}
