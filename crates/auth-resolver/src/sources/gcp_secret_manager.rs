use super::{
    incomplete, read_credential_fields, require_entry_fields, unshaped_fields, CredentialField,
    SourceContext,
};
use crate::auth::{declared_provider, AuthConfig, GcpSecretManager, PodIdentityProvider};
use crate::endpoints::DEFAULT_GCP_TOKEN_URI;
use crate::error::ResolveError;
use crate::identity::{request_oauth_token, GCP_PROJECT_ID};
use crate::resolver::{ResolveRequest, SecretSource};
use crate::secret::{IssuedCredential, ResolvedSecret};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::Utc;
use futures_util::future::try_join_all;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use tracing::debug;

const ID: &str = "gcpSecretManager";
const CONTEXT: &str = "gcp secret manager";
const ALLOWED_IDENTITIES: &[PodIdentityProvider] =
    &[PodIdentityProvider::None, PodIdentityProvider::Gcp];
const MISSING_CREDENTIALS: &str =
    "credentials.clientSecret is expected when not using a pod identity provider";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

/// The fields of a service account key file this source needs.
#[derive(Debug, Deserialize)]
pub(crate) struct ServiceAccountKey {
    client_email: String,
    private_key: String,
    #[serde(default)]
    project_id: String,
    #[serde(default)]
    token_uri: Option<String>,
}

#[derive(Debug, Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

impl ServiceAccountKey {
    pub(crate) fn parse(json: &str) -> Result<Self, ResolveError> {
        serde_json::from_str(json).map_err(|e| {
            ResolveError::configuration(format!("invalid GCP service account key: {}", e))
        })
    }

    fn token_uri(&self) -> &str {
        self.token_uri
            .as_deref()
            .filter(|u| !u.is_empty())
            .unwrap_or(DEFAULT_GCP_TOKEN_URI)
    }

    /// RS256 assertion for the OAuth JWT bearer grant.
    pub(crate) fn assertion(&self, scope: &str) -> Result<String, ResolveError> {
        let now = Utc::now().timestamp();
        let claims = AssertionClaims {
            iss: &self.client_email,
            scope,
            aud: self.token_uri(),
            iat: now,
            exp: now + 3600,
        };
        let key = EncodingKey::from_rsa_pem(self.private_key.as_bytes()).map_err(|e| {
            ResolveError::configuration(format!("invalid service account private key: {}", e))
        })?;
        encode(&Header::new(Algorithm::RS256), &claims, &key)
            .map_err(|e| ResolveError::identity("gcp", format!("signing assertion: {}", e)))
    }
}

#[derive(Debug, Deserialize)]
struct AccessSecretVersionResponse {
    payload: SecretPayload,
}

#[derive(Debug, Deserialize)]
struct SecretPayload {
    data: String,
}

/// GCP Secret Manager, reached with a service account key held in a cluster
/// secret or with the workload's metadata-server identity.
pub struct GcpSecretManagerSource {
    ctx: SourceContext,
}

impl GcpSecretManagerSource {
    pub fn new(ctx: SourceContext) -> Self {
        Self { ctx }
    }

    /// Access token plus the project secrets are looked up in.
    async fn session(
        &self,
        manager: &GcpSecretManager,
        namespace: &str,
    ) -> Result<(String, String), ResolveError> {
        let provider =
            declared_provider(manager.pod_identity.as_ref(), CONTEXT, ALLOWED_IDENTITIES)?;
        let scope = PodIdentityProvider::Gcp.default_scope();

        let (credential, project_id) = match (provider, manager.pod_identity.as_ref()) {
            (PodIdentityProvider::Gcp, Some(identity)) => {
                let credential = self
                    .ctx
                    .identities
                    .issue(PodIdentityProvider::Gcp, identity, scope)
                    .await?;
                let project_id = credential.get(GCP_PROJECT_ID).unwrap_or_default().to_string();
                (credential, project_id)
            }
            _ => {
                let client_secret = manager
                    .credentials
                    .as_ref()
                    .and_then(|c| c.client_secret.as_ref());
                let values = read_credential_fields(
                    self.ctx.store.as_ref(),
                    namespace,
                    ID,
                    MISSING_CREDENTIALS,
                    &[CredentialField::required("clientSecret", client_secret)],
                )
                .await?;
                let key = ServiceAccountKey::parse(
                    values.get("clientSecret").map(String::as_str).unwrap_or_default(),
                )?;
                let credential = self.exchange(&key, scope).await?;
                (credential, key.project_id.clone())
            }
        };

        let token = credential
            .access_token()
            .map(str::to_string)
            .ok_or_else(|| ResolveError::identity("gcp", "token response carried no access token"))?;
        Ok((token, project_id))
    }

    async fn exchange(
        &self,
        key: &ServiceAccountKey,
        scope: &str,
    ) -> Result<IssuedCredential, ResolveError> {
        let cache_key = format!("gcp-service-account|{}|{}", key.client_email, scope);
        self.ctx
            .identities
            .cache()
            .get_or_fetch(&cache_key, || async {
                let assertion = key.assertion(scope)?;
                request_oauth_token(
                    &self.ctx.http,
                    "gcp",
                    key.token_uri(),
                    &[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())],
                )
                .await
            })
            .await
    }

    async fn access(
        &self,
        token: &str,
        project_id: &str,
        id: &str,
        version: Option<&str>,
    ) -> Result<String, ResolveError> {
        let name = if id.starts_with("projects/") {
            id.to_string()
        } else {
            format!(
                "projects/{}/secrets/{}/versions/{}",
                project_id,
                id,
                version.filter(|v| !v.is_empty()).unwrap_or("latest")
            )
        };
        let url = format!(
            "{}/v1/{}:access",
            self.ctx.endpoints.gcp_secret_manager_endpoint.trim_end_matches('/'),
            name
        );
        debug!(secret = %name, "Accessing GCP secret version");

        let response = self
            .ctx
            .http
            .get(&url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| ResolveError::backend(ID, format!("HTTP request failed: {}", e)))?;

        match response.status().as_u16() {
            200 => {
                let body: AccessSecretVersionResponse = response.json().await.map_err(|e| {
                    ResolveError::backend(ID, format!("Failed to parse response: {}", e))
                })?;
                let bytes = STANDARD.decode(body.payload.data.as_bytes()).map_err(|e| {
                    ResolveError::backend(ID, format!("payload is not base64: {}", e))
                })?;
                String::from_utf8(bytes)
                    .map_err(|_| ResolveError::backend(ID, "payload is not valid UTF-8"))
            }
            404 => Err(ResolveError::not_found(
                format!("gcp project {}", project_id),
                id,
            )),
            _ => Err(ResolveError::backend(
                ID,
                format!("Unexpected status: {}", response.status()),
            )),
        }
    }
}

#[async_trait]
impl SecretSource for GcpSecretManagerSource {
    fn id(&self) -> &'static str {
        ID
    }

    fn applies(&self, auth: &AuthConfig) -> bool {
        auth.gcp_secret_manager.is_some()
    }

    fn validate(
        &self,
        auth: &AuthConfig,
        request: &ResolveRequest<'_>,
    ) -> Result<(), ResolveError> {
        let Some(manager) = auth.gcp_secret_manager.as_ref() else {
            return Ok(());
        };

        let provider =
            declared_provider(manager.pod_identity.as_ref(), CONTEXT, ALLOWED_IDENTITIES)?;
        let client_secret = manager
            .credentials
            .as_ref()
            .and_then(|c| c.client_secret.as_ref());
        match (provider, client_secret) {
            (PodIdentityProvider::None, _) => {
                let missing = unshaped_fields(
                    &[CredentialField::required("clientSecret", client_secret)],
                    request.namespace,
                );
                if !missing.is_empty() {
                    return Err(incomplete(ID, MISSING_CREDENTIALS, missing));
                }
            }
            (_, Some(_)) => {
                return Err(ResolveError::configuration(
                    "gcpSecretManager credentials and podIdentity are mutually exclusive",
                ));
            }
            (_, None) => {}
        }

        for (index, secret) in manager.secrets.iter().enumerate() {
            require_entry_fields(
                ID,
                index,
                &[
                    ("parameter", secret.parameter.as_str()),
                    ("id", secret.id.as_str()),
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
        let Some(manager) = auth.gcp_secret_manager.as_ref() else {
            return Ok(resolved);
        };

        let (token, project_id) = self.session(manager, request.namespace).await?;
        if project_id.is_empty() && manager.secrets.iter().any(|s| !s.id.starts_with("projects/")) {
            return Err(ResolveError::configuration(
                "gcpSecretManager could not determine the project id",
            ));
        }

        let values = try_join_all(manager.secrets.iter().map(|secret| {
            self.access(&token, &project_id, &secret.id, secret.version.as_deref())
        }))
        .await?;

        for (secret, value) in manager.secrets.iter().zip(values) {
            resolved.insert(&secret.parameter, value, ID);
        }
        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_account_key_defaults() {
        let key = ServiceAccountKey::parse(
            r#"{"client_email":"sa@proj.iam.gserviceaccount.com","private_key":"pem","project_id":"proj"}"#,
        )
        .unwrap();
        assert_eq!(key.token_uri(), DEFAULT_GCP_TOKEN_URI);
        assert_eq!(key.project_id, "proj");
    }

    #[test]
    fn test_invalid_key_material() {
        assert!(ServiceAccountKey::parse("not json").unwrap_err().is_configuration());

        let key = ServiceAccountKey::parse(
            r#"{"client_email":"sa@proj.iam.gserviceaccount.com","private_key":"pem"}"#,
        )
        .unwrap();
        assert!(key.assertion("scope").unwrap_err().is_configuration());
    }
}
