//! AWS Secrets Manager and SSM Parameter Store.
//!
//! Both share one identity model: static keys from cluster secrets, or the
//! `aws` pod identity (optionally assuming a role). Requests are signed by
//! the AWS SDK.

use super::{
    incomplete, read_credential_fields, require_entry_fields, unshaped_fields, CredentialField,
    SourceContext,
};
use crate::auth::{declared_provider, AuthConfig, AwsCredentials, PodIdentity, PodIdentityProvider};
use crate::error::ResolveError;
use crate::identity::{AWS_ACCESS_KEY_ID, AWS_SECRET_ACCESS_KEY, AWS_SESSION_TOKEN};
use crate::resolver::{ResolveRequest, SecretSource};
use crate::secret::ResolvedSecret;
use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region, SdkConfig};
use aws_credential_types::Credentials;
use serde_json::Value;
use std::time::SystemTime;
use tracing::debug;

const SECRET_MANAGER_ID: &str = "awsSecretManager";
const PARAMETER_STORE_ID: &str = "awsParameterStore";
const ALLOWED_IDENTITIES: &[PodIdentityProvider] =
    &[PodIdentityProvider::None, PodIdentityProvider::Aws];
const MISSING_CREDENTIALS: &str =
    "accessKey and accessSecretKey are expected when not using a pod identity provider";

/// The identity-related part of an AWS block.
struct AwsAccess<'a> {
    id: &'static str,
    context: &'static str,
    region: &'a str,
    credentials: Option<&'a AwsCredentials>,
    pod_identity: Option<&'a PodIdentity>,
}

impl<'a> AwsAccess<'a> {
    fn fields(&self) -> [CredentialField<'a>; 3] {
        let credentials = self.credentials;
        [
            CredentialField::required(
                "accessKey",
                credentials.and_then(|c| c.access_key.as_ref()),
            ),
            CredentialField::required(
                "accessSecretKey",
                credentials.and_then(|c| c.access_secret_key.as_ref()),
            ),
            CredentialField::optional(
                "accessToken",
                credentials.and_then(|c| c.access_token.as_ref()),
            ),
        ]
    }

    fn validate(&self, namespace: &str) -> Result<(), ResolveError> {
        let provider = declared_provider(self.pod_identity, self.context, ALLOWED_IDENTITIES)?;
        match (provider, self.credentials) {
            (PodIdentityProvider::None, _) => {
                let missing = unshaped_fields(&self.fields(), namespace);
                if !missing.is_empty() {
                    return Err(incomplete(self.id, MISSING_CREDENTIALS, missing));
                }
            }
            (_, Some(_)) => {
                return Err(ResolveError::configuration(format!(
                    "{} credentials and podIdentity are mutually exclusive",
                    self.id
                )));
            }
            (_, None) => {}
        }
        if self.region.is_empty() {
            return Err(ResolveError::configuration(format!(
                "{} requires region",
                self.id
            )));
        }
        Ok(())
    }

    /// Build SDK configuration carrying the resolved credentials.
    async fn sdk_config(
        &self,
        ctx: &SourceContext,
        namespace: &str,
    ) -> Result<SdkConfig, ResolveError> {
        let provider = declared_provider(self.pod_identity, self.context, ALLOWED_IDENTITIES)?;

        let credentials = match (provider, self.pod_identity) {
            (PodIdentityProvider::Aws, Some(identity)) => {
                let issued = ctx
                    .identities
                    .issue(PodIdentityProvider::Aws, identity, self.region)
                    .await?;
                Credentials::new(
                    issued.get(AWS_ACCESS_KEY_ID).unwrap_or_default(),
                    issued.get(AWS_SECRET_ACCESS_KEY).unwrap_or_default(),
                    issued.get(AWS_SESSION_TOKEN).map(str::to_string),
                    issued.expires_at.map(SystemTime::from),
                    "pod-identity",
                )
            }
            _ => {
                let mut values = read_credential_fields(
                    ctx.store.as_ref(),
                    namespace,
                    self.id,
                    MISSING_CREDENTIALS,
                    &self.fields(),
                )
                .await?;
                Credentials::new(
                    values.remove("accessKey").unwrap_or_default(),
                    values.remove("accessSecretKey").unwrap_or_default(),
                    values.remove("accessToken"),
                    None,
                    "trigger-authentication",
                )
            }
        };

        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(self.region.to_string()))
            .credentials_provider(credentials);
        if let Some(endpoint) = &ctx.endpoints.aws_endpoint_url {
            loader = loader.endpoint_url(endpoint);
        }
        Ok(loader.load().await)
    }
}

/// Pick one field out of a JSON secret string.
fn json_field(secret_string: &str, field: &str) -> Result<String, ResolveError> {
    let json: Value = serde_json::from_str(secret_string).map_err(|e| {
        ResolveError::backend(
            SECRET_MANAGER_ID,
            format!("secret is not a JSON object, cannot read {}: {}", field, e),
        )
    })?;
    match json.get(field) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(Value::Null) | None => Err(ResolveError::backend(
            SECRET_MANAGER_ID,
            format!("secret has no field {}", field),
        )),
        Some(other) => Ok(other.to_string()),
    }
}

pub struct AwsSecretManagerSource {
    ctx: SourceContext,
}

impl AwsSecretManagerSource {
    pub fn new(ctx: SourceContext) -> Self {
        Self { ctx }
    }

    fn access(auth: &AuthConfig) -> Option<AwsAccess<'_>> {
        auth.aws_secret_manager.as_ref().map(|block| AwsAccess {
            id: SECRET_MANAGER_ID,
            context: "aws secret manager",
            region: &block.region,
            credentials: block.credentials.as_ref(),
            pod_identity: block.pod_identity.as_ref(),
        })
    }
}

#[async_trait]
impl SecretSource for AwsSecretManagerSource {
    fn id(&self) -> &'static str {
        SECRET_MANAGER_ID
    }

    fn applies(&self, auth: &AuthConfig) -> bool {
        auth.aws_secret_manager.is_some()
    }

    fn validate(
        &self,
        auth: &AuthConfig,
        request: &ResolveRequest<'_>,
    ) -> Result<(), ResolveError> {
        let (Some(access), Some(block)) = (Self::access(auth), auth.aws_secret_manager.as_ref())
        else {
            return Ok(());
        };
        access.validate(request.namespace)?;
        for (index, secret) in block.secrets.iter().enumerate() {
            require_entry_fields(
                SECRET_MANAGER_ID,
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
        let (Some(access), Some(block)) = (Self::access(auth), auth.aws_secret_manager.as_ref())
        else {
            return Ok(resolved);
        };

        let config = access.sdk_config(&self.ctx, request.namespace).await?;
        let client = aws_sdk_secretsmanager::Client::new(&config);

        for secret in &block.secrets {
            debug!(secret = %secret.name, region = %block.region, "Reading AWS secret");
            let output = client
                .get_secret_value()
                .secret_id(&secret.name)
                .set_version_id(secret.version_id.clone().filter(|v| !v.is_empty()))
                .set_version_stage(secret.version_stage.clone().filter(|v| !v.is_empty()))
                .send()
                .await
                .map_err(|e| {
                    let not_found = e
                        .as_service_error()
                        .map(|se| se.is_resource_not_found_exception())
                        .unwrap_or(false);
                    if not_found {
                        ResolveError::not_found(
                            format!("aws secrets manager {}", block.region),
                            &secret.name,
                        )
                    } else {
                        ResolveError::backend(
                            SECRET_MANAGER_ID,
                            aws_sdk_secretsmanager::error::DisplayErrorContext(&e).to_string(),
                        )
                    }
                })?;

            let secret_string = output.secret_string().ok_or_else(|| {
                ResolveError::backend(
                    SECRET_MANAGER_ID,
                    format!("secret {} has no string value", secret.name),
                )
            })?;
            let value = match secret.secret_key.as_deref().filter(|k| !k.is_empty()) {
                Some(field) => json_field(secret_string, field)?,
                None => secret_string.to_string(),
            };
            resolved.insert(&secret.parameter, value, SECRET_MANAGER_ID);
        }
        Ok(resolved)
    }
}

pub struct AwsParameterStoreSource {
    ctx: SourceContext,
}

impl AwsParameterStoreSource {
    pub fn new(ctx: SourceContext) -> Self {
        Self { ctx }
    }

    fn access(auth: &AuthConfig) -> Option<AwsAccess<'_>> {
        auth.aws_parameter_store.as_ref().map(|block| AwsAccess {
            id: PARAMETER_STORE_ID,
            context: "aws parameter store",
            region: &block.region,
            credentials: block.credentials.as_ref(),
            pod_identity: block.pod_identity.as_ref(),
        })
    }
}

#[async_trait]
impl SecretSource for AwsParameterStoreSource {
    fn id(&self) -> &'static str {
        PARAMETER_STORE_ID
    }

    fn applies(&self, auth: &AuthConfig) -> bool {
        auth.aws_parameter_store.is_some()
    }

    fn validate(
        &self,
        auth: &AuthConfig,
        request: &ResolveRequest<'_>,
    ) -> Result<(), ResolveError> {
        let (Some(access), Some(block)) = (Self::access(auth), auth.aws_parameter_store.as_ref())
        else {
            return Ok(());
        };
        access.validate(request.namespace)?;
        for (index, parameter) in block.secrets.iter().enumerate() {
            require_entry_fields(
                PARAMETER_STORE_ID,
                index,
                &[
                    ("parameter", parameter.parameter.as_str()),
                    ("name", parameter.name.as_str()),
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
        let (Some(access), Some(block)) = (Self::access(auth), auth.aws_parameter_store.as_ref())
        else {
            return Ok(resolved);
        };

        let config = access.sdk_config(&self.ctx, request.namespace).await?;
        let client = aws_sdk_ssm::Client::new(&config);

        for parameter in &block.secrets {
            debug!(parameter = %parameter.name, region = %block.region, "Reading SSM parameter");
            let output = client
                .get_parameter()
                .name(&parameter.name)
                .with_decryption(parameter.with_decryption)
                .send()
                .await
                .map_err(|e| {
                    let not_found = e
                        .as_service_error()
                        .map(|se| se.is_parameter_not_found())
                        .unwrap_or(false);
                    if not_found {
                        ResolveError::not_found(
                            format!("aws parameter store {}", block.region),
                            &parameter.name,
                        )
                    } else {
                        ResolveError::backend(
                            PARAMETER_STORE_ID,
                            aws_sdk_ssm::error::DisplayErrorContext(&e).to_string(),
                        )
                    }
                })?;

            let value = output
                .parameter()
                .and_then(|p| p.value())
                .ok_or_else(|| {
                    ResolveError::backend(
                        PARAMETER_STORE_ID,
                        format!("parameter {} has no value", parameter.name),
                    )
                })?;
            resolved.insert(&parameter.parameter, value, PARAMETER_STORE_ID);
        }
        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{AwsSecretManager, SecretValueRef};
    use crate::cache::TokenCache;
    use crate::endpoints::ProviderEndpoints;
    use crate::identity::IdentityRegistry;
    use crate::store::InMemorySecretStore;
    use std::sync::Arc;

    fn source() -> AwsSecretManagerSource {
        AwsSecretManagerSource::new(SourceContext {
            store: Arc::new(InMemorySecretStore::new()),
            http: reqwest::Client::new(),
            endpoints: ProviderEndpoints::default(),
            identities: Arc::new(IdentityRegistry::new(Arc::new(TokenCache::default()))),
        })
    }

    fn validate(block: AwsSecretManager) -> Result<(), ResolveError> {
        let auth = AuthConfig {
            aws_secret_manager: Some(block),
            ..Default::default()
        };
        source().validate(&auth, &ResolveRequest::new("apps"))
    }

    #[test]
    fn test_json_field_extraction() {
        let secret = r#"{"username":"admin","port":5432}"#;
        assert_eq!(json_field(secret, "username").unwrap(), "admin");
        assert_eq!(json_field(secret, "port").unwrap(), "5432");
        assert!(json_field(secret, "password").is_err());
        assert!(json_field("plain", "username").is_err());
    }

    #[test]
    fn test_missing_access_keys_are_listed() {
        let err = validate(AwsSecretManager {
            region: "eu-west-1".to_string(),
            credentials: Some(AwsCredentials {
                access_key: Some(SecretValueRef::new("aws", "key")),
                ..Default::default()
            }),
            ..Default::default()
        })
        .unwrap_err();
        match err {
            ResolveError::IncompleteCredentials { fields, .. } => {
                assert_eq!(fields, vec!["accessSecretKey"]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_identity_and_region_checks() {
        let err = validate(AwsSecretManager {
            region: "eu-west-1".to_string(),
            pod_identity: Some(PodIdentity::new(PodIdentityProvider::AzureWorkload)),
            ..Default::default()
        })
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "aws secret manager does not support pod identity provider - azure-workload"
        );

        let err = validate(AwsSecretManager {
            pod_identity: Some(PodIdentity::new(PodIdentityProvider::Aws)),
            ..Default::default()
        })
        .unwrap_err();
        assert!(err.to_string().contains("requires region"));
    }
}
