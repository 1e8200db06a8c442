//! Authentication configuration attached to a trigger.
//!
//! Field names follow the `TriggerAuthentication` resource so manifests can
//! be deserialized directly.

use crate::error::ResolveError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Everything a trigger may declare about where its credentials come from.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_identity: Option<PodIdentity>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub secret_target_ref: Vec<SecretTargetRef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hashi_corp_vault: Option<HashiCorpVault>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub azure_key_vault: Option<AzureKeyVault>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aws_secret_manager: Option<AwsSecretManager>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aws_parameter_store: Option<AwsParameterStore>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gcp_secret_manager: Option<GcpSecretManager>,
}

/// Pod identity platforms understood by the resolver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PodIdentityProvider {
    None,
    AzureWorkload,
    Aws,
    Gcp,
}

impl PodIdentityProvider {
    pub const ALL: &'static [PodIdentityProvider] = &[
        PodIdentityProvider::None,
        PodIdentityProvider::AzureWorkload,
        PodIdentityProvider::Aws,
        PodIdentityProvider::Gcp,
    ];

    /// Parse the identifier as written in a manifest. The empty string is
    /// treated as `none`.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "" | "none" => Some(Self::None),
            "azure-workload" => Some(Self::AzureWorkload),
            "aws" => Some(Self::Aws),
            "gcp" => Some(Self::Gcp),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::AzureWorkload => "azure-workload",
            Self::Aws => "aws",
            Self::Gcp => "gcp",
        }
    }

    /// Token scope requested when a trigger asks for pod identity without
    /// naming a specific resource.
    pub fn default_scope(&self) -> &'static str {
        match self {
            Self::AzureWorkload => "https://management.azure.com/.default",
            Self::Gcp => "https://www.googleapis.com/auth/cloud-platform",
            Self::Aws | Self::None => "",
        }
    }
}

impl fmt::Display for PodIdentityProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodIdentity {
    #[serde(default)]
    pub provider: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity_tenant_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity_authority_host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role_arn: Option<String>,
}

impl PodIdentity {
    pub fn new(provider: PodIdentityProvider) -> Self {
        Self {
            provider: provider.as_str().to_string(),
            ..Default::default()
        }
    }

    /// Parse the provider and check it against the set a consumer accepts.
    ///
    /// `context` names the consumer in the error message, e.g. `key vault`.
    pub fn checked_provider(
        &self,
        context: &str,
        allowed: &[PodIdentityProvider],
    ) -> Result<PodIdentityProvider, ResolveError> {
        PodIdentityProvider::parse(&self.provider)
            .filter(|provider| allowed.contains(provider))
            .ok_or_else(|| ResolveError::UnsupportedProvider {
                provider: self.provider.clone(),
                context: context.to_string(),
            })
    }

    pub(crate) fn identity_id(&self) -> Option<&str> {
        self.identity_id.as_deref().filter(|id| !id.is_empty())
    }
}

/// Provider declared by an optional pod identity block; absent means none.
pub(crate) fn declared_provider(
    identity: Option<&PodIdentity>,
    context: &str,
    allowed: &[PodIdentityProvider],
) -> Result<PodIdentityProvider, ResolveError> {
    match identity {
        Some(identity) => identity.checked_provider(context, allowed),
        None => Ok(PodIdentityProvider::None),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretKeyRef {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub key: String,
}

impl SecretKeyRef {
    pub fn new(name: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key: key.into(),
        }
    }

    pub fn is_complete(&self) -> bool {
        !self.name.is_empty() && !self.key.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValueFromSecret {
    #[serde(default)]
    pub secret_key_ref: SecretKeyRef,
}

/// A credential field whose value lives in a cluster secret.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretValueRef {
    #[serde(default)]
    pub value_from: ValueFromSecret,
}

impl SecretValueRef {
    pub fn new(name: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            value_from: ValueFromSecret {
                secret_key_ref: SecretKeyRef::new(name, key),
            },
        }
    }

    pub fn key_ref(&self) -> &SecretKeyRef {
        &self.value_from.secret_key_ref
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretTargetRef {
    pub parameter: String,
    pub name: String,
    pub key: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvRef {
    pub parameter: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_name: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VaultAuthentication {
    #[default]
    Token,
    Kubernetes,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VaultCredential {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultSecret {
    pub parameter: String,
    pub path: String,
    pub key: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HashiCorpVault {
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default)]
    pub authentication: VaultAuthentication,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mount: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<VaultCredential>,
    #[serde(default)]
    pub secrets: Vec<VaultSecret>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AzureKeyVaultCredentials {
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub tenant_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<SecretValueRef>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AzureKeyVaultCloud {
    #[serde(rename = "type", default)]
    pub cloud_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_directory_endpoint: Option<String>,
    #[serde(
        rename = "keyVaultResourceURL",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub key_vault_resource_url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AzureKeyVaultSecret {
    pub parameter: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AzureKeyVault {
    #[serde(default)]
    pub vault_uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<AzureKeyVaultCredentials>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_identity: Option<PodIdentity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cloud: Option<AzureKeyVaultCloud>,
    #[serde(default)]
    pub secrets: Vec<AzureKeyVaultSecret>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AwsCredentials {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_key: Option<SecretValueRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_secret_key: Option<SecretValueRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<SecretValueRef>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AwsSecretManagerSecret {
    pub parameter: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_stage: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_key: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AwsSecretManager {
    #[serde(default)]
    pub region: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<AwsCredentials>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_identity: Option<PodIdentity>,
    #[serde(default)]
    pub secrets: Vec<AwsSecretManagerSecret>,
}

fn default_with_decryption() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AwsParameter {
    pub parameter: String,
    pub name: String,
    #[serde(default = "default_with_decryption")]
    pub with_decryption: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AwsParameterStore {
    #[serde(default)]
    pub region: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<AwsCredentials>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_identity: Option<PodIdentity>,
    #[serde(default)]
    pub secrets: Vec<AwsParameter>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GcpCredentials {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<SecretValueRef>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GcpSecret {
    pub parameter: String,
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GcpSecretManager {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<GcpCredentials>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_identity: Option<PodIdentity>,
    #[serde(default)]
    pub secrets: Vec<GcpSecret>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_parse() {
        assert_eq!(PodIdentityProvider::parse(""), Some(PodIdentityProvider::None));
        assert_eq!(
            PodIdentityProvider::parse("azure-workload"),
            Some(PodIdentityProvider::AzureWorkload)
        );
        assert_eq!(PodIdentityProvider::parse("aws"), Some(PodIdentityProvider::Aws));
        assert_eq!(PodIdentityProvider::parse("gcp"), Some(PodIdentityProvider::Gcp));
        assert_eq!(PodIdentityProvider::parse("kiam"), None);
        assert_eq!(PodIdentityProvider::parse("Azure-Workload"), None);
    }

    #[test]
    fn test_checked_provider_rejects_disallowed() {
        let identity = PodIdentity::new(PodIdentityProvider::Gcp);
        let err = identity
            .checked_provider(
                "key vault",
                &[PodIdentityProvider::None, PodIdentityProvider::AzureWorkload],
            )
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "key vault does not support pod identity provider - gcp"
        );
    }

    #[test]
    fn test_deserialize_trigger_authentication() {
        let json = serde_json::json!({
            "podIdentity": { "provider": "azure-workload", "identityId": "abc" },
            "secretTargetRef": [
                { "parameter": "connection", "name": "queue-secret", "key": "conn" }
            ],
            "azureKeyVault": {
                "vaultUri": "https://kv.vault.azure.net",
                "credentials": {
                    "clientId": "id",
                    "tenantId": "tenant",
                    "clientSecret": {
                        "valueFrom": { "secretKeyRef": { "name": "sp", "key": "secret" } }
                    }
                },
                "cloud": { "type": "Private", "keyVaultResourceURL": "https://vault.local" },
                "secrets": [ { "parameter": "password", "name": "db-password" } ]
            },
            "awsParameterStore": {
                "region": "eu-west-1",
                "secrets": [ { "parameter": "token", "name": "/app/token" } ]
            }
        });

        let auth: AuthConfig = serde_json::from_value(json).unwrap();
        assert_eq!(auth.pod_identity.as_ref().unwrap().provider, "azure-workload");
        assert_eq!(auth.secret_target_ref[0].key, "conn");

        let vault = auth.azure_key_vault.unwrap();
        let creds = vault.credentials.unwrap();
        assert_eq!(creds.client_secret.unwrap().key_ref().name, "sp");
        assert_eq!(
            vault.cloud.unwrap().key_vault_resource_url.as_deref(),
            Some("https://vault.local")
        );
        assert!(auth.aws_parameter_store.unwrap().secrets[0].with_decryption);
    }

    #[test]
    fn test_vault_authentication_defaults_to_token() {
        let vault: HashiCorpVault = serde_json::from_value(serde_json::json!({
            "address": "http://vault:8200"
        }))
        .unwrap();
        assert_eq!(vault.authentication, VaultAuthentication::Token);
    }
}
