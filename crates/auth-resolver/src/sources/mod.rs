//! Secret source adapters, one per backend.

mod aws;
mod azure_key_vault;
mod env;
mod gcp_secret_manager;
mod secret_ref;
mod vault;

pub use aws::{AwsParameterStoreSource, AwsSecretManagerSource};
pub use azure_key_vault::{AzureCloud, AzureKeyVaultSource};
pub use env::EnvSource;
pub use gcp_secret_manager::GcpSecretManagerSource;
pub use secret_ref::SecretTargetRefSource;
pub use vault::VaultSource;

use crate::auth::SecretValueRef;
use crate::endpoints::ProviderEndpoints;
use crate::error::ResolveError;
use crate::identity::IdentityRegistry;
use crate::resolver::SourceRegistry;
use crate::store::ClusterSecretStore;
use std::collections::HashMap;
use std::sync::Arc;

/// Shared handles every adapter may need.
#[derive(Clone)]
pub struct SourceContext {
    pub store: Arc<dyn ClusterSecretStore>,
    pub http: reqwest::Client,
    pub endpoints: ProviderEndpoints,
    pub identities: Arc<IdentityRegistry>,
}

/// Register the built-in adapters in precedence order; later sources win
/// when two produce the same parameter.
pub fn register_defaults(registry: &mut SourceRegistry, ctx: &SourceContext) {
    registry.register(Arc::new(SecretTargetRefSource::new(ctx.store.clone())));
    registry.register(Arc::new(EnvSource));
    registry.register(Arc::new(VaultSource::new(ctx.clone())));
    registry.register(Arc::new(AzureKeyVaultSource::new(ctx.clone())));
    registry.register(Arc::new(GcpSecretManagerSource::new(ctx.clone())));
    registry.register(Arc::new(AwsSecretManagerSource::new(ctx.clone())));
    registry.register(Arc::new(AwsParameterStoreSource::new(ctx.clone())));
}

/// An explicit credential field backed by a cluster secret reference.
pub(crate) struct CredentialField<'a> {
    pub name: &'static str,
    pub reference: Option<&'a SecretValueRef>,
    pub required: bool,
}

impl<'a> CredentialField<'a> {
    pub fn required(name: &'static str, reference: Option<&'a SecretValueRef>) -> Self {
        Self {
            name,
            reference,
            required: true,
        }
    }

    pub fn optional(name: &'static str, reference: Option<&'a SecretValueRef>) -> Self {
        Self {
            name,
            reference,
            required: false,
        }
    }

    fn is_shaped(&self, namespace: &str) -> bool {
        !namespace.is_empty()
            && self
                .reference
                .map(|r| r.key_ref().is_complete())
                .unwrap_or(false)
    }
}

/// Error for a credentials block that is missing `fields`.
pub(crate) fn incomplete(provider: &str, message: &str, fields: Vec<String>) -> ResolveError {
    ResolveError::IncompleteCredentials {
        provider: provider.to_string(),
        message: message.to_string(),
        fields,
    }
}

/// Required fields whose reference is absent or has an empty name or key,
/// or every required field when the namespace is empty.
pub(crate) fn unshaped_fields(fields: &[CredentialField<'_>], namespace: &str) -> Vec<String> {
    fields
        .iter()
        .filter(|f| f.required && !f.is_shaped(namespace))
        .map(|f| f.name.to_string())
        .collect()
}

/// Read every credential field from cluster secrets.
///
/// Fields are looked up independently so one bad reference does not hide
/// another. A referenced secret that does not exist wins over missing
/// values; otherwise all fields that came back empty are reported together.
/// Optional fields are skipped when unset and never reported.
pub(crate) async fn read_credential_fields(
    store: &dyn ClusterSecretStore,
    namespace: &str,
    provider: &str,
    message: &str,
    fields: &[CredentialField<'_>],
) -> Result<HashMap<&'static str, String>, ResolveError> {
    let mut values = HashMap::new();
    let mut missing = Vec::new();
    let mut not_found = None;

    for field in fields {
        if !field.is_shaped(namespace) {
            if field.required {
                missing.push(field.name.to_string());
            }
            continue;
        }
        let Some(reference) = field.reference else {
            continue;
        };
        let key_ref = reference.key_ref();
        match store.get_secret(namespace, &key_ref.name).await? {
            None => {
                not_found.get_or_insert_with(|| {
                    ResolveError::not_found(format!("namespace {}", namespace), &key_ref.name)
                });
            }
            Some(data) => match data.get(&key_ref.key).filter(|v| !v.is_empty()) {
                Some(value) => {
                    values.insert(field.name, value.clone());
                }
                None if field.required => missing.push(field.name.to_string()),
                None => {}
            },
        }
    }

    if let Some(err) = not_found {
        return Err(err);
    }
    if !missing.is_empty() {
        return Err(incomplete(provider, message, missing));
    }
    Ok(values)
}

/// Reject entries whose listed attributes are empty.
pub(crate) fn require_entry_fields(
    provider: &str,
    index: usize,
    fields: &[(&str, &str)],
) -> Result<(), ResolveError> {
    let empty: Vec<&str> = fields
        .iter()
        .filter(|(_, value)| value.is_empty())
        .map(|(name, _)| *name)
        .collect();
    if empty.is_empty() {
        Ok(())
    } else {
        Err(ResolveError::configuration(format!(
            "{} entry {} is missing {}",
            provider,
            index,
            empty.join(", ")
        )))
    }
}
