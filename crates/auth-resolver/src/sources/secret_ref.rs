use super::require_entry_fields;
use crate::auth::AuthConfig;
use crate::error::ResolveError;
use crate::resolver::{ResolveRequest, SecretSource};
use crate::secret::ResolvedSecret;
use crate::store::{ClusterSecretStore, SecretData};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

const ID: &str = "secretTargetRef";

/// Parameters read straight from cluster secrets in the trigger's namespace.
pub struct SecretTargetRefSource {
    store: Arc<dyn ClusterSecretStore>,
}

impl SecretTargetRefSource {
    pub fn new(store: Arc<dyn ClusterSecretStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl SecretSource for SecretTargetRefSource {
    fn id(&self) -> &'static str {
        ID
    }

    fn applies(&self, auth: &AuthConfig) -> bool {
        !auth.secret_target_ref.is_empty()
    }

    fn validate(
        &self,
        auth: &AuthConfig,
        request: &ResolveRequest<'_>,
    ) -> Result<(), ResolveError> {
        if request.namespace.is_empty() {
            return Err(ResolveError::configuration(
                "secretTargetRef requires the trigger namespace",
            ));
        }
        for (index, target) in auth.secret_target_ref.iter().enumerate() {
            require_entry_fields(
                ID,
                index,
                &[
                    ("parameter", target.parameter.as_str()),
                    ("name", target.name.as_str()),
                    ("key", target.key.as_str()),
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
        // Several parameters commonly point into the same secret.
        let mut secrets: HashMap<&str, SecretData> = HashMap::new();
        let mut resolved = ResolvedSecret::new();

        for target in &auth.secret_target_ref {
            if !secrets.contains_key(target.name.as_str()) {
                let data = self
                    .store
                    .get_secret(request.namespace, &target.name)
                    .await?
                    .ok_or_else(|| {
                        ResolveError::not_found(
                            format!("namespace {}", request.namespace),
                            &target.name,
                        )
                    })?;
                secrets.insert(target.name.as_str(), data);
            }

            let value = secrets
                .get(target.name.as_str())
                .and_then(|data| data.get(&target.key))
                .ok_or_else(|| ResolveError::IncompleteCredentials {
                    provider: ID.to_string(),
                    message: format!("secret {} has no key {}", target.name, target.key),
                    fields: vec![target.parameter.clone()],
                })?;
            resolved.insert(&target.parameter, value, ID);
        }

        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::SecretTargetRef;
    use crate::store::InMemorySecretStore;

    fn auth(targets: &[(&str, &str, &str)]) -> AuthConfig {
        AuthConfig {
            secret_target_ref: targets
                .iter()
                .map(|(parameter, name, key)| SecretTargetRef {
                    parameter: parameter.to_string(),
                    name: name.to_string(),
                    key: key.to_string(),
                })
                .collect(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_reads_parameters_from_cluster_secret() {
        let store = Arc::new(InMemorySecretStore::new());
        store.insert("apps", "rabbit", [("host", "amqp://rabbit"), ("user", "guest")]);
        let source = SecretTargetRefSource::new(store);
        let auth = auth(&[("host", "rabbit", "host"), ("username", "rabbit", "user")]);

        let request = ResolveRequest::new("apps");
        source.validate(&auth, &request).unwrap();
        let secret = source.fetch(&auth, &request).await.unwrap();
        assert_eq!(secret.get("host"), Some("amqp://rabbit"));
        assert_eq!(secret.get("username"), Some("guest"));
        assert_eq!(secret.provider_of("host"), Some(ID));
    }

    #[tokio::test]
    async fn test_missing_secret_is_not_found() {
        let source = SecretTargetRefSource::new(Arc::new(InMemorySecretStore::new()));
        let auth = auth(&[("host", "rabbit", "host")]);
        let err = source
            .fetch(&auth, &ResolveRequest::new("apps"))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ResolveError::SecretNotFound {
                store: "namespace apps".to_string(),
                name: "rabbit".to_string()
            }
        );
    }

    #[test]
    fn test_empty_entry_fields_are_rejected() {
        let source = SecretTargetRefSource::new(Arc::new(InMemorySecretStore::new()));
        let err = source
            .validate(&auth(&[("host", "", "host")]), &ResolveRequest::new("apps"))
            .unwrap_err();
        assert!(err.to_string().contains("missing name"));

        let err = source
            .validate(&auth(&[("host", "rabbit", "host")]), &ResolveRequest::new(""))
            .unwrap_err();
        assert!(err.is_configuration());
    }
}
