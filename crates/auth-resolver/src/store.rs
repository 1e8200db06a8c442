//! Cluster secret access.
//!
//! The cluster API itself is outside this crate; resolution only needs to read
//! a named secret's data in a namespace. `FileSecretStore` serves a JSON
//! snapshot for local runs, `InMemorySecretStore` backs tests and embedders.

use crate::error::ResolveError;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tracing::{debug, warn};

/// Key/value data of one cluster secret.
pub type SecretData = BTreeMap<String, String>;

#[async_trait]
pub trait ClusterSecretStore: Send + Sync {
    /// Returns `Ok(None)` when the secret does not exist in the namespace.
    async fn get_secret(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<SecretData>, ResolveError>;
}

#[derive(Default)]
pub struct InMemorySecretStore {
    secrets: RwLock<HashMap<(String, String), SecretData>>,
}

impl InMemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<I, K, V>(&self, namespace: &str, name: &str, data: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let data = data
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        self.secrets
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert((namespace.to_string(), name.to_string()), data);
    }

    pub fn remove(&self, namespace: &str, name: &str) -> Option<SecretData> {
        self.secrets
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&(namespace.to_string(), name.to_string()))
    }
}

#[async_trait]
impl ClusterSecretStore for InMemorySecretStore {
    async fn get_secret(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<SecretData>, ResolveError> {
        let secrets = self
            .secrets
            .read()
            .map_err(|_| ResolveError::backend("cluster secrets", "secret store lock poisoned"))?;
        Ok(secrets
            .get(&(namespace.to_string(), name.to_string()))
            .cloned())
    }
}

/// Reads secrets from a JSON file shaped
/// `{ "<namespace>": { "<secret>": { "<key>": "<value>" } } }`.
///
/// The file is re-read on every lookup so edits are picked up without a
/// restart.
pub struct FileSecretStore {
    secrets_file: PathBuf,
}

impl FileSecretStore {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            secrets_file: path.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.secrets_file
    }

    async fn load(&self) -> Result<HashMap<String, HashMap<String, SecretData>>, ResolveError> {
        let content = match tokio::fs::read_to_string(&self.secrets_file).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("Secrets file does not exist, returning empty store");
                return Ok(HashMap::new());
            }
            Err(e) => {
                return Err(ResolveError::backend(
                    "cluster secrets",
                    format!("{}: {}", self.secrets_file.display(), e),
                ))
            }
        };

        if content.trim().is_empty() {
            return Ok(HashMap::new());
        }

        let json_value: Value = serde_json::from_str(&content).map_err(|e| {
            ResolveError::backend(
                "cluster secrets",
                format!("invalid JSON in {}: {}", self.secrets_file.display(), e),
            )
        })?;

        let mut namespaces = HashMap::new();
        if let Some(obj) = json_value.as_object() {
            for (namespace, namespace_value) in obj {
                let Some(namespace_obj) = namespace_value.as_object() else {
                    continue;
                };
                let mut secrets = HashMap::new();
                for (name, secret_value) in namespace_obj {
                    let Some(secret_obj) = secret_value.as_object() else {
                        continue;
                    };
                    let mut data = SecretData::new();
                    for (key, value) in secret_obj {
                        if let Some(string_value) = value.as_str() {
                            data.insert(key.clone(), string_value.to_string());
                        } else {
                            warn!(
                                namespace = %namespace,
                                secret = %name,
                                key = %key,
                                "Ignoring non-string value in secrets file"
                            );
                        }
                    }
                    secrets.insert(name.clone(), data);
                }
                namespaces.insert(namespace.clone(), secrets);
            }
        }

        Ok(namespaces)
    }

    /// Check file permissions and warn if too permissive
    #[cfg(unix)]
    pub fn check_permissions(&self) -> Result<(), ResolveError> {
        use std::os::unix::fs::MetadataExt;

        if !self.secrets_file.exists() {
            return Ok(());
        }

        let metadata = std::fs::metadata(&self.secrets_file).map_err(|e| {
            ResolveError::backend(
                "cluster secrets",
                format!("Failed to read file metadata: {}", e),
            )
        })?;

        let permissions = metadata.mode() & 0o777;
        if permissions & 0o077 != 0 {
            warn!(
                "Secrets file {} has permissive permissions: {:o}. Recommended: 600",
                self.secrets_file.display(),
                permissions
            );
        }

        Ok(())
    }

    #[cfg(not(unix))]
    pub fn check_permissions(&self) -> Result<(), ResolveError> {
        Ok(())
    }
}

#[async_trait]
impl ClusterSecretStore for FileSecretStore {
    async fn get_secret(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<SecretData>, ResolveError> {
        let mut namespaces = self.load().await?;
        Ok(namespaces
            .get_mut(namespace)
            .and_then(|secrets| secrets.remove(name)))
    }
}
