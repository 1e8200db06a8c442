//! Authentication resources known to the engine, looked up per cycle so a
//! trigger picks up changes without re-applying its object.

use crate::spec::{AuthenticationKind, AuthenticationRef};
use auth_resolver::{AuthConfig, ResolveError};
use std::collections::HashMap;
use std::sync::RwLock;

/// An authentication resource together with the namespace its cluster
/// secrets are read from.
#[derive(Debug, Clone)]
pub struct BoundAuth {
    pub config: AuthConfig,
    pub namespace: String,
}

pub struct AuthCatalog {
    namespaced: RwLock<HashMap<(String, String), AuthConfig>>,
    cluster: RwLock<HashMap<String, AuthConfig>>,
    cluster_namespace: String,
}

impl AuthCatalog {
    /// `cluster_namespace` is where cluster-scoped authentications read
    /// their secrets from.
    pub fn new(cluster_namespace: impl Into<String>) -> Self {
        Self {
            namespaced: RwLock::new(HashMap::new()),
            cluster: RwLock::new(HashMap::new()),
            cluster_namespace: cluster_namespace.into(),
        }
    }

    pub fn apply(&self, namespace: &str, name: &str, config: AuthConfig) {
        if let Ok(mut map) = self.namespaced.write() {
            map.insert((namespace.to_string(), name.to_string()), config);
        }
    }

    pub fn apply_cluster(&self, name: &str, config: AuthConfig) {
        if let Ok(mut map) = self.cluster.write() {
            map.insert(name.to_string(), config);
        }
    }

    pub fn remove(&self, namespace: &str, name: &str) -> bool {
        self.namespaced
            .write()
            .map(|mut map| map.remove(&(namespace.to_string(), name.to_string())).is_some())
            .unwrap_or(false)
    }

    pub fn remove_cluster(&self, name: &str) -> bool {
        self.cluster
            .write()
            .map(|mut map| map.remove(name).is_some())
            .unwrap_or(false)
    }

    /// Find what `reference` points at from an object in `namespace`.
    pub fn lookup(
        &self,
        namespace: &str,
        reference: &AuthenticationRef,
    ) -> Result<BoundAuth, ResolveError> {
        let found = match reference.kind {
            AuthenticationKind::TriggerAuthentication => self
                .namespaced
                .read()
                .ok()
                .and_then(|map| {
                    map.get(&(namespace.to_string(), reference.name.clone()))
                        .cloned()
                })
                .map(|config| BoundAuth {
                    config,
                    namespace: namespace.to_string(),
                }),
            AuthenticationKind::ClusterTriggerAuthentication => self
                .cluster
                .read()
                .ok()
                .and_then(|map| map.get(&reference.name).cloned())
                .map(|config| BoundAuth {
                    config,
                    namespace: self.cluster_namespace.clone(),
                }),
        };

        found.ok_or_else(|| {
            ResolveError::configuration(format!(
                "{:?} {} not found in namespace {}",
                reference.kind, reference.name, namespace
            ))
        })
    }
}
