use crate::auth::{declared_provider, AuthConfig, PodIdentityProvider};
use crate::cache::TokenCache;
use crate::endpoints::ProviderEndpoints;
use crate::error::ResolveError;
use crate::identity::IdentityRegistry;
use crate::secret::ResolvedSecret;
use crate::sources::{self, SourceContext};
use crate::store::ClusterSecretStore;
use async_trait::async_trait;
use futures_util::future::try_join_all;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// A container of the scale target, as seen by the `env` source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetContainer {
    pub name: String,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

/// Where a resolution happens: the trigger's namespace and the containers
/// of the workload being scaled.
#[derive(Debug, Clone, Copy)]
pub struct ResolveRequest<'a> {
    pub namespace: &'a str,
    pub containers: &'a [TargetContainer],
}

impl<'a> ResolveRequest<'a> {
    pub fn new(namespace: &'a str) -> Self {
        Self {
            namespace,
            containers: &[],
        }
    }

    pub fn with_containers(mut self, containers: &'a [TargetContainer]) -> Self {
        self.containers = containers;
        self
    }
}

/// One secret backend.
///
/// `validate` must not perform I/O; the resolver runs it for every
/// applicable source before the first `fetch`.
#[async_trait]
pub trait SecretSource: Send + Sync {
    fn id(&self) -> &'static str;

    fn applies(&self, auth: &AuthConfig) -> bool;

    fn validate(&self, auth: &AuthConfig, request: &ResolveRequest<'_>)
        -> Result<(), ResolveError>;

    async fn fetch(
        &self,
        auth: &AuthConfig,
        request: &ResolveRequest<'_>,
    ) -> Result<ResolvedSecret, ResolveError>;
}

/// Secret sources in precedence order.
#[derive(Default, Clone)]
pub struct SourceRegistry {
    sources: Vec<Arc<dyn SecretSource>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a source. A source with an id that is already registered
    /// replaces the old one and keeps its position.
    pub fn register(&mut self, source: Arc<dyn SecretSource>) {
        match self.sources.iter_mut().find(|s| s.id() == source.id()) {
            Some(slot) => *slot = source,
            None => self.sources.push(source),
        }
    }

    pub fn ids(&self) -> Vec<&'static str> {
        self.sources.iter().map(|s| s.id()).collect()
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    fn applicable<'s>(&'s self, auth: &AuthConfig) -> Vec<&'s Arc<dyn SecretSource>> {
        self.sources.iter().filter(|s| s.applies(auth)).collect()
    }
}

/// Handles the default resolver is assembled from.
pub struct ResolverDeps {
    pub store: Arc<dyn ClusterSecretStore>,
    pub http: reqwest::Client,
    pub endpoints: ProviderEndpoints,
    pub token_refresh_margin: Duration,
}

pub struct Resolver {
    sources: SourceRegistry,
    identities: Arc<IdentityRegistry>,
}

impl Resolver {
    pub fn new(sources: SourceRegistry, identities: Arc<IdentityRegistry>) -> Self {
        Self {
            sources,
            identities,
        }
    }

    /// Resolver with every built-in source and identity adapter.
    pub fn with_defaults(deps: ResolverDeps) -> Self {
        let cache = Arc::new(TokenCache::new(deps.token_refresh_margin));
        let identities = Arc::new(IdentityRegistry::with_defaults(
            cache,
            deps.http.clone(),
            deps.endpoints.clone(),
        ));
        let ctx = SourceContext {
            store: deps.store,
            http: deps.http,
            endpoints: deps.endpoints,
            identities: identities.clone(),
        };
        let mut registry = SourceRegistry::new();
        sources::register_defaults(&mut registry, &ctx);
        Self::new(registry, identities)
    }

    pub fn sources(&self) -> &SourceRegistry {
        &self.sources
    }

    pub fn identities(&self) -> &Arc<IdentityRegistry> {
        &self.identities
    }

    /// Resolve every parameter `auth` declares.
    ///
    /// Shape errors from any source are reported before any backend is
    /// contacted. If one source fails the whole call fails; no partial
    /// result is returned.
    pub async fn resolve(
        &self,
        auth: &AuthConfig,
        request: &ResolveRequest<'_>,
    ) -> Result<ResolvedSecret, ResolveError> {
        let identity_provider = declared_provider(
            auth.pod_identity.as_ref(),
            "trigger authentication",
            PodIdentityProvider::ALL,
        )?;

        let applicable = self.sources.applicable(auth);
        for source in &applicable {
            source.validate(auth, request)?;
        }

        let mut resolved = ResolvedSecret::new();
        if let (Some(identity), true) = (
            auth.pod_identity.as_ref(),
            identity_provider != PodIdentityProvider::None,
        ) {
            let credential = self
                .identities
                .issue(identity_provider, identity, identity_provider.default_scope())
                .await?;
            resolved.absorb_credential(identity_provider.as_str(), credential);
        }

        let fetched = try_join_all(applicable.iter().map(|source| async move {
            debug!(source = source.id(), namespace = %request.namespace, "Fetching secrets");
            source.fetch(auth, request).await
        }))
        .await?;

        for part in fetched {
            resolved.merge(part);
        }
        Ok(resolved)
    }
}
