//! Credential resolution for scaler triggers.
//!
//! A trigger's [`AuthConfig`] names where each secret parameter comes from:
//! cluster secrets, the scale target's environment, HashiCorp Vault, Azure
//! Key Vault, GCP Secret Manager, AWS Secrets Manager or SSM Parameter
//! Store, optionally combined with a pod identity. [`Resolver::resolve`]
//! validates the whole configuration up front, then asks every applicable
//! [`SecretSource`] for its parameters and merges them in precedence order.
//!
//! Identity credentials issued along the way are shared through a
//! single-flight [`TokenCache`].

pub mod auth;
pub mod cache;
pub mod endpoints;
pub mod error;
pub mod identity;
pub mod resolver;
pub mod secret;
pub mod sources;
pub mod store;

pub use auth::{AuthConfig, PodIdentity, PodIdentityProvider};
pub use cache::TokenCache;
pub use endpoints::ProviderEndpoints;
pub use error::ResolveError;
pub use identity::{IdentityProvider, IdentityRegistry};
pub use resolver::{
    ResolveRequest, Resolver, ResolverDeps, SecretSource, SourceRegistry, TargetContainer,
};
pub use secret::{redact_value, IssuedCredential, ResolvedSecret, SecretValue};
pub use sources::SourceContext;
pub use store::{ClusterSecretStore, FileSecretStore, InMemorySecretStore, SecretData};
