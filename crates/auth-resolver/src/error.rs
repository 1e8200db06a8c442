use thiserror::Error;

/// Failure modes of a credential resolution attempt.
///
/// `Configuration`, `UnsupportedProvider` and `IncompleteCredentials` are
/// detected from the shape of the authentication config and never involve a
/// network call. `SecretNotFound` means the referenced object is absent,
/// which is distinct from an object that exists but holds empty values.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error("invalid authentication configuration: {message}")]
    Configuration { message: String },

    #[error("{context} does not support pod identity provider - {provider}")]
    UnsupportedProvider { provider: String, context: String },

    #[error("{message} (missing: {})", fields.join(", "))]
    IncompleteCredentials {
        provider: String,
        message: String,
        fields: Vec<String>,
    },

    #[error("secret \"{name}\" not found in {store}")]
    SecretNotFound { store: String, name: String },

    #[error("{provider} request failed: {message}")]
    Backend { provider: String, message: String },

    #[error("{provider} identity could not be issued: {message}")]
    Identity { provider: String, message: String },
}

impl ResolveError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn backend(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Backend {
            provider: provider.into(),
            message: message.into(),
        }
    }

    pub fn identity(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Identity {
            provider: provider.into(),
            message: message.into(),
        }
    }

    pub fn not_found(store: impl Into<String>, name: impl Into<String>) -> Self {
        Self::SecretNotFound {
            store: store.into(),
            name: name.into(),
        }
    }

    /// Whether the error was raised before any backend was contacted.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::Configuration { .. }
                | Self::UnsupportedProvider { .. }
                | Self::IncompleteCredentials { .. }
        )
    }
}
