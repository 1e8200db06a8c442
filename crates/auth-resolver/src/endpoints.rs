use std::env;
use std::path::PathBuf;

pub const DEFAULT_AZURE_AUTHORITY_HOST: &str = "https://login.microsoftonline.com/";
pub const DEFAULT_GCP_METADATA_HOST: &str = "http://metadata.google.internal";
pub const DEFAULT_GCP_SECRET_MANAGER_ENDPOINT: &str = "https://secretmanager.googleapis.com";
pub const DEFAULT_GCP_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
pub const DEFAULT_SERVICE_ACCOUNT_TOKEN_PATH: &str =
    "/var/run/secrets/kubernetes.io/serviceaccount/token";

/// Where the identity and secret backends live.
///
/// Production defaults point at the public cloud endpoints; every field can
/// be redirected through the environment, which is also how tests aim the
/// adapters at a mock server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderEndpoints {
    pub azure_authority_host: String,
    pub azure_federated_token_file: Option<PathBuf>,
    pub azure_client_id: Option<String>,
    pub azure_tenant_id: Option<String>,
    pub gcp_metadata_host: String,
    pub gcp_secret_manager_endpoint: String,
    pub aws_endpoint_url: Option<String>,
    pub vault_service_account_token_path: PathBuf,
}

impl Default for ProviderEndpoints {
    fn default() -> Self {
        Self {
            azure_authority_host: DEFAULT_AZURE_AUTHORITY_HOST.to_string(),
            azure_federated_token_file: None,
            azure_client_id: None,
            azure_tenant_id: None,
            gcp_metadata_host: DEFAULT_GCP_METADATA_HOST.to_string(),
            gcp_secret_manager_endpoint: DEFAULT_GCP_SECRET_MANAGER_ENDPOINT.to_string(),
            aws_endpoint_url: None,
            vault_service_account_token_path: PathBuf::from(DEFAULT_SERVICE_ACCOUNT_TOKEN_PATH),
        }
    }
}

impl ProviderEndpoints {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            azure_authority_host: non_empty_var("AZURE_AUTHORITY_HOST")
                .unwrap_or(defaults.azure_authority_host),
            azure_federated_token_file: non_empty_var("AZURE_FEDERATED_TOKEN_FILE")
                .map(PathBuf::from),
            azure_client_id: non_empty_var("AZURE_CLIENT_ID"),
            azure_tenant_id: non_empty_var("AZURE_TENANT_ID"),
            gcp_metadata_host: non_empty_var("GCE_METADATA_HOST")
                .map(|host| {
                    if host.starts_with("http://") || host.starts_with("https://") {
                        host
                    } else {
                        format!("http://{}", host)
                    }
                })
                .unwrap_or(defaults.gcp_metadata_host),
            gcp_secret_manager_endpoint: non_empty_var("GCP_SECRET_MANAGER_ENDPOINT")
                .unwrap_or(defaults.gcp_secret_manager_endpoint),
            aws_endpoint_url: non_empty_var("AWS_ENDPOINT_URL"),
            vault_service_account_token_path: non_empty_var("VAULT_SA_TOKEN_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.vault_service_account_token_path),
        }
    }

    /// Authority host with exactly one trailing slash.
    pub fn azure_authority(&self) -> String {
        format!("{}/", self.azure_authority_host.trim_end_matches('/'))
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}
