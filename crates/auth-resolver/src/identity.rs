//! Pod identity adapters.
//!
//! Each adapter turns the platform identity of the running workload into
//! short-lived credentials. Issued credentials are shared through the
//! [`TokenCache`], keyed by provider, identity and scope.

use crate::auth::{PodIdentity, PodIdentityProvider};
use crate::cache::TokenCache;
use crate::endpoints::ProviderEndpoints;
use crate::error::ResolveError;
use crate::secret::IssuedCredential;
use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_credential_types::provider::ProvideCredentials;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

pub const AWS_ACCESS_KEY_ID: &str = "awsAccessKeyID";
pub const AWS_SECRET_ACCESS_KEY: &str = "awsSecretAccessKey";
pub const AWS_SESSION_TOKEN: &str = "awsSessionToken";
pub const GCP_PROJECT_ID: &str = "projectId";

const JWT_BEARER_ASSERTION: &str = "urn:ietf:params:oauth:client-assertion-type:jwt-bearer";

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    fn provider(&self) -> PodIdentityProvider;

    /// Issue a credential for `identity`. `scope` is an OAuth scope for
    /// Azure and GCP and the region for AWS.
    async fn issue(
        &self,
        identity: &PodIdentity,
        scope: &str,
    ) -> Result<IssuedCredential, ResolveError>;

    fn cache_key(&self, identity: &PodIdentity, scope: &str) -> String {
        format!(
            "{}|{}|{}|{}|{}|{}",
            self.provider(),
            identity.identity_id.as_deref().unwrap_or_default(),
            identity.identity_tenant_id.as_deref().unwrap_or_default(),
            identity.identity_authority_host.as_deref().unwrap_or_default(),
            identity.role_arn.as_deref().unwrap_or_default(),
            scope
        )
    }
}

/// Identity adapters by platform, fronted by the shared token cache.
pub struct IdentityRegistry {
    providers: HashMap<PodIdentityProvider, Arc<dyn IdentityProvider>>,
    cache: Arc<TokenCache>,
}

impl IdentityRegistry {
    pub fn new(cache: Arc<TokenCache>) -> Self {
        Self {
            providers: HashMap::new(),
            cache,
        }
    }

    /// Registry with the Azure, GCP and AWS adapters.
    pub fn with_defaults(
        cache: Arc<TokenCache>,
        http: reqwest::Client,
        endpoints: ProviderEndpoints,
    ) -> Self {
        let mut registry = Self::new(cache);
        registry.register(Arc::new(AzureWorkloadIdentity::new(
            http.clone(),
            endpoints.clone(),
        )));
        registry.register(Arc::new(GcpWorkloadIdentity::new(http, endpoints.clone())));
        registry.register(Arc::new(AwsPodIdentity::new(endpoints)));
        registry
    }

    pub fn register(&mut self, provider: Arc<dyn IdentityProvider>) {
        self.providers.insert(provider.provider(), provider);
    }

    pub fn cache(&self) -> &Arc<TokenCache> {
        &self.cache
    }

    /// Issue (or reuse) a credential for `identity`.
    pub async fn issue(
        &self,
        kind: PodIdentityProvider,
        identity: &PodIdentity,
        scope: &str,
    ) -> Result<IssuedCredential, ResolveError> {
        let provider = self.providers.get(&kind).ok_or_else(|| {
            ResolveError::UnsupportedProvider {
                provider: kind.to_string(),
                context: "resolver".to_string(),
            }
        })?;
        let key = provider.cache_key(identity, scope);
        self.cache
            .get_or_fetch(&key, || provider.issue(identity, scope))
            .await
    }
}

#[derive(Debug, Deserialize)]
struct OAuthTokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<Value>,
}

/// Expiry from an `expires_in` field, which some endpoints send as a string.
fn expiry_from(expires_in: Option<&Value>) -> Option<DateTime<Utc>> {
    let seconds = match expires_in? {
        Value::Number(n) => n.as_i64()?,
        Value::String(s) => s.parse().ok()?,
        _ => return None,
    };
    Some(Utc::now() + chrono::Duration::seconds(seconds))
}

/// POST a form to an OAuth token endpoint and read a bearer token back.
pub(crate) async fn request_oauth_token(
    http: &reqwest::Client,
    provider: &str,
    token_url: &str,
    form: &[(&str, &str)],
) -> Result<IssuedCredential, ResolveError> {
    debug!(provider = %provider, url = %token_url, "Requesting OAuth token");
    let response = http
        .post(token_url)
        .form(form)
        .send()
        .await
        .map_err(|e| ResolveError::identity(provider, format!("HTTP request failed: {}", e)))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(ResolveError::identity(
            provider,
            format!("token endpoint returned {}: {}", status, body),
        ));
    }

    let token: OAuthTokenResponse = response
        .json()
        .await
        .map_err(|e| ResolveError::identity(provider, format!("invalid token response: {}", e)))?;
    Ok(IssuedCredential::token(
        token.access_token,
        expiry_from(token.expires_in.as_ref()),
    ))
}

/// Azure AD workload identity: the projected service-account token is
/// exchanged for an access token with a client assertion.
pub struct AzureWorkloadIdentity {
    http: reqwest::Client,
    endpoints: ProviderEndpoints,
}

impl AzureWorkloadIdentity {
    pub fn new(http: reqwest::Client, endpoints: ProviderEndpoints) -> Self {
        Self { http, endpoints }
    }
}

#[async_trait]
impl IdentityProvider for AzureWorkloadIdentity {
    fn provider(&self) -> PodIdentityProvider {
        PodIdentityProvider::AzureWorkload
    }

    async fn issue(
        &self,
        identity: &PodIdentity,
        scope: &str,
    ) -> Result<IssuedCredential, ResolveError> {
        let provider = self.provider().as_str();
        let token_file = self
            .endpoints
            .azure_federated_token_file
            .as_ref()
            .ok_or_else(|| {
                ResolveError::identity(provider, "AZURE_FEDERATED_TOKEN_FILE is not set")
            })?;
        let client_id = identity
            .identity_id()
            .map(str::to_string)
            .or_else(|| self.endpoints.azure_client_id.clone())
            .ok_or_else(|| ResolveError::identity(provider, "no client id for workload identity"))?;
        let tenant_id = identity
            .identity_tenant_id
            .clone()
            .filter(|t| !t.is_empty())
            .or_else(|| self.endpoints.azure_tenant_id.clone())
            .ok_or_else(|| ResolveError::identity(provider, "no tenant id for workload identity"))?;
        let authority = identity
            .identity_authority_host
            .as_deref()
            .filter(|h| !h.is_empty())
            .map(|h| format!("{}/", h.trim_end_matches('/')))
            .unwrap_or_else(|| self.endpoints.azure_authority());

        let assertion = tokio::fs::read_to_string(token_file).await.map_err(|e| {
            ResolveError::identity(
                provider,
                format!("reading {}: {}", token_file.display(), e),
            )
        })?;

        let token_url = format!("{}{}/oauth2/v2.0/token", authority, tenant_id);
        let credential = request_oauth_token(
            &self.http,
            provider,
            &token_url,
            &[
                ("client_id", client_id.as_str()),
                ("scope", scope),
                ("grant_type", "client_credentials"),
                ("client_assertion_type", JWT_BEARER_ASSERTION),
                ("client_assertion", assertion.trim()),
            ],
        )
        .await?;
        info!(provider = %provider, client_id = %client_id, "Issued workload identity token");
        Ok(credential)
    }
}

/// GCP workload identity through the instance metadata server.
pub struct GcpWorkloadIdentity {
    http: reqwest::Client,
    endpoints: ProviderEndpoints,
}

impl GcpWorkloadIdentity {
    pub fn new(http: reqwest::Client, endpoints: ProviderEndpoints) -> Self {
        Self { http, endpoints }
    }

    async fn metadata_get(&self, path: &str) -> Result<reqwest::Response, ResolveError> {
        let url = format!(
            "{}/computeMetadata/v1/{}",
            self.endpoints.gcp_metadata_host.trim_end_matches('/'),
            path
        );
        let response = self
            .http
            .get(&url)
            .header("Metadata-Flavor", "Google")
            .send()
            .await
            .map_err(|e| ResolveError::identity("gcp", format!("metadata request failed: {}", e)))?;
        if !response.status().is_success() {
            return Err(ResolveError::identity(
                "gcp",
                format!("metadata server returned {} for {}", response.status(), path),
            ));
        }
        Ok(response)
    }
}

#[async_trait]
impl IdentityProvider for GcpWorkloadIdentity {
    fn provider(&self) -> PodIdentityProvider {
        PodIdentityProvider::Gcp
    }

    async fn issue(
        &self,
        identity: &PodIdentity,
        scope: &str,
    ) -> Result<IssuedCredential, ResolveError> {
        let account = identity.identity_id().unwrap_or("default");
        let token: OAuthTokenResponse = self
            .metadata_get(&format!(
                "instance/service-accounts/{}/token?scopes={}",
                account, scope
            ))
            .await?
            .json()
            .await
            .map_err(|e| ResolveError::identity("gcp", format!("invalid token response: {}", e)))?;

        let project_id = self
            .metadata_get("project/project-id")
            .await?
            .text()
            .await
            .map_err(|e| ResolveError::identity("gcp", format!("reading project id: {}", e)))?;

        debug!(account = %account, "Issued GCP metadata token");
        Ok(
            IssuedCredential::token(token.access_token, expiry_from(token.expires_in.as_ref()))
                .with_value(GCP_PROJECT_ID, project_id.trim()),
        )
    }
}

/// AWS credentials from the default provider chain (IRSA, pod identity
/// agent, instance profile), optionally assuming `roleArn`.
pub struct AwsPodIdentity {
    endpoints: ProviderEndpoints,
}

impl AwsPodIdentity {
    pub fn new(endpoints: ProviderEndpoints) -> Self {
        Self { endpoints }
    }
}

#[async_trait]
impl IdentityProvider for AwsPodIdentity {
    fn provider(&self) -> PodIdentityProvider {
        PodIdentityProvider::Aws
    }

    async fn issue(
        &self,
        identity: &PodIdentity,
        region: &str,
    ) -> Result<IssuedCredential, ResolveError> {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if !region.is_empty() {
            loader = loader.region(Region::new(region.to_string()));
        }
        if let Some(endpoint) = &self.endpoints.aws_endpoint_url {
            loader = loader.endpoint_url(endpoint);
        }
        let sdk_config = loader.load().await;

        let credentials = match identity.role_arn.as_deref().filter(|r| !r.is_empty()) {
            Some(role_arn) => {
                aws_config::sts::AssumeRoleProvider::builder(role_arn)
                    .session_name("scaling-engine")
                    .configure(&sdk_config)
                    .build()
                    .await
                    .provide_credentials()
                    .await
            }
            None => {
                let chain = sdk_config.credentials_provider().ok_or_else(|| {
                    ResolveError::identity("aws", "no credentials provider configured")
                })?;
                chain.provide_credentials().await
            }
        }
        .map_err(|e| ResolveError::identity("aws", e.to_string()))?;

        let mut issued = IssuedCredential {
            values: Default::default(),
            expires_at: credentials.expiry().map(DateTime::<Utc>::from),
        }
        .with_value(AWS_ACCESS_KEY_ID, credentials.access_key_id())
        .with_value(AWS_SECRET_ACCESS_KEY, credentials.secret_access_key());
        if let Some(session_token) = credentials.session_token() {
            issued = issued.with_value(AWS_SESSION_TOKEN, session_token);
        }
        Ok(issued)
    }
}
