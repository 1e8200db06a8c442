use super::{incomplete, require_entry_fields, SourceContext};
use crate::auth::{AuthConfig, HashiCorpVault, VaultAuthentication};
use crate::error::ResolveError;
use crate::resolver::{ResolveRequest, SecretSource};
use crate::secret::{IssuedCredential, ResolvedSecret};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::RequestBuilder;
use serde::Deserialize;
use serde_json::Value;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

const ID: &str = "hashiCorpVault";
const DEFAULT_MAX_RETRIES: u32 = 3;

#[derive(Error, Debug)]
enum VaultHttpError {
    #[error("Vault HTTP request failed: {message}")]
    RequestFailed { message: String },

    #[error("Vault authentication failed: {message}")]
    AuthFailed { message: String },

    #[error("Invalid Vault response format: {message}")]
    InvalidResponse { message: String },

    #[error("Secret not found")]
    NotFound,
}

#[derive(Debug, Deserialize)]
struct VaultLoginResponse {
    auth: VaultLoginAuth,
}

#[derive(Debug, Deserialize)]
struct VaultLoginAuth {
    client_token: String,
    #[serde(default)]
    lease_duration: i64,
}

/// HashiCorp Vault, authenticated by a static token or a Kubernetes
/// service-account login. KV v2 and KV v1 layouts are both read.
pub struct VaultSource {
    ctx: SourceContext,
    max_retries: u32,
}

impl VaultSource {
    pub fn new(ctx: SourceContext) -> Self {
        Self {
            ctx,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries.max(1);
        self
    }

    fn address(vault: &HashiCorpVault) -> &str {
        vault.address.trim_end_matches('/')
    }

    fn build_headers(vault: &HashiCorpVault, token: Option<&str>) -> Result<HeaderMap, ResolveError> {
        let mut headers = HeaderMap::new();
        if let Some(token) = token {
            headers.insert(
                "X-Vault-Token",
                HeaderValue::from_str(token)
                    .map_err(|_| ResolveError::configuration("vault token is not a valid header"))?,
            );
        }
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        if let Some(namespace) = vault.namespace.as_deref().filter(|n| !n.is_empty()) {
            headers.insert(
                "X-Vault-Namespace",
                HeaderValue::from_str(namespace)
                    .map_err(|_| ResolveError::configuration("vault namespace is not a valid header"))?,
            );
        }

        Ok(headers)
    }

    async fn retry_with_backoff<F>(&self, mut request: F) -> Result<Value, VaultHttpError>
    where
        F: FnMut() -> RequestBuilder,
    {
        let mut last_error = None;
        let mut backoff_ms = 100;

        for attempt in 0..self.max_retries {
            match Self::send(request()).await {
                Ok(result) => return Ok(result),
                Err(e) => {
                    // Auth failures and missing secrets will not change on retry
                    if matches!(e, VaultHttpError::AuthFailed { .. } | VaultHttpError::NotFound) {
                        return Err(e);
                    }

                    last_error = Some(e);

                    if attempt + 1 < self.max_retries {
                        debug!(
                            "Attempt {} failed, retrying in {}ms",
                            attempt + 1,
                            backoff_ms
                        );
                        tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                        backoff_ms *= 2;
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| VaultHttpError::RequestFailed {
            message: "All retry attempts exhausted".to_string(),
        }))
    }

    async fn send(request: RequestBuilder) -> Result<Value, VaultHttpError> {
        let response = request
            .send()
            .await
            .map_err(|e| VaultHttpError::RequestFailed {
                message: format!("HTTP request failed: {}", e),
            })?;

        match response.status().as_u16() {
            200 => response
                .json()
                .await
                .map_err(|e| VaultHttpError::InvalidResponse {
                    message: format!("Failed to parse response: {}", e),
                }),
            401 | 403 => Err(VaultHttpError::AuthFailed {
                message: format!("Authentication failed: {}", response.status()),
            }),
            404 => Err(VaultHttpError::NotFound),
            status if status >= 500 => Err(VaultHttpError::RequestFailed {
                message: format!("Server error: {}", response.status()),
            }),
            _ => Err(VaultHttpError::RequestFailed {
                message: format!("Unexpected status: {}", response.status()),
            }),
        }
    }

    fn service_account_token_path(&self, vault: &HashiCorpVault) -> PathBuf {
        vault
            .credential
            .as_ref()
            .and_then(|c| c.service_account.as_deref())
            .filter(|p| !p.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| self.ctx.endpoints.vault_service_account_token_path.clone())
    }

    async fn kubernetes_login(&self, vault: &HashiCorpVault) -> Result<IssuedCredential, ResolveError> {
        let mount = vault.mount.as_deref().unwrap_or_default();
        let role = vault.role.as_deref().unwrap_or_default();
        let token_path = self.service_account_token_path(vault);
        let jwt = tokio::fs::read_to_string(&token_path).await.map_err(|e| {
            ResolveError::identity(ID, format!("reading {}: {}", token_path.display(), e))
        })?;

        let url = format!("{}/v1/auth/{}/login", Self::address(vault), mount);
        let headers = Self::build_headers(vault, None)?;
        let body = serde_json::json!({ "jwt": jwt.trim(), "role": role });

        let value = self
            .retry_with_backoff(|| {
                self.ctx
                    .http
                    .post(&url)
                    .headers(headers.clone())
                    .json(&body)
            })
            .await
            .map_err(|e| ResolveError::identity(ID, e.to_string()))?;
        let login: VaultLoginResponse = serde_json::from_value(value)
            .map_err(|e| ResolveError::identity(ID, format!("invalid login response: {}", e)))?;

        let expires_at = (login.auth.lease_duration > 0)
            .then(|| Utc::now() + chrono::Duration::seconds(login.auth.lease_duration));
        debug!(mount = %mount, role = %role, "Logged in to Vault");
        Ok(IssuedCredential::token(login.auth.client_token, expires_at))
    }

    fn login_cache_key(&self, vault: &HashiCorpVault) -> String {
        format!(
            "vault|{}|{}|{}|{}|{}",
            Self::address(vault),
            vault.namespace.as_deref().unwrap_or_default(),
            vault.mount.as_deref().unwrap_or_default(),
            vault.role.as_deref().unwrap_or_default(),
            self.service_account_token_path(vault).display()
        )
    }

    async fn client_token(&self, vault: &HashiCorpVault) -> Result<String, ResolveError> {
        match vault.authentication {
            VaultAuthentication::Token => Ok(vault
                .credential
                .as_ref()
                .and_then(|c| c.token.clone())
                .unwrap_or_default()),
            VaultAuthentication::Kubernetes => {
                let key = self.login_cache_key(vault);
                let credential = self
                    .ctx
                    .identities
                    .cache()
                    .get_or_fetch(&key, || self.kubernetes_login(vault))
                    .await?;
                credential
                    .access_token()
                    .map(str::to_string)
                    .ok_or_else(|| ResolveError::identity(ID, "login returned no client token"))
            }
        }
    }

    async fn read_secret(
        &self,
        vault: &HashiCorpVault,
        headers: &HeaderMap,
        path: &str,
        key: &str,
    ) -> Result<String, ResolveError> {
        let url = format!("{}/v1/{}", Self::address(vault), path.trim_start_matches('/'));
        debug!("Resolving secret from Vault: {}", path);

        let body = self
            .retry_with_backoff(|| self.ctx.http.get(&url).headers(headers.clone()))
            .await
            .map_err(|e| match e {
                VaultHttpError::NotFound => {
                    ResolveError::not_found(format!("vault {}", Self::address(vault)), path)
                }
                other => ResolveError::backend(ID, other.to_string()),
            })?;

        extract_key(&body, key).ok_or_else(|| {
            ResolveError::backend(ID, format!("Key '{}' not found in Vault response", key))
        })
    }
}

/// Value of `key` in a KV v2 (`data.data`) or KV v1 (`data`) response.
fn extract_key(body: &Value, key: &str) -> Option<String> {
    let data = body.get("data")?;
    let fields = match data.get("data") {
        Some(inner) if inner.is_object() => inner,
        _ => data,
    };
    match fields.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

#[async_trait]
impl SecretSource for VaultSource {
    fn id(&self) -> &'static str {
        ID
    }

    fn applies(&self, auth: &AuthConfig) -> bool {
        auth.hashi_corp_vault.is_some()
    }

    fn validate(
        &self,
        auth: &AuthConfig,
        _request: &ResolveRequest<'_>,
    ) -> Result<(), ResolveError> {
        let Some(vault) = auth.hashi_corp_vault.as_ref() else {
            return Ok(());
        };

        if !vault.address.starts_with("http://") && !vault.address.starts_with("https://") {
            return Err(ResolveError::configuration(format!(
                "Invalid vault address format: {}. Must start with http:// or https://",
                vault.address
            )));
        }

        match vault.authentication {
            VaultAuthentication::Token => {
                let has_token = vault
                    .credential
                    .as_ref()
                    .and_then(|c| c.token.as_deref())
                    .map(|t| !t.is_empty())
                    .unwrap_or(false);
                if !has_token {
                    return Err(incomplete(
                        ID,
                        "credential.token is expected for token authentication",
                        vec!["credential.token".to_string()],
                    ));
                }
            }
            VaultAuthentication::Kubernetes => {
                let missing: Vec<String> = [("role", &vault.role), ("mount", &vault.mount)]
                    .into_iter()
                    .filter(|(_, v)| v.as_deref().map(str::is_empty).unwrap_or(true))
                    .map(|(name, _)| name.to_string())
                    .collect();
                if !missing.is_empty() {
                    return Err(incomplete(
                        ID,
                        "role and mount are expected for kubernetes authentication",
                        missing,
                    ));
                }
            }
        }

        for (index, secret) in vault.secrets.iter().enumerate() {
            require_entry_fields(
                ID,
                index,
                &[
                    ("parameter", secret.parameter.as_str()),
                    ("path", secret.path.as_str()),
                    ("key", secret.key.as_str()),
                ],
            )?;
        }
        Ok(())
    }

    async fn fetch(
        &self,
        auth: &AuthConfig,
        _request: &ResolveRequest<'_>,
    ) -> Result<ResolvedSecret, ResolveError> {
        let mut resolved = ResolvedSecret::new();
        let Some(vault) = auth.hashi_corp_vault.as_ref() else {
            return Ok(resolved);
        };
        if vault.secrets.is_empty() {
            warn!(address = %vault.address, "hashiCorpVault block declares no secrets");
            return Ok(resolved);
        }

        let token = self.client_token(vault).await?;
        let headers = Self::build_headers(vault, Some(&token))?;

        for secret in &vault.secrets {
            let value = self
                .read_secret(vault, &headers, &secret.path, &secret.key)
                .await?;
            resolved.insert(&secret.parameter, value, ID);
        }
        Ok(resolved)
    }
}
