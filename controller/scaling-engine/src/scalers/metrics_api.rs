//! `metrics-api` trigger: read a number out of a JSON HTTP endpoint.
//!
//! Metadata:
//! - `url` (required)
//! - `valueLocation` (required), a dotted path such as `components.0.tasks`
//! - `authMode`: `apiKey`, `bearer` or `basic`; secrets come from the
//!   trigger's resolved credentials (`apiKey`, `token`, `username`/`password`)
//! - `keyParamName`: header used in `apiKey` mode, default `X-API-KEY`

use crate::evaluator::Scaler;
use crate::spec::TriggerSpec;
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use auth_resolver::ResolvedSecret;
use serde_json::Value;

pub const TRIGGER_TYPE: &str = "metrics-api";
const DEFAULT_KEY_HEADER: &str = "X-API-KEY";

pub struct MetricsApiScaler {
    client: reqwest::Client,
}

impl MetricsApiScaler {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Scaler for MetricsApiScaler {
    fn trigger_type(&self) -> &'static str {
        TRIGGER_TYPE
    }

    async fn get_metric(&self, trigger: &TriggerSpec, secret: &ResolvedSecret) -> Result<f64> {
        let url = trigger
            .metadata_value("url")
            .ok_or_else(|| anyhow!("metadata url is required"))?;
        let location = trigger
            .metadata_value("valueLocation")
            .ok_or_else(|| anyhow!("metadata valueLocation is required"))?;

        let mut request = self.client.get(url);
        match trigger.metadata_value("authMode") {
            None => {}
            Some("apiKey") => {
                let key = required_secret(secret, "apiKey")?;
                let header = trigger
                    .metadata_value("keyParamName")
                    .unwrap_or(DEFAULT_KEY_HEADER);
                request = request.header(header, key);
            }
            Some("bearer") => {
                request = request.bearer_auth(required_secret(secret, "token")?);
            }
            Some("basic") => {
                let username = required_secret(secret, "username")?;
                request = request.basic_auth(username, secret.get("password"));
            }
            Some(other) => bail!("unsupported authMode {}", other),
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("request to {} failed", url))?;
        let status = response.status();
        if !status.is_success() {
            bail!("{} returned status {}", url, status);
        }
        let body: Value = response
            .json()
            .await
            .with_context(|| format!("{} did not return JSON", url))?;

        extract_value(&body, location)
    }
}

fn required_secret<'a>(secret: &'a ResolvedSecret, parameter: &str) -> Result<&'a str> {
    secret
        .get(parameter)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| anyhow!("credential parameter {} is required", parameter))
}

/// Walk a dotted path; numeric segments index arrays.
pub fn extract_value(body: &Value, location: &str) -> Result<f64> {
    let mut current = body;
    for segment in location.split('.') {
        current = match current {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        }
        .ok_or_else(|| anyhow!("valueLocation {} not found in response", location))?;
    }

    match current {
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| anyhow!("value at {} is not representable", location)),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .with_context(|| format!("value at {} is not numeric: {}", location, s)),
        other => bail!("value at {} is not numeric: {}", location, other),
    }
}
