//! Event delivery backends.

use anyhow::{Context, Result};
use async_trait::async_trait;
use envelope::CloudEvent;
use std::time::Duration;
use tracing::info;

pub const CLOUDEVENTS_JSON: &str = "application/cloudevents+json";

/// Delivers one event to one destination.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn deliver(&self, uri: &str, event: &CloudEvent) -> Result<()>;
}

/// Logs events instead of sending them (dry-run mode).
pub struct LogOnlyEventSink;

#[async_trait]
impl EventSink for LogOnlyEventSink {
    async fn deliver(&self, uri: &str, event: &CloudEvent) -> Result<()> {
        info!(
            uri = %uri,
            event_type = %event.event_type,
            subject = %event.subject,
            message = %event.message(),
            "Cloud event (log-only mode)"
        );
        Ok(())
    }
}

/// POSTs structured-mode CloudEvents. A failed delivery is reported to the
/// caller and never retried.
pub struct HttpEventSink {
    client: reqwest::Client,
}

impl HttpEventSink {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl EventSink for HttpEventSink {
    async fn deliver(&self, uri: &str, event: &CloudEvent) -> Result<()> {
        let body = serde_json::to_vec(event).context("Failed to serialize cloud event")?;
        let response = self
            .client
            .post(uri)
            .header(reqwest::header::CONTENT_TYPE, CLOUDEVENTS_JSON)
            .body(body)
            .send()
            .await
            .with_context(|| format!("HTTP request to {} failed", uri))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<unable to read body>".to_string());
        Err(anyhow::anyhow!(
            "Event sink returned error status {}: {}",
            status,
            body
        ))
    }
}
