use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

pub const SPEC_VERSION: &str = "1.0";
pub const CONTENT_TYPE_JSON: &str = "application/json";
pub const DEFAULT_OBJECT_KIND: &str = "scaledobject";

/// A structured-mode CloudEvents 1.0 event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloudEvent {
    pub specversion: String,
    pub id: String,
    pub source: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub subject: String,
    pub time: DateTime<Utc>,
    pub datacontenttype: String,
    pub data: EventData,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventData {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl EventData {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Default::default()
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

/// `/<cluster>/keda/keda`
pub fn event_source(cluster_name: &str) -> String {
    format!("/{}/keda/keda", cluster_name)
}

/// `/<cluster>/<namespace>/<kind>/<name>`
pub fn object_subject(cluster_name: &str, namespace: &str, kind: &str, name: &str) -> String {
    format!("/{}/{}/{}/{}", cluster_name, namespace, kind, name)
}

impl CloudEvent {
    /// Namespace segment of the subject, if the subject has the object form.
    pub fn subject_namespace(&self) -> Option<&str> {
        let mut parts = self.subject.trim_start_matches('/').split('/');
        let _cluster = parts.next()?;
        let namespace = parts.next()?;
        parts.next()?;
        parts.next()?;
        Some(namespace)
    }

    pub fn message(&self) -> &str {
        &self.data.message
    }

    pub fn reason(&self) -> Option<&str> {
        self.data.reason.as_deref()
    }
}
