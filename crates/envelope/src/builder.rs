use crate::envelope::*;
use chrono::{DateTime, Utc};
use serde_json::Value;

#[derive(Debug, Default)]
pub struct CloudEventBuilder {
    cluster_name: Option<String>,
    event_type: Option<String>,
    namespace: Option<String>,
    name: Option<String>,
    kind: Option<String>,
    id: Option<String>,
    time: Option<DateTime<Utc>>,
    data: EventData,
}

impl CloudEventBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cluster_name(mut self, cluster_name: impl Into<String>) -> Self {
        self.cluster_name = Some(cluster_name.into());
        self
    }

    pub fn event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = Some(event_type.into());
        self
    }

    /// The object the event is about.
    pub fn object(mut self, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self.name = Some(name.into());
        self
    }

    /// Subject kind segment; `scaledobject` when not set.
    pub fn kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn time(mut self, time: DateTime<Utc>) -> Self {
        self.time = Some(time);
        self
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.data.message = message.into();
        self
    }

    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.data.reason = Some(reason.into());
        self
    }

    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.extra.insert(key.into(), value.into());
        self
    }

    pub fn build(self) -> Result<CloudEvent, BuildError> {
        let cluster_name = required(self.cluster_name, "cluster name")?;
        let event_type = required(self.event_type, "event type")?;
        let namespace = required(self.namespace, "namespace")?;
        let name = required(self.name, "object name")?;
        let kind = self.kind.unwrap_or_else(|| DEFAULT_OBJECT_KIND.to_string());

        Ok(CloudEvent {
            specversion: SPEC_VERSION.to_string(),
            id: self.id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            source: event_source(&cluster_name),
            event_type,
            subject: object_subject(&cluster_name, &namespace, &kind, &name),
            time: self.time.unwrap_or_else(Utc::now),
            datacontenttype: CONTENT_TYPE_JSON.to_string(),
            data: self.data,
        })
    }
}

fn required(value: Option<String>, field: &'static str) -> Result<String, BuildError> {
    value
        .filter(|v| !v.is_empty())
        .ok_or(BuildError::MissingField { field })
}

impl CloudEvent {
    pub fn builder() -> CloudEventBuilder {
        CloudEventBuilder::new()
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum BuildError {
    #[error("{field} is required to build a cloud event")]
    MissingField { field: &'static str },
}
