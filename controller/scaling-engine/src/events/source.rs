use super::filter::{EventSubscription, EventSubscriptionFilter, FilterError};
use envelope::CloudEvent;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpDestination {
    pub uri: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Destination {
    pub http: HttpDestination,
}

/// A CloudEventSource as written in a manifest. Without a namespace the
/// source is cluster scoped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloudEventSourceSpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    pub destination: Destination,
    #[serde(default)]
    pub event_subscription: EventSubscription,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SourceError {
    #[error("cloud event source {name}: {error}")]
    Filter {
        name: String,
        #[source]
        error: FilterError,
    },

    #[error("cloud event source {name}: destination uri {uri} must be http or https")]
    InvalidDestination { name: String, uri: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceScope {
    Namespace(String),
    Cluster,
}

/// A validated delivery target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloudEventSource {
    pub name: String,
    pub scope: SourceScope,
    pub uri: String,
    pub filter: EventSubscriptionFilter,
}

impl CloudEventSource {
    pub fn from_spec(spec: &CloudEventSourceSpec) -> Result<Self, SourceError> {
        let uri = spec.destination.http.uri.trim();
        if !(uri.starts_with("http://") || uri.starts_with("https://")) {
            return Err(SourceError::InvalidDestination {
                name: spec.name.clone(),
                uri: uri.to_string(),
            });
        }
        let filter = EventSubscriptionFilter::try_from(&spec.event_subscription).map_err(
            |error| SourceError::Filter {
                name: spec.name.clone(),
                error,
            },
        )?;
        let scope = match spec.namespace.as_deref() {
            Some(ns) if !ns.is_empty() => SourceScope::Namespace(ns.to_string()),
            _ => SourceScope::Cluster,
        };
        Ok(Self {
            name: spec.name.clone(),
            scope,
            uri: uri.to_string(),
            filter,
        })
    }

    /// Registry key: `<namespace>/<name>` or `<name>` when cluster scoped.
    pub fn key(&self) -> String {
        match &self.scope {
            SourceScope::Namespace(ns) => format!("{}/{}", ns, self.name),
            SourceScope::Cluster => self.name.clone(),
        }
    }

    pub fn accepts(&self, event: &CloudEvent) -> bool {
        let in_scope = match &self.scope {
            SourceScope::Cluster => true,
            SourceScope::Namespace(ns) => event.subject_namespace() == Some(ns.as_str()),
        };
        in_scope && self.filter.should_emit(&event.event_type)
    }
}

/// The set of registered sources, shared between the engine and the
/// dispatcher task.
#[derive(Clone, Default)]
pub struct EventSources {
    inner: Arc<RwLock<BTreeMap<String, CloudEventSource>>>,
}

impl EventSources {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a source; returns its key.
    pub fn upsert(&self, source: CloudEventSource) -> String {
        let key = source.key();
        if let Ok(mut map) = self.inner.write() {
            map.insert(key.clone(), source);
        }
        key
    }

    pub fn remove(&self, key: &str) -> bool {
        self.inner
            .write()
            .map(|mut map| map.remove(key).is_some())
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.inner.read().map(|map| map.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sources that should receive `event`.
    pub fn matching(&self, event: &CloudEvent) -> Vec<CloudEventSource> {
        self.inner
            .read()
            .map(|map| {
                map.values()
                    .filter(|source| source.accepts(event))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }
}
