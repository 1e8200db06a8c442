//! YAML manifest with every resource the engine needs to run standalone.
//!
//! ```yaml
//! triggerAuthentications:
//!   - namespace: apps
//!     name: api-creds
//!     spec:
//!       secretTargetRef:
//!         - parameter: token
//!           name: api
//!           key: token
//! cloudEventSources:
//!   - name: audit
//!     namespace: apps
//!     destination:
//!       http:
//!         uri: http://audit.apps.svc/events
//!     eventSubscription:
//!       excludedEventTypes: [keda.scaledobject.trigger.active.v1]
//! scaledObjects:
//!   - namespace: apps
//!     name: worker
//!     pollingInterval: 15
//!     triggers:
//!       - type: metrics-api
//!         activationThreshold: 5
//!         metadata:
//!           url: http://stats.apps.svc/queue
//!           valueLocation: depth
//!           authMode: bearer
//!         authenticationRef:
//!           name: api-creds
//! ```

use crate::events::CloudEventSourceSpec;
use crate::spec::ScalableObjectSpec;
use anyhow::{Context, Result};
use auth_resolver::AuthConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerAuthenticationSpec {
    /// Ignored for cluster-scoped authentications.
    #[serde(default)]
    pub namespace: String,
    pub name: String,
    #[serde(default)]
    pub spec: AuthConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    #[serde(default)]
    pub trigger_authentications: Vec<TriggerAuthenticationSpec>,
    #[serde(default)]
    pub cluster_trigger_authentications: Vec<TriggerAuthenticationSpec>,
    #[serde(default)]
    pub cloud_event_sources: Vec<CloudEventSourceSpec>,
    #[serde(default)]
    pub scaled_objects: Vec<ScalableObjectSpec>,
}

impl Manifest {
    pub fn from_yaml(contents: &str) -> Result<Self> {
        serde_yaml::from_str(contents).context("Failed to parse manifest")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read manifest {}", path.display()))?;
        Self::from_yaml(&contents).with_context(|| format!("Invalid manifest {}", path.display()))
    }
}
