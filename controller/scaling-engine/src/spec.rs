//! Declarative scalable objects and their triggers.
//!
//! Field names follow the `ScaledObject` resource so objects can be read
//! straight from a manifest.

use auth_resolver::TargetContainer;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::time::Duration;

pub const DEFAULT_POLLING_INTERVAL_SECS: u64 = 30;
pub const DEFAULT_COOLDOWN_PERIOD_SECS: u64 = 300;

/// Identity of a scalable object: namespace plus name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SpecError {
    #[error("scaled object {object} is invalid: {message}")]
    Invalid { object: String, message: String },
}

impl SpecError {
    fn invalid(object: impl fmt::Display, message: impl Into<String>) -> Self {
        SpecError::Invalid {
            object: object.to_string(),
            message: message.into(),
        }
    }
}

/// Which kind of authentication resource a trigger points at.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AuthenticationKind {
    #[default]
    TriggerAuthentication,
    ClusterTriggerAuthentication,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthenticationRef {
    pub name: String,
    #[serde(default)]
    pub kind: AuthenticationKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerSpec {
    /// Filled with `<type>-<index>` when left empty.
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type")]
    pub trigger_type: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    #[serde(default)]
    pub activation_threshold: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authentication_ref: Option<AuthenticationRef>,
    /// Overrides the engine's trigger timeout, e.g. `"500ms"` or `"2s"`.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "humantime_opt"
    )]
    pub timeout: Option<Duration>,
}

impl TriggerSpec {
    pub fn new(name: impl Into<String>, trigger_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            trigger_type: trigger_type.into(),
            metadata: BTreeMap::new(),
            activation_threshold: 0.0,
            target_value: None,
            authentication_ref: None,
            timeout: None,
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_activation_threshold(mut self, threshold: f64) -> Self {
        self.activation_threshold = threshold;
        self
    }

    pub fn with_authentication(mut self, name: impl Into<String>) -> Self {
        self.authentication_ref = Some(AuthenticationRef {
            name: name.into(),
            kind: AuthenticationKind::TriggerAuthentication,
        });
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn metadata_value(&self, key: &str) -> Option<&str> {
        self.metadata
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScalableObjectSpec {
    pub namespace: String,
    pub name: String,
    #[serde(default = "default_polling_interval")]
    pub polling_interval: u64,
    #[serde(default = "default_cooldown_period")]
    pub cooldown_period: u64,
    #[serde(default)]
    pub triggers: Vec<TriggerSpec>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub target_env: Vec<TargetContainer>,
}

fn default_polling_interval() -> u64 {
    DEFAULT_POLLING_INTERVAL_SECS
}

fn default_cooldown_period() -> u64 {
    DEFAULT_COOLDOWN_PERIOD_SECS
}

impl ScalableObjectSpec {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            polling_interval: DEFAULT_POLLING_INTERVAL_SECS,
            cooldown_period: DEFAULT_COOLDOWN_PERIOD_SECS,
            triggers: Vec::new(),
            target_env: Vec::new(),
        }
    }

    pub fn with_trigger(mut self, trigger: TriggerSpec) -> Self {
        self.triggers.push(trigger);
        self
    }

    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(&self.namespace, &self.name)
    }

    pub fn polling_interval(&self) -> Duration {
        Duration::from_secs(self.polling_interval)
    }

    pub fn cooldown_period(&self) -> Duration {
        Duration::from_secs(self.cooldown_period)
    }

    /// Check the object and name any anonymous triggers.
    pub fn validated(mut self) -> Result<Self, SpecError> {
        if self.namespace.is_empty() || self.name.is_empty() {
            return Err(SpecError::invalid(
                self.key(),
                "namespace and name are required",
            ));
        }
        let key = self.key();
        if self.polling_interval == 0 {
            return Err(SpecError::invalid(&key, "pollingInterval must be positive"));
        }
        if self.triggers.is_empty() {
            return Err(SpecError::invalid(&key, "no triggers defined"));
        }

        let mut seen = HashSet::new();
        for (index, trigger) in self.triggers.iter_mut().enumerate() {
            if trigger.trigger_type.is_empty() {
                return Err(SpecError::invalid(
                    &key,
                    format!("trigger {} has no type", index),
                ));
            }
            if trigger.name.is_empty() {
                trigger.name = format!("{}-{}", trigger.trigger_type, index);
            }
            if !seen.insert(trigger.name.clone()) {
                return Err(SpecError::invalid(
                    &key,
                    format!("trigger name {} is used more than once", trigger.name),
                ));
            }
            if !trigger.activation_threshold.is_finite() {
                return Err(SpecError::invalid(
                    &key,
                    format!("trigger {} has a non-finite activationThreshold", trigger.name),
                ));
            }
            if let Some(target) = trigger.target_value {
                if !(target.is_finite() && target > 0.0) {
                    return Err(SpecError::invalid(
                        &key,
                        format!("trigger {} targetValue must be positive", trigger.name),
                    ));
                }
            }
            if trigger.timeout.is_some_and(|t| t.is_zero()) {
                return Err(SpecError::invalid(
                    &key,
                    format!("trigger {} timeout must be positive", trigger.name),
                ));
            }
            if let Some(reference) = &trigger.authentication_ref {
                if reference.name.is_empty() {
                    return Err(SpecError::invalid(
                        &key,
                        format!("trigger {} has an empty authenticationRef", trigger.name),
                    ));
                }
            }
        }
        Ok(self)
    }
}

mod humantime_opt {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => serializer.serialize_str(&humantime::format_duration(*d).to_string()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Duration>, D::Error> {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        raw.map(|s| humantime::parse_duration(&s).map_err(serde::de::Error::custom))
            .transpose()
    }
}
