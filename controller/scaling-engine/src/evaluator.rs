//! Trigger evaluation: resolve credentials, ask the scaler, normalize.

use crate::spec::TriggerSpec;
use async_trait::async_trait;
use auth_resolver::{AuthConfig, ResolveError, ResolveRequest, ResolvedSecret, Resolver};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// A metric backend for one trigger type.
///
/// Implementations only fetch a raw value; activation is decided by the
/// evaluator.
#[async_trait]
pub trait Scaler: Send + Sync {
    fn trigger_type(&self) -> &'static str;

    async fn get_metric(&self, trigger: &TriggerSpec, secret: &ResolvedSecret)
        -> anyhow::Result<f64>;
}

#[derive(Default, Clone)]
pub struct ScalerRegistry {
    scalers: HashMap<&'static str, Arc<dyn Scaler>>,
}

impl ScalerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, scaler: Arc<dyn Scaler>) {
        self.scalers.insert(scaler.trigger_type(), scaler);
    }

    pub fn get(&self, trigger_type: &str) -> Option<&Arc<dyn Scaler>> {
        self.scalers.get(trigger_type)
    }

    pub fn trigger_types(&self) -> Vec<&'static str> {
        let mut types: Vec<_> = self.scalers.keys().copied().collect();
        types.sort_unstable();
        types
    }
}

/// One successful trigger observation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TriggerReading {
    pub value: f64,
    pub active: bool,
}

impl TriggerReading {
    pub fn new(value: f64, activation_threshold: f64) -> Self {
        Self {
            value,
            active: value >= activation_threshold,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TriggerError {
    #[error("trigger {trigger}: {error}")]
    Resolution {
        trigger: String,
        #[source]
        error: ResolveError,
    },

    #[error("trigger {trigger} timed out after {timeout:?}")]
    Timeout { trigger: String, timeout: Duration },

    #[error("trigger {trigger} failed: {message}")]
    Backend { trigger: String, message: String },
}

impl TriggerError {
    pub fn trigger(&self) -> &str {
        match self {
            TriggerError::Resolution { trigger, .. }
            | TriggerError::Timeout { trigger, .. }
            | TriggerError::Backend { trigger, .. } => trigger,
        }
    }

    /// Short label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            TriggerError::Resolution { .. } => "resolution",
            TriggerError::Timeout { .. } => "timeout",
            TriggerError::Backend { .. } => "backend",
        }
    }
}

pub struct TriggerEvaluator {
    resolver: Arc<Resolver>,
    scalers: ScalerRegistry,
}

impl TriggerEvaluator {
    pub fn new(resolver: Arc<Resolver>, scalers: ScalerRegistry) -> Self {
        Self { resolver, scalers }
    }

    pub fn scalers(&self) -> &ScalerRegistry {
        &self.scalers
    }

    pub async fn evaluate(
        &self,
        trigger: &TriggerSpec,
        auth: Option<&AuthConfig>,
        request: &ResolveRequest<'_>,
    ) -> Result<TriggerReading, TriggerError> {
        let scaler = self
            .scalers
            .get(&trigger.trigger_type)
            .ok_or_else(|| TriggerError::Backend {
                trigger: trigger.name.clone(),
                message: format!("no scaler registered for trigger type {}", trigger.trigger_type),
            })?;

        let secret = match auth {
            Some(auth) => self
                .resolver
                .resolve(auth, request)
                .await
                .map_err(|error| TriggerError::Resolution {
                    trigger: trigger.name.clone(),
                    error,
                })?,
            None => ResolvedSecret::new(),
        };

        let value = scaler
            .get_metric(trigger, &secret)
            .await
            .map_err(|e| TriggerError::Backend {
                trigger: trigger.name.clone(),
                message: format!("{:#}", e),
            })?;

        if !value.is_finite() {
            return Err(TriggerError::Backend {
                trigger: trigger.name.clone(),
                message: format!("scaler returned non-finite value {}", value),
            });
        }

        let reading = TriggerReading::new(value, trigger.activation_threshold);
        debug!(
            trigger = %trigger.name,
            value = reading.value,
            active = reading.active,
            "Trigger evaluated"
        );
        Ok(reading)
    }
}
