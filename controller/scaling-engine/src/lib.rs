//! Scaling Engine - polls scaler triggers and drives per-object scaling state
//!
//! Each scalable object gets its own polling task. A cycle resolves every
//! trigger's credentials through `auth-resolver`, asks the trigger's scaler for
//! a metric, and folds the readings into an Idle / Active / Cooldown state
//! whose latest snapshot can be queried at any time. Lifecycle changes are
//! emitted as CloudEvents to the configured HTTP sources.

pub mod catalog;
pub mod config;
pub mod engine;
pub mod evaluator;
pub mod events;
pub mod manifest;
pub mod metrics;
pub mod poller;
pub mod scalers;
pub mod spec;
pub mod state;

pub use catalog::AuthCatalog;
pub use config::Config;
pub use engine::{EngineSettings, ScalingEngine};
pub use evaluator::{Scaler, ScalerRegistry, TriggerError, TriggerEvaluator, TriggerReading};
pub use events::{
    EventEmitter, EventSink, EventSubscriptionFilter, EventType, HttpEventSink, LogOnlyEventSink,
};
pub use manifest::Manifest;
pub use metrics::Metrics;
pub use spec::{ObjectKey, ScalableObjectSpec, SpecError, TriggerSpec};
pub use state::{CycleOutcome, ObjectSnapshot, Phase, ScalableObjectState};
