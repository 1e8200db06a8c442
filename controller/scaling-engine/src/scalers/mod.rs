//! Built-in scalers.

pub mod metrics_api;

pub use metrics_api::MetricsApiScaler;

use crate::evaluator::ScalerRegistry;
use std::sync::Arc;

/// Register every built-in scaler.
pub fn register_defaults(registry: &mut ScalerRegistry, http: reqwest::Client) {
    registry.register(Arc::new(MetricsApiScaler::new(http)));
}
