//! Metrics stub for the scaling engine
//!
//! Recorded as structured log lines; exporting them is left to the log
//! pipeline.

use tracing::{debug, info, warn};

/// Metrics collector for the scaling engine
#[derive(Clone, Default)]
pub struct Metrics;

impl Metrics {
    /// Record a completed polling cycle
    pub fn record_cycle(&self, object: &str, phase: &str, value: Option<f64>, failed_triggers: usize) {
        debug!(
            object = %object,
            phase = %phase,
            value = ?value,
            failed_triggers = failed_triggers,
            "Recorded scaling cycle"
        );
    }

    /// Record a phase transition
    pub fn record_transition(&self, object: &str, from: &str, to: &str) {
        info!(
            object = %object,
            from = %from,
            to = %to,
            "Recorded phase transition"
        );
    }

    /// Record a failed trigger evaluation
    pub fn record_trigger_failure(&self, object: &str, trigger: &str, kind: &str) {
        info!(
            object = %object,
            trigger = %trigger,
            kind = %kind,
            "Recorded trigger failure"
        );
    }

    /// Record an event dropped before delivery
    pub fn record_event_dropped(&self, event_type: &str) {
        warn!(event_type = %event_type, "Recorded dropped event");
    }

    /// Record an event delivery attempt
    pub fn record_event_delivery(&self, source: &str, event_type: &str, success: bool) {
        info!(
            source = %source,
            event_type = %event_type,
            success = success,
            "Recorded event delivery"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = Metrics;
        metrics.record_cycle("apps/worker", "active", Some(12.0), 0);
        metrics.record_transition("apps/worker", "idle", "active");
        metrics.record_trigger_failure("apps/worker", "queue", "timeout");
        metrics.record_event_dropped("keda.scaledobject.ready.v1");
        metrics.record_event_delivery("apps/audit", "keda.scaledobject.ready.v1", true);
    }
}
