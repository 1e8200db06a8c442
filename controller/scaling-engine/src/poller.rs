//! One polling task per scalable object.
//!
//! Every cycle evaluates all triggers concurrently, each under its own
//! timeout, waits for all of them, then applies the results to the state in
//! one step. The task stops as soon as its shutdown signal fires, dropping
//! whatever evaluation is in flight.

use crate::catalog::AuthCatalog;
use crate::evaluator::{TriggerError, TriggerEvaluator, TriggerReading};
use crate::events::{EventEmitter, EventType, REASON_ALL_TRIGGERS_FAILED};
use crate::events::{REASON_TRIGGER_ACTIVE, REASON_TRIGGER_INACTIVE};
use crate::metrics::Metrics;
use crate::spec::{ObjectKey, ScalableObjectSpec, TriggerSpec};
use crate::state::{ActivityChange, CycleOutcome, ObjectSnapshot, ScalableObjectState};
use auth_resolver::ResolveRequest;
use chrono::Utc;
use futures_util::future::join_all;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Everything a poller shares with the engine.
#[derive(Clone)]
pub struct PollerContext {
    pub evaluator: Arc<TriggerEvaluator>,
    pub auths: Arc<AuthCatalog>,
    pub emitter: EventEmitter,
    pub metrics: Metrics,
    pub default_timeout: Duration,
}

impl PollerContext {
    async fn evaluate(
        &self,
        spec: &ScalableObjectSpec,
        trigger: &TriggerSpec,
    ) -> Result<TriggerReading, TriggerError> {
        let bound = match &trigger.authentication_ref {
            Some(reference) => Some(self.auths.lookup(&spec.namespace, reference).map_err(
                |error| TriggerError::Resolution {
                    trigger: trigger.name.clone(),
                    error,
                },
            )?),
            None => None,
        };
        let namespace = bound
            .as_ref()
            .map_or(spec.namespace.as_str(), |b| b.namespace.as_str());
        let request = ResolveRequest::new(namespace).with_containers(&spec.target_env);
        self.evaluator
            .evaluate(trigger, bound.as_ref().map(|b| &b.config), &request)
            .await
    }

    /// Run every trigger of `spec` once, concurrently, each bounded by its
    /// timeout. Results keep trigger order.
    pub async fn evaluate_triggers(
        &self,
        spec: &ScalableObjectSpec,
    ) -> Vec<(String, Result<TriggerReading, TriggerError>)> {
        let evaluations = spec.triggers.iter().map(|trigger| async move {
            let timeout = trigger.timeout.unwrap_or(self.default_timeout);
            let result = match tokio::time::timeout(timeout, self.evaluate(spec, trigger)).await
            {
                Ok(result) => result,
                Err(_) => Err(TriggerError::Timeout {
                    trigger: trigger.name.clone(),
                    timeout,
                }),
            };
            (trigger.name.clone(), result)
        });
        join_all(evaluations).await
    }
}

pub struct ObjectPoller {
    key: ObjectKey,
    spec: Arc<ScalableObjectSpec>,
    ctx: PollerContext,
    state: ScalableObjectState,
    snapshot_tx: watch::Sender<ObjectSnapshot>,
    shutdown: watch::Receiver<bool>,
}

impl ObjectPoller {
    /// Returns the poller and the receiver its snapshots are published on.
    pub fn new(
        spec: Arc<ScalableObjectSpec>,
        ctx: PollerContext,
        shutdown: watch::Receiver<bool>,
    ) -> (Self, watch::Receiver<ObjectSnapshot>) {
        let key = spec.key();
        let state = ScalableObjectState::new(key.clone(), spec.cooldown_period());
        let (snapshot_tx, snapshot_rx) = watch::channel(state.snapshot());
        let poller = Self {
            key,
            spec,
            ctx,
            state,
            snapshot_tx,
            shutdown,
        };
        (poller, snapshot_rx)
    }

    pub async fn run(mut self) {
        info!(
            object = %self.key,
            triggers = self.spec.triggers.len(),
            polling_interval_secs = self.spec.polling_interval,
            "Starting object poller"
        );

        loop {
            let results = tokio::select! {
                biased;
                _ = shutdown_signalled(&mut self.shutdown) => break,
                results = self.ctx.evaluate_triggers(&self.spec) => results,
            };
            self.record_cycle(results);

            tokio::select! {
                biased;
                _ = shutdown_signalled(&mut self.shutdown) => break,
                _ = tokio::time::sleep(self.spec.polling_interval()) => {}
            }
        }

        info!(object = %self.key, "Object poller stopped");
    }

    fn record_cycle(&mut self, results: Vec<(String, Result<TriggerReading, TriggerError>)>) {
        let object = self.key.to_string();
        let mut failed = 0;
        for (trigger, result) in &results {
            if let Err(e) = result {
                failed += 1;
                warn!(object = %object, trigger = %trigger, error = %e, "Trigger evaluation failed");
                self.ctx.metrics.record_trigger_failure(&object, trigger, e.kind());
            }
        }

        match self.state.apply_cycle(&results, Instant::now(), Utc::now()) {
            CycleOutcome::AllTriggersFailed { failures } => {
                error!(object = %object, triggers = failures.len(), "All triggers failed");
                let names: Vec<&str> = failures.iter().map(|(name, _)| name.as_str()).collect();
                self.ctx.emitter.emit_built(
                    self.ctx
                        .emitter
                        .event_for(&self.key, EventType::Failed)
                        .message(format!("all {} triggers failed", failures.len()))
                        .reason(REASON_ALL_TRIGGERS_FAILED)
                        .with_data("failedTriggers", json!(names)),
                );
            }
            CycleOutcome::Evaluated {
                transition,
                changes,
            } => {
                if let Some((from, to)) = transition {
                    info!(object = %object, from = %from, to = %to, "Phase changed");
                    self.ctx
                        .metrics
                        .record_transition(&object, &from.to_string(), &to.to_string());
                }
                for change in changes {
                    self.emit_activity_change(change);
                }
            }
        }

        self.ctx.metrics.record_cycle(
            &object,
            &self.state.phase().to_string(),
            self.state.value(),
            failed,
        );
        self.snapshot_tx.send_replace(self.state.snapshot());
        debug!(object = %object, cycle = self.state.cycles(), "Cycle complete");
    }

    fn emit_activity_change(&self, change: ActivityChange) {
        let (event_type, reason, message) = if change.active {
            (
                EventType::TriggerActive,
                REASON_TRIGGER_ACTIVE,
                format!("Trigger {} is active", change.trigger),
            )
        } else {
            (
                EventType::TriggerInactive,
                REASON_TRIGGER_INACTIVE,
                format!("Trigger {} is inactive", change.trigger),
            )
        };
        self.ctx.emitter.emit_built(
            self.ctx
                .emitter
                .event_for(&self.key, event_type)
                .message(message)
                .reason(reason)
                .with_data("trigger", json!(change.trigger))
                .with_data("value", json!(change.value)),
        );
    }
}

/// Resolves once shutdown is requested or the engine side is gone.
async fn shutdown_signalled(rx: &mut watch::Receiver<bool>) {
    while !*rx.borrow_and_update() {
        if rx.changed().await.is_err() {
            return;
        }
    }
}
