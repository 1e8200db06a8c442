//! The engine owns one poller per scalable object and applies lifecycle
//! signals to them.

use crate::catalog::AuthCatalog;
use crate::evaluator::TriggerEvaluator;
use crate::events::{
    CloudEventSource, CloudEventSourceSpec, EventDispatcher, EventEmitter, EventSink, EventSources,
    EventType, SourceError, MESSAGE_DELETED, MESSAGE_READY, REASON_CHECK_FAILED, REASON_DELETED,
    REASON_READY,
};
use crate::manifest::Manifest;
use crate::metrics::Metrics;
use crate::poller::{ObjectPoller, PollerContext};
use crate::spec::{ObjectKey, ScalableObjectSpec, SpecError};
use crate::state::ObjectSnapshot;
use auth_resolver::AuthConfig;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub cluster_name: String,
    /// Namespace cluster-scoped authentications read their secrets from.
    pub cluster_resources_namespace: String,
    pub default_trigger_timeout: Duration,
    pub event_queue_capacity: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            cluster_name: "kubernetes".to_string(),
            cluster_resources_namespace: "keda".to_string(),
            default_trigger_timeout: Duration::from_secs(3),
            event_queue_capacity: crate::events::dispatcher::DEFAULT_QUEUE_CAPACITY,
        }
    }
}

struct ObjectHandle {
    spec: Arc<ScalableObjectSpec>,
    shutdown: watch::Sender<bool>,
    snapshot: watch::Receiver<ObjectSnapshot>,
    task: JoinHandle<()>,
}

impl ObjectHandle {
    fn stop(&self) {
        let _ = self.shutdown.send(true);
    }
}

pub struct ScalingEngine {
    ctx: PollerContext,
    sources: EventSources,
    objects: Mutex<HashMap<ObjectKey, ObjectHandle>>,
    dispatcher: JoinHandle<()>,
}

impl ScalingEngine {
    /// Must be called inside a tokio runtime; spawns the event dispatcher.
    pub fn new(
        settings: EngineSettings,
        evaluator: Arc<TriggerEvaluator>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        let metrics = Metrics;
        let sources = EventSources::new();
        let (emitter, dispatcher) = EventDispatcher::new(
            settings.event_queue_capacity,
            &settings.cluster_name,
            sources.clone(),
            sink,
            metrics.clone(),
        );
        let ctx = PollerContext {
            evaluator,
            auths: Arc::new(AuthCatalog::new(settings.cluster_resources_namespace)),
            emitter,
            metrics,
            default_timeout: settings.default_trigger_timeout,
        };
        Self {
            ctx,
            sources,
            objects: Mutex::new(HashMap::new()),
            dispatcher: dispatcher.spawn(),
        }
    }

    pub fn auths(&self) -> &AuthCatalog {
        &self.ctx.auths
    }

    pub fn emitter(&self) -> &EventEmitter {
        &self.ctx.emitter
    }

    pub fn apply_authentication(&self, namespace: &str, name: &str, config: AuthConfig) {
        self.ctx.auths.apply(namespace, name, config);
    }

    pub fn apply_cluster_authentication(&self, name: &str, config: AuthConfig) {
        self.ctx.auths.apply_cluster(name, config);
    }

    pub fn apply_event_source(&self, spec: &CloudEventSourceSpec) -> Result<String, SourceError> {
        let source = CloudEventSource::from_spec(spec)?;
        let key = self.sources.upsert(source);
        info!(source = %key, "Cloud event source applied");
        Ok(key)
    }

    pub fn remove_event_source(&self, key: &str) -> bool {
        self.sources.remove(key)
    }

    /// Start (or restart) polling an object.
    ///
    /// An invalid object is reported with a failed event and never polled.
    /// Re-applying an identical object keeps its running poller and state.
    pub fn apply(&self, spec: ScalableObjectSpec) -> Result<ObjectKey, SpecError> {
        let key = spec.key();
        let spec = match spec.validated() {
            Ok(spec) => spec,
            Err(e) => {
                warn!(object = %key, error = %e, "Scaled object rejected");
                if !key.namespace.is_empty() && !key.name.is_empty() {
                    self.ctx.emitter.emit_built(
                        self.ctx
                            .emitter
                            .event_for(&key, EventType::Failed)
                            .message(e.to_string())
                            .reason(REASON_CHECK_FAILED),
                    );
                }
                return Err(e);
            }
        };

        let Ok(mut objects) = self.objects.lock() else {
            return Err(SpecError::Invalid {
                object: key.to_string(),
                message: "engine object table is unavailable".to_string(),
            });
        };

        if let Some(existing) = objects.get(&key) {
            if *existing.spec == spec && !existing.task.is_finished() {
                return Ok(key);
            }
            existing.stop();
        }

        self.ctx.emitter.emit_built(
            self.ctx
                .emitter
                .event_for(&key, EventType::Ready)
                .message(MESSAGE_READY)
                .reason(REASON_READY),
        );

        let spec = Arc::new(spec);
        let (shutdown, shutdown_rx) = watch::channel(false);
        let (poller, snapshot) = ObjectPoller::new(spec.clone(), self.ctx.clone(), shutdown_rx);
        let task = tokio::spawn(poller.run());
        objects.insert(
            key.clone(),
            ObjectHandle {
                spec,
                shutdown,
                snapshot,
                task,
            },
        );
        info!(object = %key, "Scaled object applied");
        Ok(key)
    }

    /// Stop polling an object; returns false when it was not known.
    pub fn remove(&self, key: &ObjectKey) -> bool {
        let handle = self
            .objects
            .lock()
            .ok()
            .and_then(|mut objects| objects.remove(key));
        let Some(handle) = handle else {
            return false;
        };

        handle.stop();
        self.ctx.emitter.emit_built(
            self.ctx
                .emitter
                .event_for(key, EventType::Removed)
                .message(MESSAGE_DELETED)
                .reason(REASON_DELETED),
        );
        info!(object = %key, "Scaled object removed");
        true
    }

    /// Latest published state of an object. Never triggers a poll.
    pub fn snapshot(&self, key: &ObjectKey) -> Option<ObjectSnapshot> {
        let objects = self.objects.lock().ok()?;
        objects.get(key).map(|handle| handle.snapshot.borrow().clone())
    }

    /// Subscribe to an object's snapshots; a new value is published after
    /// every cycle.
    pub fn watch(&self, key: &ObjectKey) -> Option<watch::Receiver<ObjectSnapshot>> {
        let objects = self.objects.lock().ok()?;
        objects.get(key).map(|handle| handle.snapshot.clone())
    }

    pub fn snapshots(&self) -> Vec<ObjectSnapshot> {
        let Ok(objects) = self.objects.lock() else {
            return Vec::new();
        };
        let mut snapshots: Vec<_> = objects
            .values()
            .map(|handle| handle.snapshot.borrow().clone())
            .collect();
        snapshots.sort_by(|a, b| a.key.cmp(&b.key));
        snapshots
    }

    pub fn objects(&self) -> Vec<ObjectKey> {
        let mut keys: Vec<_> = self
            .objects
            .lock()
            .map(|objects| objects.keys().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        keys
    }

    /// Apply every resource in a manifest; returns how many were rejected.
    ///
    /// Authentications and event sources go first so the first cycle and
    /// the ready events already see them.
    pub fn apply_manifest(&self, manifest: Manifest) -> usize {
        let mut rejected = 0;
        for auth in manifest.trigger_authentications {
            self.apply_authentication(&auth.namespace, &auth.name, auth.spec);
        }
        for auth in manifest.cluster_trigger_authentications {
            self.apply_cluster_authentication(&auth.name, auth.spec);
        }
        for source in &manifest.cloud_event_sources {
            if let Err(e) = self.apply_event_source(source) {
                warn!(error = %e, "Cloud event source rejected");
                rejected += 1;
            }
        }
        for object in manifest.scaled_objects {
            if self.apply(object).is_err() {
                rejected += 1;
            }
        }
        rejected
    }

    /// Stop every poller, wait for them, then drain the event queue.
    pub async fn shutdown(self) {
        let handles: Vec<ObjectHandle> = self
            .objects
            .lock()
            .map(|mut objects| objects.drain().map(|(_, handle)| handle).collect())
            .unwrap_or_default();
        for handle in &handles {
            handle.stop();
        }
        for handle in handles {
            if let Err(e) = handle.task.await {
                warn!(error = %e, "Object poller ended abnormally");
            }
        }

        let Self {
            ctx, dispatcher, ..
        } = self;
        drop(ctx);
        if let Err(e) = dispatcher.await {
            warn!(error = %e, "Event dispatcher ended abnormally");
        }
        info!("Scaling engine stopped");
    }
}
