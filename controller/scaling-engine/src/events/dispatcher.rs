//! Fire-and-forget event delivery.
//!
//! Emitters push onto a bounded queue without waiting. When the queue is
//! full the event is dropped and logged; the decision loop never blocks on
//! delivery. Each queued event is delivered at most once.

use super::sink::EventSink;
use super::source::EventSources;
use super::EventType;
use crate::metrics::Metrics;
use crate::spec::ObjectKey;
use envelope::{CloudEvent, CloudEventBuilder};
use futures_util::future::join_all;
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Cheap handle for queueing events.
#[derive(Clone)]
pub struct EventEmitter {
    tx: mpsc::Sender<CloudEvent>,
    cluster_name: Arc<str>,
    metrics: Metrics,
}

impl EventEmitter {
    /// Builder for an event about `key`, pre-filled with this cluster.
    pub fn event_for(&self, key: &ObjectKey, event_type: EventType) -> CloudEventBuilder {
        CloudEvent::builder()
            .cluster_name(&*self.cluster_name)
            .event_type(event_type.as_str())
            .object(&key.namespace, &key.name)
    }

    /// Build and queue; returns whether the event was queued.
    pub fn emit_built(&self, builder: CloudEventBuilder) -> bool {
        match builder.build() {
            Ok(event) => self.emit(event),
            Err(e) => {
                warn!(error = %e, "Dropping event that could not be built");
                false
            }
        }
    }

    /// Queue an event without waiting; returns whether it was queued.
    pub fn emit(&self, event: CloudEvent) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(event)) => {
                warn!(
                    event_type = %event.event_type,
                    subject = %event.subject,
                    "Event queue full, dropping event"
                );
                self.metrics.record_event_dropped(&event.event_type);
                false
            }
            Err(TrySendError::Closed(event)) => {
                warn!(
                    event_type = %event.event_type,
                    subject = %event.subject,
                    "Event dispatcher stopped, dropping event"
                );
                self.metrics.record_event_dropped(&event.event_type);
                false
            }
        }
    }
}

pub struct EventDispatcher {
    rx: mpsc::Receiver<CloudEvent>,
    sources: EventSources,
    sink: Arc<dyn EventSink>,
    metrics: Metrics,
}

impl EventDispatcher {
    pub fn new(
        capacity: usize,
        cluster_name: &str,
        sources: EventSources,
        sink: Arc<dyn EventSink>,
        metrics: Metrics,
    ) -> (EventEmitter, Self) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let emitter = EventEmitter {
            tx,
            cluster_name: Arc::from(cluster_name),
            metrics: metrics.clone(),
        };
        let dispatcher = Self {
            rx,
            sources,
            sink,
            metrics,
        };
        (emitter, dispatcher)
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Deliver until every emitter has been dropped and the queue is drained.
    pub async fn run(mut self) {
        while let Some(event) = self.rx.recv().await {
            self.dispatch(&event).await;
        }
        debug!("Event dispatcher stopped");
    }

    async fn dispatch(&self, event: &CloudEvent) {
        let targets = self.sources.matching(event);
        if targets.is_empty() {
            debug!(event_type = %event.event_type, subject = %event.subject, "No source accepts event");
            return;
        }

        let deliveries = targets.iter().map(|source| async move {
            let result = self.sink.deliver(&source.uri, event).await;
            (source, result)
        });
        for (source, result) in join_all(deliveries).await {
            let key = source.key();
            match result {
                Ok(()) => {
                    debug!(source = %key, event_type = %event.event_type, "Delivered event");
                    self.metrics.record_event_delivery(&key, &event.event_type, true);
                }
                Err(e) => {
                    warn!(
                        source = %key,
                        event_type = %event.event_type,
                        error = %e,
                        "Event delivery failed"
                    );
                    self.metrics.record_event_delivery(&key, &event.event_type, false);
                }
            }
        }
    }
}
