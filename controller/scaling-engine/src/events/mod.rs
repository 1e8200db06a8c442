//! Lifecycle notifications.
//!
//! The decision loop decides *what* happened; [`EventEmitter`] turns that into
//! a CloudEvent and queues it. The dispatcher task delivers each queued event
//! to every [`CloudEventSource`] whose scope and subscription filter accept it.

pub mod dispatcher;
pub mod filter;
pub mod sink;
pub mod source;

pub use dispatcher::{EventDispatcher, EventEmitter};
pub use filter::{EventSubscription, EventSubscriptionFilter, FilterError};
pub use sink::{EventSink, HttpEventSink, LogOnlyEventSink};
pub use source::{CloudEventSource, CloudEventSourceSpec, EventSources, SourceError, SourceScope};

use std::fmt;

pub const REASON_READY: &str = "ScaledObjectReady";
pub const REASON_CHECK_FAILED: &str = "ScaledObjectCheckFailed";
pub const REASON_ALL_TRIGGERS_FAILED: &str = "AllTriggersFailed";
pub const REASON_DELETED: &str = "ScaledObjectDeleted";
pub const REASON_TRIGGER_ACTIVE: &str = "TriggerActive";
pub const REASON_TRIGGER_INACTIVE: &str = "TriggerInactive";

pub const MESSAGE_READY: &str = "ScaledObject is ready for scaling";
pub const MESSAGE_DELETED: &str = "ScaledObject was deleted";

/// The event types the engine can emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    Ready,
    Failed,
    Removed,
    TriggerActive,
    TriggerInactive,
}

impl EventType {
    pub const ALL: &'static [EventType] = &[
        EventType::Ready,
        EventType::Failed,
        EventType::Removed,
        EventType::TriggerActive,
        EventType::TriggerInactive,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Ready => "keda.scaledobject.ready.v1",
            EventType::Failed => "keda.scaledobject.failed.v1",
            EventType::Removed => "keda.scaledobject.removed.v1",
            EventType::TriggerActive => "keda.scaledobject.trigger.active.v1",
            EventType::TriggerInactive => "keda.scaledobject.trigger.inactive.v1",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|t| t.as_str() == value)
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
