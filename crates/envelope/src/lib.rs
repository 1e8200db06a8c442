//! # Envelope Helper Crate
//!
//! Strongly-typed CloudEvents 1.0 envelopes for scalable object lifecycle
//! notifications, with a builder and validation against the bundled
//! contract schema.
//!
//! ```rust
//! use envelope::*;
//!
//! let event = CloudEvent::builder()
//!     .cluster_name("prod")
//!     .event_type("keda.scaledobject.removed.v1")
//!     .object("apps", "worker")
//!     .message("ScaledObject was deleted")
//!     .reason("ScaledObjectDeleted")
//!     .build()
//!     .expect("Valid event");
//!
//! assert_eq!(event.subject, "/prod/apps/scaledobject/worker");
//! event.validate().expect("Should validate");
//! ```

mod builder;
mod envelope;
mod validation;

pub use builder::*;
pub use envelope::*;
pub use validation::*;
