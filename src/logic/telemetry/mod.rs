//! Telemetry
//!
//! Detection events and the append-only sink the dashboard reads.

pub mod event;
pub mod sink;

pub use event::{DetectionAction, DetectionEvent};
pub use sink::{EventSink, SinkStats};
