//! Mitigation
//!
//! Turns a malicious classification into an enforcement action. The
//! controller owns the block list and the capability state machine;
//! `backend` holds the pluggable enforcement implementations.

pub mod backend;
pub mod controller;
pub mod types;

pub use backend::{IptablesBackend, MitigationBackend, NullBackend, XdpBackend};
pub use controller::MitigationController;
pub use types::{
    BackendError, BlockEntry, BlockOutcome, BlockStatus, CapabilityProbe, CapabilityState,
};
