//! Flow Tracking
//!
//! Per-source flow aggregation under a sliding time window.
//! `types` holds the data structures, `table` the sharded table itself.

pub mod table;
pub mod types;

pub use table::{FlowTable, FlowUpdate};
pub use types::{FlowKey, FlowRecord, PacketMeta, Protocol};
