//! Logic Module - Detection & Mitigation Engines
//!
//! Pipeline: packet -> flow table -> feature extraction -> classifier ->
//! mitigation -> telemetry. The `engine` module owns one instance of each
//! stage; background sweepers (idle-flow eviction, block expiry) run against
//! the same state.

// Core modules
pub mod config;
pub mod engine;
pub mod source;

// Pipeline stages
pub mod flow;
pub mod features;
pub mod classifier;
pub mod mitigation;
pub mod telemetry;
