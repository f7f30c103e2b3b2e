//! Feature Extraction
//!
//! Derives a fixed-schema feature vector from a flow-record snapshot.
//! `layout` is the single source of truth for the schema; `extract` is a
//! pure function of its input.

pub mod extract;
pub mod layout;
pub mod vector;

pub use extract::extract;
pub use layout::{layout_hash, FEATURE_COUNT, FEATURE_LAYOUT, FEATURE_VERSION};
pub use vector::FeatureVector;
