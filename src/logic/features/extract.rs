//! Feature Extractor
//!
//! Pure derivation of a feature vector from a flow-record snapshot.
//! Ratios default to 0 when their denominator is 0 - a single-packet
//! record still produces a fully-defined vector.

use crate::logic::flow::FlowRecord;
use super::vector::FeatureVector;

/// Extract the classifier input from a flow-record snapshot
pub fn extract(record: &FlowRecord) -> FeatureVector {
    FeatureVector::from_values([
        record.packet_rate,
        record.byte_rate,
        record.syn_ratio(),
        record.dst_ports.count() as f32,
        record.burstiness,
        record.avg_packet_size(),
    ])
}

// ============================================================================
// TESTS
// ============================================================================
