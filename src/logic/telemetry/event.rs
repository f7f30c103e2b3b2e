//! Detection Events
//!
//! Immutable, sequence-numbered records of classification decisions.
//! Append-only: once emitted an event is never mutated or removed except
//! by an explicit log clear. This is the record format the dashboard reads.

use std::net::IpAddr;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::logic::classifier::{Label, Verdict};
use crate::logic::features::FeatureVector;
use crate::logic::flow::{FlowRecord, Protocol};

// ============================================================================
// ACTION
// ============================================================================

/// What the engine did with a classification decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DetectionAction {
    /// Benign traffic, nothing to do
    None,
    /// Malicious but below the enforcement confidence cutoff
    DetectOnly,
    /// Block entry created and enforced through a backend
    Block,
    /// Block entry created, no backend accepted it
    BlockDegraded,
    /// Address was already blocked
    AlreadyBlocked,
    /// Address is private/reserved and is never blocked
    Skipped,
}

impl DetectionAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            DetectionAction::None => "none",
            DetectionAction::DetectOnly => "detect_only",
            DetectionAction::Block => "block",
            DetectionAction::BlockDegraded => "block_degraded",
            DetectionAction::AlreadyBlocked => "already_blocked",
            DetectionAction::Skipped => "skipped",
        }
    }
}

impl std::fmt::Display for DetectionAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// DETECTION EVENT
// ============================================================================

/// One classification decision and the action it produced
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionEvent {
    /// Monotonic sequence number, assigned by the sink on append
    pub sequence: u64,
    /// When the decision was made (UTC, millisecond precision)
    pub timestamp: DateTime<Utc>,
    pub source: IpAddr,
    pub protocol: Protocol,
    pub packets: u64,
    pub bytes: u64,
    pub syn_ratio: f32,
    pub label: Label,
    pub confidence: f32,
    pub action: DetectionAction,
    /// Feature snapshot at classification time
    pub features: FeatureVector,
    /// Classifier reasons (empty for benign decisions)
    pub reasons: Vec<String>,
}

impl DetectionEvent {
    /// Build an event from the classification inputs. The sequence number
    /// stays 0 until the sink appends it.
    pub fn from_decision(
        record: &FlowRecord,
        features: FeatureVector,
        verdict: &Verdict,
        action: DetectionAction,
        decided_at_ms: i64,
    ) -> Self {
        Self {
            sequence: 0,
            timestamp: Utc
                .timestamp_millis_opt(decided_at_ms)
                .single()
                .unwrap_or_else(Utc::now),
            source: record.key.src,
            protocol: record.key.protocol,
            packets: record.packets,
            bytes: record.bytes,
            syn_ratio: record.syn_ratio(),
            label: verdict.label,
            confidence: verdict.confidence,
            action,
            features,
            reasons: verdict.reasons.clone(),
        }
    }

    /// Convert to a JSONL line (for the append-only log)
    pub fn to_jsonl(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::flow::{FlowKey, PacketMeta};
    use std::net::Ipv4Addr;

    const T0: i64 = 1_700_000_000_000;

    #[test]
    fn test_event_from_decision() {
        let pkt = PacketMeta::new(
            IpAddr::V4(Ipv4Addr::new(203, 0, 113, 5)),
            Protocol::Tcp,
            60,
            T0,
        )
        .with_syn(true);
        let record = FlowRecord::new(FlowKey::of(&pkt), &pkt, 5_000);
        let verdict = Verdict::malicious(0.9, vec!["High packet rate".to_string()]);

        let event = DetectionEvent::from_decision(
            &record,
            FeatureVector::new(),
            &verdict,
            DetectionAction::Block,
            T0,
        );

        assert_eq!(event.sequence, 0);
        assert_eq!(event.source, pkt.src);
        assert_eq!(event.label, Label::Malicious);
        assert_eq!(event.action, DetectionAction::Block);
        assert_eq!(event.timestamp.timestamp_millis(), T0);
        assert_eq!(event.syn_ratio, 1.0);
    }

    #[test]
    fn test_event_jsonl_is_single_line() {
        let pkt = PacketMeta::new(
            IpAddr::V4(Ipv4Addr::new(203, 0, 113, 5)),
            Protocol::Udp,
            120,
            T0,
        );
        let record = FlowRecord::new(FlowKey::of(&pkt), &pkt, 5_000);
        let event = DetectionEvent::from_decision(
            &record,
            FeatureVector::new(),
            &Verdict::benign(0.8),
            DetectionAction::None,
            T0,
        );

        let line = event.to_jsonl();
        assert!(!line.contains('\n'));
        let parsed: DetectionEvent = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed.source, event.source);
        assert_eq!(parsed.action, DetectionAction::None);
    }
}
