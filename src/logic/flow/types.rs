//! Flow Types
//!
//! Core types for flow tracking - no table logic, just data structures.
//! A flow aggregates every packet sharing one (source address, protocol)
//! key; blocking decisions are made per source address.

use std::collections::{HashSet, VecDeque};
use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use crate::constants::{BURST_SUB_WINDOWS, PORT_SET_CAPACITY, RATE_RING_CAPACITY};

// ============================================================================
// PROTOCOL
// ============================================================================

/// Transport protocol of a packet / flow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
    Icmp,
    Other(u8),
}

impl Protocol {
    pub fn from_number(proto: u8) -> Self {
        match proto {
            1 => Protocol::Icmp,
            6 => Protocol::Tcp,
            17 => Protocol::Udp,
            other => Protocol::Other(other),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
            Protocol::Icmp => "icmp",
            Protocol::Other(_) => "other",
        }
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Protocol::Other(n) => write!(f, "other({})", n),
            _ => write!(f, "{}", self.as_str()),
        }
    }
}

// ============================================================================
// PACKET METADATA
// ============================================================================

/// Decoded packet metadata delivered by a packet source.
///
/// The engine never sees raw frames; capture (or replay) hands it this
/// record. Serde-serializable so a JSONL file can drive the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PacketMeta {
    /// Source address
    pub src: IpAddr,
    /// Destination port (0 when the protocol has none)
    pub dst_port: u16,
    /// Transport protocol
    pub protocol: Protocol,
    /// Packet size in bytes
    pub size: u32,
    /// TCP SYN flag
    pub syn: bool,
    /// Capture timestamp, epoch milliseconds
    pub timestamp_ms: i64,
}

impl PacketMeta {
    pub fn new(src: IpAddr, protocol: Protocol, size: u32, timestamp_ms: i64) -> Self {
        Self {
            src,
            dst_port: 0,
            protocol,
            size,
            syn: false,
            timestamp_ms,
        }
    }

    pub fn with_dst_port(mut self, port: u16) -> Self {
        self.dst_port = port;
        self
    }

    pub fn with_syn(mut self, syn: bool) -> Self {
        self.syn = syn;
        self
    }
}

// ============================================================================
// FLOW KEY
// ============================================================================

/// Flow identity: source address plus protocol.
///
/// Volumetric attacks are many-destination / many-port from one origin, so
/// aggregation is by source; the protocol keeps a TCP SYN flood and a UDP
/// flood from the same origin separately visible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FlowKey {
    pub src: IpAddr,
    pub protocol: Protocol,
}

impl FlowKey {
    pub fn of(pkt: &PacketMeta) -> Self {
        Self {
            src: pkt.src,
            protocol: pkt.protocol,
        }
    }
}

impl std::fmt::Display for FlowKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.src, self.protocol)
    }
}

// ============================================================================
// DISTINCT PORT SET (bounded)
// ============================================================================

/// Bounded set of distinct destination ports.
///
/// Saturates at `PORT_SET_CAPACITY`; after that the count is a lower bound,
/// which is all the classifier needs (port-scan spread, not exact totals).
#[derive(Debug, Clone, Default)]
pub struct PortSet {
    ports: HashSet<u16>,
    saturated: bool,
}

impl PortSet {
    pub fn insert(&mut self, port: u16) {
        if self.ports.contains(&port) {
            return;
        }
        if self.ports.len() < PORT_SET_CAPACITY {
            self.ports.insert(port);
        } else {
            self.saturated = true;
        }
    }

    pub fn count(&self) -> usize {
        self.ports.len()
    }

    pub fn is_saturated(&self) -> bool {
        self.saturated
    }
}

// ============================================================================
// RATE RING
// ============================================================================

/// Fixed-capacity ring of recent `(timestamp_ms, size)` samples.
///
/// Rates are estimated over the samples inside the trailing window; with
/// more than `RATE_RING_CAPACITY` packets in the window the estimate covers
/// the most recent span only. Deterministic for a fixed input sequence.
#[derive(Debug, Clone, Default)]
struct RateRing {
    samples: VecDeque<(i64, u32)>,
}

impl RateRing {
    fn push(&mut self, ts_ms: i64, size: u32, window_ms: u64) {
        self.samples.push_back((ts_ms, size));
        if self.samples.len() > RATE_RING_CAPACITY {
            self.samples.pop_front();
        }
        let cutoff = ts_ms - window_ms as i64;
        while let Some(&(front_ts, _)) = self.samples.front() {
            if front_ts < cutoff && self.samples.len() > 1 {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }

    fn len(&self) -> usize {
        self.samples.len()
    }

    /// Span between oldest and newest retained sample, in milliseconds
    fn span_ms(&self) -> i64 {
        match (self.samples.front(), self.samples.back()) {
            (Some(&(first, _)), Some(&(last, _))) => last - first,
            _ => 0,
        }
    }

    /// Bytes carried by the retained samples, excluding the oldest.
    ///
    /// Rates are interval-based: n samples define n-1 intervals, so the
    /// oldest sample anchors the span but contributes no traffic to it.
    fn bytes_after_first(&self) -> u64 {
        self.samples.iter().skip(1).map(|&(_, size)| size as u64).sum()
    }

    /// Peak-to-mean packet count across equal sub-windows of the span
    fn burstiness(&self) -> Option<f32> {
        let span = self.span_ms();
        if self.samples.len() < 2 || span <= 0 {
            return None;
        }
        let first = self.samples.front().map(|&(ts, _)| ts).unwrap_or(0);
        let buckets = BURST_SUB_WINDOWS as i64;
        let mut counts = vec![0u32; BURST_SUB_WINDOWS as usize];
        for &(ts, _) in &self.samples {
            let idx = ((ts - first) * buckets / (span + 1)).clamp(0, buckets - 1);
            counts[idx as usize] += 1;
        }
        let peak = counts.iter().copied().max().unwrap_or(0);
        let mean = self.samples.len() as f32 / BURST_SUB_WINDOWS as f32;
        Some(peak as f32 / mean)
    }
}

// ============================================================================
// FLOW RECORD
// ============================================================================

/// Aggregated statistics for one flow.
///
/// Owned exclusively by the flow table; the ingestion path and the eviction
/// sweeper are the only writers. `packets` and `bytes` are monotonically
/// non-decreasing for the lifetime of the record, and `last_seen_ms` never
/// drops below `first_seen_ms` (out-of-order timestamps clamp forward).
#[derive(Debug, Clone)]
pub struct FlowRecord {
    pub key: FlowKey,
    pub packets: u64,
    pub bytes: u64,
    pub first_seen_ms: i64,
    pub last_seen_ms: i64,
    pub syn_packets: u64,
    pub dst_ports: PortSet,
    /// Windowed packet-rate estimate, packets per second
    pub packet_rate: f32,
    /// Windowed byte-rate estimate, bytes per second
    pub byte_rate: f32,
    /// Peak-to-mean rate ratio across sub-windows
    pub burstiness: f32,
    ring: RateRing,
}

impl FlowRecord {
    pub fn new(key: FlowKey, pkt: &PacketMeta, window_ms: u64) -> Self {
        let mut record = Self {
            key,
            packets: 0,
            bytes: 0,
            first_seen_ms: pkt.timestamp_ms,
            last_seen_ms: pkt.timestamp_ms,
            syn_packets: 0,
            dst_ports: PortSet::default(),
            packet_rate: 0.0,
            byte_rate: 0.0,
            burstiness: 0.0,
            ring: RateRing::default(),
        };
        record.observe(pkt, window_ms);
        record
    }

    /// Fold one packet into the record. O(ring capacity) worst case.
    pub fn observe(&mut self, pkt: &PacketMeta, window_ms: u64) {
        // Clamp out-of-order capture timestamps so last_seen >= first_seen
        // and the ring stays time-ordered.
        let ts = pkt.timestamp_ms.max(self.last_seen_ms);

        self.packets += 1;
        self.bytes += pkt.size as u64;
        self.last_seen_ms = ts;
        if pkt.syn {
            self.syn_packets += 1;
        }
        if pkt.dst_port != 0 {
            self.dst_ports.insert(pkt.dst_port);
        }

        self.ring.push(ts, pkt.size, window_ms);

        // Zero elapsed time (identical timestamps, or a lone sample) keeps
        // the prior observed rate rather than dividing by zero.
        let span = self.ring.span_ms();
        if self.ring.len() >= 2 && span > 0 {
            let span_secs = span as f32 / 1000.0;
            self.packet_rate = (self.ring.len() - 1) as f32 / span_secs;
            self.byte_rate = self.ring.bytes_after_first() as f32 / span_secs;
        }
        if let Some(burst) = self.ring.burstiness() {
            self.burstiness = burst;
        }
    }

    pub fn idle_ms(&self, now_ms: i64) -> i64 {
        now_ms - self.last_seen_ms
    }

    /// SYN packets over total packets; 0 for an empty record
    pub fn syn_ratio(&self) -> f32 {
        if self.packets == 0 {
            0.0
        } else {
            self.syn_packets as f32 / self.packets as f32
        }
    }

    /// Mean packet size in bytes; 0 for an empty record
    pub fn avg_packet_size(&self) -> f32 {
        if self.packets == 0 {
            0.0
        } else {
            self.bytes as f32 / self.packets as f32
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    const T0: i64 = 1_700_000_000_000;

    fn src() -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(203, 0, 113, 10))
    }

    fn packet(ts: i64) -> PacketMeta {
        PacketMeta::new(src(), Protocol::Tcp, 100, ts).with_dst_port(80)
    }

    #[test]
    fn test_protocol_from_number() {
        assert_eq!(Protocol::from_number(6), Protocol::Tcp);
        assert_eq!(Protocol::from_number(17), Protocol::Udp);
        assert_eq!(Protocol::from_number(1), Protocol::Icmp);
        assert_eq!(Protocol::from_number(89), Protocol::Other(89));
    }

    #[test]
    fn test_counts_monotonic() {
        let mut record = FlowRecord::new(FlowKey::of(&packet(T0)), &packet(T0), 5_000);
        let mut last_packets = record.packets;
        let mut last_bytes = record.bytes;
        for i in 1..50 {
            record.observe(&packet(T0 + i), 5_000);
            assert!(record.packets > last_packets);
            assert!(record.bytes >= last_bytes);
            assert!(record.last_seen_ms >= record.first_seen_ms);
            last_packets = record.packets;
            last_bytes = record.bytes;
        }
    }

    #[test]
    fn test_uniform_rate_estimate() {
        // 1 packet per millisecond = 1000 packets per second
        let mut record = FlowRecord::new(FlowKey::of(&packet(T0)), &packet(T0), 5_000);
        for i in 1..100 {
            record.observe(&packet(T0 + i), 5_000);
        }
        assert!((record.packet_rate - 1000.0).abs() < 1.0);
        assert!((record.byte_rate - 100_000.0).abs() < 150.0);
        // Steady traffic has peak close to mean
        assert!(record.burstiness >= 1.0 && record.burstiness < 1.5);
    }

    #[test]
    fn test_identical_timestamps_keep_prior_rate() {
        let mut record = FlowRecord::new(FlowKey::of(&packet(T0)), &packet(T0), 5_000);
        for i in 1..20 {
            record.observe(&packet(T0 + i * 10), 5_000);
        }
        let prior = record.packet_rate;
        assert!(prior > 0.0);
        // A burst of packets carrying the same timestamp must not zero or
        // blow up the estimate; the ring span collapses only if every
        // retained sample is identical, which the prior-rate rule covers.
        let mut same_ts = FlowRecord::new(FlowKey::of(&packet(T0)), &packet(T0), 5_000);
        for _ in 0..10 {
            same_ts.observe(&packet(T0), 5_000);
        }
        assert_eq!(same_ts.packet_rate, 0.0);
        assert!(same_ts.packet_rate.is_finite());
    }

    #[test]
    fn test_out_of_order_timestamp_clamps() {
        let mut record = FlowRecord::new(FlowKey::of(&packet(T0)), &packet(T0 + 100), 5_000);
        record.observe(&packet(T0), 5_000); // earlier than last_seen
        assert_eq!(record.last_seen_ms, T0 + 100);
        assert!(record.last_seen_ms >= record.first_seen_ms);
    }

    #[test]
    fn test_single_packet_defined() {
        let record = FlowRecord::new(FlowKey::of(&packet(T0)), &packet(T0), 5_000);
        assert_eq!(record.packets, 1);
        assert_eq!(record.packet_rate, 0.0);
        assert_eq!(record.burstiness, 0.0);
        assert!(record.syn_ratio().is_finite());
        assert_eq!(record.avg_packet_size(), 100.0);
    }

    #[test]
    fn test_port_set_saturates() {
        let mut set = PortSet::default();
        for port in 1..=(PORT_SET_CAPACITY as u16 + 20) {
            set.insert(port);
        }
        assert_eq!(set.count(), PORT_SET_CAPACITY);
        assert!(set.is_saturated());
        // Re-inserting a known port never saturates further
        set.insert(1);
        assert_eq!(set.count(), PORT_SET_CAPACITY);
    }

    #[test]
    fn test_syn_ratio() {
        let syn_pkt = packet(T0).with_syn(true);
        let mut record = FlowRecord::new(FlowKey::of(&syn_pkt), &syn_pkt, 5_000);
        record.observe(&packet(T0 + 1), 5_000);
        assert!((record.syn_ratio() - 0.5).abs() < f32::EPSILON);
    }

    #[test]
    fn test_bursty_traffic_detected() {
        // All packets crammed into the tail of the span
        let mut record = FlowRecord::new(FlowKey::of(&packet(T0)), &packet(T0), 5_000);
        for i in 0..40 {
            record.observe(&packet(T0 + 3_000 + i), 5_000);
        }
        assert!(record.burstiness > 2.0);
    }
}
