//! Detection Engine
//!
//! Explicitly constructed context object owning the whole pipeline:
//! flow table -> feature extraction -> classifier -> mitigation -> sink.
//! No global state - multiple isolated instances can coexist, which is how
//! the tests exercise it. Background sweepers run on their own timers and
//! never hold a lock across a classification or backend call.

use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::constants::{STATUS_LOG_INTERVAL, SWEEPER_TICK_MS};
use super::classifier::Classifier;
use super::config::{ConfigError, EngineConfig};
use super::features::extract;
use super::flow::{FlowTable, PacketMeta};
use super::mitigation::{
    BlockEntry, BlockStatus, CapabilityState, MitigationBackend, MitigationController,
};
use super::telemetry::{DetectionAction, DetectionEvent, EventSink};

// ============================================================================
// STATS
// ============================================================================

/// Aggregate statistics snapshot (the dashboard polls this)
#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    pub session_id: String,
    pub total_packets: u64,
    pub total_flows: u64,
    pub active_flows: usize,
    pub total_detections: u64,
    pub active_blocks: usize,
    pub persist_errors: u64,
    pub backend_capability: CapabilityState,
}

/// Final block-list snapshot persisted on shutdown
#[derive(Debug, Clone, Serialize)]
struct BlockSnapshot {
    generated_at: DateTime<Utc>,
    active_blocks: Vec<BlockEntry>,
}

// ============================================================================
// ENGINE
// ============================================================================

struct EngineInner {
    config: EngineConfig,
    flows: FlowTable,
    classifier: Classifier,
    mitigation: MitigationController,
    sink: EventSink,
    running: AtomicBool,
    /// Latest packet timestamp seen. The engine advances on event time so
    /// replayed and simulated traffic age flows and blocks deterministically;
    /// with a live capture source event time coincides with wall time.
    last_packet_ms: AtomicI64,
}

pub struct Engine {
    inner: Arc<EngineInner>,
    sweepers: Vec<JoinHandle<()>>,
}

impl Engine {
    /// Build an engine. The configuration is validated here; an invalid
    /// configuration is the only fatal error in the system.
    pub fn new(
        config: EngineConfig,
        classifier: Classifier,
        backends: Vec<Box<dyn MitigationBackend>>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        // Event persistence is best-effort: an unusable log directory
        // degrades to an in-memory sink, it does not stop detection.
        let sink = match &config.event_log_dir {
            Some(dir) => EventSink::with_persistence(dir.clone()).unwrap_or_else(|e| {
                log::error!("Event log unavailable ({}), continuing in memory", e);
                EventSink::new()
            }),
            None => EventSink::new(),
        };

        let mitigation = MitigationController::new(
            backends,
            config.block_ttl_ms(),
            config.refresh_block_on_redetect,
        );
        // Discover unusable mechanisms up front; the transition is the same
        // sticky fallback a failed enforcement would trigger later.
        let capability = mitigation.probe_active();
        log::info!("Enforcement capability after probe: {}", capability);

        let flows = FlowTable::new(config.window_ms, config.max_flows);

        let layout = crate::logic::features::layout::LayoutInfo::current();
        log::info!(
            "{} v{} engine ready (classifier: {}, feature layout v{} hash {:08x})",
            crate::constants::APP_NAME,
            crate::constants::APP_VERSION,
            classifier.kind(),
            layout.version,
            layout.hash
        );

        Ok(Self {
            inner: Arc::new(EngineInner {
                config,
                flows,
                classifier,
                mitigation,
                sink,
                running: AtomicBool::new(true),
                last_packet_ms: AtomicI64::new(0),
            }),
            sweepers: Vec::new(),
        })
    }

    // ------------------------------------------------------------------
    // INGESTION
    // ------------------------------------------------------------------

    /// Feed one packet through the pipeline. Safe to call from multiple
    /// capture threads; every shared structure is internally synchronized.
    pub fn process_packet(&self, pkt: &PacketMeta) {
        self.inner.handle_packet(pkt);
    }

    // ------------------------------------------------------------------
    // BACKGROUND SWEEPERS
    // ------------------------------------------------------------------

    /// Start the idle-flow eviction and block-expiry sweepers
    pub fn start_sweepers(&mut self) {
        let eviction = Arc::clone(&self.inner);
        let interval = Duration::from_secs(eviction.config.eviction_sweep_secs);
        self.sweepers.push(std::thread::spawn(move || {
            sweep_loop(&eviction, interval, |inner| {
                let now_ms = inner.now_ms();
                let evicted = inner
                    .flows
                    .evict_idle(now_ms, inner.config.idle_timeout_ms());
                if evicted > 0 {
                    log::info!("[Cleanup] Evicted {} idle flows", evicted);
                }
            });
        }));

        let expiry = Arc::clone(&self.inner);
        let interval = Duration::from_secs(expiry.config.expiry_sweep_secs);
        self.sweepers.push(std::thread::spawn(move || {
            sweep_loop(&expiry, interval, |inner| {
                let now_ms = inner.now_ms();
                let expired = inner.mitigation.sweep_expired(now_ms);
                if expired > 0 {
                    log::info!("[Cleanup] Lifted {} expired blocks", expired);
                }
            });
        }));
    }

    // ------------------------------------------------------------------
    // QUERIES (copy-on-read, never contend with ingestion locks for long)
    // ------------------------------------------------------------------

    pub fn stats(&self) -> EngineStats {
        let now_ms = self.inner.now_ms();
        let sink = self.inner.sink.stats();
        EngineStats {
            session_id: sink.session_id,
            total_packets: sink.total_packets,
            total_flows: sink.total_flows,
            active_flows: self.inner.flows.len(),
            total_detections: sink.total_detections,
            active_blocks: self.inner.mitigation.active_count(now_ms),
            persist_errors: sink.persist_errors,
            backend_capability: self.inner.mitigation.capability(),
        }
    }

    /// Events with sequence strictly greater than `sequence`
    pub fn events_since(&self, sequence: u64) -> Vec<Arc<DetectionEvent>> {
        self.inner.sink.read_since(sequence)
    }

    pub fn active_blocks(&self, now_ms: i64) -> Vec<BlockEntry> {
        self.inner.mitigation.active_blocks(now_ms)
    }

    pub fn capability(&self) -> CapabilityState {
        self.inner.mitigation.capability()
    }

    pub fn enforcement_count(&self) -> u64 {
        self.inner.mitigation.enforcement_count()
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    // ------------------------------------------------------------------
    // OPERATOR ACTIONS
    // ------------------------------------------------------------------

    /// Manually lift a block. No-op when the address is not blocked.
    pub fn unblock(&self, addr: IpAddr) -> bool {
        self.inner.mitigation.unblock(addr)
    }

    /// Explicitly clear the event log and counters
    pub fn clear_events(&self) {
        self.inner.sink.clear();
    }

    /// Run one eviction pass with an explicit clock (deterministic callers)
    pub fn evict_idle_flows(&self, now_ms: i64) -> usize {
        self.inner
            .flows
            .evict_idle(now_ms, self.inner.config.idle_timeout_ms())
    }

    /// Run one block-expiry pass with an explicit clock
    pub fn sweep_expired_blocks(&self, now_ms: i64) -> usize {
        self.inner.mitigation.sweep_expired(now_ms)
    }

    // ------------------------------------------------------------------
    // SHUTDOWN
    // ------------------------------------------------------------------

    /// Stop accepting packets. Already-ingested packets are unaffected.
    pub fn stop(&self) {
        self.inner.running.store(false, Ordering::Release);
    }

    /// Graceful shutdown: stop ingestion, join the sweepers, flush the
    /// event sink, persist the final block-list snapshot, report totals.
    pub fn shutdown(mut self) -> EngineStats {
        self.stop();
        for handle in self.sweepers.drain(..) {
            let _ = handle.join();
        }
        self.inner.sink.flush();
        self.persist_block_snapshot();

        let stats = self.stats();
        log::info!(
            "Shutdown complete - Packets: {} | Flows: {} | Detections: {} | Blocked: {}",
            stats.total_packets,
            stats.total_flows,
            stats.total_detections,
            stats.active_blocks
        );
        stats
    }

    fn persist_block_snapshot(&self) {
        let Some(path) = &self.inner.config.block_snapshot_path else {
            return;
        };
        let snapshot = BlockSnapshot {
            generated_at: Utc::now(),
            active_blocks: self.inner.mitigation.active_blocks(self.inner.now_ms()),
        };
        let write = || -> std::io::Result<()> {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let file = std::fs::File::create(path)?;
            serde_json::to_writer_pretty(file, &snapshot)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))
        };
        match write() {
            Ok(()) => log::info!(
                "Persisted block snapshot ({} entries) to {:?}",
                snapshot.active_blocks.len(),
                path
            ),
            Err(e) => log::error!("Failed to persist block snapshot: {}", e),
        }
    }
}

impl EngineInner {
    /// The engine's clock: event time once packets have been seen,
    /// wall time before that.
    fn now_ms(&self) -> i64 {
        let last = self.last_packet_ms.load(Ordering::Relaxed);
        if last > 0 {
            last
        } else {
            Utc::now().timestamp_millis()
        }
    }

    fn handle_packet(&self, pkt: &PacketMeta) {
        if !self.running.load(Ordering::Acquire) {
            return;
        }
        self.last_packet_ms
            .fetch_max(pkt.timestamp_ms, Ordering::Relaxed);

        let total_packets = self.sink.note_packet();
        let update = self.flows.update(pkt);
        if update.created {
            self.sink.note_flow();
        }

        if total_packets % STATUS_LOG_INTERVAL == 0 {
            let now_ms = pkt.timestamp_ms;
            let stats = self.sink.stats();
            log::info!(
                "Packets: {} | Flows: {} | Detections: {} | Blocked: {}",
                stats.total_packets,
                self.flows.len(),
                stats.total_detections,
                self.mitigation.active_count(now_ms)
            );
        }

        // Classification cadence: skip young flows, then check every N
        // packets so the hot path is mostly counter updates.
        if update.packets < self.config.min_packets_for_detection
            || update.packets % self.config.check_interval_packets != 0
        {
            return;
        }

        let Some(record) = self.flows.snapshot(&update.key) else {
            return; // evicted between update and snapshot
        };
        let features = extract(&record);
        let verdict = self.classifier.predict(&features);

        let action = if verdict.is_malicious() {
            if verdict.confidence >= self.config.confidence_cutoff {
                let reason = verdict.reasons.join("; ");
                match self.mitigation.block(pkt.src, &reason, pkt.timestamp_ms) {
                    BlockStatus::Blocked { .. } => DetectionAction::Block,
                    BlockStatus::BlockedDegraded => DetectionAction::BlockDegraded,
                    BlockStatus::AlreadyBlocked | BlockStatus::Refreshed => {
                        DetectionAction::AlreadyBlocked
                    }
                    BlockStatus::Skipped => DetectionAction::Skipped,
                }
            } else {
                DetectionAction::DetectOnly
            }
        } else {
            DetectionAction::None
        };

        if action == DetectionAction::Block {
            log::warn!(
                "MALICIOUS TRAFFIC DETECTED - src: {} | {:.0} pps | confidence {:.2}",
                pkt.src,
                record.packet_rate,
                verdict.confidence
            );
            log::debug!("Feature snapshot: {}", features.to_log_entry());
        }

        let event =
            DetectionEvent::from_decision(&record, features, &verdict, action, pkt.timestamp_ms);
        self.sink.append(event);
    }
}

/// Tick loop shared by the sweepers: wakes frequently to honor the stop
/// flag, runs its task once per interval.
fn sweep_loop<F>(inner: &Arc<EngineInner>, interval: Duration, task: F)
where
    F: Fn(&EngineInner),
{
    let tick = Duration::from_millis(SWEEPER_TICK_MS);
    let mut elapsed = Duration::ZERO;
    while inner.running.load(Ordering::Acquire) {
        std::thread::sleep(tick);
        elapsed += tick;
        if elapsed >= interval {
            elapsed = Duration::ZERO;
            task(inner);
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::classifier::Label;
    use crate::logic::flow::Protocol;
    use crate::logic::mitigation::NullBackend;
    use std::net::Ipv4Addr;

    const T0: i64 = 1_700_000_000_000;

    fn attack_config() -> EngineConfig {
        EngineConfig {
            rate_threshold: 500.0,
            backend_preference: vec![crate::logic::config::BackendKind::Null],
            ..EngineConfig::default()
        }
    }

    fn make_engine(config: EngineConfig) -> Engine {
        let classifier = Classifier::from_config(&config, None);
        Engine::new(config, classifier, vec![Box::new(NullBackend)]).unwrap()
    }

    fn attacker() -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(203, 0, 113, 66))
    }

    fn syn_packet(src: IpAddr, ts: i64) -> PacketMeta {
        PacketMeta::new(src, Protocol::Tcp, 60, ts)
            .with_dst_port(80)
            .with_syn(true)
    }

    #[test]
    fn test_end_to_end_single_attacker() {
        let engine = make_engine(attack_config());

        // 1000 packets/second from one source for 5 simulated seconds
        for i in 0..5_000 {
            engine.process_packet(&syn_packet(attacker(), T0 + i));
        }

        // Exactly one block entry, one backend enforcement call
        let blocks = engine.active_blocks(T0 + 5_000);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].addr, attacker());
        assert!(blocks[0].backend_applied);
        assert_eq!(engine.enforcement_count(), 1);

        // The event log contains a block event for the attacker, and
        // sequence numbers are strictly increasing throughout.
        let events = engine.events_since(0);
        assert!(!events.is_empty());
        let block_events: Vec<_> = events
            .iter()
            .filter(|e| e.action == DetectionAction::Block)
            .collect();
        assert_eq!(block_events.len(), 1);
        assert_eq!(block_events[0].source, attacker());
        assert_eq!(block_events[0].label, Label::Malicious);
        for pair in events.windows(2) {
            assert!(pair[0].sequence < pair[1].sequence);
        }
    }

    #[test]
    fn test_benign_traffic_not_blocked() {
        let engine = make_engine(attack_config());
        let host = IpAddr::V4(Ipv4Addr::new(198, 51, 100, 7));

        // 100 packets/second, no SYN dominance: well under every cutoff
        for i in 0..500 {
            let pkt = PacketMeta::new(host, Protocol::Tcp, 400, T0 + i * 10).with_dst_port(443);
            engine.process_packet(&pkt);
        }

        assert!(engine.active_blocks(T0 + 10_000).is_empty());
        assert_eq!(engine.enforcement_count(), 0);
        assert!(engine
            .events_since(0)
            .iter()
            .all(|e| e.label == Label::Benign));
    }

    #[test]
    fn test_stop_halts_ingestion() {
        let engine = make_engine(attack_config());
        for i in 0..100 {
            engine.process_packet(&syn_packet(attacker(), T0 + i));
        }
        let before = engine.stats().total_packets;
        assert_eq!(before, 100);

        engine.stop();
        assert!(!engine.is_running());
        for i in 0..100 {
            engine.process_packet(&syn_packet(attacker(), T0 + 1_000 + i));
        }
        assert_eq!(engine.stats().total_packets, before);
    }

    #[test]
    fn test_shutdown_stats_match_recorded_events() {
        let dir = tempfile::TempDir::new().unwrap();
        let snapshot_path = dir.path().join("blocks.json");
        let config = EngineConfig {
            block_snapshot_path: Some(snapshot_path.clone()),
            ..attack_config()
        };
        let engine = make_engine(config);

        for i in 0..2_000 {
            engine.process_packet(&syn_packet(attacker(), T0 + i));
        }

        let events = engine.events_since(0);
        let malicious = events.iter().filter(|e| e.label == Label::Malicious).count() as u64;
        let stats = engine.shutdown();

        assert_eq!(stats.total_packets, 2_000);
        assert_eq!(stats.total_detections, malicious);
        assert_eq!(stats.active_blocks, 1);

        // The final block-list snapshot landed on disk
        let content = std::fs::read_to_string(&snapshot_path).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&content).unwrap();
        assert_eq!(parsed["active_blocks"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_flow_eviction_then_fresh_flow() {
        let engine = make_engine(attack_config());
        let host = IpAddr::V4(Ipv4Addr::new(198, 51, 100, 9));
        let pkt = PacketMeta::new(host, Protocol::Udp, 100, T0);
        engine.process_packet(&pkt);
        assert_eq!(engine.stats().active_flows, 1);

        assert_eq!(engine.evict_idle_flows(T0 + 61_000), 1);
        assert_eq!(engine.stats().active_flows, 0);

        engine.process_packet(&PacketMeta::new(host, Protocol::Udp, 100, T0 + 61_001));
        assert_eq!(engine.stats().total_flows, 2);
    }

    #[test]
    fn test_block_expiry_sweep() {
        let engine = make_engine(attack_config());
        for i in 0..100 {
            engine.process_packet(&syn_packet(attacker(), T0 + i));
        }
        assert_eq!(engine.active_blocks(T0 + 100).len(), 1);

        // Default TTL is 300 s
        assert_eq!(engine.sweep_expired_blocks(T0 + 299_000), 0);
        assert_eq!(engine.sweep_expired_blocks(T0 + 301_000), 1);
        assert!(engine.active_blocks(T0 + 301_000).is_empty());
    }

    #[test]
    fn test_detect_only_below_cutoff() {
        // Cutoff just above what a single fired rule can reach with a
        // small margin: malicious events are logged but not enforced
        let config = EngineConfig {
            rate_threshold: 900.0,
            syn_ratio_threshold: 1.0,
            confidence_cutoff: 0.99,
            ..attack_config()
        };
        let engine = make_engine(config);
        for i in 0..200 {
            // ~1000 pps, syn ratio 0 - only the rate rule can fire
            engine.process_packet(
                &PacketMeta::new(attacker(), Protocol::Tcp, 60, T0 + i).with_dst_port(80),
            );
        }

        let events = engine.events_since(0);
        assert!(events.iter().any(|e| e.action == DetectionAction::DetectOnly));
        assert!(engine.active_blocks(T0 + 200).is_empty());
    }

    #[test]
    fn test_sweepers_start_and_join() {
        let mut engine = make_engine(attack_config());
        engine.start_sweepers();
        for i in 0..50 {
            engine.process_packet(&syn_packet(attacker(), T0 + i));
        }
        // Joins promptly because the sweepers poll the stop flag
        let stats = engine.shutdown();
        assert_eq!(stats.total_packets, 50);
    }
}
