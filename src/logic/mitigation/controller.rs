//! Mitigation Controller
//!
//! Owns the active block list and the backend capability state machine.
//! Per-address lifecycle is strictly Unblocked -> Blocked -> Unblocked
//! (expiry or manual unblock). Backend calls never run under the block-list
//! lock, so a slow enforcement command cannot stall ingestion.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use parking_lot::RwLock;

use super::backend::MitigationBackend;
use super::types::{BlockEntry, BlockOutcome, BlockStatus, CapabilityState};

// ============================================================================
// CONTROLLER
// ============================================================================

pub struct MitigationController {
    /// Backends in preference order; index 0 is the primary
    backends: Vec<Box<dyn MitigationBackend>>,
    /// Index of the backend currently in use. Only ever advances - an
    /// unsupported mechanism is never retried.
    active_backend: AtomicUsize,
    capability: RwLock<CapabilityState>,
    blocks: RwLock<HashMap<IpAddr, BlockEntry>>,
    block_ttl_ms: i64,
    refresh_on_redetect: bool,
    /// Total backend enforcement calls that applied a block
    enforcements: AtomicU64,
}

impl MitigationController {
    pub fn new(
        backends: Vec<Box<dyn MitigationBackend>>,
        block_ttl_ms: i64,
        refresh_on_redetect: bool,
    ) -> Self {
        Self {
            backends,
            active_backend: AtomicUsize::new(0),
            capability: RwLock::new(CapabilityState::Unknown),
            blocks: RwLock::new(HashMap::new()),
            block_ttl_ms,
            refresh_on_redetect,
            enforcements: AtomicU64::new(0),
        }
    }

    // ------------------------------------------------------------------
    // CAPABILITY PROBE
    // ------------------------------------------------------------------

    /// Probe backends in preference order until one reports supported.
    /// A failed probe triggers the same sticky fallback transition as a
    /// failed enforcement, so known-unusable mechanisms are skipped before
    /// the first attack ever arrives. A successful probe does not grant
    /// `PrimaryCapable` - only a real enforcement does.
    pub fn probe_active(&self) -> CapabilityState {
        let mut index = self.active_backend.load(Ordering::Acquire);
        while index < self.backends.len() {
            let backend = &self.backends[index];
            let probe = backend.probe_capability();
            if probe.supported {
                log::info!("Backend '{}' ready: {}", backend.name(), probe.detail);
                break;
            }
            log::warn!(
                "Backend '{}' capability probe failed ({}), falling back",
                backend.name(),
                probe.detail
            );
            *self.capability.write() = CapabilityState::FallbackOnly;
            self.active_backend.fetch_max(index + 1, Ordering::AcqRel);
            index += 1;
        }
        self.capability()
    }

    // ------------------------------------------------------------------
    // BLOCK / UNBLOCK
    // ------------------------------------------------------------------

    /// Block a source address.
    ///
    /// Idempotent: an address already in the block list causes no second
    /// backend call; depending on configuration the expiry is refreshed.
    pub fn block(&self, addr: IpAddr, reason: &str, now_ms: i64) -> BlockStatus {
        if is_unblockable(&addr) {
            log::warn!("Refusing to block private/reserved address {}", addr);
            return BlockStatus::Skipped;
        }

        {
            let mut blocks = self.blocks.write();
            if let Some(entry) = blocks.get_mut(&addr) {
                if self.refresh_on_redetect {
                    entry.expires_at_ms = now_ms + self.block_ttl_ms;
                    return BlockStatus::Refreshed;
                }
                return BlockStatus::AlreadyBlocked;
            }
            // Insert before enforcing so a concurrent re-detection of the
            // same address takes the idempotent path above.
            blocks.insert(
                addr,
                BlockEntry {
                    addr,
                    reason: reason.to_string(),
                    created_at_ms: now_ms,
                    expires_at_ms: now_ms + self.block_ttl_ms,
                    backend_applied: false,
                    backend: None,
                },
            );
        }

        match self.enforce(addr) {
            Some(backend) => {
                if let Some(entry) = self.blocks.write().get_mut(&addr) {
                    entry.backend_applied = true;
                    entry.backend = Some(backend.clone());
                }
                log::warn!("Blocked {} via {} ({})", addr, backend, reason);
                BlockStatus::Blocked { backend }
            }
            None => {
                log::warn!("Blocked {} in user space only (degraded): {}", addr, reason);
                BlockStatus::BlockedDegraded
            }
        }
    }

    /// Walk the preference list from the active backend. Unsupported (or
    /// timed out) mechanisms trigger the sticky fallback transition and one
    /// retry on the next preference; a hard error leaves the entry degraded.
    fn enforce(&self, addr: IpAddr) -> Option<String> {
        let mut index = self.active_backend.load(Ordering::Acquire);
        let mut attempts = 0;

        while index < self.backends.len() && attempts < 2 {
            let backend = &self.backends[index];
            match backend.apply_block(addr) {
                BlockOutcome::Applied => {
                    self.enforcements.fetch_add(1, Ordering::Relaxed);
                    if index == 0 {
                        let mut capability = self.capability.write();
                        if *capability == CapabilityState::Unknown {
                            *capability = CapabilityState::PrimaryCapable;
                            log::info!("Primary backend '{}' confirmed capable", backend.name());
                        }
                    }
                    return Some(backend.name().to_string());
                }
                BlockOutcome::Unsupported => {
                    log::warn!(
                        "Backend '{}' unsupported in this environment, falling back",
                        backend.name()
                    );
                    *self.capability.write() = CapabilityState::FallbackOnly;
                    self.active_backend.fetch_max(index + 1, Ordering::AcqRel);
                    index += 1;
                    attempts += 1;
                }
                BlockOutcome::Error(e) => {
                    log::error!("Backend '{}' failed to block {}: {}", backend.name(), addr, e);
                    return None;
                }
            }
        }
        None
    }

    /// Unblock an address. No-op (returns false) when it is not blocked.
    pub fn unblock(&self, addr: IpAddr) -> bool {
        let entry = self.blocks.write().remove(&addr);
        match entry {
            None => false,
            Some(entry) => {
                self.remove_from_backend(&entry);
                log::info!("Unblocked {}", addr);
                true
            }
        }
    }

    fn remove_from_backend(&self, entry: &BlockEntry) {
        if !entry.backend_applied {
            return;
        }
        let Some(name) = entry.backend.as_deref() else {
            return;
        };
        if let Some(backend) = self.backends.iter().find(|b| b.name() == name) {
            if let Err(e) = backend.remove_block(entry.addr) {
                log::error!("Failed to remove block for {} via {}: {}", entry.addr, name, e);
            }
        }
    }

    // ------------------------------------------------------------------
    // EXPIRY
    // ------------------------------------------------------------------

    /// Remove every entry past its expiry and lift its backend rule.
    /// Backend calls run after the lock is released.
    pub fn sweep_expired(&self, now_ms: i64) -> usize {
        let expired: Vec<BlockEntry> = {
            let mut blocks = self.blocks.write();
            let addrs: Vec<IpAddr> = blocks
                .values()
                .filter(|e| e.is_expired(now_ms))
                .map(|e| e.addr)
                .collect();
            addrs
                .into_iter()
                .filter_map(|addr| blocks.remove(&addr))
                .collect()
        };

        for entry in &expired {
            self.remove_from_backend(entry);
            log::info!("Block expired for {}", entry.addr);
        }
        expired.len()
    }

    // ------------------------------------------------------------------
    // QUERIES (copy-on-read)
    // ------------------------------------------------------------------

    /// Whether an address is actively blocked at `now_ms`
    pub fn is_blocked(&self, addr: IpAddr, now_ms: i64) -> bool {
        self.blocks
            .read()
            .get(&addr)
            .map(|e| !e.is_expired(now_ms))
            .unwrap_or(false)
    }

    /// Snapshot of the active (unexpired) block list
    pub fn active_blocks(&self, now_ms: i64) -> Vec<BlockEntry> {
        self.blocks
            .read()
            .values()
            .filter(|e| !e.is_expired(now_ms))
            .cloned()
            .collect()
    }

    /// Number of active blocks at `now_ms`
    pub fn active_count(&self, now_ms: i64) -> usize {
        self.blocks
            .read()
            .values()
            .filter(|e| !e.is_expired(now_ms))
            .count()
    }

    pub fn capability(&self) -> CapabilityState {
        *self.capability.read()
    }

    pub fn enforcement_count(&self) -> u64 {
        self.enforcements.load(Ordering::Relaxed)
    }

    /// Remove every block and lift every backend rule (shutdown path)
    pub fn clear_all(&self) -> usize {
        let entries: Vec<BlockEntry> = {
            let mut blocks = self.blocks.write();
            blocks.drain().map(|(_, e)| e).collect()
        };
        for entry in &entries {
            self.remove_from_backend(entry);
        }
        entries.len()
    }
}

/// Private, loopback, and unspecified addresses are never blocked: losing
/// the operator's own connection is worse than missing one attacker.
fn is_unblockable(addr: &IpAddr) -> bool {
    match addr {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_broadcast()
                || v4.is_unspecified()
        }
        IpAddr::V6(v6) => v6.is_loopback() || v6.is_unspecified(),
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::mitigation::backend::NullBackend;
    use crate::logic::mitigation::types::{BackendError, CapabilityProbe};
    use parking_lot::Mutex;
    use std::net::Ipv4Addr;
    use std::sync::Arc;

    const T0: i64 = 1_700_000_000_000;
    const TTL: i64 = 300_000;

    /// Scripted backend: pops outcomes from a list, records every call
    struct MockBackend {
        name: &'static str,
        probe_supported: bool,
        outcomes: Mutex<Vec<BlockOutcome>>,
        applied: Arc<Mutex<Vec<IpAddr>>>,
        removed: Arc<Mutex<Vec<IpAddr>>>,
    }

    impl MockBackend {
        fn new(name: &'static str, outcomes: Vec<BlockOutcome>) -> (Self, Arc<Mutex<Vec<IpAddr>>>, Arc<Mutex<Vec<IpAddr>>>) {
            let applied = Arc::new(Mutex::new(Vec::new()));
            let removed = Arc::new(Mutex::new(Vec::new()));
            (
                Self {
                    name,
                    probe_supported: true,
                    outcomes: Mutex::new(outcomes),
                    applied: applied.clone(),
                    removed: removed.clone(),
                },
                applied,
                removed,
            )
        }

        fn failing_probe(mut self) -> Self {
            self.probe_supported = false;
            self
        }
    }

    impl MitigationBackend for MockBackend {
        fn name(&self) -> &'static str {
            self.name
        }

        fn probe_capability(&self) -> CapabilityProbe {
            CapabilityProbe {
                supported: self.probe_supported,
                detail: "mock".to_string(),
            }
        }

        fn apply_block(&self, addr: IpAddr) -> BlockOutcome {
            self.applied.lock().push(addr);
            let mut outcomes = self.outcomes.lock();
            if outcomes.is_empty() {
                BlockOutcome::Applied
            } else {
                outcomes.remove(0)
            }
        }

        fn remove_block(&self, addr: IpAddr) -> Result<(), BackendError> {
            self.removed.lock().push(addr);
            Ok(())
        }
    }

    fn attacker() -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(203, 0, 113, 66))
    }

    #[test]
    fn test_block_is_idempotent() {
        let (mock, applied, _) = MockBackend::new("mock", vec![]);
        let controller = MitigationController::new(vec![Box::new(mock)], TTL, false);

        let first = controller.block(attacker(), "flood", T0);
        assert!(matches!(first, BlockStatus::Blocked { .. }));

        let second = controller.block(attacker(), "flood", T0 + 1_000);
        assert_eq!(second, BlockStatus::AlreadyBlocked);

        // Exactly one backend call and one active entry
        assert_eq!(applied.lock().len(), 1);
        assert_eq!(controller.enforcement_count(), 1);
        assert_eq!(controller.active_count(T0 + 1_000), 1);
    }

    #[test]
    fn test_refresh_extends_expiry_without_backend_call() {
        let (mock, applied, _) = MockBackend::new("mock", vec![]);
        let controller = MitigationController::new(vec![Box::new(mock)], TTL, true);

        controller.block(attacker(), "flood", T0);
        let status = controller.block(attacker(), "flood again", T0 + 100_000);
        assert_eq!(status, BlockStatus::Refreshed);
        assert_eq!(applied.lock().len(), 1);

        // Refreshed entry survives past the original expiry
        assert!(controller.is_blocked(attacker(), T0 + TTL + 50_000));
    }

    #[test]
    fn test_ttl_expiry_boundary() {
        let (mock, _, removed) = MockBackend::new("mock", vec![]);
        let controller = MitigationController::new(vec![Box::new(mock)], TTL, false);
        controller.block(attacker(), "flood", T0);

        // Present just before expiry
        assert!(controller.is_blocked(attacker(), T0 + TTL - 1));
        assert_eq!(controller.sweep_expired(T0 + TTL - 1), 0);

        // Absent at any check from expiry onward
        assert!(!controller.is_blocked(attacker(), T0 + TTL));
        assert_eq!(controller.sweep_expired(T0 + TTL), 1);
        assert_eq!(controller.active_count(T0 + TTL), 0);
        assert_eq!(removed.lock().len(), 1);
    }

    #[test]
    fn test_unblock_is_noop_when_absent() {
        let (mock, _, removed) = MockBackend::new("mock", vec![]);
        let controller = MitigationController::new(vec![Box::new(mock)], TTL, false);

        assert!(!controller.unblock(attacker()));
        assert!(removed.lock().is_empty());

        controller.block(attacker(), "flood", T0);
        assert!(controller.unblock(attacker()));
        assert_eq!(removed.lock().len(), 1);
        assert!(!controller.is_blocked(attacker(), T0));
    }

    #[test]
    fn test_unsupported_primary_falls_back_sticky() {
        let (primary, primary_calls, _) =
            MockBackend::new("primary", vec![BlockOutcome::Unsupported]);
        let (fallback, fallback_calls, _) = MockBackend::new("fallback", vec![]);
        let controller =
            MitigationController::new(vec![Box::new(primary), Box::new(fallback)], TTL, false);

        // First block: primary reports unsupported, retried once on fallback
        let status = controller.block(attacker(), "flood", T0);
        assert_eq!(
            status,
            BlockStatus::Blocked {
                backend: "fallback".to_string()
            }
        );
        assert_eq!(controller.capability(), CapabilityState::FallbackOnly);
        assert_eq!(primary_calls.lock().len(), 1);
        assert_eq!(fallback_calls.lock().len(), 1);

        // Second block for a different address: primary never touched again
        let other = IpAddr::V4(Ipv4Addr::new(203, 0, 113, 67));
        controller.block(other, "flood", T0);
        assert_eq!(primary_calls.lock().len(), 1);
        assert_eq!(fallback_calls.lock().len(), 2);
    }

    #[test]
    fn test_capability_primary_capable_on_first_success() {
        let (primary, _, _) = MockBackend::new("primary", vec![]);
        let controller = MitigationController::new(vec![Box::new(primary)], TTL, false);
        assert_eq!(controller.capability(), CapabilityState::Unknown);

        controller.block(attacker(), "flood", T0);
        assert_eq!(controller.capability(), CapabilityState::PrimaryCapable);
    }

    #[test]
    fn test_hard_error_leaves_entry_degraded() {
        let (primary, _, _) =
            MockBackend::new("primary", vec![BlockOutcome::Error("exit 2".to_string())]);
        let controller = MitigationController::new(vec![Box::new(primary)], TTL, false);

        let status = controller.block(attacker(), "flood", T0);
        assert_eq!(status, BlockStatus::BlockedDegraded);

        // The entry exists but carries no backend
        let blocks = controller.active_blocks(T0);
        assert_eq!(blocks.len(), 1);
        assert!(!blocks[0].backend_applied);
        // A hard error is not an unsupported mechanism
        assert_eq!(controller.capability(), CapabilityState::Unknown);
    }

    #[test]
    fn test_all_backends_unsupported_degrades() {
        let (primary, _, _) = MockBackend::new("primary", vec![BlockOutcome::Unsupported]);
        let (fallback, _, _) = MockBackend::new("fallback", vec![BlockOutcome::Unsupported]);
        let controller =
            MitigationController::new(vec![Box::new(primary), Box::new(fallback)], TTL, false);

        let status = controller.block(attacker(), "flood", T0);
        assert_eq!(status, BlockStatus::BlockedDegraded);
        assert_eq!(controller.capability(), CapabilityState::FallbackOnly);
        assert_eq!(controller.enforcement_count(), 0);
    }

    #[test]
    fn test_failed_probe_falls_back_before_first_block() {
        let (primary, primary_calls, _) = MockBackend::new("primary", vec![]);
        let primary = primary.failing_probe();
        let (fallback, fallback_calls, _) = MockBackend::new("fallback", vec![]);
        let controller =
            MitigationController::new(vec![Box::new(primary), Box::new(fallback)], TTL, false);

        assert_eq!(controller.probe_active(), CapabilityState::FallbackOnly);

        // The primary is never attempted, not even once
        controller.block(attacker(), "flood", T0);
        assert!(primary_calls.lock().is_empty());
        assert_eq!(fallback_calls.lock().len(), 1);
    }

    #[test]
    fn test_successful_probe_keeps_capability_unknown() {
        let (primary, _, _) = MockBackend::new("primary", vec![]);
        let controller = MitigationController::new(vec![Box::new(primary)], TTL, false);

        // Probing is not enforcing: PrimaryCapable needs a real block
        assert_eq!(controller.probe_active(), CapabilityState::Unknown);
    }

    #[test]
    fn test_private_addresses_never_blocked() {
        let (mock, applied, _) = MockBackend::new("mock", vec![]);
        let controller = MitigationController::new(vec![Box::new(mock)], TTL, false);

        for addr in [
            IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)),
            IpAddr::V4(Ipv4Addr::new(10, 1, 2, 3)),
            IpAddr::V4(Ipv4Addr::new(192, 168, 0, 5)),
            IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)),
        ] {
            assert_eq!(controller.block(addr, "flood", T0), BlockStatus::Skipped);
        }
        assert!(applied.lock().is_empty());
        assert_eq!(controller.active_count(T0), 0);
    }

    #[test]
    fn test_clear_all_lifts_backend_rules() {
        let controller = MitigationController::new(vec![Box::new(NullBackend)], TTL, false);
        controller.block(attacker(), "flood", T0);
        controller.block(IpAddr::V4(Ipv4Addr::new(198, 51, 100, 4)), "flood", T0);

        assert_eq!(controller.clear_all(), 2);
        assert_eq!(controller.active_count(T0), 0);
    }
}
