//! Flow Table
//!
//! Sharded per-source flow store. The shard index comes from the flow-key
//! hash, so the ingestion path and the eviction sweeper contend on one
//! shard at a time instead of a global lock.

use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::constants::SHARD_COUNT;
use super::types::{FlowKey, FlowRecord, PacketMeta};

// ============================================================================
// UPDATE RESULT
// ============================================================================

/// Result of folding one packet into the table
#[derive(Debug, Clone, Copy)]
pub struct FlowUpdate {
    pub key: FlowKey,
    /// True when this packet created the record
    pub created: bool,
    /// Packet count of the record after the update
    pub packets: u64,
}

// ============================================================================
// FLOW TABLE
// ============================================================================

/// Sharded flow table.
///
/// All statistics are incremental; no packet history is kept beyond the
/// per-record rate ring. Under memory pressure a shard evicts its
/// longest-idle record before accepting a new key - it never refuses one.
pub struct FlowTable {
    shards: Vec<Mutex<HashMap<FlowKey, FlowRecord>>>,
    window_ms: u64,
    per_shard_cap: usize,
    flows_created: AtomicU64,
}

impl FlowTable {
    pub fn new(window_ms: u64, max_flows: usize) -> Self {
        let shards = (0..SHARD_COUNT)
            .map(|_| Mutex::new(HashMap::new()))
            .collect();
        Self {
            shards,
            window_ms,
            per_shard_cap: (max_flows / SHARD_COUNT).max(1),
            flows_created: AtomicU64::new(0),
        }
    }

    fn shard_index(key: &FlowKey) -> usize {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() as usize) % SHARD_COUNT
    }

    /// Record one packet against its flow, creating the record if absent
    pub fn update(&self, pkt: &PacketMeta) -> FlowUpdate {
        let key = FlowKey::of(pkt);
        let mut shard = self.shards[Self::shard_index(&key)].lock();

        if let Some(record) = shard.get_mut(&key) {
            record.observe(pkt, self.window_ms);
            return FlowUpdate {
                key,
                created: false,
                packets: record.packets,
            };
        }

        // Memory pressure: evict the longest-idle record in this shard
        // before inserting, never refuse the new flow.
        if shard.len() >= self.per_shard_cap {
            if let Some(oldest) = shard
                .values()
                .min_by_key(|r| r.last_seen_ms)
                .map(|r| r.key)
            {
                shard.remove(&oldest);
                log::debug!("Flow table pressure: evicted {}", oldest);
            }
        }

        shard.insert(key, FlowRecord::new(key, pkt, self.window_ms));
        self.flows_created.fetch_add(1, Ordering::Relaxed);
        FlowUpdate {
            key,
            created: true,
            packets: 1,
        }
    }

    /// Point-in-time copy of a record; the mutable original stays owned here
    pub fn snapshot(&self, key: &FlowKey) -> Option<FlowRecord> {
        self.shards[Self::shard_index(key)].lock().get(key).cloned()
    }

    /// Remove every flow idle for longer than `idle_timeout_ms`
    pub fn evict_idle(&self, now_ms: i64, idle_timeout_ms: u64) -> usize {
        let mut evicted = 0;
        for shard in &self.shards {
            let mut shard = shard.lock();
            let before = shard.len();
            shard.retain(|_, record| record.idle_ms(now_ms) <= idle_timeout_ms as i64);
            evicted += before - shard.len();
        }
        evicted
    }

    /// Number of currently tracked flows
    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.lock().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total flows created over the table's lifetime
    pub fn flows_created(&self) -> u64 {
        self.flows_created.load(Ordering::Relaxed)
    }
}

// ============================================================================
// TESTS
// ============================================================================
