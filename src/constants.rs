//! Central Configuration Constants
//!
//! Single source of truth for tuning defaults that are not part of the
//! runtime configuration surface. To change a hot-path constant, only edit
//! this file.

/// App version
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// App name
pub const APP_NAME: &str = "DDoS Sentry";

/// Number of flow-table shards
pub const SHARD_COUNT: usize = 16;

/// Capacity of the per-flow ring of recent packet samples.
/// The windowed rate is estimated over min(window, ring span).
pub const RATE_RING_CAPACITY: usize = 128;

/// Capacity of the per-flow distinct destination-port set.
/// Once saturated the count is a lower bound.
pub const PORT_SET_CAPACITY: usize = 64;

/// Sub-windows used for the burstiness (peak-to-mean) estimate
pub const BURST_SUB_WINDOWS: u32 = 4;

/// Emit a status line to the log every N ingested packets
pub const STATUS_LOG_INTERVAL: u64 = 200;

/// Maximum event-log file size before rotation (50 MB)
pub const MAX_EVENT_FILE_SIZE: u64 = 50 * 1024 * 1024;

/// Sweeper threads wake at this granularity to check their timers
/// and the shutdown flag
pub const SWEEPER_TICK_MS: u64 = 200;

/// Default capture interface
pub const DEFAULT_INTERFACE: &str = "eth0";

// ============================================
// Helper functions to read from env with fallback
// ============================================

/// Get capture interface from environment or use default
pub fn get_interface() -> String {
    std::env::var("DDOS_SENTRY_INTERFACE")
        .unwrap_or_else(|_| DEFAULT_INTERFACE.to_string())
}
