//! Engine Configuration
//!
//! Every recognized option with its effect and default. Loadable from a
//! JSON file; validation failure at startup is the only fatal error in the
//! system.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

// ============================================================================
// BACKEND KIND
// ============================================================================

/// Shipped enforcement backends, named as they appear in configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Kernel-level XDP filtering (fast, possibly unsupported)
    Xdp,
    /// iptables rules (always available on Linux hosts)
    Iptables,
    /// User-space block list only (development / unprivileged runs)
    Null,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Xdp => "xdp",
            BackendKind::Iptables => "iptables",
            BackendKind::Null => "null",
        }
    }
}

// ============================================================================
// CONFIG
// ============================================================================

/// Runtime configuration for one engine instance
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Trailing interval used for rate computation (milliseconds)
    pub window_ms: u64,
    /// Inactivity duration before a flow record is evicted (seconds)
    pub idle_timeout_secs: u64,
    /// Duration an enforced block remains active (seconds)
    pub block_ttl_secs: u64,
    /// Heuristic cutoff: packets per second
    pub rate_threshold: f32,
    /// Heuristic cutoff: SYN packets / total packets
    pub syn_ratio_threshold: f32,
    /// Heuristic cutoff: bytes per second
    pub byte_rate_threshold: f32,
    /// Minimum confidence required to trigger enforcement
    pub confidence_cutoff: f32,
    /// Model score at or above which a flow is labeled malicious
    pub model_threshold: f32,
    /// Ordered list of enforcement backends to try
    pub backend_preference: Vec<BackendKind>,
    /// Bound on one backend enforcement call (milliseconds)
    pub backend_timeout_ms: u64,
    /// Whether re-detecting a blocked address refreshes its expiry
    pub refresh_block_on_redetect: bool,
    /// Flow-table capacity before pressure eviction kicks in
    pub max_flows: usize,
    /// Packets a flow must accumulate before its first classification
    pub min_packets_for_detection: u64,
    /// Classify a flow every N packets after that
    pub check_interval_packets: u64,
    /// Idle-flow eviction timer (seconds)
    pub eviction_sweep_secs: u64,
    /// Block-expiry sweep timer (seconds)
    pub expiry_sweep_secs: u64,
    /// Directory for the persistent JSONL event log (None = in-memory only)
    pub event_log_dir: Option<PathBuf>,
    /// File receiving the final block-list snapshot on shutdown
    pub block_snapshot_path: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            window_ms: 5_000,
            idle_timeout_secs: 60,
            block_ttl_secs: 300,
            rate_threshold: 1000.0,
            syn_ratio_threshold: 0.8,
            byte_rate_threshold: 10_000_000.0,
            confidence_cutoff: 0.7,
            model_threshold: 0.5,
            backend_preference: vec![BackendKind::Xdp, BackendKind::Iptables],
            backend_timeout_ms: 5_000,
            refresh_block_on_redetect: false,
            max_flows: 100_000,
            min_packets_for_detection: 5,
            check_interval_packets: 10,
            eviction_sweep_secs: 30,
            expiry_sweep_secs: 5,
            event_log_dir: None,
            block_snapshot_path: None,
        }
    }
}

impl EngineConfig {
    /// Load and validate a configuration file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        let config: EngineConfig =
            serde_json::from_str(&content).map_err(|e| ConfigError::Parse {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Validate all option ranges. Called once at startup; a failure here
    /// is fatal, nothing else in the system is.
    pub fn validate(&self) -> Result<(), ConfigError> {
        fn invalid(field: &'static str, reason: String) -> Result<(), ConfigError> {
            Err(ConfigError::Invalid { field, reason })
        }

        if self.window_ms == 0 {
            return invalid("window_ms", "must be positive".to_string());
        }
        if self.idle_timeout_secs == 0 {
            return invalid("idle_timeout_secs", "must be positive".to_string());
        }
        if self.block_ttl_secs == 0 {
            return invalid("block_ttl_secs", "must be positive".to_string());
        }
        if !(self.rate_threshold > 0.0) {
            return invalid("rate_threshold", "must be positive".to_string());
        }
        if !(self.syn_ratio_threshold > 0.0 && self.syn_ratio_threshold <= 1.0) {
            return invalid("syn_ratio_threshold", "must be in (0, 1]".to_string());
        }
        if !(self.byte_rate_threshold > 0.0) {
            return invalid("byte_rate_threshold", "must be positive".to_string());
        }
        if !(self.confidence_cutoff > 0.0 && self.confidence_cutoff <= 1.0) {
            return invalid("confidence_cutoff", "must be in (0, 1]".to_string());
        }
        if !(0.0..=1.0).contains(&self.model_threshold) {
            return invalid("model_threshold", "must be in [0, 1]".to_string());
        }
        if self.backend_preference.is_empty() {
            return invalid("backend_preference", "must name at least one backend".to_string());
        }
        if self.backend_timeout_ms == 0 {
            return invalid("backend_timeout_ms", "must be positive".to_string());
        }
        if self.max_flows == 0 {
            return invalid("max_flows", "must be positive".to_string());
        }
        if self.check_interval_packets == 0 {
            return invalid("check_interval_packets", "must be positive".to_string());
        }
        if self.eviction_sweep_secs == 0 || self.expiry_sweep_secs == 0 {
            return invalid("sweep interval", "must be positive".to_string());
        }
        Ok(())
    }

    pub fn idle_timeout_ms(&self) -> u64 {
        self.idle_timeout_secs * 1_000
    }

    pub fn block_ttl_ms(&self) -> i64 {
        self.block_ttl_secs as i64 * 1_000
    }
}

// ============================================================================
// ERRORS
// ============================================================================

/// Configuration failure (fatal at startup)
#[derive(Debug, Clone)]
pub enum ConfigError {
    Invalid { field: &'static str, reason: String },
    Io { path: PathBuf, message: String },
    Parse { path: PathBuf, message: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Invalid { field, reason } => {
                write!(f, "Invalid config option '{}': {}", field, reason)
            }
            ConfigError::Io { path, message } => {
                write!(f, "Cannot read config {:?}: {}", path, message)
            }
            ConfigError::Parse { path, message } => {
                write!(f, "Cannot parse config {:?}: {}", path, message)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

// ============================================================================
// TESTS
// ============================================================================
