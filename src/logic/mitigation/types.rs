//! Mitigation Types
//!
//! Data structures for the block list and the backend contract.

use std::net::IpAddr;

use serde::{Deserialize, Serialize};

// ============================================================================
// BLOCK ENTRY
// ============================================================================

/// One active block. At most one entry exists per source address.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockEntry {
    pub addr: IpAddr,
    /// Why the address was blocked (classifier reasons)
    pub reason: String,
    pub created_at_ms: i64,
    pub expires_at_ms: i64,
    /// Whether an enforcement backend accepted the block. False means the
    /// entry is tracked in user space only (degraded capability).
    pub backend_applied: bool,
    /// Name of the backend that applied the block
    pub backend: Option<String>,
}

impl BlockEntry {
    pub fn is_expired(&self, now_ms: i64) -> bool {
        now_ms >= self.expires_at_ms
    }
}

// ============================================================================
// BLOCK STATUS
// ============================================================================

/// Outcome of a controller block request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockStatus {
    /// Entry created and enforced through a backend
    Blocked { backend: String },
    /// Entry created but no backend accepted it; detection continues
    BlockedDegraded,
    /// Address already blocked; no duplicate backend call
    AlreadyBlocked,
    /// Address already blocked; expiry refreshed
    Refreshed,
    /// Address is private/loopback and is never blocked
    Skipped,
}

// ============================================================================
// BACKEND CONTRACT
// ============================================================================

/// Result of one apply-block call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockOutcome {
    /// The backend installed the block
    Applied,
    /// The mechanism is unsupported in this environment (or timed out,
    /// which is treated identically): switch to the next preference
    Unsupported,
    /// The mechanism is supported but this call failed
    Error(String),
}

/// Result of a capability probe
#[derive(Debug, Clone)]
pub struct CapabilityProbe {
    pub supported: bool,
    pub detail: String,
}

/// Backend command failure
#[derive(Debug, Clone)]
pub enum BackendError {
    /// The enforcement binary is not installed
    NotFound { command: String },
    /// The call exceeded its bounded timeout
    Timeout { command: String, timeout_ms: u64 },
    /// The command ran and failed
    CommandFailed {
        command: String,
        exit_code: i32,
        stderr: String,
    },
    /// Spawning or reading the command failed
    Io { command: String, message: String },
}

impl std::fmt::Display for BackendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendError::NotFound { command } => write!(f, "Command '{}' not found", command),
            BackendError::Timeout {
                command,
                timeout_ms,
            } => write!(f, "Command '{}' timed out after {} ms", command, timeout_ms),
            BackendError::CommandFailed {
                command,
                exit_code,
                stderr,
            } => write!(f, "Command '{}' failed ({}): {}", command, exit_code, stderr),
            BackendError::Io { command, message } => {
                write!(f, "Command '{}' error: {}", command, message)
            }
        }
    }
}

impl std::error::Error for BackendError {}

// ============================================================================
// CAPABILITY STATE
// ============================================================================

/// Process-wide enforcement capability.
///
/// `Unknown -> PrimaryCapable` on the first successful primary enforcement;
/// any unsupported/timeout outcome moves to `FallbackOnly`, which is sticky
/// for the life of the engine so an unsupported kernel mechanism is never
/// retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CapabilityState {
    Unknown,
    PrimaryCapable,
    FallbackOnly,
}

impl CapabilityState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CapabilityState::Unknown => "unknown",
            CapabilityState::PrimaryCapable => "primary_capable",
            CapabilityState::FallbackOnly => "fallback_only",
        }
    }
}

impl std::fmt::Display for CapabilityState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn test_block_entry_expiry() {
        let entry = BlockEntry {
            addr: IpAddr::V4(Ipv4Addr::new(203, 0, 113, 1)),
            reason: "test".to_string(),
            created_at_ms: 1_000,
            expires_at_ms: 2_000,
            backend_applied: true,
            backend: Some("xdp".to_string()),
        };
        assert!(!entry.is_expired(1_999));
        assert!(entry.is_expired(2_000));
        assert!(entry.is_expired(2_001));
    }

    #[test]
    fn test_capability_state_as_str() {
        assert_eq!(CapabilityState::Unknown.as_str(), "unknown");
        assert_eq!(CapabilityState::FallbackOnly.as_str(), "fallback_only");
    }
}
