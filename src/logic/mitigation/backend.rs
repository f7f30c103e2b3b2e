//! Mitigation Backends
//!
//! Enforcement implementations behind the `MitigationBackend` trait:
//! kernel-level XDP filtering (`xdp-filter`) as the fast primary, iptables
//! as the always-available fallback, and a user-space-only null backend for
//! environments without either. All external commands run under a bounded
//! timeout; a timeout is reported as an unsupported mechanism so the
//! controller falls back instead of hanging the pipeline.

use std::net::IpAddr;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use super::types::{BackendError, BlockOutcome, CapabilityProbe};

/// Comment tag attached to iptables rules so they can be identified and
/// cleaned up without touching unrelated rules
const RULE_TAG: &str = "ddos-sentry-block";

/// Poll granularity while waiting on an external command
const WAIT_POLL_MS: u64 = 10;

// ============================================================================
// BACKEND TRAIT
// ============================================================================

/// Enforcement backend contract
pub trait MitigationBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Check whether this mechanism works in the current environment
    fn probe_capability(&self) -> CapabilityProbe;

    /// Install a drop rule for all traffic from `addr`
    fn apply_block(&self, addr: IpAddr) -> BlockOutcome;

    /// Remove a previously installed drop rule
    fn remove_block(&self, addr: IpAddr) -> Result<(), BackendError>;
}

// ============================================================================
// COMMAND EXECUTION (time-bounded)
// ============================================================================

struct CommandResult {
    success: bool,
    exit_code: i32,
    stderr: String,
}

/// Run a command, killing it once the deadline passes.
///
/// Stdout/stderr are piped; enforcement tools print at most a few lines, so
/// the pipe buffer never fills before the process exits.
fn run_with_timeout(mut cmd: Command, timeout: Duration) -> Result<CommandResult, BackendError> {
    let command = cmd.get_program().to_string_lossy().to_string();

    let mut child = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                BackendError::NotFound {
                    command: command.clone(),
                }
            } else {
                BackendError::Io {
                    command: command.clone(),
                    message: e.to_string(),
                }
            }
        })?;

    let deadline = Instant::now() + timeout;
    loop {
        match child.try_wait() {
            Ok(Some(status)) => {
                let mut stderr = String::new();
                if let Some(mut pipe) = child.stderr.take() {
                    use std::io::Read;
                    let _ = pipe.read_to_string(&mut stderr);
                }
                return Ok(CommandResult {
                    success: status.success(),
                    exit_code: status.code().unwrap_or(-1),
                    stderr: stderr.trim().to_string(),
                });
            }
            Ok(None) => {
                if Instant::now() >= deadline {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(BackendError::Timeout {
                        command,
                        timeout_ms: timeout.as_millis() as u64,
                    });
                }
                std::thread::sleep(Duration::from_millis(WAIT_POLL_MS));
            }
            Err(e) => {
                return Err(BackendError::Io {
                    command,
                    message: e.to_string(),
                })
            }
        }
    }
}

/// Fold a command result into the apply-block outcome contract
fn outcome_from(result: Result<CommandResult, BackendError>) -> BlockOutcome {
    match result {
        Ok(out) if out.success => BlockOutcome::Applied,
        Ok(out) => {
            let stderr = out.stderr.to_lowercase();
            // Unprivileged or unsupported environments look different per
            // tool but mean the same thing: this mechanism is unusable here.
            if stderr.contains("not supported")
                || stderr.contains("operation not permitted")
                || stderr.contains("permission denied")
            {
                BlockOutcome::Unsupported
            } else {
                BlockOutcome::Error(format!("exit {}: {}", out.exit_code, out.stderr))
            }
        }
        // A missing binary or a hang both mean the mechanism is unusable
        // here; the controller falls back rather than retrying.
        Err(BackendError::NotFound { .. }) | Err(BackendError::Timeout { .. }) => {
            BlockOutcome::Unsupported
        }
        Err(e) => BlockOutcome::Error(e.to_string()),
    }
}

// ============================================================================
// XDP BACKEND (primary)
// ============================================================================

/// Kernel-level filtering via `xdp-filter`.
///
/// Fast but frequently unsupported (WSL, containers, missing driver
/// support); the capability state machine makes that a one-time discovery.
pub struct XdpBackend {
    interface: String,
    timeout: Duration,
}

impl XdpBackend {
    pub fn new(interface: &str, timeout: Duration) -> Self {
        Self {
            interface: interface.to_string(),
            timeout,
        }
    }
}

impl MitigationBackend for XdpBackend {
    fn name(&self) -> &'static str {
        "xdp"
    }

    fn probe_capability(&self) -> CapabilityProbe {
        let mut cmd = Command::new("xdp-filter");
        cmd.args(["load", &self.interface]);
        match run_with_timeout(cmd, self.timeout) {
            Ok(out) if out.success => CapabilityProbe {
                supported: true,
                detail: format!("xdp-filter loaded on {}", self.interface),
            },
            Ok(out) => CapabilityProbe {
                supported: false,
                detail: format!("xdp-filter load failed: {}", out.stderr),
            },
            Err(e) => CapabilityProbe {
                supported: false,
                detail: e.to_string(),
            },
        }
    }

    fn apply_block(&self, addr: IpAddr) -> BlockOutcome {
        let mut cmd = Command::new("xdp-filter");
        cmd.args([
            "ip",
            &self.interface,
            "-m",
            "src",
            "-a",
            "deny",
            &addr.to_string(),
        ]);
        outcome_from(run_with_timeout(cmd, self.timeout))
    }

    fn remove_block(&self, addr: IpAddr) -> Result<(), BackendError> {
        let mut cmd = Command::new("xdp-filter");
        cmd.args(["ip", &self.interface, "-m", "src", "-r", &addr.to_string()]);
        let out = run_with_timeout(cmd, self.timeout)?;
        if out.success {
            Ok(())
        } else {
            Err(BackendError::CommandFailed {
                command: "xdp-filter".to_string(),
                exit_code: out.exit_code,
                stderr: out.stderr,
            })
        }
    }
}

// ============================================================================
// IPTABLES BACKEND (fallback)
// ============================================================================

/// User-space-managed netfilter rules via `iptables`
pub struct IptablesBackend {
    timeout: Duration,
}

impl IptablesBackend {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl MitigationBackend for IptablesBackend {
    fn name(&self) -> &'static str {
        "iptables"
    }

    fn probe_capability(&self) -> CapabilityProbe {
        let mut cmd = Command::new("iptables");
        cmd.args(["-L", "INPUT", "-n"]);
        match run_with_timeout(cmd, self.timeout) {
            Ok(out) if out.success => CapabilityProbe {
                supported: true,
                detail: "iptables available".to_string(),
            },
            Ok(out) => CapabilityProbe {
                supported: false,
                detail: format!("iptables list failed: {}", out.stderr),
            },
            Err(e) => CapabilityProbe {
                supported: false,
                detail: e.to_string(),
            },
        }
    }

    fn apply_block(&self, addr: IpAddr) -> BlockOutcome {
        let mut cmd = Command::new("iptables");
        cmd.args([
            "-A",
            "INPUT",
            "-s",
            &addr.to_string(),
            "-j",
            "DROP",
            "-m",
            "comment",
            "--comment",
            RULE_TAG,
        ]);
        outcome_from(run_with_timeout(cmd, self.timeout))
    }

    fn remove_block(&self, addr: IpAddr) -> Result<(), BackendError> {
        let mut cmd = Command::new("iptables");
        cmd.args([
            "-D",
            "INPUT",
            "-s",
            &addr.to_string(),
            "-j",
            "DROP",
            "-m",
            "comment",
            "--comment",
            RULE_TAG,
        ]);
        let out = run_with_timeout(cmd, self.timeout)?;
        if out.success {
            Ok(())
        } else {
            Err(BackendError::CommandFailed {
                command: "iptables".to_string(),
                exit_code: out.exit_code,
                stderr: out.stderr,
            })
        }
    }
}

// ============================================================================
// NULL BACKEND (user-space tracking only)
// ============================================================================

/// Accepts every block without touching the system.
///
/// Used when no enforcement mechanism is available (development machines,
/// tests, unprivileged runs): the block list and event stream still behave
/// exactly as in production.
#[derive(Default)]
pub struct NullBackend;

impl MitigationBackend for NullBackend {
    fn name(&self) -> &'static str {
        "null"
    }

    fn probe_capability(&self) -> CapabilityProbe {
        CapabilityProbe {
            supported: true,
            detail: "user-space block list only".to_string(),
        }
    }

    fn apply_block(&self, addr: IpAddr) -> BlockOutcome {
        log::debug!("null backend: would block {}", addr);
        BlockOutcome::Applied
    }

    fn remove_block(&self, addr: IpAddr) -> Result<(), BackendError> {
        log::debug!("null backend: would unblock {}", addr);
        Ok(())
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
    fn test_missing_binary_is_unsupported() {
        // A command that cannot exist maps to Unsupported, not Error
        let mut cmd = Command::new("ddos-sentry-no-such-binary");
        cmd.arg("x");
        let outcome = outcome_from(run_with_timeout(cmd, Duration::from_millis(500)));
        assert_eq!(outcome, BlockOutcome::Unsupported);
    }

    #[test]
    fn test_timeout_is_unsupported() {
        let mut cmd = Command::new("sleep");
        cmd.arg("5");
        let start = Instant::now();
        let outcome = outcome_from(run_with_timeout(cmd, Duration::from_millis(100)));
        assert_eq!(outcome, BlockOutcome::Unsupported);
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn test_successful_command_applies() {
        let cmd = Command::new("true");
        let outcome = outcome_from(run_with_timeout(cmd, Duration::from_millis(500)));
        assert_eq!(outcome, BlockOutcome::Applied);
    }

    #[test]
    fn test_failing_command_is_error() {
        let cmd = Command::new("false");
        let outcome = outcome_from(run_with_timeout(cmd, Duration::from_millis(500)));
        assert!(matches!(outcome, BlockOutcome::Error(_)));
    }

    #[test]
    fn test_null_backend_always_applies() {
        let backend = NullBackend;
        let addr = IpAddr::V4(Ipv4Addr::new(203, 0, 113, 9));
        assert!(backend.probe_capability().supported);
        assert_eq!(backend.apply_block(addr), BlockOutcome::Applied);
        assert!(backend.remove_block(addr).is_ok());
    }
}
