//! Errors surfaced by sandbox execution.

use std::fmt;

/// Errors from the sandbox runtime or the tester's orchestration of it.
///
/// `Infra` is the distinction §4.4 calls out explicitly: it means the
/// execution environment itself could not run (process spawn failure,
/// workspace materialization failure), not that the strategy under test
/// failed its checks. Callers retry `Infra` via
/// `tradeforge_core::RetryPolicy::sandbox_infra()` before surfacing
/// `TesterUnavailable`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SandboxError {
    Infra { reason: String },
    Timeout { after_secs: u64 },
    Io { reason: String },
}

impl fmt::Display for SandboxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Infra { reason } => write!(f, "sandbox infrastructure error: {reason}"),
            Self::Timeout { after_secs } => write!(f, "sandbox execution exceeded {after_secs}s wall-clock timeout"),
            Self::Io { reason } => write!(f, "sandbox I/O error: {reason}"),
        }
    }
}

impl std::error::Error for SandboxError {}

impl From<std::io::Error> for SandboxError {
    fn from(e: std::io::Error) -> Self {
        Self::Io { reason: e.to_string() }
    }
}
