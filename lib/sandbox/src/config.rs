//! Resource caps and checks for one sandbox execution, per §4.4 step 2/3.

use std::time::Duration;

/// A single checked step run in sequence inside the sandbox (test suite,
/// type checker, style checker, security scanner).
#[derive(Debug, Clone)]
pub struct CheckStep {
    pub name: &'static str,
    pub program: String,
    pub args: Vec<String>,
}

impl CheckStep {
    #[must_use]
    pub fn new(name: &'static str, program: impl Into<String>, args: Vec<String>) -> Self {
        Self { name, program: program.into(), args }
    }
}

/// Environment variables forwarded into the sandbox child process. Anything
/// not on this list (in particular proxy/DNS variables) is scrubbed, per
/// §4.4 step 2's "no network access" requirement.
pub const ENV_ALLOWLIST: &[&str] = &["PATH", "HOME", "LANG", "LC_ALL", "TMPDIR"];

/// The deterministic seed every workspace is fixture-seeded with.
pub const DEFAULT_SEED: u64 = 42;

/// Resource caps and the check sequence for one sandbox run.
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    pub memory_limit_bytes: u64,
    pub cpu_limit_seconds: u64,
    pub timeout: Duration,
    pub seed: u64,
    pub checks: Vec<CheckStep>,
}

impl SandboxConfig {
    /// Defaults from §4.4 step 2: 1 GiB memory, 0.5 core-equivalent (applied
    /// as a CPU-time rlimit, the closest portable analogue to a fractional
    /// core cap), 300s wall clock.
    #[must_use]
    pub fn new(checks: Vec<CheckStep>) -> Self {
        Self {
            memory_limit_bytes: 1024 * 1024 * 1024,
            cpu_limit_seconds: 150,
            timeout: Duration::from_secs(300),
            seed: DEFAULT_SEED,
            checks,
        }
    }

    #[must_use]
    pub fn with_memory_limit_bytes(mut self, bytes: u64) -> Self {
        self.memory_limit_bytes = bytes;
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}
