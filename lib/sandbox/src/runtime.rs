//! The process-isolation seam (§4.4 "Process-isolation grounding"):
//! `SandboxRuntime` lets a container-runtime-backed implementation be
//! swapped in later without touching the tester's control flow, matching
//! the source's guidance that container internals are an external
//! collaborator. `ProcessSandboxRuntime` is the buildable default.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use crate::config::{CheckStep, SandboxConfig, ENV_ALLOWLIST};
use crate::error::SandboxError;

/// The outcome of one [`CheckStep`].
#[derive(Debug, Clone)]
pub struct StepOutcome {
    pub name: &'static str,
    pub exit_success: bool,
    pub stdout: String,
    pub stderr: String,
}

/// The combined result of running every configured check in sequence.
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub steps: Vec<StepOutcome>,
}

impl RunOutput {
    #[must_use]
    pub fn all_passed(&self) -> bool {
        self.steps.iter().all(|s| s.exit_success)
    }

    /// Concatenated stdout/stderr across every step, the text the secret
    /// scanner and `events.log` artifact are built from.
    #[must_use]
    pub fn combined_log(&self) -> String {
        let mut out = String::new();
        for step in &self.steps {
            out.push_str(&format!("=== {} ===\n", step.name));
            out.push_str(&step.stdout);
            out.push_str(&step.stderr);
            out.push('\n');
        }
        out
    }
}

/// Isolated execution of a sandbox's check sequence against a materialized
/// workspace.
#[async_trait]
pub trait SandboxRuntime: Send + Sync {
    async fn run_checks(&self, workspace: &Path, config: &SandboxConfig) -> Result<RunOutput, SandboxError>;
}

/// Spawns each check as a child process via `tokio::process::Command`, with
/// the environment scrubbed to [`ENV_ALLOWLIST`], the working directory
/// pinned to the workspace, a wall-clock timeout, and best-effort memory/CPU
/// rlimits applied via `nix::sys::resource::setrlimit` on Unix before exec.
///
/// Network isolation is enforced by clearing proxy/DNS environment
/// variables; there is no network-namespace hook on non-Unix platforms, so
/// this is documented as a platform caveat rather than a hard guarantee.
#[derive(Debug, Clone, Default)]
pub struct ProcessSandboxRuntime;

impl ProcessSandboxRuntime {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn scrubbed_env() -> Vec<(String, String)> {
        ENV_ALLOWLIST
            .iter()
            .filter_map(|key| std::env::var(key).ok().map(|v| ((*key).to_string(), v)))
            .collect()
    }

    async fn run_step(&self, step: &CheckStep, workspace: &Path, config: &SandboxConfig, timeout: Duration) -> Result<StepOutcome, SandboxError> {
        let mut command = Command::new(&step.program);
        command
            .args(&step.args)
            .current_dir(workspace)
            .env_clear()
            .envs(Self::scrubbed_env())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            let memory_limit = config.memory_limit_bytes;
            let cpu_limit = config.cpu_limit_seconds;
            unsafe {
                command.pre_exec(move || apply_resource_limits(memory_limit, cpu_limit));
            }
        }

        let child = command.spawn().map_err(|e| SandboxError::Infra { reason: e.to_string() })?;
        let output = tokio::time::timeout(timeout, child.wait_with_output())
            .await
            .map_err(|_| SandboxError::Timeout { after_secs: timeout.as_secs() })?
            .map_err(|e| SandboxError::Infra { reason: e.to_string() })?;

        Ok(StepOutcome {
            name: step.name,
            exit_success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

#[async_trait]
impl SandboxRuntime for ProcessSandboxRuntime {
    async fn run_checks(&self, workspace: &Path, config: &SandboxConfig) -> Result<RunOutput, SandboxError> {
        let mut steps = Vec::with_capacity(config.checks.len());
        for step in &config.checks {
            let outcome = self.run_step(step, workspace, config, config.timeout).await?;
            let failed = !outcome.exit_success;
            steps.push(outcome);
            if failed {
                break;
            }
        }
        Ok(RunOutput { steps })
    }
}

#[cfg(unix)]
fn apply_resource_limits(memory_limit_bytes: u64, cpu_limit_seconds: u64) -> std::io::Result<()> {
    use nix::sys::resource::{setrlimit, Resource};
    let _ = setrlimit(Resource::RLIMIT_AS, memory_limit_bytes, memory_limit_bytes);
    let _ = setrlimit(Resource::RLIMIT_CPU, cpu_limit_seconds, cpu_limit_seconds);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn echo_step(name: &'static str, success: bool) -> CheckStep {
        if success {
            CheckStep::new(name, "true", vec![])
        } else {
            CheckStep::new(name, "false", vec![])
        }
    }

    #[tokio::test]
    async fn all_steps_pass_reports_all_passed() {
        let runtime = ProcessSandboxRuntime::new();
        let dir = tempfile::tempdir().unwrap();
        let config = SandboxConfig::new(vec![echo_step("suite", true), echo_step("types", true)]);
        let result = runtime.run_checks(dir.path(), &config).await.unwrap();
        assert!(result.all_passed());
        assert_eq!(result.steps.len(), 2);
    }

    #[tokio::test]
    async fn a_failing_step_stops_the_sequence() {
        let runtime = ProcessSandboxRuntime::new();
        let dir = tempfile::tempdir().unwrap();
        let config = SandboxConfig::new(vec![echo_step("suite", false), echo_step("types", true)]);
        let result = runtime.run_checks(dir.path(), &config).await.unwrap();
        assert!(!result.all_passed());
        assert_eq!(result.steps.len(), 1);
    }

    #[tokio::test]
    async fn timeout_surfaces_as_timeout_error() {
        let runtime = ProcessSandboxRuntime::new();
        let dir = tempfile::tempdir().unwrap();
        let mut config = SandboxConfig::new(vec![CheckStep::new("sleep", "sleep", vec!["5".to_string()])]);
        config.timeout = Duration::from_millis(50);
        let result = runtime.run_checks(dir.path(), &config).await;
        assert!(matches!(result, Err(SandboxError::Timeout { .. })));
    }
}
