//! Hermetic, network-isolated, resource-capped test execution for generated
//! trading strategies (C4), including artifact validation, secret
//! scanning, and the determinism re-run.

pub mod config;
pub mod error;
pub mod runtime;
pub mod tester;
pub mod workspace;

pub use config::{CheckStep, SandboxConfig, DEFAULT_SEED, ENV_ALLOWLIST};
pub use error::SandboxError;
pub use runtime::{ProcessSandboxRuntime, RunOutput, SandboxRuntime, StepOutcome};
pub use tester::{run_with_determinism_check, CollectedArtifacts, TestOutcome, TestRequest};
pub use workspace::{materialize_workspace, AcceptanceTest};
