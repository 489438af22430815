//! The CLI's own error taxonomy, composed via `From` from each subsystem's
//! errors the way `OrchestratorError` composes `BusError`/`ArtifactError`
//! (§7).

use std::fmt;

use tradeforge_artifacts::ArtifactError;
use tradeforge_bus::BusError;
use tradeforge_llm::{ManifestError, RouterError};
use tradeforge_orchestrator::OrchestratorError;
use tradeforge_sandbox::SandboxError;

#[derive(Debug)]
pub enum CliError {
    /// Malformed request, unknown workflow id, or an invalid todo list.
    Validation(String),
    /// The named workflow has no persisted state.
    UnknownWorkflow(String),
    Bus(BusError),
    Artifact(ArtifactError),
    Orchestrator(OrchestratorError),
    Router(RouterError),
    Manifest(ManifestError),
    Sandbox(SandboxError),
    Io(std::io::Error),
    Json(serde_json::Error),
    Config(config::ConfigError),
}

impl CliError {
    /// Maps the error onto the process exit codes fixed by §7: 0 success
    /// (never constructed here), 1 workflow failed, 2 invalid input, 3
    /// infra unavailable.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Validation(_) => 2,
            Self::UnknownWorkflow(_) => 1,
            Self::Bus(_) | Self::Router(_) | Self::Manifest(_) | Self::Sandbox(_) | Self::Artifact(_) | Self::Orchestrator(_) | Self::Io(_) | Self::Json(_) | Self::Config(_) => 3,
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validation(reason) => write!(f, "validation error: {reason}"),
            Self::UnknownWorkflow(id) => write!(f, "unknown workflow: {id}"),
            Self::Bus(e) => write!(f, "{e}"),
            Self::Artifact(e) => write!(f, "{e}"),
            Self::Orchestrator(e) => write!(f, "{e}"),
            Self::Router(e) => write!(f, "{e}"),
            Self::Manifest(e) => write!(f, "{e}"),
            Self::Sandbox(e) => write!(f, "{e}"),
            Self::Io(e) => write!(f, "{e}"),
            Self::Json(e) => write!(f, "{e}"),
            Self::Config(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for CliError {}

impl From<BusError> for CliError {
    fn from(e: BusError) -> Self {
        Self::Bus(e)
    }
}

impl From<ArtifactError> for CliError {
    fn from(e: ArtifactError) -> Self {
        Self::Artifact(e)
    }
}

impl From<OrchestratorError> for CliError {
    fn from(e: OrchestratorError) -> Self {
        Self::Orchestrator(e)
    }
}

impl From<RouterError> for CliError {
    fn from(e: RouterError) -> Self {
        Self::Router(e)
    }
}

impl From<ManifestError> for CliError {
    fn from(e: ManifestError) -> Self {
        Self::Manifest(e)
    }
}

impl From<SandboxError> for CliError {
    fn from(e: SandboxError) -> Self {
        Self::Sandbox(e)
    }
}

impl From<std::io::Error> for CliError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<serde_json::Error> for CliError {
    fn from(e: serde_json::Error) -> Self {
        Self::Json(e)
    }
}

impl From<config::ConfigError> for CliError {
    fn from(e: config::ConfigError) -> Self {
        Self::Config(e)
    }
}
