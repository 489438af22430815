//! Errors surfaced by an [`crate::handler::AgentHandler`] or the
//! [`crate::worker::AgentWorker`] loop that drives it.

use std::fmt;

use tradeforge_artifacts::ArtifactError;
use tradeforge_bus::BusError;
use tradeforge_llm::RouterError;

/// Errors an agent role handler, or the worker loop around it, can produce.
#[derive(Debug)]
pub enum AgentError {
    /// The handler's input (task, contract, or upstream artifact) was
    /// malformed in a way the handler cannot proceed past.
    Validation { reason: String },
    /// The LLM Router exhausted its keys, was safety-blocked at the
    /// heaviest tier, or rejected the request as malformed.
    Llm(RouterError),
    /// Writing the handler's output to the artifact store failed.
    Artifact(ArtifactError),
    /// Publishing or acking on the bus failed.
    Bus(BusError),
    /// The handler did not return within the configured wall-clock bound.
    Timeout,
    /// The task was cancelled (workflow abort) before or during handling.
    Cancelled,
}

impl fmt::Display for AgentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validation { reason } => write!(f, "invalid agent input: {reason}"),
            Self::Llm(e) => write!(f, "LLM call failed: {e}"),
            Self::Artifact(e) => write!(f, "artifact write failed: {e}"),
            Self::Bus(e) => write!(f, "bus error: {e}"),
            Self::Timeout => write!(f, "agent handler exceeded its wall-clock bound"),
            Self::Cancelled => write!(f, "task was cancelled"),
        }
    }
}

impl std::error::Error for AgentError {}

impl From<RouterError> for AgentError {
    fn from(e: RouterError) -> Self {
        Self::Llm(e)
    }
}

impl From<ArtifactError> for AgentError {
    fn from(e: ArtifactError) -> Self {
        Self::Artifact(e)
    }
}

impl From<BusError> for AgentError {
    fn from(e: BusError) -> Self {
        Self::Bus(e)
    }
}
