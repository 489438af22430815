//! Errors surfaced by the orchestrator's dispatch loop.

use std::fmt;

use tradeforge_artifacts::ArtifactError;
use tradeforge_bus::BusError;
use tradeforge_core::{TaskId, WorkflowId};

#[derive(Debug)]
pub enum OrchestratorError {
    /// The todo list's `depends_on` edges contain a cycle.
    CyclicDependency { workflow_id: WorkflowId },
    /// An event referenced a task not present in the workflow's plan.
    UnknownTask { task_id: TaskId },
    /// The workflow has already reached a terminal status.
    AlreadyTerminal { workflow_id: WorkflowId },
    Bus(BusError),
    Artifact(ArtifactError),
}

impl fmt::Display for OrchestratorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CyclicDependency { workflow_id } => write!(f, "todo list for workflow {workflow_id} has a cyclic dependency"),
            Self::UnknownTask { task_id } => write!(f, "event referenced unknown task {task_id}"),
            Self::AlreadyTerminal { workflow_id } => write!(f, "workflow {workflow_id} already in a terminal state"),
            Self::Bus(e) => write!(f, "bus error: {e}"),
            Self::Artifact(e) => write!(f, "artifact store error: {e}"),
        }
    }
}

impl std::error::Error for OrchestratorError {}

impl From<BusError> for OrchestratorError {
    fn from(e: BusError) -> Self {
        Self::Bus(e)
    }
}

impl From<ArtifactError> for OrchestratorError {
    fn from(e: ArtifactError) -> Self {
        Self::Artifact(e)
    }
}
