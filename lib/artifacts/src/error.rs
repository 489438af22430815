//! Error types for artifact store operations.

use std::fmt;

/// Errors surfaced by [`crate::store::ArtifactStore`].
#[derive(Debug)]
pub enum ArtifactError {
    /// The underlying git repository could not be opened or initialized.
    RepoUnavailable { reason: String },
    /// A git operation failed partway through; the caller's request did
    /// not complete and the branch is unchanged.
    OperationFailed { reason: String },
    /// `promote` could not fast-forward because `main` has diverged past
    /// the workflow branch's fork point.
    PromotionConflict { workflow_id: String },
    /// No artifact exists with the requested id.
    ArtifactNotFound { artifact_id: String },
    /// No branch exists for the requested workflow; `open_workflow` was
    /// never called or the workflow was never written to.
    WorkflowNotFound { workflow_id: String },
}

impl fmt::Display for ArtifactError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RepoUnavailable { reason } => write!(f, "artifact repository unavailable: {reason}"),
            Self::OperationFailed { reason } => write!(f, "artifact store operation failed: {reason}"),
            Self::PromotionConflict { workflow_id } => {
                write!(f, "promotion conflict: main has diverged past the fork point of workflow {workflow_id}")
            }
            Self::ArtifactNotFound { artifact_id } => write!(f, "artifact not found: {artifact_id}"),
            Self::WorkflowNotFound { workflow_id } => write!(f, "no branch for workflow: {workflow_id}"),
        }
    }
}

impl std::error::Error for ArtifactError {}

impl From<git2::Error> for ArtifactError {
    fn from(e: git2::Error) -> Self {
        Self::OperationFailed { reason: e.to_string() }
    }
}
