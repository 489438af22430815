//! The `Artifact` record and its `kind` taxonomy.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tradeforge_core::{ArtifactId, TaskId, WorkflowId};

/// What an artifact represents, used by the tester and fixtures library to
/// route validation and by consumers to filter `list` results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Code,
    Test,
    Report,
    Trades,
    Equity,
    Log,
}

/// A committed artifact. Immutable once returned by
/// [`crate::store::ArtifactStore::put`] — artifacts are never mutated after
/// commit, only superseded by a new artifact with a new id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub artifact_id: ArtifactId,
    pub workflow_id: WorkflowId,
    pub task_id: TaskId,
    pub filename: String,
    pub filepath: String,
    pub content_hash: String,
    pub size: u64,
    pub created_at: DateTime<Utc>,
    pub kind: ArtifactKind,
    pub parent_artifacts: Vec<ArtifactId>,
}
