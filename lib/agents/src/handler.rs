//! The role-handler contract (C6): generalizes the source's
//! `NodeExecutor::execute(node, inputs) -> JsonValue`
//! (`lib/workflow/src/worker.rs`) from a single node-execution step to a
//! per-agent-role task invocation with the richer inputs TradeForge's tasks
//! carry (a contract, and the artifacts produced by dependency tasks).

use async_trait::async_trait;
use tradeforge_artifacts::{Artifact, ArtifactKind, ArtifactStore};
use tradeforge_bus::AgentRole;
use tradeforge_core::WorkflowId;
use tradeforge_orchestrator::Task;

use crate::error::AgentError;

/// Everything a role handler needs to act on one dispatched task.
///
/// `dependency_artifacts` carries the latest artifact produced by each of
/// `task.depends_on`, mirroring `Worker::retrieve_inputs`'s "fetch by key"
/// step but addressed by task id against the artifact store's manifest
/// rather than by an arbitrary object-store key.
#[derive(Debug, Clone)]
pub struct AgentContext {
    pub workflow_id: WorkflowId,
    pub task: Task,
    pub dependency_artifacts: Vec<(Artifact, Vec<u8>)>,
}

impl AgentContext {
    /// Finds the most recent dependency artifact whose filename starts with
    /// `prefix`, used by coder/debugger to locate the architect's contract
    /// JSON among their dependency artifacts (the event schema has no
    /// dedicated `contract_id` wire slot, so the contract travels as an
    /// ordinary artifact; see DESIGN.md).
    #[must_use]
    pub fn dependency_artifact_with_prefix(&self, prefix: &str) -> Option<&(Artifact, Vec<u8>)> {
        self.dependency_artifacts.iter().filter(|(a, _)| a.filename.starts_with(prefix)).max_by_key(|(a, _)| a.created_at)
    }
}

/// The output of one role handler invocation, written to the artifact store
/// by the worker loop before `TASK_COMPLETED` is published.
#[derive(Debug, Clone)]
pub enum AgentOutput {
    /// A structural placeholder file (no particular format mandated by the
    /// distilled spec) written verbatim.
    Artifact {
        filename: String,
        kind: ArtifactKind,
        bytes: Vec<u8>,
    },
}

impl AgentOutput {
    #[must_use]
    pub fn artifact(filename: impl Into<String>, kind: ArtifactKind, bytes: Vec<u8>) -> Self {
        Self::Artifact { filename: filename.into(), kind, bytes }
    }
}

/// A role-specific unit of work, invoked by [`crate::worker::AgentWorker`]
/// once per dispatched task bound to this handler's role.
///
/// Per §4.9, the tester role is fulfilled directly by `tradeforge-sandbox`
/// and has no `AgentHandler` implementation here.
#[async_trait]
pub trait AgentHandler: Send + Sync {
    /// The role this handler services; the worker subscribes to
    /// `TASK_DISPATCHED` filtered to this role.
    fn role(&self) -> AgentRole;

    /// Performs the role's work for one task.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError`] on any failure; the worker loop catches this,
    /// packages it into a `FailureInfo`, and publishes `TASK_COMPLETED(passed
    /// = false)` rather than propagating the error further (§4.6 "failure
    /// reporting").
    async fn handle(&self, ctx: &AgentContext) -> Result<AgentOutput, AgentError>;
}

/// Fetches the most recently created artifact for each task in
/// `task.depends_on`, paired with its bytes. A dependency task with no
/// artifacts yet (shouldn't happen once the orchestrator's DAG ordering is
/// honored, but defensive against replay races) is silently omitted.
///
/// # Errors
///
/// Returns [`tradeforge_artifacts::ArtifactError`] if the workflow branch
/// itself cannot be listed.
pub fn collect_dependency_artifacts(artifacts: &ArtifactStore, workflow_id: WorkflowId, task: &Task) -> Result<Vec<(Artifact, Vec<u8>)>, tradeforge_artifacts::ArtifactError> {
    let all = artifacts.list(workflow_id)?;
    let mut out = Vec::new();
    for dep_id in &task.depends_on {
        if let Some(latest) = all.iter().filter(|a| &a.task_id == dep_id).max_by_key(|a| a.created_at) {
            let bytes = artifacts.read(latest.artifact_id)?;
            out.push((latest.clone(), bytes));
        }
    }
    Ok(out)
}
