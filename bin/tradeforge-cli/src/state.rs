//! Cross-process persistence of workflow state under `WORKSPACE_ROOT`
//! (§6 "Persisted state"): one JSON snapshot per workflow, plus a
//! cooperative abort marker.
//!
//! `submit` and `execute` are separate invocations, but an
//! [`tradeforge_orchestrator::Orchestrator`] only exists for the duration
//! of the `execute` process that drives it, and the in-process bus
//! transport carries nothing between invocations. This module is the only
//! channel that reaches across those process boundaries: `status`/`list`
//! read the latest snapshot directly, and `abort` writes one without
//! needing a live orchestrator to apply it to.

use std::path::{Path, PathBuf};

use tradeforge_core::WorkflowId;
use tradeforge_orchestrator::{TaskStatus, WorkflowState, WorkflowStatus};

use crate::error::CliError;

fn workflows_dir(workspace_root: &str) -> PathBuf {
    Path::new(workspace_root).join("workflows")
}

fn state_path(workspace_root: &str, workflow_id: WorkflowId) -> PathBuf {
    workflows_dir(workspace_root).join(format!("{workflow_id}.json"))
}

fn abort_marker_path(workspace_root: &str, workflow_id: WorkflowId) -> PathBuf {
    workflows_dir(workspace_root).join(format!("{workflow_id}.abort"))
}

/// Persists `state`, overwriting any prior snapshot for this workflow.
///
/// # Errors
///
/// Returns [`CliError::Io`] if the workspace directory cannot be created or
/// written.
pub fn save(workspace_root: &str, state: &WorkflowState) -> Result<(), CliError> {
    let dir = workflows_dir(workspace_root);
    std::fs::create_dir_all(&dir)?;
    let bytes = serde_json::to_vec_pretty(state)?;
    std::fs::write(state_path(workspace_root, state.workflow_id), bytes)?;
    Ok(())
}

/// Loads the persisted state for `workflow_id`.
///
/// # Errors
///
/// Returns [`CliError::UnknownWorkflow`] if no snapshot exists, or
/// [`CliError::Json`] if the file is present but unparsable.
pub fn load(workspace_root: &str, workflow_id: WorkflowId) -> Result<WorkflowState, CliError> {
    let bytes = std::fs::read(state_path(workspace_root, workflow_id)).map_err(|_| CliError::UnknownWorkflow(workflow_id.to_string()))?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Lists every workflow with persisted state, most recently started first.
///
/// # Errors
///
/// Returns [`CliError::Io`] if the workspace directory exists but cannot be
/// read.
pub fn list(workspace_root: &str) -> Result<Vec<WorkflowState>, CliError> {
    let dir = workflows_dir(workspace_root);
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut states = Vec::new();
    for entry in std::fs::read_dir(&dir)? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        if let Ok(bytes) = std::fs::read(&path) {
            if let Ok(state) = serde_json::from_slice::<WorkflowState>(&bytes) {
                states.push(state);
            }
        }
    }
    states.sort_by(|a, b| b.started_at.cmp(&a.started_at));
    Ok(states)
}

/// Requests cooperative cancellation of a running workflow (the `abort`
/// command, §6): writes the marker a live `execute` process polls for, and
/// eagerly marks the persisted snapshot aborted so `status`/`list` are
/// correct immediately even when no `execute` process is currently
/// watching this workflow.
///
/// # Errors
///
/// Returns [`CliError::UnknownWorkflow`] if no snapshot exists for
/// `workflow_id`.
pub fn request_abort(workspace_root: &str, workflow_id: WorkflowId) -> Result<WorkflowState, CliError> {
    let mut state = load(workspace_root, workflow_id)?;
    if state.status.is_terminal() {
        return Ok(state);
    }

    for task in &mut state.todo_list.items {
        if !task.status.is_terminal() {
            task.status = TaskStatus::Cancelled;
        }
    }
    state.task_states = state.todo_list.items.iter().map(|t| (t.id, t.status)).collect();
    state.status = WorkflowStatus::Aborted;
    state.ended_at = Some(chrono::Utc::now());
    save(workspace_root, &state)?;

    std::fs::write(abort_marker_path(workspace_root, workflow_id), b"abort")?;
    Ok(state)
}

/// Checks for (and consumes) the abort marker written by
/// [`request_abort`]. `execute`'s dispatch loop polls this each iteration.
#[must_use]
pub fn consume_abort_marker(workspace_root: &str, workflow_id: WorkflowId) -> bool {
    let path = abort_marker_path(workspace_root, workflow_id);
    if path.exists() {
        let _ = std::fs::remove_file(&path);
        true
    } else {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use tradeforge_bus::AgentRole;
    use tradeforge_orchestrator::{AcceptanceCriteria, Task, TodoList};

    fn sample_state() -> WorkflowState {
        let task = Task::new("t", "d", AgentRole::Coder, 0, HashSet::new(), AcceptanceCriteria { tests: vec![], schema: None });
        let workflow_id = WorkflowId::new();
        let todo_list = TodoList::new(workflow_id, "wf", vec![task]);
        WorkflowState::new(todo_list, "ai/generated/test")
    }

    #[test]
    fn round_trips_through_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_str().unwrap();
        let state = sample_state();
        save(root, &state).unwrap();

        let loaded = load(root, state.workflow_id).unwrap();
        assert_eq!(loaded.workflow_id, state.workflow_id);
        assert_eq!(loaded.todo_list.items.len(), 1);
    }

    #[test]
    fn load_of_unknown_workflow_is_unknown_workflow_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load(dir.path().to_str().unwrap(), WorkflowId::new()).unwrap_err();
        assert!(matches!(err, CliError::UnknownWorkflow(_)));
    }

    #[test]
    fn request_abort_marks_non_terminal_tasks_cancelled_and_writes_marker() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_str().unwrap();
        let state = sample_state();
        let workflow_id = state.workflow_id;
        save(root, &state).unwrap();

        let aborted = request_abort(root, workflow_id).unwrap();
        assert_eq!(aborted.status, WorkflowStatus::Aborted);
        assert!(aborted.todo_list.items.iter().all(|t| t.status == TaskStatus::Cancelled));
        assert!(consume_abort_marker(root, workflow_id));
        assert!(!consume_abort_marker(root, workflow_id), "marker is consumed exactly once");
    }

    #[test]
    fn abort_of_terminal_workflow_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_str().unwrap();
        let mut state = sample_state();
        state.status = WorkflowStatus::Succeeded;
        let workflow_id = state.workflow_id;
        save(root, &state).unwrap();

        request_abort(root, workflow_id).unwrap();
        assert!(!consume_abort_marker(root, workflow_id));
    }
}
