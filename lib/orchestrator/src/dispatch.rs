//! The dispatch loop (§4.5): owns `WorkflowState`, reacts to bus events, and
//! drives the workflow toward a terminal status.
//!
//! Directly generalizes the source's `Orchestrator<E: EventStore>`
//! (`lib/workflow/src/orchestrator.rs`):
//! `schedule_ready_nodes` becomes [`Orchestrator::schedule_ready_tasks`],
//! `handle_result` becomes [`Orchestrator::handle_event`], and
//! `finalize_run` becomes [`Orchestrator::finalize`]. The source holds its
//! `EventStore` by value rather than behind a trait object, and so does
//! this orchestrator with `EventBus`.

use std::sync::Arc;
use tracing::{info, warn};
use tradeforge_artifacts::ArtifactStore;
use tradeforge_bus::{AgentRole, Event, EventBus, EventPayload};
use tradeforge_core::{TaskId, WorkflowId};

use crate::error::OrchestratorError;
use crate::graph::TaskGraph;
use crate::model::{Task, TaskStatus, TodoList, WorkflowState, WorkflowStatus};

/// Coordinates a single workflow run end to end.
pub struct Orchestrator<B: EventBus> {
    bus: Arc<B>,
    artifacts: Arc<ArtifactStore>,
    state: WorkflowState,
    graph: TaskGraph,
}

impl<B: EventBus> Orchestrator<B> {
    /// Validates the plan's DAG, opens the workflow's artifact branch,
    /// publishes `TODO_LIST_CREATED`, and dispatches the initial ready set
    /// (§4.5 steps 1-2).
    pub async fn start(bus: Arc<B>, artifacts: Arc<ArtifactStore>, todo_list: TodoList) -> Result<Self, OrchestratorError> {
        let workflow_id = todo_list.workflow_id;
        let graph = TaskGraph::from_todo_list(&todo_list).ok_or(OrchestratorError::CyclicDependency { workflow_id })?;

        artifacts.open_workflow(workflow_id)?;
        let branch_name = format!("ai/generated/{workflow_id}");
        let task_ids = todo_list.items.iter().map(|t| t.id).collect();
        let state = WorkflowState::new(todo_list, branch_name);

        let event = Event::new(workflow_id, AgentRole::Orchestrator, 1, EventPayload::TodoListCreated {
            todo_list_id: state.todo_list.todo_list_id,
            workflow_name: state.todo_list.workflow_name.clone(),
            task_ids,
        });
        bus.publish(event).await?;

        let mut orchestrator = Self { bus, artifacts, state, graph };
        orchestrator.schedule_ready_tasks().await?;
        Ok(orchestrator)
    }

    #[must_use]
    pub fn state(&self) -> &WorkflowState {
        &self.state
    }

    /// Applies one bus event to workflow state. Redelivery of an
    /// already-applied event is a no-op (§4.5 idempotency).
    pub async fn handle_event(&mut self, event: Event) -> Result<(), OrchestratorError> {
        if self.state.status.is_terminal() {
            return Ok(());
        }

        match event.envelope.payload().clone() {
            EventPayload::TaskCompleted { task_id, passed, artifact_ids, failure } => {
                self.handle_task_completed(task_id, passed, artifact_ids, failure).await?;
            }
            EventPayload::TestFailed { task_id, kind, workspace_snapshot_id: _ } => {
                if let Some(task) = self.state.task_mut(task_id) {
                    task.last_test_failure = Some(kind);
                }
            }
            EventPayload::BranchTodoRequest { failed_task_id, reason } => {
                self.handle_task_failure(failed_task_id, None, Some(reason)).await?;
            }
            // Not relevant to dispatch: re-delivery of these is always a no-op.
            EventPayload::TodoListCreated { .. }
            | EventPayload::TaskDispatched { .. }
            | EventPayload::TaskStarted { .. }
            | EventPayload::TestStarted { .. }
            | EventPayload::TestPassed { .. }
            | EventPayload::WorkflowBranchCreated { .. }
            | EventPayload::WorkflowSucceeded
            | EventPayload::WorkflowFailed { .. }
            | EventPayload::TaskCancelled { .. } => {}
        }

        Ok(())
    }

    /// `abort(workflow_id)`: cancels every non-terminal task and
    /// transitions the workflow to `aborted`.
    pub async fn abort(&mut self) -> Result<(), OrchestratorError> {
        if self.state.status.is_terminal() {
            return Ok(());
        }

        let workflow_id = self.state.workflow_id;
        let non_terminal: Vec<TaskId> = self.state.todo_list.items.iter().filter(|t| !t.status.is_terminal()).map(|t| t.id).collect();

        for task_id in non_terminal {
            self.state.set_task_status(task_id, TaskStatus::Cancelled);
            self.graph.mark_completed(task_id);
            let event = Event::new(workflow_id, AgentRole::Orchestrator, 1, EventPayload::TaskCancelled { task_id, reason: "workflow aborted".to_string() });
            self.bus.publish(event).await?;
        }

        self.state.status = WorkflowStatus::Aborted;
        self.state.ended_at = Some(chrono::Utc::now());
        Ok(())
    }

    async fn handle_task_completed(&mut self, task_id: TaskId, passed: bool, artifact_ids: Vec<tradeforge_core::ArtifactId>, failure: Option<tradeforge_bus::FailureInfo>) -> Result<(), OrchestratorError> {
        let Some(task) = self.state.task(task_id) else {
            warn!(%task_id, "ignoring TASK_COMPLETED for unknown task");
            return Ok(());
        };
        if task.status.is_terminal() {
            return Ok(());
        }

        if passed {
            self.state.set_task_status(task_id, TaskStatus::Passed);
            if let Some(task) = self.state.task_mut(task_id) {
                task.artifact_ids = artifact_ids;
            }
            self.graph.mark_completed(task_id);

            let branch_parent = self.state.task(task_id).and_then(|t| t.branch_parent);
            if let Some(parent_id) = branch_parent {
                info!(%task_id, %parent_id, "branch remediation succeeded, re-dispatching original task");
                self.graph.reinstate(parent_id);
                if let Some(parent) = self.state.task_mut(parent_id) {
                    parent.status = TaskStatus::Pending;
                    parent.attempts = 0;
                }
                self.state.sync_task_state(parent_id);
            }

            self.after_update().await
        } else {
            self.handle_task_failure(task_id, failure, None).await
        }
    }

    /// §4.5 step 4/5: retry the task if its attempt budget allows, else
    /// insert a debugger branch todo and block the task pending remediation.
    async fn handle_task_failure(&mut self, task_id: TaskId, failure: Option<tradeforge_bus::FailureInfo>, reason_override: Option<String>) -> Result<(), OrchestratorError> {
        let workflow_id = self.state.workflow_id;
        let Some(task) = self.state.task(task_id) else {
            warn!(%task_id, "ignoring failure for unknown task");
            return Ok(());
        };
        if task.status.is_terminal() {
            return Ok(());
        }

        let attempts = task.attempts + 1;
        let max_attempts = task.max_attempts;
        let is_branch = task.branch_parent.is_some();

        if let Some(task) = self.state.task_mut(task_id) {
            task.attempts = attempts;
            task.last_failure = failure;
        }

        if attempts < max_attempts {
            self.state.set_task_status(task_id, TaskStatus::Pending);
            self.graph.mark_failed_retryable(task_id);
            return self.after_update().await;
        }

        self.state.set_task_status(task_id, TaskStatus::Failed);
        self.graph.mark_failed_exhausted(task_id);

        if is_branch {
            // A branch task is itself the remediation; if it exhausts its
            // budget there is no further branch to insert, so the workflow
            // fails outright (§4.5 step 7).
            return self.fail_workflow(format!("branch remediation task {task_id} exhausted its retry budget")).await;
        }

        let reason = reason_override.unwrap_or_else(|| format!("task {task_id} exhausted its retry budget"));
        let branch = {
            let failed_task = self.state.task(task_id).expect("task looked up above").clone();
            let priority = self.state.todo_list.max_priority() + 1;
            Task::branch_for(&failed_task, reason.clone(), priority)
        };
        let branch_id = branch.id;
        self.state.insert_task(branch);
        self.graph.insert_task(branch_id, &[]);

        let event = Event::new(workflow_id, AgentRole::Orchestrator, 1, EventPayload::WorkflowBranchCreated { branch_name: format!("branch/{branch_id}") });
        self.bus.publish(event).await?;

        self.after_update().await
    }

    async fn after_update(&mut self) -> Result<(), OrchestratorError> {
        if self.graph.is_complete() {
            self.finalize().await
        } else {
            self.schedule_ready_tasks().await
        }
    }

    /// §4.5 steps 2 and tie-breaks: dispatch every ready task, priority
    /// descending then task id ascending, publishing `TASK_DISPATCHED` keyed
    /// to the task's `agent_role`.
    async fn schedule_ready_tasks(&mut self) -> Result<(), OrchestratorError> {
        let workflow_id = self.state.workflow_id;
        let mut ready: Vec<TaskId> = self.graph.ready_nodes().into_iter().filter(|id| self.state.task(*id).is_some_and(|t| t.status == TaskStatus::Pending)).collect();
        ready.sort_by(|a, b| {
            let ta = self.state.task(*a).expect("ready task present in state");
            let tb = self.state.task(*b).expect("ready task present in state");
            tb.priority.cmp(&ta.priority).then_with(|| a.cmp(b))
        });

        for task_id in ready {
            self.graph.mark_executing(task_id);
            self.state.set_task_status(task_id, TaskStatus::Dispatched);
            let task = self.state.task(task_id).expect("dispatched task present in state");

            let event = Event::new(workflow_id, AgentRole::Orchestrator, 1, EventPayload::TaskDispatched { task_id, agent_role: task.agent_role, contract_id: task.contract_id });
            self.bus.publish(event).await?;
        }

        Ok(())
    }

    /// §4.5 step 6/7: promote the workflow's branch on success, or emit
    /// `WORKFLOW_FAILED` when any task remains permanently blocked.
    async fn finalize(&mut self) -> Result<(), OrchestratorError> {
        let workflow_id = self.state.workflow_id;

        if self.graph.has_failures() {
            let failed_task = self.graph.failed_nodes().iter().next().copied();
            let reason = "one or more tasks exhausted their retry and remediation budget".to_string();
            self.state.status = WorkflowStatus::Failed;
            self.state.ended_at = Some(chrono::Utc::now());
            let event = Event::new(workflow_id, AgentRole::Orchestrator, 1, EventPayload::WorkflowFailed { reason, task_id: failed_task });
            self.bus.publish(event).await?;
            return Ok(());
        }

        self.artifacts.promote(workflow_id)?;
        self.state.status = WorkflowStatus::Succeeded;
        self.state.ended_at = Some(chrono::Utc::now());
        let event = Event::new(workflow_id, AgentRole::Orchestrator, 1, EventPayload::WorkflowSucceeded);
        self.bus.publish(event).await?;
        Ok(())
    }

    async fn fail_workflow(&mut self, reason: String) -> Result<(), OrchestratorError> {
        let workflow_id = self.state.workflow_id;
        self.state.status = WorkflowStatus::Failed;
        self.state.ended_at = Some(chrono::Utc::now());
        let event = Event::new(workflow_id, AgentRole::Orchestrator, 1, EventPayload::WorkflowFailed { reason, task_id: None });
        self.bus.publish(event).await?;
        Ok(())
    }
}

#[allow(dead_code)]
fn _assert_workflow_id_used(_: WorkflowId) {}
