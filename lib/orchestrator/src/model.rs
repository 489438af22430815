//! The data model owned by the orchestrator: `TodoList`, `Task`, `Contract`,
//! and `WorkflowState` (§3).

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tradeforge_bus::{AgentRole, FailureInfo, TestFailureKind};
use tradeforge_core::{ArtifactId, ContractId, TaskId, TodoListId, WorkflowId};

/// A task's position in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Dispatched,
    InProgress,
    Passed,
    Failed,
    Skipped,
    Cancelled,
}

impl TaskStatus {
    /// Terminal statuses never transition again without an explicit
    /// remediation path (branch reinstatement for `Failed`).
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Passed | Self::Skipped | Self::Cancelled)
    }
}

/// Schema/tests a coder's output must satisfy, attached to a task by its
/// architect-authored contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcceptanceCriteria {
    pub tests: Vec<String>,
    pub schema: Option<String>,
}

/// A unit of work in the plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub title: String,
    pub description: String,
    pub agent_role: AgentRole,
    pub priority: i32,
    pub depends_on: HashSet<TaskId>,
    pub acceptance_criteria: AcceptanceCriteria,
    pub status: TaskStatus,
    pub attempts: u32,
    pub max_attempts: u32,
    pub branch_parent: Option<TaskId>,
    pub contract_id: Option<ContractId>,
    pub artifact_ids: Vec<ArtifactId>,
    pub last_failure: Option<FailureInfo>,
    pub last_test_failure: Option<TestFailureKind>,
}

impl Task {
    /// Creates a new, pending, non-branch task with the default retry
    /// budget (3 attempts).
    #[must_use]
    pub fn new(title: impl Into<String>, description: impl Into<String>, agent_role: AgentRole, priority: i32, depends_on: HashSet<TaskId>, acceptance_criteria: AcceptanceCriteria) -> Self {
        Self {
            id: TaskId::new(),
            title: title.into(),
            description: description.into(),
            agent_role,
            priority,
            depends_on,
            acceptance_criteria,
            status: TaskStatus::Pending,
            attempts: 0,
            max_attempts: 3,
            branch_parent: None,
            contract_id: None,
            artifact_ids: Vec::new(),
            last_failure: None,
            last_test_failure: None,
        }
    }

    /// Builds a debugger branch todo targeting `failed_task`, per §4.5 step 4.
    /// `depends_on` carries the failed task's own dependencies forward in
    /// addition to the failed task itself, so `collect_dependency_artifacts`
    /// still finds upstream artifacts (e.g. an architect's contract) that
    /// were never produced by the failed task directly. It is intentionally
    /// not wired as a graph dependency edge (see `graph::TaskGraph::insert_task`).
    #[must_use]
    pub fn branch_for(failed_task: &Task, reason: impl Into<String>, priority: i32) -> Self {
        let mut depends_on = failed_task.depends_on.clone();
        depends_on.insert(failed_task.id);
        let mut branch = Self::new(format!("debug: {}", failed_task.title), reason, AgentRole::Debugger, priority, depends_on, failed_task.acceptance_criteria.clone());
        branch.branch_parent = Some(failed_task.id);
        branch
    }
}

/// The plan produced by the planner (or amended by the orchestrator via
/// branch insertion).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TodoList {
    pub todo_list_id: TodoListId,
    pub workflow_id: WorkflowId,
    pub workflow_name: String,
    pub items: Vec<Task>,
    pub created_at: DateTime<Utc>,
    pub version: u32,
}

impl TodoList {
    #[must_use]
    pub fn new(workflow_id: WorkflowId, workflow_name: impl Into<String>, items: Vec<Task>) -> Self {
        Self {
            todo_list_id: TodoListId::new(),
            workflow_id,
            workflow_name: workflow_name.into(),
            items,
            created_at: Utc::now(),
            version: 1,
        }
    }

    #[must_use]
    pub fn max_priority(&self) -> i32 {
        self.items.iter().map(|t| t.priority).max().unwrap_or(0)
    }
}

/// An executable specification a coder must satisfy, produced by the
/// architect and consumed by the coder and tester.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contract {
    pub contract_id: ContractId,
    pub task_id: TaskId,
    pub interfaces: Vec<String>,
    pub fixtures: Vec<String>,
    pub acceptance_tests: Vec<String>,
}

/// A workflow's overall disposition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Running,
    Succeeded,
    Failed,
    Aborted,
}

impl WorkflowStatus {
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Running)
    }
}

/// The orchestrator's authoritative record of one workflow run.
///
/// Status is monotone toward a terminal value; only the orchestrator's
/// apply-event path mutates this structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowState {
    pub workflow_id: WorkflowId,
    pub status: WorkflowStatus,
    pub todo_list: TodoList,
    pub task_states: HashMap<TaskId, TaskStatus>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub git_branch_name: String,
}

impl WorkflowState {
    #[must_use]
    pub fn new(todo_list: TodoList, git_branch_name: impl Into<String>) -> Self {
        let task_states = todo_list.items.iter().map(|t| (t.id, t.status)).collect();
        Self {
            workflow_id: todo_list.workflow_id,
            status: WorkflowStatus::Running,
            todo_list,
            task_states,
            started_at: Utc::now(),
            ended_at: None,
            git_branch_name: git_branch_name.into(),
        }
    }

    #[must_use]
    pub fn task(&self, task_id: TaskId) -> Option<&Task> {
        self.todo_list.items.iter().find(|t| t.id == task_id)
    }

    pub fn task_mut(&mut self, task_id: TaskId) -> Option<&mut Task> {
        self.todo_list.items.iter_mut().find(|t| t.id == task_id)
    }

    pub fn insert_task(&mut self, task: Task) {
        self.task_states.insert(task.id, task.status);
        self.todo_list.items.push(task);
    }

    fn sync_task_state(&mut self, task_id: TaskId) {
        if let Some(task) = self.task(task_id) {
            let status = task.status;
            self.task_states.insert(task_id, status);
        }
    }

    pub fn set_task_status(&mut self, task_id: TaskId, status: TaskStatus) {
        if let Some(task) = self.task_mut(task_id) {
            task.status = status;
        }
        self.sync_task_state(task_id);
    }
}
