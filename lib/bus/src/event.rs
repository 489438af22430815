//! The bus's event envelope and recognized event types.

use crate::envelope::Envelope;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tradeforge_core::{ArtifactId, EventId, TaskId, WorkflowId};

/// Which role a task is dispatched to, and which component emitted an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    Planner,
    Architect,
    Coder,
    Tester,
    Debugger,
    Orchestrator,
}

impl fmt::Display for AgentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Planner => "planner",
            Self::Architect => "architect",
            Self::Coder => "coder",
            Self::Tester => "tester",
            Self::Debugger => "debugger",
            Self::Orchestrator => "orchestrator",
        };
        write!(f, "{s}")
    }
}

/// The recognized `event_type` discriminants, matching the event schema's
/// external wire vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    TodoListCreated,
    TaskDispatched,
    TaskStarted,
    TaskCompleted,
    TestStarted,
    TestPassed,
    TestFailed,
    BranchTodoRequest,
    WorkflowBranchCreated,
    WorkflowSucceeded,
    WorkflowFailed,
    TaskCancelled,
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Structured detail describing why an agent handler's work did not pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureInfo {
    pub kind: String,
    pub message: String,
    pub stack_excerpt: Option<String>,
}

/// The failure taxonomy tag attached to a `TestFailed` event, per the
/// error-handling taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestFailureKind {
    AssertionFailed,
    TypeCheckFailed,
    StyleCheckFailed,
    SecurityScanFailed,
    SecretDetected,
    MissingArtifact,
    SchemaInvalid,
    NonDeterministic,
}

/// Parsed backtest metrics surfaced on a passing test run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestMetrics {
    pub win_rate: f64,
    pub total_trades: u64,
    pub sharpe: f64,
    pub max_drawdown: f64,
}

/// The payload carried by an event, tagged by event type so a single log can
/// hold heterogeneous events while remaining strongly typed at read time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventPayload {
    TodoListCreated {
        todo_list_id: tradeforge_core::TodoListId,
        workflow_name: String,
        task_ids: Vec<TaskId>,
    },
    TaskDispatched {
        task_id: TaskId,
        agent_role: AgentRole,
        contract_id: Option<tradeforge_core::ContractId>,
    },
    TaskStarted {
        task_id: TaskId,
    },
    TaskCompleted {
        task_id: TaskId,
        passed: bool,
        artifact_ids: Vec<ArtifactId>,
        failure: Option<FailureInfo>,
    },
    TestStarted {
        task_id: TaskId,
    },
    TestPassed {
        task_id: TaskId,
        metrics: TestMetrics,
        artifact_ids: Vec<ArtifactId>,
    },
    TestFailed {
        task_id: TaskId,
        kind: TestFailureKind,
        workspace_snapshot_id: String,
    },
    BranchTodoRequest {
        failed_task_id: TaskId,
        reason: String,
    },
    WorkflowBranchCreated {
        branch_name: String,
    },
    WorkflowSucceeded,
    WorkflowFailed {
        reason: String,
        task_id: Option<TaskId>,
    },
    TaskCancelled {
        task_id: TaskId,
        reason: String,
    },
}

impl EventPayload {
    /// Returns the event type this payload corresponds to.
    #[must_use]
    pub fn event_type(&self) -> EventType {
        match self {
            Self::TodoListCreated { .. } => EventType::TodoListCreated,
            Self::TaskDispatched { .. } => EventType::TaskDispatched,
            Self::TaskStarted { .. } => EventType::TaskStarted,
            Self::TaskCompleted { .. } => EventType::TaskCompleted,
            Self::TestStarted { .. } => EventType::TestStarted,
            Self::TestPassed { .. } => EventType::TestPassed,
            Self::TestFailed { .. } => EventType::TestFailed,
            Self::BranchTodoRequest { .. } => EventType::BranchTodoRequest,
            Self::WorkflowBranchCreated { .. } => EventType::WorkflowBranchCreated,
            Self::WorkflowSucceeded => EventType::WorkflowSucceeded,
            Self::WorkflowFailed { .. } => EventType::WorkflowFailed,
            Self::TaskCancelled { .. } => EventType::TaskCancelled,
        }
    }

    /// The task this payload concerns, if any.
    #[must_use]
    pub fn task_id(&self) -> Option<TaskId> {
        match self {
            Self::TaskDispatched { task_id, .. }
            | Self::TaskStarted { task_id }
            | Self::TaskCompleted { task_id, .. }
            | Self::TestStarted { task_id }
            | Self::TestPassed { task_id, .. }
            | Self::TestFailed { task_id, .. }
            | Self::TaskCancelled { task_id, .. } => Some(*task_id),
            Self::BranchTodoRequest { failed_task_id, .. } => Some(*failed_task_id),
            Self::WorkflowFailed { task_id, .. } => *task_id,
            Self::TodoListCreated { .. }
            | Self::WorkflowBranchCreated { .. }
            | Self::WorkflowSucceeded => None,
        }
    }
}

/// An immutable message on the bus.
///
/// `workflow_id` doubles as the correlation id shared by every event in one
/// user request. `sequence` is assigned by the bus at publish time, giving a
/// reproducible replay order even when wall clocks are skewed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub event_id: EventId,
    pub workflow_id: WorkflowId,
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub source: AgentRole,
    pub attempt: u32,
    pub envelope: Envelope<EventPayload>,
}

impl Event {
    /// Builds a new event with a fresh id and the current wall-clock time.
    /// `sequence` defaults to 0; the publishing bus overwrites it with the
    /// next per-workflow sequence number before the event is durable.
    #[must_use]
    pub fn new(workflow_id: WorkflowId, source: AgentRole, attempt: u32, payload: EventPayload) -> Self {
        Self {
            event_id: EventId::new(),
            workflow_id,
            sequence: 0,
            timestamp: Utc::now(),
            source,
            attempt,
            envelope: Envelope::new(payload),
        }
    }

    /// The `correlation_id`: identical to `workflow_id` for this system.
    #[must_use]
    pub fn correlation_id(&self) -> WorkflowId {
        self.workflow_id
    }

    /// The event's discriminant.
    #[must_use]
    pub fn event_type(&self) -> EventType {
        self.envelope.payload().event_type()
    }

    /// The task this event concerns, if any.
    #[must_use]
    pub fn task_id(&self) -> Option<TaskId> {
        self.envelope.payload().task_id()
    }

    /// Returns the subject this event would be published under on a
    /// workflow-keyed transport.
    #[must_use]
    pub fn subject(&self) -> String {
        format!("tradeforge.wf.{}", self.workflow_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_type_matches_payload_variant() {
        let event = Event::new(
            WorkflowId::new(),
            AgentRole::Orchestrator,
            1,
            EventPayload::WorkflowSucceeded,
        );
        assert_eq!(event.event_type(), EventType::WorkflowSucceeded);
        assert!(event.task_id().is_none());
    }

    #[test]
    fn correlation_id_equals_workflow_id() {
        let workflow_id = WorkflowId::new();
        let event = Event::new(
            workflow_id,
            AgentRole::Coder,
            1,
            EventPayload::TaskStarted {
                task_id: TaskId::new(),
            },
        );
        assert_eq!(event.correlation_id(), workflow_id);
    }

    #[test]
    fn event_roundtrips_through_json() {
        let event = Event::new(
            WorkflowId::new(),
            AgentRole::Tester,
            1,
            EventPayload::TestFailed {
                task_id: TaskId::new(),
                kind: TestFailureKind::NonDeterministic,
                workspace_snapshot_id: "snap_1".to_string(),
            },
        );
        let json = serde_json::to_vec(&event).expect("serialize");
        let parsed: Event = serde_json::from_slice(&json).expect("deserialize");
        assert_eq!(event, parsed);
    }
}
