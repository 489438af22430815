//! Resolves a dispatched `task_id` back to its full [`Task`] record.
//!
//! `TASK_DISPATCHED` carries only `task_id`/`agent_role`/`contract_id` (the
//! event schema is fixed); the worker needs the task's title, description,
//! and `depends_on` set to act on it. [`OrchestratorTaskLookup`] resolves
//! this via the orchestrator's own read-only `state()` accessor, shared with
//! the worker pools through an `Arc<Mutex<_>>` at the binary's wiring layer
//! (the single logical owner still does all *mutation* through
//! `handle_event`; this is a read-only snapshot, the same role `ObjectStore`
//! plays for `Worker::retrieve_inputs` in the source).

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tradeforge_bus::EventBus;
use tradeforge_core::{TaskId, WorkflowId};
use tradeforge_orchestrator::{Orchestrator, Task};

/// Looks up a task by id within a workflow.
#[async_trait]
pub trait TaskLookup: Send + Sync {
    async fn lookup(&self, workflow_id: WorkflowId, task_id: TaskId) -> Option<Task>;
}

/// The default lookup: reads through a shared, mutex-guarded orchestrator.
pub struct OrchestratorTaskLookup<B: EventBus> {
    orchestrator: Arc<Mutex<Orchestrator<B>>>,
}

impl<B: EventBus> OrchestratorTaskLookup<B> {
    #[must_use]
    pub fn new(orchestrator: Arc<Mutex<Orchestrator<B>>>) -> Self {
        Self { orchestrator }
    }
}

#[async_trait]
impl<B: EventBus> TaskLookup for OrchestratorTaskLookup<B> {
    async fn lookup(&self, workflow_id: WorkflowId, task_id: TaskId) -> Option<Task> {
        let guard = self.orchestrator.lock().await;
        let task = guard.state().task(task_id)?.clone();
        if guard.state().workflow_id == workflow_id {
            Some(task)
        } else {
            None
        }
    }
}
