//! The agent worker loop (C6): subscribes to `TASK_DISPATCHED` for one
//! role, invokes the bound [`AgentHandler`], writes its artifact, and
//! publishes `TASK_COMPLETED`.
//!
//! Directly generalizes the source's `Worker<O: ObjectStore, E:
//! NodeExecutor>::process`/`execute_node` (`lib/workflow/src/worker.rs`):
//! `retrieve_inputs` becomes [`crate::handler::collect_dependency_artifacts`],
//! `executor.execute` becomes `handler.handle`, and the object-store `put`
//! becomes `ArtifactStore::put`. Unlike the source's one-shot `process`,
//! this loop also owns the idempotency check and the bounded per-role pool
//! (§5: default 4 concurrent handlers per role).

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tracing::warn;
use tradeforge_artifacts::ArtifactStore;
use tradeforge_bus::{Event, EventBus, EventPayload, EventType, FailureInfo};
use tradeforge_core::ArtifactId;

use crate::error::AgentError;
use crate::handler::{collect_dependency_artifacts, AgentContext, AgentHandler, AgentOutput};
use crate::lookup::TaskLookup;

/// Default wall-clock bound on one handler invocation (§5).
pub const DEFAULT_HANDLER_TIMEOUT: Duration = Duration::from_secs(120);

/// Default number of concurrent handler invocations per role (§5).
pub const DEFAULT_POOL_SIZE: usize = 4;

fn failure_kind_name(error: &AgentError) -> &'static str {
    match error {
        AgentError::Validation { .. } => "validation",
        AgentError::Llm(_) => "llm",
        AgentError::Artifact(_) => "artifact",
        AgentError::Bus(_) => "bus",
        AgentError::Timeout => "timeout",
        AgentError::Cancelled => "cancelled",
    }
}

/// Drives one role's handler against a bus and artifact store.
pub struct AgentWorker<B: EventBus, H: AgentHandler, L: TaskLookup> {
    bus: Arc<B>,
    artifacts: Arc<ArtifactStore>,
    lookup: Arc<L>,
    handler: Arc<H>,
    handler_timeout: Duration,
}

impl<B: EventBus, H: AgentHandler, L: TaskLookup> Clone for AgentWorker<B, H, L> {
    fn clone(&self) -> Self {
        Self {
            bus: Arc::clone(&self.bus),
            artifacts: Arc::clone(&self.artifacts),
            lookup: Arc::clone(&self.lookup),
            handler: Arc::clone(&self.handler),
            handler_timeout: self.handler_timeout,
        }
    }
}

impl<B: EventBus + 'static, H: AgentHandler + 'static, L: TaskLookup + 'static> AgentWorker<B, H, L> {
    #[must_use]
    pub fn new(bus: Arc<B>, artifacts: Arc<ArtifactStore>, lookup: Arc<L>, handler: Arc<H>) -> Self {
        Self {
            bus,
            artifacts,
            lookup,
            handler,
            handler_timeout: DEFAULT_HANDLER_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_handler_timeout(mut self, timeout: Duration) -> Self {
        self.handler_timeout = timeout;
        self
    }

    /// Processes one `TASK_DISPATCHED` event end to end: idempotency check,
    /// task lookup, bounded handler invocation, artifact write, and
    /// `TASK_COMPLETED` publish. Returns without publishing anything if the
    /// event is not addressed to this worker's role or is a stale
    /// redelivery of an already-completed task.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::Bus`] if publishing `TASK_STARTED` or
    /// `TASK_COMPLETED` fails; a failure from the handler itself is caught
    /// and turned into a passing `Ok(())` with a `TASK_COMPLETED(passed =
    /// false)` publish, per §4.6's "catch, package, publish, ack regardless"
    /// policy.
    pub async fn process_one(&self, event: Event) -> Result<(), AgentError> {
        let EventPayload::TaskDispatched { task_id, agent_role, .. } = event.envelope.payload().clone() else {
            return Ok(());
        };
        if agent_role != self.handler.role() {
            return Ok(());
        }
        let workflow_id = event.workflow_id;

        let already_completed = self.bus.replay(workflow_id, None).await?.iter().any(|e| matches!(e.envelope.payload(), EventPayload::TaskCompleted { task_id: t, .. } if *t == task_id));
        if already_completed {
            return Ok(());
        }

        let Some(task) = self.lookup.lookup(workflow_id, task_id).await else {
            warn!(%task_id, "no task found for dispatched event, dropping");
            return Ok(());
        };

        let dependency_artifacts = collect_dependency_artifacts(&self.artifacts, workflow_id, &task)?;
        let dep_ids: Vec<ArtifactId> = dependency_artifacts.iter().map(|(a, _)| a.artifact_id).collect();
        let ctx = AgentContext { workflow_id, task: task.clone(), dependency_artifacts };

        let started = Event::new(workflow_id, self.handler.role(), 1, EventPayload::TaskStarted { task_id });
        self.bus.publish(started).await?;

        let invocation = tokio::time::timeout(self.handler_timeout, self.handler.handle(&ctx)).await;

        let verdict: Result<Vec<ArtifactId>, AgentError> = match invocation {
            Err(_) => Err(AgentError::Timeout),
            Ok(Err(e)) => Err(e),
            Ok(Ok(AgentOutput::Artifact { filename, kind, bytes })) => self
                .artifacts
                .put(workflow_id, task_id, &filename, kind, &bytes, dep_ids)
                .map(|id| vec![id])
                .map_err(AgentError::from),
        };

        let (passed, artifact_ids, failure) = match verdict {
            Ok(ids) => (true, ids, None),
            Err(e) => (
                false,
                Vec::new(),
                Some(FailureInfo {
                    kind: failure_kind_name(&e).to_string(),
                    message: e.to_string(),
                    stack_excerpt: None,
                }),
            ),
        };

        let completed = Event::new(workflow_id, self.handler.role(), 1, EventPayload::TaskCompleted { task_id, passed, artifact_ids, failure });
        self.bus.publish(completed).await?;
        Ok(())
    }

    /// Runs the dispatch loop for this role until the process exits, bounded
    /// to `pool_size` concurrent handler invocations (§5, default
    /// [`DEFAULT_POOL_SIZE`]). Deliveries are polled non-blockingly, per the
    /// bus's `Subscription::next` contract, with a short idle backoff.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::Bus`] if subscribing itself fails; per-delivery
    /// failures are logged and do not terminate the loop.
    pub async fn run(&self, group: &str, pool_size: usize) -> Result<(), AgentError> {
        let mut subscription = self.bus.subscribe(&[EventType::TaskDispatched], group).await?;
        let semaphore = Arc::new(Semaphore::new(pool_size));

        loop {
            match subscription.next().await {
                Ok(Some(delivery)) => {
                    let permit = Arc::clone(&semaphore).acquire_owned().await.expect("semaphore is never closed");
                    let worker = self.clone();
                    let event = delivery.event;
                    let ack_handle = delivery.ack_handle;
                    tokio::spawn(async move {
                        if let Err(e) = worker.process_one(event).await {
                            warn!(error = %e, "agent worker iteration failed");
                        }
                        if let Err(e) = ack_handle.ack().await {
                            warn!(error = %e, "failed to ack delivery");
                        }
                        drop(permit);
                    });
                }
                Ok(None) => tokio::time::sleep(Duration::from_millis(50)).await,
                Err(e) => {
                    warn!(error = %e, "subscription poll failed");
                    tokio::time::sleep(Duration::from_millis(200)).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use tempfile::tempdir;
    use tradeforge_artifacts::ArtifactKind;
    use tradeforge_bus::{AgentRole, InProcessBus};
    use tradeforge_core::{TaskId, WorkflowId};
    use tradeforge_orchestrator::{AcceptanceCriteria, Task};

    struct EchoCoder;

    #[async_trait]
    impl AgentHandler for EchoCoder {
        fn role(&self) -> AgentRole {
            AgentRole::Coder
        }

        async fn handle(&self, ctx: &AgentContext) -> Result<AgentOutput, AgentError> {
            Ok(AgentOutput::artifact(format!("{}.py", ctx.task.id), ArtifactKind::Code, b"print('hi')".to_vec()))
        }
    }

    struct AlwaysFails;

    #[async_trait]
    impl AgentHandler for AlwaysFails {
        fn role(&self) -> AgentRole {
            AgentRole::Coder
        }

        async fn handle(&self, _ctx: &AgentContext) -> Result<AgentOutput, AgentError> {
            Err(AgentError::Validation { reason: "no can do".to_string() })
        }
    }

    struct StaticLookup(Task);

    #[async_trait]
    impl TaskLookup for StaticLookup {
        async fn lookup(&self, _workflow_id: WorkflowId, _task_id: TaskId) -> Option<Task> {
            Some(self.0.clone())
        }
    }

    fn coder_task() -> Task {
        Task::new("write strategy", "d", AgentRole::Coder, 0, HashSet::new(), AcceptanceCriteria { tests: vec![], schema: None })
    }

    #[tokio::test]
    async fn process_one_writes_artifact_and_publishes_success() {
        let dir = tempdir().unwrap();
        let artifacts = Arc::new(ArtifactStore::init(dir.path()).unwrap());
        let bus = Arc::new(InProcessBus::new());
        let workflow_id = WorkflowId::new();
        artifacts.open_workflow(workflow_id).unwrap();

        let task = coder_task();
        let task_id = task.id;
        let lookup = Arc::new(StaticLookup(task));
        let worker = AgentWorker::new(Arc::clone(&bus), Arc::clone(&artifacts), lookup, Arc::new(EchoCoder));

        let dispatched = Event::new(workflow_id, AgentRole::Orchestrator, 1, EventPayload::TaskDispatched { task_id, agent_role: AgentRole::Coder, contract_id: None });
        worker.process_one(dispatched).await.unwrap();

        let events = bus.replay(workflow_id, None).await.unwrap();
        let completed = events.iter().find_map(|e| match e.envelope.payload() {
            EventPayload::TaskCompleted { task_id: t, passed, artifact_ids, .. } if *t == task_id => Some((*passed, artifact_ids.clone())),
            _ => None,
        });
        let (passed, artifact_ids) = completed.expect("TASK_COMPLETED published");
        assert!(passed);
        assert_eq!(artifact_ids.len(), 1);
    }

    #[tokio::test]
    async fn handler_error_publishes_failed_completion_not_a_worker_error() {
        let dir = tempdir().unwrap();
        let artifacts = Arc::new(ArtifactStore::init(dir.path()).unwrap());
        let bus = Arc::new(InProcessBus::new());
        let workflow_id = WorkflowId::new();
        artifacts.open_workflow(workflow_id).unwrap();

        let task = coder_task();
        let task_id = task.id;
        let lookup = Arc::new(StaticLookup(task));
        let worker = AgentWorker::new(Arc::clone(&bus), Arc::clone(&artifacts), lookup, Arc::new(AlwaysFails));

        let dispatched = Event::new(workflow_id, AgentRole::Orchestrator, 1, EventPayload::TaskDispatched { task_id, agent_role: AgentRole::Coder, contract_id: None });
        worker.process_one(dispatched).await.unwrap();

        let events = bus.replay(workflow_id, None).await.unwrap();
        let completed = events.iter().find_map(|e| match e.envelope.payload() {
            EventPayload::TaskCompleted { task_id: t, passed, failure, .. } if *t == task_id => Some((*passed, failure.clone())),
            _ => None,
        });
        let (passed, failure) = completed.expect("TASK_COMPLETED published");
        assert!(!passed);
        assert_eq!(failure.unwrap().kind, "validation");
    }

    #[tokio::test]
    async fn redelivery_of_already_completed_task_is_a_noop() {
        let dir = tempdir().unwrap();
        let artifacts = Arc::new(ArtifactStore::init(dir.path()).unwrap());
        let bus = Arc::new(InProcessBus::new());
        let workflow_id = WorkflowId::new();
        artifacts.open_workflow(workflow_id).unwrap();

        let task = coder_task();
        let task_id = task.id;
        let lookup = Arc::new(StaticLookup(task));
        let worker = AgentWorker::new(Arc::clone(&bus), Arc::clone(&artifacts), lookup, Arc::new(EchoCoder));

        let already = Event::new(workflow_id, AgentRole::Coder, 1, EventPayload::TaskCompleted { task_id, passed: true, artifact_ids: vec![], failure: None });
        bus.publish(already).await.unwrap();

        let dispatched = Event::new(workflow_id, AgentRole::Orchestrator, 1, EventPayload::TaskDispatched { task_id, agent_role: AgentRole::Coder, contract_id: None });
        worker.process_one(dispatched).await.unwrap();

        let events = bus.replay(workflow_id, None).await.unwrap();
        let completed_count = events.iter().filter(|e| matches!(e.envelope.payload(), EventPayload::TaskCompleted { task_id: t, .. } if *t == task_id)).count();
        assert_eq!(completed_count, 1, "no second TASK_COMPLETED from the stale redelivery");
    }

    #[tokio::test]
    async fn event_for_a_different_role_is_ignored() {
        let dir = tempdir().unwrap();
        let artifacts = Arc::new(ArtifactStore::init(dir.path()).unwrap());
        let bus = Arc::new(InProcessBus::new());
        let workflow_id = WorkflowId::new();
        artifacts.open_workflow(workflow_id).unwrap();

        let task = coder_task();
        let task_id = task.id;
        let lookup = Arc::new(StaticLookup(task));
        let worker = AgentWorker::new(bus, Arc::clone(&artifacts), lookup, Arc::new(EchoCoder));

        let dispatched = Event::new(workflow_id, AgentRole::Orchestrator, 1, EventPayload::TaskDispatched { task_id, agent_role: AgentRole::Architect, contract_id: None });
        worker.process_one(dispatched).await.unwrap();

        assert!(artifacts.list(workflow_id).unwrap().is_empty());
    }
}
