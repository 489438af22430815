//! The tester's dispatch loop (§4.9): no `AgentHandler` fulfills this role
//! (`tradeforge_agents::roles` defers it deliberately), so this binary
//! wires `tradeforge_sandbox::run_with_determinism_check` directly against
//! `TASK_DISPATCHED` events addressed to `AgentRole::Tester`, mirroring
//! `AgentWorker::process_one`'s idempotency check, dependency-artifact
//! collection, and publish sequence (`lib/agents/src/worker.rs`) but
//! swapping the handler invocation for a sandboxed test run.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tracing::warn;

use tradeforge_agents::{collect_dependency_artifacts, TaskLookup, CONTRACT_ARTIFACT_PREFIX};
use tradeforge_artifacts::{ArtifactError, ArtifactKind, ArtifactStore};
use tradeforge_bus::{AgentRole, BusError, Event, EventBus, EventPayload, EventType, FailureInfo, TestFailureKind};
use tradeforge_core::RetryPolicy;
use tradeforge_orchestrator::Contract;
use tradeforge_sandbox::{run_with_determinism_check, AcceptanceTest, CheckStep, SandboxConfig, SandboxError, SandboxRuntime, TestOutcome, TestRequest};

use crate::backend::{template_check_args, TEMPLATE_CHECK_PROGRAM};

/// Default consumer-group name the tester dispatch loop subscribes under.
pub const TESTER_GROUP: &str = "tester";

/// Default concurrent sandbox runs, matching §5's per-role pool size (the
/// tester has no `AgentHandler` to carry `DEFAULT_POOL_SIZE` for it).
pub const DEFAULT_TESTER_POOL_SIZE: usize = 4;

/// Builds the sandbox configuration paired with [`crate::backend::TemplateBackend`]'s
/// generated code: one check step running the materialized `strategy.py`
/// with `sh`, since the real language-aware test harness a generated
/// strategy would actually run under is an external collaborator this
/// repository doesn't ship (see `backend.rs`).
#[must_use]
pub fn default_sandbox_config(config: &crate::config::TradeforgeConfig) -> SandboxConfig {
    let check = CheckStep::new("run_strategy", TEMPLATE_CHECK_PROGRAM, template_check_args());
    let mut sandbox_config = SandboxConfig::new(vec![check]).with_memory_limit_bytes(config.sandbox_mem_limit).with_timeout(Duration::from_secs(config.sandbox_timeout_s));
    sandbox_config.cpu_limit_seconds = config.sandbox_cpu_limit;
    sandbox_config
}

#[derive(Debug)]
enum TesterError {
    Bus(BusError),
    Artifact(ArtifactError),
}

impl fmt::Display for TesterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bus(e) => write!(f, "{e}"),
            Self::Artifact(e) => write!(f, "{e}"),
        }
    }
}

impl From<BusError> for TesterError {
    fn from(e: BusError) -> Self {
        Self::Bus(e)
    }
}

impl From<ArtifactError> for TesterError {
    fn from(e: ArtifactError) -> Self {
        Self::Artifact(e)
    }
}

/// Drives the tester role's dispatch loop until the process exits.
///
/// # Errors
///
/// Returns a [`BusError`] if subscribing itself fails; per-delivery
/// failures are logged and do not terminate the loop, matching
/// [`tradeforge_agents::AgentWorker::run`]'s resilience contract.
pub async fn run<B>(bus: Arc<B>, artifacts: Arc<ArtifactStore>, lookup: Arc<dyn TaskLookup>, runtime: Arc<dyn SandboxRuntime>, config: SandboxConfig, group: &str, pool_size: usize) -> Result<(), BusError>
where
    B: EventBus + 'static,
{
    let mut subscription = bus.subscribe(&[EventType::TaskDispatched], group).await?;
    let semaphore = Arc::new(Semaphore::new(pool_size));

    loop {
        match subscription.next().await {
            Ok(Some(delivery)) => {
                let permit = Arc::clone(&semaphore).acquire_owned().await.expect("semaphore is never closed");
                let bus = Arc::clone(&bus);
                let artifacts = Arc::clone(&artifacts);
                let lookup = Arc::clone(&lookup);
                let runtime = Arc::clone(&runtime);
                let config = config.clone();
                let event = delivery.event;
                let ack_handle = delivery.ack_handle;
                tokio::spawn(async move {
                    if let Err(e) = process_one(bus.as_ref(), artifacts.as_ref(), lookup.as_ref(), runtime.as_ref(), &config, event).await {
                        warn!(error = %e, "tester dispatch iteration failed");
                    }
                    if let Err(e) = ack_handle.ack().await {
                        warn!(error = %e, "failed to ack tester delivery");
                    }
                    drop(permit);
                });
            }
            Ok(None) => tokio::time::sleep(Duration::from_millis(50)).await,
            Err(e) => {
                warn!(error = %e, "tester subscription poll failed");
                tokio::time::sleep(Duration::from_millis(200)).await;
            }
        }
    }
}

async fn process_one(bus: &dyn EventBus, artifacts: &ArtifactStore, lookup: &dyn TaskLookup, runtime: &dyn SandboxRuntime, config: &SandboxConfig, event: Event) -> Result<(), TesterError> {
    let EventPayload::TaskDispatched { task_id, agent_role, .. } = event.envelope.payload().clone() else {
        return Ok(());
    };
    if agent_role != AgentRole::Tester {
        return Ok(());
    }
    let workflow_id = event.workflow_id;

    let already_completed = bus
        .replay(workflow_id, None)
        .await?
        .iter()
        .any(|e| matches!(e.envelope.payload(), EventPayload::TaskCompleted { task_id: t, .. } if *t == task_id));
    if already_completed {
        return Ok(());
    }

    let Some(task) = lookup.lookup(workflow_id, task_id).await else {
        warn!(%task_id, "no task found for dispatched tester event, dropping");
        return Ok(());
    };

    let dependency_artifacts = collect_dependency_artifacts(artifacts, workflow_id, &task)?;
    let contract = dependency_artifacts
        .iter()
        .filter(|(a, _)| a.filename.starts_with(CONTRACT_ARTIFACT_PREFIX))
        .max_by_key(|(a, _)| a.created_at)
        .and_then(|(_, bytes)| serde_json::from_slice::<Contract>(bytes).ok());
    let code = dependency_artifacts.iter().filter(|(a, _)| a.kind == ArtifactKind::Code).max_by_key(|(a, _)| a.created_at);

    let started = Event::new(workflow_id, AgentRole::Tester, 1, EventPayload::TestStarted { task_id });
    bus.publish(started).await?;

    let Some((_, strategy_code)) = code else {
        return fail(bus, workflow_id, task_id, "missing_artifact", "no code artifact among the tester's dependency artifacts".to_string()).await;
    };

    let acceptance_tests = contract
        .as_ref()
        .map(|c| c.acceptance_tests.iter().map(|name| AcceptanceTest { name: name.clone(), description: name.clone() }).collect())
        .unwrap_or_default();
    let symbols = contract
        .as_ref()
        .map(|c| c.fixtures.iter().filter_map(|f| f.strip_suffix(".csv").map(str::to_string)).collect::<Vec<_>>())
        .filter(|symbols: &Vec<String>| !symbols.is_empty())
        .unwrap_or_else(|| vec!["SPY".to_string()]);

    let request = TestRequest { strategy_code: strategy_code.clone(), symbols, acceptance_tests };

    match run_with_retry(runtime, &request, config).await {
        Ok(TestOutcome::Passed { metrics, artifacts: collected }) => {
            let report_id = artifacts.put(workflow_id, task_id, "test_report.json", ArtifactKind::Report, &collected.test_report, vec![])?;
            let trades_id = artifacts.put(workflow_id, task_id, "trades.csv", ArtifactKind::Trades, &collected.trades_csv, vec![])?;
            let equity_id = artifacts.put(workflow_id, task_id, "equity_curve.csv", ArtifactKind::Equity, &collected.equity_curve_csv, vec![])?;
            let log_id = artifacts.put(workflow_id, task_id, "events.log", ArtifactKind::Log, &collected.events_log, vec![])?;
            let artifact_ids = vec![report_id, trades_id, equity_id, log_id];

            let passed_event = Event::new(workflow_id, AgentRole::Tester, 1, EventPayload::TestPassed { task_id, metrics, artifact_ids: artifact_ids.clone() });
            bus.publish(passed_event).await?;
            let completed = Event::new(workflow_id, AgentRole::Tester, 1, EventPayload::TaskCompleted { task_id, passed: true, artifact_ids, failure: None });
            bus.publish(completed).await?;
            Ok(())
        }
        Ok(TestOutcome::Failed { kind, workspace_snapshot_id, detail }) => {
            let test_failed = Event::new(workflow_id, AgentRole::Tester, 1, EventPayload::TestFailed { task_id, kind, workspace_snapshot_id });
            bus.publish(test_failed).await?;
            fail(bus, workflow_id, task_id, test_failure_kind_name(kind), detail).await
        }
        Err(infra_error) => {
            fail(bus, workflow_id, task_id, "sandbox_infra", format!("sandbox infrastructure unavailable after retry: {infra_error}")).await
        }
    }
}

async fn fail(bus: &dyn EventBus, workflow_id: tradeforge_core::WorkflowId, task_id: tradeforge_core::TaskId, kind: &str, message: String) -> Result<(), TesterError> {
    let failure = FailureInfo { kind: kind.to_string(), message, stack_excerpt: None };
    let completed = Event::new(workflow_id, AgentRole::Tester, 1, EventPayload::TaskCompleted { task_id, passed: false, artifact_ids: vec![], failure: Some(failure) });
    bus.publish(completed).await?;
    Ok(())
}

fn test_failure_kind_name(kind: TestFailureKind) -> &'static str {
    match kind {
        TestFailureKind::AssertionFailed => "assertion_failed",
        TestFailureKind::TypeCheckFailed => "type_check_failed",
        TestFailureKind::StyleCheckFailed => "style_check_failed",
        TestFailureKind::SecurityScanFailed => "security_scan_failed",
        TestFailureKind::SecretDetected => "secret_detected",
        TestFailureKind::MissingArtifact => "missing_artifact",
        TestFailureKind::SchemaInvalid => "schema_invalid",
        TestFailureKind::NonDeterministic => "non_deterministic",
    }
}

/// Retries `SandboxError::Infra`/`Timeout` per `RetryPolicy::sandbox_infra()`
/// before surfacing the error to the caller, which maps it onto a failed
/// `TaskCompleted` rather than crashing the dispatch loop (§4.4's
/// `TesterUnavailable` condition becomes a task failure here, so the
/// orchestrator's existing retry/branch machinery handles it uniformly
/// with any other test failure).
async fn run_with_retry(runtime: &dyn SandboxRuntime, request: &TestRequest, config: &SandboxConfig) -> Result<TestOutcome, SandboxError> {
    let policy = RetryPolicy::sandbox_infra();
    let mut attempt = 0;
    loop {
        match run_with_determinism_check(runtime, request, config).await {
            Ok(outcome) => return Ok(outcome),
            Err(_) if policy.allows_attempt(attempt + 1) => {
                attempt += 1;
                tokio::time::sleep(policy.backoff_for_attempt(attempt)).await;
            }
            Err(e) => return Err(e),
        }
    }
}
