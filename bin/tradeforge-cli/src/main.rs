//! `tradeforge`: submits a natural-language trading-strategy request and
//! drives it through the orchestrator, agent workers, and sandboxed tester
//! to a versioned artifact (§6 "CLI surface").
//!
//! `submit` and `execute` are deliberately separate invocations (a workflow
//! can be submitted from one process and executed, resumed, or aborted from
//! another); [`state`] is what carries `WorkflowState` across that process
//! boundary.

mod backend;
mod config;
mod error;
mod planning;
mod state;
mod tester_loop;
mod wiring;

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::Mutex;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use tradeforge_agents::{AgentWorker, Architect, Coder, Debugger, OrchestratorTaskLookup, Planner, TaskLookup, DEFAULT_POOL_SIZE};
use tradeforge_bus::EventType;
use tradeforge_core::WorkflowId;
use tradeforge_orchestrator::{Orchestrator, TaskGraph, WorkflowState, WorkflowStatus};
use tradeforge_sandbox::ProcessSandboxRuntime;

use crate::config::TradeforgeConfig;
use crate::error::CliError;

#[derive(Parser)]
#[command(name = "tradeforge", version, about = "Turns a natural-language trading-strategy request into a versioned, tested artifact")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Submits a strategy request and prints the new workflow id.
    Submit {
        /// The free-text strategy request, e.g. "RSI strategy buy<30 sell>70".
        request: String,
    },
    /// Prints a workflow's current status.
    Status {
        /// Workflow id, as printed by `submit`.
        workflow_id: String,
        /// Prints the machine-readable `WorkflowState` JSON instead.
        #[arg(long)]
        json: bool,
    },
    /// Enumerates known workflows, most recently started first.
    List {
        /// Prints the machine-readable `WorkflowState` JSON array instead.
        #[arg(long)]
        json: bool,
    },
    /// Requests cooperative cancellation of a running workflow.
    Abort {
        /// Workflow id, as printed by `submit`.
        workflow_id: String,
    },
    /// Runs the dispatch loop for a submitted workflow until it reaches a terminal status.
    Execute {
        /// Workflow id, as printed by `submit`.
        workflow_id: String,
    },
    /// Prints a shell completion script for the given shell.
    Completions {
        shell: Shell,
    },
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn parse_workflow_id(raw: &str) -> Result<WorkflowId, CliError> {
    raw.parse().map_err(|e: tradeforge_core::ParseIdError| CliError::Validation(e.to_string()))
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    match run(cli.command).await {
        Ok(code) => ExitCode::from(code as u8),
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::from(e.exit_code() as u8)
        }
    }
}

async fn run(command: Command) -> Result<i32, CliError> {
    if let Command::Completions { shell } = command {
        clap_complete::generate(shell, &mut Cli::command(), "tradeforge", &mut std::io::stdout());
        return Ok(0);
    }

    let config = TradeforgeConfig::from_env()?;
    match command {
        Command::Submit { request } => cmd_submit(&config, &request).await,
        Command::Status { workflow_id, json } => cmd_status(&config, &workflow_id, json),
        Command::List { json } => cmd_list(&config, json),
        Command::Abort { workflow_id } => cmd_abort(&config, &workflow_id),
        Command::Execute { workflow_id } => cmd_execute(&config, &workflow_id).await,
        Command::Completions { .. } => unreachable!("handled above"),
    }
}

/// `submit "<request>"` (§6): plans the initial `TodoList` and persists a
/// fresh, not-yet-dispatched `WorkflowState`. Dispatch itself only happens
/// under `execute`.
async fn cmd_submit(config: &TradeforgeConfig, request: &str) -> Result<i32, CliError> {
    if request.trim().is_empty() {
        return Err(CliError::Validation("request must not be empty".to_string()));
    }

    let router = wiring::build_router(config)?;
    let workflow_id = WorkflowId::new();
    let todo_list = planning::plan(router, workflow_id, request).await;

    if TaskGraph::from_todo_list(&todo_list).is_none() {
        return Err(CliError::Validation(format!("plan for workflow {workflow_id} contains a dependency cycle")));
    }

    let branch_name = format!("ai/generated/{workflow_id}");
    let workflow_state = WorkflowState::new(todo_list, branch_name);
    state::save(&config.workspace_root, &workflow_state)?;

    println!("{workflow_id}");
    Ok(0)
}

/// `status <workflow_id>` (§6): exit 0 if the workflow is known, 1 if not.
fn cmd_status(config: &TradeforgeConfig, workflow_id: &str, json: bool) -> Result<i32, CliError> {
    let workflow_id = parse_workflow_id(workflow_id)?;
    match state::load(&config.workspace_root, workflow_id) {
        Ok(workflow_state) => {
            if json {
                println!("{}", serde_json::to_string_pretty(&workflow_state)?);
            } else {
                print_workflow_state(&workflow_state);
            }
            Ok(0)
        }
        Err(CliError::UnknownWorkflow(id)) => {
            if json {
                println!("{}", serde_json::json!({"error": "unknown_workflow", "workflow_id": id}));
            } else {
                println!("unknown workflow: {id}");
            }
            Ok(1)
        }
        Err(e) => Err(e),
    }
}

/// `list` (§6): enumerates every workflow with persisted state.
fn cmd_list(config: &TradeforgeConfig, json: bool) -> Result<i32, CliError> {
    let states = state::list(&config.workspace_root)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&states)?);
        return Ok(0);
    }

    if states.is_empty() {
        println!("no workflows");
        return Ok(0);
    }

    for workflow_state in states {
        let passed = workflow_state.todo_list.items.iter().filter(|t| t.status == tradeforge_orchestrator::TaskStatus::Passed).count();
        println!(
            "{}  {:<10}  {:<40}  {}/{} tasks passed",
            workflow_state.workflow_id,
            status_label(workflow_state.status),
            workflow_state.todo_list.workflow_name,
            passed,
            workflow_state.todo_list.items.len(),
        );
    }
    Ok(0)
}

/// `abort <workflow_id>` (§6): exit 0 on accepted abort.
fn cmd_abort(config: &TradeforgeConfig, workflow_id: &str) -> Result<i32, CliError> {
    let workflow_id = parse_workflow_id(workflow_id)?;
    let aborted = state::request_abort(&config.workspace_root, workflow_id)?;
    let cancelled = aborted.todo_list.items.iter().filter(|t| t.status == tradeforge_orchestrator::TaskStatus::Cancelled).count();
    println!("workflow {workflow_id} aborted ({cancelled} task(s) cancelled)");
    Ok(0)
}

/// `execute <workflow_id>` (§6): runs the dispatch loop until the workflow
/// reaches a terminal status, wiring the orchestrator, one worker pool per
/// LLM-backed role (§4.9), and the tester's dispatch loop (§4.4) over a
/// shared bus and artifact store.
async fn cmd_execute(config: &TradeforgeConfig, workflow_id: &str) -> Result<i32, CliError> {
    let workflow_id = parse_workflow_id(workflow_id)?;
    let persisted = state::load(&config.workspace_root, workflow_id)?;
    if persisted.status.is_terminal() {
        print_workflow_state(&persisted);
        return Ok(terminal_exit_code(persisted.status));
    }

    let bus = wiring::build_bus(config).await?;
    let artifacts = wiring::build_artifact_store(config)?;
    let router = wiring::build_router(config)?;

    let orchestrator = Orchestrator::start(Arc::clone(&bus), Arc::clone(&artifacts), persisted.todo_list.clone()).await?;
    state::save(&config.workspace_root, orchestrator.state())?;
    let orchestrator = Arc::new(Mutex::new(orchestrator));
    let task_lookup: Arc<OrchestratorTaskLookup<wiring::AnyBus>> = Arc::new(OrchestratorTaskLookup::new(Arc::clone(&orchestrator)));

    spawn_role_worker(Arc::clone(&bus), Arc::clone(&artifacts), Arc::clone(&task_lookup), Planner::new(Arc::clone(&router)), "planner");
    spawn_role_worker(Arc::clone(&bus), Arc::clone(&artifacts), Arc::clone(&task_lookup), Architect::new(Arc::clone(&router)), "architect");
    spawn_role_worker(Arc::clone(&bus), Arc::clone(&artifacts), Arc::clone(&task_lookup), Coder::new(Arc::clone(&router)), "coder");
    spawn_role_worker(Arc::clone(&bus), Arc::clone(&artifacts), Arc::clone(&task_lookup), Debugger::new(Arc::clone(&router)), "debugger");

    let tester_runtime = Arc::new(ProcessSandboxRuntime::new());
    let tester_sandbox_config = tester_loop::default_sandbox_config(config);
    {
        let bus = Arc::clone(&bus);
        let artifacts = Arc::clone(&artifacts);
        let lookup: Arc<dyn TaskLookup> = Arc::clone(&task_lookup) as Arc<dyn TaskLookup>;
        tokio::spawn(async move {
            if let Err(e) = tester_loop::run(bus, artifacts, lookup, tester_runtime, tester_sandbox_config, tester_loop::TESTER_GROUP, tester_loop::DEFAULT_TESTER_POOL_SIZE).await {
                tracing::warn!(error = %e, "tester dispatch loop exited");
            }
        });
    }

    let mut subscription = bus.subscribe(&[EventType::TaskCompleted, EventType::TestFailed, EventType::BranchTodoRequest], "orchestrator").await?;

    let progress = ProgressBar::new_spinner();
    progress.set_style(ProgressStyle::default_spinner().template("{spinner} {msg}").unwrap_or_else(|_| ProgressStyle::default_spinner()));
    progress.enable_steady_tick(Duration::from_millis(120));

    loop {
        {
            let guard = orchestrator.lock().await;
            update_progress(&progress, guard.state());
            if guard.state().status.is_terminal() {
                break;
            }
        }

        if state::consume_abort_marker(&config.workspace_root, workflow_id) {
            info!(%workflow_id, "abort requested, cancelling non-terminal tasks");
            orchestrator.lock().await.abort().await?;
            break;
        }

        match subscription.next().await {
            Ok(Some(delivery)) => {
                orchestrator.lock().await.handle_event(delivery.event).await?;
                delivery.ack_handle.ack().await?;
                state::save(&config.workspace_root, orchestrator.lock().await.state())?;
            }
            Ok(None) => tokio::time::sleep(Duration::from_millis(50)).await,
            Err(e) => return Err(e.into()),
        }
    }

    let final_state = orchestrator.lock().await.state().clone();
    progress.finish_and_clear();
    state::save(&config.workspace_root, &final_state)?;
    print_workflow_state(&final_state);
    Ok(terminal_exit_code(final_state.status))
}

fn spawn_role_worker<H, L>(bus: Arc<wiring::AnyBus>, artifacts: Arc<tradeforge_artifacts::ArtifactStore>, lookup: Arc<L>, handler: H, group: &'static str)
where
    H: tradeforge_agents::AgentHandler + 'static,
    L: TaskLookup + 'static,
{
    let worker = AgentWorker::new(bus, artifacts, lookup, Arc::new(handler));
    tokio::spawn(async move {
        if let Err(e) = worker.run(group, DEFAULT_POOL_SIZE).await {
            tracing::warn!(error = %e, group, "agent worker dispatch loop exited");
        }
    });
}

/// Renders the spinner message `execute` shows while the dispatch loop runs:
/// how many of the plan's tasks have passed so far.
fn update_progress(progress: &ProgressBar, workflow_state: &WorkflowState) {
    let passed = workflow_state.todo_list.items.iter().filter(|t| t.status == tradeforge_orchestrator::TaskStatus::Passed).count();
    let total = workflow_state.todo_list.items.len();
    progress.set_message(format!("{} [{}]  {}/{} tasks passed", workflow_state.workflow_id, status_label(workflow_state.status), passed, total));
}

fn terminal_exit_code(status: WorkflowStatus) -> i32 {
    match status {
        WorkflowStatus::Succeeded | WorkflowStatus::Running => 0,
        WorkflowStatus::Failed | WorkflowStatus::Aborted => 1,
    }
}

fn status_label(status: WorkflowStatus) -> &'static str {
    match status {
        WorkflowStatus::Running => "running",
        WorkflowStatus::Succeeded => "succeeded",
        WorkflowStatus::Failed => "failed",
        WorkflowStatus::Aborted => "aborted",
    }
}

/// Prints the workflow summary `status`/`execute` share: overall status,
/// per-task status/attempts, and — on failure — the tail of the
/// failure-event chain for whichever task is still blocked (§7
/// "user-visible behavior").
fn print_workflow_state(workflow_state: &WorkflowState) {
    println!("workflow {}  [{}]  {}", workflow_state.workflow_id, status_label(workflow_state.status), workflow_state.todo_list.workflow_name);
    println!("started_at: {}", workflow_state.started_at.to_rfc3339());
    if let Some(ended_at) = workflow_state.ended_at {
        println!("ended_at:   {}", ended_at.to_rfc3339());
    }

    for task in &workflow_state.todo_list.items {
        let branch_marker = if task.branch_parent.is_some() { " (branch)" } else { "" };
        println!("  {}  {:<8}  attempts={}/{}  {}{}", task.id, format!("{:?}", task.status).to_lowercase(), task.attempts, task.max_attempts, task.title, branch_marker);
        if task.status == tradeforge_orchestrator::TaskStatus::Failed {
            if let Some(failure) = &task.last_failure {
                println!("      last_failure: [{}] {}", failure.kind, failure.message);
            }
            if let Some(kind) = task.last_test_failure {
                println!("      last_test_failure: {kind:?}");
            }
        }
    }
}
