//! The workflow orchestrator (C5): owns `WorkflowState`, drives
//! dependency-aware task dispatch, splices debugger branch todos on
//! failure, and promotes the workflow's artifact branch on success.
//!
//! Generalizes the source's `Orchestrator<E: EventStore>`
//! (`lib/workflow/src/orchestrator.rs`)
//! from a fixed DAG of workflow nodes to a runtime-mutable `TodoList` whose
//! `TaskGraph` can grow (branch insertion) and shrink (retryable failure)
//! during a single run.

pub mod dispatch;
pub mod error;
pub mod graph;
pub mod model;

pub use dispatch::Orchestrator;
pub use error::OrchestratorError;
pub use graph::TaskGraph;
pub use model::{AcceptanceCriteria, Contract, Task, TaskStatus, TodoList, WorkflowState, WorkflowStatus};
