//! Agent framework (C6) and planner/architect/coder/debugger role adapters
//! (C9).
//!
//! Generalizes the source's `Worker<O: ObjectStore, E: NodeExecutor>`
//! (`lib/workflow/src/worker.rs`) from a single-node object-store pipeline to
//! a per-role, event-driven worker pool over `tradeforge-bus` and
//! `tradeforge-artifacts`. The tester role (§4.9) has no adapter in this
//! crate: it is fulfilled directly by `tradeforge_sandbox::run_with_determinism_check`.

pub mod error;
pub mod handler;
pub mod lookup;
pub mod roles;
pub mod worker;

pub use error::AgentError;
pub use handler::{collect_dependency_artifacts, AgentContext, AgentHandler, AgentOutput};
pub use lookup::{OrchestratorTaskLookup, TaskLookup};
pub use roles::{Architect, Coder, Debugger, Planner, CONTRACT_ARTIFACT_PREFIX};
pub use worker::{AgentWorker, DEFAULT_HANDLER_TIMEOUT, DEFAULT_POOL_SIZE};
