//! Thin, contract-only `AgentHandler` implementations for the four
//! LLM-backed roles (§4.9). The tester role has no adapter here: it is
//! fulfilled directly by `tradeforge_sandbox::run_with_determinism_check`,
//! invoked by the binary's dispatch wiring rather than through an
//! `AgentHandler`.
//!
//! Per the distilled spec's explicit scope exclusion, prompt *content* is
//! not specified; each adapter builds a structural `LlmRequest` (task
//! title/description plus upstream artifacts as context) via the pattern
//! the source's `LlmCall`/`LlmCallConfig` builder
//! (`lib/ai/src/llm_call.rs`) establishes, then maps the router's response
//! into the role's output artifact.

pub mod architect;
pub mod coder;
pub mod debugger;
pub mod planner;

pub use architect::Architect;
pub use coder::Coder;
pub use debugger::Debugger;
pub use planner::Planner;

/// Filename prefix an architect's contract artifact is written with, and
/// that downstream coder/debugger handlers look for among their dependency
/// artifacts (the event schema carries no dedicated `contract_id` slot).
pub const CONTRACT_ARTIFACT_PREFIX: &str = "contract_";
