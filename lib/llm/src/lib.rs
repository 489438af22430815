//! The multi-key LLM Request Router (C2): key selection, rate limiting,
//! cooldown/backoff, model-tier fallback, and safety-filter retry.
//!
//! Grounded in the source's `lib/ai/src/backend.rs` (`LlmBackend` trait,
//! reused near-verbatim) and `lib/integration/src/rate_limit.rs` (the
//! sliding-window `RateLimiter`, generalized into three simultaneous
//! windows per key).

pub mod backend;
pub mod error;
pub mod key;
pub mod manifest;
pub mod rate;
pub mod router;

pub use backend::{BackendRegistry, LlmBackend, LlmMessage, LlmProvider, LlmRequest, LlmResponse, MessageRole, TokenUsage};
pub use error::{LlmError, ManifestError, RouterError};
pub use key::{KeyMetadata, KeyState, WorkloadTag};
pub use manifest::{load_manifest, EnvSecretStore, KeysManifest, SecretStore, SecretStoreKind, StaticSecretStore};
pub use rate::{check_capacity, InMemoryRateStore, RateStore, WindowKind};
pub use router::{CallObservation, CallOutcome, CallOutcomeKind, KeyHealth, Router};
