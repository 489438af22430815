//! Error types for the LLM Router.

use std::fmt;
use std::time::Duration;

use tradeforge_core::KeyId;

/// Errors surfaced by an [`LlmBackend`](crate::backend::LlmBackend) call.
#[derive(Debug, Clone, PartialEq)]
pub enum LlmError {
    /// Provider returned a 429 / rate-limit signal.
    RateLimited { retry_after: Option<Duration> },
    /// Provider's safety filter rejected the request.
    SafetyBlocked { reason: String },
    /// Transient network or 5xx failure; eligible for same-key retry.
    Transient { reason: String },
    /// 4xx other than rate-limit/safety: caller bug, fail fast.
    BadRequest { reason: String },
    /// Provider unreachable entirely.
    ProviderUnavailable { provider: String, reason: String },
}

impl fmt::Display for LlmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RateLimited { retry_after } => match retry_after {
                Some(d) => write!(f, "rate limited, retry after {d:?}"),
                None => write!(f, "rate limited"),
            },
            Self::SafetyBlocked { reason } => write!(f, "safety filter blocked request: {reason}"),
            Self::Transient { reason } => write!(f, "transient LLM call failure: {reason}"),
            Self::BadRequest { reason } => write!(f, "invalid LLM request: {reason}"),
            Self::ProviderUnavailable { provider, reason } => {
                write!(f, "provider '{provider}' unavailable: {reason}")
            }
        }
    }
}

impl std::error::Error for LlmError {}

/// Errors surfaced by the Router itself, above individual backend calls.
#[derive(Debug, Clone, PartialEq)]
pub enum RouterError {
    /// No key satisfied the filters/capacity checks at any fallback tier.
    AllKeysExhausted { retry_after: Duration },
    /// A safety-filter block survived escalation to the heaviest tier.
    SafetyBlocked { reason: String },
    /// The underlying backend reported a caller bug (4xx, non-rate-limit).
    BadRequest { reason: String },
    /// `retry_after`-less exhaustion: every candidate key lacks the
    /// requested provider/model/workload entirely (misconfiguration, not
    /// transient capacity pressure).
    NoEligibleKey { reason: String },
}

impl fmt::Display for RouterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AllKeysExhausted { retry_after } => {
                write!(f, "all keys exhausted, retry after {retry_after:?}")
            }
            Self::SafetyBlocked { reason } => write!(f, "safety blocked: {reason}"),
            Self::BadRequest { reason } => write!(f, "bad request: {reason}"),
            Self::NoEligibleKey { reason } => write!(f, "no eligible key: {reason}"),
        }
    }
}

impl std::error::Error for RouterError {}

/// Errors from loading the `keys.json` manifest and resolving secrets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManifestError {
    /// The manifest file could not be read or parsed.
    LoadFailed { reason: String },
    /// A secret lookup failed for a reason other than "not present"
    /// (malformed vault response, etc). Missing-secret is not an error here:
    /// per the external-interfaces contract it disables the key with a
    /// warning, never a crash.
    SecretStoreFailure { key_id: KeyId, reason: String },
}

impl fmt::Display for ManifestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LoadFailed { reason } => write!(f, "failed to load keys manifest: {reason}"),
            Self::SecretStoreFailure { key_id, reason } => {
                write!(f, "secret store failure for key {key_id}: {reason}")
            }
        }
    }
}

impl std::error::Error for ManifestError {}
