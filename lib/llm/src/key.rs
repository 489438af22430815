//! `KeyMetadata`: an LLM API key descriptor, and the per-key state machine
//! `{available -> in_use -> (available | cooling_down) -> available}`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tradeforge_core::KeyId;

use crate::backend::LlmProvider;

/// Workload weight hint, also doubling as the model-tier escalation
/// vocabulary: a safety-filter retry escalates to the next tag up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkloadTag {
    Light,
    Medium,
    Heavy,
}

impl WorkloadTag {
    /// The next heavier tier, or `None` if already at `Heavy` (escalation
    /// exhausted).
    #[must_use]
    pub const fn escalate(self) -> Option<Self> {
        match self {
            Self::Light => Some(Self::Medium),
            Self::Medium => Some(Self::Heavy),
            Self::Heavy => None,
        }
    }
}

/// A key's observable lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyState {
    Available,
    InUse,
    CoolingDown,
}

/// Descriptor for one LLM API key, loaded from the `keys.json` manifest at
/// startup with the secret value resolved separately (never stored here).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyMetadata {
    pub key_id: KeyId,
    pub provider: LlmProvider,
    pub model_name: String,
    /// Requests-per-minute budget.
    pub rpm: u32,
    /// Tokens-per-minute budget.
    pub tpm: u32,
    /// Requests-per-day budget.
    pub rpd: u32,
    pub workload: WorkloadTag,
    /// Higher sorts first when multiple keys are otherwise equally eligible;
    /// does not override the random-shuffle spread-load step.
    pub priority: i32,
    pub active: bool,
    pub success_count: u64,
    pub error_count: u64,
    pub last_used: Option<DateTime<Utc>>,
    pub cooldown_until: Option<DateTime<Utc>>,
    /// Consecutive provider rate-limit errors, reset to 0 on any success;
    /// drives the `30s * 2^n` cooldown growth.
    pub consecutive_errors: u32,
}

impl KeyMetadata {
    #[must_use]
    pub fn new(key_id: KeyId, provider: LlmProvider, model_name: impl Into<String>) -> Self {
        Self {
            key_id,
            provider,
            model_name: model_name.into(),
            rpm: 60,
            tpm: 100_000,
            rpd: 10_000,
            workload: WorkloadTag::Medium,
            priority: 0,
            active: true,
            success_count: 0,
            error_count: 0,
            last_used: None,
            cooldown_until: None,
            consecutive_errors: 0,
        }
    }

    /// Whether this key is currently past its cooldown and carries traffic.
    #[must_use]
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        self.active && self.cooldown_until.is_none_or(|until| until <= now)
    }

    #[must_use]
    pub fn state(&self, now: DateTime<Utc>) -> KeyState {
        if !self.active {
            return KeyState::CoolingDown;
        }
        match self.cooldown_until {
            Some(until) if until > now => KeyState::CoolingDown,
            _ => KeyState::Available,
        }
    }

    /// Records a successful call: resets the error streak and bumps
    /// `success_count` by exactly one.
    pub fn record_success(&mut self, now: DateTime<Utc>) {
        self.success_count += 1;
        self.consecutive_errors = 0;
        self.last_used = Some(now);
    }

    /// Records a provider 429 / rate-limit signal: sets `cooldown_until =
    /// now + min(30s * 2^consecutive_errors, 300s)`.
    pub fn record_rate_limited(&mut self, now: DateTime<Utc>) {
        self.error_count += 1;
        self.consecutive_errors += 1;
        let backoff_secs = 30u64.saturating_mul(1u64 << self.consecutive_errors.min(32));
        let capped_secs = backoff_secs.min(300);
        self.cooldown_until = Some(now + chrono::Duration::seconds(i64::try_from(capped_secs).unwrap_or(300)));
        self.last_used = Some(now);
    }

    /// Records a generic error that does not itself trigger a cooldown
    /// (transient network, safety block) but still counts toward health.
    pub fn record_error(&mut self, now: DateTime<Utc>) {
        self.error_count += 1;
        self.last_used = Some(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> KeyMetadata {
        KeyMetadata::new(KeyId::new(), LlmProvider::Anthropic, "claude")
    }

    #[test]
    fn workload_escalation_chain() {
        assert_eq!(WorkloadTag::Light.escalate(), Some(WorkloadTag::Medium));
        assert_eq!(WorkloadTag::Medium.escalate(), Some(WorkloadTag::Heavy));
        assert_eq!(WorkloadTag::Heavy.escalate(), None);
    }

    #[test]
    fn cooldown_grows_exponentially_and_caps_at_300s() {
        let mut k = key();
        let now = Utc::now();
        k.record_rate_limited(now);
        let first = k.cooldown_until.unwrap();
        assert!((first - now).num_seconds() >= 60);

        for _ in 0..10 {
            k.record_rate_limited(now);
        }
        let capped = k.cooldown_until.unwrap();
        assert_eq!((capped - now).num_seconds(), 300);
    }

    #[test]
    fn success_resets_consecutive_errors() {
        let mut k = key();
        let now = Utc::now();
        k.record_rate_limited(now);
        assert_eq!(k.consecutive_errors, 1);
        k.record_success(now);
        assert_eq!(k.consecutive_errors, 0);
        assert_eq!(k.success_count, 1);
    }

    #[test]
    fn eligibility_respects_active_and_cooldown() {
        let mut k = key();
        let now = Utc::now();
        assert!(k.is_eligible(now));

        k.active = false;
        assert!(!k.is_eligible(now));
        k.active = true;

        k.cooldown_until = Some(now + chrono::Duration::seconds(30));
        assert!(!k.is_eligible(now));
        assert!(k.is_eligible(now + chrono::Duration::seconds(31)));
    }
}
