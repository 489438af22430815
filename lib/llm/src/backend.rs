//! LLM backend abstraction: the provider-facing trait the Router dispatches
//! to once a key has been selected.
//!
//! Ported near-verbatim from the source's `lib/ai/src/backend.rs`; the
//! Router wraps a `HashMap<LlmProvider, Arc<dyn LlmBackend>>` of these,
//! selecting by the `provider` of whichever key `select_key` returned.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;

use crate::error::LlmError;

/// Available LLM providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmProvider {
    Anthropic,
    OpenAi,
    OpenAiCompatible,
    Ollama,
}

/// A request to an LLM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmRequest {
    pub prompt: String,
    pub system: Option<String>,
    pub context: Vec<LlmMessage>,
    pub output_schema: Option<JsonValue>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    /// The router's estimate of total tokens this request will consume,
    /// used for the TPM capacity check in key selection step 4.
    pub estimated_tokens: u32,
}

impl LlmRequest {
    #[must_use]
    pub fn new(prompt: impl Into<String>, estimated_tokens: u32) -> Self {
        Self {
            prompt: prompt.into(),
            system: None,
            context: Vec::new(),
            output_schema: None,
            temperature: None,
            max_tokens: None,
            estimated_tokens,
        }
    }

    #[must_use]
    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    #[must_use]
    pub fn with_output_schema(mut self, schema: JsonValue) -> Self {
        self.output_schema = Some(schema);
        self
    }

    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

/// A message in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmMessage {
    pub role: MessageRole,
    pub content: String,
}

/// The role of a message sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

/// A response from an LLM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmResponse {
    pub content: String,
    pub structured_output: Option<JsonValue>,
    pub usage: TokenUsage,
    pub model: String,
}

/// Token usage statistics.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl TokenUsage {
    #[must_use]
    pub const fn total(&self) -> u32 {
        self.input_tokens + self.output_tokens
    }
}

/// A single provider/model backend.
///
/// Implementations live outside the core (the LLM provider SDK is a
/// contract-only external collaborator per the system's scope); this crate
/// ships no real backend, only the trait and a `MockBackend` for tests.
#[async_trait]
pub trait LlmBackend: Send + Sync {
    /// Generates a response for the given request.
    ///
    /// # Errors
    ///
    /// Returns [`LlmError::RateLimited`] on a provider 429, [`LlmError::SafetyBlocked`]
    /// on a provider safety-filter rejection, or other variants for transient
    /// and fatal failures.
    async fn generate(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError>;

    fn provider(&self) -> LlmProvider;

    fn model(&self) -> &str;
}

/// A registry of backends keyed by provider, used by the Router to dispatch
/// once a key (and therefore a provider) has been selected.
#[derive(Default)]
pub struct BackendRegistry {
    backends: HashMap<LlmProvider, std::sync::Arc<dyn LlmBackend>>,
}

impl BackendRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            backends: HashMap::new(),
        }
    }

    pub fn register(&mut self, backend: std::sync::Arc<dyn LlmBackend>) {
        self.backends.insert(backend.provider(), backend);
    }

    #[must_use]
    pub fn get(&self, provider: LlmProvider) -> Option<std::sync::Arc<dyn LlmBackend>> {
        self.backends.get(&provider).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn llm_request_builder() {
        let request = LlmRequest::new("hello", 128)
            .with_system("be concise")
            .with_temperature(0.2);
        assert_eq!(request.prompt, "hello");
        assert_eq!(request.estimated_tokens, 128);
        assert_eq!(request.system, Some("be concise".to_string()));
    }

    #[test]
    fn token_usage_total() {
        let usage = TokenUsage {
            input_tokens: 100,
            output_tokens: 50,
        };
        assert_eq!(usage.total(), 150);
    }
}
