//! The planner adapter: turns a user's free-text strategy request (carried
//! as the root task's `description`) into a `TodoList`.

use async_trait::async_trait;
use serde_json::json;
use tradeforge_artifacts::ArtifactKind;
use tradeforge_bus::AgentRole;
use tradeforge_llm::{InMemoryRateStore, RateStore, Router, WorkloadTag};

use crate::error::AgentError;
use crate::handler::{AgentContext, AgentHandler, AgentOutput};

/// Plans a workflow's `TodoList` from the originating request.
pub struct Planner<S: RateStore = InMemoryRateStore> {
    router: std::sync::Arc<Router<S>>,
}

impl<S: RateStore> Planner<S> {
    #[must_use]
    pub fn new(router: std::sync::Arc<Router<S>>) -> Self {
        Self { router }
    }
}

#[async_trait]
impl<S: RateStore + Send + Sync> AgentHandler for Planner<S> {
    fn role(&self) -> AgentRole {
        AgentRole::Planner
    }

    async fn handle(&self, ctx: &AgentContext) -> Result<AgentOutput, AgentError> {
        let schema = json!({
            "type": "object",
            "required": ["items"],
            "properties": {
                "items": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "required": ["title", "agent_role"],
                    }
                }
            }
        });
        let prompt = format!("Decompose the following trading strategy request into an ordered, dependency-aware task list:\n\n{}", ctx.task.description);
        let request = tradeforge_llm::LlmRequest::new(prompt, 2048)
            .with_system("You are the planning stage of an automated trading-strategy build pipeline. Respond with a structured task breakdown only.")
            .with_output_schema(schema);

        let outcome = self.router.call(request, Some(WorkloadTag::Medium), None).await?;

        let body = outcome.response.structured_output.unwrap_or_else(|| json!({ "raw": outcome.response.content }));
        let bytes = serde_json::to_vec_pretty(&body).map_err(|e| AgentError::Validation { reason: e.to_string() })?;

        Ok(AgentOutput::artifact(format!("plan_{}.json", ctx.task.id), ArtifactKind::Report, bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::AgentContext;
    use std::collections::HashSet;
    use tradeforge_llm::{BackendRegistry, KeyMetadata, LlmBackend, LlmError, LlmProvider, LlmRequest, LlmResponse, TokenUsage};
    use tradeforge_core::{KeyId, WorkflowId};
    use tradeforge_orchestrator::{AcceptanceCriteria, Task};

    struct StubBackend;

    #[async_trait]
    impl LlmBackend for StubBackend {
        async fn generate(&self, _request: &LlmRequest) -> Result<LlmResponse, LlmError> {
            Ok(LlmResponse {
                content: "plan".to_string(),
                structured_output: Some(json!({"items": [{"title": "write strategy", "agent_role": "coder"}]})),
                usage: TokenUsage { input_tokens: 10, output_tokens: 10 },
                model: "test".to_string(),
            })
        }

        fn provider(&self) -> LlmProvider {
            LlmProvider::Anthropic
        }

        fn model(&self) -> &str {
            "test"
        }
    }

    fn router() -> std::sync::Arc<Router<tradeforge_llm::InMemoryRateStore>> {
        let key = KeyMetadata::new(KeyId::new(), LlmProvider::Anthropic, "test");
        let mut registry = BackendRegistry::new();
        registry.register(std::sync::Arc::new(StubBackend));
        std::sync::Arc::new(Router::new(vec![key], tradeforge_llm::InMemoryRateStore::new(), registry, 3))
    }

    #[tokio::test]
    async fn planner_writes_structured_plan_artifact() {
        let planner = Planner::new(router());
        let task = Task::new("plan strategy", "build a momentum strategy on SPY", AgentRole::Planner, 0, HashSet::new(), AcceptanceCriteria { tests: vec![], schema: None });
        let ctx = AgentContext { workflow_id: WorkflowId::new(), task, dependency_artifacts: vec![] };

        let output = planner.handle(&ctx).await.unwrap();
        let AgentOutput::Artifact { bytes, kind, .. } = output;
        assert_eq!(kind, ArtifactKind::Report);
        let parsed: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert!(parsed["items"].is_array());
    }
}
