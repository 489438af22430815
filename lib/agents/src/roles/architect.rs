//! The architect adapter: turns a planner's task description into a
//! `Contract` (interfaces, fixtures, acceptance tests), written as an
//! artifact the coder and debugger locate by filename prefix.

use async_trait::async_trait;
use serde_json::json;
use tradeforge_artifacts::ArtifactKind;
use tradeforge_bus::AgentRole;
use tradeforge_core::ContractId;
use tradeforge_llm::{InMemoryRateStore, RateStore, Router, WorkloadTag};
use tradeforge_orchestrator::Contract;

use crate::error::AgentError;
use crate::handler::{AgentContext, AgentHandler, AgentOutput};
use crate::roles::CONTRACT_ARTIFACT_PREFIX;

/// Produces the `Contract` a coder task must satisfy.
pub struct Architect<S: RateStore = InMemoryRateStore> {
    router: std::sync::Arc<Router<S>>,
}

impl<S: RateStore> Architect<S> {
    #[must_use]
    pub fn new(router: std::sync::Arc<Router<S>>) -> Self {
        Self { router }
    }
}

#[async_trait]
impl<S: RateStore + Send + Sync> AgentHandler for Architect<S> {
    fn role(&self) -> AgentRole {
        AgentRole::Architect
    }

    async fn handle(&self, ctx: &AgentContext) -> Result<AgentOutput, AgentError> {
        let schema = json!({
            "type": "object",
            "required": ["interfaces", "fixtures", "acceptance_tests"],
        });
        let prompt = format!("Design the interfaces, fixtures, and acceptance tests for:\n\n{}", ctx.task.description);
        let request = tradeforge_llm::LlmRequest::new(prompt, 2048)
            .with_system("You are the architecture stage of an automated trading-strategy build pipeline. Respond with interface/fixture/test definitions only.")
            .with_output_schema(schema);

        let outcome = self.router.call(request, Some(WorkloadTag::Medium), None).await?;
        let body = outcome.response.structured_output.unwrap_or_else(|| json!({"interfaces": [], "fixtures": [], "acceptance_tests": []}));

        let contract = Contract {
            contract_id: ContractId::new(),
            task_id: ctx.task.id,
            interfaces: as_string_list(&body["interfaces"]),
            fixtures: as_string_list(&body["fixtures"]),
            acceptance_tests: as_string_list(&body["acceptance_tests"]),
        };

        let bytes = serde_json::to_vec_pretty(&contract).map_err(|e| AgentError::Validation { reason: e.to_string() })?;
        Ok(AgentOutput::artifact(format!("{CONTRACT_ARTIFACT_PREFIX}{}.json", ctx.task.id), ArtifactKind::Report, bytes))
    }
}

fn as_string_list(value: &serde_json::Value) -> Vec<String> {
    value.as_array().map(|items| items.iter().filter_map(|v| v.as_str().map(str::to_string)).collect()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use tradeforge_core::{KeyId, WorkflowId};
    use tradeforge_llm::{BackendRegistry, KeyMetadata, LlmBackend, LlmError, LlmProvider, LlmRequest, LlmResponse, TokenUsage};
    use tradeforge_orchestrator::{AcceptanceCriteria, Task};

    struct StubBackend;

    #[async_trait]
    impl LlmBackend for StubBackend {
        async fn generate(&self, _request: &LlmRequest) -> Result<LlmResponse, LlmError> {
            Ok(LlmResponse {
                content: "contract".to_string(),
                structured_output: Some(json!({
                    "interfaces": ["fn generate_signals(ohlcv) -> Vec<Signal>"],
                    "fixtures": ["spy_1d.csv"],
                    "acceptance_tests": ["test_no_lookahead_bias"],
                })),
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

    #[tokio::test]
    async fn architect_writes_contract_artifact_with_expected_prefix() {
        let key = KeyMetadata::new(KeyId::new(), LlmProvider::Anthropic, "test");
        let mut registry = BackendRegistry::new();
        registry.register(std::sync::Arc::new(StubBackend));
        let router = std::sync::Arc::new(Router::new(vec![key], tradeforge_llm::InMemoryRateStore::new(), registry, 3));

        let architect = Architect::new(router);
        let task = Task::new("design interfaces", "momentum strategy contract", AgentRole::Architect, 0, HashSet::new(), AcceptanceCriteria { tests: vec![], schema: None });
        let task_id = task.id;
        let ctx = AgentContext { workflow_id: WorkflowId::new(), task, dependency_artifacts: vec![] };

        let output = architect.handle(&ctx).await.unwrap();
        let AgentOutput::Artifact { filename, bytes, .. } = output;
        assert_eq!(filename, format!("{CONTRACT_ARTIFACT_PREFIX}{task_id}.json"));

        let contract: Contract = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(contract.interfaces.len(), 1);
        assert_eq!(contract.task_id, task_id);
    }
}
