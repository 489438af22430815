//! The coder adapter: turns an architect's `Contract` into a code artifact.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use tradeforge_artifacts::ArtifactKind;
use tradeforge_bus::AgentRole;
use tradeforge_llm::{InMemoryRateStore, RateStore, Router, WorkloadTag};
use tradeforge_orchestrator::Contract;

use crate::error::AgentError;
use crate::handler::{AgentContext, AgentHandler, AgentOutput};
use crate::roles::CONTRACT_ARTIFACT_PREFIX;

/// Produces the implementation the architect's contract calls for.
pub struct Coder<S: RateStore = InMemoryRateStore> {
    router: std::sync::Arc<Router<S>>,
}

impl<S: RateStore> Coder<S> {
    #[must_use]
    pub fn new(router: std::sync::Arc<Router<S>>) -> Self {
        Self { router }
    }
}

#[async_trait]
impl<S: RateStore + Send + Sync> AgentHandler for Coder<S> {
    fn role(&self) -> AgentRole {
        AgentRole::Coder
    }

    async fn handle(&self, ctx: &AgentContext) -> Result<AgentOutput, AgentError> {
        let Some((_, contract_bytes)) = ctx.dependency_artifact_with_prefix(CONTRACT_ARTIFACT_PREFIX) else {
            return Err(AgentError::Validation { reason: "coder task has no contract among its dependency artifacts".to_string() });
        };
        let contract: Contract = serde_json::from_slice(contract_bytes).map_err(|e| AgentError::Validation { reason: e.to_string() })?;

        let prompt = format!(
            "Implement the following contract as a single self-contained strategy module.\n\nTask: {}\n\nInterfaces:\n{}\n\nFixtures:\n{}\n\nAcceptance tests:\n{}",
            ctx.task.description,
            contract.interfaces.join("\n"),
            contract.fixtures.join("\n"),
            contract.acceptance_tests.join("\n"),
        );
        let request = tradeforge_llm::LlmRequest::new(prompt, 4096)
            .with_system("You are the coding stage of an automated trading-strategy build pipeline. Respond with source code only, no commentary.")
            .with_output_schema(json!({"type": "object", "required": ["source", "language"]}));

        let outcome = self.router.call(request, Some(WorkloadTag::Heavy), None).await?;
        let body = outcome.response.structured_output.unwrap_or_else(|| json!({"source": outcome.response.content, "language": "python"}));
        let source = body["source"].as_str().unwrap_or(&outcome.response.content).to_string();
        let language = body["language"].as_str().unwrap_or("py");

        let filename = tradeforge_naming::generate(Utc::now(), ctx.workflow_id, ctx.task.id, &ctx.task.title, ext_for(language));
        Ok(AgentOutput::artifact(filename, ArtifactKind::Code, source.into_bytes()))
    }
}

fn ext_for(language: &str) -> &str {
    match language {
        "rust" => "rs",
        "python" => "py",
        other => other,
    }
}
