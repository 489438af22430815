//! The debugger adapter: given a failed coder task's contract, code, and
//! failure info, produces a replacement code artifact for the branch task
//! the orchestrator inserted (§4.5 step 4).
//!
//! Per the Open Question this repository resolved in DESIGN.md, a debugger's
//! output *replaces* the failing artifact rather than patching it in place:
//! the new `Artifact` records the failed code artifact as its
//! `parent_artifacts` lineage instead of mutating anything.

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

/// Produces a remediated implementation for a branch (debug) task.
pub struct Debugger<S: RateStore = InMemoryRateStore> {
    router: std::sync::Arc<Router<S>>,
}

impl<S: RateStore> Debugger<S> {
    #[must_use]
    pub fn new(router: std::sync::Arc<Router<S>>) -> Self {
        Self { router }
    }
}

#[async_trait]
impl<S: RateStore + Send + Sync> AgentHandler for Debugger<S> {
    fn role(&self) -> AgentRole {
        AgentRole::Debugger
    }

    async fn handle(&self, ctx: &AgentContext) -> Result<AgentOutput, AgentError> {
        let Some((_, contract_bytes)) = ctx.dependency_artifact_with_prefix(CONTRACT_ARTIFACT_PREFIX) else {
            return Err(AgentError::Validation { reason: "debug task has no contract among its dependency artifacts".to_string() });
        };
        let contract: Contract = serde_json::from_slice(contract_bytes).map_err(|e| AgentError::Validation { reason: e.to_string() })?;

        let failed_code = ctx
            .dependency_artifacts
            .iter()
            .filter(|(a, _)| a.kind == ArtifactKind::Code)
            .max_by_key(|(a, _)| a.created_at);
        let Some((_, failed_source)) = failed_code else {
            return Err(AgentError::Validation { reason: "debug task has no prior code artifact to remediate".to_string() });
        };
        let failure_note = ctx
            .task
            .last_test_failure
            .map(|kind| format!("{kind:?}"))
            .unwrap_or_else(|| ctx.task.description.clone());

        let prompt = format!(
            "The following implementation failed its acceptance tests ({failure_note}). Fix it while preserving the contract below.\n\nInterfaces:\n{}\n\nAcceptance tests:\n{}\n\nFailing source:\n{}",
            contract.interfaces.join("\n"),
            contract.acceptance_tests.join("\n"),
            String::from_utf8_lossy(failed_source),
        );
        let request = tradeforge_llm::LlmRequest::new(prompt, 4096)
            .with_system("You are the debugging stage of an automated trading-strategy build pipeline. Respond with corrected source code only, no commentary.")
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

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use tradeforge_core::{ArtifactId, ContractId, KeyId, WorkflowId};
    use tradeforge_llm::{BackendRegistry, KeyMetadata, LlmBackend, LlmError, LlmProvider, LlmRequest, LlmResponse, TokenUsage};
    use tradeforge_orchestrator::{AcceptanceCriteria, Task};

    struct StubBackend;

    #[async_trait]
    impl LlmBackend for StubBackend {
        async fn generate(&self, _request: &LlmRequest) -> Result<LlmResponse, LlmError> {
            Ok(LlmResponse {
                content: "def generate_signals(): return []".to_string(),
                structured_output: Some(json!({"source": "def generate_signals(): return []", "language": "python"})),
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
    async fn debugger_writes_replacement_artifact_for_branch_task() {
        let debugger = Debugger::new(router());
        let failed_task_id = tradeforge_core::TaskId::new();
        let workflow_id = WorkflowId::new();

        let contract = Contract {
            contract_id: ContractId::new(),
            task_id: failed_task_id,
            interfaces: vec!["fn generate_signals(ohlcv) -> Vec<Signal>".to_string()],
            fixtures: vec![],
            acceptance_tests: vec!["test_no_lookahead_bias".to_string()],
        };
        let contract_bytes = serde_json::to_vec(&contract).unwrap();
        let contract_artifact = tradeforge_artifacts::Artifact {
            artifact_id: ArtifactId::new(),
            workflow_id,
            task_id: failed_task_id,
            filename: format!("{CONTRACT_ARTIFACT_PREFIX}{failed_task_id}.json"),
            filepath: "contract.json".to_string(),
            content_hash: "deadbeef".to_string(),
            size: contract_bytes.len() as u64,
            created_at: Utc::now(),
            kind: ArtifactKind::Report,
            parent_artifacts: vec![],
        };

        let failed_source = b"def generate_signals(): raise NotImplementedError".to_vec();
        let failed_code_artifact = tradeforge_artifacts::Artifact {
            artifact_id: ArtifactId::new(),
            workflow_id,
            task_id: failed_task_id,
            filename: "broken.py".to_string(),
            filepath: "broken.py".to_string(),
            content_hash: "beadfeed".to_string(),
            size: failed_source.len() as u64,
            created_at: Utc::now(),
            kind: ArtifactKind::Code,
            parent_artifacts: vec![],
        };

        let branch_task = Task::branch_for(
            &Task::new("implement strategy", "implement the momentum strategy", AgentRole::Coder, 0, HashSet::new(), AcceptanceCriteria { tests: vec![], schema: None }),
            "acceptance test test_no_lookahead_bias failed",
            1,
        );
        let ctx = AgentContext {
            workflow_id,
            task: branch_task,
            dependency_artifacts: vec![(contract_artifact, contract_bytes), (failed_code_artifact, failed_source)],
        };

        let output = debugger.handle(&ctx).await.unwrap();
        let AgentOutput::Artifact { kind, bytes, .. } = output;
        assert_eq!(kind, ArtifactKind::Code);
        assert!(!bytes.is_empty());
    }

    #[tokio::test]
    async fn debugger_without_prior_code_artifact_is_a_validation_error() {
        let debugger = Debugger::new(router());
        let workflow_id = WorkflowId::new();
        let failed_task_id = tradeforge_core::TaskId::new();

        let contract = Contract {
            contract_id: ContractId::new(),
            task_id: failed_task_id,
            interfaces: vec![],
            fixtures: vec![],
            acceptance_tests: vec![],
        };
        let contract_bytes = serde_json::to_vec(&contract).unwrap();
        let contract_artifact = tradeforge_artifacts::Artifact {
            artifact_id: ArtifactId::new(),
            workflow_id,
            task_id: failed_task_id,
            filename: format!("{CONTRACT_ARTIFACT_PREFIX}{failed_task_id}.json"),
            filepath: "contract.json".to_string(),
            content_hash: "deadbeef".to_string(),
            size: contract_bytes.len() as u64,
            created_at: Utc::now(),
            kind: ArtifactKind::Report,
            parent_artifacts: vec![],
        };

        let branch_task = Task::branch_for(
            &Task::new("implement strategy", "implement the momentum strategy", AgentRole::Coder, 0, HashSet::new(), AcceptanceCriteria { tests: vec![], schema: None }),
            "acceptance test failed",
            1,
        );
        let ctx = AgentContext { workflow_id, task: branch_task, dependency_artifacts: vec![(contract_artifact, contract_bytes)] };

        let err = debugger.handle(&ctx).await.unwrap_err();
        assert!(matches!(err, AgentError::Validation { .. }));
    }
}
