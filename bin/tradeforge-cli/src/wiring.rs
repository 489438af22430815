//! Constructs the shared bus, artifact store, and LLM router every command
//! depends on, from [`TradeforgeConfig`] (§6).
//!
//! Grounded in the source's `AppState::from_config` bootstrap
//! (`bin/server/src/main.rs`): one function per shared dependency, called
//! once per process and handed down as `Arc`s.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tradeforge_artifacts::ArtifactStore;
use tradeforge_bus::{BusError, BusHealth, Event, EventBus, EventType, InProcessBus, NatsBus, NatsConfig, Subscription};
use tradeforge_core::{KeyId, WorkflowId};
use tradeforge_llm::{
    load_manifest, BackendRegistry, EnvSecretStore, InMemoryRateStore, KeyMetadata, LlmProvider, Router, SecretStore,
    SecretStoreKind, StaticSecretStore,
};

use crate::backend::TemplateBackend;
use crate::config::TradeforgeConfig;
use crate::error::CliError;

const KEYS_MANIFEST_FILE: &str = "keys.json";

/// Either transport `EventBus` can resolve to at startup, selected by
/// `BUS_URL`. A thin delegating enum rather than a trait object, so the
/// rest of the binary stays generic over one concrete `EventBus` type the
/// way `Orchestrator<B: EventBus>` and `AgentWorker<B, H, L>` expect
/// (`NatsBus` does not implement `Clone`, `InProcessBus` does, so a shared
/// handle has to be this or a trait object either way).
pub enum AnyBus {
    InProcess(InProcessBus),
    Nats(NatsBus),
}

#[async_trait]
impl EventBus for AnyBus {
    async fn publish(&self, event: Event) -> Result<(), BusError> {
        match self {
            Self::InProcess(b) => b.publish(event).await,
            Self::Nats(b) => b.publish(event).await,
        }
    }

    async fn subscribe(&self, event_types: &[EventType], group: &str) -> Result<Box<dyn Subscription>, BusError> {
        match self {
            Self::InProcess(b) => b.subscribe(event_types, group).await,
            Self::Nats(b) => b.subscribe(event_types, group).await,
        }
    }

    async fn replay(&self, workflow_id: WorkflowId, from_timestamp: Option<DateTime<Utc>>) -> Result<Vec<Event>, BusError> {
        match self {
            Self::InProcess(b) => b.replay(workflow_id, from_timestamp).await,
            Self::Nats(b) => b.replay(workflow_id, from_timestamp).await,
        }
    }

    async fn health(&self) -> BusHealth {
        match self {
            Self::InProcess(b) => b.health().await,
            Self::Nats(b) => b.health().await,
        }
    }
}

/// Builds the transport this process publishes/subscribes against.
/// `BUS_URL` unset selects the in-process transport; set, the NATS
/// transport.
///
/// # Errors
///
/// Returns [`CliError::Bus`] if connecting to NATS fails.
pub async fn build_bus(config: &TradeforgeConfig) -> Result<Arc<AnyBus>, CliError> {
    match &config.bus_url {
        Some(url) => {
            let nats = NatsBus::new(NatsConfig::new(url.clone())).await?;
            Ok(Arc::new(AnyBus::Nats(nats)))
        }
        None => Ok(Arc::new(AnyBus::InProcess(InProcessBus::new()))),
    }
}

/// Opens (or initializes) the git-backed artifact store at
/// `WORKSPACE_ROOT`.
///
/// # Errors
///
/// Returns [`CliError::Artifact`] if the repository cannot be opened.
pub fn build_artifact_store(config: &TradeforgeConfig) -> Result<Arc<ArtifactStore>, CliError> {
    Ok(Arc::new(ArtifactStore::init(Path::new(&config.workspace_root))?))
}

/// Builds the LLM router. Always registers [`TemplateBackend`] under its
/// `OpenAiCompatible` provider slot (this binary ships no provider SDK,
/// matching `tradeforge-llm`'s contract-only design) with a synthetic key
/// so the submit -> execute pipeline runs end to end with no external
/// service. If the multi-key router is enabled and `keys.json` exists
/// under `WORKSPACE_ROOT`, its active keys are loaded alongside the
/// synthetic template key, exercising the real manifest/secret-store path
/// even without a live provider behind it.
///
/// # Errors
///
/// Returns [`CliError::Manifest`] if `keys.json` exists but cannot be
/// parsed.
pub fn build_router(config: &TradeforgeConfig) -> Result<Arc<Router<InMemoryRateStore>>, CliError> {
    let mut registry = BackendRegistry::new();
    registry.register(Arc::new(TemplateBackend::new()));

    let mut keys = vec![KeyMetadata::new(KeyId::new(), LlmProvider::OpenAiCompatible, "template-v1")];

    if config.llm_multi_key_router_enabled {
        let manifest_path = Path::new(&config.workspace_root).join(KEYS_MANIFEST_FILE);
        if let Ok(contents) = std::fs::read_to_string(&manifest_path) {
            let secret_store: Box<dyn SecretStore> = match SecretStoreKind::from_env_var(&config.secret_store_type) {
                SecretStoreKind::Env => Box::new(EnvSecretStore),
                SecretStoreKind::Vault | SecretStoreKind::Aws | SecretStoreKind::Azure => Box::new(StaticSecretStore::default()),
            };
            let loaded = load_manifest(&contents, secret_store.as_ref())?;
            keys.extend(loaded.into_iter().map(|(key, _secret)| key).filter(|key| key.active));
        }
    }

    Ok(Arc::new(Router::new(keys, InMemoryRateStore::new(), registry, config.llm_max_retries)))
}
