//! Loads the `keys.json` manifest and resolves each key's secret from one of
//! env vars, a key-value vault, or a cloud secret manager, selected by
//! `SECRET_STORE_TYPE`. A missing secret for an active key disables that key
//! with a warning, never a crash, per §6 "Configuration".

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::warn;

use crate::error::ManifestError;
use crate::key::{KeyMetadata, WorkloadTag};

/// One entry in `keys.json`, before secret resolution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyManifestEntry {
    pub key_id: String,
    pub provider: crate::backend::LlmProvider,
    pub model_name: String,
    #[serde(default = "default_rpm")]
    pub rpm: u32,
    #[serde(default = "default_tpm")]
    pub tpm: u32,
    #[serde(default = "default_rpd")]
    pub rpd: u32,
    #[serde(default)]
    pub workload: WorkloadTag,
    #[serde(default)]
    pub priority: i32,
}

impl Default for WorkloadTag {
    fn default() -> Self {
        Self::Medium
    }
}

const fn default_rpm() -> u32 {
    60
}
const fn default_tpm() -> u32 {
    100_000
}
const fn default_rpd() -> u32 {
    10_000
}

/// The top-level `keys.json` shape: `{"keys": [...]}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeysManifest {
    pub keys: Vec<KeyManifestEntry>,
}

/// Where per-key secret values are resolved from, selected by
/// `SECRET_STORE_TYPE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecretStoreKind {
    Env,
    Vault,
    Aws,
    Azure,
}

impl SecretStoreKind {
    #[must_use]
    pub fn from_env_var(value: &str) -> Self {
        match value {
            "vault" => Self::Vault,
            "aws" => Self::Aws,
            "azure" => Self::Azure,
            _ => Self::Env,
        }
    }
}

/// Resolves a named secret, returning `None` if it is simply absent (not an
/// error condition at this layer).
pub trait SecretStore: Send + Sync {
    fn resolve(&self, name: &str) -> Result<Option<String>, String>;
}

/// Resolves `API_KEY_{key_id}` from process environment variables.
pub struct EnvSecretStore;

impl SecretStore for EnvSecretStore {
    fn resolve(&self, name: &str) -> Result<Option<String>, String> {
        match std::env::var(name) {
            Ok(value) => Ok(Some(value)),
            Err(std::env::VarError::NotPresent) => Ok(None),
            Err(e) => Err(e.to_string()),
        }
    }
}

/// A fixed-map secret store, standing in for vault/aws/azure backends (out
/// of scope as external collaborators); tests and local runs can populate it
/// directly.
#[derive(Default)]
pub struct StaticSecretStore {
    values: HashMap<String, String>,
}

impl StaticSecretStore {
    #[must_use]
    pub fn new(values: HashMap<String, String>) -> Self {
        Self { values }
    }
}

impl SecretStore for StaticSecretStore {
    fn resolve(&self, name: &str) -> Result<Option<String>, String> {
        Ok(self.values.get(name).cloned())
    }
}

/// Loads `keys.json` from `path` and resolves each entry's secret via
/// `secret_store`. Keys whose secret cannot be resolved are returned with
/// `active = false` and a warning logged, never an error.
///
/// Returns `(keys, resolved_secrets)`, where `resolved_secrets` maps
/// `KeyId` (by string form) to the resolved secret value, for callers that
/// need to hand the secret to a backend constructor.
///
/// # Errors
///
/// Returns [`ManifestError::LoadFailed`] if the manifest file cannot be read
/// or parsed as JSON.
pub fn load_manifest(
    contents: &str,
    secret_store: &dyn SecretStore,
) -> Result<Vec<(KeyMetadata, Option<String>)>, ManifestError> {
    let manifest: KeysManifest = serde_json::from_str(contents).map_err(|e| ManifestError::LoadFailed {
        reason: e.to_string(),
    })?;

    let mut out = Vec::with_capacity(manifest.keys.len());
    for entry in manifest.keys {
        let secret_var = format!("API_KEY_{}", entry.key_id);
        let secret = match secret_store.resolve(&secret_var) {
            Ok(Some(value)) => Some(value),
            Ok(None) => {
                warn!(key_id = %entry.key_id, "no secret resolved for key; disabling");
                None
            }
            Err(reason) => {
                warn!(key_id = %entry.key_id, reason, "secret store error resolving key; disabling");
                None
            }
        };

        let key_id = entry
            .key_id
            .parse()
            .unwrap_or_else(|_| tradeforge_core::KeyId::new());

        let mut metadata = KeyMetadata::new(key_id, entry.provider, entry.model_name);
        metadata.rpm = entry.rpm;
        metadata.tpm = entry.tpm;
        metadata.rpd = entry.rpd;
        metadata.workload = entry.workload;
        metadata.priority = entry.priority;
        metadata.active = secret.is_some();

        out.push((metadata, secret));
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFEST: &str = r#"{
        "keys": [
            {"key_id": "key_a", "provider": "anthropic", "model_name": "claude-light", "workload": "light"},
            {"key_id": "key_b", "provider": "anthropic", "model_name": "claude-heavy", "workload": "heavy", "rpm": 10}
        ]
    }"#;

    #[test]
    fn missing_secret_disables_key_without_error() {
        let store = StaticSecretStore::default();
        let loaded = load_manifest(MANIFEST, &store).unwrap();
        assert_eq!(loaded.len(), 2);
        assert!(!loaded[0].0.active);
        assert!(loaded[0].1.is_none());
    }

    #[test]
    fn present_secret_activates_key() {
        let mut values = HashMap::new();
        values.insert("API_KEY_key_a".to_string(), "sk-test".to_string());
        let store = StaticSecretStore::new(values);

        let loaded = load_manifest(MANIFEST, &store).unwrap();
        assert!(loaded[0].0.active);
        assert_eq!(loaded[0].1.as_deref(), Some("sk-test"));
        assert!(!loaded[1].0.active);
    }

    #[test]
    fn malformed_manifest_is_a_load_error() {
        let store = StaticSecretStore::default();
        let err = load_manifest("not json", &store).unwrap_err();
        assert!(matches!(err, ManifestError::LoadFailed { .. }));
    }

    #[test]
    fn secret_store_kind_defaults_to_env() {
        assert_eq!(SecretStoreKind::from_env_var("bogus"), SecretStoreKind::Env);
        assert_eq!(SecretStoreKind::from_env_var("vault"), SecretStoreKind::Vault);
    }
}
