//! Centralized CLI configuration, loaded via the `config` crate from
//! environment variables (§6).
//!
//! Mirrors the source's `ServerConfig::from_env()`: one flat struct, each
//! field defaulted independently so a bare environment still produces a
//! runnable single-process configuration.

use serde::Deserialize;

fn default_secret_store_type() -> String {
    "env".to_string()
}

fn default_workspace_root() -> String {
    ".tradeforge".to_string()
}

fn default_llm_max_retries() -> u32 {
    3
}

fn default_llm_base_backoff_ms() -> u64 {
    500
}

fn default_sandbox_cpu_limit() -> u64 {
    150
}

fn default_sandbox_mem_limit() -> u64 {
    1 << 30
}

fn default_sandbox_timeout_s() -> u64 {
    300
}

/// Process-wide configuration, loaded once at startup.
#[derive(Debug, Clone, Deserialize)]
pub struct TradeforgeConfig {
    /// Whether the multi-key router is enabled; single-key mode otherwise.
    #[serde(default)]
    pub llm_multi_key_router_enabled: bool,

    #[serde(default = "default_llm_max_retries")]
    pub llm_max_retries: u32,

    #[serde(default = "default_llm_base_backoff_ms")]
    pub llm_base_backoff_ms: u64,

    /// Bus transport endpoint. Absent means the in-memory, single-process
    /// transport.
    #[serde(default)]
    pub bus_url: Option<String>,

    #[serde(default = "default_secret_store_type")]
    pub secret_store_type: String,

    #[serde(default = "default_workspace_root")]
    pub workspace_root: String,

    #[serde(default = "default_sandbox_cpu_limit")]
    pub sandbox_cpu_limit: u64,

    #[serde(default = "default_sandbox_mem_limit")]
    pub sandbox_mem_limit: u64,

    #[serde(default = "default_sandbox_timeout_s")]
    pub sandbox_timeout_s: u64,
}

impl TradeforgeConfig {
    /// Loads configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns an error if a recognized variable is present but cannot be
    /// parsed as its declared type.
    pub fn from_env() -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(config::Environment::default().try_parsing(true))
            .build()?
            .try_deserialize()
    }
}
