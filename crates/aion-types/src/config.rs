//! Configuration types, deserialized from `~/.aion/config.toml`.
//!
//! Every section has defaults so a missing file or a partial file yields a
//! usable configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default ceiling for strategy code size (1 MiB).
pub const DEFAULT_MAX_STRATEGY_BYTES: usize = 1024 * 1024;

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AionConfig {
    /// Default tracing filter when `RUST_LOG` is unset.
    pub log_level: String,
    /// Registry, storage and trust settings.
    pub marketplace: MarketplaceConfig,
    /// Resource limits for strategy execution.
    pub sandbox: SandboxConfig,
}

impl Default for AionConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            marketplace: MarketplaceConfig::default(),
            sandbox: SandboxConfig::default(),
        }
    }
}

/// Marketplace configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketplaceConfig {
    /// URL of the remote registry document.
    pub registry_url: String,
    /// Directory holding persisted `*.strategy` records. Relative paths
    /// resolve against the AION home directory.
    pub strategy_pool: PathBuf,
    /// Directory of trusted author public keys, one PEM file per author.
    pub trusted_keys: PathBuf,
    /// Maximum accepted strategy code size in bytes.
    pub max_strategy_bytes: usize,
    /// Per-request timeout for registry and download requests.
    pub request_timeout_secs: u64,
    /// Permit plain `http://` URLs. Only meant for local development.
    pub allow_insecure_http: bool,
}

impl Default for MarketplaceConfig {
    fn default() -> Self {
        Self {
            registry_url: "https://marketplace.aion.net/registry.json".to_string(),
            strategy_pool: PathBuf::from("strategies"),
            trusted_keys: PathBuf::from("trusted_keys"),
            max_strategy_bytes: DEFAULT_MAX_STRATEGY_BYTES,
            request_timeout_secs: 30,
            allow_insecure_http: false,
        }
    }
}

/// Sandbox resource limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Fuel (instruction budget) per execution. 0 = unlimited.
    pub fuel_limit: u64,
    /// Ceiling on guest linear memory in bytes.
    pub max_memory_bytes: usize,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            fuel_limit: 10_000_000,
            max_memory_bytes: 16 * 1024 * 1024,
        }
    }
}
