//! Router configuration module
//!
//! Layers, lowest precedence first: built-in defaults, an optional TOML file
//! (`KV_ROUTER_CONFIG`, default `kv-router.toml`), then `KV_ROUTER_*`
//! environment variables. Nested keys use `__`, e.g.
//! `KV_ROUTER_POOL__MAX_CONNECTIONS=32`; `KV_ROUTER_SERVERS` is
//! comma-separated.

use crate::error::RouterError;
use crate::pool::PoolConfig;

use config::{Config, Environment, File, FileFormat, FileSourceFile};
use serde::Deserialize;
use std::env;

/// Default config file, looked up relative to the working directory
pub const DEFAULT_CONFIG_FILE: &str = "kv-router.toml";

/// Which pool implementation backs each shard
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// TCP connections to RESP servers
    #[default]
    Tcp,
    /// In-process store, for local runs without servers
    Memory,
}

/// Router configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RouterConfig {
    /// Shard addresses (`host:port`), in placement order
    #[serde(default)]
    pub servers: Vec<String>,

    /// Pool backend
    #[serde(default)]
    pub backend: Backend,

    /// Health/metrics HTTP port
    pub http_port: u16,

    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,

    /// Per-shard pool settings
    #[serde(default)]
    pub pool: PoolConfig,
}

impl RouterConfig {
    /// Load from `.env`, the optional config file and the environment
    pub fn load() -> Result<Self, RouterError> {
        dotenvy::dotenv().ok();

        let path = env::var("KV_ROUTER_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());
        Self::from_sources(File::with_name(&path).required(false), environment())
    }

    /// Build from an explicit file and environment source
    pub fn from_sources(
        file: File<FileSourceFile, FileFormat>,
        env: Environment,
    ) -> Result<Self, RouterError> {
        let settings = Config::builder()
            .set_default("http_port", 9090)
            .and_then(|b| b.set_default("log_level", "info"))
            .map_err(config_error)?
            .add_source(file)
            .add_source(env)
            .build()
            .map_err(config_error)?;

        let config: Self = settings.try_deserialize().map_err(config_error)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the registry cannot be built from
    pub fn validate(&self) -> Result<(), RouterError> {
        if self.servers.is_empty() {
            return Err(RouterError::Config(
                "KV_ROUTER_SERVERS must list at least one shard".to_string(),
            ));
        }
        if self.pool.max_connections == 0 {
            return Err(RouterError::Config(
                "pool.max_connections must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// `KV_ROUTER_*` environment source
pub fn environment() -> Environment {
    Environment::with_prefix("KV_ROUTER")
        .prefix_separator("_")
        .separator("__")
        .list_separator(",")
        .with_list_parse_key("servers")
        .try_parsing(true)
}

fn config_error(e: config::ConfigError) -> RouterError {
    RouterError::Config(e.to_string())
}
