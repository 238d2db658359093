//! Domain error types for the Arrakis KV router
//!
//! main.rs is the ONLY module allowed to use anyhow::Result (process boundary).
//! Library code returns Result<T, RouterError> and pools return
//! Result<T, PoolError>.

use thiserror::Error;

/// Router domain errors
///
/// Construction-time variants (`InvalidConfiguration`, `DuplicateShardAddress`,
/// `ConnectionSetup`) are never produced once a registry exists. Request-time
/// failures are always `PoolUnavailable`, with the pool's own error as source.
///
/// Example log output:
/// ```text
/// RouterError::DuplicateShardAddress { address: "s0:6379" }
/// → "shard address 's0:6379' appears more than once"
/// ```
#[derive(Error, Debug)]
pub enum RouterError {
    /// Shard count unusable for index computation (zero shards)
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Two entries in the shard list collide
    #[error("shard address '{address}' appears more than once")]
    DuplicateShardAddress { address: String },

    /// A per-shard pool could not be created; registry setup aborted
    #[error("failed to set up pool for shard '{address}'")]
    ConnectionSetup {
        address: String,
        #[source]
        source: PoolError,
    },

    /// The shard's pool failed to hand out a client
    #[error("shard '{address}' unavailable")]
    PoolUnavailable {
        address: String,
        #[source]
        source: PoolError,
    },

    /// Configuration error (file or environment variable missing or invalid)
    #[error("configuration error: {0}")]
    Config(String),
}

impl RouterError {
    /// Returns a static label string suitable for Prometheus metrics.
    pub fn error_type_label(&self) -> &'static str {
        match self {
            Self::InvalidConfiguration(_) => "invalid_configuration",
            Self::DuplicateShardAddress { .. } => "duplicate_shard_address",
            Self::ConnectionSetup { .. } => "connection_setup",
            Self::PoolUnavailable { source, .. } => source.error_type_label(),
            Self::Config(_) => "config",
        }
    }
}

/// Per-shard pool errors
#[derive(Error, Debug)]
pub enum PoolError {
    /// Address is not a usable `host:port`
    #[error("invalid shard address '{address}': {reason}")]
    InvalidAddress { address: String, reason: String },

    /// Pool was configured to hold no connections
    #[error("pool for {address} needs max_connections of at least 1")]
    InvalidCapacity { address: String },

    /// No connection became available within the checkout timeout
    #[error("timed out waiting for a connection to {address}")]
    CheckoutTimeout { address: String },

    /// Dialing the server took longer than the connect timeout
    #[error("timed out connecting to {address}")]
    ConnectTimeout { address: String },

    /// Dialing the server failed
    #[error("failed to connect to {address}")]
    Connect {
        address: String,
        #[source]
        source: std::io::Error,
    },

    /// I/O failure on an established connection
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Server sent something that is not a valid reply
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Server replied with an error
    #[error("server error: {0}")]
    Server(String),

    /// Pool has been closed
    #[error("pool for {address} is closed")]
    Closed { address: String },
}

impl PoolError {
    /// Returns a static label string suitable for Prometheus metrics.
    pub fn error_type_label(&self) -> &'static str {
        match self {
            Self::InvalidAddress { .. } => "invalid_address",
            Self::InvalidCapacity { .. } => "invalid_capacity",
            Self::CheckoutTimeout { .. } => "checkout_timeout",
            Self::ConnectTimeout { .. } => "connect_timeout",
            Self::Connect { .. } => "connect",
            Self::Io(_) => "io",
            Self::Protocol(_) => "protocol",
            Self::Server(_) => "server",
            Self::Closed { .. } => "pool_closed",
        }
    }
}
