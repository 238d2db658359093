//! Per-shard connection pools
//!
//! The registry only talks to a pool through [`ShardPool`]. Two backends ship
//! with the crate: [`TcpPool`] (bounded TCP pool speaking RESP for cache
//! operations) and [`MemoryPool`] (in-process store for local mode and tests).

mod memory;
mod resp;
mod tcp;

pub use memory::{MemoryCache, MemoryConnection, MemoryPool};
pub use resp::{encode_command, parse_reply, Reply, RespCache};
pub use tcp::{PooledConnection, TcpPool};

use crate::error::PoolError;
use bytes::Bytes;
use serde::Deserialize;
use std::future::Future;
use std::time::Duration;

/// A connection pool scoped to a single shard address.
pub trait ShardPool: Send + Sync + 'static {
    /// Full protocol client handle
    type Client: Send;
    /// Cache-only client handle
    type CacheClient: CacheClient;

    /// Address this pool serves.
    fn address(&self) -> &str;

    /// Lease a full client. May wait for a free connection.
    fn client(&self) -> impl Future<Output = Result<Self::Client, PoolError>> + Send;

    /// Lease a cache-capability client. May wait for a free connection.
    fn cache_client(&self) -> impl Future<Output = Result<Self::CacheClient, PoolError>> + Send;
}

/// Get/set/expire style operations, nothing else.
pub trait CacheClient: Send {
    /// Fetch a value, `None` if missing or expired.
    fn get(&mut self, key: &str) -> impl Future<Output = Result<Option<Bytes>, PoolError>> + Send;

    /// Store a value, optionally expiring after `ttl`.
    fn set(
        &mut self,
        key: &str,
        value: &[u8],
        ttl: Option<Duration>,
    ) -> impl Future<Output = Result<(), PoolError>> + Send;

    /// Set a time to live on an existing key. Returns false if the key is missing.
    fn expire(&mut self, key: &str, ttl: Duration) -> impl Future<Output = Result<bool, PoolError>> + Send;

    /// Remove a key. Returns false if it did not exist.
    fn delete(&mut self, key: &str) -> impl Future<Output = Result<bool, PoolError>> + Send;
}

/// Pool configuration shared by every shard.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PoolConfig {
    /// Maximum connections open (idle + leased) per shard.
    pub max_connections: usize,
    /// Maximum idle connections kept per shard.
    pub max_idle: usize,
    /// How long to wait for a free connection.
    pub checkout_timeout_ms: u64,
    /// How long to wait for a new connection to be established.
    pub connect_timeout_ms: u64,
    /// Close idle connections older than this.
    pub idle_timeout_ms: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 16,
            max_idle: 8,
            checkout_timeout_ms: 5_000,
            connect_timeout_ms: 1_000,
            idle_timeout_ms: 60_000,
        }
    }
}

impl PoolConfig {
    /// Checkout timeout duration.
    pub fn checkout_timeout(&self) -> Duration {
        Duration::from_millis(self.checkout_timeout_ms)
    }

    /// Connect timeout duration.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Idle timeout duration.
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }
}

/// Shortest expiry a backend applies. Servers reject a zero expiry, so every
/// backend rounds up to this.
pub(crate) const MIN_TTL: Duration = Duration::from_millis(1);

pub(crate) fn clamp_ttl(ttl: Duration) -> Duration {
    ttl.max(MIN_TTL)
}

/// Split a `host:port` address. IPv6 hosts must be bracketed (`[::1]:6379`).
pub(crate) fn parse_address(address: &str) -> Result<(String, u16), PoolError> {
    let invalid = |reason: &str| PoolError::InvalidAddress {
        address: address.to_string(),
        reason: reason.to_string(),
    };

    let (host, port) = if let Some(rest) = address.strip_prefix('[') {
        let (host, port) = rest.split_once("]:").ok_or_else(|| invalid("expected [host]:port"))?;
        (host, port)
    } else {
        let (host, port) = address.rsplit_once(':').ok_or_else(|| invalid("missing port"))?;
        if host.contains(':') {
            return Err(invalid("IPv6 hosts must be bracketed"));
        }
        (host, port)
    };

    if host.is_empty() {
        return Err(invalid("missing host"));
    }

    let port: u16 = port.parse().map_err(|_| invalid("port must be 1-65535"))?;
    if port == 0 {
        return Err(invalid("port must be 1-65535"));
    }

    Ok((host.to_string(), port))
}
