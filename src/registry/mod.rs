//! Sharded pool registry
//!
//! One pool per shard address, all created up front. Each request is routed
//! by [`crate::router::shard_index`] and served by exactly one pool: no retry,
//! no fallback to another shard.

mod stats;
mod table;

pub use stats::{ShardHealth, ShardSnapshot, ShardStats};
pub use table::{ShardRoute, ShardTable};

use crate::error::{PoolError, RouterError};
use crate::metrics::{self, ClientKind};
use crate::pool::{MemoryPool, PoolConfig, ShardPool, TcpPool};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Routes shard keys to per-shard pools.
///
/// Immutable after construction; clones share the same pools.
pub struct ShardedPool<P> {
    inner: Arc<Inner<P>>,
}

struct Inner<P> {
    table: ShardTable,
    pools: HashMap<String, P>,
    stats: ShardStats,
}

impl<P> Clone for ShardedPool<P> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<P> std::fmt::Debug for ShardedPool<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShardedPool")
            .field("servers", &self.inner.table.servers())
            .finish()
    }
}

impl<P: ShardPool> ShardedPool<P> {
    /// Create a registry, building one pool per address with `connect`.
    ///
    /// Fails on an empty list, a duplicate address, or the first pool that
    /// cannot be built. Pools are created in list order.
    pub fn new<I, S, F>(servers: I, mut connect: F) -> Result<Self, RouterError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        F: FnMut(&str) -> Result<P, PoolError>,
    {
        let table = ShardTable::new(servers)?;

        let mut pools = HashMap::with_capacity(table.len());
        for address in table.servers() {
            let pool = connect(address).map_err(|source| {
                warn!(address = %address, error = %source, "Failed to create shard pool");
                RouterError::ConnectionSetup {
                    address: address.clone(),
                    source,
                }
            })?;
            pools.insert(address.clone(), pool);
        }

        let stats = ShardStats::new(table.servers());
        metrics::set_shards_configured(table.len());

        info!(
            shard_count = table.len(),
            servers = ?table.servers(),
            "Sharded pool registry created"
        );

        Ok(Self {
            inner: Arc::new(Inner {
                table,
                pools,
                stats,
            }),
        })
    }

    /// Lease a full client from the shard responsible for `shard_key`.
    pub async fn client(&self, shard_key: &str) -> Result<P::Client, RouterError> {
        let (index, address, pool) = self.resolve(shard_key)?;
        let started = Instant::now();
        let result = pool.client().await;
        self.observe(index, address, ClientKind::Client, started, result)
    }

    /// Lease a cache-capability client from the shard responsible for `shard_key`.
    pub async fn cache_client(&self, shard_key: &str) -> Result<P::CacheClient, RouterError> {
        let (index, address, pool) = self.resolve(shard_key)?;
        let started = Instant::now();
        let result = pool.cache_client().await;
        self.observe(index, address, ClientKind::Cache, started, result)
    }

    /// Where `shard_key` lands, without acquiring anything.
    pub fn route(&self, shard_key: &str) -> Result<ShardRoute, RouterError> {
        self.inner.table.route(shard_key)
    }

    /// Pool at position `index` of the shard list
    pub fn pool(&self, index: usize) -> Option<&P> {
        let address = self.inner.table.servers().get(index)?;
        self.inner.pools.get(address)
    }

    /// Pool registered under `address`
    pub fn pool_for(&self, address: &str) -> Option<&P> {
        self.inner.pools.get(address)
    }

    fn resolve(&self, shard_key: &str) -> Result<(usize, &str, &P), RouterError> {
        let (index, address) = self.inner.table.locate(shard_key)?;
        let pool = self.inner.pools.get(address).ok_or_else(|| {
            // Unreachable: pools and table are built from the same list
            RouterError::InvalidConfiguration(format!("no pool registered for shard '{address}'"))
        })?;
        Ok((index, address, pool))
    }

    fn observe<T>(
        &self,
        index: usize,
        address: &str,
        kind: ClientKind,
        started: Instant,
        result: Result<T, PoolError>,
    ) -> Result<T, RouterError> {
        match result {
            Ok(client) => {
                self.inner.stats.record_acquire(index);
                metrics::record_acquire(address, kind, started.elapsed());
                debug!(shard = index, address, kind = kind.label(), "Acquired shard client");
                Ok(client)
            }
            Err(source) => {
                self.inner.stats.record_failure(index);
                metrics::record_acquire_failure(address, source.error_type_label());
                warn!(shard = index, address, error = %source, "Shard client acquisition failed");
                Err(RouterError::PoolUnavailable {
                    address: address.to_string(),
                    source,
                })
            }
        }
    }
}

impl<P> ShardedPool<P> {
    /// Ordered shard table
    pub fn table(&self) -> &ShardTable {
        &self.inner.table
    }

    /// Shard addresses in placement order
    pub fn servers(&self) -> &[String] {
        self.inner.table.servers()
    }

    /// Number of shards
    pub fn len(&self) -> usize {
        self.inner.table.len()
    }

    /// Always false; a registry holds at least one shard
    pub fn is_empty(&self) -> bool {
        self.inner.table.is_empty()
    }

    /// Shared acquisition stats
    pub fn stats(&self) -> ShardStats {
        self.inner.stats.clone()
    }
}

impl ShardedPool<TcpPool> {
    /// Registry of TCP pools sharing one configuration
    pub fn connect_tcp<I, S>(servers: I, config: &PoolConfig) -> Result<Self, RouterError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(servers, |address| TcpPool::new(address, config.clone()))
    }
}

impl ShardedPool<MemoryPool> {
    /// Registry of in-process shards
    pub fn in_memory<I, S>(servers: I) -> Result<Self, RouterError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(servers, MemoryPool::new)
    }
}
