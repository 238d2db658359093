//! Arrakis KV Router - sharded connection routing for key-value backends
//!
//! Routes every shard key to one of a fixed list of servers and leases a
//! pooled connection to that server:
//! - [`router`]: CRC-32 over UTF-16LE keys, reduced modulo the shard count
//! - [`registry`]: one pool per shard, built eagerly, immutable afterwards
//! - [`pool`]: the per-shard pool contract plus TCP and in-memory backends
//!
//! ```no_run
//! # async fn demo() -> Result<(), arrakis_kv_router::RouterError> {
//! use arrakis_kv_router::{CacheClient, PoolConfig, ShardedPool};
//!
//! let registry = ShardedPool::connect_tcp(
//!     ["s0:6379", "s1:6379", "s2:6379"],
//!     &PoolConfig::default(),
//! )?;
//!
//! let mut cache = registry.cache_client("user:42").await?;
//! cache.set("user:42", b"alice", None).await.ok();
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod config;
pub mod error;
pub mod health;
pub mod metrics;
pub mod pool;
pub mod registry;
pub mod router;

pub use error::{PoolError, RouterError};
pub use pool::{CacheClient, MemoryPool, PoolConfig, ShardPool, TcpPool};
pub use registry::{ShardRoute, ShardTable, ShardedPool};
pub use router::{shard_hash, shard_index};
