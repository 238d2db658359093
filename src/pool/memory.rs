//! In-process shard backend
//!
//! Every handle leased from a `MemoryPool` shares the pool's store, the way
//! every connection to one server sees the same keyspace. Used for local mode
//! (no servers reachable) and for tests.

use super::{clamp_ttl, CacheClient, ShardPool};
use crate::error::PoolError;

use bytes::Bytes;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug)]
struct Entry {
    value: Bytes,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

#[derive(Debug)]
struct MemoryInner {
    address: String,
    store: DashMap<String, Entry>,
    leased: AtomicU64,
}

/// In-memory pool for one shard address
#[derive(Debug, Clone)]
pub struct MemoryPool {
    inner: Arc<MemoryInner>,
}

impl MemoryPool {
    /// Create a pool. Any non-empty address is accepted since nothing is dialed.
    pub fn new(address: &str) -> Result<Self, PoolError> {
        if address.trim().is_empty() {
            return Err(PoolError::InvalidAddress {
                address: address.to_string(),
                reason: "address is empty".to_string(),
            });
        }

        Ok(Self {
            inner: Arc::new(MemoryInner {
                address: address.to_string(),
                store: DashMap::new(),
                leased: AtomicU64::new(0),
            }),
        })
    }

    /// Total handles leased (data and cache) over the pool's lifetime
    pub fn leased(&self) -> u64 {
        self.inner.leased.load(Ordering::Relaxed)
    }

    fn lease(&self) -> MemoryConnection {
        self.inner.leased.fetch_add(1, Ordering::Relaxed);
        MemoryConnection { pool: self.clone() }
    }
}

impl ShardPool for MemoryPool {
    type Client = MemoryConnection;
    type CacheClient = MemoryCache;

    fn address(&self) -> &str {
        &self.inner.address
    }

    async fn client(&self) -> Result<MemoryConnection, PoolError> {
        Ok(self.lease())
    }

    async fn cache_client(&self) -> Result<MemoryCache, PoolError> {
        Ok(MemoryCache(self.lease()))
    }
}

/// Full client for a memory shard
#[derive(Debug, Clone)]
pub struct MemoryConnection {
    pool: MemoryPool,
}

impl MemoryConnection {
    /// Address of the shard this handle belongs to
    pub fn address(&self) -> &str {
        &self.pool.inner.address
    }

    /// Whether a live entry exists for `key`
    pub fn exists(&self, key: &str) -> bool {
        self.lookup(key).is_some()
    }

    /// Number of live entries on this shard
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.store().iter().filter(|e| e.is_live(now)).count()
    }

    /// Whether the shard holds no live entries
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove every entry on this shard
    pub fn flush(&self) {
        self.store().clear();
    }

    fn store(&self) -> &DashMap<String, Entry> {
        &self.pool.inner.store
    }

    fn lookup(&self, key: &str) -> Option<Bytes> {
        let now = Instant::now();
        if let Some(entry) = self.store().get(key) {
            if entry.is_live(now) {
                return Some(entry.value.clone());
            }
        }
        self.store().remove_if(key, |_, entry| !entry.is_live(now));
        None
    }

    fn put(&self, key: &str, value: &[u8], ttl: Option<Duration>) {
        let entry = Entry {
            value: Bytes::copy_from_slice(value),
            expires_at: ttl.map(|ttl| Instant::now() + clamp_ttl(ttl)),
        };
        self.store().insert(key.to_string(), entry);
    }

    fn touch(&self, key: &str, ttl: Duration) -> bool {
        let now = Instant::now();
        match self.store().get_mut(key) {
            Some(mut entry) if entry.is_live(now) => {
                entry.expires_at = Some(now + clamp_ttl(ttl));
                true
            }
            _ => false,
        }
    }

    fn remove(&self, key: &str) -> bool {
        let now = Instant::now();
        self.store()
            .remove(key)
            .is_some_and(|(_, entry)| entry.is_live(now))
    }
}

impl CacheClient for MemoryConnection {
    async fn get(&mut self, key: &str) -> Result<Option<Bytes>, PoolError> {
        Ok(self.lookup(key))
    }

    async fn set(&mut self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<(), PoolError> {
        self.put(key, value, ttl);
        Ok(())
    }

    async fn expire(&mut self, key: &str, ttl: Duration) -> Result<bool, PoolError> {
        Ok(self.touch(key, ttl))
    }

    async fn delete(&mut self, key: &str) -> Result<bool, PoolError> {
        Ok(self.remove(key))
    }
}

/// Cache-only view of a memory shard
#[derive(Debug, Clone)]
pub struct MemoryCache(MemoryConnection);

impl MemoryCache {
    /// Address of the shard this handle belongs to
    pub fn address(&self) -> &str {
        self.0.address()
    }
}

impl CacheClient for MemoryCache {
    async fn get(&mut self, key: &str) -> Result<Option<Bytes>, PoolError> {
        self.0.get(key).await
    }

    async fn set(&mut self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<(), PoolError> {
        self.0.set(key, value, ttl).await
    }

    async fn expire(&mut self, key: &str, ttl: Duration) -> Result<bool, PoolError> {
        self.0.expire(key, ttl).await
    }

    async fn delete(&mut self, key: &str) -> Result<bool, PoolError> {
        self.0.delete(key).await
    }
}
