//! Per-shard acquisition tracking
//!
//! Observability only: nothing here feeds back into routing.

use dashmap::DashMap;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// How long a failed acquisition keeps a shard out of readiness
pub const DEFAULT_FAILURE_WINDOW: Duration = Duration::from_secs(30);

/// Last observed availability of a shard
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ShardHealth {
    /// No acquisition attempted yet
    Unknown,
    /// Last acquisition succeeded
    Available,
    /// Last acquisition failed
    Unavailable,
}

impl ShardHealth {
    /// Returns true unless the last acquisition failed
    pub fn is_usable(&self) -> bool {
        !matches!(self, ShardHealth::Unavailable)
    }
}

/// State for a single shard
#[derive(Debug)]
pub struct ShardStatsEntry {
    pub address: String,
    pub health: ShardHealth,
    pub acquisitions: AtomicU64,
    pub failures: AtomicU64,
    pub last_acquired_at: Option<Instant>,
    pub last_failed_at: Option<Instant>,
}

impl ShardStatsEntry {
    fn new(address: String) -> Self {
        Self {
            address,
            health: ShardHealth::Unknown,
            acquisitions: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            last_acquired_at: None,
            last_failed_at: None,
        }
    }
}

/// Point-in-time view of one shard, for the `/shards` endpoint
#[derive(Debug, Clone, Serialize)]
pub struct ShardSnapshot {
    pub index: usize,
    pub address: String,
    pub health: ShardHealth,
    pub acquisitions: u64,
    pub failures: u64,
    pub last_acquired_ms_ago: Option<u64>,
}

/// Shared stats across all shards of a registry
#[derive(Debug, Clone)]
pub struct ShardStats {
    shards: Arc<DashMap<usize, ShardStatsEntry>>,
    failure_window: Duration,
}

impl ShardStats {
    /// Create a tracker with one entry per address, keyed by shard index
    pub fn new<'a>(servers: impl IntoIterator<Item = &'a String>) -> Self {
        Self::with_failure_window(servers, DEFAULT_FAILURE_WINDOW)
    }

    /// Same as [`ShardStats::new`], with a custom readiness window
    pub fn with_failure_window<'a>(
        servers: impl IntoIterator<Item = &'a String>,
        failure_window: Duration,
    ) -> Self {
        let shards = DashMap::new();
        for (index, address) in servers.into_iter().enumerate() {
            shards.insert(index, ShardStatsEntry::new(address.clone()));
        }

        Self {
            shards: Arc::new(shards),
            failure_window,
        }
    }

    /// Record a successful acquisition
    pub fn record_acquire(&self, index: usize) {
        if let Some(mut entry) = self.shards.get_mut(&index) {
            entry.acquisitions.fetch_add(1, Ordering::Relaxed);
            entry.health = ShardHealth::Available;
            entry.last_acquired_at = Some(Instant::now());
        }
    }

    /// Record a failed acquisition
    pub fn record_failure(&self, index: usize) {
        if let Some(mut entry) = self.shards.get_mut(&index) {
            entry.failures.fetch_add(1, Ordering::Relaxed);
            entry.health = ShardHealth::Unavailable;
            entry.last_failed_at = Some(Instant::now());
        }
    }

    /// Get health for a specific shard
    pub fn get_health(&self, index: usize) -> Option<ShardHealth> {
        self.shards.get(&index).map(|e| e.health)
    }

    /// Acquisitions served by a specific shard
    pub fn acquisitions(&self, index: usize) -> u64 {
        self.shards
            .get(&index)
            .map_or(0, |e| e.acquisitions.load(Ordering::Relaxed))
    }

    /// Failed acquisitions on a specific shard
    pub fn failures(&self, index: usize) -> u64 {
        self.shards
            .get(&index)
            .map_or(0, |e| e.failures.load(Ordering::Relaxed))
    }

    /// Get total acquisitions across all shards
    pub fn total_acquisitions(&self) -> u64 {
        self.shards
            .iter()
            .map(|e| e.acquisitions.load(Ordering::Relaxed))
            .sum()
    }

    /// Get count of shards whose last acquisition failed within the
    /// failure window
    pub fn unavailable_shards(&self) -> usize {
        self.shards
            .iter()
            .filter(|e| !e.health.is_usable())
            .filter(|e| {
                e.last_failed_at
                    .is_some_and(|at| at.elapsed() < self.failure_window)
            })
            .count()
    }

    /// Get shard count
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Ready unless some shard's last acquisition failed within the failure
    /// window. Once the window passes the shard counts as ready again even
    /// without a new acquisition, so traffic can reach it and recover it.
    pub fn is_ready(&self) -> bool {
        self.unavailable_shards() == 0
    }

    /// Snapshot of every shard, ordered by index
    pub fn snapshot(&self) -> Vec<ShardSnapshot> {
        let mut shards: Vec<ShardSnapshot> = self
            .shards
            .iter()
            .map(|e| ShardSnapshot {
                index: *e.key(),
                address: e.address.clone(),
                health: e.health,
                acquisitions: e.acquisitions.load(Ordering::Relaxed),
                failures: e.failures.load(Ordering::Relaxed),
                last_acquired_ms_ago: e
                    .last_acquired_at
                    .map(|at| at.elapsed().as_millis() as u64),
            })
            .collect();
        shards.sort_by_key(|s| s.index);
        shards
    }
}
