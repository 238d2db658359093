//! Ordered shard table

use crate::error::RouterError;
use crate::router::shard_index;

use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;

/// Where a shard key lands
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShardRoute {
    pub index: usize,
    pub address: String,
}

/// Validated, ordered list of shard addresses.
///
/// Order is part of the placement: reordering moves keys between servers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardTable {
    servers: Arc<[String]>,
}

impl ShardTable {
    /// Build a table, rejecting empty lists and duplicate addresses.
    pub fn new<I, S>(servers: I) -> Result<Self, RouterError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let servers: Vec<String> = servers.into_iter().map(Into::into).collect();

        if servers.is_empty() {
            return Err(RouterError::InvalidConfiguration(
                "at least one shard server is required".to_string(),
            ));
        }

        let mut seen = HashSet::with_capacity(servers.len());
        for address in &servers {
            if !seen.insert(address.as_str()) {
                return Err(RouterError::DuplicateShardAddress {
                    address: address.clone(),
                });
            }
        }

        Ok(Self {
            servers: servers.into(),
        })
    }

    /// Index and address responsible for `shard_key`
    pub fn locate(&self, shard_key: &str) -> Result<(usize, &str), RouterError> {
        let index = shard_index(shard_key, self.servers.len())?;
        Ok((index, &self.servers[index]))
    }

    /// Owned route for `shard_key`
    pub fn route(&self, shard_key: &str) -> Result<ShardRoute, RouterError> {
        let (index, address) = self.locate(shard_key)?;
        Ok(ShardRoute {
            index,
            address: address.to_string(),
        })
    }

    pub fn servers(&self) -> &[String] {
        &self.servers
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    /// Always false; a table holds at least one shard
    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }
}
