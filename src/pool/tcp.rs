//! Bounded TCP connection pool for a single shard

use super::resp::RespCache;
use super::{parse_address, PoolConfig, ShardPool};
use crate::error::PoolError;

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::{timeout, Instant};
use tracing::{debug, info};

/// Connection pool for one `host:port`.
///
/// Connections are dialed lazily on first checkout; construction only
/// validates the address.
#[derive(Clone)]
pub struct TcpPool {
    inner: Arc<Inner>,
}

struct Inner {
    address: String,
    host: String,
    port: u16,
    config: PoolConfig,
    permits: Arc<Semaphore>,
    idle: Mutex<VecDeque<IdleConnection>>,
    created: AtomicU64,
}

struct IdleConnection {
    stream: TcpStream,
    returned_at: Instant,
}

impl std::fmt::Debug for TcpPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpPool")
            .field("address", &self.inner.address)
            .field("idle", &self.idle())
            .field("available", &self.available())
            .finish()
    }
}

impl TcpPool {
    /// Create a pool for `address`.
    pub fn new(address: &str, config: PoolConfig) -> Result<Self, PoolError> {
        let (host, port) = parse_address(address)?;

        if config.max_connections == 0 {
            return Err(PoolError::InvalidCapacity {
                address: address.to_string(),
            });
        }

        debug!(address, max_connections = config.max_connections, "Creating TCP pool");

        Ok(Self {
            inner: Arc::new(Inner {
                address: address.to_string(),
                host,
                port,
                permits: Arc::new(Semaphore::new(config.max_connections)),
                idle: Mutex::new(VecDeque::with_capacity(config.max_idle)),
                created: AtomicU64::new(0),
                config,
            }),
        })
    }

    /// Check out a connection, reusing an idle one when possible.
    pub async fn get(&self) -> Result<PooledConnection, PoolError> {
        let permit = match timeout(
            self.inner.config.checkout_timeout(),
            Arc::clone(&self.inner.permits).acquire_owned(),
        )
        .await
        {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => {
                return Err(PoolError::Closed {
                    address: self.inner.address.clone(),
                })
            }
            Err(_) => {
                return Err(PoolError::CheckoutTimeout {
                    address: self.inner.address.clone(),
                })
            }
        };

        let stream = match self.take_idle() {
            Some(stream) => stream,
            None => self.dial().await?,
        };

        Ok(PooledConnection {
            stream: Some(stream),
            pool: self.clone(),
            broken: false,
            _permit: permit,
        })
    }

    /// Close the pool. Waiting and future checkouts fail with `Closed`.
    pub fn close(&self) {
        self.inner.permits.close();
        self.inner.idle.lock().clear();
        info!(address = %self.inner.address, "TCP pool closed");
    }

    /// Idle connections ready for reuse
    pub fn idle(&self) -> usize {
        self.inner.idle.lock().len()
    }

    /// Connections that can still be checked out without waiting
    pub fn available(&self) -> usize {
        self.inner.permits.available_permits()
    }

    /// Connections dialed over the pool's lifetime
    pub fn created(&self) -> u64 {
        self.inner.created.load(Ordering::Relaxed)
    }

    /// Pool configuration
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    fn take_idle(&self) -> Option<TcpStream> {
        let idle_timeout = self.inner.config.idle_timeout();
        let mut idle = self.inner.idle.lock();

        // Newest at the back; once it is stale, everything older is too.
        match idle.pop_back() {
            Some(conn) if conn.returned_at.elapsed() < idle_timeout => Some(conn.stream),
            Some(_) => {
                idle.clear();
                None
            }
            None => None,
        }
    }

    async fn dial(&self) -> Result<TcpStream, PoolError> {
        let address = &self.inner.address;
        let connect = TcpStream::connect((self.inner.host.as_str(), self.inner.port));

        let stream = match timeout(self.inner.config.connect_timeout(), connect).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => {
                return Err(PoolError::Connect {
                    address: address.clone(),
                    source,
                })
            }
            Err(_) => {
                return Err(PoolError::ConnectTimeout {
                    address: address.clone(),
                })
            }
        };

        stream.set_nodelay(true)?;
        self.inner.created.fetch_add(1, Ordering::Relaxed);
        debug!(address = %address, "Opened shard connection");

        Ok(stream)
    }

    fn check_in(&self, stream: TcpStream) {
        if self.inner.permits.is_closed() {
            return;
        }

        let mut idle = self.inner.idle.lock();
        if idle.len() >= self.inner.config.max_idle {
            return;
        }
        idle.push_back(IdleConnection {
            stream,
            returned_at: Instant::now(),
        });
    }
}

impl ShardPool for TcpPool {
    type Client = PooledConnection;
    type CacheClient = RespCache;

    fn address(&self) -> &str {
        &self.inner.address
    }

    async fn client(&self) -> Result<PooledConnection, PoolError> {
        self.get().await
    }

    async fn cache_client(&self) -> Result<RespCache, PoolError> {
        Ok(RespCache::new(self.get().await?))
    }
}

/// Leased connection. Returned to its pool on drop unless marked broken.
pub struct PooledConnection {
    stream: Option<TcpStream>,
    pool: TcpPool,
    broken: bool,
    // Released after the stream is checked back in.
    _permit: OwnedSemaphorePermit,
}

impl std::fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("address", &self.address())
            .field("broken", &self.broken)
            .finish()
    }
}

impl PooledConnection {
    /// Address of the shard this connection belongs to
    pub fn address(&self) -> &str {
        &self.pool.inner.address
    }

    /// Do not return this connection to the pool.
    pub fn mark_broken(&mut self) {
        self.broken = true;
    }

    /// Return this connection to the pool on drop again.
    ///
    /// Only call once the stream is back at a request boundary.
    pub fn mark_healthy(&mut self) {
        self.broken = false;
    }

    /// Whether the connection will be discarded on drop
    pub fn is_broken(&self) -> bool {
        self.broken
    }
}

impl Deref for PooledConnection {
    type Target = TcpStream;

    fn deref(&self) -> &TcpStream {
        // Only taken in Drop
        self.stream.as_ref().expect("stream present until drop")
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut TcpStream {
        self.stream.as_mut().expect("stream present until drop")
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(stream) = self.stream.take() {
            if !self.broken {
                self.pool.check_in(stream);
            }
        }
    }
}
