//! Node
//!
//! One configured backend: its identity, liveness flag and socket pool.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::config::{NodeConfig, PoolConfig};
use crate::error::Result;
use crate::network::{ConnectionPool, PoolStats, PooledConnection, SocketOptions};

/// A backend node
pub struct Node {
    alias: String,
    address: String,
    password: Option<String>,
    weight: u32,
    alive: AtomicBool,
    pool: Arc<ConnectionPool>,
}

impl Node {
    /// Create a node; no socket is opened until the first acquire
    pub fn new(config: &NodeConfig, pool: PoolConfig, socket: SocketOptions) -> Self {
        let label = format!("{}@{}", config.alias, config.address);
        Self {
            alias: config.alias.clone(),
            address: config.address.clone(),
            password: config.password.clone(),
            weight: config.weight.max(1),
            alive: AtomicBool::new(true),
            pool: Arc::new(ConnectionPool::new(
                label,
                config.address.clone(),
                config.password.clone(),
                pool,
                socket,
            )),
        }
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }

    pub fn weight(&self) -> u32 {
        self.weight
    }

    /// `alias@address`
    pub fn label(&self) -> &str {
        self.pool.label()
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Store the liveness flag, returning the previous value
    pub(crate) fn swap_alive(&self, alive: bool) -> bool {
        self.alive.swap(alive, Ordering::AcqRel)
    }

    /// Check out a socket reconciled to `db`
    pub fn acquire(&self, db: u32) -> Result<PooledConnection> {
        self.pool.acquire(db)
    }

    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("alias", &self.alias)
            .field("address", &self.address)
            .field("weight", &self.weight)
            .field("alive", &self.is_alive())
            .finish()
    }
}
