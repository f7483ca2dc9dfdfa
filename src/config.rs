//! Configuration for kvring
//!
//! Centralized configuration with sensible defaults. The configuration is an
//! explicit value handed to `Client::new`; nothing is read from global state.

use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{KvError, Result};

/// Most ring positions one node may contribute (`weight * points_per_weight`)
pub const MAX_NODE_POSITIONS: u64 = 1 << 20;

/// Main configuration for a kvring client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    // -------------------------------------------------------------------------
    // Topology
    // -------------------------------------------------------------------------
    /// Backend nodes, in configuration order
    pub nodes: Vec<NodeConfig>,

    /// Ring positions per unit of node weight
    pub points_per_weight: u32,

    /// Logical database selected on every connection
    pub default_db: u32,

    // -------------------------------------------------------------------------
    // Network Configuration
    // -------------------------------------------------------------------------
    /// TCP connect timeout (milliseconds, 0 = none)
    pub connect_timeout_ms: u64,

    /// Socket read timeout (milliseconds, 0 = none)
    pub read_timeout_ms: u64,

    /// Socket write timeout (milliseconds, 0 = none)
    pub write_timeout_ms: u64,

    /// Default pool sizing, overridable per node
    pub pool: PoolConfig,

    // -------------------------------------------------------------------------
    // Liveness
    // -------------------------------------------------------------------------
    /// Interval between health probes (milliseconds, 0 = no background probing)
    pub health_check_interval_ms: u64,

    /// Timeout of a single health probe (milliseconds)
    pub probe_timeout_ms: u64,

    // -------------------------------------------------------------------------
    // Error Policy
    // -------------------------------------------------------------------------
    /// How failures of calls without a result are surfaced
    pub error_mode: ErrorMode,
}

/// A single backend node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Unique name, also the node's identity on the hash ring
    pub alias: String,

    /// `host:port`
    pub address: String,

    /// Password sent with AUTH on every new connection
    #[serde(default)]
    pub password: Option<String>,

    /// Relative share of the key space (must be at least 1)
    #[serde(default = "default_weight")]
    pub weight: u32,

    /// Pool sizing for this node only
    #[serde(default)]
    pub pool: Option<PoolConfig>,
}

/// Per-node connection pool sizing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Idle connections kept even when pruning
    pub min_idle: usize,

    /// Maximum connections (idle + in use) before `on_exhausted` applies
    pub max_total: usize,

    /// Idle time after which connections beyond `min_idle` are closed
    pub idle_timeout_ms: u64,

    /// What `acquire` does when `max_total` connections are in use
    pub on_exhausted: ExhaustedPolicy,
}

/// Behavior of an exhausted pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum ExhaustedPolicy {
    /// Wait up to `timeout_ms` for a connection to be released
    Block { timeout_ms: u64 },

    /// Open an overflow connection that is closed on release
    Grow,

    /// Fail immediately
    Fail,
}

/// How calls that return no value report failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorMode {
    /// Return every error to the caller
    Propagate,

    /// Log failures of unit-returning calls and report success
    LogAndSwallow,
}

fn default_weight() -> u32 {
    1
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            nodes: Vec::new(),
            points_per_weight: 160,
            default_db: 0,
            connect_timeout_ms: 2000,
            read_timeout_ms: 5000,
            write_timeout_ms: 5000,
            pool: PoolConfig::default(),
            health_check_interval_ms: 0,
            probe_timeout_ms: 1000,
            error_mode: ErrorMode::Propagate,
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_idle: 1,
            max_total: 16,
            idle_timeout_ms: 60_000,
            on_exhausted: ExhaustedPolicy::Block { timeout_ms: 1000 },
        }
    }
}

impl ClientConfig {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Parse a TOML document
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: ClientConfig =
            toml::from_str(text).map_err(|e| KvError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .map_err(|e| KvError::Config(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_toml_str(&text)
    }

    /// Reject configurations the pool cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.nodes.is_empty() {
            return Err(KvError::Config("no nodes configured".to_string()));
        }
        if self.points_per_weight == 0 {
            return Err(KvError::Config("points_per_weight must be at least 1".to_string()));
        }

        let mut aliases = HashSet::new();
        for node in &self.nodes {
            if node.alias.is_empty() {
                return Err(KvError::Config(format!("node {} has an empty alias", node.address)));
            }
            if !aliases.insert(node.alias.as_str()) {
                return Err(KvError::Config(format!("duplicate node alias '{}'", node.alias)));
            }
            if node.weight == 0 {
                return Err(KvError::Config(format!("node '{}' has weight 0", node.alias)));
            }
            let positions = u64::from(node.weight) * u64::from(self.points_per_weight);
            if positions > MAX_NODE_POSITIONS {
                return Err(KvError::Config(format!(
                    "node '{}': weight {} gives {} ring positions (max {})",
                    node.alias, node.weight, positions, MAX_NODE_POSITIONS
                )));
            }
            self.pool_for(node).validate(&node.alias)?;
        }

        Ok(())
    }

    /// Pool sizing that applies to `node`
    pub fn pool_for<'a>(&'a self, node: &'a NodeConfig) -> &'a PoolConfig {
        node.pool.as_ref().unwrap_or(&self.pool)
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        millis(self.connect_timeout_ms)
    }

    pub fn read_timeout(&self) -> Option<Duration> {
        millis(self.read_timeout_ms)
    }

    pub fn write_timeout(&self) -> Option<Duration> {
        millis(self.write_timeout_ms)
    }

    pub fn health_check_interval(&self) -> Option<Duration> {
        millis(self.health_check_interval_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms.max(1))
    }
}

impl PoolConfig {
    fn validate(&self, alias: &str) -> Result<()> {
        if self.max_total == 0 {
            return Err(KvError::Config(format!("node '{}': max_total must be at least 1", alias)));
        }
        if self.min_idle > self.max_total {
            return Err(KvError::Config(format!(
                "node '{}': min_idle ({}) exceeds max_total ({})",
                alias, self.min_idle, self.max_total
            )));
        }
        Ok(())
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }
}

impl NodeConfig {
    pub fn new(alias: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            alias: alias.into(),
            address: address.into(),
            password: None,
            weight: 1,
            pool: None,
        }
    }

    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }

    pub fn pool(mut self, pool: PoolConfig) -> Self {
        self.pool = Some(pool);
        self
    }
}

/// `alias=host:port` or `alias=host:port@weight`
impl FromStr for NodeConfig {
    type Err = KvError;

    fn from_str(text: &str) -> Result<Self> {
        let (alias, rest) = text
            .split_once('=')
            .ok_or_else(|| KvError::Config(format!("expected alias=host:port, got '{}'", text)))?;
        let (address, weight) = match rest.rsplit_once('@') {
            Some((address, weight)) => {
                let weight = weight
                    .parse::<u32>()
                    .map_err(|_| KvError::Config(format!("invalid weight in '{}'", text)))?;
                (address, weight)
            }
            None => (rest, 1),
        };
        if alias.is_empty() || address.is_empty() {
            return Err(KvError::Config(format!("expected alias=host:port, got '{}'", text)));
        }
        Ok(NodeConfig::new(alias, address).weight(weight))
    }
}

fn millis(ms: u64) -> Option<Duration> {
    if ms == 0 {
        None
    } else {
        Some(Duration::from_millis(ms))
    }
}

/// Builder for ClientConfig
#[derive(Default)]
pub struct ConfigBuilder {
    config: ClientConfig,
}

impl ConfigBuilder {
    /// Add a node (order is preserved)
    pub fn node(mut self, node: NodeConfig) -> Self {
        self.config.nodes.push(node);
        self
    }

    /// Set the ring positions per unit of weight
    pub fn points_per_weight(mut self, points: u32) -> Self {
        self.config.points_per_weight = points;
        self
    }

    /// Set the database selected on every connection
    pub fn default_db(mut self, db: u32) -> Self {
        self.config.default_db = db;
        self
    }

    /// Set the connect timeout (in milliseconds)
    pub fn connect_timeout_ms(mut self, ms: u64) -> Self {
        self.config.connect_timeout_ms = ms;
        self
    }

    /// Set the read timeout (in milliseconds)
    pub fn read_timeout_ms(mut self, ms: u64) -> Self {
        self.config.read_timeout_ms = ms;
        self
    }

    /// Set the write timeout (in milliseconds)
    pub fn write_timeout_ms(mut self, ms: u64) -> Self {
        self.config.write_timeout_ms = ms;
        self
    }

    /// Set the default pool sizing
    pub fn pool(mut self, pool: PoolConfig) -> Self {
        self.config.pool = pool;
        self
    }

    /// Set the health probe interval (in milliseconds, 0 disables probing)
    pub fn health_check_interval_ms(mut self, ms: u64) -> Self {
        self.config.health_check_interval_ms = ms;
        self
    }

    /// Set the health probe timeout (in milliseconds)
    pub fn probe_timeout_ms(mut self, ms: u64) -> Self {
        self.config.probe_timeout_ms = ms;
        self
    }

    pub fn error_mode(mut self, mode: ErrorMode) -> Self {
        self.config.error_mode = mode;
        self
    }

    pub fn build(self) -> ClientConfig {
        self.config
    }
}
