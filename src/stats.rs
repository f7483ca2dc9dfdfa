//! Server Statistics
//!
//! Parsed `INFO` output of every live node.
//!
//! ## Format
//! ```text
//! # Server
//! redis_version:2.0.0
//! uptime_in_seconds:3600
//! connected_clients:4
//! ```
//! `#` lines are section headers and are skipped. Values stay raw strings;
//! typed accessors parse on demand.

use std::collections::HashMap;
use std::time::Duration;

use crate::error::{KvError, Result};

/// Known statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatItem {
    Uptime,
    Version,
    ConnectedClients,
    ConnectedSlaves,
    UsedMemory,
    ChangesSinceLastSave,
    TotalConnectionsReceived,
    TotalCommandsProcessed,
    ExpiredKeys,
    EvictedKeys,
    KeyspaceHits,
    KeyspaceMisses,
}

impl StatItem {
    /// INFO field name
    pub fn key(self) -> &'static str {
        match self {
            StatItem::Uptime => "uptime_in_seconds",
            StatItem::Version => "redis_version",
            StatItem::ConnectedClients => "connected_clients",
            StatItem::ConnectedSlaves => "connected_slaves",
            StatItem::UsedMemory => "used_memory",
            StatItem::ChangesSinceLastSave => "changes_since_last_save",
            StatItem::TotalConnectionsReceived => "total_connections_received",
            StatItem::TotalCommandsProcessed => "total_commands_processed",
            StatItem::ExpiredKeys => "expired_keys",
            StatItem::EvictedKeys => "evicted_keys",
            StatItem::KeyspaceHits => "keyspace_hits",
            StatItem::KeyspaceMisses => "keyspace_misses",
        }
    }

    /// Whether adding the values of several nodes is meaningful
    pub fn is_summable(self) -> bool {
        !matches!(self, StatItem::Uptime | StatItem::Version)
    }
}

/// Which node(s) a statistic is read from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatsTarget<'a> {
    /// Sum over every node (summable items only)
    All,
    /// A single node, by alias
    Node(&'a str),
}

/// INFO snapshot of a set of nodes
#[derive(Debug, Clone, Default)]
pub struct ServerStats {
    /// Per node, in the order they were queried
    nodes: Vec<(String, HashMap<String, String>)>,
}

/// Parse INFO text into `key -> value`
pub fn parse_info(text: &str) -> HashMap<String, String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_once(':'))
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect()
}

impl ServerStats {
    /// Build from `(alias, INFO text)` pairs
    pub fn from_info<I, A, T>(infos: I) -> Self
    where
        I: IntoIterator<Item = (A, T)>,
        A: Into<String>,
        T: AsRef<str>,
    {
        Self {
            nodes: infos
                .into_iter()
                .map(|(alias, text)| (alias.into(), parse_info(text.as_ref())))
                .collect(),
        }
    }

    /// Aliases with stats, in query order
    pub fn nodes(&self) -> impl Iterator<Item = &str> {
        self.nodes.iter().map(|(alias, _)| alias.as_str())
    }

    fn node(&self, alias: &str) -> Option<&HashMap<String, String>> {
        self.nodes
            .iter()
            .find(|(name, _)| name == alias)
            .map(|(_, values)| values)
    }

    /// Unparsed value of `key` on `alias`
    pub fn raw(&self, alias: &str, key: &str) -> Option<&str> {
        let value = self.node(alias)?.get(key).map(String::as_str);
        if value.is_none() {
            tracing::debug!("Stat {} not reported by {}", key, alias);
        }
        value
    }

    /// Numeric value of `item`; `StatsTarget::All` sums across nodes
    pub fn value(&self, target: StatsTarget<'_>, item: StatItem) -> Result<i64> {
        match target {
            StatsTarget::Node(alias) => {
                let raw = self
                    .raw(alias, item.key())
                    .ok_or_else(|| KvError::Stats(format!("{} not found for {}", item.key(), alias)))?;
                raw.trim().parse::<i64>().map_err(|_| {
                    KvError::Stats(format!("invalid value for {} on {}: {}", item.key(), alias, raw))
                })
            }
            StatsTarget::All => {
                if !item.is_summable() {
                    return Err(KvError::Stats(format!(
                        "{} values cannot be summed across nodes",
                        item.key()
                    )));
                }
                let mut total: i64 = 0;
                for (alias, _) in &self.nodes {
                    let value = self.value(StatsTarget::Node(alias), item)?;
                    total = total.checked_add(value).ok_or_else(|| {
                        KvError::Stats(format!("{} overflows when summed across nodes", item.key()))
                    })?;
                }
                Ok(total)
            }
        }
    }

    pub fn uptime(&self, alias: &str) -> Result<Duration> {
        let seconds = self.value(StatsTarget::Node(alias), StatItem::Uptime)?;
        Ok(Duration::from_secs(seconds.max(0) as u64))
    }

    pub fn version(&self, alias: &str) -> Result<String> {
        self.raw(alias, StatItem::Version.key())
            .map(str::to_string)
            .ok_or_else(|| KvError::Stats(format!("no version reported by {}", alias)))
    }
}
