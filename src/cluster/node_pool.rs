//! Node Pool
//!
//! Owns the configured nodes and the current hash ring.
//!
//! ## Responsibilities
//! - Resolve a transformed key to its live node
//! - Track liveness and rebuild the ring when it changes
//! - Run the optional background health monitor
//!
//! ## Concurrency
//! Lookups clone an `Arc<HashRing>` snapshot under a short read lock; a
//! rebuild builds the new ring outside that lock and swaps the `Arc`. A lookup
//! racing a rebuild sees either the old ring or the new one, never a mix.
//! Rebuilds are serialized, so the last ring stored always reflects every
//! liveness flag flipped before it started.

use std::sync::Arc;

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};

use super::health::{HealthMonitor, HealthProbe, PingProbe};
use super::ring::{hash_key, HashRing};
use super::Node;
use crate::config::ClientConfig;
use crate::error::{KvError, Result};
use crate::network::SocketOptions;
use crate::transform::KeyTransformer;

/// The statically configured set of nodes
pub struct NodePool {
    config: ClientConfig,
    nodes: Vec<Arc<Node>>,
    ring: RwLock<Arc<HashRing>>,
    /// Held across build and swap
    rebuild: Mutex<()>,
    transformer: Option<Arc<dyn KeyTransformer>>,
    probe: Arc<dyn HealthProbe>,
    monitor: Mutex<Option<HealthMonitor>>,
}

impl NodePool {
    /// Build the nodes and the initial ring; every node starts alive
    pub fn new(
        config: &ClientConfig,
        transformer: Option<Arc<dyn KeyTransformer>>,
    ) -> Result<Self> {
        config.validate()?;

        let socket = SocketOptions::from_config(config);
        let nodes: Vec<Arc<Node>> = config
            .nodes
            .iter()
            .map(|node| Arc::new(Node::new(node, config.pool_for(node).clone(), socket)))
            .collect();
        let ring = HashRing::build(&nodes, config.points_per_weight);

        tracing::info!(
            "Node pool created: {} nodes, {} ring positions",
            nodes.len(),
            ring.len()
        );

        Ok(Self {
            config: config.clone(),
            nodes,
            ring: RwLock::new(Arc::new(ring)),
            rebuild: Mutex::new(()),
            transformer,
            probe: Arc::new(PingProbe::new(socket, config.probe_timeout())),
            monitor: Mutex::new(None),
        })
    }

    /// Replace the liveness probe (takes effect on the next probe round)
    pub fn with_probe(mut self, probe: impl HealthProbe + 'static) -> Self {
        self.probe = Arc::new(probe);
        self
    }

    /// Start background probing when an interval is configured
    pub fn start(self: &Arc<Self>) -> Result<()> {
        let Some(interval) = self.config.health_check_interval() else {
            return Ok(());
        };

        let mut monitor = self.monitor.lock();
        if monitor.is_none() {
            *monitor = Some(HealthMonitor::spawn(Arc::downgrade(self), interval)?);
        }
        Ok(())
    }

    /// Stop the monitor and close every idle socket
    pub fn shutdown(&self) {
        if let Some(mut monitor) = self.monitor.lock().take() {
            monitor.stop();
        }
        for node in &self.nodes {
            node.pool().close();
        }
        tracing::info!("Node pool shut down");
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    // =========================================================================
    // Lookup
    // =========================================================================

    /// All nodes in configuration order, live or not
    pub fn servers(&self) -> &[Arc<Node>] {
        &self.nodes
    }

    /// Nodes currently considered alive, in configuration order
    pub fn live_servers(&self) -> Vec<Arc<Node>> {
        self.nodes.iter().filter(|node| node.is_alive()).cloned().collect()
    }

    pub fn node_by_alias(&self, alias: &str) -> Option<Arc<Node>> {
        self.nodes.iter().find(|node| node.alias() == alias).cloned()
    }

    /// Apply the configured key transformer
    pub fn transform_key(&self, key: &[u8]) -> Bytes {
        match self.transformer {
            Some(ref transformer) => transformer.transform(key),
            None => Bytes::copy_from_slice(key),
        }
    }

    /// Live node owning an already transformed key
    pub fn locate(&self, key: &[u8]) -> Result<Arc<Node>> {
        let ring = self.ring();
        ring.locate(hash_key(key))
            .map(|index| Arc::clone(&self.nodes[index]))
            .ok_or_else(|| KvError::Config("no live nodes available".to_string()))
    }

    /// Current ring snapshot
    pub fn ring(&self) -> Arc<HashRing> {
        Arc::clone(&*self.ring.read())
    }

    // =========================================================================
    // Liveness
    // =========================================================================

    /// Regenerate the ring from the live nodes
    pub fn rebuild_ring(&self) {
        let _rebuild = self.rebuild.lock();
        let ring = Arc::new(HashRing::build(&self.nodes, self.config.points_per_weight));
        let live = self.nodes.iter().filter(|node| node.is_alive()).count();
        tracing::info!(
            "Hash ring rebuilt: {}/{} nodes live, {} positions",
            live,
            self.nodes.len(),
            ring.len()
        );
        *self.ring.write() = ring;
    }

    /// Record a liveness transition; returns whether the flag changed
    pub fn set_alive(&self, node: &Node, alive: bool) -> bool {
        let was_alive = node.swap_alive(alive);
        if was_alive == alive {
            return false;
        }

        if alive {
            tracing::info!("Node {} is back", node);
        } else {
            // Idle sockets to a dead node cannot be trusted once it returns
            let closed = node.pool().clear_idle();
            tracing::warn!("Node {} marked dead, closed {} idle connections", node, closed);
        }
        self.rebuild_ring();
        true
    }

    /// Probe every node once; returns the number of live nodes
    pub fn probe_now(&self) -> usize {
        let mut live = 0;
        for node in &self.nodes {
            let ok = self.probe.probe(node);
            self.set_alive(node, ok);
            if ok {
                live += 1;
            }
        }
        live
    }

    /// Prune idle sockets on every node
    pub fn prune_idle(&self) -> usize {
        self.nodes.iter().map(|node| node.pool().prune_idle()).sum()
    }
}

impl Drop for NodePool {
    fn drop(&mut self) {
        if let Some(mut monitor) = self.monitor.get_mut().take() {
            monitor.stop();
        }
    }
}
