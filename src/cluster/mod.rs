//! Cluster Module
//!
//! Key → node assignment over a statically configured set of nodes.
//!
//! ## Components
//! - `Node`: identity, liveness and connection pool of one backend
//! - `HashRing`: immutable consistent-hash ring over the live nodes
//! - `NodePool`: owns nodes and the current ring snapshot
//! - `HealthProbe`: pluggable liveness check, run by a background monitor

mod health;
mod node;
mod node_pool;
mod ring;

pub use health::{HealthProbe, PingProbe};
pub use node::Node;
pub use node_pool::NodePool;
pub use ring::{hash_key, node_positions, HashRing};
