//! # kvring
//!
//! A synchronous client for a sharded pool of RESP key-value servers:
//! - Consistent hashing of (optionally transformed) keys onto live nodes
//! - Per-node connection pools with lazy AUTH and SELECT
//! - Pipelining with one batched write per node
//! - Single-node transactions with WATCH
//! - Refusal of multi-key operations that would span nodes
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 Client (one per session)                    │
//! │           typed ops · NodeScope · Pipeline · Tx             │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                   ExecutionEngine                           │
//! │     routing · clustering guard · Direct/Pipeline/Tx         │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//!          ┌────────────┴────────────┐
//!          │                         │
//!          ▼                         ▼
//!   ┌─────────────┐          ┌──────────────────┐
//!   │  NodePool   │          │  ConnectionPool  │
//!   │ (HashRing)  │          │   (per node)     │
//!   └─────────────┘          └────────┬─────────┘
//!                                     │
//!                                     ▼
//!                             ┌─────────────┐
//!                             │  Protocol   │
//!                             │   (RESP)    │
//!                             └─────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod protocol;
pub mod network;
pub mod cluster;
pub mod engine;
pub mod client;
pub mod stats;
pub mod transform;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{KvError, Result};
pub use config::{ClientConfig, ErrorMode, ExhaustedPolicy, NodeConfig, PoolConfig};
pub use client::{Batch, Client, NodeScope, Pipeline, Transaction};
pub use cluster::{HealthProbe, Node, NodePool};
pub use protocol::{Command, CommandKind, Reply};
pub use stats::{ServerStats, StatItem, StatsTarget};
pub use transform::{KeyTransformer, PrefixKeyTransformer, Sha256KeyTransformer};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of kvring
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
