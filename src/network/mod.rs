//! Network Module
//!
//! Sockets to the backend nodes.
//!
//! ## Architecture
//! - One `ConnectionPool` per node
//! - Sockets are reconciled (AUTH, SELECT) lazily on acquire
//! - `PooledConnection` guards return sockets on drop

mod connection;
mod pool;

pub use connection::{Connection, SocketOptions};
pub use pool::{ConnectionPool, PoolStats, PooledConnection};
