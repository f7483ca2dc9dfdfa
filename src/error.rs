//! Error types for kvring
//!
//! Provides a unified error type for all client operations.

use std::io::ErrorKind;

use thiserror::Error;

/// Result type alias using KvError
pub type Result<T> = std::result::Result<T, KvError>;

/// Unified error type for kvring operations
#[derive(Debug, Error)]
pub enum KvError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Protocol Errors
    // -------------------------------------------------------------------------
    /// Malformed or truncated reply; the connection is desynchronized.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The server answered with an error reply.
    #[error("Server error: {0}")]
    Server(String),

    #[error("Unexpected reply (expected {expected}): {reply}")]
    UnexpectedReply { expected: String, reply: String },

    // -------------------------------------------------------------------------
    // Connection Setup Errors
    // -------------------------------------------------------------------------
    #[error("Invalid credentials for node {node}")]
    Authentication { node: String },

    #[error("Connection pool exhausted for node {node}")]
    PoolExhausted { node: String },

    #[error("Node {node} is not alive")]
    NodeUnavailable { node: String },

    // -------------------------------------------------------------------------
    // Routing Errors
    // -------------------------------------------------------------------------
    #[error(
        "{command} cannot be executed because the keys involved need to be on the same node \
         or the operation cannot be guaranteed to be atomic"
    )]
    Clustering { command: String },

    #[error("Configuration error: {0}")]
    Config(String),

    // -------------------------------------------------------------------------
    // Session Errors
    // -------------------------------------------------------------------------
    #[error("Transaction aborted: a watched key was modified")]
    TransactionAborted,

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Stats error: {0}")]
    Stats(String),

    // -------------------------------------------------------------------------
    // Context
    // -------------------------------------------------------------------------
    #[error("{command} on {node} failed: {source}")]
    Node {
        node: String,
        command: String,
        #[source]
        source: Box<KvError>,
    },
}

impl KvError {
    /// Attach the failing node and attempted command to an error.
    ///
    /// Errors that already carry node context are returned unchanged.
    pub fn on_node(self, node: impl Into<String>, command: impl Into<String>) -> Self {
        match self {
            err @ KvError::Node { .. } => err,
            err @ KvError::Clustering { .. } => err,
            err => KvError::Node {
                node: node.into(),
                command: command.into(),
                source: Box::new(err),
            },
        }
    }

    /// The innermost error, looking through node context.
    pub fn root(&self) -> &KvError {
        match self {
            KvError::Node { source, .. } => source.root(),
            err => err,
        }
    }

    /// Whether retrying the same operation later may succeed.
    pub fn is_transient(&self) -> bool {
        match self.root() {
            KvError::Io(err) => matches!(
                err.kind(),
                ErrorKind::TimedOut
                    | ErrorKind::WouldBlock
                    | ErrorKind::ConnectionRefused
                    | ErrorKind::ConnectionReset
                    | ErrorKind::ConnectionAborted
                    | ErrorKind::BrokenPipe
                    | ErrorKind::UnexpectedEof
                    | ErrorKind::Interrupted
            ),
            KvError::PoolExhausted { .. } | KvError::NodeUnavailable { .. } => true,
            KvError::TransactionAborted => true,
            _ => false,
        }
    }

    /// Whether the socket that produced this error can no longer be trusted.
    ///
    /// Server error replies are fully framed, so they leave the connection usable.
    pub fn is_connection_fatal(&self) -> bool {
        matches!(
            self.root(),
            KvError::Io(_) | KvError::Protocol(_) | KvError::Authentication { .. }
        )
    }

    /// Whether this is a clustering violation.
    pub fn is_clustering(&self) -> bool {
        matches!(self.root(), KvError::Clustering { .. })
    }

    /// Copy of this error for every command a node-level failure affects.
    ///
    /// I/O errors keep their kind and message but lose the OS source.
    pub(crate) fn duplicate(&self) -> KvError {
        match self {
            KvError::Io(err) => KvError::Io(std::io::Error::new(err.kind(), err.to_string())),
            KvError::Protocol(msg) => KvError::Protocol(msg.clone()),
            KvError::Server(msg) => KvError::Server(msg.clone()),
            KvError::UnexpectedReply { expected, reply } => KvError::UnexpectedReply {
                expected: expected.clone(),
                reply: reply.clone(),
            },
            KvError::Authentication { node } => KvError::Authentication { node: node.clone() },
            KvError::PoolExhausted { node } => KvError::PoolExhausted { node: node.clone() },
            KvError::NodeUnavailable { node } => KvError::NodeUnavailable { node: node.clone() },
            KvError::Clustering { command } => KvError::Clustering {
                command: command.clone(),
            },
            KvError::Config(msg) => KvError::Config(msg.clone()),
            KvError::TransactionAborted => KvError::TransactionAborted,
            KvError::InvalidState(msg) => KvError::InvalidState(msg.clone()),
            KvError::Stats(msg) => KvError::Stats(msg.clone()),
            KvError::Node {
                node,
                command,
                source,
            } => KvError::Node {
                node: node.clone(),
                command: command.clone(),
                source: Box::new(source.duplicate()),
            },
        }
    }
}
