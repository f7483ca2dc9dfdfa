//! Engine Module
//!
//! One client session's execution state.
//!
//! ## Responsibilities
//! - Route commands to nodes (pins first, then the ring)
//! - Refuse multi-key commands whose keys live on different nodes
//! - Execute directly, or queue for a pipeline or transaction
//! - Flush queues with one batched write per node
//!
//! ## Modes
//! ```text
//!            begin_pipeline            flush / discard_pipeline
//!   Direct ─────────────────► Pipelining ─────────────────────► Direct
//!     │
//!     │  begin_transaction             commit / abort
//!     └─────────────────────► Transaction ────────────────────► Direct
//! ```
//!
//! ## Concurrency Model
//! An engine is owned by exactly one session and is never shared; sessions
//! share only the `NodePool`.

use std::mem;
use std::sync::Arc;

use crate::cluster::{Node, NodePool};
use crate::config::ErrorMode;
use crate::error::{KvError, Result};
use crate::network::PooledConnection;
use crate::protocol::{Colocation, Command, Reply};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Direct,
    Pipelining,
    Transaction,
}

/// State held for the lifetime of a transaction
#[derive(Default)]
struct TransactionState {
    /// Node every command of the transaction runs on
    node: Option<Arc<Node>>,

    /// Connection holding the WATCH, if any
    conn: Option<PooledConnection>,

    watching: bool,
}

/// Per-session execution engine
pub struct ExecutionEngine {
    pool: Arc<NodePool>,

    /// Database this session runs against
    db: u32,

    mode: Mode,

    /// Commands queued in Pipelining or Transaction mode, in enqueue order
    queue: Vec<(Arc<Node>, Command)>,

    /// Pinned nodes, innermost last
    pins: Vec<Arc<Node>>,

    transaction: TransactionState,
}

impl ExecutionEngine {
    pub fn new(pool: Arc<NodePool>) -> Self {
        let db = pool.config().default_db;
        Self::with_db(pool, db)
    }

    /// Engine for a session starting on `db`
    pub fn with_db(pool: Arc<NodePool>, db: u32) -> Self {
        Self {
            pool,
            db,
            mode: Mode::Direct,
            queue: Vec::new(),
            pins: Vec::new(),
            transaction: TransactionState::default(),
        }
    }

    pub fn pool(&self) -> &Arc<NodePool> {
        &self.pool
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn db(&self) -> u32 {
        self.db
    }

    /// Switch the session database; sockets catch up on their next acquire
    ///
    /// Only allowed in Direct mode: queued commands and a WATCH socket stay
    /// on the database they were issued against.
    pub fn select(&mut self, db: u32) -> Result<()> {
        self.expect_mode(Mode::Direct, "SELECT")?;
        self.db = db;
        Ok(())
    }

    /// Number of queued commands
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    // =========================================================================
    // Routing
    // =========================================================================

    /// Innermost pinned node
    pub fn pinned(&self) -> Option<&Arc<Node>> {
        self.pins.last()
    }

    pub fn push_pin(&mut self, node: Arc<Node>) -> Result<()> {
        if !node.is_alive() {
            return Err(KvError::NodeUnavailable {
                node: node.label().to_string(),
            });
        }
        tracing::trace!("Pinned session to {}", node);
        self.pins.push(node);
        Ok(())
    }

    pub fn pop_pin(&mut self) -> Option<Arc<Node>> {
        self.pins.pop()
    }

    /// Node for an already transformed key
    pub fn node_for_key(&self, key: &[u8]) -> Result<Arc<Node>> {
        match self.pinned() {
            Some(node) => Ok(Arc::clone(node)),
            None => self.pool.locate(key),
        }
    }

    /// The one node all `keys` map to
    ///
    /// Fails with a clustering error, before any I/O, when the keys span
    /// nodes. A pinned session sends everything to the pinned node.
    pub fn ensure_not_clustered<K: AsRef<[u8]>>(&self, command: &str, keys: &[K]) -> Result<Arc<Node>> {
        if let Some(node) = self.pinned() {
            return Ok(Arc::clone(node));
        }

        let mut common: Option<Arc<Node>> = None;
        for key in keys {
            let node = self.pool.locate(key.as_ref())?;
            match common {
                None => common = Some(node),
                Some(ref first) if !Arc::ptr_eq(first, &node) => {
                    tracing::debug!("{} spans {} and {}", command, first, node);
                    return Err(KvError::Clustering {
                        command: command.to_string(),
                    });
                }
                Some(_) => {}
            }
        }

        common.ok_or_else(|| KvError::InvalidState(format!("{} has no keys", command)))
    }

    /// Like `ensure_not_clustered`, with a destination key that must share
    /// the sources' node
    pub fn ensure_not_clustered_with_destination<K: AsRef<[u8]>>(
        &self,
        command: &str,
        destination: &[u8],
        keys: &[K],
    ) -> Result<Arc<Node>> {
        let mut all: Vec<&[u8]> = Vec::with_capacity(keys.len() + 1);
        all.push(destination);
        all.extend(keys.iter().map(|key| key.as_ref()));
        self.ensure_not_clustered(command, &all)
    }

    /// Node a (key-transformed) command runs on
    pub fn route(&self, command: &Command) -> Result<Arc<Node>> {
        match command.kind().colocation() {
            Colocation::DestinationFirst | Colocation::DestinationSecond => {
                match command.destination_and_sources() {
                    (Some(destination), sources) => self.ensure_not_clustered_with_destination(
                        command.name(),
                        destination,
                        &sources,
                    ),
                    (None, sources) => self.ensure_not_clustered(command.name(), &sources),
                }
            }
            _ => {
                let keys = command.keys();
                if keys.is_empty() {
                    self.default_node(command.name())
                } else {
                    self.ensure_not_clustered(command.name(), &keys)
                }
            }
        }
    }

    /// Node for commands without keys: the pin, else the transaction's node
    fn default_node(&self, command: &str) -> Result<Arc<Node>> {
        if let Some(node) = self.pinned() {
            return Ok(Arc::clone(node));
        }
        if let Some(ref node) = self.transaction.node {
            return Ok(Arc::clone(node));
        }
        Err(KvError::InvalidState(format!(
            "{} has no key to route by; pin a node first",
            command
        )))
    }

    // =========================================================================
    // Direct Execution
    // =========================================================================

    /// Run one command on `node` and return its checked reply
    pub fn execute(&self, node: &Node, command: &Command) -> Result<Reply> {
        if !node.is_alive() {
            return Err(KvError::NodeUnavailable {
                node: node.label().to_string(),
            });
        }

        let mut conn = node
            .acquire(self.db)
            .map_err(|e| e.on_node(node.label(), command.name()))?;
        conn.execute(command)
            .map_err(|e| e.on_node(node.label(), command.name()))
    }

    /// Run a command whose reply carries no value
    ///
    /// Under `ErrorMode::LogAndSwallow` failures are logged and reported as
    /// success.
    pub fn execute_unit(&self, node: &Node, command: &Command) -> Result<()> {
        match self.execute(node, command) {
            Ok(_) => Ok(()),
            Err(err) => match self.pool.config().error_mode {
                ErrorMode::Propagate => Err(err),
                ErrorMode::LogAndSwallow => {
                    tracing::warn!("Ignoring failed {}: {}", command.name(), err);
                    Ok(())
                }
            },
        }
    }

    /// Queue the command when a pipeline or transaction is open, else run it
    pub fn enqueue_or_execute(&mut self, node: Arc<Node>, command: Command) -> Result<Option<Reply>> {
        match self.mode {
            Mode::Direct => self.execute(&node, &command).map(Some),
            Mode::Pipelining => {
                self.queue.push((node, command));
                Ok(None)
            }
            Mode::Transaction => {
                self.bind_transaction(&node, command.name())?;
                self.queue.push((node, command));
                Ok(None)
            }
        }
    }

    // =========================================================================
    // Pipelining
    // =========================================================================

    pub fn begin_pipeline(&mut self) -> Result<()> {
        self.enter(Mode::Pipelining)
    }

    /// Send every queued command and return one result per command, in
    /// enqueue order
    ///
    /// Each node receives its commands in a single write. A node-level
    /// failure fails that node's remaining commands only.
    pub fn flush(&mut self) -> Result<Vec<Result<Reply>>> {
        self.expect_mode(Mode::Pipelining, "flush")?;
        self.mode = Mode::Direct;
        let queue = mem::take(&mut self.queue);

        // Group by node, keeping the order nodes first appear in
        let mut groups: Vec<(Arc<Node>, Vec<usize>)> = Vec::new();
        for (index, (node, _)) in queue.iter().enumerate() {
            match groups.iter_mut().find(|(n, _)| Arc::ptr_eq(n, node)) {
                Some((_, indices)) => indices.push(index),
                None => groups.push((Arc::clone(node), vec![index])),
            }
        }

        let mut results: Vec<Option<Result<Reply>>> = (0..queue.len()).map(|_| None).collect();
        for (node, indices) in groups {
            let commands: Vec<Command> = indices.iter().map(|&i| queue[i].1.clone()).collect();
            tracing::debug!("Flushing {} commands to {}", commands.len(), node);
            let replies = self.run_batch(&node, &commands);
            for (index, reply) in indices.into_iter().zip(replies) {
                results[index] = Some(reply);
            }
        }

        Ok(results
            .into_iter()
            .map(|result| {
                result.unwrap_or_else(|| Err(KvError::InvalidState("command not sent".to_string())))
            })
            .collect())
    }

    /// Drop the pipeline queue without sending it
    pub fn discard_pipeline(&mut self) {
        if self.mode == Mode::Pipelining {
            if !self.queue.is_empty() {
                tracing::debug!("Discarding {} pipelined commands", self.queue.len());
            }
            self.queue.clear();
            self.mode = Mode::Direct;
        }
    }

    fn run_batch(&self, node: &Node, commands: &[Command]) -> Vec<Result<Reply>> {
        let fail_all = |err: KvError| -> Vec<Result<Reply>> {
            commands
                .iter()
                .map(|command| Err(err.duplicate().on_node(node.label(), command.name())))
                .collect()
        };

        if !node.is_alive() {
            return fail_all(KvError::NodeUnavailable {
                node: node.label().to_string(),
            });
        }

        let mut conn = match node.acquire(self.db) {
            Ok(conn) => conn,
            Err(err) => return fail_all(err),
        };
        if let Err(err) = conn.send_batch(commands) {
            return fail_all(err);
        }

        let mut failure: Option<KvError> = None;
        let mut out = Vec::with_capacity(commands.len());
        for command in commands {
            if let Some(ref err) = failure {
                out.push(Err(err.duplicate().on_node(node.label(), command.name())));
                continue;
            }
            match conn.read_reply() {
                Ok(reply) => out.push(
                    command
                        .check_reply(reply)
                        .map_err(|e| e.on_node(node.label(), command.name())),
                ),
                Err(err) => {
                    failure = Some(err.duplicate());
                    out.push(Err(err.on_node(node.label(), command.name())));
                }
            }
        }
        out
    }

    // =========================================================================
    // Transactions
    // =========================================================================

    /// Open a transaction; a pinned session binds it to the pinned node
    pub fn begin_transaction(&mut self) -> Result<()> {
        self.enter(Mode::Transaction)?;
        self.transaction = TransactionState {
            node: self.pinned().cloned(),
            ..TransactionState::default()
        };
        Ok(())
    }

    fn bind_transaction(&mut self, node: &Arc<Node>, command: &str) -> Result<()> {
        match self.transaction.node {
            Some(ref bound) if !Arc::ptr_eq(bound, node) => Err(KvError::Clustering {
                command: command.to_string(),
            }),
            Some(_) => Ok(()),
            None => {
                tracing::debug!("Transaction bound to {}", node);
                self.transaction.node = Some(Arc::clone(node));
                Ok(())
            }
        }
    }

    fn transaction_conn(&mut self) -> Result<&mut PooledConnection> {
        let node = self
            .transaction
            .node
            .clone()
            .ok_or_else(|| KvError::InvalidState("transaction has no node".to_string()))?;
        if self.transaction.conn.is_none() {
            if !node.is_alive() {
                return Err(KvError::NodeUnavailable {
                    node: node.label().to_string(),
                });
            }
            let conn = node
                .acquire(self.db)
                .map_err(|e| e.on_node(node.label(), "MULTI"))?;
            self.transaction.conn = Some(conn);
        }
        self.transaction
            .conn
            .as_mut()
            .ok_or_else(|| KvError::InvalidState("transaction has no connection".to_string()))
    }

    /// WATCH `keys` (already transformed) on the transaction's node, now
    pub fn watch<K: AsRef<[u8]>>(&mut self, keys: &[K]) -> Result<()> {
        self.expect_mode(Mode::Transaction, "WATCH")?;
        let node = self.ensure_not_clustered("WATCH", keys)?;
        self.bind_transaction(&node, "WATCH")?;

        let command = Command::watch(keys.iter().map(|key| key.as_ref()));
        let label = node.label().to_string();
        self.transaction_conn()?
            .execute(&command)
            .and_then(Reply::into_ok)
            .map_err(|e| e.on_node(label, "WATCH"))?;
        self.transaction.watching = true;
        Ok(())
    }

    /// Send MULTI, the queued commands and EXEC in one batch
    ///
    /// Returns one result per queued command. A null EXEC (a watched key
    /// changed) is `TransactionAborted`; an EXECABORT fails the whole batch.
    pub fn commit(&mut self) -> Result<Vec<Result<Reply>>> {
        self.expect_mode(Mode::Transaction, "EXEC")?;
        self.mode = Mode::Direct;
        let queue = mem::take(&mut self.queue);

        if queue.is_empty() {
            let state = mem::take(&mut self.transaction);
            if let (true, Some(mut conn)) = (state.watching, state.conn) {
                conn.execute(&Command::unwatch())?;
            }
            return Ok(Vec::new());
        }

        let result = self.exec_queued(&queue);
        // EXEC clears any WATCH; the connection goes back to the pool here
        self.transaction = TransactionState::default();
        result
    }

    fn exec_queued(&mut self, queue: &[(Arc<Node>, Command)]) -> Result<Vec<Result<Reply>>> {
        let label = match self.transaction.node {
            Some(ref node) => node.label().to_string(),
            None => return Err(KvError::InvalidState("transaction has no node".to_string())),
        };
        let on_node = |command: &str| {
            let label = label.clone();
            let command = command.to_string();
            move |e: KvError| e.on_node(label, command)
        };

        let mut batch = Vec::with_capacity(queue.len() + 2);
        batch.push(Command::multi());
        batch.extend(queue.iter().map(|(_, command)| command.clone()));
        batch.push(Command::exec());

        let conn = self.transaction_conn()?;
        conn.send_batch(&batch).map_err(on_node("MULTI"))?;

        // A refused MULTI leaves the queued replies and EXEC's unread
        if let Err(err) = conn.read_reply().and_then(Reply::into_ok) {
            conn.mark_broken();
            return Err(on_node("MULTI")(err));
        }

        let mut rejected = None;
        for (_, command) in queue {
            match conn.read_reply().map_err(on_node(command.name()))? {
                Reply::Status(ref status) if status == "QUEUED" => {}
                Reply::Error(message) => {
                    tracing::debug!("{} rejected inside MULTI: {}", command.name(), message);
                    rejected.get_or_insert(message);
                }
                other => {
                    conn.mark_broken();
                    return Err(on_node(command.name())(KvError::UnexpectedReply {
                        expected: "QUEUED".to_string(),
                        reply: other.describe(),
                    }));
                }
            }
        }

        match conn.read_reply().map_err(on_node("EXEC"))? {
            Reply::MultiBulk(None) => {
                tracing::debug!("Transaction on {} aborted by WATCH", label);
                Err(KvError::TransactionAborted)
            }
            Reply::Error(message) => Err(on_node("EXEC")(KvError::Server(message))),
            Reply::MultiBulk(Some(replies)) if replies.len() == queue.len() => Ok(queue
                .iter()
                .zip(replies)
                .map(|((_, command), reply)| {
                    command.check_reply(reply).map_err(on_node(command.name()))
                })
                .collect()),
            other => {
                conn.mark_broken();
                let reply = match rejected {
                    Some(message) => format!("{} after rejected command: {}", other.describe(), message),
                    None => other.describe(),
                };
                Err(on_node("EXEC")(KvError::UnexpectedReply {
                    expected: format!("{} transaction replies", queue.len()),
                    reply,
                }))
            }
        }
    }

    /// Drop the transaction queue, releasing any WATCH
    pub fn abort(&mut self) -> Result<()> {
        self.expect_mode(Mode::Transaction, "DISCARD")?;
        self.mode = Mode::Direct;
        self.queue.clear();

        let state = mem::take(&mut self.transaction);
        if let (true, Some(mut conn)) = (state.watching, state.conn) {
            let label = conn.node().to_string();
            conn.execute(&Command::unwatch())
                .map_err(|e| e.on_node(label, "UNWATCH"))?;
        }
        Ok(())
    }

    // =========================================================================
    // Mode Machine
    // =========================================================================

    fn enter(&mut self, mode: Mode) -> Result<()> {
        if self.mode != Mode::Direct {
            return Err(KvError::InvalidState(format!(
                "cannot enter {:?} while in {:?}",
                mode, self.mode
            )));
        }
        self.mode = mode;
        Ok(())
    }

    fn expect_mode(&self, mode: Mode, operation: &str) -> Result<()> {
        if self.mode != mode {
            return Err(KvError::InvalidState(format!(
                "{} requires {:?} mode, session is in {:?}",
                operation, mode, self.mode
            )));
        }
        Ok(())
    }
}

impl Drop for ExecutionEngine {
    fn drop(&mut self) {
        if self.mode == Mode::Transaction {
            if let Err(e) = self.abort() {
                tracing::warn!("Failed to abort transaction on drop: {}", e);
            }
        }
    }
}
