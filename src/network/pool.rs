//! Connection Pool
//!
//! Per-node pool of sockets with lazy session reconciliation.
//!
//! ## Responsibilities
//! - Reuse idle sockets, open new ones up to `max_total`
//! - Apply the exhaustion policy (block, grow or fail)
//! - Reconcile AUTH and SELECT before a socket is handed out
//! - Retire sockets whose framing can no longer be trusted
//!
//! ## Concurrency
//! The idle list lives behind a `parking_lot::Mutex` with a `Condvar` for
//! blocked acquirers. Sockets are opened and reconciled outside the lock.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use super::connection::{Connection, SocketOptions};
use crate::config::{ExhaustedPolicy, PoolConfig};
use crate::error::{KvError, Result};
use crate::protocol::{Command, Reply};

/// Snapshot of pool counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Sockets opened since the pool was created
    pub created: u64,
    /// Sockets closed (broken, overflow, pruned or shut down)
    pub retired: u64,
    /// Sockets waiting in the idle list
    pub idle: usize,
    /// Sockets currently checked out
    pub in_use: usize,
}

struct PoolState {
    idle: VecDeque<Connection>,
    /// Pooled sockets (idle + checked out), overflow excluded
    total: usize,
    in_use: usize,
    closed: bool,
}

/// Connection pool for a single node
pub struct ConnectionPool {
    /// `alias@address`, used in errors and logs
    label: String,
    address: String,
    password: Option<String>,
    config: PoolConfig,
    socket: SocketOptions,
    state: Mutex<PoolState>,
    available: Condvar,
    created: AtomicU64,
    retired: AtomicU64,
}

impl ConnectionPool {
    pub fn new(
        label: impl Into<String>,
        address: impl Into<String>,
        password: Option<String>,
        config: PoolConfig,
        socket: SocketOptions,
    ) -> Self {
        Self {
            label: label.into(),
            address: address.into(),
            password,
            config,
            socket,
            state: Mutex::new(PoolState {
                idle: VecDeque::new(),
                total: 0,
                in_use: 0,
                closed: false,
            }),
            available: Condvar::new(),
            created: AtomicU64::new(0),
            retired: AtomicU64::new(0),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Check out a socket authenticated and switched to `desired_db`
    ///
    /// A socket that fails reconciliation is retired and the error returned.
    pub fn acquire(self: &Arc<Self>, desired_db: u32) -> Result<PooledConnection> {
        let (conn, overflow) = self.checkout()?;
        let mut guard = PooledConnection {
            pool: Arc::clone(self),
            conn: Some(conn),
            broken: false,
            overflow,
        };

        if let Err(err) = guard.reconcile(self.password.as_deref(), desired_db) {
            guard.mark_broken();
            return Err(err);
        }

        Ok(guard)
    }

    fn checkout(&self) -> Result<(Connection, bool)> {
        let deadline = match self.config.on_exhausted {
            ExhaustedPolicy::Block { timeout_ms } => {
                Some(Instant::now() + Duration::from_millis(timeout_ms))
            }
            _ => None,
        };

        let mut state = self.state.lock();
        loop {
            if state.closed {
                return Err(KvError::InvalidState(format!("pool for {} is closed", self.label)));
            }

            // Most recently used first; stale sockets collect at the front for pruning
            if let Some(conn) = state.idle.pop_back() {
                state.in_use += 1;
                return Ok((conn, false));
            }

            if state.total < self.config.max_total {
                state.total += 1;
                state.in_use += 1;
                drop(state);
                return match self.open() {
                    Ok(conn) => Ok((conn, false)),
                    Err(err) => {
                        let mut state = self.state.lock();
                        state.total -= 1;
                        state.in_use -= 1;
                        self.available.notify_one();
                        Err(err)
                    }
                };
            }

            match self.config.on_exhausted {
                ExhaustedPolicy::Fail => {
                    return Err(KvError::PoolExhausted { node: self.label.clone() });
                }
                ExhaustedPolicy::Grow => {
                    state.in_use += 1;
                    drop(state);
                    tracing::debug!("Pool for {} exhausted, opening overflow socket", self.label);
                    return match self.open() {
                        Ok(conn) => Ok((conn, true)),
                        Err(err) => {
                            self.state.lock().in_use -= 1;
                            Err(err)
                        }
                    };
                }
                ExhaustedPolicy::Block { .. } => {
                    let Some(deadline) = deadline else {
                        return Err(KvError::PoolExhausted { node: self.label.clone() });
                    };
                    if self.available.wait_until(&mut state, deadline).timed_out()
                        && state.idle.is_empty()
                        && state.total >= self.config.max_total
                    {
                        return Err(KvError::PoolExhausted { node: self.label.clone() });
                    }
                }
            }
        }
    }

    fn open(&self) -> Result<Connection> {
        let conn = Connection::connect(&self.address, &self.socket)?;
        self.created.fetch_add(1, Ordering::Relaxed);
        Ok(conn)
    }

    fn release(&self, mut conn: Connection) {
        let mut state = self.state.lock();
        state.in_use -= 1;
        if state.closed {
            state.total -= 1;
            self.retired.fetch_add(1, Ordering::Relaxed);
        } else {
            conn.touch();
            state.idle.push_back(conn);
        }
        self.available.notify_one();
    }

    fn discard(&self, conn: Connection, overflow: bool) {
        let mut state = self.state.lock();
        state.in_use -= 1;
        if !overflow {
            state.total -= 1;
        }
        self.retired.fetch_add(1, Ordering::Relaxed);
        self.available.notify_one();
        drop(state);
        drop(conn);
    }

    /// Close idle sockets beyond `min_idle` that sat unused past `idle_timeout`
    ///
    /// Returns the number of sockets closed.
    pub fn prune_idle(&self) -> usize {
        let timeout = self.config.idle_timeout();
        let mut pruned = Vec::new();
        {
            let mut state = self.state.lock();
            while state.idle.len() > self.config.min_idle {
                match state.idle.front() {
                    Some(conn) if conn.idle_for() >= timeout => {}
                    _ => break,
                }
                if let Some(conn) = state.idle.pop_front() {
                    state.total -= 1;
                    pruned.push(conn);
                }
            }
        }

        if !pruned.is_empty() {
            self.retired.fetch_add(pruned.len() as u64, Ordering::Relaxed);
            tracing::debug!("Pruned {} idle connections to {}", pruned.len(), self.label);
        }
        pruned.len()
    }

    /// Close every idle socket; the pool keeps serving checkouts
    ///
    /// Returns the number of sockets closed.
    pub fn clear_idle(&self) -> usize {
        let drained = self.drain_idle(false);
        if !drained.is_empty() {
            tracing::debug!("Closed {} idle connections to {}", drained.len(), self.label);
        }
        drained.len()
    }

    /// Close every idle socket and refuse further checkouts
    ///
    /// Checked-out sockets are closed when their guards drop.
    pub fn close(&self) {
        self.drain_idle(true);
    }

    fn drain_idle(&self, close: bool) -> Vec<Connection> {
        let drained: Vec<Connection> = {
            let mut state = self.state.lock();
            if close {
                state.closed = true;
            }
            let drained: Vec<Connection> = state.idle.drain(..).collect();
            state.total -= drained.len();
            drained
        };
        self.retired.fetch_add(drained.len() as u64, Ordering::Relaxed);
        // Freed capacity may unblock waiters
        self.available.notify_all();
        drained
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.state.lock();
        PoolStats {
            created: self.created.load(Ordering::Relaxed),
            retired: self.retired.load(Ordering::Relaxed),
            idle: state.idle.len(),
            in_use: state.in_use,
        }
    }
}

// =============================================================================
// PooledConnection
// =============================================================================

/// A checked-out socket
///
/// Dropping the guard returns the socket to its pool, unless it was marked
/// broken or is an overflow socket, in which case it is closed.
pub struct PooledConnection {
    pool: Arc<ConnectionPool>,
    conn: Option<Connection>,
    broken: bool,
    overflow: bool,
}

impl PooledConnection {
    fn conn(&mut self) -> Result<&mut Connection> {
        self.conn
            .as_mut()
            .ok_or_else(|| KvError::InvalidState("connection already released".to_string()))
    }

    fn reconcile(&mut self, password: Option<&str>, desired_db: u32) -> Result<()> {
        let label = self.pool.label.clone();
        let conn = self.conn()?;

        if let Some(password) = password {
            if !conn.is_authorized() {
                match conn.execute(&Command::auth(password))? {
                    Reply::Status(ref status) if status == "OK" => conn.set_authorized(),
                    other => {
                        tracing::warn!("AUTH rejected by {}: {}", label, other.describe());
                        return Err(KvError::Authentication { node: label });
                    }
                }
            }
        }

        if conn.current_db() != desired_db {
            conn.execute(&Command::select(desired_db))?.into_ok()?;
            conn.set_current_db(desired_db);
            tracing::debug!("Switched connection to {} to db {}", label, desired_db);
        }

        Ok(())
    }

    /// Send one command and read its checked reply
    ///
    /// Error replies become `KvError::Server` without retiring the socket.
    pub fn execute(&mut self, command: &Command) -> Result<Reply> {
        let reply = {
            let conn = self.conn()?;
            conn.execute(command)
        };
        let reply = self.track(reply)?;
        command.check_reply(reply)
    }

    /// Write several commands with one flush; replies are read separately
    pub fn send_batch(&mut self, commands: &[Command]) -> Result<()> {
        let sent = self.conn()?.send_batch(commands);
        self.track(sent)
    }

    /// Read the next raw reply (error replies are returned, not raised)
    pub fn read_reply(&mut self) -> Result<Reply> {
        let reply = self.conn()?.read_reply();
        self.track(reply)
    }

    fn track<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(ref err) = result {
            if err.is_connection_fatal() {
                self.mark_broken();
            }
        }
        result
    }

    /// Close the socket instead of pooling it on drop
    pub fn mark_broken(&mut self) {
        self.broken = true;
    }

    pub fn is_broken(&self) -> bool {
        self.broken
    }

    /// Explicitly close the socket
    pub fn retire(mut self) {
        self.mark_broken();
    }

    pub fn current_db(&self) -> Option<u32> {
        self.conn.as_ref().map(Connection::current_db)
    }

    pub fn node(&self) -> &str {
        &self.pool.label
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            if self.broken {
                tracing::warn!("Retiring connection to {}", self.pool.label);
                self.pool.discard(conn, self.overflow);
            } else if self.overflow {
                tracing::debug!("Closing overflow connection to {}", self.pool.label);
                self.pool.discard(conn, true);
            } else {
                self.pool.release(conn);
            }
        }
    }
}
