//! Health Probing
//!
//! Decides node liveness and runs the background monitor that keeps the
//! ring in step with it.
//!
//! ## Monitor Loop
//! ```text
//! tick ──► probe_now() ──► set_alive(node, ok) ──► ring rebuilt on change
//!      └─► prune_idle() on every node pool
//! ```
//! The monitor holds only a `Weak` reference to the node pool and exits when
//! the pool is dropped or `shutdown` is signalled.

use std::sync::Weak;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{self, Sender};

use super::{Node, NodePool};
use crate::network::{Connection, SocketOptions};
use crate::protocol::{Command, Reply};

/// Decides whether a node is reachable
pub trait HealthProbe: Send + Sync {
    fn probe(&self, node: &Node) -> bool;
}

impl<F> HealthProbe for F
where
    F: Fn(&Node) -> bool + Send + Sync,
{
    fn probe(&self, node: &Node) -> bool {
        self(node)
    }
}

/// Default probe: PING over a fresh socket
///
/// The pool's sockets are left alone so a probe never competes with traffic.
#[derive(Debug, Clone, Copy)]
pub struct PingProbe {
    socket: SocketOptions,
}

impl PingProbe {
    pub fn new(socket: SocketOptions, timeout: Duration) -> Self {
        Self {
            socket: socket.bounded(timeout),
        }
    }
}

impl HealthProbe for PingProbe {
    fn probe(&self, node: &Node) -> bool {
        let mut conn = match Connection::connect(node.address(), &self.socket) {
            Ok(conn) => conn,
            Err(e) => {
                tracing::debug!("Probe of {} could not connect: {}", node, e);
                return false;
            }
        };

        if let Some(password) = node.password() {
            match conn.execute(&Command::auth(password)) {
                Ok(Reply::Status(ref status)) if status == "OK" => {}
                Ok(other) => {
                    tracing::debug!("Probe of {} rejected AUTH: {}", node, other.describe());
                    return false;
                }
                Err(e) => {
                    tracing::debug!("Probe of {} failed during AUTH: {}", node, e);
                    return false;
                }
            }
        }

        match conn.execute(&Command::ping()) {
            Ok(Reply::Status(ref status)) if status == "PONG" => true,
            Ok(other) => {
                tracing::debug!("Probe of {} got {}", node, other.describe());
                false
            }
            Err(e) => {
                tracing::debug!("Probe of {} failed: {}", node, e);
                false
            }
        }
    }
}

/// Background thread probing nodes at a fixed interval
pub(crate) struct HealthMonitor {
    shutdown: Sender<()>,
    handle: Option<JoinHandle<()>>,
}

impl HealthMonitor {
    pub(crate) fn spawn(pool: Weak<NodePool>, interval: Duration) -> std::io::Result<Self> {
        let (shutdown, shutdown_rx) = channel::bounded::<()>(1);
        let ticker = channel::tick(interval);

        let handle = thread::Builder::new()
            .name("kvring-health".to_string())
            .spawn(move || {
                tracing::debug!("Health monitor started ({:?} interval)", interval);
                loop {
                    channel::select! {
                        recv(shutdown_rx) -> _ => break,
                        recv(ticker) -> _ => {
                            let Some(pool) = pool.upgrade() else { break };
                            pool.probe_now();
                            pool.prune_idle();
                        }
                    }
                }
                tracing::debug!("Health monitor stopped");
            })?;

        Ok(Self {
            shutdown,
            handle: Some(handle),
        })
    }

    pub(crate) fn stop(&mut self) {
        let _ = self.shutdown.try_send(());
        if let Some(handle) = self.handle.take() {
            // The last pool reference may be dropped on the monitor thread itself
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

impl Drop for HealthMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}
