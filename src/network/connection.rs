//! Node Connection
//!
//! A buffered TCP socket to one node, plus the per-socket session state the
//! pool reconciles before handing it out.

use std::io::{BufReader, BufWriter, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

use crate::config::ClientConfig;
use crate::error::{KvError, Result};
use crate::protocol::{encode_command_into, read_reply, Command, Reply};

/// Socket-level settings shared by every connection to a node
#[derive(Debug, Clone, Copy, Default)]
pub struct SocketOptions {
    pub connect_timeout: Option<Duration>,
    pub read_timeout: Option<Duration>,
    pub write_timeout: Option<Duration>,
}

impl SocketOptions {
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            connect_timeout: config.connect_timeout(),
            read_timeout: config.read_timeout(),
            write_timeout: config.write_timeout(),
        }
    }

    /// Same options with every timeout bounded by `limit`
    pub fn bounded(self, limit: Duration) -> Self {
        let cap = |timeout: Option<Duration>| Some(timeout.map_or(limit, |t| t.min(limit)));
        Self {
            connect_timeout: cap(self.connect_timeout),
            read_timeout: cap(self.read_timeout),
            write_timeout: cap(self.write_timeout),
        }
    }
}

/// A single socket to a node
pub struct Connection {
    /// TCP stream reader (buffered for efficiency)
    reader: BufReader<TcpStream>,

    /// TCP stream writer (buffered for efficiency)
    writer: BufWriter<TcpStream>,

    /// Peer address for logging
    peer_addr: String,

    /// AUTH has succeeded on this socket
    is_authorized: bool,

    /// Database the socket last selected (servers start at 0)
    current_db: u32,

    /// Last time the socket went back to the idle list
    last_used: Instant,
}

impl Connection {
    /// Open a connection and apply the socket options
    pub fn connect(address: &str, options: &SocketOptions) -> Result<Self> {
        let stream = match options.connect_timeout {
            Some(timeout) => connect_with_timeout(address, timeout)?,
            None => TcpStream::connect(address)?,
        };

        // Disable Nagle's algorithm; pipelined batches are written in one go
        stream.set_nodelay(true)?;
        stream.set_read_timeout(options.read_timeout)?;
        stream.set_write_timeout(options.write_timeout)?;

        let peer_addr = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| address.to_string());

        // Clone stream for separate read/write handles
        let read_stream = stream.try_clone()?;

        tracing::debug!("Connected to {}", peer_addr);

        Ok(Self {
            reader: BufReader::new(read_stream),
            writer: BufWriter::new(stream),
            peer_addr,
            is_authorized: false,
            current_db: 0,
            last_used: Instant::now(),
        })
    }

    /// Write one command and flush
    pub fn send(&mut self, command: &Command) -> Result<()> {
        self.send_batch(std::slice::from_ref(command))
    }

    /// Write several commands with a single flush
    pub fn send_batch(&mut self, commands: &[Command]) -> Result<()> {
        let mut out = Vec::with_capacity(64 * commands.len());
        for command in commands {
            tracing::trace!("-> {} {} {:?}", self.peer_addr, command.name(), command.args());
            encode_command_into(command, &mut out);
        }
        self.writer.write_all(&out)?;
        self.writer.flush()?;
        Ok(())
    }

    /// Read the next reply, error replies included
    pub fn read_reply(&mut self) -> Result<Reply> {
        let reply = read_reply(&mut self.reader)?;
        tracing::trace!("<- {} {}", self.peer_addr, reply.describe());
        Ok(reply)
    }

    /// Send one command and read its raw reply
    pub fn execute(&mut self, command: &Command) -> Result<Reply> {
        self.send(command)?;
        self.read_reply()
    }

    pub fn is_authorized(&self) -> bool {
        self.is_authorized
    }

    pub fn set_authorized(&mut self) {
        self.is_authorized = true;
    }

    pub fn current_db(&self) -> u32 {
        self.current_db
    }

    pub fn set_current_db(&mut self, db: u32) {
        self.current_db = db;
    }

    pub(crate) fn touch(&mut self) {
        self.last_used = Instant::now();
    }

    pub(crate) fn idle_for(&self) -> Duration {
        self.last_used.elapsed()
    }

    /// Get the peer address string
    pub fn peer_addr(&self) -> &str {
        &self.peer_addr
    }
}

fn connect_with_timeout(address: &str, timeout: Duration) -> Result<TcpStream> {
    let mut last_err = None;
    for addr in address.to_socket_addrs()? {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(stream) => return Ok(stream),
            Err(err) => last_err = Some(err),
        }
    }
    Err(match last_err {
        Some(err) => KvError::Io(err),
        None => KvError::Config(format!("address {} did not resolve", address)),
    })
}
