//! Client
//!
//! Typed command facade over one execution session.
//!
//! ## Usage
//! ```no_run
//! use kvring::{Batch, Client, ClientConfig, NodeConfig};
//!
//! let config = ClientConfig::builder()
//!     .node(NodeConfig::new("a", "127.0.0.1:6379"))
//!     .node(NodeConfig::new("b", "127.0.0.1:6380"))
//!     .build();
//! let mut client = Client::new(config)?;
//!
//! client.set("user:1", "alice")?;
//! assert_eq!(client.get("user:1")?.as_deref(), Some(&b"alice"[..]));
//!
//! let mut pipe = client.pipeline()?;
//! pipe.set("k1", "v1")?.incr("counter")?.get("k1")?;
//! let replies = pipe.flush()?;
//! # Ok::<(), kvring::KvError>(())
//! ```
//!
//! ## Sessions
//! A `Client` is one session: its own db, pins and pipeline/transaction
//! state. `clone()` opens a fresh session over the same nodes; use one per
//! thread.

use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use bytes::Bytes;

use crate::cluster::{Node, NodePool};
use crate::config::ClientConfig;
use crate::engine::ExecutionEngine;
use crate::error::{KvError, Result};
use crate::protocol::{Command, CommandKind, Reply};
use crate::stats::ServerStats;
use crate::transform::KeyTransformer;

/// A client session
pub struct Client {
    engine: ExecutionEngine,
}

impl Clone for Client {
    /// New session sharing the node pool; keeps the db, drops pins and queues
    fn clone(&self) -> Self {
        Self {
            engine: ExecutionEngine::with_db(Arc::clone(self.engine.pool()), self.engine.db()),
        }
    }
}

impl Client {
    /// Connect to the configured nodes
    ///
    /// No socket is opened until the first command.
    pub fn new(config: ClientConfig) -> Result<Self> {
        Self::from_pool(NodePool::new(&config, None)?)
    }

    /// Like `new`, rewriting every key with `transformer`
    pub fn with_key_transformer(
        config: ClientConfig,
        transformer: impl KeyTransformer + 'static,
    ) -> Result<Self> {
        Self::from_pool(NodePool::new(&config, Some(Arc::new(transformer)))?)
    }

    /// Wrap a prepared node pool and start its health monitor
    pub fn from_pool(pool: NodePool) -> Result<Self> {
        let pool = Arc::new(pool);
        pool.start()?;
        Ok(Self {
            engine: ExecutionEngine::new(pool),
        })
    }

    pub fn pool(&self) -> &Arc<NodePool> {
        self.engine.pool()
    }

    /// Stop health probing and close idle sockets for every session
    pub fn shutdown(&self) {
        self.engine.pool().shutdown();
    }

    // =========================================================================
    // Session
    // =========================================================================

    pub fn db(&self) -> u32 {
        self.engine.db()
    }

    /// Switch this session's database
    ///
    /// Sockets are switched with SELECT lazily, when next acquired.
    pub fn select(&mut self, db: u32) -> Result<()> {
        self.engine.select(db)
    }

    /// Node a key is routed to (the pinned node while a scope is open)
    pub fn node_for_key(&self, key: impl AsRef<[u8]>) -> Result<Arc<Node>> {
        let key = self.key(key);
        self.engine.node_for_key(&key)
    }

    pub fn node_by_alias(&self, alias: &str) -> Option<Arc<Node>> {
        self.engine.pool().node_by_alias(alias)
    }

    /// All configured nodes, live or not
    pub fn servers(&self) -> Vec<Arc<Node>> {
        self.engine.pool().servers().to_vec()
    }

    /// Route every command to `alias` until the returned scope drops
    ///
    /// Scopes nest; dropping one restores the previous pin.
    pub fn on(&mut self, alias: &str) -> Result<NodeScope<'_>> {
        let node = self
            .node_by_alias(alias)
            .ok_or_else(|| KvError::Config(format!("unknown node alias '{}'", alias)))?;
        self.engine.push_pin(node)?;
        Ok(NodeScope { client: self })
    }

    /// Queue commands and send them per node in one batch on `flush`
    pub fn pipeline(&mut self) -> Result<Pipeline<'_>> {
        self.engine.begin_pipeline()?;
        Ok(Pipeline {
            client: self,
            finished: false,
        })
    }

    /// Queue commands into a MULTI/EXEC block on a single node
    pub fn transaction(&mut self) -> Result<Transaction<'_>> {
        self.engine.begin_transaction()?;
        Ok(Transaction {
            client: self,
            finished: false,
        })
    }

    // =========================================================================
    // Plumbing
    // =========================================================================

    fn key(&self, key: impl AsRef<[u8]>) -> Bytes {
        self.engine.pool().transform_key(key.as_ref())
    }

    fn keys_of<I, T>(&self, keys: I) -> Vec<Bytes>
    where
        I: IntoIterator<Item = T>,
        T: AsRef<[u8]>,
    {
        keys.into_iter().map(|key| self.key(key)).collect()
    }

    fn prepare(&self, command: Command) -> Command {
        let pool = Arc::clone(self.engine.pool());
        command.map_keys(|key| pool.transform_key(key))
    }

    /// Run any command: keys are transformed, then routed
    ///
    /// Commands without keys (including `Command::custom`) need a pinned node.
    pub fn command(&mut self, command: Command) -> Result<Reply> {
        let command = self.prepare(command);
        let node = self.engine.route(&command)?;
        self.engine.execute(&node, &command)
    }

    fn command_unit(&mut self, command: Command) -> Result<()> {
        let command = self.prepare(command);
        let node = self.engine.route(&command)?;
        self.engine.execute_unit(&node, &command)
    }

    fn enqueue(&mut self, command: Command) -> Result<()> {
        let command = self.prepare(command);
        let node = self.engine.route(&command)?;
        self.engine.enqueue_or_execute(node, command)?;
        Ok(())
    }

    /// Pinned node, or every live node
    fn broadcast_targets(&self) -> Result<Vec<Arc<Node>>> {
        if let Some(node) = self.engine.pinned() {
            return Ok(vec![Arc::clone(node)]);
        }
        let live = self.engine.pool().live_servers();
        if live.is_empty() {
            return Err(KvError::Config("no live nodes available".to_string()));
        }
        Ok(live)
    }

    fn broadcast(&self, command: &Command) -> Result<Vec<(Arc<Node>, Reply)>> {
        self.broadcast_targets()?
            .into_iter()
            .map(|node| -> Result<(Arc<Node>, Reply)> {
                let reply = self.engine.execute(&node, command)?;
                Ok((node, reply))
            })
            .collect()
    }

    fn broadcast_unit(&self, command: &Command) -> Result<()> {
        for node in self.broadcast_targets()? {
            self.engine.execute_unit(&node, command)?;
        }
        Ok(())
    }

    /// Group transformed keys by node, in first-seen order
    fn group_by_node(&self, keys: &[Bytes]) -> Result<Vec<(Arc<Node>, Vec<usize>)>> {
        let mut groups: Vec<(Arc<Node>, Vec<usize>)> = Vec::new();
        for (index, key) in keys.iter().enumerate() {
            let node = self.engine.node_for_key(key)?;
            match groups.iter_mut().find(|(n, _)| Arc::ptr_eq(n, &node)) {
                Some((_, indices)) => indices.push(index),
                None => groups.push((node, vec![index])),
            }
        }
        Ok(groups)
    }

    // =========================================================================
    // Connection
    // =========================================================================

    /// PING every live node (or the pinned one)
    pub fn ping(&mut self) -> Result<()> {
        self.broadcast(&Command::ping()).map(|_| ())
    }

    /// ECHO on the pinned node, else the first live node
    pub fn echo(&mut self, message: impl AsRef<[u8]>) -> Result<Bytes> {
        let command = Command::echo(message);
        let node = match self.engine.pinned() {
            Some(node) => Arc::clone(node),
            None => self
                .engine
                .pool()
                .live_servers()
                .into_iter()
                .next()
                .ok_or_else(|| KvError::Config("no live nodes available".to_string()))?,
        };
        self.engine
            .execute(&node, &command)?
            .into_bulk()?
            .ok_or_else(|| KvError::UnexpectedReply {
                expected: "echoed bulk".to_string(),
                reply: "$-1".to_string(),
            })
    }

    // =========================================================================
    // Keyspace
    // =========================================================================

    pub fn exists(&mut self, key: impl AsRef<[u8]>) -> Result<bool> {
        self.command(Command::exists(key))?.into_bool()
    }

    /// Delete keys wherever they live; returns how many existed
    pub fn del<I, T>(&mut self, keys: I) -> Result<i64>
    where
        I: IntoIterator<Item = T>,
        T: AsRef<[u8]>,
    {
        let keys = self.keys_of(keys);
        let mut removed = 0;
        for (node, indices) in self.group_by_node(&keys)? {
            let command = Command::del(indices.iter().map(|&i| &keys[i]));
            removed += self.engine.execute(&node, &command)?.into_integer()?;
        }
        Ok(removed)
    }

    pub fn key_type(&mut self, key: impl AsRef<[u8]>) -> Result<String> {
        self.command(Command::key_type(key))?.into_status()
    }

    /// KEYS on every live node, concatenated
    ///
    /// Returned keys are as stored, i.e. after key transformation.
    pub fn keys(&mut self, pattern: impl AsRef<[u8]>) -> Result<Vec<Bytes>> {
        let command = Command::keys_matching(pattern);
        let mut all = Vec::new();
        for (_, reply) in self.broadcast(&command)? {
            all.extend(reply.into_bytes_list()?);
        }
        Ok(all)
    }

    pub fn rename(&mut self, key: impl AsRef<[u8]>, new_key: impl AsRef<[u8]>) -> Result<()> {
        self.command_unit(Command::rename(key, new_key))
    }

    pub fn rename_nx(&mut self, key: impl AsRef<[u8]>, new_key: impl AsRef<[u8]>) -> Result<bool> {
        self.command(Command::rename_nx(key, new_key))?.into_bool()
    }

    pub fn expire(&mut self, key: impl AsRef<[u8]>, seconds: u64) -> Result<bool> {
        self.command(Command::expire(key, seconds))?.into_bool()
    }

    /// Seconds to live; negative when the key has no expiry or does not exist
    pub fn ttl(&mut self, key: impl AsRef<[u8]>) -> Result<i64> {
        self.command(Command::ttl(key))?.into_integer()
    }

    // =========================================================================
    // Strings
    // =========================================================================

    pub fn get(&mut self, key: impl AsRef<[u8]>) -> Result<Option<Bytes>> {
        self.command(Command::get(key))?.into_bulk()
    }

    pub fn set(&mut self, key: impl AsRef<[u8]>, value: impl AsRef<[u8]>) -> Result<()> {
        self.command_unit(Command::set(key, value))
    }

    pub fn set_nx(&mut self, key: impl AsRef<[u8]>, value: impl AsRef<[u8]>) -> Result<bool> {
        self.command(Command::set_nx(key, value))?.into_bool()
    }

    pub fn get_set(
        &mut self,
        key: impl AsRef<[u8]>,
        value: impl AsRef<[u8]>,
    ) -> Result<Option<Bytes>> {
        self.command(Command::get_set(key, value))?.into_bulk()
    }

    /// Values in request order; keys may span nodes
    pub fn mget<I, T>(&mut self, keys: I) -> Result<Vec<Option<Bytes>>>
    where
        I: IntoIterator<Item = T>,
        T: AsRef<[u8]>,
    {
        let keys = self.keys_of(keys);
        let mut values: Vec<Option<Bytes>> = vec![None; keys.len()];
        for (node, indices) in self.group_by_node(&keys)? {
            let command = Command::mget(indices.iter().map(|&i| &keys[i]));
            let found = self.engine.execute(&node, &command)?.into_bulk_list()?;
            if found.len() != indices.len() {
                return Err(KvError::UnexpectedReply {
                    expected: format!("{} values", indices.len()),
                    reply: format!("{} values", found.len()),
                }
                .on_node(node.label(), "MGET"));
            }
            for (index, value) in indices.into_iter().zip(found) {
                values[index] = value;
            }
        }
        Ok(values)
    }

    /// Set several keys; each node receives one MSET with its share
    pub fn mset<I, K, V>(&mut self, pairs: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<[u8]>,
        V: AsRef<[u8]>,
    {
        let (keys, values): (Vec<Bytes>, Vec<Bytes>) = pairs
            .into_iter()
            .map(|(key, value)| (self.key(key), Bytes::copy_from_slice(value.as_ref())))
            .unzip();
        for (node, indices) in self.group_by_node(&keys)? {
            let command = Command::mset(indices.iter().map(|&i| (&keys[i], &values[i])));
            self.engine.execute_unit(&node, &command)?;
        }
        Ok(())
    }

    /// Set all keys only if none exists; every key must live on one node
    pub fn mset_nx<I, K, V>(&mut self, pairs: I) -> Result<bool>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<[u8]>,
        V: AsRef<[u8]>,
    {
        self.command(Command::mset_nx(pairs))?.into_bool()
    }

    pub fn incr(&mut self, key: impl AsRef<[u8]>) -> Result<i64> {
        self.command(Command::incr(key))?.into_integer()
    }

    pub fn incr_by(&mut self, key: impl AsRef<[u8]>, delta: i64) -> Result<i64> {
        self.command(Command::incr_by(key, delta))?.into_integer()
    }

    pub fn decr(&mut self, key: impl AsRef<[u8]>) -> Result<i64> {
        self.command(Command::decr(key))?.into_integer()
    }

    pub fn decr_by(&mut self, key: impl AsRef<[u8]>, delta: i64) -> Result<i64> {
        self.command(Command::decr_by(key, delta))?.into_integer()
    }

    /// Returns the new length
    pub fn append(&mut self, key: impl AsRef<[u8]>, value: impl AsRef<[u8]>) -> Result<i64> {
        self.command(Command::append(key, value))?.into_integer()
    }

    // =========================================================================
    // Lists
    // =========================================================================

    pub fn lpush(&mut self, key: impl AsRef<[u8]>, value: impl AsRef<[u8]>) -> Result<i64> {
        self.command(Command::lpush(key, value))?.into_integer()
    }

    pub fn rpush(&mut self, key: impl AsRef<[u8]>, value: impl AsRef<[u8]>) -> Result<i64> {
        self.command(Command::rpush(key, value))?.into_integer()
    }

    pub fn llen(&mut self, key: impl AsRef<[u8]>) -> Result<i64> {
        self.command(Command::llen(key))?.into_integer()
    }

    pub fn lrange(&mut self, key: impl AsRef<[u8]>, start: i64, stop: i64) -> Result<Vec<Bytes>> {
        self.command(Command::lrange(key, start, stop))?.into_bytes_list()
    }

    pub fn lpop(&mut self, key: impl AsRef<[u8]>) -> Result<Option<Bytes>> {
        self.command(Command::lpop(key))?.into_bulk()
    }

    pub fn rpop(&mut self, key: impl AsRef<[u8]>) -> Result<Option<Bytes>> {
        self.command(Command::rpop(key))?.into_bulk()
    }

    /// Both lists must live on one node
    pub fn rpoplpush(
        &mut self,
        source: impl AsRef<[u8]>,
        destination: impl AsRef<[u8]>,
    ) -> Result<Option<Bytes>> {
        self.command(Command::rpoplpush(source, destination))?.into_bulk()
    }

    // =========================================================================
    // Sets
    // =========================================================================

    pub fn sadd(&mut self, key: impl AsRef<[u8]>, member: impl AsRef<[u8]>) -> Result<bool> {
        self.command(Command::sadd(key, member))?.into_bool()
    }

    pub fn srem(&mut self, key: impl AsRef<[u8]>, member: impl AsRef<[u8]>) -> Result<bool> {
        self.command(Command::srem(key, member))?.into_bool()
    }

    pub fn smembers(&mut self, key: impl AsRef<[u8]>) -> Result<Vec<Bytes>> {
        self.command(Command::smembers(key))?.into_bytes_list()
    }

    pub fn sismember(&mut self, key: impl AsRef<[u8]>, member: impl AsRef<[u8]>) -> Result<bool> {
        self.command(Command::sismember(key, member))?.into_bool()
    }

    pub fn scard(&mut self, key: impl AsRef<[u8]>) -> Result<i64> {
        self.command(Command::scard(key))?.into_integer()
    }

    /// Both sets must live on one node
    pub fn smove(
        &mut self,
        source: impl AsRef<[u8]>,
        destination: impl AsRef<[u8]>,
        member: impl AsRef<[u8]>,
    ) -> Result<bool> {
        self.command(Command::smove(source, destination, member))?
            .into_bool()
    }

    pub fn sinter<I, T>(&mut self, keys: I) -> Result<Vec<Bytes>>
    where
        I: IntoIterator<Item = T>,
        T: AsRef<[u8]>,
    {
        self.set_op(CommandKind::SInter, keys)
    }

    pub fn sunion<I, T>(&mut self, keys: I) -> Result<Vec<Bytes>>
    where
        I: IntoIterator<Item = T>,
        T: AsRef<[u8]>,
    {
        self.set_op(CommandKind::SUnion, keys)
    }

    pub fn sdiff<I, T>(&mut self, keys: I) -> Result<Vec<Bytes>>
    where
        I: IntoIterator<Item = T>,
        T: AsRef<[u8]>,
    {
        self.set_op(CommandKind::SDiff, keys)
    }

    pub fn sinterstore<I, T>(&mut self, destination: impl AsRef<[u8]>, keys: I) -> Result<i64>
    where
        I: IntoIterator<Item = T>,
        T: AsRef<[u8]>,
    {
        self.set_op_store(CommandKind::SInterStore, destination, keys)
    }

    pub fn sunionstore<I, T>(&mut self, destination: impl AsRef<[u8]>, keys: I) -> Result<i64>
    where
        I: IntoIterator<Item = T>,
        T: AsRef<[u8]>,
    {
        self.set_op_store(CommandKind::SUnionStore, destination, keys)
    }

    pub fn sdiffstore<I, T>(&mut self, destination: impl AsRef<[u8]>, keys: I) -> Result<i64>
    where
        I: IntoIterator<Item = T>,
        T: AsRef<[u8]>,
    {
        self.set_op_store(CommandKind::SDiffStore, destination, keys)
    }

    fn set_op<I, T>(&mut self, kind: CommandKind, keys: I) -> Result<Vec<Bytes>>
    where
        I: IntoIterator<Item = T>,
        T: AsRef<[u8]>,
    {
        self.command(Command::set_op(kind, keys))?.into_bytes_list()
    }

    fn set_op_store<I, T>(
        &mut self,
        kind: CommandKind,
        destination: impl AsRef<[u8]>,
        keys: I,
    ) -> Result<i64>
    where
        I: IntoIterator<Item = T>,
        T: AsRef<[u8]>,
    {
        self.command(Command::set_op_store(kind, destination, keys))?
            .into_integer()
    }

    // =========================================================================
    // Server
    // =========================================================================

    /// Total keys in the session db across live nodes
    pub fn dbsize(&mut self) -> Result<i64> {
        let mut total = 0;
        for (_, reply) in self.broadcast(&Command::dbsize())? {
            total += reply.into_integer()?;
        }
        Ok(total)
    }

    /// FLUSHDB on every live node
    pub fn flushdb(&mut self) -> Result<()> {
        self.broadcast_unit(&Command::flushdb())
    }

    /// FLUSHALL on every live node
    pub fn flushall(&mut self) -> Result<()> {
        self.broadcast_unit(&Command::flushall())
    }

    /// Raw INFO text per live node, as `(alias, text)`
    pub fn info(&mut self) -> Result<Vec<(String, String)>> {
        self.broadcast(&Command::info())?
            .into_iter()
            .map(|(node, reply)| -> Result<(String, String)> {
                let text = reply.into_bulk()?.unwrap_or_default();
                Ok((
                    node.alias().to_string(),
                    String::from_utf8_lossy(&text).into_owned(),
                ))
            })
            .collect()
    }

    pub fn stats(&mut self) -> Result<ServerStats> {
        Ok(ServerStats::from_info(self.info()?))
    }
}

// =============================================================================
// Node Scope
// =============================================================================

/// Pins the session to one node until dropped
pub struct NodeScope<'a> {
    client: &'a mut Client,
}

impl Deref for NodeScope<'_> {
    type Target = Client;

    fn deref(&self) -> &Client {
        &*self.client
    }
}

impl DerefMut for NodeScope<'_> {
    fn deref_mut(&mut self) -> &mut Client {
        &mut *self.client
    }
}

impl Drop for NodeScope<'_> {
    fn drop(&mut self) {
        self.client.engine.pop_pin();
    }
}

// =============================================================================
// Queued Commands
// =============================================================================

/// Typed builders shared by `Pipeline` and `Transaction`
///
/// Each call routes the command immediately (so clustering errors surface
/// at enqueue) and queues it.
pub trait Batch {
    /// Queue any command
    fn push(&mut self, command: Command) -> Result<&mut Self>;

    fn get(&mut self, key: impl AsRef<[u8]>) -> Result<&mut Self> {
        self.push(Command::get(key))
    }

    fn set(&mut self, key: impl AsRef<[u8]>, value: impl AsRef<[u8]>) -> Result<&mut Self> {
        self.push(Command::set(key, value))
    }

    fn set_nx(&mut self, key: impl AsRef<[u8]>, value: impl AsRef<[u8]>) -> Result<&mut Self> {
        self.push(Command::set_nx(key, value))
    }

    fn get_set(&mut self, key: impl AsRef<[u8]>, value: impl AsRef<[u8]>) -> Result<&mut Self> {
        self.push(Command::get_set(key, value))
    }

    fn exists(&mut self, key: impl AsRef<[u8]>) -> Result<&mut Self> {
        self.push(Command::exists(key))
    }

    fn del(&mut self, key: impl AsRef<[u8]>) -> Result<&mut Self> {
        self.push(Command::del([key]))
    }

    fn expire(&mut self, key: impl AsRef<[u8]>, seconds: u64) -> Result<&mut Self> {
        self.push(Command::expire(key, seconds))
    }

    fn incr(&mut self, key: impl AsRef<[u8]>) -> Result<&mut Self> {
        self.push(Command::incr(key))
    }

    fn incr_by(&mut self, key: impl AsRef<[u8]>, delta: i64) -> Result<&mut Self> {
        self.push(Command::incr_by(key, delta))
    }

    fn decr(&mut self, key: impl AsRef<[u8]>) -> Result<&mut Self> {
        self.push(Command::decr(key))
    }

    fn append(&mut self, key: impl AsRef<[u8]>, value: impl AsRef<[u8]>) -> Result<&mut Self> {
        self.push(Command::append(key, value))
    }

    fn lpush(&mut self, key: impl AsRef<[u8]>, value: impl AsRef<[u8]>) -> Result<&mut Self> {
        self.push(Command::lpush(key, value))
    }

    fn rpush(&mut self, key: impl AsRef<[u8]>, value: impl AsRef<[u8]>) -> Result<&mut Self> {
        self.push(Command::rpush(key, value))
    }

    fn sadd(&mut self, key: impl AsRef<[u8]>, member: impl AsRef<[u8]>) -> Result<&mut Self> {
        self.push(Command::sadd(key, member))
    }

    fn srem(&mut self, key: impl AsRef<[u8]>, member: impl AsRef<[u8]>) -> Result<&mut Self> {
        self.push(Command::srem(key, member))
    }
}

/// Commands queued for a batched send
///
/// Dropping the pipeline without `flush` discards the queue.
pub struct Pipeline<'a> {
    client: &'a mut Client,
    finished: bool,
}

impl Pipeline<'_> {
    /// Number of queued commands
    pub fn len(&self) -> usize {
        self.client.engine.queued()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Send the queue; one result per command, in enqueue order
    pub fn flush(mut self) -> Result<Vec<Result<Reply>>> {
        self.finished = true;
        self.client.engine.flush()
    }
}

impl Batch for Pipeline<'_> {
    fn push(&mut self, command: Command) -> Result<&mut Self> {
        self.client.enqueue(command)?;
        Ok(self)
    }
}

impl Drop for Pipeline<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.client.engine.discard_pipeline();
        }
    }
}

/// A MULTI/EXEC block bound to one node
///
/// Dropping the transaction without `commit` aborts it.
pub struct Transaction<'a> {
    client: &'a mut Client,
    finished: bool,
}

impl Transaction<'_> {
    /// WATCH keys on the transaction's node; sent immediately
    pub fn watch<I, T>(&mut self, keys: I) -> Result<&mut Self>
    where
        I: IntoIterator<Item = T>,
        T: AsRef<[u8]>,
    {
        let keys = self.client.keys_of(keys);
        self.client.engine.watch(&keys)?;
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.client.engine.queued()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run the queued commands atomically; one result per command
    pub fn commit(mut self) -> Result<Vec<Result<Reply>>> {
        self.finished = true;
        self.client.engine.commit()
    }

    /// Drop the queued commands and release any WATCH
    pub fn abort(mut self) -> Result<()> {
        self.finished = true;
        self.client.engine.abort()
    }
}

impl Batch for Transaction<'_> {
    fn push(&mut self, command: Command) -> Result<&mut Self> {
        self.client.enqueue(command)?;
        Ok(self)
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if !self.finished {
            if let Err(e) = self.client.engine.abort() {
                tracing::warn!("Failed to abort dropped transaction: {}", e);
            }
        }
    }
}
