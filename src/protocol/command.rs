//! Command definitions
//!
//! A command is an immutable request descriptor: a kind from a closed set plus
//! its ordered binary arguments. The kind decides the wire name, which
//! arguments are keys, which keys must share a node, and the reply shape.

use std::borrow::Cow;

use bytes::Bytes;

use super::Reply;
use crate::error::{KvError, Result};

/// Command kinds understood by the client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    // Connection
    Ping,
    Echo,
    Auth,
    Select,
    Quit,

    // Keyspace
    Exists,
    Del,
    Type,
    Keys,
    Rename,
    RenameNx,
    Expire,
    Ttl,

    // Strings
    Get,
    Set,
    SetNx,
    GetSet,
    MGet,
    MSet,
    MSetNx,
    Incr,
    IncrBy,
    Decr,
    DecrBy,
    Append,

    // Lists
    LPush,
    RPush,
    LLen,
    LRange,
    LPop,
    RPop,
    RPopLPush,

    // Sets
    SAdd,
    SRem,
    SMembers,
    SIsMember,
    SCard,
    SMove,
    SInter,
    SInterStore,
    SUnion,
    SUnionStore,
    SDiff,
    SDiffStore,

    // Server
    Info,
    DbSize,
    FlushDb,
    FlushAll,

    // Transactions
    Multi,
    Exec,
    Discard,
    Watch,
    Unwatch,

    /// Any other command, sent verbatim with an unchecked reply
    Custom,
}

/// Reply type a command is expected to produce
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyShape {
    Status,
    Integer,
    Bulk,
    MultiBulk,
    Any,
}

/// Which arguments are keys
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyLayout {
    None,
    First,
    FirstTwo,
    All,
    /// key, value, key, value, ...
    Pairs,
}

/// Which keys must resolve to the same node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Colocation {
    /// At most one key, or keys are independent
    None,
    /// Every key on one node
    Keys,
    /// `args[0]` is the destination, the rest are sources
    DestinationFirst,
    /// `args[1]` is the destination, `args[0]` the source
    DestinationSecond,
}

impl CommandKind {
    /// Wire name of the command
    pub fn name(self) -> &'static str {
        use CommandKind::*;
        match self {
            Ping => "PING",
            Echo => "ECHO",
            Auth => "AUTH",
            Select => "SELECT",
            Quit => "QUIT",
            Exists => "EXISTS",
            Del => "DEL",
            Type => "TYPE",
            Keys => "KEYS",
            Rename => "RENAME",
            RenameNx => "RENAMENX",
            Expire => "EXPIRE",
            Ttl => "TTL",
            Get => "GET",
            Set => "SET",
            SetNx => "SETNX",
            GetSet => "GETSET",
            MGet => "MGET",
            MSet => "MSET",
            MSetNx => "MSETNX",
            Incr => "INCR",
            IncrBy => "INCRBY",
            Decr => "DECR",
            DecrBy => "DECRBY",
            Append => "APPEND",
            LPush => "LPUSH",
            RPush => "RPUSH",
            LLen => "LLEN",
            LRange => "LRANGE",
            LPop => "LPOP",
            RPop => "RPOP",
            RPopLPush => "RPOPLPUSH",
            SAdd => "SADD",
            SRem => "SREM",
            SMembers => "SMEMBERS",
            SIsMember => "SISMEMBER",
            SCard => "SCARD",
            SMove => "SMOVE",
            SInter => "SINTER",
            SInterStore => "SINTERSTORE",
            SUnion => "SUNION",
            SUnionStore => "SUNIONSTORE",
            SDiff => "SDIFF",
            SDiffStore => "SDIFFSTORE",
            Info => "INFO",
            DbSize => "DBSIZE",
            FlushDb => "FLUSHDB",
            FlushAll => "FLUSHALL",
            Multi => "MULTI",
            Exec => "EXEC",
            Discard => "DISCARD",
            Watch => "WATCH",
            Unwatch => "UNWATCH",
            Custom => "CUSTOM",
        }
    }

    pub fn reply_shape(self) -> ReplyShape {
        use CommandKind::*;
        match self {
            Ping | Auth | Select | Quit | Type | Rename | Set | MSet | FlushDb | FlushAll
            | Multi | Discard | Watch | Unwatch => ReplyShape::Status,
            Exists | Del | RenameNx | Expire | Ttl | SetNx | MSetNx | Incr | IncrBy | Decr
            | DecrBy | Append | LPush | RPush | LLen | SAdd | SRem | SIsMember | SCard | SMove
            | SInterStore | SUnionStore | SDiffStore | DbSize => ReplyShape::Integer,
            Echo | Get | GetSet | LPop | RPop | RPopLPush | Info => ReplyShape::Bulk,
            Keys | MGet | LRange | SMembers | SInter | SUnion | SDiff | Exec => {
                ReplyShape::MultiBulk
            }
            Custom => ReplyShape::Any,
        }
    }

    pub fn key_layout(self) -> KeyLayout {
        use CommandKind::*;
        match self {
            Ping | Echo | Auth | Select | Quit | Keys | Info | DbSize | FlushDb | FlushAll
            | Multi | Exec | Discard | Unwatch | Custom => KeyLayout::None,
            Exists | Type | Expire | Ttl | Get | Set | SetNx | GetSet | Incr | IncrBy | Decr
            | DecrBy | Append | LPush | RPush | LLen | LRange | LPop | RPop | SAdd | SRem
            | SMembers | SIsMember | SCard => KeyLayout::First,
            Rename | RenameNx | RPopLPush | SMove => KeyLayout::FirstTwo,
            Del | MGet | SInter | SInterStore | SUnion | SUnionStore | SDiff | SDiffStore
            | Watch => KeyLayout::All,
            MSet | MSetNx => KeyLayout::Pairs,
        }
    }

    pub fn colocation(self) -> Colocation {
        use CommandKind::*;
        match self {
            Del | MGet | MSet | MSetNx | SInter | SUnion | SDiff | Watch => Colocation::Keys,
            SInterStore | SUnionStore | SDiffStore => Colocation::DestinationFirst,
            Rename | RenameNx | RPopLPush | SMove => Colocation::DestinationSecond,
            _ => Colocation::None,
        }
    }
}

/// An immutable request descriptor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    kind: CommandKind,
    name: Cow<'static, str>,
    args: Vec<Bytes>,
}

fn arg(value: impl AsRef<[u8]>) -> Bytes {
    Bytes::copy_from_slice(value.as_ref())
}

fn int_arg(value: i64) -> Bytes {
    Bytes::from(value.to_string())
}

fn args_of<I, T>(values: I) -> Vec<Bytes>
where
    I: IntoIterator<Item = T>,
    T: AsRef<[u8]>,
{
    values.into_iter().map(arg).collect()
}

impl Command {
    /// Build a command of a known kind from raw arguments
    pub fn new(kind: CommandKind, args: Vec<Bytes>) -> Self {
        Self {
            kind,
            name: Cow::Borrowed(kind.name()),
            args,
        }
    }

    /// Build a command the client has no dedicated kind for.
    ///
    /// Custom commands carry no routing keys, so they must be sent to an
    /// explicit node.
    pub fn custom<I, T>(name: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: AsRef<[u8]>,
    {
        Self {
            kind: CommandKind::Custom,
            name: Cow::Owned(name.into().to_ascii_uppercase()),
            args: args_of(args),
        }
    }

    pub fn kind(&self) -> CommandKind {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn args(&self) -> &[Bytes] {
        &self.args
    }

    fn is_key_position(&self, index: usize) -> bool {
        match self.kind.key_layout() {
            KeyLayout::None => false,
            KeyLayout::First => index == 0,
            KeyLayout::FirstTwo => index < 2,
            KeyLayout::All => true,
            KeyLayout::Pairs => index % 2 == 0,
        }
    }

    /// Arguments that are keys, in argument order
    pub fn keys(&self) -> Vec<&Bytes> {
        self.args
            .iter()
            .enumerate()
            .filter(|(index, _)| self.is_key_position(*index))
            .map(|(_, key)| key)
            .collect()
    }

    /// Split keys into (destination, sources) per the kind's co-location rule
    pub fn destination_and_sources(&self) -> (Option<&Bytes>, Vec<&Bytes>) {
        let keys = self.keys();
        match self.kind.colocation() {
            Colocation::DestinationFirst if !keys.is_empty() => {
                (Some(keys[0]), keys[1..].to_vec())
            }
            Colocation::DestinationSecond if keys.len() >= 2 => (Some(keys[1]), vec![keys[0]]),
            _ => (None, keys),
        }
    }

    /// Rewrite every key argument with `transform`
    pub fn map_keys<F>(mut self, transform: F) -> Self
    where
        F: Fn(&[u8]) -> Bytes,
    {
        for index in 0..self.args.len() {
            if self.is_key_position(index) {
                self.args[index] = transform(&self.args[index]);
            }
        }
        self
    }

    /// Validate a reply against the expected shape.
    ///
    /// Error replies become `KvError::Server`.
    pub fn check_reply(&self, reply: Reply) -> Result<Reply> {
        let reply = reply.into_result()?;
        let matches = match (self.kind.reply_shape(), &reply) {
            (ReplyShape::Any, _) => true,
            (ReplyShape::Status, Reply::Status(_)) => true,
            (ReplyShape::Integer, Reply::Integer(_)) => true,
            (ReplyShape::Bulk, Reply::Bulk(_)) => true,
            (ReplyShape::MultiBulk, Reply::MultiBulk(_)) => true,
            _ => false,
        };
        if matches {
            Ok(reply)
        } else {
            Err(KvError::UnexpectedReply {
                expected: format!("{:?} reply to {}", self.kind.reply_shape(), self.name),
                reply: reply.describe(),
            })
        }
    }

    // =========================================================================
    // Constructors
    // =========================================================================

    pub fn ping() -> Self {
        Self::new(CommandKind::Ping, Vec::new())
    }

    pub fn echo(message: impl AsRef<[u8]>) -> Self {
        Self::new(CommandKind::Echo, vec![arg(message)])
    }

    pub fn auth(password: impl AsRef<[u8]>) -> Self {
        Self::new(CommandKind::Auth, vec![arg(password)])
    }

    pub fn select(db: u32) -> Self {
        Self::new(CommandKind::Select, vec![int_arg(db as i64)])
    }

    pub fn quit() -> Self {
        Self::new(CommandKind::Quit, Vec::new())
    }

    pub fn exists(key: impl AsRef<[u8]>) -> Self {
        Self::new(CommandKind::Exists, vec![arg(key)])
    }

    pub fn del<I, T>(keys: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: AsRef<[u8]>,
    {
        Self::new(CommandKind::Del, args_of(keys))
    }

    pub fn key_type(key: impl AsRef<[u8]>) -> Self {
        Self::new(CommandKind::Type, vec![arg(key)])
    }

    pub fn keys_matching(pattern: impl AsRef<[u8]>) -> Self {
        Self::new(CommandKind::Keys, vec![arg(pattern)])
    }

    pub fn rename(key: impl AsRef<[u8]>, new_key: impl AsRef<[u8]>) -> Self {
        Self::new(CommandKind::Rename, vec![arg(key), arg(new_key)])
    }

    pub fn rename_nx(key: impl AsRef<[u8]>, new_key: impl AsRef<[u8]>) -> Self {
        Self::new(CommandKind::RenameNx, vec![arg(key), arg(new_key)])
    }

    pub fn expire(key: impl AsRef<[u8]>, seconds: u64) -> Self {
        Self::new(CommandKind::Expire, vec![arg(key), Bytes::from(seconds.to_string())])
    }

    pub fn ttl(key: impl AsRef<[u8]>) -> Self {
        Self::new(CommandKind::Ttl, vec![arg(key)])
    }

    pub fn get(key: impl AsRef<[u8]>) -> Self {
        Self::new(CommandKind::Get, vec![arg(key)])
    }

    pub fn set(key: impl AsRef<[u8]>, value: impl AsRef<[u8]>) -> Self {
        Self::new(CommandKind::Set, vec![arg(key), arg(value)])
    }

    pub fn set_nx(key: impl AsRef<[u8]>, value: impl AsRef<[u8]>) -> Self {
        Self::new(CommandKind::SetNx, vec![arg(key), arg(value)])
    }

    pub fn get_set(key: impl AsRef<[u8]>, value: impl AsRef<[u8]>) -> Self {
        Self::new(CommandKind::GetSet, vec![arg(key), arg(value)])
    }

    pub fn mget<I, T>(keys: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: AsRef<[u8]>,
    {
        Self::new(CommandKind::MGet, args_of(keys))
    }

    pub fn mset<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<[u8]>,
        V: AsRef<[u8]>,
    {
        Self::new(CommandKind::MSet, pair_args(pairs))
    }

    pub fn mset_nx<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<[u8]>,
        V: AsRef<[u8]>,
    {
        Self::new(CommandKind::MSetNx, pair_args(pairs))
    }

    pub fn incr(key: impl AsRef<[u8]>) -> Self {
        Self::new(CommandKind::Incr, vec![arg(key)])
    }

    pub fn incr_by(key: impl AsRef<[u8]>, delta: i64) -> Self {
        Self::new(CommandKind::IncrBy, vec![arg(key), int_arg(delta)])
    }

    pub fn decr(key: impl AsRef<[u8]>) -> Self {
        Self::new(CommandKind::Decr, vec![arg(key)])
    }

    pub fn decr_by(key: impl AsRef<[u8]>, delta: i64) -> Self {
        Self::new(CommandKind::DecrBy, vec![arg(key), int_arg(delta)])
    }

    pub fn append(key: impl AsRef<[u8]>, value: impl AsRef<[u8]>) -> Self {
        Self::new(CommandKind::Append, vec![arg(key), arg(value)])
    }

    pub fn lpush(key: impl AsRef<[u8]>, value: impl AsRef<[u8]>) -> Self {
        Self::new(CommandKind::LPush, vec![arg(key), arg(value)])
    }

    pub fn rpush(key: impl AsRef<[u8]>, value: impl AsRef<[u8]>) -> Self {
        Self::new(CommandKind::RPush, vec![arg(key), arg(value)])
    }

    pub fn llen(key: impl AsRef<[u8]>) -> Self {
        Self::new(CommandKind::LLen, vec![arg(key)])
    }

    pub fn lrange(key: impl AsRef<[u8]>, start: i64, stop: i64) -> Self {
        Self::new(CommandKind::LRange, vec![arg(key), int_arg(start), int_arg(stop)])
    }

    pub fn lpop(key: impl AsRef<[u8]>) -> Self {
        Self::new(CommandKind::LPop, vec![arg(key)])
    }

    pub fn rpop(key: impl AsRef<[u8]>) -> Self {
        Self::new(CommandKind::RPop, vec![arg(key)])
    }

    pub fn rpoplpush(source: impl AsRef<[u8]>, destination: impl AsRef<[u8]>) -> Self {
        Self::new(CommandKind::RPopLPush, vec![arg(source), arg(destination)])
    }

    pub fn sadd(key: impl AsRef<[u8]>, member: impl AsRef<[u8]>) -> Self {
        Self::new(CommandKind::SAdd, vec![arg(key), arg(member)])
    }

    pub fn srem(key: impl AsRef<[u8]>, member: impl AsRef<[u8]>) -> Self {
        Self::new(CommandKind::SRem, vec![arg(key), arg(member)])
    }

    pub fn smembers(key: impl AsRef<[u8]>) -> Self {
        Self::new(CommandKind::SMembers, vec![arg(key)])
    }

    pub fn sismember(key: impl AsRef<[u8]>, member: impl AsRef<[u8]>) -> Self {
        Self::new(CommandKind::SIsMember, vec![arg(key), arg(member)])
    }

    pub fn scard(key: impl AsRef<[u8]>) -> Self {
        Self::new(CommandKind::SCard, vec![arg(key)])
    }

    pub fn smove(
        source: impl AsRef<[u8]>,
        destination: impl AsRef<[u8]>,
        member: impl AsRef<[u8]>,
    ) -> Self {
        Self::new(CommandKind::SMove, vec![arg(source), arg(destination), arg(member)])
    }

    /// One of SINTER / SUNION / SDIFF over `keys`
    pub fn set_op<I, T>(kind: CommandKind, keys: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: AsRef<[u8]>,
    {
        debug_assert!(matches!(
            kind,
            CommandKind::SInter | CommandKind::SUnion | CommandKind::SDiff
        ));
        Self::new(kind, args_of(keys))
    }

    /// One of SINTERSTORE / SUNIONSTORE / SDIFFSTORE into `destination`
    pub fn set_op_store<I, T>(kind: CommandKind, destination: impl AsRef<[u8]>, keys: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: AsRef<[u8]>,
    {
        debug_assert!(matches!(
            kind,
            CommandKind::SInterStore | CommandKind::SUnionStore | CommandKind::SDiffStore
        ));
        let mut args = vec![arg(destination)];
        args.extend(args_of(keys));
        Self::new(kind, args)
    }

    pub fn info() -> Self {
        Self::new(CommandKind::Info, Vec::new())
    }

    pub fn dbsize() -> Self {
        Self::new(CommandKind::DbSize, Vec::new())
    }

    pub fn flushdb() -> Self {
        Self::new(CommandKind::FlushDb, Vec::new())
    }

    pub fn flushall() -> Self {
        Self::new(CommandKind::FlushAll, Vec::new())
    }

    pub fn multi() -> Self {
        Self::new(CommandKind::Multi, Vec::new())
    }

    pub fn exec() -> Self {
        Self::new(CommandKind::Exec, Vec::new())
    }

    pub fn discard() -> Self {
        Self::new(CommandKind::Discard, Vec::new())
    }

    pub fn watch<I, T>(keys: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: AsRef<[u8]>,
    {
        Self::new(CommandKind::Watch, args_of(keys))
    }

    pub fn unwatch() -> Self {
        Self::new(CommandKind::Unwatch, Vec::new())
    }
}

fn pair_args<I, K, V>(pairs: I) -> Vec<Bytes>
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<[u8]>,
    V: AsRef<[u8]>,
{
    let mut args = Vec::new();
    for (key, value) in pairs {
        args.push(arg(key));
        args.push(arg(value));
    }
    args
}
