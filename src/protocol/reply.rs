//! Reply definitions
//!
//! Typed replies read back from a node.

use bytes::Bytes;

use crate::error::{KvError, Result};

/// A decoded server reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// `+OK`, `+PONG`, `+QUEUED`
    Status(String),

    /// `-ERR ...`
    Error(String),

    /// `:42`
    Integer(i64),

    /// `$5\r\nhello\r\n`; `None` for a `$-1` null
    Bulk(Option<Bytes>),

    /// `*2\r\n...`; `None` for a `*-1` null aggregate
    MultiBulk(Option<Vec<Reply>>),
}

impl Reply {
    /// `+OK`
    pub fn ok() -> Self {
        Reply::Status("OK".to_string())
    }

    /// Bulk reply holding a copy of `data`
    pub fn bulk(data: impl AsRef<[u8]>) -> Self {
        Reply::Bulk(Some(Bytes::copy_from_slice(data.as_ref())))
    }

    /// Null bulk or null multi-bulk
    pub fn is_null(&self) -> bool {
        matches!(self, Reply::Bulk(None) | Reply::MultiBulk(None))
    }

    /// Turn an error reply into `KvError::Server`.
    pub fn into_result(self) -> Result<Reply> {
        match self {
            Reply::Error(message) => Err(KvError::Server(message)),
            reply => Ok(reply),
        }
    }

    pub fn into_status(self) -> Result<String> {
        match self.into_result()? {
            Reply::Status(text) => Ok(text),
            other => Err(other.unexpected("status")),
        }
    }

    /// Succeeds only for `+OK`.
    pub fn into_ok(self) -> Result<()> {
        match self.into_status()?.as_str() {
            "OK" => Ok(()),
            other => Err(KvError::UnexpectedReply {
                expected: "OK".to_string(),
                reply: other.to_string(),
            }),
        }
    }

    pub fn into_integer(self) -> Result<i64> {
        match self.into_result()? {
            Reply::Integer(value) => Ok(value),
            other => Err(other.unexpected("integer")),
        }
    }

    /// Integer replies where any positive value means "yes".
    pub fn into_bool(self) -> Result<bool> {
        Ok(self.into_integer()? > 0)
    }

    pub fn into_bulk(self) -> Result<Option<Bytes>> {
        match self.into_result()? {
            Reply::Bulk(data) => Ok(data),
            other => Err(other.unexpected("bulk")),
        }
    }

    /// Multi-bulk of nullable bulks (MGET style). A null aggregate is empty.
    pub fn into_bulk_list(self) -> Result<Vec<Option<Bytes>>> {
        match self.into_result()? {
            Reply::MultiBulk(None) => Ok(Vec::new()),
            Reply::MultiBulk(Some(items)) => items.into_iter().map(Reply::into_bulk).collect(),
            other => Err(other.unexpected("multi-bulk")),
        }
    }

    /// Multi-bulk of non-null bulks (SMEMBERS, KEYS, LRANGE).
    pub fn into_bytes_list(self) -> Result<Vec<Bytes>> {
        self.into_bulk_list()?
            .into_iter()
            .map(|item| {
                item.ok_or_else(|| KvError::UnexpectedReply {
                    expected: "non-null bulk".to_string(),
                    reply: "null".to_string(),
                })
            })
            .collect()
    }

    /// Multi-bulk of arbitrary nested replies; `None` for a null aggregate.
    pub fn into_multi_bulk(self) -> Result<Option<Vec<Reply>>> {
        match self.into_result()? {
            Reply::MultiBulk(items) => Ok(items),
            other => Err(other.unexpected("multi-bulk")),
        }
    }

    /// Short human-readable rendering used in error messages.
    pub fn describe(&self) -> String {
        match self {
            Reply::Status(text) => format!("+{}", text),
            Reply::Error(text) => format!("-{}", text),
            Reply::Integer(value) => format!(":{}", value),
            Reply::Bulk(None) => "$-1".to_string(),
            Reply::Bulk(Some(data)) => format!("${} bytes", data.len()),
            Reply::MultiBulk(None) => "*-1".to_string(),
            Reply::MultiBulk(Some(items)) => format!("*{} items", items.len()),
        }
    }

    fn unexpected(&self, expected: &str) -> KvError {
        KvError::UnexpectedReply {
            expected: expected.to_string(),
            reply: self.describe(),
        }
    }
}
