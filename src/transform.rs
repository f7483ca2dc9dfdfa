//! Key Transformers
//!
//! A key transformer rewrites every key before it is hashed onto the ring and
//! before it goes on the wire. Transformers must be deterministic: the same
//! input always yields the same output, or keys stop routing to the node that
//! holds them.

use bytes::{BufMut, Bytes, BytesMut};
use sha2::{Digest, Sha256};

/// Rewrites keys before routing
pub trait KeyTransformer: Send + Sync {
    fn transform(&self, key: &[u8]) -> Bytes;
}

impl<F> KeyTransformer for F
where
    F: Fn(&[u8]) -> Bytes + Send + Sync,
{
    fn transform(&self, key: &[u8]) -> Bytes {
        self(key)
    }
}

/// Replaces each key with the lowercase hex SHA-256 digest of its bytes
///
/// Keeps key length fixed (64 bytes) and hides key contents from the server.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sha256KeyTransformer;

impl KeyTransformer for Sha256KeyTransformer {
    fn transform(&self, key: &[u8]) -> Bytes {
        Bytes::from(hex::encode(Sha256::digest(key)))
    }
}

/// Prepends a fixed namespace to each key
#[derive(Debug, Clone)]
pub struct PrefixKeyTransformer {
    prefix: Bytes,
}

impl PrefixKeyTransformer {
    pub fn new(prefix: impl AsRef<[u8]>) -> Self {
        Self {
            prefix: Bytes::copy_from_slice(prefix.as_ref()),
        }
    }
}

impl KeyTransformer for PrefixKeyTransformer {
    fn transform(&self, key: &[u8]) -> Bytes {
        let mut out = BytesMut::with_capacity(self.prefix.len() + key.len());
        out.put_slice(&self.prefix);
        out.put_slice(key);
        out.freeze()
    }
}
