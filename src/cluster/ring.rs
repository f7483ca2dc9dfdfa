//! Consistent Hash Ring
//!
//! Maps hashed keys to live nodes.
//!
//! ## Layout
//! Each node contributes `weight * points_per_weight` positions. Positions
//! come from MD5 digests of `"{alias}-{i}"`, two little-endian `u64` values
//! per digest. Keys are hashed with 64-bit FNV-1a and owned by the first
//! position at or after the hash, wrapping to the start of the ring.
//!
//! ```text
//!   0 ──●a────●b──────●a──●c────────●b────── u64::MAX
//!        ▲            ▲
//!     hash(k1)     hash(k2)  → k1 ↦ a (next ●), k2 ↦ a
//! ```
//!
//! The ring is immutable; a liveness change builds a new one.

use std::hash::Hasher;
use std::sync::Arc;

use fnv::FnvHasher;

use super::Node;

/// Hash of an (already transformed) key
pub fn hash_key(key: &[u8]) -> u64 {
    let mut hasher = FnvHasher::default();
    hasher.write(key);
    hasher.finish()
}

/// The `count` ring positions owned by `alias`
pub fn node_positions(alias: &str, count: usize) -> Vec<u64> {
    let mut positions = Vec::with_capacity(count);
    let mut i = 0usize;
    while positions.len() < count {
        let digest = md5::compute(format!("{}-{}", alias, i));
        let (low, high) = digest.0.split_at(8);
        for half in [low, high] {
            if positions.len() == count {
                break;
            }
            let mut word = [0u8; 8];
            word.copy_from_slice(half);
            positions.push(u64::from_le_bytes(word));
        }
        i += 1;
    }
    positions
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RingPoint {
    position: u64,
    /// Index into the node pool's node list
    node: usize,
}

/// Immutable sorted ring of node positions
#[derive(Debug, Clone, Default)]
pub struct HashRing {
    points: Vec<RingPoint>,
}

impl HashRing {
    /// Build a ring from the live nodes in `nodes`
    pub fn build(nodes: &[Arc<Node>], points_per_weight: u32) -> Self {
        let entries = nodes
            .iter()
            .enumerate()
            .filter(|(_, node)| node.is_alive())
            .flat_map(|(index, node)| {
                let count = (node.weight() as usize * points_per_weight as usize).max(1);
                node_positions(node.alias(), count)
                    .into_iter()
                    .map(move |position| (position, index, node.alias()))
            })
            .collect();
        Self::from_entries(entries)
    }

    /// Sort positions; on an exact collision the smaller alias keeps the point
    fn from_entries(mut entries: Vec<(u64, usize, &str)>) -> Self {
        entries.sort_unstable_by(|a, b| a.0.cmp(&b.0).then_with(|| a.2.cmp(b.2)));
        entries.dedup_by_key(|entry| entry.0);
        Self {
            points: entries
                .into_iter()
                .map(|(position, node, _)| RingPoint { position, node })
                .collect(),
        }
    }

    /// Index of the node owning `hash`, `None` when the ring is empty
    pub fn locate(&self, hash: u64) -> Option<usize> {
        if self.points.is_empty() {
            return None;
        }
        let slot = self.points.partition_point(|point| point.position < hash);
        let point = self.points.get(slot).unwrap_or(&self.points[0]);
        Some(point.node)
    }

    /// Number of positions on the ring
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Positions owned by the node at `index`
    pub fn points_for(&self, index: usize) -> usize {
        self.points.iter().filter(|point| point.node == index).count()
    }
}
