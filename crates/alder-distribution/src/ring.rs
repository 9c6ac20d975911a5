//! Consistent-hash ownership of subscriber work across distributor
//! instances.
//!
//! Every instance can decode the shared event log, but for each subscriber
//! exactly one instance runs the sender and advances the cursor. The ring
//! hashes a subscriber key to one member of the live instance set with Jump
//! consistent hash, so membership changes move only the minimal share of
//! keys.
//!
//! Reference: "A Fast, Minimal Memory, Consistent Hash Algorithm"
//! by John Lamping and Eric Veach, Google 2014.

use std::hash::DefaultHasher;
use std::hash::Hash;
use std::hash::Hasher;
use std::sync::RwLock;

/// Jump consistent hash: map a pre-hashed key to a bucket in
/// `[0, num_buckets)`.
fn jump_hash(mut key: u64, num_buckets: u32) -> u32 {
    let num_buckets = num_buckets as i64;
    let mut b: i64 = -1;
    let mut j: i64 = 0;

    while j < num_buckets {
        b = j;
        key = key.wrapping_mul(2862933555777941757).wrapping_add(1);
        j = ((b.wrapping_add(1) as f64) * (((1_i64) << 31) as f64 / ((key >> 33).wrapping_add(1) as f64))) as i64;
    }

    b as u32
}

/// The set of live distributor instances and this process's identity within
/// it.
///
/// `is_match` is a pure function of the current membership; membership
/// updates are edge-triggered via [`HashRing::update_nodes`] and never block
/// a caller.
pub struct HashRing {
    local: String,
    nodes: RwLock<Vec<String>>,
}

impl HashRing {
    /// Create a ring for `local` with the given live instance identities.
    pub fn new(local: impl Into<String>, nodes: Vec<String>) -> Self {
        let ring = HashRing {
            local: local.into(),
            nodes: RwLock::new(Vec::new()),
        };
        ring.update_nodes(nodes);
        ring
    }

    /// Replace the live membership. Sorted and deduplicated so every
    /// instance agrees on bucket order regardless of discovery order.
    pub fn update_nodes(&self, mut nodes: Vec<String>) {
        nodes.sort();
        nodes.dedup();
        *self.nodes.write().unwrap_or_else(|e| e.into_inner()) = nodes;
    }

    /// This process's identity.
    pub fn local(&self) -> &str {
        &self.local
    }

    /// Whether the ring currently has no members.
    pub fn is_empty(&self) -> bool {
        self.nodes.read().unwrap_or_else(|e| e.into_inner()).is_empty()
    }

    /// True iff this instance owns `key` under the current membership.
    pub fn is_match(&self, key: &str) -> bool {
        let nodes = self.nodes.read().unwrap_or_else(|e| e.into_inner());
        if nodes.is_empty() {
            return false;
        }

        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        let bucket = jump_hash(hasher.finish(), nodes.len() as u32);

        nodes[bucket as usize] == self.local
    }
}
