//! Buffer for headers whose parent has not arrived yet.

use spv_core::Header;
use spv_primitives::Hash256;
use std::collections::{HashMap, VecDeque};
use tracing::debug;

/// Headers waiting for their parent, keyed by the parent hash.
///
/// Bounded; when full, the oldest buffered header is dropped. Peers can
/// always redeliver.
pub(crate) struct OrphanPool {
    by_prev: HashMap<Hash256, Vec<Header>>,
    /// `(prev_hash, header_hash)` in arrival order, oldest first.
    order: VecDeque<(Hash256, Hash256)>,
    capacity: usize,
}

impl OrphanPool {
    pub fn new(capacity: usize) -> Self {
        OrphanPool {
            by_prev: HashMap::new(),
            order: VecDeque::new(),
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Buffer a header under its parent hash.
    pub fn insert(&mut self, header: Header) {
        let prev = header.prev_hash();
        let hash = header.hash();
        let bucket = self.by_prev.entry(prev).or_default();
        if bucket.iter().any(|h| h.hash() == hash) {
            return;
        }
        bucket.push(header);
        self.order.push_back((prev, hash));

        while self.order.len() > self.capacity {
            if let Some((old_prev, old_hash)) = self.order.pop_front() {
                if let Some(bucket) = self.by_prev.get_mut(&old_prev) {
                    bucket.retain(|h| h.hash() != old_hash);
                    if bucket.is_empty() {
                        self.by_prev.remove(&old_prev);
                    }
                }
                debug!(dropped = %old_hash, "orphan pool dropped oldest header");
            }
        }
    }

    /// Remove and return every buffered child of `parent`.
    pub fn take_children(&mut self, parent: &Hash256) -> Vec<Header> {
        let children = self.by_prev.remove(parent).unwrap_or_default();
        if !children.is_empty() {
            self.order.retain(|(prev, _)| prev != parent);
        }
        children
    }
}
