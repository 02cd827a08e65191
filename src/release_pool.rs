//! Ordered, keyed ownership container for continuations and the state they
//! capture.
//!
//! A pool is not itself concurrent. It always lives inside the lock of the
//! future or channel that owns it, so "check completion, else insert" and
//! "complete, then drain" stay atomic.

use std::{any::Any, collections::BTreeMap};

/// An opaque resource kept alive by a pool until it is released.
pub type Releasable = Box<dyn Any + Send>;

/// Identifies one entry of a [`ReleasePool`]. Keys grow monotonically, so
/// key order is insertion order.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ReleaseKey(u64);

/// Exclusively owns its entries and drops them when they are removed,
/// drained, released, or when the pool itself is dropped.
pub struct ReleasePool<R = Releasable> {
    entries: BTreeMap<ReleaseKey, R>,
    next_key: u64,
}

impl<R> ReleasePool<R> {
    pub fn new() -> Self {
        ReleasePool {
            entries: BTreeMap::new(),
            next_key: 0,
        }
    }

    pub fn insert(&mut self, releasable: R) -> ReleaseKey {
        let key = ReleaseKey(self.next_key);
        self.next_key += 1;
        self.entries.insert(key, releasable);
        key
    }

    /// Takes an entry back out without touching the others.
    pub fn remove(&mut self, key: ReleaseKey) -> Option<R> {
        self.entries.remove(&key)
    }

    pub fn contains(&self, key: ReleaseKey) -> bool {
        self.entries.contains_key(&key)
    }

    /// Entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &R> {
        self.entries.values()
    }

    /// Empties the pool, handing back every entry in insertion order.
    pub fn drain(&mut self) -> Vec<R> {
        std::mem::take(&mut self.entries).into_values().collect()
    }

    /// Drops every entry.
    pub fn release(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<R> Default for ReleasePool<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R> std::fmt::Debug for ReleasePool<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReleasePool")
            .field("len", &self.entries.len())
            .finish()
    }
}
