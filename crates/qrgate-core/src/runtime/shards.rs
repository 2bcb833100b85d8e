// crates/qrgate-core/src/runtime/shards.rs
// ============================================================================
// Module: Lock Striping
// Description: Fixed shard set keyed by API key hash with a global entry count.
// Purpose: Give per-key state fine-grained locking instead of one global lock.
// Dependencies: std
// ============================================================================

//! ## Overview
//! [`Shards`] hashes a key onto one of a fixed number of independently locked
//! slots. Callers lock at most one shard at a time. The shared entry counter
//! bounds total memory across shards without taking more than one lock.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::hash_map::RandomState;
use std::hash::BuildHasher;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default shard count for per-key state.
pub const DEFAULT_SHARD_COUNT: usize = 16;

// ============================================================================
// SECTION: Types
// ============================================================================

/// Fixed set of lock shards with a bounded entry count.
pub(crate) struct Shards<T> {
    /// Shard slots.
    slots: Vec<T>,
    /// Per-process keyed hasher.
    hasher: RandomState,
    /// Entries stored across every shard.
    len: AtomicUsize,
    /// Maximum entries across every shard.
    capacity: usize,
}

impl<T> Shards<T> {
    /// Builds `count` shards (at least one) using `make` for each slot.
    pub(crate) fn new(count: usize, capacity: usize, make: impl FnMut() -> T) -> Self {
        let count = count.max(1);
        let slots = std::iter::repeat_with(make).take(count).collect();
        Self {
            slots,
            hasher: RandomState::new(),
            len: AtomicUsize::new(0),
            capacity,
        }
    }

    /// Returns the shard owning `key`.
    pub(crate) fn for_key(&self, key: &str) -> &T {
        let hash = self.hasher.hash_one(key);
        let count = u64::try_from(self.slots.len()).unwrap_or(1);
        let index = usize::try_from(hash % count).unwrap_or(0);
        &self.slots[index.min(self.slots.len() - 1)]
    }

    /// Iterates every shard.
    pub(crate) fn iter(&self) -> impl Iterator<Item = &T> {
        self.slots.iter()
    }

    /// Reserves room for one new entry; returns false when full.
    pub(crate) fn reserve(&self) -> bool {
        self.len
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |len| {
                (len < self.capacity).then_some(len + 1)
            })
            .is_ok()
    }

    /// Releases `count` entries.
    pub(crate) fn release(&self, count: usize) {
        let _ = self.len.fetch_update(Ordering::AcqRel, Ordering::Acquire, |len| {
            Some(len.saturating_sub(count))
        });
    }

    /// Returns the number of stored entries.
    pub(crate) fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    /// Returns the entry bound.
    pub(crate) const fn capacity(&self) -> usize {
        self.capacity
    }
}
