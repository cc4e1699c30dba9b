//! Thread-safe set of tracked work item IDs.
//!
//! Shared between the command read loop and the trip path. Every operation
//! takes the lock for its own duration only.

use std::collections::BTreeSet;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::types::TrackedId;

/// Set of IDs currently believed alive.
#[derive(Debug, Default)]
pub struct TrackedIdSet {
    ids: Mutex<BTreeSet<TrackedId>>,
}

impl TrackedIdSet {
    pub fn new() -> Self {
        Self::default()
    }

    // A panic while holding the lock cannot leave a BTreeSet half-updated in
    // a way later operations care about, so poisoning is ignored.
    fn lock(&self) -> MutexGuard<'_, BTreeSet<TrackedId>> {
        self.ids.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert an id. Returns false if it was already tracked.
    pub fn add(&self, id: TrackedId) -> bool {
        self.lock().insert(id)
    }

    /// Remove an id. Returns false if it was not tracked.
    pub fn remove(&self, id: &TrackedId) -> bool {
        self.lock().remove(id)
    }

    /// Drop every id. Returns how many were tracked.
    pub fn clear(&self) -> usize {
        let mut ids = self.lock();
        let count = ids.len();
        ids.clear();
        count
    }

    /// Sorted copy of the current members.
    pub fn snapshot(&self) -> Vec<TrackedId> {
        self.lock().iter().cloned().collect()
    }

    pub fn contains(&self, id: &TrackedId) -> bool {
        self.lock().contains(id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
