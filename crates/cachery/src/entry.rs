// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Cache entries and value retention.
//!
//! An [`Entry`] carries two expiry timestamps. `orig_expires` is the sort key
//! under which the entry sits in the manager's global expiration index and is
//! only rewritten under the entry lock. `curr_expires` is the actual expiry;
//! refresh-on-access advances it lock-free, leaving the index position stale
//! until a sweep reconciles the two. This keeps reads cheap: no ordered-index
//! resort ever happens on a `get`.

use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use crate::cache::ActiveStore;

/// Ordering key for the manager's global expiration index.
///
/// Entries sort by stale expiry first; `seq` is a process-unique insertion
/// number that breaks ties between entries expiring on the same millisecond.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct Rank {
    pub(crate) expires_millis: u64,
    pub(crate) seq: u64,
}

/// How an entry holds its value.
pub(crate) enum ValueRef<V> {
    /// Owned by the cache.
    Strong(Arc<V>),
    /// Held strongly, but never disposer-eligible (see
    /// [`ReferenceType::Soft`](crate::ReferenceType::Soft)).
    Soft(Arc<V>),
    /// Live only while the caller retains another `Arc`.
    Weak(Weak<V>),
    /// Terminal state. The transition into `Cleared` happens exactly once,
    /// under the value cell's write lock, and is the single point where a
    /// disposer may run.
    Cleared,
}

/// A single cached mapping.
pub(crate) struct Entry<K, V> {
    key: K,
    seq: u64,
    cache_name: Arc<str>,
    store: Weak<ActiveStore<K, V>>,
    /// TTL this entry was created with, used by refreshing reads.
    ttl_millis: u64,
    /// Index sort key. Rewritten only under the entry lock.
    orig_expires_millis: AtomicU64,
    /// Actual expiry. `orig <= curr` always holds.
    curr_expires_millis: AtomicU64,
    value: RwLock<ValueRef<V>>,
}

impl<K, V> Entry<K, V> {
    pub(crate) fn new(
        key: K,
        seq: u64,
        cache_name: Arc<str>,
        store: Weak<ActiveStore<K, V>>,
        ttl_millis: u64,
        expires_millis: u64,
        value: ValueRef<V>,
    ) -> Self {
        Self {
            key,
            seq,
            cache_name,
            store,
            ttl_millis,
            orig_expires_millis: AtomicU64::new(expires_millis),
            curr_expires_millis: AtomicU64::new(expires_millis),
            value: RwLock::new(value),
        }
    }

    pub(crate) fn key(&self) -> &K {
        &self.key
    }

    pub(crate) fn seq(&self) -> u64 {
        self.seq
    }

    /// The entry's current position key in the global index.
    ///
    /// Only meaningful while the entry lock is held, since sweeps rewrite
    /// `orig_expires` as they requeue entries.
    pub(crate) fn rank(&self) -> Rank {
        Rank {
            expires_millis: self.orig_expires_millis.load(Ordering::Acquire),
            seq: self.seq,
        }
    }

    pub(crate) fn curr_expires_millis(&self) -> u64 {
        self.curr_expires_millis.load(Ordering::Acquire)
    }

    /// Returns whether the entry's actual expiry has passed.
    pub(crate) fn is_expired(&self, now_millis: u64) -> bool {
        now_millis >= self.curr_expires_millis()
    }

    /// Pushes the actual expiry forward by the entry's TTL.
    ///
    /// Called on refreshing reads. Deliberately does not touch
    /// `orig_expires` or the index; the sweep reconciles later.
    pub(crate) fn refresh(&self, now_millis: u64) {
        self.curr_expires_millis
            .store(now_millis.saturating_add(self.ttl_millis), Ordering::Release);
    }

    /// Returns the live value, or `None` if it was cleared or reclaimed.
    pub(crate) fn value(&self) -> Option<Arc<V>> {
        match &*self.value.read() {
            ValueRef::Strong(value) | ValueRef::Soft(value) => Some(Arc::clone(value)),
            ValueRef::Weak(weak) => weak.upgrade(),
            ValueRef::Cleared => None,
        }
    }

    /// Clears the value and hands it back without running the disposer.
    ///
    /// Used when the caller receives the value instead (`remove`, `replace`,
    /// `put` overwrite).
    pub(crate) fn take_value(&self) -> Option<Arc<V>> {
        match std::mem::replace(&mut *self.value.write(), ValueRef::Cleared) {
            ValueRef::Strong(value) | ValueRef::Soft(value) => Some(value),
            ValueRef::Weak(weak) => weak.upgrade(),
            ValueRef::Cleared => None,
        }
    }
}

impl<K, V> Entry<K, V>
where
    K: Eq + Hash,
{
    /// Expires the entry: clears the value, runs the disposer for strongly
    /// retained values, and removes the entry from its store's map.
    ///
    /// Returns whether a live value was discarded. Safe to call more than
    /// once; only the first call observes a non-cleared value.
    pub(crate) fn expire(&self) -> bool {
        let store = self.store.upgrade();

        let (was_live, to_dispose) =
            match std::mem::replace(&mut *self.value.write(), ValueRef::Cleared) {
                ValueRef::Strong(value) => (true, Some(value)),
                ValueRef::Soft(value) => {
                    drop(value);
                    (true, None)
                }
                ValueRef::Weak(weak) => (weak.upgrade().is_some(), None),
                ValueRef::Cleared => (false, None),
            };

        if let Some(store) = &store {
            if let Some(value) = to_dispose {
                store.dispose(value);
            }
            store.forget(self);
        }

        was_live
    }
}

/// The type-erased view of an entry held by the manager's global index.
///
/// One manager indexes entries from stores with arbitrary key and value
/// types; the sweep only ever needs this narrow surface.
pub(crate) trait IndexedEntry: Send + Sync {
    /// Name of the owning cache, for cache-scoped eviction scans.
    fn cache_name(&self) -> &str;
    /// The actual expiry, which may run ahead of the index position.
    fn curr_expires_millis(&self) -> u64;
    /// Rewrites the index sort key during reconciliation. Entry lock only.
    fn set_orig_expires_millis(&self, millis: u64);
    /// Whether the value is still retrievable.
    fn is_live(&self) -> bool;
    /// Clears the value, disposes it where applicable, and removes the
    /// entry from its store's map. Returns whether a live value was
    /// discarded.
    fn expire(&self) -> bool;
}

impl<K, V> IndexedEntry for Entry<K, V>
where
    K: Eq + Hash + Send + Sync,
    V: Send + Sync,
{
    fn cache_name(&self) -> &str {
        &self.cache_name
    }

    fn curr_expires_millis(&self) -> u64 {
        Self::curr_expires_millis(self)
    }

    fn set_orig_expires_millis(&self, millis: u64) {
        self.orig_expires_millis.store(millis, Ordering::Release);
    }

    fn is_live(&self) -> bool {
        match &*self.value.read() {
            ValueRef::Strong(_) | ValueRef::Soft(_) => true,
            ValueRef::Weak(weak) => weak.strong_count() > 0,
            ValueRef::Cleared => false,
        }
    }

    fn expire(&self) -> bool {
        Self::expire(self)
    }
}
