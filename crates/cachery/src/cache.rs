// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The per-cache store and its public handle.
//!
//! A [`Cache`] is a cheap-to-clone handle onto a named store owned by a
//! [`CacheManager`](crate::CacheManager). Reads go straight to the store's
//! concurrent map and never wait on the manager's entry lock; every mutation
//! acquires that lock so the store map and the manager's global expiration
//! index change together.
//!
//! When the manager removes a cache, the store's inner state is torn down and
//! the handle becomes a tombstone: mutations are silently ignored, reads miss,
//! iteration is empty. No operation on a removed cache panics.

use std::any::Any;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::trace;

use crate::clock::duration_to_millis;
use crate::config::{CacheConfig, Disposer, MIN_TTL, ReferenceType};
use crate::entry::{Entry, ValueRef};
use crate::error::{Error, Result};
use crate::manager::{AnyCache, EntryIndex, ManagerShared};

/// A handle to one named, thread-safe key/value cache.
///
/// Obtained from [`CacheManager::create_cache`](crate::CacheManager::create_cache)
/// or [`CacheManager::cache`](crate::CacheManager::cache). Clones share the
/// same underlying store.
///
/// Values are stored and returned as `Arc<V>`; `put` accepts either an owned
/// `V` or an `Arc<V>`. For a weak-reference cache, pass an `Arc` you retain,
/// since the cache itself will not keep the value alive.
///
/// # Examples
///
/// ```
/// use cachery::{CacheConfig, CacheManager};
///
/// let manager = CacheManager::new();
/// let cache = manager.create_cache::<String, i32>("scores", CacheConfig::builder().build()?)?;
///
/// cache.put("alice".to_string(), 10)?;
/// assert_eq!(cache.get(&"alice".to_string()).as_deref(), Some(&10));
/// # Ok::<(), cachery::Error>(())
/// ```
pub struct Cache<K, V> {
    slot: Arc<StoreSlot<K, V>>,
}

impl<K, V> Clone for Cache<K, V> {
    fn clone(&self) -> Self {
        Self {
            slot: Arc::clone(&self.slot),
        }
    }
}

impl<K, V> Cache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    pub(crate) fn from_slot(slot: Arc<StoreSlot<K, V>>) -> Self {
        Self { slot }
    }

    fn active(&self) -> Option<Arc<ActiveStore<K, V>>> {
        self.slot.active.read().clone()
    }

    /// Returns the cache's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.slot.name
    }

    /// Looks up a key.
    ///
    /// Never blocks on the manager's entry lock. An entry whose TTL has
    /// passed, or whose weakly held value has been reclaimed, reads as
    /// absent; if the entry lock happens to be free the stale entry is
    /// expired on the spot, otherwise the next sweep collects it.
    ///
    /// On a refresh-enabled cache a successful read pushes the entry's
    /// expiry forward by its TTL.
    #[must_use]
    pub fn get(&self, key: &K) -> Option<Arc<V>> {
        self.active()?.get(key)
    }

    /// Inserts a value under the cache's default TTL.
    ///
    /// Returns the previous live value, if any. The previous value is handed
    /// back rather than disposed; a previous entry whose TTL had already
    /// lapsed is expired (running the disposer) and not returned.
    ///
    /// # Errors
    ///
    /// This form never fails; the `Result` matches the TTL-taking variants.
    pub fn put(&self, key: K, value: impl Into<Arc<V>>) -> Result<Option<Arc<V>>> {
        let Some(store) = self.active() else {
            return Ok(None);
        };
        store.put(key, value.into(), None)
    }

    /// Inserts a value with an explicit TTL overriding the cache default.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidTtl`] if `ttl` is shorter than one millisecond.
    pub fn put_with_ttl(&self, key: K, value: impl Into<Arc<V>>, ttl: Duration) -> Result<Option<Arc<V>>> {
        check_ttl(ttl)?;
        let Some(store) = self.active() else {
            return Ok(None);
        };
        store.put(key, value.into(), Some(ttl))
    }

    /// Inserts a value only if the key is absent.
    ///
    /// Returns the existing live value unchanged when present. An entry that
    /// has expired or whose value was reclaimed counts as absent and is
    /// expired in place.
    ///
    /// # Errors
    ///
    /// This form never fails; the `Result` matches the TTL-taking variants.
    pub fn put_if_absent(&self, key: K, value: impl Into<Arc<V>>) -> Result<Option<Arc<V>>> {
        let Some(store) = self.active() else {
            return Ok(None);
        };
        store.put_if_absent(key, value.into(), None)
    }

    /// [`put_if_absent`](Self::put_if_absent) with an explicit TTL.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidTtl`] if `ttl` is shorter than one millisecond.
    pub fn put_if_absent_with_ttl(
        &self,
        key: K,
        value: impl Into<Arc<V>>,
        ttl: Duration,
    ) -> Result<Option<Arc<V>>> {
        check_ttl(ttl)?;
        let Some(store) = self.active() else {
            return Ok(None);
        };
        store.put_if_absent(key, value.into(), Some(ttl))
    }

    /// Replaces the value only if a live entry exists for the key.
    ///
    /// Returns the previous value on success, `None` if the key was absent
    /// (in which case nothing is inserted).
    ///
    /// # Errors
    ///
    /// This form never fails; the `Result` matches the TTL-taking variants.
    pub fn replace(&self, key: K, value: impl Into<Arc<V>>) -> Result<Option<Arc<V>>> {
        let Some(store) = self.active() else {
            return Ok(None);
        };
        store.replace(key, value.into(), None)
    }

    /// [`replace`](Self::replace) with an explicit TTL.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidTtl`] if `ttl` is shorter than one millisecond.
    pub fn replace_with_ttl(&self, key: K, value: impl Into<Arc<V>>, ttl: Duration) -> Result<Option<Arc<V>>> {
        check_ttl(ttl)?;
        let Some(store) = self.active() else {
            return Ok(None);
        };
        store.replace(key, value.into(), Some(ttl))
    }

    /// Removes a key, handing back its live value.
    ///
    /// The value is returned to the caller, not disposed. Removing an entry
    /// whose TTL had already lapsed expires it instead and returns `None`.
    pub fn remove(&self, key: &K) -> Option<Arc<V>> {
        self.active()?.remove(key)
    }

    /// Removes every entry from this cache.
    ///
    /// All owned entries leave the manager's global index and are expired
    /// under a single entry-lock acquisition; the disposer runs for each
    /// strongly retained value.
    pub fn clear(&self) {
        if let Some(store) = self.active() {
            store.clear();
        }
    }

    /// Removes this cache from its manager.
    ///
    /// Equivalent to [`CacheManager::remove_cache`](crate::CacheManager::remove_cache);
    /// afterwards every handle to this cache is an inert tombstone.
    pub fn close(&self) {
        let Some(store) = self.active() else {
            return;
        };
        if let Some(manager) = store.manager.upgrade() {
            let _ = manager.remove_cache(&store.name);
        }
    }

    /// Returns the number of entries currently stored.
    ///
    /// Includes entries whose TTL has lapsed but which no sweep has
    /// collected yet.
    #[must_use]
    pub fn len(&self) -> usize {
        self.active().map_or(0, |store| store.map.len())
    }

    /// Returns `true` if the cache holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the cache's default TTL, or zero if the cache was removed.
    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.active()
            .map_or(Duration::ZERO, |store| Duration::from_millis(store.ttl_millis.load(Ordering::Relaxed)))
    }

    /// Changes the default TTL for future operations.
    ///
    /// Entries already stored keep the TTL they were created with.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidTtl`] if `ttl` is shorter than one millisecond.
    pub fn set_ttl(&self, ttl: Duration) -> Result<()> {
        check_ttl(ttl)?;
        if let Some(store) = self.active() {
            store.ttl_millis.store(duration_to_millis(ttl), Ordering::Relaxed);
        }
        Ok(())
    }

    /// Returns the entry-count bound, where zero means unbounded.
    #[must_use]
    pub fn max_entries(&self) -> usize {
        self.active().map_or(0, |store| store.max_entries.load(Ordering::Relaxed))
    }

    /// Changes the entry-count bound; enforced by the next sweep.
    pub fn set_max_entries(&self, max_entries: usize) {
        if let Some(store) = self.active() {
            store.max_entries.store(max_entries, Ordering::Relaxed);
        }
    }

    /// Returns whether reads extend an entry's TTL.
    #[must_use]
    pub fn refresh(&self) -> bool {
        self.slot.refresh
    }

    /// Returns how strongly this cache retains its values.
    #[must_use]
    pub fn reference_type(&self) -> ReferenceType {
        self.slot.reference_type
    }

    /// Iterates over live `(key, value)` pairs.
    ///
    /// The iterator walks a snapshot of the entries taken when it is
    /// created, skipping any that have expired or been reclaimed by the
    /// time it reaches them. On a refresh-enabled cache, each yielded entry
    /// has its TTL refreshed, exactly as a read would.
    #[must_use]
    pub fn iter(&self) -> Iter<K, V> {
        Iter {
            store: self.active(),
            entries: self.snapshot().into_iter(),
        }
    }

    /// Iterates over live keys. See [`iter`](Self::iter).
    #[must_use]
    pub fn keys(&self) -> Keys<K, V> {
        Keys { inner: self.iter() }
    }

    /// Iterates over live values. See [`iter`](Self::iter).
    #[must_use]
    pub fn values(&self) -> Values<K, V> {
        Values { inner: self.iter() }
    }

    fn snapshot(&self) -> Vec<Arc<Entry<K, V>>> {
        self.active().map_or_else(Vec::new, |store| {
            store.map.iter().map(|guard| Arc::clone(guard.value())).collect()
        })
    }
}

impl<K, V> Cache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: PartialEq + Send + Sync + 'static,
{
    /// Replaces the value only if the live value equals `expected`.
    ///
    /// Returns whether the replacement happened. Comparison is by value,
    /// not by pointer.
    ///
    /// # Errors
    ///
    /// This form never fails; the `Result` matches the TTL-taking variants.
    pub fn compare_replace(&self, key: K, expected: &V, value: impl Into<Arc<V>>) -> Result<bool> {
        let Some(store) = self.active() else {
            return Ok(false);
        };
        store.compare_replace(key, expected, value.into(), None)
    }

    /// [`compare_replace`](Self::compare_replace) with an explicit TTL.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidTtl`] if `ttl` is shorter than one millisecond.
    pub fn compare_replace_with_ttl(
        &self,
        key: K,
        expected: &V,
        value: impl Into<Arc<V>>,
        ttl: Duration,
    ) -> Result<bool> {
        check_ttl(ttl)?;
        let Some(store) = self.active() else {
            return Ok(false);
        };
        store.compare_replace(key, expected, value.into(), Some(ttl))
    }

    /// Removes a key only if its live value equals `expected`.
    ///
    /// Returns whether the removal happened.
    pub fn remove_if(&self, key: &K, expected: &V) -> bool {
        self.active().is_some_and(|store| store.remove_if(key, expected))
    }
}

impl<K, V> Cache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    /// Inserts every pair, atomically with respect to the entry lock.
    ///
    /// The whole batch is applied under a single lock acquisition and
    /// triggers at most one sweep evaluation afterwards.
    ///
    /// # Errors
    ///
    /// This form never fails; the `Result` matches the TTL-taking variants.
    pub fn put_all<I, T>(&self, entries: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, T)>,
        T: Into<Arc<V>>,
    {
        let Some(store) = self.active() else {
            return Ok(());
        };
        store.put_all(entries.into_iter().map(|(k, v)| (k, v.into())), None)
    }

    /// [`put_all`](Self::put_all) with an explicit TTL.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidTtl`] if `ttl` is shorter than one millisecond.
    pub fn put_all_with_ttl<I, T>(&self, entries: I, ttl: Duration) -> Result<()>
    where
        I: IntoIterator<Item = (K, T)>,
        T: Into<Arc<V>>,
    {
        check_ttl(ttl)?;
        let Some(store) = self.active() else {
            return Ok(());
        };
        store.put_all(entries.into_iter().map(|(k, v)| (k, v.into())), Some(ttl))
    }
}

impl<K, V> std::fmt::Debug for Cache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache")
            .field("name", &self.name())
            .field("len", &self.len())
            .field("removed", &self.active().is_none())
            .finish()
    }
}

fn check_ttl(ttl: Duration) -> Result<()> {
    if ttl < MIN_TTL {
        return Err(Error::InvalidTtl { ttl });
    }
    Ok(())
}

/// The registry-owned slot for one cache.
///
/// Holds the "active" store behind an atomic swap point; cache removal takes
/// the store out, leaving a permanent tombstone that every remaining handle
/// observes.
pub(crate) struct StoreSlot<K, V> {
    name: Arc<str>,
    refresh: bool,
    reference_type: ReferenceType,
    active: RwLock<Option<Arc<ActiveStore<K, V>>>>,
}

impl<K, V> StoreSlot<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    pub(crate) fn new(name: Arc<str>, manager: Weak<ManagerShared>, config: CacheConfig<V>) -> Arc<Self> {
        let store = Arc::new(ActiveStore {
            name: Arc::clone(&name),
            manager,
            map: DashMap::with_hasher(foldhash::fast::RandomState::default()),
            ttl_millis: AtomicU64::new(duration_to_millis(config.ttl)),
            refresh: config.refresh,
            max_entries: AtomicUsize::new(config.max_entries),
            reference_type: config.reference_type,
            disposer: config.disposer,
        });
        Arc::new(Self {
            name,
            refresh: config.refresh,
            reference_type: config.reference_type,
            active: RwLock::new(Some(store)),
        })
    }
}

impl<K, V> AnyCache for StoreSlot<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn len(&self) -> usize {
        self.active.read().as_ref().map_or(0, |store| store.map.len())
    }

    fn max_entries(&self) -> usize {
        self.active
            .read()
            .as_ref()
            .map_or(0, |store| store.max_entries.load(Ordering::Relaxed))
    }

    fn teardown(&self, index: &mut EntryIndex) -> usize {
        let Some(store) = self.active.write().take() else {
            return 0;
        };
        let entries: Vec<_> = store.map.iter().map(|guard| Arc::clone(guard.value())).collect();
        let count = entries.len();
        for entry in &entries {
            index.remove(&entry.rank());
            entry.expire();
        }
        store.map.clear();
        count
    }

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// The live state of a cache; dropped wholesale when the cache is removed.
pub(crate) struct ActiveStore<K, V> {
    pub(crate) name: Arc<str>,
    pub(crate) manager: Weak<ManagerShared>,
    map: DashMap<K, Arc<Entry<K, V>>, foldhash::fast::RandomState>,
    ttl_millis: AtomicU64,
    refresh: bool,
    max_entries: AtomicUsize,
    reference_type: ReferenceType,
    disposer: Option<Disposer<V>>,
}

impl<K, V> ActiveStore<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    fn get(self: &Arc<Self>, key: &K) -> Option<Arc<V>> {
        let manager = self.manager.upgrade()?;
        let now = manager.now_millis();
        // Clone the entry out so no map shard lock is held past this point.
        let entry = self.map.get(key).map(|guard| Arc::clone(guard.value()))?;

        let value = entry.value();
        if value.is_none() || entry.is_expired(now) {
            // Lazy expiry of a single stale entry. try_lock keeps the
            // promise that reads never wait behind a sweep.
            if let Some(mut index) = manager.try_lock_index() {
                index.remove(&entry.rank());
                entry.expire();
                trace!(cache = &*self.name, "expired stale entry on read");
            }
            return None;
        }

        if self.refresh {
            entry.refresh(now);
        }
        value
    }

    fn put(self: &Arc<Self>, key: K, value: Arc<V>, ttl: Option<Duration>) -> Result<Option<Arc<V>>> {
        let ttl_millis = self.resolve_ttl(ttl);
        let Some(manager) = self.manager.upgrade() else {
            return Ok(None);
        };
        let now = manager.now_millis();
        let previous = {
            let mut index = manager.lock_index();
            self.insert_locked(&mut index, &manager, key, value, now, ttl_millis)
        };
        manager.sweep_if_due();
        Ok(previous)
    }

    fn put_if_absent(self: &Arc<Self>, key: K, value: Arc<V>, ttl: Option<Duration>) -> Result<Option<Arc<V>>> {
        let ttl_millis = self.resolve_ttl(ttl);
        let Some(manager) = self.manager.upgrade() else {
            return Ok(None);
        };
        let now = manager.now_millis();
        let existing = {
            let mut index = manager.lock_index();
            let incumbent = self.map.get(&key).map(|guard| Arc::clone(guard.value()));
            match incumbent.and_then(|entry| self.live_value(&entry, now, &mut index).map(|v| (entry, v))) {
                Some((_, live)) => Some(live),
                None => {
                    let _ = self.insert_locked(&mut index, &manager, key, value, now, ttl_millis);
                    None
                }
            }
        };
        manager.sweep_if_due();
        Ok(existing)
    }

    fn replace(self: &Arc<Self>, key: K, value: Arc<V>, ttl: Option<Duration>) -> Result<Option<Arc<V>>> {
        let ttl_millis = self.resolve_ttl(ttl);
        let Some(manager) = self.manager.upgrade() else {
            return Ok(None);
        };
        let now = manager.now_millis();
        let previous = {
            let mut index = manager.lock_index();
            let incumbent = self.map.get(&key).map(|guard| Arc::clone(guard.value()));
            match incumbent.and_then(|entry| self.live_value(&entry, now, &mut index).map(|v| (entry, v))) {
                Some(_) => self.insert_locked(&mut index, &manager, key, value, now, ttl_millis),
                None => None,
            }
        };
        manager.sweep_if_due();
        Ok(previous)
    }

    fn remove(self: &Arc<Self>, key: &K) -> Option<Arc<V>> {
        let manager = self.manager.upgrade()?;
        let now = manager.now_millis();
        let removed = {
            let mut index = manager.lock_index();
            let (_, entry) = self.map.remove(key)?;
            index.remove(&entry.rank());
            if entry.is_expired(now) {
                entry.expire();
                None
            } else {
                entry.take_value()
            }
        };
        manager.sweep_if_due();
        removed
    }

    fn clear(self: &Arc<Self>) {
        let Some(manager) = self.manager.upgrade() else {
            return;
        };
        {
            let mut index = manager.lock_index();
            let entries: Vec<_> = self.map.iter().map(|guard| Arc::clone(guard.value())).collect();
            for entry in &entries {
                index.remove(&entry.rank());
                entry.expire();
            }
            self.map.clear();
        }
        manager.sweep_if_due();
    }

    fn put_all(
        self: &Arc<Self>,
        entries: impl Iterator<Item = (K, Arc<V>)>,
        ttl: Option<Duration>,
    ) -> Result<()> {
        let ttl_millis = self.resolve_ttl(ttl);
        let Some(manager) = self.manager.upgrade() else {
            return Ok(());
        };
        let now = manager.now_millis();
        {
            let mut index = manager.lock_index();
            for (key, value) in entries {
                let _ = self.insert_locked(&mut index, &manager, key, value, now, ttl_millis);
            }
        }
        manager.sweep_if_due();
        Ok(())
    }

    /// Creates the entry, links it into both structures, and detaches any
    /// previous entry for the key. Entry lock must be held.
    fn insert_locked(
        self: &Arc<Self>,
        index: &mut EntryIndex,
        manager: &ManagerShared,
        key: K,
        value: Arc<V>,
        now: u64,
        ttl_millis: u64,
    ) -> Option<Arc<V>> {
        let entry = Arc::new(Entry::new(
            key.clone(),
            manager.next_seq(),
            Arc::clone(&self.name),
            Arc::downgrade(self),
            ttl_millis,
            now.saturating_add(ttl_millis),
            self.hold(value),
        ));
        let previous = self.map.insert(key, Arc::clone(&entry));
        index.insert(entry.rank(), entry);

        previous.and_then(|old| {
            index.remove(&old.rank());
            if old.is_expired(now) {
                // The old entry's TTL had lapsed before it was replaced, so
                // this counts as an expiry: dispose, report no previous value.
                old.expire();
                None
            } else {
                old.take_value()
            }
        })
    }

    /// Returns the entry's live value, expiring it in place when stale.
    /// Entry lock must be held.
    fn live_value(&self, entry: &Arc<Entry<K, V>>, now: u64, index: &mut EntryIndex) -> Option<Arc<V>> {
        let value = if entry.is_expired(now) { None } else { entry.value() };
        if value.is_none() {
            index.remove(&entry.rank());
            entry.expire();
        }
        value
    }

    fn resolve_ttl(&self, ttl: Option<Duration>) -> u64 {
        // Per-call TTLs were validated at the public surface.
        ttl.map_or_else(|| self.ttl_millis.load(Ordering::Relaxed), duration_to_millis)
    }

    fn hold(&self, value: Arc<V>) -> ValueRef<V> {
        match self.reference_type {
            ReferenceType::Strong => ValueRef::Strong(value),
            ReferenceType::Soft => ValueRef::Soft(value),
            ReferenceType::Weak => ValueRef::Weak(Arc::downgrade(&value)),
        }
    }
}

// Callable from `Entry::expire`, which only knows the map-identity bounds.
impl<K, V> ActiveStore<K, V>
where
    K: Eq + Hash,
{
    /// Removes the entry from the map if it is still the current mapping.
    pub(crate) fn forget(&self, entry: &Entry<K, V>) {
        self.map.remove_if(entry.key(), |_, current| current.seq() == entry.seq());
    }

    /// Runs the disposer, swallowing panics so a sweep is never aborted.
    pub(crate) fn dispose(&self, value: Arc<V>) {
        if let Some(disposer) = &self.disposer {
            if std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| disposer(value))).is_err() {
                tracing::warn!(cache = &*self.name, "value disposer panicked");
            }
        }
    }
}

impl<K, V> ActiveStore<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: PartialEq + Send + Sync + 'static,
{
    fn compare_replace(
        self: &Arc<Self>,
        key: K,
        expected: &V,
        value: Arc<V>,
        ttl: Option<Duration>,
    ) -> Result<bool> {
        let ttl_millis = self.resolve_ttl(ttl);
        let Some(manager) = self.manager.upgrade() else {
            return Ok(false);
        };
        let now = manager.now_millis();
        let replaced = {
            let mut index = manager.lock_index();
            let incumbent = self.map.get(&key).map(|guard| Arc::clone(guard.value()));
            match incumbent.and_then(|entry| self.live_value(&entry, now, &mut index)) {
                Some(live) if *live == *expected => {
                    let _ = self.insert_locked(&mut index, &manager, key, value, now, ttl_millis);
                    true
                }
                _ => false,
            }
        };
        manager.sweep_if_due();
        Ok(replaced)
    }

    fn remove_if(self: &Arc<Self>, key: &K, expected: &V) -> bool {
        let Some(manager) = self.manager.upgrade() else {
            return false;
        };
        let now = manager.now_millis();
        let removed = {
            let mut index = manager.lock_index();
            let incumbent = self.map.get(key).map(|guard| Arc::clone(guard.value()));
            match incumbent.and_then(|entry| self.live_value(&entry, now, &mut index).map(|v| (entry, v))) {
                Some((entry, live)) if *live == *expected => {
                    self.map.remove_if(key, |_, current| current.seq() == entry.seq());
                    index.remove(&entry.rank());
                    let _ = entry.take_value();
                    true
                }
                _ => false,
            }
        };
        manager.sweep_if_due();
        removed
    }
}

/// Iterator over live `(key, value)` pairs. See [`Cache::iter`].
pub struct Iter<K, V> {
    store: Option<Arc<ActiveStore<K, V>>>,
    entries: std::vec::IntoIter<Arc<Entry<K, V>>>,
}

impl<K, V> Iterator for Iter<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    type Item = (K, Arc<V>);

    fn next(&mut self) -> Option<Self::Item> {
        let store = self.store.as_ref()?;
        let manager = store.manager.upgrade()?;
        loop {
            let entry = self.entries.next()?;
            let now = manager.now_millis();
            if entry.is_expired(now) {
                continue;
            }
            let Some(value) = entry.value() else {
                continue;
            };
            if store.refresh {
                entry.refresh(now);
            }
            return Some((entry.key().clone(), value));
        }
    }
}

impl<K, V> std::fmt::Debug for Iter<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Iter").field("remaining", &self.entries.len()).finish()
    }
}

/// Iterator over live keys. See [`Cache::keys`].
#[derive(Debug)]
pub struct Keys<K, V> {
    inner: Iter<K, V>,
}

impl<K, V> Iterator for Keys<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    type Item = K;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|(key, _)| key)
    }
}

/// Iterator over live values. See [`Cache::values`].
#[derive(Debug)]
pub struct Values<K, V> {
    inner: Iter<K, V>,
}

impl<K, V> Iterator for Values<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    type Item = Arc<V>;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|(_, value)| value)
    }
}
