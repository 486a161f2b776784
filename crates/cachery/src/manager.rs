// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The cache manager: registry, global expiration index, and sweep.
//!
//! A [`CacheManager`] owns a registry of named stores and a single ordered
//! index of every live entry across all of them, keyed by each entry's stale
//! expiry. Two independent locks keep the structures consistent:
//!
//! - the **registry lock** guards only the name→store map and is held for
//!   short lookups and create/remove operations;
//! - the **entry lock** guards the global index and the invariant that the
//!   index always mirrors the union of all store maps. Every store mutation
//!   and every sweep serializes on it.
//!
//! The locks are only ever nested registry→entry, never the other way.
//!
//! The sweep is the one place memory is actually reclaimed in bulk. It runs
//! in three phases: global TTL expiration, per-cache capacity enforcement,
//! and global capacity enforcement. Refreshed entries are requeued forward
//! instead of expired, which is also what makes capacity eviction
//! approximate least-recently-accessed order: entries nobody refreshed sit
//! earliest in the index and go first.

use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::hash::Hash;
use std::ops::Bound;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::{Mutex, MutexGuard, RwLock};
use tracing::{debug, trace};

use crate::cache::{Cache, StoreSlot};
use crate::clock::{Clock, duration_to_millis};
use crate::config::CacheConfig;
use crate::entry::{IndexedEntry, Rank};
use crate::error::{Error, Result};

/// How long a manager waits between automatic sweeps.
///
/// Mutating operations only force a sweep once this window has elapsed since
/// the previous one; an explicit [`CacheManager::sweep`] runs regardless.
pub const DEFAULT_SWEEP_WINDOW: Duration = Duration::from_secs(30);

/// The manager's global ordered index of live entries.
pub(crate) type EntryIndex = BTreeMap<Rank, Arc<dyn IndexedEntry>>;

/// The type-erased store surface the registry and the sweep work against.
pub(crate) trait AnyCache: Send + Sync {
    fn name(&self) -> &str;
    fn len(&self) -> usize;
    fn max_entries(&self) -> usize;
    /// Tears the store down: expires every owned entry, removes each from
    /// the index, and leaves the tombstone behind. Entry lock must be held.
    fn teardown(&self, index: &mut EntryIndex) -> usize;
    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

/// State shared by a manager and all of its stores.
pub(crate) struct ManagerShared {
    clock: Clock,
    max_total_entries: usize,
    sweep_window_millis: u64,
    /// Registry lock: name → store. Independent from the entry lock so
    /// registry lookups stay uncontended with sweeps.
    registry: RwLock<HashMap<Arc<str>, Arc<dyn AnyCache>>>,
    /// Entry lock: the global index, and with it the invariant that the
    /// index mirrors the union of all store maps.
    index: Mutex<EntryIndex>,
    next_sweep_millis: AtomicU64,
    seq: AtomicU64,
}

impl ManagerShared {
    pub(crate) fn now_millis(&self) -> u64 {
        self.clock.now_millis()
    }

    pub(crate) fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn lock_index(&self) -> MutexGuard<'_, EntryIndex> {
        self.index.lock()
    }

    pub(crate) fn try_lock_index(&self) -> Option<MutexGuard<'_, EntryIndex>> {
        self.index.try_lock()
    }

    /// Runs a sweep if the sweep deadline has passed.
    pub(crate) fn sweep_if_due(&self) {
        if self.now_millis() >= self.next_sweep_millis.load(Ordering::Relaxed) {
            let _ = self.sweep();
        }
    }

    /// Removes and tears down the named store. Returns whether it existed.
    pub(crate) fn remove_cache(&self, name: &str) -> bool {
        let Some(slot) = self.registry.write().remove(name) else {
            return false;
        };
        let mut index = self.index.lock();
        let removed = slot.teardown(&mut index);
        debug!(cache = name, entries = removed, "removed cache");
        true
    }

    fn remove_all_caches(&self) {
        let slots: Vec<_> = {
            let mut registry = self.registry.write();
            registry.drain().map(|(_, slot)| slot).collect()
        };
        let mut index = self.index.lock();
        for slot in &slots {
            let removed = slot.teardown(&mut index);
            debug!(cache = slot.name(), entries = removed, "removed cache");
        }
    }

    /// The three-phase sweep. Returns whether anything was expired or
    /// evicted.
    ///
    /// Phases never fail: empty structures, entries removed concurrently,
    /// and reclaimed values are all normal conditions here.
    fn sweep(&self) -> bool {
        // Registry snapshot first; the locks only ever nest registry→entry.
        let stores: Vec<Arc<dyn AnyCache>> = self.registry.read().values().cloned().collect();
        let now = self.now_millis();
        let mut expired = 0_usize;
        let mut evicted = 0_usize;

        let mut index = self.index.lock();

        // Phase 1: global TTL expiration from the front of the index.
        loop {
            let Some((&rank, entry)) = index.iter().next() else {
                break;
            };
            let entry = Arc::clone(entry);
            if rank.expires_millis > now && entry.is_live() {
                break;
            }
            if Self::reconcile_or_expire(&mut index, rank, entry, now) {
                expired += 1;
            }
        }

        // Phase 2: per-cache capacity enforcement.
        for store in &stores {
            let max = store.max_entries();
            if max == 0 {
                continue;
            }
            let mut cursor = None;
            while store.len() > max {
                let Some((rank, entry)) = Self::next_after(&index, cursor) else {
                    break;
                };
                cursor = Some(rank);
                if entry.cache_name() != store.name() {
                    // Not ours, but a dead entry found in passing is free to
                    // collect.
                    if !entry.is_live() {
                        index.remove(&rank);
                        entry.expire();
                        expired += 1;
                    }
                    continue;
                }
                if Self::reconcile_or_expire(&mut index, rank, entry, now) {
                    evicted += 1;
                    trace!(cache = store.name(), "evicted entry for cache bound");
                }
            }
        }

        // Phase 3: global capacity enforcement.
        if self.max_total_entries > 0 {
            let mut cursor = None;
            while index.len() > self.max_total_entries {
                let Some((rank, entry)) = Self::next_after(&index, cursor) else {
                    break;
                };
                cursor = Some(rank);
                if Self::reconcile_or_expire(&mut index, rank, entry, now) {
                    evicted += 1;
                    trace!("evicted entry for global bound");
                }
            }
        }

        drop(index);
        self.next_sweep_millis
            .store(now.saturating_add(self.sweep_window_millis), Ordering::Relaxed);

        if expired > 0 || evicted > 0 {
            debug!(expired, evicted, "sweep completed");
        }
        expired > 0 || evicted > 0
    }

    /// Removes the entry from the index, then either requeues it under its
    /// refreshed expiry or expires it for good.
    ///
    /// An entry earns a requeue only when its value is live and its actual
    /// expiry has moved past both "now" and its stale index position — that
    /// is, someone refreshed it since it was last reconciled. This is the
    /// lazy reconciliation that keeps refreshing reads O(1): the ordered
    /// index is only ever resorted here.
    ///
    /// Returns `true` when the entry was expired.
    fn reconcile_or_expire(index: &mut EntryIndex, rank: Rank, entry: Arc<dyn IndexedEntry>, now: u64) -> bool {
        index.remove(&rank);
        let curr = entry.curr_expires_millis();
        if entry.is_live() && curr > now && curr > rank.expires_millis {
            entry.set_orig_expires_millis(curr);
            index.insert(
                Rank {
                    expires_millis: curr,
                    seq: rank.seq,
                },
                entry,
            );
            false
        } else {
            entry.expire();
            true
        }
    }

    fn next_after(index: &EntryIndex, cursor: Option<Rank>) -> Option<(Rank, Arc<dyn IndexedEntry>)> {
        let mut range = match cursor {
            None => index.range(..),
            Some(cursor) => index.range((Bound::Excluded(cursor), Bound::Unbounded)),
        };
        range.next().map(|(rank, entry)| (*rank, Arc::clone(entry)))
    }
}

/// An in-process manager of named, thread-safe TTL caches.
///
/// The manager owns every cache created through it, enforces an optional
/// process-wide entry bound across all of them, and periodically sweeps out
/// expired entries. Cloning is cheap; clones share all state. Independent
/// managers are fully isolated from one another.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use cachery::{CacheConfig, CacheManager};
///
/// let manager = CacheManager::new();
/// let sessions = manager.create_cache::<String, String>(
///     "sessions",
///     CacheConfig::builder().ttl(Duration::from_secs(300)).refresh(true).build()?,
/// )?;
///
/// sessions.put("user-1".to_string(), "token".to_string())?;
/// assert_eq!(manager.len(), 1);
/// # Ok::<(), cachery::Error>(())
/// ```
pub struct CacheManager {
    shared: Arc<ManagerShared>,
}

impl Clone for CacheManager {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl CacheManager {
    /// Creates a manager with no global entry bound and the default sweep
    /// window.
    #[must_use]
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Creates a builder for configuring a manager.
    #[must_use]
    pub fn builder() -> CacheManagerBuilder {
        CacheManagerBuilder::new()
    }

    /// Creates and registers a new cache, failing if the name is taken.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyExists`] if a cache with this name is
    /// already registered.
    pub fn create_cache<K, V>(&self, name: &str, config: CacheConfig<V>) -> Result<Cache<K, V>>
    where
        K: Eq + Hash + Clone + Send + Sync + 'static,
        V: Send + Sync + 'static,
    {
        let mut registry = self.shared.registry.write();
        if registry.contains_key(name) {
            return Err(Error::AlreadyExists {
                name: name.to_string(),
            });
        }
        let name: Arc<str> = Arc::from(name);
        let slot = StoreSlot::new(Arc::clone(&name), Arc::downgrade(&self.shared), config);
        registry.insert(name, Arc::clone(&slot) as Arc<dyn AnyCache>);
        Ok(Cache::from_slot(slot))
    }

    /// Returns the named cache, creating it if absent.
    ///
    /// When the cache already exists it is returned unchanged and `config`
    /// is ignored entirely.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TypeMismatch`] if an existing cache was registered
    /// with different key or value types.
    pub fn cache_or_create<K, V>(&self, name: &str, config: CacheConfig<V>) -> Result<Cache<K, V>>
    where
        K: Eq + Hash + Clone + Send + Sync + 'static,
        V: Send + Sync + 'static,
    {
        let mut registry = self.shared.registry.write();
        if let Some(existing) = registry.get(name) {
            return downcast_slot(name, Arc::clone(existing));
        }
        let name: Arc<str> = Arc::from(name);
        let slot = StoreSlot::new(Arc::clone(&name), Arc::downgrade(&self.shared), config);
        registry.insert(name, Arc::clone(&slot) as Arc<dyn AnyCache>);
        Ok(Cache::from_slot(slot))
    }

    /// Returns the named cache.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if no cache has this name, or
    /// [`Error::TypeMismatch`] if it was registered with different key or
    /// value types.
    pub fn cache<K, V>(&self, name: &str) -> Result<Cache<K, V>>
    where
        K: Eq + Hash + Clone + Send + Sync + 'static,
        V: Send + Sync + 'static,
    {
        let slot = {
            let registry = self.shared.registry.read();
            registry.get(name).cloned()
        };
        match slot {
            Some(slot) => downcast_slot(name, slot),
            None => Err(Error::NotFound {
                name: name.to_string(),
            }),
        }
    }

    /// Returns whether a cache with this name is registered.
    #[must_use]
    pub fn exists(&self, name: &str) -> bool {
        self.shared.registry.read().contains_key(name)
    }

    /// Returns a sorted snapshot of all registered cache names.
    #[must_use]
    pub fn cache_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.shared.registry.read().keys().map(ToString::to_string).collect();
        names.sort_unstable();
        names
    }

    /// Removes the named cache, expiring every entry it owned.
    ///
    /// Existing handles to the cache become inert tombstones. Returns
    /// whether the cache existed.
    pub fn remove_cache(&self, name: &str) -> bool {
        self.shared.remove_cache(name)
    }

    /// Removes every registered cache. See [`remove_cache`](Self::remove_cache).
    pub fn remove_all_caches(&self) {
        self.shared.remove_all_caches();
    }

    /// Returns the number of live entries across all caches.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shared.index.lock().len()
    }

    /// Returns `true` if no cache holds any entry.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Runs a full sweep now, regardless of the sweep deadline.
    ///
    /// Blocks on the entry lock for the duration. Returns whether anything
    /// was expired or evicted.
    pub fn sweep(&self) -> bool {
        self.shared.sweep()
    }
}

impl Default for CacheManager {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CacheManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let counts: BTreeMap<String, usize> = self
            .shared
            .registry
            .read()
            .values()
            .map(|slot| (slot.name().to_string(), slot.len()))
            .collect();
        f.debug_struct("CacheManager")
            .field("caches", &counts)
            .field("total_entries", &self.len())
            .finish()
    }
}

fn downcast_slot<K, V>(name: &str, slot: Arc<dyn AnyCache>) -> Result<Cache<K, V>>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    slot.as_any()
        .downcast::<StoreSlot<K, V>>()
        .map(Cache::from_slot)
        .map_err(|_mismatch| Error::TypeMismatch {
            name: name.to_string(),
        })
}

/// Builder for [`CacheManager`].
#[derive(Debug)]
pub struct CacheManagerBuilder {
    clock: Option<Clock>,
    max_total_entries: usize,
    sweep_window: Duration,
}

impl CacheManagerBuilder {
    fn new() -> Self {
        Self {
            clock: None,
            max_total_entries: 0,
            sweep_window: DEFAULT_SWEEP_WINDOW,
        }
    }

    /// Sets the clock all TTL arithmetic reads from.
    ///
    /// Defaults to the system's monotonic clock. Tests pass a frozen clock
    /// to control the passage of time.
    #[must_use]
    pub fn clock(mut self, clock: Clock) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Bounds the number of entries across all caches combined; zero is
    /// unbounded.
    #[must_use]
    pub fn max_total_entries(mut self, max_total_entries: usize) -> Self {
        self.max_total_entries = max_total_entries;
        self
    }

    /// Sets how long the manager waits between automatic sweeps.
    #[must_use]
    pub fn sweep_window(mut self, sweep_window: Duration) -> Self {
        self.sweep_window = sweep_window;
        self
    }

    /// Builds the manager.
    #[must_use]
    pub fn build(self) -> CacheManager {
        let clock = self.clock.unwrap_or_default();
        let sweep_window_millis = duration_to_millis(self.sweep_window);
        let next_sweep_millis = clock.now_millis().saturating_add(sweep_window_millis);
        CacheManager {
            shared: Arc::new(ManagerShared {
                clock,
                max_total_entries: self.max_total_entries,
                sweep_window_millis,
                registry: RwLock::new(HashMap::new()),
                index: Mutex::new(BTreeMap::new()),
                next_sweep_millis: AtomicU64::new(next_sweep_millis),
                seq: AtomicU64::new(0),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReferenceType;

    fn frozen_manager() -> (CacheManager, Clock) {
        let clock = Clock::new_frozen();
        let manager = CacheManager::builder().clock(clock.clone()).build();
        (manager, clock)
    }

    fn config() -> CacheConfig<i32> {
        CacheConfig::builder()
            .ttl(Duration::from_millis(100))
            .build()
            .expect("config should build")
    }

    #[test]
    fn sweep_expires_due_entries() {
        let (manager, clock) = frozen_manager();
        let cache = manager.create_cache::<String, i32>("a", config()).expect("create");

        cache.put("k".to_string(), 1).expect("put");
        assert_eq!(manager.len(), 1);

        clock.advance(Duration::from_millis(150));
        assert!(manager.sweep());
        assert_eq!(manager.len(), 0);
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn sweep_requeues_refreshed_entries() {
        let (manager, clock) = frozen_manager();
        let cache = manager
            .create_cache::<String, i32>(
                "a",
                CacheConfig::builder()
                    .ttl(Duration::from_millis(100))
                    .refresh(true)
                    .build()
                    .expect("config"),
            )
            .expect("create");

        cache.put("k".to_string(), 1).expect("put");
        clock.advance(Duration::from_millis(80));
        // Refresh pushes the actual expiry to t=180 while the index still
        // holds the entry at t=100.
        assert!(cache.get(&"k".to_string()).is_some());

        clock.advance(Duration::from_millis(40)); // t=120, stale position due
        assert!(!manager.sweep(), "refreshed entry must be requeued, not expired");
        assert_eq!(cache.get(&"k".to_string()).as_deref(), Some(&1));

        clock.advance(Duration::from_millis(100)); // t=220 > 180
        assert!(manager.sweep());
        assert!(cache.get(&"k".to_string()).is_none());
    }

    #[test]
    fn sweep_enforces_per_cache_bound_in_insertion_order() {
        let (manager, _clock) = frozen_manager();
        let cache = manager
            .create_cache::<String, i32>(
                "a",
                CacheConfig::builder()
                    .ttl(Duration::from_secs(10))
                    .max_entries(2)
                    .build()
                    .expect("config"),
            )
            .expect("create");

        cache.put("a".to_string(), 1).expect("put");
        cache.put("b".to_string(), 2).expect("put");
        cache.put("c".to_string(), 3).expect("put");

        assert!(manager.sweep());
        assert_eq!(cache.len(), 2);
        assert!(cache.get(&"a".to_string()).is_none(), "oldest entry should be evicted");
        assert_eq!(cache.get(&"c".to_string()).as_deref(), Some(&3));
    }

    #[test]
    fn refreshed_entries_survive_capacity_eviction_preferentially() {
        let (manager, clock) = frozen_manager();
        let cache = manager
            .create_cache::<String, i32>(
                "a",
                CacheConfig::builder()
                    .ttl(Duration::from_secs(10))
                    .refresh(true)
                    .max_entries(2)
                    .build()
                    .expect("config"),
            )
            .expect("create");

        cache.put("a".to_string(), 1).expect("put");
        cache.put("b".to_string(), 2).expect("put");
        cache.put("c".to_string(), 3).expect("put");

        clock.advance(Duration::from_millis(10));
        // "a" is oldest in the index but gets refreshed; "b" does not.
        assert!(cache.get(&"a".to_string()).is_some());

        assert!(manager.sweep());
        assert_eq!(cache.len(), 2);
        assert!(cache.get(&"a".to_string()).is_some(), "refreshed entry should survive");
        assert!(cache.get(&"b".to_string()).is_none(), "unrefreshed entry should be evicted");
    }

    #[test]
    fn sweep_enforces_global_bound_across_caches() {
        let clock = Clock::new_frozen();
        let manager = CacheManager::builder().clock(clock.clone()).max_total_entries(3).build();

        let a = manager.create_cache::<String, i32>("a", config()).expect("create");
        let b = manager.create_cache::<String, i32>("b", config()).expect("create");

        a.put("1".to_string(), 1).expect("put");
        a.put("2".to_string(), 2).expect("put");
        b.put("3".to_string(), 3).expect("put");
        b.put("4".to_string(), 4).expect("put");
        b.put("5".to_string(), 5).expect("put");

        assert!(manager.sweep());
        assert_eq!(manager.len(), 3);
        assert_eq!(a.len() + b.len(), 3);
    }

    #[test]
    fn automatic_sweep_waits_for_the_deadline() {
        let clock = Clock::new_frozen();
        let manager = CacheManager::builder()
            .clock(clock.clone())
            .sweep_window(Duration::from_secs(30))
            .build();
        let cache = manager.create_cache::<String, i32>("a", config()).expect("create");

        cache.put("k".to_string(), 1).expect("put");
        clock.advance(Duration::from_millis(200)); // entry due, deadline not
        cache.put("other".to_string(), 2).expect("put");
        assert_eq!(manager.len(), 2, "no sweep before the deadline");

        clock.advance(Duration::from_secs(30));
        cache.put("trigger".to_string(), 3).expect("put");
        // The mutation passed the deadline, so the stale entries are gone.
        assert_eq!(manager.len(), 1);
    }

    #[test]
    fn dead_foreign_entries_are_collected_during_a_bounded_scan() {
        let (manager, _clock) = frozen_manager();
        let weak = manager
            .create_cache::<String, i32>(
                "weak",
                CacheConfig::builder()
                    .ttl(Duration::from_secs(10))
                    .reference_type(ReferenceType::Weak)
                    .build()
                    .expect("config"),
            )
            .expect("create");
        let bounded = manager
            .create_cache::<String, i32>(
                "bounded",
                CacheConfig::builder()
                    .ttl(Duration::from_secs(10))
                    .max_entries(1)
                    .build()
                    .expect("config"),
            )
            .expect("create");

        {
            let value = Arc::new(9);
            weak.put("w".to_string(), Arc::clone(&value)).expect("put");
            // value dropped here; the weak entry is now dead weight.
        }
        bounded.put("x".to_string(), 1).expect("put");
        bounded.put("y".to_string(), 2).expect("put");

        assert!(manager.sweep());
        assert_eq!(bounded.len(), 1);
        assert_eq!(weak.len(), 0, "dead weak entry should be collected in passing");
    }

    #[test]
    fn debug_snapshot_lists_per_cache_counts() {
        let (manager, _clock) = frozen_manager();
        let a = manager.create_cache::<String, i32>("alpha", config()).expect("create");
        a.put("k".to_string(), 1).expect("put");

        let rendered = format!("{manager:?}");
        assert!(rendered.contains("alpha"), "got: {rendered}");
        assert!(rendered.contains("total_entries: 1"), "got: {rendered}");
    }
}
