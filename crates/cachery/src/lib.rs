// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

//! An in-process manager of named, thread-safe TTL caches.
//!
//! This crate provides [`CacheManager`], a single owner for any number of
//! named key/value caches with independently typed keys and values. Each
//! cache applies a time-to-live to its entries, may optionally refresh that
//! TTL on every read, and may bound how many entries it holds; the manager
//! additionally bounds the total entry count across all of its caches.
//!
//! 1. **Refresh without resorting:** each entry carries two expiry
//!    timestamps. Reads advance the actual expiry lock-free; the entry's
//!    position in the manager's ordered expiration index is reconciled
//!    lazily during sweeps, so a read never resorts anything.
//! 2. **One index, many caches:** the manager keeps a single expiration
//!    index over every entry of every cache, ordered by expiry. TTL
//!    expiration, per-cache eviction, and global eviction all walk this one
//!    structure, oldest-expiry first.
//! 3. **Amortized sweeping:** expired entries are collected in bulk by a
//!    periodic sweep piggybacked on mutating operations, rather than by a
//!    background thread. Stale entries read as absent in the meantime.
//! 4. **Value retention modes:** a cache holds its values strongly (owned),
//!    softly (owned, but never handed to a disposer), or weakly (alive only
//!    while the caller retains an `Arc`). See [`ReferenceType`].
//! 5. **Disposer callbacks:** a strongly retaining cache can run a callback
//!    exactly once for every value it discards through expiry, eviction,
//!    [`Cache::clear`], or cache removal. Values the caller takes back are
//!    never disposed.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//!
//! use cachery::{CacheConfig, CacheManager};
//!
//! let manager = CacheManager::new();
//!
//! let sessions = manager.create_cache::<String, String>(
//!     "sessions",
//!     CacheConfig::builder()
//!         .ttl(Duration::from_secs(300))
//!         .refresh(true)
//!         .max_entries(10_000)
//!         .build()?,
//! )?;
//!
//! sessions.put("user-1".to_string(), "token-abc".to_string())?;
//! assert_eq!(sessions.get(&"user-1".to_string()).as_deref(), Some(&"token-abc".to_string()));
//!
//! // Another handle to the same cache, retrieved by name.
//! let same = manager.cache::<String, String>("sessions")?;
//! assert_eq!(same.len(), 1);
//!
//! manager.remove_cache("sessions");
//! assert!(sessions.get(&"user-1".to_string()).is_none());
//! # Ok::<(), cachery::Error>(())
//! ```

mod cache;
mod clock;
mod config;
mod entry;
mod error;
mod manager;

pub use cache::{Cache, Iter, Keys, Values};
pub use clock::Clock;
pub use config::{CacheConfig, CacheConfigBuilder, DEFAULT_TTL, MIN_TTL, ReferenceType};
pub use error::{Error, Result};
pub use manager::{CacheManager, CacheManagerBuilder, DEFAULT_SWEEP_WINDOW};
