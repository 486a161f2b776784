// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Per-cache configuration.
//!
//! A [`CacheConfig`] describes one named cache: its default time-to-live,
//! whether reads refresh that TTL, an optional entry-count bound, how
//! strongly values are retained, and an optional disposer callback. Invalid
//! combinations are rejected when the configuration is built, never later.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{Error, Result};

/// The shortest TTL a cache or an individual operation may use.
pub const MIN_TTL: Duration = Duration::from_millis(1);

/// The default TTL applied when a configuration does not specify one.
pub const DEFAULT_TTL: Duration = Duration::from_secs(10);

/// A caller-supplied callback invoked once per discarded value.
pub(crate) type Disposer<V> = Arc<dyn Fn(Arc<V>) + Send + Sync>;

/// How strongly a cache retains its values.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ReferenceType {
    /// The cache owns the value. It is only discarded by expiry, eviction,
    /// or explicit removal, and it is the only retention mode that may carry
    /// a disposer.
    #[default]
    Strong,
    /// Soft retention. Rust has no memory-pressure reclamation signal, so a
    /// softly retained value behaves like a strongly retained one except
    /// that it is never disposer-eligible: the contract that reclaimed
    /// values are never disposed is preserved by never attaching a disposer.
    Soft,
    /// The cache holds only a [`std::sync::Weak`] reference. The value stays
    /// retrievable while the caller keeps at least one other [`Arc`] to it;
    /// once that drops, the entry is treated as already expired.
    Weak,
}

/// Configuration for a single named cache.
///
/// Build one with [`CacheConfig::builder`] and hand it to
/// [`CacheManager::create_cache`](crate::CacheManager::create_cache).
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use cachery::{CacheConfig, ReferenceType};
///
/// let config = CacheConfig::<String>::builder()
///     .ttl(Duration::from_secs(60))
///     .refresh(true)
///     .max_entries(10_000)
///     .build()?;
///
/// assert_eq!(config.reference_type(), ReferenceType::Strong);
/// # Ok::<(), cachery::Error>(())
/// ```
pub struct CacheConfig<V> {
    pub(crate) ttl: Duration,
    pub(crate) refresh: bool,
    pub(crate) max_entries: usize,
    pub(crate) reference_type: ReferenceType,
    pub(crate) disposer: Option<Disposer<V>>,
}

impl<V> CacheConfig<V> {
    /// Creates a builder with the default settings: a TTL of ten seconds,
    /// refresh off, no entry bound, and strong retention.
    #[must_use]
    pub fn builder() -> CacheConfigBuilder<V> {
        CacheConfigBuilder::new()
    }

    /// Returns the default TTL for entries in this cache.
    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Returns whether reads extend an entry's TTL.
    #[must_use]
    pub fn refresh(&self) -> bool {
        self.refresh
    }

    /// Returns the entry-count bound, where zero means unbounded.
    #[must_use]
    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    /// Returns how strongly values are retained.
    #[must_use]
    pub fn reference_type(&self) -> ReferenceType {
        self.reference_type
    }
}

impl<V> Default for CacheConfig<V> {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_TTL,
            refresh: false,
            max_entries: 0,
            reference_type: ReferenceType::Strong,
            disposer: None,
        }
    }
}

impl<V> Clone for CacheConfig<V> {
    fn clone(&self) -> Self {
        Self {
            ttl: self.ttl,
            refresh: self.refresh,
            max_entries: self.max_entries,
            reference_type: self.reference_type,
            disposer: self.disposer.clone(),
        }
    }
}

impl<V> fmt::Debug for CacheConfig<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheConfig")
            .field("ttl", &self.ttl)
            .field("refresh", &self.refresh)
            .field("max_entries", &self.max_entries)
            .field("reference_type", &self.reference_type)
            .field("disposer", &self.disposer.is_some())
            .finish()
    }
}

/// Builder for [`CacheConfig`].
pub struct CacheConfigBuilder<V> {
    config: CacheConfig<V>,
}

impl<V> CacheConfigBuilder<V> {
    fn new() -> Self {
        Self {
            config: CacheConfig::default(),
        }
    }

    /// Sets the default TTL for entries in this cache.
    #[must_use]
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.config.ttl = ttl;
        self
    }

    /// Enables or disables refresh-on-access.
    ///
    /// When enabled, every successful read pushes the entry's actual expiry
    /// forward by its TTL. The entry's position in the expiration order is
    /// reconciled lazily during sweeps, not on the read itself.
    #[must_use]
    pub fn refresh(mut self, refresh: bool) -> Self {
        self.config.refresh = refresh;
        self
    }

    /// Bounds the number of entries this cache may hold; zero is unbounded.
    ///
    /// The bound is enforced by the manager's sweep, which evicts the
    /// least-recently-refreshed entries first.
    #[must_use]
    pub fn max_entries(mut self, max_entries: usize) -> Self {
        self.config.max_entries = max_entries;
        self
    }

    /// Sets how strongly values are retained.
    #[must_use]
    pub fn reference_type(mut self, reference_type: ReferenceType) -> Self {
        self.config.reference_type = reference_type;
        self
    }

    /// Installs a disposer invoked exactly once per value the cache
    /// discards through expiry, eviction, [`clear`](crate::Cache::clear),
    /// or cache removal.
    ///
    /// Values handed back to the caller (by `remove`, `replace`, or a `put`
    /// overwrite) are not disposed. Requires [`ReferenceType::Strong`].
    #[must_use]
    pub fn disposer(mut self, disposer: impl Fn(Arc<V>) + Send + Sync + 'static) -> Self {
        self.config.disposer = Some(Arc::new(disposer));
        self
    }

    /// Validates the configuration and builds it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidTtl`] if the TTL is shorter than one
    /// millisecond, or [`Error::DisposerRequiresStrong`] if a disposer was
    /// combined with soft or weak retention.
    pub fn build(self) -> Result<CacheConfig<V>> {
        let config = self.config;
        if config.ttl < MIN_TTL {
            return Err(Error::InvalidTtl { ttl: config.ttl });
        }
        if config.disposer.is_some() && config.reference_type != ReferenceType::Strong {
            return Err(Error::DisposerRequiresStrong);
        }
        Ok(config)
    }
}

impl<V> fmt::Debug for CacheConfigBuilder<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheConfigBuilder").field("config", &self.config).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = CacheConfig::<i32>::builder().build().expect("defaults should build");
        assert_eq!(config.ttl(), DEFAULT_TTL);
        assert!(!config.refresh());
        assert_eq!(config.max_entries(), 0);
        assert_eq!(config.reference_type(), ReferenceType::Strong);
    }

    #[test]
    fn sub_millisecond_ttl_is_rejected() {
        let result = CacheConfig::<i32>::builder().ttl(Duration::from_micros(500)).build();
        assert_eq!(
            result.expect_err("should reject"),
            Error::InvalidTtl {
                ttl: Duration::from_micros(500)
            }
        );
    }

    #[test]
    fn disposer_requires_strong_retention() {
        let result = CacheConfig::<i32>::builder()
            .reference_type(ReferenceType::Weak)
            .disposer(|_| {})
            .build();
        assert_eq!(result.expect_err("should reject"), Error::DisposerRequiresStrong);
    }

    #[test]
    fn disposer_with_strong_retention_builds() {
        let config = CacheConfig::<i32>::builder().disposer(|_| {}).build();
        assert!(config.is_ok());
    }

    #[test]
    fn debug_hides_the_disposer_body() {
        let config = CacheConfig::<i32>::builder()
            .disposer(|_| {})
            .build()
            .expect("should build");
        let rendered = format!("{config:?}");
        assert!(rendered.contains("disposer: true"), "got: {rendered}");
    }
}
