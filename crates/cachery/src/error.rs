// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Error types for cache configuration and registry operations.
//!
//! Only configuration and registry lookups fail synchronously. Steady-state
//! cache behavior — expired reads, reclaimed weak values, entries removed
//! concurrently during a sweep — is never reported as an error.

use std::time::Duration;

/// An error from a cache configuration or registry operation.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// A time-to-live shorter than one millisecond was supplied.
    #[error("time-to-live must be at least one millisecond, got {ttl:?}")]
    InvalidTtl {
        /// The rejected duration.
        ttl: Duration,
    },

    /// A value disposer was configured on a cache that does not retain its
    /// values strongly.
    ///
    /// Only strongly retained values are guaranteed to still be live when the
    /// cache discards them, so only those caches may carry a disposer.
    #[error("a value disposer requires strong reference retention")]
    DisposerRequiresStrong,

    /// A cache with the requested name is already registered.
    #[error("a cache named `{name}` already exists")]
    AlreadyExists {
        /// The conflicting cache name.
        name: String,
    },

    /// No cache with the requested name is registered.
    #[error("no cache named `{name}` is registered")]
    NotFound {
        /// The requested cache name.
        name: String,
    },

    /// A cache with the requested name exists but was registered with
    /// different key or value types.
    #[error("cache `{name}` is registered with different key or value types")]
    TypeMismatch {
        /// The requested cache name.
        name: String,
    },
}

/// A specialized [`Result`] type for cache operations.
pub type Result<T> = std::result::Result<T, Error>;
