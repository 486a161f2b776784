// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Time source abstraction.
//!
//! All TTL arithmetic in this crate goes through a [`Clock`] so that the
//! passage of time can be controlled in tests instead of sleeping. In
//! production the clock reports monotonic milliseconds since the instant it
//! was created; with the `test-util` feature a frozen clock starts at zero
//! and only moves when [`Clock::advance`] is called.

use std::time::Instant;
#[cfg(any(feature = "test-util", test))]
use std::{
    sync::Arc,
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

/// A cheap-to-clone source of monotonic time.
///
/// Every clone shares the same underlying state: clones of a frozen clock all
/// observe the same manual time adjustments.
///
/// # Examples
///
/// ```
/// use cachery::Clock;
///
/// let clock = Clock::new();
/// let shared = clock.clone();
/// ```
#[derive(Clone, Debug)]
pub struct Clock {
    inner: ClockInner,
}

#[derive(Clone, Debug)]
enum ClockInner {
    /// Monotonic system time, measured from an epoch captured at construction.
    System { epoch: Instant },
    /// Manually driven time for tests.
    #[cfg(any(feature = "test-util", test))]
    Frozen(Arc<AtomicU64>),
}

impl Clock {
    /// Creates a clock backed by the system's monotonic clock.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: ClockInner::System {
                epoch: Instant::now(),
            },
        }
    }

    /// Creates a clock frozen at time zero.
    ///
    /// Time only moves when [`advance`](Self::advance) is called, which makes
    /// TTL behavior fully deterministic in tests.
    #[cfg(any(feature = "test-util", test))]
    #[must_use]
    pub fn new_frozen() -> Self {
        Self {
            inner: ClockInner::Frozen(Arc::new(AtomicU64::new(0))),
        }
    }

    /// Moves a frozen clock forward by `delta`.
    ///
    /// The jump is visible to every clone of the clock.
    ///
    /// # Panics
    ///
    /// Panics if the clock was not created with [`new_frozen`](Self::new_frozen).
    #[cfg(any(feature = "test-util", test))]
    #[expect(clippy::panic, reason = "misuse of a test-only control surface")]
    pub fn advance(&self, delta: Duration) {
        match &self.inner {
            ClockInner::Frozen(millis) => {
                millis.fetch_add(duration_to_millis(delta), Ordering::SeqCst);
            }
            ClockInner::System { .. } => {
                panic!("Clock::advance requires a clock created with Clock::new_frozen")
            }
        }
    }

    /// Returns the current time in milliseconds since the clock's epoch.
    pub(crate) fn now_millis(&self) -> u64 {
        match &self.inner {
            ClockInner::System { epoch } => duration_to_millis(epoch.elapsed()),
            #[cfg(any(feature = "test-util", test))]
            ClockInner::Frozen(millis) => millis.load(Ordering::SeqCst),
        }
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

/// Converts a duration to whole milliseconds, saturating at `u64::MAX`.
pub(crate) fn duration_to_millis(duration: std::time::Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn system_clock_is_monotonic() {
        let clock = Clock::new();
        let first = clock.now_millis();
        let second = clock.now_millis();
        assert!(second >= first);
    }

    #[test]
    fn frozen_clock_starts_at_zero() {
        let clock = Clock::new_frozen();
        assert_eq!(clock.now_millis(), 0);
    }

    #[test]
    fn advance_moves_all_clones() {
        let clock = Clock::new_frozen();
        let clone = clock.clone();

        clock.advance(Duration::from_millis(250));
        assert_eq!(clone.now_millis(), 250);

        clone.advance(Duration::from_secs(1));
        assert_eq!(clock.now_millis(), 1250);
    }

    #[test]
    #[should_panic = "requires a clock created with Clock::new_frozen"]
    fn advance_panics_on_system_clock() {
        Clock::new().advance(Duration::from_secs(1));
    }

    #[test]
    fn duration_conversion_saturates() {
        assert_eq!(duration_to_millis(Duration::from_millis(7)), 7);
        assert_eq!(duration_to_millis(Duration::MAX), u64::MAX);
    }
}
