//! Wall-clock source used for lockout bookkeeping.
//!
//! Lockout expiries are absolute instants (an HTTP-date `Retry-After` is an
//! absolute time too), so the clock reports `DateTime<Utc>` rather than a
//! monotonic `Instant`.

use chrono::{DateTime, Utc};

/// Source of the current time.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// The current wall-clock time.
    fn now(&self) -> DateTime<Utc>;
}

/// Clock backed by the system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl SystemClock {
    /// Create a new system clock.
    pub fn new() -> Self {
        Self
    }
}

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[cfg(any(test, feature = "test-helpers"))]
pub use manual::ManualClock;

#[cfg(any(test, feature = "test-helpers"))]
mod manual {
    use super::Clock;
    use chrono::{DateTime, Duration, Utc};
    use parking_lot::Mutex;
    use std::sync::Arc;

    /// Clock whose time only moves when told to.
    ///
    /// Clones share the same underlying time, so a clone handed to a
    /// `Transport` can be advanced from the test body.
    #[derive(Debug, Clone)]
    pub struct ManualClock {
        current: Arc<Mutex<DateTime<Utc>>>,
    }

    impl ManualClock {
        /// Create a clock frozen at `start`.
        pub fn new(start: DateTime<Utc>) -> Self {
            Self {
                current: Arc::new(Mutex::new(start)),
            }
        }

        /// Create a clock frozen at `secs` seconds after the Unix epoch.
        pub fn at_secs(secs: i64) -> Self {
            Self::new(DateTime::from_timestamp(secs, 0).unwrap_or_default())
        }

        /// Move the clock forward.
        pub fn advance(&self, by: Duration) {
            let mut current = self.current.lock();
            *current += by;
        }

        /// Jump to a specific instant.
        pub fn set(&self, to: DateTime<Utc>) {
            *self.current.lock() = to;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.current.lock()
        }
    }
}
