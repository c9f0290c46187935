//! Time source abstraction.
//!
//! Breakers, sessions and caches read time through a [`Clock`] so tests can
//! move time forward deterministically with [`ManualClock`].

use std::fmt::Debug;
use std::sync::Arc;

use parking_lot::Mutex;
use time::OffsetDateTime;

/// A source of the current UTC time.
pub trait Clock: Send + Sync + Debug {
    /// Returns the current time.
    fn now(&self) -> OffsetDateTime;
}

/// Shared clock handle.
pub type SharedClock = Arc<dyn Clock>;

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}

/// Returns a shared [`SystemClock`].
#[must_use]
pub fn system_clock() -> SharedClock {
    Arc::new(SystemClock)
}

/// A clock that only moves when told to.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<OffsetDateTime>>,
}

impl ManualClock {
    /// Creates a clock frozen at `start`.
    #[must_use]
    pub fn new(start: OffsetDateTime) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    /// Creates a clock frozen at the current wall time.
    #[must_use]
    pub fn starting_now() -> Self {
        Self::new(OffsetDateTime::now_utc())
    }

    /// Moves the clock forward.
    pub fn advance(&self, by: std::time::Duration) {
        let mut now = self.now.lock();
        *now = *now + to_time_duration(by);
    }

    /// Sets the clock to an absolute instant.
    pub fn set(&self, at: OffsetDateTime) {
        *self.now.lock() = at;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> OffsetDateTime {
        *self.now.lock()
    }
}

/// Converts a std duration, saturating at `time::Duration::MAX`.
pub(crate) fn to_time_duration(d: std::time::Duration) -> time::Duration {
    time::Duration::try_from(d).unwrap_or(time::Duration::MAX)
}

/// Time elapsed from `since` to `now`, zero if `since` is in the future.
pub(crate) fn elapsed(now: OffsetDateTime, since: OffsetDateTime) -> std::time::Duration {
    std::time::Duration::try_from(now - since).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use time::macros::datetime;

    #[test]
    fn test_manual_clock_advances() {
        let clock = ManualClock::new(datetime!(2024-01-01 00:00 UTC));
        clock.advance(Duration::from_secs(90));
        assert_eq!(clock.now(), datetime!(2024-01-01 00:01:30 UTC));

        let shared: SharedClock = Arc::new(clock.clone());
        clock.advance(Duration::from_secs(30));
        assert_eq!(shared.now(), datetime!(2024-01-01 00:02 UTC));
    }

    #[test]
    fn test_elapsed_never_negative() {
        let a = datetime!(2024-01-01 00:00 UTC);
        let b = datetime!(2024-01-01 00:00:10 UTC);
        assert_eq!(elapsed(b, a), Duration::from_secs(10));
        assert_eq!(elapsed(a, b), Duration::ZERO);
    }
}
