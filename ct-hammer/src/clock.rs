//! Wall-clock abstraction.
//!
//! CT timestamps are milliseconds since the Unix epoch, but the clock itself
//! reads at nanosecond resolution: a cert offered right after its SCT was
//! issued must read as later than the SCT, even within the same millisecond.
//! Everything that compares against SCT timestamps or merge deadlines reads
//! time through [`Clock`] so tests can drive it by hand.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Source of the current time since the Unix epoch.
pub trait Clock: Send + Sync {
    /// Returns the current time.
    fn now(&self) -> Duration;

    /// Returns the current time in whole milliseconds.
    #[allow(clippy::cast_possible_truncation)] // u64 milliseconds last until year 584 million.
    fn now_ms(&self) -> u64 {
        self.now().as_millis() as u64
    }
}

/// The system wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
    }
}

/// A clock that only moves when told to.
///
/// Each reading is one nanosecond later than the previous one, so events read
/// in sequence are strictly ordered while millisecond readings stay put.
#[derive(Debug, Default)]
pub struct ManualClock {
    now_ns: AtomicU64,
}

impl ManualClock {
    /// Creates a clock reading `start_ms`.
    #[must_use]
    pub const fn new(start_ms: u64) -> Self {
        Self {
            now_ns: AtomicU64::new(start_ms * 1_000_000),
        }
    }

    /// Moves the clock forward.
    #[allow(clippy::cast_possible_truncation)]
    pub fn advance(&self, by: Duration) {
        self.now_ns.fetch_add(by.as_nanos() as u64, Ordering::SeqCst);
    }

    /// Sets the clock to an absolute time in milliseconds.
    pub fn set(&self, now_ms: u64) {
        self.now_ns.store(now_ms * 1_000_000, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        Duration::from_nanos(self.now_ns.fetch_add(1, Ordering::SeqCst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_moves_on_request() {
        let clock = ManualClock::new(1_000);
        assert_eq!(clock.now_ms(), 1_000);
        clock.advance(Duration::from_secs(2));
        assert_eq!(clock.now_ms(), 3_000);
        clock.set(10);
        assert_eq!(clock.now_ms(), 10);
    }

    #[test]
    fn test_manual_readings_strictly_increase() {
        let clock = ManualClock::new(5);
        let first = clock.now();
        let second = clock.now();
        assert!(second > first);
        assert_eq!(first, Duration::from_millis(5));
        assert_eq!(clock.now_ms(), 5);
    }

    #[test]
    fn test_system_clock_is_after_2020() {
        assert!(SystemClock.now_ms() > 1_577_836_800_000);
        assert!(SystemClock.now() > Duration::from_secs(1_577_836_800));
    }
}
