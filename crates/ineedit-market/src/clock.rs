//! Time source abstraction.
//!
//! Operations read the clock exactly once and thread that instant through
//! every comparison and timestamp they write.

use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Duration, TimeZone, Utc};

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to. Clones share the same instant.
#[derive(Debug, Clone)]
pub struct ManualClock {
    current: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            current: Arc::new(Mutex::new(start)),
        }
    }

    /// Start at 2026-01-02 09:00:00 UTC.
    pub fn default_start() -> Self {
        Self::new(Utc.with_ymd_and_hms(2026, 1, 2, 9, 0, 0).single().unwrap_or_default())
    }

    pub fn set(&self, at: DateTime<Utc>) {
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = at;
    }

    pub fn advance(&self, by: Duration) {
        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        *current += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::default_start()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_advances_for_all_clones() {
        let clock = ManualClock::default();
        let other = clock.clone();
        let start = clock.now();

        clock.advance(Duration::hours(25));
        assert_eq!(other.now() - start, Duration::hours(25));
    }

    #[test]
    fn system_clock_is_recent() {
        let now = SystemClock.now();
        assert!(now.timestamp() > 1_577_836_800);
    }
}
