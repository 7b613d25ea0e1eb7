use chrono::{Duration, Local, NaiveDateTime, Timelike};
use std::sync::Mutex;

/// Source of the current local wall-clock time.
///
/// Everything that compares against an expiration timestamp reads the time
/// through this trait so tests can move time forward without sleeping.
pub trait Clock: Send + Sync {
    /// Returns the current local time, truncated to whole seconds
    fn now(&self) -> NaiveDateTime;
}

/// Reads the operating system's local clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        truncate_to_seconds(Local::now().naive_local())
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<NaiveDateTime>,
}

impl ManualClock {
    pub fn new(start: NaiveDateTime) -> Self {
        Self {
            now: Mutex::new(truncate_to_seconds(start)),
        }
    }

    /// Starts at the current system time
    pub fn starting_now() -> Self {
        Self::new(SystemClock.now())
    }

    pub fn set(&self, to: NaiveDateTime) {
        *self.lock() = truncate_to_seconds(to);
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.lock();
        *now += by;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, NaiveDateTime> {
        // A poisoned clock still holds a valid timestamp
        self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> NaiveDateTime {
        *self.lock()
    }
}

fn truncate_to_seconds(ts: NaiveDateTime) -> NaiveDateTime {
    ts.with_nanosecond(0).unwrap_or(ts)
}
