//! Wall-clock abstraction.
//!
//! Every expiry and cooldown is evaluated against the server clock at the
//! moment a request arrives. Managers take a [`Clock`] so tests can move
//! time forward without sleeping.

use chrono::{DateTime, Duration, Utc};
use std::sync::{Arc, Mutex};

/// Source of the current time
pub trait Clock: Send + Sync {
    /// Current UTC timestamp
    fn now(&self) -> DateTime<Utc>;
}

/// System clock used in production.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually advanced clock for deterministic tests.
#[derive(Debug, Clone)]
pub struct ManualClock {
    current: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    /// Create a clock frozen at `start`
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            current: Arc::new(Mutex::new(start)),
        }
    }

    /// Move the clock forward
    pub fn advance(&self, by: Duration) {
        let mut current = self.current.lock().unwrap_or_else(|e| e.into_inner());
        *current += by;
    }

    /// Jump to an absolute instant
    pub fn set(&self, to: DateTime<Utc>) {
        *self.current.lock().unwrap_or_else(|e| e.into_inner()) = to;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.current.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Shared clock handle
pub type SharedClock = Arc<dyn Clock>;

/// Whole seconds from `now` until `until`, never negative
pub fn seconds_until(now: DateTime<Utc>, until: DateTime<Utc>) -> i64 {
    let millis = (until - now).num_milliseconds();
    if millis <= 0 {
        0
    } else {
        // Round up so a countdown never reports 0 while still blocked
        (millis + 999) / 1000
    }
}
