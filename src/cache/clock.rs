//! Injectable wall clock so expiry can be tested deterministically.

use chrono::{DateTime, Duration, Utc};
use std::sync::Mutex;

/// Source of the current time for every expiry decision in the cache.
pub trait Clock: Send + Sync {
  fn now(&self) -> DateTime<Utc>;

  /// Current Unix timestamp in milliseconds, the unit persisted in `_expiry` keys.
  fn now_millis(&self) -> i64 {
    self.now().timestamp_millis()
  }
}

/// Real system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
  fn now(&self) -> DateTime<Utc> {
    Utc::now()
  }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
  now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
  pub fn new(start: DateTime<Utc>) -> Self {
    Self {
      now: Mutex::new(start),
    }
  }

  /// Start at a fixed millisecond timestamp.
  pub fn at_millis(millis: i64) -> Self {
    Self::new(DateTime::from_timestamp_millis(millis).unwrap_or_default())
  }

  pub fn advance(&self, by: Duration) {
    if let Ok(mut now) = self.now.lock() {
      *now += by;
    }
  }

  pub fn set(&self, to: DateTime<Utc>) {
    if let Ok(mut now) = self.now.lock() {
      *now = to;
    }
  }
}

impl Clock for ManualClock {
  fn now(&self) -> DateTime<Utc> {
    self.now.lock().map(|now| *now).unwrap_or_else(|e| *e.into_inner())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_manual_clock_advances() {
    let clock = ManualClock::at_millis(1_000);
    assert_eq!(clock.now_millis(), 1_000);

    clock.advance(Duration::milliseconds(250));
    assert_eq!(clock.now_millis(), 1_250);
  }
}
