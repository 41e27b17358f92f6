// pulse - bitdrift's observability proxy
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./rate_limit_test.rs"]
mod rate_limit_test;

use parking_lot::Mutex;
use std::time::Instant;

// Log a warning at most once per interval for a given call site. The interval is a
// time::Duration, e.g., warn_every!(1.minutes(), "something happened: {}", value).
#[macro_export]
macro_rules! warn_every {
  ($interval:expr, $($arg:tt)+) => {{
    static LIMITER: $crate::rate_limit::RateLimiter = $crate::rate_limit::RateLimiter::new();
    if LIMITER.should_log($interval) {
      $crate::__log::warn!($($arg)+);
    }
  }};
}

// Same as warn_every! but at error level.
#[macro_export]
macro_rules! error_every {
  ($interval:expr, $($arg:tt)+) => {{
    static LIMITER: $crate::rate_limit::RateLimiter = $crate::rate_limit::RateLimiter::new();
    if LIMITER.should_log($interval) {
      $crate::__log::error!($($arg)+);
    }
  }};
}

//
// RateLimiter
//

// Tracks the last time a call site was allowed through.
pub struct RateLimiter {
  last_logged: Mutex<Option<Instant>>,
}

impl Default for RateLimiter {
  fn default() -> Self {
    Self::new()
  }
}

impl RateLimiter {
  #[must_use]
  pub const fn new() -> Self {
    Self {
      last_logged: parking_lot::const_mutex(None),
    }
  }

  pub fn should_log(&self, interval: time::Duration) -> bool {
    self.should_log_at(interval, Instant::now())
  }

  fn should_log_at(&self, interval: time::Duration, now: Instant) -> bool {
    let mut last_logged = self.last_logged.lock();
    match *last_logged {
      Some(last) if now.saturating_duration_since(last) < interval.unsigned_abs() => false,
      _ => {
        *last_logged = Some(now);
        true
      },
    }
  }
}
