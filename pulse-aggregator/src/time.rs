// pulse - bitdrift's observability proxy
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./time_test.rs"]
mod time_test;

use std::fmt::Display;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use time::{Duration, OffsetDateTime};

// Convert a duration to whole nanoseconds, saturating at the i64 bounds.
#[must_use]
pub fn duration_nanos(duration: Duration) -> i64 {
  i64::try_from(duration.whole_nanoseconds()).unwrap_or(if duration.is_negative() {
    i64::MIN
  } else {
    i64::MAX
  })
}

//
// UnixNanos
//

// A point in time as nanoseconds since the unix epoch. Window start times are always aligned
// UnixNanos values.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UnixNanos(pub i64);

impl UnixNanos {
  #[must_use]
  pub const fn as_nanos(self) -> i64 {
    self.0
  }

  #[must_use]
  pub fn from_date_time(date_time: OffsetDateTime) -> Self {
    Self(i64::try_from(date_time.unix_timestamp_nanos()).unwrap_or(i64::MAX))
  }

  // Align down to a multiple of the resolution. Non-positive resolutions leave the value as is.
  #[must_use]
  pub fn truncate(self, resolution: Duration) -> Self {
    let resolution = duration_nanos(resolution);
    if resolution <= 0 {
      return self;
    }
    Self(self.0 - self.0.rem_euclid(resolution))
  }

  #[must_use]
  pub fn add_duration(self, duration: Duration) -> Self {
    Self(self.0.saturating_add(duration_nanos(duration)))
  }

  #[must_use]
  pub fn sub_duration(self, duration: Duration) -> Self {
    Self(self.0.saturating_sub(duration_nanos(duration)))
  }

  #[must_use]
  pub fn to_date_time(self) -> Option<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(self.0)).ok()
  }
}

impl Display for UnixNanos {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self.to_date_time() {
      Some(date_time) => write!(f, "{date_time}"),
      None => write!(f, "{}ns", self.0),
    }
  }
}

//
// TimePolicy
//

// Decides when a window is old enough to be consumed and which timestamp a consumed window is
// emitted with. Supplied by the list that owns the element on every consume call.
pub trait TimePolicy: Send + Sync {
  // Whether the window starting at window_start is earlier than the target time.
  fn is_earlier_than(
    &self,
    window_start: UnixNanos,
    resolution: Duration,
    target: UnixNanos,
  ) -> bool;

  // The timestamp a window is emitted with.
  fn timestamp_nanos(&self, window_start: UnixNanos, resolution: Duration) -> UnixNanos;

  // Maps a consume target to the latest time writes for it were still accepted. The difference
  // between the two is the lateness allowed for writes, which is excluded from forwarding lag.
  fn target_nanos(&self, target: UnixNanos) -> UnixNanos;
}

//
// StandardTimePolicy
//

// Untimed metrics. A window is eligible once its end is not after the target and is emitted
// stamped with its end time.
#[derive(Clone, Copy, Debug, Default)]
pub struct StandardTimePolicy {}

impl TimePolicy for StandardTimePolicy {
  fn is_earlier_than(
    &self,
    window_start: UnixNanos,
    resolution: Duration,
    target: UnixNanos,
  ) -> bool {
    window_start.add_duration(resolution) <= target
  }

  fn timestamp_nanos(&self, window_start: UnixNanos, resolution: Duration) -> UnixNanos {
    window_start.add_duration(resolution)
  }

  fn target_nanos(&self, target: UnixNanos) -> UnixNanos {
    target
  }
}

//
// ForwardedTimePolicy
//

// Forwarded (rolled up) metrics. Same eligibility as standard metrics but the consumer is
// allowed to lag behind by the maximum forwarding latency.
#[derive(Clone, Copy, Debug)]
pub struct ForwardedTimePolicy {
  pub max_latency: Duration,
}

impl TimePolicy for ForwardedTimePolicy {
  fn is_earlier_than(
    &self,
    window_start: UnixNanos,
    resolution: Duration,
    target: UnixNanos,
  ) -> bool {
    window_start.add_duration(resolution) <= target
  }

  fn timestamp_nanos(&self, window_start: UnixNanos, resolution: Duration) -> UnixNanos {
    window_start.add_duration(resolution)
  }

  fn target_nanos(&self, target: UnixNanos) -> UnixNanos {
    target.sub_duration(self.max_latency)
  }
}

//
// TimedTimePolicy
//

// Timed metrics carry their own timestamps. Windows are emitted stamped with their start and
// writes are accepted until the buffer past has elapsed.
#[derive(Clone, Copy, Debug)]
pub struct TimedTimePolicy {
  pub buffer_past: Duration,
}

impl TimePolicy for TimedTimePolicy {
  fn is_earlier_than(
    &self,
    window_start: UnixNanos,
    resolution: Duration,
    target: UnixNanos,
  ) -> bool {
    window_start.add_duration(resolution) <= target
  }

  fn timestamp_nanos(&self, window_start: UnixNanos, _resolution: Duration) -> UnixNanos {
    window_start
  }

  fn target_nanos(&self, target: UnixNanos) -> UnixNanos {
    target.sub_duration(self.buffer_past)
  }
}

//
// TimeProvider
//

pub trait TimeProvider: Send + Sync + 'static {
  fn now_utc(&self) -> OffsetDateTime;

  fn now_nanos(&self) -> UnixNanos {
    UnixNanos::from_date_time(self.now_utc())
  }
}

//
// RealTimeProvider
//

#[derive(Default)]
pub struct RealTimeProvider {}

impl TimeProvider for RealTimeProvider {
  fn now_utc(&self) -> OffsetDateTime {
    OffsetDateTime::now_utc()
  }
}

//
// TestTimeProvider
//

#[derive(Clone, Default)]
pub struct TestTimeProvider {
  pub nanos: Arc<AtomicI64>,
}

impl TestTimeProvider {
  #[must_use]
  pub fn new(now: UnixNanos) -> Self {
    Self {
      nanos: Arc::new(AtomicI64::new(now.0)),
    }
  }

  pub fn set(&self, now: UnixNanos) {
    self.nanos.store(now.0, Ordering::SeqCst);
  }
}

impl TimeProvider for TestTimeProvider {
  fn now_utc(&self) -> OffsetDateTime {
    UnixNanos(self.nanos.load(Ordering::SeqCst))
      .to_date_time()
      .unwrap_or(OffsetDateTime::UNIX_EPOCH)
  }

  fn now_nanos(&self) -> UnixNanos {
    UnixNanos(self.nanos.load(Ordering::SeqCst))
  }
}
