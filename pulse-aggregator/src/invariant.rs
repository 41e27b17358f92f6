// pulse - bitdrift's observability proxy
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

use crate::time::UnixNanos;
use bytes::Bytes;
use prometheus::IntCounter;
use pulse_common::stats::Scope;

//
// InvariantViolation
//

// Internal consistency problems detected by an element. None of these are fatal; the element
// keeps processing after reporting them.
#[derive(thiserror::Error, Clone, Debug, PartialEq, Eq)]
pub enum InvariantViolation {
  #[error("reflushing aggregation at {start_at} without resend enabled")]
  ReflushWithoutResend { start_at: UnixNanos },
  #[error("previous start time {prev_start_at} not in flush state")]
  PrevStartMissing { prev_start_at: UnixNanos },
  #[error("expired start time {start_at} not in flush state")]
  ExpiredStartMissing { start_at: UnixNanos },
  #[error("value start time {start_at} is before min start time {min_start_at}")]
  ValueBeforeMin {
    start_at: UnixNanos,
    min_start_at: UnixNanos,
  },
  #[error("dangling flush state at {start_at}")]
  DanglingFlushState { start_at: UnixNanos },
}

//
// InvariantReporter
//

#[cfg_attr(test, mockall::automock)]
pub trait InvariantReporter: Send + Sync {
  fn report(&self, id: &Bytes, violation: &InvariantViolation);
}

//
// StatsInvariantReporter
//

// Logs each violation and counts it.
pub struct StatsInvariantReporter {
  invariant_violations: IntCounter,
}

impl StatsInvariantReporter {
  #[must_use]
  pub fn new(scope: &Scope) -> Self {
    Self {
      invariant_violations: scope.counter("invariant_violations"),
    }
  }
}

impl InvariantReporter for StatsInvariantReporter {
  fn report(&self, id: &Bytes, violation: &InvariantViolation) {
    log::error!(
      "invariant violation for {}: {violation}",
      String::from_utf8_lossy(id)
    );
    self.invariant_violations.inc();
  }
}
