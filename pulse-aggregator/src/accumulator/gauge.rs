// pulse - bitdrift's observability proxy
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

use super::{LastSeen, Moments, Result};
use crate::metric::aggregation::AggregationKind;
use crate::time::UnixNanos;
use bytes::Bytes;

//
// GaugeAccumulator
//

// An aggregated gauge. The last value is the value with the newest timestamp, so out of order
// samples only affect the moments.
pub struct GaugeAccumulator {
  last: f64,
  moments: Moments,
  pub(super) last_seen: LastSeen,
}

impl Default for GaugeAccumulator {
  fn default() -> Self {
    Self {
      last: f64::NAN,
      moments: Moments::default(),
      last_seen: LastSeen::default(),
    }
  }
}

impl GaugeAccumulator {
  pub(super) fn add(&mut self, timestamp: UnixNanos, value: f64, annotation: Option<&Bytes>) {
    if self.last_seen.observe(timestamp, annotation) {
      self.last = value;
    }
    self.moments.add(value);
  }

  pub(super) fn update_value(
    &mut self,
    timestamp: UnixNanos,
    value: f64,
    prev_value: f64,
  ) -> Result<()> {
    self.moments.update(value, prev_value)?;
    #[allow(clippy::float_cmp)]
    if self.last == prev_value {
      self.last = value;
    }
    self.last_seen.observe(timestamp, None);
    Ok(())
  }

  pub(super) fn value_of(&self, kind: AggregationKind) -> f64 {
    if kind == AggregationKind::Last {
      return self.last;
    }
    self.moments.value_of(kind).unwrap_or(0.0)
  }

  pub(super) fn reset(&mut self) {
    self.last = f64::NAN;
    self.moments = Moments::default();
    self.last_seen.reset();
  }
}
