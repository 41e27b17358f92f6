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
// CounterAccumulator
//

// An aggregated counter. Only the moments are tracked so quantile kinds are not available.
#[derive(Default)]
pub struct CounterAccumulator {
  moments: Moments,
  pub(super) last_seen: LastSeen,
}

impl CounterAccumulator {
  pub(super) fn add(&mut self, timestamp: UnixNanos, value: f64, annotation: Option<&Bytes>) {
    self.last_seen.observe(timestamp, annotation);
    self.moments.add(value);
  }

  pub(super) fn update_value(
    &mut self,
    timestamp: UnixNanos,
    value: f64,
    prev_value: f64,
  ) -> Result<()> {
    self.moments.update(value, prev_value)?;
    self.last_seen.observe(timestamp, None);
    Ok(())
  }

  pub(super) fn value_of(&self, kind: AggregationKind) -> f64 {
    self.moments.value_of(kind).unwrap_or(0.0)
  }

  pub(super) fn reset(&mut self) {
    self.moments = Moments::default();
    self.last_seen.reset();
  }
}
