// pulse - bitdrift's observability proxy
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

use super::{AccumulatorError, LastSeen, Result, stdev};
use crate::metric::aggregation::AggregationKind;
use crate::time::UnixNanos;
use bytes::Bytes;
use pulse_common::{LossyFloatToInt, LossyIntToFloat};

//
// TimerAccumulator
//

// An aggregated timer. All samples in the window are retained so quantiles are exact and resent
// values can be replaced individually. Samples are sorted lazily when a quantile is queried.
pub struct TimerAccumulator {
  samples: Vec<f64>,
  sorted: bool,
  sum: f64,
  sum_sq: f64,
  pub(super) last_seen: LastSeen,
}

impl Default for TimerAccumulator {
  fn default() -> Self {
    Self {
      samples: Vec::new(),
      sorted: true,
      sum: 0.0,
      sum_sq: 0.0,
      last_seen: LastSeen::default(),
    }
  }
}

impl TimerAccumulator {
  pub(super) fn add(&mut self, timestamp: UnixNanos, value: f64, annotation: Option<&Bytes>) {
    self.last_seen.observe(timestamp, annotation);
    if self.samples.last().is_some_and(|last| *last > value) {
      self.sorted = false;
    }
    self.samples.push(value);
    self.sum += value;
    self.sum_sq = value.mul_add(value, self.sum_sq);
  }

  pub(super) fn update_value(
    &mut self,
    timestamp: UnixNanos,
    value: f64,
    prev_value: f64,
  ) -> Result<()> {
    #[allow(clippy::float_cmp)]
    let Some(sample) = self.samples.iter_mut().find(|sample| **sample == prev_value) else {
      return Err(AccumulatorError::NoMatchingValue(prev_value));
    };
    *sample = value;
    self.sorted = false;
    self.sum += value - prev_value;
    self.sum_sq += value.mul_add(value, -(prev_value * prev_value));
    self.last_seen.observe(timestamp, None);
    Ok(())
  }

  fn ensure_sorted(&mut self) {
    if !self.sorted {
      self.samples.sort_unstable_by(f64::total_cmp);
      self.sorted = true;
    }
  }

  // Nearest rank quantile over the sorted samples.
  fn quantile(&mut self, quantile: f64) -> f64 {
    if self.samples.is_empty() {
      return f64::NAN;
    }
    self.ensure_sorted();
    let rank = (quantile * self.samples.len().lossy_to_f64())
      .ceil()
      .lossy_to_usize();
    self.samples[rank.clamp(1, self.samples.len()) - 1]
  }

  pub(super) fn value_of(&mut self, kind: AggregationKind) -> f64 {
    if let Some(quantile) = kind.quantile() {
      return self.quantile(quantile);
    }

    let count = self.samples.len() as u64;
    match kind {
      AggregationKind::Count => count.lossy_to_f64(),
      AggregationKind::Sum => self.sum,
      AggregationKind::SumSq => self.sum_sq,
      AggregationKind::Mean => {
        if count == 0 {
          f64::NAN
        } else {
          self.sum / count.lossy_to_f64()
        }
      },
      AggregationKind::Stdev => stdev(count, self.sum_sq, self.sum),
      AggregationKind::Min => {
        self.ensure_sorted();
        self.samples.first().copied().unwrap_or(f64::NAN)
      },
      AggregationKind::Max => {
        self.ensure_sorted();
        self.samples.last().copied().unwrap_or(f64::NAN)
      },
      _ => 0.0,
    }
  }

  pub(super) fn reset(&mut self) {
    self.samples.clear();
    self.sorted = true;
    self.sum = 0.0;
    self.sum_sq = 0.0;
    self.last_seen.reset();
  }
}
