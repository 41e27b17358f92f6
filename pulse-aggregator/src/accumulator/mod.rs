// pulse - bitdrift's observability proxy
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./mod_test.rs"]
mod mod_test;

mod counter;
mod gauge;
mod timer;

use crate::metric::aggregation::AggregationKind;
use crate::metric::{MetricType, MetricUnion, MetricValue};
use crate::time::UnixNanos;
use bytes::Bytes;
use counter::CounterAccumulator;
use gauge::GaugeAccumulator;
use pulse_common::LossyIntToFloat;
use timer::TimerAccumulator;

//
// AccumulatorError
//

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum AccumulatorError {
  #[error("no previously added value {0} to update")]
  NoMatchingValue(f64),
}

type Result<T> = std::result::Result<T, AccumulatorError>;

// Sample standard deviation given the running moments.
fn stdev(count: u64, sum_sq: f64, sum: f64) -> f64 {
  let count = count.lossy_to_f64();
  let div = count * (count - 1.0);
  if div == 0.0 {
    return 0.0;
  }
  let num = count.mul_add(sum_sq, -(sum * sum));
  (num / div).max(0.0).sqrt()
}

//
// LastSeen
//

// The most recent timestamp and annotation seen by an accumulator.
#[derive(Default)]
struct LastSeen {
  last_at: UnixNanos,
  annotation: Option<Bytes>,
}

impl LastSeen {
  // Records the timestamp, returning true if it is the newest seen so far. An annotation only
  // replaces the current one if it is non-empty.
  fn observe(&mut self, timestamp: UnixNanos, annotation: Option<&Bytes>) -> bool {
    if self.last_at != UnixNanos::default() && timestamp < self.last_at {
      return false;
    }
    self.last_at = timestamp;
    if let Some(annotation) = annotation
      && !annotation.is_empty()
    {
      self.annotation = Some(annotation.clone());
    }
    true
  }

  fn reset(&mut self) {
    self.last_at = UnixNanos::default();
    self.annotation = None;
  }
}

//
// Moments
//

// Running sum/count/min/max shared by counters and gauges.
struct Moments {
  count: u64,
  sum: f64,
  sum_sq: f64,
  min: f64,
  max: f64,
}

impl Default for Moments {
  fn default() -> Self {
    Self {
      count: 0,
      sum: 0.0,
      sum_sq: 0.0,
      min: f64::NAN,
      max: f64::NAN,
    }
  }
}

impl Moments {
  fn add(&mut self, value: f64) {
    self.count += 1;
    self.sum += value;
    self.sum_sq = value.mul_add(value, self.sum_sq);
    // f64::min/max ignore NaN so the initial NaN is replaced by the first value.
    self.min = self.min.min(value);
    self.max = self.max.max(value);
  }

  // Replace a previously added value. Min and max can only widen since the replaced value is not
  // tracked individually.
  fn update(&mut self, value: f64, prev_value: f64) -> Result<()> {
    if self.count == 0 {
      return Err(AccumulatorError::NoMatchingValue(prev_value));
    }
    self.sum += value - prev_value;
    self.sum_sq += value.mul_add(value, -(prev_value * prev_value));
    self.min = self.min.min(value);
    self.max = self.max.max(value);
    Ok(())
  }

  fn value_of(&self, kind: AggregationKind) -> Option<f64> {
    match kind {
      AggregationKind::Count => Some(self.count.lossy_to_f64()),
      AggregationKind::Sum => Some(self.sum),
      AggregationKind::SumSq => Some(self.sum_sq),
      AggregationKind::Min => Some(self.min),
      AggregationKind::Max => Some(self.max),
      AggregationKind::Mean => Some(if self.count == 0 {
        f64::NAN
      } else {
        self.sum / self.count.lossy_to_f64()
      }),
      AggregationKind::Stdev => Some(stdev(self.count, self.sum_sq, self.sum)),
      _ => None,
    }
  }
}

// Iterate the raw values carried by a union sample.
fn union_values(value: &MetricValue) -> impl Iterator<Item = f64> + '_ {
  let (single, batch) = match value {
    MetricValue::Counter(value) => (Some(value.lossy_to_f64()), &[][..]),
    MetricValue::Gauge(value) => (Some(*value), &[][..]),
    MetricValue::BatchTimer(values) => (None, values.as_slice()),
  };
  single.into_iter().chain(batch.iter().copied())
}

//
// Accumulator
//

// Per-window numeric state. The variant is selected by the metric type of the owning element when
// the window is created.
pub enum Accumulator {
  Counter(CounterAccumulator),
  Gauge(GaugeAccumulator),
  Timer(TimerAccumulator),
}

impl Accumulator {
  #[must_use]
  pub fn new(metric_type: MetricType) -> Self {
    match metric_type {
      MetricType::Counter => Self::Counter(CounterAccumulator::default()),
      MetricType::Gauge => Self::Gauge(GaugeAccumulator::default()),
      MetricType::Timer => Self::Timer(TimerAccumulator::default()),
    }
  }

  // Add a raw sample.
  pub fn add(&mut self, timestamp: UnixNanos, value: f64, annotation: Option<&Bytes>) {
    match self {
      Self::Counter(c) => c.add(timestamp, value, annotation),
      Self::Gauge(g) => g.add(timestamp, value, annotation),
      Self::Timer(t) => t.add(timestamp, value, annotation),
    }
  }

  // Add every value carried by a union sample.
  pub fn add_union(&mut self, timestamp: UnixNanos, union: &MetricUnion) {
    for value in union_values(&union.value) {
      self.add(timestamp, value, union.annotation.as_ref());
    }
  }

  // Replace a previously added value with a new one. Used when a forwarded value is resent.
  pub fn update_value(
    &mut self,
    timestamp: UnixNanos,
    value: f64,
    prev_value: f64,
  ) -> std::result::Result<(), AccumulatorError> {
    match self {
      Self::Counter(c) => c.update_value(timestamp, value, prev_value),
      Self::Gauge(g) => g.update_value(timestamp, value, prev_value),
      Self::Timer(t) => t.update_value(timestamp, value, prev_value),
    }
  }

  // The value for an aggregation kind. Kinds that make no sense for the metric type produce 0.
  // Mean, min, max and quantiles of an empty accumulator are NaN for every metric type.
  pub fn value_of(&mut self, kind: AggregationKind) -> f64 {
    match self {
      Self::Counter(c) => c.value_of(kind),
      Self::Gauge(g) => g.value_of(kind),
      Self::Timer(t) => t.value_of(kind),
    }
  }

  #[must_use]
  pub fn annotation(&self) -> Option<&Bytes> {
    self.last_seen().annotation.as_ref()
  }

  #[must_use]
  pub fn last_at(&self) -> UnixNanos {
    self.last_seen().last_at
  }

  fn last_seen(&self) -> &LastSeen {
    match self {
      Self::Counter(c) => &c.last_seen,
      Self::Gauge(g) => &g.last_seen,
      Self::Timer(t) => &t.last_seen,
    }
  }

  // Reset all state. The accumulator keeps any allocated capacity so it can be reused.
  pub fn close(&mut self) {
    match self {
      Self::Counter(c) => c.reset(),
      Self::Gauge(g) => g.reset(),
      Self::Timer(t) => t.reset(),
    }
  }
}
