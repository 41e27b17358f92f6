// pulse - bitdrift's observability proxy
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./mod_test.rs"]
mod mod_test;

use crate::metric::aggregation::AggregationKind;
use crate::time::{UnixNanos, duration_nanos};
use bytes::Bytes;
use pulse_common::LossyIntToFloat;
use time::Duration;

const NANOS_PER_SECOND: f64 = 1_000_000_000.0;

//
// Datapoint
//

// A single value at a point in time flowing through the transformation steps.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Datapoint {
  pub time_nanos: UnixNanos,
  pub value: f64,
}

impl Datapoint {
  #[must_use]
  pub const fn new(time_nanos: UnixNanos, value: f64) -> Self {
    Self { time_nanos, value }
  }

  // The point emitted when a transformation has nothing to say.
  #[must_use]
  pub const fn empty() -> Self {
    Self {
      time_nanos: UnixNanos(0),
      value: f64::NAN,
    }
  }
}

//
// UnaryTransform
//

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum UnaryTransform {
  Absolute,
}

impl UnaryTransform {
  #[must_use]
  pub fn evaluate(self, curr: Datapoint) -> Datapoint {
    match self {
      Self::Absolute => Datapoint::new(curr.time_nanos, curr.value.abs()),
    }
  }
}

//
// BinaryTransform
//

// Transforms computed from the previous window's value and the current one. A missing previous
// value is passed as NaN.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BinaryTransform {
  PerSecond,
  Increase,
  Add,
}

impl BinaryTransform {
  #[must_use]
  pub fn evaluate(self, prev: Datapoint, curr: Datapoint) -> Datapoint {
    match self {
      Self::PerSecond => per_second(prev, curr),
      Self::Increase => increase(prev, curr),
      Self::Add => add(prev, curr),
    }
  }
}

fn per_second(prev: Datapoint, curr: Datapoint) -> Datapoint {
  if prev.time_nanos >= curr.time_nanos || prev.value.is_nan() || curr.value.is_nan() {
    return Datapoint::empty();
  }
  let diff = curr.value - prev.value;
  if diff < 0.0 {
    return Datapoint::empty();
  }
  let elapsed = (curr.time_nanos.as_nanos() - prev.time_nanos.as_nanos()).lossy_to_f64();
  Datapoint::new(curr.time_nanos, diff * NANOS_PER_SECOND / elapsed)
}

// A decrease is treated as a counter reset in which case the current value is the increase.
fn increase(prev: Datapoint, curr: Datapoint) -> Datapoint {
  if curr.value.is_nan() {
    return Datapoint::empty();
  }
  if prev.value.is_nan() {
    return curr;
  }
  let diff = curr.value - prev.value;
  Datapoint::new(curr.time_nanos, if diff < 0.0 { curr.value } else { diff })
}

fn add(prev: Datapoint, curr: Datapoint) -> Datapoint {
  if curr.value.is_nan() {
    return Datapoint::empty();
  }
  let prev_value = if prev.value.is_nan() { 0.0 } else { prev.value };
  Datapoint::new(curr.time_nanos, prev_value + curr.value)
}

//
// UnaryMultiOutputTransform
//

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum UnaryMultiOutputTransform {
  // Emits the value as is followed by a zero half a resolution later.
  Reset,
}

impl UnaryMultiOutputTransform {
  #[must_use]
  pub fn evaluate(self, curr: Datapoint, resolution: Duration) -> (Datapoint, Datapoint) {
    match self {
      Self::Reset => (
        curr,
        Datapoint::new(
          UnixNanos(
            curr
              .time_nanos
              .as_nanos()
              .saturating_add(duration_nanos(resolution) / 2),
          ),
          0.0,
        ),
      ),
    }
  }
}

//
// Transformation
//

// One already resolved step of an element's pipeline.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Transformation {
  Unary(UnaryTransform),
  Binary(BinaryTransform),
  UnaryMultiOutput(UnaryMultiOutputTransform),
}

impl Transformation {
  #[must_use]
  pub const fn is_binary(&self) -> bool {
    matches!(self, Self::Binary(_))
  }
}

//
// Rollup
//

// The final rollup step of a pipeline. Elements with a rollup forward their values to the
// aggregation identified by id instead of flushing them locally.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Rollup {
  pub id: Bytes,
  pub aggregation_kinds: Vec<AggregationKind>,
}

//
// Pipeline
//

// An already resolved pipeline: the ordered transformations followed by an optional rollup.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Pipeline {
  pub transformations: Vec<Transformation>,
  pub rollup: Option<Rollup>,
}

impl Pipeline {
  #[must_use]
  pub const fn has_rollup(&self) -> bool {
    self.rollup.is_some()
  }

  #[must_use]
  pub fn num_binary_transformations(&self) -> usize {
    self
      .transformations
      .iter()
      .filter(|transformation| transformation.is_binary())
      .count()
  }
}
