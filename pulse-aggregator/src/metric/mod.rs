// pulse - bitdrift's observability proxy
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

pub mod aggregation;

use crate::time::UnixNanos;
use aggregation::AggregationKind;
use bytes::Bytes;
use serde::Deserialize;
use std::fmt::Display;
use time::Duration;

//
// MetricType
//

// The type of metric an element aggregates. Drives which accumulator is used for each window as
// well as default aggregation kinds and id prefixes.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[serde(rename_all = "snake_case")]
pub enum MetricType {
  Counter,
  Gauge,
  Timer,
}

impl Display for MetricType {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      Self::Counter => write!(f, "counter"),
      Self::Gauge => write!(f, "gauge"),
      Self::Timer => write!(f, "timer"),
    }
  }
}

//
// MetricValue
//

// The value carried by an untimed sample.
#[derive(Clone, Debug, PartialEq)]
pub enum MetricValue {
  Counter(i64),
  Gauge(f64),
  BatchTimer(Vec<f64>),
}

impl MetricValue {
  #[must_use]
  pub const fn metric_type(&self) -> MetricType {
    match self {
      Self::Counter(_) => MetricType::Counter,
      Self::Gauge(_) => MetricType::Gauge,
      Self::BatchTimer(_) => MetricType::Timer,
    }
  }
}

//
// MetricUnion
//

// An untimed sample as received from a client, along with its optional annotation.
#[derive(Clone, Debug, PartialEq)]
pub struct MetricUnion {
  pub id: Bytes,
  pub value: MetricValue,
  pub annotation: Option<Bytes>,
}

//
// ForwardedMetric
//

// A metric produced by an upstream rollup element. prev_values is only meaningful when version is
// greater than zero, in which case each value replaces the matching previous value.
#[derive(Clone, Debug, PartialEq)]
pub struct ForwardedMetric {
  pub metric_type: MetricType,
  pub id: Bytes,
  pub time_nanos: UnixNanos,
  pub values: Vec<f64>,
  pub prev_values: Vec<f64>,
  pub annotation: Option<Bytes>,
  pub version: u32,
}

//
// StoragePolicy
//

// How a metric is stored downstream: the window resolution and how long it is retained.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct StoragePolicy {
  pub resolution: Duration,
  pub retention: Duration,
}

impl StoragePolicy {
  #[must_use]
  pub const fn new(resolution: Duration, retention: Duration) -> Self {
    Self {
      resolution,
      retention,
    }
  }
}

impl Display for StoragePolicy {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}:{}", self.resolution, self.retention)
  }
}

//
// ForwardMetadata
//

// Metadata sent along with a forwarded metric.
#[derive(Clone, Debug, PartialEq)]
pub struct ForwardMetadata {
  pub aggregation_kinds: Vec<AggregationKind>,
  pub storage_policy: StoragePolicy,
  pub source_id: u32,
  pub num_forwarded_times: usize,
  pub resend_enabled: bool,
}

//
// AggregationKey
//

// Identifies the downstream aggregation that a rollup element forwards into.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct AggregationKey {
  pub id: Bytes,
  pub aggregation_kinds: Vec<AggregationKind>,
  pub storage_policy: StoragePolicy,
  pub num_forwarded_times: usize,
}
