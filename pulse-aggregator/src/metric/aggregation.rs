// pulse - bitdrift's observability proxy
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./aggregation_test.rs"]
mod aggregation_test;

use super::MetricType;
use serde::Deserialize;

//
// AggregationKind
//

// A single aggregation function that can be computed over a window.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AggregationKind {
  Last,
  Min,
  Max,
  Mean,
  Median,
  Count,
  Sum,
  SumSq,
  Stdev,
  P10,
  P20,
  P30,
  P40,
  P50,
  P60,
  P70,
  P80,
  P90,
  P95,
  P99,
  P999,
  P9999,
}

const COUNTER_DEFAULTS: &[AggregationKind] = &[AggregationKind::Sum];
const GAUGE_DEFAULTS: &[AggregationKind] = &[AggregationKind::Last];
const TIMER_DEFAULTS: &[AggregationKind] = &[
  AggregationKind::Sum,
  AggregationKind::SumSq,
  AggregationKind::Mean,
  AggregationKind::Min,
  AggregationKind::Max,
  AggregationKind::Count,
  AggregationKind::Stdev,
  AggregationKind::Median,
  AggregationKind::P50,
  AggregationKind::P95,
  AggregationKind::P99,
];

impl AggregationKind {
  // The quantile computed by this kind, if it is a quantile kind.
  #[must_use]
  pub const fn quantile(self) -> Option<f64> {
    match self {
      Self::Median | Self::P50 => Some(0.5),
      Self::P10 => Some(0.1),
      Self::P20 => Some(0.2),
      Self::P30 => Some(0.3),
      Self::P40 => Some(0.4),
      Self::P60 => Some(0.6),
      Self::P70 => Some(0.7),
      Self::P80 => Some(0.8),
      Self::P90 => Some(0.9),
      Self::P95 => Some(0.95),
      Self::P99 => Some(0.99),
      Self::P999 => Some(0.999),
      Self::P9999 => Some(0.9999),
      Self::Last
      | Self::Min
      | Self::Max
      | Self::Mean
      | Self::Count
      | Self::Sum
      | Self::SumSq
      | Self::Stdev => None,
    }
  }

  // The kinds computed when a metric does not specify any.
  #[must_use]
  pub const fn defaults_for(metric_type: MetricType) -> &'static [Self] {
    match metric_type {
      MetricType::Counter => COUNTER_DEFAULTS,
      MetricType::Gauge => GAUGE_DEFAULTS,
      MetricType::Timer => TIMER_DEFAULTS,
    }
  }

  // The default string used to suffix ids emitted for this kind. Timers historically use
  // lower/upper for min/max.
  #[must_use]
  pub const fn default_type_string(self, metric_type: MetricType) -> &'static str {
    match (self, metric_type) {
      (Self::Min, MetricType::Timer) => "lower",
      (Self::Max, MetricType::Timer) => "upper",
      (Self::Last, _) => "last",
      (Self::Min, _) => "min",
      (Self::Max, _) => "max",
      (Self::Mean, _) => "mean",
      (Self::Median, _) => "median",
      (Self::Count, _) => "count",
      (Self::Sum, _) => "sum",
      (Self::SumSq, _) => "sum_sq",
      (Self::Stdev, _) => "stdev",
      (Self::P10, _) => "p10",
      (Self::P20, _) => "p20",
      (Self::P30, _) => "p30",
      (Self::P40, _) => "p40",
      (Self::P50, _) => "p50",
      (Self::P60, _) => "p60",
      (Self::P70, _) => "p70",
      (Self::P80, _) => "p80",
      (Self::P90, _) => "p90",
      (Self::P95, _) => "p95",
      (Self::P99, _) => "p99",
      (Self::P999, _) => "p999",
      (Self::P9999, _) => "p9999",
    }
  }
}
