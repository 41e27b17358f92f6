// pulse - bitdrift's observability proxy
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

use super::*;
use pretty_assertions::assert_eq;

#[test]
fn defaults() {
  assert_eq!(
    &[AggregationKind::Sum],
    AggregationKind::defaults_for(MetricType::Counter)
  );
  assert_eq!(
    &[AggregationKind::Last],
    AggregationKind::defaults_for(MetricType::Gauge)
  );
  assert_eq!(11, AggregationKind::defaults_for(MetricType::Timer).len());
}

#[test]
fn type_strings() {
  assert_eq!(
    "upper",
    AggregationKind::Max.default_type_string(MetricType::Timer)
  );
  assert_eq!(
    "max",
    AggregationKind::Max.default_type_string(MetricType::Gauge)
  );
  assert_eq!(
    "sum_sq",
    AggregationKind::SumSq.default_type_string(MetricType::Counter)
  );
}

#[test]
fn quantiles() {
  assert_eq!(Some(0.5), AggregationKind::Median.quantile());
  assert_eq!(Some(0.999), AggregationKind::P999.quantile());
  assert_eq!(None, AggregationKind::Sum.quantile());
}

#[test]
fn deserialize() {
  let kinds: Vec<AggregationKind> = serde_yaml::from_str("[sum, sum_sq, p99, p9999]").unwrap();
  assert_eq!(
    vec![
      AggregationKind::Sum,
      AggregationKind::SumSq,
      AggregationKind::P99,
      AggregationKind::P9999
    ],
    kinds
  );
}
