// pulse - bitdrift's observability proxy
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

use super::*;
use pretty_assertions::assert_eq;

fn ts(seconds: i64) -> UnixNanos {
  UnixNanos(seconds * 1_000_000_000)
}

#[test]
fn counter() {
  let mut accumulator = Accumulator::new(MetricType::Counter);
  accumulator.add(ts(1), 5.0, None);
  accumulator.add(ts(2), 3.0, None);
  assert_eq!(8.0, accumulator.value_of(AggregationKind::Sum));
  assert_eq!(2.0, accumulator.value_of(AggregationKind::Count));
  assert_eq!(3.0, accumulator.value_of(AggregationKind::Min));
  assert_eq!(5.0, accumulator.value_of(AggregationKind::Max));
  assert_eq!(4.0, accumulator.value_of(AggregationKind::Mean));
  assert_eq!(34.0, accumulator.value_of(AggregationKind::SumSq));
  assert_eq!(0.0, accumulator.value_of(AggregationKind::P99));
  assert_eq!(ts(2), accumulator.last_at());
}

#[test]
fn counter_update() {
  let mut accumulator = Accumulator::new(MetricType::Counter);
  assert_eq!(
    Err(AccumulatorError::NoMatchingValue(1.0)),
    accumulator.update_value(ts(1), 2.0, 1.0)
  );

  accumulator.add(ts(1), 5.0, None);
  accumulator.update_value(ts(1), 7.0, 5.0).unwrap();
  assert_eq!(7.0, accumulator.value_of(AggregationKind::Sum));
  assert_eq!(1.0, accumulator.value_of(AggregationKind::Count));
}

#[test]
fn union() {
  let mut accumulator = Accumulator::new(MetricType::Counter);
  accumulator.add_union(
    ts(1),
    &MetricUnion {
      id: "foo".into(),
      value: MetricValue::Counter(12),
      annotation: Some("note".into()),
    },
  );
  assert_eq!(12.0, accumulator.value_of(AggregationKind::Sum));
  assert_eq!(Some(&Bytes::from("note")), accumulator.annotation());

  let mut accumulator = Accumulator::new(MetricType::Timer);
  accumulator.add_union(
    ts(1),
    &MetricUnion {
      id: "foo".into(),
      value: MetricValue::BatchTimer(vec![1.0, 2.0, 3.0]),
      annotation: None,
    },
  );
  assert_eq!(3.0, accumulator.value_of(AggregationKind::Count));
  assert_eq!(6.0, accumulator.value_of(AggregationKind::Sum));
}

#[test]
fn gauge_last_is_newest() {
  let mut accumulator = Accumulator::new(MetricType::Gauge);
  assert!(accumulator.value_of(AggregationKind::Last).is_nan());
  accumulator.add(ts(2), 10.0, Some(&"second".into()));
  accumulator.add(ts(1), 20.0, Some(&"first".into()));
  assert_eq!(10.0, accumulator.value_of(AggregationKind::Last));
  assert_eq!(30.0, accumulator.value_of(AggregationKind::Sum));
  assert_eq!(Some(&Bytes::from("second")), accumulator.annotation());

  accumulator.update_value(ts(2), 11.0, 10.0).unwrap();
  assert_eq!(11.0, accumulator.value_of(AggregationKind::Last));
  assert_eq!(31.0, accumulator.value_of(AggregationKind::Sum));
}

#[test]
fn empty_annotation_does_not_replace() {
  let mut accumulator = Accumulator::new(MetricType::Gauge);
  accumulator.add(ts(1), 1.0, Some(&"keep".into()));
  accumulator.add(ts(2), 2.0, Some(&Bytes::new()));
  assert_eq!(Some(&Bytes::from("keep")), accumulator.annotation());
}

#[test]
fn timer_quantiles() {
  let mut accumulator = Accumulator::new(MetricType::Timer);
  for value in (1 ..= 100).rev() {
    accumulator.add(ts(1), f64::from(value), None);
  }
  assert_eq!(50.0, accumulator.value_of(AggregationKind::P50));
  assert_eq!(50.0, accumulator.value_of(AggregationKind::Median));
  assert_eq!(95.0, accumulator.value_of(AggregationKind::P95));
  assert_eq!(99.0, accumulator.value_of(AggregationKind::P99));
  assert_eq!(100.0, accumulator.value_of(AggregationKind::P9999));
  assert_eq!(1.0, accumulator.value_of(AggregationKind::Min));
  assert_eq!(100.0, accumulator.value_of(AggregationKind::Max));
  assert_eq!(50.5, accumulator.value_of(AggregationKind::Mean));
  assert_eq!(100.0, accumulator.value_of(AggregationKind::Count));
}

#[test]
fn timer_update() {
  let mut accumulator = Accumulator::new(MetricType::Timer);
  accumulator.add(ts(1), 1.0, None);
  accumulator.add(ts(1), 2.0, None);
  assert_eq!(
    Err(AccumulatorError::NoMatchingValue(3.0)),
    accumulator.update_value(ts(1), 5.0, 3.0)
  );
  accumulator.update_value(ts(1), 0.5, 2.0).unwrap();
  assert_eq!(0.5, accumulator.value_of(AggregationKind::Min));
  assert_eq!(1.0, accumulator.value_of(AggregationKind::Max));
  assert_eq!(1.5, accumulator.value_of(AggregationKind::Sum));
}

#[test]
fn stdev_values() {
  let mut accumulator = Accumulator::new(MetricType::Timer);
  accumulator.add(ts(1), 2.0, None);
  assert_eq!(0.0, accumulator.value_of(AggregationKind::Stdev));
  accumulator.add(ts(1), 4.0, None);
  accumulator.add(ts(1), 6.0, None);
  assert_eq!(2.0, accumulator.value_of(AggregationKind::Stdev));
}

#[test]
fn close_resets() {
  let mut accumulator = Accumulator::new(MetricType::Timer);
  accumulator.add(ts(1), 2.0, Some(&"a".into()));
  accumulator.close();
  assert_eq!(0.0, accumulator.value_of(AggregationKind::Count));
  assert_eq!(None, accumulator.annotation());
  assert_eq!(UnixNanos::default(), accumulator.last_at());
}

#[test]
fn empty_is_nan() {
  for metric_type in [MetricType::Counter, MetricType::Gauge, MetricType::Timer] {
    let mut accumulator = Accumulator::new(metric_type);
    for kind in [AggregationKind::Mean, AggregationKind::Min, AggregationKind::Max] {
      assert!(accumulator.value_of(kind).is_nan(), "{metric_type:?} {kind:?}");
    }
    assert_eq!(0.0, accumulator.value_of(AggregationKind::Count));
    assert_eq!(0.0, accumulator.value_of(AggregationKind::Sum));
  }
  assert!(
    Accumulator::new(MetricType::Timer)
      .value_of(AggregationKind::P99)
      .is_nan()
  );
}
