// pulse - bitdrift's observability proxy
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

use super::*;
use pretty_assertions::assert_eq;
use time::ext::NumericalDuration;

fn dp(seconds: i64, value: f64) -> Datapoint {
  Datapoint::new(UnixNanos(seconds * 1_000_000_000), value)
}

#[test]
fn absolute() {
  assert_eq!(dp(1, 5.0), UnaryTransform::Absolute.evaluate(dp(1, -5.0)));
  assert!(
    UnaryTransform::Absolute
      .evaluate(dp(1, f64::NAN))
      .value
      .is_nan()
  );
}

#[test]
fn per_second() {
  assert_eq!(
    dp(20, 2.0),
    BinaryTransform::PerSecond.evaluate(dp(10, 10.0), dp(20, 30.0))
  );

  // Out of order, missing previous value, and a decrease all produce nothing.
  assert!(
    BinaryTransform::PerSecond
      .evaluate(dp(20, 10.0), dp(10, 30.0))
      .value
      .is_nan()
  );
  assert!(
    BinaryTransform::PerSecond
      .evaluate(Datapoint::empty(), dp(10, 30.0))
      .value
      .is_nan()
  );
  assert!(
    BinaryTransform::PerSecond
      .evaluate(dp(10, 30.0), dp(20, 10.0))
      .value
      .is_nan()
  );
}

#[test]
fn increase() {
  assert_eq!(
    dp(20, 20.0),
    BinaryTransform::Increase.evaluate(dp(10, 10.0), dp(20, 30.0))
  );
  assert_eq!(
    dp(20, 30.0),
    BinaryTransform::Increase.evaluate(Datapoint::empty(), dp(20, 30.0))
  );
  assert_eq!(
    dp(20, 5.0),
    BinaryTransform::Increase.evaluate(dp(10, 30.0), dp(20, 5.0))
  );
  assert!(
    BinaryTransform::Increase
      .evaluate(dp(10, 30.0), dp(20, f64::NAN))
      .value
      .is_nan()
  );
}

#[test]
fn add() {
  assert_eq!(
    dp(20, 40.0),
    BinaryTransform::Add.evaluate(dp(10, 10.0), dp(20, 30.0))
  );
  assert_eq!(
    dp(20, 30.0),
    BinaryTransform::Add.evaluate(Datapoint::empty(), dp(20, 30.0))
  );
}

#[test]
fn reset() {
  let (primary, extra) = UnaryMultiOutputTransform::Reset.evaluate(dp(10, 7.0), 10.seconds());
  assert_eq!(dp(10, 7.0), primary);
  assert_eq!(dp(15, 0.0), extra);
}

#[test]
fn pipeline() {
  let pipeline = Pipeline {
    transformations: vec![
      Transformation::Unary(UnaryTransform::Absolute),
      Transformation::Binary(BinaryTransform::PerSecond),
      Transformation::UnaryMultiOutput(UnaryMultiOutputTransform::Reset),
    ],
    rollup: None,
  };
  assert!(!pipeline.has_rollup());
  assert_eq!(1, pipeline.num_binary_transformations());
  assert!(!Pipeline::default().has_rollup());
}
