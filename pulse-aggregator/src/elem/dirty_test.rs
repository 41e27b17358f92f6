// pulse - bitdrift's observability proxy
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

use super::*;
use pretty_assertions::assert_eq;

fn times(raw: &[i64]) -> Vec<UnixNanos> {
  raw.iter().copied().map(UnixNanos).collect()
}

#[test]
fn insert_ordering() {
  let mut dirty = DirtyTimes::default();
  for start in [30, 10, 20, 30, 10, 40, 5, 20] {
    dirty.insert(UnixNanos(start));
  }
  assert_eq!(times(&[5, 10, 20, 30, 40]), dirty.as_slice());
  assert_eq!(5, dirty.len());
}

#[test]
fn take_and_requeue() {
  let mut dirty = DirtyTimes::default();
  dirty.insert(UnixNanos(10));
  dirty.insert(UnixNanos(20));
  dirty.insert(UnixNanos(30));

  let taken = dirty.take();
  assert!(dirty.is_empty());
  assert_eq!(times(&[10, 20, 30]), taken);
  for start in &taken {
    if start.as_nanos() != 20 {
      dirty.requeue(*start);
    }
  }
  dirty.recycle(taken);
  assert_eq!(times(&[10, 30]), dirty.as_slice());

  // A second take reuses the recycled buffer and still sees only current times.
  dirty.insert(UnixNanos(15));
  assert_eq!(times(&[10, 15, 30]), dirty.take());
  assert!(dirty.is_empty());
}
