// pulse - bitdrift's observability proxy
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

use super::*;
use pretty_assertions::assert_eq;

#[test]
fn bounded_and_reset() {
  let pool = ElemPool::new(1);
  assert!(pool.is_empty());

  let mut buffers = pool.get();
  buffers.dirty.insert(UnixNanos(10));
  buffers.flush_state_to_expire.push(UnixNanos(10));
  pool.put(buffers);
  pool.put(ElemBuffers::default());
  assert_eq!(1, pool.len());

  let buffers = pool.get();
  assert!(buffers.dirty.is_empty());
  assert!(buffers.flush_state_to_expire.is_empty());
  assert!(buffers.flush_state_to_expire.capacity() >= 1);
  assert!(pool.is_empty());
}
