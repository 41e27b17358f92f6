// pulse - bitdrift's observability proxy
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./pool_test.rs"]
mod pool_test;

use super::consume::ConsumeBuffer;
use super::dirty::DirtyTimes;
use super::{FlushStateMap, ValuesMap};
use crate::time::UnixNanos;
use crossbeam_queue::ArrayQueue;

//
// ElemBuffers
//

// The allocations owned by an element. Returned to the pool when an element closes so that the
// next element can start without reallocating.
#[derive(Default)]
pub(super) struct ElemBuffers {
  pub values: ValuesMap,
  pub flush_state: FlushStateMap,
  pub dirty: DirtyTimes,
  pub to_consume: ConsumeBuffer,
  pub flush_state_to_expire: Vec<UnixNanos>,
}

impl ElemBuffers {
  fn reset(&mut self) {
    self.values.clear();
    self.flush_state.clear();
    self.dirty.clear();
    self.to_consume.clear();
    self.flush_state_to_expire.clear();
  }
}

//
// ElemPool
//

// Bounded pool of element buffers shared by every element created with the same options.
pub struct ElemPool {
  buffers: ArrayQueue<ElemBuffers>,
}

impl ElemPool {
  #[must_use]
  pub fn new(size: usize) -> Self {
    Self {
      buffers: ArrayQueue::new(size.max(1)),
    }
  }

  pub(super) fn get(&self) -> ElemBuffers {
    self.buffers.pop().unwrap_or_default()
  }

  // Buffers are dropped if the pool is full.
  pub(super) fn put(&self, mut buffers: ElemBuffers) {
    buffers.reset();
    let _ignored = self.buffers.push(buffers);
  }

  #[must_use]
  pub fn len(&self) -> usize {
    self.buffers.len()
  }

  #[must_use]
  pub fn is_empty(&self) -> bool {
    self.buffers.is_empty()
  }
}
