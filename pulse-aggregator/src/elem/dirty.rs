// pulse - bitdrift's observability proxy
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./dirty_test.rs"]
mod dirty_test;

use crate::time::UnixNanos;

//
// DirtyTimes
//

// Window start times written to since the last consume, strictly ascending. A spare buffer is
// kept so that draining and re-queueing during a consume does not allocate.
#[derive(Default)]
pub struct DirtyTimes {
  times: Vec<UnixNanos>,
  spare: Vec<UnixNanos>,
}

impl DirtyTimes {
  pub fn insert(&mut self, start_at: UnixNanos) {
    // Writes almost always land in the latest window.
    if self.times.last() == Some(&start_at) {
      return;
    }
    if let Err(index) = self.times.binary_search(&start_at) {
      self.times.insert(index, start_at);
    }
  }

  // Take all current times, leaving the set empty. The returned buffer should be handed back via
  // recycle() once the caller is done with it.
  pub fn take(&mut self) -> Vec<UnixNanos> {
    self.spare.clear();
    std::mem::replace(&mut self.times, std::mem::take(&mut self.spare))
  }

  // Re-queue a time taken via take(). Times must be re-queued in ascending order.
  pub fn requeue(&mut self, start_at: UnixNanos) {
    debug_assert!(self.times.last().is_none_or(|last| *last < start_at));
    self.times.push(start_at);
  }

  pub fn recycle(&mut self, mut taken: Vec<UnixNanos>) {
    taken.clear();
    self.spare = taken;
  }

  pub fn clear(&mut self) {
    self.times.clear();
    self.spare.clear();
  }

  #[must_use]
  pub fn len(&self) -> usize {
    self.times.len()
  }

  #[must_use]
  pub fn is_empty(&self) -> bool {
    self.times.is_empty()
  }

  #[must_use]
  pub fn as_slice(&self) -> &[UnixNanos] {
    &self.times
  }
}
