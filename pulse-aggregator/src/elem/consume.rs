// pulse - bitdrift's observability proxy
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./consume_test.rs"]
mod consume_test;

use crate::time::UnixNanos;
use bytes::Bytes;

//
// FlushState
//

// Consumer side state for a window that has been processed at least once.
#[derive(Default)]
pub struct FlushState {
  pub flushed: bool,
  // Per kind input of the binary transformation, used as the previous value by the next window.
  pub consumed_values: Vec<f64>,
  // Per kind value last sent downstream, used to skip resending unchanged values.
  pub emitted_values: Vec<f64>,
}

//
// ConsumeState
//

// A snapshot of a window taken under the element lock and processed outside of it.
#[derive(Debug, Default)]
pub struct ConsumeState {
  pub start_at: UnixNanos,
  pub prev_start_time: Option<UnixNanos>,
  pub values: Vec<f64>,
  pub annotation: Option<Bytes>,
  pub dirty: bool,
  pub resend_enabled: bool,
}

//
// ConsumeBuffer
//

// Reusable list of snapshots. Slots beyond the current length keep their allocations.
#[derive(Default)]
pub struct ConsumeBuffer {
  states: Vec<ConsumeState>,
  len: usize,
}

impl ConsumeBuffer {
  // Append a slot, reusing a previously allocated one when available. The slot may contain stale
  // data that the caller must overwrite.
  pub fn push_slot(&mut self) -> &mut ConsumeState {
    if self.len == self.states.len() {
      self.states.push(ConsumeState::default());
    }
    self.len += 1;
    &mut self.states[self.len - 1]
  }

  // Roll back the most recent push_slot().
  pub fn pop_slot(&mut self) {
    debug_assert!(self.len > 0);
    self.len = self.len.saturating_sub(1);
  }

  pub fn clear(&mut self) {
    self.len = 0;
  }

  #[must_use]
  pub fn as_slice(&self) -> &[ConsumeState] {
    &self.states[.. self.len]
  }

  #[must_use]
  pub const fn len(&self) -> usize {
    self.len
  }

  #[must_use]
  pub const fn is_empty(&self) -> bool {
    self.len == 0
  }
}
