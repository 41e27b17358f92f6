// pulse - bitdrift's observability proxy
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt


use crate::flush::{
  FlushHandler,
  ForwardedFlush,
  ForwardedMetricWriter,
  LocalFlush,
  OnForwardedWritten,
};
use crate::metric::AggregationKey;
use crate::time::UnixNanos;
use parking_lot::Mutex;

pub fn seconds(seconds: i64) -> UnixNanos {
  UnixNanos(seconds * 1_000_000_000)
}

//
// RecordingFlushHandler
//

// Records everything flushed so tests can assert on it. Forwarded flushes are recorded and then
// passed on to the element's writer so writer mocks can also be used.
#[derive(Default)]
pub struct RecordingFlushHandler {
  local: Mutex<Vec<LocalFlush>>,
  forwarded: Mutex<Vec<(AggregationKey, ForwardedFlush)>>,
  forwarded_flushed: Mutex<Vec<(AggregationKey, Vec<UnixNanos>)>>,
}

impl RecordingFlushHandler {
  pub fn take_local(&self) -> Vec<LocalFlush> {
    std::mem::take(&mut self.local.lock())
  }

  // (timestamp, value) pairs of the local flushes, clearing them.
  pub fn take_local_points(&self) -> Vec<(UnixNanos, f64)> {
    self
      .take_local()
      .into_iter()
      .map(|flush| (flush.timestamp, flush.value))
      .collect()
  }

  pub fn take_forwarded(&self) -> Vec<(AggregationKey, ForwardedFlush)> {
    std::mem::take(&mut self.forwarded.lock())
  }

  pub fn take_forwarded_flushed(&self) -> Vec<(AggregationKey, Vec<UnixNanos>)> {
    std::mem::take(&mut self.forwarded_flushed.lock())
  }
}

impl FlushHandler for RecordingFlushHandler {
  fn flush_local(&self, flush: LocalFlush) {
    self.local.lock().push(flush);
  }

  fn flush_forwarded(
    &self,
    writer: &dyn ForwardedMetricWriter,
    key: &AggregationKey,
    flush: ForwardedFlush,
  ) {
    writer.write(key, &flush);
    self.forwarded.lock().push((key.clone(), flush));
  }

  fn on_forwarded_flushed(
    &self,
    callback: &dyn OnForwardedWritten,
    key: &AggregationKey,
    expired_starts: &[UnixNanos],
  ) {
    callback.on_written(key, expired_starts);
    self
      .forwarded_flushed
      .lock()
      .push((key.clone(), expired_starts.to_vec()));
  }
}
