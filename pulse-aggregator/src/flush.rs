// pulse - bitdrift's observability proxy
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

use crate::metric::{AggregationKey, StoragePolicy};
use crate::time::UnixNanos;
use bytes::Bytes;
use std::fmt::Display;

//
// FlushType
//

// Why a consume is happening. Only used to label lag stats.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FlushType {
  Consume,
  Discard,
}

impl Display for FlushType {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      Self::Consume => write!(f, "consume"),
      Self::Discard => write!(f, "discard"),
    }
  }
}

//
// IdPrefixSuffixType
//

// How ids are decorated when flushed locally.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum IdPrefixSuffixType {
  // Emit the bare id.
  NoPrefixNoSuffix,
  // Emit the id with the metric type's full prefix and the aggregation kind's type string.
  #[default]
  WithPrefixWithSuffix,
}

//
// LocalFlush
//

// A point flushed from an element without a rollup.
#[derive(Clone, Debug, PartialEq)]
pub struct LocalFlush {
  pub prefix: Option<Bytes>,
  pub id: Bytes,
  pub type_suffix: Option<Bytes>,
  pub timestamp: UnixNanos,
  pub value: f64,
  pub annotation: Option<Bytes>,
  pub storage_policy: StoragePolicy,
}

//
// ForwardedFlush
//

// A point forwarded from a rollup element to the next aggregation. prev_value is the value that
// was previously forwarded for the same window, used downstream to update instead of add when the
// window is resent.
#[derive(Clone, Debug, PartialEq)]
pub struct ForwardedFlush {
  pub timestamp: UnixNanos,
  pub value: f64,
  pub prev_value: f64,
  pub annotation: Option<Bytes>,
  pub resend_enabled: bool,
}

//
// ForwardedMetricWriter
//

// Handle held by rollup elements for writing forwarded metrics.
#[cfg_attr(test, mockall::automock)]
pub trait ForwardedMetricWriter: Send + Sync {
  fn write(&self, key: &AggregationKey, flush: &ForwardedFlush);
}

//
// OnForwardedWritten
//

// Handle held by rollup elements to notify that all forwarded writes for a consume are done.
#[cfg_attr(test, mockall::automock)]
pub trait OnForwardedWritten: Send + Sync {
  fn on_written(&self, key: &AggregationKey, expired_starts: &[UnixNanos]);
}

//
// FlushHandler
//

// Receives everything an element emits during a consume. Supplied by the owning list on every
// consume call.
pub trait FlushHandler {
  fn flush_local(&self, flush: LocalFlush);

  fn flush_forwarded(
    &self,
    writer: &dyn ForwardedMetricWriter,
    key: &AggregationKey,
    flush: ForwardedFlush,
  );

  fn on_forwarded_flushed(
    &self,
    callback: &dyn OnForwardedWritten,
    key: &AggregationKey,
    expired_starts: &[UnixNanos],
  );
}

//
// PassthroughFlushHandler
//

// Sends local flushes to a callback and hands forwarded flushes directly to the element's writer.
pub struct PassthroughFlushHandler<F: Fn(LocalFlush)> {
  flush_local: F,
}

impl<F: Fn(LocalFlush)> PassthroughFlushHandler<F> {
  pub const fn new(flush_local: F) -> Self {
    Self { flush_local }
  }
}

impl<F: Fn(LocalFlush)> FlushHandler for PassthroughFlushHandler<F> {
  fn flush_local(&self, flush: LocalFlush) {
    (self.flush_local)(flush);
  }

  fn flush_forwarded(
    &self,
    writer: &dyn ForwardedMetricWriter,
    key: &AggregationKey,
    flush: ForwardedFlush,
  ) {
    writer.write(key, &flush);
  }

  fn on_forwarded_flushed(
    &self,
    callback: &dyn OnForwardedWritten,
    key: &AggregationKey,
    expired_starts: &[UnixNanos],
  ) {
    callback.on_written(key, expired_starts);
  }
}
