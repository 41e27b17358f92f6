// pulse - bitdrift's observability proxy
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt


mod consume;
mod dirty;
mod pool;
mod source_set;

use self::consume::{ConsumeBuffer, ConsumeState, FlushState};
use self::dirty::DirtyTimes;
use self::pool::ElemBuffers;
pub use self::pool::ElemPool;
use self::source_set::{SourceSet, SourceSetCache};
use crate::accumulator::{Accumulator, AccumulatorError};
use crate::config::AggregatorOptions;
use crate::flush::{
  FlushHandler,
  FlushType,
  ForwardedFlush,
  ForwardedMetricWriter,
  IdPrefixSuffixType,
  LocalFlush,
  OnForwardedWritten,
};
use crate::invariant::{InvariantReporter, InvariantViolation, StatsInvariantReporter};
use crate::metric::aggregation::AggregationKind;
use crate::metric::{
  AggregationKey,
  ForwardMetadata,
  ForwardedMetric,
  MetricType,
  MetricUnion,
  StoragePolicy,
};
#[cfg(test)]
use crate::test::thread_synchronizer::ThreadSynchronizer;
use crate::time::{RealTimeProvider, TimePolicy, TimeProvider, UnixNanos};
use crate::transformation::{Datapoint, Pipeline, Transformation};
use bytes::Bytes;
use hashbrown::HashMap;
use parking_lot::{Mutex, RwLock};
use prometheus::{Histogram, HistogramVec, IntCounter};
use pulse_common::LossyIntToFloat;
use pulse_common::stats::Scope;
use pulse_common::warn_every;
use std::sync::Arc;
use time::Duration;
use time::ext::NumericalDuration;

type ValuesMap = HashMap<UnixNanos, TimedAggregation, ahash::RandomState>;
type FlushStateMap = HashMap<UnixNanos, FlushState, ahash::RandomState>;

//
// ElemError
//

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum ElemError {
  #[error("element is closed")]
  ElemClosed,
  #[error("aggregation is closed")]
  AggregationClosed,
  #[error("duplicate forwarding source")]
  DuplicateForwardingSource,
  #[error("accumulator error: {0}")]
  Accumulator(#[from] AccumulatorError),
  #[error("storage policy resolution must be positive: {0}")]
  InvalidStoragePolicy(StoragePolicy),
  #[error("a pipeline with a rollup requires forwarding handles")]
  MissingForwardingHandles,
  #[error("only a single binary transformation is supported per pipeline")]
  MultipleBinaryTransformations,
}

pub type Result<T> = std::result::Result<T, ElemError>;

//
// Stats
//

struct Stats {
  retried_values: IntCounter,
  updated_values: IntCounter,
  dirty_backlog: Histogram,
  forward_lag: HistogramVec,
}

impl Stats {
  fn new(scope: &Scope) -> Self {
    Self {
      retried_values: scope.counter("retried_values"),
      updated_values: scope.counter("updated_values"),
      dirty_backlog: scope.histogram(
        "dirty_backlog",
        Some(vec![
          1.0, 2.0, 4.0, 8.0, 16.0, 32.0, 64.0, 128.0, 256.0, 512.0,
        ]),
      ),
      forward_lag: scope.histogram_vec(
        "forward_lag",
        &["resolution", "type", "jitter", "flush_type"],
        Some(vec![
          0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0, 600.0,
        ]),
      ),
    }
  }
}

//
// ElemOptions
//

// Everything an element needs that is shared with the other elements of an aggregator.
#[derive(Clone)]
pub struct ElemOptions {
  options: Arc<AggregatorOptions>,
  stats: Arc<Stats>,
  reporter: Arc<dyn InvariantReporter>,
  time_provider: Arc<dyn TimeProvider>,
  pool: Arc<ElemPool>,
}

impl ElemOptions {
  #[must_use]
  pub fn new(options: AggregatorOptions, scope: &Scope) -> Self {
    Self {
      pool: Arc::new(ElemPool::new(options.elem_pool_size)),
      options: Arc::new(options),
      stats: Arc::new(Stats::new(scope)),
      reporter: Arc::new(StatsInvariantReporter::new(scope)),
      time_provider: Arc::new(RealTimeProvider::default()),
    }
  }

  #[must_use]
  pub fn with_invariant_reporter(mut self, reporter: Arc<dyn InvariantReporter>) -> Self {
    self.reporter = reporter;
    self
  }

  #[must_use]
  pub fn with_time_provider(mut self, time_provider: Arc<dyn TimeProvider>) -> Self {
    self.time_provider = time_provider;
    self
  }

  #[must_use]
  pub fn options(&self) -> &AggregatorOptions {
    &self.options
  }

  #[must_use]
  pub fn pool(&self) -> &ElemPool {
    &self.pool
  }
}

//
// ForwardingHandles
//

// The handles a rollup element uses to forward its values.
#[derive(Clone)]
pub struct ForwardingHandles {
  pub writer: Arc<dyn ForwardedMetricWriter>,
  pub on_written: Arc<dyn OnForwardedWritten>,
}

//
// ElemData
//

// Per element data supplied when the element is created.
#[derive(Clone)]
pub struct ElemData {
  pub id: Bytes,
  pub metric_type: MetricType,
  pub storage_policy: StoragePolicy,
  // Empty means the default kinds for the metric type.
  pub aggregation_kinds: Vec<AggregationKind>,
  pub pipeline: Pipeline,
  pub num_forwarded_times: usize,
  pub id_prefix_suffix_type: IdPrefixSuffixType,
  pub forwarding: Option<ForwardingHandles>,
}

impl ElemData {
  #[must_use]
  pub fn new(id: Bytes, metric_type: MetricType, storage_policy: StoragePolicy) -> Self {
    Self {
      id,
      metric_type,
      storage_policy,
      aggregation_kinds: Vec::new(),
      pipeline: Pipeline::default(),
      num_forwarded_times: 0,
      id_prefix_suffix_type: IdPrefixSuffixType::default(),
      forwarding: None,
    }
  }
}

//
// LockedAggregation
//

struct LockedAggregation {
  accumulator: Accumulator,
  sources_seen: Option<SourceSet>,
  dirty: bool,
  closed: bool,
  // In the element's dirty list. Only cleared by the consumer while holding this lock, so a writer
  // that sees it set is guaranteed its write will be consumed.
  queued: bool,
  // Snapshotted by the consumer at least once, and so has flush state.
  consumed: bool,
}

//
// TimedAggregation
//

// A single window. Neighbors are stored as keys into the values map. None means unknown and
// requires a scan by resolution bounded by the element's min/max.
#[derive(Clone)]
struct TimedAggregation {
  start_at: UnixNanos,
  prev_start: Option<UnixNanos>,
  next_start: Option<UnixNanos>,
  resend_enabled: bool,
  locked: Arc<Mutex<LockedAggregation>>,
}

#[derive(Clone, Copy, Default)]
struct CreateOptions {
  init_source_set: bool,
  resend_enabled: bool,
}

//
// ConsumerState
//

// State only touched by the single consumer (and close). Lock order is consumer, then element,
// then window.
struct ConsumerState {
  flush_state: FlushStateMap,
  to_consume: ConsumeBuffer,
  flush_state_to_expire: Vec<UnixNanos>,
  forwarding: Option<ForwardingHandles>,
}

//
// ElemState
//

struct ElemState {
  values: ValuesMap,
  dirty: DirtyTimes,
  min_start_time: UnixNanos,
  max_start_time: UnixNanos,
  closed: bool,
  tombstoned: bool,
  cached_source_sets: SourceSetCache,
}

impl ElemState {
  // The start of the window before agg, if any.
  fn prev_start(&self, agg: &TimedAggregation, resolution: Duration) -> Option<UnixNanos> {
    if self.values.is_empty() {
      return None;
    }
    if let Some(prev_start) = agg.prev_start {
      return self.values.contains_key(&prev_start).then_some(prev_start);
    }

    let mut start = agg.start_at.sub_duration(resolution);
    while start >= self.min_start_time {
      if self.values.contains_key(&start) {
        return Some(start);
      }
      start = start.sub_duration(resolution);
    }
    None
  }

  // The start of the window after agg, if any.
  fn next_start(&self, agg: &TimedAggregation, resolution: Duration) -> Option<UnixNanos> {
    if self.values.is_empty() {
      return None;
    }
    if let Some(next_start) = agg.next_start {
      return self.values.contains_key(&next_start).then_some(next_start);
    }

    let mut start = agg.start_at.add_duration(resolution);
    while start <= self.max_start_time {
      if self.values.contains_key(&start) {
        return Some(start);
      }
      start = start.add_duration(resolution);
    }
    None
  }

  fn find_or_create(
    &mut self,
    aligned_start: UnixNanos,
    create: CreateOptions,
    metric_type: MetricType,
    resolution: Duration,
  ) -> Arc<Mutex<LockedAggregation>> {
    if let Some(existing) = self.values.get_mut(&aligned_start) {
      existing.resend_enabled = create.resend_enabled;
      let locked = existing.locked.clone();
      {
        // Writes to closed windows are rejected so there is nothing to queue.
        let mut window = locked.lock();
        if !window.closed && !window.queued {
          window.queued = true;
          self.dirty.insert(aligned_start);
        }
      }
      return locked;
    }

    let sources_seen = create
      .init_source_set
      .then(|| self.cached_source_sets.take());
    let mut agg = TimedAggregation {
      start_at: aligned_start,
      prev_start: None,
      next_start: None,
      resend_enabled: create.resend_enabled,
      locked: Arc::new(Mutex::new(LockedAggregation {
        accumulator: Accumulator::new(metric_type),
        sources_seen,
        dirty: false,
        closed: false,
        queued: true,
        consumed: false,
      })),
    };

    let was_empty = self.values.is_empty();
    if was_empty || aligned_start < self.min_start_time {
      self.min_start_time = aligned_start;
    }
    let prev_max_start = self.max_start_time;
    if was_empty || aligned_start > self.max_start_time {
      self.max_start_time = aligned_start;
    }

    if !was_empty {
      if self.max_start_time == aligned_start {
        // Common case of extending the latest window.
        agg.prev_start = Some(prev_max_start);
        if let Some(prev) = self.values.get_mut(&prev_max_start) {
          prev.next_start = Some(aligned_start);
        }
      } else {
        if let Some(prev_start) = self.prev_start(&agg, resolution) {
          agg.prev_start = Some(prev_start);
          if let Some(prev) = self.values.get_mut(&prev_start) {
            prev.next_start = Some(aligned_start);
          }
        }
        if let Some(next_start) = self.next_start(&agg, resolution) {
          agg.next_start = Some(next_start);
          if let Some(next) = self.values.get_mut(&next_start) {
            next.prev_start = Some(aligned_start);
          }
        }
      }
    }

    let locked = agg.locked.clone();
    self.values.insert(aligned_start, agg);
    self.dirty.insert(aligned_start);
    locked
  }

  // Move eligible dirty windows into the consumer's to-consume buffer.
  fn dirty_to_consume(
    &mut self,
    consumer: &mut ConsumerState,
    target: UnixNanos,
    resolution: Duration,
    policy: &dyn TimePolicy,
    aggregation_kinds: &[AggregationKind],
  ) {
    consumer.to_consume.clear();
    let dirty_times = self.dirty.take();
    for (i, &dirty_time) in dirty_times.iter().enumerate() {
      if !policy.is_earlier_than(dirty_time, resolution, target) {
        self.dirty.requeue(dirty_time);
        continue;
      }
      // A queued window that never became dirty can be closed and expired before it leaves the
      // dirty list.
      let Some(agg) = self.values.get(&dirty_time).cloned() else {
        continue;
      };

      if !self.append_consume_state(
        &agg,
        &mut consumer.to_consume,
        resolution,
        aggregation_kinds,
        true,
        |state| state.dirty,
      ) {
        // Closed windows never become dirty again. Otherwise the window was queued but the writer
        // has not marked it dirty yet, so try again next time.
        let mut locked = agg.locked.lock();
        if locked.closed {
          locked.queued = false;
        } else {
          self.dirty.requeue(dirty_time);
        }
        continue;
      }

      // Binary transformations of the next window used this window's value. If the next window
      // was already flushed it needs to be flushed again, unless it is next in this batch anyway.
      if agg.resend_enabled
        && let Some(next_start) = self.next_start(&agg, resolution)
        && dirty_times.get(i + 1) != Some(&next_start)
        && let Some(next) = self.values.get(&next_start).cloned()
      {
        let flush_state = &consumer.flush_state;
        self.append_consume_state(
          &next,
          &mut consumer.to_consume,
          resolution,
          aggregation_kinds,
          false,
          |state| {
            flush_state
              .get(&state.start_at)
              .is_some_and(|flush_state| flush_state.flushed)
          },
        );
      }
    }
    self.dirty.recycle(dirty_times);
  }

  // Snapshot a window into the next slot of the buffer. If the filter rejects the snapshot the
  // slot is rolled back and the window is left untouched. Windows taken from the dirty list are
  // dequeued under the same lock that the snapshot is taken with.
  fn append_consume_state(
    &self,
    agg: &TimedAggregation,
    to_consume: &mut ConsumeBuffer,
    resolution: Duration,
    aggregation_kinds: &[AggregationKind],
    dequeue: bool,
    include: impl FnOnce(&ConsumeState) -> bool,
  ) -> bool {
    let prev_start_time = self.prev_start(agg, resolution);
    let state = to_consume.push_slot();
    let mut locked = agg.locked.lock();
    state.start_at = agg.start_at;
    state.prev_start_time = prev_start_time;
    state.resend_enabled = agg.resend_enabled;
    state.dirty = locked.dirty;
    state.values.clear();
    for kind in aggregation_kinds {
      state.values.push(locked.accumulator.value_of(*kind));
    }
    state.annotation = locked.accumulator.annotation().cloned();

    if !include(state) {
      drop(locked);
      to_consume.pop_slot();
      return false;
    }
    locked.dirty = false;
    locked.consumed = true;
    if dequeue {
      locked.queued = false;
    }
    true
  }

  // Close windows that are old enough and remove the ones that are no longer needed as the
  // previous value of a binary transformation. The earliest window is always kept.
  fn expire_values(
    &mut self,
    consumer: &mut ConsumerState,
    target: UnixNanos,
    resolution: Duration,
    policy: &dyn TimePolicy,
    resend_buffer: Duration,
  ) {
    consumer.flush_state_to_expire.clear();
    let Some(mut curr) = self.values.get(&self.min_start_time).cloned() else {
      return;
    };

    let resend_expire = target.sub_duration(resend_buffer);
    while policy.is_earlier_than(curr.start_at, resolution, target) {
      // Resend enabled windows are kept until they are outside of the resend buffer.
      if curr.resend_enabled && !policy.is_earlier_than(curr.start_at, resolution, resend_expire)
      {
        break;
      }

      let dirty = {
        let mut locked = curr.locked.lock();
        locked.closed = true;
        locked.dirty
      };
      if dirty {
        // A write landed before the window was closed. It will expire next time.
        break;
      }

      // The current window is closed and clean so it will not be flushed again, which means the
      // previous window is no longer needed. Flush state is expired after processing.
      if curr.start_at != self.min_start_time && self.prev_start(&curr, resolution).is_some() {
        let expired_start = self.min_start_time;
        self.min_start_time = curr.start_at;
        if let Some(expired) = self.values.remove(&expired_start) {
          let mut locked = expired.locked.lock();
          // A window that lost the race with expiry before any write landed was never consumed.
          if locked.consumed {
            consumer.flush_state_to_expire.push(expired_start);
          }
          if let Some(sources_seen) = locked.sources_seen.take() {
            self.cached_source_sets.put(sources_seen);
          }
          locked.accumulator.close();
        }
      }

      match self
        .next_start(&curr, resolution)
        .and_then(|next_start| self.values.get(&next_start))
      {
        Some(next) => curr = next.clone(),
        None => break,
      }
    }
  }
}

//
// WindowedElem
//

// Time bucketed aggregations for a single metric and pipeline. Writers add values concurrently
// while a single consumer periodically flushes and expires windows.
pub struct WindowedElem {
  id: Bytes,
  metric_type: MetricType,
  storage_policy: StoragePolicy,
  aggregation_kinds: Vec<AggregationKind>,
  use_default_aggregation: bool,
  transformations: Vec<Transformation>,
  forwarded_key: Option<AggregationKey>,
  id_prefix_suffix_type: IdPrefixSuffixType,
  full_prefix: Bytes,
  type_strings: Vec<Bytes>,
  options: ElemOptions,
  state: RwLock<ElemState>,
  consumer: Mutex<ConsumerState>,

  #[cfg(test)]
  thread_synchronizer: ThreadSynchronizer,
}

impl WindowedElem {
  pub fn new(data: ElemData, options: ElemOptions) -> Result<Self> {
    if !data.storage_policy.resolution.is_positive() {
      return Err(ElemError::InvalidStoragePolicy(data.storage_policy));
    }
    if data.pipeline.has_rollup() && data.forwarding.is_none() {
      return Err(ElemError::MissingForwardingHandles);
    }
    if data.pipeline.num_binary_transformations() > 1 {
      return Err(ElemError::MultipleBinaryTransformations);
    }

    let use_default_aggregation = data.aggregation_kinds.is_empty();
    let aggregation_kinds = if use_default_aggregation {
      options.options.default_aggregation_kinds(data.metric_type)
    } else {
      data.aggregation_kinds
    };
    let type_strings = aggregation_kinds
      .iter()
      .map(|kind| options.options.type_string(*kind, data.metric_type))
      .collect();
    let forwarded_key = data.pipeline.rollup.map(|rollup| AggregationKey {
      id: rollup.id,
      aggregation_kinds: rollup.aggregation_kinds,
      storage_policy: data.storage_policy,
      num_forwarded_times: data.num_forwarded_times + 1,
    });

    let buffers = options.pool.get();
    log::trace!(
      "creating element {} with kinds {aggregation_kinds:?}",
      String::from_utf8_lossy(&data.id)
    );
    Ok(Self {
      full_prefix: options.options.full_prefix(data.metric_type),
      id: data.id,
      metric_type: data.metric_type,
      storage_policy: data.storage_policy,
      aggregation_kinds,
      use_default_aggregation,
      transformations: data.pipeline.transformations,
      forwarded_key,
      id_prefix_suffix_type: data.id_prefix_suffix_type,
      type_strings,
      state: RwLock::new(ElemState {
        values: buffers.values,
        dirty: buffers.dirty,
        min_start_time: UnixNanos::default(),
        max_start_time: UnixNanos::default(),
        closed: false,
        tombstoned: false,
        cached_source_sets: SourceSetCache::new(options.options.max_num_cached_source_sets),
      }),
      consumer: Mutex::new(ConsumerState {
        flush_state: buffers.flush_state,
        to_consume: buffers.to_consume,
        flush_state_to_expire: buffers.flush_state_to_expire,
        forwarding: data.forwarding,
      }),
      options,
      #[cfg(test)]
      thread_synchronizer: ThreadSynchronizer::default(),
    })
  }

  #[must_use]
  pub fn id(&self) -> &Bytes {
    &self.id
  }

  #[must_use]
  pub const fn metric_type(&self) -> MetricType {
    self.metric_type
  }

  #[must_use]
  pub fn aggregation_kinds(&self) -> &[AggregationKind] {
    &self.aggregation_kinds
  }

  #[must_use]
  pub const fn uses_default_aggregation(&self) -> bool {
    self.use_default_aggregation
  }

  // The aggregation this element forwards into, if its pipeline has a rollup.
  #[must_use]
  pub const fn forwarded_aggregation_key(&self) -> Option<&AggregationKey> {
    self.forwarded_key.as_ref()
  }

  #[must_use]
  pub fn num_windows(&self) -> usize {
    self.state.read().values.len()
  }

  // Mark the element as no longer receiving writes. Once its dirty windows are consumed the
  // element reports that it can be collected.
  pub fn mark_as_tombstoned(&self) {
    let mut state = self.state.write();
    if state.closed {
      return;
    }
    state.tombstoned = true;
  }

  #[cfg(test)]
  pub(crate) const fn thread_synchronizer(&self) -> &ThreadSynchronizer {
    &self.thread_synchronizer
  }

  fn find_or_create(
    &self,
    aligned_start: UnixNanos,
    create: CreateOptions,
  ) -> Result<Arc<Mutex<LockedAggregation>>> {
    {
      let state = self.state.read();
      if state.closed {
        return Err(ElemError::ElemClosed);
      }
      if let Some(found) = state.values.get(&aligned_start)
        && found.resend_enabled == create.resend_enabled
      {
        let window = found.locked.lock();
        if window.queued || window.closed {
          return Ok(found.locked.clone());
        }
      }
    }

    let mut state = self.state.write();
    if state.closed {
      return Err(ElemError::ElemClosed);
    }
    Ok(state.find_or_create(
      aligned_start,
      create,
      self.metric_type,
      self.storage_policy.resolution,
    ))
  }

  // Run write against the window for aligned_start, holding the window lock. The window is either
  // closed or queued for consumption when write runs.
  fn write_window<T>(
    &self,
    aligned_start: UnixNanos,
    create: CreateOptions,
    write: impl FnOnce(&mut LockedAggregation) -> Result<T>,
  ) -> Result<T> {
    loop {
      let locked = self.find_or_create(aligned_start, create)?;

      #[cfg(test)]
      self.thread_synchronizer.sync_point("write_window");

      let mut window = locked.lock();
      // The consumer drained the window after it was found. Queue it again.
      if window.queued || window.closed {
        return write(&mut *window);
      }
    }
  }

  // Add a raw value at the given time.
  pub fn add_value(
    &self,
    timestamp: UnixNanos,
    value: f64,
    annotation: Option<&Bytes>,
  ) -> Result<()> {
    let aligned_start = timestamp.truncate(self.storage_policy.resolution);
    self.write_window(aligned_start, CreateOptions::default(), |window| {
      if window.closed {
        return Err(ElemError::AggregationClosed);
      }
      window.accumulator.add(timestamp, value, annotation);
      window.dirty = true;
      Ok(())
    })
  }

  // Add an untimed union sample. If the window was closed because the sample arrived right at the
  // boundary it is rolled into the next window, unless resend is enabled.
  pub fn add_union(
    &self,
    timestamp: UnixNanos,
    union: &MetricUnion,
    resend_enabled: bool,
  ) -> Result<()> {
    self.do_add_union(timestamp, union, resend_enabled, false)
  }

  fn do_add_union(
    &self,
    timestamp: UnixNanos,
    union: &MetricUnion,
    resend_enabled: bool,
    retry: bool,
  ) -> Result<()> {
    let resolution = self.storage_policy.resolution;
    let aligned_start = timestamp.truncate(resolution);
    let closed = self.write_window(
      aligned_start,
      CreateOptions {
        init_source_set: false,
        resend_enabled,
      },
      |window| {
        if window.closed {
          return Ok(true);
        }
        window.accumulator.add_union(timestamp, union);
        window.dirty = true;
        Ok(false)
      },
    )?;

    if closed {
      if !resend_enabled && !retry {
        return self.do_add_union(aligned_start.add_duration(resolution), union, false, true);
      }
      return Err(ElemError::AggregationClosed);
    }
    if retry {
      self.options.stats.retried_values.inc();
    }
    Ok(())
  }

  // Add a forwarded metric from an upstream source. Each source version is applied at most once
  // per window and versions after the first replace the previously added values.
  pub fn add_unique(
    &self,
    timestamp: UnixNanos,
    metric: &ForwardedMetric,
    metadata: &ForwardMetadata,
  ) -> Result<()> {
    let aligned_start = timestamp.truncate(self.storage_policy.resolution);
    let create = CreateOptions {
      init_source_set: true,
      resend_enabled: metadata.resend_enabled,
    };
    self.write_window(aligned_start, create, |window| {
      if window.closed {
        return Err(ElemError::AggregationClosed);
      }
      // The window may have been created by a non forwarded write.
      let sources_seen = window.sources_seen.get_or_insert_with(SourceSet::default);
      if !sources_seen.insert(metadata.source_id, metric.version) {
        return Err(ElemError::DuplicateForwardingSource);
      }

      if metric.version == 0 {
        for value in &metric.values {
          window
            .accumulator
            .add(timestamp, *value, metric.annotation.as_ref());
        }
        window.dirty = true;
        return Ok(());
      }

      self.options.stats.updated_values.inc();
      for (value, prev_value) in metric.values.iter().zip(&metric.prev_values) {
        // Updates applied before a failure stay applied and still need to be flushed.
        window
          .accumulator
          .update_value(timestamp, *value, *prev_value)?;
        window.dirty = true;
      }
      Ok(())
    })
  }

  // Flush every dirty window that is eligible at target and expire old windows. Must only be
  // called from a single consumer. Returns whether the element can be collected.
  pub fn consume(
    &self,
    target: UnixNanos,
    policy: &dyn TimePolicy,
    handler: &dyn FlushHandler,
    jitter: Duration,
    flush_type: FlushType,
  ) -> bool {
    let resolution = self.storage_policy.resolution;
    let lateness_allowed = (target.as_nanos() - policy.target_nanos(target).as_nanos()).nanoseconds();

    let mut consumer = self.consumer.lock();
    let consumer = &mut *consumer;
    let can_collect = {
      let mut state = self.state.write();
      if state.closed {
        return false;
      }

      state.dirty_to_consume(
        consumer,
        target,
        resolution,
        policy,
        &self.aggregation_kinds,
      );
      state.expire_values(
        consumer,
        target,
        resolution,
        policy,
        self.options.options.buffer_for_past_timed_metric(resolution),
      );
      self.observe_dirty_backlog(state.dirty.len());
      state.dirty.is_empty() && state.tombstoned
    };

    for consume_state in consumer.to_consume.as_slice() {
      self.process_value(
        consume_state,
        &mut consumer.flush_state,
        consumer.forwarding.as_ref(),
        policy,
        handler,
        lateness_allowed,
        jitter,
        flush_type,
      );
    }

    // Flush state is needed while processing so it is expired afterwards.
    self.expire_flush_state(consumer);

    if let (Some(key), Some(forwarding)) = (&self.forwarded_key, &consumer.forwarding) {
      handler.on_forwarded_flushed(
        forwarding.on_written.as_ref(),
        key,
        &consumer.flush_state_to_expire,
      );
    }

    can_collect
  }

  fn observe_dirty_backlog(&self, backlog: usize) {
    self
      .options
      .stats
      .dirty_backlog
      .observe(backlog.lossy_to_f64());
    if backlog > self.options.options.dirty_backlog_warn_threshold {
      warn_every!(
        1.minutes(),
        "element {} has {} dirty windows pending consumption",
        String::from_utf8_lossy(&self.id),
        backlog
      );
    }
  }

  fn expire_flush_state(&self, consumer: &mut ConsumerState) {
    for start_at in &consumer.flush_state_to_expire {
      if consumer.flush_state.remove(start_at).is_none() {
        self.report(&InvariantViolation::ExpiredStartMissing {
          start_at: *start_at,
        });
      }
    }
  }

  fn report(&self, violation: &InvariantViolation) {
    self.options.reporter.report(&self.id, violation);
  }

  fn record_forward_lag(
    &self,
    lag_type: &str,
    timestamp: UnixNanos,
    lateness_allowed: Duration,
    jitter: Duration,
    flush_type: FlushType,
  ) {
    let now = self.options.time_provider.now_nanos();
    let resolution = self.storage_policy.resolution.to_string();
    let flush_type = flush_type.to_string();
    for (with_jitter, allowed) in [
      ("false", lateness_allowed + jitter),
      ("true", lateness_allowed),
    ] {
      let lag = now.as_nanos() - timestamp.sub_duration(allowed).as_nanos();
      self
        .options
        .stats
        .forward_lag
        .with_label_values(&[resolution.as_str(), lag_type, with_jitter, flush_type.as_str()])
        .observe(lag.lossy_to_f64() / 1_000_000_000.0);
    }
  }

  // Run the pipeline over a snapshot and flush the result for every aggregation kind.
  #[allow(clippy::too_many_arguments)]
  fn process_value(
    &self,
    consume_state: &ConsumeState,
    flush_states: &mut FlushStateMap,
    forwarding: Option<&ForwardingHandles>,
    policy: &dyn TimePolicy,
    handler: &dyn FlushHandler,
    lateness_allowed: Duration,
    jitter: Duration,
    flush_type: FlushType,
  ) {
    let resolution = self.storage_policy.resolution;
    let discard_nan_values = self.options.options.discard_nan_aggregated_values;
    let timestamp = policy.timestamp_nanos(consume_state.start_at, resolution);
    let num_kinds = self.aggregation_kinds.len();

    let mut flush_state = flush_states
      .remove(&consume_state.start_at)
      .unwrap_or_default();
    if consume_state.dirty && flush_state.flushed && !consume_state.resend_enabled {
      self.report(&InvariantViolation::ReflushWithoutResend {
        start_at: consume_state.start_at,
      });
    }

    for (kind_index, mut value) in consume_state.values.iter().copied().enumerate() {
      let mut extra = None;
      for transformation in &self.transformations {
        let curr = Datapoint::new(timestamp, value);
        match transformation {
          Transformation::Unary(op) => value = op.evaluate(curr).value,
          Transformation::Binary(op) => {
            let mut prev = Datapoint::empty();
            if let Some(prev_start_at) = consume_state.prev_start_time {
              match flush_states.get(&prev_start_at) {
                Some(prev_flush_state) => {
                  prev = Datapoint::new(
                    policy.timestamp_nanos(prev_start_at, resolution),
                    prev_flush_state
                      .consumed_values
                      .get(kind_index)
                      .copied()
                      .unwrap_or(f64::NAN),
                  );
                },
                None => {
                  self.report(&InvariantViolation::PrevStartMissing { prev_start_at });
                },
              }
            }

            // Only first order binary transformations are supported so a single input per kind
            // is kept for the next window.
            if flush_state.consumed_values.len() != num_kinds {
              flush_state.consumed_values.resize(num_kinds, 0.0);
            }
            flush_state.consumed_values[kind_index] = curr.value;
            value = op.evaluate(prev, curr).value;
          },
          Transformation::UnaryMultiOutput(op) => {
            let (primary, extra_point) = op.evaluate(curr, resolution);
            value = primary.value;
            extra = Some(extra_point);
          },
        }
      }

      if discard_nan_values && value.is_nan() {
        continue;
      }

      // A zero previous value on the first flush is fine since it is only used downstream for
      // resends.
      let prev_value = if flush_state.emitted_values.is_empty() {
        flush_state.emitted_values.resize(num_kinds, 0.0);
        0.0
      } else {
        flush_state.emitted_values[kind_index]
      };
      flush_state.emitted_values[kind_index] = value;
      #[allow(clippy::float_cmp)]
      if flush_state.flushed && ((prev_value.is_nan() && value.is_nan()) || prev_value == value) {
        continue;
      }

      match (&self.forwarded_key, forwarding) {
        (Some(key), Some(forwarding)) => {
          // Lag is only recorded for the initial flush and not for resends.
          if !flush_state.flushed {
            self.record_forward_lag("remote", timestamp, lateness_allowed, jitter, flush_type);
          }
          handler.flush_forwarded(
            forwarding.writer.as_ref(),
            key,
            ForwardedFlush {
              timestamp,
              value,
              prev_value,
              annotation: consume_state.annotation.clone(),
              resend_enabled: consume_state.resend_enabled,
            },
          );
        },
        _ => {
          let primary = Datapoint::new(timestamp, value);
          for point in std::iter::once(primary).chain(extra) {
            let (prefix, type_suffix) = match self.id_prefix_suffix_type {
              IdPrefixSuffixType::NoPrefixNoSuffix => (None, None),
              IdPrefixSuffixType::WithPrefixWithSuffix => (
                Some(self.full_prefix.clone()),
                Some(self.type_strings[kind_index].clone()),
              ),
            };
            handler.flush_local(LocalFlush {
              prefix,
              id: self.id.clone(),
              type_suffix,
              timestamp: point.time_nanos,
              value: point.value,
              annotation: consume_state.annotation.clone(),
              storage_policy: self.storage_policy,
            });
            if !flush_state.flushed {
              self.record_forward_lag("local", timestamp, lateness_allowed, jitter, flush_type);
            }
          }
        },
      }
    }

    flush_state.flushed = true;
    flush_states.insert(consume_state.start_at, flush_state);
  }

  // Close the element and every window. Idempotent. The element's buffers are returned to the
  // pool.
  pub fn close(&self) {
    let mut consumer = self.consumer.lock();
    let mut state = self.state.write();
    if state.closed {
      return;
    }
    state.closed = true;
    consumer.forwarding = None;
    state.cached_source_sets.clear();

    let min_start_time = state.min_start_time;
    for (start_at, agg) in state.values.drain() {
      if start_at < min_start_time {
        self.report(&InvariantViolation::ValueBeforeMin {
          start_at,
          min_start_at: min_start_time,
        });
      }
      let mut locked = agg.locked.lock();
      locked.closed = true;
      locked.accumulator.close();
      consumer.flush_state.remove(&start_at);
    }
    for (start_at, _) in consumer.flush_state.drain() {
      self.report(&InvariantViolation::DanglingFlushState { start_at });
    }

    state.min_start_time = UnixNanos::default();
    state.max_start_time = UnixNanos::default();
    self.options.pool.put(ElemBuffers {
      values: std::mem::take(&mut state.values),
      flush_state: std::mem::take(&mut consumer.flush_state),
      dirty: std::mem::take(&mut state.dirty),
      to_consume: std::mem::take(&mut consumer.to_consume),
      flush_state_to_expire: std::mem::take(&mut consumer.flush_state_to_expire),
    });
    log::trace!("closed element {}", String::from_utf8_lossy(&self.id));
  }
}
