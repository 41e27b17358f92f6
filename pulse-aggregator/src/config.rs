// pulse - bitdrift's observability proxy
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./config_test.rs"]
mod config_test;

use crate::metric::MetricType;
use crate::metric::aggregation::AggregationKind;
use anyhow::bail;
use bytes::Bytes;
use pulse_common::config::Validate;
use serde::Deserialize;
use std::collections::HashMap;
use time::Duration;

const fn default_discard_nan_aggregated_values() -> bool {
  true
}

const fn default_max_num_cached_source_sets() -> usize {
  2
}

const fn default_buffer_for_past_timed_metric() -> std::time::Duration {
  std::time::Duration::from_secs(10 * 60)
}

fn default_full_prefix() -> String {
  "stats.".to_string()
}

fn default_counter_prefix() -> String {
  "counts.".to_string()
}

fn default_timer_prefix() -> String {
  "timers.".to_string()
}

fn default_gauge_prefix() -> String {
  "gauges.".to_string()
}

const fn default_dirty_backlog_warn_threshold() -> usize {
  64
}

const fn default_elem_pool_size() -> usize {
  4096
}

//
// AggregatorOptions
//

// Options shared by every element created by an aggregator.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct AggregatorOptions {
  // Drop values that are NaN after transformations instead of emitting them.
  #[serde(default = "default_discard_nan_aggregated_values")]
  pub discard_nan_aggregated_values: bool,

  // Upper bound on the source sets an element keeps around for reuse.
  #[serde(default = "default_max_num_cached_source_sets")]
  pub max_num_cached_source_sets: usize,

  // How long resend enabled windows are kept around after they become eligible for expiry.
  #[serde(
    default = "default_buffer_for_past_timed_metric",
    with = "humantime_serde"
  )]
  pub buffer_for_past_timed_metric: std::time::Duration,

  // When set, the resend buffer is this multiple of the resolution instead of the fixed buffer.
  #[serde(default)]
  pub buffer_for_past_timed_metric_factor: Option<u32>,

  #[serde(default = "default_full_prefix")]
  pub full_prefix: String,
  #[serde(default = "default_counter_prefix")]
  pub counter_prefix: String,
  #[serde(default = "default_timer_prefix")]
  pub timer_prefix: String,
  #[serde(default = "default_gauge_prefix")]
  pub gauge_prefix: String,

  #[serde(default)]
  pub counter_type_strings: HashMap<AggregationKind, String>,
  #[serde(default)]
  pub timer_type_strings: HashMap<AggregationKind, String>,
  #[serde(default)]
  pub gauge_type_strings: HashMap<AggregationKind, String>,

  #[serde(default)]
  pub default_aggregation_kinds: HashMap<MetricType, Vec<AggregationKind>>,

  // Dirty list length above which an element warns that the consumer is falling behind.
  #[serde(default = "default_dirty_backlog_warn_threshold")]
  pub dirty_backlog_warn_threshold: usize,

  #[serde(default = "default_elem_pool_size")]
  pub elem_pool_size: usize,
}

impl Default for AggregatorOptions {
  fn default() -> Self {
    Self {
      discard_nan_aggregated_values: default_discard_nan_aggregated_values(),
      max_num_cached_source_sets: default_max_num_cached_source_sets(),
      buffer_for_past_timed_metric: default_buffer_for_past_timed_metric(),
      buffer_for_past_timed_metric_factor: None,
      full_prefix: default_full_prefix(),
      counter_prefix: default_counter_prefix(),
      timer_prefix: default_timer_prefix(),
      gauge_prefix: default_gauge_prefix(),
      counter_type_strings: HashMap::new(),
      timer_type_strings: HashMap::new(),
      gauge_type_strings: HashMap::new(),
      default_aggregation_kinds: HashMap::new(),
      dirty_backlog_warn_threshold: default_dirty_backlog_warn_threshold(),
      elem_pool_size: default_elem_pool_size(),
    }
  }
}

impl AggregatorOptions {
  pub fn from_yaml(yaml: &str) -> anyhow::Result<Self> {
    pulse_common::config::yaml_to_config(yaml)
  }

  pub fn load_from_file(path: &str) -> anyhow::Result<Self> {
    pulse_common::config::load_from_file(path)
  }

  // The resend buffer for a given resolution.
  #[must_use]
  pub fn buffer_for_past_timed_metric(&self, resolution: Duration) -> Duration {
    self.buffer_for_past_timed_metric_factor.map_or_else(
      || {
        Duration::try_from(self.buffer_for_past_timed_metric).unwrap_or(Duration::MAX)
      },
      |factor| resolution.saturating_mul(i32::try_from(factor).unwrap_or(i32::MAX)),
    )
  }

  // The full prefix used when emitting decorated ids, e.g. "stats.counts.".
  #[must_use]
  pub fn full_prefix(&self, metric_type: MetricType) -> Bytes {
    let type_prefix = match metric_type {
      MetricType::Counter => &self.counter_prefix,
      MetricType::Gauge => &self.gauge_prefix,
      MetricType::Timer => &self.timer_prefix,
    };
    format!("{}{type_prefix}", self.full_prefix).into()
  }

  #[must_use]
  pub fn type_string(&self, kind: AggregationKind, metric_type: MetricType) -> Bytes {
    let overrides = match metric_type {
      MetricType::Counter => &self.counter_type_strings,
      MetricType::Gauge => &self.gauge_type_strings,
      MetricType::Timer => &self.timer_type_strings,
    };
    overrides.get(&kind).map_or_else(
      || Bytes::from_static(kind.default_type_string(metric_type).as_bytes()),
      |type_string| Bytes::from(type_string.clone()),
    )
  }

  #[must_use]
  pub fn default_aggregation_kinds(&self, metric_type: MetricType) -> Vec<AggregationKind> {
    self.default_aggregation_kinds.get(&metric_type).map_or_else(
      || AggregationKind::defaults_for(metric_type).to_vec(),
      Clone::clone,
    )
  }
}

impl Validate for AggregatorOptions {
  fn validate(&self) -> anyhow::Result<()> {
    if self.buffer_for_past_timed_metric_factor == Some(0) {
      bail!("buffer_for_past_timed_metric_factor must be > 0");
    }
    if self.dirty_backlog_warn_threshold == 0 {
      bail!("dirty_backlog_warn_threshold must be > 0");
    }
    if self.elem_pool_size == 0 {
      bail!("elem_pool_size must be > 0");
    }
    for (metric_type, kinds) in &self.default_aggregation_kinds {
      if kinds.is_empty() {
        bail!("default_aggregation_kinds for {metric_type} must not be empty");
      }
    }
    for type_strings in [
      &self.counter_type_strings,
      &self.timer_type_strings,
      &self.gauge_type_strings,
    ] {
      if type_strings.values().any(String::is_empty) {
        bail!("type string overrides must not be empty");
      }
    }
    Ok(())
  }
}
