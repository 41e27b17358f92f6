// pulse - bitdrift's observability proxy
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./stats_test.rs"]
mod stats_test;

use parking_lot::Mutex;
use prometheus::core::Collector as PromCollector;
use prometheus::proto::MetricFamily;
use prometheus::{
  Histogram,
  HistogramOpts,
  HistogramVec,
  IntCounter,
  IntCounterVec,
  IntGauge,
  Opts,
  Registry,
};
use std::collections::HashMap;
use std::sync::Arc;

const SEP: &str = ":";

//
// Collector
//

#[derive(Default)]
struct Cache {
  counters: HashMap<String, IntCounter>,
  counter_vecs: HashMap<String, IntCounterVec>,
  gauges: HashMap<String, IntGauge>,
  histograms: HashMap<String, Histogram>,
  histogram_vecs: HashMap<String, HistogramVec>,
}

// Owns the prometheus registry. Stats are created through scopes and cached by full name so that
// asking for the same stat twice returns the same underlying metric.
#[derive(Clone, Default)]
pub struct Collector {
  registry: Registry,
  cache: Arc<Mutex<Cache>>,
}

impl Collector {
  #[must_use]
  pub fn scope(&self, name: &str) -> Scope {
    Scope {
      collector: self.clone(),
      name: name.to_string(),
    }
  }

  #[must_use]
  pub fn gather(&self) -> Vec<MetricFamily> {
    self.registry.gather()
  }

  #[must_use]
  pub const fn registry(&self) -> &Registry {
    &self.registry
  }

  fn get_or_register<T: PromCollector + Clone + 'static>(
    &self,
    cache: &mut HashMap<String, T>,
    name: String,
    make: impl FnOnce(&str) -> prometheus::Result<T>,
  ) -> T {
    if let Some(existing) = cache.get(&name) {
      return existing.clone();
    }

    // Stat names are constants in code so a failure here is a programming error.
    let stat = make(&name).unwrap_or_else(|e| panic!("unable to create stat '{name}': {e}"));
    if let Err(e) = self.registry.register(Box::new(stat.clone())) {
      log::warn!("unable to register stat '{name}': {e}");
    }
    cache.insert(name, stat.clone());
    stat
  }
}

//
// Scope
//

// A named scope for creating stats. Scope names are joined with ':' to form the full stat name.
#[derive(Clone)]
pub struct Scope {
  collector: Collector,
  name: String,
}

impl Scope {
  fn full_name(&self, name: &str) -> String {
    if self.name.is_empty() {
      name.to_string()
    } else if name.is_empty() {
      self.name.clone()
    } else {
      format!("{}{SEP}{name}", self.name)
    }
  }

  #[must_use]
  pub fn scope(&self, name: &str) -> Self {
    Self {
      collector: self.collector.clone(),
      name: self.full_name(name),
    }
  }

  #[must_use]
  pub fn name(&self) -> &str {
    &self.name
  }

  #[must_use]
  pub fn counter(&self, name: &str) -> IntCounter {
    let mut cache = self.collector.cache.lock();
    self
      .collector
      .get_or_register(&mut cache.counters, self.full_name(name), |name| {
        IntCounter::new(name, name)
      })
  }

  #[must_use]
  pub fn counter_vec(&self, name: &str, labels: &[&str]) -> IntCounterVec {
    let mut cache = self.collector.cache.lock();
    self
      .collector
      .get_or_register(&mut cache.counter_vecs, self.full_name(name), |name| {
        IntCounterVec::new(Opts::new(name, name), labels)
      })
  }

  #[must_use]
  pub fn gauge(&self, name: &str) -> IntGauge {
    let mut cache = self.collector.cache.lock();
    self
      .collector
      .get_or_register(&mut cache.gauges, self.full_name(name), |name| {
        IntGauge::new(name, name)
      })
  }

  #[must_use]
  pub fn histogram(&self, name: &str, buckets: Option<Vec<f64>>) -> Histogram {
    let mut cache = self.collector.cache.lock();
    self
      .collector
      .get_or_register(&mut cache.histograms, self.full_name(name), |name| {
        let mut opts = HistogramOpts::new(name, name);
        if let Some(buckets) = buckets {
          opts = opts.buckets(buckets);
        }
        Histogram::with_opts(opts)
      })
  }

  #[must_use]
  pub fn histogram_vec(
    &self,
    name: &str,
    labels: &[&str],
    buckets: Option<Vec<f64>>,
  ) -> HistogramVec {
    let mut cache = self.collector.cache.lock();
    self
      .collector
      .get_or_register(&mut cache.histogram_vecs, self.full_name(name), |name| {
        let mut opts = HistogramOpts::new(name, name);
        if let Some(buckets) = buckets {
          opts = opts.buckets(buckets);
        }
        HistogramVec::new(opts, labels)
      })
  }
}
