// pulse - bitdrift's observability proxy
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./source_set_test.rs"]
mod source_set_test;

use ahash::AHashMap;
use bit_set::BitSet;

const DEFAULT_NUM_VERSIONS: usize = 8;

//
// SourceSet
//

// The versions seen per forwarding source for a single window.
#[derive(Default)]
pub struct SourceSet {
  versions_seen: AHashMap<u32, BitSet>,
}

impl SourceSet {
  // Record a version for a source. Returns false if it had already been seen.
  pub fn insert(&mut self, source_id: u32, version: u32) -> bool {
    self
      .versions_seen
      .entry(source_id)
      .or_insert_with(|| BitSet::with_capacity(DEFAULT_NUM_VERSIONS))
      .insert(version as usize)
  }

  #[must_use]
  pub fn contains(&self, source_id: u32, version: u32) -> bool {
    self
      .versions_seen
      .get(&source_id)
      .is_some_and(|versions| versions.contains(version as usize))
  }

  // Forget every version while keeping the per-source bitsets allocated.
  pub fn clear(&mut self) {
    for versions in self.versions_seen.values_mut() {
      versions.clear();
    }
  }

  #[must_use]
  pub fn num_sources(&self) -> usize {
    self.versions_seen.len()
  }
}

//
// SourceSetCache
//

// Source sets from expired windows kept around for reuse by new windows.
pub struct SourceSetCache {
  cached: Vec<SourceSet>,
  max_cached: usize,
}

impl SourceSetCache {
  #[must_use]
  pub const fn new(max_cached: usize) -> Self {
    Self {
      cached: Vec::new(),
      max_cached,
    }
  }

  // A cleared recycled set if one is available, else a new one.
  pub fn take(&mut self) -> SourceSet {
    self.cached.pop().map_or_else(SourceSet::default, |mut set| {
      set.clear();
      set
    })
  }

  // Keep a set for reuse unless the cache is already full.
  pub fn put(&mut self, set: SourceSet) {
    if self.cached.len() < self.max_cached {
      self.cached.push(set);
    }
  }

  pub fn clear(&mut self) {
    self.cached.clear();
  }

  #[must_use]
  pub fn len(&self) -> usize {
    self.cached.len()
  }
}
