// pulse - bitdrift's observability proxy
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

pub mod accumulator;
pub mod config;
pub mod elem;
pub mod flush;
pub mod invariant;
pub mod metric;
#[cfg(test)]
pub mod test;
pub mod time;
pub mod transformation;

#[cfg(test)]
#[ctor::ctor]
fn test_global_init() {
  pulse_common::global_initialize();
}
