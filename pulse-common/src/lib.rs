// pulse - bitdrift's observability proxy
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

pub mod config;
pub mod rate_limit;
pub mod stats;

#[doc(hidden)]
pub use log as __log;

use std::sync::Once;

#[cfg(test)]
#[ctor::ctor]
fn test_global_init() {
  global_initialize();
}

pub fn global_initialize() {
  static INIT: Once = Once::new();

  // Both the library ctor and binaries may call this so make sure the logger is only installed
  // once. RUST_LOG controls the level, defaulting to info.
  INIT.call_once(|| {
    let _ignored =
      env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_micros()
        .is_test(cfg!(test))
        .try_init();
  });
}

pub trait LossyIntToFloat {
  fn lossy_to_f64(self) -> f64;
}

impl LossyIntToFloat for u64 {
  #[allow(clippy::cast_precision_loss)]
  fn lossy_to_f64(self) -> f64 {
    self as f64
  }
}

impl LossyIntToFloat for i64 {
  #[allow(clippy::cast_precision_loss)]
  fn lossy_to_f64(self) -> f64 {
    self as f64
  }
}

impl LossyIntToFloat for usize {
  #[allow(clippy::cast_precision_loss)]
  fn lossy_to_f64(self) -> f64 {
    self as f64
  }
}

pub trait LossyFloatToInt {
  fn lossy_to_usize(self) -> usize;
  fn lossy_to_u64(self) -> u64;
  fn lossy_to_i64(self) -> i64;
}

impl LossyFloatToInt for f64 {
  #[allow(
    clippy::cast_precision_loss,
    clippy::cast_sign_loss,
    clippy::cast_possible_truncation
  )]
  fn lossy_to_usize(self) -> usize {
    self as usize
  }

  #[allow(
    clippy::cast_precision_loss,
    clippy::cast_sign_loss,
    clippy::cast_possible_truncation
  )]
  fn lossy_to_u64(self) -> u64 {
    self as u64
  }

  #[allow(clippy::cast_possible_truncation)]
  fn lossy_to_i64(self) -> i64 {
    self as i64
  }
}
