// pulse - bitdrift's observability proxy
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./config_test.rs"]
mod config_test;

use anyhow::Context;
use serde::de::DeserializeOwned;

//
// Validate
//

// Implemented by configuration types that have constraints beyond what deserialization checks.
pub trait Validate {
  fn validate(&self) -> anyhow::Result<()>;
}

// Convert a YAML value to a config type and then validate it.
pub fn yaml_value_to_config<T: DeserializeOwned + Validate>(
  value: serde_yaml::Value,
) -> anyhow::Result<T> {
  let config: T = serde_yaml::from_value(value)?;
  config.validate()?;
  Ok(config)
}

// Convert a YAML string to a config type and then validate it.
pub fn yaml_to_config<T: DeserializeOwned + Validate>(yaml: &str) -> anyhow::Result<T> {
  let yaml: serde_yaml::Value = serde_yaml::from_str(yaml)?;
  yaml_value_to_config(yaml)
}

pub fn load_from_file<T: DeserializeOwned + Validate>(path: &str) -> anyhow::Result<T> {
  let file_contents =
    std::fs::read_to_string(path).with_context(|| format!("unable to read config '{path}'"))?;
  yaml_to_config(&file_contents).with_context(|| format!("invalid config '{path}'"))
}
