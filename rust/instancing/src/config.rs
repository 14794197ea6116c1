// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Handler configuration.

use crate::Result;
use serde::Deserialize;

/// Default cap on instances per batch.
pub const DEFAULT_MAX_BATCH_INSTANCES: usize = 4000;

/// Tunables of a [`ModelHandler`](crate::ModelHandler).
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct HandlerConfig {
    /// Maximum number of instances sharing one batch. Bounds the cost of
    /// rebuilding a single batch.
    pub max_batch_instances: usize,
    /// Edge length of the cube a normalized model is scaled to fit.
    pub normalized_size: f64,
}

impl HandlerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_batch_instances: std::env::var("VIZKIT_MAX_BATCH_INSTANCES")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|&n: &usize| n > 0)
                .unwrap_or(defaults.max_batch_instances),
            normalized_size: std::env::var("VIZKIT_NORMALIZED_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|&s: &f64| s > 0.0)
                .unwrap_or(defaults.normalized_size),
        }
    }

    /// Parse configuration from JSON; missing fields keep their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let mut config: Self = serde_json::from_str(json)?;
        if config.max_batch_instances == 0 {
            config.max_batch_instances = DEFAULT_MAX_BATCH_INSTANCES;
        }
        Ok(config)
    }
}

impl Default for HandlerConfig {
    fn default() -> Self {
        Self {
            max_batch_instances: DEFAULT_MAX_BATCH_INSTANCES,
            normalized_size: 1.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = HandlerConfig::default();
        assert_eq!(config.max_batch_instances, 4000);
        assert_eq!(config.normalized_size, 1.0);
    }

    #[test]
    fn test_from_json_keeps_missing_defaults() {
        let config = HandlerConfig::from_json(r#"{ "max_batch_instances": 16 }"#).unwrap();
        assert_eq!(config.max_batch_instances, 16);
        assert_eq!(config.normalized_size, 1.0);

        let zero = HandlerConfig::from_json(r#"{ "max_batch_instances": 0 }"#).unwrap();
        assert_eq!(zero.max_batch_instances, DEFAULT_MAX_BATCH_INSTANCES);

        assert!(HandlerConfig::from_json("{ not json").is_err());
    }
}
