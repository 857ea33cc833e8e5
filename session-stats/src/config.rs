// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

use derive_builder::Builder;
use serde::{Deserialize, Serialize};

/// Settings of the session aggregator.
#[derive(Builder, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[builder(build_fn(validate = "Self::validate"))]
pub struct SessionStatsConfig {
    /// Period of the export scan.
    #[builder(default = "1000")]
    pub interval_ms: u64,
    /// Endpoints visited and exported per scan.
    #[builder(default = "64")]
    pub page_size: usize,
    #[builder(default = "1024")]
    pub queue_capacity: usize,
}

impl SessionStatsConfig {
    #[must_use]
    pub fn builder() -> SessionStatsConfigBuilder {
        SessionStatsConfigBuilder::default()
    }
}

impl Default for SessionStatsConfig {
    fn default() -> Self {
        Self {
            interval_ms: 1000,
            page_size: 64,
            queue_capacity: 1024,
        }
    }
}

impl SessionStatsConfigBuilder {
    fn validate(&self) -> Result<(), String> {
        if self.interval_ms == Some(0) {
            return Err("scan interval must be non-zero".to_string());
        }
        if self.page_size == Some(0) {
            return Err("page size must be non-zero".to_string());
        }
        if self.queue_capacity == Some(0) {
            return Err("queue capacity must be non-zero".to_string());
        }
        Ok(())
    }
}
