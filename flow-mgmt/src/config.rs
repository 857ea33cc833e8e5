// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

use derive_builder::Builder;
use serde::{Deserialize, Serialize};

/// Settings of the flow management service.
#[derive(Builder, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[builder(build_fn(validate = "Self::validate"))]
pub struct FlowMgmtConfig {
    /// Requests that can be queued before senders wait.
    #[builder(default = "FlowMgmtConfig::DEFAULT_QUEUE_CAPACITY")]
    pub queue_capacity: usize,
    /// Events to the flow table that can be queued before the manager waits.
    #[builder(default = "FlowMgmtConfig::DEFAULT_QUEUE_CAPACITY")]
    pub event_capacity: usize,
}

impl FlowMgmtConfig {
    pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

    #[must_use]
    pub fn builder() -> FlowMgmtConfigBuilder {
        FlowMgmtConfigBuilder::default()
    }
}

impl Default for FlowMgmtConfig {
    fn default() -> Self {
        Self {
            queue_capacity: Self::DEFAULT_QUEUE_CAPACITY,
            event_capacity: Self::DEFAULT_QUEUE_CAPACITY,
        }
    }
}

impl FlowMgmtConfigBuilder {
    fn validate(&self) -> Result<(), String> {
        if self.queue_capacity == Some(0) || self.event_capacity == Some(0) {
            return Err("channel capacities must be non-zero".to_string());
        }
        Ok(())
    }
}
