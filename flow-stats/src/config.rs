// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Settings of the aging collector.

use derive_builder::Builder;
use serde::{Deserialize, Serialize};

#[derive(Builder, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[builder(build_fn(private, name = "_build"))]
pub struct FlowAgingConfig {
    /// Inactivity after which a flow is aged, in microseconds.
    #[builder(default = "FlowAgingConfig::DEFAULT_AGE_TIME_USEC")]
    pub age_time_usec: u64,
    /// Scan interval when there are no flows.
    #[builder(default = "1000")]
    pub default_interval_ms: u32,
    /// Shortest scan interval the adaptive control may pick.
    #[builder(default = "100")]
    pub min_interval_ms: u32,
    /// Flow table size the scan rate is dimensioned for, at the default age time.
    #[builder(default = "256 * 1024")]
    pub max_flows: u64,
    /// Flows visited by the first pass, before the adaptive control kicks in.
    #[builder(default = "200")]
    pub count_per_pass: u32,
    /// Lifetime of a TCP flow that never completed its handshake, in microseconds.
    #[builder(default = "FlowAgingConfig::DEFAULT_AGE_TIME_USEC")]
    pub tcp_syn_age_time_usec: u64,
    /// Remove short flows on the next pass.
    #[builder(default = "true")]
    pub delete_short_flow: bool,
    /// Flow records per second the export pipeline is sized for. With 0 only flows with the
    /// log action are exported.
    #[builder(default = "100")]
    pub flow_export_rate: u32,
    /// Initial sampling threshold, in bytes.
    #[builder(default = "FlowAgingConfig::DEFAULT_SAMPLING_THRESHOLD")]
    pub sampling_threshold: u64,
    /// Flow records sent to the sink together.
    #[builder(default = "16")]
    pub max_msgs_per_send: usize,
}

impl FlowAgingConfig {
    pub const DEFAULT_AGE_TIME_USEC: u64 = 180 * 1_000_000;
    pub const DEFAULT_SAMPLING_THRESHOLD: u64 = 500;

    #[must_use]
    pub fn builder() -> FlowAgingConfigBuilder {
        FlowAgingConfigBuilder::default()
    }
}

impl Default for FlowAgingConfig {
    fn default() -> Self {
        Self {
            age_time_usec: Self::DEFAULT_AGE_TIME_USEC,
            default_interval_ms: 1000,
            min_interval_ms: 100,
            max_flows: 256 * 1024,
            count_per_pass: 200,
            tcp_syn_age_time_usec: Self::DEFAULT_AGE_TIME_USEC,
            delete_short_flow: true,
            flow_export_rate: 100,
            sampling_threshold: Self::DEFAULT_SAMPLING_THRESHOLD,
            max_msgs_per_send: 16,
        }
    }
}

impl FlowAgingConfigBuilder {
    /// Build a [`FlowAgingConfig`].
    ///
    /// # Errors
    ///
    /// Returns an error if
    ///
    /// * the age time is zero
    /// * the minimum interval is zero or above the default interval
    /// * the per-pass count, the sampling threshold or the batch size is zero
    pub fn build(&self) -> Result<FlowAgingConfig, FlowAgingConfigBuilderError> {
        let config = self._build()?;
        let invalid = |msg: &str| Err(FlowAgingConfigBuilderError::ValidationError(msg.to_string()));
        if config.age_time_usec == 0 {
            return invalid("age time must be non-zero");
        }
        if config.min_interval_ms == 0 || config.min_interval_ms > config.default_interval_ms {
            return invalid("minimum interval must be non-zero and at most the default interval");
        }
        if config.count_per_pass == 0 {
            return invalid("flow count per pass must be non-zero");
        }
        if config.sampling_threshold == 0 {
            return invalid("sampling threshold must be non-zero");
        }
        if config.max_msgs_per_send == 0 {
            return invalid("export batch size must be non-zero");
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = FlowAgingConfig::builder().build().unwrap();
        assert_eq!(config, FlowAgingConfig::default());
        assert_eq!(config.age_time_usec, 180_000_000);
        assert_eq!(config.max_flows, 262_144);
    }

    #[test]
    fn rejects_nonsense() {
        assert!(FlowAgingConfig::builder().age_time_usec(0).build().is_err());
        assert!(
            FlowAgingConfig::builder()
                .min_interval_ms(2000)
                .build()
                .is_err()
        );
        assert!(FlowAgingConfig::builder().max_msgs_per_send(0).build().is_err());
        let config = FlowAgingConfig::builder()
            .age_time_usec(30_000_000)
            .flow_export_rate(0)
            .build()
            .unwrap();
        assert_eq!(config.flow_export_rate, 0);
    }
}
