// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Adaptive pacing of the aging scan.
//!
//! After each pass the scan interval and the number of flows per pass are recomputed from the
//! flow table size, so that a full sweep of the table takes about as long as the age time,
//! whatever the table size.

use serde::Serialize;
use tracing::debug;

use crate::config::FlowAgingConfig;

/// Interval never exceeded while there are flows.
pub const MAX_INTERVAL_MS: u64 = 1000;
/// Floor of the adaptive flow count per pass.
pub const MIN_COUNT_PER_PASS: u64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AgingControl {
    age_time_ms: u64,
    default_interval_ms: u64,
    min_interval_ms: u64,
    multiplier: u64,
    interval_ms: u64,
    count_per_pass: u64,
}

impl AgingControl {
    #[must_use]
    pub fn new(config: &FlowAgingConfig) -> Self {
        let age_time_ms = (config.age_time_usec / 1000).max(1);
        let default_age_ms = FlowAgingConfig::DEFAULT_AGE_TIME_USEC / 1000;
        // tables grow with the age time: more flows survive a longer one
        let max_flows = config.max_flows.saturating_mul(age_time_ms) / default_age_ms;
        let multiplier = max_flows.saturating_mul(u64::from(config.min_interval_ms)) / age_time_ms;
        Self {
            age_time_ms,
            default_interval_ms: u64::from(config.default_interval_ms),
            min_interval_ms: u64::from(config.min_interval_ms),
            multiplier,
            interval_ms: u64::from(config.default_interval_ms),
            count_per_pass: u64::from(config.count_per_pass),
        }
    }

    #[must_use]
    pub fn interval_ms(&self) -> u64 {
        self.interval_ms
    }

    #[must_use]
    pub fn count_per_pass(&self) -> u64 {
        self.count_per_pass
    }

    #[must_use]
    pub fn multiplier(&self) -> u64 {
        self.multiplier
    }

    /// Recompute interval and count for a table of `total_flows` flows.
    pub fn adjust(&mut self, total_flows: u64) {
        self.interval_ms = if total_flows > 0 {
            (self.age_time_ms.saturating_mul(self.multiplier) / total_flows)
                .min(MAX_INTERVAL_MS)
                .max(self.min_interval_ms)
        } else {
            self.default_interval_ms
        };
        self.count_per_pass =
            (self.interval_ms.saturating_mul(total_flows) / self.age_time_ms).max(MIN_COUNT_PER_PASS);
        debug!(
            "{total_flows} flows: scanning {} flows every {} ms",
            self.count_per_pass, self.interval_ms
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_multiplier() {
        let control = AgingControl::new(&FlowAgingConfig::default());
        // 256 Ki flows at 100 ms over 180 s
        assert_eq!(control.multiplier(), 145);
        assert_eq!(control.interval_ms(), 1000);
        assert_eq!(control.count_per_pass(), 200);
    }

    #[test]
    fn small_tables_scan_slowly() {
        let mut control = AgingControl::new(&FlowAgingConfig::default());
        control.adjust(10_000);
        assert_eq!(control.interval_ms(), 1000);
        assert_eq!(control.count_per_pass(), 100);

        control.adjust(0);
        assert_eq!(control.interval_ms(), 1000);
        assert_eq!(control.count_per_pass(), 100);
    }

    #[test]
    fn large_tables_scan_fast() {
        let mut control = AgingControl::new(&FlowAgingConfig::default());
        control.adjust(500_000);
        assert_eq!(control.interval_ms(), 100);
        assert_eq!(control.count_per_pass(), 277);

        control.adjust(100_000);
        // 180000 * 145 / 100000
        assert_eq!(control.interval_ms(), 261);
        assert_eq!(control.count_per_pass(), 145);
    }

    #[test]
    fn sweep_time_follows_age_time() {
        let config = FlowAgingConfig::builder()
            .age_time_usec(30_000_000)
            .build()
            .unwrap();
        let mut control = AgingControl::new(&config);
        // 256 Ki * 30 / 180 = 43690 flows, at 100 ms over 30 s
        assert_eq!(control.multiplier(), 145);
        control.adjust(200_000);
        assert_eq!(control.interval_ms(), 100);
        // a full sweep takes 200000 / 666 passes of 100 ms, about the age time
        assert_eq!(control.count_per_pass(), 666);
    }

    #[test]
    fn huge_age_times_saturate() {
        for age_time_usec in [u64::MAX / 1000, u64::MAX] {
            let config = FlowAgingConfig::builder()
                .age_time_usec(age_time_usec)
                .max_flows(u64::MAX)
                .build()
                .unwrap();
            let mut control = AgingControl::new(&config);
            for total_flows in [0, 1, 1_000_000, u64::MAX] {
                control.adjust(total_flows);
                assert!((100..=MAX_INTERVAL_MS).contains(&control.interval_ms()));
                assert!(control.count_per_pass() >= MIN_COUNT_PER_PASS);
            }
        }
    }
}
