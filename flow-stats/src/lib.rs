// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Flow aging and flow statistics export.
//!
//! The [`FlowStatsCollector`] periodically walks the flows of the flow table, folds the
//! kernel's wrapping counters into 64-bit totals, exports the deltas as flow records and
//! asks the flow table to delete flows that went idle.

#![deny(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod aging;
pub mod collector;
pub mod config;
pub mod control;
pub mod errors;
pub mod export;
pub mod export_info;
pub mod floating_ip;
pub mod inter_vn;
pub mod service;

pub use collector::*;
pub use config::*;
pub use control::*;
pub use errors::*;
pub use export::*;
pub use export_info::*;
pub use floating_ip::*;
pub use inter_vn::*;
pub use service::*;

use metrics::describe_counter;
use tracectl::{custom_target, trace_target};
trace_target!("flow-aging", LevelFilter::INFO, &["flow"]);
custom_target!("flow-export", LevelFilter::INFO, &["flow"]);

/// Describe the metrics of this crate to the installed recorder.
pub fn describe_metrics() {
    describe_counter!(FLOW_AGED_COUNT, "Flows aged out by the collector");
    describe_counter!(FLOW_EXPORT_COUNT, "Flow records exported");
    describe_counter!(
        FLOW_EXPORT_DROPS,
        "Flow records dropped by sampling or configuration"
    );
}
