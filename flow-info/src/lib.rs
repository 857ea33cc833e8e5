// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Flow-side vocabulary shared by flow management, flow aging and session aggregation:
//! flow identity, flow flags, kernel counters and the wraparound-safe counter arithmetic.

#![deny(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod counters;
pub mod flags;
pub mod flow_info;
pub mod flow_key;
pub mod kernel;
pub mod rev_params;

pub use counters::*;
pub use flags::*;
pub use flow_info::*;
pub use flow_key::*;
pub use kernel::*;
pub use rev_params::*;

use tracectl::trace_target;
trace_target!("flow-info", LevelFilter::INFO, &["flow"]);
