// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Session aggregation: a forward flow and its reverse flow make one bidirectional session,
//! exported per local endpoint.

#![deny(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod aggregator;
pub mod config;
pub mod errors;
pub mod export;
pub mod info;
pub mod keys;
pub mod service;

pub use aggregator::*;
pub use config::*;
pub use errors::*;
pub use export::*;
pub use info::*;
pub use keys::*;
pub use service::*;

use tracectl::trace_target;
trace_target!("session-stats", LevelFilter::INFO, &["flow"]);
