// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Runtime control of the tracing targets declared by the flow engine crates.
//!
//! Crates declare their target once with [`trace_target!`]; the declaration is collected at
//! link time so that [`TracingControl`] knows every target before any of them logs.

pub mod control;
pub mod targets;

pub use control::{TracectlError, TracingControl, get_trace_ctl};
pub use tracing_subscriber::filter::LevelFilter;
