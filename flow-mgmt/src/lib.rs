// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Flow management: tracks which flows depend on which configuration and routing objects,
//! and tells the flow table what to do with its flows when those objects change.
//!
//! The [`FlowMgmtManager`] holds one ordered tree per kind of object. Each entry records the
//! flows depending on the object and what the manager has seen of the object's lifecycle.
//! An entry is released once no flow depends on it and the object itself is gone, at which
//! point the object's owner is told it may free the object.

#![deny(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod entry;
pub mod errors;
pub mod event;
pub mod key;
mod lpm;
pub mod manager;
pub mod request;
pub mod service;
pub mod tree;

pub use config::*;
pub use entry::*;
pub use errors::*;
pub use event::*;
pub use key::*;
pub use manager::*;
pub use request::*;
pub use service::*;
pub use tree::*;

use tracectl::trace_target;
trace_target!("flow-mgmt", LevelFilter::INFO, &["flow"]);
