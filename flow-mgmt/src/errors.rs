// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The error results used by this library.

use std::net::IpAddr;

use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum FlowMgmtError {
    #[error("Invalid prefix length {1} for {0}")]
    InvalidPrefixLength(IpAddr, u8),

    #[error("Flow management request channel is closed")]
    RequestChannelClosed,

    #[error("Flow table event channel is closed")]
    EventChannelClosed,
}
