// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The error results used by this library.

use flow_info::FlowKey;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum SessionStatsError {
    #[error("No session for flow {0}")]
    UnknownSession(FlowKey),

    #[error("Session stats request channel is closed")]
    RequestChannelClosed,
}
