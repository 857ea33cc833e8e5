// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The error results used by this library.

use flow_info::FlowKey;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum FlowStatsError {
    #[error("No flow {0} in the stats collector")]
    UnknownFlow(FlowKey),

    #[error("Flow stats request channel is closed")]
    RequestChannelClosed,

    #[error("Aged flow channel is closed")]
    AgedChannelClosed,
}
