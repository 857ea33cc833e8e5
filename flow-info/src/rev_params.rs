// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

use std::net::IpAddr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What a session teardown needs to know about the reverse flow.
///
/// Captured while the reverse flow is still alive and handed over by value, so that a
/// teardown never reaches into a reverse flow that a concurrent delete may have freed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevFlowDepParams {
    pub rev_uuid: Uuid,
    pub rev_egress_uuid: Uuid,
    pub sip: Option<IpAddr>,
    pub vmi_uuid: Uuid,
    pub sg_uuid: Uuid,
    pub vm_cfg_name: String,
}

impl RevFlowDepParams {
    /// Parameters of a flow that has no reverse partner.
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn has_reverse(&self) -> bool {
        !self.rev_uuid.is_nil()
    }
}
