// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Requests processed by the flow management manager.

use std::net::IpAddr;

use flow_info::{FlowFlags, FlowIndex};

use crate::entry::RouteTable;
use crate::key::{BgpAsAServiceKey, FlowMgmtKey, VrfId};

/// A flow as the flow table hands it over: its identity, the properties the manager looks
/// at and the full set of objects it depends on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowDescriptor {
    pub flow: FlowIndex,
    pub flags: FlowFlags,
    pub src_addr: IpAddr,
    pub dst_addr: IpAddr,
    pub keys: Vec<FlowMgmtKey>,
}

impl FlowDescriptor {
    #[must_use]
    pub fn new(flow: FlowIndex, flags: FlowFlags, src_addr: IpAddr, dst_addr: IpAddr) -> Self {
        Self {
            flow,
            flags,
            src_addr,
            dst_addr,
            keys: vec![],
        }
    }

    #[must_use]
    pub fn with_key(mut self, key: FlowMgmtKey) -> Self {
        self.keys.push(key);
        self
    }

    #[must_use]
    pub fn with_keys(mut self, keys: impl IntoIterator<Item = FlowMgmtKey>) -> Self {
        self.keys.extend(keys);
        self
    }
}

/// Notification from the table owning a dependency object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObjectEvent {
    Added(FlowMgmtKey),
    Changed(FlowMgmtKey),
    /// The next-hop of a route changed.
    RouteNhChanged(FlowMgmtKey),
    Deleted { key: FlowMgmtKey, gen_id: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowMgmtRequest {
    AddFlow(FlowDescriptor),
    /// The flow was re-evaluated and now depends on `flow.keys`. `old_keys` are the keys the
    /// flow table believes it had; the manager's own record of the flow takes precedence.
    MatchChanged {
        flow: FlowDescriptor,
        old_keys: Vec<FlowMgmtKey>,
    },
    DeleteFlow {
        flow: FlowIndex,
        keys: Vec<FlowMgmtKey>,
    },
    Object(ObjectEvent),
    /// A route table of `vrf` started its deletion.
    RouteTableDeleted { vrf: VrfId, table: RouteTable },
    RetryDeleteVrf(VrfId),
    BgpAsAServiceHealthCheck(BgpAsAServiceKey),
    BgpAsAServiceDelete(BgpAsAServiceKey),
    BgpAsAServiceDeleteAll,
}

impl From<ObjectEvent> for FlowMgmtRequest {
    fn from(event: ObjectEvent) -> Self {
        FlowMgmtRequest::Object(event)
    }
}
