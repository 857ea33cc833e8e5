// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Events the manager sends back to the flow table and to the object tables.

use flow_info::FlowIndex;
use serde::Serialize;
use uuid::Uuid;

use crate::key::FlowMgmtKey;

/// What the flow table must do with a flow whose dependency changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum FlowTableAction {
    /// Re-evaluate policy for the flow; its forwarding is unchanged.
    Revaluate,
    /// Recompute forwarding for the flow.
    Recompute,
    /// Tear the flow down.
    Delete,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum FlowTableEvent {
    /// Act on `flow` because of a change of the object `key`.
    Flow {
        action: FlowTableAction,
        flow: FlowIndex,
        key: FlowMgmtKey,
    },
    /// No flow depends on the deleted object `key` anymore; its owner may free it.
    FreeNotify { key: FlowMgmtKey, gen_id: u32 },
    /// A BGP-as-a-service session went away for good.
    BgpAsAServiceNotify { vmi: Uuid, sport: u16 },
}

impl FlowTableEvent {
    #[must_use]
    pub fn flow(action: FlowTableAction, flow: FlowIndex, key: &FlowMgmtKey) -> Self {
        FlowTableEvent::Flow {
            action,
            flow,
            key: key.clone(),
        }
    }
}
