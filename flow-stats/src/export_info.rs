// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! What the aging collector keeps about each flow.

use std::fmt::Display;
use std::net::IpAddr;

use flow_info::{FlowAction, FlowFlags, FlowHandle, FlowKey, TcpFlags};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Encapsulation towards the peer router.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TunnelType {
    MplsGre,
    #[default]
    MplsUdp,
    Vxlan,
}

impl Display for TunnelType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TunnelType::MplsGre => write!(f, "MPLSoGRE"),
            TunnelType::MplsUdp => write!(f, "MPLSoUDP"),
            TunnelType::Vxlan => write!(f, "VxLAN"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowExportInfo {
    pub flow_uuid: Uuid,
    /// Identifies the egress half of a local flow in exports.
    pub egress_uuid: Uuid,
    pub rev_flow_key: Option<FlowKey>,
    pub flags: FlowFlags,
    pub action: FlowAction,
    pub source_vn: String,
    pub dest_vn: String,
    pub sg_rule_uuid: String,
    pub nw_ace_uuid: String,
    pub vm_cfg_name: String,
    pub interface_uuid: Option<Uuid>,
    pub peer_vrouter: Option<IpAddr>,
    /// Floating IP used by the flow, and the interface owning it.
    pub fip: Option<IpAddr>,
    pub fip_vmi: Uuid,
    pub tunnel_type: TunnelType,
    pub drop_reason: String,
    pub flow_handle: FlowHandle,

    /// Microseconds since the epoch.
    pub setup_time: u64,
    pub teardown_time: Option<u64>,
    pub last_modified_time: u64,
    pub bytes: u64,
    pub packets: u64,
    pub tcp_flags: TcpFlags,
    pub underlay_source_port: u16,
    pub underlay_sport_exported: bool,
    pub exported: bool,
}

impl FlowExportInfo {
    #[must_use]
    pub fn new(flow_uuid: Uuid, setup_time: u64) -> Self {
        Self {
            flow_uuid,
            egress_uuid: Uuid::nil(),
            rev_flow_key: None,
            flags: FlowFlags::empty(),
            action: FlowAction::default(),
            source_vn: String::new(),
            dest_vn: String::new(),
            sg_rule_uuid: String::new(),
            nw_ace_uuid: String::new(),
            vm_cfg_name: String::new(),
            interface_uuid: None,
            peer_vrouter: None,
            fip: None,
            fip_vmi: Uuid::nil(),
            tunnel_type: TunnelType::default(),
            drop_reason: String::new(),
            flow_handle: FlowHandle::INVALID,
            setup_time,
            teardown_time: None,
            last_modified_time: setup_time,
            bytes: 0,
            packets: 0,
            tcp_flags: TcpFlags::empty(),
            underlay_source_port: 0,
            underlay_sport_exported: false,
            exported: false,
        }
    }

    #[must_use]
    pub fn with_flags(mut self, flags: FlowFlags) -> Self {
        self.flags = flags;
        self
    }

    #[must_use]
    pub fn with_reverse(mut self, rev_flow_key: FlowKey) -> Self {
        self.rev_flow_key = Some(rev_flow_key);
        self
    }

    #[must_use]
    pub fn with_handle(mut self, handle: FlowHandle) -> Self {
        self.flow_handle = handle;
        self
    }

    #[must_use]
    pub fn with_vns(mut self, source_vn: &str, dest_vn: &str) -> Self {
        self.source_vn = source_vn.to_string();
        self.dest_vn = dest_vn.to_string();
        self
    }

    #[must_use]
    pub fn with_fip(mut self, fip: IpAddr, vmi: Uuid) -> Self {
        self.fip = Some(fip);
        self.fip_vmi = vmi;
        self
    }

    #[must_use]
    pub fn is_set(&self, flags: FlowFlags) -> bool {
        self.flags.contains(flags)
    }

    #[must_use]
    pub fn is_action_log(&self) -> bool {
        self.is_set(FlowFlags::ACTION_LOG)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_flow_is_fresh() {
        let info = FlowExportInfo::new(Uuid::from_u128(1), 42)
            .with_flags(FlowFlags::INGRESS_DIR | FlowFlags::ACTION_LOG);
        assert_eq!(info.last_modified_time, 42);
        assert!(!info.exported);
        assert!(!info.flow_handle.is_valid());
        assert!(info.is_action_log());
        assert!(!info.is_set(FlowFlags::LOCAL_FLOW));
    }
}
