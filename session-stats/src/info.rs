// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Per-session state.

use flow_info::{
    FlowHandle, KernelFlowSource, KernelFlowStats, RevFlowDepParams, TcpFlags, updated_bytes,
    updated_packets,
};
use uuid::Uuid;

/// Counters of one direction of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionFlowStatsInfo {
    pub flow_uuid: Uuid,
    pub flow_handle: FlowHandle,
    pub bytes: u64,
    pub packets: u64,
    /// Traffic not exported yet.
    pub diff_bytes: u64,
    pub diff_packets: u64,
    pub tcp_flags: TcpFlags,
    pub underlay_source_port: u16,
}

impl SessionFlowStatsInfo {
    #[must_use]
    pub fn new(flow_uuid: Uuid, flow_handle: FlowHandle) -> Self {
        Self {
            flow_uuid,
            flow_handle,
            bytes: 0,
            packets: 0,
            diff_bytes: 0,
            diff_packets: 0,
            tcp_flags: TcpFlags::empty(),
            underlay_source_port: 0,
        }
    }

    /// Fold a kernel reading in.
    pub fn update(&mut self, kernel: &KernelFlowStats) {
        let bytes = updated_bytes(self.bytes, kernel.total_bytes());
        let packets = updated_packets(self.packets, kernel.total_packets());
        self.bytes = bytes.value;
        self.packets = packets.value;
        self.diff_bytes = self.diff_bytes.saturating_add(bytes.diff);
        self.diff_packets = self.diff_packets.saturating_add(packets.diff);
        self.tcp_flags = kernel.tcp_flags;
        self.underlay_source_port = kernel.underlay_sport;
    }

    /// Read the kernel counters of this direction, if any.
    pub fn refresh(&mut self, kernel: &impl KernelFlowSource) {
        if let Some(k) = kernel.kernel_flow(self.flow_handle) {
            self.update(&k);
        }
    }

    #[must_use]
    pub fn has_diff(&self) -> bool {
        self.diff_bytes != 0 || self.diff_packets != 0
    }

    pub fn take_diff(&mut self) -> (u64, u64) {
        (
            std::mem::take(&mut self.diff_bytes),
            std::mem::take(&mut self.diff_packets),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStatsInfo {
    pub setup_time: Option<u64>,
    pub teardown_time: Option<u64>,
    pub fwd: SessionFlowStatsInfo,
    pub rev: SessionFlowStatsInfo,
    pub sg_rule_uuid: String,
    pub vm_cfg_name: String,
    /// Reverse flow data handed over on delete.
    pub rev_params: Option<RevFlowDepParams>,
    pub exported: bool,
}

impl SessionStatsInfo {
    #[must_use]
    pub fn new(fwd: SessionFlowStatsInfo, rev: SessionFlowStatsInfo) -> Self {
        Self {
            setup_time: None,
            teardown_time: None,
            fwd,
            rev,
            sg_rule_uuid: String::new(),
            vm_cfg_name: String::new(),
            rev_params: None,
            exported: false,
        }
    }

    #[must_use]
    pub fn is_deleted(&self) -> bool {
        self.teardown_time.is_some()
    }

    /// Uuid of the reverse flow, preferring what was handed over on delete.
    #[must_use]
    pub fn reverse_uuid(&self) -> Uuid {
        match &self.rev_params {
            Some(params) if params.has_reverse() => params.rev_uuid,
            _ => self.rev.flow_uuid,
        }
    }

    /// Something to export: the session is new, saw traffic or is gone.
    #[must_use]
    pub fn needs_export(&self) -> bool {
        !self.exported || self.is_deleted() || self.fwd.has_diff() || self.rev.has_diff()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn directions_update_independently() {
        let mut info = SessionStatsInfo::new(
            SessionFlowStatsInfo::new(Uuid::from_u128(1), FlowHandle(1)),
            SessionFlowStatsInfo::new(Uuid::from_u128(2), FlowHandle(2)),
        );
        let mut kernel = HashMap::new();
        kernel.insert(
            FlowHandle(1),
            KernelFlowStats {
                bytes: 100,
                packets: 2,
                ..Default::default()
            },
        );
        info.fwd.refresh(&kernel);
        info.rev.refresh(&kernel);
        assert_eq!((info.fwd.bytes, info.fwd.diff_bytes), (100, 100));
        assert!(!info.rev.has_diff());

        kernel.insert(
            FlowHandle(1),
            KernelFlowStats {
                bytes: 150,
                packets: 3,
                ..Default::default()
            },
        );
        info.fwd.refresh(&kernel);
        assert_eq!(info.fwd.take_diff(), (150, 3));
        assert!(!info.fwd.has_diff());
        assert_eq!(info.fwd.bytes, 150);
    }

    #[test]
    fn handed_over_reverse_wins() {
        let mut info = SessionStatsInfo::new(
            SessionFlowStatsInfo::new(Uuid::from_u128(1), FlowHandle::INVALID),
            SessionFlowStatsInfo::new(Uuid::nil(), FlowHandle::INVALID),
        );
        assert!(info.reverse_uuid().is_nil());
        info.rev_params = Some(RevFlowDepParams {
            rev_uuid: Uuid::from_u128(9),
            ..Default::default()
        });
        assert_eq!(info.reverse_uuid(), Uuid::from_u128(9));
        info.rev_params = Some(RevFlowDepParams::none());
        assert!(info.reverse_uuid().is_nil());
    }
}
