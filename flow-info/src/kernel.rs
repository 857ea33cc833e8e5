// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Read-only view of the kernel flow table counters.

use std::collections::HashMap;
use std::hash::BuildHasher;

use crate::counters::combine_counter;
use crate::flags::TcpFlags;
use crate::flow_info::FlowHandle;

/// Counters of one kernel flow entry, in the kernel's narrow wrapping format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KernelFlowStats {
    pub bytes: u32,
    pub bytes_oflow: u16,
    pub packets: u32,
    pub packets_oflow: u8,
    pub tcp_flags: TcpFlags,
    pub underlay_sport: u16,
}

impl KernelFlowStats {
    #[must_use]
    pub fn total_bytes(&self) -> u64 {
        combine_counter(u64::from(self.bytes_oflow), self.bytes)
    }

    #[must_use]
    pub fn total_packets(&self) -> u64 {
        combine_counter(u64::from(self.packets_oflow), self.packets)
    }
}

/// Source of kernel counters, keyed by flow handle.
///
/// `None` means the flow is not programmed in the kernel yet. Reads have no side effects.
pub trait KernelFlowSource {
    fn kernel_flow(&self, handle: FlowHandle) -> Option<KernelFlowStats>;
}

impl<S: BuildHasher> KernelFlowSource for HashMap<FlowHandle, KernelFlowStats, S> {
    fn kernel_flow(&self, handle: FlowHandle) -> Option<KernelFlowStats> {
        if !handle.is_valid() {
            return None;
        }
        self.get(&handle).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn totals_combine_overflow() {
        let stats = KernelFlowStats {
            bytes: 10,
            bytes_oflow: 2,
            packets: 4,
            packets_oflow: 1,
            ..Default::default()
        };
        assert_eq!(stats.total_bytes(), 0x0000_0002_0000_000A);
        assert_eq!(stats.total_packets(), 0x0000_0001_0000_0004);
    }

    #[test]
    fn map_source_ignores_invalid_handle() {
        let mut table = HashMap::new();
        table.insert(FlowHandle(1), KernelFlowStats::default());
        table.insert(FlowHandle::INVALID, KernelFlowStats::default());
        assert!(table.kernel_flow(FlowHandle(1)).is_some());
        assert!(table.kernel_flow(FlowHandle(2)).is_none());
        assert!(table.kernel_flow(FlowHandle::INVALID).is_none());
    }
}
