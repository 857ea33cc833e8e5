// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Traffic between pairs of virtual networks, accumulated from flow counter deltas.

use std::collections::BTreeMap;

use flow_info::FlowFlags;
use serde::Serialize;

use crate::export_info::FlowExportInfo;

/// Name standing for a virtual network a flow could not be attributed to.
pub const UNKNOWN_VN: &str = "__UNKNOWN__";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct InterVnCounters {
    pub in_bytes: u64,
    pub in_packets: u64,
    pub out_bytes: u64,
    pub out_packets: u64,
}

/// Counters per `(vn, other vn)`. "In" and "out" are seen from the router: traffic from `vn`
/// to `other` entering the router counts as "in" for `vn`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct InterVnStats {
    stats: BTreeMap<(String, String), InterVnCounters>,
}

impl InterVnStats {
    fn add(&mut self, vn: &str, other: &str, bytes: u64, packets: u64, outgoing: bool) {
        let counters = self
            .stats
            .entry((vn.to_string(), other.to_string()))
            .or_default();
        if outgoing {
            counters.out_bytes += bytes;
            counters.out_packets += packets;
        } else {
            counters.in_bytes += bytes;
            counters.in_packets += packets;
        }
    }

    /// Account `bytes` and `packets` more of traffic of the flow `info`.
    pub fn update(&mut self, info: &FlowExportInfo, bytes: u64, packets: u64) {
        let name = |vn: &str| (if vn.is_empty() { UNKNOWN_VN } else { vn }).to_string();
        let src = name(&info.source_vn);
        let dst = name(&info.dest_vn);
        if info.is_set(FlowFlags::LOCAL_FLOW) {
            self.add(&src, &dst, bytes, packets, false);
            self.add(&dst, &src, bytes, packets, true);
        } else if info.is_set(FlowFlags::INGRESS_DIR) {
            self.add(&src, &dst, bytes, packets, false);
        } else {
            self.add(&dst, &src, bytes, packets, true);
        }
    }

    #[must_use]
    pub fn get(&self, vn: &str, other: &str) -> InterVnCounters {
        self.stats
            .get(&(vn.to_string(), other.to_string()))
            .copied()
            .unwrap_or_default()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&(String, String), &InterVnCounters)> {
        self.stats.iter()
    }
}
