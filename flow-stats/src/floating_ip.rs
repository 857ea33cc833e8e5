// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Traffic through floating IPs, per interface owning the floating IP.

use std::collections::BTreeMap;
use std::net::IpAddr;

use flow_info::FlowFlags;
use serde::Serialize;
use uuid::Uuid;

use crate::export_info::FlowExportInfo;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct FloatingIpKey {
    /// Interface the floating IP is attached to.
    pub vmi_uuid: Uuid,
    pub fip: IpAddr,
    pub vn: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FloatingIpCounters {
    pub in_bytes: u64,
    pub in_packets: u64,
    pub out_bytes: u64,
    pub out_packets: u64,
}

impl FloatingIpCounters {
    fn add(&mut self, bytes: u64, packets: u64, incoming: bool) {
        if incoming {
            self.in_bytes += bytes;
            self.in_packets += packets;
        } else {
            self.out_bytes += bytes;
            self.out_packets += packets;
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct FloatingIpStats {
    stats: BTreeMap<FloatingIpKey, FloatingIpCounters>,
}

impl FloatingIpStats {
    /// Account a traffic delta of the flow `info`. Flows not using a floating IP are ignored.
    ///
    /// `rev_fip` is the floating IP of the reverse flow and its interface. Two local VMs
    /// talking through their floating IPs use two of them, and both get the traffic.
    pub fn update(
        &mut self,
        info: &FlowExportInfo,
        rev_fip: Option<(IpAddr, Uuid)>,
        bytes: u64,
        packets: u64,
    ) {
        let Some(fip) = info.fip else {
            return;
        };
        if info.fip_vmi.is_nil() {
            return;
        }
        let key = |fip, vmi_uuid| FloatingIpKey {
            vmi_uuid,
            fip,
            vn: info.source_vn.clone(),
        };

        if info.is_set(FlowFlags::LOCAL_FLOW) {
            let incoming = !info.is_set(FlowFlags::REVERSE_FLOW);
            self.stats
                .entry(key(fip, info.fip_vmi))
                .or_default()
                .add(bytes, packets, incoming);
            if let Some((rev_ip, rev_vmi)) = rev_fip.filter(|(ip, vmi)| *ip != fip && !vmi.is_nil()) {
                self.stats
                    .entry(key(rev_ip, rev_vmi))
                    .or_default()
                    .add(bytes, packets, incoming);
            }
        } else {
            let incoming = info.is_set(FlowFlags::INGRESS_DIR);
            self.stats
                .entry(key(fip, info.fip_vmi))
                .or_default()
                .add(bytes, packets, incoming);
        }
    }

    #[must_use]
    pub fn get(&self, key: &FloatingIpKey) -> FloatingIpCounters {
        self.stats.get(key).copied().unwrap_or_default()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&FloatingIpKey, &FloatingIpCounters)> {
        self.stats.iter()
    }
}
