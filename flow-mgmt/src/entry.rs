// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Per-object dependency records.

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use flow_info::FlowIndex;
use serde::Serialize;

use crate::key::AceId;

/// What the manager has heard from the table owning an object.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum OperState {
    /// Referenced by flows only; no add or delete seen yet.
    #[default]
    NotSeen,
    AddSeen,
    DelSeen,
}

/// The set of flows depending on one object, plus per-kind data `D`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FlowMgmtEntry<D> {
    flows: BTreeSet<FlowIndex>,
    oper_state: OperState,
    gen_id: u32,
    pub data: D,
}

impl<D> FlowMgmtEntry<D> {
    /// Returns true if the flow was not there yet.
    pub fn add(&mut self, flow: FlowIndex) -> bool {
        self.flows.insert(flow)
    }

    /// Returns true if the flow was there.
    pub fn delete(&mut self, flow: FlowIndex) -> bool {
        self.flows.remove(&flow)
    }

    #[must_use]
    pub fn flows(&self) -> &BTreeSet<FlowIndex> {
        &self.flows
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.flows.len()
    }

    #[must_use]
    pub fn oper_state(&self) -> OperState {
        self.oper_state
    }

    #[must_use]
    pub fn gen_id(&self) -> u32 {
        self.gen_id
    }

    pub(crate) fn set_add_seen(&mut self) {
        self.oper_state = OperState::AddSeen;
    }

    pub(crate) fn set_del_seen(&mut self, gen_id: u32) {
        self.oper_state = OperState::DelSeen;
        self.gen_id = gen_id;
    }

    /// An entry can go once no flow needs it and its object is not known to be alive.
    #[must_use]
    pub fn can_delete(&self) -> bool {
        self.flows.is_empty() && self.oper_state != OperState::AddSeen
    }
}

/// Entries with nothing beyond the flow set.
pub type PlainEntry = FlowMgmtEntry<()>;

/// ACE hit counts of one ACL.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AclData {
    ace_hit_count: BTreeMap<AceId, u64>,
}

impl AclData {
    pub(crate) fn hit(&mut self, ace_ids: &[AceId]) {
        for id in ace_ids {
            *self.ace_hit_count.entry(*id).or_default() += 1;
        }
    }

    pub(crate) fn unhit(&mut self, ace_ids: &[AceId]) {
        for id in ace_ids {
            if let Some(count) = self.ace_hit_count.get_mut(id) {
                *count = count.saturating_sub(1);
                if *count == 0 {
                    self.ace_hit_count.remove(id);
                }
            }
        }
    }

    #[must_use]
    pub fn ace_hit_count(&self, ace: AceId) -> u64 {
        self.ace_hit_count.get(&ace).copied().unwrap_or(0)
    }
}

/// Flow counts of a virtual network by direction. Local flows count in both.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct VnData {
    pub ingress_flow_count: u32,
    pub egress_flow_count: u32,
}

impl VnData {
    pub(crate) fn count_new_flow(&mut self, local: bool, ingress: bool) {
        if local {
            self.ingress_flow_count += 1;
            self.egress_flow_count += 1;
        } else if ingress {
            self.ingress_flow_count += 1;
        } else {
            self.egress_flow_count += 1;
        }
    }

    /// A known flow may change direction; local flows count on both sides already.
    pub(crate) fn recount_flow(&mut self, old_local: bool, old_ingress: bool, ingress: bool) {
        if old_local || old_ingress == ingress {
            return;
        }
        if ingress {
            self.ingress_flow_count += 1;
            self.egress_flow_count = self.egress_flow_count.saturating_sub(1);
        } else {
            self.ingress_flow_count = self.ingress_flow_count.saturating_sub(1);
            self.egress_flow_count += 1;
        }
    }

    pub(crate) fn uncount_flow(&mut self, old_local: bool, old_ingress: bool) {
        if old_local {
            self.ingress_flow_count = self.ingress_flow_count.saturating_sub(1);
            self.egress_flow_count = self.egress_flow_count.saturating_sub(1);
        } else if old_ingress {
            self.ingress_flow_count = self.ingress_flow_count.saturating_sub(1);
        } else {
            self.egress_flow_count = self.egress_flow_count.saturating_sub(1);
        }
    }
}

/// Lifetime counters of an interface; never decremented.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct InterfaceData {
    pub flow_created: u64,
    pub flow_aged: u64,
}

/// Route table of a VRF as tracked for the VRF's own reclamation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum RouteTable {
    Inet4,
    Inet6,
    Bridge,
}

/// Deletion state of the three route tables of a VRF.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct VrfData {
    pub inet4_deleted: bool,
    pub inet6_deleted: bool,
    pub bridge_deleted: bool,
}

impl VrfData {
    pub(crate) fn set_deleted(&mut self, table: RouteTable) {
        match table {
            RouteTable::Inet4 => self.inet4_deleted = true,
            RouteTable::Inet6 => self.inet6_deleted = true,
            RouteTable::Bridge => self.bridge_deleted = true,
        }
    }

    #[must_use]
    pub fn all_deleted(&self) -> bool {
        self.inet4_deleted && self.inet6_deleted && self.bridge_deleted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn can_delete_rules() {
        let mut entry = PlainEntry::default();
        assert!(entry.can_delete());
        entry.add(FlowIndex(1));
        assert!(!entry.can_delete());
        entry.delete(FlowIndex(1));
        entry.set_add_seen();
        assert!(!entry.can_delete());
        entry.set_del_seen(3);
        assert!(entry.can_delete());
        assert_eq!(entry.gen_id(), 3);
    }

    #[test]
    fn vn_direction_flip() {
        let mut vn = VnData::default();
        vn.count_new_flow(false, true);
        assert_eq!((vn.ingress_flow_count, vn.egress_flow_count), (1, 0));
        vn.recount_flow(false, true, false);
        assert_eq!((vn.ingress_flow_count, vn.egress_flow_count), (0, 1));
        vn.uncount_flow(false, false);
        assert_eq!(vn, VnData::default());

        vn.count_new_flow(true, false);
        vn.recount_flow(true, false, true);
        assert_eq!((vn.ingress_flow_count, vn.egress_flow_count), (1, 1));
    }

    #[test]
    fn ace_hits() {
        let mut acl = AclData::default();
        acl.hit(&[5, 6]);
        acl.hit(&[5]);
        assert_eq!(acl.ace_hit_count(5), 2);
        acl.unhit(&[5, 6, 7]);
        assert_eq!(acl.ace_hit_count(5), 1);
        assert_eq!(acl.ace_hit_count(6), 0);
        assert_eq!(acl.ace_hit_count(7), 0);
    }
}
