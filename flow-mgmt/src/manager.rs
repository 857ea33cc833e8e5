// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The flow management manager: keeps, for every flow, the objects it depends on and, for
//! every object, the flows depending on it.

use std::collections::{BTreeMap, BTreeSet};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use flow_info::{FlowFlags, FlowIndex};
use ipnet::{IpNet, Ipv4Net, Ipv6Net};
use serde::Serialize;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::entry::{AclData, FlowMgmtEntry, InterfaceData, OperState, VnData, VrfData};
use crate::event::{FlowTableAction, FlowTableEvent};
use crate::key::{AceId, FlowMgmtKey, FlowMgmtKeyKind, InetRouteKey, Mac, VrfId};
use crate::lpm::RouteLpm;
use crate::request::{FlowDescriptor, FlowMgmtRequest, ObjectEvent};
use crate::tree::{FlowMgmtTree, OperDelete, Reclaim};

/// What the manager remembers of a flow.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlowEntryInfo {
    pub keys: BTreeSet<FlowMgmtKey>,
    /// Adds and changes seen for the flow.
    pub count: u64,
    pub local_flow: bool,
    pub ingress: bool,
    pub l3_flow: bool,
    pub src_addr: Option<IpAddr>,
    pub dst_addr: Option<IpAddr>,
}

impl FlowEntryInfo {
    fn has_acl(&self) -> bool {
        self.keys.iter().any(|k| k.kind() == FlowMgmtKeyKind::Acl)
    }
}

/// Read-only view of one entry, for introspection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntrySummary {
    pub key: FlowMgmtKey,
    pub flows: Vec<FlowIndex>,
    pub oper_state: OperState,
    pub gen_id: u32,
}

impl EntrySummary {
    fn new<D>(key: &FlowMgmtKey, entry: &FlowMgmtEntry<D>) -> Self {
        Self {
            key: key.clone(),
            flows: entry.flows().iter().copied().collect(),
            oper_state: entry.oper_state(),
            gen_id: entry.gen_id(),
        }
    }
}

/// Flow-table action for the flows of an object that was added or changed.
fn add_action(kind: FlowMgmtKeyKind) -> Option<FlowTableAction> {
    match kind {
        FlowMgmtKeyKind::Interface
        | FlowMgmtKeyKind::Acl
        | FlowMgmtKeyKind::Vn
        | FlowMgmtKeyKind::NextHop
        | FlowMgmtKeyKind::Inet4
        | FlowMgmtKeyKind::Inet6
        | FlowMgmtKeyKind::Bridge
        | FlowMgmtKeyKind::BgpAsAService => Some(FlowTableAction::Revaluate),
        FlowMgmtKeyKind::AceId | FlowMgmtKeyKind::Vm | FlowMgmtKeyKind::Vrf => None,
    }
}

/// Flow-table action for the flows of a deleted object.
///
/// Flows losing a route fall back to a less specific one; flows losing anything else go.
fn delete_action(kind: FlowMgmtKeyKind) -> Option<FlowTableAction> {
    match kind {
        FlowMgmtKeyKind::Inet4 | FlowMgmtKeyKind::Inet6 => Some(FlowTableAction::Recompute),
        FlowMgmtKeyKind::Interface
        | FlowMgmtKeyKind::Acl
        | FlowMgmtKeyKind::Vn
        | FlowMgmtKeyKind::NextHop
        | FlowMgmtKeyKind::Bridge
        | FlowMgmtKeyKind::BgpAsAService => Some(FlowTableAction::Delete),
        FlowMgmtKeyKind::AceId | FlowMgmtKeyKind::Vm | FlowMgmtKeyKind::Vrf => None,
    }
}

/// Bind `$tree` to the tree of `$kind` and evaluate `$body` with it.
macro_rules! with_tree {
    ($mgr:expr, $kind:expr, $tree:ident => $body:expr) => {
        match $kind {
            FlowMgmtKeyKind::Interface => {
                let $tree = &mut $mgr.interface;
                $body
            }
            FlowMgmtKeyKind::Acl => {
                let $tree = &mut $mgr.acl;
                $body
            }
            FlowMgmtKeyKind::AceId => {
                let $tree = &mut $mgr.ace_id;
                $body
            }
            FlowMgmtKeyKind::Vn => {
                let $tree = &mut $mgr.vn;
                $body
            }
            FlowMgmtKeyKind::Vm => {
                let $tree = &mut $mgr.vm;
                $body
            }
            FlowMgmtKeyKind::Inet4 => {
                let $tree = &mut $mgr.inet4;
                $body
            }
            FlowMgmtKeyKind::Inet6 => {
                let $tree = &mut $mgr.inet6;
                $body
            }
            FlowMgmtKeyKind::Bridge => {
                let $tree = &mut $mgr.bridge;
                $body
            }
            FlowMgmtKeyKind::NextHop => {
                let $tree = &mut $mgr.nh;
                $body
            }
            FlowMgmtKeyKind::Vrf => {
                let $tree = &mut $mgr.vrf;
                $body
            }
            FlowMgmtKeyKind::BgpAsAService => {
                let $tree = &mut $mgr.bgp_as_a_service;
                $body
            }
        }
    };
}

#[derive(Debug)]
pub struct FlowMgmtManager {
    interface: FlowMgmtTree<InterfaceData>,
    acl: FlowMgmtTree<AclData>,
    ace_id: FlowMgmtTree<()>,
    vn: FlowMgmtTree<VnData>,
    vm: FlowMgmtTree<()>,
    inet4: FlowMgmtTree<()>,
    inet6: FlowMgmtTree<()>,
    bridge: FlowMgmtTree<()>,
    nh: FlowMgmtTree<()>,
    vrf: FlowMgmtTree<VrfData>,
    bgp_as_a_service: FlowMgmtTree<()>,
    /// Routes known to exist, for covering route lookups.
    route_lpm: RouteLpm,
    /// Flow references to route keys, per VRF.
    vrf_flow_count: BTreeMap<VrfId, u32>,
    /// Tracked flows with no ACL dependency.
    acl_flow_miss: u64,
    flows: BTreeMap<FlowIndex, FlowEntryInfo>,
    events: Vec<FlowTableEvent>,
}

impl Default for FlowMgmtManager {
    fn default() -> Self {
        Self::new()
    }
}

impl FlowMgmtManager {
    #[must_use]
    pub fn new() -> Self {
        Self {
            interface: FlowMgmtTree::new(FlowMgmtKeyKind::Interface),
            acl: FlowMgmtTree::new(FlowMgmtKeyKind::Acl),
            ace_id: FlowMgmtTree::new(FlowMgmtKeyKind::AceId),
            vn: FlowMgmtTree::new(FlowMgmtKeyKind::Vn),
            vm: FlowMgmtTree::new(FlowMgmtKeyKind::Vm),
            inet4: FlowMgmtTree::new(FlowMgmtKeyKind::Inet4),
            inet6: FlowMgmtTree::new(FlowMgmtKeyKind::Inet6),
            bridge: FlowMgmtTree::new(FlowMgmtKeyKind::Bridge),
            nh: FlowMgmtTree::new(FlowMgmtKeyKind::NextHop),
            vrf: FlowMgmtTree::new(FlowMgmtKeyKind::Vrf),
            bgp_as_a_service: FlowMgmtTree::new(FlowMgmtKeyKind::BgpAsAService),
            route_lpm: RouteLpm::default(),
            vrf_flow_count: BTreeMap::new(),
            acl_flow_miss: 0,
            flows: BTreeMap::new(),
            events: Vec::new(),
        }
    }

    /// Apply one request. Follow-up events accumulate until [`Self::take_events`].
    pub fn process(&mut self, request: FlowMgmtRequest) {
        match request {
            FlowMgmtRequest::AddFlow(flow) => self.add_flow(&flow),
            FlowMgmtRequest::MatchChanged { flow, old_keys } => {
                if let Some(info) = self.flows.get(&flow.flow) {
                    let reported: BTreeSet<_> = old_keys.into_iter().collect();
                    if reported != info.keys {
                        debug!("{}: reported old keys differ from the recorded ones", flow.flow);
                    }
                }
                self.add_flow(&flow);
            }
            FlowMgmtRequest::DeleteFlow { flow, keys } => self.delete_flow(flow, &keys),
            FlowMgmtRequest::Object(event) => self.object_event(event),
            FlowMgmtRequest::RouteTableDeleted { vrf, table } => {
                match self.vrf.find_mut(&FlowMgmtKey::Vrf(vrf)) {
                    Some(entry) => entry.data.set_deleted(table),
                    None => debug!("route table {table:?} of unknown vrf {vrf} deleted"),
                }
                self.retry_vrf_delete(vrf);
            }
            FlowMgmtRequest::RetryDeleteVrf(vrf) => self.retry_vrf_delete(vrf),
            FlowMgmtRequest::BgpAsAServiceHealthCheck(key) => {
                let key = FlowMgmtKey::BgpAsAService(key);
                if let Some(entry) = self.bgp_as_a_service.find(&key) {
                    let flows: Vec<_> = entry.flows().iter().copied().collect();
                    self.emit(FlowTableAction::Revaluate, &flows, &key);
                }
            }
            FlowMgmtRequest::BgpAsAServiceDelete(key) => {
                let key = FlowMgmtKey::BgpAsAService(key);
                if let Some(entry) = self.bgp_as_a_service.find(&key) {
                    let flows: Vec<_> = entry.flows().iter().copied().collect();
                    self.emit(FlowTableAction::Delete, &flows, &key);
                    let reclaim = self.bgp_as_a_service.try_delete(&key, |_| true);
                    self.reclaimed(&key, reclaim);
                }
            }
            FlowMgmtRequest::BgpAsAServiceDeleteAll => {
                let notify: Vec<_> = self
                    .bgp_as_a_service
                    .iter()
                    .filter_map(|(key, _)| match key {
                        FlowMgmtKey::BgpAsAService(b) => Some(FlowTableEvent::BgpAsAServiceNotify {
                            vmi: b.vmi,
                            sport: b.sport,
                        }),
                        _ => None,
                    })
                    .collect();
                self.events.extend(notify);
            }
        }
    }

    /// Drain the events produced so far.
    pub fn take_events(&mut self) -> Vec<FlowTableEvent> {
        std::mem::take(&mut self.events)
    }

    fn emit(&mut self, action: FlowTableAction, flows: &[FlowIndex], key: &FlowMgmtKey) {
        for flow in flows {
            trace!("{action:?} {flow} on {key}");
            self.events.push(FlowTableEvent::flow(action, *flow, key));
        }
    }

    /// Bookkeeping after an entry was possibly removed from its tree.
    fn reclaimed(&mut self, key: &FlowMgmtKey, reclaim: Reclaim) {
        if let Reclaim::Removed {
            notify: Some(gen_id),
        } = reclaim
        {
            if key.kind().free_notifies() {
                debug!("free notify {key} generation {gen_id}");
                self.events.push(FlowTableEvent::FreeNotify {
                    key: key.clone(),
                    gen_id,
                });
            }
        }
    }

    fn free_notify_missing(&mut self, key: &FlowMgmtKey, gen_id: u32) {
        if key.kind().free_notifies() {
            self.events.push(FlowTableEvent::FreeNotify {
                key: key.clone(),
                gen_id,
            });
        }
    }

    // ---- flow side --------------------------------------------------------------------

    fn add_flow(&mut self, flow: &FlowDescriptor) {
        let mut info = self.flows.remove(&flow.flow).unwrap_or_default();
        let known = info.count > 0;
        if known && !info.has_acl() {
            self.acl_flow_miss = self.acl_flow_miss.saturating_sub(1);
        }
        info.count += 1;

        let new_keys: BTreeSet<FlowMgmtKey> = flow.keys.iter().cloned().collect();
        let old_keys = std::mem::take(&mut info.keys);

        // add before delete: a key moving within a VRF must not let the VRF go in between
        for key in &new_keys {
            self.add_key(flow, &info, key, old_keys.get(key));
        }
        for key in old_keys.difference(&new_keys) {
            self.delete_key(flow.flow, &info, key, false);
        }

        info.keys = new_keys;
        info.local_flow = flow.flags.contains(FlowFlags::LOCAL_FLOW);
        info.ingress = flow.flags.contains(FlowFlags::INGRESS_DIR);
        info.l3_flow = flow.flags.contains(FlowFlags::L3_FLOW);
        info.src_addr = Some(flow.src_addr);
        info.dst_addr = Some(flow.dst_addr);
        if !info.has_acl() {
            self.acl_flow_miss += 1;
        }
        debug!("{} tracked with {} keys", flow.flow, info.keys.len());
        self.flows.insert(flow.flow, info);
    }

    fn delete_flow(&mut self, flow: FlowIndex, reported: &[FlowMgmtKey]) {
        let Some(info) = self.flows.remove(&flow) else {
            debug!("delete of untracked {flow} with {} keys ignored", reported.len());
            return;
        };
        for key in &info.keys {
            self.delete_key(flow, &info, key, true);
        }
        if !info.has_acl() {
            self.acl_flow_miss = self.acl_flow_miss.saturating_sub(1);
        }
        debug!("{flow} no longer tracked");
    }

    /// Make `flow` depend on `key`. `old` holds the flow's state before this update and
    /// `old_key` the key as the flow held it before, if it did.
    fn add_key(
        &mut self,
        flow: &FlowDescriptor,
        old: &FlowEntryInfo,
        key: &FlowMgmtKey,
        old_key: Option<&FlowMgmtKey>,
    ) {
        let index = flow.flow;
        match key {
            FlowMgmtKey::Interface(_) => {
                let entry = self.interface.locate(key);
                if entry.add(index) {
                    entry.data.flow_created += 1;
                }
            }
            FlowMgmtKey::Acl(acl) => {
                let entry = self.acl.locate(key);
                entry.add(index);
                if let Some(FlowMgmtKey::Acl(old_acl)) = old_key {
                    entry.data.unhit(&old_acl.ace_ids);
                }
                entry.data.hit(&acl.ace_ids);
            }
            FlowMgmtKey::Vn(_) => {
                let entry = self.vn.locate(key);
                if entry.add(index) {
                    entry.data.count_new_flow(
                        flow.flags.contains(FlowFlags::LOCAL_FLOW),
                        flow.flags.contains(FlowFlags::INGRESS_DIR),
                    );
                } else {
                    entry.data.recount_flow(
                        old.local_flow,
                        old.ingress,
                        flow.flags.contains(FlowFlags::INGRESS_DIR),
                    );
                }
            }
            FlowMgmtKey::Inet4(_) | FlowMgmtKey::Inet6(_) | FlowMgmtKey::Bridge(_) => {
                let added = with_tree!(self, key.kind(), tree => tree.add(key, index));
                if let (true, Some(vrf)) = (added, key.route_vrf()) {
                    *self.vrf_flow_count.entry(vrf).or_default() += 1;
                }
            }
            FlowMgmtKey::AceId(_)
            | FlowMgmtKey::Vm(_)
            | FlowMgmtKey::NextHop(_)
            | FlowMgmtKey::Vrf(_)
            | FlowMgmtKey::BgpAsAService(_) => {
                with_tree!(self, key.kind(), tree => tree.add(key, index));
            }
        }
    }

    /// Drop the dependency of `flow` on `key`. `aged` is set when the flow itself goes.
    fn delete_key(&mut self, flow: FlowIndex, old: &FlowEntryInfo, key: &FlowMgmtKey, aged: bool) {
        let reclaim = match key {
            FlowMgmtKey::Interface(_) => {
                if let Some(entry) = self.interface.find_mut(key) {
                    if entry.delete(flow) && aged {
                        entry.data.flow_aged += 1;
                    }
                }
                self.interface.try_delete(key, |_| true)
            }
            FlowMgmtKey::Acl(acl) => {
                if let Some(entry) = self.acl.find_mut(key) {
                    if entry.delete(flow) {
                        entry.data.unhit(&acl.ace_ids);
                    }
                }
                self.acl.try_delete(key, |_| true)
            }
            FlowMgmtKey::Vn(_) => {
                if let Some(entry) = self.vn.find_mut(key) {
                    if entry.delete(flow) {
                        entry.data.uncount_flow(old.local_flow, old.ingress);
                    }
                }
                self.vn.try_delete(key, |_| true)
            }
            FlowMgmtKey::Inet4(_) | FlowMgmtKey::Inet6(_) | FlowMgmtKey::Bridge(_) => {
                let (removed, reclaim) =
                    with_tree!(self, key.kind(), tree => tree.delete(key, flow, |_| true));
                if let (true, Some(vrf)) = (removed, key.route_vrf()) {
                    self.release_vrf_reference(vrf);
                }
                reclaim
            }
            FlowMgmtKey::Vrf(vrf) => {
                let vrf = *vrf;
                let count = self.vrf_flow_count.get(&vrf).copied().unwrap_or(0);
                self.vrf
                    .delete(key, flow, |e| e.data.all_deleted() && count == 0)
                    .1
            }
            FlowMgmtKey::AceId(_)
            | FlowMgmtKey::Vm(_)
            | FlowMgmtKey::NextHop(_)
            | FlowMgmtKey::BgpAsAService(_) => {
                with_tree!(self, key.kind(), tree => tree.delete(key, flow, |_| true)).1
            }
        };
        self.reclaimed(key, reclaim);
    }

    fn release_vrf_reference(&mut self, vrf: VrfId) {
        let Some(count) = self.vrf_flow_count.get_mut(&vrf) else {
            warn!("vrf {vrf} flow count underflow");
            return;
        };
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.vrf_flow_count.remove(&vrf);
            self.retry_vrf_delete(vrf);
        }
    }

    // ---- object side ------------------------------------------------------------------

    fn object_event(&mut self, event: ObjectEvent) {
        match event {
            ObjectEvent::Added(key) => self.object_added(&key),
            ObjectEvent::Changed(key) => {
                let flows = with_tree!(self, key.kind(), tree => tree.oper_entry_change(&key));
                if let (Some(flows), Some(action)) = (flows, add_action(key.kind())) {
                    self.emit(action, &flows, &key);
                }
            }
            ObjectEvent::RouteNhChanged(key) => self.route_nh_changed(&key),
            ObjectEvent::Deleted { key, gen_id } => self.object_deleted(&key, gen_id),
        }
    }

    fn object_added(&mut self, key: &FlowMgmtKey) {
        let flows = with_tree!(self, key.kind(), tree => tree.oper_entry_add(key));
        if let Some(action) = add_action(key.kind()) {
            self.emit(action, &flows, key);
        }
        if let Some(route) = key.inet_route() {
            self.route_lpm.insert(route);
            if let Some(covering) = self.route_lpm.covering(route) {
                self.recompute_covering_route(&covering, route);
            }
        }
    }

    /// `route` was added under `covering`: flows that used the covering route towards
    /// addresses inside `route` now have a better match.
    fn recompute_covering_route(&mut self, covering: &InetRouteKey, route: &InetRouteKey) {
        let covering_key = match covering.prefix {
            IpNet::V4(_) => FlowMgmtKey::Inet4(*covering),
            IpNet::V6(_) => FlowMgmtKey::Inet6(*covering),
        };
        let tree = match covering.prefix {
            IpNet::V4(_) => &self.inet4,
            IpNet::V6(_) => &self.inet6,
        };
        let Some(entry) = tree.find(&covering_key) else {
            return;
        };
        let affected: Vec<FlowIndex> = entry
            .flows()
            .iter()
            .filter(|flow| {
                self.flows.get(*flow).is_some_and(|info| {
                    [info.src_addr, info.dst_addr]
                        .iter()
                        .flatten()
                        .any(|addr| route.contains(addr))
                })
            })
            .copied()
            .collect();
        debug!(
            "route vrf {} {} added under {}: {} flows to recompute",
            route.vrf,
            route.prefix,
            covering.prefix,
            affected.len()
        );
        self.emit(FlowTableAction::Recompute, &affected, &covering_key);
    }

    /// The next-hop of a route changed: L3 flows are recomputed, L2 flows deleted.
    fn route_nh_changed(&mut self, key: &FlowMgmtKey) {
        let tree = match key.kind() {
            FlowMgmtKeyKind::Inet4 => &self.inet4,
            FlowMgmtKeyKind::Inet6 => &self.inet6,
            other => {
                warn!("next-hop change on a {other} key {key} ignored");
                return;
            }
        };
        let Some(entry) = tree.find(key) else {
            return;
        };
        let events: Vec<_> = entry
            .flows()
            .iter()
            .map(|flow| {
                let l3 = self.flows.get(flow).is_some_and(|info| info.l3_flow);
                let action = if l3 {
                    FlowTableAction::Recompute
                } else {
                    FlowTableAction::Delete
                };
                FlowTableEvent::flow(action, *flow, key)
            })
            .collect();
        self.events.extend(events);
    }

    fn object_deleted(&mut self, key: &FlowMgmtKey, gen_id: u32) {
        if let FlowMgmtKey::Vrf(vrf) = key {
            let vrf = *vrf;
            self.delete_default_route(vrf);
            match self.vrf.oper_entry_delete(key, gen_id) {
                OperDelete::Missing => self.free_notify_missing(key, gen_id),
                OperDelete::Stale => {}
                OperDelete::Seen(_) => self.retry_vrf_delete(vrf),
            }
            return;
        }

        let outcome = with_tree!(self, key.kind(), tree => tree.oper_entry_delete(key, gen_id));
        if outcome != OperDelete::Stale {
            if let Some(route) = key.inet_route() {
                self.route_lpm.remove(route);
            }
        }
        match outcome {
            OperDelete::Missing => self.free_notify_missing(key, gen_id),
            OperDelete::Stale => {}
            OperDelete::Seen(flows) => {
                if let Some(action) = delete_action(key.kind()) {
                    self.emit(action, &flows, key);
                }
                let reclaim = with_tree!(self, key.kind(), tree => tree.try_delete(key, |_| true));
                self.reclaimed(key, reclaim);
            }
        }
        if let Some(vrf) = key.route_vrf() {
            self.retry_vrf_delete(vrf);
        }
    }

    /// Flows may depend on the default route of a VRF that never existed. When the VRF goes,
    /// nothing else would release that dependency: have the flows recomputed, without
    /// pretending the route was deleted.
    fn delete_default_route(&mut self, vrf: VrfId) {
        let key = FlowMgmtKey::Inet4(InetRouteKey {
            vrf,
            prefix: IpNet::V4(Ipv4Net::new_assert(Ipv4Addr::UNSPECIFIED, 0)),
        });
        let Some(entry) = self.inet4.find(&key) else {
            return;
        };
        if entry.oper_state() != OperState::NotSeen {
            return;
        }
        let flows: Vec<_> = entry.flows().iter().copied().collect();
        debug!("implicit delete of default route of vrf {vrf}: {} flows", flows.len());
        self.emit(FlowTableAction::Recompute, &flows, &key);
        let reclaim = self.inet4.try_delete(&key, |_| true);
        self.reclaimed(&key, reclaim);
    }

    fn retry_vrf_delete(&mut self, vrf: VrfId) {
        let key = FlowMgmtKey::Vrf(vrf);
        let count = self.vrf_flow_count.get(&vrf).copied().unwrap_or(0);
        let reclaim = self
            .vrf
            .try_delete(&key, |e| e.data.all_deleted() && count == 0);
        self.reclaimed(&key, reclaim);
    }

    // ---- queries ----------------------------------------------------------------------

    /// Whether any route entry of `vrf` is still tracked.
    #[must_use]
    pub fn has_vrf_flows(&self, vrf: VrfId) -> bool {
        let firsts = [
            (
                &self.inet4,
                FlowMgmtKey::Inet4(InetRouteKey {
                    vrf,
                    prefix: IpNet::V4(Ipv4Net::new_assert(Ipv4Addr::UNSPECIFIED, 0)),
                }),
            ),
            (
                &self.inet6,
                FlowMgmtKey::Inet6(InetRouteKey {
                    vrf,
                    prefix: IpNet::V6(Ipv6Net::new_assert(Ipv6Addr::UNSPECIFIED, 0)),
                }),
            ),
            (&self.bridge, FlowMgmtKey::bridge(vrf, Mac::ZERO)),
        ];
        firsts.iter().any(|(tree, first)| {
            tree.lower_bound(first)
                .and_then(FlowMgmtKey::route_vrf)
                .is_some_and(|v| v == vrf)
        })
    }

    /// Flow references to routes of `vrf`.
    #[must_use]
    pub fn vrf_flow_count(&self, vrf: VrfId) -> u32 {
        self.vrf_flow_count.get(&vrf).copied().unwrap_or(0)
    }

    #[must_use]
    pub fn vrf_data(&self, vrf: VrfId) -> Option<VrfData> {
        self.vrf.find(&FlowMgmtKey::Vrf(vrf)).map(|e| e.data)
    }

    /// `(ingress, egress)` flow counts of a virtual network.
    #[must_use]
    pub fn vn_flow_counters(&self, vn: Uuid) -> (u32, u32) {
        self.vn
            .find(&FlowMgmtKey::Vn(vn))
            .map_or((0, 0), |e| (e.data.ingress_flow_count, e.data.egress_flow_count))
    }

    /// `(created, aged, active)` flow counts of an interface.
    #[must_use]
    pub fn interface_flow_count(&self, intf: Uuid) -> (u64, u64, usize) {
        self.interface
            .find(&FlowMgmtKey::Interface(intf))
            .map_or((0, 0, 0), |e| {
                (e.data.flow_created, e.data.flow_aged, e.size())
            })
    }

    #[must_use]
    pub fn ace_hit_count(&self, acl: Uuid, ace: AceId) -> u64 {
        self.acl
            .find(&FlowMgmtKey::acl(acl, vec![]))
            .map_or(0, |e| e.data.ace_hit_count(ace))
    }

    /// Tracked flows that matched no ACL.
    #[must_use]
    pub fn acl_flow_miss_count(&self) -> u64 {
        self.acl_flow_miss
    }

    #[must_use]
    pub fn flow_info(&self, flow: FlowIndex) -> Option<&FlowEntryInfo> {
        self.flows.get(&flow)
    }

    #[must_use]
    pub fn flow_count(&self) -> usize {
        self.flows.len()
    }

    #[must_use]
    pub fn entry(&self, key: &FlowMgmtKey) -> Option<EntrySummary> {
        macro_rules! summary {
            ($tree:expr) => {
                $tree.find(key).map(|e| EntrySummary::new(key, e))
            };
        }
        match key.kind() {
            FlowMgmtKeyKind::Interface => summary!(self.interface),
            FlowMgmtKeyKind::Acl => summary!(self.acl),
            FlowMgmtKeyKind::AceId => summary!(self.ace_id),
            FlowMgmtKeyKind::Vn => summary!(self.vn),
            FlowMgmtKeyKind::Vm => summary!(self.vm),
            FlowMgmtKeyKind::Inet4 => summary!(self.inet4),
            FlowMgmtKeyKind::Inet6 => summary!(self.inet6),
            FlowMgmtKeyKind::Bridge => summary!(self.bridge),
            FlowMgmtKeyKind::NextHop => summary!(self.nh),
            FlowMgmtKeyKind::Vrf => summary!(self.vrf),
            FlowMgmtKeyKind::BgpAsAService => summary!(self.bgp_as_a_service),
        }
    }

    /// Number of entries in the tree of `kind`.
    #[must_use]
    pub fn tree_len(&self, kind: FlowMgmtKeyKind) -> usize {
        match kind {
            FlowMgmtKeyKind::Interface => self.interface.len(),
            FlowMgmtKeyKind::Acl => self.acl.len(),
            FlowMgmtKeyKind::AceId => self.ace_id.len(),
            FlowMgmtKeyKind::Vn => self.vn.len(),
            FlowMgmtKeyKind::Vm => self.vm.len(),
            FlowMgmtKeyKind::Inet4 => self.inet4.len(),
            FlowMgmtKeyKind::Inet6 => self.inet6.len(),
            FlowMgmtKeyKind::Bridge => self.bridge.len(),
            FlowMgmtKeyKind::NextHop => self.nh.len(),
            FlowMgmtKeyKind::Vrf => self.vrf.len(),
            FlowMgmtKeyKind::BgpAsAService => self.bgp_as_a_service.len(),
        }
    }

    /// Up to `count` entries of the tree of `kind`, after `after` or from the start.
    ///
    /// Pass the key of the last returned entry to get the next page.
    #[must_use]
    pub fn dump(
        &self,
        kind: FlowMgmtKeyKind,
        after: Option<&FlowMgmtKey>,
        count: usize,
    ) -> Vec<EntrySummary> {
        fn page<D: Default>(
            tree: &FlowMgmtTree<D>,
            after: Option<&FlowMgmtKey>,
            count: usize,
        ) -> Vec<EntrySummary> {
            tree.page(after, count)
                .map(|(k, e)| EntrySummary::new(k, e))
                .collect()
        }
        match kind {
            FlowMgmtKeyKind::Interface => page(&self.interface, after, count),
            FlowMgmtKeyKind::Acl => page(&self.acl, after, count),
            FlowMgmtKeyKind::AceId => page(&self.ace_id, after, count),
            FlowMgmtKeyKind::Vn => page(&self.vn, after, count),
            FlowMgmtKeyKind::Vm => page(&self.vm, after, count),
            FlowMgmtKeyKind::Inet4 => page(&self.inet4, after, count),
            FlowMgmtKeyKind::Inet6 => page(&self.inet6, after, count),
            FlowMgmtKeyKind::Bridge => page(&self.bridge, after, count),
            FlowMgmtKeyKind::NextHop => page(&self.nh, after, count),
            FlowMgmtKeyKind::Vrf => page(&self.vrf, after, count),
            FlowMgmtKeyKind::BgpAsAService => page(&self.bgp_as_a_service, after, count),
        }
    }

    /// Whether the VRF entry could go now, were it retried.
    #[must_use]
    pub fn vrf_can_delete(&self, vrf: VrfId) -> bool {
        self.vrf.find(&FlowMgmtKey::Vrf(vrf)).is_some_and(|e| {
            e.can_delete() && e.data.all_deleted() && self.vrf_flow_count(vrf) == 0
        })
    }
}
