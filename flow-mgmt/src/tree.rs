// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Ordered map from the keys of one kind to their dependency records.

use std::collections::BTreeMap;
use std::ops::Bound;

use flow_info::FlowIndex;
use tracing::{debug, warn};

use crate::entry::{FlowMgmtEntry, OperState};
use crate::key::{FlowMgmtKey, FlowMgmtKeyKind};

/// Outcome of an attempt to reclaim an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reclaim {
    Kept,
    /// The entry is gone. `notify` carries the generation id of the delete to acknowledge,
    /// if the object's delete had been seen.
    Removed { notify: Option<u32> },
    Absent,
}

/// Outcome of an object delete notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperDelete {
    /// No flow ever referenced the object.
    Missing,
    /// Older than a delete already recorded.
    Stale,
    /// Marked deleted; these flows still depend on the object.
    Seen(Vec<FlowIndex>),
}

#[derive(Debug, Clone)]
pub struct FlowMgmtTree<D> {
    kind: FlowMgmtKeyKind,
    tree: BTreeMap<FlowMgmtKey, FlowMgmtEntry<D>>,
}

impl<D: Default> FlowMgmtTree<D> {
    #[must_use]
    pub fn new(kind: FlowMgmtKeyKind) -> Self {
        Self {
            kind,
            tree: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn kind(&self) -> FlowMgmtKeyKind {
        self.kind
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tree.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    #[must_use]
    pub fn find(&self, key: &FlowMgmtKey) -> Option<&FlowMgmtEntry<D>> {
        self.tree.get(key)
    }

    pub(crate) fn find_mut(&mut self, key: &FlowMgmtKey) -> Option<&mut FlowMgmtEntry<D>> {
        self.tree.get_mut(key)
    }

    /// Find the entry of `key`, creating it if needed.
    pub(crate) fn locate(&mut self, key: &FlowMgmtKey) -> &mut FlowMgmtEntry<D> {
        debug_assert_eq!(key.kind(), self.kind);
        if !self.tree.contains_key(key) {
            debug!("new {} entry for {key}", self.kind);
        }
        self.tree.entry(key.clone()).or_default()
    }

    /// The first key not less than `key`.
    #[must_use]
    pub fn lower_bound(&self, key: &FlowMgmtKey) -> Option<&FlowMgmtKey> {
        self.tree.range(key..).next().map(|(k, _)| k)
    }

    /// The first key greater than `key`.
    #[must_use]
    pub fn upper_bound(&self, key: &FlowMgmtKey) -> Option<&FlowMgmtKey> {
        self.tree
            .range((Bound::Excluded(key), Bound::Unbounded))
            .next()
            .map(|(k, _)| k)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&FlowMgmtKey, &FlowMgmtEntry<D>)> {
        self.tree.iter()
    }

    /// Up to `count` entries after `after`, or from the start.
    pub fn page(
        &self,
        after: Option<&FlowMgmtKey>,
        count: usize,
    ) -> impl Iterator<Item = (&FlowMgmtKey, &FlowMgmtEntry<D>)> {
        let lower = after.map_or(Bound::Unbounded, Bound::Excluded);
        self.tree.range((lower, Bound::Unbounded)).take(count)
    }

    /// Record that `flow` depends on `key`. Returns true if it did not already.
    pub(crate) fn add(&mut self, key: &FlowMgmtKey, flow: FlowIndex) -> bool {
        self.locate(key).add(flow)
    }

    /// Drop the dependency of `flow` on `key` and try to reclaim the entry.
    ///
    /// `reclaimable` adds kind-specific conditions to [`FlowMgmtEntry::can_delete`].
    pub(crate) fn delete(
        &mut self,
        key: &FlowMgmtKey,
        flow: FlowIndex,
        reclaimable: impl FnOnce(&FlowMgmtEntry<D>) -> bool,
    ) -> (bool, Reclaim) {
        let Some(entry) = self.tree.get_mut(key) else {
            return (false, Reclaim::Absent);
        };
        let removed = entry.delete(flow);
        (removed, self.try_delete(key, reclaimable))
    }

    /// Remove the entry of `key` if nothing holds it anymore.
    ///
    /// # Panics
    ///
    /// Panics if the entry to remove still has flows or its object is alive, which would
    /// leave flows pointing to a released object.
    pub(crate) fn try_delete(
        &mut self,
        key: &FlowMgmtKey,
        reclaimable: impl FnOnce(&FlowMgmtEntry<D>) -> bool,
    ) -> Reclaim {
        let Some(entry) = self.tree.get(key) else {
            return Reclaim::Absent;
        };
        if !entry.can_delete() || !reclaimable(entry) {
            return Reclaim::Kept;
        }
        let Some(entry) = self.tree.remove(key) else {
            return Reclaim::Absent;
        };
        assert!(
            entry.flows().is_empty() && entry.oper_state() != OperState::AddSeen,
            "reclaiming {key} while in use"
        );
        debug!("removed {} entry for {key}", self.kind);
        let notify = (entry.oper_state() == OperState::DelSeen).then_some(entry.gen_id());
        Reclaim::Removed { notify }
    }

    /// The object of `key` was added. Returns the flows to revisit.
    pub(crate) fn oper_entry_add(&mut self, key: &FlowMgmtKey) -> Vec<FlowIndex> {
        let entry = self.locate(key);
        entry.set_add_seen();
        entry.flows().iter().copied().collect()
    }

    /// The object of `key` changed. Unlike an add, this never creates an entry.
    pub(crate) fn oper_entry_change(&mut self, key: &FlowMgmtKey) -> Option<Vec<FlowIndex>> {
        let entry = self.tree.get_mut(key)?;
        entry.set_add_seen();
        Some(entry.flows().iter().copied().collect())
    }

    /// The object of `key` was deleted with generation `gen_id`.
    ///
    /// The caller is expected to try to reclaim the entry afterwards.
    pub(crate) fn oper_entry_delete(&mut self, key: &FlowMgmtKey, gen_id: u32) -> OperDelete {
        let Some(entry) = self.tree.get_mut(key) else {
            return OperDelete::Missing;
        };
        if entry.oper_state() == OperState::DelSeen && gen_id < entry.gen_id() {
            warn!(
                "ignoring stale delete of {key}: generation {gen_id} < {}",
                entry.gen_id()
            );
            return OperDelete::Stale;
        }
        entry.set_del_seen(gen_id);
        OperDelete::Seen(entry.flows().iter().copied().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::PlainEntry;
    use uuid::Uuid;

    fn vn(n: u128) -> FlowMgmtKey {
        FlowMgmtKey::Vn(Uuid::from_u128(n))
    }

    fn always(_: &PlainEntry) -> bool {
        true
    }

    #[test]
    fn flows_hold_entries() {
        let mut tree = FlowMgmtTree::<()>::new(FlowMgmtKeyKind::Vn);
        assert!(tree.add(&vn(1), FlowIndex(1)));
        assert!(!tree.add(&vn(1), FlowIndex(1)));
        assert!(tree.add(&vn(1), FlowIndex(2)));

        assert_eq!(tree.delete(&vn(1), FlowIndex(1), always), (true, Reclaim::Kept));
        // never added nor deleted: goes silently with the last flow
        assert_eq!(
            tree.delete(&vn(1), FlowIndex(2), always),
            (true, Reclaim::Removed { notify: None })
        );
        assert!(tree.is_empty());
        assert_eq!(tree.delete(&vn(1), FlowIndex(2), always), (false, Reclaim::Absent));
    }

    #[test]
    fn added_object_stays_until_deleted() {
        let mut tree = FlowMgmtTree::<()>::new(FlowMgmtKeyKind::Vn);
        assert!(tree.oper_entry_add(&vn(1)).is_empty());
        tree.add(&vn(1), FlowIndex(4));
        assert_eq!(tree.delete(&vn(1), FlowIndex(4), always).1, Reclaim::Kept);
        assert_eq!(tree.len(), 1);

        assert_eq!(tree.oper_entry_delete(&vn(1), 7), OperDelete::Seen(vec![]));
        assert_eq!(
            tree.try_delete(&vn(1), always),
            Reclaim::Removed { notify: Some(7) }
        );
    }

    #[test]
    fn change_does_not_create() {
        let mut tree = FlowMgmtTree::<()>::new(FlowMgmtKeyKind::Vn);
        assert_eq!(tree.oper_entry_change(&vn(1)), None);
        assert!(tree.is_empty());
        tree.add(&vn(1), FlowIndex(1));
        assert_eq!(tree.oper_entry_change(&vn(1)), Some(vec![FlowIndex(1)]));
        assert_eq!(tree.find(&vn(1)).unwrap().oper_state(), OperState::AddSeen);
    }

    #[test]
    fn stale_delete_is_ignored() {
        let mut tree = FlowMgmtTree::<()>::new(FlowMgmtKeyKind::Vn);
        tree.add(&vn(1), FlowIndex(1));
        assert_eq!(
            tree.oper_entry_delete(&vn(1), 5),
            OperDelete::Seen(vec![FlowIndex(1)])
        );
        assert_eq!(tree.oper_entry_delete(&vn(1), 4), OperDelete::Stale);
        assert_eq!(tree.find(&vn(1)).unwrap().gen_id(), 5);
        assert_eq!(tree.oper_entry_delete(&vn(2), 1), OperDelete::Missing);
    }

    #[test]
    fn bounds_and_pages() {
        let mut tree = FlowMgmtTree::<()>::new(FlowMgmtKeyKind::Vn);
        for n in [1, 3, 5, 7] {
            tree.add(&vn(n), FlowIndex(0));
        }
        assert_eq!(tree.lower_bound(&vn(3)), Some(&vn(3)));
        assert_eq!(tree.upper_bound(&vn(3)), Some(&vn(5)));
        assert_eq!(tree.upper_bound(&vn(7)), None);

        let first: Vec<_> = tree.page(None, 3).map(|(k, _)| k.clone()).collect();
        assert_eq!(first, vec![vn(1), vn(3), vn(5)]);
        let rest: Vec<_> = tree.page(first.last(), 3).map(|(k, _)| k.clone()).collect();
        assert_eq!(rest, vec![vn(7)]);
    }
}
