// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The session aggregator.
//!
//! Folds a forward flow and its reverse flow into one session, stored three levels deep:
//! endpoint, then service (local address, server port, protocol), then remote peer. The
//! aggregator never looks at flows itself: it is handed what it needs on add and on delete,
//! and reads counters from the kernel by flow handle.

use std::collections::BTreeMap;
use std::ops::Bound;

use flow_info::{FlowHandle, KernelFlowSource, RevFlowDepParams};
use serde::Serialize;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::config::SessionStatsConfig;
use crate::errors::SessionStatsError;
use crate::export::{
    SessionAggRecord, SessionEndpointRecord, SessionExportSink, SessionFlowRecord, SessionRecord,
};
use crate::info::{SessionFlowStatsInfo, SessionStatsInfo};
use crate::keys::{SessionAggKey, SessionEndpointKey, SessionFlow, SessionKey};

type SessionMap = BTreeMap<SessionKey, SessionStatsInfo>;
type AggMap = BTreeMap<SessionAggKey, SessionMap>;

/// Outcome of one export pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionPassReport {
    pub endpoints: usize,
    pub exported: usize,
    pub removed: usize,
}

#[derive(Debug, Default)]
pub struct SessionAggregator {
    sessions: BTreeMap<SessionEndpointKey, AggMap>,
    session_count: usize,
    /// Last endpoint visited by an incomplete pass.
    resume_key: Option<SessionEndpointKey>,
    page_size: usize,
}

impl SessionAggregator {
    #[must_use]
    pub fn new(config: &SessionStatsConfig) -> Self {
        Self {
            page_size: config.page_size.max(1),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn session_count(&self) -> usize {
        self.session_count
    }

    #[must_use]
    pub fn endpoint_count(&self) -> usize {
        self.sessions.len()
    }

    #[must_use]
    pub fn resume_key(&self) -> Option<&SessionEndpointKey> {
        self.resume_key.as_ref()
    }

    #[must_use]
    pub fn session(
        &self,
        endpoint: &SessionEndpointKey,
        agg: &SessionAggKey,
        session: &SessionKey,
    ) -> Option<&SessionStatsInfo> {
        self.sessions.get(endpoint)?.get(agg)?.get(session)
    }

    /// Session of the forward flow `flow`.
    #[must_use]
    pub fn session_of(&self, flow: &SessionFlow) -> Option<&SessionStatsInfo> {
        let (endpoint, agg, session) = flow.session_keys();
        self.session(&endpoint, &agg, &session)
    }

    /// Track the session of `flow`. Reverse flows are ignored: the session belongs to the
    /// forward flow. Returns true if the session is new.
    pub fn add_session(&mut self, flow: &SessionFlow, setup_time: u64) -> bool {
        if flow.is_reverse() {
            trace!("not adding session for reverse flow {}", flow.key);
            return false;
        }
        let (endpoint, agg, key) = flow.session_keys();
        let sessions = self.sessions.entry(endpoint).or_default().entry(agg).or_default();
        let mut created = false;
        let info = sessions.entry(key).or_insert_with(|| {
            created = true;
            let rev = flow.reverse.map_or_else(
                || SessionFlowStatsInfo::new(Uuid::nil(), FlowHandle::INVALID),
                |rev| SessionFlowStatsInfo::new(rev.flow_uuid, rev.flow_handle),
            );
            SessionStatsInfo::new(
                SessionFlowStatsInfo::new(flow.flow_uuid, flow.flow_handle),
                rev,
            )
        });
        if created {
            self.session_count += 1;
            debug!("new session for flow {}", flow.key);
        } else {
            // the flow was re-evaluated: refresh what may have changed
            info.fwd.flow_uuid = flow.flow_uuid;
            info.fwd.flow_handle = flow.flow_handle;
            if let Some(rev) = flow.reverse {
                info.rev.flow_uuid = rev.flow_uuid;
                info.rev.flow_handle = rev.flow_handle;
            }
        }
        if info.setup_time.is_none() {
            info.setup_time = Some(setup_time);
        }
        info.sg_rule_uuid.clone_from(&flow.sg_rule_uuid);
        info.vm_cfg_name.clone_from(&flow.vm_cfg_name);
        created
    }

    /// Mark the session of `flow` deleted at `teardown_time`.
    ///
    /// What is known of the reverse flow comes in `rev_params`, captured by the caller while
    /// the reverse flow was alive. The forward counters get a last reading; the reverse ones
    /// stay as last read. The session is exported once more by the next pass, then removed.
    ///
    /// # Errors
    ///
    /// Returns [`SessionStatsError::UnknownSession`] if the forward flow has no session.
    pub fn delete_session(
        &mut self,
        flow: &SessionFlow,
        teardown_time: u64,
        rev_params: RevFlowDepParams,
        kernel: &impl KernelFlowSource,
    ) -> Result<(), SessionStatsError> {
        if flow.is_reverse() {
            trace!("reverse flow {} deleted, session follows its forward flow", flow.key);
            return Ok(());
        }
        let (endpoint, agg, key) = flow.session_keys();
        let Some(info) = self
            .sessions
            .get_mut(&endpoint)
            .and_then(|aggs| aggs.get_mut(&agg))
            .and_then(|sessions| sessions.get_mut(&key))
        else {
            warn!("delete of unknown session of flow {}", flow.key);
            return Err(SessionStatsError::UnknownSession(flow.key));
        };
        if info.is_deleted() {
            warn!("session of flow {} deleted twice", flow.key);
            return Ok(());
        }
        info.fwd.refresh(kernel);
        info.teardown_time = Some(teardown_time);
        if !rev_params.vm_cfg_name.is_empty() && info.vm_cfg_name.is_empty() {
            info.vm_cfg_name.clone_from(&rev_params.vm_cfg_name);
        }
        info.rev_params = Some(rev_params);
        debug!("session of flow {} deleted", flow.key);
        Ok(())
    }

    /// Refresh the counters of every live session.
    pub fn update_session_stats(&mut self, kernel: &impl KernelFlowSource) {
        for info in self
            .sessions
            .values_mut()
            .flat_map(BTreeMap::values_mut)
            .flat_map(BTreeMap::values_mut)
        {
            if !info.is_deleted() {
                info.fwd.refresh(kernel);
                info.rev.refresh(kernel);
            }
        }
    }

    /// Refresh and export the next page of endpoints, then drop the deleted sessions that
    /// were exported.
    pub fn run_pass(
        &mut self,
        kernel: &impl KernelFlowSource,
        sink: &mut impl SessionExportSink,
    ) -> SessionPassReport {
        let mut report = SessionPassReport::default();
        let page: Vec<SessionEndpointKey> = match &self.resume_key {
            Some(after) => self
                .sessions
                .range((Bound::Excluded(after), Bound::Unbounded))
                .take(self.page_size)
                .map(|(endpoint, _)| endpoint.clone())
                .collect(),
            None => self
                .sessions
                .keys()
                .take(self.page_size)
                .cloned()
                .collect(),
        };

        let mut records = vec![];
        for endpoint in &page {
            report.endpoints += 1;
            let Some(aggs) = self.sessions.get_mut(endpoint) else {
                continue;
            };
            let mut record = SessionEndpointRecord {
                endpoint: endpoint.clone(),
                aggregates: vec![],
            };
            for (agg, sessions) in aggs.iter_mut() {
                let mut agg_record = SessionAggRecord::new(agg);
                for (key, info) in sessions.iter_mut() {
                    if !info.is_deleted() {
                        info.fwd.refresh(kernel);
                        info.rev.refresh(kernel);
                    }
                    if info.needs_export() {
                        agg_record.sessions.push(Self::export_session(key, info));
                    }
                }
                let before = sessions.len();
                sessions.retain(|_, info| !info.is_deleted());
                report.removed += before - sessions.len();
                if !agg_record.sessions.is_empty() {
                    report.exported += agg_record.sessions.len();
                    record.aggregates.push(agg_record);
                }
            }
            aggs.retain(|_, sessions| !sessions.is_empty());
            if aggs.is_empty() {
                self.sessions.remove(endpoint);
            }
            if !record.aggregates.is_empty() {
                records.push(record);
            }
        }
        self.session_count -= report.removed;

        self.resume_key = match page.last() {
            Some(last)
                if page.len() == self.page_size
                    && self
                        .sessions
                        .range((Bound::Excluded(last), Bound::Unbounded))
                        .next()
                        .is_some() =>
            {
                Some(last.clone())
            }
            _ => None,
        };
        if !records.is_empty() {
            sink.dispatch(records);
        }
        trace!(
            "session pass: {} endpoints, {} sessions exported, {} removed",
            report.endpoints, report.exported, report.removed
        );
        report
    }

    fn export_session(key: &SessionKey, info: &mut SessionStatsInfo) -> SessionRecord {
        let setup_time = if info.exported { None } else { info.setup_time };
        info.exported = true;
        let mut reverse = SessionFlowRecord::take(&mut info.rev);
        reverse.flow_uuid = info.reverse_uuid();
        SessionRecord {
            remote_ip: key.remote_ip,
            client_port: key.client_port,
            setup_time,
            teardown_time: info.teardown_time,
            sg_rule_uuid: info.sg_rule_uuid.clone(),
            vm: info.vm_cfg_name.clone(),
            forward: SessionFlowRecord::take(&mut info.fwd),
            reverse,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::SessionEndpointRecord;
    use crate::keys::SessionReverseFlow;
    use flow_info::{FlowFlags, FlowKey, IPPROTO_TCP, KernelFlowStats};
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;
    use tracing_test::traced_test;

    type Kernel = HashMap<FlowHandle, KernelFlowStats>;
    type Sink = Vec<Vec<SessionEndpointRecord>>;

    fn flow_pair(client: u8, vmi: u128) -> (SessionFlow, SessionFlow) {
        let key = FlowKey::new(
            1,
            format!("10.0.0.{client}").parse().unwrap(),
            "10.0.1.1".parse().unwrap(),
            IPPROTO_TCP,
            40000,
            443,
        );
        let base = u128::from(client) * 10;
        let mut fwd = SessionFlow::new(key, Uuid::from_u128(base + 1), FlowFlags::INGRESS_DIR);
        fwd.flow_handle = FlowHandle(u32::from(client) * 10 + 1);
        fwd.vmi_uuid = Uuid::from_u128(vmi);
        fwd.source_vn = "red".to_string();
        fwd.dest_vn = "blue".to_string();
        let mut rev = SessionFlow::new(
            key.reverse(2),
            Uuid::from_u128(base + 2),
            FlowFlags::REVERSE_FLOW,
        );
        rev.flow_handle = FlowHandle(u32::from(client) * 10 + 2);
        fwd.reverse = Some(SessionReverseFlow {
            flow_uuid: rev.flow_uuid,
            flow_handle: rev.flow_handle,
        });
        (fwd, rev)
    }

    fn kernel_bytes(kernel: &mut Kernel, handle: FlowHandle, bytes: u32, packets: u32) {
        kernel.insert(
            handle,
            KernelFlowStats {
                bytes,
                packets,
                ..Default::default()
            },
        );
    }

    fn sessions(sink: &Sink) -> Vec<SessionRecord> {
        sink.iter()
            .flatten()
            .flat_map(|endpoint| endpoint.sessions().cloned().collect::<Vec<_>>())
            .collect()
    }

    #[test]
    fn forward_flow_owns_the_session() {
        let mut aggregator = SessionAggregator::new(&SessionStatsConfig::default());
        let (fwd, rev) = flow_pair(1, 1);
        assert!(!aggregator.add_session(&rev, 5));
        assert_eq!(aggregator.session_count(), 0);
        assert!(aggregator.add_session(&fwd, 5));
        assert!(!aggregator.add_session(&fwd, 7));
        assert_eq!(aggregator.session_count(), 1);
        assert_eq!(aggregator.session_of(&fwd).unwrap().setup_time, Some(5));
    }

    #[test]
    fn both_directions_are_exported() {
        let mut aggregator = SessionAggregator::new(&SessionStatsConfig::default());
        let (fwd, rev) = flow_pair(1, 1);
        aggregator.add_session(&fwd, 5);
        let mut kernel = Kernel::new();
        kernel_bytes(&mut kernel, fwd.flow_handle, 1000, 10);
        kernel_bytes(&mut kernel, rev.flow_handle, 4000, 8);

        let mut sink = Sink::new();
        let report = aggregator.run_pass(&kernel, &mut sink);
        assert_eq!(report.exported, 1);
        let records = sessions(&sink);
        assert_eq!(records[0].setup_time, Some(5));
        assert_eq!(records[0].forward.diff_bytes, 1000);
        assert_eq!(records[0].reverse.diff_bytes, 4000);
        assert_eq!(records[0].reverse.flow_uuid, rev.flow_uuid);
        assert_eq!(sink[0][0].endpoint.local_vn, "red");

        // nothing new: nothing exported
        let report = aggregator.run_pass(&kernel, &mut sink);
        assert_eq!(report.exported, 0);
        assert_eq!(sink.len(), 1);

        kernel_bytes(&mut kernel, rev.flow_handle, 4500, 9);
        aggregator.run_pass(&kernel, &mut sink);
        let records = sessions(&sink);
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].setup_time, None);
        assert_eq!((records[1].forward.diff_bytes, records[1].reverse.diff_bytes), (0, 500));
        assert_eq!(records[1].reverse.bytes, 4500);
    }

    #[test]
    fn deleted_session_is_exported_once_then_removed() {
        let mut aggregator = SessionAggregator::new(&SessionStatsConfig::default());
        let (fwd, rev) = flow_pair(1, 1);
        aggregator.add_session(&fwd, 5);
        let mut sink = Sink::new();
        let mut kernel = Kernel::new();
        aggregator.run_pass(&kernel, &mut sink);

        kernel_bytes(&mut kernel, fwd.flow_handle, 64, 1);
        let params = RevFlowDepParams {
            rev_uuid: rev.flow_uuid,
            vm_cfg_name: "vm1".to_string(),
            ..Default::default()
        };
        aggregator.delete_session(&fwd, 50, params, &kernel).unwrap();
        // counters are frozen once deleted
        kernel_bytes(&mut kernel, fwd.flow_handle, 128, 2);
        let report = aggregator.run_pass(&kernel, &mut sink);
        assert_eq!((report.exported, report.removed), (1, 1));
        let records = sessions(&sink);
        let last = records.last().unwrap();
        assert_eq!(last.teardown_time, Some(50));
        assert_eq!(last.forward.diff_bytes, 64);
        assert_eq!(last.vm, "vm1");
        assert_eq!(aggregator.session_count(), 0);
        assert_eq!(aggregator.endpoint_count(), 0);

        let report = aggregator.run_pass(&kernel, &mut sink);
        assert_eq!(report.exported, 0);
    }

    #[test]
    #[traced_test]
    fn unknown_and_repeated_deletes() {
        let mut aggregator = SessionAggregator::new(&SessionStatsConfig::default());
        let (fwd, rev) = flow_pair(1, 1);
        let kernel = Kernel::new();
        assert_eq!(
            aggregator.delete_session(&fwd, 1, RevFlowDepParams::none(), &kernel),
            Err(SessionStatsError::UnknownSession(fwd.key))
        );
        assert!(logs_contain("delete of unknown session"));

        aggregator.add_session(&fwd, 0);
        aggregator
            .delete_session(&rev, 1, RevFlowDepParams::none(), &kernel)
            .unwrap();
        assert!(!aggregator.session_of(&fwd).unwrap().is_deleted());
        aggregator
            .delete_session(&fwd, 2, RevFlowDepParams::none(), &kernel)
            .unwrap();
        aggregator
            .delete_session(&fwd, 3, RevFlowDepParams::none(), &kernel)
            .unwrap();
        assert!(logs_contain("deleted twice"));
        assert_eq!(aggregator.session_of(&fwd).unwrap().teardown_time, Some(2));
    }

    #[test]
    fn sessions_nest_under_endpoint_and_service() {
        let mut aggregator = SessionAggregator::new(&SessionStatsConfig::default());
        for client in 1..=3 {
            // remote clients of a local server
            let mut fwd = flow_pair(client, 1).0;
            fwd.flags = FlowFlags::empty();
            aggregator.add_session(&fwd, 0);
        }
        aggregator.add_session(&flow_pair(4, 2).0, 0);
        assert_eq!(aggregator.session_count(), 4);
        assert_eq!(aggregator.endpoint_count(), 2);

        let mut sink = Sink::new();
        aggregator.run_pass(&Kernel::new(), &mut sink);
        let endpoints = &sink[0];
        assert_eq!(endpoints.len(), 2);
        assert!(!endpoints[0].endpoint.is_client_session);
        // one service, three remote peers
        assert_eq!(endpoints[0].aggregates.len(), 1);
        assert_eq!(endpoints[0].aggregates[0].server_port, 443);
        let remotes: Vec<_> = endpoints[0].sessions().map(SessionRecord::key).collect();
        assert_eq!(remotes.len(), 3);
        assert!(remotes.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(endpoints[1].aggregates.len(), 1);
    }

    #[test]
    fn pages_resume_after_last_endpoint() {
        let config = SessionStatsConfig::builder().page_size(2).build().unwrap();
        let mut aggregator = SessionAggregator::new(&config);
        for vmi in 1..=5 {
            aggregator.add_session(&flow_pair(1, vmi).0, 0);
        }
        let kernel = Kernel::new();
        let mut sink = Sink::new();
        let sizes: Vec<_> = (0..4)
            .map(|_| aggregator.run_pass(&kernel, &mut sink).endpoints)
            .collect();
        assert_eq!(sizes, vec![2, 2, 1, 2]);
        // every endpoint exported once, in order
        let vmis: Vec<_> = sink
            .iter()
            .take(3)
            .flatten()
            .map(|record| record.endpoint.vmi_uuid.as_u128())
            .collect();
        assert_eq!(vmis, vec![1, 2, 3, 4, 5]);
    }
}

#[cfg(test)]
mod concurrent_tests {
    use super::*;
    use crate::export::SessionEndpointRecord;
    use concurrency::sync::{Arc, Mutex};
    use concurrency::thread;
    use flow_info::{FlowFlags, FlowKey, IPPROTO_UDP, KernelFlowStats};
    use std::collections::HashMap;

    type Kernel = HashMap<FlowHandle, KernelFlowStats>;

    /// The forward and reverse flows of a session are deleted by different workers. The
    /// forward delete only knows the reverse flow through what was captured before.
    fn forward_and_reverse_deleted_concurrently() {
        let aggregator = Arc::new(Mutex::new(SessionAggregator::new(
            &SessionStatsConfig::default(),
        )));
        let key = FlowKey::new(
            1,
            "10.0.0.1".parse().unwrap(),
            "10.0.0.2".parse().unwrap(),
            IPPROTO_UDP,
            5000,
            53,
        );
        let fwd = SessionFlow::new(key, Uuid::from_u128(1), FlowFlags::INGRESS_DIR);
        let rev = SessionFlow::new(key.reverse(2), Uuid::from_u128(2), FlowFlags::REVERSE_FLOW);
        {
            let mut aggregator = aggregator.lock().unwrap();
            aggregator.add_session(&fwd, 1);
            aggregator.add_session(&rev, 1);
        }
        let rev_params = RevFlowDepParams {
            rev_uuid: rev.flow_uuid,
            rev_egress_uuid: Uuid::from_u128(3),
            sip: Some(rev.key.src_addr),
            vm_cfg_name: "vm-2".to_string(),
            ..Default::default()
        };
        let fwd_key = fwd.key;

        let forward = Arc::clone(&aggregator);
        let fwd_delete = thread::spawn(move || {
            forward
                .lock()
                .unwrap()
                .delete_session(&fwd, 10, rev_params, &Kernel::new())
        });
        let reverse = Arc::clone(&aggregator);
        let rev_delete = thread::spawn(move || {
            reverse
                .lock()
                .unwrap()
                .delete_session(&rev, 11, RevFlowDepParams::none(), &Kernel::new())
        });
        fwd_delete.join().unwrap().unwrap();
        rev_delete.join().unwrap().unwrap();

        let mut sink: Vec<Vec<SessionEndpointRecord>> = vec![];
        let report = aggregator
            .lock()
            .unwrap()
            .run_pass(&Kernel::new(), &mut sink);
        assert_eq!((report.exported, report.removed), (1, 1));
        let record = sink[0][0].sessions().next().unwrap();
        assert_eq!(record.teardown_time, Some(10));
        assert_eq!(record.reverse.flow_uuid, Uuid::from_u128(2));
        assert_eq!(record.vm, "vm-2");
        assert_eq!(record.client_port, fwd_key.src_port);
        assert_eq!(aggregator.lock().unwrap().session_count(), 0);
    }

    #[cfg(not(feature = "shuttle"))]
    #[test]
    fn forward_and_reverse_deletes_race() {
        forward_and_reverse_deleted_concurrently();
    }

    #[cfg(feature = "shuttle")]
    #[test]
    fn forward_and_reverse_deletes_race_shuttle() {
        shuttle::check_random(forward_and_reverse_deleted_concurrently, 1000);
    }
}
