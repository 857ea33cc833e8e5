// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The aging collector.
//!
//! Keeps the flows of one flow table partition ordered by key and scans a bounded slice of
//! them on every pass, resuming where the previous pass stopped. A pass reads the kernel
//! counters of every visited flow, exports traffic deltas and decides which flows to evict.
//! Evictions are only requested here: the flow table deletes the flows and reports the
//! deletion back with a [`FlowStatsRequest::DeleteFlow`].

use std::collections::{BTreeMap, BTreeSet};
use std::net::IpAddr;
use std::ops::Bound;

use flow_info::{
    CounterLayout, FlowFlags, FlowHandle, FlowKey, KernelFlowSource, updated_bytes,
    updated_packets,
};
use metrics::counter;
use serde::Serialize;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::aging::{should_be_aged, tcp_should_be_aged};
use crate::config::FlowAgingConfig;
use crate::control::AgingControl;
use crate::errors::FlowStatsError;
use crate::export::{ExportSampler, FlowExportSink, FlowExporter};
use crate::export_info::FlowExportInfo;
use crate::floating_ip::FloatingIpStats;
use crate::inter_vn::InterVnStats;

pub const FLOW_AGED_COUNT: &str = "flow_aged_count";

/// Requests from the flow table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowStatsRequest {
    /// Start tracking a flow, or replace what is tracked for it.
    AddFlow {
        key: FlowKey,
        info: Box<FlowExportInfo>,
    },
    /// The flow was deleted at `teardown_time`. Its last counters are exported.
    DeleteFlow { key: FlowKey, teardown_time: u64 },
    /// The flow got a kernel slot.
    UpdateFlowIndex { key: FlowKey, handle: FlowHandle },
}

/// A flow the flow table should delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AgedFlow {
    pub key: FlowKey,
    /// Delete the reverse flow along.
    pub delete_reverse: bool,
}

/// Outcome of one aging pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PassReport {
    pub processed: u64,
    pub aged: Vec<AgedFlow>,
    /// Pacing of the next pass.
    pub interval_ms: u64,
    pub count_per_pass: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FlowStatsSummary {
    pub key: FlowKey,
    pub flow_uuid: Uuid,
    pub bytes: u64,
    pub packets: u64,
    pub setup_time: u64,
    pub last_modified_time: u64,
    pub exported: bool,
}

#[derive(Debug)]
pub struct FlowStatsCollector<S> {
    config: FlowAgingConfig,
    flows: BTreeMap<FlowKey, FlowExportInfo>,
    /// Last key visited by an incomplete pass.
    iteration_key: Option<FlowKey>,
    control: AgingControl,
    exporter: FlowExporter<S>,
    inter_vn: InterVnStats,
    floating_ip: FloatingIpStats,
}

impl<S: FlowExportSink> FlowStatsCollector<S> {
    #[must_use]
    pub fn new(config: &FlowAgingConfig, sink: S) -> Self {
        let sampler = ExportSampler::new(config.flow_export_rate, config.sampling_threshold);
        Self::with_sampler(config, sink, sampler)
    }

    #[must_use]
    pub fn with_sampler(config: &FlowAgingConfig, sink: S, sampler: ExportSampler) -> Self {
        Self {
            config: config.clone(),
            flows: BTreeMap::new(),
            iteration_key: None,
            control: AgingControl::new(config),
            exporter: FlowExporter::new(sink, sampler, config.max_msgs_per_send),
            inter_vn: InterVnStats::default(),
            floating_ip: FloatingIpStats::default(),
        }
    }

    #[must_use]
    pub fn config(&self) -> &FlowAgingConfig {
        &self.config
    }

    #[must_use]
    pub fn control(&self) -> &AgingControl {
        &self.control
    }

    #[must_use]
    pub fn exporter(&self) -> &FlowExporter<S> {
        &self.exporter
    }

    #[must_use]
    pub fn inter_vn(&self) -> &InterVnStats {
        &self.inter_vn
    }

    #[must_use]
    pub fn floating_ip(&self) -> &FloatingIpStats {
        &self.floating_ip
    }

    #[must_use]
    pub fn iteration_key(&self) -> Option<FlowKey> {
        self.iteration_key
    }

    #[must_use]
    pub fn flow(&self, key: &FlowKey) -> Option<&FlowExportInfo> {
        self.flows.get(key)
    }

    #[must_use]
    pub fn flow_count(&self) -> usize {
        self.flows.len()
    }

    /// Change the export rate the sampling adapts to.
    pub fn set_export_rate(&mut self, rate: u32) {
        self.config.flow_export_rate = rate;
        self.exporter.sampler_mut().set_cfg_rate(rate);
    }

    /// Adapt the sampling threshold to the export rate seen since the last call.
    pub fn update_export_threshold(&mut self, now: u64) {
        self.exporter.sampler_mut().update_threshold(now);
    }

    /// Up to `count` flows after `after`, for introspection.
    #[must_use]
    pub fn dump(&self, after: Option<&FlowKey>, count: usize) -> Vec<FlowStatsSummary> {
        let range = match after {
            Some(key) => self.flows.range((Bound::Excluded(*key), Bound::Unbounded)),
            None => self.flows.range(..),
        };
        range
            .take(count)
            .map(|(key, info)| FlowStatsSummary {
                key: *key,
                flow_uuid: info.flow_uuid,
                bytes: info.bytes,
                packets: info.packets,
                setup_time: info.setup_time,
                last_modified_time: info.last_modified_time,
                exported: info.exported,
            })
            .collect()
    }

    /// Handle a request from the flow table.
    ///
    /// # Errors
    ///
    /// Returns [`FlowStatsError::UnknownFlow`] for a delete or an index update of a flow
    /// that is not tracked.
    pub fn handle_request(
        &mut self,
        request: FlowStatsRequest,
        kernel: &impl KernelFlowSource,
    ) -> Result<(), FlowStatsError> {
        match request {
            FlowStatsRequest::AddFlow { key, info } => {
                debug!("tracking flow {key} uuid {}", info.flow_uuid);
                self.flows.insert(key, *info);
                Ok(())
            }
            FlowStatsRequest::DeleteFlow { key, teardown_time } => {
                self.delete_flow(&key, teardown_time, kernel)
            }
            FlowStatsRequest::UpdateFlowIndex { key, handle } => {
                let Some(info) = self.flows.get_mut(&key) else {
                    warn!("index update for unknown flow {key}");
                    return Err(FlowStatsError::UnknownFlow(key));
                };
                trace!("flow {key} now at kernel slot {}", handle.0);
                info.flow_handle = handle;
                Ok(())
            }
        }
    }

    fn delete_flow(
        &mut self,
        key: &FlowKey,
        teardown_time: u64,
        kernel: &impl KernelFlowSource,
    ) -> Result<(), FlowStatsError> {
        let rev_uuid = self.reverse_uuid(key);
        let Some(mut info) = self.flows.remove(key) else {
            warn!("delete of unknown flow {key}");
            return Err(FlowStatsError::UnknownFlow(*key));
        };
        info.teardown_time = Some(teardown_time);
        let (mut diff_bytes, mut diff_packets) = (0, 0);
        if let Some(k) = kernel.kernel_flow(info.flow_handle) {
            let bytes = updated_bytes(info.bytes, k.total_bytes());
            let packets = updated_packets(info.packets, k.total_packets());
            info.bytes = bytes.value;
            info.packets = packets.value;
            info.tcp_flags = k.tcp_flags;
            diff_bytes = bytes.diff;
            diff_packets = packets.diff;
        }
        self.exporter
            .export(key, &mut info, rev_uuid, diff_bytes, diff_packets);
        self.exporter.flush();
        Ok(())
    }

    /// Floating IP of the reverse flow of `key`, with its interface.
    fn reverse_fip(&self, key: &FlowKey) -> Option<(IpAddr, Uuid)> {
        let rev_key = self.flows.get(key)?.rev_flow_key?;
        let rev = self.flows.get(&rev_key)?;
        rev.fip.map(|fip| (fip, rev.fip_vmi))
    }

    fn reverse_uuid(&self, key: &FlowKey) -> Option<Uuid> {
        let rev_key = self.flows.get(key)?.rev_flow_key?;
        self.flows.get(&rev_key).map(|rev| rev.flow_uuid)
    }

    /// Key following `after` in the table, wrapping around at the end.
    fn next_key(&self, after: Option<FlowKey>) -> Option<FlowKey> {
        let next = match after {
            Some(key) => self
                .flows
                .range((Bound::Excluded(key), Bound::Unbounded))
                .next(),
            None => None,
        };
        next.or_else(|| self.flows.iter().next()).map(|(key, _)| *key)
    }

    fn evictable(&self, key: &FlowKey, kernel: &impl KernelFlowSource, now: u64) -> bool {
        let Some(info) = self.flows.get(key) else {
            return false;
        };
        let k = kernel.kernel_flow(info.flow_handle);
        should_be_aged(info, k.as_ref(), now, self.config.age_time_usec)
            || tcp_should_be_aged(
                key,
                info,
                k.as_ref(),
                now,
                self.config.tcp_syn_age_time_usec,
            )
    }

    /// Existing reverse flow of `key`.
    fn reverse_key(&self, key: &FlowKey) -> Option<FlowKey> {
        self.flows
            .get(key)?
            .rev_flow_key
            .filter(|rev| self.flows.contains_key(rev))
    }

    /// Account the kernel counters of `key` and export the delta.
    fn refresh(&mut self, key: &FlowKey, kernel: &impl KernelFlowSource, now: u64) {
        let rev_uuid = self.reverse_uuid(key);
        let rev_fip = self.reverse_fip(key);
        let Some(info) = self.flows.get_mut(key) else {
            return;
        };
        let Some(k) = kernel.kernel_flow(info.flow_handle) else {
            return;
        };
        info.underlay_source_port = k.underlay_sport;
        info.tcp_flags = k.tcp_flags;

        let kernel_bytes = k.total_bytes();
        let mask = CounterLayout::BYTES.mask;
        if info.bytes & mask != kernel_bytes & mask {
            let bytes = updated_bytes(info.bytes, kernel_bytes);
            let packets = updated_packets(info.packets, k.total_packets());
            self.inter_vn.update(info, bytes.diff, packets.diff);
            self.floating_ip
                .update(info, rev_fip, bytes.diff, packets.diff);
            info.bytes = bytes.value;
            info.packets = packets.value;
            info.last_modified_time = now;
            self.exporter
                .export(key, info, rev_uuid, bytes.diff, packets.diff);
        } else if !info.exported {
            self.exporter.export(key, info, rev_uuid, 0, 0);
        }
    }

    /// Scan the next slice of flows. `total_flows` is the size of the whole flow table,
    /// which paces the following passes. `now` is in microseconds.
    pub fn run_pass(
        &mut self,
        kernel: &impl KernelFlowSource,
        total_flows: u64,
        now: u64,
    ) -> PassReport {
        let mut report = PassReport {
            interval_ms: self.control.interval_ms(),
            count_per_pass: self.control.count_per_pass(),
            ..Default::default()
        };
        if self.flows.is_empty() {
            self.iteration_key = None;
            return report;
        }

        let limit = self.control.count_per_pass();
        let total = self.flows.len();
        let mut requested: BTreeSet<FlowKey> = BTreeSet::new();
        let mut cursor = self.iteration_key;
        let mut skip: Option<FlowKey> = None;
        let mut visited = 0;
        let mut count = 0;

        while visited < total {
            let Some(key) = self.next_key(cursor) else {
                break;
            };
            cursor = Some(key);
            visited += 1;
            if skip.take() == Some(key) || requested.contains(&key) {
                continue;
            }

            let reverse = self.reverse_key(&key);
            let mut delete_reverse = None;
            if self.evictable(&key, kernel, now) {
                match reverse {
                    Some(rev) if self.evictable(&rev, kernel, now) => delete_reverse = Some(true),
                    Some(_) => trace!("flow {key} idle but its reverse is not"),
                    None => delete_reverse = Some(false),
                }
            }
            if delete_reverse.is_none() {
                self.refresh(&key, kernel, now);
                let short = self
                    .flows
                    .get(&key)
                    .is_some_and(|info| info.is_set(FlowFlags::SHORT_FLOW));
                if short && self.config.delete_short_flow {
                    debug!("removing short flow {key}");
                    delete_reverse = Some(true);
                }
            }

            count += 1;
            if let Some(delete_reverse) = delete_reverse {
                debug!("aging flow {key}");
                counter!(FLOW_AGED_COUNT).increment(1);
                report.aged.push(AgedFlow {
                    key,
                    delete_reverse,
                });
                requested.insert(key);
                if let Some(rev) = reverse.filter(|_| delete_reverse) {
                    requested.insert(rev);
                    skip = Some(rev);
                    // the reverse counts against the budget too
                    if count == limit {
                        break;
                    }
                    count += 1;
                }
            }
            if count >= limit {
                break;
            }
        }
        self.exporter.flush();

        report.processed = count;
        self.iteration_key = if count >= limit && visited < total {
            cursor
        } else {
            None
        };
        self.control.adjust(total_flows);
        report.interval_ms = self.control.interval_ms();
        report.count_per_pass = self.control.count_per_pass();
        trace!(
            "aging pass: {} flows visited, {} aged",
            report.processed,
            report.aged.len()
        );
        report
    }
}
