// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Flow records towards the analytics pipeline, with rate-driven sampling.
//!
//! Samples at or above the sampling threshold are always exported as-is. Smaller samples are
//! exported with probability `diff_bytes / threshold` and their deltas scaled up by the inverse
//! of that probability, which keeps the expected totals right while bounding the record rate.
//! The threshold itself follows the observed export rate.

use std::net::IpAddr;

use flow_info::{FlowFlags, FlowKey};
use metrics::counter;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tracing::{info, trace};
use uuid::Uuid;

use crate::export_info::{FlowExportInfo, TunnelType};

pub const FLOW_EXPORT_COUNT: &str = "flow_export_count";
pub const FLOW_EXPORT_DROPS: &str = "flow_export_drops";

/// One flow log record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FlowDataRecord {
    pub flow_uuid: Uuid,
    pub reverse_uuid: Option<Uuid>,
    pub source_ip: IpAddr,
    pub dest_ip: IpAddr,
    pub protocol: u8,
    pub sport: u16,
    pub dport: u16,
    pub source_vn: String,
    pub dest_vn: String,
    pub vm: String,
    pub vmi_uuid: Option<Uuid>,
    pub sg_rule_uuid: String,
    pub nw_ace_uuid: String,
    pub drop_reason: String,
    pub action: String,
    pub bytes: u64,
    pub packets: u64,
    pub diff_bytes: u64,
    pub diff_packets: u64,
    pub tcp_flags: u16,
    pub direction_ing: bool,
    /// Set on the first export of a flow only.
    pub setup_time: Option<u64>,
    pub teardown_time: Option<u64>,
    pub underlay_source_port: u16,
    pub underlay_proto: Option<TunnelType>,
    pub other_vrouter_ip: Option<IpAddr>,
}

/// Where flow records go. Delivery is fire-and-forget.
pub trait FlowExportSink {
    fn dispatch(&mut self, records: Vec<FlowDataRecord>);
}

impl FlowExportSink for kanal::Sender<Vec<FlowDataRecord>> {
    fn dispatch(&mut self, records: Vec<FlowDataRecord>) {
        match self.try_send(records) {
            Ok(true) => trace!("sent flow records"),
            Ok(false) => counter!(FLOW_EXPORT_DROPS).increment(1),
            Err(err) => tracing::warn!("flow record channel: {err}"),
        }
    }
}

/// Collects batches in memory.
impl FlowExportSink for Vec<Vec<FlowDataRecord>> {
    fn dispatch(&mut self, records: Vec<FlowDataRecord>) {
        self.push(records);
    }
}

/// Sampling decisions and threshold adaptation.
#[derive(Debug)]
pub struct ExportSampler {
    cfg_rate: u32,
    default_threshold: u64,
    threshold: u64,
    /// Records exported since the export rate was last computed.
    export_count: u64,
    export_rate: u64,
    prev_rate_time: Option<u64>,
    prev_cfg_rate: u32,
    drops: u64,
    exported: u64,
    rng: SmallRng,
}

impl ExportSampler {
    #[must_use]
    pub fn new(cfg_rate: u32, threshold: u64) -> Self {
        Self::with_rng(cfg_rate, threshold, SmallRng::from_rng(&mut rand::rng()))
    }

    #[must_use]
    pub fn with_rng(cfg_rate: u32, threshold: u64, rng: SmallRng) -> Self {
        Self {
            cfg_rate,
            default_threshold: threshold,
            threshold,
            export_count: 0,
            export_rate: 0,
            prev_rate_time: None,
            prev_cfg_rate: cfg_rate,
            drops: 0,
            exported: 0,
            rng,
        }
    }

    #[must_use]
    pub fn threshold(&self) -> u64 {
        self.threshold
    }

    /// Last computed export rate, in records per second.
    #[must_use]
    pub fn export_rate(&self) -> u64 {
        self.export_rate
    }

    #[must_use]
    pub fn drops(&self) -> u64 {
        self.drops
    }

    #[must_use]
    pub fn exported(&self) -> u64 {
        self.exported
    }

    pub fn set_cfg_rate(&mut self, cfg_rate: u32) {
        self.cfg_rate = cfg_rate;
    }

    fn drop_one(&mut self) {
        self.drops += 1;
        counter!(FLOW_EXPORT_DROPS).increment(1);
    }

    fn count_exported(&mut self, records: u64) {
        self.export_count += records;
        self.exported += records;
        counter!(FLOW_EXPORT_COUNT).increment(records);
    }

    #[allow(clippy::cast_precision_loss)]
    fn under_pressure(&self) -> bool {
        self.export_rate as f64 >= f64::from(self.cfg_rate) * 0.8
    }

    /// Decide whether a sample is exported. Returns the deltas to report, scaled when the
    /// sample was exported on probability.
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn sample(&mut self, action_log: bool, diff_bytes: u64, diff_packets: u64) -> Option<(u64, u64)> {
        if action_log {
            return Some((diff_bytes, diff_packets));
        }
        if self.cfg_rate == 0 {
            self.drop_one();
            return None;
        }
        if diff_bytes >= self.threshold || !self.under_pressure() {
            return Some((diff_bytes, diff_packets));
        }
        let num = self.rng.random_range(0..self.threshold);
        if num > diff_bytes {
            self.drop_one();
            return None;
        }
        if diff_bytes == 0 {
            return Some((0, 0));
        }
        // scale by the inverse of the probability diff_bytes / threshold
        let packets = diff_packets as f64 * self.threshold as f64 / diff_bytes as f64;
        Some((self.threshold, packets as u64))
    }

    /// Recompute the export rate and adapt the threshold to it. `now` is in microseconds.
    pub fn update_threshold(&mut self, now: u64) {
        if self.export_count == 0 {
            return;
        }
        let Some(prev) = self.prev_rate_time else {
            self.prev_rate_time = Some(now);
            self.export_count = 0;
            return;
        };
        let secs = now.saturating_sub(prev) / 1_000_000;
        let computed = secs > 0;
        if computed {
            self.export_rate = self.export_count / secs;
            self.export_count = 0;
            self.prev_rate_time = Some(now);
        }
        if !computed && self.cfg_rate == self.prev_cfg_rate {
            return;
        }
        let cfg = u64::from(self.cfg_rate);
        let old = self.threshold;
        if !self.under_pressure() {
            self.threshold = self.default_threshold;
        } else if self.export_rate > cfg * 3 {
            self.threshold *= 4;
        } else if self.export_rate > cfg * 2 {
            self.threshold *= 3;
        } else if self.export_rate * 4 > cfg * 5 {
            self.threshold *= 2;
        }
        if old != self.threshold {
            info!(
                "export rate {}/s for {}/s configured: sampling threshold {old} -> {}",
                self.export_rate, self.cfg_rate, self.threshold
            );
        }
        self.prev_cfg_rate = self.cfg_rate;
    }
}

/// Turns flow samples into records, batches them and hands batches to a sink.
#[derive(Debug)]
pub struct FlowExporter<S> {
    sink: S,
    sampler: ExportSampler,
    batch: Vec<FlowDataRecord>,
    max_msgs_per_send: usize,
}

impl<S: FlowExportSink> FlowExporter<S> {
    #[must_use]
    pub fn new(sink: S, sampler: ExportSampler, max_msgs_per_send: usize) -> Self {
        Self {
            sink,
            sampler,
            batch: Vec::with_capacity(max_msgs_per_send),
            max_msgs_per_send: max_msgs_per_send.max(1),
        }
    }

    #[must_use]
    pub fn sampler(&self) -> &ExportSampler {
        &self.sampler
    }

    pub fn sampler_mut(&mut self) -> &mut ExportSampler {
        &mut self.sampler
    }

    #[must_use]
    pub fn sink(&self) -> &S {
        &self.sink
    }

    fn enqueue(&mut self, record: FlowDataRecord) {
        self.batch.push(record);
        if self.batch.len() >= self.max_msgs_per_send {
            self.flush();
        }
    }

    /// Send any pending records.
    pub fn flush(&mut self) {
        if self.batch.is_empty() {
            return;
        }
        let batch = std::mem::replace(&mut self.batch, Vec::with_capacity(self.max_msgs_per_send));
        trace!("dispatching {} flow records", batch.len());
        self.sink.dispatch(batch);
    }

    /// Underlay source port to report, and whether it is final.
    fn underlay_port(info: &FlowExportInfo) -> (u16, bool) {
        if info.is_set(FlowFlags::LOCAL_FLOW) {
            // the kernel picks a port for local flows too; it means nothing
            (0, true)
        } else if info.tunnel_type == TunnelType::MplsGre {
            (0, true)
        } else {
            (info.underlay_source_port, info.underlay_source_port != 0)
        }
    }

    /// Export the flow `key` with the given deltas, subject to sampling.
    pub fn export(
        &mut self,
        key: &FlowKey,
        info: &mut FlowExportInfo,
        reverse_uuid: Option<Uuid>,
        diff_bytes: u64,
        diff_packets: u64,
    ) {
        let Some((diff_bytes, diff_packets)) =
            self.sampler
                .sample(info.is_action_log(), diff_bytes, diff_packets)
        else {
            trace!("flow {key} not sampled");
            return;
        };

        let first = !info.exported;
        let mut record = FlowDataRecord {
            flow_uuid: info.flow_uuid,
            reverse_uuid,
            source_ip: key.src_addr,
            dest_ip: key.dst_addr,
            protocol: key.protocol,
            sport: key.src_port,
            dport: key.dst_port,
            source_vn: info.source_vn.clone(),
            dest_vn: info.dest_vn.clone(),
            vm: info.vm_cfg_name.clone(),
            vmi_uuid: info.interface_uuid,
            sg_rule_uuid: info.sg_rule_uuid.clone(),
            nw_ace_uuid: info.nw_ace_uuid.clone(),
            drop_reason: info.drop_reason.clone(),
            action: info.action.to_string(),
            bytes: info.bytes,
            packets: info.packets,
            diff_bytes,
            diff_packets,
            tcp_flags: info.tcp_flags.bits(),
            direction_ing: info.is_set(FlowFlags::INGRESS_DIR),
            setup_time: None,
            teardown_time: info.teardown_time,
            underlay_source_port: 0,
            underlay_proto: None,
            other_vrouter_ip: None,
        };
        if first {
            record.setup_time = Some(info.setup_time);
            record.underlay_proto = Some(info.tunnel_type);
            record.other_vrouter_ip = if info.is_set(FlowFlags::LOCAL_FLOW) {
                None
            } else {
                info.peer_vrouter
            };
            info.exported = true;
        }
        if first || !info.underlay_sport_exported {
            let (port, done) = Self::underlay_port(info);
            record.underlay_source_port = port;
            info.underlay_sport_exported = done;
        }

        if first || info.teardown_time.is_some() {
            info!(
                target: "flow-export",
                "export flow {key} uuid {} bytes {} packets {}{}",
                info.flow_uuid,
                info.bytes,
                info.packets,
                if first { " (new)" } else { " (teardown)" }
            );
        } else {
            trace!("export flow {key} +{diff_bytes} bytes +{diff_packets} packets");
        }

        if info.is_set(FlowFlags::LOCAL_FLOW) {
            // local flows go out twice, once per direction, the egress one under its own uuid
            record.direction_ing = true;
            let mut egress = record.clone();
            egress.direction_ing = false;
            egress.flow_uuid = info.egress_uuid;
            self.enqueue(record);
            self.enqueue(egress);
            self.sampler.count_exported(2);
        } else {
            self.enqueue(record);
            self.sampler.count_exported(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flow_info::IPPROTO_UDP;
    use pretty_assertions::assert_eq;

    fn key() -> FlowKey {
        FlowKey::new(
            1,
            "10.0.0.1".parse().unwrap(),
            "10.0.0.2".parse().unwrap(),
            IPPROTO_UDP,
            5000,
            53,
        )
    }

    fn sampler(rate: u32) -> ExportSampler {
        ExportSampler::with_rng(rate, 500, SmallRng::seed_from_u64(7))
    }

    #[test]
    fn log_action_always_exports() {
        let mut sampler = sampler(0);
        assert_eq!(sampler.sample(true, 1, 1), Some((1, 1)));
        assert_eq!(sampler.sample(false, 1000, 1), None);
        assert_eq!(sampler.drops(), 1);
    }

    #[test]
    fn no_sampling_below_the_rate() {
        let mut sampler = sampler(100);
        // nothing exported yet: the rate is far below the configured one
        for diff in [0, 1, 10, 499] {
            assert_eq!(sampler.sample(false, diff, 1), Some((diff, 1)));
        }
    }

    #[test]
    fn small_samples_are_scaled_up() {
        let mut sampler = sampler(10);
        sampler.export_rate = 10;
        let mut exported = 0;
        for _ in 0..1000 {
            if let Some((bytes, packets)) = sampler.sample(false, 100, 2) {
                // probability 1/5
                assert_eq!((bytes, packets), (500, 10));
                exported += 1;
            }
        }
        assert!(exported > 100 && exported < 320, "exported {exported}");
        assert_eq!(sampler.drops(), 1000 - exported);
        // large samples are never dropped
        assert_eq!(sampler.sample(false, 500, 3), Some((500, 3)));
    }

    #[test]
    fn threshold_follows_rate() {
        let mut sampler = sampler(10);
        sampler.count_exported(1);
        sampler.update_threshold(1_000_000);
        assert_eq!(sampler.threshold(), 500);

        // 35 records in one second: more than three times the rate
        sampler.count_exported(35);
        sampler.update_threshold(2_000_000);
        assert_eq!(sampler.export_rate(), 35);
        assert_eq!(sampler.threshold(), 2000);

        // 13 records in one second: between 1.25 and 2 times
        sampler.count_exported(13);
        sampler.update_threshold(3_000_000);
        assert_eq!(sampler.threshold(), 4000);

        // back to normal
        sampler.count_exported(5);
        sampler.update_threshold(4_000_000);
        assert_eq!(sampler.threshold(), 500);
    }

    #[test]
    fn local_flows_export_both_directions() {
        let mut exporter = FlowExporter::new(Vec::new(), sampler(100), 16);
        let mut info = FlowExportInfo::new(Uuid::from_u128(1), 5).with_flags(FlowFlags::LOCAL_FLOW);
        info.egress_uuid = Uuid::from_u128(2);
        info.underlay_source_port = 4444;
        exporter.export(&key(), &mut info, None, 0, 0);
        exporter.flush();

        let batches = exporter.sink();
        assert_eq!(batches.len(), 1);
        let [ingress, egress] = batches[0].as_slice() else {
            panic!("expected two records");
        };
        assert!(ingress.direction_ing && !egress.direction_ing);
        assert_eq!(ingress.flow_uuid, Uuid::from_u128(1));
        assert_eq!(egress.flow_uuid, Uuid::from_u128(2));
        assert_eq!(ingress.setup_time, Some(5));
        assert_eq!(ingress.underlay_source_port, 0);
        assert!(info.exported && info.underlay_sport_exported);
        assert_eq!(exporter.sampler().exported(), 2);
    }

    #[test]
    fn underlay_port_is_reported_once_known() {
        let mut exporter = FlowExporter::new(Vec::new(), sampler(100), 16);
        let mut info = FlowExportInfo::new(Uuid::from_u128(1), 5).with_flags(FlowFlags::INGRESS_DIR);
        exporter.export(&key(), &mut info, None, 0, 0);
        assert!(!info.underlay_sport_exported);

        info.underlay_source_port = 51_000;
        exporter.export(&key(), &mut info, None, 10, 1);
        exporter.export(&key(), &mut info, None, 10, 1);
        exporter.flush();
        let records = &exporter.sink()[0];
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].setup_time, Some(5));
        assert_eq!(records[1].setup_time, None);
        assert_eq!(records[1].underlay_source_port, 51_000);
        // reported already
        assert_eq!(records[2].underlay_source_port, 0);
        assert!(records.iter().all(|r| r.direction_ing));
    }

    #[test]
    fn records_go_out_in_batches() {
        let mut exporter = FlowExporter::new(Vec::new(), sampler(100), 2);
        let mut info = FlowExportInfo::new(Uuid::from_u128(1), 0);
        for _ in 0..5 {
            exporter.export(&key(), &mut info, None, 1, 1);
        }
        assert_eq!(exporter.sink().len(), 2);
        exporter.flush();
        let sizes: Vec<_> = exporter.sink().iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![2, 2, 1]);
        exporter.flush();
        assert_eq!(exporter.sink().len(), 3);
    }
}
