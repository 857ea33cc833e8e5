// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Session records towards the analytics pipeline, grouped per endpoint.

use std::net::IpAddr;

use serde::Serialize;
use tracing::{trace, warn};
use uuid::Uuid;

use crate::info::SessionFlowStatsInfo;
use crate::keys::{SessionAggKey, SessionEndpointKey, SessionKey};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionFlowRecord {
    pub flow_uuid: Uuid,
    pub bytes: u64,
    pub packets: u64,
    pub diff_bytes: u64,
    pub diff_packets: u64,
    pub tcp_flags: u16,
    pub underlay_source_port: u16,
}

impl SessionFlowRecord {
    /// Record of `info`, consuming its pending deltas.
    pub fn take(info: &mut SessionFlowStatsInfo) -> Self {
        let (diff_bytes, diff_packets) = info.take_diff();
        Self {
            flow_uuid: info.flow_uuid,
            bytes: info.bytes,
            packets: info.packets,
            diff_bytes,
            diff_packets,
            tcp_flags: info.tcp_flags.bits(),
            underlay_source_port: info.underlay_source_port,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionRecord {
    pub remote_ip: IpAddr,
    pub client_port: u16,
    /// Set on the first export of a session only.
    pub setup_time: Option<u64>,
    pub teardown_time: Option<u64>,
    pub sg_rule_uuid: String,
    pub vm: String,
    pub forward: SessionFlowRecord,
    pub reverse: SessionFlowRecord,
}

impl SessionRecord {
    #[must_use]
    pub fn key(&self) -> SessionKey {
        SessionKey {
            remote_ip: self.remote_ip,
            client_port: self.client_port,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionAggRecord {
    pub local_ip: IpAddr,
    pub server_port: u16,
    pub protocol: u8,
    pub sessions: Vec<SessionRecord>,
}

impl SessionAggRecord {
    #[must_use]
    pub fn new(agg: &SessionAggKey) -> Self {
        Self {
            local_ip: agg.local_ip,
            server_port: agg.server_port,
            protocol: agg.protocol,
            sessions: vec![],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionEndpointRecord {
    pub endpoint: SessionEndpointKey,
    pub aggregates: Vec<SessionAggRecord>,
}

impl SessionEndpointRecord {
    pub fn sessions(&self) -> impl Iterator<Item = &SessionRecord> {
        self.aggregates.iter().flat_map(|agg| agg.sessions.iter())
    }
}

/// Where session records go. Delivery is fire-and-forget.
pub trait SessionExportSink {
    fn dispatch(&mut self, records: Vec<SessionEndpointRecord>);
}

impl SessionExportSink for kanal::Sender<Vec<SessionEndpointRecord>> {
    fn dispatch(&mut self, records: Vec<SessionEndpointRecord>) {
        match self.try_send(records) {
            Ok(true) => trace!("sent session records"),
            Ok(false) => warn!("session record channel full, records dropped"),
            Err(err) => warn!("session record channel: {err}"),
        }
    }
}

/// Collects dispatches in memory.
impl SessionExportSink for Vec<Vec<SessionEndpointRecord>> {
    fn dispatch(&mut self, records: Vec<SessionEndpointRecord>) {
        self.push(records);
    }
}
