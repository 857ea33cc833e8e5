// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The three key levels of the session map, and how a flow maps to them.
//!
//! Sessions are oriented from the point of view of the local endpoint. A session whose
//! forward flow enters the router from a local interface is a client session: the local
//! address is the flow source. Otherwise the local endpoint is the server and the flow
//! destination is local. Ports are taken from the forward flow in both cases, so the
//! aggregate port is always the server port.

use std::fmt::Display;
use std::net::IpAddr;

use flow_info::{FlowFlags, FlowHandle, FlowKey};
use serde::Serialize;
use uuid::Uuid;

/// What the aggregator needs to know about a flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionFlow {
    pub key: FlowKey,
    pub flow_uuid: Uuid,
    pub flags: FlowFlags,
    pub flow_handle: FlowHandle,
    /// Interface of the local endpoint.
    pub vmi_uuid: Uuid,
    pub source_vn: String,
    pub dest_vn: String,
    pub sg_rule_uuid: String,
    pub vm_cfg_name: String,
    /// The reverse flow, as known when the session is added.
    pub reverse: Option<SessionReverseFlow>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionReverseFlow {
    pub flow_uuid: Uuid,
    pub flow_handle: FlowHandle,
}

impl SessionFlow {
    #[must_use]
    pub fn new(key: FlowKey, flow_uuid: Uuid, flags: FlowFlags) -> Self {
        Self {
            key,
            flow_uuid,
            flags,
            flow_handle: FlowHandle::INVALID,
            vmi_uuid: Uuid::nil(),
            source_vn: String::new(),
            dest_vn: String::new(),
            sg_rule_uuid: String::new(),
            vm_cfg_name: String::new(),
            reverse: None,
        }
    }

    #[must_use]
    pub fn is_reverse(&self) -> bool {
        self.flags.contains(FlowFlags::REVERSE_FLOW)
    }

    #[must_use]
    pub fn is_client(&self) -> bool {
        self.flags.contains(FlowFlags::INGRESS_DIR)
    }

    /// The keys of the session of this flow.
    #[must_use]
    pub fn session_keys(&self) -> (SessionEndpointKey, SessionAggKey, SessionKey) {
        let client = self.is_client();
        let (local_ip, remote_ip) = if client {
            (self.key.src_addr, self.key.dst_addr)
        } else {
            (self.key.dst_addr, self.key.src_addr)
        };
        let (local_vn, remote_vn) = if client {
            (&self.source_vn, &self.dest_vn)
        } else {
            (&self.dest_vn, &self.source_vn)
        };
        let endpoint = SessionEndpointKey {
            vmi_uuid: self.vmi_uuid,
            local_vn: local_vn.clone(),
            remote_vn: remote_vn.clone(),
            is_client_session: client,
            is_local_flow: self.flags.contains(FlowFlags::LOCAL_FLOW),
        };
        let agg = SessionAggKey {
            local_ip,
            server_port: self.key.dst_port,
            protocol: self.key.protocol,
        };
        let session = SessionKey {
            remote_ip,
            client_port: self.key.src_port,
        };
        (endpoint, agg, session)
    }
}

/// The local endpoint and its policy context.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct SessionEndpointKey {
    pub vmi_uuid: Uuid,
    pub local_vn: String,
    pub remote_vn: String,
    pub is_client_session: bool,
    pub is_local_flow: bool,
}

impl Display for SessionEndpointKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {} -> {} ({})",
            self.vmi_uuid,
            self.local_vn,
            self.remote_vn,
            if self.is_client_session {
                "client"
            } else {
                "server"
            }
        )
    }
}

/// Sessions of one local service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct SessionAggKey {
    pub local_ip: IpAddr,
    pub server_port: u16,
    pub protocol: u8,
}

/// One remote peer of a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct SessionKey {
    pub remote_ip: IpAddr,
    pub client_port: u16,
}
