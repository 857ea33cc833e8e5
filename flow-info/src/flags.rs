// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

use bitflags::bitflags;

bitflags! {
    /// Properties of a flow that the dependency tracking and aging logic look at.
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
    pub struct FlowFlags: u16 {
        /// Both endpoints are local to this router.
        const LOCAL_FLOW = 0x0001;
        /// Flow enters the router from a local interface.
        const INGRESS_DIR = 0x0002;
        /// Terminal flow, to be removed on the next aging pass.
        const SHORT_FLOW = 0x0004;
        const REVERSE_FLOW = 0x0008;
        const L3_FLOW = 0x0010;
        const BGP_ROUTER_SERVICE = 0x0020;
        /// Matched a rule with the log action; always exported.
        const ACTION_LOG = 0x0040;
    }
}

bitflags! {
    /// TCP state the kernel tracks per flow.
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
    pub struct TcpFlags: u16 {
        const SYN = 0x0001;
        const SYN_R = 0x0002;
        const ESTABLISHED = 0x0004;
        const ESTABLISHED_R = 0x0008;
        const HALF_CLOSE = 0x0010;
        const RST = 0x0020;
    }
}

impl TcpFlags {
    /// The connection is being torn down; no point in keeping the flow.
    #[must_use]
    pub fn is_closing(self) -> bool {
        self.intersects(TcpFlags::HALF_CLOSE | TcpFlags::RST)
    }

    /// A SYN was seen but the handshake never completed.
    #[must_use]
    pub fn is_embryonic(self) -> bool {
        self.intersects(TcpFlags::SYN | TcpFlags::SYN_R)
            && !self.intersects(TcpFlags::ESTABLISHED | TcpFlags::ESTABLISHED_R)
    }
}
