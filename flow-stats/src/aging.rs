// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Eviction tests of the aging scan.

use flow_info::{CounterLayout, FlowKey, KernelFlowStats};

use crate::export_info::FlowExportInfo;

/// A flow is aged once it saw no traffic for `age_time` microseconds.
///
/// Kernel bytes beyond what the collector accounted for mean traffic not seen yet, and
/// the flow stays whatever its last modification time.
#[must_use]
pub fn should_be_aged(
    info: &FlowExportInfo,
    kernel: Option<&KernelFlowStats>,
    now: u64,
    age_time: u64,
) -> bool {
    if kernel.is_some_and(|k| !CounterLayout::BYTES.is_stale(info.bytes, k.total_bytes())) {
        return false;
    }
    now.saturating_sub(info.last_modified_time) >= age_time
}

/// TCP flows are also aged once closing, or when the handshake did not complete within
/// `syn_age_time` microseconds.
#[must_use]
pub fn tcp_should_be_aged(
    key: &FlowKey,
    info: &FlowExportInfo,
    kernel: Option<&KernelFlowStats>,
    now: u64,
    syn_age_time: u64,
) -> bool {
    if !key.is_tcp() {
        return false;
    }
    let Some(k) = kernel else {
        return false;
    };
    if k.tcp_flags.is_closing() {
        return true;
    }
    k.tcp_flags.is_embryonic() && now.saturating_sub(info.setup_time) >= syn_age_time
}

#[cfg(test)]
mod tests {
    use super::*;
    use flow_info::{IPPROTO_TCP, IPPROTO_UDP, TcpFlags};
    use uuid::Uuid;

    const AGE: u64 = 10_000_000;

    fn key(protocol: u8) -> FlowKey {
        FlowKey::new(
            1,
            "10.0.0.1".parse().unwrap(),
            "10.0.0.2".parse().unwrap(),
            protocol,
            1000,
            80,
        )
    }

    fn kernel(bytes: u32, tcp_flags: TcpFlags) -> KernelFlowStats {
        KernelFlowStats {
            bytes,
            tcp_flags,
            ..Default::default()
        }
    }

    #[test]
    fn idle_flow_ages() {
        let info = FlowExportInfo::new(Uuid::nil(), 1_000);
        assert!(!should_be_aged(&info, None, AGE, AGE));
        assert!(should_be_aged(&info, None, AGE + 1_000, AGE));
        // kernel has nothing new
        assert!(should_be_aged(&info, Some(&kernel(0, TcpFlags::empty())), AGE + 1_000, AGE));
    }

    #[test]
    fn unseen_traffic_keeps_flow() {
        let mut info = FlowExportInfo::new(Uuid::nil(), 0);
        info.bytes = 100;
        let k = kernel(150, TcpFlags::empty());
        assert!(!should_be_aged(&info, Some(&k), 10 * AGE, AGE));
        info.bytes = 150;
        assert!(should_be_aged(&info, Some(&k), 10 * AGE, AGE));
    }

    #[test]
    fn tcp_teardown_and_half_open() {
        let info = FlowExportInfo::new(Uuid::nil(), 1_000);
        let tcp = key(IPPROTO_TCP);
        let rst = kernel(0, TcpFlags::RST);
        assert!(tcp_should_be_aged(&tcp, &info, Some(&rst), 1_000, AGE));
        assert!(!tcp_should_be_aged(&key(IPPROTO_UDP), &info, Some(&rst), 1_000, AGE));
        assert!(!tcp_should_be_aged(&tcp, &info, None, 1_000, AGE));

        let syn = kernel(0, TcpFlags::SYN);
        assert!(!tcp_should_be_aged(&tcp, &info, Some(&syn), AGE, AGE));
        assert!(tcp_should_be_aged(&tcp, &info, Some(&syn), AGE + 1_000, AGE));

        let established = kernel(0, TcpFlags::SYN | TcpFlags::ESTABLISHED);
        assert!(!tcp_should_be_aged(&tcp, &info, Some(&established), 10 * AGE, AGE));
    }
}
