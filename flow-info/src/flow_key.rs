// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

use std::fmt::Display;
use std::net::{IpAddr, Ipv4Addr};

use serde::{Deserialize, Serialize};

pub const IPPROTO_ICMP: u8 = 1;
pub const IPPROTO_TCP: u8 = 6;
pub const IPPROTO_UDP: u8 = 17;

/// Lookup key of a flow: the 5-tuple plus the next-hop the flow was received on.
///
/// Ordering is field by field, which makes a forward flow and its reverse land at
/// unrelated positions of an ordered table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FlowKey {
    pub nh_id: u32,
    pub src_addr: IpAddr,
    pub dst_addr: IpAddr,
    pub protocol: u8,
    pub src_port: u16,
    pub dst_port: u16,
}

impl FlowKey {
    #[must_use]
    pub fn new(
        nh_id: u32,
        src_addr: IpAddr,
        dst_addr: IpAddr,
        protocol: u8,
        src_port: u16,
        dst_port: u16,
    ) -> Self {
        Self {
            nh_id,
            src_addr,
            dst_addr,
            protocol,
            src_port,
            dst_port,
        }
    }

    /// The smallest key of the ordering; scans start after it.
    #[must_use]
    pub const fn min() -> Self {
        Self {
            nh_id: 0,
            src_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            dst_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            protocol: 0,
            src_port: 0,
            dst_port: 0,
        }
    }

    /// Key of the reverse direction as seen on next-hop `nh_id`.
    #[must_use]
    pub fn reverse(&self, nh_id: u32) -> Self {
        Self {
            nh_id,
            src_addr: self.dst_addr,
            dst_addr: self.src_addr,
            protocol: self.protocol,
            src_port: self.dst_port,
            dst_port: self.src_port,
        }
    }

    #[must_use]
    pub fn is_tcp(&self) -> bool {
        self.protocol == IPPROTO_TCP
    }

    #[must_use]
    pub fn is_ipv4(&self) -> bool {
        self.src_addr.is_ipv4()
    }
}

impl Display for FlowKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "nh:{} {}:{} -> {}:{} proto:{}",
            self.nh_id, self.src_addr, self.src_port, self.dst_addr, self.dst_port, self.protocol
        )
    }
}

#[cfg(any(test, feature = "bolero"))]
mod contract {
    use super::FlowKey;
    use bolero::{Driver, TypeGenerator};
    use std::net::{IpAddr, Ipv4Addr};

    impl TypeGenerator for FlowKey {
        fn generate<D: Driver>(driver: &mut D) -> Option<Self> {
            // a narrow address space so generated keys collide often enough to be interesting
            let src: u8 = driver.produce()?;
            let dst: u8 = driver.produce()?;
            Some(FlowKey {
                nh_id: u32::from(driver.produce::<u8>()? % 4),
                src_addr: IpAddr::V4(Ipv4Addr::new(10, 0, 0, src)),
                dst_addr: IpAddr::V4(Ipv4Addr::new(10, 0, 1, dst)),
                protocol: if driver.produce::<bool>()? {
                    super::IPPROTO_TCP
                } else {
                    super::IPPROTO_UDP
                },
                src_port: driver.produce()?,
                dst_port: driver.produce()?,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reverse_swaps_endpoints() {
        let key = FlowKey::new(
            3,
            "10.0.0.1".parse().unwrap(),
            "10.0.0.2".parse().unwrap(),
            IPPROTO_TCP,
            1000,
            80,
        );
        let rev = key.reverse(5);
        assert_eq!(rev.src_addr, key.dst_addr);
        assert_eq!(rev.dst_port, key.src_port);
        assert_eq!(rev.nh_id, 5);
        assert_eq!(rev.reverse(3), key);
        assert!(key.is_tcp() && key.is_ipv4());
    }

    #[test]
    fn min_is_smallest() {
        bolero::check!()
            .with_type::<FlowKey>()
            .for_each(|key| assert!(FlowKey::min() <= *key));
    }
}
