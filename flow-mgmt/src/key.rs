// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Keys of the objects flows depend on.

use std::cmp::Ordering;
use std::fmt::Display;
use std::net::IpAddr;

use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use strum::{Display as StrumDisplay, EnumIter};
use uuid::Uuid;

use crate::errors::FlowMgmtError;

pub type VrfId = u32;
pub type NhId = u32;
pub type AceId = u32;

/// Kinds of dependency keys, in the order keys of different kinds sort.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, EnumIter, StrumDisplay, Serialize,
)]
#[strum(serialize_all = "kebab-case")]
pub enum FlowMgmtKeyKind {
    Interface,
    Acl,
    AceId,
    Vn,
    Vm,
    Inet4,
    Inet6,
    Bridge,
    NextHop,
    Vrf,
    BgpAsAService,
}

impl FlowMgmtKeyKind {
    /// Whether reclaiming an entry of this kind, after its delete was seen, must release the
    /// owning object with a free notification.
    #[must_use]
    pub fn free_notifies(self) -> bool {
        !matches!(
            self,
            FlowMgmtKeyKind::AceId | FlowMgmtKeyKind::Vm | FlowMgmtKeyKind::BgpAsAService
        )
    }

    #[must_use]
    pub fn is_route(self) -> bool {
        matches!(
            self,
            FlowMgmtKeyKind::Inet4 | FlowMgmtKeyKind::Inet6 | FlowMgmtKeyKind::Bridge
        )
    }
}

/// An ACL as matched by a flow, with the ids of the rules (ACEs) that matched.
///
/// Only the ACL identity takes part in equality and ordering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AclKey {
    pub acl: Uuid,
    pub ace_ids: Vec<AceId>,
}

impl AclKey {
    #[must_use]
    pub fn new(acl: Uuid, ace_ids: Vec<AceId>) -> Self {
        Self { acl, ace_ids }
    }
}

impl PartialEq for AclKey {
    fn eq(&self, other: &Self) -> bool {
        self.acl == other.acl
    }
}

impl Eq for AclKey {}

impl PartialOrd for AclKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for AclKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.acl.cmp(&other.acl)
    }
}

/// A unicast route, by value: the key outlives the route object being deleted and re-added.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct InetRouteKey {
    pub vrf: VrfId,
    pub prefix: IpNet,
}

impl InetRouteKey {
    /// Build a route key, masking the host bits of `addr`.
    ///
    /// # Errors
    ///
    /// Fails if `plen` exceeds the width of the address family.
    pub fn new(vrf: VrfId, addr: IpAddr, plen: u8) -> Result<Self, FlowMgmtError> {
        let prefix = IpNet::new(addr, plen)
            .map_err(|_| FlowMgmtError::InvalidPrefixLength(addr, plen))?
            .trunc();
        Ok(Self { vrf, prefix })
    }

    #[must_use]
    pub fn plen(&self) -> u8 {
        self.prefix.prefix_len()
    }

    /// Whether `addr` lies inside this route's prefix.
    #[must_use]
    pub fn contains(&self, addr: &IpAddr) -> bool {
        self.prefix.contains(addr)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Mac(pub [u8; 6]);

impl Mac {
    pub const ZERO: Mac = Mac([0; 6]);
}

impl Display for Mac {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let m = self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            m[0], m[1], m[2], m[3], m[4], m[5]
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BridgeKey {
    pub vrf: VrfId,
    pub mac: Mac,
}

/// A BGP-as-a-service session binding: the VM interface, the session source port and the
/// control node the session is mapped to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BgpAsAServiceKey {
    pub vmi: Uuid,
    pub sport: u16,
    pub cn_index: u8,
}

/// Reference to an object some flows depend on.
///
/// Keys of different kinds never compare equal; keys sort by kind first.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FlowMgmtKey {
    Interface(Uuid),
    Acl(AclKey),
    AceId(AceId),
    Vn(Uuid),
    Vm(Uuid),
    Inet4(InetRouteKey),
    Inet6(InetRouteKey),
    Bridge(BridgeKey),
    NextHop(NhId),
    Vrf(VrfId),
    BgpAsAService(BgpAsAServiceKey),
}

impl FlowMgmtKey {
    /// Route key for `addr/plen` in `vrf`, in the tree of the address family.
    ///
    /// # Errors
    ///
    /// Fails if `plen` exceeds the width of the address family.
    pub fn route(vrf: VrfId, addr: IpAddr, plen: u8) -> Result<Self, FlowMgmtError> {
        let key = InetRouteKey::new(vrf, addr, plen)?;
        Ok(match addr {
            IpAddr::V4(_) => FlowMgmtKey::Inet4(key),
            IpAddr::V6(_) => FlowMgmtKey::Inet6(key),
        })
    }

    #[must_use]
    pub fn acl(acl: Uuid, ace_ids: Vec<AceId>) -> Self {
        FlowMgmtKey::Acl(AclKey::new(acl, ace_ids))
    }

    #[must_use]
    pub fn bridge(vrf: VrfId, mac: Mac) -> Self {
        FlowMgmtKey::Bridge(BridgeKey { vrf, mac })
    }

    #[must_use]
    pub fn kind(&self) -> FlowMgmtKeyKind {
        match self {
            FlowMgmtKey::Interface(_) => FlowMgmtKeyKind::Interface,
            FlowMgmtKey::Acl(_) => FlowMgmtKeyKind::Acl,
            FlowMgmtKey::AceId(_) => FlowMgmtKeyKind::AceId,
            FlowMgmtKey::Vn(_) => FlowMgmtKeyKind::Vn,
            FlowMgmtKey::Vm(_) => FlowMgmtKeyKind::Vm,
            FlowMgmtKey::Inet4(_) => FlowMgmtKeyKind::Inet4,
            FlowMgmtKey::Inet6(_) => FlowMgmtKeyKind::Inet6,
            FlowMgmtKey::Bridge(_) => FlowMgmtKeyKind::Bridge,
            FlowMgmtKey::NextHop(_) => FlowMgmtKeyKind::NextHop,
            FlowMgmtKey::Vrf(_) => FlowMgmtKeyKind::Vrf,
            FlowMgmtKey::BgpAsAService(_) => FlowMgmtKeyKind::BgpAsAService,
        }
    }

    /// The VRF a route key belongs to.
    #[must_use]
    pub fn route_vrf(&self) -> Option<VrfId> {
        match self {
            FlowMgmtKey::Inet4(r) | FlowMgmtKey::Inet6(r) => Some(r.vrf),
            FlowMgmtKey::Bridge(b) => Some(b.vrf),
            _ => None,
        }
    }

    #[must_use]
    pub fn inet_route(&self) -> Option<&InetRouteKey> {
        match self {
            FlowMgmtKey::Inet4(r) | FlowMgmtKey::Inet6(r) => Some(r),
            _ => None,
        }
    }

    /// The smallest key of a kind, used as the start of range scans and page dumps.
    #[must_use]
    pub fn kind_min(kind: FlowMgmtKeyKind) -> Self {
        match kind {
            FlowMgmtKeyKind::Interface => FlowMgmtKey::Interface(Uuid::nil()),
            FlowMgmtKeyKind::Acl => FlowMgmtKey::acl(Uuid::nil(), vec![]),
            FlowMgmtKeyKind::AceId => FlowMgmtKey::AceId(0),
            FlowMgmtKeyKind::Vn => FlowMgmtKey::Vn(Uuid::nil()),
            FlowMgmtKeyKind::Vm => FlowMgmtKey::Vm(Uuid::nil()),
            FlowMgmtKeyKind::Inet4 => FlowMgmtKey::Inet4(InetRouteKey {
                vrf: 0,
                prefix: IpNet::V4(ipnet::Ipv4Net::new_assert(std::net::Ipv4Addr::UNSPECIFIED, 0)),
            }),
            FlowMgmtKeyKind::Inet6 => FlowMgmtKey::Inet6(InetRouteKey {
                vrf: 0,
                prefix: IpNet::V6(ipnet::Ipv6Net::new_assert(std::net::Ipv6Addr::UNSPECIFIED, 0)),
            }),
            FlowMgmtKeyKind::Bridge => FlowMgmtKey::bridge(0, Mac::ZERO),
            FlowMgmtKeyKind::NextHop => FlowMgmtKey::NextHop(0),
            FlowMgmtKeyKind::Vrf => FlowMgmtKey::Vrf(0),
            FlowMgmtKeyKind::BgpAsAService => FlowMgmtKey::BgpAsAService(BgpAsAServiceKey {
                vmi: Uuid::nil(),
                sport: 0,
                cn_index: 0,
            }),
        }
    }
}

impl Display for FlowMgmtKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FlowMgmtKey::Interface(id) => write!(f, "interface {id}"),
            FlowMgmtKey::Acl(acl) => write!(f, "acl {} aces {:?}", acl.acl, acl.ace_ids),
            FlowMgmtKey::AceId(id) => write!(f, "ace {id}"),
            FlowMgmtKey::Vn(id) => write!(f, "vn {id}"),
            FlowMgmtKey::Vm(id) => write!(f, "vm {id}"),
            FlowMgmtKey::Inet4(r) | FlowMgmtKey::Inet6(r) => {
                write!(f, "route vrf {} {}", r.vrf, r.prefix)
            }
            FlowMgmtKey::Bridge(b) => write!(f, "bridge vrf {} {}", b.vrf, b.mac),
            FlowMgmtKey::NextHop(id) => write!(f, "nexthop {id}"),
            FlowMgmtKey::Vrf(id) => write!(f, "vrf {id}"),
            FlowMgmtKey::BgpAsAService(b) => {
                write!(f, "bgpaas {} sport {} cn {}", b.vmi, b.sport, b.cn_index)
            }
        }
    }
}

#[cfg(any(test, feature = "bolero"))]
pub mod contract {
    use super::{FlowMgmtKey, Mac};
    use bolero::{Driver, TypeGenerator};
    use std::net::{IpAddr, Ipv4Addr};
    use uuid::Uuid;

    fn small_uuid<D: Driver>(driver: &mut D) -> Option<Uuid> {
        Some(Uuid::from_u128(u128::from(driver.produce::<u8>()? % 4) + 1))
    }

    /// Keys from a small universe so generated flows share dependencies.
    impl TypeGenerator for FlowMgmtKey {
        fn generate<D: Driver>(driver: &mut D) -> Option<Self> {
            let key = match driver.produce::<u8>()? % 7 {
                0 => FlowMgmtKey::Interface(small_uuid(driver)?),
                1 => FlowMgmtKey::acl(
                    small_uuid(driver)?,
                    vec![u32::from(driver.produce::<u8>()? % 4)],
                ),
                2 => FlowMgmtKey::Vn(small_uuid(driver)?),
                3 => FlowMgmtKey::NextHop(u32::from(driver.produce::<u8>()? % 4)),
                4 => FlowMgmtKey::Vm(small_uuid(driver)?),
                5 => {
                    let plen = [8u8, 16, 24][usize::from(driver.produce::<u8>()? % 3)];
                    let addr = IpAddr::V4(Ipv4Addr::new(10, driver.produce::<u8>()? % 2, 0, 0));
                    FlowMgmtKey::route(u32::from(driver.produce::<u8>()? % 2), addr, plen).ok()?
                }
                _ => FlowMgmtKey::bridge(
                    u32::from(driver.produce::<u8>()? % 2),
                    Mac([2, 0, 0, 0, 0, driver.produce::<u8>()? % 4]),
                ),
            };
            Some(key)
        }
    }
}
