// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Per-VRF longest-prefix-match index over the route keys known to the manager.
//!
//! Used to find the covering route of a newly added, more specific, route.

use std::collections::BTreeMap;
use std::net::{Ipv4Addr, Ipv6Addr};

use ipnet::{IpNet, Ipv4Net, Ipv6Net};
use prefix_trie::PrefixMap;

use crate::key::{InetRouteKey, VrfId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Ipv4NetW(Ipv4Net);

impl prefix_trie::Prefix for Ipv4NetW {
    type R = u32;

    fn repr(&self) -> Self::R {
        self.0.network().to_bits()
    }

    fn prefix_len(&self) -> u8 {
        self.0.prefix_len()
    }

    fn from_repr_len(repr: Self::R, len: u8) -> Self {
        assert!(len <= 32, "Invalid length in from_repr_len: {repr:?} {len}");
        Ipv4NetW(Ipv4Net::new_assert(Ipv4Addr::from_bits(repr), len).trunc())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Ipv6NetW(Ipv6Net);

impl prefix_trie::Prefix for Ipv6NetW {
    type R = u128;

    fn repr(&self) -> Self::R {
        self.0.network().to_bits()
    }

    fn prefix_len(&self) -> u8 {
        self.0.prefix_len()
    }

    fn from_repr_len(repr: Self::R, len: u8) -> Self {
        assert!(len <= 128, "Invalid length in from_repr_len: {repr:?} {len}");
        Ipv6NetW(Ipv6Net::new_assert(Ipv6Addr::from_bits(repr), len).trunc())
    }
}

#[derive(Default)]
pub(crate) struct RouteLpm {
    v4: BTreeMap<VrfId, PrefixMap<Ipv4NetW, ()>>,
    v6: BTreeMap<VrfId, PrefixMap<Ipv6NetW, ()>>,
}

impl std::fmt::Debug for RouteLpm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouteLpm")
            .field("v4_vrfs", &self.v4.len())
            .field("v6_vrfs", &self.v6.len())
            .finish()
    }
}

impl RouteLpm {
    pub(crate) fn insert(&mut self, route: &InetRouteKey) {
        match route.prefix {
            IpNet::V4(net) => {
                self.v4
                    .entry(route.vrf)
                    .or_insert_with(PrefixMap::new)
                    .insert(Ipv4NetW(net), ());
            }
            IpNet::V6(net) => {
                self.v6
                    .entry(route.vrf)
                    .or_insert_with(PrefixMap::new)
                    .insert(Ipv6NetW(net), ());
            }
        }
    }

    pub(crate) fn remove(&mut self, route: &InetRouteKey) {
        match route.prefix {
            IpNet::V4(net) => {
                if let Some(map) = self.v4.get_mut(&route.vrf) {
                    map.remove(&Ipv4NetW(net));
                    if map.is_empty() {
                        self.v4.remove(&route.vrf);
                    }
                }
            }
            IpNet::V6(net) => {
                if let Some(map) = self.v6.get_mut(&route.vrf) {
                    map.remove(&Ipv6NetW(net));
                    if map.is_empty() {
                        self.v6.remove(&route.vrf);
                    }
                }
            }
        }
    }

    /// The longest known route of `route`'s VRF strictly shorter than `route`.
    pub(crate) fn covering(&self, route: &InetRouteKey) -> Option<InetRouteKey> {
        let plen = route.plen().checked_sub(1)?;
        let prefix = match route.prefix {
            IpNet::V4(net) => {
                let lookup = Ipv4NetW(Ipv4Net::new_assert(net.network(), plen).trunc());
                let (found, ()) = self.v4.get(&route.vrf)?.get_lpm(&lookup)?;
                IpNet::V4(found.0)
            }
            IpNet::V6(net) => {
                let lookup = Ipv6NetW(Ipv6Net::new_assert(net.network(), plen).trunc());
                let (found, ()) = self.v6.get(&route.vrf)?.get_lpm(&lookup)?;
                IpNet::V6(found.0)
            }
        };
        Some(InetRouteKey {
            vrf: route.vrf,
            prefix,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn route(vrf: VrfId, s: &str) -> InetRouteKey {
        let net: IpNet = s.parse().unwrap();
        InetRouteKey::new(vrf, net.addr(), net.prefix_len()).unwrap()
    }

    #[test]
    fn covering_route_is_strictly_shorter() {
        let mut lpm = RouteLpm::default();
        lpm.insert(&route(1, "10.0.0.0/8"));
        lpm.insert(&route(1, "10.1.0.0/16"));
        lpm.insert(&route(1, "10.1.1.0/24"));
        lpm.insert(&route(2, "0.0.0.0/0"));

        assert_eq!(lpm.covering(&route(1, "10.1.1.0/24")), Some(route(1, "10.1.0.0/16")));
        assert_eq!(lpm.covering(&route(1, "10.1.2.0/24")), Some(route(1, "10.1.0.0/16")));
        assert_eq!(lpm.covering(&route(1, "10.0.0.0/8")), None);
        assert_eq!(lpm.covering(&route(2, "10.0.0.0/8")), Some(route(2, "0.0.0.0/0")));
        assert_eq!(lpm.covering(&route(2, "0.0.0.0/0")), None);

        lpm.remove(&route(1, "10.1.0.0/16"));
        assert_eq!(lpm.covering(&route(1, "10.1.1.0/24")), Some(route(1, "10.0.0.0/8")));
    }

    #[test]
    fn families_are_separate() {
        let mut lpm = RouteLpm::default();
        lpm.insert(&route(1, "2001:db8::/32"));
        assert_eq!(
            lpm.covering(&route(1, "2001:db8:1::/48")),
            Some(route(1, "2001:db8::/32"))
        );
        assert_eq!(lpm.covering(&route(1, "10.0.0.0/8")), None);
        lpm.remove(&route(1, "2001:db8::/32"));
        assert!(lpm.v6.is_empty());
    }
}
