//! Enumération des interfaces réseau utilisables pour la découverte multicast.

use std::net::{IpAddr, Ipv6Addr};

/// Snapshot of one network interface and all of its addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkInterface {
    pub name: String,
    /// OS interface index, used as IPv6 multicast scope (0 if unknown).
    pub index: u32,
    pub is_up: bool,
    pub supports_multicast: bool,
    pub is_loopback: bool,
    pub addresses: Vec<IpAddr>,
}

/// A unicast address picked on an interface to send discovery datagrams from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DiscoveryAddress {
    pub ip: IpAddr,
    /// Interface index the address belongs to (IPv6 scope id).
    pub scope_id: u32,
}

impl NetworkInterface {
    /// Up, multicast-capable and not loopback.
    pub fn is_discovery_candidate(&self) -> bool {
        self.is_up && self.supports_multicast && !self.is_loopback
    }

    /// Picks the address used for discovery on this interface.
    ///
    /// IPv4 wins over IPv6; IPv6 is only accepted when it is not link-local.
    /// Unspecified and broadcast addresses are never returned.
    pub fn unicast_address(&self) -> Option<DiscoveryAddress> {
        let usable = |ip: &IpAddr| match ip {
            IpAddr::V4(v4) => !v4.is_unspecified() && !v4.is_broadcast(),
            IpAddr::V6(v6) => !v6.is_unspecified() && !is_ipv6_link_local(v6),
        };

        self.addresses
            .iter()
            .filter(|ip| ip.is_ipv4() && usable(ip))
            .chain(self.addresses.iter().filter(|ip| ip.is_ipv6() && usable(ip)))
            .next()
            .map(|ip| DiscoveryAddress {
                ip: *ip,
                scope_id: self.index,
            })
    }
}

/// Check if an IPv6 address is link-local (fe80::/10).
pub fn is_ipv6_link_local(addr: &Ipv6Addr) -> bool {
    (addr.segments()[0] & 0xffc0) == 0xfe80
}

/// Filters `interfaces` down to one discovery address per qualifying interface.
///
/// When `allow_ipv6` is false, interfaces whose only usable address is IPv6
/// are skipped.
pub fn discovery_addresses(
    interfaces: &[NetworkInterface],
    allow_ipv6: bool,
) -> Vec<(String, DiscoveryAddress)> {
    interfaces
        .iter()
        .filter(|iface| iface.is_discovery_candidate())
        .filter_map(|iface| {
            let address = iface.unicast_address();
            if address.is_none() {
                tracing::trace!("Interface {} has no usable unicast address", iface.name);
            }
            address.map(|a| (iface.name.clone(), a))
        })
        .filter(|(name, address)| {
            if !allow_ipv6 && address.ip.is_ipv6() {
                tracing::debug!("Skipping IPv6-only interface {}", name);
                return false;
            }
            true
        })
        .collect()
}

/// Lists the machine's network interfaces with their flags and addresses.
#[cfg(unix)]
pub fn list_interfaces() -> std::io::Result<Vec<NetworkInterface>> {
    use nix::net::if_::InterfaceFlags;
    use std::collections::BTreeMap;
    use std::net::{SocketAddrV4, SocketAddrV6};

    let mut by_name: BTreeMap<String, NetworkInterface> = BTreeMap::new();

    for ifaddr in nix::ifaddrs::getifaddrs().map_err(std::io::Error::from)? {
        let entry = by_name
            .entry(ifaddr.interface_name.clone())
            .or_insert_with(|| NetworkInterface {
                name: ifaddr.interface_name.clone(),
                index: nix::net::if_::if_nametoindex(ifaddr.interface_name.as_str())
                    .unwrap_or(0),
                is_up: ifaddr.flags.contains(InterfaceFlags::IFF_UP),
                supports_multicast: ifaddr.flags.contains(InterfaceFlags::IFF_MULTICAST),
                is_loopback: ifaddr.flags.contains(InterfaceFlags::IFF_LOOPBACK),
                addresses: Vec::new(),
            });

        let Some(storage) = ifaddr.address else {
            continue;
        };

        if let Some(sin) = storage.as_sockaddr_in() {
            entry
                .addresses
                .push(IpAddr::V4(*SocketAddrV4::from(*sin).ip()));
        } else if let Some(sin6) = storage.as_sockaddr_in6() {
            entry
                .addresses
                .push(IpAddr::V6(*SocketAddrV6::from(*sin6).ip()));
        }
    }

    Ok(by_name.into_values().collect())
}

#[cfg(not(unix))]
pub fn list_interfaces() -> std::io::Result<Vec<NetworkInterface>> {
    tracing::warn!("Network interface enumeration is not supported on this platform");
    Ok(Vec::new())
}
