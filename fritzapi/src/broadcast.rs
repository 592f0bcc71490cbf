//! Datagramme de découverte TR-64 (M-SEARCH)

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

/// SSDP multicast group for IPv4
pub const IPV4_MULTICAST_GROUP: Ipv4Addr = Ipv4Addr::new(239, 255, 255, 250);

/// Link-local SSDP multicast group for IPv6 (`ff02::c`)
pub const IPV6_MULTICAST_GROUP: Ipv6Addr = Ipv6Addr::new(0xff02, 0, 0, 0, 0, 0, 0, 0x0c);

pub const SSDP_PORT: u16 = 1900;

/// Search target of TR-64 gateways
pub const SEARCH_TARGET: &str = "urn:dslforum-org:device:InternetGatewayDevice:1";

const IPV4_CONTENT: &str = "M-SEARCH * HTTP/1.1\r\n\
HOST: 239.255.255.250:1900\r\n\
ST:urn:dslforum-org:device:InternetGatewayDevice:1\r\n\
MAN:\"ssdp:discover\"\r\n\
MX:3\r\n\
\r\n";

const IPV6_CONTENT: &str = "M-SEARCH * HTTP/1.1\r\n\
HOST: [FF02::C]:1900\r\n\
ST:urn:dslforum-org:device:InternetGatewayDevice:1\r\n\
MAN:\"ssdp:discover\"\r\n\
MX:3\r\n\
\r\n";

/// Discovery payload for one address family
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryDatagram {
    content: &'static [u8],
    group: IpAddr,
}

impl DiscoveryDatagram {
    pub fn ipv4() -> Self {
        Self {
            content: IPV4_CONTENT.as_bytes(),
            group: IpAddr::V4(IPV4_MULTICAST_GROUP),
        }
    }

    pub fn ipv6() -> Self {
        Self {
            content: IPV6_CONTENT.as_bytes(),
            group: IpAddr::V6(IPV6_MULTICAST_GROUP),
        }
    }

    /// Datagram matching the family of `local`.
    pub fn for_address(local: &IpAddr) -> Self {
        match local {
            IpAddr::V4(_) => Self::ipv4(),
            IpAddr::V6(_) => Self::ipv6(),
        }
    }

    pub fn content(&self) -> &'static [u8] {
        self.content
    }

    pub fn len(&self) -> usize {
        self.content.len()
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }

    /// Multicast group to join.
    pub fn group(&self) -> IpAddr {
        self.group
    }

    /// Destination endpoint (`group:1900`).
    pub fn destination(&self) -> SocketAddr {
        SocketAddr::new(self.group, SSDP_PORT)
    }
}
