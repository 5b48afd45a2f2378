//
// Copyright (c) The Ospfd Project Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use ipnetwork::{IpNetwork, IpNetworkError, Ipv4Network, Ipv6Network};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

// Address Family identifier.
//
// IANA registry:
// http://www.iana.org/assignments/address-family-numbers
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub enum AddressFamily {
    Ipv4 = 1,
    Ipv6 = 2,
}

// Extension methods for Ipv4Addr.
pub trait Ipv4AddrExt {
    const LENGTH: usize;

    // Returns true if this is an usable address.
    fn is_usable(&self) -> bool;
}

// Extension methods for Ipv6Addr.
pub trait Ipv6AddrExt {
    const LENGTH: usize;

    // Returns true if this is an usable address.
    fn is_usable(&self) -> bool;
}

// Abstraction over the address type of a single address family.
pub trait IpAddrKind:
    std::fmt::Debug
    + std::fmt::Display
    + Clone
    + Copy
    + Eq
    + std::hash::Hash
    + Ord
    + PartialEq
    + PartialOrd
    + Send
    + Sync
    + DeserializeOwned
    + Serialize
    + Into<IpAddr>
{
    fn address_family(&self) -> AddressFamily;

    fn get(addr: IpAddr) -> Option<Self>;

    fn is_usable(&self) -> bool;
}

// Abstraction over the prefix type of a single address family.
pub trait IpNetworkKind<I: IpAddrKind>:
    std::fmt::Debug
    + std::fmt::Display
    + Clone
    + Copy
    + Eq
    + std::hash::Hash
    + Ord
    + PartialEq
    + PartialOrd
    + Send
    + Sync
    + DeserializeOwned
    + Serialize
    + Into<IpNetwork>
{
    fn new(addr: I, prefix: u8) -> Result<Self, IpNetworkError>;

    fn default(af: AddressFamily) -> Self;

    fn address_family(&self) -> AddressFamily;

    fn get(prefix: IpNetwork) -> Option<Self>;

    fn contains(&self, ip: I) -> bool;

    fn is_supernet_of(self, other: Self) -> bool;

    fn ip(&self) -> I;

    fn mask(&self) -> I;

    fn prefix(&self) -> u8;

    #[must_use]
    fn apply_mask(&self) -> Self;

    fn is_routable(&self) -> bool;
}

// ===== impl AddressFamily =====

impl AddressFamily {
    pub fn addr_len(&self) -> usize {
        match self {
            AddressFamily::Ipv4 => Ipv4Addr::LENGTH,
            AddressFamily::Ipv6 => Ipv6Addr::LENGTH,
        }
    }

    pub fn max_prefixlen(&self) -> u8 {
        match self {
            AddressFamily::Ipv4 => 32,
            AddressFamily::Ipv6 => 128,
        }
    }
}

impl std::fmt::Display for AddressFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AddressFamily::Ipv4 => write!(f, "IPv4"),
            AddressFamily::Ipv6 => write!(f, "IPv6"),
        }
    }
}

// ===== impl Ipv4Addr =====

impl Ipv4AddrExt for Ipv4Addr {
    const LENGTH: usize = 4;

    fn is_usable(&self) -> bool {
        !(self.is_loopback()
            || self.is_broadcast()
            || self.is_multicast()
            || self.is_unspecified())
    }
}

impl IpAddrKind for Ipv4Addr {
    fn address_family(&self) -> AddressFamily {
        AddressFamily::Ipv4
    }

    fn get(addr: IpAddr) -> Option<Self> {
        match addr {
            IpAddr::V4(addr) => Some(addr),
            _ => None,
        }
    }

    fn is_usable(&self) -> bool {
        Ipv4AddrExt::is_usable(self)
    }
}

// ===== impl Ipv6Addr =====

impl Ipv6AddrExt for Ipv6Addr {
    const LENGTH: usize = 16;

    fn is_usable(&self) -> bool {
        !(self.is_loopback() || self.is_multicast() || self.is_unspecified())
    }
}

impl IpAddrKind for Ipv6Addr {
    fn address_family(&self) -> AddressFamily {
        AddressFamily::Ipv6
    }

    fn get(addr: IpAddr) -> Option<Self> {
        match addr {
            IpAddr::V6(addr) => Some(addr),
            _ => None,
        }
    }

    fn is_usable(&self) -> bool {
        Ipv6AddrExt::is_usable(self)
    }
}

// ===== impl IpAddr =====

impl IpAddrKind for IpAddr {
    fn address_family(&self) -> AddressFamily {
        match self {
            IpAddr::V4(_) => AddressFamily::Ipv4,
            IpAddr::V6(_) => AddressFamily::Ipv6,
        }
    }

    fn get(addr: IpAddr) -> Option<Self> {
        Some(addr)
    }

    fn is_usable(&self) -> bool {
        match self {
            IpAddr::V4(addr) => Ipv4AddrExt::is_usable(addr),
            IpAddr::V6(addr) => Ipv6AddrExt::is_usable(addr),
        }
    }
}

// ===== impl Ipv4Network =====

impl IpNetworkKind<Ipv4Addr> for Ipv4Network {
    fn new(addr: Ipv4Addr, prefix: u8) -> Result<Self, IpNetworkError> {
        Ipv4Network::new(addr, prefix)
    }

    fn default(_af: AddressFamily) -> Self {
        Ipv4Network::new(Ipv4Addr::UNSPECIFIED, 0).unwrap()
    }

    fn address_family(&self) -> AddressFamily {
        AddressFamily::Ipv4
    }

    fn get(prefix: IpNetwork) -> Option<Self> {
        match prefix {
            IpNetwork::V4(prefix) => Some(prefix),
            _ => None,
        }
    }

    fn contains(&self, ip: Ipv4Addr) -> bool {
        Ipv4Network::contains(*self, ip)
    }

    fn is_supernet_of(self, other: Self) -> bool {
        Ipv4Network::is_supernet_of(self, other)
    }

    fn ip(&self) -> Ipv4Addr {
        Ipv4Network::ip(*self)
    }

    fn mask(&self) -> Ipv4Addr {
        Ipv4Network::mask(*self)
    }

    fn prefix(&self) -> u8 {
        Ipv4Network::prefix(*self)
    }

    fn apply_mask(&self) -> Self {
        Ipv4Network::new(self.network(), Ipv4Network::prefix(*self)).unwrap()
    }

    fn is_routable(&self) -> bool {
        !self.ip().is_broadcast()
            && !self.ip().is_loopback()
            && !self.ip().is_multicast()
            // 240.0.0.0/4 is reserved for future use.
            && self.ip().octets()[0] < 240
    }
}

// ===== impl Ipv6Network =====

impl IpNetworkKind<Ipv6Addr> for Ipv6Network {
    fn new(addr: Ipv6Addr, prefix: u8) -> Result<Self, IpNetworkError> {
        Ipv6Network::new(addr, prefix)
    }

    fn default(_af: AddressFamily) -> Self {
        Ipv6Network::new(Ipv6Addr::UNSPECIFIED, 0).unwrap()
    }

    fn address_family(&self) -> AddressFamily {
        AddressFamily::Ipv6
    }

    fn get(prefix: IpNetwork) -> Option<Self> {
        match prefix {
            IpNetwork::V6(prefix) => Some(prefix),
            _ => None,
        }
    }

    fn contains(&self, ip: Ipv6Addr) -> bool {
        Ipv6Network::contains(self, ip)
    }

    fn is_supernet_of(self, other: Self) -> bool {
        Ipv6Network::is_supernet_of(self, other)
    }

    fn ip(&self) -> Ipv6Addr {
        Ipv6Network::ip(self)
    }

    fn mask(&self) -> Ipv6Addr {
        Ipv6Network::mask(self)
    }

    fn prefix(&self) -> u8 {
        Ipv6Network::prefix(self)
    }

    fn apply_mask(&self) -> Self {
        Ipv6Network::new(self.network(), Ipv6Network::prefix(self)).unwrap()
    }

    fn is_routable(&self) -> bool {
        !self.ip().is_loopback()
            && !self.ip().is_multicast()
            && !self.ip().is_unicast_link_local()
    }
}

// ===== impl IpNetwork =====

impl IpNetworkKind<IpAddr> for IpNetwork {
    fn new(addr: IpAddr, prefix: u8) -> Result<Self, IpNetworkError> {
        IpNetwork::new(addr, prefix)
    }

    fn default(af: AddressFamily) -> Self {
        match af {
            AddressFamily::Ipv4 => {
                IpNetwork::V4(IpNetworkKind::default(af))
            }
            AddressFamily::Ipv6 => {
                IpNetwork::V6(IpNetworkKind::default(af))
            }
        }
    }

    fn address_family(&self) -> AddressFamily {
        match self {
            IpNetwork::V4(_) => AddressFamily::Ipv4,
            IpNetwork::V6(_) => AddressFamily::Ipv6,
        }
    }

    fn get(prefix: IpNetwork) -> Option<Self> {
        Some(prefix)
    }

    fn contains(&self, ip: IpAddr) -> bool {
        IpNetwork::contains(self, ip)
    }

    fn is_supernet_of(self, other: Self) -> bool {
        match (self, other) {
            (IpNetwork::V4(a), IpNetwork::V4(b)) => a.is_supernet_of(b),
            (IpNetwork::V6(a), IpNetwork::V6(b)) => a.is_supernet_of(b),
            _ => false,
        }
    }

    fn ip(&self) -> IpAddr {
        IpNetwork::ip(self)
    }

    fn mask(&self) -> IpAddr {
        IpNetwork::mask(self)
    }

    fn prefix(&self) -> u8 {
        IpNetwork::prefix(self)
    }

    fn apply_mask(&self) -> Self {
        match self {
            IpNetwork::V4(prefix) => {
                IpNetwork::V4(IpNetworkKind::apply_mask(prefix))
            }
            IpNetwork::V6(prefix) => {
                IpNetwork::V6(IpNetworkKind::apply_mask(prefix))
            }
        }
    }

    fn is_routable(&self) -> bool {
        match self {
            IpNetwork::V4(prefix) => IpNetworkKind::is_routable(prefix),
            IpNetwork::V6(prefix) => IpNetworkKind::is_routable(prefix),
        }
    }
}
