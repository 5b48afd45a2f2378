//
// Copyright (c) The Ospfd Project Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::{IpAddr, Ipv4Addr};
use std::time::{SystemTime, UNIX_EPOCH};

use ipnetwork::{IpNetwork, Ipv4Network};
use ospfd_utils::ip::{AddressFamily, IpAddrKind, IpNetworkKind};
use ospfd_utils::protocol::Protocol;

use crate::area::AreaVersion;
use crate::interface::InterfaceVersion;
use crate::lsdb::LsdbVersion;
use crate::neighbor::NeighborVersion;
use crate::network::NetworkVersion;
use crate::packet::PacketVersion;
use crate::packet::lsa::LsaVersion;
use crate::spf::SpfVersion;

/// Ties together the version-specific halves of the engine.
///
/// The protocol logic is written once against this trait; the two
/// implementations below plug in the OSPFv2 and OSPFv3 packet formats, LSA
/// sets, sockets and origination rules from their respective module trees.
/// Only the pieces that genuinely differ between the versions live behind
/// the trait; everything else is shared code.
pub trait Version:
    'static
    + Send
    + Sync
    + Clone
    + Default
    + Eq
    + PartialEq
    + std::fmt::Debug
    + AreaVersion<Self>
    + InterfaceVersion<Self>
    + LsaVersion<Self>
    + LsdbVersion<Self>
    + NeighborVersion<Self>
    + NetworkVersion<Self>
    + PacketVersion<Self>
    + SpfVersion<Self>
{
    const PROTOCOL: Protocol;
    const ADDRESS_FAMILY: AddressFamily;

    /// Address type routes are computed for.
    type IpAddr: IpAddrKind;
    /// Prefix type routes are computed for.
    type IpNetwork: IpNetworkKind<Self::IpAddr>;

    /// Initial cryptographic sequence number. No state is persisted across
    /// restarts, so the wall clock is used to keep it non-decreasing.
    fn initial_auth_seqno() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs()
    }
}

/// OSPF for IPv4, RFC 2328.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Ospfv2();

/// OSPF for IPv6, RFC 5340.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Ospfv3();

// ===== impl Ospfv2 =====

impl Version for Ospfv2 {
    const PROTOCOL: Protocol = Protocol::OSPFV2;
    const ADDRESS_FAMILY: AddressFamily = AddressFamily::Ipv4;

    type IpAddr = Ipv4Addr;
    type IpNetwork = Ipv4Network;
}

// ===== impl Ospfv3 =====

impl Version for Ospfv3 {
    const PROTOCOL: Protocol = Protocol::OSPFV3;
    const ADDRESS_FAMILY: AddressFamily = AddressFamily::Ipv6;

    type IpAddr = IpAddr;
    type IpNetwork = IpNetwork;
}
