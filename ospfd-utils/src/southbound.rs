//
// Copyright (c) The Ospfd Project Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeSet;
use std::net::IpAddr;

use bitflags::bitflags;
use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};

use crate::policy::{ExternalMetricType, PolicyTags};
use crate::protocol::Protocol;

bitflags! {
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    #[derive(Deserialize, Serialize)]
    #[serde(transparent)]
    pub struct InterfaceFlags: u8 {
        const LOOPBACK = 0x01;
        const OPERATIVE = 0x02;
        const BROADCAST = 0x04;
    }
}

bitflags! {
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    #[derive(Deserialize, Serialize)]
    #[serde(transparent)]
    pub struct AddressFlags: u8 {
        const UNNUMBERED = 0x01;
    }
}

// Route nexthop as handed to the RIB.
#[derive(Clone, Debug, Eq, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub enum Nexthop {
    Address { ifindex: u32, addr: IpAddr },
    Interface { ifindex: u32 },
    Special(NexthopSpecial),
}

#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub enum NexthopSpecial {
    Blackhole,
    Unreachable,
}

// ===== Host interface notifications (host -> protocol) =====

#[derive(Clone, Debug)]
#[derive(Deserialize, Serialize)]
pub struct InterfaceUpdateMsg {
    pub ifname: String,
    pub ifindex: u32,
    pub mtu: u32,
    pub flags: InterfaceFlags,
}

#[derive(Clone, Debug)]
#[derive(Deserialize, Serialize)]
pub struct AddressMsg {
    pub ifname: String,
    pub addr: IpNetwork,
    pub flags: AddressFlags,
}

// Route injected into the protocol for external redistribution.
#[derive(Clone, Debug)]
#[derive(Deserialize, Serialize)]
pub struct RouteRedistributeMsg {
    pub protocol: Protocol,
    pub prefix: IpNetwork,
    pub nexthop: Option<IpAddr>,
    pub metric: u32,
    pub metric_type: ExternalMetricType,
    pub tag: Option<u32>,
    pub tags: PolicyTags,
}

// ===== RIB operations (protocol -> host) =====

#[derive(Clone, Debug)]
#[derive(Deserialize, Serialize)]
pub struct RouteMsg {
    pub protocol: Protocol,
    pub prefix: IpNetwork,
    pub distance: u32,
    pub metric: u32,
    pub tag: Option<u32>,
    pub policy_tags: PolicyTags,
    pub nexthops: BTreeSet<Nexthop>,
}

#[derive(Clone, Debug)]
#[derive(Deserialize, Serialize)]
pub struct RouteKeyMsg {
    pub protocol: Protocol,
    pub prefix: IpNetwork,
}
