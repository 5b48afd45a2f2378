//
// Copyright (c) The Ospfd Project Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeSet;
use std::net::IpAddr;

use ospfd_utils::southbound::{Nexthop, RouteKeyMsg, RouteMsg};

use crate::collections::Arena;
use crate::interface::Interface;
use crate::route::RouteNet;
use crate::southbound::{RibChannelTx, RibTxMsg};
use crate::version::Version;

// ===== global functions =====

// Registers this instance as the owner of the RIB's OSPF table.
pub(crate) fn rib_register<V>(rib_tx: &RibChannelTx)
where
    V: Version,
{
    let _ = rib_tx.send(RibTxMsg::Register {
        protocol: V::PROTOCOL,
    });
}

pub(crate) fn rib_unregister<V>(rib_tx: &RibChannelTx)
where
    V: Version,
{
    let _ = rib_tx.send(RibTxMsg::Unregister {
        protocol: V::PROTOCOL,
    });
}

// Adds or replaces a route in the host RIB.
pub(crate) fn route_install<V>(
    rib_tx: &RibChannelTx,
    destination: &V::IpNetwork,
    route: &RouteNet<V>,
    distance: u8,
    interfaces: &Arena<Interface<V>>,
) where
    V: Version,
{
    // Fill-in nexthops.
    let nexthops = route
        .nexthops
        .values()
        .map(|nexthop| {
            let iface = &interfaces[nexthop.iface_idx];
            match nexthop.addr {
                Some(addr) => Nexthop::Address {
                    ifindex: iface.system.ifindex.unwrap_or(0),
                    addr: <V::IpAddr as Into<IpAddr>>::into(addr),
                },
                None => Nexthop::Interface {
                    ifindex: iface.system.ifindex.unwrap_or(0),
                },
            }
        })
        .collect::<BTreeSet<_>>();

    // Install route.
    let msg = RouteMsg {
        protocol: V::PROTOCOL,
        prefix: (*destination).into(),
        distance: distance.into(),
        metric: route.metric(),
        tag: route.tag,
        policy_tags: route.policy_tags.clone(),
        nexthops,
    };
    let _ = rib_tx.send(RibTxMsg::RouteInstall(msg));
}

// Removes a route from the host RIB.
pub(crate) fn route_uninstall<V>(
    rib_tx: &RibChannelTx,
    destination: &V::IpNetwork,
) where
    V: Version,
{
    let msg = RouteKeyMsg {
        protocol: V::PROTOCOL,
        prefix: (*destination).into(),
    };
    let _ = rib_tx.send(RibTxMsg::RouteUninstall(msg));
}
