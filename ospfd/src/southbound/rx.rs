//
// Copyright (c) The Ospfd Project Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv4Addr;

use ospfd_utils::ip::IpNetworkKind;
use ospfd_utils::policy::{self, ExternalRoute};
use ospfd_utils::southbound::{
    AddressMsg, InterfaceUpdateMsg, RouteKeyMsg, RouteRedistributeMsg,
};

use crate::collections::{AreaIndex, InterfaceIndex};
use crate::instance::Instance;
use crate::lsdb::LsaOriginateEvent;
use crate::version::Version;

// ===== global functions =====

// Updates the read-only mirror of the host interface attributes.
pub(crate) fn process_iface_update<V>(
    instance: &mut Instance<V>,
    msg: InterfaceUpdateMsg,
) where
    V: Version,
{
    for (area_idx, iface_idx) in iface_attachments(instance, &msg.ifname) {
        let iface = &mut instance.arenas.interfaces[iface_idx];
        iface.system.flags = msg.flags;
        iface.system.ifindex = Some(msg.ifindex);
        iface.system.mtu = Some(msg.mtu as u16);

        // Check if OSPF needs to be started or stopped on this interface.
        if let Some((instance_up, arenas)) = instance.as_up() {
            let area = &arenas.areas[area_idx];
            let iface = &mut arenas.interfaces[iface_idx];
            iface.update(
                area,
                &instance_up,
                &mut arenas.neighbors,
                &arenas.lsa_entries,
            );
        }
    }
}

// Adds an address to the interface-attributes mirror.
pub(crate) fn process_addr_add<V>(instance: &mut Instance<V>, msg: AddressMsg)
where
    V: Version,
{
    // Filter out addresses the version doesn't use.
    let Some(addr) = V::accept_addr(msg.addr) else {
        return;
    };

    for (area_idx, iface_idx) in iface_attachments(instance, &msg.ifname) {
        let iface = &mut instance.arenas.interfaces[iface_idx];
        if !iface.system.addr_list.insert(addr) {
            continue;
        }
        V::addr_list_update(iface);

        addr_change_sync(instance, area_idx, iface_idx);
    }
}

// Removes an address from the interface-attributes mirror.
pub(crate) fn process_addr_del<V>(instance: &mut Instance<V>, msg: AddressMsg)
where
    V: Version,
{
    let Some(addr) = V::accept_addr(msg.addr) else {
        return;
    };

    for (area_idx, iface_idx) in iface_attachments(instance, &msg.ifname) {
        let iface = &mut instance.arenas.interfaces[iface_idx];
        if !iface.system.addr_list.remove(&addr) {
            continue;
        }
        V::addr_list_update(iface);

        addr_change_sync(instance, area_idx, iface_idx);
    }
}

// Updates the system Router ID.
pub(crate) fn process_router_id_update<V>(
    instance: &mut Instance<V>,
    router_id: Option<Ipv4Addr>,
) where
    V: Version,
{
    instance.system.router_id = router_id;
    instance.update();
}

// Handles a route offered for external redistribution: the policy hook
// decides whether (and with which attributes) it is advertised.
pub(crate) fn process_route_redist_add<V>(
    instance: &mut Instance<V>,
    msg: RouteRedistributeMsg,
) where
    V: Version,
{
    // Never redistribute the protocol's own routes.
    if msg.protocol == V::PROTOCOL {
        return;
    }

    let Some(prefix) = V::IpNetwork::get(msg.prefix) else {
        return;
    };

    // Request a filter evaluation from the policy engine.
    let route = ExternalRoute {
        prefix: msg.prefix,
        nexthop: msg.nexthop,
        metric: msg.metric,
        metric_type: msg.metric_type,
        tag: msg.tag,
        origin: msg.protocol,
        tags: msg.tags,
    };
    let policy = instance.shared.policy.clone();
    let Some(route) = policy::apply(policy.as_ref(), route) else {
        // Rejected routes that were previously advertised are withdrawn.
        process_route_redist_del_prefix(instance, prefix);
        return;
    };

    let Some((mut instance_up, arenas)) = instance.as_up() else {
        return;
    };
    instance_up
        .state
        .redistributed
        .insert(prefix, route.clone());

    // Originate or refresh the corresponding external LSAs.
    V::lsa_orig_external(&mut instance_up, arenas, prefix, &route);
}

// Handles the withdrawal of a redistributed route.
pub(crate) fn process_route_redist_del<V>(
    instance: &mut Instance<V>,
    msg: RouteKeyMsg,
) where
    V: Version,
{
    if msg.protocol == V::PROTOCOL {
        return;
    }

    let Some(prefix) = V::IpNetwork::get(msg.prefix) else {
        return;
    };

    process_route_redist_del_prefix(instance, prefix);
}

// ===== helper functions =====

// The same interface name may be attached to at most one area, but the
// lookup has to scan them all.
fn iface_attachments<V>(
    instance: &Instance<V>,
    ifname: &str,
) -> Vec<(AreaIndex, InterfaceIndex)>
where
    V: Version,
{
    instance
        .arenas
        .areas
        .iter()
        .filter_map(|(area_idx, area)| {
            area.iface_idx(ifname).ok().map(|iface_idx| (area_idx, iface_idx))
        })
        .collect()
}

// Applies the protocol side of an interface address change.
fn addr_change_sync<V>(
    instance: &mut Instance<V>,
    area_idx: AreaIndex,
    iface_idx: InterfaceIndex,
) where
    V: Version,
{
    let Some((instance_up, arenas)) = instance.as_up() else {
        return;
    };
    let area = &arenas.areas[area_idx];
    let iface = &mut arenas.interfaces[iface_idx];
    iface.update(
        area,
        &instance_up,
        &mut arenas.neighbors,
        &arenas.lsa_entries,
    );

    // (Re)originate LSAs that might have been affected.
    instance_up.tx.protocol_input.lsa_orig_event(
        LsaOriginateEvent::InterfaceAddrAddDel {
            area_id: area.id,
            ifname: iface.name.clone(),
        },
    );
}

fn process_route_redist_del_prefix<V>(
    instance: &mut Instance<V>,
    prefix: V::IpNetwork,
) where
    V: Version,
{
    let Some((mut instance_up, arenas)) = instance.as_up() else {
        return;
    };
    if instance_up.state.redistributed.remove(&prefix).is_none() {
        return;
    }

    // Flush the external LSAs describing the route.
    V::lsa_flush_external(&mut instance_up, arenas, prefix);
}
