//
// Copyright (c) The Ospfd Project Contributors
//
// SPDX-License-Identifier: MIT
//

use std::cmp::{Ordering, Reverse};
use std::collections::{BTreeMap, BTreeSet, btree_map};
use std::net::Ipv4Addr;

use bitflags::bitflags;
use derive_new::new;
use ospfd_utils::ip::IpAddrKind;
use ospfd_utils::policy::PolicyTags;

use crate::area::{Area, AreaType};
use crate::collections::{Arena, InterfaceIndex};
use crate::config::InstanceCfg;
use crate::debug;
use crate::instance::InstanceUpView;
use crate::interface::Interface;
use crate::lsdb::{LSA_INFINITY, LsaEntry};
use crate::packet::lsa::{LsaKey, LsaRouterFlagsVersion};
use crate::southbound;
use crate::spf::{SpfPartialComputation, VertexLsaVersion};
use crate::version::Version;

// Network routing table entry.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RouteNet<V: Version> {
    pub prefix_options: V::PrefixOptions,
    pub area_id: Option<Ipv4Addr>,
    pub origin: Option<LsaKey<V::LsaType>>,
    pub path_type: PathType,
    pub metric: u32,
    pub type2_metric: Option<u32>,
    pub tag: Option<u32>,
    pub policy_tags: PolicyTags,
    pub nexthops: Nexthops<V::IpAddr>,
    pub flags: RouteNetFlags,
}

bitflags! {
    #[derive(Clone, Debug, Default, Eq, PartialEq)]
    pub struct RouteNetFlags: u8 {
        const CONNECTED = 0x01;
        const INSTALLED = 0x02;
        const SUMMARIZED = 0x04;
        // Route learned from an NSSA Type-7 LSA; loses ties against
        // equivalent Type-5 paths (RFC 3101 section 2.5).
        const TYPE7 = 0x08;
    }
}

// Router routing table entry.
#[derive(Clone, Debug, Eq, PartialEq, new)]
pub struct RouteRtr<V: Version> {
    pub area_id: Ipv4Addr,
    pub path_type: PathType,
    pub options: V::PacketOptions,
    pub flags: V::LsaRouterFlags,
    pub metric: u32,
    pub nexthops: Nexthops<V::IpAddr>,
}

// Locally originated inter-area "network" route.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SummaryNet<V: Version> {
    pub prefix_options: V::PrefixOptions,
    pub metric: u32,
    pub flags: SummaryNetFlags,
}

bitflags! {
    #[derive(Clone, Debug, Default, Eq, PartialEq)]
    pub struct SummaryNetFlags: u8 {
        const CONNECTED = 0x01;
    }
}

// Locally originated inter-area "router" route.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SummaryRtr<V: Version> {
    pub options: V::PacketOptions,
    pub metric: u32,
}

// OSPF path types in decreasing order of preference.
#[derive(Clone, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub enum PathType {
    IntraArea,
    InterArea,
    Type1External,
    Type2External,
}

// Route nexthop key.
#[derive(Clone, Copy, Debug, Eq, new, Ord, PartialEq, PartialOrd)]
pub struct NexthopKey<I: IpAddrKind> {
    // Nexthop interface.
    pub iface_idx: InterfaceIndex,
    // Nexthop address (`None` for connected routes).
    pub addr: Option<I>,
}

// Route nexthop.
#[derive(Clone, Copy, Debug, Eq, new, PartialEq)]
pub struct Nexthop<I: IpAddrKind> {
    // Nexthop interface.
    pub iface_idx: InterfaceIndex,
    // Nexthop address (`None` for connected routes).
    pub addr: Option<I>,
    // Router-ID of the remote neighbor (`None` for connected routes).
    pub nbr_router_id: Option<Ipv4Addr>,
}

// Ordered list of nexthops.
pub type Nexthops<I> = BTreeMap<NexthopKey<I>, Nexthop<I>>;

// ===== impl RouteNet =====

impl<V> RouteNet<V>
where
    V: Version,
{
    pub(crate) fn distance(&self, config: &InstanceCfg) -> u8 {
        match self.path_type {
            PathType::IntraArea => config.preference.intra_area,
            PathType::InterArea => config.preference.inter_area,
            PathType::Type1External | PathType::Type2External => {
                config.preference.external
            }
        }
    }

    pub(crate) fn metric(&self) -> u32 {
        match self.path_type {
            PathType::IntraArea | PathType::InterArea => self.metric,
            PathType::Type1External => self.metric,
            PathType::Type2External => self.type2_metric.unwrap(),
        }
    }
}

// ===== global functions =====

// Rebuilds the entire OSPF routing table (RFC 2328 section 16).
pub(crate) fn update_rib_full<V>(
    instance: &mut InstanceUpView<'_, V>,
    areas: &mut Arena<Area<V>>,
    interfaces: &Arena<Interface<V>>,
    lsa_entries: &Arena<LsaEntry<V>>,
) where
    V: Version,
{
    let mut rib = BTreeMap::new();
    let old_rib = std::mem::take(&mut instance.state.rib);

    // Intra-area routes.
    for (_, area) in areas.iter() {
        update_rib_intra_area(&mut rib, None, area, instance, lsa_entries);
    }

    // Inter-area routes. A router attached to multiple areas examines only
    // backbone summaries.
    let multiple_areas = active_area_count(areas, interfaces) > 1;
    for (_, area) in areas.iter_mut() {
        if multiple_areas && !area.is_backbone() {
            continue;
        }

        update_rib_inter_area_networks(
            &mut rib,
            None,
            area,
            instance,
            lsa_entries,
        );
        update_rib_inter_area_routers(None, area, instance, lsa_entries);
    }

    // External routes.
    update_rib_external(&mut rib, None, instance, areas, lsa_entries);

    // Push the resulting changes down to the global RIB.
    update_global_rib(&mut rib, old_rib, instance, interfaces);

    instance.state.rib = rib;
}

// Recomputes only the destinations a partial SPF run affects.
pub(crate) fn update_rib_partial<V>(
    partial: &mut SpfPartialComputation<V>,
    instance: &mut InstanceUpView<'_, V>,
    areas: &mut Arena<Area<V>>,
    interfaces: &Arena<Interface<V>>,
    lsa_entries: &Arena<LsaEntry<V>>,
) where
    V: Version,
{
    let mut partial_rib = BTreeMap::new();
    let mut rib = std::mem::take(&mut instance.state.rib);
    let mut old_rib = BTreeMap::new();

    let multiple_areas = active_area_count(areas, interfaces) > 1;

    if !partial.inter_network.is_empty() {
        // Drop the affected inter-area routes and recompute them.
        old_rib.extend(rib.extract_if(.., |prefix, route| {
            partial.inter_network.contains(prefix)
                && route.path_type == PathType::InterArea
        }));

        for (_, area) in areas.iter_mut() {
            if multiple_areas && !area.is_backbone() {
                continue;
            }

            update_rib_inter_area_networks(
                &mut partial_rib,
                Some(&partial.inter_network),
                area,
                instance,
                lsa_entries,
            );
        }

        // Destinations that are now unreachable through summaries may
        // still have external paths.
        partial.external.extend(old_rib.keys());
    }

    if !partial.inter_router.is_empty() {
        for (_, area) in areas.iter_mut() {
            if multiple_areas && !area.is_backbone() {
                continue;
            }

            let _ = area.state.routers.extract_if(.., |router_id, route| {
                partial.inter_router.contains(router_id)
                    && route.path_type == PathType::InterArea
            });

            update_rib_inter_area_routers(
                Some(&partial.inter_router),
                area,
                instance,
                lsa_entries,
            );
        }
    }

    if !partial.inter_router.is_empty() || !partial.external.is_empty() {
        // A Type-4 change can affect any external route, so everything is
        // reevaluated in that case.
        let reevaluate_all = !partial.inter_router.is_empty();

        old_rib.extend(rib.extract_if(.., |prefix, route| {
            (reevaluate_all || partial.external.contains(prefix))
                && matches!(
                    route.path_type,
                    PathType::Type1External | PathType::Type2External
                )
        }));

        let filter = match reevaluate_all {
            true => None,
            false => Some(&partial.external),
        };
        update_rib_external(
            &mut partial_rib,
            filter,
            instance,
            areas,
            lsa_entries,
        );
    }

    // Push the resulting changes down to the global RIB.
    update_global_rib(&mut partial_rib, old_rib, instance, interfaces);

    rib.extend(partial_rib);
    instance.state.rib = rib;
}

// ===== helper functions =====

fn active_area_count<V>(
    areas: &Arena<Area<V>>,
    interfaces: &Arena<Interface<V>>,
) -> usize
where
    V: Version,
{
    areas
        .iter()
        .filter(|(_, area)| area.is_active(interfaces))
        .count()
}

// Intra-area routes: one per stub network (or prefix) attached to a
// vertex of the shortest-path tree.
fn update_rib_intra_area<V>(
    rib: &mut BTreeMap<V::IpNetwork, RouteNet<V>>,
    filter: Option<&BTreeSet<V::IpNetwork>>,
    area: &Area<V>,
    instance: &mut InstanceUpView<'_, V>,
    lsa_entries: &Arena<LsaEntry<V>>,
) where
    V: Version,
{
    for stub in V::intra_area_networks(area, lsa_entries)
        .filter(|stub| filter.is_none_or(|f| f.contains(&stub.prefix)))
    {
        let metric = stub.vertex.distance.saturating_add(stub.metric) as u32;

        // A cheaper path to this network is already known.
        if let Some(best_route) = rib.get(&stub.prefix)
            && metric > best_route.metric
        {
            continue;
        }

        let origin = stub.vertex.lsa.origin();

        // Multiple network vertices can map to the same IP network while a
        // new Designated Router establishes itself. The existing entry is
        // overwritten only by an equally short path whose Link State
        // Origin has the larger Link State ID.
        if !stub.vertex.lsa.is_router()
            && let btree_map::Entry::Occupied(o) = rib.entry(stub.prefix)
        {
            let curr_route = o.get();
            if metric > curr_route.metric
                || origin.lsa_id < curr_route.origin.unwrap().lsa_id
            {
                continue;
            }
            o.remove();
        }

        let mut flags = RouteNetFlags::empty();
        if stub.vertex.hops == 0 {
            flags.insert(RouteNetFlags::CONNECTED);
        }
        let new_route = RouteNet {
            prefix_options: stub.prefix_options,
            area_id: Some(area.id),
            path_type: PathType::IntraArea,
            origin: Some(origin),
            metric,
            type2_metric: None,
            tag: None,
            policy_tags: Default::default(),
            nexthops: stub.vertex.nexthops.clone(),
            flags,
        };

        route_update(rib, stub.prefix, new_route, instance.config);
    }
}

// Inter-area network routes (RFC 2328 section 16.2): the path cost is the
// distance to the advertising border router plus the advertised cost.
fn update_rib_inter_area_networks<V>(
    rib: &mut BTreeMap<V::IpNetwork, RouteNet<V>>,
    filter: Option<&BTreeSet<V::IpNetwork>>,
    area: &Area<V>,
    instance: &mut InstanceUpView<'_, V>,
    lsa_entries: &Arena<LsaEntry<V>>,
) where
    V: Version,
{
    let router_id = instance.state.router_id;
    for lsa in V::inter_area_networks(area, lsa_entries)
        .filter(|lsa| lsa.metric < LSA_INFINITY)
        .filter(|lsa| lsa.adv_rtr != router_id)
        .filter(|lsa| filter.is_none_or(|f| f.contains(&lsa.prefix)))
    {
        let Some(route_br) = area
            .state
            .routers
            .get(&lsa.adv_rtr)
            .filter(|route| route.flags.is_abr())
        else {
            debug::summary_net_unreachable::<V>(&lsa.prefix, lsa.adv_rtr);
            continue;
        };

        let new_route = RouteNet {
            prefix_options: lsa.prefix_options,
            area_id: Some(area.id),
            path_type: PathType::InterArea,
            origin: None,
            metric: route_br.metric + lsa.metric,
            type2_metric: None,
            tag: None,
            policy_tags: Default::default(),
            nexthops: route_br.nexthops.clone(),
            flags: RouteNetFlags::empty(),
        };

        route_update(rib, lsa.prefix, new_route, instance.config);
    }
}

// Inter-area router routes, feeding the area's router table rather than
// the network RIB.
fn update_rib_inter_area_routers<V>(
    filter: Option<&BTreeSet<Ipv4Addr>>,
    area: &mut Area<V>,
    instance: &mut InstanceUpView<'_, V>,
    lsa_entries: &Arena<LsaEntry<V>>,
) where
    V: Version,
{
    let router_id = instance.state.router_id;
    for lsa in V::inter_area_routers(&area.state.lsdb, lsa_entries)
        .filter(|lsa| lsa.metric < LSA_INFINITY)
        .filter(|lsa| lsa.adv_rtr != router_id)
        .filter(|lsa| filter.is_none_or(|f| f.contains(&lsa.router_id)))
        .collect::<Vec<_>>()
    {
        let Some(route_br) = area
            .state
            .routers
            .get(&lsa.adv_rtr)
            .filter(|route| route.flags.is_abr())
        else {
            debug::summary_rtr_unreachable(lsa.router_id, lsa.adv_rtr);
            continue;
        };

        let new_route = RouteRtr::<V> {
            area_id: area.id,
            path_type: PathType::InterArea,
            options: lsa.options,
            flags: lsa.flags,
            metric: route_br.metric + lsa.metric,
            nexthops: route_br.nexthops.clone(),
        };
        area.state.routers.insert(lsa.router_id, new_route);
    }
}

// AS external routes, from both Type-5 LSAs and NSSA Type-7 LSAs
// (RFC 2328 section 16.4, RFC 3101 section 2.5).
fn update_rib_external<V>(
    rib: &mut BTreeMap<V::IpNetwork, RouteNet<V>>,
    filter: Option<&BTreeSet<V::IpNetwork>>,
    instance: &mut InstanceUpView<'_, V>,
    areas: &Arena<Area<V>>,
    lsa_entries: &Arena<LsaEntry<V>>,
) where
    V: Version,
{
    let externals = V::external_networks(&instance.state.lsdb, lsa_entries)
        .map(|lsa| (lsa, false))
        .collect::<Vec<_>>();
    let nssa_externals = areas
        .iter()
        .filter(|(_, area)| area.config.area_type == AreaType::Nssa)
        .flat_map(|(_, area)| V::nssa_externals(area, lsa_entries))
        .map(|lsa| (lsa, true))
        .collect::<Vec<_>>();

    let router_id = instance.state.router_id;
    for (lsa, type7) in externals
        .into_iter()
        .chain(nssa_externals)
        .filter(|(lsa, _)| lsa.metric < LSA_INFINITY)
        .filter(|(lsa, _)| lsa.adv_rtr != router_id)
        .filter(|(lsa, _)| filter.is_none_or(|f| f.contains(&lsa.prefix)))
    {
        // The originating ASBR may be reachable through several areas.
        let mut asbr_routes = areas
            .iter()
            .filter_map(|(_, area)| {
                area.state
                    .routers
                    .get(&lsa.adv_rtr)
                    .filter(|route| route.flags.is_asbr())
            })
            .collect::<Vec<_>>();

        // Unless RFC 1583 compatibility is enabled, intra-area paths
        // through non-backbone areas beat everything else.
        if !instance.config.rfc1583_compat {
            let preferred = asbr_routes
                .iter()
                .copied()
                .filter(|route| {
                    route.path_type == PathType::IntraArea
                        && route.area_id != Ipv4Addr::UNSPECIFIED
                })
                .collect::<Vec<_>>();
            if !preferred.is_empty() {
                asbr_routes = preferred;
            }
        }

        // Least cost wins; among equals, the largest attached area ID.
        let Some(route_asbr) = asbr_routes
            .into_iter()
            .min_by_key(|route| (route.metric, Reverse(route.area_id)))
        else {
            debug::external_unreachable_asbr::<V>(&lsa.prefix, lsa.adv_rtr);
            continue;
        };

        let (path_type, metric, type2_metric) = match lsa.e_bit {
            true => {
                (PathType::Type2External, route_asbr.metric, Some(lsa.metric))
            }
            false => (
                PathType::Type1External,
                route_asbr.metric + lsa.metric,
                None,
            ),
        };

        let mut flags = RouteNetFlags::empty();
        if type7 {
            flags.insert(RouteNetFlags::TYPE7);
        }
        let new_route = RouteNet {
            prefix_options: lsa.prefix_options,
            area_id: None,
            path_type,
            origin: None,
            metric,
            type2_metric,
            tag: lsa.tag,
            policy_tags: Default::default(),
            nexthops: route_asbr.nexthops.clone(),
            flags,
        };

        route_update(rib, lsa.prefix, new_route, instance.config);
    }
}

// Pushes the changed entries down to the host RIB. Running at the end of
// the routing table calculation keeps transient states away from the
// forwarding plane.
fn update_global_rib<V>(
    rib: &mut BTreeMap<V::IpNetwork, RouteNet<V>>,
    mut old_rib: BTreeMap<V::IpNetwork, RouteNet<V>>,
    instance: &mut InstanceUpView<'_, V>,
    interfaces: &Arena<Interface<V>>,
) where
    V: Version,
{
    // Install new routes or routes that have changed.
    for (prefix, route) in rib {
        if let Some(old_route) = old_rib.remove(prefix) {
            // Nothing the forwarding plane cares about changed.
            if old_route.metric() == route.metric()
                && old_route.tag == route.tag
                && old_route.policy_tags == route.policy_tags
                && old_route.nexthops == route.nexthops
            {
                if old_route.flags.contains(RouteNetFlags::INSTALLED) {
                    route.flags.insert(RouteNetFlags::INSTALLED);
                }
                continue;
            }
        }

        // The list of nexthops can come out empty after nexthop
        // computation errors (e.g. missing Link-LSAs); such a route must
        // leave the RIB.
        if !route.flags.contains(RouteNetFlags::CONNECTED)
            && !route.nexthops.is_empty()
        {
            let distance = route.distance(instance.config);
            southbound::tx::route_install(
                &instance.tx.rib,
                prefix,
                route,
                distance,
                interfaces,
            );
            route.flags.insert(RouteNetFlags::INSTALLED);
        } else if route.flags.contains(RouteNetFlags::INSTALLED) {
            southbound::tx::route_uninstall::<V>(&instance.tx.rib, prefix);
            route.flags.remove(RouteNetFlags::INSTALLED);
        }
    }

    // Uninstall routes that are no longer available.
    for (dest, _) in old_rib
        .into_iter()
        .filter(|(_, route)| route.flags.contains(RouteNetFlags::INSTALLED))
    {
        southbound::tx::route_uninstall::<V>(&instance.tx.rib, &dest);
    }
}

fn route_update<V>(
    rib: &mut BTreeMap<V::IpNetwork, RouteNet<V>>,
    prefix: V::IpNetwork,
    route: RouteNet<V>,
    config: &InstanceCfg,
) where
    V: Version,
{
    let route = match rib.entry(prefix) {
        btree_map::Entry::Occupied(o) => {
            let curr_route = o.into_mut();

            match route_compare(&route, curr_route) {
                Ordering::Less => {
                    // The new route supplants the entry; whether the entry
                    // is installed in the forwarding plane carries over.
                    let installed =
                        curr_route.flags.contains(RouteNetFlags::INSTALLED);
                    *curr_route = route;
                    if installed {
                        curr_route.flags.insert(RouteNetFlags::INSTALLED);
                    }
                }
                Ordering::Equal => {
                    // Equal-cost paths merge their nexthops.
                    curr_route.nexthops.extend(route.nexthops);
                }
                Ordering::Greater => (),
            }

            curr_route
        }
        btree_map::Entry::Vacant(v) => v.insert(route),
    };

    // Honor configured maximum number of ECMP paths.
    let max_paths = config.max_paths as usize;
    if route.nexthops.len() > max_paths {
        route.nexthops = route
            .nexthops
            .iter()
            .map(|(k, v)| (*k, *v))
            .take(max_paths)
            .collect();
    }
}

// Compares two routes for the same destination within RFC 2328's
// preference rules. `Less` means `a` is preferred.
fn route_compare<V>(a: &RouteNet<V>, b: &RouteNet<V>) -> Ordering
where
    V: Version,
{
    a.path_type.cmp(&b.path_type).then_with(|| match a.path_type {
        PathType::IntraArea | PathType::InterArea => a.metric.cmp(&b.metric),
        PathType::Type1External => {
            // Among equal costs, Type-5 paths beat Type-7 paths.
            a.metric.cmp(&b.metric).then_with(|| type7_compare(a, b))
        }
        PathType::Type2External => a
            .type2_metric
            .cmp(&b.type2_metric)
            .then_with(|| a.metric.cmp(&b.metric))
            .then_with(|| type7_compare(a, b)),
    })
}

fn type7_compare<V>(a: &RouteNet<V>, b: &RouteNet<V>) -> Ordering
where
    V: Version,
{
    let a_type7 = a.flags.contains(RouteNetFlags::TYPE7);
    let b_type7 = b.flags.contains(RouteNetFlags::TYPE7);
    a_type7.cmp(&b_type7)
}
