//
// Copyright (c) The Ospfd Project Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::{BTreeMap, HashMap};
use std::net::Ipv4Addr;

use chrono::{DateTime, Utc};
use ospfd_utils::ip::IpNetworkKind;

use crate::collections::{AreaIndex, Arena, InterfaceIndex};
use crate::config::{AreaCfg, RangeCfg};
use crate::error::Error;
use crate::instance::{InstanceArenas, InstanceUpView};
use crate::interface::Interface;
use crate::lsdb::{
    LSA_INFINITY, LsaEntry, LsaEntryFlags, LsaFlushReason, Lsdb, LsdbKey,
};
use crate::packet::PacketType;
use crate::packet::lsa::{LsaHdrVersion, LsaKey, LsaRouterFlagsVersion};
use crate::route::{
    Nexthops, PathType, RouteNetFlags, RouteRtr, SummaryNet, SummaryNetFlags,
    SummaryRtr,
};
use crate::spf::{SpfExternalNetwork, Vertex};
use crate::version::Version;

// An OSPF area, keyed by its 32-bit area ID.
#[derive(Debug)]
pub struct Area<V: Version> {
    pub id: Ipv4Addr,
    pub config: AreaCfg,
    pub state: AreaState<V>,
    // Configured address ranges.
    pub ranges: HashMap<V::IpNetwork, Range>,
    // Interfaces attached to this area, by name.
    ifaces: BTreeMap<String, InterfaceIndex>,
}

#[derive(Debug)]
pub struct AreaState<V: Version> {
    // Area-scope LSAs.
    pub lsdb: Lsdb<V>,
    // Whether the area can carry traffic that neither originates nor
    // terminates in the area itself.
    pub transit_capability: bool,
    // Shortest-path tree.
    pub spt: BTreeMap<V::VertexId, Vertex<V>>,
    // Table of all routers in the area.
    pub routers: BTreeMap<Ipv4Addr, RouteRtr<V>>,
    // Summaries originated into this area, with their Link State IDs.
    pub net_summaries: BTreeMap<V::IpNetwork, (Ipv4Addr, SummaryNet<V>)>,
    pub rtr_summaries: BTreeMap<Ipv4Addr, (Ipv4Addr, SummaryRtr<V>)>,
    // NSSA Type-7 LSAs translated into Type-5 LSAs at this area's border.
    pub type7_translated: BTreeMap<V::IpNetwork, Ipv4Addr>,
    // Statistics.
    pub spf_run_count: u32,
    pub discontinuity_time: DateTime<Utc>,
    // OSPF version-specific data.
    pub version: V::State,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AreaType {
    Normal,
    Stub,
    Nssa,
}

// A configured address range.
#[derive(Debug, Default)]
pub struct Range {
    pub config: RangeCfg,
    // Maximum cost among the intra-area components, zero when inactive.
    pub cost: u32,
}

// Where an Options field is being filled in. The exact bits depend on
// whether they go into a packet or an LSA.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum OptionsLocation {
    Packet { pkt_type: PacketType, auth: bool },
    Lsa,
}

// OSPF version-specific code.
pub trait AreaVersion<V: Version> {
    // Version-specific area state data.
    type State: Send + Sync + Default + std::fmt::Debug;

    // The options to use in packets sent into this area and in LSAs
    // originated into it.
    fn area_options(
        area: &Area<V>,
        location: OptionsLocation,
    ) -> V::PacketOptions;

    // The local address a virtual link should use, taken from the
    // interface leading to the virtual link endpoint.
    fn vlink_source_addr(
        route_br: &RouteRtr<V>,
        interfaces: &Arena<Interface<V>>,
    ) -> Option<V::NetIpAddr>;

    // The address of the virtual link endpoint, derived from its LSAs in
    // the transit area.
    fn vlink_neighbor_addr(
        area: &Area<V>,
        router_id: Ipv4Addr,
        lsa_entries: &Arena<LsaEntry<V>>,
    ) -> Option<V::NetIpAddr>;
}

// ===== impl Area =====

impl<V> Area<V>
where
    V: Version,
{
    pub(crate) fn new(id: Ipv4Addr) -> Self {
        Self {
            id,
            config: Default::default(),
            state: AreaState::new(id),
            ranges: Default::default(),
            ifaces: Default::default(),
        }
    }

    // ===== interface bookkeeping =====

    pub(crate) fn iface_idx(
        &self,
        ifname: &str,
    ) -> Result<InterfaceIndex, Error<V>> {
        self.ifaces
            .get(ifname)
            .copied()
            .ok_or_else(|| Error::InterfaceNotFound(ifname.to_owned()))
    }

    pub(crate) fn iface_indexes(
        &self,
    ) -> impl Iterator<Item = InterfaceIndex> + '_ {
        self.ifaces.values().copied()
    }

    pub(crate) fn iface_names(&self) -> impl Iterator<Item = &String> + '_ {
        self.ifaces.keys()
    }

    pub(crate) fn iface_attach(
        &mut self,
        interfaces: &mut Arena<Interface<V>>,
        iface: Interface<V>,
    ) -> InterfaceIndex {
        let ifname = iface.name.clone();
        let iface_idx = interfaces.insert(iface);
        self.ifaces.insert(ifname, iface_idx);
        iface_idx
    }

    pub(crate) fn iface_detach(
        &mut self,
        interfaces: &mut Arena<Interface<V>>,
        ifname: &str,
    ) -> Option<Interface<V>> {
        let iface_idx = self.ifaces.remove(ifname)?;
        interfaces.remove(iface_idx)
    }

    // Discards all protocol state, keeping the configuration.
    pub(crate) fn reset_state(&mut self) {
        self.state = AreaState::new(self.id);
    }

    // An area is active as long as it contains at least one operational
    // interface.
    pub(crate) fn is_active(&self, interfaces: &Arena<Interface<V>>) -> bool {
        self.iface_indexes()
            .any(|iface_idx| !interfaces[iface_idx].is_down())
    }

    pub(crate) fn is_backbone(&self) -> bool {
        self.id == Ipv4Addr::UNSPECIFIED
    }
}

// ===== impl OptionsLocation =====

impl OptionsLocation {
    pub(crate) fn new_packet(pkt_type: PacketType, auth: bool) -> Self {
        OptionsLocation::Packet { pkt_type, auth }
    }
}

// ===== impl AreaState =====

impl<V> AreaState<V>
where
    V: Version,
{
    fn new(area_id: Ipv4Addr) -> AreaState<V> {
        AreaState {
            lsdb: Lsdb::new(LsdbKey::Area(area_id)),
            transit_capability: false,
            spt: Default::default(),
            routers: Default::default(),
            net_summaries: Default::default(),
            rtr_summaries: Default::default(),
            type7_translated: Default::default(),
            spf_run_count: 0,
            discontinuity_time: Utc::now(),
            version: Default::default(),
        }
    }
}

// ===== global functions =====

// A router is an area border router while it has interfaces up in more
// than one area.
pub(crate) fn is_abr<V>(
    areas: &Arena<Area<V>>,
    interfaces: &Arena<Interface<V>>,
) -> bool
where
    V: Version,
{
    areas
        .iter()
        .filter(|(_, area)| area.is_active(interfaces))
        .count()
        > 1
}

// Reevaluates all inter-area summaries after a routing table update,
// (re)originating and flushing Summary-LSAs as required.
pub(crate) fn update_summary_lsas<V>(
    instance: &mut InstanceUpView<'_, V>,
    areas: &mut Arena<Area<V>>,
    interfaces: &Arena<Interface<V>>,
    lsa_entries: &Arena<LsaEntry<V>>,
) where
    V: Version,
{
    let is_abr = is_abr(areas, interfaces);

    // Clear the summarized flag from all routes.
    for route in instance.state.rib.values_mut() {
        route.flags.remove(RouteNetFlags::SUMMARIZED);
    }

    // Check which routes fall under a configured range and which ranges
    // are active.
    for (_, area) in areas.iter_mut() {
        update_net_ranges(area, is_abr, instance);
    }

    let area_indexes = areas.iter().map(|(idx, _)| idx).collect::<Vec<_>>();
    for area_idx in area_indexes {
        update_net_summary_lsas(area_idx, is_abr, instance, areas, lsa_entries);
        update_rtr_summary_lsas(area_idx, is_abr, instance, areas, lsa_entries);
    }
}

fn update_net_ranges<V>(
    area: &mut Area<V>,
    is_abr: bool,
    instance: &mut InstanceUpView<'_, V>,
) where
    V: Version,
{
    for range in area.ranges.values_mut() {
        range.cost = 0;
    }

    // Area ranges only matter on an ABR.
    if !is_abr {
        return;
    }

    for (prefix, route) in instance
        .state
        .rib
        .iter_mut()
        // Select intra-area routes from this area.
        .filter(|(_, route)| route.path_type == PathType::IntraArea)
        .filter(|(_, route)| route.area_id == Some(area.id))
        // Skip unreachable destinations.
        .filter(|(_, route)| route.metric < LSA_INFINITY)
    {
        // A network contained in a configured range is advertised through
        // the range instead; the range cost is the maximum cost among its
        // components (RFC 2328 section 12.4.3).
        if let Some((_, range)) = area
            .ranges
            .iter_mut()
            .find(|(range_prefix, _)| range_prefix.is_supernet_of(*prefix))
        {
            route.flags.insert(RouteNetFlags::SUMMARIZED);

            if route.metric > range.cost {
                range.cost = route.metric;
            }
        }
    }
}

fn update_net_summary_lsas<V>(
    area_idx: AreaIndex,
    is_abr: bool,
    instance: &InstanceUpView<'_, V>,
    areas: &mut Arena<Area<V>>,
    lsa_entries: &Arena<LsaEntry<V>>,
) where
    V: Version,
{
    let area = &areas[area_idx];
    let new_summaries = compute_net_summaries(is_abr, area, instance, areas);

    let area = &mut areas[area_idx];
    let mut old_summaries = std::mem::take(&mut area.state.net_summaries);

    // (Re)originate the required Summary-LSAs, reusing the previous Link
    // State ID when a summary merely changed.
    area.state.net_summaries = new_summaries
        .into_iter()
        .map(|(prefix, new_summary)| {
            let lsa_id = match old_summaries.remove(&prefix) {
                Some((old_lsa_id, old_summary)) => {
                    if new_summary != old_summary {
                        V::lsa_orig_inter_area_network(
                            area,
                            instance,
                            prefix,
                            Some(old_lsa_id),
                            &new_summary,
                        );
                    }
                    old_lsa_id
                }
                None => V::lsa_orig_inter_area_network(
                    area,
                    instance,
                    prefix,
                    None,
                    &new_summary,
                ),
            };

            (prefix, (lsa_id, new_summary))
        })
        .collect();

    let lsa_type = V::inter_area_network_type();
    let lsa_ids = old_summaries.into_values().map(|(lsa_id, _)| lsa_id);
    flush_summary_lsas(lsa_type, lsa_ids, area, instance, lsa_entries);
}

fn update_rtr_summary_lsas<V>(
    area_idx: AreaIndex,
    is_abr: bool,
    instance: &InstanceUpView<'_, V>,
    areas: &mut Arena<Area<V>>,
    lsa_entries: &Arena<LsaEntry<V>>,
) where
    V: Version,
{
    let area = &areas[area_idx];
    let new_summaries = compute_rtr_summaries(is_abr, area, areas);

    let area = &mut areas[area_idx];
    let mut old_summaries = std::mem::take(&mut area.state.rtr_summaries);

    area.state.rtr_summaries = new_summaries
        .into_iter()
        .map(|(router_id, new_summary)| {
            let lsa_id = match old_summaries.remove(&router_id) {
                Some((old_lsa_id, old_summary)) => {
                    if new_summary != old_summary {
                        V::lsa_orig_inter_area_router(
                            area,
                            instance,
                            router_id,
                            Some(old_lsa_id),
                            &new_summary,
                        );
                    }
                    old_lsa_id
                }
                None => V::lsa_orig_inter_area_router(
                    area,
                    instance,
                    router_id,
                    None,
                    &new_summary,
                ),
            };

            (router_id, (lsa_id, new_summary))
        })
        .collect();

    let lsa_type = V::inter_area_router_type();
    let lsa_ids = old_summaries.into_values().map(|(lsa_id, _)| lsa_id);
    flush_summary_lsas(lsa_type, lsa_ids, area, instance, lsa_entries);
}

fn compute_net_summaries<V>(
    is_abr: bool,
    area: &Area<V>,
    instance: &InstanceUpView<'_, V>,
    areas: &Arena<Area<V>>,
) -> Vec<(V::IpNetwork, SummaryNet<V>)>
where
    V: Version,
{
    let mut summaries = vec![];

    // Only ABRs originate summaries.
    if !is_abr {
        return summaries;
    }

    // Regular summaries and ranges, except into totally stub/NSSA areas.
    if area.config.summary {
        summaries.extend(compute_net_regular_summaries(area, instance));
        summaries.extend(compute_net_range_summaries(area, areas));
    }

    // Stub and NSSA areas get a default route instead of external routes.
    if area.config.area_type != AreaType::Normal {
        let prefix = V::IpNetwork::default(instance.state.af);
        let default_summary = SummaryNet {
            prefix_options: Default::default(),
            metric: area.config.default_cost,
            flags: SummaryNetFlags::empty(),
        };
        summaries.push((prefix, default_summary));
    }

    summaries
}

fn compute_net_regular_summaries<'a, V>(
    area: &'a Area<V>,
    instance: &'a InstanceUpView<'_, V>,
) -> impl Iterator<Item = (V::IpNetwork, SummaryNet<V>)> + 'a
where
    V: Version,
{
    instance
        .state
        .rib
        .iter()
        // AS external routes are never advertised in summary-LSAs.
        .filter(|(_, route)| {
            !matches!(
                route.path_type,
                PathType::Type1External | PathType::Type2External
            )
        })
        // Skip unreachable destinations.
        .filter(|(_, route)| route.metric < LSA_INFINITY)
        // Skip route if it's associated with the area itself.
        .filter(|(_, route)| route.area_id != Some(area.id))
        // Only intra-area routes are advertised into the backbone.
        .filter(|(_, route)| {
            route.path_type == PathType::IntraArea || !area.is_backbone()
        })
        // A route whose nexthops point into the area came from the area;
        // advertising it back would be a routing loop (the link state
        // analogue of split horizon).
        .filter(|(_, route)| !nexthops_area_check(&route.nexthops, area))
        // A summarized route is advertised through its range instead, with
        // one exception: the backbone's ranges don't apply to summaries
        // going into transit areas.
        .filter(|(_, route)| {
            if route.area_id == Some(Ipv4Addr::UNSPECIFIED)
                && area.state.transit_capability
            {
                true
            } else {
                !route.flags.contains(RouteNetFlags::SUMMARIZED)
            }
        })
        .map(|(prefix, route)| {
            let mut flags = SummaryNetFlags::empty();
            if route.flags.contains(RouteNetFlags::CONNECTED) {
                flags.insert(SummaryNetFlags::CONNECTED);
            }

            let summary = SummaryNet {
                prefix_options: route.prefix_options,
                metric: route.metric,
                flags,
            };
            (*prefix, summary)
        })
}

fn compute_net_range_summaries<'a, V>(
    area: &'a Area<V>,
    areas: &'a Arena<Area<V>>,
) -> impl Iterator<Item = (V::IpNetwork, SummaryNet<V>)> + 'a
where
    V: Version,
{
    areas
        .iter()
        .map(|(_, other_area)| other_area)
        // Check all other areas.
        .filter(|other_area| other_area.id != area.id)
        // The backbone's configured ranges should be ignored when
        // originating summary-LSAs into transit areas.
        .filter(|other_area| {
            !(other_area.is_backbone() && area.state.transit_capability)
        })
        .flat_map(|other_area| {
            other_area
                .ranges
                .iter()
                // Skip inactive ranges.
                .filter(|(_, range)| range.cost != 0)
                // Skip ranges whose advertisement isn't enabled.
                .filter(|(_, range)| range.config.advertise)
                .map(|(range_prefix, range)| {
                    let summary = SummaryNet {
                        prefix_options: Default::default(),
                        metric: range.config.cost.unwrap_or(range.cost),
                        flags: SummaryNetFlags::empty(),
                    };
                    (*range_prefix, summary)
                })
        })
}

fn compute_rtr_summaries<V>(
    is_abr: bool,
    area: &Area<V>,
    areas: &Arena<Area<V>>,
) -> Vec<(Ipv4Addr, SummaryRtr<V>)>
where
    V: Version,
{
    // Stub and NSSA areas carry no Type-5 LSAs, so ASBR reachability is of
    // no use inside them.
    if !is_abr || area.config.area_type != AreaType::Normal {
        return Vec::new();
    }

    areas
        .iter()
        .map(|(_, area_src)| area_src)
        // Check the routing table from all other areas.
        .filter(|area_src| area_src.id != area.id)
        .flat_map(|area_src| area_src.state.routers.iter())
        // Only ASBR routes are advertised in summary-LSAs.
        .filter(|(_, route)| route.flags.is_asbr())
        // Skip unreachable destinations.
        .filter(|(_, route)| route.metric < LSA_INFINITY)
        // Only intra-area routes are advertised into the backbone.
        .filter(|(_, route)| {
            route.path_type == PathType::IntraArea || !area.is_backbone()
        })
        // Split horizon, as for network summaries.
        .filter(|(_, route)| !nexthops_area_check(&route.nexthops, area))
        .map(|(router_id, route)| {
            let summary = SummaryRtr {
                options: route.options,
                metric: route.metric,
            };
            (*router_id, summary)
        })
        .collect()
}

fn nexthops_area_check<V>(
    nexthops: &Nexthops<V::IpAddr>,
    area: &Area<V>,
) -> bool
where
    V: Version,
{
    nexthops.values().any(|nexthop| {
        area.iface_indexes()
            .any(|iface_idx| nexthop.iface_idx == iface_idx)
    })
}

fn flush_summary_lsas<V>(
    lsa_type: V::LsaType,
    lsa_ids: impl Iterator<Item = Ipv4Addr>,
    area: &Area<V>,
    instance: &InstanceUpView<'_, V>,
    lsa_entries: &Arena<LsaEntry<V>>,
) where
    V: Version,
{
    let lsdb_key = LsdbKey::Area(area.id);
    let adv_rtr = instance.state.router_id;

    // Flush previously originated summaries that are no longer valid.
    for lsa_id in lsa_ids {
        let lsa_key = LsaKey::new(lsa_type, adv_rtr, lsa_id);
        if area.state.lsdb.get(lsa_entries, &lsa_key).is_some() {
            instance.tx.protocol_input.lsa_flush(
                lsdb_key.clone(),
                lsa_key,
                LsaFlushReason::PrematureAging,
            );
        }
    }

    // Flush received self-originated summaries that are no longer valid.
    for (_, lse) in area
        .state
        .lsdb
        .iter_by_type_advrtr(lsa_entries, lsa_type, adv_rtr)
        .filter(|(_, lse)| lse.flags.contains(LsaEntryFlags::RECEIVED))
    {
        instance.tx.protocol_input.lsa_flush(
            lsdb_key.clone(),
            lse.data.hdr.key(),
            LsaFlushReason::PrematureAging,
        );
    }
}

// Translates NSSA Type-7 LSAs into AS-scope Type-5 LSAs (RFC 3101). Runs
// on ABRs after each routing table update.
pub(crate) fn update_nssa_translation<V>(
    instance: &mut InstanceUpView<'_, V>,
    areas: &mut Arena<Area<V>>,
    interfaces: &Arena<Interface<V>>,
    lsa_entries: &Arena<LsaEntry<V>>,
) where
    V: Version,
{
    let is_abr = is_abr(areas, interfaces);
    let router_id = instance.state.router_id;

    let area_indexes = areas.iter().map(|(idx, _)| idx).collect::<Vec<_>>();
    for area_idx in area_indexes {
        let area = &areas[area_idx];
        if area.config.area_type != AreaType::Nssa {
            continue;
        }

        // Collect translatable Type-7 LSAs: the P-bit must be set and the
        // LSA must not be our own.
        let mut new_translations = BTreeMap::new();
        if is_abr {
            for ext in V::nssa_externals(area, lsa_entries)
                .filter(|ext| ext.propagate)
                .filter(|ext| ext.adv_rtr != router_id)
                .filter(|ext| ext.metric < LSA_INFINITY)
            {
                // The best Type-7 per prefix wins (lowest metric).
                new_translations
                    .entry(ext.prefix)
                    .and_modify(|best: &mut SpfExternalNetwork<V>| {
                        if ext.metric < best.metric {
                            *best = ext.clone();
                        }
                    })
                    .or_insert(ext);
            }
        }

        let area = &mut areas[area_idx];
        let mut old_translations =
            std::mem::take(&mut area.state.type7_translated);

        // Originate Type-5 LSAs for new or changed translations.
        area.state.type7_translated = new_translations
            .into_iter()
            .map(|(prefix, ext)| {
                let old_lsa_id = old_translations.remove(&prefix);
                let lsa_id = V::lsa_orig_translated_type5(
                    instance, prefix, old_lsa_id, &ext,
                );
                (prefix, lsa_id)
            })
            .collect();

        // Flush translations that are no longer valid.
        for (_, lsa_id) in old_translations {
            let lsa_key = LsaKey::new(V::external_type(), router_id, lsa_id);
            if instance
                .state
                .lsdb
                .get(lsa_entries, &lsa_key)
                .is_some()
            {
                instance.tx.protocol_input.lsa_flush(
                    LsdbKey::As,
                    lsa_key,
                    LsaFlushReason::PrematureAging,
                );
            }
        }
    }
}

// Resolves the endpoints of configured virtual links from the routing
// table of their transit areas. Runs after each SPF computation.
pub(crate) fn update_virtual_links<V>(
    instance: &InstanceUpView<'_, V>,
    arenas: &mut InstanceArenas<V>,
) where
    V: Version,
{
    let Ok(backbone_idx) = arenas.area_idx(Ipv4Addr::UNSPECIFIED) else {
        return;
    };

    let vlink_indexes = arenas.areas[backbone_idx]
        .iface_indexes()
        .filter(|iface_idx| arenas.interfaces[*iface_idx].is_virtual_link())
        .collect::<Vec<_>>();
    for iface_idx in vlink_indexes {
        let iface = &arenas.interfaces[iface_idx];
        let (Some(remote), Some(transit_area_id)) =
            (iface.config.vlink_remote, iface.config.vlink_transit_area)
        else {
            continue;
        };

        // The transit area must be a regular area with a usable intra-area
        // route to the remote endpoint.
        let endpoints = arenas
            .area_idx(transit_area_id)
            .ok()
            .map(|transit_idx| &arenas.areas[transit_idx])
            .filter(|transit| transit.config.area_type == AreaType::Normal)
            .and_then(|transit| {
                let route_br = transit
                    .state
                    .routers
                    .get(&remote)
                    .filter(|route| route.path_type == PathType::IntraArea)?;
                let src =
                    V::vlink_source_addr(route_br, &arenas.interfaces)?;
                let dst = V::vlink_neighbor_addr(
                    transit,
                    remote,
                    &arenas.lsa_entries,
                )?;
                Some((src, dst))
            });

        let iface = &mut arenas.interfaces[iface_idx];
        let (src_addr, dst_addr) = match endpoints {
            Some((src, dst)) => (Some(src), Some(dst)),
            None => (None, None),
        };
        if iface.state.src_addr == src_addr
            && iface.state.vlink_dst_addr == dst_addr
        {
            continue;
        }
        iface.state.src_addr = src_addr;
        iface.state.vlink_dst_addr = dst_addr;

        // Bring the virtual link up or down accordingly.
        let backbone = &arenas.areas[backbone_idx];
        let iface = &mut arenas.interfaces[iface_idx];
        iface.update(
            backbone,
            instance,
            &mut arenas.neighbors,
            &arenas.lsa_entries,
        );
    }
}
