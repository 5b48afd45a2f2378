//
// Copyright (c) The Ospfd Project Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::{IpAddr, Ipv4Addr};

use ipnetwork::Ipv4Network;
use ospfd_utils::ip::IpNetworkKind;
use ospfd_utils::policy::{ExternalMetricType, ExternalRoute};

use crate::area::{self, Area, AreaType, AreaVersion, OptionsLocation};
use crate::collections::{AreaIndex, Arena, InterfaceIndex};
use crate::error::Error;
use crate::instance::{InstanceArenas, InstanceUpView};
use crate::interface::{Interface, InterfaceType, ism};
use crate::lsdb::{
    self, LsaFlushReason, LsaOriginateEvent, LsdbKey, LsdbRef, LsdbVersion,
};
use crate::neighbor::{Neighbor, nsm};
use crate::ospfv2::packet::Options;
use crate::ospfv2::packet::lsa::{
    LsaAsExternal, LsaAsExternalFlags, LsaBody, LsaNetwork, LsaRouter,
    LsaRouterFlags, LsaRouterLink, LsaRouterLinkType, LsaSummary, LsaType,
    LsaTypeCode,
};
use crate::packet::lsa::{Lsa, LsaHdrVersion, LsaKey, LsaScope, LsaTypeVersion};
use crate::route::{SummaryNet, SummaryRtr};
use crate::spf::SpfExternalNetwork;
use crate::version::Ospfv2;

// ===== impl Ospfv2 =====

impl LsdbVersion<Self> for Ospfv2 {
    fn lsa_type_is_valid(
        area_type: Option<AreaType>,
        _nbr_options: Option<Options>,
        lsa_type: LsaType,
    ) -> bool {
        // Unknown types are rejected outright: OSPFv2 provides no scope
        // information to flood them by.
        let Some(type_code) = lsa_type.type_code() else {
            return false;
        };

        match area_type {
            // Type-7 LSAs exist only inside NSSA areas.
            Some(AreaType::Normal) => {
                type_code != LsaTypeCode::NssaAsExternal
            }
            // Stub areas carry no external information at all, Type-4
            // summaries included (errata 3746 of RFC 2328).
            Some(AreaType::Stub) => !matches!(
                type_code,
                LsaTypeCode::SummaryRouter
                    | LsaTypeCode::AsExternal
                    | LsaTypeCode::NssaAsExternal
            ),
            // NSSA areas carry Type-7 LSAs instead of Type-5.
            Some(AreaType::Nssa) => !matches!(
                type_code,
                LsaTypeCode::SummaryRouter | LsaTypeCode::AsExternal
            ),
            None => true,
        }
    }

    fn lsa_is_self_originated(
        lsa: &Lsa<Self>,
        router_id: Ipv4Addr,
        interfaces: &Arena<Interface<Self>>,
    ) -> bool {
        // Our own advertising router, or a Network-LSA whose Link State ID
        // is one of our interface addresses (left over from before a
        // Router ID change).
        lsa.hdr.adv_rtr == router_id
            || (lsa.hdr.lsa_type.type_code() == Some(LsaTypeCode::Network)
                && interfaces
                    .iter()
                    .filter_map(|(_, iface)| iface.system.primary_addr)
                    .any(|addr| lsa.hdr.lsa_id == addr.ip()))
    }

    fn lsa_orig_event(
        instance: &InstanceUpView<'_, Self>,
        arenas: &InstanceArenas<Self>,
        event: LsaOriginateEvent<Self>,
    ) -> Result<(), Error<Self>> {
        match event {
            LsaOriginateEvent::AreaStart { area_id } => {
                let area_idx = arenas.area_idx(area_id)?;
                lsa_orig_router(&arenas.areas[area_idx], instance, arenas);
            }
            LsaOriginateEvent::InterfaceStateChange { .. } => {
                // The ABR status may have changed, which shows in the
                // Router-LSA of every area.
                for (_, area) in arenas.areas.iter() {
                    lsa_orig_router(area, instance, arenas);
                }
            }
            LsaOriginateEvent::InterfaceDrChange { area_id, ifname }
            | LsaOriginateEvent::NeighborToFromFull { area_id, ifname } => {
                let area_idx = arenas.area_idx(area_id)?;
                let area = &arenas.areas[area_idx];
                lsa_orig_router(area, instance, arenas);

                // The Network-LSA for the attached network exists exactly
                // while this router is the DR with at least one full
                // adjacency.
                let iface_idx = area.iface_idx(&ifname)?;
                let iface = &arenas.interfaces[iface_idx];
                if iface.state.ism_state == ism::State::Dr
                    && any_full_neighbor(iface, &arenas.neighbors)
                {
                    lsa_orig_network(iface, area, instance, arenas);
                } else {
                    lsa_flush_network(iface, area, instance, arenas);
                }
            }
            LsaOriginateEvent::InterfaceAddrAddDel { area_id, .. }
            | LsaOriginateEvent::InterfaceCostChange { area_id } => {
                let area_idx = arenas.area_idx(area_id)?;
                lsa_orig_router(&arenas.areas[area_idx], instance, arenas);
            }
            LsaOriginateEvent::SelfOriginatedLsaRcvd { lsdb_key, lsa_key } => {
                process_self_originated_lsa(
                    instance, arenas, lsdb_key, lsa_key,
                )?;
            }
            // OSPFv3-only events.
            LsaOriginateEvent::NeighborInterfaceIdChange { .. }
            | LsaOriginateEvent::LinkLsaRcvd { .. } => (),
        };

        Ok(())
    }

    fn lsa_orig_inter_area_network(
        area: &mut Area<Self>,
        instance: &InstanceUpView<'_, Self>,
        prefix: Ipv4Network,
        _lsa_id: Option<Ipv4Addr>,
        summary: &SummaryNet<Self>,
    ) -> Ipv4Addr {
        let options = Self::area_options(area, OptionsLocation::Lsa);
        let lsa_id = prefix.ip();

        let lsa_body = LsaBody::SummaryNetwork(LsaSummary {
            mask: prefix.mask(),
            metric: summary.metric,
        });
        instance.tx.protocol_input.lsa_orig_check(
            LsdbKey::Area(area.id),
            Some(options),
            lsa_id,
            lsa_body,
        );

        lsa_id
    }

    fn lsa_orig_inter_area_router(
        area: &mut Area<Self>,
        instance: &InstanceUpView<'_, Self>,
        router_id: Ipv4Addr,
        _lsa_id: Option<Ipv4Addr>,
        summary: &SummaryRtr<Self>,
    ) -> Ipv4Addr {
        let lsa_id = router_id;

        // The mask field is meaningless for router summaries and is sent
        // as zero.
        let lsa_body = LsaBody::SummaryRouter(LsaSummary {
            mask: Ipv4Addr::UNSPECIFIED,
            metric: summary.metric,
        });
        instance.tx.protocol_input.lsa_orig_check(
            LsdbKey::Area(area.id),
            Some(summary.options),
            lsa_id,
            lsa_body,
        );

        lsa_id
    }

    fn lsa_orig_external(
        instance: &mut InstanceUpView<'_, Self>,
        arenas: &InstanceArenas<Self>,
        prefix: Ipv4Network,
        route: &ExternalRoute,
    ) {
        let lsa_id = prefix.ip();
        let fwd_addr = route.nexthop.and_then(|addr| match addr {
            IpAddr::V4(addr) => Some(addr),
            IpAddr::V6(_) => None,
        });
        let mut flags = LsaAsExternalFlags::empty();
        if route.metric_type == ExternalMetricType::Type2 {
            flags.insert(LsaAsExternalFlags::E);
        }
        let body = LsaAsExternal {
            mask: prefix.mask(),
            flags,
            metric: route.metric,
            fwd_addr,
            tag: route.tag.unwrap_or(0),
        };

        // The AS-scope Type-5 LSA.
        instance.tx.protocol_input.lsa_orig_check(
            LsdbKey::As,
            Some(Options::E),
            lsa_id,
            LsaBody::AsExternal(body.clone()),
        );

        // A Type-7 LSA into each NSSA area, requesting border translation
        // through the P-bit.
        for (_, area) in arenas
            .areas
            .iter()
            .filter(|(_, area)| area.config.area_type == AreaType::Nssa)
        {
            let options = Self::area_options(area, OptionsLocation::Lsa);
            instance.tx.protocol_input.lsa_orig_check(
                LsdbKey::Area(area.id),
                Some(options),
                lsa_id,
                LsaBody::NssaAsExternal(body.clone()),
            );
        }
    }

    fn lsa_flush_external(
        instance: &mut InstanceUpView<'_, Self>,
        arenas: &InstanceArenas<Self>,
        prefix: Ipv4Network,
    ) {
        let adv_rtr = instance.state.router_id;
        let lsa_id = prefix.ip();

        // The Type-5 LSA.
        let lsa_key =
            LsaKey::new(LsaTypeCode::AsExternal.into(), adv_rtr, lsa_id);
        if instance
            .state
            .lsdb
            .get(&arenas.lsa_entries, &lsa_key)
            .is_some()
        {
            instance.tx.protocol_input.lsa_flush(
                LsdbKey::As,
                lsa_key,
                LsaFlushReason::PrematureAging,
            );
        }

        // The Type-7 counterparts.
        for (_, area) in arenas
            .areas
            .iter()
            .filter(|(_, area)| area.config.area_type == AreaType::Nssa)
        {
            let lsa_key = LsaKey::new(
                LsaTypeCode::NssaAsExternal.into(),
                adv_rtr,
                lsa_id,
            );
            if area
                .state
                .lsdb
                .get(&arenas.lsa_entries, &lsa_key)
                .is_some()
            {
                instance.tx.protocol_input.lsa_flush(
                    LsdbKey::Area(area.id),
                    lsa_key,
                    LsaFlushReason::PrematureAging,
                );
            }
        }
    }

    fn lsa_orig_translated_type5(
        instance: &mut InstanceUpView<'_, Self>,
        prefix: Ipv4Network,
        old_lsa_id: Option<Ipv4Addr>,
        ext: &SpfExternalNetwork<Self>,
    ) -> Ipv4Addr {
        let lsa_id = old_lsa_id.unwrap_or_else(|| prefix.ip());
        let mut flags = LsaAsExternalFlags::empty();
        if ext.e_bit {
            flags.insert(LsaAsExternalFlags::E);
        }

        let lsa_body = LsaBody::AsExternal(LsaAsExternal {
            mask: prefix.mask(),
            flags,
            metric: ext.metric,
            fwd_addr: ext.fwd_addr,
            tag: ext.tag.unwrap_or(0),
        });
        instance.tx.protocol_input.lsa_orig_check(
            LsdbKey::As,
            Some(Options::E),
            lsa_id,
            lsa_body,
        );

        lsa_id
    }

    fn external_type() -> LsaType {
        LsaTypeCode::AsExternal.into()
    }

    fn lsdb_ref_by_lsa_type(
        area_idx: AreaIndex,
        _iface_idx: InterfaceIndex,
        lsa_type: LsaType,
    ) -> LsdbRef {
        match lsa_type.scope() {
            LsaScope::Area => LsdbRef::Area(area_idx),
            LsaScope::As => LsdbRef::As,
            // Unknown types never make it past validation.
            LsaScope::Link | LsaScope::Unknown => unreachable!(),
        }
    }

    fn lsdb_install(
        instance: &InstanceUpView<'_, Self>,
        arenas: &mut InstanceArenas<Self>,
        lsdb_ref: LsdbRef,
        lsa: &Lsa<Self>,
    ) {
        // Remember which interface owns each self-originated Network-LSA,
        // so it can still be flushed after the interface address changes.
        if lsa.hdr.lsa_type.type_code() == Some(LsaTypeCode::Network)
            && lsa.hdr.adv_rtr == instance.state.router_id
        {
            let LsdbRef::Area(area_idx) = lsdb_ref else {
                return;
            };
            let area = &arenas.areas[area_idx];
            if let Some(iface_idx) =
                iface_by_addr(area, &arenas.interfaces, lsa.hdr.lsa_id)
            {
                let iface = &mut arenas.interfaces[iface_idx];
                iface.state.network_lsa_self = if lsa.hdr.is_maxage() {
                    None
                } else {
                    Some(lsa.hdr.key())
                };
            }
        }
    }
}

// ===== helper functions =====

fn any_full_neighbor(
    iface: &Interface<Ospfv2>,
    neighbors: &Arena<Neighbor<Ospfv2>>,
) -> bool {
    iface
        .nbr_indexes()
        .any(|nbr_idx| neighbors[nbr_idx].state == nsm::State::Full)
}

fn full_neighbors<'a>(
    iface: &'a Interface<Ospfv2>,
    neighbors: &'a Arena<Neighbor<Ospfv2>>,
) -> impl Iterator<Item = &'a Neighbor<Ospfv2>> + 'a {
    iface
        .nbr_indexes()
        .map(|nbr_idx| &neighbors[nbr_idx])
        .filter(|nbr| nbr.state == nsm::State::Full)
}

fn iface_by_addr(
    area: &Area<Ospfv2>,
    interfaces: &Arena<Interface<Ospfv2>>,
    addr: Ipv4Addr,
) -> Option<InterfaceIndex> {
    area.iface_indexes().find(|iface_idx| {
        interfaces[*iface_idx]
            .system
            .primary_addr
            .is_some_and(|primary| primary.ip() == addr)
    })
}

fn lsa_orig_router(
    area: &Area<Ospfv2>,
    instance: &InstanceUpView<'_, Ospfv2>,
    arenas: &InstanceArenas<Ospfv2>,
) {
    let options = Ospfv2::area_options(area, OptionsLocation::Lsa);

    let mut flags = LsaRouterFlags::empty();
    if area::is_abr(&arenas.areas, &arenas.interfaces) {
        flags.insert(LsaRouterFlags::B);
    }
    if is_asbr(instance) && area.config.area_type != AreaType::Stub {
        flags.insert(LsaRouterFlags::E);
    }
    if area_has_full_vlink(area, arenas) {
        flags.insert(LsaRouterFlags::V);
    }

    // Describe exactly the enabled links of this area at the instant of
    // origination.
    let mut links = vec![];
    for iface in area
        .iface_indexes()
        .map(|iface_idx| &arenas.interfaces[iface_idx])
        .filter(|iface| !iface.is_down())
    {
        links.extend(router_lsa_links(iface, arenas));
    }

    let lsa_body = LsaBody::Router(LsaRouter { flags, links });
    instance.tx.protocol_input.lsa_orig_check(
        LsdbKey::Area(area.id),
        Some(options),
        instance.state.router_id,
        lsa_body,
    );
}

// The Router-LSA links contributed by one interface (RFC 2328 section
// 12.4.1.1 through 12.4.1.4).
fn router_lsa_links(
    iface: &Interface<Ospfv2>,
    arenas: &InstanceArenas<Ospfv2>,
) -> Vec<LsaRouterLink> {
    let mut links = vec![];

    // A looped interface advertises only host routes to its addresses.
    if iface.state.ism_state == ism::State::Loopback {
        links.extend(iface.system.addr_list.iter().map(|addr| {
            LsaRouterLink::new(
                LsaRouterLinkType::StubNetwork,
                addr.ip(),
                Ipv4Addr::BROADCAST,
                0,
            )
        }));
        return links;
    }

    let mut add_stub_links = false;
    match iface.config.if_type {
        InterfaceType::PointToPoint | InterfaceType::PointToMultipoint => {
            // One point-to-point link per fully adjacent neighbor; the
            // link data is the local address, or the ifindex on unnumbered
            // interfaces.
            for nbr in full_neighbors(iface, &arenas.neighbors) {
                let link_data = if iface.system.unnumbered {
                    Ipv4Addr::from(iface.system.ifindex.unwrap())
                } else {
                    iface.system.primary_addr.unwrap().ip()
                };
                links.push(LsaRouterLink::new(
                    LsaRouterLinkType::PointToPoint,
                    nbr.router_id,
                    link_data,
                    iface.config.cost,
                ));
            }

            if !iface.system.unnumbered {
                add_stub_links = true;
            }
        }
        InterfaceType::VirtualLink => {
            for nbr in full_neighbors(iface, &arenas.neighbors) {
                links.push(LsaRouterLink::new(
                    LsaRouterLinkType::VirtualLink,
                    nbr.router_id,
                    iface.state.src_addr.unwrap_or(Ipv4Addr::UNSPECIFIED),
                    iface.config.cost,
                ));
            }
        }
        InterfaceType::Broadcast | InterfaceType::NonBroadcast => {
            // A transit link exists once the network has a functioning DR:
            // either we are it (with at least one full adjacency), or we
            // are fully adjacent to it.
            let dr_full = match iface.state.ism_state {
                ism::State::Dr => {
                    any_full_neighbor(iface, &arenas.neighbors)
                }
                _ => iface
                    .state
                    .dr
                    .and_then(|dr| {
                        let nbr_idx =
                            *iface.state.nbrs_by_src.get(&dr.get())?;
                        Some(&arenas.neighbors[nbr_idx])
                    })
                    .is_some_and(|nbr| nbr.state == nsm::State::Full),
            };
            if iface.state.ism_state != ism::State::Waiting && dr_full {
                links.push(LsaRouterLink::new(
                    LsaRouterLinkType::TransitNetwork,
                    iface.state.dr.unwrap().get(),
                    iface.system.primary_addr.unwrap().ip(),
                    iface.config.cost,
                ));
            } else {
                add_stub_links = true;
            }
        }
    }

    if add_stub_links {
        links.extend(
            iface
                .system
                .addr_list
                .iter()
                .map(|addr| addr.apply_mask())
                .map(|addr| {
                    LsaRouterLink::new(
                        LsaRouterLinkType::StubNetwork,
                        addr.ip(),
                        addr.mask(),
                        iface.config.cost,
                    )
                }),
        );
    }

    links
}

fn lsa_orig_network(
    iface: &Interface<Ospfv2>,
    area: &Area<Ospfv2>,
    instance: &InstanceUpView<'_, Ospfv2>,
    arenas: &InstanceArenas<Ospfv2>,
) {
    let options = Ospfv2::area_options(area, OptionsLocation::Lsa);

    // The Link State ID of a Network-LSA is the IP interface address of
    // the Designated Router.
    let primary_addr = iface.system.primary_addr.unwrap();
    let lsa_id = primary_addr.ip();

    // Attached routers: ourselves plus all fully adjacent neighbors.
    let myself = instance.state.router_id;
    let nbrs =
        full_neighbors(iface, &arenas.neighbors).map(|nbr| nbr.router_id);
    let attached_rtrs = std::iter::once(myself).chain(nbrs).collect();

    let lsa_body = LsaBody::Network(LsaNetwork {
        mask: primary_addr.mask(),
        attached_rtrs,
    });
    instance.tx.protocol_input.lsa_orig_check(
        LsdbKey::Area(area.id),
        Some(options),
        lsa_id,
        lsa_body,
    );
}

fn lsa_flush_network(
    iface: &Interface<Ospfv2>,
    area: &Area<Ospfv2>,
    instance: &InstanceUpView<'_, Ospfv2>,
    arenas: &InstanceArenas<Ospfv2>,
) {
    if let Some(lsa_key) = &iface.state.network_lsa_self
        && area.state.lsdb.get(&arenas.lsa_entries, lsa_key).is_some()
    {
        instance.tx.protocol_input.lsa_flush(
            LsdbKey::Area(area.id),
            *lsa_key,
            LsaFlushReason::PrematureAging,
        );
    }
}

// Whether this router is an AS boundary router.
fn is_asbr(instance: &InstanceUpView<'_, Ospfv2>) -> bool {
    !instance.state.redistributed.is_empty()
        || instance.config.default_originate
}

// Whether this area serves as the transit area of a fully adjacent
// virtual link.
fn area_has_full_vlink(
    area: &Area<Ospfv2>,
    arenas: &InstanceArenas<Ospfv2>,
) -> bool {
    arenas
        .interfaces
        .iter()
        .filter(|(_, iface)| iface.is_virtual_link())
        .filter(|(_, iface)| {
            iface.config.vlink_transit_area == Some(area.id)
        })
        .any(|(_, iface)| any_full_neighbor(iface, &arenas.neighbors))
}

// A newer instance of one of our own LSAs arrived through flooding
// (RFC 2328 section 13.4): supersede it with a fresh origination, or age
// it out if it no longer describes anything.
fn process_self_originated_lsa(
    instance: &InstanceUpView<'_, Ospfv2>,
    arenas: &InstanceArenas<Ospfv2>,
    lsdb_key: LsdbKey,
    lsa_key: LsaKey<LsaType>,
) -> Result<(), Error<Ospfv2>> {
    let lsdb_ref = lsdb::lsdb_resolve(arenas, &lsdb_key)?;
    let lsdb = lsdb::lsdb_get(
        &instance.state.lsdb,
        &arenas.areas,
        &arenas.interfaces,
        lsdb_ref,
    );
    let (_, lse) = lsdb
        .get(&arenas.lsa_entries, &lsa_key)
        .ok_or(Error::LsaNotFound(lsa_key))?;
    let lsa = &lse.data;

    let mut flush = false;
    match lsa.hdr.lsa_type.type_code() {
        Some(LsaTypeCode::Router) => {
            let LsdbRef::Area(area_idx) = lsdb_ref else {
                unreachable!();
            };
            lsa_orig_router(&arenas.areas[area_idx], instance, arenas);
        }
        Some(LsaTypeCode::Network) => {
            let LsdbRef::Area(area_idx) = lsdb_ref else {
                unreachable!();
            };
            let area = &arenas.areas[area_idx];

            // Reoriginate only while still the DR for that network under
            // the same Router ID.
            let iface = iface_by_addr(area, &arenas.interfaces, lsa.hdr.lsa_id)
                .map(|iface_idx| &arenas.interfaces[iface_idx])
                .filter(|iface| iface.state.ism_state == ism::State::Dr)
                .filter(|_| lsa.hdr.adv_rtr == instance.state.router_id);
            match iface {
                Some(iface) => {
                    lsa_orig_network(iface, area, instance, arenas)
                }
                None => flush = true,
            }
        }
        Some(LsaTypeCode::SummaryNetwork | LsaTypeCode::SummaryRouter) => {
            // Reoriginated or flushed once SPF runs and the routing table
            // is recomputed.
        }
        Some(LsaTypeCode::AsExternal | LsaTypeCode::NssaAsExternal) => {
            // Flush unless the route is still being redistributed; in that
            // case the redistribution logic reissues the LSA.
            let prefix = lsa.body.as_external().map(|body| {
                Ipv4Network::with_netmask(lsa.hdr.lsa_id, body.mask)
                    .unwrap_or_else(|_| {
                        Ipv4Network::new(lsa.hdr.lsa_id, 32).unwrap()
                    })
            });
            flush = !prefix.is_some_and(|prefix| {
                instance.state.redistributed.contains_key(&prefix)
            });
        }
        None => {
            // Unknown self-originated types are rejected before reaching
            // this point.
            flush = true;
        }
    }

    if flush {
        instance.tx.protocol_input.lsa_flush(
            lsdb_key,
            lsa_key,
            LsaFlushReason::PrematureAging,
        );
    }

    Ok(())
}
