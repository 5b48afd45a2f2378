//
// Copyright (c) The Ospfd Project Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv4Addr;

use ipnetwork::IpNetwork;
use ospfd_utils::ip::IpNetworkKind;
use ospfd_utils::policy::{ExternalMetricType, ExternalRoute};

use crate::area::{self, Area, AreaType, AreaVersion, OptionsLocation};
use crate::collections::{AreaIndex, Arena, InterfaceIndex};
use crate::error::Error;
use crate::instance::{InstanceArenas, InstanceUpView};
use crate::interface::{Interface, ism};
use crate::lsdb::{
    self, LsaFlushReason, LsaOriginateEvent, LsdbKey, LsdbRef, LsdbVersion,
};
use crate::neighbor::{Neighbor, nsm};
use crate::ospfv3::packet::lsa::{
    LsaAsExternal, LsaAsExternalFlags, LsaBody, LsaFunctionCode,
    LsaInterAreaPrefix, LsaInterAreaRouter, LsaIntraAreaPrefix,
    LsaIntraAreaPrefixEntry, LsaLink, LsaLinkPrefix, LsaNetwork, LsaRouter,
    LsaRouterFlags, LsaRouterLink, LsaRouterLinkType, LsaType, PrefixOptions,
};
use crate::packet::lsa::{Lsa, LsaHdrVersion, LsaKey, LsaScope, LsaTypeVersion};
use crate::route::{SummaryNet, SummaryRtr};
use crate::spf::SpfExternalNetwork;
use crate::version::Ospfv3;

// ===== impl Ospfv3 =====

impl LsdbVersion<Self> for Ospfv3 {
    fn lsa_type_is_valid(
        area_type: Option<AreaType>,
        _nbr_options: Option<crate::ospfv3::packet::Options>,
        lsa_type: LsaType,
    ) -> bool {
        // A reserved flooding scope makes the LSA unusable.
        if lsa_type.scope() == LsaScope::Unknown {
            return false;
        }

        let function_code = lsa_type.function_code();
        match area_type {
            // Type-7 LSAs exist only inside NSSA areas.
            Some(AreaType::Normal) => {
                function_code != Some(LsaFunctionCode::NssaAsExternal)
            }
            // AS-scope LSAs (known or not) don't enter stub areas, and
            // neither do inter-area router summaries.
            Some(AreaType::Stub) => {
                lsa_type.scope() != LsaScope::As
                    && !matches!(
                        function_code,
                        Some(
                            LsaFunctionCode::InterAreaRouter
                                | LsaFunctionCode::NssaAsExternal
                        )
                    )
            }
            // NSSA areas carry Type-7 LSAs instead of AS-scope externals.
            Some(AreaType::Nssa) => {
                lsa_type.scope() != LsaScope::As
                    && function_code != Some(LsaFunctionCode::InterAreaRouter)
            }
            None => true,
        }
    }

    fn lsa_is_self_originated(
        lsa: &Lsa<Self>,
        router_id: Ipv4Addr,
        _interfaces: &Arena<Interface<Self>>,
    ) -> bool {
        // OSPFv3 uses the Advertising Router field alone; Link State IDs
        // carry no addressing semantics.
        lsa.hdr.adv_rtr == router_id
    }

    fn lsa_orig_event(
        instance: &InstanceUpView<'_, Self>,
        arenas: &InstanceArenas<Self>,
        event: LsaOriginateEvent<Self>,
    ) -> Result<(), Error<Self>> {
        match event {
            LsaOriginateEvent::AreaStart { area_id } => {
                let area_idx = arenas.area_idx(area_id)?;
                let area = &arenas.areas[area_idx];
                lsa_orig_router(area, instance, arenas);
                lsa_orig_intra_area_prefix(area, instance, arenas);
            }
            LsaOriginateEvent::InterfaceStateChange { area_id, ifname } => {
                // The ABR status may have changed, which shows in the
                // Router-LSA of every area.
                for (_, area) in arenas.areas.iter() {
                    lsa_orig_router(area, instance, arenas);
                }

                // The interface's Link-LSA and the area's prefix
                // advertisements follow its state.
                let area_idx = arenas.area_idx(area_id)?;
                let area = &arenas.areas[area_idx];
                let iface_idx = area.iface_idx(&ifname)?;
                let iface = &arenas.interfaces[iface_idx];
                if !iface.is_down() && !iface.is_passive() {
                    lsa_orig_link(iface, area, instance);
                }
                lsa_orig_intra_area_prefix(area, instance, arenas);
            }
            LsaOriginateEvent::InterfaceDrChange { area_id, ifname }
            | LsaOriginateEvent::NeighborToFromFull { area_id, ifname } => {
                let area_idx = arenas.area_idx(area_id)?;
                let area = &arenas.areas[area_idx];
                lsa_orig_router(area, instance, arenas);

                let iface_idx = area.iface_idx(&ifname)?;
                let iface = &arenas.interfaces[iface_idx];
                if iface.state.ism_state == ism::State::Dr
                    && any_full_neighbor(iface, &arenas.neighbors)
                {
                    lsa_orig_network(iface, area, instance, arenas);
                } else {
                    lsa_flush_network(iface, area, instance, arenas);
                }
                lsa_orig_intra_area_prefix(area, instance, arenas);
            }
            LsaOriginateEvent::InterfaceAddrAddDel { area_id, ifname } => {
                // The interface addresses feed the Link-LSA and the prefix
                // advertisements, not the Router-LSA.
                let area_idx = arenas.area_idx(area_id)?;
                let area = &arenas.areas[area_idx];
                let iface_idx = area.iface_idx(&ifname)?;
                let iface = &arenas.interfaces[iface_idx];
                if !iface.is_down() && !iface.is_passive() {
                    lsa_orig_link(iface, area, instance);
                }
                lsa_orig_intra_area_prefix(area, instance, arenas);
            }
            LsaOriginateEvent::InterfaceCostChange { area_id } => {
                let area_idx = arenas.area_idx(area_id)?;
                let area = &arenas.areas[area_idx];
                lsa_orig_router(area, instance, arenas);
                lsa_orig_intra_area_prefix(area, instance, arenas);
            }
            LsaOriginateEvent::NeighborInterfaceIdChange { area_id, .. } => {
                // The neighbor's Interface ID is carried in our Router-LSA
                // links.
                let area_idx = arenas.area_idx(area_id)?;
                lsa_orig_router(&arenas.areas[area_idx], instance, arenas);
            }
            LsaOriginateEvent::LinkLsaRcvd { area_id, ifname } => {
                // The DR gathers the prefixes advertised in the Link-LSAs
                // of the attached routers.
                let area_idx = arenas.area_idx(area_id)?;
                let area = &arenas.areas[area_idx];
                let iface_idx = area.iface_idx(&ifname)?;
                if arenas.interfaces[iface_idx].state.ism_state
                    == ism::State::Dr
                {
                    lsa_orig_intra_area_prefix(area, instance, arenas);
                }
            }
            LsaOriginateEvent::SelfOriginatedLsaRcvd { lsdb_key, lsa_key } => {
                process_self_originated_lsa(
                    instance, arenas, lsdb_key, lsa_key,
                )?;
            }
        };

        Ok(())
    }

    fn lsa_orig_inter_area_network(
        area: &mut Area<Self>,
        instance: &InstanceUpView<'_, Self>,
        prefix: IpNetwork,
        lsa_id: Option<Ipv4Addr>,
        summary: &SummaryNet<Self>,
    ) -> Ipv4Addr {
        // OSPFv3 Link State IDs carry no addressing semantics and are
        // allocated sequentially.
        let lsa_id = lsa_id.unwrap_or_else(|| {
            area.state.version.next_summary_lsa_id += 1;
            Ipv4Addr::from(area.state.version.next_summary_lsa_id)
        });

        let lsa_body = LsaBody::InterAreaPrefix(LsaInterAreaPrefix {
            metric: summary.metric,
            prefix_options: summary.prefix_options,
            prefix,
        });
        instance.tx.protocol_input.lsa_orig_check(
            LsdbKey::Area(area.id),
            None,
            lsa_id,
            lsa_body,
        );

        lsa_id
    }

    fn lsa_orig_inter_area_router(
        area: &mut Area<Self>,
        instance: &InstanceUpView<'_, Self>,
        router_id: Ipv4Addr,
        lsa_id: Option<Ipv4Addr>,
        summary: &SummaryRtr<Self>,
    ) -> Ipv4Addr {
        let lsa_id = lsa_id.unwrap_or_else(|| {
            area.state.version.next_summary_lsa_id += 1;
            Ipv4Addr::from(area.state.version.next_summary_lsa_id)
        });

        let lsa_body = LsaBody::InterAreaRouter(LsaInterAreaRouter {
            options: summary.options,
            metric: summary.metric,
            router_id,
        });
        instance.tx.protocol_input.lsa_orig_check(
            LsdbKey::Area(area.id),
            None,
            lsa_id,
            lsa_body,
        );

        lsa_id
    }

    fn lsa_orig_external(
        instance: &mut InstanceUpView<'_, Self>,
        arenas: &InstanceArenas<Self>,
        prefix: IpNetwork,
        route: &ExternalRoute,
    ) {
        let lsa_id = instance.state.ext_lsa_id(prefix);
        let fwd_addr = route.nexthop;
        let mut flags = LsaAsExternalFlags::empty();
        if route.metric_type == ExternalMetricType::Type2 {
            flags.insert(LsaAsExternalFlags::E);
        }
        if fwd_addr.is_some() {
            flags.insert(LsaAsExternalFlags::F);
        }
        if route.tag.is_some() {
            flags.insert(LsaAsExternalFlags::T);
        }
        let body = LsaAsExternal {
            flags,
            metric: route.metric,
            prefix_options: PrefixOptions::empty(),
            prefix,
            fwd_addr,
            tag: route.tag,
            ref_lsa_type: None,
            ref_lsa_id: None,
        };

        // The AS-scope AS-External-LSA.
        instance.tx.protocol_input.lsa_orig_check(
            LsdbKey::As,
            None,
            lsa_id,
            LsaBody::AsExternal(body.clone()),
        );

        // A Type-7 LSA into each NSSA area, requesting border translation
        // through the P-bit in the prefix options.
        for (_, area) in arenas
            .areas
            .iter()
            .filter(|(_, area)| area.config.area_type == AreaType::Nssa)
        {
            let mut body = body.clone();
            body.prefix_options = PrefixOptions::P;
            instance.tx.protocol_input.lsa_orig_check(
                LsdbKey::Area(area.id),
                None,
                lsa_id,
                LsaBody::NssaAsExternal(body),
            );
        }
    }

    fn lsa_flush_external(
        instance: &mut InstanceUpView<'_, Self>,
        arenas: &InstanceArenas<Self>,
        prefix: IpNetwork,
    ) {
        let adv_rtr = instance.state.router_id;
        let Some(lsa_id) = instance.state.ext_lsa_ids.get(&prefix).copied()
        else {
            return;
        };

        // The AS-External-LSA.
        let lsa_key =
            LsaKey::new(LsaFunctionCode::AsExternal.into(), adv_rtr, lsa_id);
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
                LsaFunctionCode::NssaAsExternal.into(),
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
        prefix: IpNetwork,
        old_lsa_id: Option<Ipv4Addr>,
        ext: &SpfExternalNetwork<Self>,
    ) -> Ipv4Addr {
        let lsa_id =
            old_lsa_id.unwrap_or_else(|| instance.state.ext_lsa_id(prefix));
        let mut flags = LsaAsExternalFlags::empty();
        if ext.e_bit {
            flags.insert(LsaAsExternalFlags::E);
        }
        if ext.fwd_addr.is_some() {
            flags.insert(LsaAsExternalFlags::F);
        }
        if ext.tag.is_some() {
            flags.insert(LsaAsExternalFlags::T);
        }

        let lsa_body = LsaBody::AsExternal(LsaAsExternal {
            flags,
            metric: ext.metric,
            prefix_options: ext.prefix_options,
            prefix,
            fwd_addr: ext.fwd_addr,
            tag: ext.tag,
            ref_lsa_type: None,
            ref_lsa_id: None,
        });
        instance.tx.protocol_input.lsa_orig_check(
            LsdbKey::As,
            None,
            lsa_id,
            lsa_body,
        );

        lsa_id
    }

    fn external_type() -> LsaType {
        LsaFunctionCode::AsExternal.into()
    }

    fn lsdb_ref_by_lsa_type(
        area_idx: AreaIndex,
        iface_idx: InterfaceIndex,
        lsa_type: LsaType,
    ) -> LsdbRef {
        // An unrecognized function code with the U-bit clear is treated as
        // if it had link-local flooding scope.
        if lsa_type.function_code().is_none() && !lsa_type.u_bit() {
            return LsdbRef::Link(area_idx, iface_idx);
        }

        match lsa_type.scope() {
            LsaScope::Link => LsdbRef::Link(area_idx, iface_idx),
            LsaScope::Area => LsdbRef::Area(area_idx),
            LsaScope::As => LsdbRef::As,
            LsaScope::Unknown => unreachable!(),
        }
    }

    fn lsdb_install(
        instance: &InstanceUpView<'_, Self>,
        arenas: &mut InstanceArenas<Self>,
        lsdb_ref: LsdbRef,
        lsa: &Lsa<Self>,
    ) {
        match lsa.hdr.lsa_type.function_code() {
            // Remember which interface owns each self-originated
            // Network-LSA, so it can still be flushed later.
            Some(LsaFunctionCode::Network)
                if lsa.hdr.adv_rtr == instance.state.router_id =>
            {
                let LsdbRef::Area(area_idx) = lsdb_ref else {
                    return;
                };
                let area = &arenas.areas[area_idx];
                let ifindex = u32::from(lsa.hdr.lsa_id);
                if let Some(iface_idx) = area.iface_indexes().find(|idx| {
                    arenas.interfaces[*idx].system.ifindex == Some(ifindex)
                }) {
                    let iface = &mut arenas.interfaces[iface_idx];
                    iface.state.network_lsa_self = if lsa.hdr.is_maxage() {
                        None
                    } else {
                        Some(lsa.hdr.key())
                    };
                }
            }
            // A new Link-LSA on a link where we are DR changes the
            // prefixes to advertise for that network.
            Some(LsaFunctionCode::Link) => {
                let LsdbRef::Link(area_idx, iface_idx) = lsdb_ref else {
                    return;
                };
                let area = &arenas.areas[area_idx];
                let iface = &mut arenas.interfaces[iface_idx];
                if lsa.hdr.adv_rtr == instance.state.router_id {
                    iface.state.link_lsa_self = if lsa.hdr.is_maxage() {
                        None
                    } else {
                        Some(lsa.hdr.key())
                    };
                } else {
                    instance.tx.protocol_input.lsa_orig_event(
                        LsaOriginateEvent::LinkLsaRcvd {
                            area_id: area.id,
                            ifname: iface.name.clone(),
                        },
                    );
                }
            }
            _ => (),
        }
    }
}

// ===== helper functions =====

fn any_full_neighbor(
    iface: &Interface<Ospfv3>,
    neighbors: &Arena<Neighbor<Ospfv3>>,
) -> bool {
    iface
        .nbr_indexes()
        .any(|nbr_idx| neighbors[nbr_idx].state == nsm::State::Full)
}

fn full_neighbors<'a>(
    iface: &'a Interface<Ospfv3>,
    neighbors: &'a Arena<Neighbor<Ospfv3>>,
) -> impl Iterator<Item = &'a Neighbor<Ospfv3>> + 'a {
    iface
        .nbr_indexes()
        .map(|nbr_idx| &neighbors[nbr_idx])
        .filter(|nbr| nbr.state == nsm::State::Full)
}

fn lsa_orig_router(
    area: &Area<Ospfv3>,
    instance: &InstanceUpView<'_, Ospfv3>,
    arenas: &InstanceArenas<Ospfv3>,
) {
    let options = Ospfv3::area_options(area, OptionsLocation::Lsa);

    let mut flags = LsaRouterFlags::empty();
    if area::is_abr(&arenas.areas, &arenas.interfaces) {
        flags.insert(LsaRouterFlags::B);
    }
    if (!instance.state.redistributed.is_empty()
        || instance.config.default_originate)
        && area.config.area_type != AreaType::Stub
    {
        flags.insert(LsaRouterFlags::E);
    }

    let mut links = vec![];
    for iface in area
        .iface_indexes()
        .map(|iface_idx| &arenas.interfaces[iface_idx])
        .filter(|iface| !iface.is_down())
        .filter(|iface| iface.state.ism_state != ism::State::Loopback)
    {
        let iface_id = iface.system.ifindex.unwrap_or(0);

        match iface.state.ism_state {
            ism::State::PointToPoint => {
                // One point-to-point link per fully adjacent neighbor,
                // echoing the neighbor's Interface ID.
                for nbr in full_neighbors(iface, &arenas.neighbors) {
                    links.push(LsaRouterLink::new(
                        LsaRouterLinkType::PointToPoint,
                        iface.config.cost,
                        iface_id,
                        nbr.iface_id.unwrap_or(0),
                        nbr.router_id,
                    ));
                }
            }
            ism::State::Dr | ism::State::Backup | ism::State::DrOther => {
                // A transit link exists once the network has a functioning
                // DR: either we are it (with at least one full adjacency),
                // or we are fully adjacent to it.
                let Some(dr_net_id) = iface.state.dr else {
                    continue;
                };
                let dr_router_id = dr_net_id.get();
                let (nbr_iface_id, dr_full) =
                    if dr_router_id == instance.state.router_id {
                        (
                            iface_id,
                            any_full_neighbor(iface, &arenas.neighbors),
                        )
                    } else {
                        match iface
                            .state
                            .nbrs_by_router_id
                            .get(&dr_router_id)
                            .map(|nbr_idx| &arenas.neighbors[*nbr_idx])
                            .filter(|nbr| nbr.state == nsm::State::Full)
                        {
                            Some(nbr) => (nbr.iface_id.unwrap_or(0), true),
                            None => (0, false),
                        }
                    };
                if dr_full {
                    links.push(LsaRouterLink::new(
                        LsaRouterLinkType::TransitNetwork,
                        iface.config.cost,
                        iface_id,
                        nbr_iface_id,
                        dr_router_id,
                    ));
                }
            }
            _ => (),
        }
    }

    // The Link State ID of the Router-LSA is always zero; the advertising
    // router disambiguates it.
    let lsa_body = LsaBody::Router(LsaRouter::new(flags, options, links));
    instance.tx.protocol_input.lsa_orig_check(
        LsdbKey::Area(area.id),
        None,
        Ipv4Addr::UNSPECIFIED,
        lsa_body,
    );
}

fn lsa_orig_network(
    iface: &Interface<Ospfv3>,
    area: &Area<Ospfv3>,
    instance: &InstanceUpView<'_, Ospfv3>,
    arenas: &InstanceArenas<Ospfv3>,
) {
    let options = Ospfv3::area_options(area, OptionsLocation::Lsa);

    // The Link State ID for a Network-LSA is the Interface ID of the
    // Designated Router.
    let lsa_id = Ipv4Addr::from(iface.system.ifindex.unwrap_or(0));

    // Attached routers: ourselves plus all fully adjacent neighbors.
    let myself = instance.state.router_id;
    let nbrs =
        full_neighbors(iface, &arenas.neighbors).map(|nbr| nbr.router_id);
    let attached_rtrs = std::iter::once(myself).chain(nbrs).collect();

    let lsa_body = LsaBody::Network(LsaNetwork::new(options, attached_rtrs));
    instance.tx.protocol_input.lsa_orig_check(
        LsdbKey::Area(area.id),
        None,
        lsa_id,
        lsa_body,
    );
}

fn lsa_flush_network(
    iface: &Interface<Ospfv3>,
    area: &Area<Ospfv3>,
    instance: &InstanceUpView<'_, Ospfv3>,
    arenas: &InstanceArenas<Ospfv3>,
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

// Originates the interface's Link-LSA, advertising its link-local address
// and the prefixes configured on the link.
fn lsa_orig_link(
    iface: &Interface<Ospfv3>,
    area: &Area<Ospfv3>,
    instance: &InstanceUpView<'_, Ospfv3>,
) {
    let options = Ospfv3::area_options(area, OptionsLocation::Lsa);

    let Some(linklocal_addr) = iface.system.linklocal_addr else {
        return;
    };
    let lsa_id = Ipv4Addr::from(iface.system.ifindex.unwrap_or(0));

    // Advertise the global prefixes configured on the link.
    let prefixes = iface
        .system
        .addr_list
        .iter()
        .filter(|addr| addr.is_routable())
        .map(|addr| {
            LsaLinkPrefix::new(PrefixOptions::empty(), addr.apply_mask())
        })
        .collect();

    let lsa_body = LsaBody::Link(LsaLink::new(
        iface.config.priority,
        options,
        linklocal_addr.ip(),
        prefixes,
    ));
    instance.tx.protocol_input.lsa_orig_check(
        LsdbKey::Link(area.id, iface.name.clone()),
        None,
        lsa_id,
        lsa_body,
    );
}

// Originates the area's Intra-Area-Prefix-LSAs: one referencing the
// Router-LSA with the prefixes of the non-transit links, and one per link
// this router is the Designated Router of, referencing the Network-LSA.
fn lsa_orig_intra_area_prefix(
    area: &Area<Ospfv3>,
    instance: &InstanceUpView<'_, Ospfv3>,
    arenas: &InstanceArenas<Ospfv3>,
) {
    let lsdb_key = LsdbKey::Area(area.id);
    let adv_rtr = instance.state.router_id;

    // Link State IDs this router should currently be advertising: zero
    // for the router-referenced instance, the Interface ID for
    // network-referenced instances.
    let mut expected_lsa_ids = vec![];

    // Router-referenced prefixes.
    let mut prefixes = vec![];
    for iface in area
        .iface_indexes()
        .map(|iface_idx| &arenas.interfaces[iface_idx])
        .filter(|iface| !iface.is_down())
    {
        // Transit networks covered by a Network-LSA have their prefixes
        // advertised by the network-referenced instance below.
        if iface.is_broadcast_or_nbma()
            && iface.state.ism_state != ism::State::Waiting
            && iface.state.dr.is_some()
        {
            continue;
        }

        prefixes.extend(
            iface
                .system
                .addr_list
                .iter()
                .filter(|addr| addr.is_routable())
                .map(|addr| {
                    LsaIntraAreaPrefixEntry::new(
                        PrefixOptions::empty(),
                        addr.apply_mask(),
                        iface.config.cost,
                    )
                }),
        );
    }
    if !prefixes.is_empty() {
        let lsa_id = Ipv4Addr::UNSPECIFIED;
        expected_lsa_ids.push(lsa_id);
        let lsa_body = LsaBody::IntraAreaPrefix(LsaIntraAreaPrefix::new(
            LsaFunctionCode::Router.into(),
            Ipv4Addr::UNSPECIFIED,
            adv_rtr,
            prefixes,
        ));
        instance.tx.protocol_input.lsa_orig_check(
            lsdb_key.clone(),
            None,
            lsa_id,
            lsa_body,
        );
    }

    // Network-referenced prefixes, for each link where this router is the
    // DR with at least one full adjacency. The prefixes are gathered from
    // the Link-LSAs of all attached routers.
    for iface in area
        .iface_indexes()
        .map(|iface_idx| &arenas.interfaces[iface_idx])
        .filter(|iface| iface.state.ism_state == ism::State::Dr)
        .filter(|iface| any_full_neighbor(iface, &arenas.neighbors))
    {
        let iface_id = iface.system.ifindex.unwrap_or(0);
        let mut prefixes: Vec<LsaIntraAreaPrefixEntry> = vec![];
        for lsa in iface
            .state
            .lsdb
            .iter(&arenas.lsa_entries)
            .map(|(_, lse)| &lse.data)
            .filter(|lsa| !lsa.hdr.is_maxage())
            .filter_map(|lsa| lsa.body.as_link())
        {
            for prefix in &lsa.prefixes {
                if !prefixes.iter().any(|entry| entry.value == prefix.value) {
                    prefixes.push(LsaIntraAreaPrefixEntry::new(
                        prefix.options,
                        prefix.value,
                        0,
                    ));
                }
            }
        }

        if !prefixes.is_empty() {
            let lsa_id = Ipv4Addr::from(iface_id);
            expected_lsa_ids.push(lsa_id);
            let lsa_body = LsaBody::IntraAreaPrefix(LsaIntraAreaPrefix::new(
                LsaFunctionCode::Network.into(),
                Ipv4Addr::from(iface_id),
                adv_rtr,
                prefixes,
            ));
            instance.tx.protocol_input.lsa_orig_check(
                lsdb_key.clone(),
                None,
                lsa_id,
                lsa_body,
            );
        }
    }

    // Flush the self-originated instances that are no longer expected.
    for (_, lse) in area
        .state
        .lsdb
        .iter_by_type_advrtr(
            &arenas.lsa_entries,
            LsaFunctionCode::IntraAreaPrefix.into(),
            adv_rtr,
        )
        .filter(|(_, lse)| !lse.data.hdr.is_maxage())
        .filter(|(_, lse)| !expected_lsa_ids.contains(&lse.data.hdr.lsa_id))
    {
        instance.tx.protocol_input.lsa_flush(
            lsdb_key.clone(),
            lse.data.hdr.key(),
            LsaFlushReason::PrematureAging,
        );
    }
}

// A newer instance of one of our own LSAs arrived through flooding
// (RFC 2328 section 13.4): supersede it with a fresh origination, or age
// it out if it no longer describes anything.
fn process_self_originated_lsa(
    instance: &InstanceUpView<'_, Ospfv3>,
    arenas: &InstanceArenas<Ospfv3>,
    lsdb_key: LsdbKey,
    lsa_key: LsaKey<LsaType>,
) -> Result<(), Error<Ospfv3>> {
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
    match lsa.hdr.lsa_type.function_code() {
        Some(LsaFunctionCode::Router) => {
            let LsdbRef::Area(area_idx) = lsdb_ref else {
                unreachable!();
            };
            lsa_orig_router(&arenas.areas[area_idx], instance, arenas);
        }
        Some(LsaFunctionCode::Network) => {
            let LsdbRef::Area(area_idx) = lsdb_ref else {
                unreachable!();
            };
            let area = &arenas.areas[area_idx];

            // Reoriginate only while still the DR for that network.
            let ifindex = u32::from(lsa.hdr.lsa_id);
            let iface = area
                .iface_indexes()
                .map(|iface_idx| &arenas.interfaces[iface_idx])
                .find(|iface| iface.system.ifindex == Some(ifindex))
                .filter(|iface| iface.state.ism_state == ism::State::Dr);
            match iface {
                Some(iface) => {
                    lsa_orig_network(iface, area, instance, arenas)
                }
                None => flush = true,
            }
        }
        Some(LsaFunctionCode::Link) => {
            if let LsdbRef::Link(area_idx, iface_idx) = lsdb_ref {
                let area = &arenas.areas[area_idx];
                let iface = &arenas.interfaces[iface_idx];
                if !iface.is_down() && !iface.is_passive() {
                    lsa_orig_link(iface, area, instance);
                } else {
                    flush = true;
                }
            } else {
                flush = true;
            }
        }
        Some(LsaFunctionCode::IntraAreaPrefix) => {
            let LsdbRef::Area(area_idx) = lsdb_ref else {
                unreachable!();
            };
            lsa_orig_intra_area_prefix(
                &arenas.areas[area_idx],
                instance,
                arenas,
            );
        }
        Some(
            LsaFunctionCode::InterAreaPrefix | LsaFunctionCode::InterAreaRouter,
        ) => {
            // Reoriginated or flushed once SPF runs and the routing table
            // is recomputed.
        }
        Some(LsaFunctionCode::AsExternal | LsaFunctionCode::NssaAsExternal) => {
            // Flush unless the route is still being redistributed; in that
            // case the redistribution logic reissues the LSA.
            let prefix = lsa.body.as_external().map(|body| body.prefix);
            flush = !prefix.is_some_and(|prefix| {
                instance.state.redistributed.contains_key(&prefix)
            });
        }
        None => {
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
