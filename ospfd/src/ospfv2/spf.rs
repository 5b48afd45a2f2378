//
// Copyright (c) The Ospfd Project Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeSet;
use std::net::Ipv4Addr;
use std::sync::Arc;

use enum_as_inner::EnumAsInner;
use ipnetwork::Ipv4Network;
use ospfd_utils::ip::{AddressFamily, IpNetworkKind};

use crate::area::Area;
use crate::collections::{Arena, InterfaceIndex};
use crate::error::Error;
use crate::interface::Interface;
use crate::lsdb::{LsaEntry, Lsdb};
use crate::neighbor::Neighbor;
use crate::ospfv2::packet::Options;
use crate::ospfv2::packet::lsa::{
    LsaAsExternalFlags, LsaBody, LsaRouterFlags, LsaRouterLink,
    LsaRouterLinkType, LsaType, LsaTypeCode,
};
use crate::packet::lsa::{Lsa, LsaHdrVersion, LsaKey};
use crate::route::{Nexthop, NexthopKey, Nexthops};
use crate::spf::{
    SpfComputation, SpfExternalNetwork, SpfInterAreaNetwork,
    SpfInterAreaRouter, SpfIntraAreaNetwork, SpfLink, SpfPartialComputation,
    SpfTriggerLsa, SpfVersion, Vertex, VertexIdVersion, VertexLsaVersion,
};
use crate::version::Ospfv2;

// For OSPFv2 the SPF graph is built directly from Router-LSAs and
// Network-LSAs; transit networks are keyed by the address of their DR.
// Network vertices sort before router vertices, which equal-cost path
// collection depends on.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub enum VertexId {
    Network { dr_addr: Ipv4Addr },
    Router { router_id: Ipv4Addr },
}

#[derive(Debug, Eq, PartialEq, EnumAsInner)]
pub enum VertexLsa {
    Network(Arc<Lsa<Ospfv2>>),
    Router(Arc<Lsa<Ospfv2>>),
}

// ===== impl VertexId =====

impl VertexIdVersion for VertexId {
    fn new_root(router_id: Ipv4Addr) -> Self {
        VertexId::Router { router_id }
    }
}

// ===== impl VertexLsa =====

impl VertexLsaVersion<Ospfv2> for VertexLsa {
    fn is_router(&self) -> bool {
        matches!(self, VertexLsa::Router(_))
    }

    fn router_v_bit(&self) -> bool {
        let lsa = self.as_router().unwrap();
        let lsa_body = lsa.body.as_router().unwrap();
        lsa_body.flags.contains(LsaRouterFlags::V)
    }

    fn router_id(&self) -> Ipv4Addr {
        let lsa = self.as_router().unwrap();
        lsa.hdr.adv_rtr
    }

    fn router_options(&self) -> Options {
        let lsa = self.as_router().unwrap();
        lsa.hdr.options
    }

    fn router_flags(&self) -> LsaRouterFlags {
        let lsa = self.as_router().unwrap();
        let lsa_body = lsa.body.as_router().unwrap();
        lsa_body.flags
    }

    fn origin(&self) -> LsaKey<LsaType> {
        let (VertexLsa::Network(lsa) | VertexLsa::Router(lsa)) = self;
        lsa.hdr.key()
    }
}

// ===== impl Ospfv2 =====

impl SpfVersion<Self> for Ospfv2 {
    type VertexId = VertexId;
    type VertexLsa = VertexLsa;

    fn spf_computation_type(
        trigger_lsas: &[SpfTriggerLsa<Self>],
    ) -> SpfComputation<Self> {
        // Router-LSA and Network-LSA changes are topological; nothing
        // short of a full run handles those.
        if trigger_lsas.iter().map(|tlsa| &tlsa.new).any(|lsa| {
            matches!(lsa.body, LsaBody::Router(_) | LsaBody::Network(_))
        }) {
            return SpfComputation::Full;
        }

        // Type-3 summary changes.
        let inter_network = trigger_lsas
            .iter()
            .map(|tlsa| &tlsa.new)
            .filter_map(|lsa| {
                let lsa_body = lsa.body.as_summary_network()?;
                Ipv4Network::with_netmask(lsa.hdr.lsa_id, lsa_body.mask).ok()
            })
            .collect();

        // Type-4 summary changes.
        let inter_router = trigger_lsas
            .iter()
            .map(|tlsa| &tlsa.new)
            .filter(|lsa| lsa.body.as_summary_router().is_some())
            .map(|lsa| lsa.hdr.lsa_id)
            .collect::<BTreeSet<_>>();

        // AS-External and Type-7 changes.
        let external = trigger_lsas
            .iter()
            .map(|tlsa| &tlsa.new)
            .filter_map(|lsa| {
                let lsa_body = lsa.body.as_external()?;
                Ipv4Network::with_netmask(lsa.hdr.lsa_id, lsa_body.mask).ok()
            })
            .collect();

        SpfComputation::Partial(SpfPartialComputation {
            inter_network,
            inter_router,
            external,
        })
    }

    fn calc_nexthops(
        area: &Area<Self>,
        parent: &Vertex<Self>,
        parent_link: Option<&LsaRouterLink>,
        dest_id: VertexId,
        dest_lsa: &VertexLsa,
        interfaces: &Arena<Interface<Self>>,
        _neighbors: &Arena<Neighbor<Self>>,
        _lsa_entries: &Arena<LsaEntry<Self>>,
    ) -> Result<Nexthops<Ipv4Addr>, Error<Self>> {
        match &parent.lsa {
            VertexLsa::Router(_) => nexthops_from_root(
                area,
                parent_link,
                dest_id,
                dest_lsa,
                interfaces,
            ),
            VertexLsa::Network(parent_lsa) => {
                nexthops_across_network(parent, parent_lsa, dest_id, dest_lsa)
            }
        }
    }

    fn vertex_lsa_find(
        _af: AddressFamily,
        id: VertexId,
        area: &Area<Self>,
        lsa_entries: &Arena<LsaEntry<Self>>,
    ) -> Option<VertexLsa> {
        match id {
            VertexId::Network { dr_addr } => {
                // A Network-LSA has to be found knowing only its Link
                // State ID, not its advertising router.
                area.state
                    .lsdb
                    .iter_by_type(lsa_entries, LsaTypeCode::Network.into())
                    .map(|(_, lse)| &lse.data)
                    .find(|lsa| lsa.hdr.lsa_id == dr_addr)
                    .filter(|lsa| !lsa.hdr.is_maxage())
                    .map(|lsa| VertexLsa::Network(lsa.clone()))
            }
            VertexId::Router { router_id } => {
                let lsa_key = LsaKey::new(
                    LsaTypeCode::Router.into(),
                    router_id,
                    router_id,
                );
                area.state
                    .lsdb
                    .get(lsa_entries, &lsa_key)
                    .filter(|(_, lse)| !lse.data.hdr.is_maxage())
                    .map(|(_, lse)| VertexLsa::Router(lse.data.clone()))
            }
        }
    }

    fn vertex_lsa_links<'a>(
        vertex_lsa: &'a VertexLsa,
        af: AddressFamily,
        area: &'a Area<Ospfv2>,
        lsa_entries: &'a Arena<LsaEntry<Ospfv2>>,
    ) -> Box<dyn Iterator<Item = SpfLink<'a, Ospfv2>> + 'a> {
        match vertex_lsa {
            // A network links back to every attached router, at no cost.
            VertexLsa::Network(lsa) => {
                let lsa_body = lsa.body.as_network().unwrap();
                let iter = lsa_body.attached_rtrs.iter().filter_map(
                    move |router_id| {
                        let link_vid = VertexId::Router {
                            router_id: *router_id,
                        };
                        Ospfv2::vertex_lsa_find(af, link_vid, area, lsa_entries)
                            .map(|link_vlsa| {
                                SpfLink::new(None, link_vid, link_vlsa, 0)
                            })
                    },
                );
                Box::new(iter)
            }
            // A router links to routers over point-to-point and virtual
            // links and to networks over transit links; stub links carry
            // no vertex.
            VertexLsa::Router(lsa) => {
                let lsa_body = lsa.body.as_router().unwrap();
                let iter = lsa_body
                    .links
                    .iter()
                    .filter_map(|link| {
                        let link_vid = match link.link_type {
                            LsaRouterLinkType::PointToPoint
                            | LsaRouterLinkType::VirtualLink => {
                                VertexId::Router {
                                    router_id: link.link_id,
                                }
                            }
                            LsaRouterLinkType::TransitNetwork => {
                                VertexId::Network {
                                    dr_addr: link.link_id,
                                }
                            }
                            LsaRouterLinkType::StubNetwork => return None,
                        };
                        Some((link, link_vid))
                    })
                    .filter_map(move |(link, link_vid)| {
                        Ospfv2::vertex_lsa_find(af, link_vid, area, lsa_entries)
                            .map(|link_vlsa| {
                                SpfLink::new(
                                    Some(link),
                                    link_vid,
                                    link_vlsa,
                                    link.metric,
                                )
                            })
                    });
                Box::new(iter)
            }
        }
    }

    fn intra_area_networks<'a>(
        area: &'a Area<Self>,
        _lsa_entries: &'a Arena<LsaEntry<Self>>,
    ) -> Box<dyn Iterator<Item = SpfIntraAreaNetwork<'a, Self>> + 'a> {
        let mut stubs = vec![];

        for vertex in area.state.spt.values() {
            match &vertex.lsa {
                // A transit network is itself a destination.
                VertexLsa::Network(lsa) => {
                    let lsa_body = lsa.body.as_network().unwrap();
                    let Ok(prefix) = Ipv4Network::with_netmask(
                        lsa.hdr.lsa_id,
                        lsa_body.mask,
                    ) else {
                        continue;
                    };

                    stubs.push(SpfIntraAreaNetwork {
                        vertex,
                        prefix: prefix.apply_mask(),
                        prefix_options: Default::default(),
                        metric: 0,
                    });
                }
                // Plus the stub links of every router on the tree.
                VertexLsa::Router(lsa) => {
                    let lsa_body = lsa.body.as_router().unwrap();
                    stubs.extend(
                        lsa_body
                            .links
                            .iter()
                            .filter(|link| {
                                link.link_type
                                    == LsaRouterLinkType::StubNetwork
                            })
                            .filter_map(|link| {
                                let prefix = Ipv4Network::with_netmask(
                                    link.link_id,
                                    link.link_data,
                                )
                                .ok()?;

                                Some(SpfIntraAreaNetwork {
                                    vertex,
                                    prefix: prefix.apply_mask(),
                                    prefix_options: Default::default(),
                                    metric: link.metric,
                                })
                            }),
                    )
                }
            }
        }

        Box::new(stubs.into_iter())
    }

    fn inter_area_networks<'a>(
        area: &'a Area<Self>,
        lsa_entries: &'a Arena<LsaEntry<Self>>,
    ) -> Box<dyn Iterator<Item = SpfInterAreaNetwork<Self>> + 'a> {
        let iter = area
            .state
            .lsdb
            .iter_by_type(lsa_entries, LsaTypeCode::SummaryNetwork.into())
            .map(|(_, lse)| &lse.data)
            .filter(|lsa| !lsa.hdr.is_maxage())
            .filter_map(|lsa| {
                let lsa_body = lsa.body.as_summary_network().unwrap();
                let prefix =
                    Ipv4Network::with_netmask(lsa.hdr.lsa_id, lsa_body.mask)
                        .ok()?;

                Some(SpfInterAreaNetwork {
                    adv_rtr: lsa.hdr.adv_rtr,
                    prefix,
                    prefix_options: Default::default(),
                    metric: lsa_body.metric,
                })
            });
        Box::new(iter)
    }

    fn inter_area_routers<'a>(
        lsdb: &'a Lsdb<Self>,
        lsa_entries: &'a Arena<LsaEntry<Self>>,
    ) -> Box<dyn Iterator<Item = SpfInterAreaRouter<Self>> + 'a> {
        let iter = lsdb
            .iter_by_type(lsa_entries, LsaTypeCode::SummaryRouter.into())
            .map(|(_, lse)| &lse.data)
            .filter(|lsa| !lsa.hdr.is_maxage())
            .map(|lsa| {
                let lsa_body = lsa.body.as_summary_router().unwrap();
                SpfInterAreaRouter {
                    adv_rtr: lsa.hdr.adv_rtr,
                    router_id: lsa.hdr.lsa_id,
                    options: lsa.hdr.options,
                    // Type-4 summaries are only ever originated for ASBRs.
                    flags: LsaRouterFlags::E,
                    metric: lsa_body.metric,
                }
            });
        Box::new(iter)
    }

    fn external_networks<'a>(
        lsdb: &'a Lsdb<Self>,
        lsa_entries: &'a Arena<LsaEntry<Self>>,
    ) -> Box<dyn Iterator<Item = SpfExternalNetwork<Self>> + 'a> {
        let iter = lsdb
            .iter_by_type(lsa_entries, LsaTypeCode::AsExternal.into())
            .map(|(_, lse)| &lse.data)
            .filter(|lsa| !lsa.hdr.is_maxage())
            .filter_map(|lsa| external_network(lsa));
        Box::new(iter)
    }

    fn nssa_externals<'a>(
        area: &'a Area<Self>,
        lsa_entries: &'a Arena<LsaEntry<Self>>,
    ) -> Box<dyn Iterator<Item = SpfExternalNetwork<Self>> + 'a> {
        let iter = area
            .state
            .lsdb
            .iter_by_type(lsa_entries, LsaTypeCode::NssaAsExternal.into())
            .map(|(_, lse)| &lse.data)
            .filter(|lsa| !lsa.hdr.is_maxage())
            .filter_map(|lsa| external_network(lsa));
        Box::new(iter)
    }
}

// ===== helper functions =====

// Nexthops for a destination adjacent to the root (RFC 2328 section
// 16.1.1, parent is the root): the outgoing interface is the one the
// parent link names, and for router destinations the neighbor address
// comes from the destination's own links pointing back at our network.
fn nexthops_from_root(
    area: &Area<Ospfv2>,
    parent_link: Option<&LsaRouterLink>,
    dest_id: VertexId,
    dest_lsa: &VertexLsa,
    interfaces: &Arena<Interface<Ospfv2>>,
) -> Result<Nexthops<Ipv4Addr>, Error<Ospfv2>> {
    let parent_link = parent_link.unwrap();
    let (iface_idx, iface) =
        iface_by_addr(area, interfaces, parent_link.link_data)
            .ok_or(Error::NexthopUnresolved(dest_id))?;

    let mut nexthops = Nexthops::new();
    match dest_lsa {
        VertexLsa::Router(dest_lsa) => {
            nexthops.extend(
                dest_lsa
                    .body
                    .as_router()
                    .unwrap()
                    .links
                    .iter()
                    .filter(|link| iface.system.contains_addr(&link.link_data))
                    .map(|link| {
                        (
                            NexthopKey::new(iface_idx, Some(link.link_data)),
                            Nexthop::new(
                                iface_idx,
                                Some(link.link_data),
                                Some(dest_lsa.hdr.adv_rtr),
                            ),
                        )
                    }),
            );
            if nexthops.is_empty() {
                return Err(Error::NexthopUnresolved(dest_id));
            }
        }
        VertexLsa::Network(_) => {
            // A directly connected network.
            nexthops.insert(
                NexthopKey::new(iface_idx, None),
                Nexthop::new(iface_idx, None, None),
            );
        }
    }

    Ok(nexthops)
}

// Nexthops for a router one transit network away from the root (RFC 2328
// section 16.1.1, parent is a network with hops == 0): the outgoing
// interface is inherited from the network, and the neighbor address comes
// from the link in the destination's Router-LSA that points back at the
// network.
fn nexthops_across_network(
    parent: &Vertex<Ospfv2>,
    parent_lsa: &Arc<Lsa<Ospfv2>>,
    dest_id: VertexId,
    dest_lsa: &VertexLsa,
) -> Result<Nexthops<Ipv4Addr>, Error<Ospfv2>> {
    let lsa_body = parent_lsa.body.as_network().unwrap();
    let parent_network =
        Ipv4Network::with_netmask(parent_lsa.hdr.lsa_id, lsa_body.mask)
            .map_err(|_| Error::NexthopUnresolved(dest_id))?;

    let dest_lsa = dest_lsa.as_router().unwrap();
    let dest_link = dest_lsa
        .body
        .as_router()
        .unwrap()
        .links
        .iter()
        .find(|link| parent_network.contains(link.link_data))
        .ok_or(Error::NexthopUnresolved(dest_id))?;

    let iface_idx = parent
        .nexthops
        .values()
        .next()
        .ok_or(Error::NexthopUnresolved(dest_id))?
        .iface_idx;

    let mut nexthops = Nexthops::new();
    nexthops.insert(
        NexthopKey::new(iface_idx, Some(dest_link.link_data)),
        Nexthop::new(
            iface_idx,
            Some(dest_link.link_data),
            Some(dest_lsa.hdr.adv_rtr),
        ),
    );

    Ok(nexthops)
}

fn iface_by_addr<'a>(
    area: &Area<Ospfv2>,
    interfaces: &'a Arena<Interface<Ospfv2>>,
    addr: Ipv4Addr,
) -> Option<(InterfaceIndex, &'a Interface<Ospfv2>)> {
    area.iface_indexes()
        .map(|iface_idx| (iface_idx, &interfaces[iface_idx]))
        .find(|(_, iface)| {
            iface
                .system
                .primary_addr
                .is_some_and(|primary| primary.ip() == addr)
        })
}

fn external_network(
    lsa: &Arc<Lsa<Ospfv2>>,
) -> Option<SpfExternalNetwork<Ospfv2>> {
    let lsa_body = lsa.body.as_external().unwrap();
    let prefix =
        Ipv4Network::with_netmask(lsa.hdr.lsa_id, lsa_body.mask).ok()?;

    Some(SpfExternalNetwork {
        adv_rtr: lsa.hdr.adv_rtr,
        e_bit: lsa_body.flags.contains(LsaAsExternalFlags::E),
        prefix,
        prefix_options: Default::default(),
        metric: lsa_body.metric,
        fwd_addr: lsa_body.fwd_addr,
        tag: Some(lsa_body.tag),
        // For Type-7 LSAs the P-bit rides in the header options.
        propagate: lsa.hdr.options.contains(Options::NP),
    })
}
