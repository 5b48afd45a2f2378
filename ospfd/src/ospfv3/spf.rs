//
// Copyright (c) The Ospfd Project Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeSet;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;

use enum_as_inner::EnumAsInner;
use ospfd_utils::ip::AddressFamily;

use crate::area::Area;
use crate::collections::Arena;
use crate::error::Error;
use crate::interface::Interface;
use crate::lsdb::{LsaEntry, Lsdb};
use crate::neighbor::Neighbor;
use crate::ospfv3::packet::Options;
use crate::ospfv3::packet::lsa::{
    LsaAsExternalFlags, LsaBody, LsaFunctionCode, LsaRouterFlags,
    LsaRouterLink, LsaRouterLinkType, LsaType, PrefixOptions,
};
use crate::packet::lsa::{Lsa, LsaHdrVersion, LsaKey};
use crate::route::{Nexthop, NexthopKey, Nexthops};
use crate::spf::{
    SpfComputation, SpfExternalNetwork, SpfInterAreaNetwork,
    SpfInterAreaRouter, SpfIntraAreaNetwork, SpfLink, SpfPartialComputation,
    SpfTriggerLsa, SpfVersion, Vertex, VertexIdVersion, VertexLsaVersion,
};
use crate::version::Ospfv3;

// For OSPFv3 the SPF graph is built from Router-LSAs and Network-LSAs
// alone; prefixes are grafted on afterwards from the Intra-Area-Prefix-LSAs
// referencing the tree's vertices.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub enum VertexId {
    Network {
        dr_router_id: Ipv4Addr,
        dr_iface_id: u32,
    },
    Router {
        router_id: Ipv4Addr,
    },
}

#[derive(Debug, Eq, PartialEq, EnumAsInner)]
pub enum VertexLsa {
    Network(Arc<Lsa<Ospfv3>>),
    Router(Arc<Lsa<Ospfv3>>),
}

// ===== impl VertexId =====

impl VertexIdVersion for VertexId {
    fn new_root(router_id: Ipv4Addr) -> Self {
        VertexId::Router { router_id }
    }
}

// ===== impl VertexLsa =====

impl VertexLsaVersion<Ospfv3> for VertexLsa {
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
        let lsa_body = lsa.body.as_router().unwrap();
        lsa_body.options
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

// ===== impl Ospfv3 =====

impl SpfVersion<Self> for Ospfv3 {
    type VertexId = VertexId;
    type VertexLsa = VertexLsa;

    fn spf_computation_type(
        trigger_lsas: &[SpfTriggerLsa<Self>],
    ) -> SpfComputation<Self> {
        // Topological changes require a full SPF run. For OSPFv3 the
        // Intra-Area-Prefix-LSAs and Link-LSAs also feed the intra-area
        // routes, so treat their changes as full runs too.
        if trigger_lsas.iter().map(|tlsa| &tlsa.new).any(|lsa| {
            matches!(
                lsa.body,
                LsaBody::Router(_)
                    | LsaBody::Network(_)
                    | LsaBody::Link(_)
                    | LsaBody::IntraAreaPrefix(_)
            )
        }) {
            return SpfComputation::Full;
        }

        // Check Inter-Area-Prefix-LSA changes.
        let inter_network = trigger_lsas
            .iter()
            .map(|tlsa| &tlsa.new)
            .filter_map(|lsa| lsa.body.as_inter_area_prefix())
            .map(|lsa_body| lsa_body.prefix)
            .collect();

        // Check Inter-Area-Router-LSA changes.
        let inter_router = trigger_lsas
            .iter()
            .map(|tlsa| &tlsa.new)
            .filter_map(|lsa| lsa.body.as_inter_area_router())
            .map(|lsa_body| lsa_body.router_id)
            .collect::<BTreeSet<_>>();

        // Check AS-External and NSSA LSA changes.
        let external = trigger_lsas
            .iter()
            .map(|tlsa| &tlsa.new)
            .filter_map(|lsa| lsa.body.as_external())
            .map(|lsa_body| lsa_body.prefix)
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
        neighbors: &Arena<Neighbor<Self>>,
        lsa_entries: &Arena<LsaEntry<Self>>,
    ) -> Result<Nexthops<IpAddr>, Error<Self>> {
        match &parent.lsa {
            VertexLsa::Router(_) => nexthops_from_root(
                area,
                parent_link,
                dest_id,
                dest_lsa,
                interfaces,
                neighbors,
                lsa_entries,
            ),
            VertexLsa::Network(_) => nexthops_across_network(
                parent, dest_id, dest_lsa, interfaces, neighbors,
                lsa_entries,
            ),
        }
    }

    fn vertex_lsa_find(
        _af: AddressFamily,
        id: VertexId,
        area: &Area<Self>,
        lsa_entries: &Arena<LsaEntry<Self>>,
    ) -> Option<VertexLsa> {
        match id {
            VertexId::Network {
                dr_router_id,
                dr_iface_id,
            } => {
                let lsa_key = LsaKey::new(
                    LsaFunctionCode::Network.into(),
                    dr_router_id,
                    Ipv4Addr::from(dr_iface_id),
                );
                area.state
                    .lsdb
                    .get(lsa_entries, &lsa_key)
                    .filter(|(_, lse)| !lse.data.hdr.is_maxage())
                    .map(|(_, lse)| VertexLsa::Network(lse.data.clone()))
            }
            VertexId::Router { router_id } => {
                // The Link State ID of a Router-LSA carries no meaning;
                // locate the LSA by its advertising router.
                area.state
                    .lsdb
                    .iter_by_type_advrtr(
                        lsa_entries,
                        LsaFunctionCode::Router.into(),
                        router_id,
                    )
                    .map(|(_, lse)| &lse.data)
                    .find(|lsa| !lsa.hdr.is_maxage())
                    .map(|lsa| VertexLsa::Router(lsa.clone()))
            }
        }
    }

    fn vertex_lsa_links<'a>(
        vertex_lsa: &'a VertexLsa,
        af: AddressFamily,
        area: &'a Area<Ospfv3>,
        lsa_entries: &'a Arena<LsaEntry<Ospfv3>>,
    ) -> Box<dyn Iterator<Item = SpfLink<'a, Ospfv3>> + 'a> {
        match vertex_lsa {
            VertexLsa::Network(lsa) => {
                let lsa_body = lsa.body.as_network().unwrap();
                let iter = lsa_body.attached_rtrs.iter().filter_map(
                    move |router_id| {
                        let link_vid = VertexId::Router {
                            router_id: *router_id,
                        };
                        Ospfv3::vertex_lsa_find(af, link_vid, area, lsa_entries)
                            .map(|link_vlsa| {
                                SpfLink::new(None, link_vid, link_vlsa, 0)
                            })
                    },
                );
                Box::new(iter)
            }
            VertexLsa::Router(lsa) => {
                let lsa_body = lsa.body.as_router().unwrap();
                let iter = lsa_body
                    .links
                    .iter()
                    .filter_map(|link| match link.link_type {
                        LsaRouterLinkType::PointToPoint
                        | LsaRouterLinkType::VirtualLink => {
                            let link_vid = VertexId::Router {
                                router_id: link.nbr_router_id,
                            };
                            Some((link, link_vid, link.metric))
                        }
                        LsaRouterLinkType::TransitNetwork => {
                            let link_vid = VertexId::Network {
                                dr_router_id: link.nbr_router_id,
                                dr_iface_id: link.nbr_iface_id,
                            };
                            Some((link, link_vid, link.metric))
                        }
                    })
                    .filter_map(move |(link, link_vid, cost)| {
                        Ospfv3::vertex_lsa_find(af, link_vid, area, lsa_entries)
                            .map(|link_vlsa| {
                                SpfLink::new(
                                    Some(link),
                                    link_vid,
                                    link_vlsa,
                                    cost,
                                )
                            })
                    });
                Box::new(iter)
            }
        }
    }

    fn intra_area_networks<'a>(
        area: &'a Area<Self>,
        lsa_entries: &'a Arena<LsaEntry<Self>>,
    ) -> Box<dyn Iterator<Item = SpfIntraAreaNetwork<'a, Self>> + 'a> {
        // Prefixes are grafted onto the tree from the Intra-Area-Prefix-LSAs
        // whose referenced LSA maps to a vertex of the tree.
        let iter = area
            .state
            .lsdb
            .iter_by_type(
                lsa_entries,
                LsaFunctionCode::IntraAreaPrefix.into(),
            )
            .map(|(_, lse)| &lse.data)
            .filter(|lsa| !lsa.hdr.is_maxage())
            .filter_map(move |lsa| {
                let lsa_body = lsa.body.as_intra_area_prefix().unwrap();
                let vertex_id = match lsa_body.ref_lsa_type.function_code() {
                    Some(LsaFunctionCode::Router) => VertexId::Router {
                        router_id: lsa_body.ref_adv_rtr,
                    },
                    Some(LsaFunctionCode::Network) => VertexId::Network {
                        dr_router_id: lsa_body.ref_adv_rtr,
                        dr_iface_id: u32::from(lsa_body.ref_lsa_id),
                    },
                    _ => return None,
                };
                let vertex = area.state.spt.get(&vertex_id)?;
                Some((vertex, lsa_body))
            })
            .flat_map(|(vertex, lsa_body)| {
                lsa_body
                    .prefixes
                    .iter()
                    // Prefixes flagged NU are not installed.
                    .filter(|prefix| {
                        !prefix.options.contains(PrefixOptions::NU)
                    })
                    .map(move |prefix| SpfIntraAreaNetwork {
                        vertex,
                        prefix: prefix.value,
                        prefix_options: prefix.options,
                        metric: prefix.metric,
                    })
            });
        Box::new(iter)
    }

    fn inter_area_networks<'a>(
        area: &'a Area<Self>,
        lsa_entries: &'a Arena<LsaEntry<Self>>,
    ) -> Box<dyn Iterator<Item = SpfInterAreaNetwork<Self>> + 'a> {
        let iter = area
            .state
            .lsdb
            .iter_by_type(
                lsa_entries,
                LsaFunctionCode::InterAreaPrefix.into(),
            )
            .map(|(_, lse)| &lse.data)
            .filter(|lsa| !lsa.hdr.is_maxage())
            .map(|lsa| {
                let lsa_body = lsa.body.as_inter_area_prefix().unwrap();
                SpfInterAreaNetwork {
                    adv_rtr: lsa.hdr.adv_rtr,
                    prefix: lsa_body.prefix,
                    prefix_options: lsa_body.prefix_options,
                    metric: lsa_body.metric,
                }
            });
        Box::new(iter)
    }

    fn inter_area_routers<'a>(
        lsdb: &'a Lsdb<Self>,
        lsa_entries: &'a Arena<LsaEntry<Self>>,
    ) -> Box<dyn Iterator<Item = SpfInterAreaRouter<Self>> + 'a> {
        let iter = lsdb
            .iter_by_type(
                lsa_entries,
                LsaFunctionCode::InterAreaRouter.into(),
            )
            .map(|(_, lse)| &lse.data)
            .filter(|lsa| !lsa.hdr.is_maxage())
            .map(|lsa| {
                let lsa_body = lsa.body.as_inter_area_router().unwrap();
                SpfInterAreaRouter {
                    adv_rtr: lsa.hdr.adv_rtr,
                    router_id: lsa_body.router_id,
                    options: lsa_body.options,
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
            .iter_by_type(lsa_entries, LsaFunctionCode::AsExternal.into())
            .map(|(_, lse)| &lse.data)
            .filter(|lsa| !lsa.hdr.is_maxage())
            .map(|lsa| external_network(lsa));
        Box::new(iter)
    }

    fn nssa_externals<'a>(
        area: &'a Area<Self>,
        lsa_entries: &'a Arena<LsaEntry<Self>>,
    ) -> Box<dyn Iterator<Item = SpfExternalNetwork<Self>> + 'a> {
        let iter = area
            .state
            .lsdb
            .iter_by_type(
                lsa_entries,
                LsaFunctionCode::NssaAsExternal.into(),
            )
            .map(|(_, lse)| &lse.data)
            .filter(|lsa| !lsa.hdr.is_maxage())
            .map(|lsa| external_network(lsa));
        Box::new(iter)
    }
}

// ===== helper functions =====

// Nexthops for a destination adjacent to the root: the outgoing interface
// comes from the parent link's Interface ID, and for router destinations
// the nexthop is the neighbor's link-local address.
fn nexthops_from_root(
    area: &Area<Ospfv3>,
    parent_link: Option<&LsaRouterLink>,
    dest_id: VertexId,
    dest_lsa: &VertexLsa,
    interfaces: &Arena<Interface<Ospfv3>>,
    neighbors: &Arena<Neighbor<Ospfv3>>,
    lsa_entries: &Arena<LsaEntry<Ospfv3>>,
) -> Result<Nexthops<IpAddr>, Error<Ospfv3>> {
    let parent_link = parent_link.unwrap();
    let (iface_idx, iface) = area
        .iface_indexes()
        .map(|iface_idx| (iface_idx, &interfaces[iface_idx]))
        .find(|(_, iface)| {
            iface.system.ifindex == Some(parent_link.iface_id)
        })
        .ok_or(Error::NexthopUnresolved(dest_id))?;

    let mut nexthops = Nexthops::new();
    match dest_lsa {
        VertexLsa::Router(dest_lsa) => {
            let nbr_router_id = dest_lsa.hdr.adv_rtr;
            let nexthop_addr =
                nexthop_lladdr(iface, nbr_router_id, neighbors, lsa_entries)
                    .ok_or(Error::NexthopUnresolved(dest_id))?;
            nexthops.insert(
                NexthopKey::new(iface_idx, Some(IpAddr::V6(nexthop_addr))),
                Nexthop::new(
                    iface_idx,
                    Some(IpAddr::V6(nexthop_addr)),
                    Some(nbr_router_id),
                ),
            );
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

// Nexthops for a router one transit network away from the root: the
// outgoing interface is inherited from the network, and the nexthop is
// the destination's link-local address on it.
fn nexthops_across_network(
    parent: &Vertex<Ospfv3>,
    dest_id: VertexId,
    dest_lsa: &VertexLsa,
    interfaces: &Arena<Interface<Ospfv3>>,
    neighbors: &Arena<Neighbor<Ospfv3>>,
    lsa_entries: &Arena<LsaEntry<Ospfv3>>,
) -> Result<Nexthops<IpAddr>, Error<Ospfv3>> {
    let iface_idx = parent
        .nexthops
        .values()
        .next()
        .ok_or(Error::NexthopUnresolved(dest_id))?
        .iface_idx;
    let iface = &interfaces[iface_idx];

    let dest_lsa = dest_lsa.as_router().unwrap();
    let nbr_router_id = dest_lsa.hdr.adv_rtr;
    let nexthop_addr =
        nexthop_lladdr(iface, nbr_router_id, neighbors, lsa_entries)
            .ok_or(Error::NexthopUnresolved(dest_id))?;

    let mut nexthops = Nexthops::new();
    nexthops.insert(
        NexthopKey::new(iface_idx, Some(IpAddr::V6(nexthop_addr))),
        Nexthop::new(
            iface_idx,
            Some(IpAddr::V6(nexthop_addr)),
            Some(nbr_router_id),
        ),
    );

    Ok(nexthops)
}

// Returns the link-local address used to reach the given neighbor on the
// given interface, preferably from the neighbor's Link-LSA, falling back
// to the source address of its packets.
fn nexthop_lladdr(
    iface: &Interface<Ospfv3>,
    nbr_router_id: Ipv4Addr,
    neighbors: &Arena<Neighbor<Ospfv3>>,
    lsa_entries: &Arena<LsaEntry<Ospfv3>>,
) -> Option<std::net::Ipv6Addr> {
    iface
        .state
        .lsdb
        .iter_by_type_advrtr(
            lsa_entries,
            LsaFunctionCode::Link.into(),
            nbr_router_id,
        )
        .map(|(_, lse)| &lse.data)
        .filter(|lsa| !lsa.hdr.is_maxage())
        .filter_map(|lsa| lsa.body.as_link())
        .map(|lsa_body| lsa_body.linklocal)
        .next()
        .or_else(|| {
            iface
                .state
                .nbrs_by_router_id
                .get(&nbr_router_id)
                .map(|nbr_idx| neighbors[*nbr_idx].src)
        })
}

fn external_network(lsa: &Arc<Lsa<Ospfv3>>) -> SpfExternalNetwork<Ospfv3> {
    let lsa_body = lsa.body.as_external().unwrap();

    SpfExternalNetwork {
        adv_rtr: lsa.hdr.adv_rtr,
        e_bit: lsa_body.flags.contains(LsaAsExternalFlags::E),
        prefix: lsa_body.prefix,
        prefix_options: lsa_body.prefix_options,
        metric: lsa_body.metric,
        fwd_addr: lsa_body.fwd_addr,
        tag: lsa_body.tag,
        // The P-bit of Type-7 LSAs lives in the prefix options.
        propagate: lsa_body.prefix_options.contains(PrefixOptions::P),
    }
}
