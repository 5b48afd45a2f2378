//
// Copyright (c) The Ospfd Project Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv4Addr;

use crate::area::{Area, AreaType, AreaVersion, OptionsLocation};
use crate::collections::Arena;
use crate::interface::Interface;
use crate::lsdb::LsaEntry;
use crate::ospfv2::packet::Options;
use crate::ospfv2::packet::lsa::{LsaRouterLinkType, LsaTypeCode};
use crate::packet::lsa::{LsaHdrVersion, LsaKey};
use crate::route::RouteRtr;
use crate::version::Ospfv2;

// ===== impl Ospfv2 =====

impl AreaVersion<Self> for Ospfv2 {
    type State = ();

    fn area_options(area: &Area<Self>, _location: OptionsLocation) -> Options {
        let mut options = Options::empty();

        match area.config.area_type {
            AreaType::Normal => {
                options.insert(Options::E);
            }
            AreaType::Stub => (),
            AreaType::Nssa => {
                // The N/P bit: NSSA capability in Hello packets, propagation
                // request in Type-7 LSA headers.
                options.insert(Options::NP);
            }
        }

        options
    }

    fn vlink_source_addr(
        route_br: &RouteRtr<Self>,
        interfaces: &Arena<Interface<Self>>,
    ) -> Option<Ipv4Addr> {
        // The virtual link source address is taken from the interface used
        // to reach the virtual link endpoint. If multiple ECMP paths exist,
        // only the first interface with a valid address is used.
        route_br.nexthops.values().find_map(|nexthop| {
            let iface = &interfaces[nexthop.iface_idx];
            iface.state.src_addr
        })
    }

    fn vlink_neighbor_addr(
        area: &Area<Self>,
        router_id: Ipv4Addr,
        lsa_entries: &Arena<LsaEntry<Self>>,
    ) -> Option<Ipv4Addr> {
        // Pick the address of the first numbered point-to-point or transit
        // link in the endpoint's Router-LSA for the transit area.
        let lsa_key =
            LsaKey::new(LsaTypeCode::Router.into(), router_id, router_id);
        let (_, lse) = area
            .state
            .lsdb
            .get(lsa_entries, &lsa_key)
            .filter(|(_, lse)| !lse.data.hdr.is_maxage())?;
        let lsa_body = lse.data.body.as_router().unwrap();
        lsa_body.links.iter().find_map(|link| match link.link_type {
            LsaRouterLinkType::PointToPoint
            | LsaRouterLinkType::TransitNetwork => Some(link.link_data),
            _ => None,
        })
    }
}
