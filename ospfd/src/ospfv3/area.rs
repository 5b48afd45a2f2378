//
// Copyright (c) The Ospfd Project Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::{Ipv4Addr, Ipv6Addr};

use crate::area::{Area, AreaType, AreaVersion, OptionsLocation};
use crate::collections::Arena;
use crate::interface::Interface;
use crate::lsdb::LsaEntry;
use crate::ospfv3::packet::Options;
use crate::route::RouteRtr;
use crate::version::Ospfv3;

// OSPFv3 area state.
#[derive(Debug, Default)]
pub struct AreaState {
    // Link State ID allocator for inter-area summaries.
    pub next_summary_lsa_id: u32,
}

// ===== impl Ospfv3 =====

impl AreaVersion<Self> for Ospfv3 {
    type State = AreaState;

    fn area_options(area: &Area<Self>, _location: OptionsLocation) -> Options {
        let mut options = Options::V6 | Options::R;

        match area.config.area_type {
            AreaType::Normal => {
                options.insert(Options::E);
            }
            AreaType::Stub => (),
            AreaType::Nssa => {
                options.insert(Options::N);
            }
        }

        options
    }

    fn vlink_source_addr(
        _route_br: &RouteRtr<Self>,
        _interfaces: &Arena<Interface<Self>>,
    ) -> Option<Ipv6Addr> {
        // Virtual links aren't supported for OSPFv3: resolving the endpoint
        // addresses requires global-scope information the legacy LSAs don't
        // provide in a convenient form.
        None
    }

    fn vlink_neighbor_addr(
        _area: &Area<Self>,
        _router_id: Ipv4Addr,
        _lsa_entries: &Arena<LsaEntry<Self>>,
    ) -> Option<Ipv6Addr> {
        None
    }
}
