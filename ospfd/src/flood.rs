//
// Copyright (c) The Ospfd Project Contributors
//
// SPDX-License-Identifier: MIT
//

use std::cmp::Ordering;
use std::collections::btree_map;
use std::sync::Arc;

use crate::area::Area;
use crate::collections::{Arena, InterfaceIndex, NeighborIndex};
use crate::instance::InstanceUpView;
use crate::interface::{Interface, ism};
use crate::lsdb::{self, LsdbRef};
use crate::neighbor::{Neighbor, nsm};
use crate::packet::lsa::{Lsa, LsaHdrVersion};
use crate::version::Version;

// ===== global functions =====

// Floods an LSA out of the interfaces its scope selects (RFC 2328 section
// 13.3). Returns whether the LSA went back out the interface it arrived
// on, which the receive path needs when deciding about delayed acks.
//
// The scope is implied by the database the LSA belongs to; for OSPFv3 the
// U-bit was already folded in when that database was selected.
pub(crate) fn flood<V>(
    instance: &InstanceUpView<'_, V>,
    areas: &Arena<Area<V>>,
    interfaces: &mut Arena<Interface<V>>,
    neighbors: &mut Arena<Neighbor<V>>,
    lsdb_ref: LsdbRef,
    lsa: &Arc<Lsa<V>>,
    src: Option<(InterfaceIndex, NeighborIndex)>,
) -> bool
where
    V: Version,
{
    let mut targets = vec![];
    match lsdb_ref {
        LsdbRef::Link(area_idx, iface_idx) => {
            targets.push((area_idx, iface_idx));
        }
        LsdbRef::Area(area_idx) => {
            let area = &areas[area_idx];
            targets
                .extend(area.iface_indexes().map(|idx| (area_idx, idx)));
        }
        LsdbRef::As => {
            for (area_idx, area) in areas.iter() {
                // AS-scope LSAs stay out of stub and NSSA areas.
                if !V::lsa_type_is_valid(
                    Some(area.config.area_type),
                    None,
                    lsa.hdr.lsa_type(),
                ) {
                    continue;
                }
                targets
                    .extend(area.iface_indexes().map(|idx| (area_idx, idx)));
            }
        }
    }

    let mut flooded_back = false;
    for (area_idx, iface_idx) in targets {
        let area = &areas[area_idx];
        flooded_back |= flood_interface(
            area, iface_idx, instance, interfaces, neighbors, lsa, src,
        );
    }
    flooded_back
}

// ===== helper functions =====

// One interface's share of the flooding procedure: examine each adjacency
// (step 1), and transmit only if at least one of them now retains the LSA
// and the DR/BDR suppression rules (steps 2-4) don't apply.
fn flood_interface<V>(
    area: &Area<V>,
    iface_idx: InterfaceIndex,
    instance: &InstanceUpView<'_, V>,
    interfaces: &mut Arena<Interface<V>>,
    neighbors: &mut Arena<Neighbor<V>>,
    lsa: &Arc<Lsa<V>>,
    src: Option<(InterfaceIndex, NeighborIndex)>,
) -> bool
where
    V: Version,
{
    let iface = &mut interfaces[iface_idx];
    let lsa_key = lsa.hdr.key();

    let mut retained = false;
    for nbr_idx in iface.nbr_indexes().collect::<Vec<_>>() {
        let nbr = &mut neighbors[nbr_idx];
        let from_this_nbr =
            src.is_some_and(|(_, src_nbr_idx)| src_nbr_idx == nbr_idx);
        retained |= examine_adjacency(
            nbr,
            iface,
            area,
            instance,
            lsa,
            from_this_nbr,
        );
    }

    // Step 2: nobody on this interface needs the LSA.
    if !retained {
        return false;
    }

    // Steps 3 and 4 apply only on the interface the LSA arrived through:
    // an LSA received from the DR or BDR was already seen by everyone, and
    // a BDR leaves reflooding onto the receiving network to the DR.
    let mut flooded_back = false;
    if let Some((src_iface_idx, src_nbr_idx)) = src
        && src_iface_idx == iface_idx
    {
        let src_net_id = neighbors[src_nbr_idx].network_id();
        if iface.state.dr == Some(src_net_id)
            || iface.state.bdr == Some(src_net_id)
        {
            return false;
        }
        if iface.state.ism_state == ism::State::Backup {
            return false;
        }
        flooded_back = true;
    }

    // Step 5. The transmission is queued so that LSAs flooded in quick
    // succession share an update packet.
    iface.enqueue_ls_update(area, instance, lsa_key, lsa.clone());

    flooded_back
}

// Steps 1.a through 1.d for one adjacency. Returns whether the LSA was
// placed on this neighbor's retransmission list.
fn examine_adjacency<V>(
    nbr: &mut Neighbor<V>,
    iface: &Interface<V>,
    area: &Area<V>,
    instance: &InstanceUpView<'_, V>,
    lsa: &Arc<Lsa<V>>,
    from_this_nbr: bool,
) -> bool
where
    V: Version,
{
    let lsa_key = lsa.hdr.key();

    // 1.a: adjacencies still in database exchange startup don't partake in
    // flooding.
    if nbr.state < nsm::State::Exchange {
        return false;
    }

    // The neighbor may not accept this LSA type at all (stub/NSSA areas,
    // missing capability bits).
    if !V::lsa_type_is_valid(
        Some(area.config.area_type),
        nbr.options,
        lsa.hdr.lsa_type(),
    ) {
        return false;
    }

    // 1.b: a copy still wanted from this neighbor settles precedence. An
    // older wanted copy means ours is stale; the same or a newer one means
    // the request is moot.
    if nbr.state != nsm::State::Full {
        use btree_map::Entry::{Occupied, Vacant};
        let requested = match nbr.lists.ls_request.entry(lsa_key) {
            Occupied(o) => Some(o),
            Vacant(_) => {
                match nbr.lists.ls_request_pending.entry(lsa_key) {
                    Occupied(o) => Some(o),
                    Vacant(_) => None,
                }
            }
        };
        if let Some(o) = requested {
            match lsdb::lsa_compare::<V>(&lsa.hdr, o.get()) {
                Ordering::Less => return false,
                cmp => {
                    o.remove();
                    nbr.loading_done_check(iface, area, instance);
                    if cmp == Ordering::Equal {
                        return false;
                    }
                }
            }
        }
    }

    // 1.c: the sender has the LSA by definition.
    if from_this_nbr {
        return false;
    }

    // 1.d: retain for retransmission until acknowledged.
    nbr.lists.ls_rxmt.insert(lsa_key, lsa.clone());
    nbr.rxmt_lsupd_start_check(iface, area, instance);
    true
}
