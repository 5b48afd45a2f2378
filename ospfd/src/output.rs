//
// Copyright (c) The Ospfd Project Contributors
//
// SPDX-License-Identifier: MIT
//

use std::sync::Arc;

use smallvec::{SmallVec, smallvec};

use crate::area::{Area, OptionsLocation};
use crate::collections::{Arena, NeighborIndex};
use crate::instance::InstanceUpView;
use crate::interface::{Interface, InterfaceType};
use crate::lsdb;
use crate::neighbor::{Neighbor, nsm};
use crate::network::MulticastAddr;
use crate::packet::lsa::{Lsa, LsaHdrVersion};
use crate::packet::{
    DbDescFlags, DbDescVersion, LsAckVersion, LsRequestVersion,
    LsUpdateVersion, Packet, PacketHdrVersion, PacketType,
};
use crate::tasks::messages::output::NetTxPacketMsg;
use crate::version::Version;

// ===== Database Description Packets =====

pub(crate) fn send_dbdesc<V>(
    nbr: &mut Neighbor<V>,
    iface: &Interface<V>,
    area: &Area<V>,
    instance: &InstanceUpView<'_, V>,
) where
    V: Version,
{
    // Describe as much of the remaining summary list as one packet holds.
    let mut budget = body_budget::<V>(iface) - V::PacketDbDesc::BASE_LENGTH;
    let mut lsa_hdrs = vec![];
    while budget >= V::LsaHdr::LENGTH {
        let Some((_, lsa)) = nbr.lists.db_summary.pop_first() else {
            break;
        };
        budget -= V::LsaHdr::LENGTH;

        // The stored header still carries the age at reception time.
        let mut lsa_hdr = lsa.hdr;
        lsa_hdr.set_age(lsa.age());
        lsa_hdrs.push(lsa_hdr);
    }

    // Clear the M-bit once the summary list is exhausted.
    if !nbr.dd_flags.contains(DbDescFlags::I)
        && nbr.lists.db_summary.is_empty()
    {
        nbr.dd_flags.remove(DbDescFlags::M);
    }

    let packet = V::PacketDbDesc::generate(
        packet_hdr(PacketType::DbDesc, iface, area, instance),
        V::area_options(
            area,
            OptionsLocation::new_packet(
                PacketType::DbDesc,
                iface.state.auth.is_some(),
            ),
        ),
        iface.system.mtu.unwrap_or(0),
        nbr.dd_flags,
        nbr.dd_seq_no,
        lsa_hdrs,
    );

    // The packet is retained verbatim: the master retransmits it until
    // echoed, the slave repeats it in response to duplicates.
    let msg = unicast_msg(nbr, iface, packet);
    nbr.last_sent_dbdesc = Some(msg.clone());
    iface.send_packet(msg);

    // The retransmission interval runs while master, and for the initial
    // packet of the exchange.
    if nbr.dd_flags.intersects(DbDescFlags::MS | DbDescFlags::I) {
        nbr.rxmt_dbdesc_start(iface, area, instance);
    }
}

pub(crate) fn rxmt_dbdesc<V>(nbr: &Neighbor<V>, iface: &Interface<V>)
where
    V: Version,
{
    if let Some(msg) = &nbr.last_sent_dbdesc {
        iface.send_packet(msg.clone());
    }
}

// ===== LS Request Packets =====

pub(crate) fn send_lsreq<V>(
    nbr: &mut Neighbor<V>,
    iface: &Interface<V>,
    area: &Area<V>,
    instance: &InstanceUpView<'_, V>,
) where
    V: Version,
{
    // Move one packet's worth of wanted LSAs onto the pending list; the
    // request repeats from there until answered.
    let mut budget = body_budget::<V>(iface);
    while budget >= V::PacketLsRequest::ENTRY_LENGTH {
        let Some((lsa_key, lsa_hdr)) = nbr.lists.ls_request.pop_first()
        else {
            break;
        };
        nbr.lists.ls_request_pending.insert(lsa_key, lsa_hdr);
        budget -= V::PacketLsRequest::ENTRY_LENGTH;
    }

    iface.send_packet(unicast_msg(nbr, iface, build_lsreq(nbr, iface, area, instance)));

    nbr.rxmt_lsreq_start(iface, area, instance);
}

pub(crate) fn rxmt_lsreq<V>(
    nbr: &Neighbor<V>,
    iface: &Interface<V>,
    area: &Area<V>,
    instance: &InstanceUpView<'_, V>,
) where
    V: Version,
{
    iface.send_packet(unicast_msg(nbr, iface, build_lsreq(nbr, iface, area, instance)));
}

fn build_lsreq<V>(
    nbr: &Neighbor<V>,
    iface: &Interface<V>,
    area: &Area<V>,
    instance: &InstanceUpView<'_, V>,
) -> Packet<V>
where
    V: Version,
{
    V::PacketLsRequest::generate(
        packet_hdr(PacketType::LsRequest, iface, area, instance),
        nbr.lists.ls_request_pending.keys().copied().collect(),
    )
}

// ===== LS Update Packets =====

pub(crate) fn send_lsupd<V>(
    nbr_idx: Option<NeighborIndex>,
    iface: &mut Interface<V>,
    area: &Area<V>,
    instance: &InstanceUpView<'_, V>,
    neighbors: &mut Arena<Neighbor<V>>,
) where
    V: Version,
{
    let dst = send_dest_iface(iface, neighbors);

    // Drain either the neighbor's unicast queue or the interface queue.
    let queue = match nbr_idx {
        Some(nbr_idx) => &mut neighbors[nbr_idx].lists.ls_update,
        None => &mut iface.state.ls_update_list,
    };
    let mut queue = std::mem::take(queue);

    while !queue.is_empty() {
        let budget = body_budget::<V>(iface) - V::PacketLsUpdate::BASE_LENGTH;
        let mut remaining = budget;
        let mut lsas = vec![];
        while let Some(entry) = queue.first_entry() {
            let length = entry.get().hdr.length();
            // An LSA bigger than the budget goes out alone, leaving the
            // rest to IP fragmentation.
            if length <= budget && length > remaining {
                break;
            }
            remaining = remaining.saturating_sub(length);
            lsas.push(aged_for_transmission(&entry.remove(), iface));
        }

        let packet = V::PacketLsUpdate::generate(
            packet_hdr(PacketType::LsUpdate, iface, area, instance),
            lsas,
        );
        iface.send_packet(NetTxPacketMsg {
            packet,
            src: iface.state.src_addr.unwrap(),
            dst: dst.clone(),
        });
    }
}

pub(crate) fn rxmt_lsupd<V>(
    nbr: &Neighbor<V>,
    iface: &Interface<V>,
    area: &Area<V>,
    instance: &InstanceUpView<'_, V>,
) where
    V: Version,
{
    // Refill one packet from the front of the retransmission list; the
    // interval keeps firing until the list drains.
    let budget = body_budget::<V>(iface) - V::PacketLsUpdate::BASE_LENGTH;
    let mut remaining = budget;
    let mut lsas = vec![];
    for lsa in nbr.lists.ls_rxmt.values() {
        let length = lsa.hdr.length();
        if length <= budget && length > remaining {
            break;
        }
        remaining = remaining.saturating_sub(length);
        lsas.push(aged_for_transmission(lsa, iface));
    }

    let packet = V::PacketLsUpdate::generate(
        packet_hdr(PacketType::LsUpdate, iface, area, instance),
        lsas,
    );
    iface.send_packet(unicast_msg(nbr, iface, packet));
}

// Copies an LSA for transmission, charging the outgoing interface's
// InfTransDelay against its age (RFC 2328 section 13.6).
fn aged_for_transmission<V>(lsa: &Arc<Lsa<V>>, iface: &Interface<V>) -> Lsa<V>
where
    V: Version,
{
    let mut lsa = (**lsa).clone();
    let age = std::cmp::min(
        lsa.age() + iface.config.transmit_delay,
        lsdb::LSA_MAX_AGE,
    );
    lsa.set_age(age);
    lsa
}

// ===== LS Ack Packets =====

pub(crate) fn send_lsack_direct<V>(
    nbr: &Neighbor<V>,
    iface: &Interface<V>,
    area: &Area<V>,
    instance: &InstanceUpView<'_, V>,
    lsa_hdr: &V::LsaHdr,
) where
    V: Version,
{
    let packet = V::PacketLsAck::generate(
        packet_hdr(PacketType::LsAck, iface, area, instance),
        vec![*lsa_hdr],
    );
    iface.send_packet(unicast_msg(nbr, iface, packet));
}

pub(crate) fn send_lsack_delayed<V>(
    iface: &mut Interface<V>,
    area: &Area<V>,
    instance: &InstanceUpView<'_, V>,
    neighbors: &Arena<Neighbor<V>>,
) where
    V: Version,
{
    let dst = send_dest_iface(iface, neighbors);

    while !iface.state.ls_ack_list.is_empty() {
        let mut budget = body_budget::<V>(iface);
        let mut lsa_hdrs = vec![];
        while budget >= V::LsaHdr::LENGTH {
            let Some((_, lsa_hdr)) = iface.state.ls_ack_list.pop_first()
            else {
                break;
            };
            budget -= V::LsaHdr::LENGTH;
            lsa_hdrs.push(lsa_hdr);
        }

        let packet = V::PacketLsAck::generate(
            packet_hdr(PacketType::LsAck, iface, area, instance),
            lsa_hdrs,
        );
        iface.send_packet(NetTxPacketMsg {
            packet,
            src: iface.state.src_addr.unwrap(),
            dst: dst.clone(),
        });
    }
}

// ===== helper functions =====

fn packet_hdr<V>(
    pkt_type: PacketType,
    iface: &Interface<V>,
    area: &Area<V>,
    instance: &InstanceUpView<'_, V>,
) -> V::PacketHdr
where
    V: Version,
{
    V::PacketHdr::generate(
        pkt_type,
        instance.state.router_id,
        area.id,
        iface.config.instance_id,
    )
}

// Space one packet's body may take on this interface.
fn body_budget<V>(iface: &Interface<V>) -> u16
where
    V: Version,
{
    V::max_packet_size(iface) - V::PacketHdr::LENGTH
}

// Wraps a packet for transmission to one neighbor. Point-to-point links
// address even unicast exchanges to AllSPFRouters.
fn unicast_msg<V>(
    nbr: &Neighbor<V>,
    iface: &Interface<V>,
    packet: Packet<V>,
) -> NetTxPacketMsg<V>
where
    V: Version,
{
    let dst = match iface.config.if_type {
        InterfaceType::PointToPoint => {
            *V::multicast_addr(MulticastAddr::AllSpfRtrs)
        }
        _ => nbr.src,
    };
    NetTxPacketMsg {
        packet,
        src: iface.state.src_addr.unwrap(),
        dst: smallvec![dst],
    }
}

// The destinations reaching all adjacent neighbors on the interface.
fn send_dest_iface<V>(
    iface: &Interface<V>,
    neighbors: &Arena<Neighbor<V>>,
) -> SmallVec<[V::NetIpAddr; 4]>
where
    V: Version,
{
    match iface.config.if_type {
        InterfaceType::Broadcast => {
            // The DR and BDR talk to AllSPFRouters; everyone else sends to
            // the (B)DR at AllDRouters.
            let group = if iface.is_dr_or_backup() {
                MulticastAddr::AllSpfRtrs
            } else {
                MulticastAddr::AllDrRtrs
            };
            smallvec![*V::multicast_addr(group)]
        }
        InterfaceType::NonBroadcast | InterfaceType::PointToMultipoint => {
            // Non-broadcast networks get per-neighbor unicasts.
            iface
                .nbr_indexes()
                .map(|nbr_idx| &neighbors[nbr_idx])
                .filter(|nbr| nbr.state >= nsm::State::Exchange)
                .map(|nbr| nbr.src)
                .collect()
        }
        InterfaceType::PointToPoint => {
            smallvec![*V::multicast_addr(MulticastAddr::AllSpfRtrs)]
        }
        InterfaceType::VirtualLink => {
            smallvec![iface.state.vlink_dst_addr.unwrap()]
        }
    }
}
