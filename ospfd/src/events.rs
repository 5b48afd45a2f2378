//
// Copyright (c) The Ospfd Project Contributors
//
// SPDX-License-Identifier: MIT
//

use std::cmp::Ordering;
use std::collections::btree_map;
use std::net::Ipv4Addr;
use std::sync::Arc;

use chrono::Utc;

use crate::area::{Area, AreaType};
use crate::collections::{AreaIndex, Arena, InterfaceIndex, NeighborIndex};
use crate::debug;
use crate::error::{Error, RejectReason};
use crate::flood::flood;
use crate::instance::{InstanceArenas, InstanceUpView};
use crate::interface::{Interface, ism};
use crate::lsdb::{
    self, LsaEntry, LsaEntryFlags, LsaFlushReason, LsaOriginateEvent, LsdbKey,
    LsdbRef, lsa_compare,
};
use crate::neighbor::{
    LastDbDesc, Neighbor, RxmtPacketType,
    nsm::{self, SeqNoMismatchReason},
};
use crate::packet::error::DecodeResult;
use crate::packet::lsa::{
    Lsa, LsaHdrVersion, LsaKey, LsaScope, LsaTypeVersion,
};
use crate::packet::{
    DbDescFlags, DbDescVersion, HelloVersion, LsAckVersion, LsRequestVersion,
    LsUpdateVersion, OptionsVersion, Packet, PacketBase, PacketHdrVersion,
    PacketType,
};
use crate::version::Version;
use crate::{output, spf};

// ===== Interface FSM event =====

pub(crate) fn process_ism_event<V>(
    instance: &InstanceUpView<'_, V>,
    arenas: &mut InstanceArenas<V>,
    area_id: Ipv4Addr,
    ifname: String,
    event: ism::Event,
) -> Result<(), Error<V>>
where
    V: Version,
{
    let area_idx = arenas.area_idx(area_id)?;
    let area = &arenas.areas[area_idx];
    let iface_idx = area.iface_idx(&ifname)?;

    let iface = &mut arenas.interfaces[iface_idx];
    iface.fsm(
        area,
        instance,
        &mut arenas.neighbors,
        &arenas.lsa_entries,
        event,
    );

    Ok(())
}

// ===== Neighbor FSM event =====

pub(crate) fn process_nsm_event<V>(
    instance: &InstanceUpView<'_, V>,
    arenas: &mut InstanceArenas<V>,
    area_id: Ipv4Addr,
    ifname: String,
    nbr_src: V::NetIpAddr,
    event: nsm::Event,
) -> Result<(), Error<V>>
where
    V: Version,
{
    let area_idx = arenas.area_idx(area_id)?;
    let area = &arenas.areas[area_idx];
    let iface_idx = area.iface_idx(&ifname)?;
    let iface = &mut arenas.interfaces[iface_idx];
    let nbr_idx = iface.nbr_idx_by_src(&nbr_src)?;

    let nbr = &mut arenas.neighbors[nbr_idx];
    nbr.fsm(iface, area, instance, &arenas.lsa_entries, event);
    if nbr.state == nsm::State::Down {
        iface.nbr_detach(&mut arenas.neighbors, nbr_idx);

        // The Hello task embeds the neighbor list.
        iface.sync_hello_tx(area, instance);
    }

    Ok(())
}

// ===== Network packet receipt =====

pub(crate) fn process_packet<V>(
    instance: &mut InstanceUpView<'_, V>,
    arenas: &mut InstanceArenas<V>,
    area_id: Ipv4Addr,
    ifname: String,
    src: V::NetIpAddr,
    dst: V::NetIpAddr,
    packet: DecodeResult<Packet<V>>,
) -> Result<(), Error<V>>
where
    V: Version,
{
    let area_idx = arenas.area_idx(area_id)?;
    let area = &arenas.areas[area_idx];
    let iface_idx = area.iface_idx(&ifname)?;
    let iface = &mut arenas.interfaces[iface_idx];

    // Malformed packets only bump a counter; no protocol state is touched.
    let packet = match packet {
        Ok(packet) => packet,
        Err(error) => {
            iface.state.rx_error_count += 1;
            return Err(Error::PacketDecodeError(error));
        }
    };

    // Ignore packets received on inoperational or passive interfaces.
    if iface.is_down() || iface.is_passive() {
        return Ok(());
    }

    V::validate_packet_dst(iface, dst)?;
    V::validate_packet_src(iface, src)?;

    // The packet must have entered through the right area.
    let pkt_type = packet.hdr().pkt_type();
    if packet.hdr().area_id() != area.id {
        iface.state.rx_error_count += 1;
        return Err(Error::PacketRejected(
            iface.name.clone(),
            src,
            pkt_type,
            RejectReason::WrongAreaId(packet.hdr().area_id()),
        ));
    }

    // OSPFv3: Instance ID mismatches are expected in normal operation and
    // do not constitute an error.
    if !V::packet_instance_id_match(iface, packet.hdr()) {
        return Ok(());
    }

    // Replay protection: discard packets whose cryptographic sequence
    // number regressed, tracked per packet type to account for the
    // prioritization rules of RFC 4222.
    let router_id = packet.hdr().router_id();
    if let Some(auth_seqno) = packet.hdr().auth_seqno()
        && let Some(nbr_idx) = V::find_neighbor(iface, &src, router_id)
    {
        let nbr = &mut arenas.neighbors[nbr_idx];
        let nbr_auth_seqno = nbr.auth_seqno.entry(pkt_type).or_default();
        if auth_seqno < *nbr_auth_seqno {
            iface.state.rx_error_count += 1;
            return Err(Error::PacketAuthStaleSeqno(src));
        }
        *nbr_auth_seqno = auth_seqno;
    }

    debug::packet_rx(&iface.name, &src, &dst, &packet);

    if let Packet::Hello(pkt) = packet {
        return process_packet_hello(
            iface,
            area,
            instance,
            &mut arenas.neighbors,
            &arenas.lsa_entries,
            src,
            pkt,
        );
    }

    // Non-Hello packets not matching any active neighbor are discarded.
    let nbr_idx = V::find_neighbor(iface, &src, router_id)
        .ok_or(Error::UnknownNeighbor(src, router_id))?;

    match packet {
        Packet::Hello(_) => unreachable!(),
        Packet::DbDesc(pkt) => {
            let nbr = &mut arenas.neighbors[nbr_idx];
            process_packet_dbdesc(
                nbr,
                iface,
                area,
                instance,
                &arenas.lsa_entries,
                src,
                pkt,
            )
        }
        Packet::LsRequest(pkt) => {
            let nbr = &mut arenas.neighbors[nbr_idx];
            process_packet_lsreq(
                nbr,
                iface,
                area,
                instance,
                &arenas.lsa_entries,
                pkt,
            )
        }
        Packet::LsUpdate(pkt) => process_packet_lsupd(
            nbr_idx, iface_idx, area_idx, instance, arenas, pkt,
        ),
        Packet::LsAck(pkt) => {
            process_packet_lsack(&mut arenas.neighbors[nbr_idx], pkt)
        }
    }
}

fn process_packet_hello<V>(
    iface: &mut Interface<V>,
    area: &Area<V>,
    instance: &InstanceUpView<'_, V>,
    neighbors: &mut Arena<Neighbor<V>>,
    lsa_entries: &Arena<LsaEntry<V>>,
    src: V::NetIpAddr,
    hello: V::PacketHello,
) -> Result<(), Error<V>>
where
    V: Version,
{
    let protocol_input = &instance.tx.protocol_input;

    // A Hello failing the configuration checks is dropped without creating
    // or advancing any neighbor.
    if let Err(reason) = hello_sanity_checks(iface, area, instance, &hello) {
        iface.state.rx_error_count += 1;
        return Err(Error::PacketRejected(
            iface.name.clone(),
            src,
            PacketType::Hello,
            reason,
        ));
    }

    // Find or create the neighbor.
    let router_id = hello.router_id();
    let nbr_idx = match V::find_neighbor(iface, &src, router_id) {
        Some(nbr_idx) => nbr_idx,
        None => {
            let mut nbr = Neighbor::new(router_id, src);
            nbr.iface_id = hello.iface_id();
            nbr.priority = hello.priority();
            if iface.is_broadcast_or_nbma() {
                nbr.dr = hello.dr();
                nbr.bdr = hello.bdr();
            }
            let nbr_idx = iface.nbr_attach(neighbors, nbr);

            // The Hello task embeds the neighbor list.
            iface.sync_hello_tx(area, instance);

            nbr_idx
        }
    };
    let nbr = &mut neighbors[nbr_idx];

    // On point-to-point links the neighbor is identified by Router ID and
    // may show up from a new address; on multi-access networks it is
    // identified by address and may show up with a new Router ID. Keep
    // both lookup maps in sync.
    if nbr.src != src {
        iface.state.nbrs_by_src.remove(&nbr.src);
        iface.state.nbrs_by_src.insert(src, nbr_idx);
        nbr.src = src;
    }
    if nbr.router_id != router_id {
        iface.state.nbrs_by_router_id.remove(&nbr.router_id);
        iface.state.nbrs_by_router_id.insert(router_id, nbr_idx);
        nbr.router_id = router_id;
    }

    nbr.fsm(iface, area, instance, lsa_entries, nsm::Event::HelloRcvd);

    // Whether the sender lists us decides between 1-Way and 2-Way.
    let heard = hello
        .neighbors()
        .iter()
        .any(|id| *id == instance.state.router_id);
    if !heard {
        nbr.fsm(iface, area, instance, lsa_entries, nsm::Event::OneWayRcvd);

        nbr.iface_id = hello.iface_id();
        if iface.is_broadcast_or_nbma() {
            nbr.priority = hello.priority();
            nbr.dr = hello.dr();
            nbr.bdr = hello.bdr();
        }
        return Ok(());
    }
    nbr.fsm(iface, area, instance, lsa_entries, nsm::Event::TwoWayRcvd);

    // Check for Interface ID change (OSPFv3 only).
    if hello.iface_id() != nbr.iface_id {
        nbr.iface_id = hello.iface_id();
        protocol_input.lsa_orig_event(
            LsaOriginateEvent::NeighborInterfaceIdChange {
                area_id: area.id,
                ifname: iface.name.clone(),
            },
        );
    }

    // Examine the rest of the Hello. Point-to-MultiPoint interfaces are
    // exempt per errata 4022 of RFC 2328.
    if iface.is_broadcast_or_nbma() {
        if hello.priority() != nbr.priority {
            nbr.priority = hello.priority();
            protocol_input.ism_event(
                area.id,
                iface.name.clone(),
                ism::Event::NbrChange,
            );
        }

        // A neighbor declaring itself (or declining to declare a backup)
        // ends the waiting period.
        let nbr_net_id = nbr.network_id();
        if iface.state.ism_state == ism::State::Waiting
            && ((hello.dr() == Some(nbr_net_id) && hello.bdr().is_none())
                || hello.bdr() == Some(nbr_net_id))
        {
            protocol_input.ism_event(
                area.id,
                iface.name.clone(),
                ism::Event::BackupSeen,
            );
        }

        // A neighbor entering or leaving the DR/BDR role reruns the
        // election.
        let was_dr = nbr.dr == Some(nbr_net_id);
        let is_dr = hello.dr() == Some(nbr_net_id);
        let was_bdr = nbr.bdr == Some(nbr_net_id);
        let is_bdr = hello.bdr() == Some(nbr_net_id);
        if was_dr != is_dr || was_bdr != is_bdr {
            protocol_input.ism_event(
                area.id,
                iface.name.clone(),
                ism::Event::NbrChange,
            );
        }

        nbr.dr = hello.dr();
        nbr.bdr = hello.bdr();
    }

    Ok(())
}

fn hello_sanity_checks<V>(
    iface: &Interface<V>,
    area: &Area<V>,
    instance: &InstanceUpView<'_, V>,
    hello: &V::PacketHello,
) -> Result<(), RejectReason>
where
    V: Version,
{
    // OSPF version-specific hello validation.
    V::validate_hello(iface, hello)?;

    if hello.hello_interval() != iface.config.hello_interval {
        return Err(RejectReason::HelloIntervalMismatch(
            hello.hello_interval(),
        ));
    }

    if hello.dead_interval() != iface.config.dead_interval as u32 {
        return Err(RejectReason::DeadIntervalMismatch(
            hello.dead_interval(),
        ));
    }

    // The E-bit must be set on regular areas and clear on stub/NSSA areas.
    let e_bit_expected = area.config.area_type == AreaType::Normal;
    if hello.options().e_bit() != e_bit_expected {
        return Err(RejectReason::ExternalOptionMismatch);
    }

    // The N-bit must match the area's NSSA status.
    let n_bit_expected = area.config.area_type == AreaType::Nssa;
    if hello.options().n_bit() != n_bit_expected {
        return Err(RejectReason::NssaOptionMismatch);
    }

    if hello.router_id() == instance.state.router_id {
        return Err(RejectReason::OwnRouterId);
    }

    Ok(())
}

fn process_packet_dbdesc<V>(
    nbr: &mut Neighbor<V>,
    iface: &mut Interface<V>,
    area: &Area<V>,
    instance: &InstanceUpView<'_, V>,
    lsa_entries: &Arena<LsaEntry<V>>,
    src: V::NetIpAddr,
    dbdesc: V::PacketDbDesc,
) -> Result<(), Error<V>>
where
    V: Version,
{
    // A neighbor announcing an MTU above ours could send updates we cannot
    // receive (RFC 2328 section 10.6).
    if !iface.config.mtu_ignore
        && dbdesc.mtu() > iface.system.mtu.unwrap_or(u16::MAX)
    {
        return Err(Error::PacketRejected(
            iface.name.clone(),
            src,
            PacketType::DbDesc,
            RejectReason::MtuTooLarge(dbdesc.mtu()),
        ));
    }

    match nbr.state {
        nsm::State::Down | nsm::State::Attempt | nsm::State::TwoWay => {
            return Err(Error::DbDescIgnored(nbr.router_id, nbr.state));
        }
        nsm::State::Init | nsm::State::ExStart => {
            if nbr.state == nsm::State::Init {
                nbr.fsm(
                    iface,
                    area,
                    instance,
                    lsa_entries,
                    nsm::Event::TwoWayRcvd,
                );
                if nbr.state != nsm::State::ExStart {
                    return Ok(());
                }
            }

            if !dbdesc_negotiate(nbr, instance, &dbdesc) {
                return Ok(());
            }
            nbr.options = Some(dbdesc.options());
            nbr.fsm(
                iface,
                area,
                instance,
                lsa_entries,
                nsm::Event::NegotiationDone,
            );
        }
        nsm::State::Exchange => {
            // A duplicate makes the slave retransmit its previous reply;
            // the master ignores it.
            if nbr.dbdesc_is_dup(&dbdesc) {
                if !nbr.dd_flags.contains(DbDescFlags::MS) {
                    output::rxmt_dbdesc(nbr, iface);
                }
                return Ok(());
            }

            if let Some(reason) = dbdesc_consistency_check(nbr, &dbdesc) {
                nbr.fsm(
                    iface,
                    area,
                    instance,
                    lsa_entries,
                    nsm::Event::SeqNoMismatch(reason),
                );
                return Ok(());
            }
        }
        nsm::State::Loading | nsm::State::Full => {
            if nbr.dbdesc_is_dup(&dbdesc) {
                if !nbr.dd_flags.contains(DbDescFlags::MS) {
                    output::rxmt_dbdesc(nbr, iface);
                }
                return Ok(());
            }

            // A non-duplicate this late means the exchange must restart.
            nbr.fsm(
                iface,
                area,
                instance,
                lsa_entries,
                nsm::Event::SeqNoMismatch(SeqNoMismatchReason::UnexpectedDbDesc),
            );
            return Ok(());
        }
    }

    // The packet was accepted; its headers feed the request list and the
    // exchange advances one step.
    nbr.rxmt_dbdesc_stop();

    if let Err(reason) =
        dbdesc_absorb_headers(nbr, iface, area, instance, &dbdesc, lsa_entries)
    {
        nbr.fsm(
            iface,
            area,
            instance,
            lsa_entries,
            nsm::Event::SeqNoMismatch(reason),
        );
        return Ok(());
    }

    // Start requesting LSAs as soon as the first headers arrive.
    if !nbr.lists.ls_request.is_empty()
        && nbr.lists.ls_request_pending.is_empty()
    {
        output::send_lsreq(nbr, iface, area, instance);
    }

    dbdesc_advance(nbr, iface, area, instance, lsa_entries, &dbdesc);

    // Save last received Database Description packet.
    nbr.last_rcvd_dbdesc = Some(LastDbDesc {
        options: dbdesc.options(),
        dd_flags: dbdesc.dd_flags(),
        dd_seq_no: dbdesc.dd_seq_no(),
    });

    Ok(())
}

// Master/slave negotiation (RFC 2328 section 10.8): the higher Router ID
// becomes master and the slave adopts the master's DD sequence number.
// Returns whether the negotiation concluded.
fn dbdesc_negotiate<V>(
    nbr: &mut Neighbor<V>,
    instance: &InstanceUpView<'_, V>,
    dbdesc: &V::PacketDbDesc,
) -> bool
where
    V: Version,
{
    if dbdesc
        .dd_flags()
        .contains(DbDescFlags::I | DbDescFlags::M | DbDescFlags::MS)
        && dbdesc.lsa_hdrs().is_empty()
        && dbdesc.router_id() > instance.state.router_id
    {
        // The neighbor is master.
        nbr.dd_flags.remove(DbDescFlags::MS);
        nbr.dd_seq_no = dbdesc.dd_seq_no();
        true
    } else {
        // This router is master if the neighbor echoed our sequence number
        // and dropped its claim; anything else is ignored.
        !dbdesc.dd_flags().contains(DbDescFlags::I | DbDescFlags::MS)
            && dbdesc.dd_seq_no() == nbr.dd_seq_no
            && dbdesc.router_id() < instance.state.router_id
    }
}

// In-exchange validation of a received Database Description packet
// (RFC 2328 section 10.6). Any failure restarts the exchange.
fn dbdesc_consistency_check<V>(
    nbr: &Neighbor<V>,
    dbdesc: &V::PacketDbDesc,
) -> Option<SeqNoMismatchReason>
where
    V: Version,
{
    let last = nbr.last_rcvd_dbdesc.as_ref().unwrap();

    if dbdesc.dd_flags().contains(DbDescFlags::I)
        || dbdesc.dd_flags().contains(DbDescFlags::MS)
            != last.dd_flags.contains(DbDescFlags::MS)
    {
        return Some(SeqNoMismatchReason::InconsistentFlags);
    }
    if dbdesc.options() != last.options {
        return Some(SeqNoMismatchReason::InconsistentOptions);
    }

    // The master expects its own sequence number echoed back; the slave
    // expects the next one.
    let expected = if nbr.dd_flags.contains(DbDescFlags::MS) {
        nbr.dd_seq_no
    } else {
        nbr.dd_seq_no + 1
    };
    if dbdesc.dd_seq_no() != expected {
        return Some(SeqNoMismatchReason::InconsistentSeqNo);
    }

    None
}

// Feeds the LSA headers of an accepted Database Description packet into
// the neighbor's request list (RFC 2328 section 10.6, step "the packet is
// accepted").
fn dbdesc_absorb_headers<V>(
    nbr: &mut Neighbor<V>,
    iface: &Interface<V>,
    area: &Area<V>,
    instance: &InstanceUpView<'_, V>,
    dbdesc: &V::PacketDbDesc,
    lsa_entries: &Arena<LsaEntry<V>>,
) -> Result<(), SeqNoMismatchReason>
where
    V: Version,
{
    for lsa_hdr in dbdesc.lsa_hdrs() {
        // A type the area or adjacency cannot carry poisons the whole
        // exchange.
        if !V::lsa_type_is_valid(
            Some(area.config.area_type),
            nbr.options,
            lsa_hdr.lsa_type(),
        ) {
            return Err(SeqNoMismatchReason::InvalidLsaType);
        }

        // RFC 5243: drop from the summary list whatever the neighbor
        // already has in the same or a newer instance.
        let lsa_key = lsa_hdr.key();
        if let btree_map::Entry::Occupied(o) =
            nbr.lists.db_summary.entry(lsa_key)
            && lsa_compare::<V>(&o.get().hdr, lsa_hdr) != Ordering::Greater
        {
            o.remove();
        }

        // Request the LSA unless the database copy is at least as recent.
        let lsdb = match lsa_hdr.lsa_type().scope() {
            LsaScope::Link => &iface.state.lsdb,
            LsaScope::Area => &area.state.lsdb,
            LsaScope::As => &instance.state.lsdb,
            LsaScope::Unknown => unreachable!(),
        };
        if let Some((_, lse)) = lsdb.get(lsa_entries, &lsa_key)
            && lsa_compare::<V>(&lse.data.hdr, lsa_hdr) != Ordering::Less
        {
            continue;
        }
        nbr.lists.ls_request.insert(lsa_key, *lsa_hdr);
    }

    Ok(())
}

// Advances the exchange one step (RFC 2328 section 10.8): the master
// increments the sequence number and polls again, the slave adopts the
// master's number and echoes.
fn dbdesc_advance<V>(
    nbr: &mut Neighbor<V>,
    iface: &mut Interface<V>,
    area: &Area<V>,
    instance: &InstanceUpView<'_, V>,
    lsa_entries: &Arena<LsaEntry<V>>,
    dbdesc: &V::PacketDbDesc,
) where
    V: Version,
{
    let is_master = nbr.dd_flags.contains(DbDescFlags::MS);
    let both_done = !nbr.dd_flags.contains(DbDescFlags::M)
        && !dbdesc.dd_flags().contains(DbDescFlags::M);

    if is_master {
        nbr.dd_seq_no += 1;
        if !both_done {
            output::send_dbdesc(nbr, iface, area, instance);
        }
    } else {
        nbr.dd_seq_no = dbdesc.dd_seq_no();
        output::send_dbdesc(nbr, iface, area, instance);
    }

    if both_done {
        nbr.fsm(iface, area, instance, lsa_entries, nsm::Event::ExchangeDone);

        // The slave must hold on to its last reply for RouterDeadInterval
        // seconds, to answer retransmissions from a master that missed it.
        if !is_master {
            let dbdesc_free_timer =
                crate::tasks::dbdesc_free_timer(nbr, iface, area, instance);
            nbr.tasks.dbdesc_free_timer = Some(dbdesc_free_timer);
        }
    }
}

fn process_packet_lsreq<V>(
    nbr: &mut Neighbor<V>,
    iface: &mut Interface<V>,
    area: &Area<V>,
    instance: &InstanceUpView<'_, V>,
    lsa_entries: &Arena<LsaEntry<V>>,
    ls_req: V::PacketLsRequest,
) -> Result<(), Error<V>>
where
    V: Version,
{
    if nbr.state < nsm::State::Exchange {
        debug::packet_rx_ignored(nbr.router_id, nbr.state);
        return Ok(());
    }

    for lsa_key in ls_req.entries() {
        let lsdb = match lsa_key.lsa_type.scope() {
            LsaScope::Link => &iface.state.lsdb,
            LsaScope::Area => &area.state.lsdb,
            LsaScope::As => &instance.state.lsdb,
            // OSPFv3: ignore requests for LSAs of unknown scope.
            LsaScope::Unknown => continue,
        };

        // A request for something we do not have means the exchange went
        // wrong on one of the two sides.
        let Some((_, lse)) = lsdb.get(lsa_entries, lsa_key) else {
            nbr.fsm(iface, area, instance, lsa_entries, nsm::Event::BadLsReq);
            return Ok(());
        };
        nbr.lists.ls_update.insert(*lsa_key, lse.data.clone());
    }

    // Schedule transmission of the answering LS Update.
    if !nbr.lists.ls_update.is_empty() {
        instance.tx.protocol_input.send_lsupd(
            area.id,
            iface.name.clone(),
            Some(nbr.src),
        );
    }

    Ok(())
}

fn process_packet_lsupd<V>(
    nbr_idx: NeighborIndex,
    iface_idx: InterfaceIndex,
    area_idx: AreaIndex,
    instance: &mut InstanceUpView<'_, V>,
    arenas: &mut InstanceArenas<V>,
    ls_upd: V::PacketLsUpdate,
) -> Result<(), Error<V>>
where
    V: Version,
{
    let nbr = &arenas.neighbors[nbr_idx];
    if nbr.state < nsm::State::Exchange {
        debug::packet_rx_ignored(nbr.router_id, nbr.state);
        return Ok(());
    }

    // Process the LSAs in the order they are carried in the packet.
    for lsa in ls_upd.into_lsas() {
        let stop = process_packet_lsupd_lsa(
            nbr_idx, iface_idx, area_idx, instance, arenas, lsa,
        );
        if stop {
            break;
        }
    }

    Ok(())
}

// One received LSA through the acceptance rules of RFC 2328 section 13.
// Returns whether processing of the whole LS Update packet should stop.
fn process_packet_lsupd_lsa<V>(
    nbr_idx: NeighborIndex,
    iface_idx: InterfaceIndex,
    area_idx: AreaIndex,
    instance: &mut InstanceUpView<'_, V>,
    arenas: &mut InstanceArenas<V>,
    #[allow(unused_mut)] mut lsa: Lsa<V>,
) -> bool
where
    V: Version,
{
    let nbr = &arenas.neighbors[nbr_idx];
    let iface = &mut arenas.interfaces[iface_idx];
    let area = &arenas.areas[area_idx];

    // Generate raw data that might be missing for LSAs received in testing
    // mode.
    #[cfg(feature = "testing")]
    if lsa.raw.is_empty() {
        lsa.refresh_raw();
    }

    // (1) Validate the LSA (not only the checksum as the RFC asks for).
    if let Err(error) = lsa.validate() {
        iface.state.rx_error_count += 1;
        debug::lsa_discard::<V>(nbr.router_id, &lsa.hdr, error);
        return false;
    }

    // (2-3) The LSA type must be acceptable to this area and neighbor.
    if !V::lsa_type_is_valid(
        Some(area.config.area_type),
        nbr.options,
        lsa.hdr.lsa_type(),
    ) {
        return false;
    }

    // (5) Find the database copy, if any.
    let lsdb_ref =
        V::lsdb_ref_by_lsa_type(area_idx, iface_idx, lsa.hdr.lsa_type());
    let lsdb = match lsdb_ref {
        LsdbRef::Link(..) => &iface.state.lsdb,
        LsdbRef::Area(_) => &area.state.lsdb,
        LsdbRef::As => &instance.state.lsdb,
    };
    let lsa_key = lsa.hdr.key();
    let lse = lsdb.get(&arenas.lsa_entries, &lsa_key).map(|(_, lse)| lse);

    // (4) A MaxAge LSA with no database copy, when no neighbor is mid
    // database exchange, is acknowledged and forgotten.
    if lsa.hdr.is_maxage()
        && lse.is_none()
        && !arenas
            .neighbors
            .iter()
            .any(|(_, nbr)| nbr.state.is_database_exchange())
    {
        let nbr = &arenas.neighbors[nbr_idx];
        output::send_lsack_direct(nbr, iface, area, instance, &lsa.hdr);
        return false;
    }

    // (5 cont.) No database copy, or the received instance is newer.
    let lsa_cmp = lse.map(|lse| lsa_compare::<V>(&lse.data.hdr, &lsa.hdr));
    if matches!(lsa_cmp, None | Some(Ordering::Less)) {
        // (5.a) MinLSArrival rate limit.
        if let Some(lse) = lse
            && lsdb::lsa_min_arrival_check(lse)
        {
            let nbr = &arenas.neighbors[nbr_idx];
            debug::lsa_min_arrival_discard::<V>(nbr.router_id, &lsa.hdr);
            return false;
        }

        let lsa = Arc::new(lsa);

        // (5.b) Immediately flood the new instance.
        let flooded_back = flood(
            instance,
            &arenas.areas,
            &mut arenas.interfaces,
            &mut arenas.neighbors,
            lsdb_ref,
            &lsa,
            Some((iface_idx, nbr_idx)),
        );

        // (5.c-d) Install the new instance; installation also clears the
        // old copy from all retransmission lists.
        let lse_idx = lsdb::install(instance, arenas, lsdb_ref, lsa);
        arenas.lsa_entries[lse_idx]
            .flags
            .insert(LsaEntryFlags::RECEIVED);

        instance.state.rx_lsa_count += 1;
        instance.state.discontinuity_time = Utc::now();

        // (5.e) Possibly acknowledge the receipt.
        let nbr = &arenas.neighbors[nbr_idx];
        let iface = &mut arenas.interfaces[iface_idx];
        let area = &arenas.areas[area_idx];
        let nbr_net_id = nbr.network_id();
        if !flooded_back
            && (iface.state.ism_state != ism::State::Backup
                || iface.state.dr == Some(nbr_net_id))
        {
            let lsa_hdr = arenas.lsa_entries[lse_idx].data.hdr;
            iface.enqueue_delayed_ack(area, instance, &lsa_hdr);
        }

        // (5.f) A fresher copy of one of our own LSAs is circulating;
        // either supersede it or flush it.
        let lse = &arenas.lsa_entries[lse_idx];
        if lse.flags.contains(LsaEntryFlags::SELF_ORIGINATED) {
            let nbr_router_id = arenas.neighbors[nbr_idx].router_id;
            debug::lsa_self_originated::<V>(nbr_router_id, &lse.data.hdr);

            let lsdb_key = lsdb::lsdb_get(
                &instance.state.lsdb,
                &arenas.areas,
                &arenas.interfaces,
                lsdb_ref,
            )
            .key()
            .clone();
            instance.tx.protocol_input.lsa_orig_event(
                LsaOriginateEvent::SelfOriginatedLsaRcvd {
                    lsdb_key,
                    lsa_key,
                },
            );
        }

        return false;
    }

    // (6 - errata 3974) The received LSA and the database copy are the
    // same instance.
    let nbr = &mut arenas.neighbors[nbr_idx];
    let lse = lse.unwrap();
    if lsa_cmp == Some(Ordering::Equal) {
        // An instance sitting on the retransmission list makes this an
        // implied acknowledgment.
        if let btree_map::Entry::Occupied(o) = nbr.lists.ls_rxmt.entry(lsa_key)
        {
            o.remove();
            nbr.rxmt_lsupd_stop_check();

            let nbr_net_id = nbr.network_id();
            if iface.state.ism_state == ism::State::Backup
                && iface.state.dr == Some(nbr_net_id)
            {
                iface.enqueue_delayed_ack(area, instance, &lsa.hdr);
            }
        } else {
            output::send_lsack_direct(nbr, iface, area, instance, &lsa.hdr);
        }

        return false;
    }

    // (7 - errata 3974) A stale instance from a neighbor we requested the
    // LSA from means the Database Exchange went wrong.
    if nbr.lists.ls_request.contains_key(&lsa_key)
        || nbr.lists.ls_request_pending.contains_key(&lsa_key)
    {
        nbr.fsm(
            iface,
            area,
            instance,
            &arenas.lsa_entries,
            nsm::Event::BadLsReq,
        );

        // Stop processing the Link State Update packet.
        return true;
    }

    // (8) The database copy is more recent. An instance stuck at MaxAge
    // with MaxSequenceNumber is mid-rollover and must not be answered;
    // otherwise the newer copy goes back to the sender.
    if lse.data.hdr.is_maxage()
        && lse.data.hdr.seq_no() == lsdb::LSA_MAX_SEQ_NO
    {
        return false;
    }
    if lsdb::lsa_min_arrival_check(lse) {
        debug::lsa_min_arrival_discard::<V>(nbr.router_id, &lsa.hdr);
    } else {
        nbr.lists.ls_update.insert(lsa_key, lse.data.clone());
        instance.tx.protocol_input.send_lsupd(
            area.id,
            iface.name.clone(),
            Some(nbr.src),
        );
    }

    false
}

fn process_packet_lsack<V>(
    nbr: &mut Neighbor<V>,
    ls_ack: V::PacketLsAck,
) -> Result<(), Error<V>>
where
    V: Version,
{
    if nbr.state < nsm::State::Exchange {
        debug::packet_rx_ignored(nbr.router_id, nbr.state);
        return Ok(());
    }

    // An acknowledgment only counts when it matches the exact instance on
    // the retransmission list.
    for lsa_hdr in ls_ack.lsa_hdrs() {
        let lsa_key = lsa_hdr.key();
        if let btree_map::Entry::Occupied(o) = nbr.lists.ls_rxmt.entry(lsa_key)
        {
            if lsa_compare::<V>(&o.get().hdr, lsa_hdr) == Ordering::Equal {
                o.remove();
                nbr.rxmt_lsupd_stop_check();
            } else {
                debug::questionable_ack::<V>(nbr.router_id, lsa_hdr);
            }
        }
    }

    Ok(())
}

// ===== Free last sent/received Database Description packets =====

pub(crate) fn process_dbdesc_free<V>(
    arenas: &mut InstanceArenas<V>,
    area_id: Ipv4Addr,
    ifname: String,
    nbr_src: V::NetIpAddr,
) -> Result<(), Error<V>>
where
    V: Version,
{
    let area_idx = arenas.area_idx(area_id)?;
    let iface_idx = arenas.areas[area_idx].iface_idx(&ifname)?;
    let nbr_idx = arenas.interfaces[iface_idx].nbr_idx_by_src(&nbr_src)?;

    let nbr = &mut arenas.neighbors[nbr_idx];
    nbr.tasks.dbdesc_free_timer = None;
    nbr.last_rcvd_dbdesc = None;
    nbr.last_sent_dbdesc = None;

    Ok(())
}

// ===== Request to send LS Update =====

pub(crate) fn process_send_lsupd<V>(
    instance: &InstanceUpView<'_, V>,
    arenas: &mut InstanceArenas<V>,
    area_id: Ipv4Addr,
    ifname: String,
    nbr_src: Option<V::NetIpAddr>,
) -> Result<(), Error<V>>
where
    V: Version,
{
    let area_idx = arenas.area_idx(area_id)?;
    let area = &arenas.areas[area_idx];
    let iface_idx = area.iface_idx(&ifname)?;
    let iface = &mut arenas.interfaces[iface_idx];
    let nbr_idx = match &nbr_src {
        Some(nbr_src) => Some(iface.nbr_idx_by_src(nbr_src)?),
        None => None,
    };

    // The interface might have gone down before the timer fired.
    if iface.is_down() {
        return Ok(());
    }

    iface.state.tasks.ls_update_timer = None;
    output::send_lsupd(nbr_idx, iface, area, instance, &mut arenas.neighbors);

    Ok(())
}

// ===== Packet retransmission =====

pub(crate) fn process_packet_rxmt<V>(
    instance: &InstanceUpView<'_, V>,
    arenas: &mut InstanceArenas<V>,
    area_id: Ipv4Addr,
    ifname: String,
    nbr_src: V::NetIpAddr,
    packet_type: RxmtPacketType,
) -> Result<(), Error<V>>
where
    V: Version,
{
    let area_idx = arenas.area_idx(area_id)?;
    let area = &arenas.areas[area_idx];
    let iface_idx = area.iface_idx(&ifname)?;
    let iface = &mut arenas.interfaces[iface_idx];
    let nbr_idx = iface.nbr_idx_by_src(&nbr_src)?;
    let nbr = &mut arenas.neighbors[nbr_idx];

    match packet_type {
        RxmtPacketType::DbDesc => {
            output::rxmt_dbdesc(nbr, iface);
        }
        RxmtPacketType::LsRequest => {
            output::rxmt_lsreq(nbr, iface, area, instance);
        }
        RxmtPacketType::LsUpdate => {
            output::rxmt_lsupd(nbr, iface, area, instance);
        }
    }

    Ok(())
}

// ===== Delayed Ack timeout =====

pub(crate) fn process_delayed_ack_timeout<V>(
    instance: &InstanceUpView<'_, V>,
    arenas: &mut InstanceArenas<V>,
    area_id: Ipv4Addr,
    ifname: String,
) -> Result<(), Error<V>>
where
    V: Version,
{
    let area_idx = arenas.area_idx(area_id)?;
    let area = &arenas.areas[area_idx];
    let iface_idx = area.iface_idx(&ifname)?;
    let iface = &mut arenas.interfaces[iface_idx];

    // The interface might have gone down before the timer fired.
    if iface.is_down() {
        return Ok(());
    }

    iface.state.tasks.ls_delayed_ack = None;
    output::send_lsack_delayed(iface, area, instance, &arenas.neighbors);

    Ok(())
}

// ===== LSA origination event =====

pub(crate) fn process_lsa_orig_event<V>(
    instance: &InstanceUpView<'_, V>,
    arenas: &InstanceArenas<V>,
    event: LsaOriginateEvent<V>,
) -> Result<(), Error<V>>
where
    V: Version,
{
    // Which LSAs need to be reoriginated or flushed is a per-version
    // decision.
    V::lsa_orig_event(instance, arenas, event)
}

// ===== LSA origination check =====

pub(crate) fn process_lsa_orig_check<V>(
    instance: &mut InstanceUpView<'_, V>,
    arenas: &mut InstanceArenas<V>,
    lsdb_key: LsdbKey,
    options: Option<V::PacketOptions>,
    lsa_id: Ipv4Addr,
    lsa_body: V::LsaBody,
) -> Result<(), Error<V>>
where
    V: Version,
{
    let lsdb_ref = lsdb::lsdb_resolve(arenas, &lsdb_key)?;
    lsdb::originate_check(
        instance, arenas, lsdb_ref, options, lsa_id, lsa_body,
    );

    Ok(())
}

// ===== LSA delayed origination timer =====

pub(crate) fn process_lsa_orig_delayed_timer<V>(
    instance: &mut InstanceUpView<'_, V>,
    arenas: &mut InstanceArenas<V>,
    lsdb_key: LsdbKey,
    lsa_key: LsaKey<V::LsaType>,
) -> Result<(), Error<V>>
where
    V: Version,
{
    let lsdb_ref = lsdb::lsdb_resolve(arenas, &lsdb_key)?;
    let lsdb = lsdb::lsdb_get_mut(
        &mut instance.state.lsdb,
        &mut arenas.areas,
        &mut arenas.interfaces,
        lsdb_ref,
    );

    if let Some(ldo) = lsdb.delayed_orig.remove(&lsa_key) {
        lsdb::originate(instance, arenas, lsdb_ref, ldo.data);
    }

    Ok(())
}

// ===== LSA flush event =====

pub(crate) fn process_lsa_flush<V>(
    instance: &mut InstanceUpView<'_, V>,
    arenas: &mut InstanceArenas<V>,
    lsdb_key: LsdbKey,
    lsa_key: LsaKey<V::LsaType>,
    reason: LsaFlushReason,
) -> Result<(), Error<V>>
where
    V: Version,
{
    let lsdb_ref = lsdb::lsdb_resolve(arenas, &lsdb_key)?;
    lsdb::flush(instance, arenas, lsdb_ref, &lsa_key, reason);

    Ok(())
}

// ===== LSA refresh event =====

pub(crate) fn process_lsa_refresh<V>(
    instance: &mut InstanceUpView<'_, V>,
    arenas: &mut InstanceArenas<V>,
    lsdb_key: LsdbKey,
    lsa_key: LsaKey<V::LsaType>,
) -> Result<(), Error<V>>
where
    V: Version,
{
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

    // Refresh timers are only ever armed on self-originated entries.
    if !lse.flags.contains(LsaEntryFlags::SELF_ORIGINATED) {
        return Ok(());
    }

    debug::lsa_refresh::<V>(&lse.data.hdr);

    let lsa = Lsa::new(
        0,
        lse.data.hdr.options(),
        lse.data.hdr.lsa_id(),
        lse.data.hdr.adv_rtr(),
        lse.data.hdr.seq_no().wrapping_add(1),
        lse.data.body.clone(),
    );
    lsdb::originate(instance, arenas, lsdb_ref, lsa);

    Ok(())
}

// ===== LSDB MaxAge sweep timer =====

pub(crate) fn process_lsdb_maxage_sweep<V>(
    instance: &mut InstanceUpView<'_, V>,
    arenas: &mut InstanceArenas<V>,
) -> Result<(), Error<V>>
where
    V: Version,
{
    lsdb::maxage_sweep(instance, arenas);
    Ok(())
}

// ===== LSDB checksum sweep timer =====

// Reverifies the checksum of every stored LSA to detect memory
// corruption. Corrupted LSAs are purged; self-originated ones are
// reissued.
pub(crate) fn process_lsdb_cksum_sweep<V>(
    instance: &mut InstanceUpView<'_, V>,
    arenas: &mut InstanceArenas<V>,
) -> Result<(), Error<V>>
where
    V: Version,
{
    let mut scopes = vec![LsdbRef::As];
    for (area_idx, area) in arenas.areas.iter() {
        scopes.push(LsdbRef::Area(area_idx));
        scopes.extend(
            area.iface_indexes()
                .map(|iface_idx| LsdbRef::Link(area_idx, iface_idx)),
        );
    }

    let mut corrupted = vec![];
    for lsdb_ref in scopes {
        let lsdb = lsdb::lsdb_get(
            &instance.state.lsdb,
            &arenas.areas,
            &arenas.interfaces,
            lsdb_ref,
        );
        corrupted.extend(
            lsdb.iter(&arenas.lsa_entries)
                .filter(|(_, lse)| !lse.data.is_checksum_valid())
                .map(|(_, lse)| (lsdb_ref, lse.data.hdr.key())),
        );
    }

    for (lsdb_ref, lsa_key) in corrupted {
        let lsdb = lsdb::lsdb_get_mut(
            &mut instance.state.lsdb,
            &mut arenas.areas,
            &mut arenas.interfaces,
            lsdb_ref,
        );
        let Some(lse) = lsdb.delete(&mut arenas.lsa_entries, &lsa_key) else {
            continue;
        };
        debug::lsa_cksum_corrupted::<V>(&lse.data.hdr);

        // Reissue self-originated LSAs from their pristine decoded
        // contents.
        if lse.flags.contains(LsaEntryFlags::SELF_ORIGINATED) {
            let lsa = Lsa::new(
                0,
                lse.data.hdr.options(),
                lse.data.hdr.lsa_id(),
                lse.data.hdr.adv_rtr(),
                lse.data.hdr.seq_no().wrapping_add(1),
                lse.data.body.clone(),
            );
            lsdb::originate(instance, arenas, lsdb_ref, lsa);
        }
    }

    Ok(())
}

// ===== SPF run event =====

pub(crate) fn process_spf_delay_event<V>(
    instance: &mut InstanceUpView<'_, V>,
    arenas: &mut InstanceArenas<V>,
    event: spf::fsm::Event,
) -> Result<(), Error<V>>
where
    V: Version,
{
    spf::fsm(event, instance, arenas)
}
