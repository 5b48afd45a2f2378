//
// Copyright (c) The Ospfd Project Contributors
//
// SPDX-License-Identifier: MIT
//

//! Protocol trace points.
//!
//! Every function here emits a single `debug!` line with structured fields.
//! Packet dumps are serialized lazily, only when the debug level is enabled.

use std::net::Ipv4Addr;

use tracing::{Level, debug, enabled};

use crate::instance::InstanceInactiveReason;
use crate::interface::{InterfaceInactiveReason, ism};
use crate::lsdb::LsaFlushReason;
use crate::neighbor::{NeighborNetId, nsm};
use crate::packet::Packet;
use crate::packet::error::LsaValidationError;
use crate::spf;
use crate::version::Version;

// ===== instance =====

pub(crate) fn instance_start() {
    debug!("starting instance");
}

pub(crate) fn instance_stop(reason: InstanceInactiveReason) {
    debug!(?reason, "stopping instance");
}

// ===== interfaces =====

pub(crate) fn iface_create(ifname: &str) {
    debug!(%ifname, "interface created");
}

pub(crate) fn iface_delete(ifname: &str) {
    debug!(%ifname, "interface deleted");
}

pub(crate) fn iface_start(ifname: &str) {
    debug!(%ifname, "starting interface");
}

pub(crate) fn iface_stop(ifname: &str, reason: InterfaceInactiveReason) {
    debug!(%ifname, ?reason, "stopping interface");
}

pub(crate) fn ism_transition(
    ifname: &str,
    event: ism::Event,
    old_state: ism::State,
    new_state: ism::State,
) {
    debug!(%ifname, ?event, ?old_state, ?new_state, "interface FSM");
}

pub(crate) fn dr_election(
    ifname: &str,
    dr: Option<NeighborNetId>,
    bdr: Option<NeighborNetId>,
) {
    debug!(%ifname, ?dr, ?bdr, "DR election concluded");
}

// ===== neighbors =====

pub(crate) fn nbr_create(router_id: Ipv4Addr) {
    debug!(%router_id, "neighbor created");
}

pub(crate) fn nbr_delete(router_id: Ipv4Addr) {
    debug!(%router_id, "neighbor deleted");
}

pub(crate) fn nsm_transition(
    router_id: Ipv4Addr,
    event: &nsm::Event,
    old_state: nsm::State,
    new_state: nsm::State,
) {
    debug!(%router_id, ?event, ?old_state, ?new_state, "neighbor FSM");
}

// ===== packet I/O =====

pub(crate) fn packet_rx<V: Version>(
    ifname: &str,
    src: &V::NetIpAddr,
    dst: &V::NetIpAddr,
    packet: &Packet<V>,
) {
    if enabled!(Level::DEBUG) {
        let data = serde_json::to_string(packet).unwrap();
        debug!(%ifname, %src, %dst, packet = %data, "received packet");
    }
}

pub(crate) fn packet_tx<V: Version>(
    ifname: &str,
    dst: &V::NetIpAddr,
    packet: &Packet<V>,
) {
    if enabled!(Level::DEBUG) {
        let data = serde_json::to_string(packet).unwrap();
        debug!(%ifname, %dst, packet = %data, "sending packet");
    }
}

pub(crate) fn packet_rx_ignored(router_id: Ipv4Addr, state: nsm::State) {
    debug!(%router_id, ?state, "packet ignored in this neighbor state");
}

// ===== flooding =====

pub(crate) fn questionable_ack<V: Version>(
    router_id: Ipv4Addr,
    lsa_hdr: &V::LsaHdr,
) {
    debug!(%router_id, ?lsa_hdr, "ack matches no retransmitted instance");
}

pub(crate) fn lsa_discard<V: Version>(
    router_id: Ipv4Addr,
    lsa_hdr: &V::LsaHdr,
    error: LsaValidationError,
) {
    debug!(%router_id, ?lsa_hdr, %error, "discarding received LSA");
}

pub(crate) fn lsa_min_arrival_discard<V: Version>(
    router_id: Ipv4Addr,
    lsa_hdr: &V::LsaHdr,
) {
    debug!(%router_id, ?lsa_hdr, "LSA arrived within MinLSArrival");
}

pub(crate) fn lsa_self_originated<V: Version>(
    router_id: Ipv4Addr,
    lsa_hdr: &V::LsaHdr,
) {
    debug!(%router_id, ?lsa_hdr, "received newer instance of own LSA");
}

// ===== LSDB maintenance =====

pub(crate) fn lsa_install<V: Version>(lsa_hdr: &V::LsaHdr) {
    debug!(?lsa_hdr, "installing LSA");
}

pub(crate) fn lsa_originate<V: Version>(lsa_hdr: &V::LsaHdr) {
    debug!(?lsa_hdr, "originating LSA");
}

pub(crate) fn lsa_originate_deferred<V: Version>(lsa_hdr: &V::LsaHdr) {
    debug!(?lsa_hdr, "origination deferred by MinLSInterval");
}

pub(crate) fn lsa_refresh<V: Version>(lsa_hdr: &V::LsaHdr) {
    debug!(?lsa_hdr, "refreshing LSA");
}

pub(crate) fn lsa_flush<V: Version>(
    lsa_hdr: &V::LsaHdr,
    reason: LsaFlushReason,
) {
    debug!(?lsa_hdr, ?reason, "flushing LSA");
}

pub(crate) fn lsa_cksum_corrupted<V: Version>(lsa_hdr: &V::LsaHdr) {
    debug!(?lsa_hdr, "stored LSA no longer passes checksum");
}

// ===== SPF =====

pub(crate) fn spf_fsm_transition(
    event: spf::fsm::Event,
    old_state: spf::fsm::State,
    new_state: spf::fsm::State,
) {
    debug!(?event, ?old_state, ?new_state, "SPF delay FSM");
}

pub(crate) fn summary_net_unreachable<V: Version>(
    prefix: &V::IpNetwork,
    adv_rtr: Ipv4Addr,
) {
    debug!(%prefix, %adv_rtr, "summary ignored, ABR unreachable");
}

pub(crate) fn summary_rtr_unreachable(
    router_id: Ipv4Addr,
    adv_rtr: Ipv4Addr,
) {
    debug!(%router_id, %adv_rtr, "router summary ignored, ABR unreachable");
}

pub(crate) fn external_unreachable_asbr<V: Version>(
    prefix: &V::IpNetwork,
    adv_rtr: Ipv4Addr,
) {
    debug!(%prefix, %adv_rtr, "external route ignored, ASBR unreachable");
}
