//
// Copyright (c) The Ospfd Project Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::{BTreeMap, HashMap};
use std::net::Ipv4Addr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use nsm::{Event, State};
use ospfd_utils::task::{IntervalTask, TimeoutTask};
#[cfg(not(feature = "deterministic"))]
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::area::Area;
use crate::collections::Arena;
use crate::debug;
use crate::error::Error;
use crate::instance::InstanceUpView;
use crate::interface::{Interface, InterfaceType, ism};
use crate::lsdb::{LsaEntry, LsaOriginateEvent};
use crate::output;
use crate::packet::lsa::{Lsa, LsaHdrVersion, LsaKey};
use crate::packet::{DbDescFlags, DbDescVersion, PacketType};
use crate::tasks;
use crate::tasks::messages::input::RxmtIntervalMsg;
use crate::tasks::messages::output::NetTxPacketMsg;
use crate::version::Version;

// An OSPF neighbor, keyed within its interface by source address.
#[derive(Debug)]
pub struct Neighbor<V: Version> {
    pub router_id: Ipv4Addr,
    // OSPFv3: the neighbor's Interface ID, learned from its Hello packets
    // and echoed in our Router-LSA links.
    pub iface_id: Option<u32>,
    pub src: V::NetIpAddr,
    pub dr: Option<NeighborNetId>,
    pub bdr: Option<NeighborNetId>,
    pub priority: u8,
    pub state: State,

    pub options: Option<V::PacketOptions>,
    pub dd_flags: DbDescFlags,
    pub dd_seq_no: u32,
    pub last_rcvd_dbdesc: Option<LastDbDesc<V>>,
    pub last_sent_dbdesc: Option<NetTxPacketMsg<V>>,
    // Last accepted cryptographic sequence number, tracked per packet type
    // to account for the prioritization rules of RFC 4222.
    pub auth_seqno: HashMap<PacketType, u64>,

    pub event_count: u32,
    pub discontinuity_time: DateTime<Utc>,

    pub lists: NeighborLsaLists<V>,
    pub tasks: NeighborTasks,
}

// IPv4 value identifying a neighbor on a multi-access network: the
// interface address for OSPFv2, the Router ID for OSPFv3.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub struct NeighborNetId(Ipv4Addr);

// Fields of the last received Database Description packet, used for
// duplicate detection.
#[derive(Debug)]
pub struct LastDbDesc<V: Version> {
    pub options: V::PacketOptions,
    pub dd_flags: DbDescFlags,
    pub dd_seq_no: u32,
}

#[derive(Debug)]
pub struct NeighborLsaLists<V: Version> {
    // LSAs enqueued for transmission in LS Update packets.
    pub ls_update: BTreeMap<LsaKey<V::LsaType>, Arc<Lsa<V>>>,
    // LSAs waiting to be acknowledged.
    pub ls_rxmt: BTreeMap<LsaKey<V::LsaType>, Arc<Lsa<V>>>,
    // LSA headers enqueued for transmission in Database Description
    // packets.
    pub db_summary: BTreeMap<LsaKey<V::LsaType>, Arc<Lsa<V>>>,
    // LSAs that need to be requested from this neighbor.
    pub ls_request: BTreeMap<LsaKey<V::LsaType>, V::LsaHdr>,
    // LSAs that were requested but not received yet.
    pub ls_request_pending: BTreeMap<LsaKey<V::LsaType>, V::LsaHdr>,
}

#[derive(Debug, Default)]
pub struct NeighborTasks {
    pub inactivity_timer: Option<TimeoutTask>,
    pub dbdesc_free_timer: Option<TimeoutTask>,
    rxmt_dbdesc: Option<IntervalTask>,
    rxmt_lsreq: Option<IntervalTask>,
    rxmt_lsupd: Option<IntervalTask>,
}

#[derive(Clone, Copy, Debug)]
#[derive(Deserialize, Serialize)]
pub enum RxmtPacketType {
    DbDesc,
    LsRequest,
    LsUpdate,
}

// OSPF version-specific code.
pub trait NeighborVersion<V: Version> {
    // IPv4 value used to identify the neighbor on a multi-access network.
    fn network_id(addr: &V::NetIpAddr, router_id: Ipv4Addr) -> NeighborNetId;
}

// Neighbor state machine types (RFC 2328 section 10.1).
pub mod nsm {
    use serde::{Deserialize, Serialize};

    #[derive(Clone, Copy, Debug, Default, Eq, Ord, PartialEq, PartialOrd)]
    #[derive(Deserialize, Serialize)]
    pub enum State {
        #[default]
        Down,
        Attempt,
        Init,
        TwoWay,
        ExStart,
        Exchange,
        Loading,
        Full,
    }

    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    #[derive(Deserialize, Serialize)]
    pub enum Event {
        HelloRcvd,
        Start,
        TwoWayRcvd,
        NegotiationDone,
        ExchangeDone,
        BadLsReq,
        LoadingDone,
        AdjOk,
        SeqNoMismatch(SeqNoMismatchReason),
        OneWayRcvd,
        Kill,
        InactivityTimer,
        LinkDown,
    }

    // What went wrong with a received Database Description packet.
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    #[derive(Deserialize, Serialize)]
    pub enum SeqNoMismatchReason {
        InconsistentFlags,
        InconsistentOptions,
        InconsistentSeqNo,
        UnexpectedDbDesc,
        InvalidLsaType,
    }

    impl State {
        // While a neighbor is in these states, it may still legitimately
        // request any LSA it saw during database description.
        pub(crate) fn is_database_exchange(self) -> bool {
            matches!(self, State::Exchange | State::Loading)
        }
    }
}

// ===== impl Neighbor =====

impl<V> Neighbor<V>
where
    V: Version,
{
    pub(crate) fn new(router_id: Ipv4Addr, src: V::NetIpAddr) -> Neighbor<V> {
        debug::nbr_create(router_id);

        let dd_seq_no = {
            #[cfg(not(feature = "deterministic"))]
            {
                rand::rng().next_u32()
            }
            #[cfg(feature = "deterministic")]
            {
                // Fixed value for reproducible test runs.
                router_id.into()
            }
        };

        Neighbor {
            router_id,
            iface_id: None,
            src,
            dr: None,
            bdr: None,
            priority: 0,
            state: State::Down,
            options: None,
            dd_flags: DbDescFlags::empty(),
            dd_seq_no,
            last_rcvd_dbdesc: None,
            last_sent_dbdesc: None,
            auth_seqno: Default::default(),
            event_count: 0,
            discontinuity_time: Utc::now(),
            lists: Default::default(),
            tasks: Default::default(),
        }
    }

    // State machine entry point (RFC 2328 section 10.3). Each event has its
    // own handler; a handler returns the successor state, or None when the
    // event leaves the state untouched.
    pub(crate) fn fsm(
        &mut self,
        iface: &mut Interface<V>,
        area: &Area<V>,
        instance: &InstanceUpView<'_, V>,
        lsa_entries: &Arena<LsaEntry<V>>,
        event: Event,
    ) {
        let new_state = match event {
            Event::Start => self.event_start(iface, area, instance),
            Event::HelloRcvd => {
                self.event_hello_received(iface, area, instance)
            }
            Event::TwoWayRcvd => self.event_two_way(iface, area, instance),
            Event::NegotiationDone => self
                .event_negotiation_done(iface, area, instance, lsa_entries),
            Event::ExchangeDone => self.event_exchange_done(event),
            Event::LoadingDone => self.event_loading_done(event),
            Event::AdjOk => self.event_adj_ok(iface, area, instance),
            Event::SeqNoMismatch(_) | Event::BadLsReq => {
                self.event_exchange_restart(iface, area, instance, event)
            }
            Event::OneWayRcvd => self.event_one_way(event),
            Event::Kill | Event::LinkDown | Event::InactivityTimer => {
                self.event_shutdown()
            }
        };

        if let Some(new_state) = new_state
            && new_state != self.state
        {
            self.transition(iface, area, instance, event, new_state);
        }
    }

    // NBMA only: start sending Hellos to a configured neighbor.
    fn event_start(
        &mut self,
        iface: &Interface<V>,
        area: &Area<V>,
        instance: &InstanceUpView<'_, V>,
    ) -> Option<State> {
        if self.state != State::Down {
            self.unexpected(Event::Start);
            return None;
        }

        self.inactivity_timer_reset(iface, area, instance);
        Some(State::Attempt)
    }

    fn event_hello_received(
        &mut self,
        iface: &Interface<V>,
        area: &Area<V>,
        instance: &InstanceUpView<'_, V>,
    ) -> Option<State> {
        self.inactivity_timer_reset(iface, area, instance);
        match self.state {
            State::Down | State::Attempt => Some(State::Init),
            _ => None,
        }
    }

    fn event_two_way(
        &mut self,
        iface: &Interface<V>,
        area: &Area<V>,
        instance: &InstanceUpView<'_, V>,
    ) -> Option<State> {
        match self.state {
            State::Init => Some(self.adjacency_decision(iface, area, instance)),
            // Already bidirectional.
            state if state >= State::TwoWay => None,
            _ => {
                self.unexpected(Event::TwoWayRcvd);
                None
            }
        }
    }

    // Master/slave and sequence number agreed upon; summarize the database
    // for this adjacency and start describing it.
    fn event_negotiation_done(
        &mut self,
        iface: &Interface<V>,
        area: &Area<V>,
        instance: &InstanceUpView<'_, V>,
        lsa_entries: &Arena<LsaEntry<V>>,
    ) -> Option<State> {
        if self.state != State::ExStart {
            self.unexpected(Event::NegotiationDone);
            return None;
        }

        self.fill_database_summary(iface, area, instance, lsa_entries);
        self.dd_flags.remove(DbDescFlags::I);
        Some(State::Exchange)
    }

    fn event_exchange_done(&mut self, event: Event) -> Option<State> {
        if self.state != State::Exchange {
            self.unexpected(event);
            return None;
        }

        if self.lists.ls_request.is_empty()
            && self.lists.ls_request_pending.is_empty()
        {
            Some(State::Full)
        } else {
            // Outstanding LS Requests remain to be answered.
            Some(State::Loading)
        }
    }

    fn event_loading_done(&mut self, event: Event) -> Option<State> {
        if self.state != State::Loading {
            self.unexpected(event);
            return None;
        }
        Some(State::Full)
    }

    // Reevaluate whether the adjacency should exist, after a DR or BDR
    // change on the attached network.
    fn event_adj_ok(
        &mut self,
        iface: &mut Interface<V>,
        area: &Area<V>,
        instance: &InstanceUpView<'_, V>,
    ) -> Option<State> {
        match self.state {
            State::TwoWay => {
                Some(self.adjacency_decision(iface, area, instance))
            }
            state if state >= State::ExStart => {
                if iface.need_adjacency(self) {
                    None
                } else {
                    self.reset_adjacency();
                    Some(State::TwoWay)
                }
            }
            _ => {
                self.unexpected(Event::AdjOk);
                None
            }
        }
    }

    // Database exchange went off the rails; tear the adjacency state down
    // and renegotiate from scratch.
    fn event_exchange_restart(
        &mut self,
        iface: &Interface<V>,
        area: &Area<V>,
        instance: &InstanceUpView<'_, V>,
        event: Event,
    ) -> Option<State> {
        if self.state < State::Exchange {
            self.unexpected(event);
            return None;
        }

        self.reset_adjacency();
        self.begin_database_exchange(iface, area, instance);
        Some(State::ExStart)
    }

    fn event_one_way(&mut self, event: Event) -> Option<State> {
        match self.state {
            State::Init => None,
            state if state >= State::TwoWay => {
                self.reset_adjacency();
                Some(State::Init)
            }
            _ => {
                self.unexpected(event);
                None
            }
        }
    }

    fn event_shutdown(&mut self) -> Option<State> {
        self.reset_adjacency();
        self.tasks.inactivity_timer = None;
        Some(State::Down)
    }

    // Whether to carry the relationship past 2-Way: form the adjacency and
    // open database exchange as provisional master, or hold at 2-Way.
    fn adjacency_decision(
        &mut self,
        iface: &Interface<V>,
        area: &Area<V>,
        instance: &InstanceUpView<'_, V>,
    ) -> State {
        if iface.need_adjacency(self) {
            self.begin_database_exchange(iface, area, instance);
            State::ExStart
        } else {
            State::TwoWay
        }
    }

    // Sends the initial, empty Database Description packet with a fresh
    // sequence number and the I/M/MS bits all set.
    fn begin_database_exchange(
        &mut self,
        iface: &Interface<V>,
        area: &Area<V>,
        instance: &InstanceUpView<'_, V>,
    ) {
        self.dd_seq_no += 1;
        self.dd_flags
            .insert(DbDescFlags::I | DbDescFlags::M | DbDescFlags::MS);
        output::send_dbdesc(self, iface, area, instance);
    }

    // Seeds the summary list with every database this adjacency spans
    // (RFC 2328 section 10.3, NegotiationDone). MaxAge LSAs skip the
    // summary and go straight onto the retransmission list.
    fn fill_database_summary(
        &mut self,
        iface: &Interface<V>,
        area: &Area<V>,
        instance: &InstanceUpView<'_, V>,
        lsa_entries: &Arena<LsaEntry<V>>,
    ) {
        let options = self.options;
        let acceptable = |lse: &&LsaEntry<V>| {
            V::lsa_type_is_valid(
                Some(area.config.area_type),
                options,
                lse.data.hdr.lsa_type(),
            )
        };

        let mut rxmt_added = false;
        for lse in iface
            .state
            .lsdb
            .iter(lsa_entries)
            .chain(area.state.lsdb.iter(lsa_entries))
            .chain(instance.state.lsdb.iter(lsa_entries))
            .map(|(_, lse)| lse)
            .filter(acceptable)
        {
            let lsa_key = lse.data.hdr.key();
            if lse.data.hdr.is_maxage() {
                self.lists.ls_rxmt.insert(lsa_key, lse.data.clone());
                rxmt_added = true;
            } else {
                self.lists.db_summary.insert(lsa_key, lse.data.clone());
            }
        }
        if rxmt_added {
            self.rxmt_lsupd_start_check(iface, area, instance);
        }
    }

    fn transition(
        &mut self,
        iface: &mut Interface<V>,
        area: &Area<V>,
        instance: &InstanceUpView<'_, V>,
        event: Event,
        new_state: State,
    ) {
        debug::nsm_transition(self.router_id, &event, self.state, new_state);

        // Gaining or losing bidirectional communication changes the set of
        // DR candidates on broadcast and NBMA networks.
        let was_bidir = self.state >= State::TwoWay;
        let is_bidir = new_state >= State::TwoWay;
        if was_bidir != is_bidir && iface.is_broadcast_or_nbma() {
            instance.tx.protocol_input.ism_event(
                area.id,
                iface.name.clone(),
                ism::Event::NbrChange,
            );
        }

        // Our Router-LSA (and on a DR, the Network-LSA) lists only fully
        // adjacent neighbors.
        if new_state == State::Full || self.state == State::Full {
            instance.tx.protocol_input.lsa_orig_event(
                LsaOriginateEvent::NeighborToFromFull {
                    area_id: area.id,
                    ifname: iface.name.clone(),
                },
            );
        }

        // A dead statically configured NBMA neighbor still gets Hellos, at
        // the reduced PollInterval rate.
        if iface.config.if_type == InterfaceType::NonBroadcast {
            if new_state == State::Down && event == Event::InactivityTimer {
                if let Some(snbr) = iface.config.static_nbrs.get(&self.src) {
                    iface.nbma_poll_interval_start(
                        area,
                        instance,
                        self.src,
                        snbr.poll_interval,
                    );
                }
            } else if self.state == State::Down {
                iface.nbma_poll_interval_stop(self.src);
            }
        }

        self.state = new_state;
        self.event_count += 1;
        self.discontinuity_time = Utc::now();
    }

    fn unexpected(&self, event: Event) {
        Error::<V>::NsmUnexpectedEvent(self.router_id, self.state, event)
            .log();
    }

    pub(crate) fn loading_done_check(
        &mut self,
        iface: &Interface<V>,
        area: &Area<V>,
        instance: &InstanceUpView<'_, V>,
    ) {
        if !self.lists.ls_request_pending.is_empty() {
            return;
        }
        self.rxmt_lsreq_stop();

        if !self.lists.ls_request.is_empty() {
            // More LSAs remain to be requested.
            output::send_lsreq(self, iface, area, instance);
        } else if self.state == State::Loading {
            instance.tx.protocol_input.nsm_event(
                area.id,
                iface.name.clone(),
                self.src,
                Event::LoadingDone,
            );
        }
    }

    fn reset_adjacency(&mut self) {
        self.options = None;
        self.last_rcvd_dbdesc = None;
        self.last_sent_dbdesc = None;
        self.lists = Default::default();
        self.tasks.dbdesc_free_timer = None;
        self.tasks.rxmt_dbdesc = None;
        self.tasks.rxmt_lsreq = None;
        self.tasks.rxmt_lsupd = None;
    }

    pub(crate) fn dbdesc_is_dup(&self, dbdesc: &V::PacketDbDesc) -> bool {
        self.last_rcvd_dbdesc.as_ref().is_some_and(|last| {
            last.options == dbdesc.options()
                && last.dd_flags == dbdesc.dd_flags()
                && last.dd_seq_no == dbdesc.dd_seq_no()
        })
    }

    pub(crate) fn network_id(&self) -> NeighborNetId {
        <V as NeighborVersion<V>>::network_id(&self.src, self.router_id)
    }

    pub(crate) fn inactivity_timer_start(
        &mut self,
        iface: &Interface<V>,
        area: &Area<V>,
        instance: &InstanceUpView<'_, V>,
    ) {
        let task = tasks::nsm_inactivity_timer(self, iface, area, instance);
        self.tasks.inactivity_timer = Some(task);
    }

    fn inactivity_timer_reset(
        &mut self,
        iface: &Interface<V>,
        area: &Area<V>,
        instance: &InstanceUpView<'_, V>,
    ) {
        match self.tasks.inactivity_timer.as_mut() {
            Some(timer) => timer.reset(None),
            None => self.inactivity_timer_start(iface, area, instance),
        }
    }

    pub(crate) fn rxmt_dbdesc_start(
        &mut self,
        iface: &Interface<V>,
        area: &Area<V>,
        instance: &InstanceUpView<'_, V>,
    ) {
        let msg = self.rxmt_msg(iface, area, RxmtPacketType::DbDesc);
        let task = tasks::packet_rxmt_interval(iface, msg, instance);
        self.tasks.rxmt_dbdesc = Some(task);
    }

    pub(crate) fn rxmt_dbdesc_stop(&mut self) {
        self.tasks.rxmt_dbdesc = None;
    }

    pub(crate) fn rxmt_lsreq_start(
        &mut self,
        iface: &Interface<V>,
        area: &Area<V>,
        instance: &InstanceUpView<'_, V>,
    ) {
        let msg = self.rxmt_msg(iface, area, RxmtPacketType::LsRequest);
        let task = tasks::packet_rxmt_interval(iface, msg, instance);
        self.tasks.rxmt_lsreq = Some(task);
    }

    fn rxmt_lsreq_stop(&mut self) {
        self.tasks.rxmt_lsreq = None;
    }

    pub(crate) fn rxmt_lsupd_start_check(
        &mut self,
        iface: &Interface<V>,
        area: &Area<V>,
        instance: &InstanceUpView<'_, V>,
    ) {
        if !self.lists.ls_rxmt.is_empty() && self.tasks.rxmt_lsupd.is_none() {
            let msg = self.rxmt_msg(iface, area, RxmtPacketType::LsUpdate);
            let task = tasks::packet_rxmt_interval(iface, msg, instance);
            self.tasks.rxmt_lsupd = Some(task);
        }
    }

    pub(crate) fn rxmt_lsupd_stop_check(&mut self) {
        if self.lists.ls_rxmt.is_empty() && self.tasks.rxmt_lsupd.is_some() {
            self.tasks.rxmt_lsupd = None;
        }
    }

    fn rxmt_msg(
        &self,
        iface: &Interface<V>,
        area: &Area<V>,
        packet_type: RxmtPacketType,
    ) -> RxmtIntervalMsg<V> {
        RxmtIntervalMsg {
            area_id: area.id,
            ifname: iface.name.clone(),
            nbr_src: self.src,
            packet_type,
        }
    }
}

impl<V> Drop for Neighbor<V>
where
    V: Version,
{
    fn drop(&mut self) {
        debug::nbr_delete(self.router_id);
    }
}

// ===== impl NeighborNetId =====

impl NeighborNetId {
    pub(crate) fn get(&self) -> Ipv4Addr {
        self.0
    }
}

impl std::fmt::Display for NeighborNetId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl From<Ipv4Addr> for NeighborNetId {
    fn from(addr: Ipv4Addr) -> NeighborNetId {
        NeighborNetId(addr)
    }
}

// ===== impl NeighborLsaLists =====

impl<V> Default for NeighborLsaLists<V>
where
    V: Version,
{
    fn default() -> NeighborLsaLists<V> {
        NeighborLsaLists {
            ls_update: Default::default(),
            ls_rxmt: Default::default(),
            db_summary: Default::default(),
            ls_request: Default::default(),
            ls_request_pending: Default::default(),
        }
    }
}
