//
// Copyright (c) The Ospfd Project Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::time::Instant;

use chrono::{DateTime, Utc};
use ospfd_utils::ip::{AddressFamily, IpNetworkKind};
use ospfd_utils::keychain::Keychains;
use ospfd_utils::policy::{ExternalMetricType, ExternalRoute, PolicyFilter};
use ospfd_utils::protocol::Protocol;
use ospfd_utils::task::{IntervalTask, TimeoutTask};
use ospfd_utils::{Receiver, Sender, UnboundedReceiver, UnboundedSender};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::area::Area;
use crate::collections::{AreaIndex, Arena};
use crate::config::InstanceCfg;
use crate::debug;
use crate::error::Error;
use crate::interface::{Interface, InterfaceInactiveReason, ism};
use crate::lsdb::{
    self, LsaEntry, LsaFlushReason, LsaOriginateEvent, Lsdb, LsdbKey,
};
use crate::neighbor::{Neighbor, nsm};
use crate::route::RouteNet;
use crate::southbound::{self, RibChannelTx, SouthboundRxMsg};
use crate::spf::{self, SpfTriggerLsa};
use crate::tasks;
use crate::tasks::messages::ProtocolInputMsg;
#[cfg(feature = "testing")]
use crate::tasks::messages::ProtocolOutputMsg;
use crate::tasks::messages::input::{
    DbDescFreeMsg, DelayedAckMsg, IsmEventMsg, LsaFlushMsg, LsaOrigCheckMsg,
    LsaOrigDelayedMsg, LsaOrigEventMsg, LsaRefreshMsg, LsdbCksumSweepMsg,
    LsdbMaxAgeSweepMsg, NetRxPacketMsg, NsmEventMsg, RxmtIntervalMsg,
    SendLsUpdateMsg, SpfDelayEventMsg,
};
use crate::version::Version;
use crate::{events, output};

pub struct Instance<V: Version> {
    // Instance name.
    pub name: String,
    // Instance system data.
    pub system: InstanceSys,
    // Instance configuration data.
    pub config: InstanceCfg,
    // Instance state data, present only while the instance is running.
    pub state: Option<InstanceState<V>>,
    // Instance arenas.
    pub arenas: InstanceArenas<V>,
    // Instance Tx channels.
    pub tx: InstanceChannelsTx<V>,
    // Shared data.
    pub shared: InstanceShared,
}

#[derive(Debug, Default)]
pub struct InstanceSys {
    pub router_id: Option<Ipv4Addr>,
}

// Data shared with the embedding process: authentication key-chains and
// the route-policy hook.
#[derive(Clone, Default)]
pub struct InstanceShared {
    pub keychains: Keychains,
    pub policy: Option<PolicyFilter>,
}

// Coarse instance status as reported through the management surface.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum InstanceStatus {
    Startup,
    Ready,
    ShuttingDown,
    Failed,
}

// Why the instance is inactive.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum InstanceInactiveReason {
    AdminDown,
    MissingRouterId,
    Resetting,
}

#[derive(Debug)]
pub struct InstanceState<V: Version> {
    // Instance address-family.
    pub af: AddressFamily,
    // Instance Router ID.
    pub router_id: Ipv4Addr,
    // LSDB of AS-scope LSAs.
    pub lsdb: Lsdb<V>,
    // SPF data.
    pub spf_last_time: Option<Instant>,
    pub spf_delay_state: spf::fsm::State,
    pub spf_delay_timer: Option<TimeoutTask>,
    pub spf_hold_down_timer: Option<TimeoutTask>,
    pub spf_learn_timer: Option<TimeoutTask>,
    // List of LSAs that have changed since the last SPF computation.
    pub spf_trigger_lsas: Vec<SpfTriggerLsa<V>>,
    // Routing table.
    pub rib: BTreeMap<V::IpNetwork, RouteNet<V>>,
    // Redistributed routes, after policy evaluation.
    pub redistributed: BTreeMap<V::IpNetwork, ExternalRoute>,
    // OSPFv3: Link State IDs allocated for AS-External-LSAs.
    pub ext_lsa_ids: BTreeMap<V::IpNetwork, Ipv4Addr>,
    pub next_ext_lsa_id: u32,
    // Statistics.
    pub orig_lsa_count: u32,
    pub rx_lsa_count: u32,
    pub discontinuity_time: DateTime<Utc>,
    // Authentication non-decreasing sequence number.
    pub auth_seqno: Arc<AtomicU64>,
    // Periodic LSDB maintenance.
    pub maxage_sweep_interval: Option<IntervalTask>,
    pub cksum_sweep_interval: Option<IntervalTask>,
}

// The entity storage of one instance.
//
// Areas, interfaces, neighbors and LSA entries live in separate arenas so
// that handlers can borrow several of them mutably at once; the lookup
// trees hang off the owning entities, except for the area directory kept
// here.
#[derive(Debug, Default)]
pub struct InstanceArenas<V: Version> {
    pub areas: Arena<Area<V>>,
    area_ids: BTreeMap<Ipv4Addr, AreaIndex>,
    pub interfaces: Arena<Interface<V>>,
    pub neighbors: Arena<Neighbor<V>>,
    pub lsa_entries: Arena<LsaEntry<V>>,
}

// All channels feeding the instance's event loop. Cloned endpoints are
// handed to timers and network tasks; the loop drains them one message at
// a time, so protocol state is only ever mutated from a single place.
#[derive(Clone, Debug)]
pub struct ProtocolInputChannelsTx<V: Version> {
    // Interface FSM event.
    pub ism_event: UnboundedSender<IsmEventMsg>,
    // Neighbor FSM event.
    pub nsm_event: UnboundedSender<NsmEventMsg<V>>,
    // Packet Rx event.
    pub net_packet_rx: Sender<NetRxPacketMsg<V>>,
    // Free last sent/received Database Description packets.
    pub dbdesc_free: Sender<DbDescFreeMsg<V>>,
    // Request to send LS Update.
    pub send_lsupd: UnboundedSender<SendLsUpdateMsg<V>>,
    // Packet retransmission interval.
    pub rxmt_interval: Sender<RxmtIntervalMsg<V>>,
    // Delayed Ack timeout.
    pub delayed_ack_timeout: UnboundedSender<DelayedAckMsg>,
    // LSA originate event.
    pub lsa_orig_event: UnboundedSender<LsaOrigEventMsg<V>>,
    // LSA originate check.
    pub lsa_orig_check: UnboundedSender<LsaOrigCheckMsg<V>>,
    // LSA delayed origination timer.
    pub lsa_orig_delayed_timer: Sender<LsaOrigDelayedMsg<V>>,
    // LSA flush event.
    pub lsa_flush: UnboundedSender<LsaFlushMsg<V>>,
    // LSA refresh event.
    pub lsa_refresh: UnboundedSender<LsaRefreshMsg<V>>,
    // LSDB MaxAge sweep timer.
    pub lsdb_maxage_sweep_interval: Sender<LsdbMaxAgeSweepMsg>,
    // LSDB checksum sweep timer.
    pub lsdb_cksum_sweep_interval: Sender<LsdbCksumSweepMsg>,
    // SPF run event.
    pub spf_delay_event: UnboundedSender<SpfDelayEventMsg>,
}

#[derive(Debug)]
pub struct ProtocolInputChannelsRx<V: Version> {
    pub ism_event: UnboundedReceiver<IsmEventMsg>,
    pub nsm_event: UnboundedReceiver<NsmEventMsg<V>>,
    pub net_packet_rx: Receiver<NetRxPacketMsg<V>>,
    pub dbdesc_free: Receiver<DbDescFreeMsg<V>>,
    pub send_lsupd: UnboundedReceiver<SendLsUpdateMsg<V>>,
    pub rxmt_interval: Receiver<RxmtIntervalMsg<V>>,
    pub delayed_ack_timeout: UnboundedReceiver<DelayedAckMsg>,
    pub lsa_orig_event: UnboundedReceiver<LsaOrigEventMsg<V>>,
    pub lsa_orig_check: UnboundedReceiver<LsaOrigCheckMsg<V>>,
    pub lsa_orig_delayed_timer: Receiver<LsaOrigDelayedMsg<V>>,
    pub lsa_flush: UnboundedReceiver<LsaFlushMsg<V>>,
    pub lsa_refresh: UnboundedReceiver<LsaRefreshMsg<V>>,
    pub lsdb_maxage_sweep_interval: Receiver<LsdbMaxAgeSweepMsg>,
    pub lsdb_cksum_sweep_interval: Receiver<LsdbCksumSweepMsg>,
    pub spf_delay_event: UnboundedReceiver<SpfDelayEventMsg>,
}

// Outbound channels of the instance.
#[derive(Clone, Debug)]
pub struct InstanceChannelsTx<V: Version> {
    pub protocol_input: ProtocolInputChannelsTx<V>,
    pub rib: RibChannelTx,
    #[cfg(feature = "testing")]
    pub protocol_output: Sender<ProtocolOutputMsg<V>>,
}

// View of a running instance, borrowing its state mutably alongside the
// read-only configuration.
pub struct InstanceUpView<'a, V: Version> {
    pub name: &'a str,
    pub system: &'a InstanceSys,
    pub config: &'a InstanceCfg,
    pub state: &'a mut InstanceState<V>,
    pub tx: &'a InstanceChannelsTx<V>,
    pub shared: &'a InstanceShared,
}

// ===== impl Instance =====

impl<V> Instance<V>
where
    V: Version,
{
    // Creates a new instance along with the receiving halves of its
    // channels.
    pub fn new(
        name: String,
        shared: InstanceShared,
        rib_tx: RibChannelTx,
        #[cfg(feature = "testing")] protocol_output_tx: Sender<
            ProtocolOutputMsg<V>,
        >,
    ) -> (Instance<V>, ProtocolInputChannelsRx<V>) {
        let (protocol_input_tx, protocol_input_rx) = protocol_input_channels();
        let tx = InstanceChannelsTx {
            protocol_input: protocol_input_tx,
            rib: rib_tx,
            #[cfg(feature = "testing")]
            protocol_output: protocol_output_tx,
        };

        let instance = Instance {
            name,
            system: Default::default(),
            config: Default::default(),
            state: None,
            arenas: Default::default(),
            tx,
            shared,
        };
        (instance, protocol_input_rx)
    }

    // Checks if the instance needs to be started or stopped in response to
    // a configuration or southbound event.
    pub(crate) fn update(&mut self) {
        let router_id = self.get_router_id();

        match self.is_ready(router_id) {
            Ok(()) if !self.is_active() => {
                self.start(router_id.unwrap());
            }
            Err(reason) if self.is_active() => {
                self.stop(reason);
            }
            _ => (),
        }
    }

    fn start(&mut self, router_id: Ipv4Addr) {
        debug::instance_start();

        let mut state = InstanceState::new(V::ADDRESS_FAMILY, router_id);

        // Start the periodic LSDB maintenance.
        state.maxage_sweep_interval =
            Some(tasks::lsdb_maxage_sweep_interval(
                &self.tx.protocol_input.lsdb_maxage_sweep_interval,
            ));
        state.cksum_sweep_interval = Some(tasks::lsdb_cksum_sweep_interval(
            &self.tx.protocol_input.lsdb_cksum_sweep_interval,
        ));

        self.state = Some(state);

        // Register as the RIB's OSPF routing protocol.
        southbound::tx::rib_register::<V>(&self.tx.rib);

        let (mut instance, arenas) = self.as_up().unwrap();
        for (_, area) in arenas.areas.iter() {
            // Try to start interfaces.
            for iface_idx in area.iface_indexes() {
                let iface = &mut arenas.interfaces[iface_idx];
                iface.update(
                    area,
                    &instance,
                    &mut arenas.neighbors,
                    &arenas.lsa_entries,
                );
            }

            // Originate the initial Router-LSA for the area.
            instance.tx.protocol_input.lsa_orig_event(
                LsaOriginateEvent::AreaStart { area_id: area.id },
            );
        }

        // Originate the default AS-External-LSA if requested.
        if instance.config.default_originate {
            let prefix = <V::IpNetwork as IpNetworkKind<V::IpAddr>>::default(
                instance.state.af,
            );
            let route = ExternalRoute {
                prefix: prefix.into(),
                nexthop: None,
                metric: 1,
                metric_type: ExternalMetricType::Type2,
                tag: None,
                origin: Protocol::STATIC,
                tags: Default::default(),
            };
            instance.state.redistributed.insert(prefix, route.clone());
            V::lsa_orig_external(&mut instance, arenas, prefix, &route);
        }
    }

    fn stop(&mut self, reason: InstanceInactiveReason) {
        if !self.is_active() {
            return;
        }

        debug::instance_stop(reason);

        // Flush all self-originated LSAs.
        let (mut instance, arenas) = self.as_up().unwrap();
        lsdb::flush_all_self_originated(&mut instance, arenas);

        // Uninstall all routes.
        for (dest, _) in instance.state.rib.iter().filter(|(_, route)| {
            route
                .flags
                .contains(crate::route::RouteNetFlags::INSTALLED)
        }) {
            southbound::tx::route_uninstall::<V>(&instance.tx.rib, dest);
        }

        for (_, area) in arenas.areas.iter_mut() {
            area.reset_state();

            // Stop interfaces.
            for iface_idx in area.iface_indexes() {
                let iface = &mut arenas.interfaces[iface_idx];
                if iface.is_down() || iface.is_passive() {
                    continue;
                }

                // Send pending LS Updates.
                output::send_lsupd(
                    None,
                    iface,
                    area,
                    &instance,
                    &mut arenas.neighbors,
                );

                let reason = InterfaceInactiveReason::InstanceDown;
                iface.fsm(
                    area,
                    &instance,
                    &mut arenas.neighbors,
                    &arenas.lsa_entries,
                    ism::Event::InterfaceDown(reason),
                );
            }
        }

        // Withdraw the RIB registration.
        southbound::tx::rib_unregister::<V>(&self.tx.rib);

        // Clear instance state.
        self.state = None;
    }

    pub(crate) fn reset(&mut self) {
        if self.is_active() {
            self.stop(InstanceInactiveReason::Resetting);
            self.update();
        }
    }

    pub fn is_active(&self) -> bool {
        self.state.is_some()
    }

    // Returns the instance status as reported to the management surface.
    // Transient protocol errors never affect it.
    pub fn status(&self) -> InstanceStatus {
        if self.is_active() {
            InstanceStatus::Ready
        } else {
            InstanceStatus::Startup
        }
    }

    // Returns whether the instance is ready for OSPF operation.
    fn is_ready(
        &self,
        router_id: Option<Ipv4Addr>,
    ) -> Result<(), InstanceInactiveReason> {
        if !self.config.enabled || self.arenas.interfaces.is_empty() {
            return Err(InstanceInactiveReason::AdminDown);
        }

        if router_id.is_none() {
            return Err(InstanceInactiveReason::MissingRouterId);
        }

        Ok(())
    }

    pub(crate) fn get_router_id(&self) -> Option<Ipv4Addr> {
        self.config.router_id.or(self.system.router_id)
    }

    pub(crate) fn as_up(
        &mut self,
    ) -> Option<(InstanceUpView<'_, V>, &mut InstanceArenas<V>)> {
        if let Some(state) = &mut self.state {
            let instance = InstanceUpView {
                name: &self.name,
                system: &self.system,
                config: &self.config,
                state,
                tx: &self.tx,
                shared: &self.shared,
            };
            Some((instance, &mut self.arenas))
        } else {
            None
        }
    }

    // Runs the instance event loop: all protocol state mutations happen
    // inside the handlers invoked from here, one message at a time.
    pub async fn run(
        mut self,
        mut protocol_input_rx: ProtocolInputChannelsRx<V>,
        mut southbound_rx: UnboundedReceiver<SouthboundRxMsg>,
    ) {
        loop {
            tokio::select! {
                biased;
                msg = southbound_rx.recv() => match msg {
                    Some(msg) => self.process_southbound_msg(msg),
                    None => break,
                },
                msg = protocol_input_rx.recv() => match msg {
                    Some(msg) => self.process_protocol_msg(msg),
                    None => break,
                },
            }
        }

        self.shutdown();
    }

    // Stops the instance before exiting.
    pub fn shutdown(mut self) {
        self.stop(InstanceInactiveReason::AdminDown);
    }

    pub fn process_southbound_msg(&mut self, msg: SouthboundRxMsg) {
        match msg {
            SouthboundRxMsg::InterfaceUpd(msg) => {
                southbound::rx::process_iface_update(self, msg);
            }
            SouthboundRxMsg::AddressAdd(msg) => {
                southbound::rx::process_addr_add(self, msg);
            }
            SouthboundRxMsg::AddressDel(msg) => {
                southbound::rx::process_addr_del(self, msg);
            }
            SouthboundRxMsg::RouterIdUpd(router_id) => {
                southbound::rx::process_router_id_update(self, router_id);
            }
            SouthboundRxMsg::RouteRedistAdd(msg) => {
                southbound::rx::process_route_redist_add(self, msg);
            }
            SouthboundRxMsg::RouteRedistDel(msg) => {
                southbound::rx::process_route_redist_del(self, msg);
            }
        }
    }

    pub fn process_protocol_msg(&mut self, msg: ProtocolInputMsg<V>) {
        // Ignore event if the instance isn't active.
        if let Some((mut instance, arenas)) = self.as_up()
            && let Err(error) = process_protocol_msg(&mut instance, arenas, msg)
        {
            error.log();
        }
    }
}

impl<V> std::fmt::Debug for Instance<V>
where
    V: Version,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Instance").field("name", &self.name).finish()
    }
}

// ===== impl InstanceState =====

impl<V> InstanceState<V>
where
    V: Version,
{
    fn new(af: AddressFamily, router_id: Ipv4Addr) -> InstanceState<V> {
        InstanceState {
            af,
            router_id,
            lsdb: Lsdb::new(LsdbKey::As),
            spf_last_time: None,
            spf_delay_state: spf::fsm::State::Quiet,
            spf_delay_timer: None,
            spf_hold_down_timer: None,
            spf_learn_timer: None,
            spf_trigger_lsas: Default::default(),
            rib: Default::default(),
            redistributed: Default::default(),
            ext_lsa_ids: Default::default(),
            next_ext_lsa_id: 0,
            orig_lsa_count: 0,
            rx_lsa_count: 0,
            discontinuity_time: Utc::now(),
            auth_seqno: Arc::new(V::initial_auth_seqno().into()),
            maxage_sweep_interval: None,
            cksum_sweep_interval: None,
        }
    }

    // Allocates a Link State ID for an AS-External-LSA describing the
    // given prefix (OSPFv3 only; OSPFv2 derives it from the prefix
    // itself).
    pub(crate) fn ext_lsa_id(&mut self, prefix: V::IpNetwork) -> Ipv4Addr {
        *self.ext_lsa_ids.entry(prefix).or_insert_with(|| {
            self.next_ext_lsa_id += 1;
            Ipv4Addr::from(self.next_ext_lsa_id)
        })
    }
}

// ===== impl InstanceArenas =====

impl<V> InstanceArenas<V>
where
    V: Version,
{
    pub(crate) fn area_idx(
        &self,
        area_id: Ipv4Addr,
    ) -> Result<AreaIndex, Error<V>> {
        self.area_ids
            .get(&area_id)
            .copied()
            .ok_or(Error::AreaNotFound(area_id))
    }

    pub(crate) fn area_attach(&mut self, area: Area<V>) -> AreaIndex {
        let area_id = area.id;
        let area_idx = self.areas.insert(area);
        self.area_ids.insert(area_id, area_idx);
        area_idx
    }

    pub(crate) fn area_detach(
        &mut self,
        area_id: Ipv4Addr,
    ) -> Option<Area<V>> {
        let area_idx = self.area_ids.remove(&area_id)?;
        self.areas.remove(area_idx)
    }
}

// ===== impl ProtocolInputChannelsTx =====

impl<V> ProtocolInputChannelsTx<V>
where
    V: Version,
{
    pub(crate) fn ism_event(
        &self,
        area_id: Ipv4Addr,
        ifname: String,
        event: ism::Event,
    ) {
        let _ = self.ism_event.send(IsmEventMsg {
            area_id,
            ifname,
            event,
        });
    }

    pub(crate) fn nsm_event(
        &self,
        area_id: Ipv4Addr,
        ifname: String,
        nbr_src: V::NetIpAddr,
        event: nsm::Event,
    ) {
        let _ = self.nsm_event.send(NsmEventMsg {
            area_id,
            ifname,
            nbr_src,
            event,
        });
    }

    pub(crate) fn send_lsupd(
        &self,
        area_id: Ipv4Addr,
        ifname: String,
        nbr_src: Option<V::NetIpAddr>,
    ) {
        let _ = self.send_lsupd.send(SendLsUpdateMsg {
            area_id,
            ifname,
            nbr_src,
        });
    }

    pub(crate) fn lsa_orig_event(&self, event: LsaOriginateEvent<V>) {
        let _ = self.lsa_orig_event.send(LsaOrigEventMsg { event });
    }

    pub(crate) fn lsa_orig_check(
        &self,
        lsdb_key: LsdbKey,
        options: Option<V::PacketOptions>,
        lsa_id: Ipv4Addr,
        lsa_body: V::LsaBody,
    ) {
        let _ = self.lsa_orig_check.send(LsaOrigCheckMsg {
            lsdb_key,
            options,
            lsa_id,
            lsa_body,
        });
    }

    pub(crate) fn lsa_flush(
        &self,
        lsdb_key: LsdbKey,
        lsa_key: crate::packet::lsa::LsaKey<V::LsaType>,
        reason: LsaFlushReason,
    ) {
        let _ = self.lsa_flush.send(LsaFlushMsg {
            lsdb_key,
            lsa_key,
            reason,
        });
    }

    pub(crate) fn spf_delay_event(&self, event: spf::fsm::Event) {
        let _ = self.spf_delay_event.send(SpfDelayEventMsg { event });
    }
}

// ===== impl ProtocolInputChannelsRx =====

impl<V> ProtocolInputChannelsRx<V>
where
    V: Version,
{
    // Receives the next protocol message. The `biased` ordering gives
    // precedence to internally generated events (FSM transitions, LSA
    // maintenance) over new packets from the network.
    pub async fn recv(&mut self) -> Option<ProtocolInputMsg<V>> {
        tokio::select! {
            biased;
            msg = self.ism_event.recv() => {
                msg.map(ProtocolInputMsg::IsmEvent)
            }
            msg = self.nsm_event.recv() => {
                msg.map(ProtocolInputMsg::NsmEvent)
            }
            msg = self.dbdesc_free.recv() => {
                msg.map(ProtocolInputMsg::DbDescFree)
            }
            msg = self.send_lsupd.recv() => {
                msg.map(ProtocolInputMsg::SendLsUpdate)
            }
            msg = self.rxmt_interval.recv() => {
                msg.map(ProtocolInputMsg::RxmtInterval)
            }
            msg = self.delayed_ack_timeout.recv() => {
                msg.map(ProtocolInputMsg::DelayedAck)
            }
            msg = self.lsa_orig_event.recv() => {
                msg.map(ProtocolInputMsg::LsaOrigEvent)
            }
            msg = self.lsa_orig_check.recv() => {
                msg.map(ProtocolInputMsg::LsaOrigCheck)
            }
            msg = self.lsa_orig_delayed_timer.recv() => {
                msg.map(ProtocolInputMsg::LsaOrigDelayed)
            }
            msg = self.lsa_flush.recv() => {
                msg.map(ProtocolInputMsg::LsaFlush)
            }
            msg = self.lsa_refresh.recv() => {
                msg.map(ProtocolInputMsg::LsaRefresh)
            }
            msg = self.lsdb_maxage_sweep_interval.recv() => {
                msg.map(ProtocolInputMsg::LsdbMaxAgeSweep)
            }
            msg = self.lsdb_cksum_sweep_interval.recv() => {
                msg.map(ProtocolInputMsg::LsdbCksumSweep)
            }
            msg = self.spf_delay_event.recv() => {
                msg.map(ProtocolInputMsg::SpfDelayEvent)
            }
            msg = self.net_packet_rx.recv() => {
                msg.map(ProtocolInputMsg::NetRxPacket)
            }
        }
    }
}

// ===== helper functions =====

fn protocol_input_channels<V>()
-> (ProtocolInputChannelsTx<V>, ProtocolInputChannelsRx<V>)
where
    V: Version,
{
    let (ism_event_tx, ism_event_rx) = mpsc::unbounded_channel();
    let (nsm_event_tx, nsm_event_rx) = mpsc::unbounded_channel();
    let (net_packet_rx_tx, net_packet_rx_rx) = mpsc::channel(4);
    let (dbdesc_free_tx, dbdesc_free_rx) = mpsc::channel(4);
    let (send_lsupd_tx, send_lsupd_rx) = mpsc::unbounded_channel();
    let (rxmt_interval_tx, rxmt_interval_rx) = mpsc::channel(4);
    let (delayed_ack_timeout_tx, delayed_ack_timeout_rx) =
        mpsc::unbounded_channel();
    let (lsa_orig_event_tx, lsa_orig_event_rx) = mpsc::unbounded_channel();
    let (lsa_orig_check_tx, lsa_orig_check_rx) = mpsc::unbounded_channel();
    let (lsa_orig_delayed_timer_tx, lsa_orig_delayed_timer_rx) =
        mpsc::channel(4);
    let (lsa_flush_tx, lsa_flush_rx) = mpsc::unbounded_channel();
    let (lsa_refresh_tx, lsa_refresh_rx) = mpsc::unbounded_channel();
    let (lsdb_maxage_sweep_tx, lsdb_maxage_sweep_rx) = mpsc::channel(4);
    let (lsdb_cksum_sweep_tx, lsdb_cksum_sweep_rx) = mpsc::channel(4);
    let (spf_delay_event_tx, spf_delay_event_rx) = mpsc::unbounded_channel();

    let tx = ProtocolInputChannelsTx {
        ism_event: ism_event_tx,
        nsm_event: nsm_event_tx,
        net_packet_rx: net_packet_rx_tx,
        dbdesc_free: dbdesc_free_tx,
        send_lsupd: send_lsupd_tx,
        rxmt_interval: rxmt_interval_tx,
        delayed_ack_timeout: delayed_ack_timeout_tx,
        lsa_orig_event: lsa_orig_event_tx,
        lsa_orig_check: lsa_orig_check_tx,
        lsa_orig_delayed_timer: lsa_orig_delayed_timer_tx,
        lsa_flush: lsa_flush_tx,
        lsa_refresh: lsa_refresh_tx,
        lsdb_maxage_sweep_interval: lsdb_maxage_sweep_tx,
        lsdb_cksum_sweep_interval: lsdb_cksum_sweep_tx,
        spf_delay_event: spf_delay_event_tx,
    };
    let rx = ProtocolInputChannelsRx {
        ism_event: ism_event_rx,
        nsm_event: nsm_event_rx,
        net_packet_rx: net_packet_rx_rx,
        dbdesc_free: dbdesc_free_rx,
        send_lsupd: send_lsupd_rx,
        rxmt_interval: rxmt_interval_rx,
        delayed_ack_timeout: delayed_ack_timeout_rx,
        lsa_orig_event: lsa_orig_event_rx,
        lsa_orig_check: lsa_orig_check_rx,
        lsa_orig_delayed_timer: lsa_orig_delayed_timer_rx,
        lsa_flush: lsa_flush_rx,
        lsa_refresh: lsa_refresh_rx,
        lsdb_maxage_sweep_interval: lsdb_maxage_sweep_rx,
        lsdb_cksum_sweep_interval: lsdb_cksum_sweep_rx,
        spf_delay_event: spf_delay_event_rx,
    };

    (tx, rx)
}

fn process_protocol_msg<V>(
    instance: &mut InstanceUpView<'_, V>,
    arenas: &mut InstanceArenas<V>,
    msg: ProtocolInputMsg<V>,
) -> Result<(), Error<V>>
where
    V: Version,
{
    match msg {
        // Interface FSM event.
        ProtocolInputMsg::IsmEvent(msg) => events::process_ism_event(
            instance,
            arenas,
            msg.area_id,
            msg.ifname,
            msg.event,
        )?,
        // Neighbor FSM event.
        ProtocolInputMsg::NsmEvent(msg) => events::process_nsm_event(
            instance,
            arenas,
            msg.area_id,
            msg.ifname,
            msg.nbr_src,
            msg.event,
        )?,
        // Received network packet.
        ProtocolInputMsg::NetRxPacket(msg) => {
            events::process_packet(
                instance,
                arenas,
                msg.area_id,
                msg.ifname,
                msg.src,
                msg.dst,
                msg.packet,
            )?;
        }
        // Free last sent/received Database Description packets.
        ProtocolInputMsg::DbDescFree(msg) => events::process_dbdesc_free(
            arenas,
            msg.area_id,
            msg.ifname,
            msg.nbr_src,
        )?,
        // Request to send LS Update.
        ProtocolInputMsg::SendLsUpdate(msg) => events::process_send_lsupd(
            instance,
            arenas,
            msg.area_id,
            msg.ifname,
            msg.nbr_src,
        )?,
        // Packet retransmission.
        ProtocolInputMsg::RxmtInterval(msg) => events::process_packet_rxmt(
            instance,
            arenas,
            msg.area_id,
            msg.ifname,
            msg.nbr_src,
            msg.packet_type,
        )?,
        // Delayed Ack timeout.
        ProtocolInputMsg::DelayedAck(msg) => {
            events::process_delayed_ack_timeout(
                instance,
                arenas,
                msg.area_id,
                msg.ifname,
            )?
        }
        // LSA origination event.
        ProtocolInputMsg::LsaOrigEvent(msg) => {
            events::process_lsa_orig_event(instance, arenas, msg.event)?
        }
        // LSA origination check.
        ProtocolInputMsg::LsaOrigCheck(msg) => events::process_lsa_orig_check(
            instance,
            arenas,
            msg.lsdb_key,
            msg.options,
            msg.lsa_id,
            msg.lsa_body,
        )?,
        // LSA delayed origination timer.
        ProtocolInputMsg::LsaOrigDelayed(msg) => {
            events::process_lsa_orig_delayed_timer(
                instance,
                arenas,
                msg.lsdb_key,
                msg.lsa_key,
            )?
        }
        // LSA flush.
        ProtocolInputMsg::LsaFlush(msg) => events::process_lsa_flush(
            instance,
            arenas,
            msg.lsdb_key,
            msg.lsa_key,
            msg.reason,
        )?,
        // LSA refresh event.
        ProtocolInputMsg::LsaRefresh(msg) => events::process_lsa_refresh(
            instance,
            arenas,
            msg.lsdb_key,
            msg.lsa_key,
        )?,
        // LSA MaxAge sweep interval.
        ProtocolInputMsg::LsdbMaxAgeSweep(_msg) => {
            events::process_lsdb_maxage_sweep(instance, arenas)?
        }
        // LSDB checksum sweep interval.
        ProtocolInputMsg::LsdbCksumSweep(_msg) => {
            events::process_lsdb_cksum_sweep(instance, arenas)?
        }
        // SPF run event.
        ProtocolInputMsg::SpfDelayEvent(msg) => {
            events::process_spf_delay_event(instance, arenas, msg.event)?
        }
    }

    Ok(())
}
