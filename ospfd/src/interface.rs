//
// Copyright (c) The Ospfd Project Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;

use chrono::{DateTime, Utc};
use ipnetwork::{Ipv4Network, Ipv6Network};
use ism::{Event, State};
use ospfd_utils::ip::{AddressFamily, IpAddrKind, IpNetworkKind};
use ospfd_utils::keychain::Key;
use ospfd_utils::socket::{AsyncFd, Socket};
use ospfd_utils::southbound::InterfaceFlags;
use ospfd_utils::task::{IntervalTask, Task, TimeoutTask};
use serde::{Deserialize, Serialize};
use smallvec::smallvec;
use tokio::sync::mpsc;
use tokio::sync::mpsc::UnboundedSender;

use crate::area::Area;
use crate::collections::{Arena, NeighborIndex};
use crate::config::InterfaceCfg;
use crate::debug;
use crate::error::{Error, IoError, RejectReason};
use crate::instance::InstanceUpView;
use crate::lsdb::{Lsdb, LsdbKey, LsaEntry, LsaOriginateEvent};
use crate::neighbor::{Neighbor, NeighborNetId, nsm};
use crate::network::MulticastAddr;
use crate::packet::Packet;
use crate::packet::auth::AuthMethod;
use crate::packet::lsa::{Lsa, LsaHdrVersion, LsaKey};
use crate::tasks;
use crate::tasks::messages::output::NetTxPacketMsg;
use crate::version::Version;

// An OSPF interface, keyed within its area by name.
#[derive(Debug)]
pub struct Interface<V: Version> {
    pub name: String,
    pub system: InterfaceSys<V>,
    pub config: InterfaceCfg<V>,
    pub state: InterfaceState<V>,
}

// Read-only mirror of the host interface attributes, maintained from
// southbound notifications.
#[derive(Debug)]
pub struct InterfaceSys<V: Version> {
    pub flags: InterfaceFlags,
    pub ifindex: Option<u32>,
    pub mtu: Option<u16>,
    pub addr_list: BTreeSet<V::IpNetwork>,
    // OSPFv2: primary address.
    pub primary_addr: Option<Ipv4Network>,
    pub unnumbered: bool,
    // OSPFv3: link-local address.
    pub linklocal_addr: Option<Ipv6Network>,
}

#[derive(Debug)]
pub struct InterfaceState<V: Version> {
    pub ism_state: State,
    // Raw socket and Tx/Rx tasks.
    pub net: Option<InterfaceNet<V>>,
    // Source address used when sending packets.
    pub src_addr: Option<V::NetIpAddr>,
    // Virtual links: resolved address of the remote endpoint.
    pub vlink_dst_addr: Option<V::NetIpAddr>,
    // Joined multicast groups.
    pub mcast_groups: HashSet<MulticastAddr>,
    // The network DR/BDR.
    pub dr: Option<NeighborNetId>,
    pub bdr: Option<NeighborNetId>,
    // Attached neighbors, addressed by source address; the Router ID map
    // serves the lookups point-to-point links and OSPFv3 need.
    pub nbrs_by_src: BTreeMap<V::NetIpAddr, NeighborIndex>,
    pub nbrs_by_router_id: HashMap<Ipv4Addr, NeighborIndex>,
    // LSAs enqueued for transmission.
    pub ls_update_list: BTreeMap<LsaKey<V::LsaType>, Arc<Lsa<V>>>,
    // Pending delayed acks.
    pub ls_ack_list: BTreeMap<LsaKey<V::LsaType>, V::LsaHdr>,
    // Statistics.
    pub event_count: u32,
    pub rx_error_count: u32,
    pub discontinuity_time: DateTime<Utc>,
    // Link-scope LSAs (OSPFv3 only).
    pub lsdb: Lsdb<V>,
    pub network_lsa_self: Option<LsaKey<V::LsaType>>,
    // OSPFv3: our own Link-LSA on this interface.
    pub link_lsa_self: Option<LsaKey<V::LsaType>>,
    // Authentication data.
    pub auth: Option<AuthMethod>,
    // Tasks.
    pub tasks: InterfaceTasks<V>,
}

#[derive(Debug)]
pub struct InterfaceNet<V: Version> {
    pub socket: Arc<AsyncFd<Socket>>,
    _net_tx_task: Task<()>,
    _net_rx_task: Task<()>,
    pub net_tx_packet_tx: UnboundedSender<NetTxPacketMsg<V>>,
}

#[derive(Debug)]
pub struct InterfaceTasks<V: Version> {
    // ISM Hello Tx interval task.
    pub hello_interval: Option<IntervalTask>,
    // NBMA poll interval tasks.
    pub nbma_poll_interval: HashMap<V::NetIpAddr, IntervalTask>,
    // ISM WaitTimer task.
    pub wait_timer: Option<TimeoutTask>,
    // LS Update timer task.
    pub ls_update_timer: Option<TimeoutTask>,
    // Delayed Ack task.
    pub ls_delayed_ack: Option<TimeoutTask>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum InterfaceType {
    Broadcast,
    NonBroadcast,
    PointToMultipoint,
    PointToPoint,
    VirtualLink,
}

// Why OSPF is inactive on an interface.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum InterfaceInactiveReason {
    InstanceDown,
    AdminDown,
    OperationalDown,
    MissingIfindex,
    MissingMtu,
    MissingIpv4Address,
    MissingLinkLocalAddress,
    MissingVirtualLinkEndpoint,
    LoopedBack,
    Resetting,
}

// One row of the DR election: a router's own declarations, as taken from
// its Hello packets (or from local state for this router itself).
#[derive(Clone, Copy, Debug)]
struct DrCandidate {
    router_id: Ipv4Addr,
    net_id: NeighborNetId,
    dr: Option<NeighborNetId>,
    bdr: Option<NeighborNetId>,
    priority: u8,
}

// Interface state machine types (RFC 2328 section 9.1).
pub mod ism {
    use serde::{Deserialize, Serialize};

    use crate::interface::InterfaceInactiveReason;

    #[derive(Clone, Copy, Debug, Default, Eq, Ord, PartialEq, PartialOrd)]
    #[derive(Deserialize, Serialize)]
    pub enum State {
        #[default]
        Down,
        Loopback,
        Waiting,
        PointToPoint,
        DrOther,
        Backup,
        Dr,
    }

    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    #[derive(Deserialize, Serialize)]
    pub enum Event {
        InterfaceUp,
        WaitTimer,
        BackupSeen,
        NbrChange,
        LoopInd,
        UnloopInd,
        InterfaceDown(InterfaceInactiveReason),
    }
}

// OSPF version-specific code.
pub trait InterfaceVersion<V: Version> {
    // Whether the interface is ready for OSPF operation.
    fn is_ready(
        af: AddressFamily,
        iface: &Interface<V>,
    ) -> Result<(), InterfaceInactiveReason>;

    // Source address used to send OSPF packets.
    fn src_addr(iface_sys: &InterfaceSys<V>) -> V::NetIpAddr;

    // Generate an OSPF Hello message.
    fn generate_hello(
        iface: &Interface<V>,
        area: &Area<V>,
        instance: &InstanceUpView<'_, V>,
    ) -> Packet<V>;

    // Validate the destination of the received packet.
    fn validate_packet_dst(
        iface: &Interface<V>,
        dst: V::NetIpAddr,
    ) -> Result<(), Error<V>>;

    // Validate the source of the received packet.
    fn validate_packet_src(
        iface: &Interface<V>,
        src: V::NetIpAddr,
    ) -> Result<(), Error<V>>;

    // Check if the interface and the received packet have matching Instance
    // IDs (OSPFv3 only).
    fn packet_instance_id_match(
        iface: &Interface<V>,
        packet_hdr: &V::PacketHdr,
    ) -> bool;

    // Check a received Hello against the interface configuration.
    fn validate_hello(
        iface: &Interface<V>,
        hello: &V::PacketHello,
    ) -> Result<(), RejectReason>;

    // Maximum packet size that can be sent on this interface.
    fn max_packet_size(iface: &Interface<V>) -> u16;

    // Locate the sending neighbor of a received packet. Which of the source
    // address and the Router ID identifies the sender depends on the
    // version and network type.
    fn find_neighbor(
        iface: &Interface<V>,
        src: &V::NetIpAddr,
        router_id: Ipv4Addr,
    ) -> Option<NeighborIndex>;

    // Convert a host address notification into an interface address,
    // filtering out addresses the version doesn't use.
    fn accept_addr(addr: ipnetwork::IpNetwork) -> Option<V::IpNetwork>;

    // Update version-specific address state (primary address, link-local
    // address) after the interface address list changed.
    fn addr_list_update(iface: &mut Interface<V>);
}

// ===== impl Interface =====

impl<V> Interface<V>
where
    V: Version,
{
    pub(crate) fn new(area_id: Ipv4Addr, name: String) -> Interface<V> {
        debug::iface_create(&name);

        let lsdb_key = LsdbKey::Link(area_id, name.clone());
        Interface {
            name,
            system: InterfaceSys::default(),
            config: InterfaceCfg::default(),
            state: InterfaceState::new(lsdb_key),
        }
    }

    // Derives the pending ISM event, if any, from the current readiness of
    // the interface, and runs it. Called after configuration and southbound
    // changes.
    pub(crate) fn update(
        &mut self,
        area: &Area<V>,
        instance: &InstanceUpView<'_, V>,
        neighbors: &mut Arena<Neighbor<V>>,
        lsa_entries: &Arena<LsaEntry<V>>,
    ) {
        let event = match V::is_ready(instance.state.af, self) {
            Ok(_) => {
                if self.system.flags.contains(InterfaceFlags::LOOPBACK) {
                    if self.state.ism_state == State::Loopback {
                        return;
                    }
                    Event::LoopInd
                } else if self.state.ism_state == State::Loopback {
                    Event::UnloopInd
                } else if self.state.ism_state == State::Down {
                    Event::InterfaceUp
                } else {
                    return;
                }
            }
            Err(reason) if !self.is_down() => Event::InterfaceDown(reason),
            Err(_) => return,
        };

        self.fsm(area, instance, neighbors, lsa_entries, event);
    }

    // State machine entry point (RFC 2328 section 9.3).
    pub(crate) fn fsm(
        &mut self,
        area: &Area<V>,
        instance: &InstanceUpView<'_, V>,
        neighbors: &mut Arena<Neighbor<V>>,
        lsa_entries: &Arena<LsaEntry<V>>,
        event: Event,
    ) {
        let new_state = match event {
            Event::InterfaceUp => self.event_interface_up(area, instance),
            Event::WaitTimer | Event::BackupSeen => {
                self.event_wait_done(area, instance, neighbors, event)
            }
            Event::NbrChange => {
                self.event_nbr_change(area, instance, neighbors)
            }
            Event::InterfaceDown(reason) => {
                self.stop(area, instance, neighbors, lsa_entries, reason);
                Some(State::Down)
            }
            Event::LoopInd => {
                self.stop(
                    area,
                    instance,
                    neighbors,
                    lsa_entries,
                    InterfaceInactiveReason::LoopedBack,
                );
                Some(State::Loopback)
            }
            Event::UnloopInd => self.event_unloop(event),
        };

        if let Some(new_state) = new_state
            && new_state != self.state.ism_state
        {
            self.transition(area, instance, event, new_state);
        }
    }

    fn event_interface_up(
        &mut self,
        area: &Area<V>,
        instance: &InstanceUpView<'_, V>,
    ) -> Option<State> {
        if self.state.ism_state != State::Down {
            self.unexpected(Event::InterfaceUp);
            return None;
        }
        Some(self.start(area, instance))
    }

    // End of the waiting period, either by timer or by a Hello naming a
    // BDR: the interface may now take part in the DR election.
    fn event_wait_done(
        &mut self,
        area: &Area<V>,
        instance: &InstanceUpView<'_, V>,
        neighbors: &Arena<Neighbor<V>>,
        event: Event,
    ) -> Option<State> {
        if self.state.ism_state != State::Waiting {
            self.unexpected(event);
            return None;
        }
        self.state.tasks.wait_timer = None;
        Some(self.dr_election(area, instance, neighbors))
    }

    fn event_nbr_change(
        &mut self,
        area: &Area<V>,
        instance: &InstanceUpView<'_, V>,
        neighbors: &Arena<Neighbor<V>>,
    ) -> Option<State> {
        match self.state.ism_state {
            State::DrOther | State::Backup | State::Dr => {
                Some(self.dr_election(area, instance, neighbors))
            }
            // A neighbor can reach 2-Way while the interface still waits;
            // the election will pick it up once the wait ends.
            State::Waiting => None,
            _ => {
                self.unexpected(Event::NbrChange);
                None
            }
        }
    }

    fn event_unloop(&mut self, event: Event) -> Option<State> {
        if self.state.ism_state != State::Loopback {
            self.unexpected(event);
            return None;
        }
        Some(State::Down)
    }

    fn transition(
        &mut self,
        area: &Area<V>,
        instance: &InstanceUpView<'_, V>,
        event: Event,
        new_state: State,
    ) {
        debug::ism_transition(
            &self.name,
            event,
            self.state.ism_state,
            new_state,
        );

        // The Router-LSA lists this interface according to its state; a DR
        // additionally owns the Network-LSA.
        instance.tx.protocol_input.lsa_orig_event(
            LsaOriginateEvent::InterfaceStateChange {
                area_id: area.id,
                ifname: self.name.clone(),
            },
        );
        if self.state.ism_state == State::Dr {
            instance.tx.protocol_input.lsa_orig_event(
                LsaOriginateEvent::InterfaceDrChange {
                    area_id: area.id,
                    ifname: self.name.clone(),
                },
            );
        }

        self.state.ism_state = new_state;
        self.update_mcast_groups();

        self.state.event_count += 1;
        self.state.discontinuity_time = Utc::now();
    }

    fn unexpected(&self, event: Event) {
        Error::<V>::IsmUnexpectedEvent(
            self.name.clone(),
            self.state.ism_state,
            event,
        )
        .log();
    }

    fn start(
        &mut self,
        area: &Area<V>,
        instance: &InstanceUpView<'_, V>,
    ) -> State {
        debug::iface_start(&self.name);

        // Virtual links have their source address resolved from the transit
        // area routing table instead.
        if !self.is_virtual_link() {
            self.state.src_addr = Some(V::src_addr(&self.system));
        }

        if !self.is_passive() {
            self.state.auth = self.auth(instance);

            match InterfaceNet::new(
                self,
                area,
                instance.state.af,
                &instance.state.auth_seqno,
                instance,
            ) {
                Ok(net) => self.state.net = Some(net),
                Err(error) => {
                    Error::<V>::InterfaceStartFailed(
                        self.name.clone(),
                        error,
                    )
                    .log();
                    return State::Down;
                }
            }

            self.hello_interval_start(area, instance);
        }

        let new_state = match self.config.if_type {
            InterfaceType::PointToPoint
            | InterfaceType::PointToMultipoint
            | InterfaceType::VirtualLink => State::PointToPoint,
            InterfaceType::Broadcast | InterfaceType::NonBroadcast => {
                if self.config.priority == 0 {
                    State::DrOther
                } else {
                    State::Waiting
                }
            }
        };

        if new_state == State::Waiting {
            let task = tasks::ism_wait_timer(self, area, instance);
            self.state.tasks.wait_timer = Some(task);

            // NBMA: kick off the configured neighbors that could become DR.
            if self.config.if_type == InterfaceType::NonBroadcast {
                for addr in self
                    .config
                    .static_nbrs
                    .iter()
                    .filter(|(_, snbr)| snbr.priority != 0)
                    .map(|(addr, _)| addr)
                    .filter(|addr| self.state.nbrs_by_src.contains_key(addr))
                {
                    instance.tx.protocol_input.nsm_event(
                        area.id,
                        self.name.clone(),
                        *addr,
                        nsm::Event::Start,
                    );
                }
            }
        }

        new_state
    }

    fn stop(
        &mut self,
        area: &Area<V>,
        instance: &InstanceUpView<'_, V>,
        neighbors: &mut Arena<Neighbor<V>>,
        lsa_entries: &Arena<LsaEntry<V>>,
        reason: InterfaceInactiveReason,
    ) {
        if self.is_down() {
            return;
        }

        debug::iface_stop(&self.name, reason);

        // Take the neighbors down with the interface.
        let event = match reason {
            InterfaceInactiveReason::OperationalDown
            | InterfaceInactiveReason::MissingIfindex
            | InterfaceInactiveReason::MissingMtu
            | InterfaceInactiveReason::MissingIpv4Address
            | InterfaceInactiveReason::MissingLinkLocalAddress => {
                nsm::Event::LinkDown
            }
            _ => nsm::Event::Kill,
        };
        for nbr_idx in self.nbr_indexes().collect::<Vec<_>>() {
            let nbr = &mut neighbors[nbr_idx];
            nbr.fsm(self, area, instance, lsa_entries, event);
            self.nbr_detach(neighbors, nbr_idx);
        }

        // The interface LSDB is preserved across restarts; everything else
        // resets.
        self.state.net = None;
        self.state.src_addr = None;
        self.state.vlink_dst_addr = None;
        self.state.mcast_groups = Default::default();
        self.state.dr = None;
        self.state.bdr = None;
        self.state.nbrs_by_src = Default::default();
        self.state.nbrs_by_router_id = Default::default();
        self.state.ls_update_list = Default::default();
        self.state.ls_ack_list = Default::default();
        self.state.auth = None;
        self.state.tasks = Default::default();
    }

    // ===== neighbor bookkeeping =====

    pub(crate) fn nbr_indexes(
        &self,
    ) -> impl Iterator<Item = NeighborIndex> + '_ {
        self.state.nbrs_by_src.values().copied()
    }

    pub(crate) fn nbr_idx_by_src(
        &self,
        src: &V::NetIpAddr,
    ) -> Result<NeighborIndex, Error<V>> {
        self.state
            .nbrs_by_src
            .get(src)
            .copied()
            .ok_or(Error::NeighborNotFound(*src))
    }

    pub(crate) fn nbr_attach(
        &mut self,
        neighbors: &mut Arena<Neighbor<V>>,
        nbr: Neighbor<V>,
    ) -> NeighborIndex {
        let src = nbr.src;
        let router_id = nbr.router_id;
        let nbr_idx = neighbors.insert(nbr);
        self.state.nbrs_by_src.insert(src, nbr_idx);
        self.state.nbrs_by_router_id.insert(router_id, nbr_idx);
        nbr_idx
    }

    pub(crate) fn nbr_detach(
        &mut self,
        neighbors: &mut Arena<Neighbor<V>>,
        nbr_idx: NeighborIndex,
    ) {
        if let Some(nbr) = neighbors.remove(nbr_idx) {
            self.state.nbrs_by_src.remove(&nbr.src);
            self.state.nbrs_by_router_id.remove(&nbr.router_id);
        }
    }

    // ===== state helpers =====

    // Restart the Hello Tx task.
    pub(crate) fn sync_hello_tx(
        &mut self,
        area: &Area<V>,
        instance: &InstanceUpView<'_, V>,
    ) {
        if !self.is_passive() && self.state.ism_state >= State::Waiting {
            self.hello_interval_start(area, instance);
        }
    }

    pub(crate) fn reset(
        &mut self,
        area: &Area<V>,
        instance: &InstanceUpView<'_, V>,
        neighbors: &mut Arena<Neighbor<V>>,
        lsa_entries: &Arena<LsaEntry<V>>,
    ) {
        for event in [
            Event::InterfaceDown(InterfaceInactiveReason::Resetting),
            Event::InterfaceUp,
        ] {
            self.fsm(area, instance, neighbors, lsa_entries, event);
        }
    }

    pub(crate) fn is_down(&self) -> bool {
        self.state.ism_state == State::Down
    }

    pub(crate) fn is_passive(&self) -> bool {
        self.system.flags.contains(InterfaceFlags::LOOPBACK)
            || self.config.passive
    }

    pub(crate) fn is_dr_or_backup(&self) -> bool {
        matches!(self.state.ism_state, State::Dr | State::Backup)
    }

    pub(crate) fn is_broadcast_or_nbma(&self) -> bool {
        matches!(
            self.config.if_type,
            InterfaceType::Broadcast | InterfaceType::NonBroadcast
        )
    }

    pub(crate) fn is_virtual_link(&self) -> bool {
        self.config.if_type == InterfaceType::VirtualLink
    }

    // Builds the authentication method from the interface configuration.
    fn auth(&self, instance: &InstanceUpView<'_, V>) -> Option<AuthMethod> {
        if let Some(password) = &self.config.auth_simple {
            return Some(AuthMethod::SimplePassword(
                password.as_bytes().to_vec(),
            ));
        }

        if let (Some(key), Some(key_id), Some(algo)) = (
            &self.config.auth_key,
            self.config.auth_keyid,
            self.config.auth_algo,
        ) {
            let auth_key =
                Key::new(key_id as u64, algo, key.as_bytes().to_vec());
            return Some(AuthMethod::ManualKey(auth_key));
        }

        if let Some(keychain) = &self.config.auth_keychain
            && let Some(keychain) = instance.shared.keychains.get(keychain)
        {
            return Some(AuthMethod::Keychain(keychain.clone()));
        }

        None
    }

    pub(crate) fn auth_update(
        &mut self,
        area: &Area<V>,
        instance: &InstanceUpView<'_, V>,
    ) {
        self.state.auth = self.auth(instance);

        if let Some(mut net) = self.state.net.take() {
            // Checksum offloading and authentication are mutually
            // exclusive.
            let cksum_enable = self.state.auth.is_none();
            if let Err(error) =
                V::set_cksum_offloading(net.socket.get_ref(), cksum_enable)
            {
                IoError::SocketCreation(error).log();
            }

            // Restart network Tx/Rx tasks so they pick up the new keys.
            net.restart_tasks(
                self,
                area,
                instance.state.af,
                &instance.state.auth_seqno,
                instance,
            );
            self.state.net = Some(net);
            self.sync_hello_tx(area, instance);
        }
    }

    pub(crate) fn hello_interval_start(
        &mut self,
        area: &Area<V>,
        instance: &InstanceUpView<'_, V>,
    ) {
        let dst = match self.config.if_type {
            InterfaceType::PointToPoint | InterfaceType::Broadcast => {
                smallvec![*V::multicast_addr(MulticastAddr::AllSpfRtrs)]
            }
            InterfaceType::NonBroadcast | InterfaceType::PointToMultipoint => {
                self.config.static_nbrs.keys().copied().collect()
            }
            InterfaceType::VirtualLink => match self.state.vlink_dst_addr {
                Some(addr) => smallvec![addr],
                None => return,
            },
        };
        let interval = self.config.hello_interval;
        let task = tasks::hello_interval(self, area, instance, dst, interval);
        self.state.tasks.hello_interval = Some(task);
    }

    pub(crate) fn nbma_poll_interval_start(
        &mut self,
        area: &Area<V>,
        instance: &InstanceUpView<'_, V>,
        addr: V::NetIpAddr,
        poll_interval: u16,
    ) {
        let dst = smallvec![addr];
        let task =
            tasks::hello_interval(self, area, instance, dst, poll_interval);
        self.state.tasks.nbma_poll_interval.insert(addr, task);
    }

    pub(crate) fn nbma_poll_interval_stop(&mut self, addr: V::NetIpAddr) {
        self.state.tasks.nbma_poll_interval.remove(&addr);
    }

    fn update_mcast_groups(&mut self) {
        // Virtual links are unicast-only.
        if self.is_virtual_link() {
            return;
        }
        let socket = match &self.state.net {
            Some(net) => net.socket.get_ref(),
            None => return,
        };

        let memberships = [
            (
                MulticastAddr::AllSpfRtrs,
                self.state.ism_state >= State::Waiting,
            ),
            (MulticastAddr::AllDrRtrs, self.is_dr_or_backup()),
        ];
        for (group, wanted) in memberships {
            let joined = self.state.mcast_groups.contains(&group);
            if wanted && !joined {
                self.system.join_multicast(socket, group);
                self.state.mcast_groups.insert(group);
            } else if !wanted && joined {
                self.system.leave_multicast(socket, group);
                self.state.mcast_groups.remove(&group);
            }
        }
    }

    // DR election (RFC 2328 section 9.4). Runs the BDR and DR calculations
    // over the candidate declarations; when the router's own role changes,
    // a second round lets its new declarations take part.
    fn dr_election(
        &mut self,
        area: &Area<V>,
        instance: &InstanceUpView<'_, V>,
        neighbors: &Arena<Neighbor<V>>,
    ) -> State {
        let router_id = instance.state.router_id;
        let my_net_id =
            V::network_id(&self.state.src_addr.unwrap(), router_id);
        let old_dr = self.state.dr;
        let old_bdr = self.state.bdr;

        // Step 1: collect the declarations of every eligible router.
        let gather = |self_dr, self_bdr| {
            let myself =
                (self.config.priority != 0).then_some(DrCandidate {
                    router_id,
                    net_id: my_net_id,
                    dr: self_dr,
                    bdr: self_bdr,
                    priority: self.config.priority,
                });
            let nbrs = self
                .nbr_indexes()
                .map(|nbr_idx| &neighbors[nbr_idx])
                .filter(|nbr| nbr.state >= nsm::State::TwoWay)
                .filter(|nbr| nbr.priority != 0)
                .map(|nbr| DrCandidate {
                    router_id: nbr.router_id,
                    net_id: nbr.network_id(),
                    dr: nbr.dr,
                    bdr: nbr.bdr,
                    priority: nbr.priority,
                });
            myself.into_iter().chain(nbrs).collect::<Vec<_>>()
        };

        // Steps 2 and 3.
        let (mut new_dr, mut new_bdr) = elect(&gather(old_dr, old_bdr));

        // Step 4: rerun with updated self-declarations if our role changed.
        let was_dr = old_dr == Some(my_net_id);
        let was_bdr = old_bdr == Some(my_net_id);
        if (new_dr == Some(my_net_id)) != was_dr
            || (new_bdr == Some(my_net_id)) != was_bdr
        {
            (new_dr, new_bdr) = elect(&gather(new_dr, new_bdr));
        }

        self.state.dr = new_dr;
        self.state.bdr = new_bdr;
        debug::dr_election(&self.name, new_dr, new_bdr);

        // Step 5.
        let next_state = if new_dr == Some(my_net_id) {
            State::Dr
        } else if new_bdr == Some(my_net_id) {
            State::Backup
        } else {
            State::DrOther
        };

        // Step 6: a router newly (B)DR on an NBMA network starts sending
        // Hellos to the neighbors that cannot become DR themselves.
        if self.config.if_type == InterfaceType::NonBroadcast
            && matches!(next_state, State::Dr | State::Backup)
        {
            for addr in self
                .config
                .static_nbrs
                .iter()
                .filter(|(_, snbr)| snbr.priority == 0)
                .map(|(addr, _)| addr)
                .filter(|addr| self.state.nbrs_by_src.contains_key(addr))
            {
                instance.tx.protocol_input.nsm_event(
                    area.id,
                    self.name.clone(),
                    *addr,
                    nsm::Event::Start,
                );
            }
        }

        // Step 7: adjacencies may need to form or dissolve.
        if new_dr != old_dr || new_bdr != old_bdr {
            for nbr_idx in self.nbr_indexes() {
                let nbr = &neighbors[nbr_idx];
                if nbr.state >= nsm::State::TwoWay {
                    instance.tx.protocol_input.nsm_event(
                        area.id,
                        self.name.clone(),
                        nbr.src,
                        nsm::Event::AdjOk,
                    );
                }
            }

            // The Hello task embeds the DR and BDR fields.
            self.sync_hello_tx(area, instance);
        }

        if new_dr != old_dr {
            instance.tx.protocol_input.lsa_orig_event(
                LsaOriginateEvent::InterfaceDrChange {
                    area_id: area.id,
                    ifname: self.name.clone(),
                },
            );
        }

        next_state
    }

    pub(crate) fn need_adjacency(&self, nbr: &Neighbor<V>) -> bool {
        match self.config.if_type {
            InterfaceType::PointToPoint
            | InterfaceType::PointToMultipoint
            | InterfaceType::VirtualLink => true,
            InterfaceType::Broadcast | InterfaceType::NonBroadcast => {
                let nbr_net_id = nbr.network_id();
                self.is_dr_or_backup()
                    || self.state.dr == Some(nbr_net_id)
                    || self.state.bdr == Some(nbr_net_id)
            }
        }
    }

    pub(crate) fn enqueue_ls_update(
        &mut self,
        area: &Area<V>,
        instance: &InstanceUpView<'_, V>,
        lsa_key: LsaKey<V::LsaType>,
        lsa: Arc<Lsa<V>>,
    ) {
        self.state.ls_update_list.insert(lsa_key, lsa);

        if self.state.tasks.ls_update_timer.is_none() {
            let task = tasks::ls_update_timer(self, area, instance);
            self.state.tasks.ls_update_timer = Some(task);
        }
    }

    pub(crate) fn enqueue_delayed_ack(
        &mut self,
        area: &Area<V>,
        instance: &InstanceUpView<'_, V>,
        lsa_hdr: &V::LsaHdr,
    ) {
        self.state.ls_ack_list.insert(lsa_hdr.key(), *lsa_hdr);

        if self.state.tasks.ls_delayed_ack.is_none() {
            let task = tasks::delayed_ack_timer(self, area, instance);
            self.state.tasks.ls_delayed_ack = Some(task);
        }
    }

    pub(crate) fn send_packet(&self, msg: NetTxPacketMsg<V>) {
        if let Some(net) = &self.state.net {
            let _ = net.net_tx_packet_tx.send(msg);
        }
    }
}

impl<V> Drop for Interface<V>
where
    V: Version,
{
    fn drop(&mut self) {
        debug::iface_delete(&self.name);
    }
}

// ===== impl InterfaceSys =====

impl<V> InterfaceSys<V>
where
    V: Version,
{
    // Check if the interface shares a subnet with the given IP address.
    pub(crate) fn contains_addr(&self, addr: &V::IpAddr) -> bool {
        self.addr_list.iter().any(|local| local.contains(*addr))
    }

    fn join_multicast(&self, socket: &Socket, addr: MulticastAddr) {
        if let Err(error) =
            V::join_multicast(socket, addr, self.ifindex.unwrap())
        {
            IoError::MulticastJoin(addr, error).log();
        }
    }

    fn leave_multicast(&self, socket: &Socket, addr: MulticastAddr) {
        if let Err(error) =
            V::leave_multicast(socket, addr, self.ifindex.unwrap())
        {
            IoError::MulticastLeave(addr, error).log();
        }
    }
}

impl<V> Default for InterfaceSys<V>
where
    V: Version,
{
    fn default() -> InterfaceSys<V> {
        InterfaceSys {
            flags: Default::default(),
            ifindex: None,
            mtu: None,
            addr_list: Default::default(),
            primary_addr: None,
            unnumbered: false,
            linklocal_addr: None,
        }
    }
}

// ===== impl InterfaceState =====

impl<V> InterfaceState<V>
where
    V: Version,
{
    fn new(lsdb_key: LsdbKey) -> InterfaceState<V> {
        InterfaceState {
            ism_state: Default::default(),
            net: None,
            src_addr: None,
            vlink_dst_addr: None,
            mcast_groups: Default::default(),
            dr: None,
            bdr: None,
            nbrs_by_src: Default::default(),
            nbrs_by_router_id: Default::default(),
            ls_update_list: Default::default(),
            ls_ack_list: Default::default(),
            event_count: 0,
            rx_error_count: 0,
            discontinuity_time: Utc::now(),
            lsdb: Lsdb::new(lsdb_key),
            network_lsa_self: None,
            link_lsa_self: None,
            auth: None,
            tasks: Default::default(),
        }
    }
}

// ===== impl InterfaceNet =====

impl<V> InterfaceNet<V>
where
    V: Version,
{
    fn new(
        iface: &Interface<V>,
        area: &Area<V>,
        af: AddressFamily,
        auth_seqno: &Arc<AtomicU64>,
        instance: &InstanceUpView<'_, V>,
    ) -> Result<Self, IoError> {
        let socket = V::socket(iface)
            .map_err(IoError::SocketCreation)
            .and_then(|socket| {
                AsyncFd::new(socket).map_err(IoError::SocketCreation)
            })
            .map(Arc::new)?;

        // Checksum offloading and authentication are mutually exclusive.
        let cksum_enable = iface.state.auth.is_none();
        V::set_cksum_offloading(socket.get_ref(), cksum_enable)
            .map_err(IoError::SocketCreation)?;

        let (net_tx_packet_tx, net_tx_packet_rx) = mpsc::unbounded_channel();
        let mut net_tx_task = tasks::net_tx(
            socket.clone(),
            iface,
            auth_seqno,
            net_tx_packet_rx,
            #[cfg(feature = "testing")]
            &instance.tx.protocol_output,
        );
        let net_rx_task = tasks::net_rx(
            socket.clone(),
            iface,
            area,
            af,
            &instance.tx.protocol_input.net_packet_rx,
        );

        // The network Tx task is detached so that flushed self-originated
        // LSAs still go out while the instance is shutting down.
        net_tx_task.detach();

        Ok(InterfaceNet {
            socket,
            _net_tx_task: net_tx_task,
            _net_rx_task: net_rx_task,
            net_tx_packet_tx,
        })
    }

    fn restart_tasks(
        &mut self,
        iface: &Interface<V>,
        area: &Area<V>,
        af: AddressFamily,
        auth_seqno: &Arc<AtomicU64>,
        instance: &InstanceUpView<'_, V>,
    ) {
        let (net_tx_packet_tx, net_tx_packet_rx) = mpsc::unbounded_channel();
        self._net_tx_task = tasks::net_tx(
            self.socket.clone(),
            iface,
            auth_seqno,
            net_tx_packet_rx,
            #[cfg(feature = "testing")]
            &instance.tx.protocol_output,
        );
        self._net_rx_task = tasks::net_rx(
            self.socket.clone(),
            iface,
            area,
            af,
            &instance.tx.protocol_input.net_packet_rx,
        );
        self._net_tx_task.detach();
        self.net_tx_packet_tx = net_tx_packet_tx;
    }
}

// ===== impl InterfaceTasks =====

impl<V> Default for InterfaceTasks<V>
where
    V: Version,
{
    fn default() -> InterfaceTasks<V> {
        InterfaceTasks {
            hello_interval: Default::default(),
            nbma_poll_interval: Default::default(),
            wait_timer: Default::default(),
            ls_update_timer: Default::default(),
            ls_delayed_ack: Default::default(),
        }
    }
}

// ===== global functions =====

// The BDR and DR calculations (RFC 2328 section 9.4 steps 2 and 3): the
// BDR comes from the routers not claiming to be DR, preferring those that
// declare themselves BDR; the DR comes from the routers claiming to be
// DR, falling back to promoting the just-elected BDR. Ties break on
// priority, then Router ID.
fn elect(
    candidates: &[DrCandidate],
) -> (Option<NeighborNetId>, Option<NeighborNetId>) {
    let best = |iter: &mut dyn Iterator<Item = &DrCandidate>| {
        iter.max_by_key(|c| (c.priority, c.router_id)).map(|c| c.net_id)
    };

    let bdr = best(
        &mut candidates
            .iter()
            .filter(|c| c.dr != Some(c.net_id))
            .filter(|c| c.bdr == Some(c.net_id)),
    )
    .or_else(|| {
        best(&mut candidates.iter().filter(|c| c.dr != Some(c.net_id)))
    });

    let dr =
        best(&mut candidates.iter().filter(|c| c.dr == Some(c.net_id)))
            .or(bdr);

    (dr, bdr)
}

// Readiness checks shared by both OSPF versions.
pub(crate) fn is_ready_common<V>(
    iface: &Interface<V>,
) -> Result<(), InterfaceInactiveReason>
where
    V: Version,
{
    if !iface.config.enabled {
        return Err(InterfaceInactiveReason::AdminDown);
    }

    if iface.is_virtual_link() {
        // Virtual links come up once the routing table provides a path to
        // the configured endpoint.
        if iface.state.vlink_dst_addr.is_none() {
            return Err(InterfaceInactiveReason::MissingVirtualLinkEndpoint);
        }
        return Ok(());
    }

    if !iface.system.flags.contains(InterfaceFlags::OPERATIVE) {
        return Err(InterfaceInactiveReason::OperationalDown);
    }

    if iface.system.ifindex.is_none() {
        return Err(InterfaceInactiveReason::MissingIfindex);
    }

    if iface.system.mtu.is_none() {
        return Err(InterfaceInactiveReason::MissingMtu);
    }

    Ok(())
}

pub(crate) fn validate_packet_src_common<V>(
    _iface: &Interface<V>,
    src: V::NetIpAddr,
) -> Result<(), Error<V>>
where
    V: Version,
{
    if !src.is_usable() {
        return Err(Error::InvalidSource(src));
    }

    Ok(())
}
