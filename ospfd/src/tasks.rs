//
// Copyright (c) The Ospfd Project Contributors
//
// SPDX-License-Identifier: MIT
//

use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::time::{Duration, Instant};

use ospfd_utils::ip::AddressFamily;
use ospfd_utils::socket::{AsyncFd, Socket};
use ospfd_utils::task::{IntervalTask, Task, TimeoutTask};
use ospfd_utils::{Sender, UnboundedReceiver, UnboundedSender};
use smallvec::SmallVec;
use tracing::{Instrument, debug_span};

use crate::area::Area;
use crate::instance::InstanceUpView;
use crate::interface::{Interface, ism};
use crate::lsdb::{self, LsaFlushReason, LsdbKey};
use crate::neighbor::{Neighbor, nsm};
use crate::network;
use crate::packet::lsa::{Lsa, LsaHdrVersion, LsaKey};
use crate::spf;
use crate::version::Version;

//
// OSPF tasks diagram:
//                                    +--------------+
//                                    |  management  |
//                                    +--------------+
//                                          | ^
//                                          V |
//                                    +--------------+
//                     net_rx (Nx) -> |              | -> (Nx) net_tx
//                                    |              |
//             ism_wait_timer (Nx) -> |              | -> (Nx) hello_interval
//                                    |              |
//       nsm_inactivity_timer (Nx) -> |              |
//       packet_rxmt_interval (Nx) -> |              |
//          dbdesc_free_timer (Nx) -> |              |
//            ls_update_timer (Nx) -> |              |
//          delayed_ack_timer (Nx) -> |   instance   |
//                                    |              |
//           lsa_expiry_timer (Nx) -> |              |
//          lsa_refresh_timer (Nx) -> |              |
//     lsa_orig_delayed_timer (Nx) -> |              |
// lsdb_maxage_sweep_interval (1x) -> |              |
//  lsdb_cksum_sweep_interval (1x) -> |              |
//                                    |              |
//            spf_delay_timer (Nx) -> |              |
//                                    +--------------+
//                                          | ^
//                                          V |
//                                    +--------------+
//                                    |  southbound  |
//                                    +--------------+
//

// OSPF inter-task message types.
//
// Messages address protocol entities by their natural keys (area ID,
// interface name, neighbor source address, LSA key); by the time a timer
// fires, the entity it was armed for may be gone.
pub mod messages {
    use serde::{Deserialize, Serialize};

    // Type aliases.
    pub type ProtocolInputMsg<V> = input::ProtocolMsg<V>;
    pub type ProtocolOutputMsg<V> = output::ProtocolMsg<V>;

    // Input messages (child task -> main task).
    pub mod input {
        use super::*;

        use std::net::Ipv4Addr;

        use crate::interface::ism;
        use crate::lsdb::{LsaFlushReason, LsaOriginateEvent, LsdbKey};
        use crate::neighbor::{RxmtPacketType, nsm};
        use crate::packet::Packet;
        use crate::packet::error::DecodeError;
        use crate::packet::lsa::LsaKey;
        use crate::spf;
        use crate::version::Version;

        #[derive(Debug)]
        pub enum ProtocolMsg<V: Version> {
            IsmEvent(IsmEventMsg),
            NsmEvent(NsmEventMsg<V>),
            NetRxPacket(NetRxPacketMsg<V>),
            DbDescFree(DbDescFreeMsg<V>),
            SendLsUpdate(SendLsUpdateMsg<V>),
            RxmtInterval(RxmtIntervalMsg<V>),
            DelayedAck(DelayedAckMsg),
            LsaOrigEvent(LsaOrigEventMsg<V>),
            LsaOrigCheck(LsaOrigCheckMsg<V>),
            LsaOrigDelayed(LsaOrigDelayedMsg<V>),
            LsaFlush(LsaFlushMsg<V>),
            LsaRefresh(LsaRefreshMsg<V>),
            LsdbMaxAgeSweep(LsdbMaxAgeSweepMsg),
            LsdbCksumSweep(LsdbCksumSweepMsg),
            SpfDelayEvent(SpfDelayEventMsg),
        }

        #[derive(Debug, Deserialize, Serialize)]
        pub struct IsmEventMsg {
            pub area_id: Ipv4Addr,
            pub ifname: String,
            pub event: ism::Event,
        }

        #[derive(Debug, Deserialize, Serialize)]
        #[serde(bound = "V: Version")]
        pub struct NsmEventMsg<V: Version> {
            pub area_id: Ipv4Addr,
            pub ifname: String,
            pub nbr_src: V::NetIpAddr,
            pub event: nsm::Event,
        }

        #[derive(Debug)]
        pub struct NetRxPacketMsg<V: Version> {
            pub area_id: Ipv4Addr,
            pub ifname: String,
            pub src: V::NetIpAddr,
            pub dst: V::NetIpAddr,
            pub packet: Result<Packet<V>, DecodeError>,
        }

        #[derive(Clone, Debug, Deserialize, Serialize)]
        #[serde(bound = "V: Version")]
        pub struct DbDescFreeMsg<V: Version> {
            pub area_id: Ipv4Addr,
            pub ifname: String,
            pub nbr_src: V::NetIpAddr,
        }

        #[derive(Debug, Deserialize, Serialize)]
        #[serde(bound = "V: Version")]
        pub struct SendLsUpdateMsg<V: Version> {
            pub area_id: Ipv4Addr,
            pub ifname: String,
            pub nbr_src: Option<V::NetIpAddr>,
        }

        #[derive(Clone, Debug, Deserialize, Serialize)]
        #[serde(bound = "V: Version")]
        pub struct RxmtIntervalMsg<V: Version> {
            pub area_id: Ipv4Addr,
            pub ifname: String,
            pub nbr_src: V::NetIpAddr,
            pub packet_type: RxmtPacketType,
        }

        #[derive(Clone, Debug, Deserialize, Serialize)]
        pub struct DelayedAckMsg {
            pub area_id: Ipv4Addr,
            pub ifname: String,
        }

        #[derive(Debug)]
        pub struct LsaOrigEventMsg<V: Version> {
            pub event: LsaOriginateEvent<V>,
        }

        #[derive(Debug)]
        pub struct LsaOrigCheckMsg<V: Version> {
            pub lsdb_key: LsdbKey,
            pub options: Option<V::PacketOptions>,
            pub lsa_id: Ipv4Addr,
            pub lsa_body: V::LsaBody,
        }

        #[derive(Clone, Debug)]
        pub struct LsaOrigDelayedMsg<V: Version> {
            pub lsdb_key: LsdbKey,
            pub lsa_key: LsaKey<V::LsaType>,
        }

        #[derive(Clone, Debug)]
        pub struct LsaFlushMsg<V: Version> {
            pub lsdb_key: LsdbKey,
            pub lsa_key: LsaKey<V::LsaType>,
            pub reason: LsaFlushReason,
        }

        #[derive(Clone, Debug)]
        pub struct LsaRefreshMsg<V: Version> {
            pub lsdb_key: LsdbKey,
            pub lsa_key: LsaKey<V::LsaType>,
        }

        #[derive(Clone, Debug, Deserialize, Serialize)]
        pub struct LsdbMaxAgeSweepMsg {}

        #[derive(Clone, Debug, Deserialize, Serialize)]
        pub struct LsdbCksumSweepMsg {}

        #[derive(Debug, Deserialize, Serialize)]
        pub struct SpfDelayEventMsg {
            pub event: spf::fsm::Event,
        }
    }

    // Output messages (main task -> child task).
    pub mod output {
        use super::*;

        use smallvec::SmallVec;

        use crate::packet::Packet;
        use crate::version::Version;

        #[derive(Debug, Serialize)]
        #[serde(bound = "V: Version")]
        pub enum ProtocolMsg<V: Version> {
            NetTxPacket(NetTxPacketMsg<V>),
        }

        #[derive(Clone, Debug, Serialize)]
        #[serde(bound = "V: Version")]
        pub struct NetTxPacketMsg<V: Version> {
            pub packet: Packet<V>,
            pub src: V::NetIpAddr,
            pub dst: SmallVec<[V::NetIpAddr; 4]>,
        }
    }
}

// ===== OSPF tasks =====

// Network Rx task.
pub(crate) fn net_rx<V>(
    socket: Arc<AsyncFd<Socket>>,
    iface: &Interface<V>,
    area: &Area<V>,
    af: AddressFamily,
    net_packet_rx_tx: &Sender<messages::input::NetRxPacketMsg<V>>,
) -> Task<()>
where
    V: Version,
{
    #[cfg(not(feature = "testing"))]
    {
        let span1 = debug_span!("network");
        let _span1_guard = span1.enter();
        let span2 = debug_span!("input");
        let _span2_guard = span2.enter();

        let area_id = area.id;
        let ifname = iface.name.clone();
        let auth = iface.state.auth.clone();
        let net_packet_rx_tx = net_packet_rx_tx.clone();

        Task::spawn_supervised(move || {
            let socket = socket.clone();
            let ifname = ifname.clone();
            let auth = auth.clone();
            let net_packet_rx_tx = net_packet_rx_tx.clone();
            async move {
                network::read_loop(
                    socket,
                    area_id,
                    ifname,
                    af,
                    auth,
                    net_packet_rx_tx,
                )
                .await;
            }
            .in_current_span()
        })
    }
    #[cfg(feature = "testing")]
    {
        let _ = (socket, iface, area, af, net_packet_rx_tx);
        Task::spawn(async move { std::future::pending().await })
    }
}

// Network Tx task.
#[allow(unused_mut)]
pub(crate) fn net_tx<V>(
    socket: Arc<AsyncFd<Socket>>,
    iface: &Interface<V>,
    auth_seqno: &Arc<AtomicU64>,
    mut net_tx_packet_rx: UnboundedReceiver<messages::output::NetTxPacketMsg<V>>,
    #[cfg(feature = "testing")] proto_output_tx: &Sender<
        messages::ProtocolOutputMsg<V>,
    >,
) -> Task<()>
where
    V: Version,
{
    #[cfg(not(feature = "testing"))]
    {
        let span1 = debug_span!("network");
        let _span1_guard = span1.enter();
        let span2 = debug_span!("output");
        let _span2_guard = span2.enter();

        let ifname = iface.name.clone();
        let ifindex = iface.system.ifindex.unwrap_or(0);
        let auth = iface.state.auth.clone();
        let auth_seqno = auth_seqno.clone();

        Task::spawn(
            async move {
                network::write_loop(
                    socket,
                    ifname,
                    ifindex,
                    auth,
                    auth_seqno,
                    net_tx_packet_rx,
                )
                .await;
            }
            .in_current_span(),
        )
    }
    #[cfg(feature = "testing")]
    {
        let _ = (socket, iface, auth_seqno);
        let proto_output_tx = proto_output_tx.clone();
        Task::spawn(async move {
            // Relay message to the test framework.
            while let Some(msg) = net_tx_packet_rx.recv().await {
                let msg = messages::ProtocolOutputMsg::NetTxPacket(msg);
                let _ = proto_output_tx.send(msg).await;
            }
        })
    }
}

// Send periodic OSPF Hello messages.
pub(crate) fn hello_interval<V>(
    iface: &Interface<V>,
    area: &Area<V>,
    instance: &InstanceUpView<'_, V>,
    dst: SmallVec<[V::NetIpAddr; 4]>,
    interval: u16,
) -> IntervalTask
where
    V: Version,
{
    #[cfg(not(feature = "testing"))]
    {
        // The packet is pre-built; whenever its contents would change (DR,
        // neighbor list, options), the task is restarted with a fresh one.
        let packet = V::generate_hello(iface, area, instance);
        let src = iface.state.src_addr.unwrap();

        let net_tx_packet_tx =
            iface.state.net.as_ref().unwrap().net_tx_packet_tx.clone();
        IntervalTask::new(
            Duration::from_secs(interval.into()),
            true,
            move || {
                let packet = packet.clone();
                let dst = dst.clone();
                let net_tx_packet_tx = net_tx_packet_tx.clone();

                async move {
                    let msg = messages::output::NetTxPacketMsg {
                        packet,
                        src,
                        dst,
                    };
                    let _ = net_tx_packet_tx.send(msg);
                }
            },
        )
    }
    #[cfg(feature = "testing")]
    {
        let _ = (iface, area, instance, dst);
        IntervalTask::new(
            Duration::from_secs(interval.into()),
            true,
            move || async move {},
        )
    }
}

// Interface wait timer task.
pub(crate) fn ism_wait_timer<V>(
    iface: &Interface<V>,
    area: &Area<V>,
    instance: &InstanceUpView<'_, V>,
) -> TimeoutTask
where
    V: Version,
{
    let timeout = Duration::from_secs(iface.config.dead_interval.into());
    let area_id = area.id;
    let ifname = iface.name.clone();
    let ism_event_tx = instance.tx.protocol_input.ism_event.clone();

    TimeoutTask::new(timeout, move || async move {
        let msg = messages::input::IsmEventMsg {
            area_id,
            ifname,
            event: ism::Event::WaitTimer,
        };
        let _ = ism_event_tx.send(msg);
    })
}

// Neighbor inactivity timer.
//
// Firing is equivalent to a KillNbr event: the neighbor goes back to Down
// and all of its lists are cleared.
pub(crate) fn nsm_inactivity_timer<V>(
    nbr: &Neighbor<V>,
    iface: &Interface<V>,
    area: &Area<V>,
    instance: &InstanceUpView<'_, V>,
) -> TimeoutTask
where
    V: Version,
{
    let timeout = Duration::from_secs(iface.config.dead_interval.into());
    let area_id = area.id;
    let ifname = iface.name.clone();
    let nbr_src = nbr.src;
    let nsm_event_tx = instance.tx.protocol_input.nsm_event.clone();

    TimeoutTask::new(timeout, move || async move {
        let msg = messages::input::NsmEventMsg {
            area_id,
            ifname,
            nbr_src,
            event: nsm::Event::InactivityTimer,
        };
        let _ = nsm_event_tx.send(msg);
    })
}

// Send periodic packet retransmissions.
pub(crate) fn packet_rxmt_interval<V>(
    iface: &Interface<V>,
    msg: messages::input::RxmtIntervalMsg<V>,
    instance: &InstanceUpView<'_, V>,
) -> IntervalTask
where
    V: Version,
{
    let rxmt_interval_tx = instance.tx.protocol_input.rxmt_interval.clone();

    IntervalTask::new(
        Duration::from_secs(iface.config.retransmit_interval.into()),
        false,
        move || {
            let rxmt_interval_tx = rxmt_interval_tx.clone();
            let msg = msg.clone();

            async move {
                let _ = rxmt_interval_tx.send(msg).await;
            }
        },
    )
}

// Timer to free the neighbor's last sent/received Database Description
// packets.
pub(crate) fn dbdesc_free_timer<V>(
    nbr: &Neighbor<V>,
    iface: &Interface<V>,
    area: &Area<V>,
    instance: &InstanceUpView<'_, V>,
) -> TimeoutTask
where
    V: Version,
{
    let area_id = area.id;
    let ifname = iface.name.clone();
    let nbr_src = nbr.src;
    let dbdesc_free_tx = instance.tx.protocol_input.dbdesc_free.clone();

    TimeoutTask::new(
        Duration::from_secs(iface.config.dead_interval.into()),
        move || async move {
            let _ = dbdesc_free_tx
                .send(messages::input::DbDescFreeMsg {
                    area_id,
                    ifname,
                    nbr_src,
                })
                .await;
        },
    )
}

// Interface LS Update timer task, used to group multiple LSAs into the
// same LS Update packet.
pub(crate) fn ls_update_timer<V>(
    iface: &Interface<V>,
    area: &Area<V>,
    instance: &InstanceUpView<'_, V>,
) -> TimeoutTask
where
    V: Version,
{
    let area_id = area.id;
    let ifname = iface.name.clone();
    let send_lsupd_tx = instance.tx.protocol_input.send_lsupd.clone();

    #[cfg(not(feature = "testing"))]
    {
        TimeoutTask::new(Duration::from_millis(100), move || async move {
            let _ = send_lsupd_tx.send(messages::input::SendLsUpdateMsg {
                area_id,
                ifname,
                nbr_src: None,
            });
        })
    }
    #[cfg(feature = "testing")]
    {
        // Send LS Update immediately.
        let _ = send_lsupd_tx.send(messages::input::SendLsUpdateMsg {
            area_id,
            ifname,
            nbr_src: None,
        });

        TimeoutTask::new(Duration::from_millis(100), move || async move {})
    }
}

// Interface delayed Ack timer task.
pub(crate) fn delayed_ack_timer<V>(
    iface: &Interface<V>,
    area: &Area<V>,
    instance: &InstanceUpView<'_, V>,
) -> TimeoutTask
where
    V: Version,
{
    let area_id = area.id;
    let ifname = iface.name.clone();
    let delayed_ack_timeout_tx =
        instance.tx.protocol_input.delayed_ack_timeout.clone();

    #[cfg(not(feature = "testing"))]
    {
        // RFC 2328 - Section 13.5: "The fixed interval between a router's
        // delayed transmissions must be short (less than RxmtInterval) or
        // needless retransmissions will ensue".
        let timeout =
            Duration::from_secs((iface.config.retransmit_interval / 2).into());
        TimeoutTask::new(timeout, move || async move {
            let msg = messages::input::DelayedAckMsg { area_id, ifname };
            let _ = delayed_ack_timeout_tx.send(msg);
        })
    }
    #[cfg(feature = "testing")]
    {
        // Send LS Ack immediately.
        let msg = messages::input::DelayedAckMsg { area_id, ifname };
        let _ = delayed_ack_timeout_tx.send(msg);

        TimeoutTask::new(Duration::from_millis(100), move || async move {})
    }
}

// LSA expiry timer task.
pub(crate) fn lsa_expiry_timer<V>(
    lsdb_key: LsdbKey,
    lsa_key: LsaKey<V::LsaType>,
    lsa: &Lsa<V>,
    lsa_flush_tx: &UnboundedSender<messages::input::LsaFlushMsg<V>>,
) -> TimeoutTask
where
    V: Version,
{
    let timeout = lsdb::LSA_MAX_AGE - lsa.hdr.age();
    let timeout = Duration::from_secs(timeout.into());
    let lsa_flush_tx = lsa_flush_tx.clone();

    TimeoutTask::new(timeout, move || async move {
        let msg = messages::input::LsaFlushMsg {
            lsdb_key,
            lsa_key,
            reason: LsaFlushReason::Expiry,
        };
        let _ = lsa_flush_tx.send(msg);
    })
}

// LSA refresh timer task.
pub(crate) fn lsa_refresh_timer<V>(
    lsdb_key: LsdbKey,
    lsa_key: LsaKey<V::LsaType>,
    lsa_refresh_tx: &UnboundedSender<messages::input::LsaRefreshMsg<V>>,
) -> TimeoutTask
where
    V: Version,
{
    let timeout = Duration::from_secs(lsdb::LSA_REFRESH_TIME.into());
    let lsa_refresh_tx = lsa_refresh_tx.clone();

    TimeoutTask::new(timeout, move || async move {
        let msg = messages::input::LsaRefreshMsg { lsdb_key, lsa_key };
        let _ = lsa_refresh_tx.send(msg);
    })
}

// LSA delayed origination timer task.
pub(crate) fn lsa_orig_delayed_timer<V>(
    lsdb_key: LsdbKey,
    lsa_key: LsaKey<V::LsaType>,
    lsa_base_time: Option<Instant>,
    lsa_orig_delayed_tx: &Sender<messages::input::LsaOrigDelayedMsg<V>>,
) -> TimeoutTask
where
    V: Version,
{
    let lsa_orig_delayed_tx = lsa_orig_delayed_tx.clone();

    let lsa_age = lsa_base_time
        .map(|base_time| base_time.elapsed())
        .unwrap_or_default();
    let timeout =
        Duration::from_secs(lsdb::LSA_MIN_INTERVAL).saturating_sub(lsa_age);

    TimeoutTask::new(timeout, move || async move {
        let msg = messages::input::LsaOrigDelayedMsg { lsdb_key, lsa_key };
        let _ = lsa_orig_delayed_tx.send(msg).await;
    })
}

// LSDB MaxAge sweeper interval task.
pub(crate) fn lsdb_maxage_sweep_interval(
    lsdb_maxage_sweep_tx: &Sender<messages::input::LsdbMaxAgeSweepMsg>,
) -> IntervalTask {
    let lsdb_maxage_sweep_tx = lsdb_maxage_sweep_tx.clone();

    let timeout = Duration::from_secs(5);
    IntervalTask::new(timeout, false, move || {
        let lsdb_maxage_sweep_tx = lsdb_maxage_sweep_tx.clone();
        async move {
            let msg = messages::input::LsdbMaxAgeSweepMsg {};
            let _ = lsdb_maxage_sweep_tx.send(msg).await;
        }
    })
}

// Background checksum verification of all stored LSAs.
pub(crate) fn lsdb_cksum_sweep_interval(
    lsdb_cksum_sweep_tx: &Sender<messages::input::LsdbCksumSweepMsg>,
) -> IntervalTask {
    let lsdb_cksum_sweep_tx = lsdb_cksum_sweep_tx.clone();

    let timeout = Duration::from_secs(lsdb::LSDB_CHECK_AGE);
    IntervalTask::new(timeout, false, move || {
        let lsdb_cksum_sweep_tx = lsdb_cksum_sweep_tx.clone();
        async move {
            let msg = messages::input::LsdbCksumSweepMsg {};
            let _ = lsdb_cksum_sweep_tx.send(msg).await;
        }
    })
}

// SPF delay timer task.
pub(crate) fn spf_delay_timer<V>(
    instance: &InstanceUpView<'_, V>,
    event: spf::fsm::Event,
    timeout: u32,
) -> TimeoutTask
where
    V: Version,
{
    let timeout = Duration::from_millis(timeout.into());
    let spf_delay_event_tx = instance.tx.protocol_input.spf_delay_event.clone();

    TimeoutTask::new(timeout, move || async move {
        let msg = messages::input::SpfDelayEventMsg { event };
        let _ = spf_delay_event_tx.send(msg);
    })
}
