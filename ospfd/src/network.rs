//
// Copyright (c) The Ospfd Project Contributors
//
// SPDX-License-Identifier: MIT
//

#[cfg(not(feature = "testing"))]
use std::io::{IoSlice, IoSliceMut};
#[cfg(not(feature = "testing"))]
use std::net::Ipv4Addr;
#[cfg(not(feature = "testing"))]
use std::ops::Deref;
#[cfg(not(feature = "testing"))]
use std::os::fd::AsRawFd;
#[cfg(not(feature = "testing"))]
use std::sync::Arc;
#[cfg(not(feature = "testing"))]
use std::sync::atomic::AtomicU64;

use bytes::Bytes;
use nix::sys::socket::{self, SockaddrLike};
#[cfg(not(feature = "testing"))]
use ospfd_utils::ip::AddressFamily;
use ospfd_utils::ip::{IpAddrKind, IpNetworkKind};
use ospfd_utils::socket::Socket;
#[cfg(not(feature = "testing"))]
use ospfd_utils::socket::AsyncFd;
#[cfg(not(feature = "testing"))]
use ospfd_utils::{Sender, UnboundedReceiver};
use serde::Serialize;

#[cfg(not(feature = "testing"))]
use crate::debug;
#[cfg(not(feature = "testing"))]
use crate::error::{Error, IoError};
use crate::interface::Interface;
#[cfg(not(feature = "testing"))]
use crate::packet::Packet;
#[cfg(not(feature = "testing"))]
use crate::packet::auth::{AuthDecodeCtx, AuthEncodeCtx, AuthMethod};
use crate::packet::error::DecodeResult;
#[cfg(not(feature = "testing"))]
use crate::tasks::messages::input::NetRxPacketMsg;
#[cfg(not(feature = "testing"))]
use crate::tasks::messages::output::NetTxPacketMsg;
use crate::version::Version;

// OSPF IP protocol number.
pub const OSPF_IP_PROTO: i32 = 89;

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize)]
pub enum MulticastAddr {
    AllSpfRtrs,
    AllDrRtrs,
}

// OSPF version-specific code.
pub trait NetworkVersion<V: Version> {
    type NetIpAddr: IpAddrKind;
    type NetIpNetwork: IpNetworkKind<Self::NetIpAddr>;
    type SocketAddr: SockaddrLike + Send + Sync;
    type Pktinfo: Send + Sync;

    // Create OSPF raw socket for the given interface.
    fn socket(iface: &Interface<V>) -> Result<Socket, std::io::Error>;

    // Enable or disable checksum offloading.
    fn set_cksum_offloading(
        socket: &Socket,
        enable: bool,
    ) -> Result<(), std::io::Error>;

    // Return the IP address of the specified OSPF multicast group.
    fn multicast_addr(addr: MulticastAddr) -> &'static V::NetIpAddr;

    // Join the specified OSPF multicast group.
    fn join_multicast(
        socket: &Socket,
        addr: MulticastAddr,
        ifindex: u32,
    ) -> Result<(), std::io::Error>;

    // Leave the specified OSPF multicast group.
    fn leave_multicast(
        socket: &Socket,
        addr: MulticastAddr,
        ifindex: u32,
    ) -> Result<(), std::io::Error>;

    // Create new IP_PKTINFO/IPV6_PKTINFO struct.
    fn new_pktinfo(src: V::NetIpAddr, ifindex: u32) -> V::Pktinfo;

    // Initialize the control message used by `sendmsg`.
    fn set_cmsg_data(pktinfo: &V::Pktinfo) -> socket::ControlMessage<'_>;

    // Get destination address from the control message of a received
    // packet.
    fn get_cmsg_data(cmsgs: socket::CmsgIterator<'_>) -> Option<V::NetIpAddr>;

    // Convert packet destination to socket address.
    fn dst_to_sockaddr(ifindex: u32, addr: V::NetIpAddr) -> V::SocketAddr;

    // Convert socket address to packet source address.
    fn src_from_sockaddr(sockaddr: &V::SocketAddr) -> V::NetIpAddr;

    // Validate the IP header of the received packet (OSPFv2 receives the
    // full IP packet on raw sockets; OSPFv3 receives only the payload).
    fn validate_ip_hdr(buf: &mut Bytes) -> DecodeResult<()>;
}

// ===== global functions =====

// Looks up the key material for one outgoing packet. Fails only when a
// keychain has no currently valid send key.
#[cfg(not(feature = "testing"))]
fn auth_encode_ctx<'a>(
    auth: &'a Option<AuthMethod>,
    auth_seqno: &'a Arc<AtomicU64>,
) -> Result<Option<AuthEncodeCtx<'a>>, ()> {
    match auth {
        None => Ok(None),
        Some(AuthMethod::SimplePassword(password)) => {
            Ok(Some(AuthEncodeCtx::Simple(password)))
        }
        Some(auth) => match auth.key_lookup_send() {
            Some(key) => Ok(Some(AuthEncodeCtx::Cryptographic {
                key,
                seqno: auth_seqno,
            })),
            None => Err(()),
        },
    }
}

#[cfg(not(feature = "testing"))]
pub(crate) async fn send_packet<V>(
    socket: &AsyncFd<Socket>,
    ifname: &str,
    ifindex: u32,
    src: V::NetIpAddr,
    dst: V::NetIpAddr,
    packet: &Packet<V>,
    auth: Option<AuthEncodeCtx<'_>>,
) -> Result<usize, IoError>
where
    V: Version,
{
    debug::packet_tx(ifname, &dst, packet);

    let buf = packet.encode(auth);

    let iov = [IoSlice::new(&buf)];
    let sockaddr: V::SocketAddr = V::dst_to_sockaddr(ifindex, dst);
    let pktinfo = V::new_pktinfo(src, ifindex);
    let cmsg = [V::set_cmsg_data(&pktinfo)];
    socket
        .async_io(tokio::io::Interest::WRITABLE, |socket| {
            socket::sendmsg(
                socket.as_raw_fd(),
                &iov,
                &cmsg,
                socket::MsgFlags::empty(),
                Some(&sockaddr),
            )
            .map_err(|errno| errno.into())
        })
        .await
        .map_err(IoError::Send)
}

// Drains packets enqueued by the main task. A refused send drops the
// packet; retransmission timers re-drive delivery.
#[cfg(not(feature = "testing"))]
pub(crate) async fn write_loop<V>(
    socket: Arc<AsyncFd<Socket>>,
    ifname: String,
    ifindex: u32,
    auth: Option<AuthMethod>,
    auth_seqno: Arc<AtomicU64>,
    mut net_tx_packet_rx: UnboundedReceiver<NetTxPacketMsg<V>>,
) where
    V: Version,
{
    while let Some(NetTxPacketMsg { packet, src, dst }) =
        net_tx_packet_rx.recv().await
    {
        let Ok(auth) = auth_encode_ctx(&auth, &auth_seqno) else {
            Error::<V>::PacketAuthMissingKey.log();
            continue;
        };

        for dst in dst {
            if let Err(error) =
                send_packet(&socket, &ifname, ifindex, src, dst, &packet, auth)
                    .await
            {
                error.log();
            }
        }
    }
}

#[cfg(not(feature = "testing"))]
pub(crate) async fn read_loop<V>(
    socket: Arc<AsyncFd<Socket>>,
    area_id: Ipv4Addr,
    ifname: String,
    af: AddressFamily,
    auth: Option<AuthMethod>,
    net_packet_rx_tx: Sender<NetRxPacketMsg<V>>,
) where
    V: Version,
{
    let mut buf = [0; 16384];
    let mut iov = [IoSliceMut::new(&mut buf)];
    let mut cmsgspace = nix::cmsg_space!(V::Pktinfo);

    loop {
        match socket
            .async_io(tokio::io::Interest::READABLE, |socket| {
                match socket::recvmsg::<V::SocketAddr>(
                    socket.as_raw_fd(),
                    &mut iov,
                    Some(&mut cmsgspace),
                    socket::MsgFlags::empty(),
                ) {
                    Ok(msg) => {
                        let src = msg
                            .address
                            .as_ref()
                            .map(|addr| V::src_from_sockaddr(addr));
                        let dst = V::get_cmsg_data(msg.cmsgs().unwrap());
                        Ok((src, dst, msg.bytes))
                    }
                    Err(errno) => Err(errno.into()),
                }
            })
            .await
        {
            Ok((src, dst, bytes)) => {
                let Some(src) = src else {
                    IoError::RecvMissingSourceAddr.log();
                    return;
                };
                let Some(dst) = dst else {
                    IoError::RecvMissingAncillaryData.log();
                    return;
                };

                // Strip the IP layer and parse. Decode errors travel up to
                // the main task, which accounts for them.
                let mut buf = Bytes::copy_from_slice(&iov[0].deref()[0..bytes]);
                let packet = V::validate_ip_hdr(&mut buf).and_then(|_| {
                    let auth = auth.as_ref().map(AuthDecodeCtx::new);
                    Packet::decode(af, &mut buf, auth)
                });

                let msg = NetRxPacketMsg {
                    area_id,
                    ifname: ifname.clone(),
                    src,
                    dst,
                    packet,
                };
                if net_packet_rx_tx.send(msg).await.is_err() {
                    // The instance is shutting down.
                    return;
                }
            }
            Err(error) if error.kind() == std::io::ErrorKind::Interrupted => {
                // EINTR; try again.
                continue;
            }
            Err(error) => {
                IoError::Recv(error).log();
            }
        }
    }
}
