//
// Copyright (c) The Ospfd Project Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv4Addr;

use bytes::{Buf, Bytes};
use ipnetwork::Ipv4Network;
use nix::sys::socket::{self, SockaddrIn};
use ospfd_utils::capabilities;
use ospfd_utils::socket::Socket;
#[cfg(not(feature = "testing"))]
use ospfd_utils::socket::SocketExt;

use crate::interface::Interface;
use crate::network::{MulticastAddr, NetworkVersion, OSPF_IP_PROTO};
use crate::packet::error::{DecodeError, DecodeResult};
use crate::version::Ospfv2;

// OSPFv2 multicast addresses (RFC 2328 appendix A.1).
static ALL_SPF_RTRS: Ipv4Addr = Ipv4Addr::new(224, 0, 0, 5);
static ALL_DR_RTRS: Ipv4Addr = Ipv4Addr::new(224, 0, 0, 6);

// ===== impl Ospfv2 =====

impl NetworkVersion<Self> for Ospfv2 {
    type NetIpAddr = Ipv4Addr;
    type NetIpNetwork = Ipv4Network;
    type SocketAddr = SockaddrIn;
    type Pktinfo = libc::in_pktinfo;

    fn socket(iface: &Interface<Self>) -> Result<Socket, std::io::Error> {
        #[cfg(not(feature = "testing"))]
        {
            use socket2::{Domain, Protocol, Type};

            let socket = capabilities::raise(|| {
                Socket::new(
                    Domain::IPV4,
                    Type::RAW,
                    Some(Protocol::from(OSPF_IP_PROTO)),
                )
            })?;

            socket.set_nonblocking(true)?;
            // Virtual links send unicast across the transit area and are
            // not tied to a single device.
            if !iface.is_virtual_link() {
                socket.bind_device(Some(iface.name.as_bytes()))?;
            }
            socket.set_multicast_loop_v4(false)?;
            socket.set_multicast_ttl_v4(1)?;
            socket.set_ipv4_pktinfo(true)?;
            if iface.config.router_alert {
                socket.set_ipv4_router_alert(true)?;
            }
            socket.set_tos_v4(libc::IPTOS_PREC_INTERNETCONTROL as u32)?;

            Ok(socket)
        }
        #[cfg(feature = "testing")]
        {
            let _ = iface;
            Ok(Socket {})
        }
    }

    fn set_cksum_offloading(
        _socket: &Socket,
        _enable: bool,
    ) -> Result<(), std::io::Error> {
        // The OSPFv2 checksum is always computed in user space.
        Ok(())
    }

    fn multicast_addr(addr: MulticastAddr) -> &'static Ipv4Addr {
        match addr {
            MulticastAddr::AllSpfRtrs => &ALL_SPF_RTRS,
            MulticastAddr::AllDrRtrs => &ALL_DR_RTRS,
        }
    }

    fn join_multicast(
        socket: &Socket,
        addr: MulticastAddr,
        ifindex: u32,
    ) -> Result<(), std::io::Error> {
        #[cfg(not(feature = "testing"))]
        {
            use socket2::InterfaceIndexOrAddress;

            let addr = Self::multicast_addr(addr);
            let socket = socket2::SockRef::from(socket);
            socket.join_multicast_v4_n(
                addr,
                &InterfaceIndexOrAddress::Index(ifindex),
            )
        }
        #[cfg(feature = "testing")]
        {
            let _ = (socket, addr, ifindex);
            Ok(())
        }
    }

    fn leave_multicast(
        socket: &Socket,
        addr: MulticastAddr,
        ifindex: u32,
    ) -> Result<(), std::io::Error> {
        #[cfg(not(feature = "testing"))]
        {
            use socket2::InterfaceIndexOrAddress;

            let addr = Self::multicast_addr(addr);
            let socket = socket2::SockRef::from(socket);
            socket.leave_multicast_v4_n(
                addr,
                &InterfaceIndexOrAddress::Index(ifindex),
            )
        }
        #[cfg(feature = "testing")]
        {
            let _ = (socket, addr, ifindex);
            Ok(())
        }
    }

    fn new_pktinfo(src: Ipv4Addr, ifindex: u32) -> libc::in_pktinfo {
        libc::in_pktinfo {
            ipi_ifindex: ifindex as i32,
            ipi_spec_dst: libc::in_addr { s_addr: 0 },
            ipi_addr: libc::in_addr { s_addr: src.into() },
        }
    }

    fn set_cmsg_data(pktinfo: &libc::in_pktinfo) -> socket::ControlMessage<'_> {
        socket::ControlMessage::Ipv4PacketInfo(pktinfo)
    }

    fn get_cmsg_data(mut cmsgs: socket::CmsgIterator<'_>) -> Option<Ipv4Addr> {
        cmsgs.find_map(|cmsg| match cmsg {
            socket::ControlMessageOwned::Ipv4PacketInfo(pktinfo) => {
                Some(Ipv4Addr::from(pktinfo.ipi_spec_dst.s_addr.to_be()))
            }
            _ => None,
        })
    }

    fn dst_to_sockaddr(_ifindex: u32, addr: Ipv4Addr) -> SockaddrIn {
        std::net::SocketAddrV4::new(addr, 0).into()
    }

    fn src_from_sockaddr(sockaddr: &SockaddrIn) -> Ipv4Addr {
        Ipv4Addr::from(sockaddr.ip())
    }

    // Raw IPv4 sockets deliver the IP header along with the payload; peel
    // it off, cross-checking the total length against what was received.
    fn validate_ip_hdr(buf: &mut Bytes) -> DecodeResult<()> {
        let received_len = buf.len() as u16;

        let ihl = buf.try_get_u8()? & 0x0f;
        let _tos = buf.try_get_u8()?;
        let total_len = buf.try_get_u16()?;
        if total_len != received_len {
            return Err(DecodeError::InvalidIpHdrLength(total_len));
        }

        // Skip the remaining header bytes, options included.
        buf.advance((ihl as usize) * 4 - 4);

        Ok(())
    }
}
