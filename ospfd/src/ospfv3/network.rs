//
// Copyright (c) The Ospfd Project Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv6Addr;

use bytes::Bytes;
use ipnetwork::Ipv6Network;
use nix::sys::socket::{self, SockaddrIn6};
use ospfd_utils::capabilities;
use ospfd_utils::socket::Socket;
#[cfg(not(feature = "testing"))]
use ospfd_utils::socket::SocketExt;

use crate::interface::Interface;
use crate::network::{MulticastAddr, NetworkVersion, OSPF_IP_PROTO};
#[cfg(not(feature = "testing"))]
use crate::ospfv3::packet::PacketHdr;
use crate::packet::error::DecodeResult;
use crate::version::Ospfv3;

// OSPFv3 multicast addresses (RFC 5340 appendix A.2.1).
static ALL_SPF_RTRS: Ipv6Addr = Ipv6Addr::new(0xff02, 0, 0, 0, 0, 0, 0, 5);
static ALL_DR_RTRS: Ipv6Addr = Ipv6Addr::new(0xff02, 0, 0, 0, 0, 0, 0, 6);

// ===== impl Ospfv3 =====

impl NetworkVersion<Self> for Ospfv3 {
    type NetIpAddr = Ipv6Addr;
    type NetIpNetwork = Ipv6Network;
    type SocketAddr = SockaddrIn6;
    type Pktinfo = libc::in6_pktinfo;

    fn socket(iface: &Interface<Self>) -> Result<Socket, std::io::Error> {
        #[cfg(not(feature = "testing"))]
        {
            use socket2::{Domain, Protocol, Type};

            let socket = capabilities::raise(|| {
                Socket::new(
                    Domain::IPV6,
                    Type::RAW,
                    Some(Protocol::from(OSPF_IP_PROTO)),
                )
            })?;

            socket.set_nonblocking(true)?;
            socket.bind_device(Some(iface.name.as_bytes()))?;
            socket.set_multicast_loop_v6(false)?;
            socket.set_multicast_hops_v6(1)?;
            socket.set_ipv6_pktinfo(true)?;
            socket.set_ipv6_tclass(libc::IPTOS_PREC_INTERNETCONTROL)?;

            Ok(socket)
        }
        #[cfg(feature = "testing")]
        {
            let _ = iface;
            Ok(Socket {})
        }
    }

    fn set_cksum_offloading(
        socket: &Socket,
        enable: bool,
    ) -> Result<(), std::io::Error> {
        #[cfg(not(feature = "testing"))]
        {
            // The kernel computes and verifies the checksum using the IPv6
            // pseudo-header.
            let offset = if enable { PacketHdr::CHECKSUM_OFFSET } else { -1 };
            socket.set_ipv6_checksum(offset)
        }
        #[cfg(feature = "testing")]
        {
            let _ = (socket, enable);
            Ok(())
        }
    }

    fn multicast_addr(addr: MulticastAddr) -> &'static Ipv6Addr {
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
            let addr = Self::multicast_addr(addr);
            let socket = socket2::SockRef::from(socket);
            socket.join_multicast_v6(addr, ifindex)
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
            let addr = Self::multicast_addr(addr);
            let socket = socket2::SockRef::from(socket);
            socket.leave_multicast_v6(addr, ifindex)
        }
        #[cfg(feature = "testing")]
        {
            let _ = (socket, addr, ifindex);
            Ok(())
        }
    }

    fn new_pktinfo(src: Ipv6Addr, ifindex: u32) -> libc::in6_pktinfo {
        libc::in6_pktinfo {
            ipi6_ifindex: ifindex,
            ipi6_addr: libc::in6_addr {
                s6_addr: src.octets(),
            },
        }
    }

    fn set_cmsg_data(
        pktinfo: &libc::in6_pktinfo,
    ) -> socket::ControlMessage<'_> {
        socket::ControlMessage::Ipv6PacketInfo(pktinfo)
    }

    fn get_cmsg_data(mut cmsgs: socket::CmsgIterator<'_>) -> Option<Ipv6Addr> {
        cmsgs.find_map(|cmsg| match cmsg {
            socket::ControlMessageOwned::Ipv6PacketInfo(pktinfo) => {
                Some(Ipv6Addr::from(pktinfo.ipi6_addr.s6_addr))
            }
            _ => None,
        })
    }

    fn dst_to_sockaddr(ifindex: u32, addr: Ipv6Addr) -> SockaddrIn6 {
        std::net::SocketAddrV6::new(addr, 0, 0, ifindex).into()
    }

    fn src_from_sockaddr(sockaddr: &SockaddrIn6) -> Ipv6Addr {
        sockaddr.ip()
    }

    fn validate_ip_hdr(_buf: &mut Bytes) -> DecodeResult<()> {
        // Raw IPv6 sockets deliver only the payload.
        Ok(())
    }
}
