//
// Copyright (c) The Ospfd Project Contributors
//
// SPDX-License-Identifier: MIT
//

#[cfg(not(feature = "testing"))]
use std::os::raw::c_int;
#[cfg(not(feature = "testing"))]
use std::os::unix::io::AsRawFd;

// Normal build: re-export standard socket types.
#[cfg(not(feature = "testing"))]
pub use {socket2::Socket, tokio::io::unix::AsyncFd};

// Test build: export mock sockets.
#[cfg(feature = "testing")]
pub use crate::socket::mock::{AsyncFd, Socket};

// Useful type definition.
#[cfg(not(feature = "testing"))]
type Result<T> = std::io::Result<T>;

// The IPv4 Router Alert option (RFC 2113), as carried in IP_OPTIONS.
#[cfg(not(feature = "testing"))]
const IPV4_RTR_ALERT_OPT: [u8; 4] = [0x94, 0x04, 0x00, 0x00];

// Extension methods for raw IP sockets.
#[cfg(not(feature = "testing"))]
pub trait SocketExt: Sized + AsRawFd {
    // Sets the value of the IP_PKTINFO option for this socket.
    fn set_ipv4_pktinfo(&self, value: bool) -> Result<()> {
        let optval = value as c_int;

        setsockopt(
            self,
            libc::IPPROTO_IP,
            libc::IP_PKTINFO,
            &optval as *const _ as *const libc::c_void,
            std::mem::size_of::<i32>() as libc::socklen_t,
        )
    }

    // Enables or disables the IPv4 Router Alert option on outgoing packets.
    fn set_ipv4_router_alert(&self, enable: bool) -> Result<()> {
        let (optval, optlen) = if enable {
            (
                IPV4_RTR_ALERT_OPT.as_ptr() as *const libc::c_void,
                IPV4_RTR_ALERT_OPT.len() as libc::socklen_t,
            )
        } else {
            (std::ptr::null(), 0)
        };

        setsockopt(self, libc::IPPROTO_IP, libc::IP_OPTIONS, optval, optlen)
    }

    // Sets the value of the IPV6_RECVPKTINFO option for this socket.
    fn set_ipv6_pktinfo(&self, value: bool) -> Result<()> {
        let optval = value as c_int;

        setsockopt(
            self,
            libc::IPPROTO_IPV6,
            libc::IPV6_RECVPKTINFO,
            &optval as *const _ as *const libc::c_void,
            std::mem::size_of::<i32>() as libc::socklen_t,
        )
    }

    // Offloads checksum computation of outgoing packets to the kernel, which
    // also verifies the checksum of incoming packets. `offset` is the
    // position of the checksum field within the protocol header, or -1 to
    // disable the offloading.
    fn set_ipv6_checksum(&self, offset: i32) -> Result<()> {
        let optval = offset as c_int;

        setsockopt(
            self,
            libc::IPPROTO_IPV6,
            libc::IPV6_CHECKSUM,
            &optval as *const _ as *const libc::c_void,
            std::mem::size_of::<i32>() as libc::socklen_t,
        )
    }

    // Sets the value of the IPV6_TCLASS option for this socket.
    fn set_ipv6_tclass(&self, tclass: u8) -> Result<()> {
        let optval = tclass as c_int;

        setsockopt(
            self,
            libc::IPPROTO_IPV6,
            libc::IPV6_TCLASS,
            &optval as *const _ as *const libc::c_void,
            std::mem::size_of::<i32>() as libc::socklen_t,
        )
    }
}

#[cfg(not(feature = "testing"))]
impl SocketExt for Socket {}

// ===== helper functions =====

#[cfg(not(feature = "testing"))]
fn setsockopt<F: AsRawFd>(
    sock: &F,
    level: c_int,
    optname: c_int,
    optval: *const libc::c_void,
    optlen: libc::socklen_t,
) -> Result<()> {
    let ret = unsafe {
        libc::setsockopt(sock.as_raw_fd(), level, optname, optval, optlen)
    };
    if ret == -1 {
        return Err(std::io::Error::last_os_error());
    }

    Ok(())
}

// ===== mock sockets =====

#[cfg(feature = "testing")]
pub mod mock {
    #[derive(Debug, Default)]
    pub struct Socket {}

    #[derive(Debug)]
    pub struct AsyncFd<T>(T);

    impl<T> AsyncFd<T> {
        pub fn new(inner: T) -> std::io::Result<AsyncFd<T>> {
            Ok(AsyncFd(inner))
        }

        pub fn get_ref(&self) -> &T {
            &self.0
        }
    }
}
