//
// Copyright (c) The Ospfd Project Contributors
//
// SPDX-License-Identifier: MIT
//

use std::cell::RefCell;
use std::net::{Ipv4Addr, Ipv6Addr};

use bytes::{Buf, BufMut, Bytes, BytesMut, TryGetError};

thread_local!(
    // Scratch buffer shared by all packet and LSA encoders on this thread.
    pub static TLS_BUF: RefCell<BytesMut> =
        RefCell::new(BytesMut::with_capacity(65536))
);

// Extension methods for Bytes.
pub trait BytesExt {
    /// Gets an unsigned 24 bit integer from `self` in big-endian byte order,
    /// advancing the position by 3.
    ///
    /// Returns `Err(TryGetError)` when there are not enough remaining bytes
    /// to read the value.
    fn try_get_u24(&mut self) -> Result<u32, TryGetError>;

    /// Gets an IPv4 address from `self`, advancing the position by 4.
    ///
    /// Returns `Err(TryGetError)` when there are not enough remaining bytes
    /// to read the value.
    fn try_get_ipv4(&mut self) -> Result<Ipv4Addr, TryGetError>;

    /// Gets an IPv4 address from `self`, mapping the unspecified address to
    /// `None`.
    fn try_get_opt_ipv4(&mut self) -> Result<Option<Ipv4Addr>, TryGetError>;

    /// Gets an IPv6 address from `self`, advancing the position by 16.
    fn try_get_ipv6(&mut self) -> Result<Ipv6Addr, TryGetError>;

    /// Gets an IPv6 address from `self`, mapping the unspecified address to
    /// `None`.
    fn try_get_opt_ipv6(&mut self) -> Result<Option<Ipv6Addr>, TryGetError>;
}

// Extension methods for BytesMut.
pub trait BytesMutExt {
    /// Writes an unsigned 24 bit integer to `self` in big-endian byte order.
    fn put_u24(&mut self, n: u32);

    /// Writes an IPv4 address to `self` in big-endian byte order.
    fn put_ipv4(&mut self, addr: &Ipv4Addr);

    /// Writes an IPv6 address to `self` in big-endian byte order.
    fn put_ipv6(&mut self, addr: &Ipv6Addr);
}

// ===== impl Bytes =====

impl BytesExt for Bytes {
    fn try_get_u24(&mut self) -> Result<u32, TryGetError> {
        let mut n = [0; 4];
        self.try_copy_to_slice(&mut n[1..=3])?;
        Ok(u32::from_be_bytes(n))
    }

    fn try_get_ipv4(&mut self) -> Result<Ipv4Addr, TryGetError> {
        let bytes = self.try_get_u32()?;
        Ok(Ipv4Addr::from(bytes))
    }

    fn try_get_opt_ipv4(&mut self) -> Result<Option<Ipv4Addr>, TryGetError> {
        let addr = self.try_get_ipv4()?;
        Ok((!addr.is_unspecified()).then_some(addr))
    }

    fn try_get_ipv6(&mut self) -> Result<Ipv6Addr, TryGetError> {
        let bytes = self.try_get_u128()?;
        Ok(Ipv6Addr::from(bytes))
    }

    fn try_get_opt_ipv6(&mut self) -> Result<Option<Ipv6Addr>, TryGetError> {
        let addr = self.try_get_ipv6()?;
        Ok((!addr.is_unspecified()).then_some(addr))
    }
}

// ===== impl BytesMut =====

impl BytesMutExt for BytesMut {
    fn put_u24(&mut self, n: u32) {
        let n = n.to_be_bytes();
        self.put_slice(&n[1..=3]);
    }

    fn put_ipv4(&mut self, addr: &Ipv4Addr) {
        self.put_u32((*addr).into())
    }

    fn put_ipv6(&mut self, addr: &Ipv6Addr) {
        self.put_slice(&addr.octets())
    }
}
