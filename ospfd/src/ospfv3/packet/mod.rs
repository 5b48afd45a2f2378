//
// Copyright (c) The Ospfd Project Contributors
//
// SPDX-License-Identifier: MIT
//

pub mod lsa;

use std::collections::BTreeSet;
use std::net::Ipv4Addr;

use bitflags::bitflags;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use num_traits::FromPrimitive;
use ospfd_utils::bytes::{BytesExt, BytesMutExt};
use ospfd_utils::ip::{AddressFamily, Ipv4AddrExt};
use serde::{Deserialize, Serialize};

use crate::neighbor::NeighborNetId;
use crate::ospfv3::packet::lsa::{LsaHdr, LsaType};
use crate::packet::auth::{AuthDecodeCtx, AuthEncodeCtx};
use crate::packet::error::{DecodeError, DecodeResult};
use crate::packet::lsa::{Lsa, LsaHdrVersion, LsaKey};
use crate::packet::{
    DbDescFlags, DbDescVersion, HelloVersion, LsAckVersion, LsRequestVersion,
    LsUpdateVersion, OptionsVersion, Packet, PacketBase, PacketHdrVersion,
    PacketType, PacketVersion, decode_lsa_hdr_list, decode_router_id_list,
    encode_packet,
};
use crate::version::Ospfv3;

// Sizes of the fixed parts of the OSPFv3 wire formats, header excluded.
const HELLO_FIXED_LEN: usize = 20;
const DBDESC_FIXED_LEN: usize = 12;
const LSREQ_ENTRY_LEN: usize = 12;

// OSPFv3 Options field.
//
// IANA registry:
// https://www.iana.org/assignments/ospfv3-parameters/ospfv3-parameters.xhtml#ospfv3-parameters-1
bitflags! {
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    #[derive(Deserialize, Serialize)]
    #[serde(transparent)]
    pub struct Options: u16 {
        const V6 = 0x0001;
        const E = 0x0002;
        const N = 0x0008;
        const R = 0x0010;
        const DC = 0x0020;
    }
}

// OSPFv3 packet header. Sixteen bytes on the wire:
//
//   version (1) | type (1) | packet length (2)
//   router ID (4)
//   area ID (4)
//   checksum (2) | instance ID (1) | reserved (1)
//
// Length and checksum never escape the codec; the checksum itself is the
// upper-layer checksum the IPv6 stack computes and verifies via the
// IPV6_CHECKSUM socket option.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct PacketHdr {
    pub pkt_type: PacketType,
    pub router_id: Ipv4Addr,
    pub area_id: Ipv4Addr,
    pub instance_id: u8,
}

// The OSPFv3 header has no authentication field. IPsec or the RFC 7166
// trailer would provide authentication externally; neither is supported,
// so there is nothing to carry.
#[derive(Debug)]
pub struct PacketHdrAuth;

// OSPFv3 Hello. Fixed part:
//
//   interface ID (4)
//   router priority (1) | options (3)
//   hello interval (2) | router dead interval (2)
//   designated router ID (4)
//   backup designated router ID (4)
//
// followed by the router IDs of all recently seen neighbors.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct Hello {
    pub hdr: PacketHdr,
    pub iface_id: u32,
    pub priority: u8,
    pub options: Options,
    pub hello_interval: u16,
    pub dead_interval: u16,
    pub dr: Option<NeighborNetId>,
    pub bdr: Option<NeighborNetId>,
    pub neighbors: BTreeSet<Ipv4Addr>,
}

// OSPFv3 Database Description. Fixed part:
//
//   reserved (1) | options (3)
//   interface MTU (2) | reserved (1) | flags (1)
//   DD sequence number (4)
//
// followed by a run of LSA headers.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct DbDesc {
    pub hdr: PacketHdr,
    pub options: Options,
    pub mtu: u16,
    pub dd_flags: DbDescFlags,
    pub dd_seq_no: u32,
    pub lsa_hdrs: Vec<LsaHdr>,
}

// OSPFv3 Link State Request: a run of twelve-byte entries, each naming one
// LSA by type, link state ID and advertising router.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct LsRequest {
    pub hdr: PacketHdr,
    pub entries: Vec<LsaKey<LsaType>>,
}

// OSPFv3 Link State Update: an LSA count followed by that many full LSAs.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct LsUpdate {
    pub hdr: PacketHdr,
    pub lsas: Vec<Lsa<Ospfv3>>,
}

// OSPFv3 Link State Acknowledgment: a run of LSA headers.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct LsAck {
    pub hdr: PacketHdr,
    pub lsa_hdrs: Vec<LsaHdr>,
}

// ===== impl Options =====

impl Options {
    // The wire Options field is 24-bit; all assigned bits live in the low
    // sixteen.
    pub(crate) fn decode(buf: &mut Bytes) -> DecodeResult<Self> {
        let _ = buf.try_get_u8()?;
        Ok(Options::from_bits_truncate(buf.try_get_u16()?))
    }

    pub(crate) fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(0);
        buf.put_u16(self.bits());
    }
}

impl OptionsVersion<Ospfv3> for Options {
    fn e_bit(&self) -> bool {
        self.contains(Options::E)
    }

    fn n_bit(&self) -> bool {
        self.contains(Options::N)
    }
}

// ===== impl PacketHdr =====

impl PacketHdr {
    pub const VERSION: u8 = 3;
    // Checksum position handed to IPV6_CHECKSUM.
    pub const CHECKSUM_OFFSET: i32 = 12;
}

impl PacketHdrVersion<Ospfv3> for PacketHdr {
    const LENGTH: u16 = 16;

    fn decode(buf: &mut Bytes) -> DecodeResult<(Self, u16, PacketHdrAuth)> {
        let version = buf.try_get_u8()?;
        if version != Self::VERSION {
            return Err(DecodeError::InvalidVersion(version));
        }

        let pkt_type = buf.try_get_u8()?;
        let pkt_type = PacketType::from_u8(pkt_type)
            .ok_or(DecodeError::UnknownPacketType(pkt_type))?;

        // A declared length that cannot even hold the header is garbage.
        let pkt_len = buf.try_get_u16()?;
        if pkt_len < Self::LENGTH {
            return Err(DecodeError::InvalidLength(pkt_len));
        }

        let router_id = buf.try_get_ipv4()?;
        if !router_id.is_usable() {
            return Err(DecodeError::InvalidRouterId(router_id));
        }
        let area_id = buf.try_get_ipv4()?;

        // Already verified by the IPv6 stack.
        let _ = buf.try_get_u16()?;

        let instance_id = buf.try_get_u8()?;
        let _ = buf.try_get_u8()?;

        let hdr = PacketHdr {
            pkt_type,
            router_id,
            area_id,
            instance_id,
        };
        Ok((hdr, pkt_len, PacketHdrAuth))
    }

    fn encode(&self, buf: &mut BytesMut, _auth: Option<AuthEncodeCtx<'_>>) {
        buf.put_u8(Self::VERSION);
        buf.put_u8(self.pkt_type as u8);
        // Length is patched once the body is in place; the checksum slot
        // stays zero for the IPv6 stack to fill.
        buf.put_u16(0);
        buf.put_ipv4(&self.router_id);
        buf.put_ipv4(&self.area_id);
        buf.put_u16(0);
        buf.put_u8(self.instance_id);
        buf.put_u8(0);
    }

    fn update_cksum(_buf: &mut BytesMut) {
        // Left to the IPV6_CHECKSUM socket option.
    }

    fn pkt_type(&self) -> PacketType {
        self.pkt_type
    }

    fn router_id(&self) -> Ipv4Addr {
        self.router_id
    }

    fn area_id(&self) -> Ipv4Addr {
        self.area_id
    }

    fn auth_seqno(&self) -> Option<u64> {
        None
    }

    fn set_auth_seqno(&mut self, _seqno: u64) {}

    fn generate(
        pkt_type: PacketType,
        router_id: Ipv4Addr,
        area_id: Ipv4Addr,
        instance_id: u8,
    ) -> Self {
        PacketHdr {
            pkt_type,
            router_id,
            area_id,
            instance_id,
        }
    }
}

// ===== impl Hello =====

impl PacketBase<Ospfv3> for Hello {
    fn decode(
        _af: AddressFamily,
        hdr: PacketHdr,
        buf: &mut Bytes,
    ) -> DecodeResult<Self> {
        if buf.remaining() < HELLO_FIXED_LEN {
            return Err(DecodeError::InvalidLength(buf.len() as u16));
        }

        let iface_id = buf.try_get_u32()?;
        let priority = buf.try_get_u8()?;
        let options = Options::decode(buf)?;
        let hello_interval = buf.try_get_u16()?;
        let dead_interval = buf.try_get_u16()?;
        let dr = buf.try_get_opt_ipv4()?.map(NeighborNetId::from);
        let bdr = buf.try_get_opt_ipv4()?.map(NeighborNetId::from);
        let neighbors = decode_router_id_list(buf)?;

        Ok(Hello {
            hdr,
            iface_id,
            priority,
            options,
            hello_interval,
            dead_interval,
            dr,
            bdr,
            neighbors,
        })
    }

    fn encode(&self, auth: Option<AuthEncodeCtx<'_>>) -> Bytes {
        encode_packet::<Ospfv3>(&self.hdr, auth, |buf| {
            buf.put_u32(self.iface_id);
            buf.put_u8(self.priority);
            self.options.encode(buf);
            buf.put_u16(self.hello_interval);
            buf.put_u16(self.dead_interval);
            buf.put_ipv4(&net_id_or_zero(self.dr));
            buf.put_ipv4(&net_id_or_zero(self.bdr));
            for nbr in &self.neighbors {
                buf.put_ipv4(nbr);
            }
        })
    }

    fn hdr(&self) -> &PacketHdr {
        &self.hdr
    }
}

impl HelloVersion<Ospfv3> for Hello {
    fn iface_id(&self) -> Option<u32> {
        Some(self.iface_id)
    }

    fn hello_interval(&self) -> u16 {
        self.hello_interval
    }

    fn dead_interval(&self) -> u32 {
        self.dead_interval.into()
    }

    fn options(&self) -> Options {
        self.options
    }

    fn priority(&self) -> u8 {
        self.priority
    }

    fn dr(&self) -> Option<NeighborNetId> {
        self.dr
    }

    fn bdr(&self) -> Option<NeighborNetId> {
        self.bdr
    }

    fn neighbors(&self) -> &BTreeSet<Ipv4Addr> {
        &self.neighbors
    }
}

// ===== impl DbDesc =====

impl PacketBase<Ospfv3> for DbDesc {
    fn decode(
        _af: AddressFamily,
        hdr: PacketHdr,
        buf: &mut Bytes,
    ) -> DecodeResult<Self> {
        if buf.remaining() < DBDESC_FIXED_LEN {
            return Err(DecodeError::InvalidLength(buf.len() as u16));
        }

        let options = Options::decode(buf)?;
        let mtu = buf.try_get_u16()?;
        let _ = buf.try_get_u8()?;
        let dd_flags = DbDescFlags::from_bits_truncate(buf.try_get_u8()?);
        let dd_seq_no = buf.try_get_u32()?;
        let lsa_hdrs = decode_lsa_hdr_list::<Ospfv3>(buf)?;

        Ok(DbDesc {
            hdr,
            options,
            mtu,
            dd_flags,
            dd_seq_no,
            lsa_hdrs,
        })
    }

    fn encode(&self, auth: Option<AuthEncodeCtx<'_>>) -> Bytes {
        encode_packet::<Ospfv3>(&self.hdr, auth, |buf| {
            self.options.encode(buf);
            buf.put_u16(self.mtu);
            buf.put_u8(0);
            buf.put_u8(self.dd_flags.bits());
            buf.put_u32(self.dd_seq_no);
            for lsa_hdr in &self.lsa_hdrs {
                lsa_hdr.encode(buf);
            }
        })
    }

    fn hdr(&self) -> &PacketHdr {
        &self.hdr
    }
}

impl DbDescVersion<Ospfv3> for DbDesc {
    const BASE_LENGTH: u16 = DBDESC_FIXED_LEN as u16;

    fn mtu(&self) -> u16 {
        self.mtu
    }

    fn options(&self) -> Options {
        self.options
    }

    fn dd_flags(&self) -> DbDescFlags {
        self.dd_flags
    }

    fn dd_seq_no(&self) -> u32 {
        self.dd_seq_no
    }

    fn lsa_hdrs(&self) -> &[LsaHdr] {
        &self.lsa_hdrs
    }

    fn generate(
        hdr: PacketHdr,
        options: Options,
        mtu: u16,
        dd_flags: DbDescFlags,
        dd_seq_no: u32,
        lsa_hdrs: Vec<LsaHdr>,
    ) -> Packet<Ospfv3> {
        Packet::DbDesc(DbDesc {
            hdr,
            options,
            mtu,
            dd_flags,
            dd_seq_no,
            lsa_hdrs,
        })
    }
}

// ===== impl LsRequest =====

impl PacketBase<Ospfv3> for LsRequest {
    fn decode(
        _af: AddressFamily,
        hdr: PacketHdr,
        buf: &mut Bytes,
    ) -> DecodeResult<Self> {
        let mut entries = vec![];
        while buf.remaining() >= LSREQ_ENTRY_LEN {
            let _ = buf.try_get_u16()?;
            let lsa_type = LsaType(buf.try_get_u16()?);
            let lsa_id = buf.try_get_ipv4()?;
            let adv_rtr = buf.try_get_ipv4()?;
            entries.push(LsaKey::new(lsa_type, adv_rtr, lsa_id));
        }

        Ok(LsRequest { hdr, entries })
    }

    fn encode(&self, auth: Option<AuthEncodeCtx<'_>>) -> Bytes {
        encode_packet::<Ospfv3>(&self.hdr, auth, |buf| {
            for entry in &self.entries {
                buf.put_u16(0);
                buf.put_u16(entry.lsa_type.0);
                buf.put_ipv4(&entry.lsa_id);
                buf.put_ipv4(&entry.adv_rtr);
            }
        })
    }

    fn hdr(&self) -> &PacketHdr {
        &self.hdr
    }
}

impl LsRequestVersion<Ospfv3> for LsRequest {
    const ENTRY_LENGTH: u16 = LSREQ_ENTRY_LEN as u16;

    fn entries(&self) -> &[LsaKey<LsaType>] {
        &self.entries
    }

    fn generate(
        hdr: PacketHdr,
        entries: Vec<LsaKey<LsaType>>,
    ) -> Packet<Ospfv3> {
        Packet::LsRequest(LsRequest { hdr, entries })
    }
}

// ===== impl LsUpdate =====

impl PacketBase<Ospfv3> for LsUpdate {
    fn decode(
        af: AddressFamily,
        hdr: PacketHdr,
        buf: &mut Bytes,
    ) -> DecodeResult<Self> {
        let count = buf.try_get_u32()?;

        // An LSA that fails to parse is dropped on its own; the rest of the
        // packet is still usable.
        let mut lsas = vec![];
        for _ in 0..count {
            match Lsa::decode(af, buf) {
                Ok(lsa) => lsas.push(lsa),
                Err(error) => error.log(),
            }
        }

        Ok(LsUpdate { hdr, lsas })
    }

    fn encode(&self, auth: Option<AuthEncodeCtx<'_>>) -> Bytes {
        encode_packet::<Ospfv3>(&self.hdr, auth, |buf| {
            buf.put_u32(self.lsas.len() as u32);
            for lsa in &self.lsas {
                buf.put_slice(&lsa.raw);
            }
        })
    }

    fn hdr(&self) -> &PacketHdr {
        &self.hdr
    }
}

impl LsUpdateVersion<Ospfv3> for LsUpdate {
    const BASE_LENGTH: u16 = 4;

    fn into_lsas(self) -> std::vec::IntoIter<Lsa<Ospfv3>> {
        self.lsas.into_iter()
    }

    fn generate(hdr: PacketHdr, lsas: Vec<Lsa<Ospfv3>>) -> Packet<Ospfv3> {
        Packet::LsUpdate(LsUpdate { hdr, lsas })
    }
}

// ===== impl LsAck =====

impl PacketBase<Ospfv3> for LsAck {
    fn decode(
        _af: AddressFamily,
        hdr: PacketHdr,
        buf: &mut Bytes,
    ) -> DecodeResult<Self> {
        let lsa_hdrs = decode_lsa_hdr_list::<Ospfv3>(buf)?;
        Ok(LsAck { hdr, lsa_hdrs })
    }

    fn encode(&self, auth: Option<AuthEncodeCtx<'_>>) -> Bytes {
        encode_packet::<Ospfv3>(&self.hdr, auth, |buf| {
            for lsa_hdr in &self.lsa_hdrs {
                lsa_hdr.encode(buf);
            }
        })
    }

    fn hdr(&self) -> &PacketHdr {
        &self.hdr
    }
}

impl LsAckVersion<Ospfv3> for LsAck {
    fn lsa_hdrs(&self) -> &[LsaHdr] {
        &self.lsa_hdrs
    }

    fn generate(hdr: PacketHdr, lsa_hdrs: Vec<LsaHdr>) -> Packet<Ospfv3> {
        Packet::LsAck(LsAck { hdr, lsa_hdrs })
    }
}

// ===== impl Ospfv3 =====

impl PacketVersion<Self> for Ospfv3 {
    type PacketOptions = Options;
    type PacketHdr = PacketHdr;
    type PacketHdrAuth = PacketHdrAuth;
    type PacketHello = Hello;
    type PacketDbDesc = DbDesc;
    type PacketLsRequest = LsRequest;
    type PacketLsUpdate = LsUpdate;
    type PacketLsAck = LsAck;

    fn verify_cksum(
        _data: &[u8],
        _pkt_len: u16,
        _hdr_auth: &PacketHdrAuth,
    ) -> DecodeResult<()> {
        // Verified by the IPv6 stack before delivery.
        Ok(())
    }

    fn decode_auth_validate(
        _data: &[u8],
        _pkt_len: u16,
        _hdr_auth: &PacketHdrAuth,
        auth: Option<&AuthDecodeCtx<'_>>,
    ) -> DecodeResult<Option<u64>> {
        // Packet-level authentication is an OSPFv2 concern; the
        // configuration layer never attaches a context here.
        if auth.is_some() {
            return Err(DecodeError::AuthTypeMismatch);
        }

        Ok(None)
    }

    fn encode_auth_trailer(_buf: &mut BytesMut, _auth: AuthEncodeCtx<'_>) {
        unreachable!()
    }
}

// ===== helper functions =====

fn net_id_or_zero(net_id: Option<NeighborNetId>) -> Ipv4Addr {
    net_id.map(|id| id.get()).unwrap_or(Ipv4Addr::UNSPECIFIED)
}
