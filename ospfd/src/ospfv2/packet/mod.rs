//
// Copyright (c) The Ospfd Project Contributors
//
// SPDX-License-Identifier: MIT
//

pub mod lsa;

use std::collections::BTreeSet;
use std::net::Ipv4Addr;
use std::sync::atomic;

use bitflags::bitflags;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use internet_checksum::Checksum;
use num_derive::FromPrimitive;
use num_traits::FromPrimitive;
use ospfd_utils::bytes::{BytesExt, BytesMutExt};
use ospfd_utils::ip::{AddressFamily, Ipv4AddrExt};
use serde::{Deserialize, Serialize};

use crate::neighbor::NeighborNetId;
use crate::ospfv2::packet::lsa::{LsaHdr, LsaType};
use crate::packet::auth::{
    self, AuthDecodeCtx, AuthEncodeCtx, AuthMethod, simple_pwd_pad,
};
use crate::packet::error::{DecodeError, DecodeResult};
use crate::packet::lsa::{Lsa, LsaHdrVersion, LsaKey};
use crate::packet::{
    DbDescFlags, DbDescVersion, HelloVersion, LsAckVersion, LsRequestVersion,
    LsUpdateVersion, OptionsVersion, Packet, PacketBase, PacketHdrVersion,
    PacketType, PacketVersion, decode_lsa_hdr_list, decode_router_id_list,
    encode_packet,
};
use crate::version::Ospfv2;

// Sizes of the fixed parts of the OSPFv2 wire formats, header excluded.
const HELLO_FIXED_LEN: usize = 20;
const DBDESC_FIXED_LEN: usize = 8;
const LSREQ_ENTRY_LEN: usize = 12;

// OSPFv2 Options field.
//
// IANA registry:
// https://www.iana.org/assignments/ospfv2-parameters/ospfv2-parameters.xhtml#ospfv2-parameters-1
bitflags! {
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    #[derive(Deserialize, Serialize)]
    #[serde(transparent)]
    pub struct Options: u8 {
        const E = 0x02;
        const MC = 0x04;
        const NP = 0x08;
        const DC = 0x20;
    }
}

// OSPFv2 authentication types (RFC 2328 appendix D.1).
#[derive(Clone, Copy, Debug, Eq, FromPrimitive, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum AuthType {
    Null = 0,
    Simple = 1,
    Cryptographic = 2,
}

// OSPFv2 packet header. Twenty-four bytes on the wire:
//
//   version (1) | type (1) | packet length (2)
//   router ID (4)
//   area ID (4)
//   checksum (2) | auth type (2)
//   authentication field (8)
//
// Only the fields the engine consumes after decoding are stored; length,
// checksum and the authentication field are handled while encoding and
// decoding and never escape the codec.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct PacketHdr {
    pub pkt_type: PacketType,
    pub router_id: Ipv4Addr,
    pub area_id: Ipv4Addr,
    // Sequence number recovered from the cryptographic trailer.
    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_seqno: Option<u64>,
}

// Contents of the 64-bit authentication field, interpreted per AuType.
#[derive(Debug)]
pub enum PacketHdrAuth {
    Null,
    Simple([u8; auth::SIMPLE_PWD_LENGTH]),
    Cryptographic {
        key_id: u8,
        auth_len: u8,
        seqno: u32,
    },
}

// OSPFv2 Hello. Fixed part:
//
//   network mask (4)
//   hello interval (2) | options (1) | router priority (1)
//   router dead interval (4)
//   designated router (4)
//   backup designated router (4)
//
// followed by the router IDs of all recently seen neighbors.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct Hello {
    pub hdr: PacketHdr,
    pub network_mask: Ipv4Addr,
    pub hello_interval: u16,
    pub options: Options,
    pub priority: u8,
    pub dead_interval: u32,
    pub dr: Option<NeighborNetId>,
    pub bdr: Option<NeighborNetId>,
    pub neighbors: BTreeSet<Ipv4Addr>,
}

// OSPFv2 Database Description. Fixed part:
//
//   interface MTU (2) | options (1) | flags (1)
//   DD sequence number (4)
//
// followed by a run of LSA headers.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct DbDesc {
    pub hdr: PacketHdr,
    pub mtu: u16,
    pub options: Options,
    pub dd_flags: DbDescFlags,
    pub dd_seq_no: u32,
    pub lsa_hdrs: Vec<LsaHdr>,
}

// OSPFv2 Link State Request: a run of twelve-byte entries, each naming one
// LSA by type, link state ID and advertising router.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct LsRequest {
    pub hdr: PacketHdr,
    pub entries: Vec<LsaKey<LsaType>>,
}

// OSPFv2 Link State Update: an LSA count followed by that many full LSAs.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct LsUpdate {
    pub hdr: PacketHdr,
    pub lsas: Vec<Lsa<Ospfv2>>,
}

// OSPFv2 Link State Acknowledgment: a run of LSA headers.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct LsAck {
    pub hdr: PacketHdr,
    pub lsa_hdrs: Vec<LsaHdr>,
}

// ===== impl Options =====

impl OptionsVersion<Ospfv2> for Options {
    fn e_bit(&self) -> bool {
        self.contains(Options::E)
    }

    fn n_bit(&self) -> bool {
        self.contains(Options::NP)
    }
}

// ===== impl PacketHdr =====

impl PacketHdr {
    pub const VERSION: u8 = 2;
    // Field positions needed to patch or skip over while checksumming.
    pub const CKSUM_RANGE: std::ops::Range<usize> = 12..14;
    pub const AUTH_RANGE: std::ops::Range<usize> = 16..24;

    // One's-complement sum over a finished packet, with the authentication
    // field excluded as RFC 2328 appendix D.4.1 requires.
    fn cksum_of(data: &[u8]) -> [u8; 2] {
        let mut cksum = Checksum::new();
        cksum.add_bytes(&data[..Self::AUTH_RANGE.start]);
        cksum.add_bytes(&data[Self::AUTH_RANGE.end..]);
        cksum.checksum()
    }
}

impl PacketHdrVersion<Ospfv2> for PacketHdr {
    const LENGTH: u16 = 24;

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

        // Checksum is verified separately, against the whole packet.
        let _ = buf.try_get_u16()?;

        // The meaning of the authentication field depends on AuType.
        let au_type = buf.try_get_u16()?;
        let hdr_auth = match AuthType::from_u16(au_type) {
            Some(AuthType::Null) => {
                buf.advance(auth::SIMPLE_PWD_LENGTH);
                PacketHdrAuth::Null
            }
            Some(AuthType::Simple) => {
                let mut password = [0; auth::SIMPLE_PWD_LENGTH];
                buf.try_copy_to_slice(&mut password)?;
                PacketHdrAuth::Simple(password)
            }
            Some(AuthType::Cryptographic) => {
                let _ = buf.try_get_u16()?;
                PacketHdrAuth::Cryptographic {
                    key_id: buf.try_get_u8()?,
                    auth_len: buf.try_get_u8()?,
                    seqno: buf.try_get_u32()?,
                }
            }
            None => return Err(DecodeError::UnsupportedAuthType(au_type)),
        };

        let hdr = PacketHdr {
            pkt_type,
            router_id,
            area_id,
            auth_seqno: None,
        };
        Ok((hdr, pkt_len, hdr_auth))
    }

    fn encode(&self, buf: &mut BytesMut, auth: Option<AuthEncodeCtx<'_>>) {
        buf.put_u8(Self::VERSION);
        buf.put_u8(self.pkt_type as u8);
        // Length and checksum are patched once the body is in place.
        buf.put_u16(0);
        buf.put_ipv4(&self.router_id);
        buf.put_ipv4(&self.area_id);
        buf.put_u16(0);
        match auth {
            None => {
                buf.put_u16(AuthType::Null as u16);
                buf.put_u64(0);
            }
            // The password is written once the checksum is computed.
            Some(AuthEncodeCtx::Simple(_)) => {
                buf.put_u16(AuthType::Simple as u16);
                buf.put_u64(0);
            }
            Some(AuthEncodeCtx::Cryptographic { key, seqno }) => {
                buf.put_u16(AuthType::Cryptographic as u16);
                buf.put_u16(0);
                buf.put_u8(key.id as u8);
                buf.put_u8(key.algo.digest_size());
                // RFC 5709 offers no provisions for sequence overflow.
                let seqno = seqno.fetch_add(1, atomic::Ordering::Relaxed);
                buf.put_u32(seqno as u32);
            }
        }
    }

    fn update_cksum(buf: &mut BytesMut) {
        let cksum = Self::cksum_of(buf);
        buf[Self::CKSUM_RANGE].copy_from_slice(&cksum);
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
        self.auth_seqno
    }

    fn set_auth_seqno(&mut self, seqno: u64) {
        self.auth_seqno = Some(seqno);
    }

    fn generate(
        pkt_type: PacketType,
        router_id: Ipv4Addr,
        area_id: Ipv4Addr,
        _instance_id: u8,
    ) -> Self {
        PacketHdr {
            pkt_type,
            router_id,
            area_id,
            auth_seqno: None,
        }
    }
}

// ===== impl Hello =====

impl PacketBase<Ospfv2> for Hello {
    fn decode(
        _af: AddressFamily,
        hdr: PacketHdr,
        buf: &mut Bytes,
    ) -> DecodeResult<Self> {
        if buf.remaining() < HELLO_FIXED_LEN {
            return Err(DecodeError::InvalidLength(buf.len() as u16));
        }

        let network_mask = buf.try_get_ipv4()?;
        let hello_interval = buf.try_get_u16()?;
        let options = Options::from_bits_truncate(buf.try_get_u8()?);
        let priority = buf.try_get_u8()?;
        let dead_interval = buf.try_get_u32()?;
        let dr = buf.try_get_opt_ipv4()?.map(NeighborNetId::from);
        let bdr = buf.try_get_opt_ipv4()?.map(NeighborNetId::from);
        let neighbors = decode_router_id_list(buf)?;

        Ok(Hello {
            hdr,
            network_mask,
            hello_interval,
            options,
            priority,
            dead_interval,
            dr,
            bdr,
            neighbors,
        })
    }

    fn encode(&self, auth: Option<AuthEncodeCtx<'_>>) -> Bytes {
        encode_packet::<Ospfv2>(&self.hdr, auth, |buf| {
            buf.put_ipv4(&self.network_mask);
            buf.put_u16(self.hello_interval);
            buf.put_u8(self.options.bits());
            buf.put_u8(self.priority);
            buf.put_u32(self.dead_interval);
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

impl HelloVersion<Ospfv2> for Hello {
    fn iface_id(&self) -> Option<u32> {
        None
    }

    fn hello_interval(&self) -> u16 {
        self.hello_interval
    }

    fn dead_interval(&self) -> u32 {
        self.dead_interval
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

impl PacketBase<Ospfv2> for DbDesc {
    fn decode(
        _af: AddressFamily,
        hdr: PacketHdr,
        buf: &mut Bytes,
    ) -> DecodeResult<Self> {
        if buf.remaining() < DBDESC_FIXED_LEN {
            return Err(DecodeError::InvalidLength(buf.len() as u16));
        }

        let mtu = buf.try_get_u16()?;
        let options = Options::from_bits_truncate(buf.try_get_u8()?);
        let dd_flags = DbDescFlags::from_bits_truncate(buf.try_get_u8()?);
        let dd_seq_no = buf.try_get_u32()?;
        let lsa_hdrs = decode_lsa_hdr_list::<Ospfv2>(buf)?;

        Ok(DbDesc {
            hdr,
            mtu,
            options,
            dd_flags,
            dd_seq_no,
            lsa_hdrs,
        })
    }

    fn encode(&self, auth: Option<AuthEncodeCtx<'_>>) -> Bytes {
        encode_packet::<Ospfv2>(&self.hdr, auth, |buf| {
            buf.put_u16(self.mtu);
            buf.put_u8(self.options.bits());
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

impl DbDescVersion<Ospfv2> for DbDesc {
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
    ) -> Packet<Ospfv2> {
        Packet::DbDesc(DbDesc {
            hdr,
            mtu,
            options,
            dd_flags,
            dd_seq_no,
            lsa_hdrs,
        })
    }
}

// ===== impl LsRequest =====

impl PacketBase<Ospfv2> for LsRequest {
    fn decode(
        _af: AddressFamily,
        hdr: PacketHdr,
        buf: &mut Bytes,
    ) -> DecodeResult<Self> {
        let mut entries = vec![];
        while buf.remaining() >= LSREQ_ENTRY_LEN {
            let lsa_type = LsaType(buf.try_get_u32()? as u8);
            let lsa_id = buf.try_get_ipv4()?;
            let adv_rtr = buf.try_get_ipv4()?;
            entries.push(LsaKey::new(lsa_type, adv_rtr, lsa_id));
        }

        Ok(LsRequest { hdr, entries })
    }

    fn encode(&self, auth: Option<AuthEncodeCtx<'_>>) -> Bytes {
        encode_packet::<Ospfv2>(&self.hdr, auth, |buf| {
            for entry in &self.entries {
                buf.put_u32(entry.lsa_type.0 as u32);
                buf.put_ipv4(&entry.lsa_id);
                buf.put_ipv4(&entry.adv_rtr);
            }
        })
    }

    fn hdr(&self) -> &PacketHdr {
        &self.hdr
    }
}

impl LsRequestVersion<Ospfv2> for LsRequest {
    const ENTRY_LENGTH: u16 = LSREQ_ENTRY_LEN as u16;

    fn entries(&self) -> &[LsaKey<LsaType>] {
        &self.entries
    }

    fn generate(
        hdr: PacketHdr,
        entries: Vec<LsaKey<LsaType>>,
    ) -> Packet<Ospfv2> {
        Packet::LsRequest(LsRequest { hdr, entries })
    }
}

// ===== impl LsUpdate =====

impl PacketBase<Ospfv2> for LsUpdate {
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
        encode_packet::<Ospfv2>(&self.hdr, auth, |buf| {
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

impl LsUpdateVersion<Ospfv2> for LsUpdate {
    const BASE_LENGTH: u16 = 4;

    fn into_lsas(self) -> std::vec::IntoIter<Lsa<Ospfv2>> {
        self.lsas.into_iter()
    }

    fn generate(hdr: PacketHdr, lsas: Vec<Lsa<Ospfv2>>) -> Packet<Ospfv2> {
        Packet::LsUpdate(LsUpdate { hdr, lsas })
    }
}

// ===== impl LsAck =====

impl PacketBase<Ospfv2> for LsAck {
    fn decode(
        _af: AddressFamily,
        hdr: PacketHdr,
        buf: &mut Bytes,
    ) -> DecodeResult<Self> {
        let lsa_hdrs = decode_lsa_hdr_list::<Ospfv2>(buf)?;
        Ok(LsAck { hdr, lsa_hdrs })
    }

    fn encode(&self, auth: Option<AuthEncodeCtx<'_>>) -> Bytes {
        encode_packet::<Ospfv2>(&self.hdr, auth, |buf| {
            for lsa_hdr in &self.lsa_hdrs {
                lsa_hdr.encode(buf);
            }
        })
    }

    fn hdr(&self) -> &PacketHdr {
        &self.hdr
    }
}

impl LsAckVersion<Ospfv2> for LsAck {
    fn lsa_hdrs(&self) -> &[LsaHdr] {
        &self.lsa_hdrs
    }

    fn generate(hdr: PacketHdr, lsa_hdrs: Vec<LsaHdr>) -> Packet<Ospfv2> {
        Packet::LsAck(LsAck { hdr, lsa_hdrs })
    }
}

// ===== impl Ospfv2 =====

impl PacketVersion<Self> for Ospfv2 {
    type PacketOptions = Options;
    type PacketHdr = PacketHdr;
    type PacketHdrAuth = PacketHdrAuth;
    type PacketHello = Hello;
    type PacketDbDesc = DbDesc;
    type PacketLsRequest = LsRequest;
    type PacketLsUpdate = LsUpdate;
    type PacketLsAck = LsAck;

    fn verify_cksum(
        data: &[u8],
        pkt_len: u16,
        hdr_auth: &PacketHdrAuth,
    ) -> DecodeResult<()> {
        // With cryptographic authentication the checksum field rides as
        // zero; integrity comes from the digest instead.
        if let PacketHdrAuth::Cryptographic { .. } = hdr_auth {
            return Ok(());
        }

        match PacketHdr::cksum_of(&data[..pkt_len as usize]) {
            [0, 0] => Ok(()),
            _ => Err(DecodeError::InvalidChecksum),
        }
    }

    fn decode_auth_validate(
        data: &[u8],
        pkt_len: u16,
        hdr_auth: &PacketHdrAuth,
        auth: Option<&AuthDecodeCtx<'_>>,
    ) -> DecodeResult<Option<u64>> {
        let method = auth.map(|auth| auth.method);

        match hdr_auth {
            PacketHdrAuth::Null => match method {
                None => Ok(None),
                Some(_) => Err(DecodeError::AuthTypeMismatch),
            },
            PacketHdrAuth::Simple(received) => match method {
                Some(AuthMethod::SimplePassword(password)) => {
                    if simple_pwd_pad(password) != *received {
                        return Err(DecodeError::AuthError);
                    }
                    Ok(None)
                }
                _ => Err(DecodeError::AuthTypeMismatch),
            },
            PacketHdrAuth::Cryptographic {
                key_id,
                auth_len,
                seqno,
            } => {
                // Select the receive key matching the advertised Key ID.
                let key = match method {
                    Some(AuthMethod::ManualKey(key))
                        if key.id == *key_id as u64 =>
                    {
                        key
                    }
                    Some(AuthMethod::ManualKey(_)) => {
                        return Err(DecodeError::AuthKeyIdNotFound(
                            *key_id as u32,
                        ));
                    }
                    Some(AuthMethod::Keychain(keychain)) => keychain
                        .key_lookup_accept(*key_id as u64)
                        .ok_or(DecodeError::AuthKeyIdNotFound(
                            *key_id as u32,
                        ))?,
                    _ => return Err(DecodeError::AuthTypeMismatch),
                };
                if key.algo.digest_size() != *auth_len {
                    return Err(DecodeError::AuthLenError(*auth_len as u16));
                }

                // The digest trails the packet proper.
                let pkt_len = pkt_len as usize;
                let auth_len = *auth_len as usize;
                if data.len() < pkt_len + auth_len {
                    return Err(DecodeError::IncompletePacket);
                }
                let received = &data[pkt_len..pkt_len + auth_len];
                let expected = auth::message_digest(
                    &data[..pkt_len],
                    key.algo,
                    &key.string,
                );
                if received != expected {
                    return Err(DecodeError::AuthError);
                }

                Ok(Some((*seqno).into()))
            }
        }
    }

    fn encode_auth_trailer(buf: &mut BytesMut, auth: AuthEncodeCtx<'_>) {
        match auth {
            // The checksum is computed first, as if the authentication
            // field were zero, and the password inserted afterwards
            // (RFC 2328 appendix D.4.2).
            AuthEncodeCtx::Simple(password) => {
                PacketHdr::update_cksum(buf);
                buf[PacketHdr::AUTH_RANGE]
                    .copy_from_slice(&simple_pwd_pad(password));
            }
            AuthEncodeCtx::Cryptographic { key, .. } => {
                let digest =
                    auth::message_digest(buf, key.algo, &key.string);
                buf.put_slice(&digest);
            }
        }
    }
}

// ===== helper functions =====

fn net_id_or_zero(net_id: Option<NeighborNetId>) -> Ipv4Addr {
    net_id.map(|id| id.get()).unwrap_or(Ipv4Addr::UNSPECIFIED)
}
