//
// Copyright (c) The Ospfd Project Contributors
//
// SPDX-License-Identifier: MIT
//

pub mod auth;
pub mod error;
pub mod fletcher;
pub mod lsa;

use std::collections::BTreeSet;
use std::net::Ipv4Addr;

use bitflags::bitflags;
use bytes::{Buf, Bytes, BytesMut};
use num_derive::FromPrimitive;
use ospfd_utils::bytes::{BytesExt, TLS_BUF};
use ospfd_utils::ip::AddressFamily;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::neighbor::NeighborNetId;
use crate::packet::auth::{AuthDecodeCtx, AuthEncodeCtx};
use crate::packet::error::{DecodeError, DecodeResult};
use crate::packet::lsa::{Lsa, LsaHdrVersion, LsaKey};
use crate::version::Version;

// Flags of Database Description packets.
bitflags! {
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    #[derive(Deserialize, Serialize)]
    #[serde(transparent)]
    pub struct DbDescFlags: u8 {
        // Master/slave.
        const MS = 0x01;
        // More packets follow.
        const M = 0x02;
        // Initial packet of a sequence.
        const I = 0x04;
    }
}

// The five OSPF packet types, common to both protocol versions.
//
// IANA registry:
// https://www.iana.org/assignments/ospfv2-parameters/ospfv2-parameters.xhtml#ospfv2-parameters-3
#[derive(Clone, Copy, Debug, Eq, Hash, FromPrimitive, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum PacketType {
    Hello = 1,
    DbDesc = 2,
    LsRequest = 3,
    LsUpdate = 4,
    LsAck = 5,
}

// A decoded OSPF packet of either protocol version.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum Packet<V: Version> {
    Hello(V::PacketHello),
    DbDesc(V::PacketDbDesc),
    LsRequest(V::PacketLsRequest),
    LsUpdate(V::PacketLsUpdate),
    LsAck(V::PacketLsAck),
}

// Version-specific packet formats and integrity handling.
pub trait PacketVersion<V: Version> {
    type PacketOptions: OptionsVersion<V>;
    type PacketHdr: PacketHdrVersion<V>;
    type PacketHdrAuth;
    type PacketHello: HelloVersion<V>;
    type PacketDbDesc: DbDescVersion<V>;
    type PacketLsRequest: LsRequestVersion<V>;
    type PacketLsUpdate: LsUpdateVersion<V>;
    type PacketLsAck: LsAckVersion<V>;

    // Checksum verification over the declared packet length. Bytes past it
    // (authentication trailers, padding) are never covered. OSPFv3 leaves
    // this to the IPv6 pseudo-header checksum; OSPFv2 skips it when a
    // cryptographic digest takes the checksum's place.
    fn verify_cksum(
        data: &[u8],
        pkt_len: u16,
        hdr_auth: &V::PacketHdrAuth,
    ) -> DecodeResult<()>;

    // Authenticates a received packet against the configured method. On
    // success with cryptographic authentication, yields the received
    // sequence number for replay tracking.
    fn decode_auth_validate(
        data: &[u8],
        pkt_len: u16,
        hdr_auth: &V::PacketHdrAuth,
        auth: Option<&AuthDecodeCtx<'_>>,
    ) -> DecodeResult<Option<u64>>;

    // Completes the authentication of an outgoing packet: fills in the
    // simple password or appends the message digest.
    fn encode_auth_trailer(buf: &mut BytesMut, auth: AuthEncodeCtx<'_>);
}

// Version-specific packet header.
pub trait PacketHdrVersion<V: Version>
where
    Self: Sized,
{
    const LENGTH: u16;

    // Parses the fixed header, returning it together with the declared
    // packet length and whatever authentication data the header carries.
    fn decode(buf: &mut Bytes) -> DecodeResult<(Self, u16, V::PacketHdrAuth)>;

    fn encode(&self, buf: &mut BytesMut, auth: Option<AuthEncodeCtx<'_>>);

    // Computes and patches the checksum of a fully encoded packet.
    fn update_cksum(buf: &mut BytesMut);

    fn pkt_type(&self) -> PacketType;

    fn router_id(&self) -> Ipv4Addr;

    fn area_id(&self) -> Ipv4Addr;

    fn auth_seqno(&self) -> Option<u64>;

    fn set_auth_seqno(&mut self, seqno: u64);

    fn generate(
        pkt_type: PacketType,
        router_id: Ipv4Addr,
        area_id: Ipv4Addr,
        instance_id: u8,
    ) -> Self;
}

// Operations shared by all packet bodies.
pub trait PacketBase<V: Version>
where
    Self: Send + Sync + Clone + std::fmt::Debug + Serialize + DeserializeOwned,
{
    fn decode(
        af: AddressFamily,
        hdr: V::PacketHdr,
        buf: &mut Bytes,
    ) -> DecodeResult<Self>;

    fn encode(&self, auth: Option<AuthEncodeCtx<'_>>) -> Bytes;

    fn hdr(&self) -> &V::PacketHdr;

    fn router_id(&self) -> Ipv4Addr {
        self.hdr().router_id()
    }
}

// Version-specific Options field.
pub trait OptionsVersion<V: Version>
where
    Self: Send
        + Sync
        + Clone
        + Copy
        + std::fmt::Debug
        + Eq
        + PartialEq
        + Serialize
        + DeserializeOwned,
{
    // External routing capability.
    fn e_bit(&self) -> bool;

    // NSSA capability.
    fn n_bit(&self) -> bool;
}

pub trait HelloVersion<V: Version>
where
    Self: PacketBase<V>,
{
    // Interface ID of the sender (OSPFv3 only).
    fn iface_id(&self) -> Option<u32>;

    fn hello_interval(&self) -> u16;

    fn dead_interval(&self) -> u32;

    fn options(&self) -> V::PacketOptions;

    fn priority(&self) -> u8;

    fn dr(&self) -> Option<NeighborNetId>;

    fn bdr(&self) -> Option<NeighborNetId>;

    fn neighbors(&self) -> &BTreeSet<Ipv4Addr>;
}

pub trait DbDescVersion<V: Version>
where
    Self: PacketBase<V>,
{
    const BASE_LENGTH: u16;

    fn mtu(&self) -> u16;

    fn options(&self) -> V::PacketOptions;

    fn dd_flags(&self) -> DbDescFlags;

    fn dd_seq_no(&self) -> u32;

    fn lsa_hdrs(&self) -> &[V::LsaHdr];

    fn generate(
        hdr: V::PacketHdr,
        options: V::PacketOptions,
        mtu: u16,
        dd_flags: DbDescFlags,
        dd_seq_no: u32,
        lsa_hdrs: Vec<V::LsaHdr>,
    ) -> Packet<V>;
}

pub trait LsRequestVersion<V: Version>
where
    Self: PacketBase<V>,
{
    const ENTRY_LENGTH: u16;

    fn entries(&self) -> &[LsaKey<V::LsaType>];

    fn generate(
        hdr: V::PacketHdr,
        entries: Vec<LsaKey<V::LsaType>>,
    ) -> Packet<V>;
}

pub trait LsUpdateVersion<V: Version>
where
    Self: PacketBase<V>,
{
    const BASE_LENGTH: u16;

    // Consumes the packet, yielding its LSAs in wire order.
    fn into_lsas(self) -> std::vec::IntoIter<Lsa<V>>;

    fn generate(hdr: V::PacketHdr, lsas: Vec<Lsa<V>>) -> Packet<V>;
}

pub trait LsAckVersion<V: Version>
where
    Self: PacketBase<V>,
{
    fn lsa_hdrs(&self) -> &[V::LsaHdr];

    fn generate(hdr: V::PacketHdr, lsa_hdrs: Vec<V::LsaHdr>) -> Packet<V>;
}

// ===== impl Packet =====

impl<V> Packet<V>
where
    V: Version,
{
    // Parses and authenticates one packet.
    //
    // The declared packet length governs everything: a buffer shorter than
    // it is rejected, while bytes beyond it (authentication trailers, or
    // anything else) are simply not part of the packet.
    pub fn decode(
        af: AddressFamily,
        buf: &mut Bytes,
        auth: Option<AuthDecodeCtx<'_>>,
    ) -> DecodeResult<Self> {
        let data = buf.clone();

        if data.len() < V::PacketHdr::LENGTH as usize {
            return Err(DecodeError::IncompletePacket);
        }
        let (mut hdr, pkt_len, hdr_auth) = V::PacketHdr::decode(buf)?;
        if data.len() < pkt_len as usize {
            return Err(DecodeError::IncompletePacket);
        }

        V::verify_cksum(data.as_ref(), pkt_len, &hdr_auth)?;

        if let Some(seqno) = V::decode_auth_validate(
            data.as_ref(),
            pkt_len,
            &hdr_auth,
            auth.as_ref(),
        )? {
            hdr.set_auth_seqno(seqno);
        }

        // Hand the body (and nothing else) to the per-type parser.
        let mut body =
            data.slice(V::PacketHdr::LENGTH as usize..pkt_len as usize);
        Ok(match hdr.pkt_type() {
            PacketType::Hello => {
                Packet::Hello(V::PacketHello::decode(af, hdr, &mut body)?)
            }
            PacketType::DbDesc => {
                Packet::DbDesc(V::PacketDbDesc::decode(af, hdr, &mut body)?)
            }
            PacketType::LsRequest => Packet::LsRequest(
                V::PacketLsRequest::decode(af, hdr, &mut body)?,
            ),
            PacketType::LsUpdate => {
                Packet::LsUpdate(V::PacketLsUpdate::decode(af, hdr, &mut body)?)
            }
            PacketType::LsAck => {
                Packet::LsAck(V::PacketLsAck::decode(af, hdr, &mut body)?)
            }
        })
    }

    pub fn encode(&self, auth: Option<AuthEncodeCtx<'_>>) -> Bytes {
        match self {
            Packet::Hello(pkt) => pkt.encode(auth),
            Packet::DbDesc(pkt) => pkt.encode(auth),
            Packet::LsRequest(pkt) => pkt.encode(auth),
            Packet::LsUpdate(pkt) => pkt.encode(auth),
            Packet::LsAck(pkt) => pkt.encode(auth),
        }
    }

    pub(crate) fn hdr(&self) -> &V::PacketHdr {
        match self {
            Packet::Hello(pkt) => pkt.hdr(),
            Packet::DbDesc(pkt) => pkt.hdr(),
            Packet::LsRequest(pkt) => pkt.hdr(),
            Packet::LsUpdate(pkt) => pkt.hdr(),
            Packet::LsAck(pkt) => pkt.hdr(),
        }
    }
}

// ===== global functions =====

// Runs a packet encoder: the header goes in first, the closure appends the
// body, and the length plus checksum (or authentication trailer) are
// patched over the finished buffer. All encoders share one thread-local
// scratch buffer.
pub(crate) fn encode_packet<V>(
    hdr: &V::PacketHdr,
    auth: Option<AuthEncodeCtx<'_>>,
    body: impl FnOnce(&mut BytesMut),
) -> Bytes
where
    V: Version,
{
    TLS_BUF.with(|buf| {
        let mut buf = buf.borrow_mut();
        buf.clear();

        hdr.encode(&mut buf, auth);
        body(&mut buf);

        let pkt_len = buf.len() as u16;
        buf[2..4].copy_from_slice(&pkt_len.to_be_bytes());
        match auth {
            Some(auth) => V::encode_auth_trailer(&mut buf, auth),
            None => V::PacketHdr::update_cksum(&mut buf),
        }

        buf.clone().freeze()
    })
}

// Parses the run of LSA headers filling the remainder of a packet body.
// A trailing fragment shorter than one header is ignored.
pub(crate) fn decode_lsa_hdr_list<V>(
    buf: &mut Bytes,
) -> DecodeResult<Vec<V::LsaHdr>>
where
    V: Version,
{
    let mut hdrs = vec![];
    while buf.remaining() >= V::LsaHdr::LENGTH as usize {
        hdrs.push(V::LsaHdr::decode(buf)?);
    }
    Ok(hdrs)
}

// Parses the run of router IDs filling the remainder of a packet body.
pub(crate) fn decode_router_id_list(
    buf: &mut Bytes,
) -> DecodeResult<BTreeSet<Ipv4Addr>> {
    let mut ids = BTreeSet::new();
    while buf.remaining() >= 4 {
        ids.insert(buf.try_get_ipv4()?);
    }
    Ok(ids)
}
