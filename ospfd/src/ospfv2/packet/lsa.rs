//
// Copyright (c) The Ospfd Project Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeSet;
use std::net::Ipv4Addr;

use bitflags::bitflags;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use derive_new::new;
use enum_as_inner::EnumAsInner;
use num_derive::FromPrimitive;
use num_traits::FromPrimitive;
use ospfd_utils::bytes::{BytesExt, BytesMutExt};
use ospfd_utils::ip::AddressFamily;
use serde::{Deserialize, Serialize};

use crate::ospfv2::packet::Options;
use crate::packet::decode_router_id_list;
use crate::packet::error::{DecodeError, DecodeResult, LsaValidationError};
#[cfg(feature = "testing")]
use crate::packet::lsa::serde_lsa_age_filter;
use crate::packet::lsa::{
    LsaBodyVersion, LsaHdrVersion, LsaRouterFlagsVersion, LsaScope,
    LsaTypeVersion, LsaVersion, PrefixOptionsVersion,
};
use crate::version::Ospfv2;

// OSPFv2 keeps prefix attributes in the LSA bodies themselves; the
// per-prefix options of OSPFv3 have no counterpart here.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct PrefixOptions {}

// OSPFv2 LSA type, an eight-bit code.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub struct LsaType(pub u8);

// The type codes this implementation interprets.
//
// IANA registry:
// https://www.iana.org/assignments/ospfv2-parameters/ospfv2-parameters.xhtml#ospfv2-parameters-5
#[derive(Clone, Copy, Debug, Eq, Ord, FromPrimitive, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub enum LsaTypeCode {
    Router = 1,
    Network = 2,
    SummaryNetwork = 3,
    SummaryRouter = 4,
    AsExternal = 5,
    NssaAsExternal = 7,
}

// Decoded OSPFv2 LSA body. Type-7 shares the AS-External body layout
// (RFC 3101); the variants are kept apart because their flooding scopes
// differ.
#[derive(Clone, Debug, EnumAsInner, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum LsaBody {
    Router(LsaRouter),
    Network(LsaNetwork),
    SummaryNetwork(LsaSummary),
    SummaryRouter(LsaSummary),
    AsExternal(LsaAsExternal),
    NssaAsExternal(LsaAsExternal),
    Unknown(LsaUnknown),
}

// OSPFv2 LSA header. Twenty bytes on the wire:
//
//   age (2) | options (1) | type (1)
//   link state ID (4)
//   advertising router (4)
//   sequence number (4)
//   checksum (2) | length (2)
//
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct LsaHdr {
    #[cfg_attr(
        feature = "testing",
        serde(default, skip_serializing_if = "serde_lsa_age_filter")
    )]
    pub age: u16,
    pub options: Options,
    pub lsa_type: LsaType,
    pub lsa_id: Ipv4Addr,
    pub adv_rtr: Ipv4Addr,
    #[cfg_attr(feature = "testing", serde(skip_serializing))]
    pub seq_no: u32,
    #[cfg_attr(feature = "testing", serde(default, skip_serializing))]
    pub cksum: u16,
    pub length: u16,
}

// Router-LSA: router capability flags followed by one record per link,
// each twelve bytes (plus deprecated TOS metrics, which are skipped).
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct LsaRouter {
    pub flags: LsaRouterFlags,
    pub links: Vec<LsaRouterLink>,
}

// Router capability bits.
//
// IANA registry:
// https://www.iana.org/assignments/ospfv2-parameters/ospfv2-parameters.xhtml#ospfv2-parameters-11
bitflags! {
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    #[derive(Deserialize, Serialize)]
    #[serde(transparent)]
    pub struct LsaRouterFlags: u8 {
        const B = 0x01;
        const E = 0x02;
        const V = 0x04;
        const NT = 0x10;
    }
}

// Router link kinds (RFC 2328 A.4.2). The meaning of the ID and data
// fields depends on the kind.
#[derive(Clone, Copy, Debug, Eq, FromPrimitive, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum LsaRouterLinkType {
    PointToPoint = 1,
    TransitNetwork = 2,
    StubNetwork = 3,
    VirtualLink = 4,
}

#[derive(Clone, Debug, Eq, PartialEq, new)]
#[derive(Deserialize, Serialize)]
pub struct LsaRouterLink {
    pub link_type: LsaRouterLinkType,
    pub link_id: Ipv4Addr,
    pub link_data: Ipv4Addr,
    pub metric: u16,
}

// Network-LSA: the network mask and the routers on the segment.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct LsaNetwork {
    pub mask: Ipv4Addr,
    pub attached_rtrs: BTreeSet<Ipv4Addr>,
}

// Summary-LSA body, shared by types 3 and 4: a mask and a 24-bit metric.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct LsaSummary {
    pub mask: Ipv4Addr,
    pub metric: u32,
}

// AS-External-LSA (and Type-7) body:
//
//   network mask (4)
//   E-flag (1 bit) | metric (24 bits)
//   forwarding address (4)
//   external route tag (4)
//
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct LsaAsExternal {
    pub mask: Ipv4Addr,
    pub flags: LsaAsExternalFlags,
    pub metric: u32,
    pub fwd_addr: Option<Ipv4Addr>,
    pub tag: u32,
}

bitflags! {
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    #[derive(Deserialize, Serialize)]
    #[serde(transparent)]
    pub struct LsaAsExternalFlags: u8 {
        const E = 0x80;
    }
}

// Placeholder for type codes outside the known set. OSPFv2 encodes no
// flooding scope in the type, so such LSAs cannot be forwarded and the
// body is not retained.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct LsaUnknown {}

// ===== impl PrefixOptions =====

impl PrefixOptionsVersion for PrefixOptions {}

// ===== impl LsaType =====

impl LsaType {
    pub(crate) fn type_code(&self) -> Option<LsaTypeCode> {
        LsaTypeCode::from_u8(self.0)
    }
}

impl LsaTypeVersion for LsaType {
    fn scope(&self) -> LsaScope {
        use LsaTypeCode::*;
        match self.type_code() {
            Some(AsExternal) => LsaScope::As,
            Some(
                Router | Network | SummaryNetwork | SummaryRouter
                | NssaAsExternal,
            ) => LsaScope::Area,
            None => LsaScope::Unknown,
        }
    }
}

impl std::fmt::Display for LsaType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl From<LsaTypeCode> for LsaType {
    fn from(code: LsaTypeCode) -> LsaType {
        LsaType(code as u8)
    }
}

impl From<LsaType> for u16 {
    fn from(lsa_type: LsaType) -> u16 {
        lsa_type.0.into()
    }
}

// ===== impl LsaHdr =====

impl LsaHdrVersion<Ospfv2> for LsaHdr {
    const LENGTH: u16 = 20;

    fn new(
        age: u16,
        options: Option<Options>,
        lsa_type: LsaType,
        lsa_id: Ipv4Addr,
        adv_rtr: Ipv4Addr,
        seq_no: u32,
    ) -> Self {
        LsaHdr {
            age,
            options: options.unwrap(),
            lsa_type,
            lsa_id,
            adv_rtr,
            seq_no,
            cksum: 0,
            length: 0,
        }
    }

    fn decode(buf: &mut Bytes) -> DecodeResult<Self> {
        Ok(LsaHdr {
            age: buf.try_get_u16()?,
            options: Options::from_bits_truncate(buf.try_get_u8()?),
            lsa_type: LsaType(buf.try_get_u8()?),
            lsa_id: buf.try_get_ipv4()?,
            adv_rtr: buf.try_get_ipv4()?,
            seq_no: buf.try_get_u32()?,
            cksum: buf.try_get_u16()?,
            length: buf.try_get_u16()?,
        })
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u16(self.age);
        buf.put_u8(self.options.bits());
        buf.put_u8(self.lsa_type.0);
        buf.put_ipv4(&self.lsa_id);
        buf.put_ipv4(&self.adv_rtr);
        buf.put_u32(self.seq_no);
        buf.put_u16(self.cksum);
        buf.put_u16(self.length);
    }

    fn lsa_type(&self) -> LsaType {
        self.lsa_type
    }

    fn lsa_id(&self) -> Ipv4Addr {
        self.lsa_id
    }

    fn adv_rtr(&self) -> Ipv4Addr {
        self.adv_rtr
    }

    fn seq_no(&self) -> u32 {
        self.seq_no
    }

    fn age(&self) -> u16 {
        self.age
    }

    fn set_age(&mut self, age: u16) {
        self.age = age;
    }

    fn cksum(&self) -> u16 {
        self.cksum
    }

    fn set_cksum(&mut self, cksum: u16) {
        self.cksum = cksum;
    }

    fn length(&self) -> u16 {
        self.length
    }

    fn set_length(&mut self, length: u16) {
        self.length = length;
    }

    fn options(&self) -> Option<Options> {
        Some(self.options)
    }
}

// ===== impl LsaBody =====

impl LsaBody {
    // The external body, whether it arrived as Type-5 or Type-7.
    pub(crate) fn as_external(&self) -> Option<&LsaAsExternal> {
        match self {
            LsaBody::AsExternal(body) | LsaBody::NssaAsExternal(body) => {
                Some(body)
            }
            _ => None,
        }
    }
}

impl LsaBodyVersion<Ospfv2> for LsaBody {
    fn decode(
        _af: AddressFamily,
        lsa_type: LsaType,
        _lsa_id: Ipv4Addr,
        buf: &mut Bytes,
    ) -> DecodeResult<Self> {
        use LsaTypeCode::*;
        Ok(match lsa_type.type_code() {
            Some(Router) => LsaBody::Router(LsaRouter::decode(buf)?),
            Some(Network) => LsaBody::Network(LsaNetwork::decode(buf)?),
            Some(SummaryNetwork) => {
                LsaBody::SummaryNetwork(LsaSummary::decode(buf)?)
            }
            Some(SummaryRouter) => {
                LsaBody::SummaryRouter(LsaSummary::decode(buf)?)
            }
            Some(AsExternal) => {
                LsaBody::AsExternal(LsaAsExternal::decode(buf)?)
            }
            Some(NssaAsExternal) => {
                LsaBody::NssaAsExternal(LsaAsExternal::decode(buf)?)
            }
            None => LsaBody::Unknown(LsaUnknown {}),
        })
    }

    fn encode(&self, buf: &mut BytesMut) {
        match self {
            LsaBody::Router(body) => body.encode(buf),
            LsaBody::Network(body) => body.encode(buf),
            LsaBody::SummaryNetwork(body) | LsaBody::SummaryRouter(body) => {
                body.encode(buf)
            }
            LsaBody::AsExternal(body) | LsaBody::NssaAsExternal(body) => {
                body.encode(buf)
            }
            LsaBody::Unknown(_) => {
                // Unknown OSPFv2 LSAs are never originated or reflooded.
                #[cfg(not(feature = "testing"))]
                unreachable!()
            }
        }
    }

    fn lsa_type(&self) -> LsaType {
        use LsaTypeCode::*;
        let code = match self {
            LsaBody::Router(_) => Router,
            LsaBody::Network(_) => Network,
            LsaBody::SummaryNetwork(_) => SummaryNetwork,
            LsaBody::SummaryRouter(_) => SummaryRouter,
            LsaBody::AsExternal(_) => AsExternal,
            LsaBody::NssaAsExternal(_) => NssaAsExternal,
            LsaBody::Unknown(_) => unreachable!(),
        };
        code.into()
    }

    fn is_unknown(&self) -> bool {
        matches!(self, LsaBody::Unknown(_))
    }

    fn validate(&self, hdr: &LsaHdr) -> Result<(), LsaValidationError> {
        // The only body-level constraint RFC 2328 imposes: a Router-LSA's
        // Link State ID is its advertising router.
        if matches!(self, LsaBody::Router(_)) && hdr.lsa_id != hdr.adv_rtr {
            return Err(LsaValidationError::Ospfv2RouterLsaIdMismatch);
        }

        Ok(())
    }
}

// ===== impl LsaRouter =====

impl LsaRouter {
    fn decode(buf: &mut Bytes) -> DecodeResult<Self> {
        let flags = LsaRouterFlags::from_bits_truncate(buf.try_get_u8()?);
        let _ = buf.try_get_u8()?;
        let count = buf.try_get_u16()?;

        let links = (0..count)
            .map(|_| decode_router_link(buf))
            .collect::<DecodeResult<_>>()?;

        Ok(LsaRouter { flags, links })
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.flags.bits());
        buf.put_u8(0);
        buf.put_u16(self.links.len() as u16);
        for link in &self.links {
            buf.put_ipv4(&link.link_id);
            buf.put_ipv4(&link.link_data);
            buf.put_u8(link.link_type as u8);
            // No TOS metrics are produced.
            buf.put_u8(0);
            buf.put_u16(link.metric);
        }
    }
}

// ===== impl LsaRouterFlags =====

impl LsaRouterFlagsVersion for LsaRouterFlags {
    fn is_abr(&self) -> bool {
        self.contains(LsaRouterFlags::B)
    }

    fn is_asbr(&self) -> bool {
        self.contains(LsaRouterFlags::E)
    }
}

// ===== impl LsaNetwork =====

impl LsaNetwork {
    fn decode(buf: &mut Bytes) -> DecodeResult<Self> {
        let mask = buf.try_get_ipv4()?;
        let attached_rtrs = decode_router_id_list(buf)?;

        Ok(LsaNetwork {
            mask,
            attached_rtrs,
        })
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_ipv4(&self.mask);
        for rtr in &self.attached_rtrs {
            buf.put_ipv4(rtr);
        }
    }
}

// ===== impl LsaSummary =====

impl LsaSummary {
    fn decode(buf: &mut Bytes) -> DecodeResult<Self> {
        let mask = buf.try_get_ipv4()?;
        let _ = buf.try_get_u8()?;
        let metric = buf.try_get_u24()?;
        // Any trailing TOS metrics are obsolete and ignored.

        Ok(LsaSummary { mask, metric })
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_ipv4(&self.mask);
        buf.put_u8(0);
        buf.put_u24(self.metric);
    }
}

// ===== impl LsaAsExternal =====

impl LsaAsExternal {
    fn decode(buf: &mut Bytes) -> DecodeResult<Self> {
        let mask = buf.try_get_ipv4()?;
        let flags = LsaAsExternalFlags::from_bits_truncate(buf.try_get_u8()?);
        let metric = buf.try_get_u24()?;
        let fwd_addr = buf.try_get_opt_ipv4()?;
        let tag = buf.try_get_u32()?;
        // Any trailing TOS records are obsolete and ignored.

        Ok(LsaAsExternal {
            mask,
            flags,
            metric,
            fwd_addr,
            tag,
        })
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_ipv4(&self.mask);
        buf.put_u8(self.flags.bits());
        buf.put_u24(self.metric);
        buf.put_ipv4(&self.fwd_addr.unwrap_or(Ipv4Addr::UNSPECIFIED));
        buf.put_u32(self.tag);
    }
}

// ===== impl Ospfv2 =====

impl LsaVersion<Self> for Ospfv2 {
    type LsaType = LsaType;
    type LsaHdr = LsaHdr;
    type LsaBody = LsaBody;
    type LsaRouterFlags = LsaRouterFlags;
    type LsaRouterLink = LsaRouterLink;
    type PrefixOptions = PrefixOptions;

    fn inter_area_network_type() -> LsaType {
        LsaTypeCode::SummaryNetwork.into()
    }

    fn inter_area_router_type() -> LsaType {
        LsaTypeCode::SummaryRouter.into()
    }
}

// ===== helper functions =====

fn decode_router_link(buf: &mut Bytes) -> DecodeResult<LsaRouterLink> {
    let link_id = buf.try_get_ipv4()?;
    let link_data = buf.try_get_ipv4()?;
    let link_type = buf.try_get_u8()?;
    let link_type = LsaRouterLinkType::from_u8(link_type)
        .ok_or(DecodeError::UnknownRouterLinkType(link_type))?;
    let tos_count = buf.try_get_u8()?;
    let metric = buf.try_get_u16()?;

    // Skip the deprecated per-TOS metrics.
    for _ in 0..tos_count {
        let _ = buf.try_get_u32()?;
    }

    Ok(LsaRouterLink::new(link_type, link_id, link_data, metric))
}
