//
// Copyright (c) The Ospfd Project Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeSet;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use bitflags::bitflags;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use derive_new::new;
use enum_as_inner::EnumAsInner;
use ipnetwork::IpNetwork;
use num_derive::FromPrimitive;
use num_traits::FromPrimitive;
use ospfd_utils::bytes::{BytesExt, BytesMutExt};
use ospfd_utils::ip::AddressFamily;
use serde::{Deserialize, Serialize};

use crate::ospfv3::packet::Options;
use crate::packet::decode_router_id_list;
use crate::packet::error::{DecodeError, DecodeResult, LsaValidationError};
#[cfg(feature = "testing")]
use crate::packet::lsa::serde_lsa_age_filter;
use crate::packet::lsa::{
    LsaBodyVersion, LsaHdrVersion, LsaRouterFlagsVersion, LsaScope,
    LsaTypeVersion, LsaVersion, PrefixOptionsVersion,
};
use crate::version::Ospfv3;

// Size of one Router-LSA link record.
const ROUTER_LINK_LEN: usize = 16;

// Per-prefix options.
//
// IANA registry:
// https://www.iana.org/assignments/ospfv3-parameters/ospfv3-parameters.xhtml#ospfv3-parameters-4
bitflags! {
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    #[derive(Deserialize, Serialize)]
    #[serde(transparent)]
    pub struct PrefixOptions: u8 {
        const NU = 0x01;
        const LA = 0x02;
        const P = 0x08;
        const DN = 0x10;
    }
}

// OSPFv3 LSA type: U-bit (bit 15), flooding scope (bits 14-13) and a
// 13-bit function code.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub struct LsaType(pub u16);

// Flooding scope bits of the LSA type.
#[derive(Clone, Copy, Debug, Eq, FromPrimitive, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub enum LsaScopeCode {
    Link = 0x0000,
    Area = 0x2000,
    As = 0x4000,
    Reserved = 0x6000,
}

// The function codes this implementation interprets.
//
// IANA registry:
// https://www.iana.org/assignments/ospfv3-parameters/ospfv3-parameters.xhtml#ospfv3-parameters-3
#[derive(Clone, Copy, Debug, Eq, FromPrimitive, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub enum LsaFunctionCode {
    Router = 1,
    Network = 2,
    InterAreaPrefix = 3,
    InterAreaRouter = 4,
    AsExternal = 5,
    NssaAsExternal = 7,
    Link = 8,
    IntraAreaPrefix = 9,
}

// OSPFv3 LSA header. Twenty bytes on the wire:
//
//   age (2) | type (2)
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
    pub lsa_type: LsaType,
    pub lsa_id: Ipv4Addr,
    pub adv_rtr: Ipv4Addr,
    #[cfg_attr(feature = "testing", serde(skip_serializing))]
    pub seq_no: u32,
    #[cfg_attr(feature = "testing", serde(default, skip_serializing))]
    pub cksum: u16,
    pub length: u16,
}

// Decoded OSPFv3 LSA body. Type-7 shares the AS-External body layout
// (RFC 3101); the variants are kept apart because their flooding scopes
// differ.
#[derive(Clone, Debug, EnumAsInner, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum LsaBody {
    Router(LsaRouter),
    Network(LsaNetwork),
    InterAreaPrefix(LsaInterAreaPrefix),
    InterAreaRouter(LsaInterAreaRouter),
    AsExternal(LsaAsExternal),
    NssaAsExternal(LsaAsExternal),
    Link(LsaLink),
    IntraAreaPrefix(LsaIntraAreaPrefix),
    Unknown(LsaUnknown),
}

// Router-LSA: capability flags and options, followed by one sixteen-byte
// record per link:
//
//   type (1) | reserved (1) | metric (2)
//   interface ID (4)
//   neighbor interface ID (4)
//   neighbor router ID (4)
//
// Addressing information moved out of this LSA in OSPFv3; prefixes travel
// in Link and Intra-Area-Prefix LSAs instead.
#[derive(Clone, Debug, Eq, new, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct LsaRouter {
    pub flags: LsaRouterFlags,
    pub options: Options,
    pub links: Vec<LsaRouterLink>,
}

// Router capability bits.
//
// IANA registry:
// https://www.iana.org/assignments/ospfv3-parameters/ospfv3-parameters.xhtml#ospfv3-parameters-7
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

// Router link kinds. Unlike OSPFv2 there is no stub kind; stub reachability
// is expressed through Intra-Area-Prefix LSAs.
//
// IANA registry:
// https://www.iana.org/assignments/ospfv3-parameters/ospfv3-parameters.xhtml#ospfv3-parameters-6
#[derive(Clone, Copy, Debug, Eq, FromPrimitive, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum LsaRouterLinkType {
    PointToPoint = 0x01,
    TransitNetwork = 0x02,
    VirtualLink = 0x04,
}

#[derive(Clone, Debug, Eq, PartialEq, new)]
#[derive(Deserialize, Serialize)]
pub struct LsaRouterLink {
    pub link_type: LsaRouterLinkType,
    pub metric: u16,
    pub iface_id: u32,
    pub nbr_iface_id: u32,
    pub nbr_router_id: Ipv4Addr,
}

// Network-LSA: the options and the routers on the segment.
#[derive(Clone, Debug, Eq, new, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct LsaNetwork {
    pub options: Options,
    pub attached_rtrs: BTreeSet<Ipv4Addr>,
}

// Inter-Area-Prefix LSA: a 24-bit metric and one prefix.
#[derive(Clone, Debug, Eq, new, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct LsaInterAreaPrefix {
    pub metric: u32,
    pub prefix_options: PrefixOptions,
    pub prefix: IpNetwork,
}

// Inter-Area-Router LSA: options, a 24-bit metric and the ASBR's ID.
#[derive(Clone, Debug, Eq, new, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct LsaInterAreaRouter {
    pub options: Options,
    pub metric: u32,
    pub router_id: Ipv4Addr,
}

// AS-External-LSA (and Type-7) body:
//
//   E/F/T flags (1) | metric (3)
//   prefix length (1) | prefix options (1) | referenced LS type (2)
//   address prefix (padded)
//   forwarding address (16, present with F)
//   external route tag (4, present with T)
//   referenced link state ID (4, present with nonzero referenced LS type)
//
#[derive(Clone, Debug, Eq, new, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct LsaAsExternal {
    pub flags: LsaAsExternalFlags,
    pub metric: u32,
    pub prefix_options: PrefixOptions,
    pub prefix: IpNetwork,
    pub fwd_addr: Option<IpAddr>,
    pub tag: Option<u32>,
    pub ref_lsa_type: Option<LsaType>,
    pub ref_lsa_id: Option<Ipv4Addr>,
}

bitflags! {
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    #[derive(Deserialize, Serialize)]
    #[serde(transparent)]
    pub struct LsaAsExternalFlags: u8 {
        const T = 0x01;
        const F = 0x02;
        const E = 0x04;
    }
}

// Link-LSA: the router's priority, options and link-local address for this
// link, plus the prefixes to associate with it. Never flooded beyond the
// link.
#[derive(Clone, Debug, Eq, new, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct LsaLink {
    pub priority: u8,
    pub options: Options,
    pub linklocal: Ipv6Addr,
    pub prefixes: Vec<LsaLinkPrefix>,
}

#[derive(Clone, Debug, Eq, new, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct LsaLinkPrefix {
    pub options: PrefixOptions,
    pub value: IpNetwork,
}

// Intra-Area-Prefix LSA: prefixes attached to the Router-LSA or
// Network-LSA named by the reference fields.
#[derive(Clone, Debug, Eq, new, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct LsaIntraAreaPrefix {
    pub ref_lsa_type: LsaType,
    pub ref_lsa_id: Ipv4Addr,
    pub ref_adv_rtr: Ipv4Addr,
    pub prefixes: Vec<LsaIntraAreaPrefixEntry>,
}

#[derive(Clone, Debug, Eq, new, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct LsaIntraAreaPrefixEntry {
    pub options: PrefixOptions,
    pub value: IpNetwork,
    pub metric: u16,
}

// Placeholder for unrecognized function codes. The body is not interpreted;
// the raw encoding in the enclosing `Lsa` is preserved verbatim so the LSA
// can still be flooded where the scope and U-bit allow.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct LsaUnknown {}

// ===== impl PrefixOptions =====

impl PrefixOptionsVersion for PrefixOptions {}

// ===== impl LsaType =====

impl LsaType {
    pub const U_BIT_MASK: u16 = 0x8000;
    pub const SCOPE_MASK: u16 = 0x6000;
    pub const FUNCTION_CODE_MASK: u16 = 0x1fff;

    // With the U-bit set, a router floods an unrecognized type as if it
    // understood it; clear, it treats the LSA as link-scoped.
    pub fn u_bit(&self) -> bool {
        self.0 & Self::U_BIT_MASK != 0
    }

    pub(crate) fn scope_code(&self) -> LsaScopeCode {
        LsaScopeCode::from_u16(self.0 & Self::SCOPE_MASK).unwrap()
    }

    pub(crate) fn function_code(&self) -> Option<LsaFunctionCode> {
        LsaFunctionCode::from_u16(self.0 & Self::FUNCTION_CODE_MASK)
    }
}

impl LsaTypeVersion for LsaType {
    fn scope(&self) -> LsaScope {
        match self.scope_code() {
            LsaScopeCode::Link => LsaScope::Link,
            LsaScopeCode::Area => LsaScope::Area,
            LsaScopeCode::As => LsaScope::As,
            LsaScopeCode::Reserved => LsaScope::Unknown,
        }
    }
}

impl std::fmt::Display for LsaType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{:04x}", self.0)
    }
}

impl From<LsaFunctionCode> for LsaType {
    fn from(code: LsaFunctionCode) -> LsaType {
        let scope = match code {
            LsaFunctionCode::Link => LsaScopeCode::Link,
            LsaFunctionCode::AsExternal => LsaScopeCode::As,
            _ => LsaScopeCode::Area,
        };
        LsaType(scope as u16 | code as u16)
    }
}

impl From<LsaType> for u16 {
    fn from(lsa_type: LsaType) -> u16 {
        lsa_type.0
    }
}

// ===== impl LsaHdr =====

impl LsaHdrVersion<Ospfv3> for LsaHdr {
    const LENGTH: u16 = 20;

    fn new(
        age: u16,
        _options: Option<Options>,
        lsa_type: LsaType,
        lsa_id: Ipv4Addr,
        adv_rtr: Ipv4Addr,
        seq_no: u32,
    ) -> Self {
        LsaHdr {
            age,
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
            lsa_type: LsaType(buf.try_get_u16()?),
            lsa_id: buf.try_get_ipv4()?,
            adv_rtr: buf.try_get_ipv4()?,
            seq_no: buf.try_get_u32()?,
            cksum: buf.try_get_u16()?,
            length: buf.try_get_u16()?,
        })
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u16(self.age);
        buf.put_u16(self.lsa_type.0);
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
        None
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

impl LsaBodyVersion<Ospfv3> for LsaBody {
    fn decode(
        af: AddressFamily,
        lsa_type: LsaType,
        _lsa_id: Ipv4Addr,
        buf: &mut Bytes,
    ) -> DecodeResult<Self> {
        use LsaFunctionCode::*;
        Ok(match lsa_type.function_code() {
            Some(Router) => LsaBody::Router(LsaRouter::decode(buf)?),
            Some(Network) => LsaBody::Network(LsaNetwork::decode(buf)?),
            Some(InterAreaPrefix) => {
                LsaBody::InterAreaPrefix(LsaInterAreaPrefix::decode(af, buf)?)
            }
            Some(InterAreaRouter) => {
                LsaBody::InterAreaRouter(LsaInterAreaRouter::decode(buf)?)
            }
            Some(AsExternal) => {
                LsaBody::AsExternal(LsaAsExternal::decode(af, buf)?)
            }
            Some(NssaAsExternal) => {
                LsaBody::NssaAsExternal(LsaAsExternal::decode(af, buf)?)
            }
            Some(Link) => LsaBody::Link(LsaLink::decode(af, buf)?),
            Some(IntraAreaPrefix) => {
                LsaBody::IntraAreaPrefix(LsaIntraAreaPrefix::decode(af, buf)?)
            }
            None => LsaBody::Unknown(LsaUnknown {}),
        })
    }

    fn encode(&self, buf: &mut BytesMut) {
        match self {
            LsaBody::Router(body) => body.encode(buf),
            LsaBody::Network(body) => body.encode(buf),
            LsaBody::InterAreaPrefix(body) => body.encode(buf),
            LsaBody::InterAreaRouter(body) => body.encode(buf),
            LsaBody::AsExternal(body) | LsaBody::NssaAsExternal(body) => {
                body.encode(buf)
            }
            LsaBody::Link(body) => body.encode(buf),
            LsaBody::IntraAreaPrefix(body) => body.encode(buf),
            LsaBody::Unknown(_) => {
                // Unknown LSAs are reflooded from their raw encoding, never
                // re-encoded from a decoded body.
                #[cfg(not(feature = "testing"))]
                unreachable!()
            }
        }
    }

    fn lsa_type(&self) -> LsaType {
        use LsaFunctionCode::*;
        let code = match self {
            LsaBody::Router(_) => Router,
            LsaBody::Network(_) => Network,
            LsaBody::InterAreaPrefix(_) => InterAreaPrefix,
            LsaBody::InterAreaRouter(_) => InterAreaRouter,
            LsaBody::AsExternal(_) => AsExternal,
            LsaBody::NssaAsExternal(_) => NssaAsExternal,
            LsaBody::Link(_) => Link,
            LsaBody::IntraAreaPrefix(_) => IntraAreaPrefix,
            LsaBody::Unknown(_) => unreachable!(),
        };
        code.into()
    }

    fn is_unknown(&self) -> bool {
        matches!(self, LsaBody::Unknown(_))
    }

    fn validate(&self, _hdr: &LsaHdr) -> Result<(), LsaValidationError> {
        Ok(())
    }
}

// ===== impl LsaRouter =====

impl LsaRouter {
    fn decode(buf: &mut Bytes) -> DecodeResult<Self> {
        let flags = LsaRouterFlags::from_bits_truncate(buf.try_get_u8()?);
        let options = Options::from_bits_truncate(buf.try_get_u16()?);

        let mut links = vec![];
        while buf.remaining() >= ROUTER_LINK_LEN {
            links.push(decode_router_link(buf)?);
        }

        Ok(LsaRouter {
            flags,
            options,
            links,
        })
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.flags.bits());
        buf.put_u16(self.options.bits());
        for link in &self.links {
            buf.put_u8(link.link_type as u8);
            buf.put_u8(0);
            buf.put_u16(link.metric);
            buf.put_u32(link.iface_id);
            buf.put_u32(link.nbr_iface_id);
            buf.put_ipv4(&link.nbr_router_id);
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
        let _ = buf.try_get_u8()?;
        let options = Options::from_bits_truncate(buf.try_get_u16()?);
        let attached_rtrs = decode_router_id_list(buf)?;

        Ok(LsaNetwork {
            options,
            attached_rtrs,
        })
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(0);
        buf.put_u16(self.options.bits());
        for rtr in &self.attached_rtrs {
            buf.put_ipv4(rtr);
        }
    }
}

// ===== impl LsaInterAreaPrefix =====

impl LsaInterAreaPrefix {
    fn decode(af: AddressFamily, buf: &mut Bytes) -> DecodeResult<Self> {
        let _ = buf.try_get_u8()?;
        let metric = buf.try_get_u24()?;
        let (prefix_options, _, prefix) = decode_prefix_entry(af, buf)?;

        Ok(LsaInterAreaPrefix {
            metric,
            prefix_options,
            prefix,
        })
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(0);
        buf.put_u24(self.metric);
        encode_prefix_entry(self.prefix_options, 0, &self.prefix, buf);
    }
}

// ===== impl LsaInterAreaRouter =====

impl LsaInterAreaRouter {
    fn decode(buf: &mut Bytes) -> DecodeResult<Self> {
        let _ = buf.try_get_u8()?;
        let options = Options::from_bits_truncate(buf.try_get_u16()?);
        let _ = buf.try_get_u8()?;
        let metric = buf.try_get_u24()?;
        let router_id = buf.try_get_ipv4()?;

        Ok(LsaInterAreaRouter {
            options,
            metric,
            router_id,
        })
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(0);
        buf.put_u16(self.options.bits());
        buf.put_u8(0);
        buf.put_u24(self.metric);
        buf.put_ipv4(&self.router_id);
    }
}

// ===== impl LsaAsExternal =====

impl LsaAsExternal {
    fn decode(af: AddressFamily, buf: &mut Bytes) -> DecodeResult<Self> {
        let flags = LsaAsExternalFlags::from_bits_truncate(buf.try_get_u8()?);
        let metric = buf.try_get_u24()?;
        let (prefix_options, ref_lsa_type, prefix) =
            decode_prefix_entry(af, buf)?;
        let ref_lsa_type = (ref_lsa_type != 0).then_some(LsaType(ref_lsa_type));

        // Three optional trailers, in this order.
        let fwd_addr = flags
            .contains(LsaAsExternalFlags::F)
            .then(|| decode_fwd_addr(af, buf))
            .transpose()?;
        let tag = flags
            .contains(LsaAsExternalFlags::T)
            .then(|| buf.try_get_u32())
            .transpose()?;
        let ref_lsa_id = ref_lsa_type
            .is_some()
            .then(|| buf.try_get_ipv4())
            .transpose()?;

        Ok(LsaAsExternal {
            flags,
            metric,
            prefix_options,
            prefix,
            fwd_addr,
            tag,
            ref_lsa_type,
            ref_lsa_id,
        })
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.flags.bits());
        buf.put_u24(self.metric);
        let ref_lsa_type = self.ref_lsa_type.map(|t| t.0).unwrap_or(0);
        encode_prefix_entry(self.prefix_options, ref_lsa_type, &self.prefix, buf);
        if let Some(fwd_addr) = &self.fwd_addr {
            match fwd_addr {
                IpAddr::V4(addr) => buf.put_ipv4(addr),
                IpAddr::V6(addr) => buf.put_ipv6(addr),
            }
        }
        if let Some(tag) = self.tag {
            buf.put_u32(tag);
        }
        if let Some(ref_lsa_id) = &self.ref_lsa_id {
            buf.put_ipv4(ref_lsa_id);
        }
    }
}

// ===== impl LsaLink =====

impl LsaLink {
    fn decode(af: AddressFamily, buf: &mut Bytes) -> DecodeResult<Self> {
        let priority = buf.try_get_u8()?;
        let options = Options::from_bits_truncate(buf.try_get_u24()? as u16);
        let linklocal = buf.try_get_ipv6()?;
        let count = buf.try_get_u32()?;

        let mut prefixes = vec![];
        for _ in 0..count {
            let (options, _, value) = decode_prefix_entry(af, buf)?;
            prefixes.push(LsaLinkPrefix::new(options, value));
        }

        Ok(LsaLink {
            priority,
            options,
            linklocal,
            prefixes,
        })
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.priority);
        buf.put_u24(self.options.bits() as u32);
        buf.put_ipv6(&self.linklocal);
        buf.put_u32(self.prefixes.len() as u32);
        for prefix in &self.prefixes {
            encode_prefix_entry(prefix.options, 0, &prefix.value, buf);
        }
    }
}

// ===== impl LsaIntraAreaPrefix =====

impl LsaIntraAreaPrefix {
    fn decode(af: AddressFamily, buf: &mut Bytes) -> DecodeResult<Self> {
        let count = buf.try_get_u16()?;
        let ref_lsa_type = LsaType(buf.try_get_u16()?);
        let ref_lsa_id = buf.try_get_ipv4()?;
        let ref_adv_rtr = buf.try_get_ipv4()?;

        let mut prefixes = vec![];
        for _ in 0..count {
            let (options, metric, value) = decode_prefix_entry(af, buf)?;
            prefixes.push(LsaIntraAreaPrefixEntry::new(options, value, metric));
        }

        Ok(LsaIntraAreaPrefix {
            ref_lsa_type,
            ref_lsa_id,
            ref_adv_rtr,
            prefixes,
        })
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u16(self.prefixes.len() as u16);
        buf.put_u16(self.ref_lsa_type.0);
        buf.put_ipv4(&self.ref_lsa_id);
        buf.put_ipv4(&self.ref_adv_rtr);
        for prefix in &self.prefixes {
            encode_prefix_entry(
                prefix.options,
                prefix.metric,
                &prefix.value,
                buf,
            );
        }
    }
}

// ===== impl Ospfv3 =====

impl LsaVersion<Self> for Ospfv3 {
    type LsaType = LsaType;
    type LsaHdr = LsaHdr;
    type LsaBody = LsaBody;
    type LsaRouterFlags = LsaRouterFlags;
    type LsaRouterLink = LsaRouterLink;
    type PrefixOptions = PrefixOptions;

    fn inter_area_network_type() -> LsaType {
        LsaFunctionCode::InterAreaPrefix.into()
    }

    fn inter_area_router_type() -> LsaType {
        LsaFunctionCode::InterAreaRouter.into()
    }
}

// ===== helper functions =====

fn decode_router_link(buf: &mut Bytes) -> DecodeResult<LsaRouterLink> {
    let link_type = buf.try_get_u8()?;
    let link_type = LsaRouterLinkType::from_u8(link_type)
        .ok_or(DecodeError::UnknownRouterLinkType(link_type))?;
    let _ = buf.try_get_u8()?;
    let metric = buf.try_get_u16()?;
    let iface_id = buf.try_get_u32()?;
    let nbr_iface_id = buf.try_get_u32()?;
    let nbr_router_id = buf.try_get_ipv4()?;

    Ok(LsaRouterLink::new(
        link_type,
        metric,
        iface_id,
        nbr_iface_id,
        nbr_router_id,
    ))
}

// Number of bytes a prefix of the given length takes on the wire: the
// prefix is padded to an integral number of 32-bit words (RFC 5340
// appendix A.4.1).
fn prefix_wire_len(plen: u8) -> usize {
    (plen as usize).div_ceil(32) * 4
}

// Parses the common four-byte prefix descriptor plus the padded prefix
// itself. The third byte pair carries a per-format value (metric,
// referenced LS type or reserved) and is returned raw.
fn decode_prefix_entry(
    af: AddressFamily,
    buf: &mut Bytes,
) -> DecodeResult<(PrefixOptions, u16, IpNetwork)> {
    let plen = buf.try_get_u8()?;
    let options = PrefixOptions::from_bits_truncate(buf.try_get_u8()?);
    let aux = buf.try_get_u16()?;

    if plen > af.max_prefixlen() {
        return Err(DecodeError::InvalidIpPrefix);
    }
    let wire_len = prefix_wire_len(plen);
    if buf.remaining() < wire_len {
        return Err(DecodeError::InvalidLsaLength);
    }

    let mut bytes = [0; 16];
    buf.try_copy_to_slice(&mut bytes[..wire_len])?;
    let addr = match af {
        AddressFamily::Ipv4 => {
            let mut octets = [0; 4];
            octets.copy_from_slice(&bytes[..4]);
            IpAddr::from(octets)
        }
        AddressFamily::Ipv6 => IpAddr::from(bytes),
    };
    let prefix =
        IpNetwork::new(addr, plen).map_err(|_| DecodeError::InvalidIpPrefix)?;

    Ok((options, aux, prefix))
}

fn encode_prefix_entry(
    options: PrefixOptions,
    aux: u16,
    prefix: &IpNetwork,
    buf: &mut BytesMut,
) {
    buf.put_u8(prefix.prefix());
    buf.put_u8(options.bits());
    buf.put_u16(aux);
    let wire_len = prefix_wire_len(prefix.prefix());
    match prefix.network() {
        IpAddr::V4(addr) => buf.put_slice(&addr.octets()[..wire_len]),
        IpAddr::V6(addr) => buf.put_slice(&addr.octets()[..wire_len]),
    }
}

fn decode_fwd_addr(
    af: AddressFamily,
    buf: &mut Bytes,
) -> DecodeResult<IpAddr> {
    Ok(match af {
        AddressFamily::Ipv4 => buf.try_get_ipv4()?.into(),
        AddressFamily::Ipv6 => buf.try_get_ipv6()?.into(),
    })
}
