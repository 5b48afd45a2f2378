//
// Copyright (c) The Ospfd Project Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv4Addr;
use std::time::Instant;

use bytes::{Buf, Bytes, BytesMut};
use derive_new::new;
use ospfd_utils::ip::AddressFamily;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::lsdb::{LSA_MAX_AGE, LSA_RESERVED_SEQ_NO};
use crate::packet::error::{DecodeError, DecodeResult, LsaValidationError};
use crate::packet::fletcher;
use crate::version::Version;

// Byte offsets of the age, checksum and length fields within the
// twenty-byte LSA header, identical in both protocol versions.
const AGE_RANGE: std::ops::Range<usize> = 0..2;
const CKSUM_RANGE: std::ops::Range<usize> = 16..18;
const LENGTH_RANGE: std::ops::Range<usize> = 18..20;

// An LSA instance.
//
// The wire encoding is the authoritative representation: it is what gets
// flooded (byte for byte, so that types this router doesn't understand
// survive unchanged) and what the Fletcher checksum is defined over. The
// decoded header and body are views derived from it at decode/origination
// time and are never edited afterwards, with the single exception of the
// age field, which `set_age` keeps in sync in both places.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct Lsa<V: Version> {
    // Wire encoding.
    #[cfg_attr(feature = "testing", serde(default, skip_serializing))]
    pub raw: Bytes,
    // Decoded header.
    pub hdr: V::LsaHdr,
    // Decoded body.
    pub body: V::LsaBody,
    // Reception or origination time. The effective age of the LSA is the
    // header age plus the time elapsed since this point.
    #[serde(skip)]
    pub base_time: Option<Instant>,
}

// Identity of an LSA within one flooding scope, and the key the LSDB trees
// are sorted by. The sort order (type, then advertising router, then LSA
// ID) is what database exchange iterates in.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, new)]
#[derive(Deserialize, Serialize)]
pub struct LsaKey<T: LsaTypeVersion> {
    #[serde(bound = "T: LsaTypeVersion")]
    pub lsa_type: T,
    pub adv_rtr: Ipv4Addr,
    pub lsa_id: Ipv4Addr,
}

// How far an LSA is flooded.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum LsaScope {
    Link,
    Area,
    As,
    Unknown,
}

// Version-specific LSA type system: the set of body variants and the
// numeric type space they live in.
pub trait LsaVersion<V: Version> {
    type LsaType: LsaTypeVersion;
    type LsaHdr: LsaHdrVersion<V>;
    type LsaBody: LsaBodyVersion<V>;
    type LsaRouterFlags: LsaRouterFlagsVersion;
    type LsaRouterLink;
    type PrefixOptions: PrefixOptionsVersion;

    // Type code of inter-area network summaries (Type-3 / Inter-Area-Prefix).
    fn inter_area_network_type() -> Self::LsaType;

    // Type code of inter-area router summaries (Type-4 / Inter-Area-Router).
    fn inter_area_router_type() -> Self::LsaType;
}

pub trait LsaTypeVersion
where
    Self: Send
        + Sync
        + Clone
        + Copy
        + Ord
        + PartialOrd
        + std::fmt::Debug
        + std::fmt::Display
        + std::hash::Hash
        + Into<u16>
        + Serialize
        + DeserializeOwned,
{
    // Flooding scope encoded in the type value.
    fn scope(&self) -> LsaScope;
}

pub trait LsaHdrVersion<V: Version>
where
    Self: Send
        + Sync
        + Clone
        + Copy
        + std::fmt::Debug
        + Serialize
        + DeserializeOwned,
{
    const LENGTH: u16;

    fn new(
        age: u16,
        options: Option<V::PacketOptions>,
        lsa_type: V::LsaType,
        lsa_id: Ipv4Addr,
        adv_rtr: Ipv4Addr,
        seq_no: u32,
    ) -> Self;

    fn decode(buf: &mut Bytes) -> DecodeResult<Self>;

    fn encode(&self, buf: &mut BytesMut);

    fn lsa_type(&self) -> V::LsaType;

    fn lsa_id(&self) -> Ipv4Addr;

    fn adv_rtr(&self) -> Ipv4Addr;

    fn seq_no(&self) -> u32;

    fn age(&self) -> u16;

    fn set_age(&mut self, age: u16);

    fn cksum(&self) -> u16;

    fn set_cksum(&mut self, cksum: u16);

    fn length(&self) -> u16;

    fn set_length(&mut self, length: u16);

    fn options(&self) -> Option<V::PacketOptions>;

    fn is_maxage(&self) -> bool {
        self.age() == LSA_MAX_AGE
    }

    fn key(&self) -> LsaKey<V::LsaType> {
        LsaKey::new(self.lsa_type(), self.adv_rtr(), self.lsa_id())
    }
}

pub trait LsaBodyVersion<V: Version>
where
    Self: Send + Sync + Clone + std::fmt::Debug + Serialize + DeserializeOwned,
{
    fn decode(
        af: AddressFamily,
        lsa_type: V::LsaType,
        lsa_id: Ipv4Addr,
        buf: &mut Bytes,
    ) -> DecodeResult<Self>;

    fn encode(&self, buf: &mut BytesMut);

    fn lsa_type(&self) -> V::LsaType;

    // Whether the body could not be interpreted (unrecognized type).
    fn is_unknown(&self) -> bool;

    fn validate(&self, hdr: &V::LsaHdr) -> Result<(), LsaValidationError>;
}

pub trait LsaRouterFlagsVersion
where
    Self: Send + Sync + Clone + std::fmt::Debug + Serialize + DeserializeOwned,
{
    fn is_abr(&self) -> bool;
    fn is_asbr(&self) -> bool;
}

pub trait PrefixOptionsVersion
where
    Self: Send
        + Sync
        + Clone
        + Copy
        + Default
        + Eq
        + PartialEq
        + std::fmt::Debug
        + Serialize
        + DeserializeOwned,
{
}

// ===== impl Lsa =====

impl<V> Lsa<V>
where
    V: Version,
{
    // Self-imposed cap on originated LSAs, low enough to dodge IP
    // fragmentation on any sane link.
    pub const MAX_LENGTH: usize = 1024;

    // Originates a fresh LSA instance from its parts, producing the wire
    // encoding along the way.
    pub fn new(
        age: u16,
        options: Option<V::PacketOptions>,
        lsa_id: Ipv4Addr,
        adv_rtr: Ipv4Addr,
        seq_no: u32,
        body: V::LsaBody,
    ) -> Self {
        let hdr = V::LsaHdr::new(
            age,
            options,
            body.lsa_type(),
            lsa_id,
            adv_rtr,
            seq_no,
        );
        let mut lsa = Lsa {
            raw: Bytes::new(),
            hdr,
            body,
            base_time: base_time(),
        };
        lsa.refresh_raw();
        lsa
    }

    // Parses one LSA out of the buffer, consuming exactly the number of
    // bytes declared in its header.
    pub fn decode(af: AddressFamily, buf: &mut Bytes) -> DecodeResult<Self> {
        let full = buf.clone();

        // The header carries the total length; everything else is sized off
        // of it.
        if buf.remaining() < V::LsaHdr::LENGTH as usize {
            return Err(DecodeError::InvalidLength(buf.len() as u16));
        }
        let hdr = V::LsaHdr::decode(buf)?;
        let total_len = hdr.length();
        let Some(body_len) = total_len.checked_sub(V::LsaHdr::LENGTH) else {
            return Err(DecodeError::InvalidLsaLength);
        };
        if buf.remaining() < body_len as usize {
            return Err(DecodeError::InvalidLsaLength);
        }

        let mut body_buf = buf.copy_to_bytes(body_len as usize);
        let body =
            V::LsaBody::decode(af, hdr.lsa_type(), hdr.lsa_id(), &mut body_buf)?;

        Ok(Lsa {
            raw: full.slice(..total_len as usize),
            hdr,
            body,
            base_time: base_time(),
        })
    }

    // Rebuilds the wire encoding from the decoded view, filling in the
    // length and checksum fields of both.
    pub(crate) fn refresh_raw(&mut self) {
        let mut buf = BytesMut::with_capacity(Self::MAX_LENGTH);
        self.hdr.encode(&mut buf);
        self.body.encode(&mut buf);

        let total_len = buf.len() as u16;
        buf[LENGTH_RANGE].copy_from_slice(&total_len.to_be_bytes());
        self.hdr.set_length(total_len);

        // The age field is excluded from the checksum so that aging never
        // invalidates a stored LSA.
        let cksum = fletcher::checkbytes(
            &buf[AGE_RANGE.end..],
            CKSUM_RANGE.start - AGE_RANGE.end,
        );
        buf[CKSUM_RANGE].copy_from_slice(&cksum);
        self.hdr.set_cksum(u16::from_be_bytes(cksum));

        self.raw = buf.freeze();
    }

    // Effective age: the header age plus the local holding time.
    pub(crate) fn age(&self) -> u16 {
        let held = match self.base_time {
            Some(base_time) => {
                u16::try_from(base_time.elapsed().as_secs()).unwrap_or(u16::MAX)
            }
            None => 0,
        };
        self.hdr.age().saturating_add(held).min(LSA_MAX_AGE)
    }

    // Rewrites the age field, in the header and in the wire encoding, and
    // restarts the local holding time.
    pub(crate) fn set_age(&mut self, age: u16) {
        self.hdr.set_age(age);

        let mut raw = self.raw.to_vec();
        raw[AGE_RANGE].copy_from_slice(&age.to_be_bytes());
        self.raw = Bytes::from(raw);

        self.base_time = base_time();
    }

    pub(crate) fn set_maxage(&mut self) {
        self.set_age(LSA_MAX_AGE);
    }

    // Acceptance checks applied to every received LSA before installation:
    // checksum first, then the header fields with reserved values, then
    // whatever the body imposes.
    pub fn validate(&self) -> Result<(), LsaValidationError> {
        if !self.is_checksum_valid() {
            return Err(LsaValidationError::InvalidChecksum);
        }
        if self.hdr.age() > LSA_MAX_AGE {
            return Err(LsaValidationError::InvalidLsaAge);
        }
        if self.hdr.seq_no() == LSA_RESERVED_SEQ_NO {
            return Err(LsaValidationError::InvalidLsaSeqNo);
        }

        self.body.validate(&self.hdr)
    }

    pub(crate) fn is_checksum_valid(&self) -> bool {
        // The testing harness builds LSAs with a zeroed checksum.
        #[cfg(feature = "testing")]
        if self.hdr.cksum() == 0 {
            return true;
        }

        let end = (self.hdr.length() as usize).min(self.raw.len());
        fletcher::verify(&self.raw[AGE_RANGE.end..end])
    }
}

// ===== helper functions =====

fn base_time() -> Option<Instant> {
    #[cfg(not(feature = "testing"))]
    {
        Some(Instant::now())
    }
    #[cfg(feature = "testing")]
    {
        None
    }
}

// ===== global functions =====

// Serde filter used under the testing feature: the age is non-deterministic
// and skipped, except for MaxAge, which tests do need to observe.
pub fn serde_lsa_age_filter(age: &u16) -> bool {
    *age != LSA_MAX_AGE
}
