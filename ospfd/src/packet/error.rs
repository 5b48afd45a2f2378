//
// Copyright (c) The Ospfd Project Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv4Addr;

use bytes::TryGetError;
use serde::{Deserialize, Serialize};

// Type aliases.
pub type DecodeResult<T> = Result<T, DecodeError>;

// Why a received packet could not be turned into a `Packet`. The whole
// datagram is dropped; only a counter records it.
#[derive(Debug, Deserialize, Serialize)]
pub enum DecodeError {
    IncompletePacket,
    InvalidIpHdrLength(u16),
    InvalidVersion(u8),
    UnknownPacketType(u8),
    InvalidLength(u16),
    InvalidChecksum,
    InvalidRouterId(Ipv4Addr),
    UnsupportedAuthType(u16),
    InvalidLsaLength,
    UnknownRouterLinkType(u8),
    InvalidIpPrefix,
    AuthTypeMismatch,
    AuthKeyIdNotFound(u32),
    AuthLenError(u16),
    AuthError,
}

// Why a received LSA failed the acceptance checks. The LSA is discarded
// individually; the rest of its LS Update packet is still processed.
#[derive(Clone, Copy, Debug, Deserialize, Serialize)]
pub enum LsaValidationError {
    InvalidChecksum,
    InvalidLsaAge,
    InvalidLsaSeqNo,
    Ospfv2RouterLsaIdMismatch,
}

// ===== impl DecodeError =====

impl DecodeError {
    pub(crate) fn log(&self) {
        tracing::warn!("{}", self);
    }
}

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecodeError::IncompletePacket => {
                write!(f, "truncated packet")
            }
            DecodeError::InvalidIpHdrLength(length) => {
                write!(f, "IP header declares length {}", length)
            }
            DecodeError::InvalidVersion(version) => {
                write!(f, "unsupported OSPF version {}", version)
            }
            DecodeError::UnknownPacketType(pkt_type) => {
                write!(f, "unknown packet type {}", pkt_type)
            }
            DecodeError::InvalidLength(length) => {
                write!(f, "bad packet length {}", length)
            }
            DecodeError::InvalidChecksum => {
                write!(f, "checksum verification failed")
            }
            DecodeError::InvalidRouterId(router_id) => {
                write!(f, "unusable Router ID {}", router_id)
            }
            DecodeError::UnsupportedAuthType(au_type) => {
                write!(f, "unsupported authentication type {}", au_type)
            }
            DecodeError::InvalidLsaLength => {
                write!(f, "bad LSA length")
            }
            DecodeError::UnknownRouterLinkType(link_type) => {
                write!(f, "unknown router link type {}", link_type)
            }
            DecodeError::InvalidIpPrefix => {
                write!(f, "malformed IP prefix")
            }
            DecodeError::AuthTypeMismatch => {
                write!(f, "authentication type does not match configuration")
            }
            DecodeError::AuthKeyIdNotFound(key_id) => {
                write!(f, "no key configured for Key ID {}", key_id)
            }
            DecodeError::AuthLenError(length) => {
                write!(f, "bad authentication data length {}", length)
            }
            DecodeError::AuthError => {
                write!(f, "authentication digest mismatch")
            }
        }
    }
}

impl std::error::Error for DecodeError {}

impl From<TryGetError> for DecodeError {
    fn from(_error: TryGetError) -> DecodeError {
        DecodeError::IncompletePacket
    }
}

// ===== impl LsaValidationError =====

impl std::fmt::Display for LsaValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LsaValidationError::InvalidChecksum => {
                write!(f, "LSA checksum verification failed")
            }
            LsaValidationError::InvalidLsaAge => {
                write!(f, "LSA age beyond MaxAge")
            }
            LsaValidationError::InvalidLsaSeqNo => {
                write!(f, "LSA carries the reserved sequence number")
            }
            LsaValidationError::Ospfv2RouterLsaIdMismatch => {
                write!(
                    f,
                    "Router-LSA Link State ID differs from advertising router"
                )
            }
        }
    }
}

impl std::error::Error for LsaValidationError {}
