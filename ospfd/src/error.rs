//
// Copyright (c) The Ospfd Project Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv4Addr;

use tracing::{error, warn};

use crate::interface::ism;
use crate::neighbor::nsm;
use crate::network::MulticastAddr;
use crate::packet::PacketType;
use crate::packet::error::DecodeError;
use crate::packet::lsa::LsaKey;
use crate::spf;
use crate::version::Version;

// Errors surfaced by the protocol engine. None of them are fatal to the
// instance: they are logged and the offending packet, event or timer tick
// is dropped.
#[derive(Debug)]
pub enum Error<V: Version> {
    IoError(IoError),
    // An event or timer referred to an entity that no longer exists. Timers
    // race with reconfiguration, so these are expected after deletions.
    AreaNotFound(Ipv4Addr),
    InterfaceNotFound(String),
    NeighborNotFound(V::NetIpAddr),
    LsaNotFound(LsaKey<V::LsaType>),
    // Received packet was dropped before reaching any neighbor state.
    InvalidSource(V::NetIpAddr),
    InvalidDestination(V::NetIpAddr),
    PacketDecodeError(DecodeError),
    PacketAuthMissingKey,
    PacketAuthStaleSeqno(V::NetIpAddr),
    UnknownNeighbor(V::NetIpAddr, Ipv4Addr),
    PacketRejected(String, V::NetIpAddr, PacketType, RejectReason),
    DbDescIgnored(Ipv4Addr, nsm::State),
    // Route computation.
    SpfRootMissing(Ipv4Addr),
    NexthopUnresolved(V::VertexId),
    // State machines.
    IsmUnexpectedEvent(String, ism::State, ism::Event),
    NsmUnexpectedEvent(Ipv4Addr, nsm::State, nsm::Event),
    SpfUnexpectedEvent(spf::fsm::State, spf::fsm::Event),
    InterfaceStartFailed(String, IoError),
}

// Network I/O failures.
#[derive(Debug)]
pub enum IoError {
    SocketCreation(std::io::Error),
    MulticastJoin(MulticastAddr, std::io::Error),
    MulticastLeave(MulticastAddr, std::io::Error),
    Recv(std::io::Error),
    RecvMissingSourceAddr,
    RecvMissingAncillaryData,
    Send(std::io::Error),
}

// Why a received packet failed the interface acceptance checks. The value
// carried is the one the sender announced; the local configuration it
// clashed with is implied by the interface named in the error.
#[derive(Debug, Eq, PartialEq)]
pub enum RejectReason {
    WrongAreaId(Ipv4Addr),
    NetmaskMismatch(Ipv4Addr),
    HelloIntervalMismatch(u16),
    DeadIntervalMismatch(u32),
    ExternalOptionMismatch,
    NssaOptionMismatch,
    MtuTooLarge(u16),
    OwnRouterId,
}

// ===== impl Error =====

impl<V> Error<V>
where
    V: Version,
{
    pub(crate) fn log(&self) {
        match self {
            Error::IoError(error) => error.log(),
            Error::InterfaceStartFailed(..) => error!("{}", self),
            _ => warn!("{}", self),
        }
    }
}

impl<V> std::fmt::Display for Error<V>
where
    V: Version,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::IoError(error) => error.fmt(f),
            Error::AreaNotFound(area_id) => {
                write!(f, "no such area: {}", area_id)
            }
            Error::InterfaceNotFound(ifname) => {
                write!(f, "no such interface: {}", ifname)
            }
            Error::NeighborNotFound(src) => {
                write!(f, "no neighbor at address {}", src)
            }
            Error::LsaNotFound(key) => {
                write!(
                    f,
                    "no LSA with type {} id {} advertised by {}",
                    key.lsa_type, key.lsa_id, key.adv_rtr
                )
            }
            Error::InvalidSource(src) => {
                write!(f, "packet with invalid source address {}", src)
            }
            Error::InvalidDestination(dst) => {
                write!(f, "packet with invalid destination address {}", dst)
            }
            Error::PacketDecodeError(error) => {
                write!(f, "malformed packet: {}", error)
            }
            Error::PacketAuthMissingKey => {
                write!(f, "no valid key to authenticate outgoing packet")
            }
            Error::PacketAuthStaleSeqno(src) => {
                write!(
                    f,
                    "packet from {} with stale authentication sequence number",
                    src
                )
            }
            Error::UnknownNeighbor(src, router_id) => {
                write!(
                    f,
                    "packet from unknown neighbor {} ({})",
                    router_id, src
                )
            }
            Error::PacketRejected(ifname, src, pkt_type, reason) => {
                write!(
                    f,
                    "{:?} packet from {} rejected on {}: {}",
                    pkt_type, src, ifname, reason
                )
            }
            Error::DbDescIgnored(router_id, state) => {
                write!(
                    f,
                    "Database Description from {} ignored in state {:?}",
                    router_id, state
                )
            }
            Error::SpfRootMissing(area_id) => {
                write!(f, "own Router-LSA missing in area {}", area_id)
            }
            Error::NexthopUnresolved(vertex_id) => {
                write!(f, "no nexthop for vertex {:?}", vertex_id)
            }
            Error::IsmUnexpectedEvent(ifname, state, event) => {
                write!(
                    f,
                    "interface {}: no transition for event {:?} in state {:?}",
                    ifname, event, state
                )
            }
            Error::NsmUnexpectedEvent(router_id, state, event) => {
                write!(
                    f,
                    "neighbor {}: no transition for event {:?} in state {:?}",
                    router_id, event, state
                )
            }
            Error::SpfUnexpectedEvent(state, event) => {
                write!(
                    f,
                    "SPF delay: no transition for event {:?} in state {:?}",
                    event, state
                )
            }
            Error::InterfaceStartFailed(ifname, error) => {
                write!(f, "failed to start interface {}: {}", ifname, error)
            }
        }
    }
}

impl<V> std::error::Error for Error<V>
where
    V: Version,
{
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::IoError(error) | Error::InterfaceStartFailed(_, error) => {
                Some(error)
            }
            Error::PacketDecodeError(error) => Some(error),
            _ => None,
        }
    }
}

impl<V> From<IoError> for Error<V>
where
    V: Version,
{
    fn from(error: IoError) -> Error<V> {
        Error::IoError(error)
    }
}

// ===== impl IoError =====

impl IoError {
    pub(crate) fn log(&self) {
        warn!("{}", self);
    }
}

impl std::fmt::Display for IoError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IoError::SocketCreation(error) => {
                write!(f, "failed to create raw socket: {}", error)
            }
            IoError::MulticastJoin(addr, error) => {
                write!(f, "failed to join group {:?}: {}", addr, error)
            }
            IoError::MulticastLeave(addr, error) => {
                write!(f, "failed to leave group {:?}: {}", addr, error)
            }
            IoError::Recv(error) => {
                write!(f, "receive failed: {}", error)
            }
            IoError::RecvMissingSourceAddr => {
                write!(f, "received packet lacks a source address")
            }
            IoError::RecvMissingAncillaryData => {
                write!(f, "received packet lacks ancillary data")
            }
            IoError::Send(error) => {
                write!(f, "send failed: {}", error)
            }
        }
    }
}

impl std::error::Error for IoError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            IoError::SocketCreation(error)
            | IoError::MulticastJoin(_, error)
            | IoError::MulticastLeave(_, error)
            | IoError::Recv(error)
            | IoError::Send(error) => Some(error),
            _ => None,
        }
    }
}

// ===== impl RejectReason =====

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectReason::WrongAreaId(area_id) => {
                write!(f, "wrong area ID {}", area_id)
            }
            RejectReason::NetmaskMismatch(mask) => {
                write!(f, "network mask {} does not match", mask)
            }
            RejectReason::HelloIntervalMismatch(interval) => {
                write!(f, "hello interval {} does not match", interval)
            }
            RejectReason::DeadIntervalMismatch(interval) => {
                write!(f, "dead interval {} does not match", interval)
            }
            RejectReason::ExternalOptionMismatch => {
                write!(f, "E-bit does not match area type")
            }
            RejectReason::NssaOptionMismatch => {
                write!(f, "N-bit does not match area type")
            }
            RejectReason::MtuTooLarge(mtu) => {
                write!(f, "announced MTU {} exceeds own", mtu)
            }
            RejectReason::OwnRouterId => {
                write!(f, "sender uses our Router ID")
            }
        }
    }
}
