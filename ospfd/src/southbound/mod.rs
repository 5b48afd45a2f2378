//
// Copyright (c) The Ospfd Project Contributors
//
// SPDX-License-Identifier: MIT
//

pub mod rx;
pub mod tx;

use std::net::Ipv4Addr;

use ospfd_utils::UnboundedSender;
use ospfd_utils::protocol::Protocol;
use ospfd_utils::southbound::{
    AddressMsg, InterfaceUpdateMsg, RouteKeyMsg, RouteMsg,
    RouteRedistributeMsg,
};

// Notifications received from the host: interface-attributes mirror updates,
// the system Router ID and routes offered for redistribution.
#[derive(Debug)]
pub enum SouthboundRxMsg {
    InterfaceUpd(InterfaceUpdateMsg),
    AddressAdd(AddressMsg),
    AddressDel(AddressMsg),
    RouterIdUpd(Option<Ipv4Addr>),
    RouteRedistAdd(RouteRedistributeMsg),
    RouteRedistDel(RouteKeyMsg),
}

// Operations emitted towards the host RIB.
#[derive(Debug)]
pub enum RibTxMsg {
    RouteInstall(RouteMsg),
    RouteUninstall(RouteKeyMsg),
    Register { protocol: Protocol },
    Unregister { protocol: Protocol },
}

// Handle used to reach the host RIB.
pub type RibChannelTx = UnboundedSender<RibTxMsg>;
