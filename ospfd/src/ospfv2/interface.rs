//
// Copyright (c) The Ospfd Project Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv4Addr;

use ipnetwork::{IpNetwork, Ipv4Network};
use ospfd_utils::ip::{AddressFamily, IpNetworkKind, Ipv4AddrExt};

use crate::area::{Area, AreaVersion, OptionsLocation};
use crate::collections::NeighborIndex;
use crate::error::{Error, RejectReason};
use crate::instance::InstanceUpView;
use crate::interface::{
    self, Interface, InterfaceInactiveReason, InterfaceSys, InterfaceType,
    InterfaceVersion,
};
use crate::network::{MulticastAddr, NetworkVersion};
use crate::ospfv2::packet::{Hello, PacketHdr};
use crate::packet::{Packet, PacketType};
use crate::version::Ospfv2;

// ===== impl Ospfv2 =====

impl InterfaceVersion<Self> for Ospfv2 {
    fn is_ready(
        _af: AddressFamily,
        iface: &Interface<Self>,
    ) -> Result<(), InterfaceInactiveReason> {
        interface::is_ready_common(iface)?;

        if !iface.is_virtual_link() && iface.system.primary_addr.is_none() {
            return Err(InterfaceInactiveReason::MissingIpv4Address);
        }

        Ok(())
    }

    fn src_addr(iface_sys: &InterfaceSys<Self>) -> Ipv4Addr {
        iface_sys.primary_addr.unwrap().ip()
    }

    fn generate_hello(
        iface: &Interface<Self>,
        area: &Area<Self>,
        instance: &InstanceUpView<'_, Self>,
    ) -> Packet<Self> {
        let hdr = PacketHdr {
            pkt_type: PacketType::Hello,
            router_id: instance.state.router_id,
            area_id: area.id,
            auth_seqno: None,
        };

        let network_mask = if iface.is_virtual_link() {
            Ipv4Addr::UNSPECIFIED
        } else {
            iface.system.primary_addr.unwrap().mask()
        };

        Packet::Hello(Hello {
            hdr,
            network_mask,
            hello_interval: iface.config.hello_interval,
            options: Self::area_options(
                area,
                OptionsLocation::new_packet(
                    PacketType::Hello,
                    iface.state.auth.is_some(),
                ),
            ),
            priority: iface.config.priority,
            dead_interval: iface.config.dead_interval as u32,
            dr: iface.state.dr,
            bdr: iface.state.bdr,
            neighbors: iface
                .state
                .nbrs_by_router_id
                .keys()
                .copied()
                .collect(),
        })
    }

    fn validate_packet_dst(
        iface: &Interface<Self>,
        dst: Ipv4Addr,
    ) -> Result<(), Error<Self>> {
        // Virtual links are unicast-only.
        if iface.is_virtual_link() {
            if dst.is_multicast() {
                return Err(Error::InvalidDestination(dst));
            }
            return Ok(());
        }

        // The interface primary address and AllSPFRouters are always
        // accepted; AllDRouters only while (Backup) Designated Router.
        if dst == iface.system.primary_addr.unwrap().ip()
            || dst == *Self::multicast_addr(MulticastAddr::AllSpfRtrs)
        {
            return Ok(());
        }
        if dst == *Self::multicast_addr(MulticastAddr::AllDrRtrs)
            && iface.is_dr_or_backup()
        {
            return Ok(());
        }

        Err(Error::InvalidDestination(dst))
    }

    fn validate_packet_src(
        iface: &Interface<Self>,
        src: Ipv4Addr,
    ) -> Result<(), Error<Self>> {
        if !src.is_usable() {
            return Err(Error::InvalidSource(src));
        }

        // Except on point-to-point links, the sender must be on the
        // receiving interface's network.
        if iface.config.if_type != InterfaceType::PointToPoint
            && iface.config.if_type != InterfaceType::VirtualLink
            && !iface.system.primary_addr.unwrap().contains(src)
        {
            return Err(Error::InvalidSource(src));
        }

        Ok(())
    }

    fn packet_instance_id_match(
        _iface: &Interface<Self>,
        _packet_hdr: &PacketHdr,
    ) -> bool {
        // The Instance ID field is not present in OSPFv2's packet header.
        true
    }

    fn validate_hello(
        iface: &Interface<Self>,
        hello: &Hello,
    ) -> Result<(), RejectReason> {
        // The network mask only matters where the interface and the
        // neighbor must agree on the attached network.
        if matches!(
            iface.config.if_type,
            InterfaceType::PointToMultipoint
                | InterfaceType::Broadcast
                | InterfaceType::NonBroadcast
        ) && hello.network_mask != iface.system.primary_addr.unwrap().mask()
        {
            return Err(RejectReason::NetmaskMismatch(hello.network_mask));
        }

        Ok(())
    }

    fn max_packet_size(iface: &Interface<Self>) -> u16 {
        const VIRTUAL_LINK_MTU: u16 = 576;
        const IPV4_HDR_SIZE: u16 = 20;

        let mtu = if iface.is_virtual_link() {
            VIRTUAL_LINK_MTU
        } else {
            iface.system.mtu.unwrap()
        };

        let mut max = mtu - IPV4_HDR_SIZE;

        // Reserve space for the message digest when cryptographic
        // authentication is enabled.
        if let Some(auth) = &iface.state.auth {
            max -= auth.max_digest_size();
        }

        max
    }

    fn find_neighbor(
        iface: &Interface<Self>,
        src: &Ipv4Addr,
        router_id: Ipv4Addr,
    ) -> Option<NeighborIndex> {
        match iface.config.if_type {
            // On point-to-point networks and virtual links the sender is
            // identified by the Router ID in the OSPF header.
            InterfaceType::PointToPoint | InterfaceType::VirtualLink => {
                iface.state.nbrs_by_router_id.get(&router_id).copied()
            }
            // Everywhere else, by the IP source address.
            InterfaceType::Broadcast
            | InterfaceType::NonBroadcast
            | InterfaceType::PointToMultipoint => {
                iface.state.nbrs_by_src.get(src).copied()
            }
        }
    }

    fn accept_addr(addr: IpNetwork) -> Option<Ipv4Network> {
        Ipv4Network::get(addr).filter(|addr| addr.is_routable())
    }

    fn addr_list_update(iface: &mut Interface<Self>) {
        // The lowest configured address is the interface's primary address.
        iface.system.primary_addr =
            iface.system.addr_list.iter().next().copied();
    }
}
