//
// Copyright (c) The Ospfd Project Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::{Ipv4Addr, Ipv6Addr};

use ipnetwork::IpNetwork;
use ospfd_utils::ip::AddressFamily;

use crate::area::{Area, AreaVersion, OptionsLocation};
use crate::collections::NeighborIndex;
use crate::error::{Error, RejectReason};
use crate::instance::InstanceUpView;
use crate::interface::{
    self, Interface, InterfaceInactiveReason, InterfaceSys, InterfaceVersion,
};
use crate::network::{MulticastAddr, NetworkVersion};
use crate::ospfv3::packet::{Hello, PacketHdr};
use crate::packet::{Packet, PacketType};
use crate::version::Ospfv3;

// ===== impl Ospfv3 =====

impl InterfaceVersion<Self> for Ospfv3 {
    fn is_ready(
        _af: AddressFamily,
        iface: &Interface<Self>,
    ) -> Result<(), InterfaceInactiveReason> {
        interface::is_ready_common(iface)?;

        if iface.system.linklocal_addr.is_none() {
            return Err(InterfaceInactiveReason::MissingLinkLocalAddress);
        }

        Ok(())
    }

    fn src_addr(iface_sys: &InterfaceSys<Self>) -> Ipv6Addr {
        // OSPFv3 packets are always sent from the link-local address.
        iface_sys.linklocal_addr.unwrap().ip()
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
            instance_id: iface.config.instance_id,
        };

        Packet::Hello(Hello {
            hdr,
            iface_id: iface.system.ifindex.unwrap_or(0),
            priority: iface.config.priority,
            options: Self::area_options(
                area,
                OptionsLocation::new_packet(PacketType::Hello, false),
            ),
            hello_interval: iface.config.hello_interval,
            dead_interval: iface.config.dead_interval,
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
        dst: Ipv6Addr,
    ) -> Result<(), Error<Self>> {
        // The interface link-local address and AllSPFRouters are always
        // accepted; AllDRouters only while (Backup) Designated Router.
        if dst == iface.system.linklocal_addr.unwrap().ip()
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
        src: Ipv6Addr,
    ) -> Result<(), Error<Self>> {
        interface::validate_packet_src_common(iface, src)?;

        // OSPFv3 packets must use link-local source addresses.
        if !src.is_unicast_link_local() {
            return Err(Error::InvalidSource(src));
        }

        Ok(())
    }

    fn packet_instance_id_match(
        iface: &Interface<Self>,
        packet_hdr: &PacketHdr,
    ) -> bool {
        iface.config.instance_id == packet_hdr.instance_id
    }

    fn validate_hello(
        _iface: &Interface<Self>,
        _hello: &Hello,
    ) -> Result<(), RejectReason> {
        // OSPFv3 Hello packets carry no network mask.
        Ok(())
    }

    fn max_packet_size(iface: &Interface<Self>) -> u16 {
        const IPV6_HDR_SIZE: u16 = 40;

        iface.system.mtu.unwrap() - IPV6_HDR_SIZE
    }

    fn find_neighbor(
        iface: &Interface<Self>,
        _src: &Ipv6Addr,
        router_id: Ipv4Addr,
    ) -> Option<NeighborIndex> {
        // OSPFv3 neighbors are always identified by their Router ID.
        iface.state.nbrs_by_router_id.get(&router_id).copied()
    }

    fn accept_addr(addr: IpNetwork) -> Option<IpNetwork> {
        match addr {
            IpNetwork::V6(_) => Some(addr),
            IpNetwork::V4(_) => None,
        }
    }

    fn addr_list_update(iface: &mut Interface<Self>) {
        // Track the link-local address used as the packet source.
        iface.system.linklocal_addr =
            iface.system.addr_list.iter().find_map(|addr| match addr {
                IpNetwork::V6(addr) if addr.ip().is_unicast_link_local() => {
                    Some(*addr)
                }
                _ => None,
            });
    }
}
