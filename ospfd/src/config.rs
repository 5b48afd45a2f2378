//
// Copyright (c) The Ospfd Project Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeMap;
use std::net::Ipv4Addr;

use ospfd_utils::crypto::CryptoAlgo;

use crate::area::{Area, AreaType};
use crate::instance::Instance;
use crate::interface::{Interface, InterfaceInactiveReason, InterfaceType, ism};
use crate::lsdb::LsaOriginateEvent;
use crate::spf;
use crate::version::Version;

// Instance configuration.
#[derive(Clone, Debug)]
pub struct InstanceCfg {
    pub enabled: bool,
    // Explicitly configured Router ID; falls back to the system Router ID.
    pub router_id: Option<Ipv4Addr>,
    // RFC 1583 compatibility relaxes the preference rules for AS-external
    // paths. It must be set consistently across the routing domain.
    pub rfc1583_compat: bool,
    // Maximum number of equal-cost paths kept per destination.
    pub max_paths: u16,
    // Whether to originate a default AS-External-LSA.
    pub default_originate: bool,
    // Administrative distances handed to the RIB.
    pub preference: Preference,
    // SPF delay FSM intervals, in milliseconds (RFC 8405).
    pub spf_initial_delay: u32,
    pub spf_short_delay: u32,
    pub spf_long_delay: u32,
    pub spf_hold_down: u32,
    pub spf_time_to_learn: u32,
}

#[derive(Clone, Copy, Debug)]
pub struct Preference {
    pub intra_area: u8,
    pub inter_area: u8,
    pub external: u8,
}

// Area configuration.
#[derive(Clone, Debug)]
pub struct AreaCfg {
    pub area_type: AreaType,
    // Whether inter-area summaries are originated into this area.
    pub summary: bool,
    // Cost of the default summary injected into stub/NSSA areas.
    pub default_cost: u32,
}

// Area range configuration.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct RangeCfg {
    // Ranges can be toggled between advertised and suppressed without
    // being removed.
    pub advertise: bool,
    // Static cost overriding the computed maximum of the components.
    pub cost: Option<u32>,
}

// Interface configuration.
#[derive(Clone, Debug)]
pub struct InterfaceCfg<V: Version> {
    pub enabled: bool,
    pub if_type: InterfaceType,
    pub passive: bool,
    pub priority: u8,
    pub hello_interval: u16,
    pub dead_interval: u16,
    pub retransmit_interval: u16,
    pub transmit_delay: u16,
    pub cost: u16,
    pub mtu_ignore: bool,
    // Whether to set the IPv4 Router Alert option on outgoing packets.
    pub router_alert: bool,
    // OSPFv3 Instance ID.
    pub instance_id: u8,
    // Statically configured neighbors (NBMA and Point-to-MultiPoint).
    pub static_nbrs: BTreeMap<V::NetIpAddr, StaticNbr>,
    // Authentication (OSPFv2 only).
    pub auth_simple: Option<String>,
    pub auth_keychain: Option<String>,
    pub auth_keyid: Option<u32>,
    pub auth_algo: Option<CryptoAlgo>,
    pub auth_key: Option<String>,
    // Virtual links: Router ID of the remote endpoint and the area the
    // link transits.
    pub vlink_remote: Option<Ipv4Addr>,
    pub vlink_transit_area: Option<Ipv4Addr>,
}

// Statically configured neighbor.
#[derive(Clone, Copy, Debug)]
pub struct StaticNbr {
    pub priority: u8,
    pub poll_interval: u16,
}

// ===== impl InstanceCfg =====

impl Default for InstanceCfg {
    fn default() -> InstanceCfg {
        InstanceCfg {
            enabled: true,
            router_id: None,
            rfc1583_compat: false,
            max_paths: 16,
            default_originate: false,
            preference: Preference {
                intra_area: 110,
                inter_area: 110,
                external: 110,
            },
            spf_initial_delay: 50,
            spf_short_delay: 200,
            spf_long_delay: 5000,
            spf_hold_down: 10000,
            spf_time_to_learn: 500,
        }
    }
}

// ===== impl AreaCfg =====

impl Default for AreaCfg {
    fn default() -> AreaCfg {
        AreaCfg {
            area_type: AreaType::Normal,
            summary: true,
            default_cost: 1,
        }
    }
}

// ===== impl InterfaceCfg =====

impl<V> Default for InterfaceCfg<V>
where
    V: Version,
{
    fn default() -> InterfaceCfg<V> {
        InterfaceCfg {
            enabled: true,
            if_type: InterfaceType::Broadcast,
            passive: false,
            priority: 1,
            hello_interval: 10,
            dead_interval: 40,
            retransmit_interval: 5,
            transmit_delay: 1,
            cost: 10,
            mtu_ignore: false,
            router_alert: false,
            instance_id: 0,
            static_nbrs: Default::default(),
            auth_simple: None,
            auth_keychain: None,
            auth_keyid: None,
            auth_algo: None,
            auth_key: None,
            vlink_remote: None,
            vlink_transit_area: None,
        }
    }
}

// ===== management surface =====

// Configuration and inspection operations. These are the entry points a
// management frontend calls between event-loop iterations; the RPC
// encoding itself lives outside the protocol engine.
impl<V> Instance<V>
where
    V: Version,
{
    // Enables or disables the whole instance.
    pub fn set_enabled(&mut self, enabled: bool) {
        if self.config.enabled == enabled {
            return;
        }
        self.config.enabled = enabled;
        self.update();
    }

    // Sets the explicitly configured Router ID.
    pub fn set_router_id(&mut self, router_id: Option<Ipv4Addr>) {
        if self.config.router_id == router_id {
            return;
        }
        self.config.router_id = router_id;
        // A Router ID change requires a full restart of the instance.
        self.reset();
    }

    // Enables or disables origination of a default AS-External-LSA.
    pub fn set_default_originate(&mut self, enable: bool) {
        if self.config.default_originate == enable {
            return;
        }
        self.config.default_originate = enable;

        use ospfd_utils::ip::IpNetworkKind;
        use ospfd_utils::policy::{ExternalMetricType, ExternalRoute};
        use ospfd_utils::protocol::Protocol;

        let Some((mut instance, arenas)) = self.as_up() else {
            return;
        };
        let prefix = <V::IpNetwork as IpNetworkKind<V::IpAddr>>::default(
            instance.state.af,
        );
        if enable {
            let route = ExternalRoute {
                prefix: prefix.into(),
                nexthop: None,
                metric: 1,
                metric_type: ExternalMetricType::Type2,
                tag: None,
                origin: Protocol::STATIC,
                tags: Default::default(),
            };
            instance.state.redistributed.insert(prefix, route.clone());
            V::lsa_orig_external(&mut instance, arenas, prefix, &route);
        } else if instance.state.redistributed.remove(&prefix).is_some() {
            V::lsa_flush_external(&mut instance, arenas, prefix);
        }
    }

    // Sets the RFC 1583 compatibility flag.
    pub fn set_rfc1583_compat(&mut self, compat: bool) {
        if self.config.rfc1583_compat == compat {
            return;
        }
        self.config.rfc1583_compat = compat;
        self.schedule_spf_config_change();
    }

    // Creates a new area.
    pub fn area_add(&mut self, area_id: Ipv4Addr) {
        if self.arenas.area_idx(area_id).is_err() {
            self.arenas.area_attach(Area::new(area_id));
        }
    }

    // Deletes an area, stopping all its interfaces.
    pub fn area_delete(&mut self, area_id: Ipv4Addr) {
        let Ok(area_idx) = self.arenas.area_idx(area_id) else {
            return;
        };
        let ifnames = self.arenas.areas[area_idx]
            .iface_names()
            .cloned()
            .collect::<Vec<_>>();

        if let Some((instance, arenas)) = self.as_up() {
            let area = &arenas.areas[area_idx];
            for ifname in &ifnames {
                let Ok(iface_idx) = area.iface_idx(ifname) else {
                    continue;
                };
                let iface = &mut arenas.interfaces[iface_idx];
                iface.fsm(
                    area,
                    &instance,
                    &mut arenas.neighbors,
                    &arenas.lsa_entries,
                    ism::Event::InterfaceDown(
                        InterfaceInactiveReason::AdminDown,
                    ),
                );
            }
        }

        let area = &mut self.arenas.areas[area_idx];
        for ifname in &ifnames {
            area.iface_detach(&mut self.arenas.interfaces, ifname);
        }
        self.arenas.area_detach(area_id);
        self.update();
    }

    // Changes the type of an area.
    pub fn area_set_type(&mut self, area_id: Ipv4Addr, area_type: AreaType) {
        let Ok(area_idx) = self.arenas.area_idx(area_id) else {
            return;
        };
        let area = &mut self.arenas.areas[area_idx];
        if area.config.area_type == area_type {
            return;
        }
        area.config.area_type = area_type;

        // The options advertised in Hello packets changed: restart all of
        // the area's interfaces.
        self.area_reset(area_id);
    }

    // Enables or disables summary origination into a stub/NSSA area.
    pub fn area_set_summary(&mut self, area_id: Ipv4Addr, summary: bool) {
        let Ok(area_idx) = self.arenas.area_idx(area_id) else {
            return;
        };
        let area = &mut self.arenas.areas[area_idx];
        if area.config.summary == summary {
            return;
        }
        area.config.summary = summary;
        self.schedule_spf_config_change();
    }

    // Sets the cost of the default summary injected into a stub/NSSA area.
    pub fn area_set_default_cost(&mut self, area_id: Ipv4Addr, cost: u32) {
        let Ok(area_idx) = self.arenas.area_idx(area_id) else {
            return;
        };
        let area = &mut self.arenas.areas[area_idx];
        if area.config.default_cost == cost {
            return;
        }
        area.config.default_cost = cost;
        self.schedule_spf_config_change();
    }

    // Adds or updates an area address range.
    pub fn area_range_add(
        &mut self,
        area_id: Ipv4Addr,
        prefix: V::IpNetwork,
        config: RangeCfg,
    ) {
        let Ok(area_idx) = self.arenas.area_idx(area_id) else {
            return;
        };
        let area = &mut self.arenas.areas[area_idx];
        let range = area.ranges.entry(prefix).or_default();
        if range.config == config {
            return;
        }
        range.config = config;
        self.schedule_spf_config_change();
    }

    // Removes an area address range.
    pub fn area_range_delete(
        &mut self,
        area_id: Ipv4Addr,
        prefix: V::IpNetwork,
    ) {
        let Ok(area_idx) = self.arenas.area_idx(area_id) else {
            return;
        };
        let area = &mut self.arenas.areas[area_idx];
        if area.ranges.remove(&prefix).is_none() {
            return;
        }
        self.schedule_spf_config_change();
    }

    // Attaches an interface to an area.
    pub fn interface_add(&mut self, area_id: Ipv4Addr, ifname: &str) {
        self.area_add(area_id);
        let area_idx = self.arenas.area_idx(area_id).unwrap();
        let area = &mut self.arenas.areas[area_idx];
        if area.iface_idx(ifname).is_ok() {
            return;
        }
        let iface = Interface::new(area_id, ifname.to_owned());
        area.iface_attach(&mut self.arenas.interfaces, iface);
        self.update();
    }

    // Detaches an interface from its area.
    pub fn interface_delete(&mut self, area_id: Ipv4Addr, ifname: &str) {
        let Ok(area_idx) = self.arenas.area_idx(area_id) else {
            return;
        };
        let Ok(iface_idx) = self.arenas.areas[area_idx].iface_idx(ifname)
        else {
            return;
        };

        if let Some((instance, arenas)) = self.as_up() {
            let area = &arenas.areas[area_idx];
            let iface = &mut arenas.interfaces[iface_idx];
            iface.fsm(
                area,
                &instance,
                &mut arenas.neighbors,
                &arenas.lsa_entries,
                ism::Event::InterfaceDown(InterfaceInactiveReason::AdminDown),
            );
        }

        let area = &mut self.arenas.areas[area_idx];
        area.iface_detach(&mut self.arenas.interfaces, ifname);
        self.update();
    }

    // Configures a virtual link through the given transit area. The link
    // itself is an interface to the backbone.
    pub fn vlink_add(&mut self, transit_area_id: Ipv4Addr, remote: Ipv4Addr) {
        let ifname = format!("vlink-{}-{}", transit_area_id, remote);
        self.interface_add(Ipv4Addr::UNSPECIFIED, &ifname);
        self.interface_update_cfg(Ipv4Addr::UNSPECIFIED, &ifname, |config| {
            config.if_type = InterfaceType::VirtualLink;
            config.vlink_remote = Some(remote);
            config.vlink_transit_area = Some(transit_area_id);
        });
    }

    // Removes a virtual link.
    pub fn vlink_delete(
        &mut self,
        transit_area_id: Ipv4Addr,
        remote: Ipv4Addr,
    ) {
        let ifname = format!("vlink-{}-{}", transit_area_id, remote);
        self.interface_delete(Ipv4Addr::UNSPECIFIED, &ifname);
    }

    // Updates the configuration of an interface and applies the side
    // effects.
    pub fn interface_update_cfg<F>(
        &mut self,
        area_id: Ipv4Addr,
        ifname: &str,
        f: F,
    ) where
        F: FnOnce(&mut InterfaceCfg<V>),
    {
        let Ok(area_idx) = self.arenas.area_idx(area_id) else {
            return;
        };
        let Ok(iface_idx) = self.arenas.areas[area_idx].iface_idx(ifname)
        else {
            return;
        };
        let iface = &mut self.arenas.interfaces[iface_idx];
        let old_config = iface.config.clone();
        f(&mut iface.config);
        let new_config = iface.config.clone();

        let Some((instance, arenas)) = self.as_up() else {
            return;
        };
        let area = &arenas.areas[area_idx];
        let iface = &mut arenas.interfaces[iface_idx];

        // Timer, type and authentication changes invalidate existing
        // adjacencies; restart the interface. Cost and priority changes
        // are applied in place.
        if old_config.if_type != new_config.if_type
            || old_config.hello_interval != new_config.hello_interval
            || old_config.dead_interval != new_config.dead_interval
            || old_config.passive != new_config.passive
            || old_config.instance_id != new_config.instance_id
            || old_config.enabled != new_config.enabled
        {
            iface.reset(
                area,
                &instance,
                &mut arenas.neighbors,
                &arenas.lsa_entries,
            );
            iface.update(
                area,
                &instance,
                &mut arenas.neighbors,
                &arenas.lsa_entries,
            );
            return;
        }

        if old_config.auth_simple != new_config.auth_simple
            || old_config.auth_keychain != new_config.auth_keychain
            || old_config.auth_keyid != new_config.auth_keyid
            || old_config.auth_algo != new_config.auth_algo
            || old_config.auth_key != new_config.auth_key
        {
            iface.auth_update(area, &instance);
        }

        if old_config.cost != new_config.cost {
            instance.tx.protocol_input.lsa_orig_event(
                LsaOriginateEvent::InterfaceCostChange { area_id: area.id },
            );
        }

        // Priority changes feed into the next DR election.
        if old_config.priority != new_config.priority
            && iface.state.ism_state >= ism::State::Waiting
        {
            instance.tx.protocol_input.ism_event(
                area.id,
                iface.name.clone(),
                ism::Event::NbrChange,
            );
        }
    }

    // Flushes all self-originated LSAs and rebuilds the database from
    // scratch.
    pub fn clear_database(&mut self) {
        let Some((mut instance, arenas)) = self.as_up() else {
            return;
        };
        crate::lsdb::flush_all_self_originated(&mut instance, arenas);
        instance.state.lsdb.clear(&mut arenas.lsa_entries);
        for (_, area) in arenas.areas.iter_mut() {
            area.state.lsdb.clear(&mut arenas.lsa_entries);
            for iface_idx in area.iface_indexes() {
                let iface = &mut arenas.interfaces[iface_idx];
                iface.state.lsdb.clear(&mut arenas.lsa_entries);
            }
        }
        self.reset();
    }

    // ===== inspection =====

    // Returns an iterator over the configured areas.
    pub fn areas(&self) -> impl Iterator<Item = &Area<V>> {
        self.arenas.areas.iter().map(|(_, area)| area)
    }

    // Returns an iterator over all neighbors, grouped by interface.
    pub fn neighbors(
        &self,
    ) -> impl Iterator<Item = &crate::neighbor::Neighbor<V>> {
        self.arenas
            .areas
            .iter()
            .flat_map(|(_, area)| area.iface_indexes())
            .flat_map(|iface_idx| {
                self.arenas.interfaces[iface_idx].nbr_indexes()
            })
            .map(|nbr_idx| &self.arenas.neighbors[nbr_idx])
    }

    // Returns an iterator over the LSAs of an area's LSDB.
    pub fn area_lsdb_entries(
        &self,
        area_id: Ipv4Addr,
    ) -> impl Iterator<Item = &crate::packet::lsa::Lsa<V>> {
        self.arenas
            .area_idx(area_id)
            .into_iter()
            .flat_map(|area_idx| {
                self.arenas.areas[area_idx]
                    .state
                    .lsdb
                    .iter(&self.arenas.lsa_entries)
            })
            .map(|(_, lse)| &*lse.data)
    }

    // Returns an iterator over the LSAs of the AS-scope LSDB.
    pub fn as_lsdb_entries(
        &self,
    ) -> impl Iterator<Item = &crate::packet::lsa::Lsa<V>> {
        self.state
            .iter()
            .flat_map(|state| state.lsdb.iter(&self.arenas.lsa_entries))
            .map(|(_, lse)| &*lse.data)
    }

    // Returns the number of LSAs and the sum of their checksums for an
    // area's LSDB.
    pub fn area_lsdb_summary(&self, area_id: Ipv4Addr) -> Option<(u32, u32)> {
        self.arenas.area_idx(area_id).ok().map(|area_idx| {
            let lsdb = &self.arenas.areas[area_idx].state.lsdb;
            (lsdb.lsa_count(), lsdb.cksum_sum())
        })
    }

    // ===== helper methods =====

    fn area_reset(&mut self, area_id: Ipv4Addr) {
        let Some((instance, arenas)) = self.as_up() else {
            return;
        };
        let Ok(area_idx) = arenas.area_idx(area_id) else {
            return;
        };
        let area = &arenas.areas[area_idx];
        for iface_idx in area.iface_indexes() {
            let iface = &mut arenas.interfaces[iface_idx];
            if !iface.is_down() {
                iface.reset(
                    area,
                    &instance,
                    &mut arenas.neighbors,
                    &arenas.lsa_entries,
                );
            }
        }
    }

    fn schedule_spf_config_change(&mut self) {
        if let Some((instance, _)) = self.as_up() {
            instance
                .tx
                .protocol_input
                .spf_delay_event(spf::fsm::Event::ConfigChange);
        }
    }
}
