//
// Copyright (c) The Ospfd Project Contributors
//
// SPDX-License-Identifier: MIT
//

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap, btree_map};
use std::net::Ipv4Addr;
use std::ops::Bound;
use std::sync::Arc;

use bitflags::bitflags;
use chrono::Utc;
use ospfd_utils::UnboundedSender;
use ospfd_utils::task::TimeoutTask;
use serde::{Deserialize, Serialize};

use crate::area::{Area, AreaType};
use crate::collections::{AreaIndex, Arena, InterfaceIndex, LsaEntryIndex};
use crate::debug;
use crate::error::Error;
use crate::flood::flood;
use crate::instance::{InstanceArenas, InstanceUpView};
use crate::interface::Interface;
use crate::packet::lsa::{Lsa, LsaBodyVersion, LsaHdrVersion, LsaKey};
use crate::route::{SummaryNet, SummaryRtr};
use crate::spf::{self, SpfExternalNetwork, SpfTriggerLsa};
use crate::tasks;
use crate::tasks::messages::input::LsaFlushMsg;
use crate::version::Version;

// Architectural constants (RFC 2328 appendix B).
pub const LSA_REFRESH_TIME: u16 = 1800;
pub const LSA_MAX_AGE: u16 = 3600;
pub const LSA_MAX_AGE_DIFF: u16 = 900;
pub const LSA_INFINITY: u32 = 0x00ffffff;
pub const LSA_INIT_SEQ_NO: u32 = 0x80000001;
pub const LSA_MAX_SEQ_NO: u32 = 0x7fffffff;
pub const LSA_RESERVED_SEQ_NO: u32 = 0x80000000;
pub const LSA_MIN_INTERVAL: u64 = 5;
pub const LSA_MIN_ARRIVAL: u64 = 1;
pub const LSDB_CHECK_AGE: u64 = 300;
pub const MAX_LINK_METRIC: u16 = 0xffff;

// Identity of one link state database within the instance. This is what
// timers and queued events carry; by the time they fire, the area or
// interface may be gone, and resolution fails cleanly.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum LsdbKey {
    As,
    Area(Ipv4Addr),
    Link(Ipv4Addr, String),
}

// Resolved counterpart of `LsdbKey`, valid only within the current
// event-processing pass. Engine internals pass this around so that lookups
// happen once, at the event boundary.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LsdbRef {
    As,
    Area(AreaIndex),
    Link(AreaIndex, InterfaceIndex),
}

// One link state database: the AS-scope one, an area's, or a link's.
//
// LSA entries live in the instance-wide arena; the database holds their
// keys in (type, advertising router, ID) order, which is also the order
// database exchange walks.
#[derive(Debug)]
pub struct Lsdb<V: Version> {
    key: LsdbKey,
    entries: BTreeMap<LsaKey<V::LsaType>, LsaEntryIndex>,
    // Keys of entries sitting at MaxAge, awaiting the periodic sweep that
    // removes them once no neighbor retains them.
    maxage: BTreeSet<LsaKey<V::LsaType>>,
    // Originations postponed by MinLSInterval.
    pub delayed_orig: HashMap<LsaKey<V::LsaType>, LsaDelayedOrig<V>>,
    // Replacement instances waiting for a sequence number wrap: the old
    // instance is flushed first, and these are originated once it is gone.
    pub pending_wrap: HashMap<LsaKey<V::LsaType>, Lsa<V>>,
    lsa_count: u32,
    cksum_sum: u32,
}

#[derive(Debug)]
pub struct LsaEntry<V: Version> {
    // Shared with neighbor retransmission lists and the summary caches.
    pub data: Arc<Lsa<V>>,
    // Fires when the LSA reaches MaxAge.
    pub expiry_timer: Option<TimeoutTask>,
    // Fires LSRefreshTime after a self-origination.
    pub refresh_timer: Option<TimeoutTask>,
    pub flags: LsaEntryFlags,
}

bitflags! {
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    pub struct LsaEntryFlags: u8 {
        const RECEIVED = 0x01;
        const SELF_ORIGINATED = 0x02;
    }
}

// Why an LSA is being withdrawn from the database.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum LsaFlushReason {
    Expiry,
    PrematureAging,
    Corruption,
}

// Events after which some self-originated LSAs must be reissued or
// flushed. Which ones is a per-version decision.
#[derive(Debug)]
pub enum LsaOriginateEvent<V: Version> {
    AreaStart {
        area_id: Ipv4Addr,
    },
    InterfaceStateChange {
        area_id: Ipv4Addr,
        ifname: String,
    },
    InterfaceDrChange {
        area_id: Ipv4Addr,
        ifname: String,
    },
    InterfaceAddrAddDel {
        area_id: Ipv4Addr,
        ifname: String,
    },
    InterfaceCostChange {
        area_id: Ipv4Addr,
    },
    NeighborToFromFull {
        area_id: Ipv4Addr,
        ifname: String,
    },
    NeighborInterfaceIdChange {
        area_id: Ipv4Addr,
        ifname: String,
    },
    LinkLsaRcvd {
        area_id: Ipv4Addr,
        ifname: String,
    },
    SelfOriginatedLsaRcvd {
        lsdb_key: LsdbKey,
        lsa_key: LsaKey<V::LsaType>,
    },
}

#[derive(Debug)]
pub struct LsaDelayedOrig<V: Version> {
    pub data: Lsa<V>,
    pub timeout: TimeoutTask,
}

// OSPF version-specific code.
pub trait LsdbVersion<V: Version> {
    // Whether the given area and/or neighbor can accept the LSA type.
    fn lsa_type_is_valid(
        area_type: Option<AreaType>,
        nbr_options: Option<V::PacketOptions>,
        lsa_type: V::LsaType,
    ) -> bool;

    // Whether the LSA counts as self-originated (RFC 2328 section 13.4).
    fn lsa_is_self_originated(
        lsa: &Lsa<V>,
        router_id: Ipv4Addr,
        interfaces: &Arena<Interface<V>>,
    ) -> bool;

    // Originate or flush whatever the event calls for.
    fn lsa_orig_event(
        instance: &InstanceUpView<'_, V>,
        arenas: &InstanceArenas<V>,
        event: LsaOriginateEvent<V>,
    ) -> Result<(), Error<V>>;

    // Originate an inter-area network summary into the given area,
    // returning the Link State ID used.
    fn lsa_orig_inter_area_network(
        area: &mut Area<V>,
        instance: &InstanceUpView<'_, V>,
        prefix: V::IpNetwork,
        lsa_id: Option<Ipv4Addr>,
        summary: &SummaryNet<V>,
    ) -> Ipv4Addr;

    // Originate an inter-area router summary into the given area,
    // returning the Link State ID used.
    fn lsa_orig_inter_area_router(
        area: &mut Area<V>,
        instance: &InstanceUpView<'_, V>,
        router_id: Ipv4Addr,
        lsa_id: Option<Ipv4Addr>,
        summary: &SummaryRtr<V>,
    ) -> Ipv4Addr;

    // Originate the external LSAs (Type-5, and Type-7 where NSSAs call for
    // it) describing a redistributed route.
    fn lsa_orig_external(
        instance: &mut InstanceUpView<'_, V>,
        arenas: &InstanceArenas<V>,
        prefix: V::IpNetwork,
        route: &ospfd_utils::policy::ExternalRoute,
    );

    // Flush the external LSAs describing a withdrawn redistributed route.
    fn lsa_flush_external(
        instance: &mut InstanceUpView<'_, V>,
        arenas: &InstanceArenas<V>,
        prefix: V::IpNetwork,
    );

    // Originate the Type-5 LSA resulting from the border translation of an
    // NSSA Type-7 LSA, returning the Link State ID used.
    fn lsa_orig_translated_type5(
        instance: &mut InstanceUpView<'_, V>,
        prefix: V::IpNetwork,
        old_lsa_id: Option<Ipv4Addr>,
        ext: &SpfExternalNetwork<V>,
    ) -> Ipv4Addr;

    // LSA type of AS-External-LSAs.
    fn external_type() -> V::LsaType;

    // Which database an LSA of this type belongs to, seen from the given
    // interface.
    fn lsdb_ref_by_lsa_type(
        area_idx: AreaIndex,
        iface_idx: InterfaceIndex,
        lsa_type: V::LsaType,
    ) -> LsdbRef;

    // Version-specific installation hook.
    fn lsdb_install(
        instance: &InstanceUpView<'_, V>,
        arenas: &mut InstanceArenas<V>,
        lsdb_ref: LsdbRef,
        lsa: &Lsa<V>,
    );
}

// ===== impl Lsdb =====

impl<V> Lsdb<V>
where
    V: Version,
{
    pub(crate) fn new(key: LsdbKey) -> Lsdb<V> {
        Lsdb {
            key,
            entries: Default::default(),
            maxage: Default::default(),
            delayed_orig: Default::default(),
            pending_wrap: Default::default(),
            lsa_count: 0,
            cksum_sum: 0,
        }
    }

    pub(crate) fn key(&self) -> &LsdbKey {
        &self.key
    }

    pub(crate) fn get<'a>(
        &self,
        lsa_entries: &'a Arena<LsaEntry<V>>,
        lsa_key: &LsaKey<V::LsaType>,
    ) -> Option<(LsaEntryIndex, &'a LsaEntry<V>)> {
        let lse_idx = *self.entries.get(lsa_key)?;
        lsa_entries.get(lse_idx).map(|lse| (lse_idx, lse))
    }

    pub(crate) fn get_mut<'a>(
        &self,
        lsa_entries: &'a mut Arena<LsaEntry<V>>,
        lsa_key: &LsaKey<V::LsaType>,
    ) -> Option<(LsaEntryIndex, &'a mut LsaEntry<V>)> {
        let lse_idx = *self.entries.get(lsa_key)?;
        lsa_entries.get_mut(lse_idx).map(|lse| (lse_idx, lse))
    }

    // Adds an LSA, arming its expiry timer. Any previous instance under the
    // same key must have been deleted first.
    pub(crate) fn insert<'a>(
        &mut self,
        lsa_entries: &'a mut Arena<LsaEntry<V>>,
        data: Arc<Lsa<V>>,
        lsa_flush_tx: &UnboundedSender<LsaFlushMsg<V>>,
    ) -> (LsaEntryIndex, &'a mut LsaEntry<V>) {
        let lsa_key = data.hdr.key();

        let expiry_timer = if data.hdr.is_maxage() {
            self.maxage.insert(lsa_key);
            None
        } else {
            Some(tasks::lsa_expiry_timer(
                self.key.clone(),
                lsa_key,
                &data,
                lsa_flush_tx,
            ))
        };

        self.lsa_count += 1;
        self.cksum_sum = self.cksum_sum.wrapping_add(data.hdr.cksum().into());

        let lse_idx = lsa_entries.insert(LsaEntry {
            data,
            expiry_timer,
            refresh_timer: None,
            flags: Default::default(),
        });
        self.entries.insert(lsa_key, lse_idx);
        (lse_idx, &mut lsa_entries[lse_idx])
    }

    pub(crate) fn delete(
        &mut self,
        lsa_entries: &mut Arena<LsaEntry<V>>,
        lsa_key: &LsaKey<V::LsaType>,
    ) -> Option<LsaEntry<V>> {
        let lse_idx = self.entries.remove(lsa_key)?;
        self.maxage.remove(lsa_key);
        let lse = lsa_entries.remove(lse_idx)?;

        self.lsa_count -= 1;
        self.cksum_sum =
            self.cksum_sum.wrapping_sub(lse.data.hdr.cksum().into());
        Some(lse)
    }

    pub(crate) fn iter<'a>(
        &'a self,
        lsa_entries: &'a Arena<LsaEntry<V>>,
    ) -> impl Iterator<Item = (LsaEntryIndex, &'a LsaEntry<V>)> + 'a {
        self.entries
            .values()
            .filter_map(|lse_idx| {
                lsa_entries.get(*lse_idx).map(|lse| (*lse_idx, lse))
            })
    }

    // All entries of one LSA type, leaning on the key sort order.
    pub(crate) fn iter_by_type<'a>(
        &'a self,
        lsa_entries: &'a Arena<LsaEntry<V>>,
        lsa_type: V::LsaType,
    ) -> impl Iterator<Item = (LsaEntryIndex, &'a LsaEntry<V>)> + 'a {
        self.range(lsa_entries, type_range(lsa_type))
    }

    // All entries of one LSA type from one advertising router.
    pub(crate) fn iter_by_type_advrtr<'a>(
        &'a self,
        lsa_entries: &'a Arena<LsaEntry<V>>,
        lsa_type: V::LsaType,
        adv_rtr: Ipv4Addr,
    ) -> impl Iterator<Item = (LsaEntryIndex, &'a LsaEntry<V>)> + 'a {
        let start = LsaKey::new(lsa_type, adv_rtr, Ipv4Addr::UNSPECIFIED);
        let end = LsaKey::new(lsa_type, adv_rtr, Ipv4Addr::BROADCAST);
        self.range(lsa_entries, (Bound::Included(start), Bound::Included(end)))
    }

    pub(crate) fn maxage_keys(&self) -> Vec<LsaKey<V::LsaType>> {
        self.maxage.iter().copied().collect()
    }

    // Drops every entry, timers included.
    pub(crate) fn clear(&mut self, lsa_entries: &mut Arena<LsaEntry<V>>) {
        for (_, lse_idx) in std::mem::take(&mut self.entries) {
            lsa_entries.remove(lse_idx);
        }
        self.maxage.clear();
        self.delayed_orig.clear();
        self.pending_wrap.clear();
        self.lsa_count = 0;
        self.cksum_sum = 0;
    }

    pub(crate) fn lsa_count(&self) -> u32 {
        self.lsa_count
    }

    pub(crate) fn cksum_sum(&self) -> u32 {
        self.cksum_sum
    }

    fn range<'a>(
        &'a self,
        lsa_entries: &'a Arena<LsaEntry<V>>,
        bounds: (Bound<LsaKey<V::LsaType>>, Bound<LsaKey<V::LsaType>>),
    ) -> impl Iterator<Item = (LsaEntryIndex, &'a LsaEntry<V>)> + 'a {
        self.entries
            .range(bounds)
            .filter_map(|(_, lse_idx)| {
                lsa_entries.get(*lse_idx).map(|lse| (*lse_idx, lse))
            })
    }
}

// ===== global functions =====

// Which of two instances of the same LSA is newer, per the tie-breaking
// chain of RFC 2328 section 13.1: sequence number (signed), checksum,
// MaxAge outranks all other ages, then ages more than MaxAgeDiff apart
// with the younger instance winning.
//
// Greater means `a` is newer; Equal means the instances are considered
// the same.
pub(crate) fn lsa_compare<V>(a: &V::LsaHdr, b: &V::LsaHdr) -> Ordering
where
    V: Version,
{
    (a.seq_no() as i32)
        .cmp(&(b.seq_no() as i32))
        .then_with(|| a.cksum().cmp(&b.cksum()))
        .then_with(|| a.is_maxage().cmp(&b.is_maxage()))
        .then_with(|| {
            if a.age().abs_diff(b.age()) > LSA_MAX_AGE_DIFF {
                b.age().cmp(&a.age())
            } else {
                Ordering::Equal
            }
        })
}

// Body-level equality of two instances (RFC 2328 section 13.2), used to
// decide whether an installation changes anything the routing table could
// depend on.
pub(crate) fn lsa_same_contents<V>(a: &Lsa<V>, b: &Lsa<V>) -> bool
where
    V: Version,
{
    let hdr_len = V::LsaHdr::LENGTH as usize;
    a.hdr.options() == b.hdr.options()
        && a.hdr.is_maxage() == b.hdr.is_maxage()
        && a.hdr.length() == b.hdr.length()
        && a.raw[hdr_len..] == b.raw[hdr_len..]
}

// Whether the entry arrived via flooding within the last MinLSArrival
// second.
pub(crate) fn lsa_min_arrival_check<V>(lse: &LsaEntry<V>) -> bool
where
    V: Version,
{
    lse.flags.contains(LsaEntryFlags::RECEIVED)
        && holding_time_under(lse, LSA_MIN_ARRIVAL)
}

// Whether the entry was self-originated within the last MinLSInterval
// seconds.
fn lsa_min_orig_interval_check<V>(lse: &LsaEntry<V>) -> bool
where
    V: Version,
{
    !lse.flags.contains(LsaEntryFlags::RECEIVED)
        && holding_time_under(lse, LSA_MIN_INTERVAL)
}

fn holding_time_under<V>(lse: &LsaEntry<V>, secs: u64) -> bool
where
    V: Version,
{
    #[cfg(feature = "deterministic")]
    {
        let _ = (lse, secs);
        false
    }
    #[cfg(not(feature = "deterministic"))]
    {
        lse.data
            .base_time
            .is_some_and(|base_time| base_time.elapsed().as_secs() < secs)
    }
}

// Resolves a database key against the current configuration.
pub(crate) fn lsdb_resolve<V>(
    arenas: &InstanceArenas<V>,
    key: &LsdbKey,
) -> Result<LsdbRef, Error<V>>
where
    V: Version,
{
    match key {
        LsdbKey::As => Ok(LsdbRef::As),
        LsdbKey::Area(area_id) => {
            let area_idx = arenas.area_idx(*area_id)?;
            Ok(LsdbRef::Area(area_idx))
        }
        LsdbKey::Link(area_id, ifname) => {
            let area_idx = arenas.area_idx(*area_id)?;
            let iface_idx = arenas.areas[area_idx].iface_idx(ifname)?;
            Ok(LsdbRef::Link(area_idx, iface_idx))
        }
    }
}

// Borrows the database a resolved reference points at.
pub(crate) fn lsdb_get<'a, V>(
    instance_lsdb: &'a Lsdb<V>,
    areas: &'a Arena<Area<V>>,
    interfaces: &'a Arena<Interface<V>>,
    lsdb_ref: LsdbRef,
) -> &'a Lsdb<V>
where
    V: Version,
{
    match lsdb_ref {
        LsdbRef::As => instance_lsdb,
        LsdbRef::Area(area_idx) => &areas[area_idx].state.lsdb,
        LsdbRef::Link(_, iface_idx) => &interfaces[iface_idx].state.lsdb,
    }
}

pub(crate) fn lsdb_get_mut<'a, V>(
    instance_lsdb: &'a mut Lsdb<V>,
    areas: &'a mut Arena<Area<V>>,
    interfaces: &'a mut Arena<Interface<V>>,
    lsdb_ref: LsdbRef,
) -> &'a mut Lsdb<V>
where
    V: Version,
{
    match lsdb_ref {
        LsdbRef::As => instance_lsdb,
        LsdbRef::Area(area_idx) => &mut areas[area_idx].state.lsdb,
        LsdbRef::Link(_, iface_idx) => {
            &mut interfaces[iface_idx].state.lsdb
        }
    }
}

// Installs an LSA (RFC 2328 section 13.2): the old instance leaves every
// retransmission list and the database, the new one takes its place, and a
// routing recalculation is queued when the contents differ.
pub(crate) fn install<V>(
    instance: &mut InstanceUpView<'_, V>,
    arenas: &mut InstanceArenas<V>,
    lsdb_ref: LsdbRef,
    lsa: Arc<Lsa<V>>,
) -> LsaEntryIndex
where
    V: Version,
{
    debug::lsa_install::<V>(&lsa.hdr);
    let lsa_key = lsa.hdr.key();

    rxmt_lists_remove(arenas, lsdb_ref, &lsa);

    let lsdb = lsdb_get_mut(
        &mut instance.state.lsdb,
        &mut arenas.areas,
        &mut arenas.interfaces,
        lsdb_ref,
    );
    let old_lsa = lsdb
        .delete(&mut arenas.lsa_entries, &lsa_key)
        .map(|old_lse| old_lse.data);
    let (lse_idx, lse) = lsdb.insert(
        &mut arenas.lsa_entries,
        lsa.clone(),
        &instance.tx.protocol_input.lsa_flush,
    );

    if V::lsa_is_self_originated(
        &lse.data,
        instance.state.router_id,
        &arenas.interfaces,
    ) {
        lse.flags.insert(LsaEntryFlags::SELF_ORIGINATED);
    }
    let self_originated = lse.flags.contains(LsaEntryFlags::SELF_ORIGINATED);

    V::lsdb_install(instance, arenas, lsdb_ref, &lsa);

    // No recalculation when the contents are unchanged, when the type isn't
    // understood, or for the router's own summaries (those reflect the
    // routing table rather than feed it).
    let contents_changed = match &old_lsa {
        Some(old_lsa) => !lsa_same_contents(old_lsa, &lsa),
        None => true,
    };
    let own_summary = self_originated
        && (lsa.hdr.lsa_type() == V::inter_area_network_type()
            || lsa.hdr.lsa_type() == V::inter_area_router_type());
    if contents_changed && !lsa.body.is_unknown() && !own_summary {
        instance
            .state
            .spf_trigger_lsas
            .push(SpfTriggerLsa::new(old_lsa, lsa));
        instance
            .tx
            .protocol_input
            .spf_delay_event(spf::fsm::Event::Igp);
    }

    lse_idx
}

// Originates an LSA instance: installs it, floods it, and arms the
// refresh timer.
//
// A sequence number that would pass MaxSequenceNumber forces the rollover
// procedure of RFC 2328 section 12.1.6 instead: the current instance is
// prematurely aged out of the routing domain, and the replacement waits in
// `pending_wrap` until the flush completes.
pub(crate) fn originate<V>(
    instance: &mut InstanceUpView<'_, V>,
    arenas: &mut InstanceArenas<V>,
    lsdb_ref: LsdbRef,
    lsa: Lsa<V>,
) where
    V: Version,
{
    let lsa_key = lsa.hdr.key();

    if lsa.hdr.seq_no() == LSA_MAX_SEQ_NO.wrapping_add(1) {
        let lsdb = lsdb_get_mut(
            &mut instance.state.lsdb,
            &mut arenas.areas,
            &mut arenas.interfaces,
            lsdb_ref,
        );
        if lsdb.get(&arenas.lsa_entries, &lsa_key).is_some() {
            lsdb.pending_wrap.insert(lsa_key, lsa);
            flush(
                instance,
                arenas,
                lsdb_ref,
                &lsa_key,
                LsaFlushReason::PrematureAging,
            );
            return;
        }
    }

    debug::lsa_originate::<V>(&lsa.hdr);

    let lse_idx = install(instance, arenas, lsdb_ref, Arc::new(lsa));

    let lse = &arenas.lsa_entries[lse_idx];
    flood(
        instance,
        &arenas.areas,
        &mut arenas.interfaces,
        &mut arenas.neighbors,
        lsdb_ref,
        &lse.data.clone(),
        None,
    );

    instance.state.orig_lsa_count += 1;
    instance.state.discontinuity_time = Utc::now();

    let lsdb = lsdb_get(
        &instance.state.lsdb,
        &arenas.areas,
        &arenas.interfaces,
        lsdb_ref,
    );
    let refresh_timer = tasks::lsa_refresh_timer(
        lsdb.key().clone(),
        lsa_key,
        &instance.tx.protocol_input.lsa_refresh,
    );
    arenas.lsa_entries[lse_idx].refresh_timer = Some(refresh_timer);
}

// Entry point for (re)origination requests: builds the instance with the
// next sequence number, then suppresses it when nothing changed or defers
// it when MinLSInterval hasn't elapsed (RFC 2328 section 12.4).
pub(crate) fn originate_check<V>(
    instance: &mut InstanceUpView<'_, V>,
    arenas: &mut InstanceArenas<V>,
    lsdb_ref: LsdbRef,
    options: Option<V::PacketOptions>,
    lsa_id: Ipv4Addr,
    lsa_body: V::LsaBody,
) where
    V: Version,
{
    let adv_rtr = instance.state.router_id;
    let lsa_key = LsaKey::new(lsa_body.lsa_type(), adv_rtr, lsa_id);

    let lsdb = lsdb_get_mut(
        &mut instance.state.lsdb,
        &mut arenas.areas,
        &mut arenas.interfaces,
        lsdb_ref,
    );
    let old_lse = lsdb
        .get(&arenas.lsa_entries, &lsa_key)
        .map(|(_, old_lse)| old_lse);
    let seq_no = old_lse
        .map(|old_lse| old_lse.data.hdr.seq_no().wrapping_add(1))
        .unwrap_or(LSA_INIT_SEQ_NO);
    let lsa = Lsa::new(0, options, lsa_id, adv_rtr, seq_no, lsa_body);

    if let Some(old_lse) = old_lse {
        // A database copy with the same contents makes reorigination
        // pointless, unless that copy arrived via flooding and must be
        // superseded.
        if lsa_same_contents(&old_lse.data, &lsa)
            && !old_lse.flags.contains(LsaEntryFlags::RECEIVED)
        {
            return;
        }

        if lsdb.delayed_orig.contains_key(&lsa_key)
            || lsa_min_orig_interval_check(old_lse)
        {
            debug::lsa_originate_deferred::<V>(&lsa.hdr);
            let base_time = old_lse.data.base_time;
            let lsdb_key = lsdb.key().clone();
            match lsdb.delayed_orig.entry(lsa_key) {
                std::collections::hash_map::Entry::Occupied(mut o) => {
                    // Latest contents win; the pending timeout stands.
                    o.get_mut().data = lsa;
                }
                std::collections::hash_map::Entry::Vacant(v) => {
                    let timeout = tasks::lsa_orig_delayed_timer(
                        lsdb_key,
                        lsa_key,
                        base_time,
                        &instance.tx.protocol_input.lsa_orig_delayed_timer,
                    );
                    v.insert(LsaDelayedOrig { data: lsa, timeout });
                }
            }
            return;
        }
    }

    originate(instance, arenas, lsdb_ref, lsa);
}

// Withdraws an LSA by prematurely aging it to MaxAge and reflooding
// (RFC 2328 section 14.1). The entry itself lingers until the periodic
// sweep finds no neighbor still holding it.
pub(crate) fn flush<V>(
    instance: &mut InstanceUpView<'_, V>,
    arenas: &mut InstanceArenas<V>,
    lsdb_ref: LsdbRef,
    lsa_key: &LsaKey<V::LsaType>,
    reason: LsaFlushReason,
) where
    V: Version,
{
    let lsdb = lsdb_get_mut(
        &mut instance.state.lsdb,
        &mut arenas.areas,
        &mut arenas.interfaces,
        lsdb_ref,
    );
    lsdb.delayed_orig.remove(lsa_key);
    let Some((_, lse)) = lsdb.get_mut(&mut arenas.lsa_entries, lsa_key)
    else {
        return;
    };

    // Flushing an already MaxAge instance again would reflood it for
    // nothing.
    if lse.data.hdr.is_maxage() {
        return;
    }

    debug::lsa_flush::<V>(&lse.data.hdr, reason);

    lse.expiry_timer = None;
    lse.refresh_timer = None;

    let mut lsa = (*lse.data).clone();
    lsa.set_maxage();
    let lsa = Arc::new(lsa);

    // Reinstall at MaxAge (clearing stale retransmissions and rerunning
    // route computation), then flood the aged instance.
    let lse_idx = install(instance, arenas, lsdb_ref, lsa);
    let lsa = arenas.lsa_entries[lse_idx].data.clone();
    flood(
        instance,
        &arenas.areas,
        &mut arenas.interfaces,
        &mut arenas.neighbors,
        lsdb_ref,
        &lsa,
        None,
    );
}

// Prematurely ages every self-originated LSA, used when the instance shuts
// down or its Router ID changes.
pub(crate) fn flush_all_self_originated<V>(
    instance: &mut InstanceUpView<'_, V>,
    arenas: &mut InstanceArenas<V>,
) where
    V: Version,
{
    let mut pending = vec![];

    let self_originated_keys = |lsdb: &Lsdb<V>, lsdb_ref: LsdbRef| {
        lsdb.iter(&arenas.lsa_entries)
            .filter(|(_, lse)| {
                lse.flags.contains(LsaEntryFlags::SELF_ORIGINATED)
            })
            .map(|(_, lse)| (lsdb_ref, lse.data.hdr.key()))
            .collect::<Vec<_>>()
    };

    pending.extend(self_originated_keys(&instance.state.lsdb, LsdbRef::As));
    for (area_idx, area) in arenas.areas.iter() {
        pending.extend(
            self_originated_keys(&area.state.lsdb, LsdbRef::Area(area_idx)),
        );
        for iface_idx in area.iface_indexes() {
            let iface = &arenas.interfaces[iface_idx];
            pending.extend(self_originated_keys(
                &iface.state.lsdb,
                LsdbRef::Link(area_idx, iface_idx),
            ));
        }
    }

    for (lsdb_ref, lsa_key) in pending {
        flush(
            instance,
            arenas,
            lsdb_ref,
            &lsa_key,
            LsaFlushReason::PrematureAging,
        );
    }
}

// Drops superseded instances from every retransmission list that could
// hold one (scoped by the database the new instance goes into).
fn rxmt_lists_remove<V>(
    arenas: &mut InstanceArenas<V>,
    lsdb_ref: LsdbRef,
    lsa: &Lsa<V>,
) where
    V: Version,
{
    let lsa_key = lsa.hdr.key();

    for (area_idx, area) in arenas.areas.iter() {
        if let LsdbRef::Area(scope_area) | LsdbRef::Link(scope_area, _) =
            lsdb_ref
            && scope_area != area_idx
        {
            continue;
        }

        for iface_idx in area.iface_indexes() {
            if let LsdbRef::Link(_, scope_iface) = lsdb_ref
                && scope_iface != iface_idx
            {
                continue;
            }

            for nbr_idx in
                arenas.interfaces[iface_idx].nbr_indexes().collect::<Vec<_>>()
            {
                let nbr = &mut arenas.neighbors[nbr_idx];
                if let btree_map::Entry::Occupied(o) =
                    nbr.lists.ls_rxmt.entry(lsa_key)
                    && lsa_compare::<V>(&o.get().hdr, &lsa.hdr)
                        == Ordering::Less
                {
                    o.remove();
                    nbr.rxmt_lsupd_stop_check();
                }
            }
        }
    }
}

// Removes MaxAge LSAs that no neighbor retains and no neighbor could still
// request (RFC 2328 section 14), and issues any origination that was
// waiting for a sequence number wrap to complete.
pub(crate) fn maxage_sweep<V>(
    instance: &mut InstanceUpView<'_, V>,
    arenas: &mut InstanceArenas<V>,
) where
    V: Version,
{
    // A neighbor in Exchange or Loading may still legitimately request any
    // LSA it saw described; removal waits.
    if arenas
        .neighbors
        .iter()
        .any(|(_, nbr)| nbr.state.is_database_exchange())
    {
        return;
    }

    let mut scopes = vec![LsdbRef::As];
    for (area_idx, area) in arenas.areas.iter() {
        scopes.push(LsdbRef::Area(area_idx));
        scopes.extend(
            area.iface_indexes()
                .map(|iface_idx| LsdbRef::Link(area_idx, iface_idx)),
        );
    }

    for lsdb_ref in scopes {
        let lsdb = lsdb_get(
            &instance.state.lsdb,
            &arenas.areas,
            &arenas.interfaces,
            lsdb_ref,
        );
        for lsa_key in lsdb.maxage_keys() {
            let retained = arenas
                .neighbors
                .iter()
                .any(|(_, nbr)| nbr.lists.ls_rxmt.contains_key(&lsa_key));
            if retained {
                continue;
            }

            let lsdb = lsdb_get_mut(
                &mut instance.state.lsdb,
                &mut arenas.areas,
                &mut arenas.interfaces,
                lsdb_ref,
            );
            lsdb.delete(&mut arenas.lsa_entries, &lsa_key);

            // The flush that preceded a sequence number wrap is complete;
            // originate the replacement.
            if let Some(lsa) = lsdb.pending_wrap.remove(&lsa_key) {
                originate(instance, arenas, lsdb_ref, lsa);
            }
        }
    }
}

// ===== helper functions =====

fn type_range<T>(
    lsa_type: T,
) -> (Bound<LsaKey<T>>, Bound<LsaKey<T>>)
where
    T: crate::packet::lsa::LsaTypeVersion,
{
    let start =
        LsaKey::new(lsa_type, Ipv4Addr::UNSPECIFIED, Ipv4Addr::UNSPECIFIED);
    let end = LsaKey::new(lsa_type, Ipv4Addr::BROADCAST, Ipv4Addr::BROADCAST);
    (Bound::Included(start), Bound::Included(end))
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use crate::ospfv2::packet::Options;
    use crate::ospfv2::packet::lsa::{LsaHdr, LsaTypeCode};
    use crate::version::Ospfv2;

    use super::*;

    fn hdr(age: u16, seq_no: u32, cksum: u16) -> LsaHdr {
        LsaHdr {
            age,
            options: Options::E,
            lsa_type: LsaTypeCode::Router.into(),
            lsa_id: Ipv4Addr::new(1, 1, 1, 1),
            adv_rtr: Ipv4Addr::new(1, 1, 1, 1),
            seq_no,
            cksum,
            length: 24,
        }
    }

    #[test]
    fn lsa_compare_seq_no() {
        // Higher sequence number wins, compared as signed values.
        let a = hdr(1, LSA_INIT_SEQ_NO + 1, 0x1111);
        let b = hdr(1, LSA_INIT_SEQ_NO, 0x2222);
        assert_eq!(lsa_compare::<Ospfv2>(&a, &b), Ordering::Greater);

        // Any positive sequence number beats InitialSequenceNumber.
        let a = hdr(1, 0x00000001, 0x1111);
        let b = hdr(1, LSA_INIT_SEQ_NO, 0x1111);
        assert_eq!(lsa_compare::<Ospfv2>(&a, &b), Ordering::Greater);
    }

    #[test]
    fn lsa_compare_cksum() {
        // Equal sequence numbers: larger checksum wins.
        let a = hdr(1, LSA_INIT_SEQ_NO, 0x2222);
        let b = hdr(1, LSA_INIT_SEQ_NO, 0x1111);
        assert_eq!(lsa_compare::<Ospfv2>(&a, &b), Ordering::Greater);
    }

    #[test]
    fn lsa_compare_age() {
        // MaxAge wins over any other age.
        let a = hdr(LSA_MAX_AGE, LSA_INIT_SEQ_NO, 0x1111);
        let b = hdr(10, LSA_INIT_SEQ_NO, 0x1111);
        assert_eq!(lsa_compare::<Ospfv2>(&a, &b), Ordering::Greater);

        // Age difference within MaxAgeDiff: identical.
        let a = hdr(10, LSA_INIT_SEQ_NO, 0x1111);
        let b = hdr(10 + LSA_MAX_AGE_DIFF, LSA_INIT_SEQ_NO, 0x1111);
        assert_eq!(lsa_compare::<Ospfv2>(&a, &b), Ordering::Equal);

        // Age difference beyond MaxAgeDiff: smaller age wins.
        let a = hdr(10, LSA_INIT_SEQ_NO, 0x1111);
        let b = hdr(11 + LSA_MAX_AGE_DIFF, LSA_INIT_SEQ_NO, 0x1111);
        assert_eq!(lsa_compare::<Ospfv2>(&a, &b), Ordering::Greater);
    }
}
