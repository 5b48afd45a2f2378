//
// Copyright (c) The Ospfd Project Contributors
//
// SPDX-License-Identifier: MIT
//

use std::cmp::{Ordering, Reverse};
use std::collections::{BTreeMap, BTreeSet, BinaryHeap, btree_map};
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use derive_new::new;
use ospfd_utils::ip::AddressFamily;

use crate::area::{self, Area};
use crate::collections::Arena;
use crate::debug;
use crate::error::Error;
use crate::instance::{InstanceArenas, InstanceUpView};
use crate::interface::Interface;
use crate::lsdb::{LsaEntry, Lsdb};
use crate::neighbor::Neighbor;
use crate::packet::lsa::{Lsa, LsaKey};
use crate::route::{self, Nexthops};
use crate::tasks;
use crate::version::Version;

#[derive(Debug, new)]
pub struct Vertex<V: Version> {
    pub id: V::VertexId,
    pub lsa: V::VertexLsa,
    pub distance: u16,
    pub hops: u16,
    #[new(default)]
    pub nexthops: Nexthops<V::IpAddr>,
}

#[derive(Debug)]
pub enum SpfComputation<V: Version> {
    Full,
    Partial(SpfPartialComputation<V>),
}

// Destinations to recompute without a full SPF run. Only summary and
// AS-external changes qualify; topological changes always force a full
// run.
#[derive(Debug)]
pub struct SpfPartialComputation<V: Version> {
    pub inter_network: BTreeSet<V::IpNetwork>,
    pub inter_router: BTreeSet<Ipv4Addr>,
    pub external: BTreeSet<V::IpNetwork>,
}

#[derive(Debug, new)]
pub struct SpfLink<'a, V: Version> {
    pub parent: Option<&'a V::LsaRouterLink>,
    pub id: V::VertexId,
    pub lsa: V::VertexLsa,
    pub cost: u16,
}

#[derive(Debug)]
pub struct SpfIntraAreaNetwork<'a, V: Version> {
    pub vertex: &'a Vertex<V>,
    pub prefix: V::IpNetwork,
    pub prefix_options: V::PrefixOptions,
    pub metric: u16,
}

#[derive(Debug)]
pub struct SpfInterAreaNetwork<V: Version> {
    pub adv_rtr: Ipv4Addr,
    pub prefix: V::IpNetwork,
    pub prefix_options: V::PrefixOptions,
    pub metric: u32,
}

#[derive(Debug)]
pub struct SpfInterAreaRouter<V: Version> {
    pub adv_rtr: Ipv4Addr,
    pub router_id: Ipv4Addr,
    pub options: V::PacketOptions,
    pub flags: V::LsaRouterFlags,
    pub metric: u32,
}

// External destination described by a Type-5 or Type-7 LSA.
#[derive(Clone, Debug)]
pub struct SpfExternalNetwork<V: Version> {
    pub adv_rtr: Ipv4Addr,
    pub e_bit: bool,
    pub prefix: V::IpNetwork,
    pub prefix_options: V::PrefixOptions,
    pub metric: u32,
    pub fwd_addr: Option<V::IpAddr>,
    pub tag: Option<u32>,
    // Type-7 only: whether the P-bit requests border translation.
    pub propagate: bool,
}

#[derive(Debug, new)]
pub struct SpfTriggerLsa<V: Version> {
    pub old: Option<Arc<Lsa<V>>>,
    pub new: Arc<Lsa<V>>,
}

// OSPF version-specific code.
pub trait SpfVersion<V: Version> {
    type VertexId: VertexIdVersion;
    type VertexLsa: VertexLsaVersion<V>;

    // Determine which computations are necessary to handle the trigger
    // LSAs that are provided as input.
    fn spf_computation_type(
        trigger_lsas: &[SpfTriggerLsa<V>],
    ) -> SpfComputation<V>;

    // Compute the set of nexthops that should be used to reach the given
    // destination.
    fn calc_nexthops(
        area: &Area<V>,
        parent: &Vertex<V>,
        parent_link: Option<&V::LsaRouterLink>,
        dest_id: V::VertexId,
        dest_lsa: &V::VertexLsa,
        interfaces: &Arena<Interface<V>>,
        neighbors: &Arena<Neighbor<V>>,
        lsa_entries: &Arena<LsaEntry<V>>,
    ) -> Result<Nexthops<V::IpAddr>, Error<V>>;

    // Find SPF vertex.
    fn vertex_lsa_find(
        af: AddressFamily,
        id: V::VertexId,
        area: &Area<V>,
        lsa_entries: &Arena<LsaEntry<V>>,
    ) -> Option<V::VertexLsa>;

    // Return iterator over all links of the provided SPF vertex.
    fn vertex_lsa_links<'a>(
        vertex_lsa: &'a Self::VertexLsa,
        af: AddressFamily,
        area: &'a Area<V>,
        lsa_entries: &'a Arena<LsaEntry<V>>,
    ) -> Box<dyn Iterator<Item = SpfLink<'a, V>> + 'a>;

    // Return iterator over all intra-area networks.
    fn intra_area_networks<'a>(
        area: &'a Area<V>,
        lsa_entries: &'a Arena<LsaEntry<V>>,
    ) -> Box<dyn Iterator<Item = SpfIntraAreaNetwork<'a, V>> + 'a>;

    // Return iterator over all inter-area networks.
    fn inter_area_networks<'a>(
        area: &'a Area<V>,
        lsa_entries: &'a Arena<LsaEntry<V>>,
    ) -> Box<dyn Iterator<Item = SpfInterAreaNetwork<V>> + 'a>;

    // Return iterator over all inter-area routers.
    fn inter_area_routers<'a>(
        lsdb: &'a Lsdb<V>,
        lsa_entries: &'a Arena<LsaEntry<V>>,
    ) -> Box<dyn Iterator<Item = SpfInterAreaRouter<V>> + 'a>;

    // Return iterator over all AS external networks (Type-5).
    fn external_networks<'a>(
        lsdb: &'a Lsdb<V>,
        lsa_entries: &'a Arena<LsaEntry<V>>,
    ) -> Box<dyn Iterator<Item = SpfExternalNetwork<V>> + 'a>;

    // Return iterator over the NSSA external networks (Type-7) of an area.
    fn nssa_externals<'a>(
        area: &'a Area<V>,
        lsa_entries: &'a Arena<LsaEntry<V>>,
    ) -> Box<dyn Iterator<Item = SpfExternalNetwork<V>> + 'a>;
}

// OSPF version-specific code.
//
// NOTE: network vertices must be ordered before router vertices in order
// for the SPF algorithm to find all equal-cost paths.
pub trait VertexIdVersion
where
    Self: Send
        + Sync
        + Clone
        + Copy
        + std::fmt::Debug
        + Eq
        + Ord
        + PartialEq
        + PartialOrd,
{
    // Create root SPF vertex.
    fn new_root(router_id: Ipv4Addr) -> Self;
}

// OSPF version-specific code.
pub trait VertexLsaVersion<V: Version>
where
    Self: Send + Sync + std::fmt::Debug,
{
    // Return whether this is a router vertex.
    fn is_router(&self) -> bool;

    // Return whether the V-bit of this router vertex is set.
    fn router_v_bit(&self) -> bool;

    // Return the Router-ID of this router vertex.
    fn router_id(&self) -> Ipv4Addr;

    // Return the options of this router vertex.
    fn router_options(&self) -> V::PacketOptions;

    // Return the flags of this router vertex.
    fn router_flags(&self) -> V::LsaRouterFlags;

    // Return the Link State Origin of this vertex.
    fn origin(&self) -> LsaKey<V::LsaType>;
}

// SPF Delay State Machine (RFC 8405): rapid LSDB churn pushes the delay
// from the initial value towards the long delay, and a quiet period
// resets it.
pub mod fsm {
    use serde::{Deserialize, Serialize};

    #[derive(Clone, Copy, Debug, Default, Eq, Ord, PartialEq, PartialOrd)]
    #[derive(Deserialize, Serialize)]
    pub enum State {
        #[default]
        Quiet,
        ShortWait,
        LongWait,
    }

    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    #[derive(Deserialize, Serialize)]
    pub enum Event {
        Igp,
        DelayTimer,
        HoldDownTimer,
        LearnTimer,
        ConfigChange,
    }
}

// ===== global functions =====

pub(crate) fn fsm<V>(
    event: fsm::Event,
    instance: &mut InstanceUpView<'_, V>,
    arenas: &mut InstanceArenas<V>,
) -> Result<(), Error<V>>
where
    V: Version,
{
    use fsm::{Event, State};

    let state = instance.state.spf_delay_state;
    let new_state = match event {
        // An IGP event starts or prolongs a wait, with the delay growing
        // the longer the churn lasts.
        Event::Igp => match state {
            State::Quiet => {
                schedule_spf(instance, instance.config.spf_initial_delay);

                let task = tasks::spf_delay_timer(
                    instance,
                    Event::LearnTimer,
                    instance.config.spf_time_to_learn,
                );
                instance.state.spf_learn_timer = Some(task);

                let task = tasks::spf_delay_timer(
                    instance,
                    Event::HoldDownTimer,
                    instance.config.spf_hold_down,
                );
                instance.state.spf_hold_down_timer = Some(task);

                Some(State::ShortWait)
            }
            State::ShortWait => {
                restart_hold_down(instance);
                schedule_spf(instance, instance.config.spf_short_delay);
                None
            }
            State::LongWait => {
                restart_hold_down(instance);
                schedule_spf(instance, instance.config.spf_long_delay);
                None
            }
        },
        // The learn period ended with the network still churning.
        Event::LearnTimer => match state {
            State::ShortWait => {
                instance.state.spf_learn_timer = None;
                Some(State::LongWait)
            }
            _ => return Err(Error::SpfUnexpectedEvent(state, event)),
        },
        // A full hold-down of quiet; reset to the initial delay.
        Event::HoldDownTimer => match state {
            State::ShortWait => {
                instance.state.spf_hold_down_timer = None;
                instance.state.spf_learn_timer = None;
                Some(State::Quiet)
            }
            State::LongWait => {
                instance.state.spf_hold_down_timer = None;
                Some(State::Quiet)
            }
            State::Quiet => {
                return Err(Error::SpfUnexpectedEvent(state, event));
            }
        },
        // The scheduled run fires in any state.
        Event::DelayTimer => {
            instance.state.spf_delay_timer = None;
            compute_spf(instance, arenas, false);
            None
        }
        // Forced full run after a configuration change; the delay timers
        // are left alone.
        Event::ConfigChange => {
            instance.state.spf_delay_timer = None;
            compute_spf(instance, arenas, true);
            None
        }
    };

    if let Some(new_state) = new_state
        && new_state != state
    {
        debug::spf_fsm_transition(event, state, new_state);
        instance.state.spf_delay_state = new_state;
    }

    Ok(())
}

// ===== helper functions =====

// Starts the SPF timer with the given delay, unless one is already
// pending.
fn schedule_spf<V>(instance: &mut InstanceUpView<'_, V>, delay: u32)
where
    V: Version,
{
    if instance.state.spf_delay_timer.is_none() {
        let task =
            tasks::spf_delay_timer(instance, fsm::Event::DelayTimer, delay);
        instance.state.spf_delay_timer = Some(task);
    }
}

fn restart_hold_down<V>(instance: &mut InstanceUpView<'_, V>)
where
    V: Version,
{
    if let Some(timer) = &mut instance.state.spf_hold_down_timer {
        let timeout =
            Duration::from_millis(instance.config.spf_hold_down.into());
        timer.reset(Some(timeout));
    }
}

// The SPF main function.
fn compute_spf<V>(
    instance: &mut InstanceUpView<'_, V>,
    arenas: &mut InstanceArenas<V>,
    force_full_run: bool,
) where
    V: Version,
{
    // The LSAs that changed since the last run decide how much work is
    // needed.
    let trigger_lsas = std::mem::take(&mut instance.state.spf_trigger_lsas);
    let mut computation = match force_full_run {
        true => SpfComputation::Full,
        false => V::spf_computation_type(&trigger_lsas),
    };

    match &mut computation {
        SpfComputation::Full => {
            for (_, area) in arenas.areas.iter_mut() {
                run_area(
                    area,
                    instance,
                    &arenas.interfaces,
                    &arenas.neighbors,
                    &arenas.lsa_entries,
                );
            }

            route::update_rib_full(
                instance,
                &mut arenas.areas,
                &arenas.interfaces,
                &arenas.lsa_entries,
            );
        }
        SpfComputation::Partial(partial) => {
            route::update_rib_partial(
                partial,
                instance,
                &mut arenas.areas,
                &arenas.interfaces,
                &arenas.lsa_entries,
            );
        }
    }

    // Update summary LSAs and NSSA border translation.
    area::update_summary_lsas(
        instance,
        &mut arenas.areas,
        &arenas.interfaces,
        &arenas.lsa_entries,
    );
    area::update_nssa_translation(
        instance,
        &mut arenas.areas,
        &arenas.interfaces,
        &arenas.lsa_entries,
    );

    // Resolve virtual link endpoints from the updated routing tables.
    area::update_virtual_links(instance, arenas);

    instance.state.spf_last_time = Some(Instant::now());
}

// Dijkstra over the directed graph of routers and transit networks in one
// area, rooted at this router (RFC 2328 section 16.1).
//
// The priority queue holds (distance, vertex ID) pairs and tolerates
// stale entries: when a vertex is reached more cheaply after being
// queued, the better entry is pushed alongside and the stale one is
// skipped when popped. Sorting by ID second pops network vertices before
// router vertices at the same distance, which equal-cost path collection
// depends on.
fn run_area<V>(
    area: &mut Area<V>,
    instance: &mut InstanceUpView<'_, V>,
    interfaces: &Arena<Interface<V>>,
    neighbors: &Arena<Neighbor<V>>,
    lsa_entries: &Arena<LsaEntry<V>>,
) where
    V: Version,
{
    let af = instance.state.af;
    area.state.transit_capability = false;

    let root_vid = V::VertexId::new_root(instance.state.router_id);
    let Some(root_vlsa) = V::vertex_lsa_find(af, root_vid, area, lsa_entries)
    else {
        Error::<V>::SpfRootMissing(area.id).log();
        return;
    };

    let mut spt = BTreeMap::new();
    let mut candidates = BTreeMap::new();
    let mut queue = BinaryHeap::new();
    candidates.insert(root_vid, Vertex::<V>::new(root_vid, root_vlsa, 0, 0));
    queue.push(Reverse((0, root_vid)));

    area.state.routers.clear();

    while let Some(Reverse((distance, vertex_id))) = queue.pop() {
        // Skip stale queue entries.
        let Some(vertex) = candidates.get(&vertex_id) else {
            continue;
        };
        if vertex.distance != distance {
            continue;
        }

        // The closest remaining candidate joins the tree.
        let vertex = candidates.remove(&vertex_id).unwrap();
        spt.insert(vertex_id, vertex);
        let vertex = &spt[&vertex_id];

        if vertex.lsa.is_router() {
            let route = route::RouteRtr::new(
                area.id,
                route::PathType::IntraArea,
                vertex.lsa.router_options(),
                vertex.lsa.router_flags(),
                vertex.distance.into(),
                vertex.nexthops.clone(),
            );
            area.state.routers.insert(vertex.lsa.router_id(), route);

            if vertex.lsa.router_v_bit() {
                area.state.transit_capability = true;
            }
        }

        for link in V::vertex_lsa_links(&vertex.lsa, af, area, lsa_entries) {
            // Only bidirectional links enter the tree.
            if !V::vertex_lsa_links(&link.lsa, af, area, lsa_entries)
                .any(|rlink| rlink.id == vertex.id)
            {
                continue;
            }

            if spt.contains_key(&link.id) {
                continue;
            }

            let distance = vertex.distance.saturating_add(link.cost);
            let mut hops = vertex.hops;
            if link.lsa.is_router() {
                hops = hops.saturating_add(1);
            }

            // Relax the edge: a shorter path replaces the candidate, an
            // equal-cost path merges its nexthops, a longer one is
            // discarded.
            let cand = match candidates.entry(link.id) {
                btree_map::Entry::Vacant(v) => {
                    queue.push(Reverse((distance, link.id)));
                    v.insert(Vertex::new(link.id, link.lsa, distance, hops))
                }
                btree_map::Entry::Occupied(o) => {
                    let cand = o.into_mut();
                    match distance.cmp(&cand.distance) {
                        Ordering::Less => {
                            queue.push(Reverse((distance, link.id)));
                            *cand =
                                Vertex::new(link.id, link.lsa, distance, hops);
                            cand
                        }
                        Ordering::Equal => cand,
                        Ordering::Greater => continue,
                    }
                }
            };

            match calc_nexthops(
                area,
                vertex,
                link.parent,
                link.id,
                &cand.lsa,
                interfaces,
                neighbors,
                lsa_entries,
            ) {
                Ok(nexthops) => cand.nexthops.extend(nexthops),
                Err(error) => error.log(),
            }
        }
    }

    area.state.spt = spt;

    area.state.spf_run_count += 1;
    area.state.discontinuity_time = Utc::now();
}

// Computes the set of nexthops that should be used to reach the given
// destination.
fn calc_nexthops<V>(
    area: &Area<V>,
    parent: &Vertex<V>,
    parent_link: Option<&V::LsaRouterLink>,
    dest_id: V::VertexId,
    dest_lsa: &V::VertexLsa,
    interfaces: &Arena<Interface<V>>,
    neighbors: &Arena<Neighbor<V>>,
    lsa_entries: &Arena<LsaEntry<V>>,
) -> Result<Nexthops<V::IpAddr>, Error<V>>
where
    V: Version,
{
    if parent.hops == 0 {
        // The parent vertex is the root or a network that directly
        // connects the calculating router to the destination router.
        V::calc_nexthops(
            area,
            parent,
            parent_link,
            dest_id,
            dest_lsa,
            interfaces,
            neighbors,
            lsa_entries,
        )
    } else {
        // With an intervening router on the path, the destination simply
        // inherits the parent's nexthops.
        Ok(parent.nexthops.clone())
    }
}
