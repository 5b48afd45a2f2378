//
// Copyright (c) The Ospfd Project Contributors
//
// SPDX-License-Identifier: MIT
//

use generational_arena::Index;

// Entity handles. Handles are only meaningful for the lifetime of the entity
// they were obtained for; anything that crosses the event loop (timers,
// queued messages) must address entities by their natural keys instead
// (area ID, interface name, neighbor source address, LSA key).
pub type AreaIndex = Index;
pub type InterfaceIndex = Index;
pub type NeighborIndex = Index;
pub type LsaEntryIndex = Index;

// Generational storage for one entity kind.
//
// Areas, interfaces, neighbors and LSA entries live in four separate arenas
// owned by the instance. Keeping them apart is what allows a neighbor FSM
// handler to hold `&mut Neighbor` and `&mut Interface` at the same time;
// the lookup trees (area IDs, interface names, neighbor addresses) are kept
// by the respective owning entity, not here.
#[derive(Debug)]
pub struct Arena<T>(generational_arena::Arena<T>);

// ===== impl Arena =====

impl<T> Arena<T> {
    pub(crate) fn insert(&mut self, value: T) -> Index {
        self.0.insert(value)
    }

    pub(crate) fn remove(&mut self, index: Index) -> Option<T> {
        self.0.remove(index)
    }

    pub(crate) fn get(&self, index: Index) -> Option<&T> {
        self.0.get(index)
    }

    pub(crate) fn get_mut(&mut self, index: Index) -> Option<&mut T> {
        self.0.get_mut(index)
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (Index, &T)> {
        self.0.iter()
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = (Index, &mut T)> {
        self.0.iter_mut()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<T> Default for Arena<T> {
    fn default() -> Arena<T> {
        Arena(Default::default())
    }
}

impl<T> std::ops::Index<Index> for Arena<T> {
    type Output = T;

    fn index(&self, index: Index) -> &T {
        &self.0[index]
    }
}

impl<T> std::ops::IndexMut<Index> for Arena<T> {
    fn index_mut(&mut self, index: Index) -> &mut T {
        &mut self.0[index]
    }
}
