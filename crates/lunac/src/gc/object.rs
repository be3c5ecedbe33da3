//! Generic arena pool used for every GC-managed object kind.
//!
//! Grounded on the teacher's `gc/gc_object.rs::GcPool`: an `IndexMap` keyed by
//! a recycled `u32` id, backed by a free list so ids are reused instead of
//! growing without bound. We generalize it with a `T: Trace` bound and an
//! embedded [`GcHeader`] per slot so minor/major collection can filter by
//! generation without a second map.

use ahash::RandomState;
use indexmap::IndexMap;

use super::ids::GcRef;

/// Mark-sweep color. Two colors are enough here: collection is stop-the-world,
/// so no objects are gray across a yield point the way an incremental
/// collector would need.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GcColor {
    White,
    Black,
}

/// Generation an object currently lives in. Objects are born in `Gen0` and
/// promoted on surviving a minor collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Generation {
    Gen0,
    Gen1,
    Gen2,
}

/// Header embedded in every pool slot alongside the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GcHeader {
    pub color: GcColor,
    pub generation: Generation,
}

impl GcHeader {
    pub fn new_born() -> Self {
        GcHeader { color: GcColor::White, generation: Generation::Gen0 }
    }
}

/// Anything a pool can store must be able to report the live references it
/// holds, so mark can push them onto the worklist without knowing the
/// concrete type.
pub trait Trace {
    fn trace(&self, out: &mut Vec<GcRef>);
}

struct Slot<T> {
    header: GcHeader,
    value: T,
}

/// `IndexMap`-backed arena with free-list id reuse, following the teacher's
/// `GcPool` pattern.
pub struct Pool<T> {
    map: IndexMap<u32, Slot<T>, RandomState>,
    free_list: Vec<u32>,
    next_id: u32,
}

impl<T: Trace> Pool<T> {
    pub fn new() -> Self {
        Pool { map: IndexMap::with_hasher(RandomState::new()), free_list: Vec::new(), next_id: 0 }
    }

    /// Insert a freshly-allocated, Gen0/white object and return its id.
    pub fn insert(&mut self, value: T) -> u32 {
        let id = match self.free_list.pop() {
            Some(id) => id,
            None => {
                let id = self.next_id;
                self.next_id = self.next_id.wrapping_add(1);
                debug_assert!(self.next_id != 0, "gc pool exhausted u32 ids");
                id
            }
        };
        self.map.insert(id, Slot { header: GcHeader::new_born(), value });
        id
    }

    pub fn get(&self, id: u32) -> Option<&T> {
        self.map.get(&id).map(|slot| &slot.value)
    }

    pub fn get_mut(&mut self, id: u32) -> Option<&mut T> {
        self.map.get_mut(&id).map(|slot| &mut slot.value)
    }

    pub fn header(&self, id: u32) -> Option<GcHeader> {
        self.map.get(&id).map(|slot| slot.header)
    }

    pub fn set_header(&mut self, id: u32, header: GcHeader) {
        if let Some(slot) = self.map.get_mut(&id) {
            slot.header = header;
        }
    }

    pub fn contains(&self, id: u32) -> bool {
        self.map.contains_key(&id)
    }

    fn free(&mut self, id: u32) {
        if self.map.swap_remove(&id).is_some() {
            self.free_list.push(id);
        }
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, &T)> + '_ {
        self.map.iter().map(|(&id, slot)| (id, &slot.value))
    }

    /// Count of objects currently at `generation`.
    pub fn count_in(&self, generation: Generation) -> usize {
        self.map.values().filter(|slot| slot.header.generation == generation).count()
    }

    /// Blacken every object reachable from an already-black root set, then
    /// sweep: Gen0 survivors promote to Gen1, Gen1 survivors that were swept
    /// as part of a major cycle promote to Gen2, and anything left white is
    /// freed. `scope` restricts the sweep to objects at or below the given
    /// generation (a minor collection never frees/promotes Gen2 objects).
    pub fn sweep(&mut self, scope: Generation, promote_to: impl Fn(Generation) -> Generation) {
        self.sweep_with(scope, promote_to, |_, _| {});
    }

    /// Like [`Pool::sweep`], but calls `on_dead(id, &value)` for every object
    /// about to be freed, before it's removed — the hook a pool's owner uses
    /// to drop any auxiliary index (e.g. the string interner's hash table)
    /// keyed by an id this sweep is about to recycle.
    pub fn sweep_with(&mut self, scope: Generation, promote_to: impl Fn(Generation) -> Generation, mut on_dead: impl FnMut(u32, &T)) {
        let dead: Vec<u32> = self
            .map
            .iter()
            .filter(|(_, slot)| slot.header.generation <= scope && slot.header.color == GcColor::White)
            .map(|(&id, _)| id)
            .collect();
        for id in dead {
            if let Some(slot) = self.map.get(&id) {
                on_dead(id, &slot.value);
            }
            self.free(id);
        }
        for slot in self.map.values_mut() {
            if slot.header.generation <= scope {
                if slot.header.color == GcColor::Black {
                    slot.header.generation = promote_to(slot.header.generation);
                }
                slot.header.color = GcColor::White;
            }
        }
    }
}

impl<T: Trace> Default for Pool<T> {
    fn default() -> Self {
        Self::new()
    }
}
