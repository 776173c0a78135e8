//! Entity identifiers, allocation and per-entity records.
//!
//! An [`EntityId`] names a slot in the allocator plus the generation that
//! slot had when the id was handed out. Destroying an entity bumps its
//! slot's generation, so every copy of the old id stops resolving at once,
//! even after the slot is reused.
//!
//! [`Entities`] pairs the allocator with one record per live index: where the
//! entity's row lives, plus its optional name and tags.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, VecDeque};
use std::fmt;

use crate::archetype::ArchetypeId;
use crate::EcsError;

// ---------------------------------------------------------------------------
// EntityId
// ---------------------------------------------------------------------------

/// Slot index and generation of one entity, packed as
/// `[generation: u32 | index: u32]`.
///
/// Two ids with the same index but different generations refer to
/// different entities. Ids order by generation first.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(u64);

impl EntityId {
    #[inline]
    pub fn new(index: u32, generation: u32) -> Self {
        Self(u64::from(generation) << 32 | u64::from(index))
    }

    #[inline]
    pub fn index(self) -> u32 {
        (self.0 & u64::from(u32::MAX)) as u32
    }

    #[inline]
    pub fn generation(self) -> u32 {
        (self.0 >> 32) as u32
    }

    /// The packed form, as stored in snapshots.
    #[inline]
    pub fn to_raw(self) -> u64 {
        self.0
    }

    #[inline]
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Debug for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityId({self})")
    }
}

/// `index` `v` `generation`, e.g. `12v3`.
impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index(), self.generation())
    }
}

// ---------------------------------------------------------------------------
// EntityAllocator
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default)]
struct Slot {
    generation: u32,
    alive: bool,
}

/// Hands out [`EntityId`]s and decides which ones are still live.
///
/// - A new slot starts at generation 0.
/// - Freeing an id bumps its slot's generation (wrapping) and queues the
///   slot for reuse; freeing a dead or stale id does nothing.
/// - Reuse is first-freed, first-reused, so a destroy/create churn walks
///   the whole free list instead of burning through one slot's generations.
#[derive(Debug, Clone, Default)]
pub struct EntityAllocator {
    slots: Vec<Slot>,
    free_indices: VecDeque<u32>,
    alive_count: usize,
}

impl EntityAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocate(&mut self) -> EntityId {
        self.alive_count += 1;
        match self.free_indices.pop_front() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.alive = true;
                EntityId::new(index, slot.generation)
            }
            None => {
                let index = self.slots.len() as u32;
                self.slots.push(Slot {
                    generation: 0,
                    alive: true,
                });
                EntityId::new(index, 0)
            }
        }
    }

    /// Free `id`. Returns `false` if it was not live.
    pub fn deallocate(&mut self, id: EntityId) -> bool {
        if !self.is_alive(id) {
            return false;
        }
        let slot = &mut self.slots[id.index() as usize];
        slot.alive = false;
        slot.generation = slot.generation.wrapping_add(1);
        self.free_indices.push_back(id.index());
        self.alive_count -= 1;
        true
    }

    /// `id`'s slot is occupied and still carries `id`'s generation.
    pub fn is_alive(&self, id: EntityId) -> bool {
        self.slots
            .get(id.index() as usize)
            .is_some_and(|s| s.alive && s.generation == id.generation())
    }

    pub fn alive_count(&self) -> usize {
        self.alive_count
    }

    /// Slots ever handed out, live or free.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// `(generations, alive, free_indices)`, one entry per slot for the
    /// first two and the free list in reuse order.
    pub fn snapshot_state(&self) -> (Vec<u32>, Vec<bool>, Vec<u32>) {
        let generations = self.slots.iter().map(|s| s.generation).collect();
        let alive = self.slots.iter().map(|s| s.alive).collect();
        (generations, alive, self.free_indices.iter().copied().collect())
    }

    /// Inverse of [`snapshot_state`](Self::snapshot_state). Slots beyond the
    /// shorter of `generations` and `alive` are dropped; callers validate
    /// the lengths first.
    pub fn restore_from_snapshot(
        generations: Vec<u32>,
        alive: Vec<bool>,
        free_indices: Vec<u32>,
    ) -> Self {
        let slots: Vec<Slot> = generations
            .into_iter()
            .zip(alive)
            .map(|(generation, alive)| Slot { generation, alive })
            .collect();
        let alive_count = slots.iter().filter(|s| s.alive).count();
        Self {
            slots,
            free_indices: VecDeque::from(free_indices),
            alive_count,
        }
    }
}

// ---------------------------------------------------------------------------
// EntityLocation
// ---------------------------------------------------------------------------

/// Where an entity's components live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityLocation {
    pub archetype: ArchetypeId,
    pub row: usize,
}

// ---------------------------------------------------------------------------
// Entities
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub(crate) struct EntityRecord {
    pub(crate) id: EntityId,
    pub(crate) location: EntityLocation,
    pub(crate) name: Option<String>,
    pub(crate) tags: BTreeSet<String>,
}

/// Allocator plus one record per live entity, indexed by entity index.
#[derive(Debug, Default)]
pub struct Entities {
    allocator: EntityAllocator,
    records: Vec<Option<EntityRecord>>,
}

impl Entities {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live entities.
    pub fn len(&self) -> usize {
        self.allocator.alive_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_alive(&self, id: EntityId) -> bool {
        self.allocator.is_alive(id)
    }

    pub fn allocator(&self) -> &EntityAllocator {
        &self.allocator
    }

    /// Allocate an id whose row already sits at `location`.
    pub(crate) fn spawn(&mut self, location: EntityLocation, name: Option<String>) -> EntityId {
        let id = self.allocator.allocate();
        let idx = id.index() as usize;
        if self.records.len() <= idx {
            self.records.resize(idx + 1, None);
        }
        self.records[idx] = Some(EntityRecord {
            id,
            location,
            name,
            tags: BTreeSet::new(),
        });
        id
    }

    /// Free `id` and hand back its record. The caller removes the row.
    pub(crate) fn free(&mut self, id: EntityId) -> Result<EntityRecord, EcsError> {
        if !self.allocator.deallocate(id) {
            return Err(EcsError::InvalidEntity { entity: id });
        }
        self.records
            .get_mut(id.index() as usize)
            .and_then(Option::take)
            .ok_or(EcsError::InvalidEntity { entity: id })
    }

    fn record(&self, id: EntityId) -> Result<&EntityRecord, EcsError> {
        if !self.allocator.is_alive(id) {
            return Err(EcsError::InvalidEntity { entity: id });
        }
        self.records
            .get(id.index() as usize)
            .and_then(Option::as_ref)
            .ok_or(EcsError::InvalidEntity { entity: id })
    }

    fn record_mut(&mut self, id: EntityId) -> Result<&mut EntityRecord, EcsError> {
        if !self.allocator.is_alive(id) {
            return Err(EcsError::InvalidEntity { entity: id });
        }
        self.records
            .get_mut(id.index() as usize)
            .and_then(Option::as_mut)
            .ok_or(EcsError::InvalidEntity { entity: id })
    }

    /// Current `(archetype, row)` of `id`.
    pub fn locate(&self, id: EntityId) -> Result<EntityLocation, EcsError> {
        self.record(id).map(|r| r.location)
    }

    pub(crate) fn set_location(&mut self, id: EntityId, location: EntityLocation) {
        if let Ok(record) = self.record_mut(id) {
            record.location = location;
        }
    }

    /// Point `id` at `row` within its current archetype (after a swap-remove
    /// moved it).
    pub(crate) fn set_row(&mut self, id: EntityId, row: usize) {
        if let Ok(record) = self.record_mut(id) {
            record.location.row = row;
        }
    }

    pub fn name_of(&self, id: EntityId) -> Result<Option<&str>, EcsError> {
        self.record(id).map(|r| r.name.as_deref())
    }

    pub(crate) fn set_name(&mut self, id: EntityId, name: Option<String>) -> Result<(), EcsError> {
        self.record_mut(id)?.name = name;
        Ok(())
    }

    /// First live entity (by index) carrying `name`.
    pub fn find_by_name(&self, name: &str) -> Option<EntityId> {
        self.records
            .iter()
            .flatten()
            .find(|r| r.name.as_deref() == Some(name))
            .map(|r| r.id)
    }

    pub fn tags_of(&self, id: EntityId) -> Result<Vec<&str>, EcsError> {
        Ok(self.record(id)?.tags.iter().map(String::as_str).collect())
    }

    /// Returns `true` if the tag was newly added.
    pub(crate) fn add_tag(&mut self, id: EntityId, tag: &str) -> Result<bool, EcsError> {
        Ok(self.record_mut(id)?.tags.insert(tag.to_owned()))
    }

    /// Returns `true` if the tag was present.
    pub(crate) fn remove_tag(&mut self, id: EntityId, tag: &str) -> Result<bool, EcsError> {
        Ok(self.record_mut(id)?.tags.remove(tag))
    }

    pub fn has_tag(&self, id: EntityId, tag: &str) -> bool {
        self.record(id).is_ok_and(|r| r.tags.contains(tag))
    }

    /// Live entities carrying `tag`, in index order.
    pub fn with_tag(&self, tag: &str) -> Vec<EntityId> {
        self.records
            .iter()
            .flatten()
            .filter(|r| r.tags.contains(tag))
            .map(|r| r.id)
            .collect()
    }

    /// Live entity ids in index order.
    pub fn iter(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.records.iter().flatten().map(|r| r.id)
    }

    pub(crate) fn records(&self) -> impl Iterator<Item = &EntityRecord> {
        self.records.iter().flatten()
    }

    /// Replace everything with a restored allocator. Records are re-added
    /// through [`insert_restored`](Self::insert_restored).
    pub(crate) fn reset(&mut self, allocator: EntityAllocator) {
        self.records = vec![None; allocator.capacity()];
        self.allocator = allocator;
    }

    pub(crate) fn insert_restored(&mut self, record: EntityRecord) {
        let idx = record.id.index() as usize;
        if self.records.len() <= idx {
            self.records.resize(idx + 1, None);
        }
        self.records[idx] = Some(record);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
