//! Archetype storage.
//!
//! An [`Archetype`] stores all entities that share the exact same set of
//! component types (the *signature*). Each component type has its own
//! column, so iterating one component type across many entities is a linear
//! scan through contiguous memory.
//!
//! [`Archetypes`] owns every archetype of a world. Archetypes are created
//! lazily, never deleted, and the empty-signature archetype always exists as
//! [`ArchetypeId::EMPTY`]. Creating an archetype bumps a version counter that
//! queries use to invalidate their cached match lists.

use std::collections::HashMap;
use std::fmt;

use crate::change::ChangeStamp;
use crate::column::{BoxedComponent, Column, ComponentColumn};
use crate::component::{Component, ComponentRegistry, ComponentTypeId};
use crate::entity::{EntityId, EntityLocation};
use crate::EcsError;

// ---------------------------------------------------------------------------
// ArchetypeId
// ---------------------------------------------------------------------------

/// Identifier for an archetype within a world.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ArchetypeId(pub(crate) u32);

impl ArchetypeId {
    /// The archetype with no components.
    pub const EMPTY: ArchetypeId = ArchetypeId(0);

    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for ArchetypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ArchetypeId({})", self.0)
    }
}

// ---------------------------------------------------------------------------
// RowValue
// ---------------------------------------------------------------------------

/// One component value of a row in transit between archetypes.
pub struct RowValue {
    pub type_id: ComponentTypeId,
    pub value: BoxedComponent,
    pub stamp: ChangeStamp,
}

impl fmt::Debug for RowValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RowValue")
            .field("type_id", &self.type_id)
            .field("stamp", &self.stamp)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Archetype
// ---------------------------------------------------------------------------

/// Entities with one exact component signature, stored column-wise.
///
/// Invariant: every column has `entities.len()` rows, and row `i` of every
/// column belongs to `entities[i]`.
pub struct Archetype {
    id: ArchetypeId,
    /// Sorted component type IDs.
    signature: Vec<ComponentTypeId>,
    /// One column per signature entry, in signature order.
    columns: Vec<Box<dyn ComponentColumn>>,
    entities: Vec<EntityId>,
    /// Cached destinations for adding / removing one component.
    add_edges: HashMap<ComponentTypeId, ArchetypeId>,
    remove_edges: HashMap<ComponentTypeId, ArchetypeId>,
}

impl Archetype {
    /// Create an archetype whose columns come from the registry.
    ///
    /// `signature` must be sorted and deduplicated.
    pub(crate) fn new(
        id: ArchetypeId,
        signature: Vec<ComponentTypeId>,
        registry: &ComponentRegistry,
    ) -> Result<Self, EcsError> {
        let columns = signature
            .iter()
            .map(|&type_id| {
                registry
                    .new_column(type_id)
                    .ok_or_else(|| EcsError::UnregisteredType {
                        name: format!("{type_id:?}"),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            id,
            signature,
            columns,
            entities: Vec::new(),
            add_edges: HashMap::new(),
            remove_edges: HashMap::new(),
        })
    }

    pub fn id(&self) -> ArchetypeId {
        self.id
    }

    /// Sorted component type IDs.
    pub fn signature(&self) -> &[ComponentTypeId] {
        &self.signature
    }

    pub fn has_component(&self, type_id: ComponentTypeId) -> bool {
        self.signature.binary_search(&type_id).is_ok()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Entity IDs in row order.
    pub fn entities(&self) -> &[EntityId] {
        &self.entities
    }

    fn column_index(&self, type_id: ComponentTypeId) -> Option<usize> {
        self.signature.binary_search(&type_id).ok()
    }

    /// Typed column for `type_id`, if present and of type `T`.
    pub fn column<T: Component>(&self, type_id: ComponentTypeId) -> Option<&Column<T>> {
        let idx = self.column_index(type_id)?;
        self.columns[idx].as_any().downcast_ref::<Column<T>>()
    }

    pub fn column_mut<T: Component>(&mut self, type_id: ComponentTypeId) -> Option<&mut Column<T>> {
        let idx = self.column_index(type_id)?;
        self.columns[idx].as_any_mut().downcast_mut::<Column<T>>()
    }

    /// Two distinct typed columns borrowed mutably at once.
    pub fn column_pair_mut<A: Component, B: Component>(
        &mut self,
        a: ComponentTypeId,
        b: ComponentTypeId,
    ) -> Option<(&mut Column<A>, &mut Column<B>)> {
        let ia = self.column_index(a)?;
        let ib = self.column_index(b)?;
        if ia == ib {
            return None;
        }
        let (lo, hi) = (ia.min(ib), ia.max(ib));
        let (left, right) = self.columns.split_at_mut(hi);
        let (first, second) = (&mut left[lo], &mut right[0]);
        let (col_a, col_b) = if ia < ib {
            (first, second)
        } else {
            (second, first)
        };
        Some((
            col_a.as_any_mut().downcast_mut::<Column<A>>()?,
            col_b.as_any_mut().downcast_mut::<Column<B>>()?,
        ))
    }

    pub fn get<T: Component>(&self, type_id: ComponentTypeId, row: usize) -> Option<&T> {
        self.column::<T>(type_id)?.get(row)
    }

    pub fn get_mut<T: Component>(
        &mut self,
        type_id: ComponentTypeId,
        row: usize,
        stamp: ChangeStamp,
    ) -> Option<&mut T> {
        self.column_mut::<T>(type_id)?.get_mut(row, stamp)
    }

    /// Change stamp of `type_id` at `row`.
    pub fn stamp(&self, type_id: ComponentTypeId, row: usize) -> Option<ChangeStamp> {
        let idx = self.column_index(type_id)?;
        self.columns[idx].stamp(row)
    }

    /// Append a row for `entity`. `values` must hold exactly one value per
    /// signature entry; nothing is written if they do not.
    pub(crate) fn add_row(
        &mut self,
        entity: EntityId,
        mut values: Vec<RowValue>,
    ) -> Result<usize, EcsError> {
        values.sort_by_key(|v| v.type_id);
        let matches = values.len() == self.signature.len()
            && values
                .iter()
                .zip(self.signature.iter().zip(self.columns.iter()))
                .all(|(v, (&sig, col))| v.type_id == sig && col.accepts(&*v.value));
        if !matches {
            return Err(EcsError::UnregisteredType {
                name: format!(
                    "row values {:?} do not fit archetype {:?} {:?}",
                    values.iter().map(|v| v.type_id).collect::<Vec<_>>(),
                    self.id,
                    self.signature
                ),
            });
        }

        for (column, v) in self.columns.iter_mut().zip(values) {
            // Types were checked above.
            let _ = column.push_boxed(v.value, v.stamp);
        }
        self.entities.push(entity);
        Ok(self.entities.len() - 1)
    }

    /// Swap-remove `row` across all columns. Returns the entity that was
    /// moved into `row`, if any.
    pub(crate) fn remove_row(&mut self, row: usize) -> Option<EntityId> {
        for column in &mut self.columns {
            column.swap_remove_row(row);
        }
        self.entities.swap_remove(row);
        self.entities.get(row).copied()
    }

    /// Swap-remove `row`, moving its values out. Returns the values and the
    /// entity that was moved into `row`, if any.
    pub(crate) fn take_row(&mut self, row: usize) -> (Vec<RowValue>, Option<EntityId>) {
        let values = self
            .signature
            .iter()
            .zip(self.columns.iter_mut())
            .map(|(&type_id, column)| {
                let (value, stamp) = column.take_row(row);
                RowValue {
                    type_id,
                    value,
                    stamp,
                }
            })
            .collect();
        self.entities.swap_remove(row);
        (values, self.entities.get(row).copied())
    }

    /// Serialize every component of `row` as `(type id, json)`.
    pub(crate) fn serialize_row(
        &self,
        row: usize,
    ) -> Vec<(ComponentTypeId, Result<serde_json::Value, String>)> {
        self.signature
            .iter()
            .zip(self.columns.iter())
            .map(|(&type_id, column)| (type_id, column.serialize_row(row)))
            .collect()
    }

    fn clear(&mut self) {
        for column in &mut self.columns {
            column.clear();
        }
        self.entities.clear();
    }
}

impl fmt::Debug for Archetype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Archetype")
            .field("id", &self.id)
            .field("signature", &self.signature)
            .field("len", &self.entities.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Archetypes
// ---------------------------------------------------------------------------

/// A single-component structural change applied by [`Archetypes::migrate`].
pub(crate) enum ComponentDelta {
    Insert(ComponentTypeId, BoxedComponent),
    Remove(ComponentTypeId),
}

/// Result of moving an entity between archetypes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Migration {
    pub(crate) location: EntityLocation,
    /// Entity moved into the vacated source row.
    pub(crate) moved: Option<EntityId>,
}

/// Every archetype of a world, indexed by [`ArchetypeId`].
pub struct Archetypes {
    archetypes: Vec<Archetype>,
    by_signature: HashMap<Vec<ComponentTypeId>, ArchetypeId>,
    /// Bumped whenever the set of archetypes changes.
    version: u64,
}

impl Archetypes {
    pub fn new() -> Self {
        let empty = Archetype {
            id: ArchetypeId::EMPTY,
            signature: Vec::new(),
            columns: Vec::new(),
            entities: Vec::new(),
            add_edges: HashMap::new(),
            remove_edges: HashMap::new(),
        };
        let mut by_signature = HashMap::new();
        by_signature.insert(Vec::new(), ArchetypeId::EMPTY);
        Self {
            archetypes: vec![empty],
            by_signature,
            version: 1,
        }
    }

    /// Counter that changes every time an archetype is created (or the set
    /// is reset by a snapshot restore).
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn len(&self) -> usize {
        self.archetypes.len()
    }

    /// Always `false`: the empty archetype exists from the start.
    pub fn is_empty(&self) -> bool {
        self.archetypes.is_empty()
    }

    pub fn get(&self, id: ArchetypeId) -> Option<&Archetype> {
        self.archetypes.get(id.index())
    }

    pub(crate) fn get_mut(&mut self, id: ArchetypeId) -> Option<&mut Archetype> {
        self.archetypes.get_mut(id.index())
    }

    /// Archetypes in creation order.
    pub fn iter(&self) -> impl Iterator<Item = &Archetype> {
        self.archetypes.iter()
    }

    /// Existing archetype for the exact `signature`, if any.
    pub fn find(&self, signature: &[ComponentTypeId]) -> Option<ArchetypeId> {
        self.by_signature.get(signature).copied()
    }

    /// Archetype for `signature` (sorted, deduplicated), created if needed.
    pub(crate) fn archetype_for(
        &mut self,
        signature: &[ComponentTypeId],
        registry: &ComponentRegistry,
    ) -> Result<ArchetypeId, EcsError> {
        if let Some(id) = self.find(signature) {
            return Ok(id);
        }
        let id = ArchetypeId(self.archetypes.len() as u32);
        let archetype = Archetype::new(id, signature.to_vec(), registry)?;
        self.archetypes.push(archetype);
        self.by_signature.insert(signature.to_vec(), id);
        self.version += 1;
        tracing::debug!(
            archetype = ?id,
            components = ?signature.iter().map(|&t| registry.name_of(t)).collect::<Vec<_>>(),
            "created archetype"
        );
        Ok(id)
    }

    /// Move `entity` from `from` into the archetype that results from
    /// applying `delta` to its signature.
    ///
    /// All checks (duplicate / missing component, value type, insertion
    /// rules) run before any storage is mutated.
    pub(crate) fn migrate(
        &mut self,
        registry: &ComponentRegistry,
        entity: EntityId,
        from: EntityLocation,
        delta: ComponentDelta,
        stamp: ChangeStamp,
    ) -> Result<Migration, EcsError> {
        let source = self
            .archetypes
            .get(from.archetype.index())
            .ok_or(EcsError::InvalidEntity { entity })?;

        let (edge_key, is_insert) = match &delta {
            ComponentDelta::Insert(type_id, value) => {
                if source.has_component(*type_id) {
                    return Err(EcsError::DuplicateComponent {
                        entity,
                        component: registry.name_of(*type_id).to_owned(),
                    });
                }
                registry.check_value_type(*type_id, &**value)?;
                (*type_id, true)
            }
            ComponentDelta::Remove(type_id) => {
                if !source.has_component(*type_id) {
                    return Err(EcsError::MissingComponent {
                        entity,
                        component: registry.name_of(*type_id).to_owned(),
                    });
                }
                (*type_id, false)
            }
        };

        let cached = if is_insert {
            source.add_edges.get(&edge_key).copied()
        } else {
            source.remove_edges.get(&edge_key).copied()
        };

        let mut target_signature: Vec<ComponentTypeId> = source.signature.clone();
        if is_insert {
            let pos = target_signature.partition_point(|&t| t < edge_key);
            target_signature.insert(pos, edge_key);
        } else {
            target_signature.retain(|&t| t != edge_key);
        }

        match &delta {
            ComponentDelta::Insert(type_id, value) => {
                registry.validate_insert(*type_id, &**value, &target_signature)?;
            }
            // Every component that stays must still have what it requires.
            ComponentDelta::Remove(_) => {
                for &remaining in &target_signature {
                    registry.check_requirements(remaining, &target_signature)?;
                }
            }
        }

        let dest = match cached {
            Some(dest) => dest,
            None => {
                let dest = self.archetype_for(&target_signature, registry)?;
                let source = &mut self.archetypes[from.archetype.index()];
                if is_insert {
                    source.add_edges.insert(edge_key, dest);
                } else {
                    source.remove_edges.insert(edge_key, dest);
                }
                dest
            }
        };

        let (mut values, moved) = self.archetypes[from.archetype.index()].take_row(from.row);
        match delta {
            ComponentDelta::Insert(type_id, value) => values.push(RowValue {
                type_id,
                value,
                stamp,
            }),
            ComponentDelta::Remove(type_id) => values.retain(|v| v.type_id != type_id),
        }
        let row = self.archetypes[dest.index()].add_row(entity, values)?;

        tracing::debug!(
            entity = ?entity,
            from = ?from.archetype,
            to = ?dest,
            "migrated entity"
        );
        Ok(Migration {
            location: EntityLocation {
                archetype: dest,
                row,
            },
            moved,
        })
    }

    /// Drop every archetype except the empty one and bump the version.
    pub(crate) fn reset(&mut self) {
        self.archetypes.truncate(1);
        if let Some(empty) = self.archetypes.first_mut() {
            empty.clear();
            empty.add_edges.clear();
            empty.remove_edges.clear();
        }
        self.by_signature.clear();
        self.by_signature.insert(Vec::new(), ArchetypeId::EMPTY);
        self.version += 1;
    }
}

impl Default for Archetypes {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Archetypes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Archetypes")
            .field("archetypes", &self.archetypes)
            .field("version", &self.version)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
