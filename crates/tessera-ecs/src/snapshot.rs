//! World snapshot and restore support.
//!
//! [`WorldSnapshot`] is a serializable representation of the world: the
//! entity allocator state plus an ordered list of live entities, each with its
//! name, tags and JSON-encoded components. Restoring re-creates every entity
//! under its original id, so `EntityId` values stored inside components stay
//! valid.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::archetype::RowValue;
use crate::column::BoxedComponent;
use crate::component::ComponentTypeId;
use crate::entity::{EntityAllocator, EntityId, EntityLocation, EntityRecord};
use crate::world::World;
use crate::EcsError;

// ---------------------------------------------------------------------------
// Snapshot types
// ---------------------------------------------------------------------------

/// Serializable snapshot of the [`EntityAllocator`] state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocatorSnapshot {
    /// Per-index generation counters.
    pub generations: Vec<u32>,
    /// Per-index alive flags.
    pub alive: Vec<bool>,
    /// Free-list indices (in FIFO order).
    pub free_indices: Vec<u32>,
}

/// One component of an entity, keyed by its registered name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentSnapshot {
    pub type_name: String,
    pub data: serde_json::Value,
}

/// Serializable snapshot of a single entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySnapshot {
    pub entity_id: EntityId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Sorted by `type_name`.
    pub components: Vec<ComponentSnapshot>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

/// A complete, serializable snapshot of the world state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldSnapshot {
    pub allocator: AllocatorSnapshot,
    /// Names of all registered component types (informational).
    pub component_names: Vec<String>,
    /// Live entities in index order.
    pub entities: Vec<EntitySnapshot>,
}

impl WorldSnapshot {
    pub fn to_json(&self) -> Result<String, EcsError> {
        serde_json::to_string(self).map_err(|e| EcsError::Snapshot {
            details: e.to_string(),
        })
    }

    pub fn from_json(json: &str) -> Result<Self, EcsError> {
        serde_json::from_str(json).map_err(|e| EcsError::Snapshot {
            details: e.to_string(),
        })
    }
}

fn snapshot_error(details: String) -> EcsError {
    EcsError::Snapshot { details }
}

struct PreparedEntity {
    record: EntityRecord,
    values: Vec<(ComponentTypeId, BoxedComponent)>,
}

// ---------------------------------------------------------------------------
// World snapshot/restore impl
// ---------------------------------------------------------------------------

impl World {
    /// Capture every live entity and the allocator state.
    pub fn capture_snapshot(&self) -> Result<WorldSnapshot, EcsError> {
        let (generations, alive, free_indices) = self.entities.allocator().snapshot_state();
        let component_names = self
            .registry
            .registered_names()
            .into_iter()
            .map(str::to_owned)
            .collect();

        let mut entities = Vec::with_capacity(self.entities.len());
        for record in self.entities.records() {
            let archetype = self
                .archetypes
                .get(record.location.archetype)
                .ok_or(EcsError::InvalidEntity { entity: record.id })?;

            let mut components = archetype
                .serialize_row(record.location.row)
                .into_iter()
                .map(|(type_id, value)| {
                    let type_name = self.registry.name_of(type_id).to_owned();
                    value
                        .map(|data| ComponentSnapshot {
                            type_name: type_name.clone(),
                            data,
                        })
                        .map_err(|e| {
                            snapshot_error(format!(
                                "failed to serialize '{type_name}' of {}: {e}",
                                record.id
                            ))
                        })
                })
                .collect::<Result<Vec<_>, _>>()?;
            components.sort_by(|a, b| a.type_name.cmp(&b.type_name));

            entities.push(EntitySnapshot {
                entity_id: record.id,
                name: record.name.clone(),
                components,
                tags: record.tags.iter().cloned().collect(),
            });
        }

        Ok(WorldSnapshot {
            allocator: AllocatorSnapshot {
                generations,
                alive,
                free_indices,
            },
            component_names,
            entities,
        })
    }

    /// Replace the world's contents with `snapshot`.
    ///
    /// Component types must already be registered; registration itself is
    /// not part of a snapshot. The snapshot is fully validated and every
    /// component deserialized before the current contents are cleared, so a
    /// rejected snapshot leaves the world as it was.
    pub fn restore_from_snapshot(&mut self, snapshot: &WorldSnapshot) -> Result<(), EcsError> {
        let allocator = validate_allocator(&snapshot.allocator)?;

        if allocator.alive_count() != snapshot.entities.len() {
            return Err(snapshot_error(format!(
                "allocator has {} live slots but snapshot lists {} entities",
                allocator.alive_count(),
                snapshot.entities.len()
            )));
        }

        let mut prepared = Vec::with_capacity(snapshot.entities.len());
        let mut seen_indices = HashSet::new();
        for entity in &snapshot.entities {
            let id = entity.entity_id;
            if !allocator.is_alive(id) {
                return Err(snapshot_error(format!(
                    "entity {id} is not alive in the snapshot allocator"
                )));
            }
            if !seen_indices.insert(id.index()) {
                return Err(snapshot_error(format!("entity index {} listed twice", id.index())));
            }

            let mut values: Vec<(ComponentTypeId, BoxedComponent)> = Vec::new();
            for component in &entity.components {
                let type_id = self
                    .registry
                    .lookup_by_name(&component.type_name)
                    .ok_or_else(|| EcsError::UnregisteredType {
                        name: component.type_name.clone(),
                    })?;
                if values.iter().any(|(t, _)| *t == type_id) {
                    return Err(snapshot_error(format!(
                        "entity {id} lists component '{}' twice",
                        component.type_name
                    )));
                }
                values.push((type_id, self.registry.deserialize(type_id, &component.data)?));
            }
            values.sort_by_key(|(t, _)| *t);

            prepared.push(PreparedEntity {
                record: EntityRecord {
                    id,
                    // Filled in once the row exists.
                    location: EntityLocation {
                        archetype: crate::archetype::ArchetypeId::EMPTY,
                        row: 0,
                    },
                    name: entity.name.clone(),
                    tags: entity.tags.iter().cloned().collect(),
                },
                values,
            });
        }

        // Validation passed; replace the contents.
        self.archetypes.reset();
        self.entities.reset(allocator);
        let stamp = self.clock.advance();

        for PreparedEntity { mut record, values } in prepared {
            let signature: Vec<ComponentTypeId> = values.iter().map(|(t, _)| *t).collect();
            let archetype = self.archetypes.archetype_for(&signature, &self.registry)?;
            let row_values = values
                .into_iter()
                .map(|(type_id, value)| RowValue {
                    type_id,
                    value,
                    stamp,
                })
                .collect();
            let row = match self.archetypes.get_mut(archetype) {
                Some(arch) => arch.add_row(record.id, row_values)?,
                None => return Err(EcsError::InvalidEntity { entity: record.id }),
            };
            record.location = EntityLocation { archetype, row };
            self.entities.insert_restored(record);
        }

        tracing::info!(
            entities = self.entities.len(),
            archetypes = self.archetypes.len(),
            "restored world from snapshot"
        );
        Ok(())
    }
}

fn validate_allocator(snapshot: &AllocatorSnapshot) -> Result<EntityAllocator, EcsError> {
    if snapshot.generations.len() != snapshot.alive.len() {
        return Err(snapshot_error(format!(
            "allocator snapshot inconsistent: {} generations vs {} alive flags",
            snapshot.generations.len(),
            snapshot.alive.len()
        )));
    }
    let mut seen = HashSet::new();
    for &free_idx in &snapshot.free_indices {
        match snapshot.alive.get(free_idx as usize) {
            None => {
                return Err(snapshot_error(format!(
                    "allocator free index {free_idx} out of bounds ({} slots)",
                    snapshot.alive.len()
                )))
            }
            Some(true) => {
                return Err(snapshot_error(format!(
                    "free list contains index {free_idx} which is marked alive"
                )))
            }
            Some(false) => {}
        }
        if !seen.insert(free_idx) {
            return Err(snapshot_error(format!(
                "free list contains duplicate index {free_idx}"
            )));
        }
    }
    Ok(EntityAllocator::restore_from_snapshot(
        snapshot.generations.clone(),
        snapshot.alive.clone(),
        snapshot.free_indices.clone(),
    ))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
