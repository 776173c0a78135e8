//! The ECS world: central owner of all entities, components, and archetypes.
//!
//! The [`World`] ties together the [`ComponentRegistry`], the [`Entities`]
//! manager and the [`Archetypes`]. Structural changes (spawn, despawn,
//! add/remove component) go through the world so the entity records stay
//! consistent with archetype rows; during iteration they are deferred through
//! a [`CommandBuffer`](crate::command::CommandBuffer).

use std::any::TypeId;
use std::fmt;

use crate::archetype::{Archetype, ArchetypeId, Archetypes, ComponentDelta, Migration, RowValue};
use crate::change::{ChangeClock, ChangeStamp};
use crate::column::BoxedComponent;
use crate::component::{Component, ComponentRegistry, ComponentRules, ComponentTypeId};
use crate::entity::{Entities, EntityId, EntityLocation};
use crate::query::{QueryData, QueryIter};
use crate::EcsError;

// ---------------------------------------------------------------------------
// ComponentBundle
// ---------------------------------------------------------------------------

struct BundleEntry {
    type_id: TypeId,
    type_name: &'static str,
    value: BoxedComponent,
}

/// A set of component values to spawn an entity with.
///
/// Types are resolved against the world's registry when the bundle is
/// spawned, so a bundle can be built before (or without access to) the
/// world. Adding a second value of the same type replaces the first.
#[derive(Default)]
pub struct ComponentBundle {
    entries: Vec<BundleEntry>,
}

impl ComponentBundle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style [`add`](Self::add).
    pub fn with<T: Component>(mut self, value: T) -> Self {
        self.add(value);
        self
    }

    pub fn add<T: Component>(&mut self, value: T) -> &mut Self {
        let entry = BundleEntry {
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
            value: Box::new(value),
        };
        match self.entries.iter_mut().find(|e| e.type_id == entry.type_id) {
            Some(existing) => *existing = entry,
            None => self.entries.push(entry),
        }
        self
    }

    pub fn contains<T: Component>(&self) -> bool {
        self.entries.iter().any(|e| e.type_id == TypeId::of::<T>())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Rust type names of the bundled values, in insertion order.
    pub fn type_names(&self) -> Vec<&'static str> {
        self.entries.iter().map(|e| e.type_name).collect()
    }

    /// Resolve every entry to its component id, sorted by id.
    fn resolve(
        self,
        registry: &ComponentRegistry,
    ) -> Result<Vec<(ComponentTypeId, BoxedComponent)>, EcsError> {
        let mut resolved = self
            .entries
            .into_iter()
            .map(|e| Ok((registry.id_of_type_id(e.type_id, e.type_name)?, e.value)))
            .collect::<Result<Vec<_>, EcsError>>()?;
        resolved.sort_by_key(|(id, _)| *id);
        Ok(resolved)
    }
}

impl fmt::Debug for ComponentBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.entries.iter().map(|e| e.type_name))
            .finish()
    }
}

// ---------------------------------------------------------------------------
// World
// ---------------------------------------------------------------------------

/// Central ECS container: owns all entities, components and archetypes.
#[derive(Debug, Default)]
pub struct World {
    pub(crate) registry: ComponentRegistry,
    pub(crate) entities: Entities,
    pub(crate) archetypes: Archetypes,
    pub(crate) clock: ChangeClock,
}

impl World {
    /// Create an empty world. Only the empty archetype exists.
    pub fn new() -> Self {
        Self::default()
    }

    // -- registration --------------------------------------------------------

    /// Register a component type. Idempotent per Rust type.
    pub fn register_component<T: Component>(
        &mut self,
        name: &str,
    ) -> Result<ComponentTypeId, EcsError> {
        self.registry.register::<T>(name)
    }

    /// Register a component type with insertion rules.
    pub fn register_component_with<T: Component>(
        &mut self,
        name: &str,
        rules: ComponentRules<T>,
    ) -> Result<ComponentTypeId, EcsError> {
        self.registry.register_with::<T>(name, rules)
    }

    pub fn registry(&self) -> &ComponentRegistry {
        &self.registry
    }

    // -- inspection ----------------------------------------------------------

    pub fn entities(&self) -> &Entities {
        &self.entities
    }

    pub fn archetypes(&self) -> &Archetypes {
        &self.archetypes
    }

    /// Changes whenever a new archetype is created.
    pub fn archetype_version(&self) -> u64 {
        self.archetypes.version()
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    pub fn archetype_count(&self) -> usize {
        self.archetypes.len()
    }

    pub fn is_alive(&self, entity: EntityId) -> bool {
        self.entities.is_alive(entity)
    }

    pub fn locate(&self, entity: EntityId) -> Result<EntityLocation, EcsError> {
        self.entities.locate(entity)
    }

    /// Sorted component type ids of `entity`.
    pub fn signature_of(&self, entity: EntityId) -> Result<&[ComponentTypeId], EcsError> {
        let loc = self.entities.locate(entity)?;
        self.archetype_of(entity, loc).map(Archetype::signature)
    }

    fn archetype_of(&self, entity: EntityId, loc: EntityLocation) -> Result<&Archetype, EcsError> {
        self.archetypes
            .get(loc.archetype)
            .ok_or(EcsError::InvalidEntity { entity })
    }

    /// Typed read-only iteration, e.g. `world.query::<(&Pos, &Vel)>()`.
    pub fn query<Q: QueryData>(&self) -> QueryIter<'_, Q> {
        QueryIter::new(self)
    }

    // -- spawn / despawn -----------------------------------------------------

    /// Spawn an entity with no components into the empty archetype.
    pub fn spawn(&mut self) -> EntityId {
        self.spawn_empty(None)
    }

    /// Spawn an empty entity carrying `name`.
    pub fn spawn_named(&mut self, name: &str) -> EntityId {
        self.spawn_empty(Some(name.to_owned()))
    }

    fn spawn_empty(&mut self, name: Option<String>) -> EntityId {
        let row = self
            .archetypes
            .get(ArchetypeId::EMPTY)
            .map_or(0, Archetype::len);
        let location = EntityLocation {
            archetype: ArchetypeId::EMPTY,
            row,
        };
        let entity = self.entities.spawn(location, name);
        if let Some(empty) = self.archetypes.get_mut(ArchetypeId::EMPTY) {
            // The empty archetype has no columns, so this cannot fail.
            let _ = empty.add_row(entity, Vec::new());
        }
        entity
    }

    /// Spawn an entity with a single component.
    pub fn spawn_with<T: Component>(&mut self, value: T) -> Result<EntityId, EcsError> {
        self.spawn_bundle(ComponentBundle::new().with(value))
    }

    /// Spawn an entity directly into the archetype of `bundle`.
    ///
    /// Component rules are checked against the full bundle first; on error
    /// nothing is allocated.
    pub fn spawn_bundle(&mut self, bundle: ComponentBundle) -> Result<EntityId, EcsError> {
        self.spawn_bundle_named(None, bundle)
    }

    pub fn spawn_bundle_named(
        &mut self,
        name: Option<&str>,
        bundle: ComponentBundle,
    ) -> Result<EntityId, EcsError> {
        let values = bundle.resolve(&self.registry)?;
        let signature: Vec<ComponentTypeId> = values.iter().map(|(id, _)| *id).collect();
        for (id, value) in &values {
            self.registry.validate_insert(*id, &**value, &signature)?;
        }

        let archetype = self.archetypes.archetype_for(&signature, &self.registry)?;
        let stamp = self.clock.advance();
        let row = self.archetypes.get(archetype).map_or(0, Archetype::len);
        let entity = self
            .entities
            .spawn(EntityLocation { archetype, row }, name.map(str::to_owned));

        let row_values = values
            .into_iter()
            .map(|(type_id, value)| RowValue {
                type_id,
                value,
                stamp,
            })
            .collect();
        let added = match self.archetypes.get_mut(archetype) {
            Some(arch) => arch.add_row(entity, row_values).map(|_| ()),
            None => Err(EcsError::InvalidEntity { entity }),
        };
        if let Err(err) = added {
            let _ = self.entities.free(entity);
            return Err(err);
        }
        Ok(entity)
    }

    /// Destroy `entity`: its row is swap-removed, its generation bumped and
    /// its index freed for reuse.
    pub fn despawn(&mut self, entity: EntityId) -> Result<(), EcsError> {
        let loc = self.entities.locate(entity)?;
        self.entities.free(entity)?;
        if let Some(arch) = self.archetypes.get_mut(loc.archetype) {
            if let Some(moved) = arch.remove_row(loc.row) {
                self.entities.set_row(moved, loc.row);
            }
        }
        Ok(())
    }

    // -- structural component changes ----------------------------------------

    /// Add `value` to `entity`, migrating it to the wider archetype.
    pub fn add_component<T: Component>(
        &mut self,
        entity: EntityId,
        value: T,
    ) -> Result<(), EcsError> {
        self.entities.locate(entity)?;
        let id = self.registry.id_of::<T>()?;
        self.add_component_boxed(entity, id, Box::new(value))
    }

    pub(crate) fn add_component_boxed(
        &mut self,
        entity: EntityId,
        id: ComponentTypeId,
        value: BoxedComponent,
    ) -> Result<(), EcsError> {
        let from = self.entities.locate(entity)?;
        let stamp = self.clock.advance();
        let migration = self.archetypes.migrate(
            &self.registry,
            entity,
            from,
            ComponentDelta::Insert(id, value),
            stamp,
        )?;
        self.apply_migration(entity, from, migration);
        Ok(())
    }

    /// Remove the `T` component from `entity`, dropping its value.
    pub fn remove_component<T: Component>(&mut self, entity: EntityId) -> Result<(), EcsError> {
        self.entities.locate(entity)?;
        let id = self.registry.id_of::<T>()?;
        self.remove_component_by_id(entity, id)
    }

    pub(crate) fn remove_component_by_id(
        &mut self,
        entity: EntityId,
        id: ComponentTypeId,
    ) -> Result<(), EcsError> {
        let from = self.entities.locate(entity)?;
        let stamp = self.clock.current();
        let migration = self.archetypes.migrate(
            &self.registry,
            entity,
            from,
            ComponentDelta::Remove(id),
            stamp,
        )?;
        self.apply_migration(entity, from, migration);
        Ok(())
    }

    fn apply_migration(&mut self, entity: EntityId, from: EntityLocation, migration: Migration) {
        if let Some(moved) = migration.moved {
            self.entities.set_row(moved, from.row);
        }
        self.entities.set_location(entity, migration.location);
    }

    // -- component access ------------------------------------------------------

    pub fn has_component<T: Component>(&self, entity: EntityId) -> bool {
        let (Ok(loc), Some(id)) = (self.entities.locate(entity), self.registry.lookup::<T>()) else {
            return false;
        };
        self.archetypes
            .get(loc.archetype)
            .is_some_and(|a| a.has_component(id))
    }

    fn missing(&self, entity: EntityId, id: ComponentTypeId) -> EcsError {
        EcsError::MissingComponent {
            entity,
            component: self.registry.name_of(id).to_owned(),
        }
    }

    pub fn get_component<T: Component>(&self, entity: EntityId) -> Result<&T, EcsError> {
        let loc = self.entities.locate(entity)?;
        let id = self.registry.id_of::<T>()?;
        self.archetype_of(entity, loc)?
            .get::<T>(id, loc.row)
            .ok_or_else(|| self.missing(entity, id))
    }

    /// Mutable access; stamps the component as changed.
    pub fn get_component_mut<T: Component>(&mut self, entity: EntityId) -> Result<&mut T, EcsError> {
        let loc = self.entities.locate(entity)?;
        let id = self.registry.id_of::<T>()?;
        let stamp = self.clock.advance();
        let registry = &self.registry;
        self.archetypes
            .get_mut(loc.archetype)
            .and_then(|a| a.get_mut::<T>(id, loc.row, stamp))
            .ok_or_else(|| EcsError::MissingComponent {
                entity,
                component: registry.name_of(id).to_owned(),
            })
    }

    /// Overwrite an existing component in place, returning the old value.
    pub fn set_component<T: Component>(&mut self, entity: EntityId, value: T) -> Result<T, EcsError> {
        let loc = self.entities.locate(entity)?;
        let id = self.registry.id_of::<T>()?;
        let stamp = self.clock.advance();
        let registry = &self.registry;
        self.archetypes
            .get_mut(loc.archetype)
            .and_then(|a| a.column_mut::<T>(id))
            .and_then(|c| c.set(loc.row, value, stamp))
            .ok_or_else(|| EcsError::MissingComponent {
                entity,
                component: registry.name_of(id).to_owned(),
            })
    }

    /// Handle for chained operations on one entity.
    pub fn entity_mut(&mut self, entity: EntityId) -> Result<EntityWorldMut<'_>, EcsError> {
        self.entities.locate(entity)?;
        Ok(EntityWorldMut {
            world: self,
            entity,
        })
    }

    // -- change tracking -------------------------------------------------------

    /// The most recent change stamp issued by this world.
    pub fn change_stamp(&self) -> ChangeStamp {
        self.clock.current()
    }

    /// Stamp of the last write to `entity`'s `T` component.
    pub fn component_stamp<T: Component>(&self, entity: EntityId) -> Result<ChangeStamp, EcsError> {
        let loc = self.entities.locate(entity)?;
        let id = self.registry.id_of::<T>()?;
        self.archetype_of(entity, loc)?
            .stamp(id, loc.row)
            .ok_or_else(|| self.missing(entity, id))
    }

    /// Whether `entity`'s `T` component was written after `stamp`.
    pub fn changed_since<T: Component>(
        &self,
        entity: EntityId,
        stamp: ChangeStamp,
    ) -> Result<bool, EcsError> {
        Ok(self.component_stamp::<T>(entity)?.is_newer_than(stamp))
    }

    // -- names and tags --------------------------------------------------------

    pub fn name_of(&self, entity: EntityId) -> Result<Option<&str>, EcsError> {
        self.entities.name_of(entity)
    }

    pub fn set_name(&mut self, entity: EntityId, name: Option<&str>) -> Result<(), EcsError> {
        self.entities.set_name(entity, name.map(str::to_owned))
    }

    pub fn find_by_name(&self, name: &str) -> Option<EntityId> {
        self.entities.find_by_name(name)
    }

    /// Returns `true` if the tag was newly added.
    pub fn add_tag(&mut self, entity: EntityId, tag: &str) -> Result<bool, EcsError> {
        self.entities.add_tag(entity, tag)
    }

    /// Returns `true` if the tag was present.
    pub fn remove_tag(&mut self, entity: EntityId, tag: &str) -> Result<bool, EcsError> {
        self.entities.remove_tag(entity, tag)
    }

    pub fn has_tag(&self, entity: EntityId, tag: &str) -> bool {
        self.entities.has_tag(entity, tag)
    }

    pub fn tags_of(&self, entity: EntityId) -> Result<Vec<&str>, EcsError> {
        self.entities.tags_of(entity)
    }

    pub fn entities_with_tag(&self, tag: &str) -> Vec<EntityId> {
        self.entities.with_tag(tag)
    }
}

// ---------------------------------------------------------------------------
// EntityWorldMut
// ---------------------------------------------------------------------------

/// Mutable handle to one live entity.
///
/// ```
/// use tessera_ecs::prelude::*;
///
/// #[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
/// struct Health(u32);
///
/// let mut world = World::new();
/// world.register_component::<Health>("health").unwrap();
/// let e = world.spawn();
/// world.entity_mut(e).unwrap().insert(Health(3)).unwrap();
/// assert!(world.has_component::<Health>(e));
/// ```
pub struct EntityWorldMut<'w> {
    world: &'w mut World,
    entity: EntityId,
}

impl<'w> EntityWorldMut<'w> {
    pub fn id(&self) -> EntityId {
        self.entity
    }

    pub fn world(&self) -> &World {
        self.world
    }

    pub fn insert<T: Component>(&mut self, value: T) -> Result<&mut Self, EcsError> {
        self.world.add_component(self.entity, value)?;
        Ok(self)
    }

    pub fn remove<T: Component>(&mut self) -> Result<&mut Self, EcsError> {
        self.world.remove_component::<T>(self.entity)?;
        Ok(self)
    }

    pub fn has<T: Component>(&self) -> bool {
        self.world.has_component::<T>(self.entity)
    }

    pub fn get<T: Component>(&self) -> Result<&T, EcsError> {
        self.world.get_component::<T>(self.entity)
    }

    pub fn get_mut<T: Component>(&mut self) -> Result<&mut T, EcsError> {
        self.world.get_component_mut::<T>(self.entity)
    }

    pub fn set<T: Component>(&mut self, value: T) -> Result<T, EcsError> {
        self.world.set_component(self.entity, value)
    }

    pub fn add_tag(&mut self, tag: &str) -> Result<&mut Self, EcsError> {
        self.world.add_tag(self.entity, tag)?;
        Ok(self)
    }

    pub fn despawn(self) -> Result<(), EcsError> {
        self.world.despawn(self.entity)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
