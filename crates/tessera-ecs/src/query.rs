//! Queries over archetypes.
//!
//! A [`Query`] is built once from a [`QueryBuilder`] (`all` / `any` / `none`
//! / `changed` component sets) and caches the list of matching archetypes.
//! The cache is keyed by the world's archetype version: it is rebuilt lazily
//! the next time the query is evaluated after a new archetype appears.
//! Entities moving in and out of already-matched archetypes never invalidate
//! it.
//!
//! For quick read-only access, `world.query::<(&A, &B)>()` yields typed
//! tuples through [`QueryData`].

use std::any::TypeId;
use std::marker::PhantomData;

use crate::archetype::{Archetype, ArchetypeId};
use crate::change::ChangeStamp;
use crate::component::{Component, ComponentRegistry, ComponentTypeId};
use crate::entity::EntityId;
use crate::world::World;
use crate::EcsError;

// ---------------------------------------------------------------------------
// QueryBuilder
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
struct TypeSpec {
    type_id: TypeId,
    type_name: &'static str,
}

impl TypeSpec {
    fn of<T: Component>() -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
        }
    }
}

/// Describes which entities a [`Query`] matches.
///
/// - `all`: every listed component must be present.
/// - `any`: at least one listed component must be present (ignored if empty).
/// - `none`: no listed component may be present.
/// - `changed`: like `all`, and additionally tracked by
///   [`Query::changed_entities`].
#[derive(Debug, Clone, Default)]
pub struct QueryBuilder {
    all: Vec<TypeSpec>,
    any: Vec<TypeSpec>,
    none: Vec<TypeSpec>,
    changed: Vec<TypeSpec>,
}

impl QueryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all<T: Component>(mut self) -> Self {
        self.all.push(TypeSpec::of::<T>());
        self
    }

    pub fn any<T: Component>(mut self) -> Self {
        self.any.push(TypeSpec::of::<T>());
        self
    }

    pub fn none<T: Component>(mut self) -> Self {
        self.none.push(TypeSpec::of::<T>());
        self
    }

    pub fn changed<T: Component>(mut self) -> Self {
        self.all.push(TypeSpec::of::<T>());
        self.changed.push(TypeSpec::of::<T>());
        self
    }

    /// Resolve the component sets against `world`'s registry.
    pub fn build(&self, world: &World) -> Result<Query, EcsError> {
        let registry = world.registry();
        Ok(Query {
            all: resolve(registry, &self.all)?,
            any: resolve(registry, &self.any)?,
            none: resolve(registry, &self.none)?,
            changed: resolve(registry, &self.changed)?,
            matched: Vec::new(),
            cache_version: None,
            last_change_check: ChangeStamp::ZERO,
        })
    }
}

fn resolve(
    registry: &ComponentRegistry,
    specs: &[TypeSpec],
) -> Result<Vec<ComponentTypeId>, EcsError> {
    let mut ids = specs
        .iter()
        .map(|s| registry.id_of_type_id(s.type_id, s.type_name))
        .collect::<Result<Vec<_>, _>>()?;
    ids.sort();
    ids.dedup();
    Ok(ids)
}

// ---------------------------------------------------------------------------
// Query
// ---------------------------------------------------------------------------

/// A filter over entities with a cached list of matching archetypes.
#[derive(Debug, Clone)]
pub struct Query {
    all: Vec<ComponentTypeId>,
    any: Vec<ComponentTypeId>,
    none: Vec<ComponentTypeId>,
    changed: Vec<ComponentTypeId>,
    matched: Vec<ArchetypeId>,
    /// Archetype version the `matched` list was computed for.
    cache_version: Option<u64>,
    last_change_check: ChangeStamp,
}

impl Query {
    pub fn all(&self) -> &[ComponentTypeId] {
        &self.all
    }

    pub fn any(&self) -> &[ComponentTypeId] {
        &self.any
    }

    pub fn none(&self) -> &[ComponentTypeId] {
        &self.none
    }

    pub fn changed(&self) -> &[ComponentTypeId] {
        &self.changed
    }

    /// Whether an archetype with `signature` satisfies the filter.
    pub fn matches_signature(&self, signature: &[ComponentTypeId]) -> bool {
        let has = |t: &ComponentTypeId| signature.binary_search(t).is_ok();
        self.all.iter().all(has)
            && (self.any.is_empty() || self.any.iter().any(has))
            && !self.none.iter().any(has)
    }

    /// Matched archetypes as of the last evaluation.
    pub fn matched_archetypes(&self) -> &[ArchetypeId] {
        &self.matched
    }

    pub fn cache_version(&self) -> Option<u64> {
        self.cache_version
    }

    fn refresh(&mut self, world: &World) {
        let version = world.archetype_version();
        if self.cache_version == Some(version) {
            return;
        }
        self.matched = world
            .archetypes()
            .iter()
            .filter(|a| self.matches_signature(a.signature()))
            .map(Archetype::id)
            .collect();
        self.cache_version = Some(version);
        tracing::trace!(
            version,
            matched = self.matched.len(),
            "refreshed query archetype cache"
        );
    }

    /// Number of matching entities.
    pub fn size(&mut self, world: &World) -> usize {
        self.refresh(world);
        self.matched
            .iter()
            .filter_map(|&id| world.archetypes().get(id))
            .map(Archetype::len)
            .sum()
    }

    pub fn is_empty(&mut self, world: &World) -> bool {
        self.size(world) == 0
    }

    /// Matching entities in archetype-creation order, then row order.
    pub fn entities(&mut self, world: &World) -> Vec<EntityId> {
        self.refresh(world);
        self.matched
            .iter()
            .filter_map(|&id| world.archetypes().get(id))
            .flat_map(|a| a.entities().iter().copied())
            .collect()
    }

    /// Whether `entity` is currently in the match set.
    pub fn matches(&mut self, world: &World, entity: EntityId) -> bool {
        self.refresh(world);
        world
            .locate(entity)
            .is_ok_and(|loc| self.matched.contains(&loc.archetype))
    }

    /// Visit every matching entity read-only.
    pub fn for_each<F>(&mut self, world: &World, mut f: F)
    where
        F: FnMut(EntityRef<'_>),
    {
        self.refresh(world);
        for &id in &self.matched {
            let Some(archetype) = world.archetypes().get(id) else {
                continue;
            };
            for (row, &entity) in archetype.entities().iter().enumerate() {
                f(EntityRef {
                    entity,
                    archetype,
                    registry: world.registry(),
                    row,
                });
            }
        }
    }

    /// Visit every matching entity with mutable access to its components.
    ///
    /// One change stamp is taken for the whole pass; every component
    /// borrowed mutably through the row handle is stamped with it.
    pub fn for_each_mut<F>(&mut self, world: &mut World, mut f: F)
    where
        F: FnMut(&mut EntityRowMut<'_>),
    {
        self.refresh(world);
        let stamp = world.clock.advance();
        let World {
            registry,
            archetypes,
            ..
        } = world;
        for &id in &self.matched {
            let Some(archetype) = archetypes.get_mut(id) else {
                continue;
            };
            for row in 0..archetype.len() {
                let entity = archetype.entities()[row];
                let mut handle = EntityRowMut {
                    entity,
                    archetype: &mut *archetype,
                    registry: &*registry,
                    row,
                    stamp,
                };
                f(&mut handle);
            }
        }
    }

    /// Matching entities whose `changed` components were written since the
    /// previous call (all matching entities on the first call). Without a
    /// `changed` set every matching entity is reported.
    pub fn changed_entities(&mut self, world: &World) -> Vec<EntityId> {
        self.refresh(world);
        let since = self.last_change_check;
        let mut out = Vec::new();
        for archetype in self.matched.iter().filter_map(|&id| world.archetypes().get(id)) {
            for (row, &entity) in archetype.entities().iter().enumerate() {
                let changed = self.changed.is_empty()
                    || self.changed.iter().any(|&t| {
                        archetype
                            .stamp(t, row)
                            .is_some_and(|s| s.is_newer_than(since))
                    });
                if changed {
                    out.push(entity);
                }
            }
        }
        self.last_change_check = world.change_stamp();
        out
    }
}

// ---------------------------------------------------------------------------
// Row handles
// ---------------------------------------------------------------------------

/// Read-only view of one matched entity.
#[derive(Clone, Copy)]
pub struct EntityRef<'w> {
    entity: EntityId,
    archetype: &'w Archetype,
    registry: &'w ComponentRegistry,
    row: usize,
}

impl<'w> EntityRef<'w> {
    pub fn id(&self) -> EntityId {
        self.entity
    }

    pub fn archetype(&self) -> ArchetypeId {
        self.archetype.id()
    }

    pub fn get<T: Component>(&self) -> Option<&'w T> {
        let id = self.registry.lookup::<T>()?;
        self.archetype.get::<T>(id, self.row)
    }

    pub fn has<T: Component>(&self) -> bool {
        self.registry
            .lookup::<T>()
            .is_some_and(|id| self.archetype.has_component(id))
    }

    pub fn stamp<T: Component>(&self) -> Option<ChangeStamp> {
        let id = self.registry.lookup::<T>()?;
        self.archetype.stamp(id, self.row)
    }
}

/// Mutable view of one matched entity's components.
///
/// Only component values can be changed through this handle; structural
/// changes are queued on a command buffer instead.
pub struct EntityRowMut<'w> {
    entity: EntityId,
    archetype: &'w mut Archetype,
    registry: &'w ComponentRegistry,
    row: usize,
    stamp: ChangeStamp,
}

impl<'w> EntityRowMut<'w> {
    pub fn id(&self) -> EntityId {
        self.entity
    }

    /// The stamp applied to components written through this handle.
    pub fn stamp(&self) -> ChangeStamp {
        self.stamp
    }

    pub fn has<T: Component>(&self) -> bool {
        self.registry
            .lookup::<T>()
            .is_some_and(|id| self.archetype.has_component(id))
    }

    pub fn get<T: Component>(&self) -> Option<&T> {
        let id = self.registry.lookup::<T>()?;
        self.archetype.get::<T>(id, self.row)
    }

    pub fn get_mut<T: Component>(&mut self) -> Option<&mut T> {
        let id = self.registry.lookup::<T>()?;
        self.archetype.get_mut::<T>(id, self.row, self.stamp)
    }

    /// Two different components of this row, both mutable.
    pub fn get_pair_mut<A: Component, B: Component>(&mut self) -> Option<(&mut A, &mut B)> {
        let a = self.registry.lookup::<A>()?;
        let b = self.registry.lookup::<B>()?;
        let (col_a, col_b) = self.archetype.column_pair_mut::<A, B>(a, b)?;
        Some((
            col_a.get_mut(self.row, self.stamp)?,
            col_b.get_mut(self.row, self.stamp)?,
        ))
    }

    /// Overwrite a component, returning the previous value.
    pub fn set<T: Component>(&mut self, value: T) -> Option<T> {
        let id = self.registry.lookup::<T>()?;
        self.archetype
            .column_mut::<T>(id)?
            .set(self.row, value, self.stamp)
    }
}

// ---------------------------------------------------------------------------
// Typed views
// ---------------------------------------------------------------------------

/// One element of a typed query tuple.
pub trait QueryItem {
    type Item<'w>;

    fn component_type_id(registry: &ComponentRegistry) -> Option<ComponentTypeId>;

    fn fetch<'w>(archetype: &'w Archetype, id: ComponentTypeId, row: usize)
        -> Option<Self::Item<'w>>;
}

impl<T: Component> QueryItem for &T {
    type Item<'w> = &'w T;

    fn component_type_id(registry: &ComponentRegistry) -> Option<ComponentTypeId> {
        registry.lookup::<T>()
    }

    fn fetch<'w>(archetype: &'w Archetype, id: ComponentTypeId, row: usize) -> Option<&'w T> {
        archetype.get::<T>(id, row)
    }
}

/// A tuple of [`QueryItem`]s usable with [`World::query`].
pub trait QueryData {
    type Item<'w>;

    /// Component ids in tuple order, or `None` if any type is unregistered.
    fn type_ids(registry: &ComponentRegistry) -> Option<Vec<ComponentTypeId>>;

    fn fetch_row<'w>(
        archetype: &'w Archetype,
        ids: &[ComponentTypeId],
        row: usize,
    ) -> Option<Self::Item<'w>>;
}

macro_rules! impl_query_data {
    ($($name:ident),+) => {
        impl<$($name: QueryItem),+> QueryData for ($($name,)+) {
            type Item<'w> = ($($name::Item<'w>,)+);

            fn type_ids(registry: &ComponentRegistry) -> Option<Vec<ComponentTypeId>> {
                Some(vec![$($name::component_type_id(registry)?),+])
            }

            fn fetch_row<'w>(
                archetype: &'w Archetype,
                ids: &[ComponentTypeId],
                row: usize,
            ) -> Option<Self::Item<'w>> {
                let mut ids = ids.iter().copied();
                Some(($($name::fetch(archetype, ids.next()?, row)?,)+))
            }
        }
    };
}

impl_query_data!(A);
impl_query_data!(A, B);
impl_query_data!(A, B, C);
impl_query_data!(A, B, C, D);

/// Iterator returned by [`World::query`]; yields `(EntityId, items)`.
pub struct QueryIter<'w, Q: QueryData> {
    world: &'w World,
    ids: Vec<ComponentTypeId>,
    archetypes: Vec<ArchetypeId>,
    arch_cursor: usize,
    row_cursor: usize,
    _marker: PhantomData<fn() -> Q>,
}

impl<'w, Q: QueryData> QueryIter<'w, Q> {
    pub(crate) fn new(world: &'w World) -> Self {
        let (ids, archetypes) = match Q::type_ids(world.registry()) {
            Some(ids) => {
                let archetypes = world
                    .archetypes()
                    .iter()
                    .filter(|a| ids.iter().all(|&t| a.has_component(t)))
                    .map(Archetype::id)
                    .collect();
                (ids, archetypes)
            }
            // An unregistered type cannot be stored, so nothing matches.
            None => (Vec::new(), Vec::new()),
        };
        Self {
            world,
            ids,
            archetypes,
            arch_cursor: 0,
            row_cursor: 0,
            _marker: PhantomData,
        }
    }
}

impl<'w, Q: QueryData> Iterator for QueryIter<'w, Q> {
    type Item = (EntityId, Q::Item<'w>);

    fn next(&mut self) -> Option<Self::Item> {
        let world = self.world;
        loop {
            let id = *self.archetypes.get(self.arch_cursor)?;
            let archetype = world.archetypes().get(id)?;
            if self.row_cursor >= archetype.len() {
                self.arch_cursor += 1;
                self.row_cursor = 0;
                continue;
            }
            let row = self.row_cursor;
            self.row_cursor += 1;
            if let Some(item) = Q::fetch_row(archetype, &self.ids, row) {
                return Some((archetype.entities()[row], item));
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
