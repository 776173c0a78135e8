//! Tessera ECS -- archetype-based entity component store.
//!
//! Entities are grouped in archetypes (one per unique set of component types)
//! using a Structure-of-Arrays layout for cache-friendly iteration. Generational
//! entity IDs give immediate stale-reference detection, structural changes
//! requested during iteration go through a [`CommandBuffer`](command::CommandBuffer),
//! and every component row carries a change stamp.
//!
//! # Quick Start
//!
//! ```
//! use tessera_ecs::prelude::*;
//!
//! #[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
//! struct Position { x: f32, y: f32 }
//!
//! #[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
//! struct Velocity { dx: f32, dy: f32 }
//!
//! let mut world = World::new();
//! world.register_component::<Position>("position").unwrap();
//! world.register_component::<Velocity>("velocity").unwrap();
//!
//! let bundle = ComponentBundle::new()
//!     .with(Position { x: 0.0, y: 0.0 })
//!     .with(Velocity { dx: 1.0, dy: 0.0 });
//! let entity = world.spawn_bundle(bundle).unwrap();
//!
//! let mut moving = QueryBuilder::new()
//!     .all::<Position>()
//!     .all::<Velocity>()
//!     .build(&world)
//!     .unwrap();
//! moving.for_each_mut(&mut world, |row| {
//!     if let Some((pos, vel)) = row.get_pair_mut::<Position, Velocity>() {
//!         pos.x += vel.dx;
//!     }
//! });
//!
//! assert_eq!(world.get_component::<Position>(entity), Ok(&Position { x: 1.0, y: 0.0 }));
//! ```

#![deny(unsafe_code)]

pub mod archetype;
pub mod change;
pub mod column;
pub mod command;
pub mod component;
pub mod entity;
pub mod query;
pub mod snapshot;
pub mod world;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors produced by ECS operations.
///
/// Errors are `Clone` so that flush reports can keep a copy per failed
/// command entry.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EcsError {
    /// The entity does not exist (stale generation or never allocated).
    #[error("entity {entity:?} does not exist (stale or never allocated)")]
    InvalidEntity { entity: entity::EntityId },

    /// A component type was referenced that has not been registered.
    #[error("component type '{name}' is not registered")]
    UnregisteredType { name: String },

    /// The entity does not carry the requested component.
    #[error("entity {entity:?} has no '{component}' component")]
    MissingComponent {
        entity: entity::EntityId,
        component: String,
    },

    /// The entity already carries the component being added.
    #[error("entity {entity:?} already has a '{component}' component")]
    DuplicateComponent {
        entity: entity::EntityId,
        component: String,
    },

    /// A component's registration rules rejected the insertion.
    #[error("cannot add '{component}': {reason}")]
    DependencyValidation { component: String, reason: String },

    /// The component name is already bound to a different Rust type.
    #[error("component name '{name}' is already registered for a different type")]
    DuplicateComponentName { name: String },

    /// A snapshot could not be captured or restored.
    #[error("snapshot error: {details}")]
    Snapshot { details: String },
}

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports for common usage.
pub mod prelude {
    pub use crate::archetype::{Archetype, ArchetypeId, Archetypes};
    pub use crate::change::ChangeStamp;
    pub use crate::command::{
        Command, CommandBuffer, CommandKind, CommandOutcome, FlushReport,
    };
    pub use crate::component::{
        Component, ComponentInfo, ComponentRegistry, ComponentRules, ComponentTypeId,
    };
    pub use crate::entity::{EntityAllocator, EntityId, EntityLocation};
    pub use crate::query::{EntityRef, EntityRowMut, Query, QueryBuilder, QueryData, QueryIter};
    pub use crate::snapshot::{ComponentSnapshot, EntitySnapshot, WorldSnapshot};
    pub use crate::world::{ComponentBundle, EntityWorldMut, World};
    pub use crate::EcsError;
}

// ---------------------------------------------------------------------------
// Integration tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::prelude::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Pos {
        x: f32,
        y: f32,
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Vel {
        dx: f32,
        dy: f32,
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Health(u32);

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Frozen;

    fn setup_world() -> World {
        let mut world = World::new();
        world.register_component::<Pos>("position").unwrap();
        world.register_component::<Vel>("velocity").unwrap();
        world.register_component::<Health>("health").unwrap();
        world.register_component::<Frozen>("frozen").unwrap();
        world
    }

    // -- add then remove restores the original signature ---------------------

    #[test]
    fn add_then_remove_restores_signature() {
        let mut world = setup_world();
        let e = world.spawn_with(Pos { x: 1.0, y: 2.0 }).unwrap();
        let before = world.signature_of(e).unwrap().to_vec();

        world.add_component(e, Health(10)).unwrap();
        assert!(world.has_component::<Health>(e));

        world.remove_component::<Health>(e).unwrap();
        assert!(!world.has_component::<Health>(e));
        assert_eq!(world.signature_of(e).unwrap(), before.as_slice());
        assert_eq!(world.get_component::<Pos>(e), Ok(&Pos { x: 1.0, y: 2.0 }));
    }

    // -- query match set follows structural changes ----------------------------

    #[test]
    fn query_match_set_tracks_migrations() {
        let mut world = setup_world();
        let both = world
            .spawn_bundle(
                ComponentBundle::new()
                    .with(Pos { x: 0.0, y: 0.0 })
                    .with(Vel { dx: 1.0, dy: 1.0 }),
            )
            .unwrap();
        let _only_pos = world.spawn_with(Pos { x: 5.0, y: 5.0 }).unwrap();

        let mut query = QueryBuilder::new()
            .all::<Pos>()
            .all::<Vel>()
            .build(&world)
            .unwrap();
        assert_eq!(query.entities(&world), vec![both]);

        // Unrelated component keeps membership.
        world.add_component(both, Health(3)).unwrap();
        assert_eq!(query.entities(&world), vec![both]);

        // Losing a required component drops it.
        world.remove_component::<Vel>(both).unwrap();
        assert!(query.entities(&world).is_empty());
        assert_eq!(query.size(&world), 0);
    }

    // -- stale ids -------------------------------------------------------------

    #[test]
    fn recycled_index_rejects_old_handle() {
        let mut world = setup_world();
        let old = world.spawn();
        world.despawn(old).unwrap();
        let new = world.spawn();

        assert_eq!(new.index(), old.index());
        assert_ne!(new.generation(), old.generation());
        assert_eq!(
            world.locate(old),
            Err(EcsError::InvalidEntity { entity: old })
        );
        assert_eq!(
            world.add_component(old, Health(1)),
            Err(EcsError::InvalidEntity { entity: old })
        );
    }

    // -- deferred commands equal direct application ----------------------------

    #[test]
    fn queued_ops_match_sequential_application() {
        let mut direct = setup_world();
        let mut deferred = setup_world();
        let a = direct.spawn();
        let b = deferred.spawn();

        direct.add_component(a, Health(1)).unwrap();
        direct.add_component(a, Pos { x: 1.0, y: 1.0 }).unwrap();
        direct.remove_component::<Health>(a).unwrap();
        direct.add_component(a, Vel { dx: 2.0, dy: 0.0 }).unwrap();

        let mut commands = CommandBuffer::new();
        commands.add_component(b, Health(1));
        commands.add_component(b, Pos { x: 1.0, y: 1.0 });
        commands.remove_component::<Health>(b);
        commands.add_component(b, Vel { dx: 2.0, dy: 0.0 });
        let report = commands.flush(&mut deferred);

        assert_eq!(report.failed_count, 0);
        assert_eq!(direct.signature_of(a), deferred.signature_of(b));
        assert_eq!(direct.get_component::<Pos>(a), deferred.get_component::<Pos>(b));
        assert_eq!(direct.get_component::<Vel>(a), deferred.get_component::<Vel>(b));
    }

    // -- moving entities inside an archetype -----------------------------------

    #[test]
    fn swap_remove_keeps_records_consistent() {
        let mut world = setup_world();
        let ids: Vec<EntityId> = (0..5)
            .map(|i| world.spawn_with(Health(i)).unwrap())
            .collect();

        world.despawn(ids[1]).unwrap();
        world.remove_component::<Health>(ids[2]).unwrap();

        for &e in [ids[0], ids[3], ids[4]].iter() {
            let loc = world.locate(e).unwrap();
            let arch = world.archetypes().get(loc.archetype).unwrap();
            assert_eq!(arch.entities()[loc.row], e);
        }
        assert_eq!(world.get_component::<Health>(ids[4]), Ok(&Health(4)));
        assert_eq!(world.get_component::<Health>(ids[3]), Ok(&Health(3)));
    }

    // -- tags and no-payload components ----------------------------------------

    #[test]
    fn marker_components_migrate_like_any_other() {
        let mut world = setup_world();
        let e = world.spawn_with(Pos { x: 0.0, y: 0.0 }).unwrap();
        world.add_component(e, Frozen).unwrap();

        let mut frozen = QueryBuilder::new().all::<Frozen>().build(&world).unwrap();
        assert!(frozen.matches(&world, e));

        world.remove_component::<Frozen>(e).unwrap();
        assert!(!frozen.matches(&world, e));
    }
}
