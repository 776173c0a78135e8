//! Command buffer for deferred structural mutations.
//!
//! Code that cannot mutate the [`World`] directly (systems iterating a
//! query) records structural intents in a [`CommandBuffer`]: create, destroy,
//! add component, remove component. [`CommandBuffer::flush`] applies them in
//! strict insertion order (FIFO). Each entry is applied independently: a
//! failing entry is recorded in the [`FlushReport`] and logged, and later
//! entries still run.
//!
//! # Example
//!
//! ```
//! use tessera_ecs::prelude::*;
//!
//! #[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
//! struct Health(u32);
//!
//! let mut world = World::new();
//! world.register_component::<Health>("health").unwrap();
//! let entity = world.spawn();
//!
//! let mut cmds = CommandBuffer::new();
//! cmds.add_component(entity, Health(50));
//! cmds.destroy(EntityId::new(99, 0));
//!
//! let report = cmds.flush(&mut world);
//! assert_eq!(report.success_count, 1);
//! assert_eq!(report.failed_count, 1);
//! assert_eq!(world.get_component::<Health>(entity), Ok(&Health(50)));
//! ```

use std::any::TypeId;
use std::collections::HashMap;
use std::fmt;

use tracing::warn;

use crate::column::BoxedComponent;
use crate::component::Component;
use crate::entity::EntityId;
use crate::world::{ComponentBundle, World};
use crate::EcsError;

// ---------------------------------------------------------------------------
// CommandKind
// ---------------------------------------------------------------------------

/// What mutation a command performs.
pub enum CommandKind {
    /// Spawn a new entity with the bundled components.
    Create {
        name: Option<String>,
        bundle: ComponentBundle,
    },
    /// Destroy an entity.
    Destroy { entity: EntityId },
    /// Attach a component value (fails if already present).
    AddComponent {
        entity: EntityId,
        type_id: TypeId,
        type_name: &'static str,
        value: BoxedComponent,
    },
    /// Detach a component, dropping its value.
    RemoveComponent {
        entity: EntityId,
        type_id: TypeId,
        type_name: &'static str,
    },
}

impl CommandKind {
    /// Which entity this command targets. `None` for creates.
    pub fn target(&self) -> Option<EntityId> {
        match self {
            CommandKind::Create { .. } => None,
            CommandKind::Destroy { entity }
            | CommandKind::AddComponent { entity, .. }
            | CommandKind::RemoveComponent { entity, .. } => Some(*entity),
        }
    }

    pub fn op(&self) -> CommandOp {
        match self {
            CommandKind::Create { .. } => CommandOp::Create,
            CommandKind::Destroy { .. } => CommandOp::Destroy,
            CommandKind::AddComponent { .. } => CommandOp::AddComponent,
            CommandKind::RemoveComponent { .. } => CommandOp::RemoveComponent,
        }
    }

    /// `(entity, component type)` touched by add/remove commands.
    fn component_key(&self) -> Option<(EntityId, TypeId, &'static str)> {
        match self {
            CommandKind::AddComponent {
                entity,
                type_id,
                type_name,
                ..
            }
            | CommandKind::RemoveComponent {
                entity,
                type_id,
                type_name,
            } => Some((*entity, *type_id, *type_name)),
            _ => None,
        }
    }
}

impl fmt::Debug for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandKind::Create { name, bundle } => f
                .debug_struct("Create")
                .field("name", name)
                .field("bundle", bundle)
                .finish(),
            CommandKind::Destroy { entity } => {
                f.debug_struct("Destroy").field("entity", entity).finish()
            }
            CommandKind::AddComponent {
                entity, type_name, ..
            } => f
                .debug_struct("AddComponent")
                .field("entity", entity)
                .field("component", type_name)
                .finish_non_exhaustive(),
            CommandKind::RemoveComponent {
                entity, type_name, ..
            } => f
                .debug_struct("RemoveComponent")
                .field("entity", entity)
                .field("component", type_name)
                .finish_non_exhaustive(),
        }
    }
}

/// Payload-free label of a [`CommandKind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandOp {
    Create,
    Destroy,
    AddComponent,
    RemoveComponent,
}

// ---------------------------------------------------------------------------
// Command
// ---------------------------------------------------------------------------

/// A single queued mutation.
#[derive(Debug)]
pub struct Command {
    /// Sequential index within the buffer (set on insertion).
    pub index: u32,
    /// Name of whoever queued the command (usually a system), if set.
    pub issued_by: Option<String>,
    pub kind: CommandKind,
}

impl Command {
    pub fn target(&self) -> Option<EntityId> {
        self.kind.target()
    }
}

// ---------------------------------------------------------------------------
// FlushReport
// ---------------------------------------------------------------------------

/// Result of applying one command.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandOutcome {
    pub index: u32,
    pub op: CommandOp,
    pub target: Option<EntityId>,
    pub issued_by: Option<String>,
    /// For creates: the entity that was spawned.
    pub spawned: Option<EntityId>,
    pub result: Result<(), EcsError>,
}

impl CommandOutcome {
    pub fn is_applied(&self) -> bool {
        self.result.is_ok()
    }
}

/// Summary of one or more [`CommandBuffer::flush`] calls.
///
/// `conflict_count` counts `(entity, component)` pairs targeted by more than
/// one add/remove entry; insertion order still decides the result.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlushReport {
    pub outcomes: Vec<CommandOutcome>,
    pub success_count: usize,
    pub failed_count: usize,
    pub conflict_count: usize,
}

impl FlushReport {
    /// No entry failed.
    pub fn is_clean(&self) -> bool {
        self.failed_count == 0
    }

    pub fn failures(&self) -> impl Iterator<Item = &CommandOutcome> {
        self.outcomes.iter().filter(|o| o.result.is_err())
    }

    /// Entities created by this flush, in order.
    pub fn spawned(&self) -> Vec<EntityId> {
        self.outcomes.iter().filter_map(|o| o.spawned).collect()
    }

    /// Append another report (later flush) to this one.
    pub fn merge(&mut self, other: FlushReport) {
        self.outcomes.extend(other.outcomes);
        self.success_count += other.success_count;
        self.failed_count += other.failed_count;
        self.conflict_count += other.conflict_count;
    }
}

// ---------------------------------------------------------------------------
// CommandBuffer
// ---------------------------------------------------------------------------

/// Collects structural commands and applies them in FIFO order.
#[derive(Debug, Default)]
pub struct CommandBuffer {
    commands: Vec<Command>,
    next_index: u32,
    issuer: Option<String>,
}

impl CommandBuffer {
    /// Create a new, empty command buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Name recorded as `issued_by` on commands queued from now on.
    pub fn set_issuer(&mut self, issuer: Option<&str>) {
        self.issuer = issuer.map(str::to_owned);
    }

    fn push(&mut self, kind: CommandKind) {
        let index = self.next_index;
        self.next_index += 1;
        self.commands.push(Command {
            index,
            issued_by: self.issuer.clone(),
            kind,
        });
    }

    /// Queue the creation of an entity with `bundle`.
    pub fn create(&mut self, bundle: ComponentBundle) {
        self.push(CommandKind::Create { name: None, bundle });
    }

    /// Queue the creation of a named entity with `bundle`.
    pub fn create_named(&mut self, name: &str, bundle: ComponentBundle) {
        self.push(CommandKind::Create {
            name: Some(name.to_owned()),
            bundle,
        });
    }

    /// Queue the destruction of `entity`.
    pub fn destroy(&mut self, entity: EntityId) {
        self.push(CommandKind::Destroy { entity });
    }

    /// Queue adding `value` to `entity`.
    pub fn add_component<T: Component>(&mut self, entity: EntityId, value: T) {
        self.push(CommandKind::AddComponent {
            entity,
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
            value: Box::new(value),
        });
    }

    /// Queue removing the `T` component from `entity`.
    pub fn remove_component<T: Component>(&mut self, entity: EntityId) {
        self.push(CommandKind::RemoveComponent {
            entity,
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
        });
    }

    /// Queued commands in insertion order.
    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Drop every queued command without applying it.
    pub fn clear(&mut self) {
        self.commands.clear();
        self.next_index = 0;
    }

    /// Apply all queued commands to `world` in insertion order and empty the
    /// buffer.
    pub fn flush(&mut self, world: &mut World) -> FlushReport {
        let commands = std::mem::take(&mut self.commands);
        self.next_index = 0;
        if commands.is_empty() {
            return FlushReport::default();
        }

        let mut report = FlushReport {
            conflict_count: count_conflicts(&commands),
            ..FlushReport::default()
        };

        for Command {
            index,
            issued_by,
            kind,
        } in commands
        {
            let op = kind.op();
            let target = kind.target();
            let (result, spawned) = apply_one(world, kind);
            match &result {
                Ok(()) => report.success_count += 1,
                Err(e) => {
                    report.failed_count += 1;
                    warn!(
                        command_index = index,
                        op = ?op,
                        target = ?target,
                        issued_by = issued_by.as_deref().unwrap_or("-"),
                        error = %e,
                        "command application failed"
                    );
                }
            }
            report.outcomes.push(CommandOutcome {
                index,
                op,
                target,
                issued_by,
                spawned,
                result,
            });
        }
        report
    }
}

fn apply_one(world: &mut World, kind: CommandKind) -> (Result<(), EcsError>, Option<EntityId>) {
    match kind {
        CommandKind::Create { name, bundle } => {
            match world.spawn_bundle_named(name.as_deref(), bundle) {
                Ok(entity) => (Ok(()), Some(entity)),
                Err(e) => (Err(e), None),
            }
        }
        CommandKind::Destroy { entity } => (world.despawn(entity), None),
        CommandKind::AddComponent {
            entity,
            type_id,
            type_name,
            value,
        } => {
            let result = world.locate(entity).and_then(|_| {
                let id = world.registry().id_of_type_id(type_id, type_name)?;
                world.add_component_boxed(entity, id, value)
            });
            (result, None)
        }
        CommandKind::RemoveComponent {
            entity,
            type_id,
            type_name,
        } => {
            let result = world.locate(entity).and_then(|_| {
                let id = world.registry().id_of_type_id(type_id, type_name)?;
                world.remove_component_by_id(entity, id)
            });
            (result, None)
        }
    }
}

fn count_conflicts(commands: &[Command]) -> usize {
    let mut seen: HashMap<(EntityId, TypeId), (&'static str, Vec<u32>)> = HashMap::new();
    for cmd in commands {
        if let Some((entity, type_id, type_name)) = cmd.kind.component_key() {
            seen.entry((entity, type_id))
                .or_insert_with(|| (type_name, Vec::new()))
                .1
                .push(cmd.index);
        }
    }
    let mut conflict_count = 0;
    for ((entity, _), (component, indices)) in &seen {
        if indices.len() > 1 {
            conflict_count += 1;
            warn!(
                entity = ?entity,
                component = %component,
                command_indices = ?indices,
                "{} commands target the same entity+component in one flush (applied in order)",
                indices.len()
            );
        }
    }
    conflict_count
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
