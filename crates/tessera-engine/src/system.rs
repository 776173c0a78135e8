//! System descriptors and the context handed to system callbacks.
//!
//! A system is a named bundle of a query, a priority, a timestep group and up
//! to three callbacks:
//!
//! - `before(&World, &mut SystemContext)` runs once per group run, read-only.
//! - `act(&mut EntityRowMut, &mut SystemContext)` runs once per matched entity
//!   and may read and write that entity's components in place.
//! - `after(&World, &mut SystemContext)` runs once per group run, read-only.
//!
//! None of the callbacks can reach `&mut World`; structural changes go through
//! [`SystemContext::commands`] and are applied at the next flush point.

use tessera_ecs::command::CommandBuffer;
use tessera_ecs::query::{EntityRowMut, QueryBuilder};
use tessera_ecs::world::World;

pub(crate) type HookFn = Box<dyn FnMut(&World, &mut SystemContext<'_>)>;
pub(crate) type ActFn = Box<dyn FnMut(&mut EntityRowMut<'_>, &mut SystemContext<'_>)>;

/// Which timestep group a system belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Timestep {
    /// Runs zero or more times per update, once per whole fixed step.
    Fixed,
    /// Runs exactly once per update with the real frame delta.
    #[default]
    Variable,
}

/// Lifecycle state of a registered system.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemState {
    /// Registered but has not run yet.
    Registered,
    /// Has run at least once and stays in the run order.
    Scheduled,
    /// Skipped by the scheduler until re-enabled.
    Disabled,
}

/// Timing information for the group run a callback belongs to.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickTime {
    /// Milliseconds covered by this run: the fixed step for fixed systems,
    /// the clamped frame delta for variable ones.
    pub delta_ms: f64,
    /// Engine time elapsed before the current update, in milliseconds.
    pub elapsed_ms: f64,
    /// Index of the current update (0 for the first call).
    pub tick: u64,
    /// Group being run.
    pub timestep: Timestep,
    /// For fixed runs, the step number within this update. Always 0 for
    /// variable runs.
    pub step: u32,
}

/// What a system callback gets besides the world or row.
pub struct SystemContext<'a> {
    /// Deferred structural changes. Entries are tagged with the issuing
    /// system's name.
    pub commands: &'a mut CommandBuffer,
    pub time: TickTime,
}

/// Declarative description of a system, passed to
/// [`Engine::create_system`](crate::engine::Engine::create_system).
pub struct SystemDescriptor {
    pub(crate) name: String,
    pub(crate) query: QueryBuilder,
    pub(crate) priority: i32,
    pub(crate) timestep: Timestep,
    pub(crate) before: Option<HookFn>,
    pub(crate) act: Option<ActFn>,
    pub(crate) after: Option<HookFn>,
}

impl SystemDescriptor {
    /// A variable-timestep system with priority 0 and no callbacks.
    pub fn new(name: &str, query: QueryBuilder) -> Self {
        Self {
            name: name.to_owned(),
            query,
            priority: 0,
            timestep: Timestep::Variable,
            before: None,
            act: None,
            after: None,
        }
    }

    /// Higher priorities run first within a phase.
    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Move the system into the fixed-timestep group.
    pub fn fixed(mut self) -> Self {
        self.timestep = Timestep::Fixed;
        self
    }

    pub fn before<F>(mut self, hook: F) -> Self
    where
        F: FnMut(&World, &mut SystemContext<'_>) + 'static,
    {
        self.before = Some(Box::new(hook));
        self
    }

    pub fn act<F>(mut self, act: F) -> Self
    where
        F: FnMut(&mut EntityRowMut<'_>, &mut SystemContext<'_>) + 'static,
    {
        self.act = Some(Box::new(act));
        self
    }

    pub fn after<F>(mut self, hook: F) -> Self
    where
        F: FnMut(&World, &mut SystemContext<'_>) + 'static,
    {
        self.after = Some(Box::new(hook));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Debug for SystemDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SystemDescriptor")
            .field("name", &self.name)
            .field("priority", &self.priority)
            .field("timestep", &self.timestep)
            .field("before", &self.before.is_some())
            .field("act", &self.act.is_some())
            .field("after", &self.after.is_some())
            .finish()
    }
}
