//! Priority-ordered system scheduler.
//!
//! The [`Scheduler`] keeps every registered system together with its bound
//! [`Query`]. Systems run in descending priority; systems with the same
//! priority keep their registration order. A group run (all fixed systems
//! or all variable systems) goes through three phases:
//!
//! 1. every `before` hook, then flush;
//! 2. every `act` callback over the system's matched entities, then flush
//!    (with [`FlushPolicy::PerSystem`], also after each system);
//! 3. every `after` hook, then flush.
//!
//! Commands queued by a system are tagged with its name, so flush reports
//! attribute failures to the system that issued them.

use std::time::{Duration, Instant};

use tessera_ecs::command::{CommandBuffer, FlushReport};
use tessera_ecs::query::Query;
use tessera_ecs::world::World;

use crate::config::FlushPolicy;
use crate::system::{ActFn, HookFn, SystemContext, SystemDescriptor, SystemState, TickTime, Timestep};
use crate::EngineError;

// ---------------------------------------------------------------------------
// RegisteredSystem
// ---------------------------------------------------------------------------

struct RegisteredSystem {
    name: String,
    query: Query,
    priority: i32,
    timestep: Timestep,
    state: SystemState,
    before: Option<HookFn>,
    act: Option<ActFn>,
    after: Option<HookFn>,
}

impl RegisteredSystem {
    fn runs_in(&self, timestep: Timestep) -> bool {
        self.timestep == timestep && self.state != SystemState::Disabled
    }
}

#[derive(Clone, Copy)]
enum Phase {
    Before,
    After,
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// Owns the systems and decides the order they run in.
#[derive(Default)]
pub struct Scheduler {
    systems: Vec<RegisteredSystem>,
    /// Indices into `systems`, in run order.
    order: Vec<usize>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a system, binding its query against `world`.
    ///
    /// # Errors
    ///
    /// [`EngineError::DuplicateSystem`] if the name is taken, or the ECS error
    /// from building the query (for example an unregistered component type).
    pub fn add(&mut self, descriptor: SystemDescriptor, world: &World) -> Result<(), EngineError> {
        if self.position(&descriptor.name).is_some() {
            return Err(EngineError::DuplicateSystem {
                name: descriptor.name,
            });
        }
        let query = descriptor.query.build(world)?;

        tracing::debug!(
            system = %descriptor.name,
            priority = descriptor.priority,
            timestep = ?descriptor.timestep,
            "registered system"
        );
        self.systems.push(RegisteredSystem {
            name: descriptor.name,
            query,
            priority: descriptor.priority,
            timestep: descriptor.timestep,
            state: SystemState::Registered,
            before: descriptor.before,
            act: descriptor.act,
            after: descriptor.after,
        });
        self.rebuild_order();
        Ok(())
    }

    /// Stable sort keeps registration order among equal priorities.
    fn rebuild_order(&mut self) {
        let mut order: Vec<usize> = (0..self.systems.len()).collect();
        order.sort_by_key(|&i| std::cmp::Reverse(self.systems[i].priority));
        self.order = order;
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.systems.iter().position(|s| s.name == name)
    }

    fn find_mut(&mut self, name: &str) -> Result<&mut RegisteredSystem, EngineError> {
        self.systems
            .iter_mut()
            .find(|s| s.name == name)
            .ok_or_else(|| EngineError::UnknownSystem {
                name: name.to_owned(),
            })
    }

    /// Re-enable a disabled system. Enabling a system that is not disabled
    /// does nothing.
    pub fn enable(&mut self, name: &str) -> Result<(), EngineError> {
        let system = self.find_mut(name)?;
        if system.state == SystemState::Disabled {
            system.state = SystemState::Registered;
        }
        Ok(())
    }

    /// Skip the system until it is enabled again. Its query and place in the
    /// run order are kept.
    pub fn disable(&mut self, name: &str) -> Result<(), EngineError> {
        self.find_mut(name)?.state = SystemState::Disabled;
        Ok(())
    }

    pub fn state(&self, name: &str) -> Result<SystemState, EngineError> {
        self.systems
            .iter()
            .find(|s| s.name == name)
            .map(|s| s.state)
            .ok_or_else(|| EngineError::UnknownSystem {
                name: name.to_owned(),
            })
    }

    pub fn len(&self) -> usize {
        self.systems.len()
    }

    pub fn is_empty(&self) -> bool {
        self.systems.is_empty()
    }

    /// Names of all systems, in run order.
    pub fn system_names(&self) -> Vec<&str> {
        self.order
            .iter()
            .map(|&i| self.systems[i].name.as_str())
            .collect()
    }

    /// Whether any enabled system is in the given group.
    pub fn has_group(&self, timestep: Timestep) -> bool {
        self.systems.iter().any(|s| s.runs_in(timestep))
    }

    /// Run every enabled system of `time.timestep`'s group through all three
    /// phases. Flush reports are merged into `report`; per-system wall time is
    /// appended to `timings` in run order.
    pub(crate) fn run_group(
        &mut self,
        world: &mut World,
        commands: &mut CommandBuffer,
        time: TickTime,
        policy: FlushPolicy,
        report: &mut FlushReport,
        timings: &mut Vec<(String, Duration)>,
    ) {
        let Self { systems, order } = self;
        let mut elapsed = vec![Duration::ZERO; systems.len()];

        run_hooks(systems, order, Phase::Before, world, commands, time, &mut elapsed);
        flush(commands, world, report);

        for &i in order.iter() {
            let system = &mut systems[i];
            if !system.runs_in(time.timestep) {
                continue;
            }
            let start = Instant::now();
            if let Some(act) = system.act.as_mut() {
                tracing::trace!(system = %system.name, phase = "act", "running system");
                commands.set_issuer(Some(&system.name));
                let mut ctx = SystemContext {
                    commands: &mut *commands,
                    time,
                };
                system.query.for_each_mut(world, |row| act(row, &mut ctx));
            }
            elapsed[i] += start.elapsed();
            if policy == FlushPolicy::PerSystem {
                flush(commands, world, report);
            }
        }
        flush(commands, world, report);

        run_hooks(systems, order, Phase::After, world, commands, time, &mut elapsed);
        flush(commands, world, report);

        for &i in order.iter() {
            let system = &mut systems[i];
            if system.runs_in(time.timestep) {
                system.state = SystemState::Scheduled;
                timings.push((system.name.clone(), elapsed[i]));
            }
        }
    }
}

fn run_hooks(
    systems: &mut [RegisteredSystem],
    order: &[usize],
    phase: Phase,
    world: &World,
    commands: &mut CommandBuffer,
    time: TickTime,
    elapsed: &mut [Duration],
) {
    for &i in order {
        let system = &mut systems[i];
        if !system.runs_in(time.timestep) {
            continue;
        }
        let (hook, label) = match phase {
            Phase::Before => (system.before.as_mut(), "before"),
            Phase::After => (system.after.as_mut(), "after"),
        };
        let Some(hook) = hook else {
            continue;
        };
        tracing::trace!(system = %system.name, phase = label, "running system");
        let start = Instant::now();
        commands.set_issuer(Some(&system.name));
        let mut ctx = SystemContext {
            commands: &mut *commands,
            time,
        };
        hook(world, &mut ctx);
        elapsed[i] += start.elapsed();
    }
}

fn flush(commands: &mut CommandBuffer, world: &mut World, report: &mut FlushReport) {
    commands.set_issuer(None);
    if !commands.is_empty() {
        report.merge(commands.flush(world));
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("systems", &self.system_names())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
