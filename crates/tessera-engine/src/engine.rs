//! The engine facade and its update loop.
//!
//! [`Engine::update`] turns a wall-clock frame delta into simulation work:
//!
//! 1. The delta is validated and clamped to `max_delta_ms`.
//! 2. The delta is added to the fixed-step accumulator. While the accumulator
//!    holds a whole step and fewer than `max_fixed_steps` steps have run, the
//!    fixed group runs once and one step is subtracted. Whole steps left
//!    over after the cap are dropped.
//! 3. The variable group runs once with the clamped delta.
//! 4. The tick counter and elapsed time advance.
//!
//! Given the same registered systems and the same sequence of deltas, the
//! sequence of world states is identical across runs.

use std::time::{Duration, Instant};

use tessera_ecs::command::{CommandBuffer, FlushReport};
use tessera_ecs::component::{Component, ComponentRules, ComponentTypeId};
use tessera_ecs::entity::EntityId;
use tessera_ecs::query::{Query, QueryBuilder};
use tessera_ecs::world::{EntityWorldMut, World};

use crate::capability::Capabilities;
use crate::config::EngineConfig;
use crate::scheduler::Scheduler;
use crate::system::{SystemDescriptor, SystemState, TickTime, Timestep};
use crate::EngineError;

// ---------------------------------------------------------------------------
// TickReport
// ---------------------------------------------------------------------------

/// Summary of one [`Engine::update`] call.
#[derive(Debug, Clone, Default)]
pub struct TickReport {
    /// Index of the update that produced this report.
    pub tick: u64,
    /// Fixed steps run during this update.
    pub fixed_steps: u32,
    /// Whole fixed steps' worth of time discarded by the catch-up cap.
    pub dropped_ms: f64,
    /// Every flush of this update, merged in order.
    pub flush: FlushReport,
    /// Wall-clock time per system run, in execution order. A fixed system
    /// appears once per fixed step.
    pub system_times: Vec<(String, Duration)>,
    pub total_time: Duration,
}

// ---------------------------------------------------------------------------
// EngineBuilder
// ---------------------------------------------------------------------------

/// Assembles an [`Engine`] from a configuration, an optional pre-populated
/// world and extension capabilities.
#[derive(Debug, Default)]
pub struct EngineBuilder {
    config: EngineConfig,
    world: Option<World>,
    capabilities: Capabilities,
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Start from an existing world instead of an empty one.
    pub fn with_world(mut self, world: World) -> Self {
        self.world = Some(world);
        self
    }

    /// Publish a capability. A later call with the same name replaces the
    /// earlier value.
    pub fn with_capability<T: 'static>(mut self, name: &str, value: T) -> Self {
        if self.capabilities.insert(name, value) {
            tracing::debug!(capability = name, "replaced capability");
        }
        self
    }

    /// Validate the configuration and build the engine.
    pub fn build(self) -> Result<Engine, EngineError> {
        self.config.validate()?;
        Ok(Engine {
            world: self.world.unwrap_or_default(),
            commands: CommandBuffer::new(),
            scheduler: Scheduler::new(),
            config: self.config,
            capabilities: self.capabilities,
            tick_counter: 0,
            accumulator_ms: 0.0,
            elapsed_ms: 0.0,
        })
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// A world plus the scheduler that drives it.
#[derive(Debug)]
pub struct Engine {
    pub(crate) world: World,
    pub(crate) commands: CommandBuffer,
    scheduler: Scheduler,
    config: EngineConfig,
    capabilities: Capabilities,
    pub(crate) tick_counter: u64,
    pub(crate) accumulator_ms: f64,
    pub(crate) elapsed_ms: f64,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    /// An engine with the default configuration and an empty world.
    pub fn new() -> Self {
        Self {
            world: World::new(),
            commands: CommandBuffer::new(),
            scheduler: Scheduler::new(),
            config: EngineConfig::default(),
            capabilities: Capabilities::new(),
            tick_counter: 0,
            accumulator_ms: 0.0,
            elapsed_ms: 0.0,
        }
    }

    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    // -- registration -------------------------------------------------------

    pub fn register_component<T: Component>(
        &mut self,
        name: &str,
    ) -> Result<ComponentTypeId, EngineError> {
        Ok(self.world.register_component::<T>(name)?)
    }

    pub fn register_component_with<T: Component>(
        &mut self,
        name: &str,
        rules: ComponentRules<T>,
    ) -> Result<ComponentTypeId, EngineError> {
        Ok(self.world.register_component_with::<T>(name, rules)?)
    }

    /// Build a query bound to this engine's world.
    pub fn create_query(&self, builder: QueryBuilder) -> Result<Query, EngineError> {
        Ok(builder.build(&self.world)?)
    }

    /// Register a system. Its query types must already be registered.
    pub fn create_system(&mut self, descriptor: SystemDescriptor) -> Result<(), EngineError> {
        self.scheduler.add(descriptor, &self.world)
    }

    pub fn enable_system(&mut self, name: &str) -> Result<(), EngineError> {
        self.scheduler.enable(name)
    }

    pub fn disable_system(&mut self, name: &str) -> Result<(), EngineError> {
        self.scheduler.disable(name)
    }

    pub fn system_state(&self, name: &str) -> Result<SystemState, EngineError> {
        self.scheduler.state(name)
    }

    // -- entities -----------------------------------------------------------

    /// Create an empty entity, optionally named.
    pub fn create_entity(&mut self, name: Option<&str>) -> EntityId {
        match name {
            Some(name) => self.world.spawn_named(name),
            None => self.world.spawn(),
        }
    }

    pub fn entity_mut(&mut self, entity: EntityId) -> Result<EntityWorldMut<'_>, EngineError> {
        Ok(self.world.entity_mut(entity)?)
    }

    pub fn destroy_entity(&mut self, entity: EntityId) -> Result<(), EngineError> {
        Ok(self.world.despawn(entity)?)
    }

    // -- update loop --------------------------------------------------------

    /// Advance the simulation by one frame of `delta_ms` milliseconds.
    ///
    /// # Errors
    ///
    /// [`EngineError::InvalidDelta`] if `delta_ms` is negative or not finite.
    /// Nothing runs in that case.
    pub fn update(&mut self, delta_ms: f64) -> Result<TickReport, EngineError> {
        if !delta_ms.is_finite() || delta_ms < 0.0 {
            return Err(EngineError::InvalidDelta { delta_ms });
        }
        let tick_start = Instant::now();
        let delta = delta_ms.min(self.config.max_delta_ms);
        let step_ms = self.config.fixed_step_ms;

        let mut report = TickReport {
            tick: self.tick_counter,
            ..TickReport::default()
        };

        // Phase 1: fixed group.
        self.accumulator_ms += delta;
        while self.accumulator_ms >= step_ms && report.fixed_steps < self.config.max_fixed_steps {
            let time = TickTime {
                delta_ms: step_ms,
                elapsed_ms: self.elapsed_ms,
                tick: self.tick_counter,
                timestep: Timestep::Fixed,
                step: report.fixed_steps,
            };
            self.scheduler.run_group(
                &mut self.world,
                &mut self.commands,
                time,
                self.config.flush_policy,
                &mut report.flush,
                &mut report.system_times,
            );
            self.accumulator_ms -= step_ms;
            report.fixed_steps += 1;
        }
        if self.accumulator_ms >= step_ms {
            let kept = self.accumulator_ms % step_ms;
            report.dropped_ms = self.accumulator_ms - kept;
            self.accumulator_ms = kept;
            tracing::warn!(
                tick = self.tick_counter,
                max_fixed_steps = self.config.max_fixed_steps,
                dropped_ms = report.dropped_ms,
                "fixed-step catch-up capped; dropping accumulated time"
            );
        }

        // Phase 2: variable group.
        let time = TickTime {
            delta_ms: delta,
            elapsed_ms: self.elapsed_ms,
            tick: self.tick_counter,
            timestep: Timestep::Variable,
            step: 0,
        };
        self.scheduler.run_group(
            &mut self.world,
            &mut self.commands,
            time,
            self.config.flush_policy,
            &mut report.flush,
            &mut report.system_times,
        );

        // Phase 3: advance.
        self.tick_counter += 1;
        self.elapsed_ms += delta;
        report.total_time = tick_start.elapsed();
        Ok(report)
    }

    /// Call [`update`](Self::update) `count` times with the same delta.
    pub fn run_updates(&mut self, count: u64, delta_ms: f64) -> Result<FlushReport, EngineError> {
        let mut flush = FlushReport::default();
        for _ in 0..count {
            flush.merge(self.update(delta_ms)?.flush);
        }
        Ok(flush)
    }

    // -- accessors ----------------------------------------------------------

    /// Number of completed updates.
    pub fn tick_count(&self) -> u64 {
        self.tick_counter
    }

    /// Sum of the clamped deltas of every completed update.
    pub fn elapsed_ms(&self) -> f64 {
        self.elapsed_ms
    }

    /// Time carried over to the next update's fixed group.
    pub fn accumulator_ms(&self) -> f64 {
        self.accumulator_ms
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    /// Direct world access, for setup and tests. Changes made here are not
    /// deferred.
    pub fn world_mut(&mut self) -> &mut World {
        &mut self.world
    }

    /// Commands queued here are applied at the next flush point of the next
    /// update.
    pub fn commands_mut(&mut self) -> &mut CommandBuffer {
        &mut self.commands
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    pub fn capability<T: 'static>(&self, name: &str) -> Option<&T> {
        self.capabilities.get::<T>(name)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;
    use tessera_ecs::prelude::*;

    #[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
    struct Counter(u32);

    fn config(step: f64, max_steps: u32) -> EngineConfig {
        EngineConfig {
            fixed_step_ms: step,
            max_fixed_steps: max_steps,
            ..Default::default()
        }
    }

    fn counting_engine(config: EngineConfig) -> (Engine, Rc<Cell<u32>>, Rc<Cell<u32>>) {
        let mut engine = EngineBuilder::new().with_config(config).build().unwrap();
        let fixed = Rc::new(Cell::new(0));
        let variable = Rc::new(Cell::new(0));
        let f = Rc::clone(&fixed);
        let v = Rc::clone(&variable);
        engine
            .create_system(
                SystemDescriptor::new("fixed", QueryBuilder::new())
                    .fixed()
                    .before(move |_w, _c| f.set(f.get() + 1)),
            )
            .unwrap();
        engine
            .create_system(
                SystemDescriptor::new("variable", QueryBuilder::new())
                    .before(move |_w, _c| v.set(v.get() + 1)),
            )
            .unwrap();
        (engine, fixed, variable)
    }

    // -- 1. Construction ----------------------------------------------------

    #[test]
    fn new_engine_starts_at_zero() {
        let engine = Engine::new();
        assert_eq!(engine.tick_count(), 0);
        assert_eq!(engine.elapsed_ms(), 0.0);
        assert_eq!(engine.accumulator_ms(), 0.0);
        assert!(engine.scheduler().is_empty());
    }

    #[test]
    fn builder_rejects_invalid_config() {
        let err = EngineBuilder::new().with_config(config(0.0, 8)).build().unwrap_err();
        assert!(matches!(err, EngineError::InvalidConfig { .. }));
    }

    #[test]
    fn builder_installs_capabilities_and_world() {
        let mut world = World::new();
        world.register_component::<Counter>("counter").unwrap();
        world.spawn_with(Counter(1)).unwrap();

        let engine = EngineBuilder::new()
            .with_world(world)
            .with_capability("seed", 7u64)
            .with_capability("seed", 9u64)
            .build()
            .unwrap();
        assert_eq!(engine.world().entity_count(), 1);
        assert_eq!(engine.capability::<u64>("seed"), Some(&9));
        assert_eq!(engine.capability::<String>("seed"), None);
    }

    // -- 2. Delta handling --------------------------------------------------

    #[test]
    fn invalid_deltas_are_rejected_without_side_effects() {
        let (mut engine, fixed, variable) = counting_engine(config(10.0, 8));
        for bad in [-1.0, f64::NAN, f64::INFINITY] {
            assert!(matches!(
                engine.update(bad),
                Err(EngineError::InvalidDelta { .. })
            ));
        }
        assert_eq!(engine.tick_count(), 0);
        assert_eq!(fixed.get(), 0);
        assert_eq!(variable.get(), 0);
    }

    #[test]
    fn zero_delta_runs_only_the_variable_group() {
        let (mut engine, fixed, variable) = counting_engine(config(10.0, 8));
        let report = engine.update(0.0).unwrap();
        assert_eq!(report.fixed_steps, 0);
        assert_eq!(fixed.get(), 0);
        assert_eq!(variable.get(), 1);
        assert_eq!(engine.tick_count(), 1);
    }

    #[test]
    fn large_delta_is_clamped() {
        let (mut engine, _, _) = counting_engine(EngineConfig {
            fixed_step_ms: 10.0,
            max_fixed_steps: 100,
            max_delta_ms: 50.0,
            ..Default::default()
        });
        let report = engine.update(1000.0).unwrap();
        assert_eq!(report.fixed_steps, 5);
        assert_eq!(engine.elapsed_ms(), 50.0);
    }

    // -- 3. Fixed-step accumulator ------------------------------------------

    #[test]
    fn accumulator_carries_partial_steps() {
        let (mut engine, fixed, variable) = counting_engine(config(10.0, 8));
        assert_eq!(engine.update(25.0).unwrap().fixed_steps, 2);
        assert_eq!(engine.accumulator_ms(), 5.0);
        assert_eq!(engine.update(25.0).unwrap().fixed_steps, 3);
        assert_eq!(engine.accumulator_ms(), 0.0);
        assert_eq!(fixed.get(), 5);
        assert_eq!(variable.get(), 2);
    }

    #[test]
    fn catch_up_cap_drops_surplus_whole_steps() {
        let (mut engine, fixed, _) = counting_engine(config(10.0, 3));
        let report = engine.update(75.0).unwrap();
        assert_eq!(report.fixed_steps, 3);
        assert_eq!(report.dropped_ms, 40.0);
        assert_eq!(engine.accumulator_ms(), 5.0);
        assert_eq!(fixed.get(), 3);
    }

    #[test]
    fn report_lists_system_times_per_run() {
        let (mut engine, _, _) = counting_engine(config(10.0, 8));
        let report = engine.update(20.0).unwrap();
        let names: Vec<&str> = report.system_times.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["fixed", "fixed", "variable"]);
        assert_eq!(report.tick, 0);
    }

    // -- 4. Entities and commands ------------------------------------------

    #[test]
    fn externally_queued_commands_apply_in_next_update() {
        let mut engine = Engine::new();
        engine.register_component::<Counter>("counter").unwrap();
        engine
            .commands_mut()
            .create_named("late", ComponentBundle::new().with(Counter(3)));
        assert_eq!(engine.world().entity_count(), 0);

        let report = engine.update(16.0).unwrap();
        assert_eq!(report.flush.success_count, 1);
        let e = engine.world().find_by_name("late").unwrap();
        assert_eq!(engine.world().get_component::<Counter>(e), Ok(&Counter(3)));
    }

    #[test]
    fn entity_helpers_forward_to_world() {
        let mut engine = Engine::new();
        engine.register_component::<Counter>("counter").unwrap();
        let e = engine.create_entity(Some("hero"));
        engine.entity_mut(e).unwrap().insert(Counter(1)).unwrap();
        assert_eq!(engine.world().name_of(e), Ok(Some("hero")));
        assert!(engine.world().has_component::<Counter>(e));

        engine.destroy_entity(e).unwrap();
        assert!(matches!(
            engine.entity_mut(e),
            Err(EngineError::Ecs(EcsError::InvalidEntity { .. }))
        ));
    }

    #[test]
    fn per_system_flush_makes_spawns_visible_to_later_systems() {
        let mut engine = EngineBuilder::new()
            .with_config(EngineConfig {
                flush_policy: crate::config::FlushPolicy::PerSystem,
                ..Default::default()
            })
            .build()
            .unwrap();
        engine.register_component::<Counter>("counter").unwrap();
        let e = engine.world_mut().spawn_with(Counter(0)).unwrap();
        let seen = Rc::new(Cell::new(0u32));
        let s = Rc::clone(&seen);

        engine
            .create_system(
                SystemDescriptor::new("spawner", QueryBuilder::new().all::<Counter>())
                    .priority(10)
                    .act(|_row, ctx| ctx.commands.create(ComponentBundle::new().with(Counter(0)))),
            )
            .unwrap();
        engine
            .create_system(
                SystemDescriptor::new("counter", QueryBuilder::new().all::<Counter>())
                    .act(move |_row, _ctx| s.set(s.get() + 1)),
            )
            .unwrap();

        engine.update(16.0).unwrap();
        // The spawner saw one entity; the counter saw it plus the new one.
        assert_eq!(seen.get(), 2);
        assert!(engine.world().is_alive(e));
        assert_eq!(engine.world().entity_count(), 2);
    }
}
