//! Headless particle simulation.
//!
//! Spawns a grid of particles that move at a fixed 60 Hz step, expire after
//! a few seconds and are replaced by an emitter system through the command
//! buffer. Prints a summary and the final state hash.
//!
//! Run with `RUST_LOG=debug cargo run --example movement` to see the
//! archetype and system traces.

use tessera_engine::prelude::*;

// ---------------------------------------------------------------------------
// Components
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
struct Position {
    x: f64,
    y: f64,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
struct Velocity {
    dx: f64,
    dy: f64,
}

/// Remaining life in milliseconds.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
struct Lifetime(f64);

const BOUNDS: f64 = 100.0;
const FRAMES: u64 = 600;

fn particle(i: u32) -> ComponentBundle {
    let angle = f64::from(i) * 0.61;
    ComponentBundle::new()
        .with(Position {
            x: f64::from(i % 10) * 10.0,
            y: f64::from(i / 10) * 10.0,
        })
        .with(Velocity {
            dx: angle.cos() * 20.0,
            dy: angle.sin() * 20.0,
        })
        .with(Lifetime(1000.0 + f64::from(i % 7) * 500.0))
}

fn main() -> Result<(), anyhow::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let mut engine = Engine::builder()
        .with_config(EngineConfig::default())
        .with_capability("bounds", BOUNDS)
        .build()?;

    engine.register_component::<Position>("position")?;
    engine.register_component::<Velocity>("velocity")?;
    engine.register_component_with::<Lifetime>(
        "lifetime",
        ComponentRules::new()
            .requires::<Position>()
            .validate_with(|l: &Lifetime| {
                if l.0 > 0.0 {
                    Ok(())
                } else {
                    Err(format!("lifetime must be positive, got {}", l.0))
                }
            }),
    )?;

    for i in 0..100 {
        engine.world_mut().spawn_bundle(particle(i))?;
    }

    let bounds = engine.capability::<f64>("bounds").copied().unwrap_or(BOUNDS);

    // Integrate at the fixed step and bounce off the walls.
    engine.create_system(
        SystemDescriptor::new(
            "integrate",
            QueryBuilder::new().all::<Position>().all::<Velocity>(),
        )
        .fixed()
        .priority(10)
        .act(move |row, ctx| {
            let dt = ctx.time.delta_ms / 1000.0;
            if let Some((pos, vel)) = row.get_pair_mut::<Position, Velocity>() {
                pos.x += vel.dx * dt;
                pos.y += vel.dy * dt;
                if !(0.0..=bounds).contains(&pos.x) {
                    vel.dx = -vel.dx;
                    pos.x = pos.x.clamp(0.0, bounds);
                }
                if !(0.0..=bounds).contains(&pos.y) {
                    vel.dy = -vel.dy;
                    pos.y = pos.y.clamp(0.0, bounds);
                }
            }
        }),
    )?;

    // Age particles and queue expired ones for removal.
    engine.create_system(
        SystemDescriptor::new("age", QueryBuilder::new().all::<Lifetime>()).act(|row, ctx| {
            let id = row.id();
            if let Some(life) = row.get_mut::<Lifetime>() {
                life.0 -= ctx.time.delta_ms;
                if life.0 <= 0.0 {
                    ctx.commands.destroy(id);
                }
            }
        }),
    )?;

    // Keep the population at 100.
    let mut next = 100u32;
    engine.create_system(
        SystemDescriptor::new("emitter", QueryBuilder::new())
            .priority(-10)
            .after(move |world, ctx| {
                for _ in world.entity_count()..100 {
                    ctx.commands.create(particle(next));
                    next += 1;
                }
            }),
    )?;

    let mut failed = 0;
    let mut spawned = 0;
    for _ in 0..FRAMES {
        let report = engine.update(1000.0 / 60.0)?;
        failed += report.flush.failed_count;
        spawned += report.flush.spawned().len();
    }

    let mut moving = engine.create_query(QueryBuilder::new().all::<Position>().all::<Velocity>())?;
    println!("ticks:       {}", engine.tick_count());
    println!("elapsed:     {:.0} ms", engine.elapsed_ms());
    println!("alive:       {}", engine.world().entity_count());
    println!("moving:      {}", moving.size(engine.world()));
    println!("respawned:   {spawned}");
    println!("failed cmds: {failed}");
    println!("state hash:  {}", engine.state_hash()?);
    Ok(())
}
