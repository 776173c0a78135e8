//! Property tests for world operations.
//!
//! Random sequences of structural operations run against a [`World`] and a
//! plain shadow model; after every step the world must agree with the model
//! and every entity record must point at its own archetype row.

use std::collections::BTreeMap;

use proptest::prelude::*;
use tessera_ecs::prelude::*;

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
struct Pos {
    x: f32,
    y: f32,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
struct Vel {
    dx: f32,
    dy: f32,
}

#[derive(Debug, Clone)]
enum WorldOp {
    SpawnPos(f32, f32),
    SpawnPosVel(f32, f32, f32, f32),
    SpawnEmpty,
    Despawn(usize),
    AddVel(usize, f32, f32),
    RemoveVel(usize),
    AddPos(usize, f32),
}

/// Finite f32 values, so equality comparisons are meaningful.
fn finite_f32() -> impl Strategy<Value = f32> {
    (-1_000_000i32..1_000_000i32).prop_map(|v| v as f32 * 0.01)
}

fn world_op_strategy() -> impl Strategy<Value = WorldOp> {
    prop_oneof![
        (finite_f32(), finite_f32()).prop_map(|(x, y)| WorldOp::SpawnPos(x, y)),
        (finite_f32(), finite_f32(), finite_f32(), finite_f32())
            .prop_map(|(x, y, dx, dy)| WorldOp::SpawnPosVel(x, y, dx, dy)),
        Just(WorldOp::SpawnEmpty),
        (0..100usize).prop_map(WorldOp::Despawn),
        (0..100usize, finite_f32(), finite_f32()).prop_map(|(i, dx, dy)| WorldOp::AddVel(i, dx, dy)),
        (0..100usize).prop_map(WorldOp::RemoveVel),
        (0..100usize, finite_f32()).prop_map(|(i, x)| WorldOp::AddPos(i, x)),
    ]
}

#[derive(Debug, Clone, Default, PartialEq)]
struct Shadow {
    pos: Option<Pos>,
    vel: Option<Vel>,
}

fn pick(model: &BTreeMap<EntityId, Shadow>, idx: usize) -> Option<EntityId> {
    if model.is_empty() {
        return None;
    }
    model.keys().nth(idx % model.len()).copied()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(512))]

    #[test]
    fn random_ops_match_shadow_model(ops in prop::collection::vec(world_op_strategy(), 1..60)) {
        let mut world = World::new();
        world.register_component::<Pos>("pos").unwrap();
        world.register_component::<Vel>("vel").unwrap();

        let mut model: BTreeMap<EntityId, Shadow> = BTreeMap::new();
        let mut moving = QueryBuilder::new().all::<Pos>().all::<Vel>().build(&world).unwrap();

        for op in ops {
            match op {
                WorldOp::SpawnPos(x, y) => {
                    let e = world.spawn_with(Pos { x, y }).unwrap();
                    model.insert(e, Shadow { pos: Some(Pos { x, y }), vel: None });
                }
                WorldOp::SpawnPosVel(x, y, dx, dy) => {
                    let e = world
                        .spawn_bundle(ComponentBundle::new().with(Pos { x, y }).with(Vel { dx, dy }))
                        .unwrap();
                    model.insert(e, Shadow { pos: Some(Pos { x, y }), vel: Some(Vel { dx, dy }) });
                }
                WorldOp::SpawnEmpty => {
                    let e = world.spawn();
                    model.insert(e, Shadow::default());
                }
                WorldOp::Despawn(idx) => {
                    if let Some(e) = pick(&model, idx) {
                        prop_assert!(world.despawn(e).is_ok());
                        model.remove(&e);
                        prop_assert_eq!(world.despawn(e), Err(EcsError::InvalidEntity { entity: e }));
                    }
                }
                WorldOp::AddVel(idx, dx, dy) => {
                    if let Some(e) = pick(&model, idx) {
                        let shadow = model.get_mut(&e).unwrap();
                        let result = world.add_component(e, Vel { dx, dy });
                        if shadow.vel.is_some() {
                            let is_duplicate = matches!(result, Err(EcsError::DuplicateComponent { .. }));
                            prop_assert!(is_duplicate);
                        } else {
                            prop_assert!(result.is_ok());
                            shadow.vel = Some(Vel { dx, dy });
                        }
                    }
                }
                WorldOp::RemoveVel(idx) => {
                    if let Some(e) = pick(&model, idx) {
                        let shadow = model.get_mut(&e).unwrap();
                        let result = world.remove_component::<Vel>(e);
                        if shadow.vel.take().is_some() {
                            prop_assert!(result.is_ok());
                        } else {
                            let is_missing = matches!(result, Err(EcsError::MissingComponent { .. }));
                            prop_assert!(is_missing);
                        }
                    }
                }
                WorldOp::AddPos(idx, x) => {
                    if let Some(e) = pick(&model, idx) {
                        let shadow = model.get_mut(&e).unwrap();
                        if shadow.pos.is_none() {
                            let added = world.add_component(e, Pos { x, y: 0.0 }).is_ok();
                            prop_assert!(added);
                            shadow.pos = Some(Pos { x, y: 0.0 });
                        }
                    }
                }
            }

            prop_assert_eq!(world.entity_count(), model.len());

            for (&e, shadow) in &model {
                let loc = world.locate(e).unwrap();
                let arch = world.archetypes().get(loc.archetype).unwrap();
                prop_assert_eq!(arch.entities()[loc.row], e);
                prop_assert_eq!(world.get_component::<Pos>(e).ok(), shadow.pos.as_ref());
                prop_assert_eq!(world.get_component::<Vel>(e).ok(), shadow.vel.as_ref());
            }

            let expected_moving = model
                .values()
                .filter(|s| s.pos.is_some() && s.vel.is_some())
                .count();
            prop_assert_eq!(moving.size(&world), expected_moving);
            prop_assert_eq!(world.query::<(&Pos, &Vel)>().count(), expected_moving);
        }
    }

    /// After despawning, old ids stay invalid even once their indices are
    /// recycled.
    #[test]
    fn stale_ids_detected_after_despawn_and_recycle(
        spawn_count in 1..20usize,
        despawn_indices in prop::collection::vec(0..20usize, 1..10),
    ) {
        let mut world = World::new();
        world.register_component::<Pos>("pos").unwrap();

        let mut entities: Vec<EntityId> = (0..spawn_count)
            .map(|i| world.spawn_with(Pos { x: i as f32, y: 0.0 }).unwrap())
            .collect();

        let mut stale_ids = Vec::new();
        for &idx in &despawn_indices {
            if !entities.is_empty() {
                let e = entities.remove(idx % entities.len());
                world.despawn(e).unwrap();
                stale_ids.push(e);
            }
        }

        for _ in 0..stale_ids.len() {
            entities.push(world.spawn_with(Pos { x: -1.0, y: 0.0 }).unwrap());
        }

        for &stale in &stale_ids {
            prop_assert!(!world.is_alive(stale));
            prop_assert_eq!(
                world.get_component::<Pos>(stale),
                Err(EcsError::InvalidEntity { entity: stale })
            );
        }
        for &e in &entities {
            prop_assert!(world.is_alive(e));
        }
    }
}
