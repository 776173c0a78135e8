//! Integration tests for world snapshot/restore.

use tessera_ecs::prelude::*;

// -- test component types ---------------------------------------------------

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
struct Position {
    x: f32,
    y: f32,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
struct Velocity {
    dx: f32,
    dy: f32,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
struct Health(u32);

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
struct Inventory {
    items: Vec<String>,
    owner: Option<EntityId>,
}

fn setup_world() -> World {
    let mut world = World::new();
    world.register_component::<Position>("position").unwrap();
    world.register_component::<Velocity>("velocity").unwrap();
    world.register_component::<Health>("health").unwrap();
    world.register_component::<Inventory>("inventory").unwrap();
    world
}

/// The world's contents in a form that ignores archetype layout.
fn contents(world: &World) -> Vec<(EntityId, Option<Position>, Option<Velocity>, Option<Health>)> {
    world
        .entities()
        .iter()
        .map(|e| {
            (
                e,
                world.get_component::<Position>(e).ok().cloned(),
                world.get_component::<Velocity>(e).ok().cloned(),
                world.get_component::<Health>(e).ok().cloned(),
            )
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[test]
fn snapshot_empty_world() {
    let world = setup_world();
    let snapshot = world.capture_snapshot().unwrap();

    assert!(snapshot.entities.is_empty());
    assert!(snapshot.allocator.generations.is_empty());
    assert!(snapshot.allocator.free_indices.is_empty());
    assert_eq!(
        snapshot.component_names,
        vec!["health", "inventory", "position", "velocity"]
    );

    let mut world2 = setup_world();
    world2.restore_from_snapshot(&snapshot).unwrap();
    assert_eq!(world2.entity_count(), 0);
}

#[test]
fn roundtrip_reconstructs_equivalent_world() {
    let mut world = setup_world();
    for i in 0..20u32 {
        let bundle = match i % 3 {
            0 => ComponentBundle::new().with(Position { x: i as f32, y: 0.0 }),
            1 => ComponentBundle::new()
                .with(Position { x: i as f32, y: 1.0 })
                .with(Velocity { dx: 1.0, dy: -1.0 }),
            _ => ComponentBundle::new().with(Health(i)),
        };
        world.spawn_bundle(bundle).unwrap();
    }
    // Punch holes so the free list is non-trivial.
    let ids: Vec<EntityId> = world.entities().iter().collect();
    for &e in ids.iter().step_by(4) {
        world.despawn(e).unwrap();
    }

    let json = world.capture_snapshot().unwrap().to_json().unwrap();
    let mut restored = setup_world();
    restored
        .restore_from_snapshot(&WorldSnapshot::from_json(&json).unwrap())
        .unwrap();

    assert_eq!(contents(&restored), contents(&world));
    assert_eq!(
        restored.capture_snapshot().unwrap(),
        world.capture_snapshot().unwrap()
    );
}

#[test]
fn restore_replaces_existing_contents() {
    let mut source = setup_world();
    let kept = source.spawn_with(Health(7)).unwrap();
    let snapshot = source.capture_snapshot().unwrap();

    let mut target = setup_world();
    for _ in 0..5 {
        target.spawn_with(Position { x: 0.0, y: 0.0 }).unwrap();
    }
    target.restore_from_snapshot(&snapshot).unwrap();

    assert_eq!(target.entity_count(), 1);
    assert_eq!(target.get_component::<Health>(kept), Ok(&Health(7)));
    assert_eq!(target.query::<(&Position,)>().count(), 0);
}

#[test]
fn names_tags_and_entity_references_survive() {
    let mut world = setup_world();
    let owner = world.spawn_named("merchant");
    world.add_tag(owner, "npc").unwrap();
    let chest = world
        .spawn_with(Inventory {
            items: vec!["sword".into(), "apple".into()],
            owner: Some(owner),
        })
        .unwrap();

    let snapshot = world.capture_snapshot().unwrap();
    let mut restored = setup_world();
    restored.restore_from_snapshot(&snapshot).unwrap();

    assert_eq!(restored.name_of(owner), Ok(Some("merchant")));
    assert!(restored.has_tag(owner, "npc"));
    let inv = restored.get_component::<Inventory>(chest).unwrap();
    assert_eq!(inv.items, vec!["sword".to_string(), "apple".to_string()]);
    assert_eq!(inv.owner, Some(owner));
    assert!(restored.is_alive(owner));
}

#[test]
fn restored_world_keeps_working() {
    let mut world = setup_world();
    let e = world.spawn_with(Position { x: 1.0, y: 1.0 }).unwrap();
    let snapshot = world.capture_snapshot().unwrap();

    let mut restored = setup_world();
    restored.restore_from_snapshot(&snapshot).unwrap();
    restored.add_component(e, Velocity { dx: 2.0, dy: 0.0 }).unwrap();

    let mut q = QueryBuilder::new()
        .all::<Position>()
        .all::<Velocity>()
        .build(&restored)
        .unwrap();
    q.for_each_mut(&mut restored, |row| {
        if let Some((p, v)) = row.get_pair_mut::<Position, Velocity>() {
            p.x += v.dx;
        }
    });
    assert_eq!(
        restored.get_component::<Position>(e),
        Ok(&Position { x: 3.0, y: 1.0 })
    );
}

#[test]
fn snapshot_json_is_stable() {
    let mut world = setup_world();
    let e = world
        .spawn_bundle(
            ComponentBundle::new()
                .with(Velocity { dx: 0.5, dy: 0.0 })
                .with(Position { x: 1.0, y: 2.0 }),
        )
        .unwrap();
    let snapshot = world.capture_snapshot().unwrap();
    let value: serde_json::Value = serde_json::from_str(&snapshot.to_json().unwrap()).unwrap();

    let entity = &value["entities"][0];
    assert_eq!(entity["entity_id"], serde_json::json!(e.to_raw()));
    assert_eq!(entity["components"][0]["type_name"], "position");
    assert_eq!(entity["components"][0]["data"]["x"], 1.0);
    assert_eq!(entity["components"][1]["type_name"], "velocity");
    assert!(entity.get("name").is_none());
}

#[test]
fn rejected_snapshot_leaves_world_untouched() {
    let mut source = setup_world();
    source.spawn_with(Health(1)).unwrap();
    let mut snapshot = source.capture_snapshot().unwrap();
    snapshot.entities[0].components[0].type_name = "mana".into();

    let mut target = setup_world();
    let e = target.spawn_with(Position { x: 4.0, y: 2.0 }).unwrap();
    let before = target.capture_snapshot().unwrap();

    let err = target.restore_from_snapshot(&snapshot).unwrap_err();
    assert_eq!(err, EcsError::UnregisteredType { name: "mana".into() });
    assert_eq!(target.capture_snapshot().unwrap(), before);
    assert_eq!(target.get_component::<Position>(e), Ok(&Position { x: 4.0, y: 2.0 }));
}

#[test]
fn malformed_component_data_is_rejected() {
    let mut source = setup_world();
    source.spawn_with(Health(1)).unwrap();
    let mut snapshot = source.capture_snapshot().unwrap();
    snapshot.entities[0].components[0].data = serde_json::json!({ "not": "a number" });

    let mut target = setup_world();
    assert!(matches!(
        target.restore_from_snapshot(&snapshot),
        Err(EcsError::Snapshot { .. })
    ));
    assert_eq!(target.entity_count(), 0);
}

#[test]
fn from_json_rejects_garbage() {
    assert!(matches!(
        WorldSnapshot::from_json("{ not json"),
        Err(EcsError::Snapshot { .. })
    ));
}
