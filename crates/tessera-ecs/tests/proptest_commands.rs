//! Property tests for the command buffer.
//!
//! Queuing N operations and flushing them must be indistinguishable from
//! applying the same operations directly, one after another, including
//! which ones fail.

use proptest::prelude::*;
use tessera_ecs::prelude::*;

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
struct Health(u32);

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
struct Armor(u32);

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
struct Marker;

#[derive(Debug, Clone)]
enum Op {
    AddHealth(u32),
    RemoveHealth,
    AddArmor(u32),
    RemoveArmor,
    AddMarker,
    RemoveMarker,
    Destroy(usize),
    Create(u32),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => any::<u32>().prop_map(Op::AddHealth),
        3 => Just(Op::RemoveHealth),
        4 => any::<u32>().prop_map(Op::AddArmor),
        3 => Just(Op::RemoveArmor),
        2 => Just(Op::AddMarker),
        2 => Just(Op::RemoveMarker),
        1 => (0..8usize).prop_map(Op::Destroy),
        1 => any::<u32>().prop_map(Op::Create),
    ]
}

/// Entities spawned before the ops run; destroy targets are drawn from these.
const INITIAL: usize = 4;

fn setup_world() -> World {
    let mut world = World::new();
    world.register_component::<Health>("health").unwrap();
    world.register_component::<Armor>("armor").unwrap();
    world.register_component::<Marker>("marker").unwrap();
    world
}

/// Apply `op` directly; the target of component ops is `targets[0]`.
fn apply_direct(world: &mut World, targets: &mut Vec<EntityId>, op: &Op) -> Result<(), EcsError> {
    let e = targets[0];
    match op {
        Op::AddHealth(v) => world.add_component(e, Health(*v)),
        Op::RemoveHealth => world.remove_component::<Health>(e),
        Op::AddArmor(v) => world.add_component(e, Armor(*v)),
        Op::RemoveArmor => world.remove_component::<Armor>(e),
        Op::AddMarker => world.add_component(e, Marker),
        Op::RemoveMarker => world.remove_component::<Marker>(e),
        Op::Destroy(i) => world.despawn(targets[i % INITIAL]),
        Op::Create(v) => {
            let spawned = world.spawn_bundle(ComponentBundle::new().with(Health(*v)))?;
            targets.push(spawned);
            Ok(())
        }
    }
}

fn queue(cmds: &mut CommandBuffer, targets: &[EntityId], op: &Op) {
    let e = targets[0];
    match op {
        Op::AddHealth(v) => cmds.add_component(e, Health(*v)),
        Op::RemoveHealth => cmds.remove_component::<Health>(e),
        Op::AddArmor(v) => cmds.add_component(e, Armor(*v)),
        Op::RemoveArmor => cmds.remove_component::<Armor>(e),
        Op::AddMarker => cmds.add_component(e, Marker),
        Op::RemoveMarker => cmds.remove_component::<Marker>(e),
        Op::Destroy(i) => cmds.destroy(targets[i % INITIAL]),
        Op::Create(v) => cmds.create(ComponentBundle::new().with(Health(*v))),
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(512))]

    #[test]
    fn flush_equals_sequential_application(ops in prop::collection::vec(op_strategy(), 1..40)) {
        let mut direct = setup_world();
        let mut deferred = setup_world();

        // Same spawn sequence -> same ids in both worlds.
        let mut direct_targets: Vec<EntityId> = (0..INITIAL).map(|_| direct.spawn()).collect();
        let deferred_targets: Vec<EntityId> = (0..INITIAL).map(|_| deferred.spawn()).collect();
        prop_assert_eq!(&direct_targets, &deferred_targets);

        let expected: Vec<Result<(), EcsError>> = ops
            .iter()
            .map(|op| apply_direct(&mut direct, &mut direct_targets, op))
            .collect();

        let mut cmds = CommandBuffer::new();
        for op in &ops {
            queue(&mut cmds, &deferred_targets, op);
        }
        prop_assert_eq!(cmds.len(), ops.len());
        let report = cmds.flush(&mut deferred);

        let actual: Vec<Result<(), EcsError>> =
            report.outcomes.iter().map(|o| o.result.clone()).collect();
        prop_assert_eq!(&actual, &expected);
        prop_assert_eq!(report.success_count + report.failed_count, ops.len());
        prop_assert_eq!(report.failed_count, expected.iter().filter(|r| r.is_err()).count());

        prop_assert_eq!(direct.entity_count(), deferred.entity_count());
        let e = deferred_targets[0];
        prop_assert_eq!(direct.is_alive(e), deferred.is_alive(e));
        if deferred.is_alive(e) {
            prop_assert_eq!(direct.signature_of(e).unwrap(), deferred.signature_of(e).unwrap());
            prop_assert_eq!(direct.get_component::<Health>(e).ok(), deferred.get_component::<Health>(e).ok());
            prop_assert_eq!(direct.get_component::<Armor>(e).ok(), deferred.get_component::<Armor>(e).ok());
        }
        prop_assert_eq!(
            direct.capture_snapshot().unwrap(),
            deferred.capture_snapshot().unwrap()
        );
    }
}
