//! Property tests for the registry.
//!
//! `proptest` generates random sequences of registry operations and checks
//! that the invariants named in §8 hold after every step.

use ecs_registry::prelude::*;
use proptest::prelude::*;

#[derive(Debug, Clone, Copy, PartialEq)]
struct Pos {
    x: f32,
    y: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Vel {
    dx: f32,
    dy: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Tag(u32);

#[derive(Debug, Clone)]
enum RegistryOp {
    SpawnPos(f32, f32),
    SpawnPosVel(f32, f32, f32, f32),
    Destroy(usize),
    InsertVel(usize, f32, f32),
    RemoveVel(usize),
    QueryPos,
    QueryPosVel,
}

/// Finite (non-NaN, non-Inf) f32 values.
fn finite_f32() -> impl Strategy<Value = f32> {
    (-1_000_000i32..1_000_000i32).prop_map(|v| v as f32 * 0.01)
}

fn registry_op_strategy() -> impl Strategy<Value = RegistryOp> {
    prop_oneof![
        (finite_f32(), finite_f32()).prop_map(|(x, y)| RegistryOp::SpawnPos(x, y)),
        (finite_f32(), finite_f32(), finite_f32(), finite_f32())
            .prop_map(|(x, y, dx, dy)| RegistryOp::SpawnPosVel(x, y, dx, dy)),
        (0..100usize).prop_map(RegistryOp::Destroy),
        (0..100usize, finite_f32(), finite_f32()).prop_map(|(i, dx, dy)| RegistryOp::InsertVel(i, dx, dy)),
        (0..100usize).prop_map(RegistryOp::RemoveVel),
        Just(RegistryOp::QueryPos),
        Just(RegistryOp::QueryPosVel),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(10_000))]

    #[test]
    fn random_ops_preserve_invariants(ops in prop::collection::vec(registry_op_strategy(), 1..50)) {
        let mut registry = Registry::new();
        let mut alive: Vec<Entity> = Vec::new();

        for op in ops {
            match op {
                RegistryOp::SpawnPos(x, y) => {
                    alive.push(registry.create_with(Pos { x, y }));
                }
                RegistryOp::SpawnPosVel(x, y, dx, dy) => {
                    let e = registry.create();
                    registry.add(e, Pos { x, y }).unwrap();
                    registry.add(e, Vel { dx, dy }).unwrap();
                    alive.push(e);
                }
                RegistryOp::Destroy(idx) => {
                    if !alive.is_empty() {
                        let idx = idx % alive.len();
                        let e = alive.remove(idx);
                        let _ = registry.destroy(e);
                    }
                }
                RegistryOp::InsertVel(idx, dx, dy) => {
                    if !alive.is_empty() {
                        let idx = idx % alive.len();
                        let _ = registry.add(alive[idx], Vel { dx, dy });
                    }
                }
                RegistryOp::RemoveVel(idx) => {
                    if !alive.is_empty() {
                        let idx = idx % alive.len();
                        let _ = registry.remove::<Vel>(alive[idx]);
                    }
                }
                RegistryOp::QueryPos => {
                    let view = registry.view(&ViewDescriptor::new().with::<Pos>()).unwrap();
                    prop_assert!(view.entities_count(&registry) <= alive.len());
                }
                RegistryOp::QueryPosVel => {
                    let view = registry.view(&ViewDescriptor::new().with::<Pos>().with::<Vel>()).unwrap();
                    prop_assert!(view.entities_count(&registry) <= alive.len());
                }
            }

            prop_assert_eq!(registry.entities_count(), alive.len());
            for &e in &alive {
                prop_assert!(registry.is_alive(e));
            }
        }
    }

    /// Stale handles must never resurrect as live, even once their index is
    /// recycled by a later `create`.
    #[test]
    fn stale_entities_detected_after_destroy_and_recycle(
        spawn_count in 1..20usize,
        destroy_indices in prop::collection::vec(0..20usize, 1..10),
    ) {
        let mut registry = Registry::new();
        let mut entities: Vec<Entity> = Vec::new();
        for i in 0..spawn_count {
            entities.push(registry.create_with(Pos { x: i as f32, y: 0.0 }));
        }

        let mut stale: Vec<Entity> = Vec::new();
        for &idx in &destroy_indices {
            if !entities.is_empty() {
                let idx = idx % entities.len();
                let e = entities.remove(idx);
                let _ = registry.destroy(e);
                stale.push(e);
            }
        }

        for _ in 0..stale.len() {
            entities.push(registry.create_with(Pos { x: 999.0, y: 999.0 }));
        }

        for &e in &stale {
            prop_assert!(!registry.is_alive(e));
            prop_assert_eq!(registry.get_or_null::<Pos>(e), None);
        }
        for &e in &entities {
            prop_assert!(registry.is_alive(e));
            prop_assert!(registry.get_or_null::<Pos>(e).is_some());
        }
    }

    /// Inserting or removing a component migrates the entity's archetype;
    /// its other component data must survive the round trip exactly.
    #[test]
    fn archetype_migration_preserves_data(
        x in finite_f32(), y in finite_f32(),
        dx in finite_f32(), dy in finite_f32(),
        do_remove in proptest::bool::ANY,
    ) {
        let mut registry = Registry::new();
        let e = registry.create_with(Pos { x, y });

        registry.add(e, Vel { dx, dy }).unwrap();
        let pos = *registry.get::<Pos>(e).unwrap();
        prop_assert_eq!(pos.x, x);
        prop_assert_eq!(pos.y, y);
        let vel = *registry.get::<Vel>(e).unwrap();
        prop_assert_eq!(vel.dx, dx);
        prop_assert_eq!(vel.dy, dy);

        if do_remove {
            registry.remove::<Vel>(e).unwrap();
            let pos = *registry.get::<Pos>(e).unwrap();
            prop_assert_eq!(pos.x, x);
            prop_assert_eq!(pos.y, y);
            prop_assert!(!registry.has::<Vel>(e));
        }
    }

    /// Entities sharing an archetype keep fully independent data.
    #[test]
    fn multiple_entities_independent_data(count in 2..50usize) {
        let mut registry = Registry::new();
        let mut entities = Vec::new();
        for i in 0..count {
            entities.push(registry.create_with(Pos { x: i as f32, y: (i * 2) as f32 }));
        }

        for (i, &e) in entities.iter().enumerate() {
            let pos = registry.get::<Pos>(e).unwrap();
            prop_assert_eq!(pos.x, i as f32);
            prop_assert_eq!(pos.y, (i * 2) as f32);
        }

        if count > 2 {
            let mid = count / 2;
            let mid_e = entities.remove(mid);
            registry.destroy(mid_e).unwrap();

            prop_assert_eq!(registry.entities_count(), entities.len());
            for &e in &entities {
                prop_assert!(registry.is_alive(e));
                prop_assert!(registry.get_or_null::<Pos>(e).is_some());
            }
        }
    }

    /// A registered `Tag` component survives adds and removes of an
    /// unrelated type without its own value ever changing.
    #[test]
    fn unrelated_component_unaffected_by_migration(tag_value in any::<u32>()) {
        let mut registry = Registry::new();
        let e = registry.create_with(Tag(tag_value));
        registry.add(e, Pos { x: 1.0, y: 1.0 }).unwrap();
        registry.remove::<Pos>(e).unwrap();
        prop_assert_eq!(registry.get::<Tag>(e).unwrap().0, tag_value);
    }
}
