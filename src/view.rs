//! Views and cursors: the query layer (§4.5).
//!
//! A [`ViewDescriptor`] is a builder describing which component types must
//! be present (`with`) and absent (`without`). Calling [`ViewDescriptor::build`]
//! resolves it against a [`Registry`] into a [`View`]: a snapshot of the
//! matching archetype set at that instant. Membership of an archetype in the
//! snapshotted set doesn't change for the life of the `View`, but each
//! entity's component values remain fully live — mutations made mid-iteration
//! are visible immediately, per §4.5.

use std::any::TypeId;
use std::collections::HashMap;

use crate::archetype::ArchetypeId;
use crate::component::ComponentTypeId;
use crate::entity::Entity;
use crate::error::RegistryError;
use crate::registry::Registry;

/// Builder for an include/exclude archetype query.
#[derive(Debug, Default, Clone)]
pub struct ViewDescriptor {
    with: Vec<(TypeId, &'static str)>,
    without: Vec<(TypeId, &'static str)>,
}

impl ViewDescriptor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<T: 'static>(mut self) -> Self {
        self.with.push((TypeId::of::<T>(), std::any::type_name::<T>()));
        self
    }

    pub fn without<T: 'static>(mut self) -> Self {
        self.without.push((TypeId::of::<T>(), std::any::type_name::<T>()));
        self
    }

    /// Resolve against `registry`, producing a snapshot of matching
    /// archetypes. Raises `InvalidView` naming every type that has never
    /// been registered.
    pub fn build(&self, registry: &Registry) -> Result<View, RegistryError> {
        let mut unknown = Vec::new();
        let mut with_ids = Vec::with_capacity(self.with.len());
        for (type_id, name) in &self.with {
            match registry.component_type_id_by_any(*type_id) {
                Some(id) => with_ids.push(id),
                None => unknown.push(*name),
            }
        }
        let mut without_ids = Vec::with_capacity(self.without.len());
        for (type_id, name) in &self.without {
            match registry.component_type_id_by_any(*type_id) {
                Some(id) => without_ids.push(id),
                None => unknown.push(*name),
            }
        }
        if !unknown.is_empty() {
            return Err(RegistryError::InvalidView { unknown_types: unknown });
        }
        let archetypes = registry.matching_archetypes(&with_ids, &without_ids);
        Ok(View { archetypes })
    }
}

/// A snapshot of the archetypes matching a [`ViewDescriptor`] at build time.
#[derive(Debug, Clone)]
pub struct View {
    archetypes: Vec<ArchetypeId>,
}

impl View {
    pub fn archetypes(&self) -> &[ArchetypeId] {
        &self.archetypes
    }

    /// Sum of currently-live entity counts across the snapshotted
    /// archetypes, evaluated fresh against `registry` at call time.
    pub fn entities_count(&self, registry: &Registry) -> usize {
        self.archetypes.iter().map(|id| registry.archetype_entity_count(*id)).sum()
    }

    pub fn is_empty(&self, registry: &Registry) -> bool {
        self.entities_count(registry) == 0
    }

    /// Flat stream of matching live entities, in archetype-then-slot order.
    pub fn iter<'r>(&self, registry: &'r Registry) -> EntityStream<'r> {
        EntityStream { registry, archetypes: self.archetypes.clone(), arch_idx: 0, slot_idx: 0 }
    }

    /// Like [`View::iter`] but paired with a running 0-based position.
    pub fn iter_indexed<'r>(&self, registry: &'r Registry) -> impl Iterator<Item = (usize, Entity)> + 'r {
        self.iter(registry).enumerate()
    }

    /// Unpacked tuple stream: for each matching entity, resolve every
    /// requested component and yield `(Entity, Q::Item)`. Entities missing
    /// one of the requested types (possible only if the caller bypassed
    /// `with::<T>()` for one of the tuple's members) are skipped rather
    /// than raising, matching the read-only, best-effort nature of this
    /// accessor; mutation goes through [`View::each`] and [`Cursor`].
    pub fn iter_tuple<'r, Q: ComponentTuple<'r>>(
        &self,
        registry: &'r Registry,
    ) -> impl Iterator<Item = (Entity, Q::Item)> + 'r {
        self.iter(registry).filter_map(move |e| Q::fetch(registry, e).map(|item| (e, item)))
    }

    /// Group stream: invoke `body` once per matching live entity with a
    /// [`Cursor`] giving ergonomic, memoized component access — including
    /// mutable access, since `body` holds the sole `&mut Registry` borrow
    /// for the duration of each call.
    pub fn each(&self, registry: &mut Registry, mut body: impl FnMut(&mut Cursor)) {
        let mut iteration = 0usize;
        for (arch_pos, &archetype_id) in self.archetypes.iter().enumerate() {
            let size = registry.archetype_slot_count(archetype_id);
            for slot in 0..size {
                let Some(entity) = registry.archetype_entity_at(archetype_id, slot) else {
                    continue;
                };
                if !entity.is_valid() {
                    continue;
                }
                let is_first = iteration == 0;
                let is_last = self.is_last_after(registry, arch_pos, slot);
                let mut cursor = Cursor::new(registry, entity, iteration, is_first, is_last, archetype_id, slot);
                body(&mut cursor);
                iteration += 1;
            }
        }
    }

    fn is_last_after(&self, registry: &Registry, arch_pos: usize, slot: usize) -> bool {
        let archetype_id = self.archetypes[arch_pos];
        let size = registry.archetype_slot_count(archetype_id);
        for s in (slot + 1)..size {
            if registry.archetype_entity_at(archetype_id, s).map(Entity::is_valid).unwrap_or(false) {
                return false;
            }
        }
        for &next_id in &self.archetypes[arch_pos + 1..] {
            let next_size = registry.archetype_slot_count(next_id);
            for s in 0..next_size {
                if registry.archetype_entity_at(next_id, s).map(Entity::is_valid).unwrap_or(false) {
                    return false;
                }
            }
        }
        true
    }
}

pub struct EntityStream<'r> {
    registry: &'r Registry,
    archetypes: Vec<ArchetypeId>,
    arch_idx: usize,
    slot_idx: usize,
}

impl<'r> Iterator for EntityStream<'r> {
    type Item = Entity;

    fn next(&mut self) -> Option<Entity> {
        loop {
            let &archetype_id = self.archetypes.get(self.arch_idx)?;
            let size = self.registry.archetype_slot_count(archetype_id);
            while self.slot_idx < size {
                let slot = self.slot_idx;
                self.slot_idx += 1;
                if let Some(e) = self.registry.archetype_entity_at(archetype_id, slot) {
                    if e.is_valid() {
                        return Some(e);
                    }
                }
            }
            self.arch_idx += 1;
            self.slot_idx = 0;
        }
    }
}

/// Per-step cursor handed to a [`View::each`] body: identity/position
/// metadata plus memoized, ergonomic component access for one entity.
///
/// The component-type-id cache is keyed by Rust's `TypeId` rather than any
/// pointer into storage, so it stays valid even if a mutation earlier in
/// the same step reallocates a dense array — no unsafe code is needed to
/// make repeat lookups within a step cheaper than the first.
pub struct Cursor<'r> {
    registry: &'r mut Registry,
    entity: Entity,
    iteration: usize,
    is_first: bool,
    is_last: bool,
    archetype_id: ArchetypeId,
    slot_index: usize,
    type_cache: HashMap<TypeId, ComponentTypeId>,
}

impl<'r> Cursor<'r> {
    fn new(
        registry: &'r mut Registry,
        entity: Entity,
        iteration: usize,
        is_first: bool,
        is_last: bool,
        archetype_id: ArchetypeId,
        slot_index: usize,
    ) -> Self {
        Self { registry, entity, iteration, is_first, is_last, archetype_id, slot_index, type_cache: HashMap::new() }
    }

    pub fn entity(&self) -> Entity {
        self.entity
    }

    pub fn iteration(&self) -> usize {
        self.iteration
    }

    pub fn is_first(&self) -> bool {
        self.is_first
    }

    pub fn is_last(&self) -> bool {
        self.is_last
    }

    pub fn archetype(&self) -> ArchetypeId {
        self.archetype_id
    }

    pub fn slot_index(&self) -> usize {
        self.slot_index
    }

    fn resolve<T: 'static>(&mut self) -> Option<ComponentTypeId> {
        if let Some(&id) = self.type_cache.get(&TypeId::of::<T>()) {
            return Some(id);
        }
        let id = self.registry.component_type_id::<T>()?;
        self.type_cache.insert(TypeId::of::<T>(), id);
        Some(id)
    }

    pub fn get<T: 'static>(&mut self) -> Option<&T> {
        let type_id = self.resolve::<T>()?;
        self.registry.pool_get::<T>(type_id, self.entity)
    }

    pub fn get_mut<T: 'static>(&mut self) -> Option<&mut T> {
        let type_id = self.resolve::<T>()?;
        self.registry.pool_get_mut::<T>(type_id, self.entity)
    }

    /// Mutable access that raises `MissingComponent` on an absent entity,
    /// rather than a shared default.
    pub fn get_ref<T: 'static>(&mut self) -> Result<&mut T, RegistryError> {
        self.get_mut::<T>().ok_or(RegistryError::MissingComponent {
            entity: self.entity,
            type_name: std::any::type_name::<T>(),
        })
    }

    pub fn has<T: 'static>(&self) -> bool {
        self.registry.has::<T>(self.entity)
    }

    /// Attach a component to the entity this cursor is visiting (§4.5
    /// "mutation during iteration"). May migrate the entity to a different
    /// archetype; the set of archetypes this walk covers was snapshotted at
    /// `build` time, so a migration never adds a new archetype to the walk
    /// already in progress.
    pub fn add<T: 'static>(&mut self, value: T) -> Result<(), RegistryError> {
        self.registry.add(self.entity, value)
    }

    /// Remove a component from the entity this cursor is visiting.
    pub fn remove<T: 'static>(&mut self) -> Result<(), RegistryError> {
        self.registry.remove::<T>(self.entity)
    }

    /// Destroy the entity this cursor is visiting. The remaining steps of
    /// the enclosing `each` walk still see this entity's old slot, now an
    /// invalidated hole, and skip it without error.
    pub fn destroy(&mut self) -> Result<(), RegistryError> {
        self.registry.destroy(self.entity)
    }
}

/// A single query item resolved from a read-only [`Registry`] borrow:
/// implemented for `&T`, never for bare `T`, so the tuple blanket impl
/// below can't overlap with it.
pub trait Component<'r> {
    type Item;
    fn type_id(registry: &Registry) -> Option<ComponentTypeId>;
    fn fetch(registry: &'r Registry, entity: Entity) -> Option<Self::Item>;
}

impl<'r, T: 'static> Component<'r> for &T {
    type Item = &'r T;

    fn type_id(registry: &Registry) -> Option<ComponentTypeId> {
        registry.component_type_id::<T>()
    }

    fn fetch(registry: &'r Registry, entity: Entity) -> Option<&'r T> {
        registry.get_or_null::<T>(entity)
    }
}

/// A fixed-size tuple of [`Component`] items, blanket-implemented for
/// arities 1 through 9 via the macro below (§4.5, §9).
pub trait ComponentTuple<'r> {
    type Item;
    fn type_ids(registry: &Registry) -> Option<Vec<ComponentTypeId>>;
    fn fetch(registry: &'r Registry, entity: Entity) -> Option<Self::Item>;
}

macro_rules! impl_component_tuple {
    ($($name:ident),+) => {
        impl<'r, $($name: Component<'r>),+> ComponentTuple<'r> for ($($name,)+) {
            type Item = ($($name::Item,)+);

            fn type_ids(registry: &Registry) -> Option<Vec<ComponentTypeId>> {
                Some(vec![$($name::type_id(registry)?),+])
            }

            fn fetch(registry: &'r Registry, entity: Entity) -> Option<Self::Item> {
                Some(($($name::fetch(registry, entity)?,)+))
            }
        }
    };
}

impl_component_tuple!(A);
impl_component_tuple!(A, B);
impl_component_tuple!(A, B, C);
impl_component_tuple!(A, B, C, D);
impl_component_tuple!(A, B, C, D, E);
impl_component_tuple!(A, B, C, D, E, F);
impl_component_tuple!(A, B, C, D, E, F, G);
impl_component_tuple!(A, B, C, D, E, F, G, H);
impl_component_tuple!(A, B, C, D, E, F, G, H, I);
