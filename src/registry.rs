//! The `Registry`: entity lifecycle, component mutation, archetype
//! transitions, and view construction (§4.3, §6).

use std::any::TypeId;
use std::collections::HashMap;
use std::fmt;

use tracing::{debug, trace};

use crate::archetype::{ArchetypeId, ArchetypeIndex};
use crate::component::{ComponentRegistry, ComponentTypeId};
use crate::entity::{Entity, EntityTable};
use crate::error::RegistryError;
use crate::scheduler::{NotificableId, Scheduler, System};
use crate::view::{ComponentTuple, View, ViewDescriptor};

/// The entity-component-system registry: owns entities, their components,
/// the archetype index that groups them, and the phased scheduler that
/// drives systems over them.
pub struct Registry {
    entities: EntityTable,
    components: ComponentRegistry,
    archetypes: ArchetypeIndex,
    entity_archetype: HashMap<u32, ArchetypeId>,
    scheduler: Scheduler,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            entities: EntityTable::new(),
            components: ComponentRegistry::new(),
            archetypes: ArchetypeIndex::new(),
            entity_archetype: HashMap::new(),
            scheduler: Scheduler::new(),
        }
    }

    pub fn with_capacity(entities: usize) -> Self {
        Self {
            entities: EntityTable::with_capacity(entities),
            entity_archetype: HashMap::with_capacity(entities),
            ..Self::new()
        }
    }

    // ---------------------------------------------------------------
    // Entity lifecycle
    // ---------------------------------------------------------------

    pub fn create(&mut self) -> Entity {
        let entity = self.entities.create();
        debug!(?entity, "entity created");
        entity
    }

    /// Convenience: create an entity and immediately attach one component.
    pub fn create_with<T: 'static>(&mut self, value: T) -> Entity {
        let entity = self.create();
        self.add(entity, value).expect("a freshly created entity is always valid");
        entity
    }

    pub fn destroy(&mut self, entity: Entity) -> Result<(), RegistryError> {
        self.validate(entity)?;
        if let Some(archetype_id) = self.entity_archetype.remove(&entity.index()) {
            let type_ids = self.archetypes.archetype(archetype_id).types().to_vec();
            self.archetypes.archetype_mut(archetype_id).remove(entity);
            for type_id in type_ids {
                if let Some(pool) = self.components.erased_mut(type_id) {
                    pool.delete(entity);
                }
            }
        }
        self.entities.destroy(entity);
        debug!(?entity, "entity destroyed");
        Ok(())
    }

    pub fn validate(&self, entity: Entity) -> Result<(), RegistryError> {
        if self.entities.is_live(entity) {
            Ok(())
        } else {
            Err(RegistryError::InvalidEntity { entity })
        }
    }

    pub fn is_alive(&self, entity: Entity) -> bool {
        self.entities.is_live(entity)
    }

    pub fn entities_count(&self) -> usize {
        self.entities.len()
    }

    pub fn component_pools_count(&self) -> usize {
        self.components.len()
    }

    // ---------------------------------------------------------------
    // Component mutation
    // ---------------------------------------------------------------

    pub fn register_component<T: 'static>(&mut self) -> ComponentTypeId {
        self.components.register::<T>()
    }

    pub fn exists<T: 'static>(&self) -> bool {
        self.components.lookup::<T>().is_some()
    }

    fn require_type_id<T: 'static>(&self) -> Result<ComponentTypeId, RegistryError> {
        self.components
            .lookup::<T>()
            .ok_or(RegistryError::InvalidComponent { type_name: std::any::type_name::<T>() })
    }

    fn current_types(&self, entity: Entity) -> Vec<ComponentTypeId> {
        self.entity_archetype
            .get(&entity.index())
            .map(|id| self.archetypes.archetype(*id).types().to_vec())
            .unwrap_or_default()
    }

    /// Move `entity` into the archetype for `new_types` (or no archetype if
    /// empty), removing it from its prior archetype first. Always routes
    /// through `ArchetypeIndex::get_or_create`, so the canonical-key
    /// interning in §4.3 is the single source of truth for archetype
    /// identity.
    fn transition_archetype(&mut self, entity: Entity, new_types: Vec<ComponentTypeId>) {
        if let Some(old_id) = self.entity_archetype.remove(&entity.index()) {
            self.archetypes.archetype_mut(old_id).remove(entity);
        }
        if new_types.is_empty() {
            return;
        }
        let new_id = self.archetypes.get_or_create(&new_types);
        self.archetypes.archetype_mut(new_id).add(entity);
        self.entity_archetype.insert(entity.index(), new_id);
    }

    fn route_after_add(&mut self, entity: Entity, type_id: ComponentTypeId) {
        let mut types = self.current_types(entity);
        if !types.contains(&type_id) {
            types.push(type_id);
        }
        self.transition_archetype(entity, types);
    }

    /// Attach `value` to `entity`. Idempotent: a second `add` of the same
    /// type on the same entity is a no-op (the first value wins), and
    /// doesn't re-trigger an archetype transition.
    pub fn add<T: 'static>(&mut self, entity: Entity, value: T) -> Result<(), RegistryError> {
        self.validate(entity)?;
        let type_id = self.components.register::<T>();
        let pool = self.components.pool_mut::<T>(type_id).expect("just registered");
        if pool.has(entity) {
            trace!(?entity, component = std::any::type_name::<T>(), "add: already present");
            return Ok(());
        }
        pool.add(entity, value);
        trace!(?entity, component = std::any::type_name::<T>(), "component added");
        self.route_after_add(entity, type_id);
        Ok(())
    }

    /// Convenience overload of `add` for default-constructible components.
    pub fn add_default<T: 'static + Default>(&mut self, entity: Entity) -> Result<(), RegistryError> {
        self.add(entity, T::default())
    }

    /// Attach or overwrite `value` on `entity`, unconditionally.
    pub fn set<T: 'static>(&mut self, entity: Entity, value: T) -> Result<(), RegistryError> {
        self.validate(entity)?;
        let type_id = self.components.register::<T>();
        let pool = self.components.pool_mut::<T>(type_id).expect("just registered");
        if pool.has(entity) {
            *pool.get_mut(entity).expect("checked has") = value;
            return Ok(());
        }
        pool.add(entity, value);
        self.route_after_add(entity, type_id);
        Ok(())
    }

    pub fn set_default<T: 'static + Default>(&mut self, entity: Entity) -> Result<(), RegistryError> {
        self.set(entity, T::default())
    }

    /// Remove `T` from `entity` if present. A no-op when `entity` has no
    /// `T` (the source's apparent "remove when absent" polarity is
    /// corrected here — see the design notes).
    pub fn remove<T: 'static>(&mut self, entity: Entity) -> Result<(), RegistryError> {
        self.validate(entity)?;
        let Some(type_id) = self.components.lookup::<T>() else {
            return Ok(());
        };
        let pool = self.components.pool_mut::<T>(type_id).expect("looked up");
        if !pool.has(entity) {
            return Ok(());
        }
        pool.remove(entity);
        let mut types = self.current_types(entity);
        types.retain(|t| *t != type_id);
        self.transition_archetype(entity, types);
        Ok(())
    }

    /// Remove and return `T` from `entity`, or `None` if it wasn't present.
    pub fn get_and_remove<T: 'static>(&mut self, entity: Entity) -> Result<Option<T>, RegistryError> {
        self.validate(entity)?;
        let Some(type_id) = self.components.lookup::<T>() else {
            return Ok(None);
        };
        let pool = self.components.pool_mut::<T>(type_id).expect("looked up");
        if !pool.has(entity) {
            return Ok(None);
        }
        let value = pool.remove(entity);
        let mut types = self.current_types(entity);
        types.retain(|t| *t != type_id);
        self.transition_archetype(entity, types);
        Ok(value)
    }

    /// Strip every component from `entity`, leaving it archetype-less.
    pub fn remove_all(&mut self, entity: Entity) -> Result<(), RegistryError> {
        self.validate(entity)?;
        let types = self.current_types(entity);
        for type_id in &types {
            if let Some(pool) = self.components.erased_mut(*type_id) {
                pool.delete(entity);
            }
        }
        self.transition_archetype(entity, Vec::new());
        Ok(())
    }

    pub fn get<T: 'static>(&self, entity: Entity) -> Result<&T, RegistryError> {
        self.validate(entity)?;
        let type_id = self.require_type_id::<T>()?;
        let pool = self.components.pool::<T>(type_id).expect("registered");
        pool.get(entity)
            .ok_or(RegistryError::MissingComponent { entity, type_name: std::any::type_name::<T>() })
    }

    /// Mutable access, raising `MissingComponent` on an absent entity rather
    /// than returning a shared default (the redesign called for in the
    /// design notes' open-question resolution).
    pub fn get_ref<T: 'static>(&mut self, entity: Entity) -> Result<&mut T, RegistryError> {
        self.validate(entity)?;
        let type_id = self.require_type_id::<T>()?;
        let pool = self.components.pool_mut::<T>(type_id).expect("registered");
        pool.get_mut(entity)
            .ok_or(RegistryError::MissingComponent { entity, type_name: std::any::type_name::<T>() })
    }

    /// Non-raising read: `None` if the entity is dead, the type was never
    /// registered, or the component is simply absent.
    pub fn get_or_null<T: 'static>(&self, entity: Entity) -> Option<&T> {
        if !self.is_alive(entity) {
            return None;
        }
        let type_id = self.components.lookup::<T>()?;
        self.components.pool::<T>(type_id)?.get(entity)
    }

    /// Insert a default `T` if absent, then return a shared reference.
    pub fn get_or_create<T: 'static + Default>(&mut self, entity: Entity) -> Result<&T, RegistryError> {
        self.validate(entity)?;
        let type_id = self.components.register::<T>();
        let present = self.components.pool::<T>(type_id).expect("registered").has(entity);
        if !present {
            self.components.pool_mut::<T>(type_id).expect("registered").add(entity, T::default());
            self.route_after_add(entity, type_id);
        }
        Ok(self.components.pool::<T>(type_id).expect("registered").get(entity).expect("just ensured present"))
    }

    /// Insert a default `T` if absent, then return a mutable reference.
    pub fn get_or_create_ref<T: 'static + Default>(&mut self, entity: Entity) -> Result<&mut T, RegistryError> {
        self.validate(entity)?;
        let type_id = self.components.register::<T>();
        let present = self.components.pool::<T>(type_id).expect("registered").has(entity);
        if !present {
            self.components.pool_mut::<T>(type_id).expect("registered").add(entity, T::default());
            self.route_after_add(entity, type_id);
        }
        Ok(self.components.pool_mut::<T>(type_id).expect("registered").get_mut(entity).expect("just ensured present"))
    }

    pub fn has<T: 'static>(&self, entity: Entity) -> bool {
        if !self.is_alive(entity) {
            return false;
        }
        match self.components.lookup::<T>() {
            Some(type_id) => self.components.pool::<T>(type_id).map(|p| p.has(entity)).unwrap_or(false),
            None => false,
        }
    }

    pub fn components_count(&self, entity: Entity) -> Result<usize, RegistryError> {
        self.validate(entity)?;
        Ok(self.current_types(entity).len())
    }

    pub fn is_empty(&self, entity: Entity) -> Result<bool, RegistryError> {
        Ok(self.components_count(entity)? == 0)
    }

    /// Tuple-valued getter for arities 1..9 (§4.5, §9). Raises
    /// `MissingComponent` naming the whole tuple (there's no single type
    /// name to point at) if any member is absent.
    pub fn get_components<'r, Q: ComponentTuple<'r>>(&'r self, entity: Entity) -> Result<Q::Item, RegistryError> {
        self.validate(entity)?;
        Q::fetch(self, entity).ok_or(RegistryError::MissingComponent { entity, type_name: "<tuple>" })
    }

    /// Drop every component pool with zero live entries, along with every
    /// archetype that referenced it. Safe because an empty pool means no
    /// live entity can be routed to an archetype naming that type.
    pub fn clean(&mut self) {
        let empty: Vec<ComponentTypeId> = self
            .components
            .ids()
            .filter(|id| self.components.erased(*id).map(|p| p.count() == 0).unwrap_or(false))
            .collect();
        for type_id in empty {
            self.archetypes.drop_with(type_id);
            self.components.remove_pool(type_id);
        }
        debug!(remaining_pools = self.components.len(), "clean: swept empty pools");
    }

    // ---------------------------------------------------------------
    // Views
    // ---------------------------------------------------------------

    pub fn view(&self, descriptor: &ViewDescriptor) -> Result<View, RegistryError> {
        descriptor.build(self)
    }

    // ---------------------------------------------------------------
    // Scheduler forwarding (§4.6, §6)
    // ---------------------------------------------------------------

    pub fn add_system<S: System>(&mut self, system: S) {
        self.scheduler.add_system(system);
    }

    pub fn remove_system<S: System>(&mut self) {
        self.scheduler.remove_system::<S>();
    }

    pub fn has_system<S: System>(&self) -> bool {
        self.scheduler.has_system::<S>()
    }

    pub fn get_system<S: System>(&self) -> Option<&S> {
        self.scheduler.get_system::<S>()
    }

    pub fn subscribe_start_notificable(&mut self, f: impl FnMut(&mut Registry) + 'static) -> NotificableId {
        self.scheduler.subscribe_start_notificable(f)
    }

    pub fn unsubscribe_start_notificable(&mut self, id: NotificableId) {
        self.scheduler.unsubscribe_start_notificable(id);
    }

    pub fn subscribe_end_notificable(&mut self, f: impl FnMut(&mut Registry) + 'static) -> NotificableId {
        self.scheduler.subscribe_end_notificable(f)
    }

    pub fn unsubscribe_end_notificable(&mut self, id: NotificableId) {
        self.scheduler.unsubscribe_end_notificable(id);
    }

    pub fn enqueue_single_frame(&mut self, f: impl FnOnce(&mut Registry) + 'static) {
        self.scheduler.enqueue_single_frame(f);
    }

    pub fn enqueue_pre_process(&mut self, f: impl FnOnce(&mut Registry) + 'static) {
        self.scheduler.enqueue_pre_process(f);
    }

    pub fn enqueue_post_process(&mut self, f: impl FnOnce(&mut Registry) + 'static) {
        self.scheduler.enqueue_post_process(f);
    }

    pub fn start(&mut self) -> Result<(), RegistryError> {
        let mut scheduler = std::mem::take(&mut self.scheduler);
        let result = scheduler.start(self);
        self.scheduler = scheduler;
        result
    }

    pub fn process(&mut self) -> Result<(), RegistryError> {
        let mut scheduler = std::mem::take(&mut self.scheduler);
        let result = scheduler.process(self);
        self.scheduler = scheduler;
        result
    }

    pub fn end(&mut self) -> Result<(), RegistryError> {
        let mut scheduler = std::mem::take(&mut self.scheduler);
        let result = scheduler.end(self);
        self.scheduler = scheduler;
        result
    }

    pub fn restart(&mut self) -> Result<(), RegistryError> {
        let mut scheduler = std::mem::take(&mut self.scheduler);
        let result = scheduler.restart(self);
        self.scheduler = scheduler;
        result
    }

    pub fn is_started(&self) -> bool {
        self.scheduler.started()
    }

    pub fn is_starting(&self) -> bool {
        self.scheduler.starting()
    }

    pub fn is_processing(&self) -> bool {
        self.scheduler.processing()
    }

    pub fn is_ending(&self) -> bool {
        self.scheduler.ending()
    }

    // ---------------------------------------------------------------
    // Internal accessors used by `view.rs` and `scheduler.rs`. Kept
    // `pub(crate)` — the public surface is the methods above.
    // ---------------------------------------------------------------

    pub(crate) fn component_type_id<T: 'static>(&self) -> Option<ComponentTypeId> {
        self.components.lookup::<T>()
    }

    pub(crate) fn component_type_id_by_any(&self, type_id: TypeId) -> Option<ComponentTypeId> {
        self.components.lookup_any(type_id)
    }

    pub(crate) fn pool_get<T: 'static>(&self, type_id: ComponentTypeId, entity: Entity) -> Option<&T> {
        self.components.pool::<T>(type_id)?.get(entity)
    }

    pub(crate) fn pool_get_mut<T: 'static>(&mut self, type_id: ComponentTypeId, entity: Entity) -> Option<&mut T> {
        self.components.pool_mut::<T>(type_id)?.get_mut(entity)
    }

    pub(crate) fn matching_archetypes(
        &self,
        with: &[ComponentTypeId],
        without: &[ComponentTypeId],
    ) -> Vec<ArchetypeId> {
        self.archetypes.matching(with, without)
    }

    pub(crate) fn archetype_slot_count(&self, id: ArchetypeId) -> usize {
        self.archetypes.archetype(id).slot_count()
    }

    pub(crate) fn archetype_entity_at(&self, id: ArchetypeId, slot: usize) -> Option<Entity> {
        self.archetypes.archetype(id).entity_at(slot)
    }

    pub(crate) fn archetype_entity_count(&self, id: ArchetypeId) -> usize {
        self.archetypes.archetype(id).entity_count()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("entities", &self.entities.len())
            .field("component_pools", &self.components.len())
            .field("archetypes", &self.archetypes.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq, Clone, Copy, Default)]
    struct Pos(f32, f32);
    #[derive(Debug, PartialEq, Clone, Copy)]
    struct Vel(f32, f32);

    #[test]
    fn create_destroy_roundtrip() {
        let mut reg = Registry::new();
        let e = reg.create();
        assert!(reg.is_alive(e));
        reg.destroy(e).unwrap();
        assert!(!reg.is_alive(e));
        assert!(matches!(reg.destroy(e), Err(RegistryError::InvalidEntity { .. })));
    }

    #[test]
    fn add_is_idempotent_first_value_wins() {
        let mut reg = Registry::new();
        let e = reg.create();
        reg.add(e, Pos(1.0, 1.0)).unwrap();
        reg.add(e, Pos(9.0, 9.0)).unwrap();
        assert_eq!(*reg.get::<Pos>(e).unwrap(), Pos(1.0, 1.0));
    }

    #[test]
    fn set_always_overwrites() {
        let mut reg = Registry::new();
        let e = reg.create();
        reg.set(e, Pos(1.0, 1.0)).unwrap();
        reg.set(e, Pos(2.0, 2.0)).unwrap();
        assert_eq!(*reg.get::<Pos>(e).unwrap(), Pos(2.0, 2.0));
    }

    #[test]
    fn remove_absent_is_noop() {
        let mut reg = Registry::new();
        let e = reg.create();
        assert!(reg.remove::<Pos>(e).is_ok());
    }

    #[test]
    fn remove_present_migrates_archetype() {
        let mut reg = Registry::new();
        let e = reg.create();
        reg.add(e, Pos(0.0, 0.0)).unwrap();
        reg.add(e, Vel(1.0, 1.0)).unwrap();
        assert_eq!(reg.components_count(e).unwrap(), 2);
        reg.remove::<Vel>(e).unwrap();
        assert_eq!(reg.components_count(e).unwrap(), 1);
        assert!(!reg.has::<Vel>(e));
        assert!(reg.has::<Pos>(e));
    }

    #[test]
    fn get_missing_component_raises() {
        let mut reg = Registry::new();
        let e = reg.create();
        let err = reg.get::<Pos>(e).unwrap_err();
        assert!(matches!(err, RegistryError::InvalidComponent { .. }));
        reg.register_component::<Pos>();
        let err = reg.get::<Pos>(e).unwrap_err();
        assert!(matches!(err, RegistryError::MissingComponent { .. }));
    }

    #[test]
    fn get_or_create_inserts_default_once() {
        let mut reg = Registry::new();
        let e = reg.create();
        {
            let p = reg.get_or_create::<Pos>(e).unwrap();
            assert_eq!(*p, Pos::default());
        }
        reg.get_ref::<Pos>(e).unwrap().0 = 5.0;
        assert_eq!(reg.get_or_create::<Pos>(e).unwrap().0, 5.0);
    }

    #[test]
    fn destroy_removes_from_all_pools() {
        let mut reg = Registry::new();
        let e = reg.create();
        reg.add(e, Pos(0.0, 0.0)).unwrap();
        reg.add(e, Vel(1.0, 1.0)).unwrap();
        reg.destroy(e).unwrap();
        assert_eq!(reg.view(&ViewDescriptor::new().with::<Pos>()).unwrap().entities_count(&reg), 0);
    }

    #[test]
    fn clean_drops_empty_pools_and_archetypes() {
        let mut reg = Registry::new();
        let e = reg.create();
        reg.add(e, Pos(0.0, 0.0)).unwrap();
        reg.destroy(e).unwrap();
        reg.clean();
        assert!(!reg.exists::<Pos>());
    }

    #[test]
    fn batch_of_ten_thousand_entities() {
        let mut reg = Registry::new();
        let mut alive = Vec::new();
        for i in 0..10_000 {
            let e = reg.create_with(Pos(i as f32, 0.0));
            alive.push(e);
        }
        assert_eq!(reg.entities_count(), 10_000);
        for &e in &alive[..2_500] {
            reg.destroy(e).unwrap();
        }
        assert_eq!(reg.entities_count(), 7_500);
        let view = reg.view(&ViewDescriptor::new().with::<Pos>()).unwrap();
        assert_eq!(view.entities_count(&reg), 7_500);
    }

    #[test]
    fn component_pools_count_tracks_registered_pools() {
        let mut reg = Registry::new();
        assert_eq!(reg.component_pools_count(), 0);
        let e = reg.create_with(Pos(0.0, 0.0));
        assert_eq!(reg.component_pools_count(), 1);
        reg.add(e, Vel(1.0, 1.0)).unwrap();
        assert_eq!(reg.component_pools_count(), 2);
    }
}
