//! Archetypes: sets of entities sharing an exact component type-set (§4.3).
//!
//! An archetype's entity list is deliberately non-compacting: removal marks
//! a slot Invalid in place (via [`SlotArray::replace`]) rather than freeing
//! it, so positions stay stable across a step even as entities leave mid-walk.

use std::collections::HashMap;

use crate::component::ComponentTypeId;
use crate::entity::Entity;
use crate::slot_array::SlotArray;

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ArchetypeId(pub(crate) u32);

impl std::fmt::Debug for ArchetypeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ArchetypeId({})", self.0)
    }
}

#[derive(Debug)]
pub struct Archetype {
    id: ArchetypeId,
    types: Vec<ComponentTypeId>,
    entities: SlotArray<Entity>,
    alive: bool,
}

impl Archetype {
    pub fn id(&self) -> ArchetypeId {
        self.id
    }

    pub fn types(&self) -> &[ComponentTypeId] {
        &self.types
    }

    pub fn has_type(&self, type_id: ComponentTypeId) -> bool {
        self.types.binary_search(&type_id).is_ok()
    }

    /// Append `entity` to this archetype's membership. Always appends: the
    /// entity list's free-list is never populated, since `remove` uses
    /// `replace`, not `remove_at` (see module docs).
    pub fn add(&mut self, entity: Entity) {
        self.entities.add(entity);
    }

    /// Mark `entity`'s slot Invalid in place. Returns `false` if `entity`
    /// wasn't found (already removed, or never a member).
    pub fn remove(&mut self, entity: Entity) -> bool {
        self.entities.replace(&entity, Entity::INVALID)
    }

    /// Size of the backing slot array, i.e. one past the highest slot ever
    /// used (including Invalid ones).
    pub fn slot_count(&self) -> usize {
        self.entities.size()
    }

    pub fn entity_at(&self, slot: usize) -> Option<Entity> {
        self.entities.try_get(slot).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = Entity> + '_ {
        (0..self.entities.size())
            .filter_map(move |slot| self.entities.try_get(slot).copied())
            .filter(|e| e.is_valid())
    }

    pub fn entity_count(&self) -> usize {
        self.iter().count()
    }
}

/// Interns archetypes by their canonical (sorted, deduped) component
/// type-set. `ArchetypeId`s are stable for the registry's lifetime: an
/// archetype emptied by [`ArchetypeIndex::drop_with`] is tombstoned in
/// place rather than having its id recycled, so any stale routing entry
/// simply fails to match rather than pointing at an unrelated archetype.
#[derive(Debug, Default)]
pub struct ArchetypeIndex {
    by_key: HashMap<Vec<ComponentTypeId>, ArchetypeId>,
    archetypes: Vec<Archetype>,
}

impl ArchetypeIndex {
    pub fn new() -> Self {
        Self::default()
    }

    fn canonical(types: &[ComponentTypeId]) -> Vec<ComponentTypeId> {
        let mut v = types.to_vec();
        v.sort_unstable();
        v.dedup();
        v
    }

    /// Returns the archetype for this exact canonical type-set, creating it
    /// if this is the first time it's been requested. Never called with an
    /// empty type-set — the registry keeps "no components" as `None`
    /// routing rather than a materialized empty archetype (§3).
    pub fn get_or_create(&mut self, types: &[ComponentTypeId]) -> ArchetypeId {
        let key = Self::canonical(types);
        if let Some(&id) = self.by_key.get(&key) {
            return id;
        }
        let id = ArchetypeId(self.archetypes.len() as u32);
        self.archetypes.push(Archetype {
            id,
            types: key.clone(),
            entities: SlotArray::new(false),
            alive: true,
        });
        self.by_key.insert(key, id);
        id
    }

    pub fn get(&self, types: &[ComponentTypeId]) -> Option<ArchetypeId> {
        self.by_key.get(&Self::canonical(types)).copied()
    }

    pub fn archetype(&self, id: ArchetypeId) -> &Archetype {
        &self.archetypes[id.0 as usize]
    }

    pub fn archetype_mut(&mut self, id: ArchetypeId) -> &mut Archetype {
        &mut self.archetypes[id.0 as usize]
    }

    /// Archetypes matching `with` (must carry every listed type) and
    /// excluding `without` (must carry none), in creation order (§4.5).
    pub fn matching(&self, with: &[ComponentTypeId], without: &[ComponentTypeId]) -> Vec<ArchetypeId> {
        self.archetypes
            .iter()
            .filter(|a| a.alive)
            .filter(|a| with.iter().all(|t| a.has_type(*t)) && !without.iter().any(|t| a.has_type(*t)))
            .map(|a| a.id)
            .collect()
    }

    /// Tombstones every archetype mentioning `type_id`. Called from
    /// `Registry::clean` only once the corresponding pool is confirmed
    /// empty, so no live entity can be routed to one of these archetypes.
    pub fn drop_with(&mut self, type_id: ComponentTypeId) {
        let mut dropped_keys = Vec::new();
        for archetype in &mut self.archetypes {
            if archetype.alive && archetype.has_type(type_id) {
                dropped_keys.push(archetype.types.clone());
                archetype.alive = false;
                archetype.types = Vec::new();
                archetype.entities = SlotArray::new(false);
            }
        }
        for key in dropped_keys {
            self.by_key.remove(&key);
        }
    }

    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tid(n: u32) -> ComponentTypeId {
        ComponentTypeId(n)
    }

    #[test]
    fn get_or_create_interns_regardless_of_input_order() {
        let mut idx = ArchetypeIndex::new();
        let a = idx.get_or_create(&[tid(1), tid(2)]);
        let b = idx.get_or_create(&[tid(2), tid(1)]);
        assert_eq!(a, b);
        assert_eq!(idx.len(), 1);
    }

    #[test]
    fn distinct_type_sets_get_distinct_archetypes() {
        let mut idx = ArchetypeIndex::new();
        let a = idx.get_or_create(&[tid(1)]);
        let b = idx.get_or_create(&[tid(1), tid(2)]);
        assert_ne!(a, b);
    }

    #[test]
    fn remove_marks_invalid_without_compacting() {
        let mut idx = ArchetypeIndex::new();
        let a = idx.get_or_create(&[tid(1)]);
        let e0 = Entity::new(0, 0);
        let e1 = Entity::new(1, 0);
        idx.archetype_mut(a).add(e0);
        idx.archetype_mut(a).add(e1);
        assert!(idx.archetype_mut(a).remove(e0));
        assert_eq!(idx.archetype(a).slot_count(), 2, "slot count unaffected by removal");
        let live: Vec<Entity> = idx.archetype(a).iter().collect();
        assert_eq!(live, vec![e1]);
    }

    #[test]
    fn matching_respects_with_and_without() {
        let mut idx = ArchetypeIndex::new();
        let pos_only = idx.get_or_create(&[tid(1)]);
        let pos_vel = idx.get_or_create(&[tid(1), tid(2)]);
        let with_pos = idx.matching(&[tid(1)], &[]);
        assert_eq!(with_pos.len(), 2);
        let pos_without_vel = idx.matching(&[tid(1)], &[tid(2)]);
        assert_eq!(pos_without_vel, vec![pos_only]);
        let pos_with_vel = idx.matching(&[tid(1), tid(2)], &[]);
        assert_eq!(pos_with_vel, vec![pos_vel]);
    }

    #[test]
    fn drop_with_tombstones_and_excludes_from_matching() {
        let mut idx = ArchetypeIndex::new();
        let a = idx.get_or_create(&[tid(1)]);
        idx.drop_with(tid(1));
        assert!(idx.matching(&[], &[]).is_empty());
        assert_eq!(idx.archetype(a).types().len(), 0);
        // Requesting the same type-set again allocates a fresh archetype.
        let b = idx.get_or_create(&[tid(1)]);
        assert_ne!(a, b);
    }
}
