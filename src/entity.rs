//! Entity handles and the table that allocates them (§3, §4.4).

use std::fmt;

use crate::slot_array::SlotArray;

/// Version value reserved to mean "this is not a real entity".
pub const INVALID_VERSION: u32 = u32::MAX;

/// A generational handle: a 32-bit index into the entity table packed with a
/// 32-bit version. `table[e.index()] == e` is the sole definition of "live".
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Entity(u64);

impl Entity {
    pub const INVALID: Entity = Entity::new(0, INVALID_VERSION);

    #[inline]
    pub const fn new(index: u32, version: u32) -> Self {
        Self(((version as u64) << 32) | index as u64)
    }

    #[inline]
    pub fn index(self) -> u32 {
        self.0 as u32
    }

    #[inline]
    pub fn version(self) -> u32 {
        (self.0 >> 32) as u32
    }

    #[inline]
    pub fn is_valid(self) -> bool {
        self.version() != INVALID_VERSION
    }

    #[inline]
    pub fn to_raw(self) -> u64 {
        self.0
    }

    #[inline]
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }
}

impl Default for Entity {
    fn default() -> Self {
        Entity::INVALID
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            write!(f, "Entity({}v{})", self.index(), self.version())
        } else {
            write!(f, "Entity(invalid)")
        }
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// The registry's entity table: a [`SlotArray`] of [`Entity`] values.
/// `invalidate = false`, since a freed slot must still report its old
/// version on the next `create` so the version bump is monotonic per index.
#[derive(Debug)]
pub struct EntityTable {
    slots: SlotArray<Entity>,
}

impl EntityTable {
    pub fn new() -> Self {
        Self { slots: SlotArray::new(false) }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self { slots: SlotArray::with_capacity(false, capacity) }
    }

    /// Allocate a fresh entity, reusing the lowest free index (with its
    /// version bumped) if one exists, else appending at version 0.
    pub fn create(&mut self) -> Entity {
        let pos = self.slots.peek().unwrap_or_else(|| self.slots.size());
        let version = self
            .slots
            .peek_slot(pos)
            .map(|old| old.version().wrapping_add(1))
            .unwrap_or(0);
        let entity = Entity::new(pos as u32, version);
        let actual = self.slots.add(entity);
        debug_assert_eq!(actual, pos);
        entity
    }

    /// Marks `entity`'s slot free. No-op if `entity` is already stale.
    pub fn destroy(&mut self, entity: Entity) -> bool {
        if !self.is_live(entity) {
            return false;
        }
        self.slots.remove_at(entity.index() as usize);
        true
    }

    pub fn is_live(&self, entity: Entity) -> bool {
        let idx = entity.index() as usize;
        self.slots.try_get(idx).map(|stored| *stored == entity).unwrap_or(false)
    }

    /// Number of currently live entities.
    pub fn len(&self) -> usize {
        self.slots.count()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

impl Default for EntityTable {
    fn default() -> Self {
        Self::new()
    }
}
