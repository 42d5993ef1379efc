//! ecs-registry -- an archetype-based entity-component-system registry.
//!
//! Entities are generational handles routed into archetypes (one per unique
//! set of component types) so that iteration over a query walks tightly
//! packed, per-type storage rather than scattering across every entity.
//! Component and entity storage never compact on removal: positions stay
//! stable within a step even as entities are added or removed mid-iteration.
//!
//! # Quick Start
//!
//! ```
//! use ecs_registry::prelude::*;
//!
//! #[derive(Debug, Clone, Copy, PartialEq)]
//! struct Position { x: f32, y: f32 }
//!
//! #[derive(Debug, Clone, Copy, PartialEq)]
//! struct Velocity { dx: f32, dy: f32 }
//!
//! let mut registry = Registry::new();
//! let e = registry.create();
//! registry.add(e, Position { x: 0.0, y: 0.0 }).unwrap();
//! registry.add(e, Velocity { dx: 1.0, dy: 0.0 }).unwrap();
//!
//! let view = registry
//!     .view(&ViewDescriptor::new().with::<Position>().with::<Velocity>())
//!     .unwrap();
//! view.each(&mut registry, |cursor| {
//!     let dv = *cursor.get::<Velocity>().unwrap();
//!     let pos = cursor.get_ref::<Position>().unwrap();
//!     pos.x += dv.dx;
//!     pos.y += dv.dy;
//! });
//!
//! assert_eq!(registry.get::<Position>(e).unwrap().x, 1.0);
//! ```

#![deny(unsafe_code)]

pub mod archetype;
pub mod component;
pub mod entity;
pub mod error;
pub mod registry;
pub mod scheduler;
pub mod slot_array;
pub mod view;

pub mod prelude {
    pub use crate::entity::Entity;
    pub use crate::error::RegistryError;
    pub use crate::registry::Registry;
    pub use crate::scheduler::{Hook, NotificableId, System};
    pub use crate::view::{Component, ComponentTuple, Cursor, View, ViewDescriptor};
}
