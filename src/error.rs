//! Registry error type (§7).

use thiserror::Error;

use crate::entity::Entity;

/// The fatal error kinds the registry raises. Propagation is always
/// immediate — nothing here is caught or retried internally. Callers who
/// want to avoid raising at all have a parallel recovery-path API
/// (`get_or_null`, `has`, `is_empty`) that reports absence as a plain value
/// instead.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("invalid entity: {entity:?}")]
    InvalidEntity { entity: Entity },

    #[error("invalid component: {type_name} has no registered pool")]
    InvalidComponent { type_name: &'static str },

    #[error("missing component: {entity:?} has no {type_name}")]
    MissingComponent { entity: Entity, type_name: &'static str },

    #[error("invalid view: unknown component type(s): {}", unknown_types.join(", "))]
    InvalidView { unknown_types: Vec<&'static str> },
}
