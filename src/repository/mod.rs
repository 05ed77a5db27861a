//! Domain repositories.

mod entity;

pub use entity::{EntityKind, EntityRepository};
