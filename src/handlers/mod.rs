// handlers/mod.rs - per-entity CRUD handlers plus the liveness probe
pub mod entity;
pub mod health;

pub use entity::EntityState;
