pub mod backend;
pub mod manager;
pub mod memory;
pub mod models;
pub mod postgres;
pub mod record;
pub mod store;

pub use backend::{Row, StorageBackend};
pub use manager::{DatabaseError, DatabaseManager};
pub use memory::MemoryBackend;
pub use postgres::PgBackend;
pub use record::{Record, RecordError};
pub use store::{EntityHooks, EntityStore, ListResult, NoHooks, SoftDeletePolicy};
