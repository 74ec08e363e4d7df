//! Storage traits and implementations
//!
//! The trait-based design allows swapping between in-memory and SQLite
//! backends without touching the sync engine.

mod memory;
mod sqlite;
mod traits;

pub use memory::InMemoryRecordStore;
pub use sqlite::SqliteRecordStore;
pub use traits::RecordStore;
