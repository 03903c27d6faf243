//! Infrastructure layer - Storage adapters
//!
//! - In-memory adapter (tests, embedding)
//! - SQLite adapter

pub mod memory;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use memory::InMemoryResultStore;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteResultStore;
