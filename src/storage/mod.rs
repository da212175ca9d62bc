//! Persistence layer: `SQLite` schema and store.

pub mod schema;
pub mod sqlite;

pub use sqlite::SqliteStorage;
