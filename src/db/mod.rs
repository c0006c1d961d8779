//! Database module: durable storage for the persisted session record.
//!
//! Layout:
//! - `models.rs`: Rust structs mirroring DB rows
//! - `schema.rs`: SQL DDL for initializing the database
//! - `sqlite.rs`: key/value access on top of a SQLite pool

pub mod models;
pub mod schema;
pub mod sqlite;

pub use models::DbSessionRow;
pub use schema::SQLITE_INIT;
pub use sqlite::{SessionStorage, SqlitePool};
