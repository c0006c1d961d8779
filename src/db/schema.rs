//! SQL DDL for initializing the session storage.

/// SQLite schema with:
/// - `key` TEXT PRIMARY KEY (one row per storage key)
/// - `payload` the serialized session record (JSON)
/// - `updated_at` RFC3339 timestamp of the last write
pub const SQLITE_INIT: &str = r#"
CREATE TABLE IF NOT EXISTS sessions (
    key TEXT PRIMARY KEY NOT NULL,
    payload TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
"#;
