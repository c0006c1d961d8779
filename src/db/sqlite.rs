use crate::db::models::DbSessionRow;
use crate::db::schema::SQLITE_INIT;
use crate::error::TempoError;
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::str::FromStr;

pub type SqlitePool = Pool<Sqlite>;

#[derive(Clone)]
pub struct SessionStorage {
    pool: SqlitePool,
}

impl SessionStorage {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (creating if needed) the database at `database_url` and apply the schema.
    ///
    /// A single long-lived connection keeps `sqlite::memory:` databases alive
    /// for the lifetime of the pool.
    pub async fn connect(database_url: &str) -> Result<Self, TempoError> {
        let connect_opts = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(connect_opts)
            .await?;
        let storage = Self::new(pool);
        storage.init_schema().await?;
        Ok(storage)
    }

    /// Initialize the schema by executing the bundled DDL.
    pub async fn init_schema(&self) -> Result<(), TempoError> {
        for stmt in SQLITE_INIT.split(';') {
            let s = stmt.trim();
            if s.is_empty() {
                continue;
            }
            sqlx::query(s).execute(&self.pool).await?;
        }
        Ok(())
    }

    pub async fn get(&self, key: &str) -> Result<Option<DbSessionRow>, TempoError> {
        let row = sqlx::query_as::<_, DbSessionRow>(
            "SELECT key, payload, updated_at FROM sessions WHERE key = ?",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    /// Insert or overwrite the payload stored under `key`.
    pub async fn put(&self, key: &str, payload: &str) -> Result<(), TempoError> {
        sqlx::query(
            r#"
            INSERT INTO sessions (key, payload, updated_at) VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                payload = excluded.payload,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(payload)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Delete the row for `key`; deleting a missing key is not an error.
    pub async fn delete(&self, key: &str) -> Result<(), TempoError> {
        sqlx::query("DELETE FROM sessions WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
