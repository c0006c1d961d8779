use chrono::{DateTime, Utc};
use sqlx::FromRow;

#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct DbSessionRow {
    pub key: String,
    pub payload: String,
    pub updated_at: DateTime<Utc>,
}
