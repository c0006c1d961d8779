use crate::config::SESSION_STORAGE_KEY;
use crate::db::sqlite::SessionStorage;
use crate::error::TempoError;
use crate::types::SessionRecord;

use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Durable home of the session record, with a write-through in-memory cache.
///
/// Passed explicitly to everything that needs it; clones share the same cache.
#[derive(Clone)]
pub struct SessionStore {
    storage: SessionStorage,
    key: Arc<str>,
    cache: Arc<RwLock<Option<SessionRecord>>>,
}

impl SessionStore {
    pub fn new(storage: SessionStorage) -> Self {
        Self {
            storage,
            key: Arc::from(SESSION_STORAGE_KEY),
            cache: Arc::new(RwLock::new(None)),
        }
    }

    pub async fn open(database_url: &str) -> Result<Self, TempoError> {
        Ok(Self::new(SessionStorage::connect(database_url).await?))
    }

    /// Cached record if any, otherwise whatever durable storage holds now.
    pub async fn load(&self) -> Result<Option<SessionRecord>, TempoError> {
        if let Some(record) = self.cache.read().await.clone() {
            return Ok(Some(record));
        }

        let Some(row) = self.storage.get(&self.key).await? else {
            return Ok(None);
        };
        match serde_json::from_str::<SessionRecord>(&row.payload) {
            Ok(record) => {
                debug!(user_id = %record.user_id, "session loaded from durable storage");
                *self.cache.write().await = Some(record.clone());
                Ok(Some(record))
            }
            Err(e) => {
                warn!(error = %e, "discarding undecodable stored session");
                self.storage.delete(&self.key).await?;
                Ok(None)
            }
        }
    }

    pub async fn save(&self, record: &SessionRecord) -> Result<(), TempoError> {
        let payload = serde_json::to_string(record)?;
        self.storage.put(&self.key, &payload).await?;
        *self.cache.write().await = Some(record.clone());
        info!(user_id = %record.user_id, "session saved");
        Ok(())
    }

    /// Forget the session. The in-memory copy is dropped even if the durable delete fails.
    pub async fn clear(&self) -> Result<(), TempoError> {
        self.cache.write().await.take();
        self.storage.delete(&self.key).await?;
        info!("session cleared");
        Ok(())
    }

    pub async fn is_valid(&self) -> Result<bool, TempoError> {
        Ok(self.load().await?.is_some_and(|r| !r.is_expired()))
    }
}
