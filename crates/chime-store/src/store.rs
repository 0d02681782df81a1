//! [`HistoryStore`] implementation over the `SQLite` repositories.
//!
//! Repository calls are synchronous, so each one runs on the blocking pool.

use std::time::Duration;

use async_trait::async_trait;
use chime_core::{ConversationId, HistoryEntry, HistoryStore, NewHistoryEntry, StorageError};

use crate::database::Database;
use crate::error::StoreError;
use crate::history::HistoryRepo;
use crate::sessions::SessionRepo;

/// Conversation storage backed by a [`Database`].
#[derive(Clone)]
pub struct SqliteHistoryStore {
    db: Database,
}

impl SqliteHistoryStore {
    /// Store backed by `db`.
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Mark conversations idle for longer than `timeout` as ended.
    pub async fn end_idle_sessions(&self, timeout: Duration) -> Result<usize, StorageError> {
        let timeout = chrono::Duration::from_std(timeout)
            .map_err(|e| StorageError::Backend(format!("invalid timeout: {e}")))?;
        self.blocking(move |db| SessionRepo::new(db).end_idle(timeout))
            .await
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T, StorageError>
    where
        T: Send + 'static,
        F: FnOnce(Database) -> Result<T, StoreError> + Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || f(db))
            .await
            .map_err(|e| StorageError::Unavailable(e.to_string()))?
            .map_err(StorageError::from)
    }
}

#[async_trait]
impl HistoryStore for SqliteHistoryStore {
    async fn create_session(&self, id: &ConversationId) -> Result<(), StorageError> {
        let id = id.clone();
        self.blocking(move |db| SessionRepo::new(db).create(&id).map(|_| ()))
            .await
    }

    async fn touch_session(&self, id: &ConversationId) -> Result<(), StorageError> {
        let id = id.clone();
        self.blocking(move |db| SessionRepo::new(db).touch(&id)).await
    }

    async fn append_history(&self, entry: NewHistoryEntry) -> Result<(), StorageError> {
        self.blocking(move |db| HistoryRepo::new(db).append(&entry).map(|_| ()))
            .await
    }

    async fn fetch_history(&self, id: &ConversationId) -> Result<Vec<HistoryEntry>, StorageError> {
        let id = id.clone();
        self.blocking(move |db| HistoryRepo::new(db).list(&id)).await
    }

    async fn prune_history_older_than(&self, days: u32) -> Result<usize, StorageError> {
        self.blocking(move |db| HistoryRepo::new(db).prune_older_than(days))
            .await
    }
}
