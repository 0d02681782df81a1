use async_trait::async_trait;
use chime_core::{ConversationId, HistoryEntry, HistoryStore, NewHistoryEntry, StorageError};

/// Store whose every call fails.
pub(crate) struct FailingStore;

#[async_trait]
impl HistoryStore for FailingStore {
    async fn create_session(&self, _id: &ConversationId) -> Result<(), StorageError> {
        Err(StorageError::Unavailable("offline".into()))
    }

    async fn touch_session(&self, _id: &ConversationId) -> Result<(), StorageError> {
        Err(StorageError::Unavailable("offline".into()))
    }

    async fn append_history(&self, _entry: NewHistoryEntry) -> Result<(), StorageError> {
        Err(StorageError::Unavailable("offline".into()))
    }

    async fn fetch_history(&self, _id: &ConversationId) -> Result<Vec<HistoryEntry>, StorageError> {
        Err(StorageError::Unavailable("offline".into()))
    }

    async fn prune_history_older_than(&self, _days: u32) -> Result<usize, StorageError> {
        Err(StorageError::Unavailable("offline".into()))
    }
}
