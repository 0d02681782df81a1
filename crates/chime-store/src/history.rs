//! Append-only conversation history.

use chrono::{Duration, Utc};
use rusqlite::{Row, params};
use tracing::instrument;

use chime_core::{ConversationId, HistoryEntry, NewHistoryEntry, Role};

use crate::database::Database;
use crate::error::StoreError;
use crate::timestamp;

/// Per-conversation message history.
pub struct HistoryRepo {
    db: Database,
}

impl HistoryRepo {
    /// Repository over `db`.
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Append an entry and return its row id.
    #[instrument(skip(self, entry), fields(session_id = %entry.conversation_id, role = entry.role.as_str()))]
    pub fn append(&self, entry: &NewHistoryEntry) -> Result<i64, StoreError> {
        let now = timestamp(Utc::now());
        let response_time = entry
            .response_time_ms
            .map(|ms| i64::try_from(ms).unwrap_or(i64::MAX));
        self.db.with_conn(|conn| {
            let _ = conn.execute(
                "INSERT INTO conversation_history
                 (session_id, role, content, duration_ms, response_time_ms, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    entry.conversation_id.as_str(),
                    entry.role.as_str(),
                    entry.content,
                    entry.duration_ms,
                    response_time,
                    now,
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    /// Entries of one conversation, oldest first.
    pub fn list(&self, id: &ConversationId) -> Result<Vec<HistoryEntry>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, session_id, role, content, duration_ms, response_time_ms, created_at
                 FROM conversation_history WHERE session_id = ?1
                 ORDER BY created_at ASC, id ASC",
            )?;
            let rows = stmt.query_map([id.as_str()], row_to_entry)?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row??);
            }
            Ok(out)
        })
    }

    /// Delete entries created more than `days` days ago.
    #[instrument(skip(self))]
    pub fn prune_older_than(&self, days: u32) -> Result<usize, StoreError> {
        let cutoff = timestamp(Utc::now() - Duration::days(i64::from(days)));
        self.db.with_conn(|conn| {
            Ok(conn.execute(
                "DELETE FROM conversation_history WHERE created_at < ?1",
                [cutoff],
            )?)
        })
    }
}

fn row_to_entry(row: &Row<'_>) -> rusqlite::Result<Result<HistoryEntry, StoreError>> {
    let role: String = row.get(2)?;
    let response_time: Option<i64> = row.get(5)?;
    let entry = HistoryEntry {
        id: row.get(0)?,
        session_id: ConversationId::from_raw(row.get::<_, String>(1)?),
        role: Role::User,
        content: row.get(3)?,
        duration_ms: row.get(4)?,
        response_time_ms: response_time.and_then(|ms| u64::try_from(ms).ok()),
        created_at: row.get(6)?,
    };
    Ok(role
        .parse::<Role>()
        .map_err(StoreError::Corrupt)
        .map(|role| HistoryEntry { role, ..entry }))
}
