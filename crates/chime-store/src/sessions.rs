//! Conversation session rows: creation, activity, idle expiry.

use chrono::{DateTime, Duration, Utc};
use rusqlite::{OptionalExtension, Row, params};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use chime_core::ConversationId;

use crate::database::Database;
use crate::error::StoreError;
use crate::timestamp;

/// Lifecycle state of a conversation session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Recently used.
    Active,
    /// Idle past the session timeout.
    Ended,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Ended => write!(f, "ended"),
        }
    }
}

impl std::str::FromStr for SessionStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "ended" => Ok(Self::Ended),
            other => Err(format!("unknown session status: {other}")),
        }
    }
}

/// One row of the `sessions` table.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRow {
    /// Conversation this row tracks.
    pub session_id: ConversationId,
    /// Active or ended.
    pub status: SessionStatus,
    /// RFC 3339 creation time.
    pub start_time: String,
    /// RFC 3339 time of the last recorded activity.
    pub last_active_time: String,
}

/// Conversation lifecycle rows.
pub struct SessionRepo {
    db: Database,
}

impl SessionRepo {
    /// Repository over `db`.
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Create the session if absent. Returns `true` when a row was inserted.
    #[instrument(skip(self), fields(session_id = %id))]
    pub fn create(&self, id: &ConversationId) -> Result<bool, StoreError> {
        let now = timestamp(Utc::now());
        self.db.with_conn(|conn| {
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO sessions (session_id, status, start_time, last_active_time)
                 VALUES (?1, 'active', ?2, ?2)",
                params![id.as_str(), now],
            )?;
            Ok(inserted == 1)
        })
    }

    /// Mark the session active now, creating it if needed.
    #[instrument(skip(self), fields(session_id = %id))]
    pub fn touch(&self, id: &ConversationId) -> Result<(), StoreError> {
        let now = timestamp(Utc::now());
        self.db.with_conn(|conn| {
            let _ = conn.execute(
                "INSERT INTO sessions (session_id, status, start_time, last_active_time)
                 VALUES (?1, 'active', ?2, ?2)
                 ON CONFLICT(session_id) DO UPDATE
                 SET last_active_time = excluded.last_active_time, status = 'active'",
                params![id.as_str(), now],
            )?;
            Ok(())
        })
    }

    /// Look up one conversation.
    pub fn get(&self, id: &ConversationId) -> Result<Option<SessionRow>, StoreError> {
        self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT session_id, status, start_time, last_active_time
                 FROM sessions WHERE session_id = ?1",
                [id.as_str()],
                row_to_session,
            )
            .optional()?
            .transpose()
        })
    }

    /// Active sessions whose last activity is before `cutoff`.
    pub fn list_idle(&self, cutoff: DateTime<Utc>) -> Result<Vec<SessionRow>, StoreError> {
        let cutoff = timestamp(cutoff);
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT session_id, status, start_time, last_active_time
                 FROM sessions WHERE status = 'active' AND last_active_time < ?1
                 ORDER BY last_active_time ASC",
            )?;
            let rows = stmt.query_map([cutoff], row_to_session)?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row??);
            }
            Ok(out)
        })
    }

    /// End every active session idle for longer than `timeout`.
    #[instrument(skip(self))]
    pub fn end_idle(&self, timeout: Duration) -> Result<usize, StoreError> {
        let cutoff = timestamp(Utc::now() - timeout);
        self.db.with_conn(|conn| {
            Ok(conn.execute(
                "UPDATE sessions SET status = 'ended'
                 WHERE status = 'active' AND last_active_time < ?1",
                [cutoff],
            )?)
        })
    }
}

fn row_to_session(row: &Row<'_>) -> rusqlite::Result<Result<SessionRow, StoreError>> {
    let status: String = row.get(1)?;
    let session_id: String = row.get(0)?;
    let start_time: String = row.get(2)?;
    let last_active_time: String = row.get(3)?;
    Ok(status
        .parse::<SessionStatus>()
        .map_err(StoreError::Corrupt)
        .map(|status| SessionRow {
            session_id: ConversationId::from_raw(session_id),
            status,
            start_time,
            last_active_time,
        }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo() -> (Database, SessionRepo) {
        let db = Database::in_memory().unwrap();
        (db.clone(), SessionRepo::new(db))
    }

    fn set_last_active(db: &Database, id: &str, at: DateTime<Utc>) {
        let _ = db
            .with_conn(|c| {
                Ok(c.execute(
                    "UPDATE sessions SET last_active_time = ?1 WHERE session_id = ?2",
                    params![timestamp(at), id],
                )?)
            })
            .unwrap();
    }

    #[test]
    fn create_is_idempotent() {
        let (_db, repo) = repo();
        let id = ConversationId::from_raw("s1");
        assert!(repo.create(&id).unwrap());
        assert!(!repo.create(&id).unwrap());
        let row = repo.get(&id).unwrap().unwrap();
        assert_eq!(row.status, SessionStatus::Active);
        assert_eq!(row.start_time, row.last_active_time);
    }

    #[test]
    fn touch_creates_missing_session() {
        let (_db, repo) = repo();
        let id = ConversationId::from_raw("s2");
        repo.touch(&id).unwrap();
        assert!(repo.get(&id).unwrap().is_some());
    }

    #[test]
    fn touch_reactivates_ended_session() {
        let (db, repo) = repo();
        let id = ConversationId::from_raw("s3");
        let _ = repo.create(&id).unwrap();
        set_last_active(&db, "s3", Utc::now() - Duration::hours(2));
        assert_eq!(repo.end_idle(Duration::minutes(30)).unwrap(), 1);
        assert_eq!(repo.get(&id).unwrap().unwrap().status, SessionStatus::Ended);
        repo.touch(&id).unwrap();
        assert_eq!(repo.get(&id).unwrap().unwrap().status, SessionStatus::Active);
    }

    #[test]
    fn get_missing_returns_none() {
        let (_db, repo) = repo();
        assert!(repo.get(&ConversationId::from_raw("nope")).unwrap().is_none());
    }

    #[test]
    fn list_idle_filters_by_cutoff() {
        let (db, repo) = repo();
        let _ = repo.create(&ConversationId::from_raw("old")).unwrap();
        let _ = repo.create(&ConversationId::from_raw("fresh")).unwrap();
        set_last_active(&db, "old", Utc::now() - Duration::hours(3));
        let idle = repo.list_idle(Utc::now() - Duration::hours(1)).unwrap();
        assert_eq!(idle.len(), 1);
        assert_eq!(idle[0].session_id.as_str(), "old");
    }

    #[test]
    fn status_parse_rejects_unknown() {
        assert!("archived".parse::<SessionStatus>().is_err());
        assert_eq!("ended".parse::<SessionStatus>().unwrap(), SessionStatus::Ended);
    }
}
