//! # chime-store
//!
//! `SQLite` persistence for conversation sessions and history.

pub mod database;
pub mod error;
pub mod history;
pub mod schema;
pub mod sessions;
pub mod store;

pub use database::Database;
pub use error::StoreError;
pub use history::HistoryRepo;
pub use sessions::{SessionRepo, SessionRow, SessionStatus};
pub use store::SqliteHistoryStore;

use chrono::{DateTime, SecondsFormat, Utc};

/// Fixed-width UTC timestamp so stored values order lexicographically.
pub(crate) fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}
