//! SQL DDL for the chime-store database.
//! WAL mode + foreign keys enabled at connection time.

/// Version recorded in `schema_version`.
pub const SCHEMA_VERSION: u32 = 1;

/// Tables and indexes, idempotent.
pub const CREATE_TABLES: &str = r"
CREATE TABLE IF NOT EXISTS sessions (
    session_id TEXT PRIMARY KEY,
    status TEXT NOT NULL DEFAULT 'active',
    start_time TEXT NOT NULL,
    last_active_time TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS conversation_history (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id TEXT NOT NULL,
    role TEXT NOT NULL,
    content TEXT NOT NULL,
    duration_ms INTEGER,
    response_time_ms INTEGER,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_history_session ON conversation_history(session_id, created_at);
CREATE INDEX IF NOT EXISTS idx_history_created ON conversation_history(created_at);
CREATE INDEX IF NOT EXISTS idx_sessions_activity ON sessions(status, last_active_time);

CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER NOT NULL
);
";

/// Connection pragmas applied on open.
pub const PRAGMAS: &str = r"
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;
PRAGMA busy_timeout = 5000;
PRAGMA synchronous = NORMAL;
";
