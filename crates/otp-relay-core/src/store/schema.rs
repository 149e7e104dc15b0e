//! SQL schema for the SQLite backend.
//!
//! Executed once at connection startup; idempotent thanks to `IF NOT EXISTS`.

pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;

CREATE TABLE IF NOT EXISTS destinations (
    id            TEXT PRIMARY KEY,
    title         TEXT,
    button_label  TEXT,
    button_target TEXT,
    enabled       INTEGER NOT NULL DEFAULT 1,
    message_count INTEGER NOT NULL DEFAULT 0,
    created_at    TEXT NOT NULL      -- ISO 8601 UTC
);

-- The owner is never stored here; it comes from config.
-- Plain rowid table so `ORDER BY rowid` is insertion order.
CREATE TABLE IF NOT EXISTS admins (
    user_id  INTEGER NOT NULL UNIQUE,
    added_at TEXT NOT NULL
);

PRAGMA user_version = 1;
";
