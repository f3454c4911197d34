//! SQL schema for the Natter SQLite store.
//!
//! Executed once at connection startup. Future migrations will be gated on
//! `PRAGMA user_version`.

/// Full schema DDL; idempotent thanks to `CREATE TABLE IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS users (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    email         TEXT NOT NULL UNIQUE,
    first_name    TEXT NOT NULL,
    last_name     TEXT NOT NULL,
    password_hash TEXT NOT NULL,
    is_online     INTEGER NOT NULL DEFAULT 0,
    last_seen     TEXT
);

CREATE TABLE IF NOT EXISTS conversations (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    kind       TEXT NOT NULL,    -- 'direct' | 'group'
    name       TEXT,
    created_at TEXT NOT NULL
);

-- Membership is written once, together with its conversation.
-- The read marker columns are the only ones that ever change. Unread
-- counting compares message ids, which never go backwards.
CREATE TABLE IF NOT EXISTS conversation_members (
    conversation_id INTEGER NOT NULL REFERENCES conversations(id),
    user_id         INTEGER NOT NULL REFERENCES users(id),
    last_read_id    INTEGER,         -- newest message id seen; NULL: nothing read yet
    last_read_at    TEXT,
    PRIMARY KEY (conversation_id, user_id)
);

-- Messages are append-only.
CREATE TABLE IF NOT EXISTS messages (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    conversation_id INTEGER NOT NULL REFERENCES conversations(id),
    sender_id       INTEGER NOT NULL REFERENCES users(id),
    content         TEXT NOT NULL,
    created_at      TEXT NOT NULL    -- fixed-width RFC 3339 UTC; server-assigned
);

CREATE INDEX IF NOT EXISTS members_user_idx       ON conversation_members(user_id);
CREATE INDEX IF NOT EXISTS messages_conv_time_idx ON messages(conversation_id, created_at);

PRAGMA user_version = 1;
";
