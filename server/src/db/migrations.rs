use rusqlite_migration::{Migrations, M};

/// Define all schema migrations.
/// Uses SQLite user_version pragma for tracking; no migration table needed.
pub fn migrations() -> Migrations<'static> {
    Migrations::new(vec![
        M::up(
            "-- Migration 1: collaboration mirror and message log

CREATE TABLE users (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    role TEXT NOT NULL,
    avatar TEXT,
    updated_at TEXT NOT NULL
);

CREATE TABLE collaborations (
    id TEXT PRIMARY KEY,
    requester_id TEXT NOT NULL,
    recipient_id TEXT NOT NULL,
    status TEXT NOT NULL,
    chat_id TEXT NOT NULL UNIQUE,
    updated_at TEXT NOT NULL
);

CREATE INDEX idx_collaborations_requester ON collaborations(requester_id, status);
CREATE INDEX idx_collaborations_recipient ON collaborations(recipient_id, status);

CREATE TABLE messages (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    id TEXT NOT NULL,
    chat_id TEXT NOT NULL,
    sender_id TEXT NOT NULL,
    sender_name TEXT NOT NULL,
    text TEXT NOT NULL,
    timestamp_ms INTEGER NOT NULL,
    client_timestamp TEXT,
    created_at TEXT NOT NULL,
    UNIQUE(chat_id, id)
);

CREATE INDEX idx_messages_order ON messages(chat_id, timestamp_ms, seq);
",
        ),
    ])
}
