//! Durable message store seam and its SQLite implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::chat::Message;
use crate::db::models::MessageRow;
use crate::db::DbPool;
use crate::error::StoreError;

/// Position in a room's canonical order: `(timestamp_ms, seq)`.
///
/// Rendered on the wire as the opaque string `"<timestamp_ms>.<seq>"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Cursor {
    pub timestamp_ms: i64,
    pub seq: i64,
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.timestamp_ms, self.seq)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("malformed cursor")]
pub struct CursorParseError;

impl FromStr for Cursor {
    type Err = CursorParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (ts, seq) = s.split_once('.').ok_or(CursorParseError)?;
        Ok(Cursor {
            timestamp_ms: ts.parse().map_err(|_| CursorParseError)?,
            seq: seq.parse().map_err(|_| CursorParseError)?,
        })
    }
}

impl Serialize for Cursor {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Cursor {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Message as handed to the store: validated, id assigned, receipt time set.
#[derive(Debug, Clone)]
pub struct StoredMessageDraft {
    pub id: String,
    pub chat_id: String,
    pub sender_id: String,
    pub sender_name: String,
    pub text: String,
    pub received_at: DateTime<Utc>,
    pub client_timestamp: Option<String>,
}

/// Append-only per-room message log.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Append a message. The stored timestamp is never earlier than the
    /// latest one already in the room. Re-appending an existing id from the
    /// same sender returns the stored message unchanged.
    async fn insert(&self, draft: StoredMessageDraft) -> Result<Message, StoreError>;

    /// Up to `limit` messages strictly after `after`, in canonical order.
    async fn page(
        &self,
        chat_id: &str,
        after: Option<Cursor>,
        limit: u32,
    ) -> Result<Vec<Message>, StoreError>;
}

pub struct SqliteMessageStore {
    db: DbPool,
}

impl SqliteMessageStore {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }
}

fn row_to_message(row: MessageRow) -> Message {
    let timestamp = DateTime::<Utc>::from_timestamp_millis(row.timestamp_ms).unwrap_or_default();
    Message {
        id: row.id,
        chat_id: row.chat_id,
        sender_id: row.sender_id,
        sender_name: row.sender_name,
        text: row.text,
        timestamp,
        client_timestamp: row.client_timestamp,
        cursor: Cursor {
            timestamp_ms: row.timestamp_ms,
            seq: row.seq,
        },
    }
}

const MESSAGE_COLUMNS: &str =
    "seq, id, chat_id, sender_id, sender_name, text, timestamp_ms, client_timestamp, created_at";

#[async_trait]
impl MessageStore for SqliteMessageStore {
    async fn insert(&self, draft: StoredMessageDraft) -> Result<Message, StoreError> {
        let db = self.db.clone();

        tokio::task::spawn_blocking(move || -> Result<Message, StoreError> {
            let conn = db
                .lock()
                .map_err(|e| StoreError::Unavailable(format!("DB lock error: {}", e)))?;

            // Idempotent re-append of a message id already in this room
            let existing = conn.query_row(
                &format!(
                    "SELECT {} FROM messages WHERE chat_id = ?1 AND id = ?2",
                    MESSAGE_COLUMNS
                ),
                rusqlite::params![draft.chat_id, draft.id],
                MessageRow::from_row,
            );
            match existing {
                Ok(row) if row.sender_id == draft.sender_id => return Ok(row_to_message(row)),
                Ok(_) => return Err(StoreError::IdConflict(draft.id)),
                Err(rusqlite::Error::QueryReturnedNoRows) => {}
                Err(e) => return Err(e.into()),
            }

            let latest: i64 = conn.query_row(
                "SELECT COALESCE(MAX(timestamp_ms), 0) FROM messages WHERE chat_id = ?1",
                rusqlite::params![draft.chat_id],
                |row| row.get(0),
            )?;
            let timestamp_ms = draft.received_at.timestamp_millis().max(latest);
            let created_at = Utc::now().to_rfc3339();

            conn.execute(
                "INSERT INTO messages (id, chat_id, sender_id, sender_name, text, timestamp_ms, client_timestamp, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                rusqlite::params![
                    draft.id,
                    draft.chat_id,
                    draft.sender_id,
                    draft.sender_name,
                    draft.text,
                    timestamp_ms,
                    draft.client_timestamp,
                    created_at,
                ],
            )?;
            let seq = conn.last_insert_rowid();

            Ok(row_to_message(MessageRow {
                seq,
                id: draft.id,
                chat_id: draft.chat_id,
                sender_id: draft.sender_id,
                sender_name: draft.sender_name,
                text: draft.text,
                timestamp_ms,
                client_timestamp: draft.client_timestamp,
                created_at,
            }))
        })
        .await?
    }

    async fn page(
        &self,
        chat_id: &str,
        after: Option<Cursor>,
        limit: u32,
    ) -> Result<Vec<Message>, StoreError> {
        let db = self.db.clone();
        let cid = chat_id.to_string();
        // Keyset start strictly before anything stored
        let after = after.unwrap_or(Cursor {
            timestamp_ms: i64::MIN,
            seq: i64::MIN,
        });

        tokio::task::spawn_blocking(move || -> Result<Vec<Message>, StoreError> {
            let conn = db
                .lock()
                .map_err(|e| StoreError::Unavailable(format!("DB lock error: {}", e)))?;
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM messages
                 WHERE chat_id = ?1
                   AND (timestamp_ms > ?2 OR (timestamp_ms = ?2 AND seq > ?3))
                 ORDER BY timestamp_ms ASC, seq ASC
                 LIMIT ?4",
                MESSAGE_COLUMNS
            ))?;
            let rows = stmt
                .query_map(
                    rusqlite::params![cid, after.timestamp_ms, after.seq, limit as i64],
                    MessageRow::from_row,
                )?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows.into_iter().map(row_to_message).collect())
        })
        .await?
    }
}
