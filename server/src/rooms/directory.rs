//! Collaboration collaborator seam and its SQLite-backed mirror.

use async_trait::async_trait;
use chrono::Utc;

use crate::db::models::{CollaborationRow, UserRow};
use crate::db::DbPool;
use crate::error::StoreError;
use crate::rooms::{Collaboration, CollaborationChange, CollaborationStatus, UserProfile};

/// Read access to collaboration records, plus applying change notifications
/// to whatever mirror the implementation keeps.
#[async_trait]
pub trait CollaborationSource: Send + Sync {
    /// Accepted collaborations where `user_id` is requester or recipient.
    async fn accepted_for_user(&self, user_id: &str) -> Result<Vec<Collaboration>, StoreError>;

    /// Collaboration behind a chat id, whatever its status.
    async fn find_by_chat_id(&self, chat_id: &str) -> Result<Option<Collaboration>, StoreError>;

    async fn profile(&self, user_id: &str) -> Result<Option<UserProfile>, StoreError>;

    /// Record a change notification. Returns the collaboration as stored.
    async fn apply(&self, change: CollaborationChange) -> Result<Collaboration, StoreError>;
}

/// Mirror of collaboration and profile records in the local SQLite database.
#[derive(Clone)]
pub struct SqliteDirectory {
    db: DbPool,
}

impl SqliteDirectory {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }
}

fn row_to_collaboration(row: CollaborationRow) -> Option<Collaboration> {
    let status = match CollaborationStatus::parse(&row.status) {
        Some(status) => status,
        None => {
            tracing::warn!(
                collaboration_id = %row.id,
                status = %row.status,
                "Skipping collaboration with unknown status"
            );
            return None;
        }
    };
    Some(Collaboration {
        id: row.id,
        requester_id: row.requester_id,
        recipient_id: row.recipient_id,
        status,
        chat_id: row.chat_id,
    })
}

#[async_trait]
impl CollaborationSource for SqliteDirectory {
    async fn accepted_for_user(&self, user_id: &str) -> Result<Vec<Collaboration>, StoreError> {
        let db = self.db.clone();
        let uid = user_id.to_string();

        tokio::task::spawn_blocking(move || -> Result<Vec<Collaboration>, StoreError> {
            let conn = db
                .lock()
                .map_err(|e| StoreError::Unavailable(format!("DB lock error: {}", e)))?;
            let mut stmt = conn.prepare(
                "SELECT id, requester_id, recipient_id, status, chat_id, updated_at
                 FROM collaborations
                 WHERE status = 'accepted' AND (requester_id = ?1 OR recipient_id = ?1)
                 ORDER BY updated_at ASC, id ASC",
            )?;
            let rows = stmt
                .query_map(rusqlite::params![uid], CollaborationRow::from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows.into_iter().filter_map(row_to_collaboration).collect())
        })
        .await?
    }

    async fn find_by_chat_id(&self, chat_id: &str) -> Result<Option<Collaboration>, StoreError> {
        let db = self.db.clone();
        let cid = chat_id.to_string();

        tokio::task::spawn_blocking(move || -> Result<Option<Collaboration>, StoreError> {
            let conn = db
                .lock()
                .map_err(|e| StoreError::Unavailable(format!("DB lock error: {}", e)))?;
            let row = conn.query_row(
                "SELECT id, requester_id, recipient_id, status, chat_id, updated_at
                 FROM collaborations WHERE chat_id = ?1",
                rusqlite::params![cid],
                CollaborationRow::from_row,
            );
            match row {
                Ok(row) => Ok(row_to_collaboration(row)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e.into()),
            }
        })
        .await?
    }

    async fn profile(&self, user_id: &str) -> Result<Option<UserProfile>, StoreError> {
        let db = self.db.clone();
        let uid = user_id.to_string();

        tokio::task::spawn_blocking(move || -> Result<Option<UserProfile>, StoreError> {
            let conn = db
                .lock()
                .map_err(|e| StoreError::Unavailable(format!("DB lock error: {}", e)))?;
            let row = conn.query_row(
                "SELECT id, name, role, avatar, updated_at FROM users WHERE id = ?1",
                rusqlite::params![uid],
                UserRow::from_row,
            );
            match row {
                Ok(row) => Ok(Some(UserProfile {
                    id: row.id,
                    name: row.name,
                    role: row.role,
                    avatar: row.avatar,
                })),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e.into()),
            }
        })
        .await?
    }

    async fn apply(&self, change: CollaborationChange) -> Result<Collaboration, StoreError> {
        let db = self.db.clone();
        let profiles: Vec<UserProfile> = change
            .requester
            .iter()
            .chain(change.recipient.iter())
            .cloned()
            .collect();
        let collab = change.collaboration.into_collaboration();
        let stored = collab.clone();

        tokio::task::spawn_blocking(move || {
            let mut conn = db
                .lock()
                .map_err(|e| StoreError::Unavailable(format!("DB lock error: {}", e)))?;
            let now = Utc::now().to_rfc3339();
            let tx = conn.transaction()?;

            for profile in &profiles {
                tx.execute(
                    "INSERT INTO users (id, name, role, avatar, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)
                     ON CONFLICT(id) DO UPDATE SET name = ?2, role = ?3, avatar = ?4, updated_at = ?5",
                    rusqlite::params![profile.id, profile.name, profile.role, profile.avatar, now],
                )?;
            }

            // A chat id belongs to exactly one pair; drop a stale record that
            // claimed it under a different collaboration id.
            tx.execute(
                "DELETE FROM collaborations WHERE chat_id = ?1 AND id != ?2",
                rusqlite::params![collab.chat_id, collab.id],
            )?;
            tx.execute(
                "INSERT INTO collaborations (id, requester_id, recipient_id, status, chat_id, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(id) DO UPDATE SET requester_id = ?2, recipient_id = ?3,
                     status = ?4, chat_id = ?5, updated_at = ?6",
                rusqlite::params![
                    collab.id,
                    collab.requester_id,
                    collab.recipient_id,
                    collab.status.as_str(),
                    collab.chat_id,
                    now,
                ],
            )?;
            tx.commit()?;
            Ok::<(), StoreError>(())
        })
        .await??;

        Ok(stored)
    }
}
