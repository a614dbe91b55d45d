/// Database row types.
/// These correspond 1:1 to the SQLite schema defined in migrations.rs.

/// Profile mirror row in the users table
#[derive(Debug, Clone)]
pub struct UserRow {
    pub id: String,
    pub name: String,
    pub role: String,
    pub avatar: Option<String>,
    pub updated_at: String,
}

/// Collaboration mirror row
#[derive(Debug, Clone)]
pub struct CollaborationRow {
    pub id: String,
    pub requester_id: String,
    pub recipient_id: String,
    pub status: String,
    pub chat_id: String,
    pub updated_at: String,
}

/// Stored chat message row
#[derive(Debug, Clone)]
pub struct MessageRow {
    pub seq: i64,
    pub id: String,
    pub chat_id: String,
    pub sender_id: String,
    pub sender_name: String,
    pub text: String,
    pub timestamp_ms: i64,
    pub client_timestamp: Option<String>,
    pub created_at: String,
}

impl UserRow {
    pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            name: row.get("name")?,
            role: row.get("role")?,
            avatar: row.get("avatar")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

impl CollaborationRow {
    pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            requester_id: row.get("requester_id")?,
            recipient_id: row.get("recipient_id")?,
            status: row.get("status")?,
            chat_id: row.get("chat_id")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

impl MessageRow {
    pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            seq: row.get("seq")?,
            id: row.get("id")?,
            chat_id: row.get("chat_id")?,
            sender_id: row.get("sender_id")?,
            sender_name: row.get("sender_name")?,
            text: row.get("text")?,
            timestamp_ms: row.get("timestamp_ms")?,
            client_timestamp: row.get("client_timestamp")?,
            created_at: row.get("created_at")?,
        })
    }
}
