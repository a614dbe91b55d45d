//! Room Membership Index: which two users may talk in which chat room.
//!
//! Rooms are derived 1:1 from accepted collaborations owned by the
//! collaboration collaborator. This module mirrors those records, answers
//! membership questions, and invalidates its caches on change notifications.

pub mod directory;
pub mod index;
pub mod routes;

use serde::{Deserialize, Serialize};

pub use directory::{CollaborationSource, SqliteDirectory};
pub use index::RoomIndex;

/// Status of a collaboration request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CollaborationStatus {
    Pending,
    Accepted,
    Rejected,
}

impl CollaborationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
        }
    }

    /// Case-insensitive parse; the request workflow emits both `Accepted`
    /// and `accepted`.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "accepted" => Some(Self::Accepted),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }
}

impl<'de> Deserialize<'de> for CollaborationStatus {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).ok_or_else(|| {
            serde::de::Error::unknown_variant(&raw, &["pending", "accepted", "rejected"])
        })
    }
}

/// Collaboration record as seen by the chat service (read-only mirror).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Collaboration {
    pub id: String,
    pub requester_id: String,
    pub recipient_id: String,
    pub status: CollaborationStatus,
    pub chat_id: String,
}

impl Collaboration {
    pub fn involves(&self, user_id: &str) -> bool {
        self.requester_id == user_id || self.recipient_id == user_id
    }

    pub fn room(&self) -> Option<ChatRoom> {
        (self.status == CollaborationStatus::Accepted).then(|| ChatRoom {
            chat_id: self.chat_id.clone(),
            collaboration_id: self.id.clone(),
            requester_id: self.requester_id.clone(),
            recipient_id: self.recipient_id.clone(),
        })
    }
}

/// A two-party conversation unlocked by an accepted collaboration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRoom {
    pub chat_id: String,
    pub collaboration_id: String,
    pub requester_id: String,
    pub recipient_id: String,
}

impl ChatRoom {
    pub fn has_participant(&self, user_id: &str) -> bool {
        self.requester_id == user_id || self.recipient_id == user_id
    }

    pub fn participants(&self) -> [&str; 2] {
        [&self.requester_id, &self.recipient_id]
    }

    /// The participant that is not `user_id`.
    pub fn other_participant(&self, user_id: &str) -> &str {
        if self.requester_id == user_id {
            &self.recipient_id
        } else {
            &self.requester_id
        }
    }
}

/// Profile fields the chat list needs for the other side of a room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: String,
    pub name: String,
    pub role: String,
    #[serde(default)]
    pub avatar: Option<String>,
}

impl UserProfile {
    pub fn unknown(id: &str) -> Self {
        Self {
            id: id.to_string(),
            name: "Unknown".to_string(),
            role: String::new(),
            avatar: None,
        }
    }
}

/// Entry returned by `listRooms`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSummary {
    pub chat_id: String,
    pub collaboration_id: String,
    pub other_participant: UserProfile,
}

/// Change notification emitted by the collaboration collaborator.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollaborationChange {
    pub collaboration: CollaborationRecord,
    #[serde(default)]
    pub requester: Option<UserProfile>,
    #[serde(default)]
    pub recipient: Option<UserProfile>,
}

/// Collaboration as sent by the collaborator; `chatId` may be omitted.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollaborationRecord {
    pub id: String,
    pub requester_id: String,
    pub recipient_id: String,
    pub status: CollaborationStatus,
    #[serde(default)]
    pub chat_id: Option<String>,
}

impl CollaborationRecord {
    pub fn into_collaboration(self) -> Collaboration {
        let chat_id = self
            .chat_id
            .filter(|c| !c.trim().is_empty())
            .unwrap_or_else(|| derive_chat_id(&self.requester_id, &self.recipient_id));
        Collaboration {
            id: self.id,
            requester_id: self.requester_id,
            recipient_id: self.recipient_id,
            status: self.status,
            chat_id,
        }
    }
}

/// Pair-stable chat id: both ids sorted and joined with `-`.
pub fn derive_chat_id(a: &str, b: &str) -> String {
    if a <= b {
        format!("{}-{}", a, b)
    } else {
        format!("{}-{}", b, a)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_id_is_order_independent() {
        assert_eq!(derive_chat_id("A", "B"), "A-B");
        assert_eq!(derive_chat_id("B", "A"), "A-B");
    }

    #[test]
    fn status_parse_ignores_case() {
        assert_eq!(
            CollaborationStatus::parse("Accepted"),
            Some(CollaborationStatus::Accepted)
        );
        assert_eq!(
            CollaborationStatus::parse(" pending "),
            Some(CollaborationStatus::Pending)
        );
        assert_eq!(CollaborationStatus::parse("maybe"), None);
    }

    #[test]
    fn only_accepted_collaborations_open_a_room() {
        let mut collab = Collaboration {
            id: "c1".into(),
            requester_id: "A".into(),
            recipient_id: "B".into(),
            status: CollaborationStatus::Pending,
            chat_id: "A-B".into(),
        };
        assert!(collab.room().is_none());
        collab.status = CollaborationStatus::Accepted;
        let room = collab.room().unwrap();
        assert_eq!(room.other_participant("A"), "B");
        assert_eq!(room.other_participant("B"), "A");
        assert!(!room.has_participant("C"));
    }

    #[test]
    fn record_without_chat_id_derives_one() {
        let change: CollaborationChange = serde_json::from_value(serde_json::json!({
            "collaboration": {
                "id": "c9",
                "requesterId": "B",
                "recipientId": "A",
                "status": "Accepted"
            }
        }))
        .unwrap();
        let collab = change.collaboration.into_collaboration();
        assert_eq!(collab.chat_id, "A-B");
        assert_eq!(collab.status, CollaborationStatus::Accepted);
    }
}
