// Core data model shared by the chat channel, the message store and the
// conversation directory. Wire shapes follow the marketplace backend's
// JSON serializers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type UserId = u64;
pub type MessageId = u64;
pub type ConversationId = u64;

/// Marketplace role of a participant. A conversation is keyed by the
/// unordered pair of user ids; the role only matters when resolving
/// which side of a conversation record is "the other participant".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Client,
    Provider,
}

/// A user as it appears inside conversation records and message senders.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Participant {
    pub id: UserId,
    #[serde(default)]
    pub full_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
}

impl Participant {
    pub fn new(id: UserId, full_name: &str) -> Self {
        Participant {
            id,
            full_name: full_name.to_string(),
            username: None,
            role: None,
        }
    }

    /// Display name with the backend's fallback order: full name, then
    /// username, then a generic placeholder.
    pub fn display_name(&self) -> &str {
        if !self.full_name.is_empty() {
            return &self.full_name;
        }
        match &self.username {
            Some(name) if !name.is_empty() => name,
            _ => "User",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    #[default]
    Text,
    Image,
    File,
    System,
}

/// Local delivery state of a message. Wire records are always
/// authoritative, so anything deserialized starts out `Confirmed`;
/// `Pending` and `Failed` only ever apply to locally created optimistic
/// records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SendStatus {
    Pending,
    #[default]
    Confirmed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sender {
    pub id: UserId,
    #[serde(default)]
    pub full_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub sender: Sender,
    /// Optional when an attachment carries the payload.
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub message_type: MessageKind,
    #[serde(default)]
    pub is_read: bool,
    /// RFC 3339 timestamp assigned by the authoritative store. Kept in
    /// wire form; parsing happens where ordering or grouping needs it so
    /// a malformed value degrades one record, not the batch.
    #[serde(default)]
    pub created_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_attachment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_attachment: Option<String>,
    #[serde(skip)]
    pub status: SendStatus,
}

impl Message {
    /// Parsed creation timestamp, `None` when the wire value is missing
    /// or malformed.
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(&self.created_at)
            .ok()
            .map(|t| t.with_timezone(&Utc))
    }

    pub fn is_own(&self, viewer: UserId) -> bool {
        self.sender.id == viewer
    }

    /// Text shown in previews: the content, or a short tag for
    /// attachment-only messages.
    pub fn preview(&self) -> &str {
        match &self.content {
            Some(text) if !text.is_empty() => text,
            _ if self.image_attachment.is_some() => "[image]",
            _ if self.file_attachment.is_some() => "[file]",
            _ => "",
        }
    }
}

/// Denormalized directory entry for one conversation. The backend may
/// include a resolved `other_user`; when it is absent the viewer role
/// decides which participant field is the counterpart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client: Option<Participant>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<Participant>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub other_user: Option<Participant>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message: Option<Message>,
    #[serde(default)]
    pub updated_at: String,
    #[serde(default)]
    pub unread_count: u32,
    #[serde(default)]
    pub has_replied: bool,
}

impl Conversation {
    /// Parsed last-activity timestamp; `None` for malformed values, which
    /// sort to the bottom of the directory.
    pub fn activity_timestamp(&self) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(&self.updated_at)
            .ok()
            .map(|t| t.with_timezone(&Utc))
    }
}
