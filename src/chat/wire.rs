// Wire protocol for the chat channel. JSON records discriminated by a
// `type` field, mirroring what the marketplace backend's websocket
// consumer speaks.

use serde::{Deserialize, Serialize};

use crate::models::{Message, MessageId, MessageKind};

/// Events the client transmits on the channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    /// `{"type":"chat_message","message":"...","message_type":"text"}`
    #[serde(rename = "chat_message")]
    ChatMessage {
        message: String,
        message_type: MessageKind,
    },
    #[serde(rename = "typing_indicator")]
    TypingIndicator { is_typing: bool },
    #[serde(rename = "mark_as_read")]
    MarkAsRead { message_id: MessageId },
}

/// Events the server delivers on the channel. Inbound chat messages carry
/// the full authoritative record; read confirmations come back as
/// `read_receipt`. Types this client does not understand (join/leave
/// notifications and future additions) fall into `Unknown` and are
/// skipped.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    #[serde(rename = "chat_message")]
    ChatMessage { message: Message },
    #[serde(rename = "typing_indicator")]
    TypingIndicator { is_typing: bool },
    #[serde(rename = "read_receipt")]
    ReadReceipt { message_id: MessageId },
    #[serde(other)]
    Unknown,
}
