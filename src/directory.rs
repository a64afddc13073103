// Conversation directory: the coarse-grained list of conversation
// summaries, kept sorted by last activity and partitioned by the
// replied/unreplied filter tabs.

use log::{debug, warn};

use crate::api::MarketplaceApi;
use crate::error::ChatError;
use crate::models::{Conversation, ConversationId, Message, Participant, Role};

/// View-level partition over the in-memory list. Switching tabs never
/// refetches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DirectoryFilter {
    #[default]
    All,
    /// Conversations the owner has already replied to.
    Primary,
    /// Incoming threads still waiting for a first reply.
    Requests,
}

#[derive(Debug, Default)]
pub struct ConversationDirectory {
    conversations: Vec<Conversation>,
    filter: DirectoryFilter,
}

impl ConversationDirectory {
    pub fn new() -> Self {
        ConversationDirectory::default()
    }

    /// Fetch the conversation list from the backend and replace the local
    /// one. Response-shape normalization happens in the API layer; an
    /// unrecognized payload arrives here as an empty list, not an error.
    pub async fn refresh(&mut self, api: &dyn MarketplaceApi) -> Result<(), ChatError> {
        let conversations = api.list_conversations().await?;
        self.replace(conversations);
        Ok(())
    }

    pub fn replace(&mut self, conversations: Vec<Conversation>) {
        self.conversations = conversations;
        self.sort();
    }

    /// A message the owner just sent on a conversation: refresh its
    /// preview, mark the thread as answered and float it to the top.
    pub fn record_local_send(&mut self, conversation_id: ConversationId, message: &Message) {
        let Some(conversation) = self
            .conversations
            .iter_mut()
            .find(|c| c.id == conversation_id)
        else {
            debug!(
                "local send on conversation {} not present in directory",
                conversation_id
            );
            return;
        };
        conversation.last_message = Some(message.clone());
        conversation.updated_at = activity_stamp(message);
        conversation.has_replied = true;
        self.sort();
    }

    /// A message received on a conversation: refresh its preview, bump
    /// the unread count and float it to the top.
    pub fn record_remote_receive(&mut self, conversation_id: ConversationId, message: &Message) {
        let Some(conversation) = self
            .conversations
            .iter_mut()
            .find(|c| c.id == conversation_id)
        else {
            debug!(
                "received message for conversation {} not present in directory",
                conversation_id
            );
            return;
        };
        conversation.last_message = Some(message.clone());
        conversation.updated_at = activity_stamp(message);
        conversation.unread_count = conversation.unread_count.saturating_add(1);
        self.sort();
    }

    /// Opening a conversation clears its unread badge.
    pub fn mark_conversation_read(&mut self, conversation_id: ConversationId) {
        if let Some(conversation) = self
            .conversations
            .iter_mut()
            .find(|c| c.id == conversation_id)
        {
            conversation.unread_count = 0;
        }
    }

    pub fn set_filter(&mut self, filter: DirectoryFilter) {
        self.filter = filter;
    }

    pub fn filter(&self) -> DirectoryFilter {
        self.filter
    }

    /// Conversations matching the active filter, in last-activity order.
    pub fn visible(&self) -> Vec<&Conversation> {
        self.conversations
            .iter()
            .filter(|c| match self.filter {
                DirectoryFilter::All => true,
                DirectoryFilter::Primary => c.has_replied,
                DirectoryFilter::Requests => !c.has_replied,
            })
            .collect()
    }

    pub fn get(&self, conversation_id: ConversationId) -> Option<&Conversation> {
        self.conversations.iter().find(|c| c.id == conversation_id)
    }

    pub fn len(&self) -> usize {
        self.conversations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conversations.is_empty()
    }

    /// Count shown on the "Requests" tab badge.
    pub fn request_count(&self) -> usize {
        self.conversations.iter().filter(|c| !c.has_replied).count()
    }

    pub fn unread_total(&self) -> u32 {
        self.conversations.iter().map(|c| c.unread_count).sum()
    }

    fn sort(&mut self) {
        self.conversations.sort_by_key(|c| {
            std::cmp::Reverse(
                c.activity_timestamp()
                    .map(|t| t.timestamp_millis())
                    .unwrap_or(i64::MIN),
            )
        });
    }
}

/// Directory timestamp for a freshly sent or received message. Falls back
/// to "now" when the record carries no usable timestamp, so the
/// conversation still floats to the top.
fn activity_stamp(message: &Message) -> String {
    if message.timestamp().is_some() {
        message.created_at.clone()
    } else {
        warn!(
            "message {} has no usable timestamp, stamping directory with current time",
            message.id
        );
        chrono::Utc::now().to_rfc3339()
    }
}

/// Resolve "the other participant" of a conversation for a given viewer
/// role. Fallback order: the backend's denormalized `other_user` field,
/// then the role-opposite participant, then whichever participant is
/// present at all.
pub fn resolve_counterpart(conversation: &Conversation, viewer_role: Role) -> Option<&Participant> {
    if let Some(other) = &conversation.other_user {
        return Some(other);
    }
    match viewer_role {
        Role::Provider => conversation
            .client
            .as_ref()
            .or(conversation.provider.as_ref()),
        Role::Client => conversation
            .provider
            .as_ref()
            .or(conversation.client.as_ref()),
    }
}
