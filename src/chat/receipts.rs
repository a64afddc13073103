// Read receipts: deciding which visible messages to confirm, and applying
// the counterpart's confirmations to the message store.

use std::collections::HashSet;

use log::debug;

use super::{ChatClient, ClientEvent};
use crate::error::ChatError;
use crate::models::{Message, MessageId, UserId};
use crate::store::MessageStore;

/// Decides, from what the viewer can currently see, which inbound
/// messages get a `mark_as_read`, and absorbs incoming receipts,
/// including receipts that race ahead of their message.
#[derive(Debug)]
pub struct ReadReceiptCoordinator {
    viewer_id: UserId,
    emitted: HashSet<MessageId>,
    /// Receipts that arrived before their message did. Applied as soon as
    /// the message lands in the store.
    parked: HashSet<MessageId>,
}

impl ReadReceiptCoordinator {
    pub fn new(viewer_id: UserId) -> Self {
        ReadReceiptCoordinator {
            viewer_id,
            emitted: HashSet::new(),
            parked: HashSet::new(),
        }
    }

    /// A message became visible to the viewer. Returns whether a
    /// `mark_as_read` should go out: only for messages authored by the
    /// counterpart that are not yet read, and at most once per message.
    pub fn observe_visible(&mut self, message: &Message) -> bool {
        if message.sender.id == self.viewer_id {
            return false;
        }
        if message.is_read {
            return false;
        }
        self.emitted.insert(message.id)
    }

    /// An inbound receipt. Unknown ids are parked instead of dropped so a
    /// receipt racing ahead of its message still lands.
    pub fn apply_receipt(&mut self, store: &mut MessageStore, message_id: MessageId) {
        if !store.mark_read(message_id) {
            debug!(
                "receipt for message {} not yet in store, parking it",
                message_id
            );
            self.parked.insert(message_id);
        }
    }

    /// A message was appended to the store; settle any receipt that was
    /// waiting for it.
    pub fn settle_parked(&mut self, store: &mut MessageStore, message_id: MessageId) {
        if self.parked.remove(&message_id) {
            store.mark_read(message_id);
        }
    }
}

impl ChatClient {
    /// Transmit a read confirmation for a message the viewer has seen.
    pub async fn send_mark_as_read(&self, message_id: MessageId) -> Result<(), ChatError> {
        self.send_event(&ClientEvent::MarkAsRead { message_id }).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Sender, SendStatus};

    fn message(id: MessageId, sender_id: UserId, is_read: bool) -> Message {
        Message {
            id,
            sender: Sender {
                id: sender_id,
                full_name: "Someone".to_string(),
            },
            content: Some("hello".to_string()),
            message_type: Default::default(),
            is_read,
            created_at: "2025-06-01T10:00:00Z".to_string(),
            image_attachment: None,
            file_attachment: None,
            status: SendStatus::Confirmed,
        }
    }

    #[test]
    fn own_messages_never_trigger_receipts() {
        let mut coordinator = ReadReceiptCoordinator::new(7);
        assert!(!coordinator.observe_visible(&message(1, 7, false)));
    }

    #[test]
    fn already_read_messages_stay_quiet() {
        let mut coordinator = ReadReceiptCoordinator::new(7);
        assert!(!coordinator.observe_visible(&message(2, 42, true)));
    }

    #[test]
    fn visibility_emits_once_per_message() {
        let mut coordinator = ReadReceiptCoordinator::new(7);
        let msg = message(3, 42, false);
        assert!(coordinator.observe_visible(&msg));
        assert!(!coordinator.observe_visible(&msg));
    }

    #[test]
    fn receipt_for_unknown_message_is_parked_then_settled() {
        let mut coordinator = ReadReceiptCoordinator::new(7);
        let mut store = MessageStore::new();

        coordinator.apply_receipt(&mut store, 101);
        assert!(store.is_empty());

        store.append(message(101, 7, false));
        coordinator.settle_parked(&mut store, 101);
        assert!(store.get(101).unwrap().is_read);
    }

    #[test]
    fn duplicate_receipt_is_a_no_op() {
        let mut coordinator = ReadReceiptCoordinator::new(7);
        let mut store = MessageStore::new();
        store.append(message(101, 7, false));

        coordinator.apply_receipt(&mut store, 101);
        let revision = store.revision();
        coordinator.apply_receipt(&mut store, 101);
        assert_eq!(store.revision(), revision);
        assert!(store.get(101).unwrap().is_read);
    }
}
