// Ordered, deduplicated message log for the active conversation.
//
// Arrival order and storage order are deliberately decoupled: the wire
// delivers events in arrival order, but the log is kept sorted by the
// authoritative creation timestamp so network jitter never reorders the
// rendered history.

use std::sync::Arc;

use chrono::{Local, NaiveDate};
use log::{debug, warn};
use tokio::sync::Mutex;

use crate::models::{Message, MessageId, SendStatus};

/// Handle shared between a conversation view and its feed task.
pub type SharedStore = Arc<Mutex<MessageStore>>;

/// One calendar day of messages, used to render a date separator.
/// Derived on demand and never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct DateGroup {
    pub date: NaiveDate,
    pub messages: Vec<Message>,
}

#[derive(Debug, Default)]
pub struct MessageStore {
    messages: Vec<Message>,
    revision: u64,
}

impl MessageStore {
    pub fn new() -> Self {
        MessageStore::default()
    }

    /// Replace the log from a full history fetch. Live events appended
    /// afterwards stay safe against replays of the same records because
    /// `append` dedupes by id.
    pub fn seed(&mut self, messages: Vec<Message>) {
        self.messages.clear();
        for message in messages {
            self.append(message);
        }
    }

    /// Insert a message preserving ascending timestamp order. A message
    /// with an id already present replaces the stored record instead of
    /// duplicating it.
    pub fn append(&mut self, message: Message) {
        self.revision += 1;
        if let Some(idx) = self.messages.iter().position(|m| m.id == message.id) {
            debug!("replacing message {} already in store", message.id);
            self.messages.remove(idx);
        }
        self.insert_sorted(message);
    }

    fn insert_sorted(&mut self, message: Message) {
        let Some(ts) = message.timestamp() else {
            warn!(
                "message {} has unparsable created_at {:?}, keeping at tail",
                message.id, message.created_at
            );
            self.messages.push(message);
            return;
        };
        // Equal timestamps keep arrival order; records with unparsable
        // timestamps stay behind every parsable one.
        let pos = self.messages.partition_point(|m| match m.timestamp() {
            Some(existing) => existing <= ts,
            None => false,
        });
        self.messages.insert(pos, message);
    }

    /// Swap a provisional optimistic record for the authoritative echo.
    /// The echo goes through the normal dedupe/ordering path.
    pub fn confirm(&mut self, provisional_id: MessageId, message: Message) {
        if let Some(idx) = self.messages.iter().position(|m| m.id == provisional_id) {
            self.messages.remove(idx);
        }
        self.append(message);
    }

    /// Mark a locally created record as failed after its echo timed out.
    pub fn mark_failed(&mut self, provisional_id: MessageId) {
        if let Some(message) = self.messages.iter_mut().find(|m| m.id == provisional_id) {
            message.status = SendStatus::Failed;
            self.revision += 1;
        }
    }

    /// Set the read flag. Returns whether the id was known; already-read
    /// and unknown ids are no-ops, never errors. The flag only ever moves
    /// false to true.
    pub fn mark_read(&mut self, message_id: MessageId) -> bool {
        match self.messages.iter_mut().find(|m| m.id == message_id) {
            Some(message) => {
                if !message.is_read {
                    message.is_read = true;
                    self.revision += 1;
                }
                true
            }
            None => false,
        }
    }

    /// Partition the log by local calendar date, oldest date first,
    /// ascending inside each group. A message whose timestamp cannot be
    /// parsed is skipped on its own; the rest of the log still groups.
    pub fn group_by_date(&self) -> Vec<DateGroup> {
        let mut groups: Vec<DateGroup> = Vec::new();
        for message in &self.messages {
            let Some(ts) = message.timestamp() else {
                warn!(
                    "excluding message {} from date grouping: unparsable created_at {:?}",
                    message.id, message.created_at
                );
                continue;
            };
            let date = ts.with_timezone(&Local).date_naive();
            match groups.last_mut() {
                Some(group) if group.date == date => group.messages.push(message.clone()),
                _ => groups.push(DateGroup {
                    date,
                    messages: vec![message.clone()],
                }),
            }
        }
        groups
    }

    pub fn get(&self, message_id: MessageId) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == message_id)
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Monotonic change counter, bumped by every mutation. Lets a render
    /// loop detect changes without diffing the log.
    pub fn revision(&self) -> u64 {
        self.revision
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Sender;

    fn message(id: MessageId, created_at: &str) -> Message {
        Message {
            id,
            sender: Sender {
                id: 1,
                full_name: "Test User".to_string(),
            },
            content: Some(format!("message {}", id)),
            message_type: Default::default(),
            is_read: false,
            created_at: created_at.to_string(),
            image_attachment: None,
            file_attachment: None,
            status: SendStatus::Confirmed,
        }
    }

    #[test]
    fn append_orders_by_timestamp_not_arrival() {
        let mut store = MessageStore::new();
        store.append(message(3, "2025-06-01T12:00:00Z"));
        store.append(message(1, "2025-06-01T10:00:00Z"));
        store.append(message(2, "2025-06-01T11:00:00Z"));

        let ids: Vec<_> = store.messages().iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn equal_timestamps_keep_arrival_order() {
        let mut store = MessageStore::new();
        store.append(message(10, "2025-06-01T10:00:00Z"));
        store.append(message(11, "2025-06-01T10:00:00Z"));

        let ids: Vec<_> = store.messages().iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![10, 11]);
    }

    #[test]
    fn same_id_replaces_without_growing() {
        let mut store = MessageStore::new();
        store.append(message(5, "2025-06-01T10:00:00Z"));
        let mut updated = message(5, "2025-06-01T10:00:00Z");
        updated.content = Some("edited by the server".to_string());
        store.append(updated);

        assert_eq!(store.len(), 1);
        assert_eq!(
            store.get(5).unwrap().content.as_deref(),
            Some("edited by the server")
        );
    }

    #[test]
    fn mark_read_is_idempotent() {
        let mut store = MessageStore::new();
        store.append(message(7, "2025-06-01T10:00:00Z"));

        assert!(store.mark_read(7));
        let after_first = store.revision();
        assert!(store.mark_read(7));
        assert_eq!(store.revision(), after_first);
        assert!(store.get(7).unwrap().is_read);
        assert!(!store.mark_read(999));
    }

    #[test]
    fn malformed_timestamp_sits_at_tail_and_skips_grouping() {
        let mut store = MessageStore::new();
        store.append(message(1, "not-a-timestamp"));
        store.append(message(2, "2025-06-01T10:00:00Z"));
        store.append(message(3, "2025-06-03T10:00:00Z"));

        assert_eq!(store.len(), 3);
        let groups = store.group_by_date();
        let grouped: usize = groups.iter().map(|g| g.messages.len()).sum();
        assert_eq!(grouped, 2);
        assert!(groups.iter().all(|g| g.messages.iter().all(|m| m.id != 1)));
    }

    #[test]
    fn grouping_concatenation_is_sorted() {
        let mut store = MessageStore::new();
        store.append(message(4, "2025-06-03T09:00:00Z"));
        store.append(message(2, "2025-06-01T18:00:00Z"));
        store.append(message(1, "2025-06-01T08:00:00Z"));
        store.append(message(3, "2025-06-02T09:00:00Z"));

        let groups = store.group_by_date();
        let ids: Vec<_> = groups
            .iter()
            .flat_map(|g| g.messages.iter().map(|m| m.id))
            .collect();
        assert_eq!(ids, vec![1, 2, 3, 4]);
        for pair in groups.windows(2) {
            assert!(pair[0].date < pair[1].date);
        }
    }

    #[test]
    fn confirm_swaps_provisional_for_echo() {
        let mut store = MessageStore::new();
        let mut provisional = message(u64::MAX - 1, "2025-06-01T10:00:00Z");
        provisional.status = SendStatus::Pending;
        store.append(provisional);

        store.confirm(u64::MAX - 1, message(101, "2025-06-01T10:00:01Z"));
        assert_eq!(store.len(), 1);
        assert_eq!(store.messages()[0].id, 101);
        assert_eq!(store.messages()[0].status, SendStatus::Confirmed);
    }

    #[test]
    fn mark_failed_flags_pending_record() {
        let mut store = MessageStore::new();
        let mut provisional = message(u64::MAX - 1, "2025-06-01T10:00:00Z");
        provisional.status = SendStatus::Pending;
        store.append(provisional);

        store.mark_failed(u64::MAX - 1);
        assert_eq!(store.messages()[0].status, SendStatus::Failed);
    }
}
