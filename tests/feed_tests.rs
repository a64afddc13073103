// Feed strategies: the poll feed's merge/failure/cancellation behavior
// and the push feed's application of channel events.

mod common;
use common::{setup_logging, text_message};

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tokio::time::Instant;

use parley::api::MarketplaceApi;
use parley::chat::{feed, ChatEvent, PollFeed, PushFeed, ReadReceiptCoordinator, ViewEpoch};
use parley::directory::ConversationDirectory;
use parley::error::ChatError;
use parley::models::{Conversation, ConversationId, Message, Participant, SendStatus};
use parley::store::{MessageStore, SharedStore};

/// Marketplace API double whose history responses are scripted per call.
struct ScriptedApi {
    history: Mutex<VecDeque<Result<Vec<Message>, ChatError>>>,
}

impl ScriptedApi {
    fn new(history: Vec<Result<Vec<Message>, ChatError>>) -> Arc<Self> {
        Arc::new(ScriptedApi {
            history: Mutex::new(history.into()),
        })
    }
}

#[async_trait]
impl MarketplaceApi for ScriptedApi {
    async fn list_conversations(&self) -> Result<Vec<Conversation>, ChatError> {
        Ok(Vec::new())
    }

    async fn list_messages(
        &self,
        _conversation_id: ConversationId,
    ) -> Result<Vec<Message>, ChatError> {
        match self.history.lock().await.pop_front() {
            Some(response) => response,
            None => Ok(Vec::new()),
        }
    }

    async fn send_message(
        &self,
        _conversation_id: ConversationId,
        _content: &str,
    ) -> Result<Message, ChatError> {
        Err(ChatError::ApiFailure("not scripted".to_string()))
    }

    async fn current_user(&self) -> Result<Participant, ChatError> {
        Err(ChatError::ApiFailure("not scripted".to_string()))
    }
}

async fn wait_until(
    store: &SharedStore,
    predicate: impl Fn(&MessageStore) -> bool,
    timeout: Duration,
) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if predicate(&*store.lock().await) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

fn shared_store() -> SharedStore {
    Arc::new(Mutex::new(MessageStore::new()))
}

#[tokio::test]
async fn poll_feed_merges_successive_fetches_without_duplicates() {
    setup_logging();
    let m1 = text_message(1, 42, "Counterpart", "first", "2025-06-01T10:00:00Z");
    let m2 = text_message(2, 42, "Counterpart", "second", "2025-06-01T10:05:00Z");
    let api = ScriptedApi::new(vec![
        Ok(vec![m1.clone()]),
        Ok(vec![m1.clone(), m2.clone()]),
    ]);

    let store = shared_store();
    let epoch = ViewEpoch::new();
    let poll = PollFeed::new(
        api,
        1,
        store.clone(),
        Duration::from_millis(50),
        epoch.clone(),
    );
    let handle = feed::spawn(Box::new(poll));

    assert!(wait_until(&store, |s| s.len() == 2, Duration::from_secs(2)).await);
    let ids: Vec<_> = store.lock().await.messages().iter().map(|m| m.id).collect();
    assert_eq!(ids, vec![1, 2]);

    epoch.bump();
    handle.abort();
}

#[tokio::test]
async fn poll_feed_keeps_displayed_history_when_a_fetch_fails() {
    setup_logging();
    let m1 = text_message(1, 42, "Counterpart", "first", "2025-06-01T10:00:00Z");
    let m2 = text_message(2, 42, "Counterpart", "second", "2025-06-01T10:05:00Z");
    let api = ScriptedApi::new(vec![
        Ok(vec![m1.clone()]),
        Err(ChatError::HistoryFetchFailure("backend hiccup".to_string())),
        Ok(vec![m1.clone(), m2.clone()]),
    ]);

    let store = shared_store();
    let epoch = ViewEpoch::new();
    let poll = PollFeed::new(
        api,
        1,
        store.clone(),
        Duration::from_millis(50),
        epoch.clone(),
    );
    let handle = feed::spawn(Box::new(poll));

    // First fetch lands.
    assert!(wait_until(&store, |s| s.len() == 1, Duration::from_secs(2)).await);
    // The failing tick does not clear it, and the next tick recovers.
    assert!(wait_until(&store, |s| s.len() == 2, Duration::from_secs(2)).await);

    epoch.bump();
    handle.abort();
}

#[tokio::test]
async fn poll_feed_stops_mutating_after_epoch_bump() {
    setup_logging();
    let m1 = text_message(1, 42, "Counterpart", "first", "2025-06-01T10:00:00Z");
    let m2 = text_message(2, 42, "Counterpart", "late arrival", "2025-06-01T10:05:00Z");
    let api = ScriptedApi::new(vec![Ok(vec![m1.clone()]), Ok(vec![m2.clone()])]);

    let store = shared_store();
    let epoch = ViewEpoch::new();
    let poll = PollFeed::new(
        api,
        1,
        store.clone(),
        Duration::from_millis(100),
        epoch.clone(),
    );
    let handle = feed::spawn(Box::new(poll));

    assert!(wait_until(&store, |s| s.len() == 1, Duration::from_secs(2)).await);

    // The view closes: everything still in flight must be discarded.
    epoch.bump();
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(store.lock().await.len(), 1);

    handle.abort();
}

fn push_fixture() -> (
    mpsc::Sender<ChatEvent>,
    SharedStore,
    Arc<Mutex<ReadReceiptCoordinator>>,
    Arc<Mutex<ConversationDirectory>>,
    tokio::task::JoinHandle<()>,
) {
    let (tx, rx) = mpsc::channel(16);
    let store = shared_store();
    let coordinator = Arc::new(Mutex::new(ReadReceiptCoordinator::new(7)));
    let mut directory = ConversationDirectory::new();
    directory.replace(vec![Conversation {
        id: 1,
        client: Some(Participant::new(7, "Amina Wanjiru")),
        provider: Some(Participant::new(42, "Chef Otieno")),
        other_user: None,
        last_message: None,
        updated_at: "2025-06-01T10:00:00Z".to_string(),
        unread_count: 0,
        has_replied: false,
    }]);
    let directory = Arc::new(Mutex::new(directory));

    let epoch = ViewEpoch::new();
    let push = PushFeed::new(rx, 7, 1, store.clone(), coordinator.clone(), epoch)
        .with_directory(directory.clone());
    let handle = feed::spawn(Box::new(push));

    (tx, store, coordinator, directory, handle)
}

#[tokio::test]
async fn push_feed_confirms_optimistic_send_and_updates_directory() {
    setup_logging();
    let (tx, store, _coordinator, directory, handle) = push_fixture();

    let provisional_id = (1u64 << 62) + 1;
    let mut optimistic = text_message(provisional_id, 7, "Amina Wanjiru", "hi", "2025-06-05T10:00:00Z");
    optimistic.status = SendStatus::Pending;
    tx.send(ChatEvent::Message(optimistic)).await.unwrap();

    let echo = text_message(101, 7, "Amina Wanjiru", "hi", "2025-06-05T10:00:01Z");
    tx.send(ChatEvent::MessageConfirmed {
        provisional_id,
        message: echo,
    })
    .await
    .unwrap();

    assert!(
        wait_until(
            &store,
            |s| s.len() == 1 && s.get(101).is_some(),
            Duration::from_secs(2)
        )
        .await
    );

    let directory = directory.lock().await;
    let front = directory.visible()[0];
    assert_eq!(front.id, 1);
    assert!(front.has_replied);
    assert_eq!(
        front.last_message.as_ref().unwrap().content.as_deref(),
        Some("hi")
    );

    handle.abort();
}

#[tokio::test]
async fn push_feed_parks_receipt_arriving_before_its_message() {
    setup_logging();
    let (tx, store, _coordinator, _directory, handle) = push_fixture();

    tx.send(ChatEvent::ReadReceipt { message_id: 101 })
        .await
        .unwrap();
    tx.send(ChatEvent::Message(text_message(
        101,
        7,
        "Amina Wanjiru",
        "hi",
        "2025-06-05T10:00:00Z",
    )))
    .await
    .unwrap();

    assert!(
        wait_until(
            &store,
            |s| s.get(101).map(|m| m.is_read).unwrap_or(false),
            Duration::from_secs(2)
        )
        .await
    );

    handle.abort();
}

#[tokio::test]
async fn push_feed_marks_timed_out_send_failed() {
    setup_logging();
    let (tx, store, _coordinator, _directory, handle) = push_fixture();

    let provisional_id = (1u64 << 62) + 1;
    let mut optimistic = text_message(provisional_id, 7, "Amina Wanjiru", "hi", "2025-06-05T10:00:00Z");
    optimistic.status = SendStatus::Pending;
    tx.send(ChatEvent::Message(optimistic)).await.unwrap();
    tx.send(ChatEvent::SendFailed { provisional_id })
        .await
        .unwrap();

    assert!(
        wait_until(
            &store,
            |s| {
                s.get(provisional_id)
                    .map(|m| m.status == SendStatus::Failed)
                    .unwrap_or(false)
            },
            Duration::from_secs(2)
        )
        .await
    );

    handle.abort();
}

#[tokio::test]
async fn push_feed_counts_remote_receives_as_unread() {
    setup_logging();
    let (tx, store, _coordinator, directory, handle) = push_fixture();

    tx.send(ChatEvent::Message(text_message(
        200,
        42,
        "Chef Otieno",
        "Karibu!",
        "2025-06-05T10:00:00Z",
    )))
    .await
    .unwrap();

    assert!(wait_until(&store, |s| s.len() == 1, Duration::from_secs(2)).await);

    let directory = directory.lock().await;
    assert_eq!(directory.unread_total(), 1);
    assert_eq!(
        directory.visible()[0]
            .last_message
            .as_ref()
            .unwrap()
            .content
            .as_deref(),
        Some("Karibu!")
    );

    handle.abort();
}
