// Keeping the message log fresh. The same capability has two
// interchangeable strategies: a push feed driven by the chat channel and
// a poll feed re-fetching history on a fixed interval. Both write into
// the shared store and both retire themselves when the view epoch moves.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, warn};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::{ChatEvent, ReadReceiptCoordinator, ViewEpoch};
use crate::api::MarketplaceApi;
use crate::directory::ConversationDirectory;
use crate::models::{ConversationId, UserId};
use crate::store::SharedStore;

/// A strategy that keeps one conversation's message log fresh until its
/// view closes.
#[async_trait]
pub trait MessageFeed: Send {
    async fn run(self: Box<Self>);
}

/// Drive a feed to completion on its own task.
pub fn spawn(feed: Box<dyn MessageFeed>) -> JoinHandle<()> {
    tokio::spawn(async move { feed.run().await })
}

/// Channel-driven strategy: applies every chat event to the store, the
/// read-receipt coordinator, and (opportunistically) the conversation
/// directory.
pub struct PushFeed {
    events: mpsc::Receiver<ChatEvent>,
    viewer_id: UserId,
    conversation_id: ConversationId,
    store: SharedStore,
    coordinator: Arc<Mutex<ReadReceiptCoordinator>>,
    directory: Option<Arc<Mutex<ConversationDirectory>>>,
    epoch: ViewEpoch,
    snapshot: u64,
}

impl PushFeed {
    pub fn new(
        events: mpsc::Receiver<ChatEvent>,
        viewer_id: UserId,
        conversation_id: ConversationId,
        store: SharedStore,
        coordinator: Arc<Mutex<ReadReceiptCoordinator>>,
        epoch: ViewEpoch,
    ) -> Self {
        let snapshot = epoch.current();
        PushFeed {
            events,
            viewer_id,
            conversation_id,
            store,
            coordinator,
            directory: None,
            epoch,
            snapshot,
        }
    }

    /// Also keep a conversation directory's summary entry current while
    /// this feed runs.
    pub fn with_directory(mut self, directory: Arc<Mutex<ConversationDirectory>>) -> Self {
        self.directory = Some(directory);
        self
    }

    async fn update_directory(&self, message: &crate::models::Message, own: bool) {
        if let Some(directory) = &self.directory {
            let mut directory = directory.lock().await;
            if own {
                directory.record_local_send(self.conversation_id, message);
            } else {
                directory.record_remote_receive(self.conversation_id, message);
            }
        }
    }
}

#[async_trait]
impl MessageFeed for PushFeed {
    async fn run(mut self: Box<Self>) {
        while let Some(event) = self.events.recv().await {
            if !self.epoch.is_current(self.snapshot) {
                debug!("push feed epoch retired, stopping");
                break;
            }
            match event {
                ChatEvent::Message(message) => {
                    let own = message.is_own(self.viewer_id);
                    {
                        let mut store = self.store.lock().await;
                        store.append(message.clone());
                        let mut coordinator = self.coordinator.lock().await;
                        coordinator.settle_parked(&mut store, message.id);
                    }
                    self.update_directory(&message, own).await;
                }
                ChatEvent::MessageConfirmed {
                    provisional_id,
                    message,
                } => {
                    {
                        let mut store = self.store.lock().await;
                        store.confirm(provisional_id, message.clone());
                        let mut coordinator = self.coordinator.lock().await;
                        coordinator.settle_parked(&mut store, message.id);
                    }
                    self.update_directory(&message, true).await;
                }
                ChatEvent::SendFailed { provisional_id } => {
                    self.store.lock().await.mark_failed(provisional_id);
                }
                ChatEvent::ReadReceipt { message_id } => {
                    let mut store = self.store.lock().await;
                    let mut coordinator = self.coordinator.lock().await;
                    coordinator.apply_receipt(&mut store, message_id);
                }
                // The client already exposes the typing flag; nothing to
                // store.
                ChatEvent::Typing { .. } => {}
                ChatEvent::ConnectionLost => {
                    debug!("push feed observed connection loss");
                }
            }
        }
        debug!("push feed finished");
    }
}

/// Interval strategy: the surface that re-fetches the full history every
/// few seconds instead of holding a channel open. Fetch failures keep the
/// already-displayed history and retry on the next tick; responses that
/// land after the view closed are discarded.
pub struct PollFeed {
    api: Arc<dyn MarketplaceApi>,
    conversation_id: ConversationId,
    store: SharedStore,
    interval: Duration,
    epoch: ViewEpoch,
    snapshot: u64,
}

impl PollFeed {
    pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(5);

    pub fn new(
        api: Arc<dyn MarketplaceApi>,
        conversation_id: ConversationId,
        store: SharedStore,
        interval: Duration,
        epoch: ViewEpoch,
    ) -> Self {
        let snapshot = epoch.current();
        PollFeed {
            api,
            conversation_id,
            store,
            interval,
            epoch,
            snapshot,
        }
    }
}

#[async_trait]
impl MessageFeed for PollFeed {
    async fn run(self: Box<Self>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if !self.epoch.is_current(self.snapshot) {
                debug!("poll feed epoch retired, stopping");
                break;
            }
            match self.api.list_messages(self.conversation_id).await {
                Ok(messages) => {
                    // The view may have closed while the fetch was in
                    // flight; a stale response must not touch its store.
                    if !self.epoch.is_current(self.snapshot) {
                        debug!("discarding stale history response");
                        break;
                    }
                    let mut store = self.store.lock().await;
                    for message in messages {
                        store.append(message);
                    }
                }
                Err(e) => {
                    warn!("history refresh failed, keeping displayed history: {}", e);
                }
            }
        }
        debug!("poll feed finished");
    }
}
