// Chat channel module: one live bidirectional connection per open
// conversation, scoped to the pair of participants.
//
// The client owns the socket sink and a spawned read pump; everything the
// channel produces reaches the owning view through a single mpsc receiver
// in wire-arrival order.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use chrono::Utc;
use futures_util::stream::{SplitSink, SplitStream};
use log::{error, warn};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

pub mod connection;
pub mod feed;
pub mod notify;
pub mod receipts;
pub mod typing;
pub mod wire;

pub use connection::ConnectionState;
pub use feed::{MessageFeed, PollFeed, PushFeed};
pub use receipts::ReadReceiptCoordinator;
pub use typing::TypingSignaler;
pub use wire::{ClientEvent, ServerEvent};

use crate::error::ChatError;
use crate::models::{Message, MessageId, MessageKind, Participant, Sender, SendStatus, UserId};

pub(crate) type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, WsMessage>;
pub(crate) type WsStream = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Locally assigned ids for optimistic records live far above anything
/// the backend hands out, so a provisional record can never collide with
/// an authoritative one in the store.
pub(crate) const PROVISIONAL_ID_BASE: MessageId = 1 << 62;

/// How long an optimistic send waits for its authoritative echo before it
/// is marked failed.
const DEFAULT_ECHO_TIMEOUT: Duration = Duration::from_secs(10);

/// Everything the channel delivers to the owning conversation view, in
/// wire-arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatEvent {
    /// An inbound message, or the optimistic record of a local send.
    Message(Message),
    /// The authoritative echo for a local send arrived; the provisional
    /// record should be replaced.
    MessageConfirmed {
        provisional_id: MessageId,
        message: Message,
    },
    /// A local send never received its echo.
    SendFailed { provisional_id: MessageId },
    /// Counterpart typing state changed.
    Typing { is_typing: bool },
    /// The counterpart confirmed reading one of our messages.
    ReadReceipt { message_id: MessageId },
    /// The channel dropped. No automatic reconnect happens here; the
    /// owner decides whether to call `reconnect`.
    ConnectionLost,
}

#[derive(Debug)]
pub(crate) struct PendingSend {
    pub content: String,
}

/// Generation token for one conversation-open. Stale poll responses,
/// echo timers and read pumps from a previous open compare their snapshot
/// against the current value and discard themselves.
#[derive(Debug, Clone, Default)]
pub struct ViewEpoch(Arc<AtomicU64>);

impl ViewEpoch {
    pub fn new() -> Self {
        ViewEpoch::default()
    }

    pub fn current(&self) -> u64 {
        self.0.load(Ordering::Acquire)
    }

    pub fn bump(&self) {
        self.0.fetch_add(1, Ordering::AcqRel);
    }

    pub fn is_current(&self, snapshot: u64) -> bool {
        self.current() == snapshot
    }
}

pub struct ChatClient {
    self_user: Sender,
    counterpart_id: UserId,
    server_url: String,
    sink: Option<Arc<Mutex<WsSink>>>,
    reader: Option<JoinHandle<()>>,
    state: Arc<StdMutex<ConnectionState>>,
    event_tx: mpsc::Sender<ChatEvent>,
    pending_sends: Arc<Mutex<BTreeMap<MessageId, PendingSend>>>,
    counterpart_typing: Arc<AtomicBool>,
    signaler: Arc<Mutex<TypingSignaler>>,
    epoch: ViewEpoch,
    next_provisional: AtomicU64,
    echo_timeout: Duration,
}

impl ChatClient {
    /// Build a client for the conversation between `self_user` and
    /// `counterpart_id`. The returned receiver carries every channel
    /// event in arrival order.
    pub fn new(
        self_user: &Participant,
        counterpart_id: UserId,
        server_url: &str,
    ) -> (Self, mpsc::Receiver<ChatEvent>) {
        let (event_tx, event_rx) = mpsc::channel(100);
        (
            ChatClient {
                self_user: Sender {
                    id: self_user.id,
                    full_name: self_user.full_name.clone(),
                },
                counterpart_id,
                server_url: server_url.trim_end_matches('/').to_string(),
                sink: None,
                reader: None,
                state: Arc::new(StdMutex::new(ConnectionState::Disconnected)),
                event_tx,
                pending_sends: Arc::new(Mutex::new(BTreeMap::new())),
                counterpart_typing: Arc::new(AtomicBool::new(false)),
                signaler: Arc::new(Mutex::new(TypingSignaler::new())),
                epoch: ViewEpoch::new(),
                next_provisional: AtomicU64::new(1),
                echo_timeout: DEFAULT_ECHO_TIMEOUT,
            },
            event_rx,
        )
    }

    /// Override the echo timeout for optimistic sends.
    pub fn with_echo_timeout(mut self, timeout: Duration) -> Self {
        self.echo_timeout = timeout;
        self
    }

    pub fn self_id(&self) -> UserId {
        self.self_user.id
    }

    pub fn counterpart_id(&self) -> UserId {
        self.counterpart_id
    }

    /// Epoch of the current conversation-open, shared with feed tasks.
    pub fn epoch(&self) -> ViewEpoch {
        self.epoch.clone()
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.lock().expect("connection state lock poisoned")
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Serialize and transmit a wire event. Fails fast with
    /// `NotConnected` when the channel is down; callers are expected to
    /// check `is_connected` first.
    pub async fn send_event(&self, event: &ClientEvent) -> Result<(), ChatError> {
        if !self.is_connected() {
            return Err(ChatError::NotConnected);
        }
        let sink = self.sink.as_ref().ok_or(ChatError::NotConnected)?;
        let payload = serde_json::to_string(event)
            .map_err(|e| ChatError::MalformedMessage(e.to_string()))?;

        use futures_util::SinkExt;
        let mut guard = sink.lock().await;
        guard.send(WsMessage::text(payload)).await.map_err(|e| {
            error!("failed to send on chat channel: {}", e);
            *self.state.lock().expect("connection state lock poisoned") =
                ConnectionState::Disconnected;
            ChatError::NotConnected
        })
    }

    /// Optimistic send: deliver a provisional record to the owner right
    /// away, transmit the event, and arm a timeout that fails the record
    /// if the authoritative echo never arrives.
    pub async fn send_chat_message(&self, content: &str) -> Result<MessageId, ChatError> {
        if !self.is_connected() {
            return Err(ChatError::NotConnected);
        }

        // The typing cycle ends with the message; never signal composing
        // after the send went out.
        self.finish_typing_cycle().await;

        let provisional_id =
            PROVISIONAL_ID_BASE + self.next_provisional.fetch_add(1, Ordering::Relaxed);
        let optimistic = Message {
            id: provisional_id,
            sender: self.self_user.clone(),
            content: Some(content.to_string()),
            message_type: MessageKind::Text,
            is_read: false,
            created_at: Utc::now().to_rfc3339(),
            image_attachment: None,
            file_attachment: None,
            status: SendStatus::Pending,
        };
        self.pending_sends.lock().await.insert(
            provisional_id,
            PendingSend {
                content: content.to_string(),
            },
        );
        if self
            .event_tx
            .send(ChatEvent::Message(optimistic))
            .await
            .is_err()
        {
            warn!("chat event receiver dropped before optimistic send");
        }

        let wire_event = ClientEvent::ChatMessage {
            message: content.to_string(),
            message_type: MessageKind::Text,
        };
        if let Err(e) = self.send_event(&wire_event).await {
            // Transmission never happened; fail the record immediately.
            self.pending_sends.lock().await.remove(&provisional_id);
            let _ = self
                .event_tx
                .send(ChatEvent::SendFailed { provisional_id })
                .await;
            return Err(e);
        }

        self.arm_echo_timeout(provisional_id);
        Ok(provisional_id)
    }

    fn arm_echo_timeout(&self, provisional_id: MessageId) {
        let pending_sends = self.pending_sends.clone();
        let event_tx = self.event_tx.clone();
        let epoch = self.epoch.clone();
        let snapshot = epoch.current();
        let timeout = self.echo_timeout;
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if !epoch.is_current(snapshot) {
                return;
            }
            let timed_out = pending_sends.lock().await.remove(&provisional_id).is_some();
            if timed_out {
                warn!(
                    "no echo for locally sent message {}, marking failed",
                    provisional_id
                );
                let _ = event_tx
                    .send(ChatEvent::SendFailed { provisional_id })
                    .await;
            }
        });
    }

    /// Oldest pending send whose content matches the echoed record. The
    /// wire carries no client correlation id, so content plus age is the
    /// reconciliation key.
    pub(crate) async fn take_pending(
        pending_sends: &Mutex<BTreeMap<MessageId, PendingSend>>,
        content: Option<&str>,
    ) -> Option<MessageId> {
        let mut guard = pending_sends.lock().await;
        let id = guard
            .iter()
            .find(|(_, pending)| Some(pending.content.as_str()) == content)
            .map(|(id, _)| *id)?;
        guard.remove(&id);
        Some(id)
    }
}
