// Channel lifecycle for the chat client: dialing with bounded backoff,
// the read pump, reconnection and teardown.

use std::sync::atomic::Ordering;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use tokio::sync::Mutex;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use super::{notify, ChatClient, ChatEvent, PendingSend, ViewEpoch, WsStream};
use crate::chat::wire::ServerEvent;
use crate::error::ChatError;
use crate::models::{MessageId, UserId};

const MAX_CONNECT_ATTEMPTS: u32 = 3;
const BACKOFF_BASE_MS: u64 = 500;

/// Observable lifecycle of the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Channel endpoint for a conversation. Both participants derive the same
/// address because the pair is ordered before it is embedded in the path.
pub fn channel_url(server_url: &str, a: UserId, b: UserId) -> String {
    let (low, high) = if a <= b { (a, b) } else { (b, a) };
    format!("{}/ws/chat/{}/{}/", server_url.trim_end_matches('/'), low, high)
}

impl ChatClient {
    /// Dial the channel with bounded exponential backoff. All attempts
    /// failing surfaces as `ConnectionUnavailable`; the caller shows an
    /// offline state rather than the core retrying forever.
    pub async fn connect(&mut self) -> Result<(), ChatError> {
        let url = channel_url(&self.server_url, self.self_user.id, self.counterpart_id);
        let mut last_error = None;

        for attempt in 1..=MAX_CONNECT_ATTEMPTS {
            info!(
                "connecting to chat channel {} (attempt {}/{})",
                url, attempt, MAX_CONNECT_ATTEMPTS
            );
            self.set_state(ConnectionState::Connecting);

            match connect_async(&url).await {
                Ok((socket, _response)) => {
                    let (sink, stream) = socket.split();
                    self.sink = Some(std::sync::Arc::new(Mutex::new(sink)));
                    self.set_state(ConnectionState::Connected);

                    let snapshot = self.epoch.current();
                    let handle = tokio::spawn(Self::read_pump(
                        stream,
                        self.self_user.id,
                        self.event_tx.clone(),
                        self.pending_sends.clone(),
                        self.state.clone(),
                        self.counterpart_typing.clone(),
                        self.epoch.clone(),
                        snapshot,
                    ));
                    self.reader = Some(handle);
                    info!("chat channel connected");
                    return Ok(());
                }
                Err(e) => {
                    warn!("connect attempt {} failed: {}", attempt, e);
                    last_error = Some(e.to_string());
                }
            }

            if attempt < MAX_CONNECT_ATTEMPTS {
                let backoff_ms =
                    BACKOFF_BASE_MS * 2u64.pow(attempt) + rand::random::<u64>() % 250;
                let backoff = Duration::from_millis(backoff_ms);
                info!("retrying connection in {:?}", backoff);
                tokio::time::sleep(backoff).await;
            }
        }

        self.set_state(ConnectionState::Disconnected);
        Err(ChatError::ConnectionUnavailable(
            last_error.unwrap_or_else(|| "no connection attempt completed".to_string()),
        ))
    }

    /// Drop the current channel, if any, and dial again with the same
    /// bounded backoff. Gap recovery after a reconnect is the owner's
    /// re-seed from history; store dedupe makes the replay safe.
    pub async fn reconnect(&mut self) -> Result<(), ChatError> {
        info!("reconnecting chat channel");
        self.close().await;
        self.connect().await
    }

    /// Tear the channel down. Idempotent; a second close is a no-op.
    /// Bumping the epoch retires every timer and pump still holding the
    /// previous snapshot, so nothing mutates state for a closed view.
    pub async fn close(&mut self) {
        self.epoch.bump();
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        if let Some(sink) = self.sink.take() {
            let mut guard = sink.lock().await;
            if let Err(e) = guard.send(WsMessage::Close(None)).await {
                debug!("close frame not delivered: {}", e);
            }
        }
        self.counterpart_typing.store(false, Ordering::Release);
        self.pending_sends.lock().await.clear();
        self.set_state(ConnectionState::Disconnected);
    }

    fn set_state(&self, state: ConnectionState) {
        *self.state.lock().expect("connection state lock poisoned") = state;
    }

    /// Sequentially forwards everything the socket delivers, preserving
    /// wire-arrival order on the event channel. Exits on socket close,
    /// socket error, a bumped epoch or a dropped receiver.
    #[allow(clippy::too_many_arguments)]
    async fn read_pump(
        mut stream: WsStream,
        self_id: UserId,
        event_tx: tokio::sync::mpsc::Sender<ChatEvent>,
        pending_sends: std::sync::Arc<Mutex<std::collections::BTreeMap<MessageId, PendingSend>>>,
        state: std::sync::Arc<std::sync::Mutex<ConnectionState>>,
        counterpart_typing: std::sync::Arc<std::sync::atomic::AtomicBool>,
        epoch: ViewEpoch,
        snapshot: u64,
    ) {
        while let Some(next) = stream.next().await {
            if !epoch.is_current(snapshot) {
                debug!("read pump epoch retired, stopping");
                break;
            }
            let text = match next {
                Ok(WsMessage::Text(text)) => text,
                Ok(WsMessage::Close(_)) => {
                    info!("chat channel closed by peer");
                    break;
                }
                // Ping/pong are answered by the protocol layer; binary
                // frames are not part of this protocol.
                Ok(_) => continue,
                Err(e) => {
                    error!("error reading from chat channel: {}", e);
                    break;
                }
            };

            let event: ServerEvent = match serde_json::from_str(&text) {
                Ok(event) => event,
                Err(e) => {
                    // One malformed record never takes down the channel.
                    warn!("dropping malformed channel event: {}", e);
                    continue;
                }
            };

            let forwarded = match event {
                ServerEvent::ChatMessage { message } => {
                    if message.sender.id == self_id {
                        match Self::take_pending(&pending_sends, message.content.as_deref()).await
                        {
                            Some(provisional_id) => {
                                event_tx
                                    .send(ChatEvent::MessageConfirmed {
                                        provisional_id,
                                        message,
                                    })
                                    .await
                            }
                            // Echo without a pending record (history
                            // replay, another session): plain delivery.
                            None => event_tx.send(ChatEvent::Message(message)).await,
                        }
                    } else {
                        notify::message_cue();
                        event_tx.send(ChatEvent::Message(message)).await
                    }
                }
                ServerEvent::TypingIndicator { is_typing } => {
                    counterpart_typing.store(is_typing, Ordering::Release);
                    event_tx.send(ChatEvent::Typing { is_typing }).await
                }
                ServerEvent::ReadReceipt { message_id } => {
                    event_tx.send(ChatEvent::ReadReceipt { message_id }).await
                }
                ServerEvent::Unknown => {
                    debug!("ignoring channel event of unknown type");
                    Ok(())
                }
            };

            if forwarded.is_err() {
                warn!("chat event receiver dropped, stopping read pump");
                break;
            }
        }

        *state.lock().expect("connection state lock poisoned") = ConnectionState::Disconnected;
        counterpart_typing.store(false, Ordering::Release);
        if epoch.is_current(snapshot) {
            let _ = event_tx.send(ChatEvent::ConnectionLost).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_url_is_order_independent() {
        let a = channel_url("ws://localhost:8000", 42, 7);
        let b = channel_url("ws://localhost:8000", 7, 42);
        assert_eq!(a, b);
        assert_eq!(a, "ws://localhost:8000/ws/chat/7/42/");
    }

    #[test]
    fn channel_url_tolerates_trailing_slash() {
        assert_eq!(
            channel_url("ws://localhost:8000/", 1, 2),
            "ws://localhost:8000/ws/chat/1/2/"
        );
    }
}
