// Common test utilities for integration tests

use std::sync::Once;

use anyhow::Result;
use log::LevelFilter;
use tokio::net::TcpListener;
use tokio::time::{timeout, Duration as TokioDuration};

use parley::chat::ChatEvent;
use parley::models::{Message, MessageId, Sender, SendStatus, UserId};

static INIT_LOGGER: Once = Once::new();

/// Set up the logger for the tests
pub fn setup_logging() {
    INIT_LOGGER.call_once(|| {
        let _ = env_logger::Builder::new()
            .filter_level(LevelFilter::Debug)
            .is_test(true)
            .try_init();
    });
}

/// Build a plain text message record the way the backend serializes one.
pub fn text_message(
    id: MessageId,
    sender_id: UserId,
    sender_name: &str,
    content: &str,
    created_at: &str,
) -> Message {
    Message {
        id,
        sender: Sender {
            id: sender_id,
            full_name: sender_name.to_string(),
        },
        content: Some(content.to_string()),
        message_type: Default::default(),
        is_read: false,
        created_at: created_at.to_string(),
        image_attachment: None,
        file_attachment: None,
        status: SendStatus::Confirmed,
    }
}

/// Bind a listener for an in-process chat server and return it with the
/// websocket base URL a client should dial.
pub async fn bind_chat_server() -> Result<(TcpListener, String)> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    Ok((listener, format!("ws://{}", addr)))
}

/// Wait for a chat event matching the predicate, with a timeout.
pub async fn wait_for_event(
    events: &mut tokio::sync::mpsc::Receiver<ChatEvent>,
    predicate: impl Fn(&ChatEvent) -> bool,
    timeout_secs: u64,
) -> Result<ChatEvent> {
    match timeout(TokioDuration::from_secs(timeout_secs), async {
        while let Some(event) = events.recv().await {
            if predicate(&event) {
                return Ok(event);
            }
        }
        Err(anyhow::anyhow!("chat event channel closed"))
    })
    .await
    {
        Ok(result) => result,
        Err(_) => Err(anyhow::anyhow!("timed out waiting for chat event")),
    }
}
