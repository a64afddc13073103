// Marketplace backend collaborator interface.
//
// The messaging core only ever talks to the backend through this trait:
// conversation list, message history, the non-realtime send fallback and
// the current-user resolver. List endpoints may answer with a bare JSON
// sequence or a paginated envelope carrying a `results` array; both are
// accepted, anything else degrades to an empty list.

use async_trait::async_trait;
use log::warn;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::ChatError;
use crate::models::{Conversation, ConversationId, Message, Participant};

#[async_trait]
pub trait MarketplaceApi: Send + Sync {
    async fn list_conversations(&self) -> Result<Vec<Conversation>, ChatError>;

    async fn list_messages(
        &self,
        conversation_id: ConversationId,
    ) -> Result<Vec<Message>, ChatError>;

    /// Non-realtime send path used by polling surfaces. Returns the
    /// authoritative record.
    async fn send_message(
        &self,
        conversation_id: ConversationId,
        content: &str,
    ) -> Result<Message, ChatError>;

    /// Resolves the viewer's identity, including the role needed for
    /// counterpart resolution.
    async fn current_user(&self) -> Result<Participant, ChatError>;
}

/// Accept both list response shapes the backend produces. Individual
/// records that fail to deserialize are dropped with a warning instead of
/// poisoning the whole batch.
pub fn normalize_list<T: DeserializeOwned>(value: Value) -> Vec<T> {
    let items = match value {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("results") {
            Some(Value::Array(items)) => items,
            _ => {
                warn!("list response object has no results array, treating as empty");
                return Vec::new();
            }
        },
        other => {
            warn!("unexpected list response shape ({}), treating as empty", json_kind(&other));
            return Vec::new();
        }
    };

    items
        .into_iter()
        .filter_map(|item| match serde_json::from_value::<T>(item) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!("dropping malformed record from list response: {}", e);
                None
            }
        })
        .collect()
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// HTTP implementation backed by `ureq`. Since `ureq` is blocking, every
/// request is wrapped in `tokio::task::spawn_blocking`.
#[derive(Debug, Clone)]
pub struct RestApi {
    base_url: String,
    token: Option<String>,
}

impl RestApi {
    pub fn new(base_url: &str, token: Option<String>) -> Self {
        RestApi {
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        }
    }

    async fn get_json(&self, path: String) -> Result<Value, ChatError> {
        let url = format!("{}{}", self.base_url, path);
        let token = self.token.clone();
        tokio::task::spawn_blocking(move || {
            let mut req = ureq::get(&url);
            if let Some(token) = &token {
                req = req.header("Authorization", format!("Bearer {}", token));
            }
            let response = req
                .call()
                .map_err(|e| ChatError::ApiFailure(e.to_string()))?;
            let body = response
                .into_body()
                .read_to_vec()
                .map_err(|e| ChatError::ApiFailure(e.to_string()))?;
            serde_json::from_slice::<Value>(&body)
                .map_err(|e| ChatError::MalformedMessage(e.to_string()))
        })
        .await
        .map_err(|e| ChatError::ApiFailure(e.to_string()))?
    }

    async fn post_json(&self, path: String, payload: Value) -> Result<Value, ChatError> {
        let url = format!("{}{}", self.base_url, path);
        let token = self.token.clone();
        tokio::task::spawn_blocking(move || {
            let body = serde_json::to_vec(&payload)
                .map_err(|e| ChatError::ApiFailure(e.to_string()))?;
            let mut req = ureq::post(&url).header("Content-Type", "application/json");
            if let Some(token) = &token {
                req = req.header("Authorization", format!("Bearer {}", token));
            }
            let response = req
                .send(&body[..])
                .map_err(|e| ChatError::ApiFailure(e.to_string()))?;
            let body = response
                .into_body()
                .read_to_vec()
                .map_err(|e| ChatError::ApiFailure(e.to_string()))?;
            serde_json::from_slice::<Value>(&body)
                .map_err(|e| ChatError::MalformedMessage(e.to_string()))
        })
        .await
        .map_err(|e| ChatError::ApiFailure(e.to_string()))?
    }
}

#[async_trait]
impl MarketplaceApi for RestApi {
    async fn list_conversations(&self) -> Result<Vec<Conversation>, ChatError> {
        let value = self.get_json("/chat/rooms/".to_string()).await?;
        Ok(normalize_list(value))
    }

    async fn list_messages(
        &self,
        conversation_id: ConversationId,
    ) -> Result<Vec<Message>, ChatError> {
        let value = self
            .get_json(format!("/chat/rooms/{}/messages/", conversation_id))
            .await
            .map_err(|e| match e {
                ChatError::ApiFailure(reason) => ChatError::HistoryFetchFailure(reason),
                other => other,
            })?;
        Ok(normalize_list(value))
    }

    async fn send_message(
        &self,
        conversation_id: ConversationId,
        content: &str,
    ) -> Result<Message, ChatError> {
        let payload = serde_json::json!({
            "chat_room": conversation_id,
            "content": content,
            "message_type": "text",
        });
        let value = self
            .post_json("/chat/messages/create/".to_string(), payload)
            .await?;
        serde_json::from_value(value).map_err(|e| ChatError::MalformedMessage(e.to_string()))
    }

    async fn current_user(&self) -> Result<Participant, ChatError> {
        let value = self.get_json("/users/me/".to_string()).await?;
        serde_json::from_value(value).map_err(|e| ChatError::MalformedMessage(e.to_string()))
    }
}
