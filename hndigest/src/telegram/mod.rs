//! Telegram Bot API adapter.
//!
//! Only the slice of the API the bot uses: `sendMessage` for delivery and replies,
//! `getUpdates` long polling for commands and reactions.

use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::debug;

use crate::delivery::Transport;
use crate::error::{DigestError, Result};
use crate::model::DeliveryHandle;

pub mod events;

pub const DEFAULT_API_URL: &str = "https://api.telegram.org";

/// Source of raw updates, polled by the event loop.
#[async_trait::async_trait]
pub trait UpdateSource: Send + Sync {
    async fn poll(&self, offset: i64, timeout_secs: u64) -> Result<Vec<Update>>;
}

pub struct TelegramClient {
    client: Client,
    api_url: String,
    token: String,
}

impl fmt::Debug for TelegramClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TelegramClient")
            .field("api_url", &self.api_url)
            .field("token", &"[REDACTED]")
            .finish()
    }
}

impl TelegramClient {
    pub fn new(api_url: impl Into<String>, token: impl Into<String>) -> Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;
        Ok(Self {
            client,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        })
    }

    pub async fn send_message(&self, chat_id: &str, text: &str) -> Result<Message> {
        let body = SendMessage {
            chat_id,
            text,
            parse_mode: "HTML",
            disable_web_page_preview: true,
        };
        let message: Message = self.call("sendMessage", &body, None).await?;
        debug!(chat_id, message_id = message.message_id, "telegram: message sent");
        Ok(message)
    }

    pub async fn get_updates(&self, offset: i64, timeout_secs: u64) -> Result<Vec<Update>> {
        let body = GetUpdates {
            offset,
            timeout: timeout_secs,
            allowed_updates: &["message", "message_reaction"],
        };
        // The HTTP deadline has to outlive the long poll itself
        let deadline = Duration::from_secs(timeout_secs + 10);
        self.call("getUpdates", &body, Some(deadline)).await
    }

    async fn call<B, T>(&self, method: &str, body: &B, timeout: Option<Duration>) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = format!("{}/bot{}/{}", self.api_url, self.token, method);
        let mut request = self.client.post(&url).json(body);
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }

        // Never log `url`: it carries the token.
        let response = request
            .send()
            .await
            .map_err(|e| DigestError::Unavailable(format!("telegram {} failed: {}", method, e.without_url())))?;
        let status = response.status();
        let text = response.text().await.map_err(|e| {
            DigestError::Unavailable(format!("telegram {} body: {}", method, e.without_url()))
        })?;

        let parsed: ApiResponse<T> = match serde_json::from_str(&text) {
            Ok(parsed) => parsed,
            Err(e) if status.is_success() => {
                return Err(DigestError::InvalidResponse(format!(
                    "telegram {} returned unexpected JSON: {}",
                    method, e
                )))
            }
            Err(_) => {
                return Err(classify(method, status, &text));
            }
        };

        match (parsed.ok, parsed.result) {
            (true, Some(result)) => Ok(result),
            (true, None) => Err(DigestError::InvalidResponse(format!(
                "telegram {} returned ok without a result",
                method
            ))),
            (false, _) => {
                let code = parsed
                    .error_code
                    .and_then(|c| u16::try_from(c).ok())
                    .and_then(|c| StatusCode::from_u16(c).ok())
                    .unwrap_or(status);
                Err(classify(method, code, parsed.description.as_deref().unwrap_or("")))
            }
        }
    }
}

fn classify(method: &str, status: StatusCode, description: &str) -> DigestError {
    match status {
        StatusCode::BAD_REQUEST | StatusCode::FORBIDDEN => DigestError::InvalidRecipient(format!(
            "telegram {} rejected ({}): {}",
            method, status, description
        )),
        _ => DigestError::Unavailable(format!(
            "telegram {} error ({}): {}",
            method, status, description
        )),
    }
}

#[async_trait::async_trait]
impl Transport for TelegramClient {
    async fn deliver(&self, recipient: &str, rendered: &str) -> Result<DeliveryHandle> {
        let message = self.send_message(recipient, rendered).await?;
        Ok(DeliveryHandle::from(message.message_id))
    }
}

#[async_trait::async_trait]
impl UpdateSource for TelegramClient {
    async fn poll(&self, offset: i64, timeout_secs: u64) -> Result<Vec<Update>> {
        self.get_updates(offset, timeout_secs).await
    }
}

#[derive(Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
    parse_mode: &'a str,
    disable_web_page_preview: bool,
}

#[derive(Serialize)]
struct GetUpdates<'a> {
    offset: i64,
    timeout: u64,
    allowed_updates: &'a [&'a str],
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
    error_code: Option<i64>,
}

// Raw Bot API objects, trimmed to the fields we read.

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<Message>,
    pub message_reaction: Option<MessageReactionUpdated>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub message_id: i64,
    pub chat: Chat,
    pub from: Option<User>,
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub id: i64,
    pub username: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageReactionUpdated {
    pub chat: Chat,
    pub message_id: i64,
    pub user: Option<User>,
    #[serde(default)]
    pub old_reaction: Vec<ReactionType>,
    #[serde(default)]
    pub new_reaction: Vec<ReactionType>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReactionType {
    Emoji { emoji: String },
    CustomEmoji { custom_emoji_id: String },
    #[serde(other)]
    Other,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_redacts_token() {
        let client = TelegramClient::new(DEFAULT_API_URL, "123:secret").unwrap();
        let dbg = format!("{:?}", client);
        assert!(dbg.contains("[REDACTED]"));
        assert!(!dbg.contains("secret"));
    }

    #[test]
    fn deserializes_reaction_types() {
        let update: Update = serde_json::from_str(
            r#"{"update_id": 5, "message_reaction": {
                "chat": {"id": 7, "type": "private"}, "message_id": 42, "date": 0,
                "old_reaction": [],
                "new_reaction": [
                    {"type": "emoji", "emoji": "👍"},
                    {"type": "custom_emoji", "custom_emoji_id": "abc"},
                    {"type": "paid"}
                ]}}"#,
        )
        .unwrap();
        let reaction = update.message_reaction.unwrap();
        assert_eq!(reaction.message_id, 42);
        assert_eq!(
            reaction.new_reaction,
            vec![
                ReactionType::Emoji { emoji: "👍".to_string() },
                ReactionType::CustomEmoji { custom_emoji_id: "abc".to_string() },
                ReactionType::Other,
            ]
        );
    }
}
