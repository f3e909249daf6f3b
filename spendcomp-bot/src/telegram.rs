use crate::config::BotToken;
use crate::dispatch::Effect;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use spendcomp_core::{ChatId, CoreError, Result, UserId};
use spendcomp_engine::{Button, ChatKind, Notifier, OutboundMessage};
use std::time::Duration;

/// Seconds Telegram holds a `getUpdates` request open.
pub const LONG_POLL_SECS: u64 = 30;

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub id: UserId,
    #[serde(default)]
    pub username: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: ChatId,
    #[serde(rename = "type")]
    pub kind: String,
}

impl Chat {
    pub fn chat_kind(&self) -> ChatKind {
        match self.kind.as_str() {
            "group" => ChatKind::Group,
            "supergroup" => ChatKind::Supergroup,
            "channel" => ChatKind::Channel,
            _ => ChatKind::Private,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub message_id: i64,
    pub chat: Chat,
    #[serde(default)]
    pub from: Option<User>,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallbackQuery {
    pub id: String,
    pub from: User,
    #[serde(default)]
    pub message: Option<Message>,
    #[serde(default)]
    pub data: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<Message>,
    #[serde(default)]
    pub callback_query: Option<CallbackQuery>,
}

#[derive(Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

/// One button per row.
pub fn inline_keyboard(buttons: &[Button]) -> Value {
    let rows: Vec<Value> = buttons
        .iter()
        .map(|b| {
            json!([{
                "text": b.label,
                "callback_data": b.action.token(),
            }])
        })
        .collect();
    json!({ "inline_keyboard": rows })
}

// Request errors carry the URL, and the URL carries the token.
fn transport(err: reqwest::Error) -> CoreError {
    CoreError::network_connection(err.without_url().to_string())
}

/// Minimal Telegram Bot API client.
#[derive(Debug, Clone)]
pub struct TelegramClient {
    http: reqwest::Client,
    api_url: String,
    token: BotToken,
}

impl TelegramClient {
    pub fn new(api_url: &str, token: &BotToken) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(LONG_POLL_SECS + 15))
            .build()
            .map_err(|e| CoreError::config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http,
            api_url: api_url.trim_end_matches('/').to_string(),
            token: token.clone(),
        })
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, body: Value) -> Result<T> {
        let url = format!("{}/bot{}/{}", self.api_url, self.token.expose(), method);
        let response: ApiResponse<T> = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(transport)?
            .json()
            .await
            .map_err(transport)?;

        if !response.ok {
            return Err(CoreError::network_connection(format!(
                "{} failed: {}",
                method,
                response.description.unwrap_or_default()
            )));
        }

        response
            .result
            .ok_or_else(|| CoreError::internal(format!("{} returned no result", method)))
    }

    pub async fn get_me(&self) -> Result<User> {
        self.call("getMe", json!({})).await
    }

    pub async fn get_updates(&self, offset: i64) -> Result<Vec<Update>> {
        self.call(
            "getUpdates",
            json!({
                "offset": offset,
                "timeout": LONG_POLL_SECS,
                "allowed_updates": ["message", "callback_query"],
            }),
        )
        .await
    }

    pub async fn send_message(&self, message: &OutboundMessage) -> Result<Message> {
        let mut body = json!({
            "chat_id": message.chat_id,
            "text": message.text,
        });
        if !message.buttons.is_empty() {
            body["reply_markup"] = inline_keyboard(&message.buttons);
        }
        self.call("sendMessage", body).await
    }

    pub async fn edit_message_text(&self, message_id: i64, message: &OutboundMessage) -> Result<()> {
        let mut body = json!({
            "chat_id": message.chat_id,
            "message_id": message_id,
            "text": message.text,
        });
        if !message.buttons.is_empty() {
            body["reply_markup"] = inline_keyboard(&message.buttons);
        }
        // Returns the edited message, or `true` for inline messages.
        self.call::<Value>("editMessageText", body).await?;
        Ok(())
    }

    pub async fn answer_callback_query(&self, callback_id: &str, text: Option<&str>) -> Result<()> {
        let mut body = json!({ "callback_query_id": callback_id });
        if let Some(text) = text {
            body["text"] = json!(text);
        }
        self.call::<bool>("answerCallbackQuery", body).await?;
        Ok(())
    }

    /// Performs every effect in order. A failed effect is logged and the
    /// rest still run.
    pub async fn apply(&self, effects: Vec<Effect>) {
        for effect in effects {
            let result = match &effect {
                Effect::Send(message) => self.send_message(message).await.map(|_| ()),
                Effect::Edit {
                    message_id,
                    message,
                } => self.edit_message_text(*message_id, message).await,
                Effect::Answer { callback_id, text } => {
                    self.answer_callback_query(callback_id, text.as_deref()).await
                }
            };

            if let Err(e) = result {
                tracing::warn!("Telegram request failed: {}", e);
            }
        }
    }
}

#[async_trait]
impl Notifier for TelegramClient {
    async fn notify(&self, message: OutboundMessage) -> Result<()> {
        self.send_message(&message).await?;
        Ok(())
    }
}
