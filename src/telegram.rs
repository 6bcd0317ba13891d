//! Minimal Telegram Bot API client.
//!
//! Only the methods the bot needs: `getUpdates` (long polling),
//! `sendMessage` with inline keyboards, `sendDocument`, and
//! `answerCallbackQuery`. Request and response payloads are explicit serde
//! structures; updates are turned into typed [`IncomingEvent`] values before
//! they reach the engine.
//!
//! Texts longer than [`TEXT_LIMIT`] are sent as several messages, split at
//! line breaks where possible.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use consult_core::session::{Action, Inbound, Outbound};

#[derive(Debug, Error)]
pub enum TelegramError {
    #[error("telegram request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("telegram API error {code}: {description}")]
    Api { code: i64, description: String },

    #[error("telegram response had no result")]
    EmptyResult,

    #[error("failed to read {path}: {source}")]
    File {
        path: String,
        source: std::io::Error,
    },
}

/// Maximum `sendMessage` text length, in UTF-16 code units.
pub const TEXT_LIMIT: usize = 4096;

/// Split `text` into parts of at most `limit` UTF-16 code units. Cuts at the
/// last line break, else the last space, in the second half of each window;
/// a hard cut is the last resort.
pub fn split_message(text: &str, limit: usize) -> Vec<String> {
    let limit = limit.max(2);
    let mut parts = Vec::new();
    let mut rest = text;

    while rest.encode_utf16().count() > limit {
        let mut units = 0;
        let mut cut = 0;
        for (i, ch) in rest.char_indices() {
            if units + ch.len_utf16() > limit {
                break;
            }
            units += ch.len_utf16();
            cut = i + ch.len_utf8();
        }
        let head = &rest[..cut];
        let split_at = head
            .rfind('\n')
            .filter(|&i| i >= cut / 2)
            .or_else(|| head.rfind(' ').filter(|&i| i >= cut / 2))
            .map(|i| i + 1)
            .unwrap_or(cut);

        let part = rest[..split_at].trim_end();
        if !part.is_empty() {
            parts.push(part.to_string());
        }
        rest = &rest[split_at..];
    }

    if !rest.trim().is_empty() || parts.is_empty() {
        parts.push(rest.to_string());
    }
    parts
}

// ============ Wire types ============

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<Message>,
    #[serde(default)]
    pub callback_query: Option<CallbackQuery>,
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
pub struct Chat {
    pub id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub id: i64,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
}

impl User {
    pub fn display_name(&self) -> String {
        let mut name = self.first_name.clone();
        if let Some(last) = &self.last_name {
            if !name.is_empty() {
                name.push(' ');
            }
            name.push_str(last);
        }
        if name.is_empty() {
            if let Some(username) = &self.username {
                name = format!("@{}", username);
            }
        }
        name
    }
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

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    #[serde(default)]
    error_code: Option<i64>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct InlineKeyboardButton {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub callback_data: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct InlineKeyboardMarkup {
    pub inline_keyboard: Vec<Vec<InlineKeyboardButton>>,
}

impl InlineKeyboardMarkup {
    /// Keyboard for an engine reply, or `None` when it has no buttons.
    pub fn from_outbound(out: &Outbound) -> Option<Self> {
        if out.buttons.is_empty() {
            return None;
        }
        Some(Self {
            inline_keyboard: out
                .buttons
                .iter()
                .map(|row| {
                    row.iter()
                        .map(|b| InlineKeyboardButton {
                            text: b.label.clone(),
                            callback_data: Some(b.action.clone()),
                            url: None,
                        })
                        .collect()
                })
                .collect(),
        })
    }

    pub fn single_url(text: &str, url: &str) -> Self {
        Self {
            inline_keyboard: vec![vec![InlineKeyboardButton {
                text: text.to_string(),
                callback_data: None,
                url: Some(url.to_string()),
            }]],
        }
    }
}

#[derive(Serialize)]
struct SendMessageRequest<'a> {
    chat_id: i64,
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_markup: Option<&'a InlineKeyboardMarkup>,
}

#[derive(Serialize)]
struct GetUpdatesRequest<'a> {
    offset: i64,
    timeout: u64,
    allowed_updates: &'a [&'a str],
}

#[derive(Serialize)]
struct AnswerCallbackRequest<'a> {
    callback_query_id: &'a str,
}

// ============ Events ============

/// An update reduced to what the engine consumes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingEvent {
    pub user_id: i64,
    pub chat_id: i64,
    pub display_name: Option<String>,
    pub inbound: Inbound,
    /// Callback to acknowledge, for button presses.
    pub callback_id: Option<String>,
}

impl IncomingEvent {
    /// Convert an update. Updates without text or with an unknown button
    /// token are dropped.
    pub fn from_update(update: &Update) -> Option<Self> {
        if let Some(message) = &update.message {
            let from = message.from.as_ref()?;
            let text = message.text.as_deref()?;
            return Some(Self {
                user_id: from.id,
                chat_id: message.chat.id,
                display_name: Some(from.display_name()).filter(|n| !n.is_empty()),
                inbound: Inbound::from_text(text),
                callback_id: None,
            });
        }

        if let Some(query) = &update.callback_query {
            let action = query.data.as_deref().and_then(Action::parse)?;
            let chat_id = query
                .message
                .as_ref()
                .map(|m| m.chat.id)
                .unwrap_or(query.from.id);
            return Some(Self {
                user_id: query.from.id,
                chat_id,
                display_name: Some(query.from.display_name()).filter(|n| !n.is_empty()),
                inbound: Inbound::Action(action),
                callback_id: Some(query.id.clone()),
            });
        }

        None
    }

    /// Id of a button press whose token is no longer understood, such as a
    /// keyboard from an older release. These still need an acknowledgement.
    pub fn unhandled_callback(update: &Update) -> Option<&str> {
        let query = update.callback_query.as_ref()?;
        match query.data.as_deref().and_then(Action::parse) {
            Some(_) => None,
            None => Some(query.id.as_str()),
        }
    }
}

// ============ Client ============

pub struct TelegramApi {
    client: reqwest::Client,
    base: String,
}

impl TelegramApi {
    /// `request_timeout` must exceed the long-poll timeout.
    pub fn new(api_base: &str, token: &str, request_timeout: Duration) -> Result<Self, TelegramError> {
        let client = reqwest::Client::builder().timeout(request_timeout).build()?;
        Ok(Self {
            client,
            base: format!("{}/bot{}", api_base.trim_end_matches('/'), token),
        })
    }

    async fn call<B: Serialize, T: DeserializeOwned>(
        &self,
        method: &str,
        body: &B,
    ) -> Result<T, TelegramError> {
        let response = self
            .client
            .post(format!("{}/{}", self.base, method))
            .json(body)
            .send()
            .await?;
        Self::parse(response).await
    }

    async fn parse<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, TelegramError> {
        let parsed: ApiResponse<T> = response.json().await?;
        if !parsed.ok {
            return Err(TelegramError::Api {
                code: parsed.error_code.unwrap_or_default(),
                description: parsed.description.unwrap_or_default(),
            });
        }
        parsed.result.ok_or(TelegramError::EmptyResult)
    }

    pub async fn get_updates(&self, offset: i64, timeout_secs: u64) -> Result<Vec<Update>, TelegramError> {
        self.call(
            "getUpdates",
            &GetUpdatesRequest {
                offset,
                timeout: timeout_secs,
                allowed_updates: &["message", "callback_query"],
            },
        )
        .await
    }

    /// Send `text`, split into several messages when it exceeds
    /// [`TEXT_LIMIT`]. The keyboard is attached to the last part.
    pub async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        keyboard: Option<&InlineKeyboardMarkup>,
    ) -> Result<(), TelegramError> {
        let parts = split_message(text, TEXT_LIMIT);
        let last = parts.len() - 1;
        for (i, part) in parts.iter().enumerate() {
            let _: serde_json::Value = self
                .call(
                    "sendMessage",
                    &SendMessageRequest {
                        chat_id,
                        text: part,
                        reply_markup: if i == last { keyboard } else { None },
                    },
                )
                .await?;
        }
        Ok(())
    }

    /// Upload a local file with `sendDocument`.
    pub async fn send_document(
        &self,
        chat_id: i64,
        path: &Path,
        caption: &str,
    ) -> Result<(), TelegramError> {
        let bytes = tokio::fs::read(path).await.map_err(|source| TelegramError::File {
            path: path.display().to_string(),
            source,
        })?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "document".to_string());
        let form = reqwest::multipart::Form::new()
            .text("chat_id", chat_id.to_string())
            .text("caption", caption.to_string())
            .part(
                "document",
                reqwest::multipart::Part::bytes(bytes).file_name(file_name),
            );
        let response = self
            .client
            .post(format!("{}/sendDocument", self.base))
            .multipart(form)
            .send()
            .await?;
        let _: serde_json::Value = Self::parse(response).await?;
        Ok(())
    }

    pub async fn send_outbound(&self, chat_id: i64, out: &Outbound) -> Result<(), TelegramError> {
        let keyboard = InlineKeyboardMarkup::from_outbound(out);
        self.send_message(chat_id, &out.text, keyboard.as_ref()).await
    }

    pub async fn answer_callback(&self, callback_id: &str) -> Result<(), TelegramError> {
        let _: bool = self
            .call(
                "answerCallbackQuery",
                &AnswerCallbackRequest {
                    callback_query_id: callback_id,
                },
            )
            .await?;
        Ok(())
    }
}
