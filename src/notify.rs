//! Manager notification collaborator.
//!
//! A [`Notifier`] delivers one lead notice to one manager channel. The engine
//! calls it once per configured channel under a bounded retry policy; a lead
//! counts as notified when at least one channel accepted the notice.
//!
//! Managers are told about every lead, including those the CRM refused: such
//! notices carry the CRM error and ask for manual registration.

use async_trait::async_trait;
use std::sync::Arc;

use consult_core::compose::LeadSummary;
use consult_core::error::PipelineError;

use crate::telegram::{InlineKeyboardMarkup, TelegramApi};

/// What a manager sees about a new lead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeadNotice {
    pub user_id: i64,
    pub display_name: Option<String>,
    pub lead_id: Option<String>,
    pub summary: LeadSummary,
    /// Set when the CRM lead could not be created.
    pub crm_error: Option<String>,
}

impl LeadNotice {
    pub fn render(&self) -> String {
        let mut out = String::from("New lead from the Telegram bot\n\n");
        if let Some(error) = &self.crm_error {
            out.push_str(&format!(
                "CRM lead creation failed: {}\nPlease register this lead manually.\n\n",
                error
            ));
        }
        if let Some(lead_id) = &self.lead_id {
            out.push_str(&format!("CRM lead: #{}\n", lead_id));
        }
        if let Some(name) = &self.display_name {
            out.push_str(&format!("Telegram: {} (id {})\n", name, self.user_id));
        } else {
            out.push_str(&format!("Telegram id: {}\n", self.user_id));
        }
        out.push_str(&self.summary.render());
        out
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, channel_id: i64, notice: &LeadNotice) -> Result<(), PipelineError>;
}

/// Sends notices as Telegram messages with a button that opens the client's
/// chat.
pub struct TelegramNotifier {
    api: Arc<TelegramApi>,
}

impl TelegramNotifier {
    pub fn new(api: Arc<TelegramApi>) -> Self {
        Self { api }
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn notify(&self, channel_id: i64, notice: &LeadNotice) -> Result<(), PipelineError> {
        let keyboard = InlineKeyboardMarkup::single_url(
            "Message the client",
            &format!("tg://user?id={}", notice.user_id),
        );
        self.api
            .send_message(channel_id, &notice.render(), Some(&keyboard))
            .await
            .map_err(|e| PipelineError::NotificationFailed(format!("chat {}: {}", channel_id, e)))
    }
}
