//! Telegram long-poll channel.
//!
//! [`run_bot`] polls `getUpdates`, converts each update into an
//! [`IncomingEvent`] and hands it to the per-user [`Router`]. The worker for a
//! user runs [`Engine::handle_message`], sends the replies and any requested
//! documents, and starts lead
//! delivery in a separate task once the confirmation is out, so a slow CRM
//! never delays the confirmation the user sees.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::documents::caption;
use crate::engine::{Engine, InboundMessage, FOLLOW_UP_MESSAGE, INTERNAL_ERROR_MESSAGE};
use crate::router::{Handler, Keyed, Router};
use crate::sqlite_store::SqliteStore;
use crate::telegram::{IncomingEvent, TelegramApi};

const MAX_POLL_BACKOFF: Duration = Duration::from_secs(30);
const WORKER_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

impl Keyed for IncomingEvent {
    fn key(&self) -> i64 {
        self.user_id
    }
}

pub struct BotHandler {
    engine: Arc<Engine>,
    api: Arc<TelegramApi>,
}

impl BotHandler {
    pub fn new(engine: Arc<Engine>, api: Arc<TelegramApi>) -> Self {
        Self { engine, api }
    }
}

#[async_trait]
impl Handler<IncomingEvent> for BotHandler {
    async fn handle(&self, event: IncomingEvent) {
        let user_id = event.user_id;
        let chat_id = event.chat_id;

        if let Some(callback_id) = &event.callback_id {
            if let Err(e) = self.api.answer_callback(callback_id).await {
                tracing::warn!(user_id, error = %e, "failed to acknowledge callback");
            }
        }

        let outcome = match self
            .engine
            .handle_message(InboundMessage {
                user_id,
                display_name: event.display_name,
                inbound: event.inbound,
            })
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(user_id, error = %format!("{:#}", e), "message handling failed");
                if let Err(e) = self.api.send_message(chat_id, INTERNAL_ERROR_MESSAGE, None).await {
                    tracing::warn!(user_id, error = %e, "failed to send error reply");
                }
                return;
            }
        };

        for reply in &outcome.replies {
            if let Err(e) = self.api.send_outbound(chat_id, reply).await {
                tracing::warn!(user_id, error = %e, "failed to send reply");
            }
        }
        for path in &outcome.documents {
            if let Err(e) = self.api.send_document(chat_id, path, &caption(path)).await {
                tracing::warn!(user_id, document = %path.display(), error = %e, "failed to send document");
            }
        }

        if let Some(ticket) = outcome.lead {
            let engine = self.engine.clone();
            let api = self.api.clone();
            tokio::spawn(async move {
                let report = engine.deliver_lead(&ticket).await;
                if report.needs_follow_up() {
                    if let Err(e) = api.send_message(chat_id, FOLLOW_UP_MESSAGE, None).await {
                        tracing::warn!(user_id, error = %e, "failed to send follow-up notice");
                    }
                }
            });
        }
    }
}

/// Run the bot until Ctrl-C.
pub async fn run_bot(config: &Config, store: Arc<SqliteStore>) -> Result<()> {
    let token = config
        .secrets
        .telegram_bot_token
        .as_deref()
        .context("TELEGRAM_BOT_TOKEN environment variable not set")?;
    let api = Arc::new(
        TelegramApi::new(
            &config.telegram.api_base,
            token,
            Duration::from_secs(config.telegram.request_timeout_secs),
        )
        .context("Failed to build Telegram client")?,
    );
    let engine = Arc::new(Engine::from_config(config, store, Some(api.clone()))?);
    let router = Router::new(
        Arc::new(BotHandler::new(engine, api.clone())),
        WORKER_IDLE_TIMEOUT,
    );

    tracing::info!(
        managers = config.telegram.manager_chat_ids.len(),
        crm = %config.crm.provider,
        "bot started, polling for updates"
    );

    let poll_timeout = config.telegram.poll_timeout_secs;
    let mut offset = 0i64;
    let mut backoff = Duration::from_secs(1);

    loop {
        let polled = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!(active_users = router.active_users(), "shutdown requested");
                return Ok(());
            }
            polled = api.get_updates(offset, poll_timeout) => polled,
        };

        let updates = match polled {
            Ok(updates) => {
                backoff = Duration::from_secs(1);
                updates
            }
            Err(e) => {
                tracing::warn!(error = %e, retry_in_secs = backoff.as_secs(), "getUpdates failed");
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(MAX_POLL_BACKOFF);
                continue;
            }
        };

        for update in updates {
            offset = offset.max(update.update_id + 1);
            match IncomingEvent::from_update(&update) {
                Some(event) => {
                    router.dispatch(event);
                }
                None => {
                    if let Some(callback_id) = IncomingEvent::unhandled_callback(&update) {
                        if let Err(e) = api.answer_callback(callback_id).await {
                            tracing::warn!(error = %e, "failed to acknowledge callback");
                        }
                    }
                    tracing::debug!(update_id = update.update_id, "ignoring update");
                }
            }
        }
    }
}
