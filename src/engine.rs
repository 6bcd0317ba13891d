//! Conversation engine: the explicitly constructed context that owns the
//! session machine, the composer and every collaborator handle.
//!
//! # Message handling
//!
//! [`Engine::handle_message`] runs classify, act and persist for one inbound
//! event while holding that user's lock, so at most one state transition per
//! user is in flight. Messages for different users proceed concurrently.
//!
//! # Lead delivery
//!
//! Entering `Active` from `AwaitingContact` yields a [`LeadTicket`]. The
//! caller confirms receipt to the user first, then runs
//! [`Engine::deliver_lead`], which:
//!
//! 1. Claims the idempotency key (user id, intake number and transition
//!    timestamp). A key that was already claimed ends delivery with
//!    [`LeadOutcome::Duplicate`].
//! 2. Builds the lead summary.
//! 3. Upserts the CRM contact and creates the lead, each under bounded retry.
//! 4. Notifies every manager channel under bounded retry. When the CRM step
//!    failed for good the notice still goes out, marked for manual entry.
//! 5. Records the final status in the lead ledger.
//!
//! Terminal CRM and notification failures are logged at `error` level and
//! reported in the returned [`LeadReport`]; they never escape as errors.
//! Audit log writes are best-effort: a failed write is logged and the
//! message is still answered.

use anyhow::Result;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};

use consult_core::compose::{Composer, LeadSummary};
use consult_core::error::PipelineError;
use consult_core::memory::ConversationMemory;
use consult_core::models::{
    ContactInfo, DialogEntry, LeadRecord, LeadStatus, RatingRecord, Role, UserId, UserProfile,
};
use consult_core::retrieve::Retriever;
use consult_core::session::{
    rating_buttons, ContactParse, Effect, Inbound, Outbound, SessionMachine, Transition,
};
use consult_core::store::{DocumentStore, ProfileStore};

use crate::config::Config;
use crate::crm::{BitrixClient, ContactRequest, CrmClient, LeadRequest};
use crate::documents::DocumentLibrary;
use crate::embedding::create_embedder;
use crate::generation::create_generator;
use crate::notify::{LeadNotice, Notifier, TelegramNotifier};
use crate::retry::{retry, RetryPolicy};
use crate::sqlite_store::SqliteStore;
use crate::telegram::TelegramApi;

/// Sent when lead creation or manager notification failed for good.
pub const FOLLOW_UP_MESSAGE: &str =
    "Something went wrong while registering your request, but a manager will follow up with you.";

/// Sent when the engine itself could not process a message.
pub const INTERNAL_ERROR_MESSAGE: &str =
    "Sorry, something went wrong. Please try again in a moment.";

// ============ Per-user exclusion ============

const PRUNE_THRESHOLD: usize = 1024;

/// One async mutex per user id.
#[derive(Default)]
pub struct UserLocks {
    inner: Mutex<HashMap<UserId, Arc<Mutex<()>>>>,
}

impl UserLocks {
    pub async fn acquire(&self, user_id: UserId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().await;
            if map.len() > PRUNE_THRESHOLD {
                map.retain(|_, m| Arc::strong_count(m) > 1);
            }
            map.entry(user_id).or_default().clone()
        };
        lock.lock_owned().await
    }
}

// ============ Messages and outcomes ============

#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub user_id: UserId,
    pub display_name: Option<String>,
    pub inbound: Inbound,
}

/// Everything needed to deliver one lead, captured at transition time.
#[derive(Debug, Clone)]
pub struct LeadTicket {
    pub user_id: UserId,
    pub service_code: String,
    pub contact: ContactInfo,
    /// The profile's intake count after this transition.
    pub sequence: u32,
    pub transitioned_at: DateTime<Utc>,
    pub profile: UserProfile,
}

impl LeadTicket {
    /// Deterministic key for this transition: SHA-256 of
    /// `"{user_id}:{intake number}:{transition timestamp in ms}"`, hex
    /// encoded. The intake number keeps two intakes within one millisecond
    /// apart.
    pub fn idempotency_key(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(format!(
            "{}:{}:{}",
            self.user_id,
            self.sequence,
            self.transitioned_at.timestamp_millis()
        ));
        hex::encode(hasher.finalize())
    }
}

#[derive(Debug, Clone, Default)]
pub struct HandleOutcome {
    pub replies: Vec<Outbound>,
    pub transitions: Vec<Transition>,
    pub contact_parse: Option<ContactParse>,
    /// Set when the message was answered by the composer.
    pub grounded: Option<bool>,
    /// Files to send after the replies.
    pub documents: Vec<PathBuf>,
    pub lead: Option<LeadTicket>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LeadOutcome {
    Delivered {
        contact_id: Option<String>,
        lead_id: Option<String>,
        notified_channels: usize,
    },
    Duplicate,
    /// The CRM refused the lead; managers were still told to enter it by hand.
    CrmFailed {
        error: PipelineError,
        notified_channels: usize,
    },
    NotifyFailed {
        lead_id: Option<String>,
        error: PipelineError,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct LeadReport {
    pub idempotency_key: String,
    pub outcome: LeadOutcome,
    /// CRM attempts across contact upsert and lead creation.
    pub crm_attempts: u32,
}

impl LeadReport {
    /// True when the user should be told a manager will follow up manually.
    pub fn needs_follow_up(&self) -> bool {
        matches!(
            self.outcome,
            LeadOutcome::CrmFailed { .. } | LeadOutcome::NotifyFailed { .. }
        )
    }
}

// ============ Engine ============

/// Collaborators for [`Engine::new`].
pub struct EngineDeps {
    pub machine: SessionMachine,
    pub composer: Composer,
    pub profiles: Arc<dyn ProfileStore>,
    pub crm: Option<Arc<dyn CrmClient>>,
    pub notifier: Option<Arc<dyn Notifier>>,
    pub manager_channels: Vec<i64>,
    pub retry: RetryPolicy,
    pub documents: Option<DocumentLibrary>,
    /// Attach the rating keyboard to composed answers.
    pub rate_answers: bool,
}

pub struct Engine {
    machine: SessionMachine,
    composer: Composer,
    profiles: Arc<dyn ProfileStore>,
    crm: Option<Arc<dyn CrmClient>>,
    notifier: Option<Arc<dyn Notifier>>,
    manager_channels: Vec<i64>,
    retry: RetryPolicy,
    documents: Option<DocumentLibrary>,
    rate_answers: bool,
    locks: UserLocks,
}

impl Engine {
    pub fn new(deps: EngineDeps) -> Self {
        Self {
            machine: deps.machine,
            composer: deps.composer,
            profiles: deps.profiles,
            crm: deps.crm,
            notifier: deps.notifier,
            manager_channels: deps.manager_channels,
            retry: deps.retry,
            documents: deps.documents,
            rate_answers: deps.rate_answers,
            locks: UserLocks::default(),
        }
    }

    /// Wire the production collaborators from config. `telegram` is required
    /// for manager notifications; pass `None` for offline commands.
    pub fn from_config(
        config: &Config,
        store: Arc<SqliteStore>,
        telegram: Option<Arc<TelegramApi>>,
    ) -> Result<Self> {
        let embedder = create_embedder(config)?;
        let generator = create_generator(config)?;
        let documents: Arc<dyn DocumentStore> = store.clone();
        let retriever = Retriever::new(embedder, documents, config.retrieval_settings());
        let composer = Composer::new(
            retriever,
            generator,
            ConversationMemory::new(config.memory.max_turns),
            config.composer_settings(),
        );

        let crm: Option<Arc<dyn CrmClient>> = if config.crm.is_enabled() {
            let url = config.secrets.bitrix_webhook_url.as_deref().ok_or_else(|| {
                anyhow::anyhow!("BITRIX24_WEBHOOK_URL environment variable not set")
            })?;
            Some(Arc::new(BitrixClient::new(
                url,
                Duration::from_secs(config.crm.timeout_secs),
            )?))
        } else {
            None
        };

        let notifier: Option<Arc<dyn Notifier>> =
            telegram.map(|api| Arc::new(TelegramNotifier::new(api)) as Arc<dyn Notifier>);

        Ok(Self::new(EngineDeps {
            machine: SessionMachine::new(config.catalog(), config.intake.max_contact_attempts),
            composer,
            profiles: store,
            crm,
            notifier,
            manager_channels: config.telegram.manager_chat_ids.clone(),
            retry: RetryPolicy::new(
                config.crm.max_attempts,
                Duration::from_millis(config.crm.backoff_ms),
            ),
            documents: DocumentLibrary::from_config(config),
            rate_answers: config.rating.enabled,
        }))
    }

    pub fn composer(&self) -> &Composer {
        &self.composer
    }

    pub fn machine(&self) -> &SessionMachine {
        &self.machine
    }

    /// Process one inbound event for one user.
    pub async fn handle_message(&self, message: InboundMessage) -> Result<HandleOutcome> {
        let user_id = message.user_id;
        let _guard = self.locks.acquire(user_id).await;

        let mut profile = self.profiles.load_or_create(user_id).await?;
        if message.display_name.is_some() {
            profile.display_name = message.display_name.clone();
        }

        self.audit(user_id, Role::User, message.inbound.audit_text())
            .await;

        let state_before = profile.state;
        let step = self.machine.step(&mut profile, &message.inbound);
        for t in &step.transitions {
            tracing::info!(user_id, from = %t.from, to = %t.to, "session transition");
        }
        if let Some(parse) = step.contact_parse {
            tracing::info!(user_id, outcome = ?parse, "contact details not recognized");
        }

        let mut outcome = HandleOutcome {
            transitions: step.transitions.clone(),
            contact_parse: step.contact_parse,
            ..Default::default()
        };

        for effect in step.effects {
            match effect {
                Effect::Reply(out) => outcome.replies.push(out),
                Effect::Consult(question) => {
                    let answer = self.composer.answer(&question, &mut profile).await;
                    outcome.grounded = Some(answer.grounded);
                    let mut reply = Outbound::text(answer.text);
                    if self.rate_answers && !answer.fallback {
                        reply = reply.with_buttons(rating_buttons());
                    }
                    outcome.replies.push(reply);
                    if let Some(path) = self.documents.as_ref().and_then(|d| d.find(&question)) {
                        tracing::info!(user_id, document = %path.display(), "document requested");
                        outcome.documents.push(path);
                    }
                }
                Effect::RecordRating {
                    score,
                    question,
                    answer,
                    answered_at,
                } => {
                    let rating = RatingRecord {
                        user_id,
                        score,
                        question,
                        answer,
                        service_code: profile.service_code.clone(),
                        answered_at,
                        created_at: Utc::now(),
                    };
                    match self.profiles.record_rating(&rating).await {
                        Ok(()) => tracing::info!(user_id, score, "answer rated"),
                        Err(e) => tracing::warn!(user_id, score, error = %e, "failed to store rating"),
                    }
                }
                Effect::SubmitLead {
                    service_code,
                    contact,
                } => {
                    outcome.lead = Some(LeadTicket {
                        user_id,
                        service_code,
                        contact,
                        sequence: profile.intake_count,
                        transitioned_at: Utc::now(),
                        profile: profile.clone(),
                    });
                }
            }
        }

        profile.updated_at = Utc::now();
        self.profiles.save(&profile).await?;

        for reply in &outcome.replies {
            self.audit(user_id, Role::Assistant, reply.text.clone()).await;
        }
        for path in &outcome.documents {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            self.audit(user_id, Role::Assistant, format!("[document] {}", name))
                .await;
        }

        tracing::debug!(
            user_id,
            state_before = %state_before,
            state_after = %profile.state,
            replies = outcome.replies.len(),
            lead = outcome.lead.is_some(),
            "message handled"
        );
        Ok(outcome)
    }

    async fn audit(&self, user_id: UserId, role: Role, text: String) {
        let entry = DialogEntry {
            user_id,
            role,
            text,
            created_at: Utc::now(),
        };
        if let Err(e) = self.profiles.log_dialog(&entry).await {
            tracing::warn!(user_id, role = role.as_str(), error = %e, "failed to write dialog log");
        }
    }

    /// Create the CRM lead and notify managers for one transition.
    pub async fn deliver_lead(&self, ticket: &LeadTicket) -> LeadReport {
        let key = ticket.idempotency_key();
        let user_id = ticket.user_id;

        match self
            .profiles
            .claim_lead(&key, user_id, &ticket.service_code)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                tracing::info!(user_id, lead_key = %key, "lead already claimed, skipping");
                return LeadReport {
                    idempotency_key: key,
                    outcome: LeadOutcome::Duplicate,
                    crm_attempts: 0,
                };
            }
            Err(e) => {
                tracing::error!(user_id, lead_key = %key, error = %e, "failed to claim lead key");
                return LeadReport {
                    idempotency_key: key,
                    outcome: LeadOutcome::CrmFailed {
                        error: PipelineError::CrmUnavailable(format!(
                            "lead ledger unavailable: {:#}",
                            e
                        )),
                        notified_channels: 0,
                    },
                    crm_attempts: 0,
                };
            }
        }

        let service_title = self
            .machine
            .catalog()
            .title_of(&ticket.service_code)
            .to_string();
        let summary = self
            .composer
            .summarize_lead(&ticket.profile, &ticket.service_code, &service_title)
            .await;

        let mut record = LeadRecord {
            idempotency_key: key.clone(),
            status: LeadStatus::Pending,
            contact_id: None,
            lead_id: None,
            attempts: 0,
            summary: Some(summary.render()),
        };

        if let Err(error) = self.create_in_crm(ticket, &summary, &mut record).await {
            record.status = LeadStatus::Failed;
            tracing::error!(
                user_id,
                lead_key = %key,
                attempts = record.attempts,
                error = %error,
                "lead creation failed permanently"
            );
            let notice = LeadNotice {
                user_id,
                display_name: ticket.profile.display_name.clone(),
                lead_id: None,
                summary,
                crm_error: Some(error.to_string()),
            };
            let notified_channels = match self.notify_managers(&notice).await {
                Ok(n) => n,
                Err(notify_error) => {
                    tracing::error!(
                        user_id,
                        lead_key = %key,
                        error = %notify_error,
                        "manager notification failed permanently"
                    );
                    0
                }
            };
            self.finish(&record).await;
            return LeadReport {
                idempotency_key: key,
                outcome: LeadOutcome::CrmFailed {
                    error,
                    notified_channels,
                },
                crm_attempts: record.attempts,
            };
        }

        let notice = LeadNotice {
            user_id,
            display_name: ticket.profile.display_name.clone(),
            lead_id: record.lead_id.clone(),
            summary,
            crm_error: None,
        };
        let outcome = match self.notify_managers(&notice).await {
            Ok(notified_channels) => {
                if notified_channels > 0 {
                    record.status = LeadStatus::Notified;
                }
                LeadOutcome::Delivered {
                    contact_id: record.contact_id.clone(),
                    lead_id: record.lead_id.clone(),
                    notified_channels,
                }
            }
            Err(error) => {
                tracing::error!(
                    user_id,
                    lead_key = %key,
                    error = %error,
                    "manager notification failed permanently"
                );
                LeadOutcome::NotifyFailed {
                    lead_id: record.lead_id.clone(),
                    error,
                }
            }
        };

        self.finish(&record).await;
        tracing::info!(
            user_id,
            lead_key = %key,
            status = record.status.as_str(),
            lead_id = record.lead_id.as_deref().unwrap_or("-"),
            "lead delivery finished"
        );
        LeadReport {
            idempotency_key: key,
            outcome,
            crm_attempts: record.attempts,
        }
    }

    async fn create_in_crm(
        &self,
        ticket: &LeadTicket,
        summary: &LeadSummary,
        record: &mut LeadRecord,
    ) -> Result<(), PipelineError> {
        let Some(crm) = &self.crm else {
            tracing::warn!(user_id = ticket.user_id, "CRM disabled, lead kept in local ledger only");
            record.status = LeadStatus::Created;
            return Ok(());
        };

        let contact = ContactRequest {
            full_name: ticket.contact.full_name.clone(),
            phone: ticket.contact.phone.clone(),
            email: None,
        };
        let contact_id = match retry(&self.retry, "crm.upsert_contact", |_| true, |_| {
            crm.upsert_contact(&contact)
        })
        .await
        {
            Ok(done) => {
                record.attempts += done.attempts;
                done.value
            }
            Err(failed) => {
                record.attempts += failed.attempts;
                return Err(failed.value);
            }
        };
        record.contact_id = Some(contact_id.clone());

        let lead = LeadRequest {
            contact_id,
            service_code: ticket.service_code.clone(),
            service_title: summary.service_title.clone(),
            full_name: ticket.contact.full_name.clone(),
            phone: ticket.contact.phone.clone(),
            user_id: ticket.user_id,
            summary: summary.render(),
        };
        match retry(&self.retry, "crm.create_lead", |_| true, |_| crm.create_lead(&lead)).await {
            Ok(done) => {
                record.attempts += done.attempts;
                record.lead_id = Some(done.value);
                record.status = LeadStatus::Created;
                Ok(())
            }
            Err(failed) => {
                record.attempts += failed.attempts;
                Err(failed.value)
            }
        }
    }

    /// Returns the number of channels that accepted the notice. Zero
    /// configured channels is not a failure.
    async fn notify_managers(&self, notice: &LeadNotice) -> Result<usize, PipelineError> {
        let Some(notifier) = &self.notifier else {
            tracing::warn!(user_id = notice.user_id, "no notifier configured, managers not notified");
            return Ok(0);
        };
        if self.manager_channels.is_empty() {
            tracing::warn!(user_id = notice.user_id, "no manager chat ids configured");
            return Ok(0);
        }

        let mut delivered = 0;
        let mut last_error = None;
        for &channel in &self.manager_channels {
            match retry(&self.retry, "notify", |_| true, |_| notifier.notify(channel, notice)).await {
                Ok(_) => delivered += 1,
                Err(failed) => {
                    tracing::warn!(channel, attempts = failed.attempts, error = %failed.value, "notification to channel failed");
                    last_error = Some(failed.value);
                }
            }
        }

        match (delivered, last_error) {
            (0, Some(error)) => Err(error),
            _ => Ok(delivered),
        }
    }

    async fn finish(&self, record: &LeadRecord) {
        if let Err(e) = self.profiles.finish_lead(record).await {
            tracing::error!(lead_key = %record.idempotency_key, error = %e, "failed to record lead outcome");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use consult_core::models::SessionState;

    fn ticket(sequence: u32, at_ms: i64) -> LeadTicket {
        LeadTicket {
            user_id: 42,
            service_code: "crypto".into(),
            contact: ContactInfo {
                full_name: "Ivan Petrov".into(),
                phone: "+41791234567".into(),
            },
            sequence,
            transitioned_at: DateTime::from_timestamp_millis(at_ms).unwrap(),
            profile: UserProfile::new(42, Utc::now()),
        }
    }

    #[test]
    fn test_idempotency_key_is_stable_per_transition() {
        let a = ticket(1, 1_700_000_000_123);
        let b = ticket(1, 1_700_000_000_123);
        let c = ticket(1, 1_700_000_000_124);
        assert_eq!(a.idempotency_key(), b.idempotency_key());
        assert_ne!(a.idempotency_key(), c.idempotency_key());

        // Two intakes inside the same millisecond still get distinct keys.
        let d = ticket(2, 1_700_000_000_123);
        assert_ne!(a.idempotency_key(), d.idempotency_key());
        assert_eq!(a.idempotency_key().len(), 64);
        assert_eq!(a.profile.state, SessionState::Idle);
    }

    #[tokio::test]
    async fn test_user_locks_serialize_same_user() {
        let locks = Arc::new(UserLocks::default());
        let guard = locks.acquire(1).await;

        let other_user = tokio::time::timeout(Duration::from_millis(50), locks.acquire(2)).await;
        assert!(other_user.is_ok(), "different users must not block each other");

        let same_user = tokio::time::timeout(Duration::from_millis(50), locks.acquire(1)).await;
        assert!(same_user.is_err(), "same user must wait for the first guard");

        drop(guard);
        let again = tokio::time::timeout(Duration::from_millis(50), locks.acquire(1)).await;
        assert!(again.is_ok());
    }
}
