//! Core data models shared by the conversation pipeline.
//!
//! These types represent stored documents, user profiles with their bounded
//! conversation memory, and the ephemeral retrieval results that flow between
//! the retriever and the answer composer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// External user identity (the messaging platform's account id).
pub type UserId = i64;

/// A document ready to be added to the store, produced by ingestion.
#[derive(Debug, Clone)]
pub struct NewDocument {
    pub filename: String,
    pub content: String,
    pub file_type: Option<String>,
    pub byte_size: Option<i64>,
    pub source_id: Option<String>,
}

/// A text chunk persisted in the document store.
///
/// `seq` is the insertion sequence assigned by the store and is used to break
/// similarity ties (earlier-ingested documents rank first).
#[derive(Debug, Clone, Serialize)]
pub struct StoredDocument {
    pub id: String,
    pub seq: i64,
    pub filename: String,
    pub content: String,
    pub file_type: Option<String>,
    pub byte_size: Option<i64>,
    pub source_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One retrieved document with its cosine similarity to the query.
#[derive(Debug, Clone)]
pub struct RetrievalHit {
    pub document: StoredDocument,
    pub score: f32,
}

/// Ordered retrieval output: descending by score, every score at or above
/// the floor, at most `k` entries. An empty result means "no relevant context".
#[derive(Debug, Clone, Default)]
pub struct RetrievalResult {
    pub hits: Vec<RetrievalHit>,
}

impl RetrievalResult {
    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }

    pub fn len(&self) -> usize {
        self.hits.len()
    }
}

/// Speaker of a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// A single remembered message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

/// Position of a user in the intake flow.
///
/// This enum is the single source of truth for the stage of a conversation;
/// the stage is never inferred from which profile fields are filled in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    #[default]
    Idle,
    ServiceSelected,
    AwaitingContact,
    Active,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::ServiceSelected => "service_selected",
            SessionState::AwaitingContact => "awaiting_contact",
            SessionState::Active => "active",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "idle" => Some(SessionState::Idle),
            "service_selected" => Some(SessionState::ServiceSelected),
            "awaiting_contact" => Some(SessionState::AwaitingContact),
            "active" => Some(SessionState::Active),
            _ => None,
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything the bot knows about one user. At most one profile exists per
/// `user_id`; stores implement load-or-create (upsert) semantics.
#[derive(Debug, Clone, PartialEq)]
pub struct UserProfile {
    pub user_id: UserId,
    pub display_name: Option<String>,
    pub full_name: Option<String>,
    pub phone: Option<String>,
    pub service_code: Option<String>,
    pub history: Vec<ConversationTurn>,
    pub state: SessionState,
    /// Failed contact parses in the current intake attempt.
    pub contact_attempts: u32,
    /// Completed intakes; each one submits exactly one lead.
    pub intake_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UserProfile {
    pub fn new(user_id: UserId, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            display_name: None,
            full_name: None,
            phone: None,
            service_code: None,
            history: Vec::new(),
            state: SessionState::Idle,
            contact_attempts: 0,
            intake_count: 0,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Name and phone extracted from a free-text intake message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContactInfo {
    pub full_name: String,
    pub phone: String,
}

/// Lifecycle of a lead request in the lead ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeadStatus {
    Pending,
    Created,
    Notified,
    Failed,
}

impl LeadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LeadStatus::Pending => "pending",
            LeadStatus::Created => "created",
            LeadStatus::Notified => "notified",
            LeadStatus::Failed => "failed",
        }
    }
}

/// Final bookkeeping for a lead request.
#[derive(Debug, Clone)]
pub struct LeadRecord {
    pub idempotency_key: String,
    pub status: LeadStatus,
    pub contact_id: Option<String>,
    pub lead_id: Option<String>,
    pub attempts: u32,
    pub summary: Option<String>,
}

/// Append-only audit entry for one message in either direction.
#[derive(Debug, Clone)]
pub struct DialogEntry {
    pub user_id: UserId,
    pub role: Role,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

/// A user's 1-5 score for one composed answer. Stores keep one rating per
/// `(user_id, answered_at)`; rating the same answer again replaces the score.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RatingRecord {
    pub user_id: UserId,
    pub score: u8,
    pub question: String,
    pub answer: String,
    pub service_code: Option<String>,
    pub answered_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}
