//! Storage abstraction for documents and user profiles.
//!
//! The [`DocumentStore`] and [`ProfileStore`] traits define every storage
//! operation the conversation pipeline needs, so the core logic runs against
//! SQLite in production and the in-memory backends in tests.
//!
//! Implementations must be `Send + Sync`: independent user tasks call them
//! concurrently. Writes to the same row are serialized by the backend; reads
//! may run in parallel.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

use crate::embedding::cosine_similarity;
use crate::models::{
    DialogEntry, LeadRecord, NewDocument, RatingRecord, RetrievalHit, RetrievalResult,
    StoredDocument, UserId, UserProfile,
};

/// Persistent text chunks with embeddings and nearest-neighbour search.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`add`](DocumentStore::add) | Insert a document with its embedding |
/// | [`search`](DocumentStore::search) | Cosine similarity top-k above a floor |
/// | [`count`](DocumentStore::count) | Number of stored documents |
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Insert a new document. Re-ingestion creates a new row; there is no
    /// update-in-place. Returns the new opaque id.
    async fn add(&self, doc: &NewDocument, embedding: &[f32]) -> Result<String>;

    /// Return at most `k` documents with similarity `>= min_score`, ordered by
    /// descending similarity, ties broken by insertion order. Documents without
    /// an embedding are never returned.
    async fn search(&self, query_vec: &[f32], k: usize, min_score: f32)
        -> Result<RetrievalResult>;

    async fn count(&self) -> Result<i64>;
}

/// User profiles, the dialog audit log, and the lead ledger.
#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// Fetch the profile for `user_id`, creating an `Idle` profile on first
    /// contact. Never creates a second profile for the same id.
    async fn load_or_create(&self, user_id: UserId) -> Result<UserProfile>;

    /// Persist the whole profile (state, intake fields, memory).
    async fn save(&self, profile: &UserProfile) -> Result<()>;

    /// Append one entry to the audit log of round trips.
    async fn log_dialog(&self, entry: &DialogEntry) -> Result<()>;

    /// Atomically claim a lead idempotency key. Returns `false` when the key
    /// was already claimed, in which case the caller must not create a lead.
    async fn claim_lead(&self, key: &str, user_id: UserId, service_code: &str) -> Result<bool>;

    /// Record the outcome of a claimed lead request.
    async fn finish_lead(&self, record: &LeadRecord) -> Result<()>;

    /// Store a rating, replacing any earlier rating of the same answer
    /// (same `user_id` and `answered_at`).
    async fn record_rating(&self, rating: &RatingRecord) -> Result<()>;
}

/// Rank `(document, embedding)` candidates against a query vector.
///
/// Candidates must be supplied in insertion order; the sort is stable, so
/// equal scores keep that order. Shared by every [`DocumentStore`] backend so
/// ranking is identical regardless of storage.
pub fn rank_candidates<I>(query_vec: &[f32], candidates: I, k: usize, min_score: f32) -> RetrievalResult
where
    I: IntoIterator<Item = (StoredDocument, Vec<f32>)>,
{
    if k == 0 {
        return RetrievalResult::default();
    }

    let mut hits: Vec<RetrievalHit> = candidates
        .into_iter()
        .filter(|(_, vec)| vec.len() == query_vec.len())
        .filter_map(|(document, vec)| {
            let score = cosine_similarity(query_vec, &vec);
            (score >= min_score).then_some(RetrievalHit { document, score })
        })
        .collect();

    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    hits.truncate(k);

    RetrievalResult { hits }
}
