//! In-memory store implementations for tests and local experiments.
//!
//! Uses `HashMap` and `Vec` behind `std::sync::RwLock`. Vector search is a
//! brute-force scan through [`rank_candidates`], the same ranking the SQLite
//! backend uses.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::models::{
    DialogEntry, LeadRecord, NewDocument, RatingRecord, RetrievalResult, StoredDocument, UserId,
    UserProfile,
};

use super::{rank_candidates, DocumentStore, ProfileStore};

struct StoredVector {
    document: StoredDocument,
    vector: Vec<f32>,
}

/// In-memory [`DocumentStore`].
pub struct InMemoryDocumentStore {
    dims: Option<usize>,
    docs: RwLock<Vec<StoredVector>>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self {
            dims: None,
            docs: RwLock::new(Vec::new()),
        }
    }

    /// Reject embeddings whose length differs from `dims`.
    pub fn with_dims(dims: usize) -> Self {
        Self {
            dims: Some(dims),
            docs: RwLock::new(Vec::new()),
        }
    }
}

impl Default for InMemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn add(&self, doc: &NewDocument, embedding: &[f32]) -> Result<String> {
        if let Some(dims) = self.dims {
            if embedding.len() != dims {
                anyhow::bail!(
                    "embedding has {} dimensions, store expects {}",
                    embedding.len(),
                    dims
                );
            }
        }
        let mut docs = self.docs.write().map_err(|_| anyhow!("document store poisoned"))?;
        let now = Utc::now();
        let id = Uuid::new_v4().to_string();
        let seq = docs.len() as i64 + 1;
        docs.push(StoredVector {
            document: StoredDocument {
                id: id.clone(),
                seq,
                filename: doc.filename.clone(),
                content: doc.content.clone(),
                file_type: doc.file_type.clone(),
                byte_size: doc.byte_size,
                source_id: doc.source_id.clone(),
                created_at: now,
                updated_at: now,
            },
            vector: embedding.to_vec(),
        });
        Ok(id)
    }

    async fn search(
        &self,
        query_vec: &[f32],
        k: usize,
        min_score: f32,
    ) -> Result<RetrievalResult> {
        let docs = self.docs.read().map_err(|_| anyhow!("document store poisoned"))?;
        let candidates = docs
            .iter()
            .map(|sv| (sv.document.clone(), sv.vector.clone()));
        Ok(rank_candidates(query_vec, candidates, k, min_score))
    }

    async fn count(&self) -> Result<i64> {
        let docs = self.docs.read().map_err(|_| anyhow!("document store poisoned"))?;
        Ok(docs.len() as i64)
    }
}

/// In-memory [`ProfileStore`]. Exposes its audit log and lead ledger for
/// assertions in tests.
#[derive(Default)]
pub struct InMemoryProfileStore {
    profiles: RwLock<HashMap<UserId, UserProfile>>,
    dialogs: RwLock<Vec<DialogEntry>>,
    leads: RwLock<HashMap<String, LeadRecord>>,
    ratings: RwLock<Vec<RatingRecord>>,
}

impl InMemoryProfileStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dialogs(&self) -> Vec<DialogEntry> {
        self.dialogs.read().map(|d| d.clone()).unwrap_or_default()
    }

    pub fn leads(&self) -> Vec<LeadRecord> {
        self.leads
            .read()
            .map(|l| l.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn ratings(&self) -> Vec<RatingRecord> {
        self.ratings.read().map(|r| r.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl ProfileStore for InMemoryProfileStore {
    async fn load_or_create(&self, user_id: UserId) -> Result<UserProfile> {
        let mut profiles = self.profiles.write().map_err(|_| anyhow!("profile store poisoned"))?;
        Ok(profiles
            .entry(user_id)
            .or_insert_with(|| UserProfile::new(user_id, Utc::now()))
            .clone())
    }

    async fn save(&self, profile: &UserProfile) -> Result<()> {
        let mut profiles = self.profiles.write().map_err(|_| anyhow!("profile store poisoned"))?;
        profiles.insert(profile.user_id, profile.clone());
        Ok(())
    }

    async fn log_dialog(&self, entry: &DialogEntry) -> Result<()> {
        let mut dialogs = self.dialogs.write().map_err(|_| anyhow!("dialog log poisoned"))?;
        dialogs.push(entry.clone());
        Ok(())
    }

    async fn claim_lead(&self, key: &str, _user_id: UserId, _service_code: &str) -> Result<bool> {
        let mut leads = self.leads.write().map_err(|_| anyhow!("lead ledger poisoned"))?;
        if leads.contains_key(key) {
            return Ok(false);
        }
        leads.insert(
            key.to_string(),
            LeadRecord {
                idempotency_key: key.to_string(),
                status: crate::models::LeadStatus::Pending,
                contact_id: None,
                lead_id: None,
                attempts: 0,
                summary: None,
            },
        );
        Ok(true)
    }

    async fn finish_lead(&self, record: &LeadRecord) -> Result<()> {
        let mut leads = self.leads.write().map_err(|_| anyhow!("lead ledger poisoned"))?;
        leads.insert(record.idempotency_key.clone(), record.clone());
        Ok(())
    }

    async fn record_rating(&self, rating: &RatingRecord) -> Result<()> {
        let mut ratings = self.ratings.write().map_err(|_| anyhow!("rating log poisoned"))?;
        ratings.retain(|r| !(r.user_id == rating.user_id && r.answered_at == rating.answered_at));
        ratings.push(rating.clone());
        Ok(())
    }
}
