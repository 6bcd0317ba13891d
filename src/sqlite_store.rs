//! SQLite-backed [`DocumentStore`] and [`ProfileStore`].
//!
//! Embeddings are little-endian `f32` BLOBs; similarity is computed in Rust
//! over every embedded row in `seq` order, which keeps ranking exact and
//! identical across calls. Profiles are upserted whole, with memory stored as
//! a JSON array.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use consult_core::embedding::{blob_to_vec, vec_to_blob};
use consult_core::models::{
    ConversationTurn, DialogEntry, LeadRecord, NewDocument, RatingRecord, RetrievalResult,
    SessionState, StoredDocument, UserId, UserProfile,
};
use consult_core::store::{rank_candidates, DocumentStore, ProfileStore};

pub struct SqliteStore {
    pool: SqlitePool,
    dims: Option<usize>,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool, dims: None }
    }

    /// Reject embeddings whose length differs from the configured model.
    pub fn with_dims(pool: SqlitePool, dims: Option<usize>) -> Self {
        Self { pool, dims }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn ts_to_datetime(ts: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(ts, 0).single().unwrap_or_default()
}

#[async_trait]
impl DocumentStore for SqliteStore {
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

        // Every stored vector must share one dimension.
        let existing: Option<i64> = sqlx::query_scalar::<_, Option<i64>>(
            "SELECT dims FROM documents WHERE dims IS NOT NULL LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?
        .flatten();
        if let Some(existing) = existing {
            if existing as usize != embedding.len() {
                anyhow::bail!(
                    "embedding has {} dimensions, existing documents have {}",
                    embedding.len(),
                    existing
                );
            }
        }

        let id = Uuid::new_v4().to_string();
        let now = Utc::now().timestamp();
        sqlx::query(
            r#"
            INSERT INTO documents (id, filename, content, file_type, byte_size, source_id,
                                   embedding, dims, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(&doc.filename)
        .bind(&doc.content)
        .bind(&doc.file_type)
        .bind(doc.byte_size)
        .bind(&doc.source_id)
        .bind(vec_to_blob(embedding))
        .bind(embedding.len() as i64)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to insert document {}", doc.filename))?;

        Ok(id)
    }

    async fn search(
        &self,
        query_vec: &[f32],
        k: usize,
        min_score: f32,
    ) -> Result<RetrievalResult> {
        let rows = sqlx::query(
            r#"
            SELECT seq, id, filename, content, file_type, byte_size, source_id,
                   embedding, created_at, updated_at
            FROM documents
            WHERE embedding IS NOT NULL
            ORDER BY seq ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let candidates = rows.iter().map(|row| {
            let blob: Vec<u8> = row.get("embedding");
            let doc = StoredDocument {
                id: row.get("id"),
                seq: row.get("seq"),
                filename: row.get("filename"),
                content: row.get("content"),
                file_type: row.get("file_type"),
                byte_size: row.get("byte_size"),
                source_id: row.get("source_id"),
                created_at: ts_to_datetime(row.get("created_at")),
                updated_at: ts_to_datetime(row.get("updated_at")),
            };
            (doc, blob_to_vec(&blob))
        });

        Ok(rank_candidates(query_vec, candidates, k, min_score))
    }

    async fn count(&self) -> Result<i64> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents")
            .fetch_one(&self.pool)
            .await?;
        Ok(n)
    }
}

#[async_trait]
impl ProfileStore for SqliteStore {
    async fn load_or_create(&self, user_id: UserId) -> Result<UserProfile> {
        let now = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO user_profiles (user_id, created_at, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(user_id) DO NOTHING
            "#,
        )
        .bind(user_id)
        .bind(now.timestamp())
        .bind(now.timestamp())
        .execute(&self.pool)
        .await?;

        let row = sqlx::query(
            r#"
            SELECT user_id, display_name, full_name, phone, service_code, history_json,
                   state, contact_attempts, intake_count, created_at, updated_at
            FROM user_profiles WHERE user_id = ?
            "#,
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        let history_json: String = row.get("history_json");
        let history: Vec<ConversationTurn> = serde_json::from_str(&history_json)
            .with_context(|| format!("Corrupt conversation history for user {}", user_id))?;
        let state_str: String = row.get("state");
        let state = SessionState::parse(&state_str).unwrap_or_else(|| {
            tracing::warn!(user_id, state = %state_str, "unknown stored state, resetting to idle");
            SessionState::Idle
        });
        let attempts: i64 = row.get("contact_attempts");
        let intakes: i64 = row.get("intake_count");

        Ok(UserProfile {
            user_id: row.get("user_id"),
            display_name: row.get("display_name"),
            full_name: row.get("full_name"),
            phone: row.get("phone"),
            service_code: row.get("service_code"),
            history,
            state,
            contact_attempts: attempts.max(0) as u32,
            intake_count: intakes.max(0) as u32,
            created_at: ts_to_datetime(row.get("created_at")),
            updated_at: ts_to_datetime(row.get("updated_at")),
        })
    }

    async fn save(&self, profile: &UserProfile) -> Result<()> {
        let history_json = serde_json::to_string(&profile.history)?;
        sqlx::query(
            r#"
            INSERT INTO user_profiles (user_id, display_name, full_name, phone, service_code,
                                       history_json, state, contact_attempts, intake_count,
                                       created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(user_id) DO UPDATE SET
                display_name = excluded.display_name,
                full_name = excluded.full_name,
                phone = excluded.phone,
                service_code = excluded.service_code,
                history_json = excluded.history_json,
                state = excluded.state,
                contact_attempts = excluded.contact_attempts,
                intake_count = excluded.intake_count,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(profile.user_id)
        .bind(&profile.display_name)
        .bind(&profile.full_name)
        .bind(&profile.phone)
        .bind(&profile.service_code)
        .bind(history_json)
        .bind(profile.state.as_str())
        .bind(profile.contact_attempts as i64)
        .bind(profile.intake_count as i64)
        .bind(profile.created_at.timestamp())
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn log_dialog(&self, entry: &DialogEntry) -> Result<()> {
        sqlx::query(
            "INSERT INTO dialog_messages (user_id, role, text, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(entry.user_id)
        .bind(entry.role.as_str())
        .bind(&entry.text)
        .bind(entry.created_at.timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn claim_lead(&self, key: &str, user_id: UserId, service_code: &str) -> Result<bool> {
        let now = Utc::now().timestamp();
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO leads (idempotency_key, user_id, service_code, status,
                                         created_at, updated_at)
            VALUES (?, ?, ?, 'pending', ?, ?)
            "#,
        )
        .bind(key)
        .bind(user_id)
        .bind(service_code)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn finish_lead(&self, record: &LeadRecord) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE leads SET contact_id = ?, lead_id = ?, status = ?, attempts = ?,
                             summary = ?, updated_at = ?
            WHERE idempotency_key = ?
            "#,
        )
        .bind(&record.contact_id)
        .bind(&record.lead_id)
        .bind(record.status.as_str())
        .bind(record.attempts as i64)
        .bind(&record.summary)
        .bind(Utc::now().timestamp())
        .bind(&record.idempotency_key)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn record_rating(&self, rating: &RatingRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO dialog_ratings (user_id, score, question, answer, service_code,
                                        answered_at, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(user_id, answered_at) DO UPDATE SET
                score = excluded.score,
                created_at = excluded.created_at
            "#,
        )
        .bind(rating.user_id)
        .bind(rating.score as i64)
        .bind(&rating.question)
        .bind(&rating.answer)
        .bind(&rating.service_code)
        .bind(rating.answered_at.timestamp_millis())
        .bind(rating.created_at.timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
