//! SQLite store tests against a fresh database in a temp directory.

use chrono::Utc;
use consult_bot::config::parse_config;
use consult_bot::sqlite_store::SqliteStore;
use consult_bot::{db, migrate, stats};
use consult_core::models::{
    ConversationTurn, DialogEntry, LeadRecord, LeadStatus, NewDocument, RatingRecord, Role,
    SessionState,
};
use consult_core::store::{DocumentStore, ProfileStore};
use tempfile::TempDir;

async fn open_store(dims: Option<usize>) -> (TempDir, SqliteStore) {
    let tmp = TempDir::new().unwrap();
    let config = parse_config(&format!(
        "[db]\npath = \"{}/data/bot.sqlite\"\n",
        tmp.path().display()
    ))
    .unwrap();
    let pool = db::connect(&config).await.unwrap();
    migrate::apply(&pool).await.unwrap();
    // Migrations are idempotent.
    migrate::apply(&pool).await.unwrap();
    (tmp, SqliteStore::with_dims(pool, dims))
}

fn doc(name: &str) -> NewDocument {
    NewDocument {
        filename: name.to_string(),
        content: format!("contents of {}", name),
        file_type: Some("md".to_string()),
        byte_size: Some(42),
        source_id: Some(name.to_string()),
    }
}

#[tokio::test]
async fn test_search_orders_by_score_then_insertion() {
    let (_tmp, store) = open_store(Some(2)).await;
    store.add(&doc("a.md#0"), &[1.0, 0.0]).await.unwrap();
    store.add(&doc("b.md#0"), &[0.6, 0.8]).await.unwrap();
    store.add(&doc("c.md#0"), &[2.0, 0.0]).await.unwrap();
    store.add(&doc("d.md#0"), &[0.0, 1.0]).await.unwrap();
    assert_eq!(store.count().await.unwrap(), 4);

    let result = store.search(&[1.0, 0.0], 10, 0.5).await.unwrap();
    let names: Vec<&str> = result
        .hits
        .iter()
        .map(|h| h.document.filename.as_str())
        .collect();
    // a and c tie at 1.0; a was inserted first.
    assert_eq!(names, vec!["a.md#0", "c.md#0", "b.md#0"]);
    assert!(result.hits.iter().all(|h| h.score >= 0.5));

    let top1 = store.search(&[1.0, 0.0], 1, 0.5).await.unwrap();
    assert_eq!(top1.len(), 1);
    assert_eq!(top1.hits[0].document.filename, "a.md#0");

    let strict = store.search(&[1.0, 0.0], 3, 0.99).await.unwrap();
    assert_eq!(strict.len(), 2);
    let none = store.search(&[-1.0, 0.0], 3, 0.1).await.unwrap();
    assert!(none.is_empty());
}

#[tokio::test]
async fn test_add_rejects_dimension_mismatch() {
    let (_tmp, store) = open_store(Some(3)).await;
    let err = store.add(&doc("x.md#0"), &[1.0, 0.0]).await.unwrap_err();
    assert!(err.to_string().contains("dimensions"));

    let (_tmp2, unchecked) = open_store(None).await;
    unchecked.add(&doc("x.md#0"), &[1.0, 0.0]).await.unwrap();
    let err = unchecked
        .add(&doc("y.md#0"), &[1.0, 0.0, 0.0])
        .await
        .unwrap_err();
    assert!(err.to_string().contains("existing documents"));
}

#[tokio::test]
async fn test_profile_round_trip() {
    let (_tmp, store) = open_store(None).await;

    let mut profile = store.load_or_create(7).await.unwrap();
    assert_eq!(profile.state, SessionState::Idle);
    assert!(profile.history.is_empty());

    profile.display_name = Some("Anna".into());
    profile.full_name = Some("Anna Muller".into());
    profile.phone = Some("+41791112233".into());
    profile.service_code = Some("relocation".into());
    profile.state = SessionState::Active;
    profile.intake_count = 2;
    profile.history.push(ConversationTurn {
        role: Role::User,
        text: "How long does relocation take?".into(),
        timestamp: Utc::now(),
    });
    store.save(&profile).await.unwrap();

    let loaded = store.load_or_create(7).await.unwrap();
    assert_eq!(loaded.state, SessionState::Active);
    assert_eq!(loaded.full_name.as_deref(), Some("Anna Muller"));
    assert_eq!(loaded.service_code.as_deref(), Some("relocation"));
    assert_eq!(loaded.intake_count, 2);
    assert_eq!(loaded.history.len(), 1);
    assert_eq!(loaded.history[0].text, "How long does relocation take?");

    // A second load never creates a second profile.
    store.load_or_create(7).await.unwrap();
    let users: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM user_profiles")
        .fetch_one(store.pool())
        .await
        .unwrap();
    assert_eq!(users, 1);
}

#[tokio::test]
async fn test_lead_claim_is_exclusive() {
    let (_tmp, store) = open_store(None).await;
    assert!(store.claim_lead("k1", 7, "crypto").await.unwrap());
    assert!(!store.claim_lead("k1", 7, "crypto").await.unwrap());
    assert!(store.claim_lead("k2", 7, "crypto").await.unwrap());

    store
        .finish_lead(&LeadRecord {
            idempotency_key: "k1".into(),
            status: LeadStatus::Notified,
            contact_id: Some("C1".into()),
            lead_id: Some("L1".into()),
            attempts: 2,
            summary: Some("Service: Crypto Assets".into()),
        })
        .await
        .unwrap();

    let (status, lead_id, attempts): (String, Option<String>, i64) = sqlx::query_as(
        "SELECT status, lead_id, attempts FROM leads WHERE idempotency_key = 'k1'",
    )
    .fetch_one(store.pool())
    .await
    .unwrap();
    assert_eq!(status, "notified");
    assert_eq!(lead_id.as_deref(), Some("L1"));
    assert_eq!(attempts, 2);
}

#[tokio::test]
async fn test_stats_count_dialogs_and_leads() {
    let (_tmp, store) = open_store(None).await;
    store.load_or_create(1).await.unwrap();
    for role in [Role::User, Role::Assistant] {
        store
            .log_dialog(&DialogEntry {
                user_id: 1,
                role,
                text: "hi".into(),
                created_at: Utc::now(),
            })
            .await
            .unwrap();
    }
    store.claim_lead("k", 1, "hnwi").await.unwrap();
    store.add(&doc("a.md#0"), &[1.0]).await.unwrap();

    let s = stats::collect_stats(store.pool()).await.unwrap();
    assert_eq!(s.users, 1);
    assert_eq!(s.dialogs_total, 2);
    assert_eq!(s.dialogs_today, 2);
    assert_eq!(s.leads_total, 1);
    assert_eq!(s.leads_today, 1);
    assert_eq!(s.documents, 1);
    assert_eq!(s.embedded_documents, 1);
    assert_eq!(s.leads_by_status[0].status, "pending");
    assert_eq!(s.ratings_total, 0);
    assert_eq!(s.average_rating_7d, None);
}

#[tokio::test]
async fn test_ratings_one_per_answer_and_averaged() {
    let (_tmp, store) = open_store(None).await;
    let first_answer = Utc::now();
    let second_answer = first_answer + chrono::Duration::milliseconds(1);
    let rating = |score: u8, answered_at| RatingRecord {
        user_id: 5,
        score,
        question: "Do you handle custody?".into(),
        answer: "Yes, through partner banks.".into(),
        service_code: Some("crypto".into()),
        answered_at,
        created_at: Utc::now(),
    };

    store.record_rating(&rating(1, first_answer)).await.unwrap();
    // Rating the same answer again replaces the score.
    store.record_rating(&rating(4, first_answer)).await.unwrap();
    store.record_rating(&rating(5, second_answer)).await.unwrap();

    let scores: Vec<i64> = sqlx::query_scalar("SELECT score FROM dialog_ratings ORDER BY answered_at")
        .fetch_all(store.pool())
        .await
        .unwrap();
    assert_eq!(scores, vec![4, 5]);

    let s = stats::collect_stats(store.pool()).await.unwrap();
    assert_eq!(s.ratings_total, 2);
    assert_eq!(s.average_rating_7d, Some(4.5));
}

#[tokio::test]
async fn test_migration_adds_intake_count_to_old_profiles_table() {
    let tmp = TempDir::new().unwrap();
    let config = parse_config(&format!(
        "[db]\npath = \"{}/old.sqlite\"\n",
        tmp.path().display()
    ))
    .unwrap();
    let pool = db::connect(&config).await.unwrap();
    sqlx::query(
        "CREATE TABLE user_profiles (user_id INTEGER PRIMARY KEY, display_name TEXT, \
         full_name TEXT, phone TEXT, service_code TEXT, \
         history_json TEXT NOT NULL DEFAULT '[]', state TEXT NOT NULL DEFAULT 'idle', \
         contact_attempts INTEGER NOT NULL DEFAULT 0, created_at INTEGER NOT NULL, \
         updated_at INTEGER NOT NULL)",
    )
    .execute(&pool)
    .await
    .unwrap();
    sqlx::query("INSERT INTO user_profiles (user_id, created_at, updated_at) VALUES (9, 0, 0)")
        .execute(&pool)
        .await
        .unwrap();

    migrate::apply(&pool).await.unwrap();
    let store = SqliteStore::new(pool);
    let profile = store.load_or_create(9).await.unwrap();
    assert_eq!(profile.intake_count, 0);
}
