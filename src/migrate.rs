use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

/// Create all tables and indexes. Safe to run repeatedly.
pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply(&pool).await?;
    pool.close().await;
    Ok(())
}

pub async fn apply(pool: &SqlitePool) -> Result<()> {
    // Documents: one row per ingested chunk. `seq` is the insertion order
    // used to break similarity ties.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            id TEXT NOT NULL UNIQUE,
            filename TEXT NOT NULL,
            content TEXT NOT NULL,
            file_type TEXT,
            byte_size INTEGER,
            source_id TEXT,
            embedding BLOB,
            dims INTEGER,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS user_profiles (
            user_id INTEGER PRIMARY KEY,
            display_name TEXT,
            full_name TEXT,
            phone TEXT,
            service_code TEXT,
            history_json TEXT NOT NULL DEFAULT '[]',
            state TEXT NOT NULL DEFAULT 'idle',
            contact_attempts INTEGER NOT NULL DEFAULT 0,
            intake_count INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Databases created before intake counting lack the column.
    let has_intake_count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM pragma_table_info('user_profiles') WHERE name = 'intake_count'",
    )
    .fetch_one(pool)
    .await?;
    if has_intake_count == 0 {
        sqlx::query(
            "ALTER TABLE user_profiles ADD COLUMN intake_count INTEGER NOT NULL DEFAULT 0",
        )
        .execute(pool)
        .await?;
    }

    // Append-only audit log of every message in both directions.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS dialog_messages (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NOT NULL,
            role TEXT NOT NULL,
            text TEXT NOT NULL,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Lead ledger. The primary key claim is what makes lead creation
    // at-most-once per intake transition.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS leads (
            idempotency_key TEXT PRIMARY KEY,
            user_id INTEGER NOT NULL,
            service_code TEXT NOT NULL,
            contact_id TEXT,
            lead_id TEXT,
            status TEXT NOT NULL DEFAULT 'pending',
            attempts INTEGER NOT NULL DEFAULT 0,
            summary TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // One rating per answer; `answered_at` is in milliseconds.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS dialog_ratings (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NOT NULL,
            score INTEGER NOT NULL CHECK (score BETWEEN 1 AND 5),
            question TEXT NOT NULL,
            answer TEXT NOT NULL,
            service_code TEXT,
            answered_at INTEGER NOT NULL,
            created_at INTEGER NOT NULL,
            UNIQUE(user_id, answered_at)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_dialog_messages_user ON dialog_messages(user_id, id)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_dialog_messages_created ON dialog_messages(created_at DESC)",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_leads_created ON leads(created_at DESC)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_dialog_ratings_created ON dialog_ratings(created_at DESC)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
