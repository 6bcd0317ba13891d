//! Database statistics.
//!
//! [`collect_stats`] backs both `consult-bot stats` and `GET /admin/stats`.
//! "Today" means since 00:00 UTC. The rating average covers the last
//! seven days.

use anyhow::Result;
use chrono::{Duration, Utc};
use serde::Serialize;
use sqlx::{Row, SqlitePool};

use crate::config::Config;
use crate::db;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Stats {
    pub documents: i64,
    pub embedded_documents: i64,
    pub users: i64,
    pub dialogs_today: i64,
    pub dialogs_total: i64,
    pub leads_today: i64,
    pub leads_total: i64,
    pub leads_by_status: Vec<StatusCount>,
    pub ratings_total: i64,
    /// `None` when nothing was rated in the window.
    pub average_rating_7d: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusCount {
    pub status: String,
    pub count: i64,
}

fn start_of_today() -> i64 {
    let now = Utc::now();
    now.date_naive()
        .and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc().timestamp())
        .unwrap_or_else(|| now.timestamp())
}

async fn count(pool: &SqlitePool, sql: &str) -> Result<i64> {
    Ok(sqlx::query_scalar(sql).fetch_one(pool).await?)
}

async fn count_since(pool: &SqlitePool, sql: &str, since: i64) -> Result<i64> {
    Ok(sqlx::query_scalar(sql).bind(since).fetch_one(pool).await?)
}

pub async fn collect_stats(pool: &SqlitePool) -> Result<Stats> {
    let today = start_of_today();

    let leads_by_status = sqlx::query(
        "SELECT status, COUNT(*) AS n FROM leads GROUP BY status ORDER BY n DESC, status",
    )
    .fetch_all(pool)
    .await?
    .iter()
    .map(|row| StatusCount {
        status: row.get("status"),
        count: row.get("n"),
    })
    .collect();

    let week_ago = (Utc::now() - Duration::days(7)).timestamp();
    let average_rating_7d: Option<f64> =
        sqlx::query_scalar("SELECT AVG(score) FROM dialog_ratings WHERE created_at >= ?")
            .bind(week_ago)
            .fetch_one(pool)
            .await?;

    Ok(Stats {
        documents: count(pool, "SELECT COUNT(*) FROM documents").await?,
        embedded_documents: count(
            pool,
            "SELECT COUNT(*) FROM documents WHERE embedding IS NOT NULL",
        )
        .await?,
        users: count(pool, "SELECT COUNT(*) FROM user_profiles").await?,
        dialogs_today: count_since(
            pool,
            "SELECT COUNT(*) FROM dialog_messages WHERE created_at >= ?",
            today,
        )
        .await?,
        dialogs_total: count(pool, "SELECT COUNT(*) FROM dialog_messages").await?,
        leads_today: count_since(pool, "SELECT COUNT(*) FROM leads WHERE created_at >= ?", today)
            .await?,
        leads_total: count(pool, "SELECT COUNT(*) FROM leads").await?,
        leads_by_status,
        ratings_total: count(pool, "SELECT COUNT(*) FROM dialog_ratings").await?,
        average_rating_7d: average_rating_7d.map(|avg| (avg * 100.0).round() / 100.0),
    })
}

/// Run the stats command: query the database and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    let stats = collect_stats(&pool).await?;
    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("Consult Bot - Database Stats");
    println!("============================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!();
    println!(
        "  Documents:   {} ({} embedded)",
        stats.documents, stats.embedded_documents
    );
    println!("  Users:       {}", stats.users);
    println!(
        "  Messages:    {} today / {} total",
        stats.dialogs_today, stats.dialogs_total
    );
    println!(
        "  Leads:       {} today / {} total",
        stats.leads_today, stats.leads_total
    );
    for s in &stats.leads_by_status {
        println!("    {:<10} {}", s.status, s.count);
    }
    match stats.average_rating_7d {
        Some(avg) => println!(
            "  Ratings:     {} total, {:.2} average (7 days)",
            stats.ratings_total, avg
        ),
        None => println!("  Ratings:     {} total", stats.ratings_total),
    }

    pool.close().await;
    Ok(())
}

fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;
    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
