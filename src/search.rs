//! `consult-bot search` and `consult-bot ask`.
//!
//! `search` runs the retriever alone and prints the ranked excerpts, which is
//! the quickest way to tune `top_k` and `min_score`. `ask` pushes a message
//! through the full engine as a given user, exactly as if it had arrived over
//! Telegram, and prints the replies.

use anyhow::{bail, Result};
use std::sync::Arc;

use consult_core::models::RetrievalHit;
use consult_core::retrieve::Retriever;
use consult_core::session::Inbound;

use crate::config::Config;
use crate::db;
use crate::embedding::create_embedder;
use crate::engine::{Engine, InboundMessage, LeadOutcome};
use crate::sqlite_store::SqliteStore;

const EXCERPT_CHARS: usize = 160;

pub async fn run_search(config: &Config, query: &str, limit: Option<usize>) -> Result<()> {
    if query.trim().is_empty() {
        println!("No results.");
        return Ok(());
    }
    if !config.embedding.is_enabled() {
        bail!("Search requires embeddings. Set [embedding] provider in config.");
    }

    let pool = db::connect(config).await?;
    let store = Arc::new(SqliteStore::with_dims(pool.clone(), config.embedding.dims));
    let settings = config.retrieval_settings();
    let retriever = Retriever::new(create_embedder(config)?, store, settings);

    let result = retriever
        .retrieve_with(query, limit.unwrap_or(settings.top_k), settings.min_score)
        .await?;

    if result.is_empty() {
        println!("No results.");
    }
    for (i, hit) in result.hits.iter().enumerate() {
        print_hit(i + 1, hit);
    }

    pool.close().await;
    Ok(())
}

fn print_hit(rank: usize, hit: &RetrievalHit) {
    let doc = &hit.document;
    let excerpt: String = doc
        .content
        .replace('\n', " ")
        .chars()
        .take(EXCERPT_CHARS)
        .collect();
    println!("{}. [{:.2}] {}", rank, hit.score, doc.filename);
    if let Some(source) = &doc.source_id {
        println!("    source: {}", source);
    }
    println!("    excerpt: \"{}\"", excerpt.trim());
    println!("    id: {}", doc.id);
    println!();
}

/// Handle one message as `user_id` and print what the bot would send.
/// Manager notifications are not sent from the CLI.
pub async fn run_ask(config: &Config, message: &str, user_id: i64) -> Result<()> {
    let pool = db::connect(config).await?;
    let store = Arc::new(SqliteStore::with_dims(pool.clone(), config.embedding.dims));
    let engine = Engine::from_config(config, store, None)?;

    let outcome = engine
        .handle_message(InboundMessage {
            user_id,
            display_name: None,
            inbound: Inbound::from_text(message),
        })
        .await?;

    for reply in &outcome.replies {
        println!("{}", reply.text);
        for row in &reply.buttons {
            let labels: Vec<&str> = row.iter().map(|b| b.label.as_str()).collect();
            println!("  [{}]", labels.join("] ["));
        }
        println!();
    }
    for path in &outcome.documents {
        println!("(document: {})", path.display());
    }
    if let Some(grounded) = outcome.grounded {
        println!("(grounded: {})", grounded);
    }

    if let Some(ticket) = outcome.lead {
        let report = engine.deliver_lead(&ticket).await;
        match &report.outcome {
            LeadOutcome::Delivered { lead_id, .. } => println!(
                "lead {} recorded (CRM id: {})",
                report.idempotency_key,
                lead_id.as_deref().unwrap_or("-")
            ),
            LeadOutcome::Duplicate => println!("lead {} already recorded", report.idempotency_key),
            LeadOutcome::CrmFailed { error, .. } => {
                println!("lead {} failed: {}", report.idempotency_key, error)
            }
            LeadOutcome::NotifyFailed { error, .. } => {
                println!("lead {} created, notification failed: {}", report.idempotency_key, error)
            }
        }
    }

    pool.close().await;
    Ok(())
}
