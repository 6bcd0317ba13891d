//! # Consult Bot CLI (`consult-bot`)
//!
//! ## Usage
//!
//! ```bash
//! consult-bot --config ./config/bot.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `consult-bot init` | Create the SQLite database and run schema migrations |
//! | `consult-bot ingest` | Ingest the knowledge base from `[ingest].root` |
//! | `consult-bot search "<query>"` | Show the documents retrieval would use |
//! | `consult-bot ask "<message>"` | Send one message through the engine as a user |
//! | `consult-bot stats` | Print message, lead and document counters |
//! | `consult-bot serve` | Run the Telegram bot and the admin API |
//!
//! Secrets come from the environment (or a `.env` file):
//! `TELEGRAM_BOT_TOKEN`, `OPENAI_API_KEY`, `BITRIX24_WEBHOOK_URL`, `ADMIN_TOKEN`.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use consult_bot::{bot, config, db, ingest, logging, migrate, search, server, sqlite_store, stats};

/// Telegram consulting bot: service intake, CRM leads and grounded answers.
#[derive(Parser)]
#[command(name = "consult-bot", version)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/bot.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all tables. Safe to run
    /// repeatedly.
    Init,

    /// Ingest knowledge-base files.
    ///
    /// Walks `[ingest].root`, extracts text from Markdown, text, PDF and
    /// DOCX files, chunks and embeds it, and stores one document per chunk.
    Ingest {
        /// Count files and chunks without embedding or writing anything.
        #[arg(long)]
        dry_run: bool,
    },

    /// Search the knowledge base.
    Search {
        query: String,

        /// Maximum number of results (defaults to `[retrieval].top_k`).
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Send one message through the conversation engine and print the reply.
    ///
    /// Commands (`/start`, `/cancel`, ...) work too. Manager notifications
    /// are not sent.
    Ask {
        message: String,

        /// User id to act as.
        #[arg(long, default_value_t = 0)]
        user: i64,
    },

    /// Show database statistics.
    Stats,

    /// Run the Telegram bot.
    ///
    /// The admin API is served on `[server].bind` as well when `ADMIN_TOKEN`
    /// is set.
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            eprintln!("Warning: could not load .env file: {}", e);
        }
    }

    let cfg = config::load_config(&cli.config)?;
    logging::init(&cfg.logging.level);

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Ingest { dry_run } => {
            ingest::run_ingest(&cfg, dry_run).await?;
        }
        Commands::Search { query, limit } => {
            search::run_search(&cfg, &query, limit).await?;
        }
        Commands::Ask { message, user } => {
            search::run_ask(&cfg, &message, user).await?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
        Commands::Serve => serve(&cfg).await?,
    }

    Ok(())
}

async fn serve(cfg: &config::Config) -> Result<()> {
    let pool = db::connect(cfg).await?;
    migrate::apply(&pool).await?;
    let store = Arc::new(sqlite_store::SqliteStore::with_dims(
        pool.clone(),
        cfg.embedding.dims,
    ));

    if cfg.secrets.admin_token.is_some() {
        let admin_cfg = cfg.clone();
        let admin_pool = pool.clone();
        tokio::spawn(async move {
            if let Err(e) = server::run_admin_server(&admin_cfg, admin_pool).await {
                tracing::error!(error = %format!("{:#}", e), "admin server stopped");
            }
        });
    } else {
        tracing::warn!("ADMIN_TOKEN not set, admin API disabled");
    }

    bot::run_bot(cfg, store).await?;
    pool.close().await;
    Ok(())
}
