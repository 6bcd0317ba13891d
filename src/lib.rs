//! # Consult Bot
//!
//! A Telegram bot for a consulting firm. It walks prospective clients
//! through a service menu, collects their contact details, files a lead in
//! the CRM and notifies managers, and answers free-text questions from an
//! ingested knowledge base.
//!
//! The conversation logic (session state machine, memory, retrieval, answer
//! composition) lives in the `consult-core` crate. This crate wires it to
//! real collaborators: SQLite, OpenAI/Ollama embeddings, OpenAI chat,
//! Bitrix24 and the Telegram Bot API.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌──────────┐   ┌──────────────────────────┐   ┌──────────┐
//! │  Telegram  │──▶│  Router  │──▶│          Engine          │──▶│  SQLite  │
//! │ getUpdates │   │ per user │   │ SessionMachine, Composer │   │          │
//! └────────────┘   └──────────┘   └────────────┬─────────────┘   └──────────┘
//!                                              │ lead tickets
//!                                              ▼
//!                                 ┌──────────────────────────┐
//!                                 │ Bitrix24 + manager chats │
//!                                 └──────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration and environment secrets |
//! | [`db`] / [`migrate`] | SQLite pool and schema |
//! | [`sqlite_store`] | SQLite document and profile stores |
//! | [`embedding`] / [`generation`] | Model provider clients |
//! | [`crm`] / [`notify`] / [`telegram`] | External collaborators |
//! | [`retry`] | Bounded retry with backoff |
//! | [`engine`] | Per-user message handling and lead delivery |
//! | [`documents`] | Files sent on request |
//! | [`router`] / [`bot`] | Per-user ordering and the long-poll loop |
//! | [`ingest`] / [`extract`] | Knowledge-base ingestion |
//! | [`server`] / [`stats`] | Read-only admin API and counters |

pub mod bot;
pub mod config;
pub mod crm;
pub mod db;
pub mod documents;
pub mod embedding;
pub mod engine;
pub mod extract;
pub mod generation;
pub mod ingest;
pub mod logging;
pub mod migrate;
pub mod notify;
pub mod retry;
pub mod router;
pub mod search;
pub mod server;
pub mod sqlite_store;
pub mod stats;
pub mod telegram;
