//! # Consult Core
//!
//! Runtime-independent logic for the consulting bot: data models, error
//! kinds, chunking, the embedding and storage traits, conversation memory,
//! retrieval, answer composition, contact parsing, document matching and the
//! intake session state machine.
//!
//! This crate contains no tokio, sqlx, HTTP or filesystem I/O. Concrete
//! providers and the SQLite store live in the `consult-bot` application crate
//! and plug in through the traits defined here.
//!
//! | Module | Role |
//! |--------|------|
//! | [`models`] | Documents, profiles, turns, leads |
//! | [`store`] | `DocumentStore` / `ProfileStore` traits, in-memory backends |
//! | [`retrieve`] | Embed + top-k search |
//! | [`compose`] | Grounded answers and lead summaries |
//! | [`session`] | Intake state machine |
//! | [`documents`] | Keyword matching for requested files |

pub mod catalog;
pub mod chunk;
pub mod compose;
pub mod contact;
pub mod documents;
pub mod embedding;
pub mod error;
pub mod memory;
pub mod models;
pub mod retrieve;
pub mod session;
pub mod store;
