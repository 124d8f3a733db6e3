//! # tally-ingest
//!
//! The ledger ingestion engine for the tally platform.
//!
//! External producers publish payment facts onto Kafka topics:
//! settlements paid to creators, finalized referrals, attention votes
//! from auto-contribution, and grant-funded suggestions. This crate
//! consumes them, converts each into immutable double-entry ledger
//! rows, and persists them idempotently into Postgres, while a periodic
//! freeze pass settles accumulated vote ballots into ledger rows of
//! their own.
//!
//! ## Pipeline
//!
//! - [`consumer`]: one worker per topic under a supervising
//!   coordinator; offsets commit in lockstep with database batches.
//! - [`schema`]: versioned wire decoding, newest version first, with
//!   aggregate errors when nothing matches.
//! - [`models`]: typed events and their expansion into ledger rows.
//! - [`surveyors`]: ballot staging and the surveyor freeze job.
//! - [`store`]: the [`store::LedgerStore`] trait with Postgres and
//!   in-memory implementations.
//! - [`producer`]: newest-version encoding for upstream callers and
//!   replay tooling.
//!
//! Redelivered messages are harmless by construction: every ledger row
//! id is a deterministic UUIDv5 of its event's natural key, and inserts
//! are insert-or-ignore.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod config;
pub mod consumer;
pub mod error;
pub mod metrics;
pub mod models;
pub mod producer;
pub mod rates;
pub mod schema;
pub mod store;
pub mod surveyors;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::config::IngestConfig;
    pub use crate::consumer::{Coordinator, TopicKind};
    pub use crate::error::{Error, Result};
    pub use crate::models::{convert_to_transactions, Convertable, LedgerTransaction};
    pub use crate::store::{LedgerStore, MemoryStore, PgStore, StoreBatch};
    pub use crate::surveyors::FreezeScheduler;
}
