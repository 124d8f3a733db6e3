//! Storage abstraction for the ledger.
//!
//! [`LedgerStore`] is the read side plus the freeze pass;
//! [`StoreBatch`] is an explicit write session. A batch holds a real
//! database transaction: nothing staged through it is visible until
//! `commit`, and dropping a batch without committing rolls everything
//! back. The consumer relies on that to keep one Kafka batch equal to
//! one atomic set of ledger writes.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;
use crate::models::{Ballot, LedgerTransaction, Surveyor};

/// A referral pricing group for a set of countries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CountryGroup {
    /// Group id referenced by referral events.
    pub id: Uuid,
    /// Human-readable group name.
    pub name: String,
    /// Credit per referral, in `currency` units.
    pub amount: Decimal,
    /// Currency the credit is quoted in.
    pub currency: String,
    /// When the group became active.
    pub active_at: DateTime<Utc>,
}

/// Inputs to one freeze pass.
#[derive(Debug, Clone, Copy)]
pub struct FreezeParams {
    /// The pass's notion of now; freezability cutoffs derive from it.
    pub now: DateTime<Utc>,
    /// Days a non-virtual surveyor ages past its creation date before
    /// freezing.
    pub lag_days: i64,
    /// Fraction of each ballot's value routed to the fees account.
    pub fee_fraction: Decimal,
    /// Sanity ceiling forwarded to settlement conversion, in whole
    /// base-currency units.
    pub max_amount: Decimal,
}

/// What one freeze pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FreezeOutcome {
    /// Surveyors frozen by this pass.
    pub frozen_surveyors: Vec<String>,
    /// Ledger rows actually inserted from settled ballots.
    pub rows_inserted: u64,
}

/// An atomic write session against the ledger.
///
/// Writes staged through a batch become visible only at `commit`.
/// Dropping a batch without committing discards everything.
#[async_trait]
pub trait StoreBatch: Send {
    /// Inserts ledger rows, skipping ids that already exist.
    ///
    /// Returns the number of rows actually inserted.
    async fn insert_transactions(&mut self, rows: &[LedgerTransaction]) -> Result<u64>;

    /// Inserts surveyors, skipping ids that already exist. Existing
    /// surveyors keep their price and frozen state.
    async fn insert_surveyors(&mut self, surveyors: &[Surveyor]) -> Result<()>;

    /// Upserts ballots, accumulating tallies into existing rows.
    async fn upsert_ballots(&mut self, ballots: &[Ballot]) -> Result<()>;

    /// Reads surveyors by id, seeing both committed state and writes
    /// staged in this batch.
    async fn surveyors_by_id(&mut self, ids: &[String]) -> Result<Vec<Surveyor>>;

    /// Commits every staged write atomically.
    async fn commit(self: Box<Self>) -> Result<()>;
}

/// The ledger store.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Opens an atomic write session.
    async fn begin(&self) -> Result<Box<dyn StoreBatch>>;

    /// Reads ledger rows by id.
    async fn transactions_by_id(&self, ids: &[Uuid]) -> Result<Vec<LedgerTransaction>>;

    /// Reads ballots by id.
    async fn ballots_by_id(&self, ids: &[Uuid]) -> Result<Vec<Ballot>>;

    /// Reads surveyors by id.
    async fn surveyors_by_id(&self, ids: &[String]) -> Result<Vec<Surveyor>>;

    /// Returns the currently active referral country groups.
    async fn active_country_groups(&self) -> Result<Vec<CountryGroup>>;

    /// Runs one freeze pass in a single atomic transaction.
    ///
    /// Selects every open surveyor past its cutoff, marks it frozen,
    /// computes the value of its ballots exactly once, aggregates them
    /// per (channel, surveyor), and inserts the resulting ledger rows.
    /// Either every effect lands or none does.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::Error::SurveyorMismatch`] if a settled
    /// ballot references a surveyor the store does not know; the pass
    /// rolls back and the condition needs operator attention.
    async fn freeze_surveyors(&self, params: FreezeParams) -> Result<FreezeOutcome>;
}
