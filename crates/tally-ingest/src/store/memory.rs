//! In-memory store for tests and local development.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use chrono::Duration;
use rust_decimal::Decimal;
use uuid::Uuid;

use super::{CountryGroup, FreezeOutcome, FreezeParams, LedgerStore, StoreBatch};
use crate::error::{Error, Result};
use crate::models::{
    convert_to_transactions, Ballot, Convertable, LedgerTransaction, Surveyor, Votes,
};

/// Converts a lock poisoning error into a storage error.
fn poison_err<T>(_: PoisonError<T>) -> Error {
    Error::storage("memory store lock poisoned")
}

#[derive(Debug, Default)]
struct MemoryState {
    transactions: HashMap<Uuid, LedgerTransaction>,
    surveyors: HashMap<String, Surveyor>,
    ballots: HashMap<Uuid, Ballot>,
    country_groups: Vec<CountryGroup>,
}

/// An in-memory [`LedgerStore`].
///
/// Semantics match the Postgres store: batches are atomic, transaction
/// inserts skip existing ids, ballot upserts accumulate tallies, and the
/// freeze pass computes each ballot's value exactly once.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<RwLock<MemoryState>>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a referral country group.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the lock is poisoned.
    pub fn insert_country_group(&self, group: CountryGroup) -> Result<()> {
        let mut state = self.state.write().map_err(poison_err)?;
        state.country_groups.push(group);
        Ok(())
    }

    /// Returns the number of committed ledger rows.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the lock is poisoned.
    pub fn transaction_count(&self) -> Result<usize> {
        let state = self.state.read().map_err(poison_err)?;
        Ok(state.transactions.len())
    }

    /// Returns all committed ledger rows, ordered by `created_at`.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the lock is poisoned.
    pub fn all_transactions(&self) -> Result<Vec<LedgerTransaction>> {
        let state = self.state.read().map_err(poison_err)?;
        let mut rows: Vec<_> = state.transactions.values().cloned().collect();
        rows.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(rows)
    }
}

/// A staged write session against a [`MemoryStore`].
struct MemoryBatch {
    state: Arc<RwLock<MemoryState>>,
    transactions: Vec<LedgerTransaction>,
    surveyors: Vec<Surveyor>,
    ballots: Vec<Ballot>,
}

#[async_trait]
impl StoreBatch for MemoryBatch {
    async fn insert_transactions(&mut self, rows: &[LedgerTransaction]) -> Result<u64> {
        let state = self.state.read().map_err(poison_err)?;
        let mut staged_ids: HashSet<Uuid> = self.transactions.iter().map(|t| t.id).collect();
        let mut inserted = 0;
        for row in rows {
            if state.transactions.contains_key(&row.id) || !staged_ids.insert(row.id) {
                continue;
            }
            self.transactions.push(row.clone());
            inserted += 1;
        }
        Ok(inserted)
    }

    async fn insert_surveyors(&mut self, surveyors: &[Surveyor]) -> Result<()> {
        self.surveyors.extend_from_slice(surveyors);
        Ok(())
    }

    async fn upsert_ballots(&mut self, ballots: &[Ballot]) -> Result<()> {
        self.ballots.extend_from_slice(ballots);
        Ok(())
    }

    async fn surveyors_by_id(&mut self, ids: &[String]) -> Result<Vec<Surveyor>> {
        let state = self.state.read().map_err(poison_err)?;
        let mut found = Vec::new();
        for id in ids {
            if let Some(surveyor) = state.surveyors.get(id) {
                found.push(surveyor.clone());
            } else if let Some(staged) = self.surveyors.iter().find(|s| &s.id == id) {
                found.push(staged.clone());
            }
        }
        Ok(found)
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let mut state = self.state.write().map_err(poison_err)?;
        for surveyor in self.surveyors {
            state.surveyors.entry(surveyor.id.clone()).or_insert(surveyor);
        }
        for ballot in self.ballots {
            state
                .ballots
                .entry(ballot.id)
                .and_modify(|existing| existing.tally += ballot.tally)
                .or_insert(ballot);
        }
        for row in self.transactions {
            state.transactions.entry(row.id).or_insert(row);
        }
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn StoreBatch>> {
        Ok(Box::new(MemoryBatch {
            state: Arc::clone(&self.state),
            transactions: Vec::new(),
            surveyors: Vec::new(),
            ballots: Vec::new(),
        }))
    }

    async fn transactions_by_id(&self, ids: &[Uuid]) -> Result<Vec<LedgerTransaction>> {
        let state = self.state.read().map_err(poison_err)?;
        Ok(ids
            .iter()
            .filter_map(|id| state.transactions.get(id).cloned())
            .collect())
    }

    async fn ballots_by_id(&self, ids: &[Uuid]) -> Result<Vec<Ballot>> {
        let state = self.state.read().map_err(poison_err)?;
        Ok(ids
            .iter()
            .filter_map(|id| state.ballots.get(id).cloned())
            .collect())
    }

    async fn surveyors_by_id(&self, ids: &[String]) -> Result<Vec<Surveyor>> {
        let state = self.state.read().map_err(poison_err)?;
        Ok(ids
            .iter()
            .filter_map(|id| state.surveyors.get(id).cloned())
            .collect())
    }

    async fn active_country_groups(&self) -> Result<Vec<CountryGroup>> {
        let state = self.state.read().map_err(poison_err)?;
        Ok(state.country_groups.clone())
    }

    async fn freeze_surveyors(&self, params: FreezeParams) -> Result<FreezeOutcome> {
        let mut state = self.state.write().map_err(poison_err)?;
        let day_start = params
            .now
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .ok_or_else(|| Error::storage("invalid freeze date"))?
            .and_utc();
        let aged_cutoff = day_start - Duration::days(params.lag_days);

        let newly_frozen: Vec<String> = state
            .surveyors
            .values()
            .filter(|s| {
                !s.frozen
                    && ((s.is_virtual && s.created_at < day_start)
                        || (!s.is_virtual && s.created_at < aged_cutoff))
            })
            .map(|s| s.id.clone())
            .collect();

        if newly_frozen.is_empty() {
            return Ok(FreezeOutcome::default());
        }

        let frozen_set: HashSet<&String> = newly_frozen.iter().collect();
        let prices: HashMap<String, Surveyor> = newly_frozen
            .iter()
            .filter_map(|id| state.surveyors.get(id).cloned().map(|s| (id.clone(), s)))
            .collect();

        // Settle each unsettled ballot exactly once.
        let mut settled: Vec<Ballot> = Vec::new();
        for ballot in state.ballots.values_mut() {
            if !frozen_set.contains(&ballot.surveyor_id)
                || ballot.excluded
                || ballot.amount.is_some()
            {
                continue;
            }
            let surveyor = prices.get(&ballot.surveyor_id).ok_or_else(|| {
                Error::SurveyorMismatch {
                    surveyor_id: ballot.surveyor_id.clone(),
                }
            })?;
            let gross = Decimal::from(ballot.tally) * surveyor.price;
            ballot.amount = Some((Decimal::ONE - params.fee_fraction) * gross);
            ballot.fees = Some(params.fee_fraction * gross);
            settled.push(ballot.clone());
        }

        // Aggregate per (surveyor, channel) in a stable order.
        let mut totals: BTreeMap<(String, String), (Decimal, Decimal)> = BTreeMap::new();
        for ballot in &settled {
            let key = (ballot.surveyor_id.clone(), ballot.channel.to_string());
            let entry = totals.entry(key).or_insert((Decimal::ZERO, Decimal::ZERO));
            entry.0 += ballot.amount.unwrap_or(Decimal::ZERO);
            entry.1 += ballot.fees.unwrap_or(Decimal::ZERO);
        }

        let mut events = Vec::with_capacity(totals.len());
        for ((surveyor_id, channel), (amount, fees)) in totals {
            if amount + fees == Decimal::ZERO {
                continue;
            }
            let surveyor = prices
                .get(&surveyor_id)
                .ok_or_else(|| Error::SurveyorMismatch {
                    surveyor_id: surveyor_id.clone(),
                })?;
            events.push(Convertable::Votes(Votes {
                amount,
                fees,
                channel: channel.into(),
                surveyor_id,
                surveyor_created_at: surveyor.created_at,
            }));
        }
        let rows = convert_to_transactions(&events, params.max_amount)?;

        // All computation succeeded; apply state changes.
        for id in &newly_frozen {
            if let Some(surveyor) = state.surveyors.get_mut(id) {
                surveyor.frozen = true;
                surveyor.updated_at = params.now;
            }
        }
        let mut inserted = 0;
        for row in rows {
            if let std::collections::hash_map::Entry::Vacant(entry) =
                state.transactions.entry(row.id)
            {
                entry.insert(row);
                inserted += 1;
            }
        }

        Ok(FreezeOutcome {
            frozen_surveyors: newly_frozen,
            rows_inserted: inserted,
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;
    use tally_core::channel::Channel;

    use super::*;
    use crate::models::{SettlementKind, PROBI_PER_UNIT};

    fn params(now: chrono::DateTime<Utc>) -> FreezeParams {
        FreezeParams {
            now,
            lag_days: 1,
            fee_fraction: dec!(0.05),
            max_amount: dec!(1_000_000_000),
        }
    }

    fn sample_row(id_key: &str) -> LedgerTransaction {
        crate::models::Settlement {
            kind: SettlementKind::Contribution,
            owner: "publishers#uuid:1c2c3c4c".to_string(),
            channel: Channel::from("brave.com"),
            probi: dec!(475),
            fees: dec!(25),
            amount: dec!(4),
            currency: "USD".to_string(),
            address: "aaaabbbb-cccc-dddd-eeee-ffff00001111".to_string(),
            settlement_id: id_key.to_string(),
            document_id: "doc-1".to_string(),
            hash: "hash-1".to_string(),
            executed_at: Utc.with_ymd_and_hms(2024, 8, 15, 12, 0, 0).unwrap(),
            wallet_provider: "uphold".to_string(),
        }
        .to_transactions()
        .remove(0)
    }

    #[tokio::test]
    async fn uncommitted_batches_are_invisible() {
        let store = MemoryStore::new();
        let mut batch = store.begin().await.unwrap();
        batch.insert_transactions(&[sample_row("s-1")]).await.unwrap();
        drop(batch);
        assert_eq!(store.transaction_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn committed_inserts_skip_duplicates() {
        let store = MemoryStore::new();
        let row = sample_row("s-1");

        let mut batch = store.begin().await.unwrap();
        let inserted = batch
            .insert_transactions(&[row.clone(), row.clone()])
            .await
            .unwrap();
        assert_eq!(inserted, 1);
        batch.commit().await.unwrap();

        let mut batch = store.begin().await.unwrap();
        let inserted = batch.insert_transactions(&[row.clone()]).await.unwrap();
        assert_eq!(inserted, 0);
        batch.commit().await.unwrap();

        assert_eq!(store.transaction_count().unwrap(), 1);
        let found = store.transactions_by_id(&[row.id]).await.unwrap();
        assert_eq!(found.len(), 1);
    }

    #[tokio::test]
    async fn ballot_upserts_accumulate_tallies() {
        let store = MemoryStore::new();
        let channel = Channel::from("brave.com");
        let ballot = Ballot::new(&channel, "control", "2024-08-14_uphold", 2);

        let mut batch = store.begin().await.unwrap();
        batch.upsert_ballots(&[ballot.clone()]).await.unwrap();
        batch.commit().await.unwrap();

        let mut batch = store.begin().await.unwrap();
        batch
            .upsert_ballots(&[Ballot::new(&channel, "control", "2024-08-14_uphold", 3)])
            .await
            .unwrap();
        batch.commit().await.unwrap();

        let stored = store.ballots_by_id(&[ballot.id]).await.unwrap();
        assert_eq!(stored[0].tally, 5);
    }

    #[tokio::test]
    async fn existing_surveyors_keep_their_state() {
        let store = MemoryStore::new();
        let created = Utc.with_ymd_and_hms(2024, 8, 10, 0, 0, 0).unwrap();

        let mut batch = store.begin().await.unwrap();
        batch
            .insert_surveyors(&[Surveyor::new("2024-08-10_uphold", dec!(1), false, created)])
            .await
            .unwrap();
        batch.commit().await.unwrap();

        let mut batch = store.begin().await.unwrap();
        batch
            .insert_surveyors(&[Surveyor::new("2024-08-10_uphold", dec!(9), false, Utc::now())])
            .await
            .unwrap();
        batch.commit().await.unwrap();

        let stored = store
            .surveyors_by_id(&["2024-08-10_uphold".to_string()])
            .await
            .unwrap();
        assert_eq!(stored[0].price, dec!(1));
        assert_eq!(stored[0].created_at, created);
    }

    #[tokio::test]
    async fn freeze_settles_aged_surveyors_once() {
        let store = MemoryStore::new();
        let created = Utc.with_ymd_and_hms(2024, 8, 10, 8, 0, 0).unwrap();
        let price = dec!(0.25) * PROBI_PER_UNIT;
        let channel = Channel::from("brave.com");

        let mut batch = store.begin().await.unwrap();
        batch
            .insert_surveyors(&[Surveyor::new("2024-08-10_uphold", price, false, created)])
            .await
            .unwrap();
        batch
            .upsert_ballots(&[Ballot::new(&channel, "control", "2024-08-10_uphold", 5)])
            .await
            .unwrap();
        batch.commit().await.unwrap();

        let now = Utc.with_ymd_and_hms(2024, 8, 12, 6, 0, 0).unwrap();
        let outcome = store.freeze_surveyors(params(now)).await.unwrap();
        assert_eq!(outcome.frozen_surveyors, vec!["2024-08-10_uphold"]);
        assert_eq!(outcome.rows_inserted, 1);

        let rows = store.all_transactions().unwrap();
        assert_eq!(rows.len(), 1);
        // Gross value: 5 votes at 0.25 units each.
        assert_eq!(rows[0].amount, dec!(5) * dec!(0.25) * PROBI_PER_UNIT);

        // A second pass finds nothing left to do.
        let outcome = store.freeze_surveyors(params(now)).await.unwrap();
        assert_eq!(outcome, FreezeOutcome::default());
        assert_eq!(store.transaction_count().unwrap(), 1);
    }

    #[tokio::test]
    async fn freeze_skips_young_surveyors() {
        let store = MemoryStore::new();
        let now = Utc.with_ymd_and_hms(2024, 8, 12, 6, 0, 0).unwrap();
        let created = Utc.with_ymd_and_hms(2024, 8, 11, 8, 0, 0).unwrap();

        let mut batch = store.begin().await.unwrap();
        batch
            .insert_surveyors(&[
                Surveyor::new("2024-08-11_uphold", dec!(1), false, created),
                Surveyor::new("2024-08-11_promo", dec!(1), true, created),
            ])
            .await
            .unwrap();
        batch.commit().await.unwrap();

        // The non-virtual surveyor needs a full lag day; the virtual one
        // only needs the day to roll over.
        let outcome = store.freeze_surveyors(params(now)).await.unwrap();
        assert_eq!(outcome.frozen_surveyors, vec!["2024-08-11_promo"]);
    }

    #[tokio::test]
    async fn excluded_ballots_freeze_without_settling() {
        let store = MemoryStore::new();
        let created = Utc.with_ymd_and_hms(2024, 8, 10, 8, 0, 0).unwrap();
        let channel = Channel::from("brave.com");
        let mut ballot = Ballot::new(&channel, "control", "2024-08-10_uphold", 5);
        ballot.excluded = true;

        let mut batch = store.begin().await.unwrap();
        batch
            .insert_surveyors(&[Surveyor::new("2024-08-10_uphold", dec!(1), false, created)])
            .await
            .unwrap();
        batch.upsert_ballots(&[ballot.clone()]).await.unwrap();
        batch.commit().await.unwrap();

        let now = Utc.with_ymd_and_hms(2024, 8, 12, 6, 0, 0).unwrap();
        let outcome = store.freeze_surveyors(params(now)).await.unwrap();
        assert_eq!(outcome.rows_inserted, 0);
        let stored = store.ballots_by_id(&[ballot.id]).await.unwrap();
        assert!(stored[0].amount.is_none());
    }
}
