//! Ballot staging and the periodic surveyor freeze job.
//!
//! [`stage_votes`] turns a batch of live vote events into surveyor and
//! ballot writes inside an open [`StoreBatch`]. [`FreezeScheduler`]
//! runs [`LedgerStore::freeze_surveyors`] on an interval until the
//! process shuts down.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::IngestConfig;
use crate::error::{Error, Result};
use crate::metrics::IngestMetrics;
use crate::models::{condense_ballots, Vote};
use crate::store::{FreezeOutcome, FreezeParams, LedgerStore, StoreBatch};

/// Stages surveyors and tally increments for a batch of vote events.
///
/// Every vote is validated first; a batch with any invalid vote stages
/// nothing. Surveyors the store does not yet know are created from the
/// votes that name them, ballots for already frozen surveyors are
/// dropped, and the remaining ballots are condensed so each ballot id
/// appears once before the upsert.
///
/// Returns the number of ballots upserted.
///
/// # Errors
///
/// Returns [`Error::Validation`] listing every reason across the batch,
/// or a storage error from the underlying batch.
pub async fn stage_votes(
    batch: &mut dyn StoreBatch,
    votes: &[Vote],
    default_price: rust_decimal::Decimal,
) -> Result<usize> {
    let mut reasons = Vec::new();
    for vote in votes {
        for reason in vote.validate() {
            reasons.push(format!("{}: {reason}", vote.id()));
        }
    }
    if !reasons.is_empty() {
        return Err(Error::Validation { reasons });
    }

    let mut wanted = Vec::new();
    let mut seen = HashSet::new();
    for vote in votes {
        for id in vote.surveyor_ids(vote.voting_day()) {
            if seen.insert(id.clone()) {
                wanted.push(id);
            }
        }
    }

    let known = batch.surveyors_by_id(&wanted).await?;
    let mut existing: HashSet<String> = HashSet::new();
    let mut frozen: HashSet<String> = HashSet::new();
    for surveyor in known {
        if surveyor.frozen {
            frozen.insert(surveyor.id.clone());
        }
        existing.insert(surveyor.id);
    }

    // Surveyors are dated by the votes that opened them, so a replayed
    // backlog ages and freezes the same way a live stream would.
    let mut created = existing.clone();
    let mut new_surveyors = Vec::new();
    for vote in votes {
        for surveyor in
            vote.surveyors(vote.voting_day(), default_price, &created, vote.created_at())
        {
            created.insert(surveyor.id.clone());
            new_surveyors.push(surveyor);
        }
    }
    if !new_surveyors.is_empty() {
        batch.insert_surveyors(&new_surveyors).await?;
    }

    let mut ballots = Vec::new();
    for vote in votes {
        ballots.extend(vote.ballots(vote.voting_day(), default_price, &frozen));
    }
    let ballots = condense_ballots(ballots);
    if !ballots.is_empty() {
        batch.upsert_ballots(&ballots).await?;
    }
    Ok(ballots.len())
}

/// Runs one freeze pass with cutoffs derived from the current time.
///
/// # Errors
///
/// Propagates any error from [`LedgerStore::freeze_surveyors`].
pub async fn freeze_once(
    store: &dyn LedgerStore,
    config: &IngestConfig,
    metrics: &IngestMetrics,
) -> Result<FreezeOutcome> {
    let params = FreezeParams {
        now: Utc::now(),
        lag_days: config.freeze_lag_days,
        fee_fraction: config.fee_fraction,
        max_amount: config.max_amount,
    };
    let outcome = store.freeze_surveyors(params).await?;
    if !outcome.frozen_surveyors.is_empty() {
        info!(
            frozen = outcome.frozen_surveyors.len(),
            rows = outcome.rows_inserted,
            "froze surveyors"
        );
        metrics.record_surveyors_frozen(outcome.frozen_surveyors.len());
        metrics.record_transactions_inserted(outcome.rows_inserted);
    }
    Ok(outcome)
}

/// Periodic driver for the surveyor freeze pass.
pub struct FreezeScheduler {
    store: Arc<dyn LedgerStore>,
    config: Arc<IngestConfig>,
    metrics: IngestMetrics,
    cancel: CancellationToken,
}

impl FreezeScheduler {
    /// Creates a scheduler bound to a store and shutdown token.
    #[must_use]
    pub fn new(
        store: Arc<dyn LedgerStore>,
        config: Arc<IngestConfig>,
        metrics: IngestMetrics,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            store,
            config,
            metrics,
            cancel,
        }
    }

    /// Runs freeze passes on the configured interval until cancelled.
    ///
    /// Transient storage failures are logged and retried on the next
    /// tick. A [`Error::SurveyorMismatch`] stops the scheduler: ballots
    /// pointing at unknown surveyors mean the ledger needs operator
    /// attention before any further settlement.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SurveyorMismatch`] when the freeze pass hits
    /// ballots with no matching surveyor.
    pub async fn run(self) -> Result<()> {
        let mut ticks = tokio::time::interval(self.config.freeze_interval());
        ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                () = self.cancel.cancelled() => return Ok(()),
                _ = ticks.tick() => {
                    match freeze_once(self.store.as_ref(), &self.config, &self.metrics).await {
                        Ok(_) => {}
                        Err(err @ Error::SurveyorMismatch { .. }) => {
                            error!(error = %err, "freeze pass found ballots with no surveyor");
                            return Err(err);
                        }
                        Err(err) => {
                            error!(error = %err, "freeze pass failed, will retry");
                        }
                    }
                }
            }
        }
    }
}
