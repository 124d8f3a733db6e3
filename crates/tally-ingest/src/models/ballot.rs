//! Surveyors and ballots, the aggregation layer underneath votes.
//!
//! A surveyor is a voting epoch named `{date}_{funding_source}`. Ballots
//! accumulate tallies per (channel, cohort, surveyor) until the surveyor
//! freezes; frozen ballots get their value computed once and are then
//! settled into the ledger. Freezing is one-way.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tally_core::channel::Channel;
use tally_core::ids;
use uuid::Uuid;

/// Date format used inside surveyor ids.
pub const SURVEYOR_DATE_FORMAT: &str = "%Y-%m-%d";

/// Builds a surveyor id for a voting day and funding source.
#[must_use]
pub fn surveyor_id(date: NaiveDate, funding_source: &str) -> String {
    format!("{}_{funding_source}", date.format(SURVEYOR_DATE_FORMAT))
}

/// A voting epoch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Surveyor {
    /// Epoch id, `{date}_{funding_source}`.
    pub id: String,
    /// Value of one vote under this surveyor, in probi.
    pub price: Decimal,
    /// Virtual surveyors settle the next day instead of aging through
    /// the freeze lag.
    pub is_virtual: bool,
    /// Whether the epoch has been frozen. Never transitions back.
    pub frozen: bool,
    /// When the epoch was opened.
    pub created_at: DateTime<Utc>,
    /// Last state change.
    pub updated_at: DateTime<Utc>,
}

impl Surveyor {
    /// Creates an open surveyor.
    #[must_use]
    pub fn new(id: impl Into<String>, price: Decimal, is_virtual: bool, now: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            price,
            is_virtual,
            frozen: false,
            created_at: now,
            updated_at: now,
        }
    }
}

/// One channel's accumulated tally under one surveyor and cohort.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ballot {
    /// Deterministic ballot id.
    pub id: Uuid,
    /// Grant cohort the votes were funded from.
    pub cohort: String,
    /// Accumulated vote count.
    pub tally: i64,
    /// Surveyor the votes were cast under.
    pub surveyor_id: String,
    /// Channel voted for.
    pub channel: Channel,
    /// Channel earnings in probi, computed exactly once at freeze.
    pub amount: Option<Decimal>,
    /// Platform cut in probi, computed alongside `amount`.
    pub fees: Option<Decimal>,
    /// Excluded ballots freeze but never settle.
    pub excluded: bool,
}

impl Ballot {
    /// Creates an unsettled ballot with a deterministic id.
    #[must_use]
    pub fn new(
        channel: &Channel,
        cohort: impl Into<String>,
        surveyor_id: impl Into<String>,
        tally: i64,
    ) -> Self {
        let cohort = cohort.into();
        let surveyor_id = surveyor_id.into();
        let channel = channel.normalize();
        let key = format!("{channel}{cohort}{surveyor_id}");
        Self {
            id: ids::derive_transaction_id(ids::VOTES, &key),
            cohort,
            tally,
            surveyor_id,
            channel,
            amount: None,
            fees: None,
            excluded: false,
        }
    }
}

/// Sums tallies of ballots that share an id, preserving first-seen order.
///
/// A batch routinely carries many votes for the same (channel, cohort,
/// surveyor); condensing them first keeps the upsert to one row per key.
#[must_use]
pub fn condense_ballots(ballots: Vec<Ballot>) -> Vec<Ballot> {
    let mut by_id: std::collections::HashMap<Uuid, usize> = std::collections::HashMap::new();
    let mut condensed: Vec<Ballot> = Vec::with_capacity(ballots.len());
    for ballot in ballots {
        match by_id.get(&ballot.id) {
            Some(&index) => condensed[index].tally += ballot.tally,
            None => {
                by_id.insert(ballot.id, condensed.len());
                condensed.push(ballot);
            }
        }
    }
    condensed
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    #[test]
    fn surveyor_id_joins_date_and_source() {
        let date = NaiveDate::from_ymd_opt(2024, 8, 14).unwrap();
        assert_eq!(surveyor_id(date, "uphold"), "2024-08-14_uphold");
    }

    #[test]
    fn ballot_id_is_deterministic_per_key() {
        let channel = Channel::from("brave.com");
        let a = Ballot::new(&channel, "control", "2024-08-14_uphold", 1);
        let b = Ballot::new(&channel, "control", "2024-08-14_uphold", 3);
        assert_eq!(a.id, b.id);

        let other_cohort = Ballot::new(&channel, "grant", "2024-08-14_uphold", 1);
        assert_ne!(a.id, other_cohort.id);
    }

    #[test]
    fn condense_sums_tallies_for_shared_ids() {
        let channel = Channel::from("brave.com");
        let ballots = vec![
            Ballot::new(&channel, "control", "2024-08-14_uphold", 1),
            Ballot::new(&channel, "control", "2024-08-14_uphold", 1),
            Ballot::new(&Channel::from("example.org"), "control", "2024-08-14_uphold", 2),
            Ballot::new(&channel, "control", "2024-08-14_uphold", 1),
        ];
        let condensed = condense_ballots(ballots);
        assert_eq!(condensed.len(), 2);
        assert_eq!(condensed[0].tally, 3);
        assert_eq!(condensed[1].tally, 2);
    }

    #[test]
    fn new_surveyor_starts_open() {
        let surveyor = Surveyor::new("2024-08-14_uphold", dec!(0.25), false, Utc::now());
        assert!(!surveyor.frozen);
        assert_eq!(surveyor.created_at, surveyor.updated_at);
    }
}
