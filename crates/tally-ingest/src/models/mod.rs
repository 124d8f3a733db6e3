//! Event models and their ledger conversions.
//!
//! Every consumed event type lives here, together with the four
//! capabilities the pipeline relies on: conversion to ledger rows,
//! exhaustive validation, the silent-ignore check, and the natural key
//! behind deterministic row ids.

pub mod ballot;
pub mod referral;
pub mod settlement;
pub mod transaction;
pub mod user_deposit;
pub mod vote;
pub mod votes;

pub use ballot::{condense_ballots, surveyor_id, Ballot, Surveyor, SURVEYOR_DATE_FORMAT};
pub use referral::Referral;
pub use settlement::{Settlement, SettlementKind};
pub use transaction::{
    account_types, accounts, LedgerTransaction, TransactionType, PROBI_PER_UNIT,
};
pub use user_deposit::UserDeposit;
pub use vote::{Funding, Suggestion, Vote, VoteContribution};
pub use votes::Votes;

use rust_decimal::Decimal;

use crate::error::{Error, Result};

/// Any event that converts directly into ledger rows.
///
/// The set is closed; dispatch is a match, not dynamic lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum Convertable {
    /// A settlement payout report entry.
    Settlement(Settlement),
    /// A finalized referral with its probi resolved.
    Referral(Referral),
    /// A user deposit.
    UserDeposit(UserDeposit),
    /// A settled vote total from a frozen surveyor.
    Votes(Votes),
}

impl Convertable {
    /// The stable key identifying the underlying event.
    #[must_use]
    pub fn natural_key(&self) -> String {
        match self {
            Self::Settlement(s) => s.natural_key(),
            Self::Referral(r) => r.natural_key(),
            Self::UserDeposit(d) => d.natural_key(),
            Self::Votes(v) => v.natural_key(),
        }
    }

    /// Collects every reason the event cannot enter the ledger.
    #[must_use]
    pub fn validate(&self) -> Vec<String> {
        match self {
            Self::Settlement(s) => s.validate(),
            Self::Referral(r) => r.validate(),
            Self::UserDeposit(d) => d.validate(),
            Self::Votes(v) => v.validate(),
        }
    }

    /// Returns true when the event should be silently skipped.
    #[must_use]
    pub fn should_ignore(&self, max_amount: Decimal) -> bool {
        match self {
            Self::Settlement(s) => s.should_ignore(max_amount),
            Self::Referral(r) => r.should_ignore(max_amount),
            Self::UserDeposit(d) => d.should_ignore(max_amount),
            Self::Votes(v) => v.should_ignore(max_amount),
        }
    }

    /// Expands the event into its ledger rows.
    #[must_use]
    pub fn to_transactions(&self) -> Vec<LedgerTransaction> {
        match self {
            Self::Settlement(s) => s.to_transactions(),
            Self::Referral(r) => r.to_transactions(),
            Self::UserDeposit(d) => d.to_transactions(),
            Self::Votes(v) => v.to_transactions(),
        }
    }
}

/// Converts a batch of events into ledger rows.
///
/// Ignore wins over validation: implausible events are dropped first and
/// never counted as failures. Validation then runs over every remaining
/// event and every failure across the whole batch is reported in one
/// error, so a redelivered batch does not reveal its problems one at a
/// time.
///
/// # Errors
///
/// Returns [`Error::Validation`] carrying one reason per failed check,
/// each prefixed with the offending event's natural key.
pub fn convert_to_transactions(
    events: &[Convertable],
    max_amount: Decimal,
) -> Result<Vec<LedgerTransaction>> {
    let mut reasons = Vec::new();
    let mut rows = Vec::new();

    for event in events {
        if event.should_ignore(max_amount) {
            tracing::debug!(key = %event.natural_key(), "ignoring implausible event");
            continue;
        }
        let event_reasons = event.validate();
        if event_reasons.is_empty() {
            rows.extend(event.to_transactions());
        } else {
            let key = event.natural_key();
            reasons.extend(
                event_reasons
                    .into_iter()
                    .map(|reason| format!("{key}: {reason}")),
            );
        }
    }

    if reasons.is_empty() {
        Ok(rows)
    } else {
        Err(Error::Validation { reasons })
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;
    use tally_core::channel::Channel;

    use super::*;

    fn settlement(settlement_id: &str, channel: &str) -> Convertable {
        Convertable::Settlement(Settlement {
            kind: SettlementKind::Contribution,
            owner: "publishers#uuid:1c2c3c4c".to_string(),
            channel: Channel::from(channel),
            probi: dec!(475),
            fees: dec!(25),
            amount: dec!(4),
            currency: "USD".to_string(),
            address: "aaaabbbb-cccc-dddd-eeee-ffff00001111".to_string(),
            settlement_id: settlement_id.to_string(),
            document_id: "doc-1".to_string(),
            hash: "hash-1".to_string(),
            executed_at: Utc.with_ymd_and_hms(2024, 8, 15, 12, 0, 0).unwrap(),
            wallet_provider: "uphold".to_string(),
        })
    }

    #[test]
    fn batch_conversion_flattens_rows() {
        let events = vec![settlement("s-1", "brave.com"), settlement("s-1", "example.org")];
        let rows = convert_to_transactions(&events, dec!(1_000_000_000)).unwrap();
        assert_eq!(rows.len(), 6);
    }

    #[test]
    fn conversion_collects_failures_across_the_batch() {
        let mut bad_a = settlement("s-1", "brave.com");
        if let Convertable::Settlement(s) = &mut bad_a {
            s.probi = dec!(-1);
        }
        let mut bad_b = settlement("s-2", "example.org");
        if let Convertable::Settlement(s) = &mut bad_b {
            s.owner = String::new();
        }

        let err = convert_to_transactions(&[bad_a, bad_b], dec!(1_000_000_000)).unwrap_err();
        let Error::Validation { reasons } = err else {
            panic!("expected validation error");
        };
        assert_eq!(reasons.len(), 2);
        assert!(reasons[0].starts_with("s-1_brave.com: "));
        assert!(reasons[1].starts_with("s-2_example.org: "));
    }

    #[test]
    fn ignored_events_do_not_fail_validation() {
        // Implausible and malformed at once; ignore wins.
        let mut event = settlement("s-1", "brave.com");
        if let Convertable::Settlement(s) = &mut event {
            s.probi = dec!(2_000_000_000) * PROBI_PER_UNIT;
            s.owner = String::new();
        }
        let rows = convert_to_transactions(&[event], dec!(1_000_000_000)).unwrap();
        assert!(rows.is_empty());
    }
}
