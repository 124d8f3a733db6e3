//! Settled vote totals, produced when surveyors freeze.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tally_core::channel::Channel;
use tally_core::ids;

use super::transaction::{account_types, accounts, LedgerTransaction, TransactionType, PROBI_PER_UNIT};

/// The settled value of one channel's ballots under one frozen surveyor.
///
/// Unlike live vote events, a `Votes` value is born inside the freeze
/// pass from ballot aggregation and goes straight into the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Votes {
    /// Value earned by the channel, in probi.
    pub amount: Decimal,
    /// Platform cut, in probi.
    pub fees: Decimal,
    /// Channel the ballots voted for.
    pub channel: Channel,
    /// Surveyor the ballots were cast under.
    pub surveyor_id: String,
    /// When the surveyor was created; dates the ledger row.
    pub surveyor_created_at: DateTime<Utc>,
}

impl Votes {
    /// The stable key identifying this settled total.
    #[must_use]
    pub fn natural_key(&self) -> String {
        format!("{}_{}", self.surveyor_id, self.channel.normalize())
    }

    /// Collects every reason this total cannot enter the ledger.
    #[must_use]
    pub fn validate(&self) -> Vec<String> {
        let mut reasons = Vec::new();
        if self.amount <= Decimal::ZERO {
            reasons.push("amount must be positive".to_string());
        }
        if self.fees < Decimal::ZERO {
            reasons.push("fees must not be negative".to_string());
        }
        if self.surveyor_id.is_empty() {
            reasons.push("surveyor id is not set".to_string());
        }
        if self.channel.is_empty() {
            reasons.push("channel is not set".to_string());
        }
        reasons
    }

    /// Returns true when the total should be silently skipped.
    #[must_use]
    pub fn should_ignore(&self, max_amount: Decimal) -> bool {
        let ceiling = max_amount * PROBI_PER_UNIT;
        if self.amount > ceiling || self.fees > ceiling {
            return true;
        }
        self.channel
            .props()
            .is_some_and(|p| p.provider_name == "youtube" && p.provider_suffix == "user")
    }

    /// Expands this total into its ledger row.
    ///
    /// The row moves the gross value (earnings plus fees) from the
    /// settlement pool into the channel account; the fee split is taken
    /// when the settlement report later moves funds out again.
    #[must_use]
    pub fn to_transactions(&self) -> Vec<LedgerTransaction> {
        let channel = self.channel.normalize();
        vec![LedgerTransaction {
            id: ids::derive_transaction_id(ids::CONTRIBUTION, &self.natural_key()),
            created_at: self.surveyor_created_at,
            description: format!("votes from {}", self.surveyor_id),
            document_id: self.surveyor_id.clone(),
            transaction_type: TransactionType::Contribution,
            from_account: accounts::SETTLEMENT.to_string(),
            from_account_type: account_types::UPHOLD.to_string(),
            to_account: channel.to_string(),
            to_account_type: account_types::CHANNEL.to_string(),
            amount: self.amount + self.fees,
            settlement_currency: None,
            settlement_amount: None,
            channel: Some(channel),
        }]
    }
}
