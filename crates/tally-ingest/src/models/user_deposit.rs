//! User deposit events.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tally_core::ids;

use super::transaction::{account_types, LedgerTransaction, TransactionType, PROBI_PER_UNIT};

/// Funds a user moved into their own custodial card.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserDeposit {
    /// Deposit id assigned by the originating chain.
    pub id: String,
    /// The chain the deposit arrived on, e.g. `bitcoin`.
    pub chain: String,
    /// Custodial card credited by the deposit.
    pub card_id: String,
    /// On-chain address the funds came from.
    pub address: String,
    /// Deposited amount, in probi.
    pub amount: Decimal,
    /// When the deposit landed.
    pub created_at: DateTime<Utc>,
}

impl UserDeposit {
    /// The stable key identifying this deposit across redeliveries.
    ///
    /// Deposit ids are only unique per chain, so the chain is part of
    /// the key.
    #[must_use]
    pub fn natural_key(&self) -> String {
        format!("{}-{}", self.chain, self.id)
    }

    /// Collects every reason this deposit cannot enter the ledger.
    #[must_use]
    pub fn validate(&self) -> Vec<String> {
        let mut reasons = Vec::new();
        if self.amount <= Decimal::ZERO {
            reasons.push("amount must be positive".to_string());
        }
        if self.amount != self.amount.trunc() {
            reasons.push("amount must be an integer".to_string());
        }
        if self.id.is_empty() {
            reasons.push("id is not set".to_string());
        }
        if self.chain.is_empty() {
            reasons.push("chain is not set".to_string());
        }
        if self.card_id.is_empty() {
            reasons.push("card id is not set".to_string());
        }
        reasons
    }

    /// Returns true when the deposit should be silently skipped.
    #[must_use]
    pub fn should_ignore(&self, max_amount: Decimal) -> bool {
        self.amount > max_amount * PROBI_PER_UNIT
    }

    /// Expands this deposit into its ledger row.
    #[must_use]
    pub fn to_transactions(&self) -> Vec<LedgerTransaction> {
        vec![LedgerTransaction {
            id: ids::derive_transaction_id(ids::USER_DEPOSIT, &self.natural_key()),
            created_at: self.created_at,
            description: format!("deposits from {} chain", self.chain),
            document_id: self.id.clone(),
            transaction_type: TransactionType::UserDeposit,
            from_account: self.address.clone(),
            from_account_type: self.chain.clone(),
            to_account: self.card_id.clone(),
            to_account_type: account_types::UPHOLD.to_string(),
            amount: self.amount,
            settlement_currency: None,
            settlement_amount: None,
            channel: None,
        }]
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    use super::*;

    fn deposit() -> UserDeposit {
        UserDeposit {
            id: "deadbeef".to_string(),
            chain: "bitcoin".to_string(),
            card_id: "11112222-3333-4444-5555-666677778888".to_string(),
            address: "bc1qexample".to_string(),
            amount: dec!(1_000_000_000_000_000_000),
            created_at: Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap(),
        }
    }

    #[test]
    fn deposit_expands_to_one_row() {
        let rows = deposit().to_transactions();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].transaction_type, TransactionType::UserDeposit);
        assert_eq!(rows[0].description, "deposits from bitcoin chain");
        assert_eq!(rows[0].to_account_type, "uphold");
    }

    #[test]
    fn natural_key_includes_the_chain() {
        let mut other = deposit();
        other.chain = "ethereum".to_string();
        assert_ne!(
            deposit().to_transactions()[0].id,
            other.to_transactions()[0].id
        );
    }

    #[test]
    fn missing_card_fails_validation() {
        let mut deposit = deposit();
        deposit.card_id = String::new();
        assert!(deposit.validate().iter().any(|r| r.contains("card id")));
    }
}
