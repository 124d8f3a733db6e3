//! Referral finalization events.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tally_core::channel::Channel;
use tally_core::ids;
use uuid::Uuid;

use super::transaction::{account_types, accounts, LedgerTransaction, TransactionType, PROBI_PER_UNIT};

/// A confirmed referral download, finalized by the referral service.
///
/// Referrals arrive without an amount. The consumer resolves the
/// country group's credit and the day's currency rate and writes the
/// result into `probi` before conversion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Referral {
    /// Referral transaction id assigned upstream.
    pub transaction_id: String,
    /// Download this referral credits.
    pub download_id: String,
    /// Channel the referral was attributed to.
    pub channel: Channel,
    /// Owner account receiving the credit.
    pub owner: String,
    /// When the referral was finalized.
    pub finalized_at: DateTime<Utc>,
    /// Country group pricing this referral, when reported.
    pub country_group_id: Option<Uuid>,
    /// Platform the download happened on.
    pub platform: String,
    /// Credit in probi, filled in by rate resolution.
    pub probi: Decimal,
}

impl Referral {
    /// The stable key identifying this referral across redeliveries.
    #[must_use]
    pub fn natural_key(&self) -> String {
        format!("{}{}", self.transaction_id, self.download_id)
    }

    /// Collects every reason this referral cannot enter the ledger.
    #[must_use]
    pub fn validate(&self) -> Vec<String> {
        let mut reasons = Vec::new();
        if self.probi <= Decimal::ZERO {
            reasons.push("probi must be positive".to_string());
        }
        if self.probi != self.probi.trunc() {
            reasons.push("probi must be an integer".to_string());
        }
        if self.owner.is_empty() {
            reasons.push("owner is not set".to_string());
        }
        if self.channel.is_empty() {
            reasons.push("channel is not set".to_string());
        }
        if self.transaction_id.is_empty() && self.download_id.is_empty() {
            reasons.push("neither transaction id nor download id is set".to_string());
        }
        reasons
    }

    /// Returns true when the referral should be silently skipped.
    #[must_use]
    pub fn should_ignore(&self, max_amount: Decimal) -> bool {
        if self.probi > max_amount * PROBI_PER_UNIT {
            return true;
        }
        self.channel
            .props()
            .is_some_and(|p| p.provider_name == "youtube" && p.provider_suffix == "user")
    }

    /// Expands this referral into its ledger row.
    #[must_use]
    pub fn to_transactions(&self) -> Vec<LedgerTransaction> {
        let channel = self.channel.normalize();
        let month = self.finalized_at.format("%B");
        vec![LedgerTransaction {
            id: ids::derive_transaction_id(ids::REFERRAL, &self.natural_key()),
            created_at: self.finalized_at,
            description: format!("referrals through {month}"),
            document_id: self.transaction_id.clone(),
            transaction_type: TransactionType::Referral,
            from_account: accounts::SETTLEMENT.to_string(),
            from_account_type: account_types::UPHOLD.to_string(),
            to_account: self.owner.clone(),
            to_account_type: account_types::OWNER.to_string(),
            amount: self.probi,
            settlement_currency: None,
            settlement_amount: None,
            channel: Some(channel),
        }]
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    use super::*;

    fn referral() -> Referral {
        Referral {
            transaction_id: "tx-1".to_string(),
            download_id: "dl-1".to_string(),
            channel: Channel::from("brave.com"),
            owner: "publishers#uuid:1c2c3c4c".to_string(),
            finalized_at: Utc.with_ymd_and_hms(2024, 3, 10, 9, 30, 0).unwrap(),
            country_group_id: None,
            platform: "desktop".to_string(),
            probi: dec!(5_000_000_000_000_000_000),
        }
    }

    #[test]
    fn referral_expands_to_one_row() {
        let rows = referral().to_transactions();
        assert_eq!(rows.len(), 1);
        let row = &rows[0];
        assert_eq!(row.transaction_type, TransactionType::Referral);
        assert_eq!(row.from_account, accounts::SETTLEMENT);
        assert_eq!(row.to_account, "publishers#uuid:1c2c3c4c");
        assert_eq!(row.description, "referrals through March");
        assert_eq!(row.amount, dec!(5_000_000_000_000_000_000));
    }

    #[test]
    fn id_derives_from_transaction_and_download() {
        let a = referral().to_transactions()[0].id;
        let mut other = referral();
        other.download_id = "dl-2".to_string();
        let b = other.to_transactions()[0].id;
        assert_ne!(a, b);
    }

    #[test]
    fn unresolved_referral_fails_validation() {
        let mut referral = referral();
        referral.probi = Decimal::ZERO;
        assert!(referral
            .validate()
            .iter()
            .any(|r| r.contains("positive")));
    }

    #[test]
    fn referral_without_keys_fails_validation() {
        let mut referral = referral();
        referral.transaction_id = String::new();
        referral.download_id = String::new();
        assert!(!referral.validate().is_empty());
    }
}
