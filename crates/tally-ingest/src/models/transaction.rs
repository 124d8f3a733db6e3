//! The double-entry ledger row and its account vocabulary.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tally_core::channel::Channel;
use uuid::Uuid;

/// Probi per whole base-currency unit.
pub const PROBI_PER_UNIT: Decimal =
    Decimal::from_parts(0xA764_0000, 0x0DE0_B6B3, 0, false, 0); // 1_000_000_000_000_000_000

/// Account type values stored alongside ledger accounts.
pub mod account_types {
    /// A publisher owner account.
    pub const OWNER: &str = "owner";
    /// A publisher channel account.
    pub const CHANNEL: &str = "channel";
    /// A platform-internal account, such as the fees account.
    pub const INTERNAL: &str = "internal";
    /// The default custodial wallet provider.
    pub const UPHOLD: &str = "uphold";
}

/// Well-known platform account names.
pub mod accounts {
    /// Collects the platform's cut of frozen ballots and settlements.
    pub const FEES: &str = "fees-account";
    /// The custodial address settlements and referrals are paid from.
    pub const SETTLEMENT: &str = "settlement-address";
}

/// The category of a ledger row.
///
/// The set is closed: every row written by the pipeline carries exactly
/// one of these, and readers can match exhaustively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    /// Funds earned by a channel, from votes or a settlement report.
    Contribution,
    /// Contribution funds paid out to a custodial address.
    ContributionSettlement,
    /// A manually negotiated payment agreement.
    Manual,
    /// Manual funds paid out to a custodial address.
    ManualSettlement,
    /// A referral credit for a confirmed download.
    Referral,
    /// Referral funds paid out to a custodial address.
    ReferralSettlement,
    /// The platform's cut of a settlement.
    Fees,
    /// Funds a user deposited into their own wallet.
    UserDeposit,
}

impl TransactionType {
    /// Returns the stored string form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Contribution => "contribution",
            Self::ContributionSettlement => "contribution_settlement",
            Self::Manual => "manual",
            Self::ManualSettlement => "manual_settlement",
            Self::Referral => "referral",
            Self::ReferralSettlement => "referral_settlement",
            Self::Fees => "fees",
            Self::UserDeposit => "user_deposit",
        }
    }
}

impl std::str::FromStr for TransactionType {
    type Err = tally_core::error::Error;

    fn from_str(raw: &str) -> std::result::Result<Self, Self::Err> {
        match raw {
            "contribution" => Ok(Self::Contribution),
            "contribution_settlement" => Ok(Self::ContributionSettlement),
            "manual" => Ok(Self::Manual),
            "manual_settlement" => Ok(Self::ManualSettlement),
            "referral" => Ok(Self::Referral),
            "referral_settlement" => Ok(Self::ReferralSettlement),
            "fees" => Ok(Self::Fees),
            "user_deposit" => Ok(Self::UserDeposit),
            other => Err(tally_core::error::Error::invalid_id(format!(
                "unknown transaction type {other}"
            ))),
        }
    }
}

impl std::fmt::Display for TransactionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One double-entry ledger row.
///
/// The id is a UUIDv5 of the row's natural key, so re-converting the
/// same upstream event always yields the same row and inserts are
/// skip-on-conflict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerTransaction {
    /// Deterministic row id.
    pub id: Uuid,
    /// When the underlying economic event happened.
    pub created_at: DateTime<Utc>,
    /// Human-readable description, e.g. `contributions through August`.
    pub description: String,
    /// The upstream document this row was derived from.
    pub document_id: String,
    /// Row category.
    pub transaction_type: TransactionType,
    /// Account the funds leave.
    pub from_account: String,
    /// Type of the from account.
    pub from_account_type: String,
    /// Account the funds enter.
    pub to_account: String,
    /// Type of the to account.
    pub to_account_type: String,
    /// Amount moved, in probi.
    pub amount: Decimal,
    /// Currency of the external payout, for settlement rows.
    pub settlement_currency: Option<String>,
    /// Amount of the external payout in its own currency.
    pub settlement_amount: Option<Decimal>,
    /// The channel this row concerns, when there is one.
    pub channel: Option<Channel>,
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    #[test]
    fn transaction_type_round_trips_through_strings() {
        for tx_type in [
            TransactionType::Contribution,
            TransactionType::ContributionSettlement,
            TransactionType::Manual,
            TransactionType::ManualSettlement,
            TransactionType::Referral,
            TransactionType::ReferralSettlement,
            TransactionType::Fees,
            TransactionType::UserDeposit,
        ] {
            assert_eq!(TransactionType::from_str(tx_type.as_str()).unwrap(), tx_type);
        }
    }

    #[test]
    fn unknown_transaction_type_is_rejected() {
        assert!(TransactionType::from_str("ad_rebate").is_err());
    }

    #[test]
    fn probi_scale_is_ten_to_the_eighteenth() {
        assert_eq!(PROBI_PER_UNIT.to_string(), "1000000000000000000");
    }
}
