//! Settlement payout events and their ledger expansion.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tally_core::channel::Channel;
use tally_core::ids;

use super::transaction::{account_types, accounts, LedgerTransaction, TransactionType, PROBI_PER_UNIT};

/// The kind of payout a settlement report settles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SettlementKind {
    /// A contribution payout earned through votes.
    Contribution,
    /// A referral payout.
    Referral,
    /// A manually agreed payment.
    Manual,
}

impl SettlementKind {
    /// Returns the stored string form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Contribution => "contribution",
            Self::Referral => "referral",
            Self::Manual => "manual",
        }
    }

    /// Returns the type of the closing payout row.
    #[must_use]
    pub const fn settlement_type(self) -> TransactionType {
        match self {
            Self::Contribution => TransactionType::ContributionSettlement,
            Self::Referral => TransactionType::ReferralSettlement,
            Self::Manual => TransactionType::ManualSettlement,
        }
    }

    const fn settlement_namespace(self) -> uuid::Uuid {
        match self {
            Self::Contribution => ids::CONTRIBUTION_SETTLEMENT,
            Self::Referral => ids::REFERRAL_SETTLEMENT,
            Self::Manual => ids::MANUAL_SETTLEMENT,
        }
    }
}

/// A settlement payout reported by the payment batcher.
///
/// Amounts on the internal side (`probi`, `fees`) are in probi; the
/// external side (`amount`, `currency`) records what the custodian
/// actually paid out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settlement {
    /// Which payout category this settles.
    pub kind: SettlementKind,
    /// Owner account being paid.
    pub owner: String,
    /// Channel the funds were earned through.
    pub channel: Channel,
    /// Internal amount paid to the owner, in probi.
    pub probi: Decimal,
    /// Platform cut withheld, in probi.
    pub fees: Decimal,
    /// External payout amount, in `currency`.
    pub amount: Decimal,
    /// External payout currency.
    pub currency: String,
    /// Custodial address the payout landed on.
    pub address: String,
    /// Batch id assigned by the payment batcher.
    pub settlement_id: String,
    /// Upstream document this settlement derives from.
    pub document_id: String,
    /// Content hash of the payout report entry.
    pub hash: String,
    /// When the custodian executed the payout.
    pub executed_at: DateTime<Utc>,
    /// Custodial wallet provider that held the payout.
    pub wallet_provider: String,
}

impl Settlement {
    /// The stable key identifying this settlement across redeliveries.
    #[must_use]
    pub fn natural_key(&self) -> String {
        format!("{}_{}", self.settlement_id, self.channel.normalize())
    }

    /// Collects every reason this settlement cannot enter the ledger.
    ///
    /// All checks run; nothing short-circuits. An empty vector means the
    /// settlement is valid.
    #[must_use]
    pub fn validate(&self) -> Vec<String> {
        let mut reasons = Vec::new();
        if self.probi <= Decimal::ZERO {
            reasons.push("probi must be positive".to_string());
        }
        if self.probi != self.probi.trunc() {
            reasons.push("probi must be an integer".to_string());
        }
        if self.fees < Decimal::ZERO {
            reasons.push("fees must not be negative".to_string());
        }
        if self.owner.is_empty() {
            reasons.push("owner is not set".to_string());
        }
        if self.channel.is_empty() {
            reasons.push("channel is not set".to_string());
        }
        if self.amount <= Decimal::ZERO {
            reasons.push("amount must be positive".to_string());
        }
        if self.currency.is_empty() {
            reasons.push("currency is not set".to_string());
        }
        if self.address.is_empty() {
            reasons.push("address is not set".to_string());
        }
        if self.document_id.is_empty() {
            reasons.push("document id is not set".to_string());
        }
        if self.settlement_id.is_empty() {
            reasons.push("settlement id is not set".to_string());
        }
        reasons
    }

    /// Returns true when the settlement should be silently skipped.
    ///
    /// Ignore wins over validation: an event can be both implausible and
    /// malformed, and implausible events are dropped without failing the
    /// batch. YouTube user-form channels are legacy identities that must
    /// never be credited.
    #[must_use]
    pub fn should_ignore(&self, max_amount: Decimal) -> bool {
        let ceiling = max_amount * PROBI_PER_UNIT;
        if self.probi > ceiling || self.fees > ceiling {
            return true;
        }
        self.channel
            .props()
            .is_some_and(|p| p.provider_name == "youtube" && p.provider_suffix == "user")
    }

    /// Expands this settlement into its ledger rows.
    ///
    /// Contribution settlements produce three rows dated two seconds,
    /// one second, and zero seconds before `executed_at`, so account
    /// history reads channel, then fees, then payout. Manual settlements
    /// produce a handshake row and the payout. Referral settlements
    /// produce only the payout; the referral row itself was written when
    /// the referral event arrived.
    #[must_use]
    pub fn to_transactions(&self) -> Vec<LedgerTransaction> {
        let key = self.natural_key();
        let channel = self.channel.normalize();
        let month = self.executed_at.format("%B");
        let mut rows = Vec::with_capacity(3);

        match self.kind {
            SettlementKind::Contribution => {
                rows.push(LedgerTransaction {
                    id: ids::derive_transaction_id(ids::SETTLEMENT_FROM_CHANNEL, &key),
                    created_at: self.executed_at - Duration::seconds(2),
                    description: format!("contributions through {month}"),
                    document_id: self.hash.clone(),
                    transaction_type: TransactionType::Contribution,
                    from_account: channel.to_string(),
                    from_account_type: account_types::CHANNEL.to_string(),
                    to_account: self.owner.clone(),
                    to_account_type: account_types::OWNER.to_string(),
                    amount: self.probi + self.fees,
                    settlement_currency: None,
                    settlement_amount: None,
                    channel: Some(channel.clone()),
                });
                rows.push(LedgerTransaction {
                    id: ids::derive_transaction_id(ids::SETTLEMENT_FEES, &key),
                    created_at: self.executed_at - Duration::seconds(1),
                    description: "settlement fees".to_string(),
                    document_id: self.hash.clone(),
                    transaction_type: TransactionType::Fees,
                    from_account: self.owner.clone(),
                    from_account_type: account_types::OWNER.to_string(),
                    to_account: accounts::FEES.to_string(),
                    to_account_type: account_types::INTERNAL.to_string(),
                    amount: self.fees,
                    settlement_currency: None,
                    settlement_amount: None,
                    channel: Some(channel.clone()),
                });
            }
            SettlementKind::Manual => {
                rows.push(LedgerTransaction {
                    id: ids::derive_transaction_id(ids::MANUAL, &self.document_id),
                    created_at: self.executed_at - Duration::seconds(1),
                    description: "handshake agreement with business development".to_string(),
                    document_id: self.document_id.clone(),
                    transaction_type: TransactionType::Manual,
                    from_account: accounts::SETTLEMENT.to_string(),
                    from_account_type: account_types::UPHOLD.to_string(),
                    to_account: self.owner.clone(),
                    to_account_type: account_types::OWNER.to_string(),
                    amount: self.probi,
                    settlement_currency: None,
                    settlement_amount: None,
                    channel: None,
                });
            }
            SettlementKind::Referral => {}
        }

        let closing_document = match self.kind {
            SettlementKind::Manual => self.document_id.clone(),
            _ => self.hash.clone(),
        };
        rows.push(LedgerTransaction {
            id: ids::derive_transaction_id(self.kind.settlement_namespace(), &key),
            created_at: self.executed_at,
            description: format!("payout for {}", self.kind.as_str()),
            document_id: closing_document,
            transaction_type: self.kind.settlement_type(),
            from_account: self.owner.clone(),
            from_account_type: account_types::OWNER.to_string(),
            to_account: self.address.clone(),
            to_account_type: self.wallet_provider.clone(),
            amount: self.probi,
            settlement_currency: Some(self.currency.clone()),
            settlement_amount: Some(self.amount),
            channel: Some(channel),
        });

        rows
    }
}
