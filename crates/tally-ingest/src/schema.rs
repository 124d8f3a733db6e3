//! Versioned wire schemas for consumed topics.
//!
//! Each topic carries JSON payloads whose shape has changed over time.
//! Decoding walks an ordered version list, newest first, and takes the
//! first version that accepts the payload. When every version refuses,
//! the error lists all attempts so the log shows exactly why each
//! version said no.
//!
//! A new version is appended to the front of its list when a generation
//! adds required fields; older versions stay so in-flight messages keep
//! decoding during a rollout.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use tally_core::channel::Channel;
use uuid::Uuid;

use crate::error::{DecodeAttempt, Error, Result};
use crate::models::{
    account_types, Funding, Referral, Settlement, SettlementKind, Suggestion, Vote,
    VoteContribution,
};

/// Default grant cohort for payloads that predate cohorts.
const DEFAULT_COHORT: &str = "control";

/// One decodable generation of a topic's payload.
pub struct SchemaVersion<T> {
    /// Version identifier used in decode errors, e.g. `settlement/v2`.
    pub id: &'static str,
    /// Decodes a raw payload into the canonical intermediate form.
    pub decode: fn(&[u8]) -> serde_json::Result<T>,
}

/// Tries each version in order and returns the first success.
///
/// # Errors
///
/// Returns [`Error::Decode`] with one attempt per version when none of
/// them accepts the payload.
pub fn try_decode<T>(raw: &[u8], versions: &'static [SchemaVersion<T>]) -> Result<T> {
    let mut attempts = Vec::with_capacity(versions.len());
    for version in versions {
        match (version.decode)(raw) {
            Ok(value) => return Ok(value),
            Err(err) => attempts.push(DecodeAttempt {
                version: version.id,
                reason: err.to_string(),
            }),
        }
    }
    Err(Error::Decode { attempts })
}

fn de_opt_uuid<'de, D>(deserializer: D) -> std::result::Result<Option<Uuid>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    match raw.as_deref() {
        None | Some("") => Ok(None),
        Some(s) => Uuid::parse_str(s).map(Some).map_err(serde::de::Error::custom),
    }
}

// ---------------------------------------------------------------------------
// Settlement payloads
// ---------------------------------------------------------------------------

/// Canonical settlement wire form, shaped like the newest version.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementPayload {
    /// Custodial address paid.
    pub address: String,
    /// Batch id from the payment batcher.
    pub settlement_id: String,
    /// Channel string.
    pub publisher: String,
    /// Internal currency name.
    #[serde(default)]
    pub altcurrency: String,
    /// External payout currency.
    pub currency: String,
    /// Owner account paid.
    pub owner: String,
    /// Internal amount, in probi.
    pub probi: Decimal,
    /// External payout amount.
    pub amount: Decimal,
    /// Deprecated flat fee, retained on the wire.
    #[serde(default)]
    pub fee: Decimal,
    /// Deprecated commission, retained on the wire.
    #[serde(default)]
    pub commission: Decimal,
    /// Platform cut, in probi.
    pub fees: Decimal,
    /// Payout category.
    #[serde(rename = "type")]
    pub kind: SettlementKind,
    /// Content hash of the report entry.
    #[serde(default)]
    pub hash: String,
    /// Upstream document id.
    #[serde(default)]
    pub document_id: String,
    /// When the custodian executed the payout.
    #[serde(default)]
    pub executed_at: Option<DateTime<Utc>>,
    /// Custodial wallet provider.
    #[serde(default)]
    pub wallet_provider: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SettlementV3 {
    address: String,
    settlement_id: String,
    publisher: String,
    #[serde(default)]
    altcurrency: String,
    currency: String,
    owner: String,
    probi: Decimal,
    amount: Decimal,
    #[serde(default)]
    fee: Decimal,
    #[serde(default)]
    commission: Decimal,
    fees: Decimal,
    #[serde(rename = "type")]
    kind: SettlementKind,
    hash: String,
    document_id: String,
    executed_at: DateTime<Utc>,
    wallet_provider: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SettlementV2 {
    address: String,
    settlement_id: String,
    publisher: String,
    #[serde(default)]
    altcurrency: String,
    currency: String,
    owner: String,
    probi: Decimal,
    amount: Decimal,
    #[serde(default)]
    fee: Decimal,
    #[serde(default)]
    commission: Decimal,
    fees: Decimal,
    #[serde(rename = "type")]
    kind: SettlementKind,
    hash: String,
    document_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SettlementV1 {
    address: String,
    settlement_id: String,
    publisher: String,
    #[serde(default)]
    altcurrency: String,
    currency: String,
    owner: String,
    probi: Decimal,
    amount: Decimal,
    #[serde(default)]
    fee: Decimal,
    #[serde(default)]
    commission: Decimal,
    fees: Decimal,
    #[serde(rename = "type")]
    kind: SettlementKind,
}

impl From<SettlementV3> for SettlementPayload {
    fn from(v: SettlementV3) -> Self {
        Self {
            address: v.address,
            settlement_id: v.settlement_id,
            publisher: v.publisher,
            altcurrency: v.altcurrency,
            currency: v.currency,
            owner: v.owner,
            probi: v.probi,
            amount: v.amount,
            fee: v.fee,
            commission: v.commission,
            fees: v.fees,
            kind: v.kind,
            hash: v.hash,
            document_id: v.document_id,
            executed_at: Some(v.executed_at),
            wallet_provider: v.wallet_provider,
        }
    }
}

impl From<SettlementV2> for SettlementPayload {
    fn from(v: SettlementV2) -> Self {
        Self {
            address: v.address,
            settlement_id: v.settlement_id,
            publisher: v.publisher,
            altcurrency: v.altcurrency,
            currency: v.currency,
            owner: v.owner,
            probi: v.probi,
            amount: v.amount,
            fee: v.fee,
            commission: v.commission,
            fees: v.fees,
            kind: v.kind,
            hash: v.hash,
            document_id: v.document_id,
            executed_at: None,
            wallet_provider: String::new(),
        }
    }
}

impl From<SettlementV1> for SettlementPayload {
    fn from(v: SettlementV1) -> Self {
        Self {
            address: v.address,
            settlement_id: v.settlement_id,
            publisher: v.publisher,
            altcurrency: v.altcurrency,
            currency: v.currency,
            owner: v.owner,
            probi: v.probi,
            amount: v.amount,
            fee: v.fee,
            commission: v.commission,
            fees: v.fees,
            kind: v.kind,
            hash: String::new(),
            document_id: String::new(),
            executed_at: None,
            wallet_provider: String::new(),
        }
    }
}

fn decode_settlement_v3(raw: &[u8]) -> serde_json::Result<SettlementPayload> {
    serde_json::from_slice::<SettlementV3>(raw).map(Into::into)
}

fn decode_settlement_v2(raw: &[u8]) -> serde_json::Result<SettlementPayload> {
    serde_json::from_slice::<SettlementV2>(raw).map(Into::into)
}

fn decode_settlement_v1(raw: &[u8]) -> serde_json::Result<SettlementPayload> {
    serde_json::from_slice::<SettlementV1>(raw).map(Into::into)
}

/// Settlement schema versions, newest first.
pub static SETTLEMENT_VERSIONS: [SchemaVersion<SettlementPayload>; 3] = [
    SchemaVersion { id: "settlement/v3", decode: decode_settlement_v3 },
    SchemaVersion { id: "settlement/v2", decode: decode_settlement_v2 },
    SchemaVersion { id: "settlement/v1", decode: decode_settlement_v1 },
];

/// Decodes a settlement payload and backfills generation gaps.
///
/// Payloads that predate `executedAt` are dated with the message's
/// enqueue time; payloads that predate `walletProvider` default to the
/// uphold custodian.
///
/// # Errors
///
/// Returns [`Error::Decode`] when no schema version accepts the payload.
pub fn decode_settlement(raw: &[u8], enqueued_at: DateTime<Utc>) -> Result<Settlement> {
    let payload = try_decode(raw, &SETTLEMENT_VERSIONS)?;
    let wallet_provider = if payload.wallet_provider.is_empty() {
        account_types::UPHOLD.to_string()
    } else {
        payload.wallet_provider
    };
    Ok(Settlement {
        kind: payload.kind,
        owner: payload.owner,
        channel: Channel::from(payload.publisher),
        probi: payload.probi,
        fees: payload.fees,
        amount: payload.amount,
        currency: payload.currency,
        address: payload.address,
        settlement_id: payload.settlement_id,
        document_id: payload.document_id,
        hash: payload.hash,
        executed_at: payload.executed_at.unwrap_or(enqueued_at),
        wallet_provider,
    })
}

/// Encodes a settlement as the newest schema version.
///
/// # Errors
///
/// Returns [`Error::Validation`] if serialization fails, which only
/// happens for non-finite decimal states.
pub fn encode_settlement(settlement: &Settlement) -> Result<Vec<u8>> {
    let payload = SettlementPayload {
        address: settlement.address.clone(),
        settlement_id: settlement.settlement_id.clone(),
        publisher: settlement.channel.to_string(),
        altcurrency: String::new(),
        currency: settlement.currency.clone(),
        owner: settlement.owner.clone(),
        probi: settlement.probi,
        amount: settlement.amount,
        fee: Decimal::ZERO,
        commission: Decimal::ZERO,
        fees: settlement.fees,
        kind: settlement.kind,
        hash: settlement.hash.clone(),
        document_id: settlement.document_id.clone(),
        executed_at: Some(settlement.executed_at),
        wallet_provider: settlement.wallet_provider.clone(),
    };
    serde_json::to_vec(&payload).map_err(|e| Error::Validation {
        reasons: vec![format!("settlement did not serialize: {e}")],
    })
}

// ---------------------------------------------------------------------------
// Referral payloads
// ---------------------------------------------------------------------------

/// Canonical referral wire form.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferralPayload {
    /// Referral transaction id.
    pub transaction_id: String,
    /// Channel the referral credits.
    pub channel_id: String,
    /// Owner account credited.
    pub owner_id: String,
    /// Download being credited.
    pub download_id: String,
    /// When the referral finalized.
    pub finalized_timestamp: DateTime<Utc>,
    /// When the download happened.
    #[serde(default)]
    pub download_timestamp: Option<DateTime<Utc>>,
    /// Promo code used, when any.
    #[serde(default)]
    pub referral_code: String,
    /// Country group pricing the referral.
    #[serde(default, deserialize_with = "de_opt_uuid")]
    pub country_group_id: Option<Uuid>,
    /// Download platform.
    #[serde(default)]
    pub platform: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReferralV2 {
    transaction_id: String,
    channel_id: String,
    owner_id: String,
    download_id: String,
    finalized_timestamp: DateTime<Utc>,
    #[serde(default)]
    download_timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    referral_code: String,
    #[serde(deserialize_with = "de_opt_uuid")]
    country_group_id: Option<Uuid>,
    platform: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReferralV1 {
    transaction_id: String,
    channel_id: String,
    owner_id: String,
    download_id: String,
    finalized_timestamp: DateTime<Utc>,
    #[serde(default)]
    download_timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    referral_code: String,
}

impl From<ReferralV2> for ReferralPayload {
    fn from(v: ReferralV2) -> Self {
        Self {
            transaction_id: v.transaction_id,
            channel_id: v.channel_id,
            owner_id: v.owner_id,
            download_id: v.download_id,
            finalized_timestamp: v.finalized_timestamp,
            download_timestamp: v.download_timestamp,
            referral_code: v.referral_code,
            country_group_id: v.country_group_id,
            platform: v.platform,
        }
    }
}

impl From<ReferralV1> for ReferralPayload {
    fn from(v: ReferralV1) -> Self {
        Self {
            transaction_id: v.transaction_id,
            channel_id: v.channel_id,
            owner_id: v.owner_id,
            download_id: v.download_id,
            finalized_timestamp: v.finalized_timestamp,
            download_timestamp: v.download_timestamp,
            referral_code: v.referral_code,
            country_group_id: None,
            platform: String::new(),
        }
    }
}

fn decode_referral_v2(raw: &[u8]) -> serde_json::Result<ReferralPayload> {
    serde_json::from_slice::<ReferralV2>(raw).map(Into::into)
}

fn decode_referral_v1(raw: &[u8]) -> serde_json::Result<ReferralPayload> {
    serde_json::from_slice::<ReferralV1>(raw).map(Into::into)
}

/// Referral schema versions, newest first.
pub static REFERRAL_VERSIONS: [SchemaVersion<ReferralPayload>; 2] = [
    SchemaVersion { id: "referral/v2", decode: decode_referral_v2 },
    SchemaVersion { id: "referral/v1", decode: decode_referral_v1 },
];

/// Encodes a referral as the newest schema version.
///
/// # Errors
///
/// Returns [`Error::Validation`] if serialization fails.
pub fn encode_referral(referral: &Referral) -> Result<Vec<u8>> {
    let payload = ReferralV2 {
        transaction_id: referral.transaction_id.clone(),
        channel_id: referral.channel.to_string(),
        owner_id: referral.owner.clone(),
        download_id: referral.download_id.clone(),
        finalized_timestamp: referral.finalized_at,
        download_timestamp: None,
        referral_code: String::new(),
        country_group_id: referral.country_group_id,
        platform: referral.platform.clone(),
    };
    serde_json::to_vec(&payload).map_err(|e| Error::Validation {
        reasons: vec![format!("referral did not serialize: {e}")],
    })
}

/// Decodes a referral payload.
///
/// The returned referral has no probi yet; the consumer resolves the
/// country group credit and currency rate before conversion.
///
/// # Errors
///
/// Returns [`Error::Decode`] when no schema version accepts the payload.
pub fn decode_referral(raw: &[u8]) -> Result<Referral> {
    let payload = try_decode(raw, &REFERRAL_VERSIONS)?;
    Ok(Referral {
        transaction_id: payload.transaction_id,
        download_id: payload.download_id,
        channel: Channel::from(payload.channel_id),
        owner: payload.owner_id,
        finalized_at: payload.finalized_timestamp,
        country_group_id: payload.country_group_id,
        platform: payload.platform,
        probi: Decimal::ZERO,
    })
}

// ---------------------------------------------------------------------------
// Vote payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ContributionV2 {
    id: String,
    channel: String,
    created_at: DateTime<Utc>,
    base_vote_value: Decimal,
    vote_tally: i64,
    funding_source: String,
    cohort: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ContributionV1 {
    id: String,
    channel: String,
    created_at: DateTime<Utc>,
    vote_tally: i64,
    funding_source: String,
}

/// Canonical contribution vote wire form.
#[derive(Debug, Clone)]
pub struct ContributionPayload {
    /// Event id.
    pub id: String,
    /// Channel voted for.
    pub channel: String,
    /// When the votes were cast.
    pub created_at: DateTime<Utc>,
    /// Value of one vote, when the payload carried it.
    pub base_vote_value: Option<Decimal>,
    /// Number of votes.
    pub vote_tally: i64,
    /// Wallet custodian funding the votes.
    pub funding_source: String,
    /// Grant cohort, when the payload carried it.
    pub cohort: Option<String>,
}

impl From<ContributionV2> for ContributionPayload {
    fn from(v: ContributionV2) -> Self {
        Self {
            id: v.id,
            channel: v.channel,
            created_at: v.created_at,
            base_vote_value: Some(v.base_vote_value),
            vote_tally: v.vote_tally,
            funding_source: v.funding_source,
            cohort: Some(v.cohort),
        }
    }
}

impl From<ContributionV1> for ContributionPayload {
    fn from(v: ContributionV1) -> Self {
        Self {
            id: v.id,
            channel: v.channel,
            created_at: v.created_at,
            base_vote_value: None,
            vote_tally: v.vote_tally,
            funding_source: v.funding_source,
            cohort: None,
        }
    }
}

fn decode_contribution_v2(raw: &[u8]) -> serde_json::Result<ContributionPayload> {
    serde_json::from_slice::<ContributionV2>(raw).map(Into::into)
}

fn decode_contribution_v1(raw: &[u8]) -> serde_json::Result<ContributionPayload> {
    serde_json::from_slice::<ContributionV1>(raw).map(Into::into)
}

/// Contribution vote schema versions, newest first.
pub static CONTRIBUTION_VERSIONS: [SchemaVersion<ContributionPayload>; 2] = [
    SchemaVersion { id: "contribution/v2", decode: decode_contribution_v2 },
    SchemaVersion { id: "contribution/v1", decode: decode_contribution_v1 },
];

/// Encodes a contribution vote as the newest schema version.
///
/// # Errors
///
/// Returns [`Error::Validation`] if serialization fails.
pub fn encode_contribution(vote: &VoteContribution) -> Result<Vec<u8>> {
    let payload = ContributionV2 {
        id: vote.id.clone(),
        channel: vote.channel.to_string(),
        created_at: vote.created_at,
        base_vote_value: vote.base_vote_value,
        vote_tally: vote.vote_tally,
        funding_source: vote.funding_source.clone(),
        cohort: vote.cohort.clone(),
    };
    serde_json::to_vec(&payload).map_err(|e| Error::Validation {
        reasons: vec![format!("contribution did not serialize: {e}")],
    })
}

/// Decodes a contribution vote payload.
///
/// Payloads that predate per-vote pricing fall back to `default_price`,
/// and pre-cohort payloads land in the control cohort.
///
/// # Errors
///
/// Returns [`Error::Decode`] when no schema version accepts the payload.
pub fn decode_contribution(raw: &[u8], default_price: Decimal) -> Result<Vote> {
    let payload = try_decode(raw, &CONTRIBUTION_VERSIONS)?;
    Ok(Vote::Contribution(VoteContribution {
        id: payload.id,
        channel: Channel::from(payload.channel),
        created_at: payload.created_at,
        base_vote_value: payload.base_vote_value.unwrap_or(default_price),
        vote_tally: payload.vote_tally,
        funding_source: payload.funding_source,
        cohort: payload.cohort.unwrap_or_else(|| DEFAULT_COHORT.to_string()),
    }))
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FundingPayload {
    #[serde(rename = "type")]
    kind: String,
    amount: Decimal,
    cohort: String,
    promotion: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SuggestionV2 {
    id: String,
    channel: String,
    created_at: DateTime<Utc>,
    total_amount: Decimal,
    order_id: String,
    funding: Vec<FundingPayload>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SuggestionV1 {
    id: String,
    channel: String,
    created_at: DateTime<Utc>,
    total_amount: Decimal,
    funding: Vec<FundingPayload>,
}

/// Canonical suggestion wire form.
#[derive(Debug, Clone)]
pub struct SuggestionPayload {
    /// Event id.
    pub id: String,
    /// Channel the suggestion credits.
    pub channel: String,
    /// When the suggestion was made.
    pub created_at: DateTime<Utc>,
    /// Total suggested amount.
    pub total_amount: Decimal,
    /// Order that triggered the suggestion, when the payload carried it.
    pub order_id: String,
    /// Funding split per promotion.
    pub funding: Vec<Funding>,
}

fn funding_from_payload(funding: Vec<FundingPayload>) -> Vec<Funding> {
    funding
        .into_iter()
        .map(|f| Funding {
            kind: f.kind,
            amount: f.amount,
            cohort: f.cohort,
            promotion: f.promotion,
        })
        .collect()
}

impl From<SuggestionV2> for SuggestionPayload {
    fn from(v: SuggestionV2) -> Self {
        Self {
            id: v.id,
            channel: v.channel,
            created_at: v.created_at,
            total_amount: v.total_amount,
            order_id: v.order_id,
            funding: funding_from_payload(v.funding),
        }
    }
}

impl From<SuggestionV1> for SuggestionPayload {
    fn from(v: SuggestionV1) -> Self {
        Self {
            id: v.id,
            channel: v.channel,
            created_at: v.created_at,
            total_amount: v.total_amount,
            order_id: String::new(),
            funding: funding_from_payload(v.funding),
        }
    }
}

fn decode_suggestion_v2(raw: &[u8]) -> serde_json::Result<SuggestionPayload> {
    serde_json::from_slice::<SuggestionV2>(raw).map(Into::into)
}

fn decode_suggestion_v1(raw: &[u8]) -> serde_json::Result<SuggestionPayload> {
    serde_json::from_slice::<SuggestionV1>(raw).map(Into::into)
}

/// Suggestion schema versions, newest first.
pub static SUGGESTION_VERSIONS: [SchemaVersion<SuggestionPayload>; 2] = [
    SchemaVersion { id: "suggestion/v2", decode: decode_suggestion_v2 },
    SchemaVersion { id: "suggestion/v1", decode: decode_suggestion_v1 },
];

/// Encodes a suggestion as the newest schema version.
///
/// # Errors
///
/// Returns [`Error::Validation`] if serialization fails.
pub fn encode_suggestion(suggestion: &Suggestion) -> Result<Vec<u8>> {
    let payload = SuggestionV2 {
        id: suggestion.id.clone(),
        channel: suggestion.channel.to_string(),
        created_at: suggestion.created_at,
        total_amount: suggestion.total_amount,
        order_id: suggestion.order_id.clone(),
        funding: suggestion
            .funding
            .iter()
            .map(|f| FundingPayload {
                kind: f.kind.clone(),
                amount: f.amount,
                cohort: f.cohort.clone(),
                promotion: f.promotion.clone(),
            })
            .collect(),
    };
    serde_json::to_vec(&payload).map_err(|e| Error::Validation {
        reasons: vec![format!("suggestion did not serialize: {e}")],
    })
}

/// Decodes a suggestion payload.
///
/// # Errors
///
/// Returns [`Error::Decode`] when no schema version accepts the payload.
pub fn decode_suggestion(raw: &[u8]) -> Result<Vote> {
    let payload = try_decode(raw, &SUGGESTION_VERSIONS)?;
    Ok(Vote::Suggestion(Suggestion {
        id: payload.id,
        channel: Channel::from(payload.channel),
        created_at: payload.created_at,
        total_amount: payload.total_amount,
        order_id: payload.order_id,
        funding: payload.funding,
    }))
}
