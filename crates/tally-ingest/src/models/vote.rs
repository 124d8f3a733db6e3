//! Live vote events: contributions and grant-funded suggestions.

use std::collections::HashSet;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tally_core::channel::Channel;

use super::ballot::{surveyor_id, Ballot, Surveyor};
use super::transaction::PROBI_PER_UNIT;

/// A batch of identical votes cast by one wallet for one channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoteContribution {
    /// Event id assigned upstream.
    pub id: String,
    /// Channel the votes were cast for.
    pub channel: Channel,
    /// When the votes were cast.
    pub created_at: DateTime<Utc>,
    /// Value of one vote, in whole base-currency units.
    pub base_vote_value: Decimal,
    /// Number of votes in this event.
    pub vote_tally: i64,
    /// Wallet custodian funding these votes; names the surveyor.
    pub funding_source: String,
    /// Grant cohort the votes belong to.
    pub cohort: String,
}

/// A single grant-funded contribution split across promotions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suggestion {
    /// Event id assigned upstream.
    pub id: String,
    /// Channel the suggestion credits.
    pub channel: Channel,
    /// When the suggestion was made.
    pub created_at: DateTime<Utc>,
    /// Total suggested amount, in whole base-currency units.
    pub total_amount: Decimal,
    /// Order that triggered the suggestion, when there was one.
    pub order_id: String,
    /// How the amount is funded, per promotion.
    pub funding: Vec<Funding>,
}

/// One promotion's share of a suggestion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Funding {
    /// Funding category, e.g. `ugp`.
    pub kind: String,
    /// Funded amount, in whole base-currency units.
    pub amount: Decimal,
    /// Grant cohort.
    pub cohort: String,
    /// Promotion id; names the surveyor.
    pub promotion: String,
}

/// A vote event from either stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Vote {
    /// Wallet votes, one surveyor per funding source.
    Contribution(VoteContribution),
    /// Grant suggestions, one surveyor per promotion.
    Suggestion(Suggestion),
}

impl Vote {
    /// Event id assigned upstream.
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::Contribution(vote) => &vote.id,
            Self::Suggestion(suggestion) => &suggestion.id,
        }
    }

    /// When the vote was cast; its date names the surveyors.
    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        match self {
            Self::Contribution(vote) => vote.created_at,
            Self::Suggestion(suggestion) => suggestion.created_at,
        }
    }

    /// The voting day this vote tallies under.
    #[must_use]
    pub fn voting_day(&self) -> NaiveDate {
        self.created_at().date_naive()
    }

    /// Collects every reason this vote cannot be tallied.
    #[must_use]
    pub fn validate(&self) -> Vec<String> {
        let mut reasons = Vec::new();
        match self {
            Self::Contribution(vote) => {
                if vote.id.is_empty() {
                    reasons.push("id is not set".to_string());
                }
                if vote.channel.is_empty() {
                    reasons.push("channel is not set".to_string());
                }
                if vote.vote_tally <= 0 {
                    reasons.push("vote tally must be positive".to_string());
                }
                if vote.base_vote_value <= Decimal::ZERO {
                    reasons.push("base vote value must be positive".to_string());
                }
                if vote.funding_source.is_empty() {
                    reasons.push("funding source is not set".to_string());
                }
            }
            Self::Suggestion(suggestion) => {
                if suggestion.id.is_empty() {
                    reasons.push("id is not set".to_string());
                }
                if suggestion.channel.is_empty() {
                    reasons.push("channel is not set".to_string());
                }
                if suggestion.total_amount <= Decimal::ZERO {
                    reasons.push("total amount must be positive".to_string());
                }
                if suggestion.funding.is_empty() {
                    reasons.push("funding is empty".to_string());
                }
                for funding in &suggestion.funding {
                    if funding.amount <= Decimal::ZERO {
                        reasons.push(format!(
                            "funding amount for promotion {} must be positive",
                            funding.promotion
                        ));
                    }
                    if funding.promotion.is_empty() {
                        reasons.push("funding promotion is not set".to_string());
                    }
                }
            }
        }
        reasons
    }

    /// Surveyor ids this vote tallies under, for the given voting day.
    #[must_use]
    pub fn surveyor_ids(&self, date: NaiveDate) -> Vec<String> {
        match self {
            Self::Contribution(vote) => vec![surveyor_id(date, &vote.funding_source)],
            Self::Suggestion(suggestion) => suggestion
                .funding
                .iter()
                .map(|funding| surveyor_id(date, &funding.promotion))
                .collect(),
        }
    }

    /// Builds the surveyors this vote needs, skipping ids in `existing`.
    ///
    /// Contribution surveyors age through the freeze lag before
    /// settling; suggestion surveyors are virtual and settle the next
    /// day. Prices are stored in probi.
    #[must_use]
    pub fn surveyors(
        &self,
        date: NaiveDate,
        default_price: Decimal,
        existing: &HashSet<String>,
        now: DateTime<Utc>,
    ) -> Vec<Surveyor> {
        match self {
            Self::Contribution(vote) => {
                let id = surveyor_id(date, &vote.funding_source);
                if existing.contains(&id) {
                    return Vec::new();
                }
                vec![Surveyor::new(
                    id,
                    vote.base_vote_value * PROBI_PER_UNIT,
                    false,
                    now,
                )]
            }
            Self::Suggestion(suggestion) => {
                let mut seen: HashSet<String> = HashSet::new();
                suggestion
                    .funding
                    .iter()
                    .filter_map(|funding| {
                        let id = surveyor_id(date, &funding.promotion);
                        if existing.contains(&id) || !seen.insert(id.clone()) {
                            return None;
                        }
                        Some(Surveyor::new(id, default_price * PROBI_PER_UNIT, true, now))
                    })
                    .collect()
            }
        }
    }

    /// Builds the ballots this vote casts, skipping frozen surveyors.
    ///
    /// Votes that arrive for an already frozen surveyor are dropped;
    /// their value settled when the surveyor froze and crediting them
    /// now would change a settled total.
    #[must_use]
    pub fn ballots(
        &self,
        date: NaiveDate,
        default_price: Decimal,
        frozen: &HashSet<String>,
    ) -> Vec<Ballot> {
        match self {
            Self::Contribution(vote) => {
                let id = surveyor_id(date, &vote.funding_source);
                if frozen.contains(&id) {
                    return Vec::new();
                }
                vec![Ballot::new(&vote.channel, vote.cohort.clone(), id, vote.vote_tally)]
            }
            Self::Suggestion(suggestion) => suggestion
                .funding
                .iter()
                .filter_map(|funding| {
                    let id = surveyor_id(date, &funding.promotion);
                    if frozen.contains(&id) {
                        return None;
                    }
                    let tally = (funding.amount / default_price).trunc().to_i64()?;
                    Some(Ballot::new(
                        &suggestion.channel,
                        funding.cohort.clone(),
                        id,
                        tally,
                    ))
                })
                .collect(),
        }
    }
}
