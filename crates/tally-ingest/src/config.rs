//! Service configuration for the ingestion pipeline.
//!
//! Configuration is explicit and immutable: it is built once at startup
//! (usually from the environment) and handed by reference to the
//! coordinator, the freeze scheduler, and the producer. Nothing in the
//! pipeline reads global state after construction.

use std::env;
use std::time::Duration;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::consumer::TopicKind;
use crate::error::{Error, Result};

/// Default sanity ceiling for a single event, in whole base-currency units.
fn default_max_amount() -> Decimal {
    Decimal::from(1_000_000_000_u64)
}

/// Default cut of a frozen ballot's value routed to the fees account.
fn default_fee_fraction() -> Decimal {
    // 5%
    Decimal::new(5, 2)
}

/// Default value of one vote, in whole base-currency units.
fn default_vote_price() -> Decimal {
    Decimal::new(25, 2)
}

fn default_brokers() -> String {
    "localhost:9092".to_string()
}

fn default_group_id() -> String {
    "tally-ingest".to_string()
}

fn default_environment() -> String {
    "local".to_string()
}

fn default_base_currency() -> String {
    "BAT".to_string()
}

fn default_batch_limit() -> usize {
    100
}

fn default_fetch_timeout_ms() -> u64 {
    1_000
}

fn default_rejoin_backoff_ms() -> u64 {
    1_000
}

fn default_freeze_lag_days() -> i64 {
    1
}

fn default_freeze_interval_secs() -> u64 {
    300
}

fn default_topic_partitions() -> i32 {
    1
}

fn default_topic_replication() -> i32 {
    1
}

/// Topic names for each consumed event stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicMap {
    /// Settlement payout events.
    pub settlement: String,
    /// Vote contribution events.
    pub contribution: String,
    /// Referral finalization events.
    pub referral: String,
    /// Grant suggestion events.
    pub suggestion: String,
}

impl TopicMap {
    /// Builds the conventional topic names for an environment prefix.
    #[must_use]
    pub fn with_prefix(environment: &str) -> Self {
        Self {
            settlement: format!("{environment}.settlement.payout"),
            contribution: format!("{environment}.payment.vote"),
            referral: format!("{environment}.promo.referral"),
            suggestion: format!("{environment}.grant.suggestion"),
        }
    }

    /// Returns the topic name for a stream kind.
    #[must_use]
    pub fn topic_for(&self, kind: TopicKind) -> &str {
        match kind {
            TopicKind::Settlement => &self.settlement,
            TopicKind::Contribution => &self.contribution,
            TopicKind::Referral => &self.referral,
            TopicKind::Suggestion => &self.suggestion,
        }
    }

    /// Returns all configured topic names.
    #[must_use]
    pub fn all(&self) -> Vec<&str> {
        TopicKind::ALL
            .iter()
            .map(|kind| self.topic_for(*kind))
            .collect()
    }
}

/// Configuration for the ingestion pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Kafka bootstrap servers.
    #[serde(default = "default_brokers")]
    pub brokers: String,
    /// Consumer group id shared by every topic worker.
    #[serde(default = "default_group_id")]
    pub group_id: String,
    /// Deployment environment, used as the topic name prefix.
    #[serde(default = "default_environment")]
    pub environment: String,
    /// Postgres connection string.
    pub database_url: String,
    /// Topic names per consumed stream.
    pub topics: TopicMap,
    /// Maximum messages drained into one batch before handling.
    #[serde(default = "default_batch_limit")]
    pub batch_limit: usize,
    /// How long a batch read waits for more messages before handling
    /// what it has.
    #[serde(default = "default_fetch_timeout_ms")]
    pub fetch_timeout_ms: u64,
    /// Pause before rebuilding consumers after a group rejoin.
    #[serde(default = "default_rejoin_backoff_ms")]
    pub rejoin_backoff_ms: u64,
    /// Fraction of each frozen ballot's value routed to the fees account.
    #[serde(default = "default_fee_fraction")]
    pub fee_fraction: Decimal,
    /// Value of one suggestion vote, in whole base-currency units.
    #[serde(default = "default_vote_price")]
    pub vote_price: Decimal,
    /// Sanity ceiling per event, in whole base-currency units. Events
    /// above it are ignored, not rejected.
    #[serde(default = "default_max_amount")]
    pub max_amount: Decimal,
    /// Days a surveyor must age past its creation date before freezing.
    #[serde(default = "default_freeze_lag_days")]
    pub freeze_lag_days: i64,
    /// Interval between freeze passes.
    #[serde(default = "default_freeze_interval_secs")]
    pub freeze_interval_secs: u64,
    /// Base currency referrals are credited in.
    #[serde(default = "default_base_currency")]
    pub base_currency: String,
    /// Base URL of the currency rate service.
    #[serde(default)]
    pub rates_url: String,
    /// Bearer token for the rate service, if it requires one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rates_token: Option<String>,
    /// Partition count used when creating missing topics.
    #[serde(default = "default_topic_partitions")]
    pub topic_partitions: i32,
    /// Replication factor used when creating missing topics.
    #[serde(default = "default_topic_replication")]
    pub topic_replication: i32,
}

impl IngestConfig {
    /// Builds a configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `DATABASE_URL` is unset or a numeric
    /// variable fails to parse.
    pub fn from_env() -> Result<Self> {
        let environment = env_or("ENV", default_environment);
        let config = Self {
            brokers: env_or("KAFKA_BROKERS", default_brokers),
            group_id: env_or("KAFKA_GROUP_ID", default_group_id),
            database_url: env::var("DATABASE_URL")
                .map_err(|_| Error::config("DATABASE_URL must be set"))?,
            topics: TopicMap::with_prefix(&environment),
            environment,
            batch_limit: parse_env("KAFKA_BATCH_LIMIT", default_batch_limit)?,
            fetch_timeout_ms: parse_env("KAFKA_FETCH_TIMEOUT_MS", default_fetch_timeout_ms)?,
            rejoin_backoff_ms: parse_env("KAFKA_REJOIN_BACKOFF_MS", default_rejoin_backoff_ms)?,
            fee_fraction: parse_env("FEE_FRACTION", default_fee_fraction)?,
            vote_price: parse_env("VOTE_PRICE", default_vote_price)?,
            max_amount: parse_env("MAX_EVENT_AMOUNT", default_max_amount)?,
            freeze_lag_days: parse_env("FREEZE_LAG_DAYS", default_freeze_lag_days)?,
            freeze_interval_secs: parse_env("FREEZE_INTERVAL_SECS", default_freeze_interval_secs)?,
            base_currency: env_or("BASE_CURRENCY", default_base_currency),
            rates_url: env::var("RATES_URL").unwrap_or_default(),
            rates_token: env::var("RATES_TOKEN").ok(),
            topic_partitions: parse_env("KAFKA_TOPIC_PARTITIONS", default_topic_partitions)?,
            topic_replication: parse_env("KAFKA_TOPIC_REPLICATION", default_topic_replication)?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Checks invariants that would otherwise surface as bad ledger math.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when a bound is violated.
    pub fn validate(&self) -> Result<()> {
        if self.fee_fraction < Decimal::ZERO || self.fee_fraction >= Decimal::ONE {
            return Err(Error::config("fee_fraction must be in [0, 1)"));
        }
        if self.vote_price <= Decimal::ZERO {
            return Err(Error::config("vote_price must be positive"));
        }
        if self.max_amount <= Decimal::ZERO {
            return Err(Error::config("max_amount must be positive"));
        }
        if self.batch_limit == 0 {
            return Err(Error::config("batch_limit must be at least 1"));
        }
        if self.freeze_lag_days < 0 {
            return Err(Error::config("freeze_lag_days must not be negative"));
        }
        Ok(())
    }

    /// Batch read timeout as a [`Duration`].
    #[must_use]
    pub const fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    /// Rejoin backoff as a [`Duration`].
    #[must_use]
    pub const fn rejoin_backoff(&self) -> Duration {
        Duration::from_millis(self.rejoin_backoff_ms)
    }

    /// Freeze pass interval as a [`Duration`].
    #[must_use]
    pub const fn freeze_interval(&self) -> Duration {
        Duration::from_secs(self.freeze_interval_secs)
    }
}

fn env_or(key: &str, default: fn() -> String) -> String {
    env::var(key).unwrap_or_else(|_| default())
}

fn parse_env<T: std::str::FromStr>(key: &str, default: fn() -> T) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|e| Error::config(format!("{key} is invalid: {e}"))),
        Err(_) => Ok(default()),
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// A valid configuration pointed at local defaults.
    pub(crate) fn local() -> IngestConfig {
        IngestConfig {
            brokers: default_brokers(),
            group_id: default_group_id(),
            environment: "test".to_string(),
            database_url: "postgres://localhost/tally".to_string(),
            topics: TopicMap::with_prefix("test"),
            batch_limit: default_batch_limit(),
            fetch_timeout_ms: default_fetch_timeout_ms(),
            rejoin_backoff_ms: default_rejoin_backoff_ms(),
            fee_fraction: default_fee_fraction(),
            vote_price: default_vote_price(),
            max_amount: default_max_amount(),
            freeze_lag_days: default_freeze_lag_days(),
            freeze_interval_secs: default_freeze_interval_secs(),
            base_currency: default_base_currency(),
            rates_url: String::new(),
            rates_token: None,
            topic_partitions: default_topic_partitions(),
            topic_replication: default_topic_replication(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::local as base_config;
    use super::*;

    #[test]
    fn topic_map_uses_environment_prefix() {
        let topics = TopicMap::with_prefix("staging");
        assert_eq!(topics.settlement, "staging.settlement.payout");
        assert_eq!(topics.topic_for(TopicKind::Suggestion), "staging.grant.suggestion");
        assert_eq!(topics.all().len(), 4);
    }

    #[test]
    fn defaults_pass_validation() {
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn validation_rejects_bad_bounds() {
        let mut config = base_config();
        config.fee_fraction = Decimal::ONE;
        assert!(config.validate().is_err());

        let mut config = base_config();
        config.vote_price = Decimal::ZERO;
        assert!(config.validate().is_err());

        let mut config = base_config();
        config.batch_limit = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn config_deserializes_with_defaults() {
        let json = r#"{
            "database_url": "postgres://localhost/tally",
            "topics": {
                "settlement": "local.settlement.payout",
                "contribution": "local.payment.vote",
                "referral": "local.promo.referral",
                "suggestion": "local.grant.suggestion"
            }
        }"#;
        let config: IngestConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.batch_limit, 100);
        assert_eq!(config.fee_fraction, Decimal::new(5, 2));
        assert_eq!(config.freeze_lag_days, 1);
    }
}
