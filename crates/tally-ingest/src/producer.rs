//! Queue producer and topic provisioning.
//!
//! Everything written to the queue is encoded with its topic's newest
//! schema version; older versions exist only on the decode path.
//! Upstream services and replay tooling publish through
//! [`QueueProducer`], and the daemon calls [`ensure_topics`] once at
//! startup so a fresh broker works without manual setup.

use std::time::Duration;

use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication};
use rdkafka::client::DefaultClientContext;
use rdkafka::error::KafkaError;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::types::RDKafkaErrorCode;
use rdkafka::ClientConfig;
use tracing::{debug, info};

use crate::config::{IngestConfig, TopicMap};
use crate::error::{Error, Result};
use crate::models::{Referral, Settlement, Suggestion, VoteContribution};
use crate::schema;

const SEND_TIMEOUT: Duration = Duration::from_secs(10);

/// Publishes events onto the consumed topics.
pub struct QueueProducer {
    producer: FutureProducer,
    topics: TopicMap,
}

impl QueueProducer {
    /// Creates a producer against the configured brokers.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Queue`] if the underlying client rejects the
    /// configuration.
    pub fn new(config: &IngestConfig) -> Result<Self> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("message.timeout.ms", "30000")
            .create()?;
        Ok(Self {
            producer,
            topics: config.topics.clone(),
        })
    }

    /// Publishes a settlement report entry, keyed by settlement id.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Queue`] when delivery fails or times out.
    pub async fn send_settlement(&self, settlement: &Settlement) -> Result<()> {
        let payload = schema::encode_settlement(settlement)?;
        self.send(&self.topics.settlement, &settlement.settlement_id, &payload)
            .await
    }

    /// Publishes a finalized referral, keyed by transaction id.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Queue`] when delivery fails or times out.
    pub async fn send_referral(&self, referral: &Referral) -> Result<()> {
        let payload = schema::encode_referral(referral)?;
        self.send(&self.topics.referral, &referral.transaction_id, &payload)
            .await
    }

    /// Publishes a contribution vote event, keyed by event id.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Queue`] when delivery fails or times out.
    pub async fn send_contribution(&self, vote: &VoteContribution) -> Result<()> {
        let payload = schema::encode_contribution(vote)?;
        self.send(&self.topics.contribution, &vote.id, &payload).await
    }

    /// Publishes a suggestion event, keyed by event id.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Queue`] when delivery fails or times out.
    pub async fn send_suggestion(&self, suggestion: &Suggestion) -> Result<()> {
        let payload = schema::encode_suggestion(suggestion)?;
        self.send(&self.topics.suggestion, &suggestion.id, &payload)
            .await
    }

    async fn send(&self, topic: &str, key: &str, payload: &[u8]) -> Result<()> {
        let record = FutureRecord::to(topic).key(key).payload(payload);
        self.producer
            .send(record, SEND_TIMEOUT)
            .await
            .map_err(|(err, _)| Error::Queue(err))?;
        Ok(())
    }
}

/// Creates any configured topic the broker does not have yet.
///
/// Topics that already exist are left untouched.
///
/// # Errors
///
/// Returns [`Error::Queue`] when the admin call or a topic creation
/// fails for any reason other than the topic already existing.
pub async fn ensure_topics(config: &IngestConfig) -> Result<()> {
    let admin: AdminClient<DefaultClientContext> = ClientConfig::new()
        .set("bootstrap.servers", &config.brokers)
        .create()?;

    let wanted: Vec<NewTopic<'_>> = config
        .topics
        .all()
        .into_iter()
        .map(|name| {
            NewTopic::new(
                name,
                config.topic_partitions,
                TopicReplication::Fixed(config.topic_replication),
            )
        })
        .collect();

    let results = admin.create_topics(wanted.iter(), &AdminOptions::new()).await?;
    for result in results {
        match result {
            Ok(name) => info!(topic = %name, "created topic"),
            Err((name, RDKafkaErrorCode::TopicAlreadyExists)) => {
                debug!(topic = %name, "topic already exists");
            }
            Err((_, code)) => return Err(Error::Queue(KafkaError::AdminOp(code))),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_support;

    #[test]
    fn producer_builds_without_a_broker() {
        // Client creation is lazy; the broker is only contacted on send.
        let config = test_support::local();
        assert!(QueueProducer::new(&config).is_ok());
    }
}
