//! Topic workers and the consumer group coordinator.
//!
//! One worker owns one topic. Each worker drains Kafka messages into
//! bounded batches, decodes them, stages the resulting ledger writes in
//! a single store batch, commits the Kafka offsets, and only then
//! commits the database transaction. Offsets land first on purpose: a
//! crash between the two commits loses the batch's messages instead of
//! redelivering them, so a committed ledger write is never followed by
//! a replay that would double-count ballot tallies. Ledger rows
//! themselves are additionally guarded by insert-or-ignore ids.
//!
//! The [`Coordinator`] supervises one worker per topic. When any worker
//! fails, the whole generation is torn down, the group rejoins after a
//! backoff, and Kafka redelivers everything past the last committed
//! offsets.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, TimeZone, Utc};
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{Message, OwnedMessage};
use rdkafka::{ClientConfig, Offset, TopicPartitionList};
use rust_decimal::Decimal;
use tally_core::observability::consume_span;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument};
use uuid::Uuid;

use crate::config::IngestConfig;
use crate::error::{Error, Result};
use crate::metrics::IngestMetrics;
use crate::models::{convert_to_transactions, Convertable, Referral, PROBI_PER_UNIT};
use crate::rates::RateClient;
use crate::schema;
use crate::store::{CountryGroup, LedgerStore};
use crate::surveyors::stage_votes;

/// Credit for referrals reported without a country group, in whole
/// base-currency units. Predates country-group pricing.
const DEFAULT_REFERRAL_CREDIT: Decimal = Decimal::from_parts(5, 0, 0, false, 0);

/// The consumed event streams. The set is closed; each kind maps to
/// exactly one topic and one decoding path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TopicKind {
    /// Settlement payout report entries.
    Settlement,
    /// Vote contribution events.
    Contribution,
    /// Referral finalization events.
    Referral,
    /// Grant suggestion events.
    Suggestion,
}

impl TopicKind {
    /// Every consumed stream, in worker spawn order.
    pub const ALL: [TopicKind; 4] = [
        TopicKind::Settlement,
        TopicKind::Contribution,
        TopicKind::Referral,
        TopicKind::Suggestion,
    ];

    /// Stable name used in logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Settlement => "settlement",
            Self::Contribution => "contribution",
            Self::Referral => "referral",
            Self::Suggestion => "suggestion",
        }
    }
}

impl std::fmt::Display for TopicKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fills each referral's probi from its country group credit and the
/// current currency rates.
///
/// Rates are fetched once for the distinct non-base currencies in the
/// batch. Referrals without a group get the flat legacy credit.
///
/// # Errors
///
/// Returns [`Error::UnknownCountryGroup`] for a group id the store does
/// not list as active, or a rate error from the client.
pub(crate) async fn resolve_referral_probi(
    referrals: &mut [Referral],
    groups: &[CountryGroup],
    rates: &dyn RateClient,
    base_currency: &str,
) -> Result<()> {
    let by_id: HashMap<Uuid, &CountryGroup> = groups.iter().map(|g| (g.id, g)).collect();

    let mut currencies: Vec<String> = Vec::new();
    for referral in referrals.iter() {
        let Some(group_id) = referral.country_group_id else {
            continue;
        };
        let group = by_id.get(&group_id).ok_or_else(|| Error::UnknownCountryGroup {
            group_id: group_id.to_string(),
        })?;
        if !group.currency.eq_ignore_ascii_case(base_currency)
            && !currencies.contains(&group.currency)
        {
            currencies.push(group.currency.clone());
        }
    }

    let rate_map = if currencies.is_empty() {
        HashMap::new()
    } else {
        rates.fetch_rates(base_currency, &currencies).await?
    };

    for referral in referrals.iter_mut() {
        referral.probi = match referral.country_group_id {
            None => DEFAULT_REFERRAL_CREDIT * PROBI_PER_UNIT,
            Some(group_id) => {
                let group = by_id.get(&group_id).ok_or_else(|| Error::UnknownCountryGroup {
                    group_id: group_id.to_string(),
                })?;
                if group.currency.eq_ignore_ascii_case(base_currency) {
                    (group.amount * PROBI_PER_UNIT).trunc()
                } else {
                    let rate = rate_map.get(&group.currency).ok_or_else(|| {
                        Error::MissingRate {
                            currency: group.currency.clone(),
                        }
                    })?;
                    (group.amount * PROBI_PER_UNIT / rate).trunc()
                }
            }
        };
    }
    Ok(())
}

/// When the queue recorded the message, falling back to now for
/// messages without a usable timestamp.
fn enqueue_time(message: &OwnedMessage) -> DateTime<Utc> {
    message
        .timestamp()
        .to_millis()
        .and_then(|millis| Utc.timestamp_millis_opt(millis).single())
        .unwrap_or_else(Utc::now)
}

/// One consumer for one topic.
pub struct TopicWorker {
    kind: TopicKind,
    topic: String,
    config: Arc<IngestConfig>,
    store: Arc<dyn LedgerStore>,
    rates: Arc<dyn RateClient>,
    metrics: IngestMetrics,
    cancel: CancellationToken,
}

impl TopicWorker {
    /// Creates a worker for one stream kind.
    #[must_use]
    pub fn new(
        kind: TopicKind,
        config: Arc<IngestConfig>,
        store: Arc<dyn LedgerStore>,
        rates: Arc<dyn RateClient>,
        metrics: IngestMetrics,
        cancel: CancellationToken,
    ) -> Self {
        let topic = config.topics.topic_for(kind).to_string();
        Self {
            kind,
            topic,
            config,
            store,
            rates,
            metrics,
            cancel,
        }
    }

    fn build_consumer(&self) -> Result<StreamConsumer> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &self.config.brokers)
            .set("group.id", &self.config.group_id)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "earliest")
            .set("enable.partition.eof", "false")
            .create()?;
        consumer.subscribe(&[&self.topic])?;
        Ok(consumer)
    }

    /// Consumes batches until cancelled or a batch fails.
    ///
    /// # Errors
    ///
    /// Returns the first batch handling error; the coordinator treats
    /// any worker error as a generation teardown.
    pub async fn run(self) -> Result<()> {
        let consumer = self.build_consumer()?;
        info!(topic = %self.topic, kind = %self.kind, "worker consuming");
        loop {
            let messages = self.read_batch(&consumer).await?;
            if self.cancel.is_cancelled() {
                return Ok(());
            }
            if messages.is_empty() {
                continue;
            }

            self.metrics.record_messages(&self.topic, messages.len());
            let started = Instant::now();
            let span = consume_span(&self.topic, messages.len());
            match self.handle_batch(&consumer, &messages).instrument(span).await {
                Ok(()) => {
                    self.metrics.record_batch(&self.topic, "committed");
                    self.metrics
                        .observe_batch_duration(&self.topic, started.elapsed());
                }
                Err(err) => {
                    self.metrics.record_batch(&self.topic, "failed");
                    return Err(err);
                }
            }
        }
    }

    /// Drains up to `batch_limit` messages, stopping early when the
    /// fetch timeout passes with nothing new.
    async fn read_batch(&self, consumer: &StreamConsumer) -> Result<Vec<OwnedMessage>> {
        let mut messages = Vec::new();
        while messages.len() < self.config.batch_limit {
            tokio::select! {
                () = self.cancel.cancelled() => break,
                next = tokio::time::timeout(self.config.fetch_timeout(), consumer.recv()) => {
                    match next {
                        Ok(Ok(message)) => messages.push(message.detach()),
                        Ok(Err(err)) => return Err(Error::Queue(err)),
                        // Idle topic; hand back what we have.
                        Err(_) => break,
                    }
                }
            }
        }
        Ok(messages)
    }

    fn count_ignored(&self, events: &[Convertable]) {
        for event in events {
            if event.should_ignore(self.config.max_amount) {
                self.metrics.record_ignored(&self.topic);
            }
        }
    }

    /// Handles one batch: decode, stage writes, commit offsets, commit
    /// the database transaction.
    async fn handle_batch(
        &self,
        consumer: &StreamConsumer,
        messages: &[OwnedMessage],
    ) -> Result<()> {
        let mut batch = self.store.begin().await?;

        match self.kind {
            TopicKind::Settlement => {
                let mut events = Vec::new();
                for message in messages {
                    let Some(payload) = message.payload() else {
                        debug!(topic = %self.topic, offset = message.offset(), "skipping empty payload");
                        continue;
                    };
                    let settlement = schema::decode_settlement(payload, enqueue_time(message))
                        .inspect_err(|_| self.metrics.record_decode_failure(&self.topic))?;
                    events.push(Convertable::Settlement(settlement));
                }
                self.count_ignored(&events);
                let rows = convert_to_transactions(&events, self.config.max_amount)?;
                let inserted = batch.insert_transactions(&rows).await?;
                self.metrics.record_transactions_inserted(inserted);
            }
            TopicKind::Referral => {
                let mut referrals = Vec::new();
                for message in messages {
                    let Some(payload) = message.payload() else {
                        debug!(topic = %self.topic, offset = message.offset(), "skipping empty payload");
                        continue;
                    };
                    let referral = schema::decode_referral(payload)
                        .inspect_err(|_| self.metrics.record_decode_failure(&self.topic))?;
                    referrals.push(referral);
                }
                let groups = self.store.active_country_groups().await?;
                resolve_referral_probi(
                    &mut referrals,
                    &groups,
                    self.rates.as_ref(),
                    &self.config.base_currency,
                )
                .await?;
                let events: Vec<Convertable> =
                    referrals.into_iter().map(Convertable::Referral).collect();
                self.count_ignored(&events);
                let rows = convert_to_transactions(&events, self.config.max_amount)?;
                let inserted = batch.insert_transactions(&rows).await?;
                self.metrics.record_transactions_inserted(inserted);
            }
            TopicKind::Contribution | TopicKind::Suggestion => {
                let mut votes = Vec::new();
                for message in messages {
                    let Some(payload) = message.payload() else {
                        debug!(topic = %self.topic, offset = message.offset(), "skipping empty payload");
                        continue;
                    };
                    let vote = match self.kind {
                        TopicKind::Contribution => {
                            schema::decode_contribution(payload, self.config.vote_price)
                        }
                        _ => schema::decode_suggestion(payload),
                    }
                    .inspect_err(|_| self.metrics.record_decode_failure(&self.topic))?;
                    votes.push(vote);
                }
                let upserted =
                    stage_votes(batch.as_mut(), &votes, self.config.vote_price).await?;
                self.metrics.record_ballots_upserted(upserted);
            }
        }

        // Offsets first. Losing a batch on a crash between the two
        // commits is recoverable; replaying one on top of committed
        // ballot tallies is not.
        let tpl = offsets_to_commit(messages)?;
        consumer.commit(&tpl, CommitMode::Sync)?;
        batch
            .commit()
            .await
            .map_err(|err| Error::commit_sequence("database", err.to_string()))?;
        Ok(())
    }
}

/// Builds the offset set acknowledging every message in the batch,
/// keeping the highest offset per partition.
fn offsets_to_commit(messages: &[OwnedMessage]) -> Result<TopicPartitionList> {
    let mut highest: HashMap<(&str, i32), i64> = HashMap::new();
    for message in messages {
        let entry = highest
            .entry((message.topic(), message.partition()))
            .or_insert(message.offset());
        if message.offset() > *entry {
            *entry = message.offset();
        }
    }
    let mut tpl = TopicPartitionList::new();
    for ((topic, partition), offset) in highest {
        tpl.add_partition_offset(topic, partition, Offset::Offset(offset + 1))?;
    }
    Ok(tpl)
}

/// Supervises one worker per topic and drives group rejoins.
pub struct Coordinator {
    config: Arc<IngestConfig>,
    store: Arc<dyn LedgerStore>,
    rates: Arc<dyn RateClient>,
    metrics: IngestMetrics,
    cancel: CancellationToken,
}

impl Coordinator {
    /// Creates a coordinator over all consumed topics.
    #[must_use]
    pub fn new(
        config: Arc<IngestConfig>,
        store: Arc<dyn LedgerStore>,
        rates: Arc<dyn RateClient>,
        metrics: IngestMetrics,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            store,
            rates,
            metrics,
            cancel,
        }
    }

    /// Runs worker generations until shutdown.
    ///
    /// Any worker error cancels the whole generation; every worker
    /// drains, the group rejoins after the configured backoff, and
    /// Kafka redelivers from the last committed offsets.
    ///
    /// # Errors
    ///
    /// Currently none besides propagated panics; batch errors are
    /// absorbed into the rejoin cycle.
    pub async fn run(self) -> Result<()> {
        loop {
            if self.cancel.is_cancelled() {
                return Ok(());
            }

            let generation = self.cancel.child_token();
            let (status_tx, mut status_rx) = mpsc::channel(TopicKind::ALL.len());
            let mut handles = Vec::with_capacity(TopicKind::ALL.len());
            for kind in TopicKind::ALL {
                let worker = TopicWorker::new(
                    kind,
                    Arc::clone(&self.config),
                    Arc::clone(&self.store),
                    Arc::clone(&self.rates),
                    self.metrics.clone(),
                    generation.clone(),
                );
                let status_tx = status_tx.clone();
                handles.push(tokio::spawn(async move {
                    let result = worker.run().await;
                    let _ = status_tx.send((kind, result)).await;
                }));
            }
            drop(status_tx);

            let first_exit = tokio::select! {
                () = self.cancel.cancelled() => None,
                exited = status_rx.recv() => exited,
            };

            generation.cancel();
            while status_rx.recv().await.is_some() {}
            for handle in handles {
                let _ = handle.await;
            }

            match first_exit {
                None | Some((_, Ok(()))) => {
                    if self.cancel.is_cancelled() {
                        return Ok(());
                    }
                }
                Some((kind, Err(err))) => {
                    let topic = self.config.topics.topic_for(kind);
                    if err.is_transient_queue() {
                        warn!(topic, error = %err, "transient queue error, rejoining group");
                    } else {
                        error!(topic, error = %err, "worker failed, rejoining group");
                    }
                    self.metrics.record_rejoin(topic);
                }
            }

            tokio::select! {
                () = self.cancel.cancelled() => return Ok(()),
                () = tokio::time::sleep(self.config.rejoin_backoff()) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use rust_decimal_macros::dec;
    use tally_core::channel::Channel;
    use uuid::uuid;

    use super::*;
    use crate::rates::FixedRates;

    fn group(id: Uuid, amount: Decimal, currency: &str) -> CountryGroup {
        CountryGroup {
            id,
            name: "test group".to_string(),
            amount,
            currency: currency.to_string(),
            active_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        }
    }

    fn referral(group_id: Option<Uuid>) -> Referral {
        Referral {
            transaction_id: "tx-1".to_string(),
            download_id: "dl-1".to_string(),
            channel: Channel::from("brave.com"),
            owner: "publishers#uuid:1c2c3c4c".to_string(),
            finalized_at: Utc.with_ymd_and_hms(2024, 3, 10, 9, 30, 0).unwrap(),
            country_group_id: group_id,
            platform: "desktop".to_string(),
            probi: Decimal::ZERO,
        }
    }

    const GROUP_A: Uuid = uuid!("11111111-2222-3333-4444-555555555555");

    #[tokio::test]
    async fn referral_probi_converts_group_credit_through_the_rate() {
        // 6.5 USD at 0.5 USD per BAT is 13 BAT.
        let groups = vec![group(GROUP_A, dec!(6.5), "USD")];
        let rates = FixedRates::new(vec![("USD".to_string(), dec!(0.5))]);
        let mut referrals = vec![referral(Some(GROUP_A))];

        resolve_referral_probi(&mut referrals, &groups, &rates, "BAT")
            .await
            .unwrap();
        assert_eq!(referrals[0].probi, dec!(13) * PROBI_PER_UNIT);
    }

    #[tokio::test]
    async fn base_currency_group_needs_no_rate() {
        let groups = vec![group(GROUP_A, dec!(2), "BAT")];
        let rates = FixedRates::new(Vec::new());
        let mut referrals = vec![referral(Some(GROUP_A))];

        resolve_referral_probi(&mut referrals, &groups, &rates, "BAT")
            .await
            .unwrap();
        assert_eq!(referrals[0].probi, dec!(2) * PROBI_PER_UNIT);
    }

    #[tokio::test]
    async fn referral_without_group_gets_the_legacy_credit() {
        let rates = FixedRates::new(Vec::new());
        let mut referrals = vec![referral(None)];

        resolve_referral_probi(&mut referrals, &[], &rates, "BAT")
            .await
            .unwrap();
        assert_eq!(referrals[0].probi, dec!(5) * PROBI_PER_UNIT);
    }

    #[tokio::test]
    async fn unknown_group_is_an_error() {
        let rates = FixedRates::new(Vec::new());
        let mut referrals = vec![referral(Some(GROUP_A))];

        let err = resolve_referral_probi(&mut referrals, &[], &rates, "BAT")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UnknownCountryGroup { .. }));
    }

    #[tokio::test]
    async fn probi_truncates_to_whole_units() {
        // 1 USD at 0.3 USD per BAT is 3.33... BAT; probi must truncate.
        let groups = vec![group(GROUP_A, dec!(1), "USD")];
        let rates = FixedRates::new(vec![("USD".to_string(), dec!(0.3))]);
        let mut referrals = vec![referral(Some(GROUP_A))];

        resolve_referral_probi(&mut referrals, &groups, &rates, "BAT")
            .await
            .unwrap();
        assert_eq!(referrals[0].probi, referrals[0].probi.trunc());
        assert!(referrals[0].probi > dec!(3) * PROBI_PER_UNIT);
        assert!(referrals[0].probi < dec!(4) * PROBI_PER_UNIT);
    }

    #[test]
    fn topic_kinds_cover_every_stream() {
        assert_eq!(TopicKind::ALL.len(), 4);
        assert_eq!(TopicKind::Settlement.as_str(), "settlement");
        assert_eq!(TopicKind::Suggestion.to_string(), "suggestion");
    }

    #[test]
    fn offsets_commit_past_the_highest_message() {
        let tpl = offsets_to_commit(&[
            OwnedMessage::new(None, None, "t".to_string(), rdkafka::Timestamp::NotAvailable, 0, 7, None),
            OwnedMessage::new(None, None, "t".to_string(), rdkafka::Timestamp::NotAvailable, 0, 3, None),
        ])
        .unwrap();
        let elements = tpl.elements_for_topic("t");
        assert_eq!(elements.len(), 1);
        assert_eq!(elements[0].offset(), Offset::Offset(8));
    }
}
