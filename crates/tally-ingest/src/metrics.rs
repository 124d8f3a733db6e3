//! Observability metrics for the ingestion pipeline.
//!
//! ## Metrics Exported
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `tally_ingest_messages_total` | Counter | `topic` | Messages drained from Kafka |
//! | `tally_ingest_batches_total` | Counter | `topic`, `result` | Batch handling outcomes |
//! | `tally_ingest_decode_failures_total` | Counter | `topic` | Payloads no schema version accepted |
//! | `tally_ingest_ignored_events_total` | Counter | `topic` | Events dropped by the sanity checks |
//! | `tally_ingest_transactions_inserted_total` | Counter | - | Ledger rows actually inserted |
//! | `tally_ingest_ballots_upserted_total` | Counter | - | Ballot rows written or accumulated |
//! | `tally_ingest_surveyors_frozen_total` | Counter | - | Surveyors moved to frozen |
//! | `tally_ingest_rejoins_total` | Counter | `topic` | Consumer group rejoins |
//! | `tally_ingest_batch_duration_seconds` | Histogram | `topic` | Batch handling latency |
//!
//! Metrics are exposed via the `metrics` crate facade; the daemon wires
//! an exporter at startup.

use std::time::Duration;

use metrics::{counter, histogram};

/// Metric names as constants for consistency.
pub mod names {
    /// Counter: Messages drained from Kafka.
    pub const MESSAGES_TOTAL: &str = "tally_ingest_messages_total";
    /// Counter: Batch handling outcomes.
    pub const BATCHES_TOTAL: &str = "tally_ingest_batches_total";
    /// Counter: Payloads no schema version accepted.
    pub const DECODE_FAILURES_TOTAL: &str = "tally_ingest_decode_failures_total";
    /// Counter: Events dropped by the sanity checks.
    pub const IGNORED_EVENTS_TOTAL: &str = "tally_ingest_ignored_events_total";
    /// Counter: Ledger rows actually inserted.
    pub const TRANSACTIONS_INSERTED_TOTAL: &str = "tally_ingest_transactions_inserted_total";
    /// Counter: Ballot rows written or accumulated.
    pub const BALLOTS_UPSERTED_TOTAL: &str = "tally_ingest_ballots_upserted_total";
    /// Counter: Surveyors moved to frozen.
    pub const SURVEYORS_FROZEN_TOTAL: &str = "tally_ingest_surveyors_frozen_total";
    /// Counter: Consumer group rejoins.
    pub const REJOINS_TOTAL: &str = "tally_ingest_rejoins_total";
    /// Histogram: Batch handling latency in seconds.
    pub const BATCH_DURATION_SECONDS: &str = "tally_ingest_batch_duration_seconds";
}

/// Label keys used across metrics.
pub mod labels {
    /// Topic the metric concerns.
    pub const TOPIC: &str = "topic";
    /// Outcome status (committed, failed, rejoined).
    pub const RESULT: &str = "result";
}

/// High-level interface for recording ingestion metrics.
///
/// Cheap to clone and share across topic workers.
#[derive(Debug, Clone, Default)]
pub struct IngestMetrics {
    _private: (),
}

impl IngestMetrics {
    /// Creates a new metrics recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records messages drained into a batch.
    pub fn record_messages(&self, topic: &str, count: usize) {
        counter!(
            names::MESSAGES_TOTAL,
            labels::TOPIC => topic.to_string(),
        )
        .increment(count as u64);
    }

    /// Records a batch handling outcome.
    pub fn record_batch(&self, topic: &str, result: &str) {
        counter!(
            names::BATCHES_TOTAL,
            labels::TOPIC => topic.to_string(),
            labels::RESULT => result.to_string(),
        )
        .increment(1);
    }

    /// Records a payload that no schema version accepted.
    pub fn record_decode_failure(&self, topic: &str) {
        counter!(
            names::DECODE_FAILURES_TOTAL,
            labels::TOPIC => topic.to_string(),
        )
        .increment(1);
    }

    /// Records an event dropped by the sanity checks.
    pub fn record_ignored(&self, topic: &str) {
        counter!(
            names::IGNORED_EVENTS_TOTAL,
            labels::TOPIC => topic.to_string(),
        )
        .increment(1);
    }

    /// Records ledger rows actually inserted (conflicts excluded).
    pub fn record_transactions_inserted(&self, count: u64) {
        counter!(names::TRANSACTIONS_INSERTED_TOTAL).increment(count);
    }

    /// Records ballot rows written or accumulated.
    pub fn record_ballots_upserted(&self, count: usize) {
        counter!(names::BALLOTS_UPSERTED_TOTAL).increment(count as u64);
    }

    /// Records surveyors moved to frozen.
    pub fn record_surveyors_frozen(&self, count: usize) {
        counter!(names::SURVEYORS_FROZEN_TOTAL).increment(count as u64);
    }

    /// Records a consumer group rejoin.
    pub fn record_rejoin(&self, topic: &str) {
        counter!(
            names::REJOINS_TOTAL,
            labels::TOPIC => topic.to_string(),
        )
        .increment(1);
    }

    /// Records batch handling latency.
    pub fn observe_batch_duration(&self, topic: &str, duration: Duration) {
        histogram!(
            names::BATCH_DURATION_SECONDS,
            labels::TOPIC => topic.to_string(),
        )
        .record(duration.as_secs_f64());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recorder_is_usable_without_an_exporter() {
        // The metrics facade drops samples when no recorder is installed;
        // these must not panic.
        let metrics = IngestMetrics::new();
        metrics.record_messages("local.settlement.payout", 10);
        metrics.record_batch("local.settlement.payout", "committed");
        metrics.record_decode_failure("local.settlement.payout");
        metrics.record_ignored("local.settlement.payout");
        metrics.record_transactions_inserted(3);
        metrics.record_ballots_upserted(2);
        metrics.record_surveyors_frozen(1);
        metrics.record_rejoin("local.payment.vote");
        metrics.observe_batch_duration("local.settlement.payout", Duration::from_millis(25));
    }

    #[test]
    fn metric_names_share_the_service_prefix() {
        for name in [
            names::MESSAGES_TOTAL,
            names::BATCHES_TOTAL,
            names::DECODE_FAILURES_TOTAL,
            names::IGNORED_EVENTS_TOTAL,
            names::TRANSACTIONS_INSERTED_TOTAL,
            names::BALLOTS_UPSERTED_TOTAL,
            names::SURVEYORS_FROZEN_TOTAL,
            names::REJOINS_TOTAL,
            names::BATCH_DURATION_SECONDS,
        ] {
            assert!(name.starts_with("tally_ingest_"));
        }
    }
}
