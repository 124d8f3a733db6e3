//! Error types and result aliases for the ingestion pipeline.
//!
//! Errors are structured for programmatic handling: the consumer loop
//! distinguishes transient queue conditions (which trigger a group
//! rejoin) from everything else, and validation failures carry every
//! reason found in the batch rather than the first one.

use rdkafka::error::KafkaError;
use rdkafka::types::RDKafkaErrorCode;

/// The result type used throughout the ingestion pipeline.
pub type Result<T> = std::result::Result<T, Error>;

/// A single failed decode attempt against one schema version.
#[derive(Debug, Clone)]
pub struct DecodeAttempt {
    /// The schema version identifier, e.g. `settlement/v2`.
    pub version: &'static str,
    /// Why the payload did not match this version.
    pub reason: String,
}

fn format_attempts(attempts: &[DecodeAttempt]) -> String {
    attempts
        .iter()
        .map(|a| format!("{}: {}", a.version, a.reason))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Errors that can occur while ingesting events into the ledger.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A payload matched none of the known schema versions.
    #[error("no schema version decoded the payload: {}", format_attempts(.attempts))]
    Decode {
        /// One entry per schema version tried, newest first.
        attempts: Vec<DecodeAttempt>,
    },

    /// One or more events in a batch failed validation.
    #[error("invalid events: {}", .reasons.join("; "))]
    Validation {
        /// Every validation failure found in the batch.
        reasons: Vec<String>,
    },

    /// A frozen ballot referenced a surveyor the store does not know.
    #[error("ballot references unknown surveyor {surveyor_id}")]
    SurveyorMismatch {
        /// The surveyor id the ballot carried.
        surveyor_id: String,
    },

    /// A referral referenced a country group that is not active.
    #[error("unknown country group {group_id}")]
    UnknownCountryGroup {
        /// The group id the referral carried.
        group_id: String,
    },

    /// The rate service returned no rate for a currency.
    #[error("no rate available for currency {currency}")]
    MissingRate {
        /// The currency that was requested.
        currency: String,
    },

    /// The rate service call itself failed.
    #[error("rate lookup failed: {message}")]
    Rates {
        /// Description of the failure.
        message: String,
        /// The underlying cause, if any.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A storage operation failed.
    #[error("storage error: {message}")]
    Storage {
        /// Description of the storage failure.
        message: String,
        /// The underlying cause, if any.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A queue (Kafka) operation failed.
    #[error("queue error: {0}")]
    Queue(#[from] KafkaError),

    /// A failure after offsets were committed but before the database
    /// transaction committed. Redelivery will not occur for these
    /// messages; recovery relies on deterministic ids making the next
    /// producer run for the same events converge.
    #[error("commit sequence failed at {stage}: {message}")]
    CommitSequence {
        /// Which side of the commit pair failed.
        stage: &'static str,
        /// Description of the failure.
        message: String,
    },

    /// The service configuration is invalid.
    #[error("configuration error: {message}")]
    Config {
        /// Description of the configuration problem.
        message: String,
    },
}

impl Error {
    /// Creates a new storage error with the given message.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a new storage error with a source cause.
    #[must_use]
    pub fn storage_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Storage {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates a new rate lookup error with a source cause.
    #[must_use]
    pub fn rates_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Rates {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates a new configuration error.
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a new commit sequence error.
    #[must_use]
    pub fn commit_sequence(stage: &'static str, message: impl Into<String>) -> Self {
        Self::CommitSequence {
            stage,
            message: message.into(),
        }
    }

    /// Returns true for queue conditions that resolve by leaving and
    /// rejoining the consumer group rather than by surfacing the error.
    #[must_use]
    pub fn is_transient_queue(&self) -> bool {
        let Self::Queue(err) = self else {
            return false;
        };
        matches!(
            err.rdkafka_error_code(),
            Some(
                RDKafkaErrorCode::RebalanceInProgress
                    | RDKafkaErrorCode::CoordinatorNotAvailable
                    | RDKafkaErrorCode::NotCoordinator
                    | RDKafkaErrorCode::CoordinatorLoadInProgress
                    | RDKafkaErrorCode::LeaderNotAvailable
            )
        )
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        Self::storage_with_source("database operation failed", err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_error_lists_every_attempt() {
        let err = Error::Decode {
            attempts: vec![
                DecodeAttempt {
                    version: "settlement/v3",
                    reason: "missing field `owner`".to_string(),
                },
                DecodeAttempt {
                    version: "settlement/v2",
                    reason: "unknown field `executedAt`".to_string(),
                },
            ],
        };
        let rendered = err.to_string();
        assert!(rendered.contains("settlement/v3: missing field `owner`"));
        assert!(rendered.contains("settlement/v2: unknown field `executedAt`"));
    }

    #[test]
    fn validation_error_joins_reasons() {
        let err = Error::Validation {
            reasons: vec!["probi must be positive".to_string(), "owner not set".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "invalid events: probi must be positive; owner not set"
        );
    }

    #[test]
    fn queue_errors_classify_transience() {
        let transient = Error::Queue(KafkaError::MessageConsumption(
            RDKafkaErrorCode::RebalanceInProgress,
        ));
        assert!(transient.is_transient_queue());

        let fatal = Error::Queue(KafkaError::MessageConsumption(
            RDKafkaErrorCode::InvalidMessage,
        ));
        assert!(!fatal.is_transient_queue());

        assert!(!Error::storage("boom").is_transient_queue());
    }

    #[test]
    fn commit_sequence_names_the_stage() {
        let err = Error::commit_sequence("database", "connection reset");
        assert_eq!(
            err.to_string(),
            "commit sequence failed at database: connection reset"
        );
    }
}
