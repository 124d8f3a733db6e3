//! Ledger ingestion daemon.
//!
//! Wires configuration, logging, the Postgres store, the rate client,
//! the consumer group coordinator, and the surveyor freeze scheduler,
//! then runs until interrupted.

use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use tally_core::observability::{init_logging, LogFormat};
use tally_ingest::config::IngestConfig;
use tally_ingest::consumer::Coordinator;
use tally_ingest::error::{Error, Result};
use tally_ingest::metrics::IngestMetrics;
use tally_ingest::producer::ensure_topics;
use tally_ingest::rates::{HttpRates, RateClient};
use tally_ingest::store::{LedgerStore, PgStore};
use tally_ingest::surveyors::FreezeScheduler;

fn log_format_from_env() -> LogFormat {
    match std::env::var("LOG_FORMAT") {
        Ok(value) => LogFormat::from_env_value(&value),
        Err(_) => LogFormat::Pretty,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging(log_format_from_env());

    let config = Arc::new(IngestConfig::from_env()?);
    info!(
        environment = %config.environment,
        brokers = %config.brokers,
        "starting tally-ingestd"
    );

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await
        .map_err(|e| Error::storage_with_source("database connection failed", e))?;
    let store = PgStore::new(pool);
    store.run_migrations().await?;
    let store: Arc<dyn LedgerStore> = Arc::new(store);

    ensure_topics(&config).await?;

    if config.rates_url.is_empty() {
        return Err(Error::config("RATES_URL must be set"));
    }
    let rates: Arc<dyn RateClient> =
        Arc::new(HttpRates::new(&config.rates_url, config.rates_token.clone())?);

    let metrics = IngestMetrics::new();
    let cancel = CancellationToken::new();

    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            signal_cancel.cancel();
        }
    });

    let freeze = FreezeScheduler::new(
        Arc::clone(&store),
        Arc::clone(&config),
        metrics.clone(),
        cancel.clone(),
    );
    let freeze_handle = tokio::spawn(freeze.run());

    let coordinator = Coordinator::new(config, store, rates, metrics, cancel.clone());
    let coordinator_result = coordinator.run().await;

    cancel.cancel();
    match freeze_handle.await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => {
            error!(error = %err, "freeze scheduler stopped with an error");
            return Err(err);
        }
        Err(join_err) => {
            error!(error = %join_err, "freeze scheduler task panicked");
        }
    }

    coordinator_result
}
