//! Postgres-backed ledger store.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::Duration;
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgRow};
use sqlx::{PgConnection, Postgres, QueryBuilder, Row, Transaction};
use tally_core::channel::Channel;
use tally_core::observability::ledger_span;
use tracing::Instrument;
use uuid::Uuid;

use super::{CountryGroup, FreezeOutcome, FreezeParams, LedgerStore, StoreBatch};
use crate::error::{Error, Result};
use crate::models::{
    convert_to_transactions, Ballot, Convertable, LedgerTransaction, Surveyor, TransactionType,
    Votes,
};

/// A [`LedgerStore`] backed by Postgres.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Wraps an existing connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Applies pending schema migrations.
    ///
    /// # Errors
    ///
    /// Returns a storage error when a migration fails.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::storage_with_source("migration failed", e))
    }
}

fn row_to_transaction(row: &PgRow) -> Result<LedgerTransaction> {
    let transaction_type: String = row.try_get("transaction_type")?;
    let transaction_type: TransactionType = transaction_type
        .parse()
        .map_err(|e| Error::storage_with_source("bad transaction_type column", e))?;
    let channel: Option<String> = row.try_get("channel")?;
    Ok(LedgerTransaction {
        id: row.try_get("id")?,
        created_at: row.try_get("created_at")?,
        description: row.try_get("description")?,
        document_id: row.try_get("document_id")?,
        transaction_type,
        from_account: row.try_get("from_account")?,
        from_account_type: row.try_get("from_account_type")?,
        to_account: row.try_get("to_account")?,
        to_account_type: row.try_get("to_account_type")?,
        amount: row.try_get("amount")?,
        settlement_currency: row.try_get("settlement_currency")?,
        settlement_amount: row.try_get("settlement_amount")?,
        channel: channel.map(Channel::from),
    })
}

fn row_to_surveyor(row: &PgRow) -> Result<Surveyor> {
    Ok(Surveyor {
        id: row.try_get("id")?,
        price: row.try_get("price")?,
        is_virtual: row.try_get("virtual")?,
        frozen: row.try_get("frozen")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_ballot(row: &PgRow) -> Result<Ballot> {
    let channel: String = row.try_get("channel")?;
    Ok(Ballot {
        id: row.try_get("id")?,
        cohort: row.try_get("cohort")?,
        tally: row.try_get("tally")?,
        surveyor_id: row.try_get("surveyor_id")?,
        channel: Channel::from(channel),
        amount: row.try_get("amount")?,
        fees: row.try_get("fees")?,
        excluded: row.try_get("excluded")?,
    })
}

fn row_to_group(row: &PgRow) -> Result<CountryGroup> {
    Ok(CountryGroup {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        amount: row.try_get("amount")?,
        currency: row.try_get("currency")?,
        active_at: row.try_get("active_at")?,
    })
}

/// Bulk inserts ledger rows, skipping ids that already exist.
async fn insert_transaction_rows(
    conn: &mut PgConnection,
    rows: &[LedgerTransaction],
) -> Result<u64> {
    if rows.is_empty() {
        return Ok(0);
    }
    let mut builder = QueryBuilder::<Postgres>::new(
        "INSERT INTO transactions (id, created_at, description, document_id, \
         transaction_type, from_account, from_account_type, to_account, \
         to_account_type, amount, settlement_currency, settlement_amount, channel) ",
    );
    builder.push_values(rows, |mut b, row| {
        b.push_bind(row.id)
            .push_bind(row.created_at)
            .push_bind(&row.description)
            .push_bind(&row.document_id)
            .push_bind(row.transaction_type.as_str())
            .push_bind(&row.from_account)
            .push_bind(&row.from_account_type)
            .push_bind(&row.to_account)
            .push_bind(&row.to_account_type)
            .push_bind(row.amount)
            .push_bind(&row.settlement_currency)
            .push_bind(row.settlement_amount)
            .push_bind(row.channel.as_ref().map(ToString::to_string));
    });
    builder.push(" ON CONFLICT (id) DO NOTHING");
    let result = builder.build().execute(conn).await?;
    Ok(result.rows_affected())
}

/// A write session holding an open database transaction.
struct PgBatch {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl StoreBatch for PgBatch {
    async fn insert_transactions(&mut self, rows: &[LedgerTransaction]) -> Result<u64> {
        let span = ledger_span("insert_transactions", rows.len());
        insert_transaction_rows(&mut *self.tx, rows).instrument(span).await
    }

    async fn insert_surveyors(&mut self, surveyors: &[Surveyor]) -> Result<()> {
        if surveyors.is_empty() {
            return Ok(());
        }
        let mut builder = QueryBuilder::<Postgres>::new(
            "INSERT INTO surveyor_groups (id, price, virtual, frozen, created_at, updated_at) ",
        );
        builder.push_values(surveyors, |mut b, surveyor| {
            b.push_bind(&surveyor.id)
                .push_bind(surveyor.price)
                .push_bind(surveyor.is_virtual)
                .push_bind(surveyor.frozen)
                .push_bind(surveyor.created_at)
                .push_bind(surveyor.updated_at);
        });
        builder.push(" ON CONFLICT (id) DO NOTHING");
        builder.build().execute(&mut *self.tx).await?;
        Ok(())
    }

    async fn upsert_ballots(&mut self, ballots: &[Ballot]) -> Result<()> {
        if ballots.is_empty() {
            return Ok(());
        }
        let mut builder = QueryBuilder::<Postgres>::new(
            "INSERT INTO votes (id, cohort, tally, surveyor_id, channel, amount, fees, excluded) ",
        );
        builder.push_values(ballots, |mut b, ballot| {
            b.push_bind(ballot.id)
                .push_bind(&ballot.cohort)
                .push_bind(ballot.tally)
                .push_bind(&ballot.surveyor_id)
                .push_bind(ballot.channel.to_string())
                .push_bind(ballot.amount)
                .push_bind(ballot.fees)
                .push_bind(ballot.excluded);
        });
        builder.push(
            " ON CONFLICT (id) DO UPDATE SET \
             updated_at = CURRENT_TIMESTAMP, \
             tally = votes.tally + EXCLUDED.tally",
        );
        builder.build().execute(&mut *self.tx).await?;
        Ok(())
    }

    async fn surveyors_by_id(&mut self, ids: &[String]) -> Result<Vec<Surveyor>> {
        let rows = sqlx::query(
            "SELECT id, price, virtual, frozen, created_at, updated_at \
             FROM surveyor_groups WHERE id = ANY($1)",
        )
        .bind(ids.to_vec())
        .fetch_all(&mut *self.tx)
        .await?;
        rows.iter().map(row_to_surveyor).collect()
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for PgStore {
    async fn begin(&self) -> Result<Box<dyn StoreBatch>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgBatch { tx }))
    }

    async fn transactions_by_id(&self, ids: &[Uuid]) -> Result<Vec<LedgerTransaction>> {
        let rows = sqlx::query(
            "SELECT id, created_at, description, document_id, transaction_type, \
             from_account, from_account_type, to_account, to_account_type, \
             amount, settlement_currency, settlement_amount, channel \
             FROM transactions WHERE id = ANY($1) ORDER BY created_at, id",
        )
        .bind(ids.to_vec())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_transaction).collect()
    }

    async fn ballots_by_id(&self, ids: &[Uuid]) -> Result<Vec<Ballot>> {
        let rows = sqlx::query(
            "SELECT id, cohort, tally, surveyor_id, channel, amount, fees, excluded \
             FROM votes WHERE id = ANY($1)",
        )
        .bind(ids.to_vec())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_ballot).collect()
    }

    async fn surveyors_by_id(&self, ids: &[String]) -> Result<Vec<Surveyor>> {
        let rows = sqlx::query(
            "SELECT id, price, virtual, frozen, created_at, updated_at \
             FROM surveyor_groups WHERE id = ANY($1)",
        )
        .bind(ids.to_vec())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_surveyor).collect()
    }

    async fn active_country_groups(&self) -> Result<Vec<CountryGroup>> {
        let rows = sqlx::query(
            "SELECT id, name, amount, currency, active_at \
             FROM geo_referral_groups WHERE active_at <= CURRENT_TIMESTAMP",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_group).collect()
    }

    async fn freeze_surveyors(&self, params: FreezeParams) -> Result<FreezeOutcome> {
        let day_start = params
            .now
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .ok_or_else(|| Error::storage("invalid freeze date"))?
            .and_utc();
        let aged_cutoff = day_start - Duration::days(params.lag_days);

        // Dropping the transaction on any error path rolls back every
        // effect of the pass.
        let mut tx = self.pool.begin().await?;

        let frozen_rows = sqlx::query(
            "UPDATE surveyor_groups SET frozen = TRUE, updated_at = $1 \
             WHERE NOT frozen \
               AND ((NOT virtual AND created_at < $2) OR (virtual AND created_at < $3)) \
             RETURNING id, price, virtual, frozen, created_at, updated_at",
        )
        .bind(params.now)
        .bind(aged_cutoff)
        .bind(day_start)
        .fetch_all(&mut *tx)
        .await?;
        let frozen: Vec<Surveyor> = frozen_rows
            .iter()
            .map(row_to_surveyor)
            .collect::<Result<_>>()?;
        if frozen.is_empty() {
            return Ok(FreezeOutcome::default());
        }
        let frozen_ids: Vec<String> = frozen.iter().map(|s| s.id.clone()).collect();
        let by_id: HashMap<&str, &Surveyor> =
            frozen.iter().map(|s| (s.id.as_str(), s)).collect();

        sqlx::query(
            "UPDATE votes SET \
               amount = (1 - $1::numeric) * votes.tally * sg.price, \
               fees = $1::numeric * votes.tally * sg.price, \
               updated_at = CURRENT_TIMESTAMP \
             FROM surveyor_groups sg \
             WHERE votes.surveyor_id = sg.id \
               AND votes.surveyor_id = ANY($2) \
               AND NOT votes.excluded \
               AND votes.amount IS NULL",
        )
        .bind(params.fee_fraction)
        .bind(frozen_ids.clone())
        .execute(&mut *tx)
        .await?;

        let totals = sqlx::query(
            "SELECT surveyor_id, channel, SUM(amount) AS amount, SUM(fees) AS fees \
             FROM votes \
             WHERE surveyor_id = ANY($1) AND NOT excluded AND amount IS NOT NULL \
             GROUP BY surveyor_id, channel \
             ORDER BY surveyor_id, channel",
        )
        .bind(frozen_ids.clone())
        .fetch_all(&mut *tx)
        .await?;

        let mut events: BTreeMap<(String, String), Convertable> = BTreeMap::new();
        for row in &totals {
            let surveyor_id: String = row.try_get("surveyor_id")?;
            let channel: String = row.try_get("channel")?;
            let amount: Decimal = row.try_get("amount")?;
            let fees: Decimal = row.try_get("fees")?;
            if amount + fees == Decimal::ZERO {
                continue;
            }
            let surveyor = by_id
                .get(surveyor_id.as_str())
                .ok_or_else(|| Error::SurveyorMismatch {
                    surveyor_id: surveyor_id.clone(),
                })?;
            events.insert(
                (surveyor_id.clone(), channel.clone()),
                Convertable::Votes(Votes {
                    amount,
                    fees,
                    channel: Channel::from(channel),
                    surveyor_id,
                    surveyor_created_at: surveyor.created_at,
                }),
            );
        }

        let events: Vec<Convertable> = events.into_values().collect();
        let rows = convert_to_transactions(&events, params.max_amount)?;
        let inserted = insert_transaction_rows(&mut *tx, &rows).await?;
        tx.commit().await?;

        Ok(FreezeOutcome {
            frozen_surveyors: frozen_ids,
            rows_inserted: inserted,
        })
    }
}
