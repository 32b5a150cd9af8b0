use super::{DbConfig, DbError, DbResult, RateStore, RateTransaction, UpsertOutcome};
use async_trait::async_trait;
use dolar_common::ExchangeRateRecord;
use sqlx::mysql::{MySqlPool, MySqlPoolOptions};
use sqlx::{MySql, Transaction};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

const EXISTS_SQL: &str = "SELECT 1 FROM dolar WHERE fechahora = ? LIMIT 1";

const UPSERT_SQL: &str =
    "INSERT INTO dolar (fechahora, valor) VALUES (?, ?) ON DUPLICATE KEY UPDATE valor = ?";

/// MySQL-backed [`RateStore`].
///
/// Construction does no I/O. Every [`RateStore::begin`] call opens a
/// single-connection pool, so one invocation holds exactly one connection.
#[derive(Debug, Clone)]
pub struct MySqlRateStore {
    config: DbConfig,
}

impl MySqlRateStore {
    pub fn new(config: DbConfig) -> Self {
        Self { config }
    }

    async fn connect(&self) -> DbResult<MySqlPool> {
        let pool = MySqlPoolOptions::new()
            .max_connections(1)
            .min_connections(0)
            .acquire_timeout(self.config.connect_timeout())
            .connect_with(self.config.connect_options())
            .await
            .map_err(|e| DbError::connect(&self.config, e))?;

        info!(target_db = %self.config.target(), "Database connection opened");
        Ok(pool)
    }
}

#[async_trait]
impl RateStore for MySqlRateStore {
    #[instrument(skip(self), fields(db = %self.config.target()))]
    async fn begin(&self) -> DbResult<Box<dyn RateTransaction>> {
        let pool = self.connect().await?;

        let tx = match bounded(self.config.connect_timeout(), "begin", pool.begin()).await {
            Ok(tx) => tx,
            Err(e) => {
                pool.close().await;
                return Err(e);
            }
        };

        Ok(Box::new(MySqlRateTransaction {
            tx,
            pool,
            read_timeout: self.config.read_timeout(),
            write_timeout: self.config.write_timeout(),
            abandoned: false,
        }))
    }
}

pub struct MySqlRateTransaction {
    tx: Transaction<'static, MySql>,
    pool: MySqlPool,
    read_timeout: Duration,
    write_timeout: Duration,
    /// Set once a statement timed out; the connection is mid-protocol then.
    abandoned: bool,
}

impl MySqlRateTransaction {
    async fn exists(&mut self, record: &ExchangeRateRecord) -> DbResult<bool> {
        let row = bounded(
            self.read_timeout,
            "lookup",
            sqlx::query(EXISTS_SQL)
                .bind(record.observed_at)
                .fetch_optional(&mut *self.tx),
        )
        .await;
        Ok(self.track(row)?.is_some())
    }

    fn track<T>(&mut self, result: DbResult<T>) -> DbResult<T> {
        if matches!(result, Err(DbError::Timeout { .. })) {
            self.abandoned = true;
        }
        result
    }
}

/// Discards a connection without another round-trip. MySQL rolls back the
/// open transaction when the session ends.
async fn abandon(tx: Transaction<'static, MySql>, pool: MySqlPool, limit: Duration) {
    let closing = pool.close();
    drop(tx);
    if tokio::time::timeout(limit, closing).await.is_err() {
        warn!("Connection did not close within {}s", limit.as_secs());
    }
}

#[async_trait]
impl RateTransaction for MySqlRateTransaction {
    async fn upsert(&mut self, record: &ExchangeRateRecord) -> DbResult<UpsertOutcome> {
        if self.abandoned {
            return Err(DbError::backend("transaction abandoned after a timeout"));
        }
        let existed = self.exists(record).await?;

        let result = bounded(
            self.write_timeout,
            "upsert",
            sqlx::query(UPSERT_SQL)
                .bind(record.observed_at)
                .bind(record.value)
                .bind(record.value)
                .execute(&mut *self.tx),
        )
        .await;
        let result = self.track(result)?;

        let outcome = classify(existed, result.rows_affected());
        debug!(record = %record, ?outcome, "Upserted quote");
        Ok(outcome)
    }

    async fn commit(self: Box<Self>) -> DbResult<()> {
        let Self {
            tx,
            pool,
            write_timeout,
            abandoned,
            ..
        } = *self;

        if abandoned {
            abandon(tx, pool, write_timeout).await;
            return Err(DbError::backend("transaction abandoned after a timeout"));
        }

        let result = bounded(write_timeout, "commit", tx.commit()).await;
        pool.close().await;
        result
    }

    async fn rollback(self: Box<Self>) -> DbResult<()> {
        let Self {
            tx,
            pool,
            write_timeout,
            abandoned,
            ..
        } = *self;

        if abandoned {
            debug!("Skipping rollback round-trip after a timed-out statement");
            abandon(tx, pool, write_timeout).await;
            return Ok(());
        }

        let result = bounded(write_timeout, "rollback", tx.rollback()).await;
        pool.close().await;
        result
    }
}

/// Maps MySQL's affected-row count for `INSERT ... ON DUPLICATE KEY UPDATE`.
///
/// A changed duplicate reports 2. An identical duplicate reports 0, or 1
/// when the client asked for found rows, which is why the prior existence
/// check decides between insert and no-op.
fn classify(existed: bool, rows_affected: u64) -> UpsertOutcome {
    match (existed, rows_affected) {
        (false, _) => UpsertOutcome::Inserted,
        (true, n) if n >= 2 => UpsertOutcome::Updated,
        (true, _) => UpsertOutcome::Unchanged,
    }
}

async fn bounded<T, F>(limit: Duration, operation: &'static str, fut: F) -> DbResult<T>
where
    F: Future<Output = Result<T, sqlx::Error>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result.map_err(DbError::from),
        Err(_) => Err(DbError::timeout(operation, limit)),
    }
}
