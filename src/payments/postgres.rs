//! PostgreSQL-backed payment store.

use async_trait::async_trait;
use deadpool_postgres::{Config, ManagerConfig, Pool, PoolConfig, RecyclingMethod, Runtime};
use rust_decimal::Decimal;
use tokio_postgres::NoTls;

use crate::config::PostgresConfig;
use crate::payments::store::{PaymentStore, StoreError};
use crate::payments::types::{PaymentRecord, PaymentSummary, Processor, SummaryRange};

const CREATE_TABLE: &str = "
    CREATE TABLE IF NOT EXISTS payments (
        correlation_id TEXT NOT NULL,
        amount NUMERIC NOT NULL,
        processor TEXT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL
    )";

const CREATE_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS payments_created_at_idx ON payments (created_at)";

const INSERT: &str =
    "INSERT INTO payments (correlation_id, amount, processor, created_at) VALUES ($1, $2, $3, $4)";

const SUMMARY: &str = "
    SELECT processor, COUNT(*) AS total_requests, COALESCE(SUM(amount), 0) AS total_amount
    FROM payments
    WHERE ($1::timestamptz IS NULL OR created_at >= $1)
      AND ($2::timestamptz IS NULL OR created_at <= $2)
    GROUP BY processor";

/// Payment store over a pooled PostgreSQL connection.
#[derive(Clone)]
pub struct PostgresPaymentStore {
    pool: Pool,
}

impl PostgresPaymentStore {
    /// Build the pool. No connection is opened until first use.
    pub fn new(config: &PostgresConfig) -> Result<Self, StoreError> {
        let mut cfg = Config::new();
        cfg.host = Some(config.host.clone());
        cfg.port = Some(config.port);
        cfg.dbname = Some(config.dbname.clone());
        cfg.user = Some(config.user.clone());
        cfg.password = Some(config.password.clone());
        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });
        cfg.pool = Some(PoolConfig::new(config.pool_size));

        let pool = cfg
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        Ok(Self { pool })
    }

    /// Create the table and index if they do not exist.
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        let conn = self.connection().await?;
        conn.batch_execute(&format!("{};\n{};", CREATE_TABLE, CREATE_INDEX))
            .await
            .map_err(query_error)?;
        tracing::debug!("payments schema ready");
        Ok(())
    }

    async fn connection(&self) -> Result<deadpool_postgres::Client, StoreError> {
        self.pool
            .get()
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))
    }
}

fn query_error(e: tokio_postgres::Error) -> StoreError {
    StoreError::Query(e.to_string())
}

#[async_trait]
impl PaymentStore for PostgresPaymentStore {
    async fn insert(&self, record: PaymentRecord) -> Result<(), StoreError> {
        let conn = self.connection().await?;
        conn.execute(
            INSERT,
            &[
                &record.correlation_id,
                &record.amount,
                &record.processor.as_str(),
                &record.created_at,
            ],
        )
        .await
        .map_err(query_error)?;
        Ok(())
    }

    async fn summary(&self, range: SummaryRange) -> Result<PaymentSummary, StoreError> {
        let conn = self.connection().await?;
        let rows = conn
            .query(SUMMARY, &[&range.from, &range.to])
            .await
            .map_err(query_error)?;

        let mut summary = PaymentSummary::default();
        for row in rows {
            let processor: String = row.try_get("processor").map_err(query_error)?;
            let processor: Processor = match processor.parse() {
                Ok(p) => p,
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping summary row with unknown processor");
                    continue;
                }
            };
            let count: i64 = row.try_get("total_requests").map_err(query_error)?;
            let amount: Decimal = row.try_get("total_amount").map_err(query_error)?;

            let totals = summary.totals_mut(processor);
            totals.total_requests = count.max(0) as u64;
            totals.total_amount = amount;
        }
        Ok(summary)
    }

    async fn purge(&self) -> Result<(), StoreError> {
        let conn = self.connection().await?;
        conn.execute("TRUNCATE TABLE payments", &[])
            .await
            .map_err(query_error)?;
        Ok(())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let conn = self.connection().await?;
        conn.execute("SELECT 1", &[]).await.map_err(query_error)?;
        tracing::debug!("postgreSQL connection successful");
        Ok(())
    }
}
