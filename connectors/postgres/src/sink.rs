use crate::config::PostgresSinkConfig;
use async_trait::async_trait;
use ratingsync_core::{
    connector::{ConnectorConfig, DocumentBatch, DocumentSink},
    Error, Result,
};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use sqlx::{Postgres, QueryBuilder};
use std::time::Duration;
use tracing::{error, info};

/// Two bind parameters per row; PostgreSQL allows 65535 per statement.
const MAX_ROWS_PER_INSERT: usize = 30_000;

/// Document sink storing each document as a JSONB row of one table.
pub struct PostgresSink {
    config: PostgresSinkConfig,
    timeout: Duration,
    pool: Option<PgPool>,
}

impl PostgresSink {
    pub fn new(config: ConnectorConfig, timeout: Duration) -> Result<Self> {
        let config = PostgresSinkConfig::from_json(config.properties_json())?;
        Ok(Self::with_config(config, timeout))
    }

    pub fn with_config(config: PostgresSinkConfig, timeout: Duration) -> Self {
        Self {
            config,
            timeout,
            pool: None,
        }
    }

    async fn insert_all(&self, pool: &PgPool, batch: &DocumentBatch) -> sqlx::Result<u64> {
        let table = &self.config.collection;
        let mut tx = pool.begin().await?;

        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                id BIGSERIAL PRIMARY KEY,
                batch_digest TEXT NOT NULL,
                document JSONB NOT NULL,
                inserted_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )"
        ))
        .execute(&mut *tx)
        .await?;
        sqlx::query(&format!(
            "CREATE INDEX IF NOT EXISTS {table}_batch_digest_idx ON {table} (batch_digest)"
        ))
        .execute(&mut *tx)
        .await?;

        let mut inserted = 0;
        for chunk in batch.documents.chunks(MAX_ROWS_PER_INSERT) {
            let mut builder: QueryBuilder<Postgres> =
                QueryBuilder::new(format!("INSERT INTO {table} (batch_digest, document) "));
            builder.push_values(chunk, |mut row, document| {
                row.push_bind(batch.digest.clone())
                    .push_bind(Json(document.clone()));
            });
            inserted += builder.build().execute(&mut *tx).await?.rows_affected();
        }

        tx.commit().await?;
        Ok(inserted)
    }
}

/// Network and pool failures mean the store was unreachable; anything else
/// is the server refusing the statement.
fn classify(err: sqlx::Error) -> Error {
    match err {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => Error::LoadUnavailable(err.to_string()),
        other => Error::LoadRejected(other.to_string()),
    }
}

#[async_trait]
impl DocumentSink for PostgresSink {
    async fn connect(&mut self) -> Result<()> {
        info!(collection = %self.config.collection, "Connecting to PostgreSQL document store");

        let pool = PgPoolOptions::new()
            .max_connections(self.config.max_connections)
            .acquire_timeout(self.timeout)
            .connect(&self.config.url)
            .await
            .map_err(|e| {
                let err = Error::LoadUnavailable(format!("Failed to connect to PostgreSQL: {}", e));
                error!("{}", err);
                err
            })?;

        self.pool = Some(pool);
        Ok(())
    }

    async fn write_batch(&mut self, batch: &DocumentBatch) -> Result<u64> {
        let pool = self
            .pool
            .as_ref()
            .ok_or_else(|| Error::LoadUnavailable("Not connected".into()))?;

        // dropping the future on timeout rolls the transaction back
        match tokio::time::timeout(self.timeout, self.insert_all(pool, batch)).await {
            Ok(Ok(inserted)) => Ok(inserted),
            Ok(Err(e)) => Err(classify(e)),
            Err(_) => Err(Error::LoadUnavailable(format!(
                "insert did not finish within {:?}",
                self.timeout
            ))),
        }
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(pool) = self.pool.take() {
            info!("Closing PostgreSQL connection");
            pool.close().await;
        }
        Ok(())
    }
}
