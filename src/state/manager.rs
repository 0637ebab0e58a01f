//! PostgreSQL swap store

use super::SwapStore;
use crate::config::DatabaseConfig;
use crate::error::{SwapError, SwapResult};
use crate::swap::{SwapRecord, SwapStatus};

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;
use tracing::{debug, info};

/// Swap store for PostgreSQL persistence
pub struct PgSwapStore {
    pool: PgPool,
}

impl PgSwapStore {
    /// Connect using the configured pool limits
    pub async fn new(config: &DatabaseConfig) -> SwapResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .connect(&config.url)
            .await?;

        Ok(Self { pool })
    }

    /// Run database migrations
    pub async fn run_migrations(&self) -> SwapResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS swaps (
                id VARCHAR(128) PRIMARY KEY,
                network VARCHAR(16) NOT NULL,
                wallet_id VARCHAR(128) NOT NULL,
                provider VARCHAR(64) NOT NULL,
                status VARCHAR(40) NOT NULL,
                record JSONB NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_swaps_status
            ON swaps (status)
            "#,
        )
        .execute(&self.pool)
        .await?;

        info!("Database migrations complete");
        Ok(())
    }

    /// Health check
    pub async fn health_check(&self) -> SwapResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn fetch(&self, sql: &str) -> SwapResult<Vec<SwapRecord>> {
        let rows = sqlx::query(sql).fetch_all(&self.pool).await?;
        rows.into_iter().map(|row| decode_record(&row)).collect()
    }
}

fn decode_record(row: &sqlx::postgres::PgRow) -> SwapResult<SwapRecord> {
    let value: serde_json::Value = row.get("record");
    Ok(serde_json::from_value(value)?)
}

/// Terminal statuses as a SQL list literal
fn terminal_status_list() -> String {
    SwapStatus::ALL
        .iter()
        .filter(|s| s.is_terminal())
        .map(|s| format!("'{}'", s.as_str()))
        .collect::<Vec<_>>()
        .join(", ")
}

#[async_trait]
impl SwapStore for PgSwapStore {
    async fn insert(&self, record: &SwapRecord) -> SwapResult<()> {
        let value = serde_json::to_value(record)?;

        sqlx::query(
            r#"
            INSERT INTO swaps (id, network, wallet_id, provider, status, record)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(&record.swap.id)
        .bind(record.network.as_str())
        .bind(&record.wallet_id)
        .bind(&record.swap.provider)
        .bind(record.swap.status.as_str())
        .bind(value)
        .execute(&self.pool)
        .await?;

        debug!("Stored swap {}", record.swap.id);
        Ok(())
    }

    async fn save(&self, record: &SwapRecord) -> SwapResult<()> {
        let value = serde_json::to_value(record)?;

        let result = sqlx::query(
            r#"
            UPDATE swaps
            SET status = $2, record = $3, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(&record.swap.id)
        .bind(record.swap.status.as_str())
        .bind(value)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(SwapError::SwapNotFound(record.swap.id.clone()));
        }

        debug!("Saved swap {} in {}", record.swap.id, record.swap.status);
        Ok(())
    }

    async fn get(&self, swap_id: &str) -> SwapResult<Option<SwapRecord>> {
        let row = sqlx::query("SELECT record FROM swaps WHERE id = $1")
            .bind(swap_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| decode_record(&r)).transpose()
    }

    async fn active(&self) -> SwapResult<Vec<SwapRecord>> {
        let sql = format!(
            "SELECT record FROM swaps WHERE status NOT IN ({}) ORDER BY created_at",
            terminal_status_list()
        );
        self.fetch(&sql).await
    }

    async fn all(&self) -> SwapResult<Vec<SwapRecord>> {
        self.fetch("SELECT record FROM swaps ORDER BY created_at").await
    }
}
