//! Token nonce blacklist storage

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::instrument;

use bastion_core::{NonceEntry, NonceRepository, Result};

use super::driver_error;

/// PostgreSQL implementation of NonceRepository
pub struct PgNonceRepository {
    pool: PgPool,
}

impl PgNonceRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn entry_from_row(row: &PgRow) -> Result<NonceEntry> {
    let reason: String = row.get("reason");
    Ok(NonceEntry {
        nonce: row.get("nonce"),
        reason: reason.parse()?,
        expires_at: row.get("expires_at"),
    })
}

#[async_trait]
impl NonceRepository for PgNonceRepository {
    #[instrument(skip(self, entry), fields(reason = entry.reason.as_str()))]
    async fn insert_if_absent(&self, entry: &NonceEntry) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO token_nonces (nonce, reason, expires_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (nonce) DO NOTHING
            "#,
        )
        .bind(&entry.nonce)
        .bind(entry.reason.as_str())
        .bind(entry.expires_at)
        .execute(&self.pool)
        .await
        .map_err(driver_error)?;

        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip(self, entry), fields(reason = entry.reason.as_str()))]
    async fn upsert(&self, entry: &NonceEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO token_nonces (nonce, reason, expires_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (nonce) DO UPDATE
            SET reason = EXCLUDED.reason,
                expires_at = GREATEST(token_nonces.expires_at, EXCLUDED.expires_at)
            "#,
        )
        .bind(&entry.nonce)
        .bind(entry.reason.as_str())
        .bind(entry.expires_at)
        .execute(&self.pool)
        .await
        .map_err(driver_error)?;

        Ok(())
    }

    async fn get(&self, nonce: &str) -> Result<Option<NonceEntry>> {
        let row = sqlx::query("SELECT nonce, reason, expires_at FROM token_nonces WHERE nonce = $1")
            .bind(nonce)
            .fetch_optional(&self.pool)
            .await
            .map_err(driver_error)?;

        row.as_ref().map(entry_from_row).transpose()
    }

    #[instrument(skip(self))]
    async fn active(&self, now: DateTime<Utc>) -> Result<Vec<NonceEntry>> {
        let rows =
            sqlx::query("SELECT nonce, reason, expires_at FROM token_nonces WHERE expires_at > $1")
                .bind(now)
                .fetch_all(&self.pool)
                .await
                .map_err(driver_error)?;

        rows.iter().map(entry_from_row).collect()
    }

    #[instrument(skip(self))]
    async fn prune(&self, before: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM token_nonces WHERE expires_at < $1")
            .bind(before)
            .execute(&self.pool)
            .await
            .map_err(driver_error)?;
        Ok(result.rows_affected())
    }
}
