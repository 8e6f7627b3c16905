//! Primary cache store on the shared SQLite database

use super::CacheStore;
use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::SqlitePool;

pub struct SqliteCacheStore {
    pool: SqlitePool,
}

impl SqliteCacheStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CacheStore for SqliteCacheStore {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    async fn get(&self, key: &str, now: i64) -> Result<Option<String>> {
        let row: Option<(String,)> = sqlx::query_as(
            "SELECT payload FROM fingerprint_cache WHERE cache_key = ? AND expires_at > ?",
        )
        .bind(key)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .context("Cache read failed")?;
        Ok(row.map(|(payload,)| payload))
    }

    async fn put(&self, key: &str, payload: &str, expires_at: i64) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO fingerprint_cache (cache_key, payload, expires_at)
            VALUES (?, ?, ?)
            ON CONFLICT(cache_key) DO UPDATE SET
                payload = excluded.payload,
                expires_at = excluded.expires_at
            "#,
        )
        .bind(key)
        .bind(payload)
        .bind(expires_at)
        .execute(&self.pool)
        .await
        .context("Cache write failed")?;
        Ok(())
    }

    async fn sweep(&self, now: i64) -> Result<usize> {
        let result = sqlx::query("DELETE FROM fingerprint_cache WHERE expires_at <= ?")
            .bind(now)
            .execute(&self.pool)
            .await
            .context("Cache sweep failed")?;
        Ok(result.rows_affected() as usize)
    }
}
