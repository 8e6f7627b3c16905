//! Database access for flora-id
//!
//! One SQLite file (`flora.db`) under the root folder holds the primary
//! cache store, chat sessions and the reference plant checklist.

use anyhow::Result;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use std::path::Path;

/// Database file name inside the root folder
pub const DB_FILE_NAME: &str = "flora.db";

/// Initialize database connection pool
pub async fn init_database_pool(db_path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // mode=rwc: read, write, create
    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    tracing::debug!("Connecting to database: {}", db_url);

    let pool = SqlitePool::connect(&db_url).await?;
    init_tables(&pool).await?;

    Ok(pool)
}

/// Private in-memory database with the full schema
///
/// Single connection: every pooled connection to `sqlite::memory:` would
/// otherwise open its own empty database.
pub async fn init_memory_pool() -> Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;
    init_tables(&pool).await?;
    Ok(pool)
}

/// Create flora-id tables if they don't exist
pub async fn init_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS fingerprint_cache (
            cache_key TEXT PRIMARY KEY,
            payload TEXT NOT NULL,
            expires_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_fingerprint_cache_expiry ON fingerprint_cache(expires_at)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chat_turns (
            session_id TEXT NOT NULL,
            seq INTEGER NOT NULL,
            role TEXT NOT NULL,
            text TEXT NOT NULL,
            ensemble TEXT,
            created_at TEXT NOT NULL,
            PRIMARY KEY (session_id, seq)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS reference_plants (
            symbol TEXT NOT NULL,
            scientific_name TEXT NOT NULL,
            normalized_name TEXT NOT NULL UNIQUE,
            common_name TEXT,
            family TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    tracing::info!("Database tables initialized (fingerprint_cache, chat_turns, reference_plants)");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_pool_creates_file_and_tables() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join(DB_FILE_NAME);
        let pool = init_database_pool(&path).await.unwrap();
        assert!(path.exists());

        let tables: Vec<(String,)> =
            sqlx::query_as("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
                .fetch_all(&pool)
                .await
                .unwrap();
        let names: Vec<String> = tables.into_iter().map(|(n,)| n).collect();
        assert_eq!(names, vec!["chat_turns", "fingerprint_cache", "reference_plants"]);
    }

    #[tokio::test]
    async fn test_init_tables_is_idempotent() {
        let pool = init_memory_pool().await.unwrap();
        init_tables(&pool).await.unwrap();
    }
}
