use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

/// Create the header cache schema. Safe to run repeatedly.
pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    ensure_schema(&pool).await?;
    pool.close().await;
    Ok(())
}

pub async fn ensure_schema(pool: &SqlitePool) -> Result<()> {
    // One row per plugin path; fingerprint is the SHA-256 of the file
    // contents the header was extracted from.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS rule_headers (
            path TEXT PRIMARY KEY,
            fingerprint TEXT NOT NULL,
            header_json TEXT NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_rule_headers_updated_at ON rule_headers(updated_at DESC)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
