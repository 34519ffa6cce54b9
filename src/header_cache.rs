//! Metadata cache: one rule header per plugin file.
//!
//! Headers live outside the plugin files, keyed by path and guarded by a
//! SHA-256 fingerprint of the file contents. Editing a plugin changes its
//! fingerprint, so the old header simply stops matching and the next build
//! re-extracts it. Nothing is ever written into the plugin file itself.
//!
//! Two builds touching the same file may both miss and both write. The
//! store does not lock; whichever upsert lands last wins, and since both
//! writers extracted from the same contents the result is the same header.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tracing::{debug, warn};

use crate::config::Config;
use crate::db;
use crate::migrate;
use crate::models::Metadata;
use crate::traits::HeaderStore;

/// SHA-256 of the file contents, hex encoded.
pub async fn fingerprint_file(path: &Path) -> Result<String> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(format!("{:x}", Sha256::digest(&bytes)))
}

/// Size of a file in bytes, or as `"12.3 KB"` when `human_readable`.
///
/// Diagnostic only; used when logging first-time extractions.
pub async fn file_size(path: &Path, human_readable: bool) -> Result<String> {
    let len = tokio::fs::metadata(path)
        .await
        .with_context(|| format!("Failed to stat {}", path.display()))?
        .len();
    if !human_readable {
        return Ok(len.to_string());
    }

    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut size = len as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        Ok(format!("{} B", len))
    } else {
        Ok(format!("{:.2} {}", size, UNITS[unit]))
    }
}

fn cache_key(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

// ═══════════════════════════════════════════════════════════════════════
// SQLite
// ═══════════════════════════════════════════════════════════════════════

/// Header store backed by the `rule_headers` table.
#[derive(Clone)]
pub struct SqliteHeaderStore {
    pool: SqlitePool,
}

impl SqliteHeaderStore {
    /// Connect to the configured cache database, creating the schema if needed.
    pub async fn open(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;
        migrate::ensure_schema(&pool).await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Number of cached headers.
    pub async fn count(&self) -> Result<i64> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM rule_headers")
            .fetch_one(&self.pool)
            .await?;
        Ok(n)
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl HeaderStore for SqliteHeaderStore {
    async fn read_header(&self, path: &Path, fingerprint: &str) -> Option<Metadata> {
        let row: Option<(String, String)> = match sqlx::query_as(
            "SELECT fingerprint, header_json FROM rule_headers WHERE path = ?",
        )
        .bind(cache_key(path))
        .fetch_optional(&self.pool)
        .await
        {
            Ok(row) => row,
            Err(e) => {
                debug!("Header cache read failed for {}: {}", path.display(), e);
                return None;
            }
        };

        let (stored_fingerprint, header_json) = row?;
        if stored_fingerprint != fingerprint {
            debug!("Header for {} is stale", path.display());
            return None;
        }

        match serde_json::from_str(&header_json) {
            Ok(header) => Some(header),
            Err(e) => {
                warn!("Ignoring corrupt cached header for {}: {}", path.display(), e);
                None
            }
        }
    }

    async fn write_header(&self, path: &Path, fingerprint: &str, header: &Metadata) -> Result<()> {
        let header_json = serde_json::to_string(header)?;

        sqlx::query(
            r#"
            INSERT INTO rule_headers (path, fingerprint, header_json, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(path) DO UPDATE SET
                fingerprint = excluded.fingerprint,
                header_json = excluded.header_json,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(cache_key(path))
        .bind(fingerprint)
        .bind(&header_json)
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to cache header for {}", path.display()))?;

        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════
// In-memory
// ═══════════════════════════════════════════════════════════════════════

/// Process-local header store for tests and one-shot builds.
pub struct MemoryHeaderStore {
    headers: RwLock<HashMap<PathBuf, (String, Metadata)>>,
}

impl MemoryHeaderStore {
    pub fn new() -> Self {
        Self {
            headers: RwLock::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.headers.read().map(|h| h.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryHeaderStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HeaderStore for MemoryHeaderStore {
    async fn read_header(&self, path: &Path, fingerprint: &str) -> Option<Metadata> {
        let headers = self.headers.read().ok()?;
        match headers.get(path) {
            Some((stored, header)) if *stored == fingerprint => Some(header.clone()),
            _ => None,
        }
    }

    async fn write_header(&self, path: &Path, fingerprint: &str, header: &Metadata) -> Result<()> {
        let mut headers = self
            .headers
            .write()
            .map_err(|_| anyhow::anyhow!("header cache lock poisoned"))?;
        headers.insert(path.to_path_buf(), (fingerprint.to_string(), header.clone()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn header(title: &str) -> Metadata {
        Metadata {
            title: title.to_string(),
            searchable: 1,
            lang: "ds".to_string(),
            ..Default::default()
        }
    }

    async fn sqlite_store(tmp: &TempDir) -> SqliteHeaderStore {
        let options = sqlx::sqlite::SqliteConnectOptions::new()
            .filename(tmp.path().join("headers.sqlite"))
            .create_if_missing(true);
        let pool = SqlitePool::connect_with(options).await.unwrap();
        migrate::ensure_schema(&pool).await.unwrap();
        SqliteHeaderStore::from_pool(pool)
    }

    #[tokio::test]
    async fn sqlite_roundtrip_and_staleness() {
        let tmp = TempDir::new().unwrap();
        let store = sqlite_store(&tmp).await;
        let file = tmp.path().join("demo.lua");
        fs::write(&file, "rule = { title = 'Demo' }").unwrap();
        let fingerprint = fingerprint_file(&file).await.unwrap();

        assert!(store.read_header(&file, &fingerprint).await.is_none());
        store.write_header(&file, &fingerprint, &header("Demo")).await.unwrap();
        assert_eq!(store.read_header(&file, &fingerprint).await, Some(header("Demo")));

        fs::write(&file, "rule = { title = 'Changed' }").unwrap();
        let changed = fingerprint_file(&file).await.unwrap();
        assert!(store.read_header(&file, &changed).await.is_none());
    }

    #[tokio::test]
    async fn sqlite_last_write_wins() {
        let tmp = TempDir::new().unwrap();
        let store = sqlite_store(&tmp).await;
        let file = tmp.path().join("demo.lua");
        fs::write(&file, "x").unwrap();
        let fingerprint = fingerprint_file(&file).await.unwrap();

        store.write_header(&file, &fingerprint, &header("First")).await.unwrap();
        store.write_header(&file, &fingerprint, &header("Second")).await.unwrap();
        assert_eq!(store.read_header(&file, &fingerprint).await.unwrap().title, "Second");
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn corrupt_rows_read_as_misses() {
        let tmp = TempDir::new().unwrap();
        let store = sqlite_store(&tmp).await;
        let file = tmp.path().join("demo.lua");
        fs::write(&file, "x").unwrap();
        let fingerprint = fingerprint_file(&file).await.unwrap();

        sqlx::query("INSERT INTO rule_headers VALUES (?, ?, 'not json', 0)")
            .bind(cache_key(&file))
            .bind(&fingerprint)
            .execute(&store.pool)
            .await
            .unwrap();
        assert!(store.read_header(&file, &fingerprint).await.is_none());
    }

    #[tokio::test]
    async fn missing_files_cannot_be_fingerprinted() {
        assert!(fingerprint_file(Path::new("/definitely/not/here.lua")).await.is_err());
    }

    #[tokio::test]
    async fn header_stored_under_pre_edit_contents_goes_stale() {
        let tmp = TempDir::new().unwrap();
        let file = tmp.path().join("demo.lua");
        fs::write(&file, "rule = { title = 'Before' }").unwrap();
        let before = fingerprint_file(&file).await.unwrap();

        // edited while the old contents were being extracted
        fs::write(&file, "rule = { title = 'After' }").unwrap();

        let memory = MemoryHeaderStore::new();
        let sqlite = sqlite_store(&tmp).await;
        let stores: [&dyn HeaderStore; 2] = [&memory, &sqlite];
        for store in stores {
            store.write_header(&file, &before, &header("Before")).await.unwrap();
            let current = fingerprint_file(&file).await.unwrap();
            assert!(store.read_header(&file, &current).await.is_none());
        }
        assert_eq!(memory.len(), 1);
    }

    #[tokio::test]
    async fn human_readable_sizes() {
        let tmp = TempDir::new().unwrap();
        let small = tmp.path().join("small");
        let big = tmp.path().join("big");
        fs::write(&small, "abc").unwrap();
        fs::write(&big, vec![0u8; 2048]).unwrap();

        assert_eq!(file_size(&small, false).await.unwrap(), "3");
        assert_eq!(file_size(&small, true).await.unwrap(), "3 B");
        assert_eq!(file_size(&big, true).await.unwrap(), "2.00 KB");
    }
}
