//! Extension traits for rule interpretation and header caching.
//!
//! The catalog pipeline never evaluates plugin scripts or touches cache
//! storage directly. It goes through two seams:
//!
//! ```text
//! ┌──────────────┐   extract    ┌────────────────────┐
//! │ SourceAdapter│─────────────▶│  RuleInterpreter   │  Lua VM, or a test fake
//! │              │              └────────────────────┘
//! │              │  read/write  ┌────────────────────┐
//! │              │─────────────▶│    HeaderStore     │  SQLite, or in-memory
//! └──────────────┘              └────────────────────┘
//! ```
//!
//! Both are object-safe and shared across concurrent tasks as
//! `Arc<dyn ...>`.
//!
//! # Example
//!
//! ```rust
//! use async_trait::async_trait;
//! use serde_json::{Map, Value};
//! use site_catalog::error::CatalogError;
//! use site_catalog::models::{Metadata, PluginFile};
//! use site_catalog::traits::RuleInterpreter;
//! use std::path::Path;
//!
//! struct FixedTitle;
//!
//! #[async_trait]
//! impl RuleInterpreter for FixedTitle {
//!     async fn extract_metadata(&self, file: &PluginFile) -> Result<Metadata, CatalogError> {
//!         Ok(Metadata { title: file.base_name.to_uppercase(), ..Default::default() })
//!     }
//!
//!     async fn extract_parse(&self, _path: &Path) -> Result<Map<String, Value>, CatalogError> {
//!         Ok(Map::new())
//!     }
//! }
//! ```

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::path::Path;

use crate::error::CatalogError;
use crate::models::{Metadata, PluginFile};

/// Evaluates plugin scripts to discover what they declare about themselves.
///
/// Implementations may be slow (they usually run a script VM), which is
/// why the adapters consult a [`HeaderStore`] first.
#[async_trait]
pub trait RuleInterpreter: Send + Sync {
    /// Discover a rule plugin's header.
    ///
    /// The returned metadata carries the script's own capability flags;
    /// the adapter stamps the language tag and persists it.
    ///
    /// # Errors
    ///
    /// [`CatalogError::Extraction`] when the script cannot be evaluated.
    async fn extract_metadata(&self, file: &PluginFile) -> Result<Metadata, CatalogError>;

    /// Evaluate a parse script and return the fields it declares
    /// (`url`, `type`, `ext`, `header`, ...).
    async fn extract_parse(&self, path: &Path) -> Result<Map<String, Value>, CatalogError>;
}

/// Persists one small header per plugin file between builds.
///
/// Reads fail soft: a missing, stale, or corrupt entry is simply a miss.
/// Writes are best-effort; callers log failures and carry on.
#[async_trait]
pub trait HeaderStore: Send + Sync {
    /// Return the header cached for `path` if it was stored under
    /// `fingerprint`, or `None` on any kind of miss.
    async fn read_header(&self, path: &Path, fingerprint: &str) -> Option<Metadata>;

    /// Store `header` for `path` under the fingerprint of the contents it
    /// was extracted from, replacing whatever was there.
    async fn write_header(&self, path: &Path, fingerprint: &str, header: &Metadata) -> Result<()>;
}
