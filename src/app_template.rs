//! App-template sites.
//!
//! A native plugin named `{key}[模板].lua` is a template: one script that
//! serves many apps, each configured under `key` in `App模板配置.json`.
//! Every configured app except the sample becomes its own native entry,
//! seeded ahead of the regular native entries.
//!
//! ```json
//! { "AppFoo": { "示例": {...}, "Alpha": {...}, "Beta": {...} } }
//! ```

use anyhow::{Context, Result};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, info, warn};

use crate::aggregate::BuildRequest;
use crate::models::{Metadata, PluginFile, SiteEntry, SourceFormat};

pub const TEMPLATE_CONFIG_FILE: &str = "App模板配置.json";
/// Suffix on a template plugin's base name.
pub const TEMPLATE_MARKER: &str = "[模板]";
/// Config name reserved for documentation; never listed.
const SAMPLE_NAME: &str = "示例";

/// Read the template config from `dir`. `None` when the file is absent.
pub async fn load_template_config(dir: &Path) -> Result<Option<Map<String, Value>>> {
    let path = dir.join(TEMPLATE_CONFIG_FILE);
    if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
        return Ok(None);
    }
    let content = tokio::fs::read_to_string(&path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let config = serde_json::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))?;
    Ok(Some(config))
}

/// Entries for every configured app whose template plugin is among `files`.
///
/// Keys without a matching template, and keys whose value is not an
/// object of app configs, contribute nothing.
pub fn template_entries(templates: &Map<String, Value>, files: &[PluginFile], request: &BuildRequest) -> Vec<SiteEntry> {
    let available: HashSet<&str> = files.iter().map(|f| f.base_name.as_str()).collect();
    let pwd = request.pwd_query();
    let mut entries = Vec::new();

    for (key, apps) in templates {
        let template = format!("{}{}", key, TEMPLATE_MARKER);
        if !available.contains(template.as_str()) {
            debug!("No template plugin for {}", key);
            continue;
        }
        let Some(apps) = apps.as_object() else {
            warn!("Skipping template config {}: not an object", key);
            continue;
        };

        let tag = key.replacen("App", "", 1).to_uppercase();
        let api = format!("{}/api/{}{}", request.host, template, pwd);
        for name in apps.keys().filter(|name| name.as_str() != SAMPLE_NAME) {
            entries.push(SiteEntry {
                key: format!("drpyS_{}_{}", name, key),
                name: format!("{}[M]({})", name, tag),
                site_type: SourceFormat::Native.site_type(),
                api: api.clone(),
                meta: Metadata {
                    searchable: 1,
                    filterable: 1,
                    quick_search: 0,
                    ..Default::default()
                },
                ext: Value::String(format!("../json/{}${}", TEMPLATE_CONFIG_FILE, name)),
                extra: Map::new(),
            });
        }
    }
    entries
}

/// Load the template config from `dir` and expand it against `files`.
///
/// A missing config yields nothing; a malformed one is logged and also
/// yields nothing.
pub async fn template_sites(dir: &Path, files: &[PluginFile], request: &BuildRequest) -> Vec<SiteEntry> {
    match load_template_config(dir).await {
        Ok(Some(templates)) => {
            let entries = template_entries(&templates, files, request);
            if !entries.is_empty() {
                info!("Seeded {} app-template sites", entries.len());
            }
            entries
        }
        Ok(None) => Vec::new(),
        Err(e) => {
            warn!("Failed to read app templates: {:#}", e);
            Vec::new()
        }
    }
}
