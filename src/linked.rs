//! Externally-linked catalog snapshots.
//!
//! A snapshot is a catalog produced elsewhere, `{sites: [...], spider?}`.
//! Its entries are appended after every local source, with relative URLs
//! rewritten against `link.url`. It is the only source allowed to replace
//! an existing entry, and only the reserved `push_agent` one.

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::Value;
use std::path::Path;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::Config;
use crate::models::{SiteEntry, SourceFormat, PUSH_AGENT_KEY};

#[derive(Debug, Default, Deserialize)]
pub struct LinkSnapshot {
    #[serde(default)]
    pub sites: Vec<Value>,
    #[serde(default)]
    pub spider: Option<String>,
}

pub async fn load_snapshot(path: &Path) -> Result<LinkSnapshot> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
}

/// Join `relative` onto `base` the way a browser resolves a link.
pub fn url_join(base: &str, relative: &str) -> String {
    match Url::parse(base).and_then(|b| b.join(relative)) {
        Ok(joined) => joined.to_string(),
        Err(_) => format!(
            "{}/{}",
            base.trim_end_matches('/'),
            relative.trim_start_matches("./").trim_start_matches('/')
        ),
    }
}

/// Mount a `path;k;v` spider reference: join the path onto `base` and keep
/// the remaining segments as they are.
pub fn mount_spider(base: &str, spider: &str) -> String {
    let mut parts = spider.split(';');
    let head = parts.next().unwrap_or_default();
    std::iter::once(url_join(base, head))
        .chain(parts.map(str::to_string))
        .collect::<Vec<_>>()
        .join(";")
}

/// Rewrite one snapshot entry for this catalog.
fn localize(mut entry: SiteEntry, base: &str) -> SiteEntry {
    entry.site_type = SourceFormat::Linked.site_type();
    if !entry.api.is_empty() && !entry.api.starts_with("http") {
        entry.api = url_join(base, &entry.api);
    }
    let rewritten = entry
        .ext_str()
        .filter(|e| e.starts_with('.'))
        .map(|e| url_join(base, e));
    if let Some(ext) = rewritten {
        entry.ext = Value::String(ext);
    }
    entry
}

/// Append the snapshot's entries to `sites` and return its mounted spider.
///
/// A missing or malformed snapshot contributes nothing. Entries without a
/// key or name are skipped.
pub async fn merge_linked(sites: &mut Vec<SiteEntry>, config: &Config) -> Option<String> {
    let link = &config.link;
    let snapshot = match load_snapshot(&config.paths.link_snapshot).await {
        Ok(snapshot) => snapshot,
        Err(e) => {
            debug!("No linked catalog: {:#}", e);
            return None;
        }
    };
    info!("Mounting linked catalog with {} sites", snapshot.sites.len());

    let spider = match (&snapshot.spider, link.mount_jar) {
        (Some(spider), true) if !spider.is_empty() => {
            let mounted = mount_spider(&link.url, spider);
            info!("Mounting linked spider: {}", mounted);
            Some(mounted)
        }
        _ => None,
    };

    for raw in snapshot.sites {
        let entry: SiteEntry = match serde_json::from_value(raw) {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Skipping malformed linked site: {}", e);
                continue;
            }
        };
        if entry.key.is_empty() || entry.name.is_empty() {
            continue;
        }

        let is_push = entry.key == PUSH_AGENT_KEY;
        if is_push && !link.push_override {
            continue;
        }

        let entry = localize(entry, &link.url);
        if is_push {
            match sites.iter().position(|s| s.key == PUSH_AGENT_KEY) {
                Some(idx) => sites[idx] = entry,
                None => sites.push(entry),
            }
        } else {
            sites.push(entry);
        }
    }

    spider
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Metadata;
    use serde_json::{json, Map};
    use std::fs;
    use tempfile::TempDir;

    fn config(tmp: &TempDir, push_override: bool, mount_jar: bool) -> Config {
        let body = format!(
            r#"
[paths]
native_dir = "n"
legacy_dir = "l"
secondary_dir = "s"
parse_dir = "p"
config_dir = "c"
subscription_file = "c/sub.json"
link_snapshot = "{snap}"

[cache]
path = "h.sqlite"

[link]
enabled = true
url = "http://remote.example/base/"
push_override = {push_override}
mount_jar = {mount_jar}
"#,
            snap = tmp.path().join("link.json").display(),
        );
        toml::from_str(&body).unwrap()
    }

    fn local(key: &str) -> SiteEntry {
        SiteEntry {
            key: key.to_string(),
            name: format!("{}(DS)", key),
            site_type: 4,
            api: "http://local/api".to_string(),
            meta: Metadata::default(),
            ext: Value::String(String::new()),
            extra: Map::new(),
        }
    }

    fn write_snapshot(tmp: &TempDir, value: Value) {
        fs::write(tmp.path().join("link.json"), value.to_string()).unwrap();
    }

    #[tokio::test]
    async fn relative_urls_are_rewritten_and_type_forced() {
        let tmp = TempDir::new().unwrap();
        write_snapshot(
            &tmp,
            json!({"sites": [{"key": "r1", "name": "Remote", "type": 3, "api": "./api/r1", "ext": "./r1.json"}]}),
        );
        let mut sites = vec![local("a")];
        merge_linked(&mut sites, &config(&tmp, false, false)).await;

        assert_eq!(sites.len(), 2);
        assert_eq!(sites[1].site_type, 4);
        assert_eq!(sites[1].api, "http://remote.example/base/api/r1");
        assert_eq!(sites[1].ext, json!("http://remote.example/base/r1.json"));
    }

    #[tokio::test]
    async fn push_agent_is_dropped_without_override() {
        let tmp = TempDir::new().unwrap();
        write_snapshot(&tmp, json!({"sites": [{"key": "push_agent", "name": "Remote Push", "api": "http://x"}]}));
        let mut sites = vec![local("push_agent")];
        merge_linked(&mut sites, &config(&tmp, false, false)).await;
        assert_eq!(sites.len(), 1);
        assert_eq!(sites[0].name, "push_agent(DS)");
    }

    #[tokio::test]
    async fn push_agent_replaces_in_place_with_override() {
        let tmp = TempDir::new().unwrap();
        write_snapshot(&tmp, json!({"sites": [{"key": "push_agent", "name": "Remote Push", "api": "http://x"}]}));
        let mut sites = vec![local("a"), local("push_agent"), local("b")];
        merge_linked(&mut sites, &config(&tmp, true, false)).await;
        assert_eq!(sites.len(), 3);
        assert_eq!(sites[1].name, "Remote Push");
    }

    #[tokio::test]
    async fn spider_is_mounted_only_when_enabled() {
        let tmp = TempDir::new().unwrap();
        write_snapshot(&tmp, json!({"sites": [], "spider": "./jar/spider.jar;md5;abc"}));
        let mut sites = Vec::new();
        assert_eq!(merge_linked(&mut sites, &config(&tmp, false, false)).await, None);
        assert_eq!(
            merge_linked(&mut sites, &config(&tmp, false, true)).await.as_deref(),
            Some("http://remote.example/base/jar/spider.jar;md5;abc")
        );
    }

    #[tokio::test]
    async fn missing_or_broken_snapshots_are_swallowed() {
        let tmp = TempDir::new().unwrap();
        let mut sites = vec![local("a")];
        assert!(merge_linked(&mut sites, &config(&tmp, true, true)).await.is_none());
        fs::write(tmp.path().join("link.json"), "{broken").unwrap();
        assert!(merge_linked(&mut sites, &config(&tmp, true, true)).await.is_none());
        assert_eq!(sites.len(), 1);
    }
}
