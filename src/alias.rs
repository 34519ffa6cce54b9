//! Alias map loading and `ext` derivation for aliased entries.

use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use flate2::write::GzEncoder;
use flate2::Compression;
use serde_json::{Map, Value};
use std::io::Write;
use std::path::Path;
use tracing::warn;
use url::Url;

use crate::models::{AliasMap, AliasTarget};

pub const ALIAS_MAP_FILE: &str = "alias_map.json";

/// Read `alias_map.json` from `config_dir`.
///
/// A missing file is an empty map. A file that is not a JSON object is
/// logged and also treated as empty. Keys whose value is not a list of
/// aliases are skipped one by one, so a single bad entry never drops the
/// aliases of every other plugin.
pub async fn load_alias_map(config_dir: &Path) -> AliasMap {
    let path = config_dir.join(ALIAS_MAP_FILE);
    if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
        return AliasMap::new();
    }
    match read_alias_map(&path).await {
        Ok(map) => map,
        Err(e) => {
            warn!("Ignoring alias map {}: {:#}", path.display(), e);
            AliasMap::new()
        }
    }
}

async fn read_alias_map(path: &Path) -> Result<AliasMap> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let raw: Map<String, Value> = serde_json::from_str(&content).with_context(|| "Failed to parse alias map")?;

    let mut map = AliasMap::with_capacity(raw.len());
    for (name, value) in raw {
        match serde_json::from_value::<Vec<AliasTarget>>(value) {
            Ok(targets) => {
                map.insert(name, targets);
            }
            Err(e) => warn!("Skipping aliases for {}: {}", name, e),
        }
    }
    Ok(map)
}

/// `ext` of a native alias entry: the structured parameters serialized as
/// JSON, else the raw query string, optionally gzipped and base64 encoded.
///
/// Returns an empty string when the alias carries neither.
pub fn native_alias_ext(target: &AliasTarget, compress: bool) -> Result<String> {
    let raw = match (&target.query_params, &target.query_str) {
        (Some(params), _) => serde_json::to_string(params)?,
        (None, Some(query)) => query.clone(),
        (None, None) => String::new(),
    };
    if raw.is_empty() || !compress {
        return Ok(raw);
    }
    gzip_base64(&raw)
}

pub fn gzip_base64(data: &str) -> Result<String> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data.as_bytes())?;
    Ok(STANDARD.encode(encoder.finish()?))
}

/// Merge `query` into the query string of `base`.
///
/// Keys already present in `base` take the new value in place; new keys
/// are appended in the order given. An empty `base` stays empty, since an
/// entry with no `ext` has nothing to carry parameters.
pub fn update_query_string(base: &str, query: Option<&str>) -> String {
    let query = query.unwrap_or("").trim_start_matches('?');
    if base.is_empty() || query.is_empty() {
        return base.to_string();
    }

    let Ok(mut url) = Url::parse(base) else {
        let sep = if base.contains('?') { '&' } else { '?' };
        return format!("{}{}{}", base, sep, query);
    };

    let incoming: Vec<(String, String)> = url::form_urlencoded::parse(query.as_bytes())
        .into_owned()
        .collect();
    let mut merged: Vec<(String, String)> = url.query_pairs().into_owned().collect();
    for (key, value) in incoming {
        match merged.iter_mut().find(|(k, _)| *k == key) {
            Some(existing) => existing.1 = value,
            None => merged.push((key, value)),
        }
    }

    url.query_pairs_mut().clear().extend_pairs(merged);
    url.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use serde_json::json;
    use std::io::Read;
    use tempfile::TempDir;

    fn target(params: Option<serde_json::Value>, query: Option<&str>) -> AliasTarget {
        AliasTarget {
            alias: "a".to_string(),
            query_params: params.and_then(|p| p.as_object().cloned()),
            query_str: query.map(str::to_string),
        }
    }

    #[test]
    fn structured_params_are_serialized_and_compressed() {
        let ext = native_alias_ext(&target(Some(json!({"type": "movie"})), Some("x=1")), true).unwrap();
        let bytes = STANDARD.decode(ext).unwrap();
        let mut plain = String::new();
        GzDecoder::new(&bytes[..]).read_to_string(&mut plain).unwrap();
        assert_eq!(plain, r#"{"type":"movie"}"#);
    }

    #[test]
    fn raw_query_is_used_when_no_params() {
        let ext = native_alias_ext(&target(None, Some("cate=tv")), false).unwrap();
        assert_eq!(ext, "cate=tv");
        assert_eq!(native_alias_ext(&target(None, None), true).unwrap(), "");
    }

    #[test]
    fn query_strings_merge_into_urls() {
        assert_eq!(
            update_query_string("http://h/js/a.lua?pwd=1", Some("pwd=2&cate=tv")),
            "http://h/js/a.lua?pwd=2&cate=tv"
        );
        assert_eq!(
            update_query_string("http://h/py/a.py", Some("?x=1")),
            "http://h/py/a.py?x=1"
        );
        assert_eq!(update_query_string("", Some("x=1")), "");
        assert_eq!(update_query_string("http://h/a", None), "http://h/a");
    }

    #[tokio::test]
    async fn malformed_alias_map_is_empty() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join(ALIAS_MAP_FILE), "{not json").unwrap();
        assert!(load_alias_map(tmp.path()).await.is_empty());

        std::fs::write(
            tmp.path().join(ALIAS_MAP_FILE),
            r#"{"demo": [{"alias": "One", "queryStr": "a=1"}, {"alias": "Two", "queryParams": {"b": 2}}]}"#,
        )
        .unwrap();
        let map = load_alias_map(tmp.path()).await;
        assert_eq!(map["demo"].len(), 2);
        assert_eq!(map["demo"][1].query_params.as_ref().unwrap()["b"], 2);
    }

    #[tokio::test]
    async fn bad_keys_do_not_drop_good_ones() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(
            tmp.path().join(ALIAS_MAP_FILE),
            r#"{"good": [{"alias": "One", "queryStr": "a=1"}], "bad": "not-a-list", "worse": [{"queryStr": "x"}]}"#,
        )
        .unwrap();
        let map = load_alias_map(tmp.path()).await;
        assert_eq!(map.len(), 1);
        assert_eq!(map["good"][0].alias, "One");
    }

    #[tokio::test]
    async fn missing_alias_map_is_empty() {
        let tmp = TempDir::new().unwrap();
        assert!(load_alias_map(tmp.path()).await.is_empty());
    }
}
