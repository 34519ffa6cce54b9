//! Core data models used throughout the catalog pipeline.
//!
//! These types represent the plugin files, rule headers, and catalog entries
//! that flow from the source adapters through merge, filtering, and
//! projection.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::path::PathBuf;

/// Key of the reserved singleton entry. Only the linked snapshot may
/// override it, and only when push override is enabled.
pub const PUSH_AGENT_KEY: &str = "push_agent";

/// Plugin format a source adapter understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceFormat {
    /// Native scripted rules, served through the catalog's own API.
    Native,
    /// Legacy scripted rules, run by the client-side legacy runtime.
    Legacy,
    /// Secondary-language rules.
    Secondary,
    /// Entries taken from a previously produced external catalog.
    Linked,
}

impl SourceFormat {
    /// Append order used by the aggregator. Linked is last so that its
    /// override rule sees every locally produced entry.
    pub const PRECEDENCE: [SourceFormat; 4] = [
        SourceFormat::Native,
        SourceFormat::Legacy,
        SourceFormat::Secondary,
        SourceFormat::Linked,
    ];

    /// The `type` value written into every entry of this format.
    pub fn site_type(self) -> u8 {
        match self {
            SourceFormat::Native | SourceFormat::Linked => 4,
            SourceFormat::Legacy | SourceFormat::Secondary => 3,
        }
    }

    /// Language tag stored in freshly extracted headers.
    pub fn lang(self) -> &'static str {
        match self {
            SourceFormat::Native => "ds",
            SourceFormat::Legacy => "dr2",
            SourceFormat::Secondary => "hipy",
            SourceFormat::Linked => "link",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            SourceFormat::Native => "native",
            SourceFormat::Legacy => "legacy",
            SourceFormat::Secondary => "secondary",
            SourceFormat::Linked => "linked",
        }
    }
}

impl std::fmt::Display for SourceFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.label())
    }
}

/// A candidate plugin file, enumerated fresh for every build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginFile {
    pub path: PathBuf,
    pub format: SourceFormat,
    /// File name including the extension (`foo.lua`).
    pub file_name: String,
    /// File name without the extension (`foo`).
    pub base_name: String,
}

/// The small descriptive header of a plugin, as cached between builds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub title: String,
    #[serde(default, deserialize_with = "lenient_flag")]
    pub searchable: u8,
    #[serde(default, deserialize_with = "lenient_flag")]
    pub filterable: u8,
    #[serde(default, rename = "quickSearch", deserialize_with = "lenient_flag")]
    pub quick_search: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub more: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logo: Option<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub lang: String,
}

impl Metadata {
    /// Capability flags assumed for a format before anything is extracted.
    pub fn defaults_for(format: SourceFormat) -> Self {
        let flag = match format {
            SourceFormat::Secondary => 1,
            _ => 0,
        };
        Self {
            searchable: flag,
            filterable: flag,
            quick_search: flag,
            ..Default::default()
        }
    }
}

/// Accepts `0`/`1`/`2`, booleans, numeric strings, and `null` for a
/// capability flag. Anything else reads as `0`.
fn lenient_flag<'de, D>(deserializer: D) -> Result<u8, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(flag_from_value(&value))
}

/// Like [`lenient_flag`], but an explicit `null` stays `None`.
fn lenient_optional_flag<'de, D>(deserializer: D) -> Result<Option<u8>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok((!value.is_null()).then(|| flag_from_value(&value)))
}

pub(crate) fn flag_from_value(value: &Value) -> u8 {
    match value {
        Value::Bool(b) => u8::from(*b),
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().map(|f| f.max(0.0) as u64))
            .map(|v| v.min(u8::MAX as u64) as u8)
            .unwrap_or(0),
        Value::String(s) => s.trim().parse().unwrap_or(0),
        _ => 0,
    }
}

/// One catalog entry.
///
/// Locally built entries carry only the fields below; linked entries may
/// carry arbitrary extra fields, which are preserved verbatim in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiteEntry {
    pub key: String,
    pub name: String,
    #[serde(rename = "type", default, deserialize_with = "lenient_flag")]
    pub site_type: u8,
    #[serde(default)]
    pub api: String,
    #[serde(flatten)]
    pub meta: Metadata,
    #[serde(default = "empty_ext")]
    pub ext: Value,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn empty_ext() -> Value {
    Value::String(String::new())
}

impl SiteEntry {
    /// The `ext` field as a string, when it is one.
    pub fn ext_str(&self) -> Option<&str> {
        self.ext.as_str()
    }
}

/// One display identity assigned to a plugin by the alias map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AliasTarget {
    pub alias: String,
    /// Structured parameters, serialized into the entry's `ext`.
    #[serde(default)]
    pub query_params: Option<Map<String, Value>>,
    /// Raw query string, used when no structured parameters are present.
    #[serde(default)]
    pub query_str: Option<String>,
}

/// `base name -> aliases`, supplied by the surrounding deployment.
pub type AliasMap = std::collections::HashMap<String, Vec<AliasTarget>>;

/// Whether a subscription keeps or drops the names its pattern matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterMode {
    Include,
    Exclude,
}

/// A subscription descriptor, looked up by `code`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    pub code: String,
    #[serde(default)]
    pub name: Option<String>,
    /// Only an explicit `0` disables a subscription.
    #[serde(default, deserialize_with = "lenient_optional_flag")]
    pub status: Option<u8>,
    #[serde(default, deserialize_with = "lenient_flag")]
    pub mode: u8,
    #[serde(default)]
    pub reg: String,
    #[serde(default)]
    pub sort: Option<String>,
}

impl Subscription {
    pub fn is_enabled(&self) -> bool {
        self.status != Some(0)
    }

    /// `None` for unknown modes, which apply no filter.
    pub fn filter_mode(&self) -> Option<FilterMode> {
        match self.mode {
            0 => Some(FilterMode::Include),
            1 => Some(FilterMode::Exclude),
            _ => None,
        }
    }

    /// The subscription pattern, `.*` when none is set.
    pub fn pattern(&self) -> &str {
        if self.reg.is_empty() {
            ".*"
        } else {
            &self.reg
        }
    }
}

/// A playback parse descriptor listed alongside the sites.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParseDescriptor {
    pub name: String,
    pub url: String,
    #[serde(rename = "type", default, deserialize_with = "lenient_flag")]
    pub parse_type: u8,
    #[serde(default)]
    pub ext: Value,
    #[serde(default)]
    pub header: Value,
}

impl ParseDescriptor {
    /// The descriptor's declared flag list, empty when absent.
    pub fn flags(&self) -> Vec<String> {
        self.ext
            .get("flag")
            .and_then(Value::as_array)
            .map(|flags| {
                flags
                    .iter()
                    .filter_map(|f| f.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// A live-TV source listed in the primary catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveSource {
    pub name: String,
    #[serde(rename = "type")]
    pub live_type: u8,
    pub url: String,
    pub player_type: u8,
    pub ua: String,
    pub epg: String,
    pub logo: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn linked_entries_keep_unknown_fields() {
        let raw = json!({
            "key": "csp_Foo",
            "name": "Foo",
            "type": 3,
            "api": "csp_Foo",
            "searchable": true,
            "jar": "./foo.jar",
            "playerType": 2
        });
        let entry: SiteEntry = serde_json::from_value(raw).unwrap();
        assert_eq!(entry.meta.searchable, 1);
        assert_eq!(entry.extra.get("jar"), Some(&json!("./foo.jar")));
        assert_eq!(entry.extra.get("playerType"), Some(&json!(2)));
        assert!(!entry.extra.contains_key("searchable"));
        assert_eq!(entry.ext, json!(""));
    }

    #[test]
    fn metadata_serializes_wire_names() {
        let meta = Metadata {
            title: "Demo".to_string(),
            quick_search: 1,
            lang: "ds".to_string(),
            ..Default::default()
        };
        let value = serde_json::to_value(&meta).unwrap();
        assert_eq!(value["quickSearch"], json!(1));
        assert!(value.get("logo").is_none());
    }

    #[test]
    fn subscription_defaults_to_match_all() {
        let sub: Subscription =
            serde_json::from_value(json!({"code": "all", "status": 1})).unwrap();
        assert_eq!(sub.pattern(), ".*");
        assert_eq!(sub.filter_mode(), Some(FilterMode::Include));
    }

    #[test]
    fn subscription_without_status_is_enabled() {
        let sub: Subscription =
            serde_json::from_value(json!({"code": "all", "mode": 0, "reg": ".*"})).unwrap();
        assert_eq!(sub.status, None);
        assert!(sub.is_enabled());

        let sub: Subscription =
            serde_json::from_value(json!({"code": "off", "status": "0"})).unwrap();
        assert!(!sub.is_enabled());
    }

    #[test]
    fn secondary_defaults_enable_every_capability() {
        let meta = Metadata::defaults_for(SourceFormat::Secondary);
        assert_eq!((meta.searchable, meta.filterable, meta.quick_search), (1, 1, 1));
        let meta = Metadata::defaults_for(SourceFormat::Native);
        assert_eq!((meta.searchable, meta.filterable, meta.quick_search), (0, 0, 0));
    }
}
