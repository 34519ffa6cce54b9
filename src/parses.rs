//! Parse descriptors, live sources, and the player overlay.

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use crate::adapter::list_plugin_files;
use crate::batch::{partition_outcomes, run_batch, Task, TaskFailure};
use crate::config::{Config, LivesConfig};
use crate::error::CatalogError;
use crate::linked::url_join;
use crate::models::{flag_from_value, LiveSource, ParseDescriptor, SourceFormat};
use crate::sort::pinned_sort;
use crate::traits::RuleInterpreter;

pub const PLAYER_FILE: &str = "player.json";
pub const STATIC_PARSES_FILE: &str = "parses.json";

/// Playback flags a parse handles unless its script says otherwise.
pub const DEFAULT_PARSE_FLAGS: [&str; 20] = [
    "qiyi",
    "imgo",
    "爱奇艺",
    "奇艺",
    "qq",
    "qq 预告及花絮",
    "腾讯",
    "youku",
    "优酷",
    "pptv",
    "PPTV",
    "letv",
    "乐视",
    "leshi",
    "mgtv",
    "芒果",
    "sohu",
    "xigua",
    "fun",
    "风行",
];

const SCRIPT_PARSE_PINS: [&str; 4] = ["JSON并发", "JSON合集", "虾米", "奇奇"];
const STATIC_PARSE_PINS: [&str; 2] = ["J", "W"];

fn pins(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

fn default_parse_fields() -> Map<String, Value> {
    let mut fields = Map::new();
    fields.insert("type".into(), json!(1));
    fields.insert("ext".into(), json!({ "flag": DEFAULT_PARSE_FLAGS }));
    fields.insert("header".into(), json!({ "User-Agent": "Mozilla/5.0" }));
    fields
}

/// Turn a parse script's declared fields into a descriptor.
///
/// Declared fields replace the defaults wholesale; `url` falls back to the
/// catalog's own parse endpoint for `name`.
pub fn parse_descriptor(name: &str, declared: Map<String, Value>, host: &str) -> ParseDescriptor {
    let mut fields = default_parse_fields();
    fields.extend(declared);

    let url = fields
        .get("url")
        .and_then(Value::as_str)
        .filter(|u| !u.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| format!("{}/parse/{}?url=", host, name));

    ParseDescriptor {
        name: name.to_string(),
        url,
        parse_type: fields.get("type").map(flag_from_value).unwrap_or(0),
        ext: fields.remove("ext").unwrap_or(Value::Null),
        header: fields.remove("header").unwrap_or(Value::Null),
    }
}

/// Evaluate every parse script, then append the configured static parses.
///
/// Script parses are ordered with their own pin list, static ones with
/// theirs; the two groups are never interleaved.
pub async fn build_parses(
    config: &Config,
    interpreter: Arc<dyn RuleInterpreter>,
    host: &str,
) -> Result<(Vec<ParseDescriptor>, Vec<TaskFailure>), CatalogError> {
    let files = list_plugin_files(
        &config.paths.parse_dir,
        &config.sources.native_ext,
        &config.sources.disabled_marker,
        SourceFormat::Native,
    )?;
    info!("Building parses from {} scripts", files.len());

    let tasks: Vec<Task<ParseDescriptor>> = files
        .into_iter()
        .map(|file| {
            let interpreter = interpreter.clone();
            let host = host.to_string();
            Task::new(format!("parse/{}", file.file_name), async move {
                let declared = interpreter
                    .extract_parse(&file.path)
                    .await
                    .with_context(|| format!("Error parsing jx object for file: {}", file.file_name))?;
                Ok(parse_descriptor(&file.base_name, declared, &host))
            })
        })
        .collect();

    let (scripted, failures) = partition_outcomes(run_batch(tasks, config.batch.max_concurrency).await);

    let mut parses = pinned_sort(scripted, |p| p.name.as_str(), &pins(&SCRIPT_PARSE_PINS));
    let statics = load_static_parses(&config.paths.config_dir, host).await;
    parses.extend(pinned_sort(statics, |p| p.name.as_str(), &pins(&STATIC_PARSE_PINS)));
    Ok((parses, failures))
}

#[derive(Debug, Deserialize)]
struct StaticParse {
    name: String,
    url: String,
    #[serde(rename = "type", default)]
    parse_type: Option<Value>,
    #[serde(default)]
    ext: Option<Value>,
    #[serde(default)]
    header: Option<Value>,
}

/// Read `parses.json`: a list of `{name, url, type?, ext?, header?}`.
/// Relative URLs are joined onto the host.
pub async fn load_static_parses(config_dir: &Path, host: &str) -> Vec<ParseDescriptor> {
    let path = config_dir.join(STATIC_PARSES_FILE);
    if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
        return Vec::new();
    }
    let parsed: Result<Vec<StaticParse>> = tokio::fs::read_to_string(&path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))
        .and_then(|content| serde_json::from_str(&content).map_err(Into::into));

    match parsed {
        Ok(list) => list
            .into_iter()
            .map(|p| {
                let url = if p.url.starts_with("http") {
                    p.url
                } else {
                    url_join(&format!("{}/", host), p.url.trim_start_matches('/'))
                };
                ParseDescriptor {
                    name: p.name,
                    url,
                    parse_type: p.parse_type.as_ref().map(flag_from_value).unwrap_or(0),
                    ext: p.ext.unwrap_or(Value::Null),
                    header: p.header.unwrap_or(Value::Null),
                }
            })
            .collect(),
        Err(e) => {
            warn!("Ignoring static parses {}: {:#}", path.display(), e);
            Vec::new()
        }
    }
}

/// One live source when a live URL is configured. Relative URLs resolve
/// under `{host}/public/`.
pub fn build_lives(lives: &LivesConfig, host: &str) -> Vec<LiveSource> {
    if lives.url.is_empty() {
        return Vec::new();
    }
    let url = if lives.url.starts_with("http") {
        lives.url.clone()
    } else {
        url_join(&url_join(&format!("{}/", host), "public/"), &lives.url)
    };
    vec![LiveSource {
        name: "直播".to_string(),
        live_type: 0,
        url,
        player_type: 1,
        ua: "okhttp/3.12.13".to_string(),
        epg: lives.epg.clone(),
        logo: lives.logo.clone(),
    }]
}

/// Read `player.json`. Anything but a readable JSON object is empty.
pub async fn load_player(config_dir: &Path) -> Map<String, Value> {
    let path = config_dir.join(PLAYER_FILE);
    tokio::fs::read_to_string(&path)
        .await
        .ok()
        .and_then(|content| serde_json::from_str::<Value>(&content).ok())
        .and_then(|value| match value {
            Value::Object(map) => Some(map),
            _ => None,
        })
        .unwrap_or_default()
}
