//! Default [`RuleInterpreter`]: evaluates Lua rule and parse scripts.
//!
//! A rule script declares itself through a global `rule` table:
//!
//! ```lua
//! rule = {
//!     title = "Demo Site",
//!     searchable = 1,
//!     filterable = 1,
//!     quickSearch = 0,
//!     logo = "https://example.com/logo.png",
//! }
//! ```
//!
//! A parse script declares a global `jx` table with any of `url`, `type`,
//! `ext`, and `header`. Only these declarations are read; functions the
//! script defines are never called.
//!
//! Secondary-language rules are not executed at all. Their display name is
//! scanned out of the source by [`scan_secondary_title`].

use async_trait::async_trait;
use mlua::prelude::*;
use regex::Regex;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use crate::error::CatalogError;
use crate::lua_runtime::{lua_value_to_json, new_sandboxed_vm};
use crate::models::{flag_from_value, Metadata, PluginFile};
use crate::traits::RuleInterpreter;

/// Runs each script in a fresh sandboxed VM on the blocking pool.
#[derive(Debug, Default, Clone)]
pub struct LuaInterpreter;

impl LuaInterpreter {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl RuleInterpreter for LuaInterpreter {
    async fn extract_metadata(&self, file: &PluginFile) -> Result<Metadata, CatalogError> {
        let declared = eval_global_table(file.path.clone(), "rule").await?;
        Ok(metadata_from_declaration(&declared))
    }

    async fn extract_parse(&self, path: &Path) -> Result<Map<String, Value>, CatalogError> {
        eval_global_table(path.to_path_buf(), "jx").await
    }
}

async fn eval_global_table(path: PathBuf, global: &'static str) -> Result<Map<String, Value>, CatalogError> {
    let display = path.display().to_string();
    tokio::task::spawn_blocking(move || run_script(&path, global))
        .await
        .map_err(|e| CatalogError::Extraction {
            file: display.clone(),
            message: format!("interpreter task failed: {}", e),
        })?
        .map_err(|message| CatalogError::Extraction {
            file: display,
            message,
        })
}

/// Load and execute one script, then read back the named global table.
fn run_script(path: &Path, global: &str) -> Result<Map<String, Value>, String> {
    let source = std::fs::read_to_string(path).map_err(|e| format!("read failed: {}", e))?;
    let script_dir = path.parent().unwrap_or(Path::new("."));
    let name = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();

    let lua = new_sandboxed_vm(&format!("rule:{}", name), script_dir).map_err(|e| e.to_string())?;

    lua.load(&source)
        .set_name(path.to_string_lossy())
        .exec()
        .map_err(|e| format!("script error: {}", e))?;

    let table: LuaValue = lua.globals().get(global).map_err(|e| e.to_string())?;
    match table {
        LuaValue::Table(_) => match lua_value_to_json(table).map_err(|e| e.to_string())? {
            Value::Object(map) => Ok(map),
            // An empty table reads back as an empty object; a list is malformed.
            Value::Array(_) => Err(format!("global '{}' must be a key/value table", global)),
            _ => Ok(Map::new()),
        },
        LuaValue::Nil => Err(format!("script must define a global '{}' table", global)),
        _ => Err(format!("global '{}' must be a table", global)),
    }
}

/// Pick the header fields out of a declared `rule` table.
pub(crate) fn metadata_from_declaration(declared: &Map<String, Value>) -> Metadata {
    let flag = |key: &str| declared.get(key).map(flag_from_value).unwrap_or(0);
    Metadata {
        title: declared
            .get("title")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        searchable: flag("searchable"),
        filterable: flag("filterable"),
        quick_search: flag("quickSearch"),
        more: declared.get("more").filter(|v| !v.is_null()).cloned(),
        logo: declared
            .get("logo")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string),
        lang: String::new(),
    }
}

fn secondary_name_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| {
            Regex::new(r#"def\s+getName\s*\(\s*self\s*\)\s*:\s*return\s*["']([^"']*)["']"#).ok()
        })
        .as_ref()
}

/// Find the name a secondary-language rule returns from `getName`.
pub fn scan_secondary_title(source: &str) -> Option<String> {
    secondary_name_pattern()?
        .captures(source)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|s| !s.is_empty())
}
