//! Sandboxed Lua 5.4 VM used to evaluate rule and parse scripts.
//!
//! Rule scripts are evaluated only to read what they declare about
//! themselves, so the host surface is small and side-effect free. The VM
//! runs on a blocking thread (via [`tokio::task::spawn_blocking`]) and is
//! discarded after each evaluation.
//!
//! # Host APIs
//!
//! | Module | Functions |
//! |--------|-----------|
//! | `json` | `parse`, `encode` |
//! | `env` | `get` |
//! | `log` | `info`, `warn`, `error`, `debug` |
//! | `fs` | `read`, `list` (confined to the script's directory) |
//! | `base64` | `encode`, `decode` |
//! | `crypto` | `sha256`, `hmac_sha256` |
//!
//! # Sandboxing
//!
//! `os`, `io`, `debug`, `loadfile`, and `dofile` are removed, and every
//! evaluation runs under an instruction-count deadline.

use globset::Glob;
use hmac::{Hmac, Mac};
use mlua::prelude::*;
use serde_json::Value as Json;
use sha2::{Digest, Sha256};
use std::path::Path;
use std::time::{Duration, Instant};

/// Wall-clock budget for evaluating one script.
pub const SCRIPT_TIMEOUT: Duration = Duration::from_secs(10);

/// Build a fresh VM with the sandbox, the deadline hook, and every host API.
///
/// `script_name` prefixes log lines; `sandbox_root` bounds `fs.*`.
pub(crate) fn new_sandboxed_vm(script_name: &str, sandbox_root: &Path) -> LuaResult<Lua> {
    let lua = Lua::new();

    let deadline = Instant::now() + SCRIPT_TIMEOUT;
    lua.set_hook(
        mlua::HookTriggers::new().every_nth_instruction(10_000),
        move |_lua, _debug| {
            if Instant::now() > deadline {
                Err(mlua::Error::RuntimeError(format!(
                    "script timed out after {} seconds",
                    SCRIPT_TIMEOUT.as_secs()
                )))
            } else {
                Ok(mlua::VmState::Continue)
            }
        },
    );

    sandbox_globals(&lua)?;
    register_json_api(&lua)?;
    register_env_api(&lua)?;
    register_log_api(&lua, script_name)?;
    register_fs_api(&lua, sandbox_root)?;
    register_base64_api(&lua)?;
    register_crypto_api(&lua)?;
    Ok(lua)
}

fn sandbox_globals(lua: &Lua) -> LuaResult<()> {
    let globals = lua.globals();
    for name in ["os", "io", "loadfile", "dofile", "debug"] {
        globals.set(name, LuaValue::Nil)?;
    }
    Ok(())
}

/// Host function error, prefixed with the Lua-visible function name.
fn host_error(function: &str, err: impl std::fmt::Display) -> LuaError {
    LuaError::RuntimeError(format!("{}: {}", function, err))
}

fn install(lua: &Lua, module: &str, functions: Vec<(&str, LuaFunction)>) -> LuaResult<()> {
    let table = lua.create_table()?;
    for (name, function) in functions {
        table.set(name, function)?;
    }
    lua.globals().set(module, table)
}

// --- json ------------------------------------------------------------------

fn register_json_api(lua: &Lua) -> LuaResult<()> {
    let parse = lua.create_function(|lua, text: String| {
        let value: Json =
            serde_json::from_str(&text).map_err(|e| host_error("json.parse", e))?;
        json_value_to_lua(lua, &value)
    })?;
    let encode = lua.create_function(|_, value: LuaValue| {
        serde_json::to_string(&lua_value_to_json(value)?).map_err(|e| host_error("json.encode", e))
    })?;
    install(lua, "json", vec![("parse", parse), ("encode", encode)])
}

// --- env -------------------------------------------------------------------

fn register_env_api(lua: &Lua) -> LuaResult<()> {
    let get = lua.create_function(|_, name: String| Ok(std::env::var(name).ok()))?;
    install(lua, "env", vec![("get", get)])
}

// --- log -------------------------------------------------------------------

fn register_log_api(lua: &Lua, script_name: &str) -> LuaResult<()> {
    let mut functions = Vec::new();
    for level in ["debug", "info", "warn", "error"] {
        let script = script_name.to_string();
        let function = lua.create_function(move |_, msg: String| {
            match level {
                "debug" => tracing::debug!(script = %script, "{}", msg),
                "info" => tracing::info!(script = %script, "{}", msg),
                "warn" => tracing::warn!(script = %script, "{}", msg),
                _ => tracing::error!(script = %script, "{}", msg),
            }
            Ok(())
        })?;
        functions.push((level, function));
    }
    install(lua, "log", functions)
}

// --- fs (read-only, confined to the script directory) ----------------------

fn register_fs_api(lua: &Lua, sandbox_root: &Path) -> LuaResult<()> {
    let root = sandbox_root
        .canonicalize()
        .unwrap_or_else(|_| sandbox_root.to_path_buf());

    let read_root = root.clone();
    let read = lua.create_function(move |_, rel: String| {
        let target = read_root
            .join(&rel)
            .canonicalize()
            .map_err(|e| host_error("fs.read", format!("{}: {}", rel, e)))?;
        if !target.starts_with(&read_root) {
            return Err(host_error("fs.read", format!("{} is outside the rule directory", rel)));
        }
        std::fs::read_to_string(&target).map_err(|e| host_error("fs.read", format!("{}: {}", rel, e)))
    })?;

    // fs.list(glob?) -> sorted file names
    let list = lua.create_function(move |lua, pattern: Option<String>| {
        let matcher = match pattern {
            Some(p) => Some(
                Glob::new(&p)
                    .map_err(|e| host_error("fs.list", e))?
                    .compile_matcher(),
            ),
            None => None,
        };
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&root).map_err(|e| host_error("fs.list", e))?.flatten() {
            if !entry.path().is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if matcher.as_ref().map_or(true, |m| m.is_match(name)) {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        lua.create_sequence_from(names)
    })?;

    install(lua, "fs", vec![("read", read), ("list", list)])
}

// --- base64 / crypto -------------------------------------------------------

fn register_base64_api(lua: &Lua) -> LuaResult<()> {
    use base64::{engine::general_purpose::STANDARD, Engine as _};

    let encode = lua.create_function(|_, data: LuaString| Ok(STANDARD.encode(&*data.as_bytes())))?;
    let decode = lua.create_function(|lua, data: String| {
        let bytes = STANDARD.decode(data).map_err(|e| host_error("base64.decode", e))?;
        lua.create_string(bytes)
    })?;
    install(lua, "base64", vec![("encode", encode), ("decode", decode)])
}

fn register_crypto_api(lua: &Lua) -> LuaResult<()> {
    let sha256 = lua.create_function(|_, data: LuaString| Ok(hex::encode(Sha256::digest(&*data.as_bytes()))))?;
    let hmac_sha256 = lua.create_function(|_, (key, data): (LuaString, LuaString)| {
        let mut mac =
            Hmac::<Sha256>::new_from_slice(&key.as_bytes()).map_err(|e| host_error("crypto.hmac_sha256", e))?;
        mac.update(&data.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    })?;
    install(lua, "crypto", vec![("sha256", sha256), ("hmac_sha256", hmac_sha256)])
}

// --- conversions -----------------------------------------------------------

pub(crate) fn json_value_to_lua(lua: &Lua, value: &Json) -> LuaResult<LuaValue> {
    Ok(match value {
        Json::Null => LuaValue::Nil,
        Json::Bool(b) => LuaValue::Boolean(*b),
        Json::Number(n) => match n.as_i64() {
            Some(i) => LuaValue::Integer(i),
            None => LuaValue::Number(n.as_f64().unwrap_or_default()),
        },
        Json::String(s) => LuaValue::String(lua.create_string(s)?),
        Json::Array(items) => {
            let values = items
                .iter()
                .map(|item| json_value_to_lua(lua, item))
                .collect::<LuaResult<Vec<_>>>()?;
            LuaValue::Table(lua.create_sequence_from(values)?)
        }
        Json::Object(map) => {
            let table = lua.create_table_with_capacity(0, map.len())?;
            for (key, item) in map {
                table.set(key.as_str(), json_value_to_lua(lua, item)?)?;
            }
            LuaValue::Table(table)
        }
    })
}

/// Convert a Lua value to JSON. Tables with a non-zero border become
/// arrays; everything else with string keys becomes an object.
pub(crate) fn lua_value_to_json(value: LuaValue) -> LuaResult<Json> {
    Ok(match value {
        LuaValue::Boolean(b) => Json::Bool(b),
        LuaValue::Integer(i) => Json::from(i),
        LuaValue::Number(n) => serde_json::Number::from_f64(n).map_or(Json::Null, Json::Number),
        LuaValue::String(s) => Json::String(s.to_str()?.to_string()),
        LuaValue::Table(table) if table.raw_len() > 0 => Json::Array(
            table
                .sequence_values::<LuaValue>()
                .map(|item| item.and_then(lua_value_to_json))
                .collect::<LuaResult<Vec<_>>>()?,
        ),
        LuaValue::Table(table) => {
            let mut map = serde_json::Map::new();
            for pair in table.pairs::<String, LuaValue>() {
                let (key, item) = pair?;
                map.insert(key, lua_value_to_json(item)?);
            }
            Json::Object(map)
        }
        // nil, functions, and userdata are script internals
        _ => Json::Null,
    })
}
