//! TOML configuration parsing and validation.
//!
//! The loaded [`Config`] is immutable: every feature toggle the pipeline
//! consults lives here and is threaded through each call by reference.
//! Per-request values (host, password, subscription) travel separately in
//! [`crate::aggregate::BuildRequest`].

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::models::SourceFormat;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub paths: PathsConfig,
    #[serde(default)]
    pub sources: SourcesConfig,
    #[serde(default)]
    pub features: FeatureToggles,
    #[serde(default)]
    pub link: LinkConfig,
    pub cache: CacheConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub batch: BatchConfig,
    #[serde(default)]
    pub lives: LivesConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PathsConfig {
    pub native_dir: PathBuf,
    pub legacy_dir: PathBuf,
    pub secondary_dir: PathBuf,
    pub parse_dir: PathBuf,
    /// Holds `alias_map.json`, `player.json`, and `parses.json`.
    pub config_dir: PathBuf,
    pub subscription_file: PathBuf,
    pub link_snapshot: PathBuf,
    #[serde(default)]
    pub index_file: Option<PathBuf>,
    /// Holds `App模板配置.json`. Defaults to `config_dir`.
    #[serde(default)]
    pub json_dir: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SourcesConfig {
    #[serde(default = "default_script_ext")]
    pub native_ext: String,
    #[serde(default = "default_script_ext")]
    pub legacy_ext: String,
    #[serde(default = "default_secondary_ext")]
    pub secondary_ext: String,
    /// Files whose name starts with this marker are private and skipped.
    #[serde(default = "default_disabled_marker")]
    pub disabled_marker: String,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            native_ext: default_script_ext(),
            legacy_ext: default_script_ext(),
            secondary_ext: default_secondary_ext(),
            disabled_marker: default_disabled_marker(),
        }
    }
}

fn default_script_ext() -> String {
    "lua".to_string()
}
fn default_secondary_ext() -> String {
    "py".to_string()
}
fn default_disabled_marker() -> String {
    "_".to_string()
}

/// Process-wide switches, read once per request.
#[derive(Debug, Deserialize, Clone)]
pub struct FeatureToggles {
    #[serde(default = "default_true")]
    pub native: bool,
    #[serde(default = "default_true")]
    pub legacy: bool,
    #[serde(default = "default_true")]
    pub secondary: bool,
    /// Drop every file and entry matching the restricted-content marker.
    #[serde(default)]
    pub hide_restricted: bool,
    /// Ignore cached headers and re-extract every plugin.
    #[serde(default)]
    pub force_refresh: bool,
    /// Use extracted titles instead of file base names for display.
    #[serde(default)]
    pub friendly_names: bool,
    /// Gzip and base64 the `ext` of native alias entries.
    #[serde(default = "default_true")]
    pub compress_ext: bool,
    /// Point legacy entries at the client's bundled runtime.
    #[serde(default)]
    pub legacy_builtin_api: bool,
}

impl Default for FeatureToggles {
    fn default() -> Self {
        Self {
            native: true,
            legacy: true,
            secondary: true,
            hide_restricted: false,
            force_refresh: false,
            friendly_names: false,
            compress_ext: true,
            legacy_builtin_api: false,
        }
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct LinkConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Base URL that relative `api`, `ext`, and spider paths are joined onto.
    #[serde(default)]
    pub url: String,
    /// Let a linked `push_agent` entry replace the local one.
    #[serde(default)]
    pub push_override: bool,
    /// Take the spider reference from the snapshot.
    #[serde(default)]
    pub mount_jar: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Host advertised in generated URLs when the request carries none.
    #[serde(default)]
    pub public_host: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            public_host: None,
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:5757".to_string()
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct BatchConfig {
    /// Upper bound on in-flight tasks per batch. Unbounded when unset.
    #[serde(default)]
    pub max_concurrency: Option<usize>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct LivesConfig {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub epg: String,
    #[serde(default)]
    pub logo: String,
}

impl Config {
    /// Whether the given source format takes part in builds.
    pub fn is_enabled(&self, format: SourceFormat) -> bool {
        match format {
            SourceFormat::Native => self.features.native,
            SourceFormat::Legacy => self.features.legacy,
            SourceFormat::Secondary => self.features.secondary,
            SourceFormat::Linked => self.link.enabled,
        }
    }

    /// Directory scanned for a scripted format. `None` for linked.
    pub fn source_dir(&self, format: SourceFormat) -> Option<&Path> {
        match format {
            SourceFormat::Native => Some(&self.paths.native_dir),
            SourceFormat::Legacy => Some(&self.paths.legacy_dir),
            SourceFormat::Secondary => Some(&self.paths.secondary_dir),
            SourceFormat::Linked => None,
        }
    }

    /// File extension (without the dot) of a scripted format.
    pub fn source_ext(&self, format: SourceFormat) -> Option<&str> {
        match format {
            SourceFormat::Native => Some(&self.sources.native_ext),
            SourceFormat::Legacy => Some(&self.sources.legacy_ext),
            SourceFormat::Secondary => Some(&self.sources.secondary_ext),
            SourceFormat::Linked => None,
        }
    }

    /// Directory holding the app-template config.
    pub fn json_dir(&self) -> &Path {
        self.paths.json_dir.as_deref().unwrap_or(&self.paths.config_dir)
    }

    /// Host used for generated URLs when a request does not supply one.
    pub fn default_host(&self) -> String {
        match &self.server.public_host {
            Some(host) => host.trim_end_matches('/').to_string(),
            None => format!("http://{}", self.server.bind),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    for (name, ext) in [
        ("sources.native_ext", &config.sources.native_ext),
        ("sources.legacy_ext", &config.sources.legacy_ext),
        ("sources.secondary_ext", &config.sources.secondary_ext),
    ] {
        if ext.is_empty() || ext.starts_with('.') {
            anyhow::bail!("{} must be a bare extension like \"lua\", got {:?}", name, ext);
        }
    }

    if config.sources.disabled_marker.is_empty() {
        anyhow::bail!("sources.disabled_marker must not be empty");
    }

    if config.batch.max_concurrency == Some(0) {
        anyhow::bail!("batch.max_concurrency must be >= 1");
    }

    if config.link.enabled && config.link.url.is_empty() {
        anyhow::bail!("link.url must be set when link.enabled = true");
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const MINIMAL: &str = r#"
[paths]
native_dir = "rules/native"
legacy_dir = "rules/legacy"
secondary_dir = "rules/py"
parse_dir = "rules/parse"
config_dir = "config"
subscription_file = "config/sub/sub.json"
link_snapshot = "data/link_data.json"

[cache]
path = "data/headers.sqlite"
"#;

    fn write_config(body: &str) -> (TempDir, PathBuf) {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("sitecat.toml");
        fs::write(&path, body).unwrap();
        (tmp, path)
    }

    #[test]
    fn minimal_config_applies_defaults() {
        let (_tmp, path) = write_config(MINIMAL);
        let config = load_config(&path).unwrap();
        assert!(config.features.native && config.features.legacy && config.features.secondary);
        assert!(!config.features.hide_restricted);
        assert!(config.features.compress_ext);
        assert!(!config.link.enabled);
        assert_eq!(config.sources.native_ext, "lua");
        assert_eq!(config.sources.secondary_ext, "py");
        assert_eq!(config.default_host(), "http://127.0.0.1:5757");
    }

    #[test]
    fn json_dir_falls_back_to_config_dir() {
        let (_tmp, path) = write_config(MINIMAL);
        let mut config = load_config(&path).unwrap();
        assert_eq!(config.json_dir(), Path::new("config"));
        config.paths.json_dir = Some(PathBuf::from("json"));
        assert_eq!(config.json_dir(), Path::new("json"));
    }

    #[test]
    fn link_requires_base_url() {
        let body = format!("{}\n[link]\nenabled = true\n", MINIMAL);
        let (_tmp, path) = write_config(&body);
        let err = load_config(&path).unwrap_err();
        assert!(err.to_string().contains("link.url"));
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let body = format!("{}\n[batch]\nmax_concurrency = 0\n", MINIMAL);
        let (_tmp, path) = write_config(&body);
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn dotted_extension_is_rejected() {
        let body = format!("{}\n[sources]\nnative_ext = \".js\"\n", MINIMAL);
        let (_tmp, path) = write_config(&body);
        let err = load_config(&path).unwrap_err();
        assert!(err.to_string().contains("native_ext"));
    }

    #[test]
    fn example_config_loads() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("config/sitecat.example.toml");
        let config = load_config(&path).unwrap();
        assert!(!config.link.enabled);
        assert_eq!(config.paths.index_file.as_deref(), Some(Path::new("data/index.json")));
    }
}
