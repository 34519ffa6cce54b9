//! Source adapters: one variant per plugin format.
//!
//! Every scripted format goes through the same three steps:
//!
//! 1. [`SourceAdapter::enumerate`] lists candidate files in the format's
//!    directory (matching extension, no disabled marker).
//! 2. [`SourceAdapter::resolve_metadata`] returns the cached header, or
//!    extracts a fresh one and caches it.
//! 3. [`SourceAdapter::build_entries`] turns the header into one or more
//!    catalog entries, applying the singleton and alias rules.
//!
//! The linked format has no plugin files. It contributes through
//! [`crate::linked`] after every scripted format has been collected.

use anyhow::{Context, Result};
use serde_json::{Map, Value};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::aggregate::BuildRequest;
use crate::alias::{native_alias_ext, update_query_string};
use crate::config::Config;
use crate::header_cache::{file_size, fingerprint_file};
use crate::interpreter::scan_secondary_title;
use crate::models::{AliasMap, Metadata, PluginFile, SiteEntry, SourceFormat, PUSH_AGENT_KEY};
use crate::traits::{HeaderStore, RuleInterpreter};

/// Everything an adapter task needs, cheaply cloneable into spawned tasks.
#[derive(Clone)]
pub struct AdapterContext {
    pub config: Arc<Config>,
    pub request: Arc<BuildRequest>,
    pub interpreter: Arc<dyn RuleInterpreter>,
    pub store: Arc<dyn HeaderStore>,
    pub aliases: Arc<AliasMap>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceAdapter {
    Native,
    Legacy,
    Secondary,
    Linked,
}

impl SourceAdapter {
    pub fn for_format(format: SourceFormat) -> Self {
        match format {
            SourceFormat::Native => SourceAdapter::Native,
            SourceFormat::Legacy => SourceAdapter::Legacy,
            SourceFormat::Secondary => SourceAdapter::Secondary,
            SourceFormat::Linked => SourceAdapter::Linked,
        }
    }

    pub fn format(self) -> SourceFormat {
        match self {
            SourceAdapter::Native => SourceFormat::Native,
            SourceAdapter::Legacy => SourceFormat::Legacy,
            SourceAdapter::Secondary => SourceFormat::Secondary,
            SourceAdapter::Linked => SourceFormat::Linked,
        }
    }

    /// Suffix appended to display names, and the key prefix.
    fn naming(self) -> (&'static str, &'static str) {
        match self {
            SourceAdapter::Native => ("drpyS_", "(DS)"),
            SourceAdapter::Legacy => ("drpy2_", "(DR2)"),
            SourceAdapter::Secondary => ("hipy_py_", "(hipy)"),
            SourceAdapter::Linked => ("", ""),
        }
    }

    /// List the plugin files of this format, sorted by file name.
    ///
    /// A missing directory yields no files. Linked sources never have any.
    pub fn enumerate(self, config: &Config) -> Result<Vec<PluginFile>> {
        let format = self.format();
        let (Some(dir), Some(ext)) = (config.source_dir(format), config.source_ext(format)) else {
            return Ok(Vec::new());
        };
        list_plugin_files(dir, ext, &config.sources.disabled_marker, format)
    }

    /// Extract a canonical header from the plugin itself, bypassing the cache.
    ///
    /// Scripted rules go through the interpreter; secondary rules are
    /// scanned. Either way the result carries the format's default flags
    /// underneath whatever the plugin declared, plus its language tag.
    pub async fn extract_metadata(self, file: &PluginFile, interpreter: &dyn RuleInterpreter) -> Result<Metadata> {
        let format = self.format();
        let mut meta = Metadata::defaults_for(format);

        match self {
            SourceAdapter::Native | SourceAdapter::Legacy => {
                let declared = interpreter.extract_metadata(file).await?;
                meta.title = declared.title;
                meta.searchable = declared.searchable;
                meta.filterable = declared.filterable;
                meta.quick_search = declared.quick_search;
                meta.more = declared.more;
                meta.logo = declared.logo;
            }
            SourceAdapter::Secondary => {
                let source = tokio::fs::read_to_string(&file.path)
                    .await
                    .with_context(|| format!("Failed to read {}", file.path.display()))?;
                meta.title = scan_secondary_title(&source).unwrap_or_else(|| file.base_name.clone());
            }
            SourceAdapter::Linked => anyhow::bail!("linked sources have no plugin files"),
        }

        meta.lang = format.lang().to_string();
        Ok(meta)
    }

    /// Cached header if present (and refresh is not forced), else a fresh
    /// extraction written back to the cache.
    ///
    /// The fingerprint is taken before extracting, so a file edited while
    /// it is being evaluated caches under its old contents and is picked up
    /// again by the next build.
    pub async fn resolve_metadata(self, file: &PluginFile, ctx: &AdapterContext) -> Result<Metadata> {
        let fingerprint = fingerprint_file(&file.path).await?;
        if !ctx.config.features.force_refresh {
            if let Some(cached) = ctx.store.read_header(&file.path, &fingerprint).await {
                return Ok(cached);
            }
        }

        if let Ok(size) = file_size(&file.path, true).await {
            debug!("Loading rule {} fileSize:{}", file.path.display(), size);
        }

        let meta = self.extract_metadata(file, ctx.interpreter.as_ref()).await?;
        if let Err(e) = ctx.store.write_header(&file.path, &fingerprint, &meta).await {
            warn!("Could not cache header for {}: {:#}", file.path.display(), e);
        }
        Ok(meta)
    }

    /// Build the catalog entries for one plugin.
    ///
    /// In order: the reserved singleton gets exactly one fixed entry; an
    /// aliased plugin gets one entry per alias; anything else gets one
    /// default entry named after its display title.
    pub fn build_entries(
        self,
        file: &PluginFile,
        meta: &Metadata,
        aliases: &AliasMap,
        config: &Config,
        request: &BuildRequest,
    ) -> Result<Vec<SiteEntry>> {
        let format = self.format();
        let (key_prefix, name_suffix) = self.naming();

        let mut meta = meta.clone();
        meta.title = display_title(&meta, file, config.features.friendly_names);

        let host = request.host.as_str();
        let pwd = request.pwd_query();
        let (api, ext) = match self {
            SourceAdapter::Native => (format!("{}/api/{}{}", host, file.base_name, pwd), String::new()),
            SourceAdapter::Legacy => {
                let api = if config.features.legacy_builtin_api {
                    "assets://js/lib/drpy2.js".to_string()
                } else {
                    format!("{}/public/drpy/drpy2.min.js", host)
                };
                (api, format!("{}/js/{}{}", host, file.file_name, pwd))
            }
            SourceAdapter::Secondary => {
                let url = format!("{}/py/{}{}", host, file.file_name, pwd);
                let ext = if has_sibling_json(&file.path) { url.clone() } else { String::new() };
                (url, ext)
            }
            SourceAdapter::Linked => anyhow::bail!("linked sources have no plugin files"),
        };

        let entry = |key: String, name: String, ext: String| SiteEntry {
            key,
            name,
            site_type: format.site_type(),
            api: api.clone(),
            meta: meta.clone(),
            ext: Value::String(ext),
            extra: Map::new(),
        };

        if file.base_name == PUSH_AGENT_KEY {
            let name = format!("{}{}", meta.title, name_suffix);
            return Ok(vec![entry(PUSH_AGENT_KEY.to_string(), name, ext)]);
        }

        if let Some(targets) = aliases.get(&file.base_name) {
            let mut entries = Vec::with_capacity(targets.len());
            for target in targets {
                let alias_ext = match self {
                    SourceAdapter::Native => native_alias_ext(target, config.features.compress_ext)?,
                    _ => update_query_string(&ext, target.query_str.as_deref()),
                };
                entries.push(entry(
                    format!("{}{}", key_prefix, target.alias),
                    format!("{}{}", target.alias, name_suffix),
                    alias_ext,
                ));
            }
            return Ok(entries);
        }

        Ok(vec![entry(
            format!("{}{}", key_prefix, meta.title),
            format!("{}{}", meta.title, name_suffix),
            ext,
        )])
    }

    /// Resolve the header and build entries: the per-file unit of work.
    pub async fn process(self, file: PluginFile, ctx: AdapterContext) -> Result<Vec<SiteEntry>> {
        let meta = self
            .resolve_metadata(&file, &ctx)
            .await
            .with_context(|| format!("Error parsing rule object for file: {}", file.file_name))?;
        self.build_entries(&file, &meta, &ctx.aliases, &ctx.config, &ctx.request)
    }
}

/// List `*.{ext}` files in `dir` that do not start with `marker`, sorted
/// by file name. A missing directory yields nothing.
pub(crate) fn list_plugin_files(
    dir: &Path,
    ext: &str,
    marker: &str,
    format: SourceFormat,
) -> Result<Vec<PluginFile>> {
    if !dir.is_dir() {
        warn!("Source directory for {} does not exist: {}", format, dir.display());
        return Ok(Vec::new());
    }

    let suffix = format!(".{}", ext);
    let mut files = Vec::new();
    let walker = WalkDir::new(dir).min_depth(1).max_depth(1).follow_links(true);
    for entry in walker {
        let entry = entry.with_context(|| format!("Failed to list {}", dir.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Some(file_name) = entry.file_name().to_str().map(str::to_string) else {
            continue;
        };
        if !file_name.ends_with(&suffix) || file_name.starts_with(marker) {
            continue;
        }
        let base_name = file_name[..file_name.len() - suffix.len()].to_string();
        if base_name.is_empty() {
            continue;
        }
        files.push(PluginFile {
            path: entry.path().to_path_buf(),
            format,
            file_name,
            base_name,
        });
    }

    files.sort_by(|a, b| a.file_name.cmp(&b.file_name));
    Ok(files)
}

/// Extracted title when friendly names are on (falling back to the base
/// name), else always the base name.
fn display_title(meta: &Metadata, file: &PluginFile, friendly_names: bool) -> String {
    if friendly_names && !meta.title.is_empty() {
        meta.title.clone()
    } else {
        file.base_name.clone()
    }
}

fn has_sibling_json(path: &Path) -> bool {
    path.with_extension("json").is_file()
}
