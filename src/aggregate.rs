//! Aggregator: collects every enabled source into one ordered catalog.
//!
//! # Pipeline
//!
//! ```text
//! for format in [native, legacy, secondary]:
//!     enumerate → filter file names
//!     (native only) seed app-template sites
//!     run_batch(resolve + build) → append
//! linked snapshot → append (push_agent may replace in place)
//! filter display names → pinned natural sort
//! ```
//!
//! Per-file failures are logged, recorded in [`MergedCatalog::failures`],
//! and otherwise ignored. The only request-level failures are a disabled
//! subscription, a bad filter pattern, and I/O errors listing a directory.

use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::info;

use crate::adapter::{AdapterContext, SourceAdapter};
use crate::alias::load_alias_map;
use crate::app_template::template_sites;
use crate::batch::{partition_outcomes, run_batch, Task, TaskFailure};
use crate::config::Config;
use crate::error::CatalogError;
use crate::filter::NameFilter;
use crate::linked::merge_linked;
use crate::models::{LiveSource, ParseDescriptor, SiteEntry, SourceFormat, Subscription};
use crate::parses::{build_lives, build_parses, load_player};
use crate::sort::pinned_sort;
use crate::subscription::{load_pinned_order, resolve_subscription};
use crate::traits::{HeaderStore, RuleInterpreter};

/// Per-request values. Everything process-wide lives in [`Config`].
#[derive(Debug, Clone, Default)]
pub struct BuildRequest {
    /// Scheme and authority used in generated URLs, without a trailing slash.
    pub host: String,
    pub pwd: Option<String>,
    pub subscription: Option<Subscription>,
    /// Names that sort ahead of everything else, in this order.
    pub pinned: Vec<String>,
}

impl BuildRequest {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into().trim_end_matches('/').to_string(),
            ..Default::default()
        }
    }

    pub fn with_pwd(mut self, pwd: Option<String>) -> Self {
        self.pwd = pwd.filter(|p| !p.is_empty());
        self
    }

    /// Resolve a subscription code and load its pinned order.
    ///
    /// # Errors
    ///
    /// [`CatalogError::SubscriptionDisabled`] when the code exists but is off.
    pub async fn with_subscription(mut self, config: &Config, code: Option<&str>) -> Result<Self, CatalogError> {
        let Some(code) = code.filter(|c| !c.is_empty()) else {
            return Ok(self);
        };
        if let Some(sub) = resolve_subscription(&config.paths.subscription_file, code).await? {
            self.pinned = load_pinned_order(&config.paths.subscription_file, &sub).await;
            self.subscription = Some(sub);
        }
        Ok(self)
    }

    /// `?pwd=...` when a password is set, else empty.
    pub fn pwd_query(&self) -> String {
        match &self.pwd {
            Some(pwd) => format!("?pwd={}", pwd),
            None => String::new(),
        }
    }
}

/// The merged, filtered, and sorted site list of one build.
#[derive(Debug, Default)]
pub struct MergedCatalog {
    pub sites: Vec<SiteEntry>,
    /// Spider reference mounted from the linked snapshot, if any.
    pub spider: Option<String>,
    pub failures: Vec<TaskFailure>,
}

/// Everything the projections are derived from.
#[derive(Debug, Default)]
pub struct CatalogBuild {
    pub host: String,
    pub merged: MergedCatalog,
    pub parses: Vec<ParseDescriptor>,
    pub lives: Vec<LiveSource>,
    /// Player overlay fields, merged into the primary document.
    pub player: Map<String, Value>,
}

impl CatalogBuild {
    /// Merge spider, else the player overlay's.
    pub fn spider(&self) -> Option<String> {
        self.merged
            .spider
            .clone()
            .filter(|s| !s.is_empty())
            .or_else(|| {
                self.player
                    .get("spider")
                    .and_then(Value::as_str)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
            })
    }
}

/// Builds catalogs from the configured sources.
///
/// Cheap to clone; one builder serves any number of concurrent requests.
#[derive(Clone)]
pub struct CatalogBuilder {
    config: Arc<Config>,
    interpreter: Arc<dyn RuleInterpreter>,
    store: Arc<dyn HeaderStore>,
}

impl CatalogBuilder {
    pub fn new(config: Arc<Config>, interpreter: Arc<dyn RuleInterpreter>, store: Arc<dyn HeaderStore>) -> Self {
        Self {
            config,
            interpreter,
            store,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Collect every enabled source, then filter and sort.
    pub async fn merge_sites(&self, request: &BuildRequest) -> Result<MergedCatalog, CatalogError> {
        let config = &self.config;
        let filter = NameFilter::new(request.subscription.as_ref(), config.features.hide_restricted)?;

        let ctx = AdapterContext {
            config: self.config.clone(),
            request: Arc::new(request.clone()),
            interpreter: self.interpreter.clone(),
            store: self.store.clone(),
            aliases: Arc::new(load_alias_map(&config.paths.config_dir).await),
        };

        let mut merged = MergedCatalog::default();

        for format in SourceFormat::PRECEDENCE {
            if !config.is_enabled(format) {
                continue;
            }
            let adapter = SourceAdapter::for_format(format);

            if adapter == SourceAdapter::Linked {
                info!("Mounting linked catalog from {}", config.paths.link_snapshot.display());
                merged.spider = merge_linked(&mut merged.sites, config).await;
                continue;
            }

            let mut files = adapter.enumerate(config)?;
            filter.retain_files(&mut files);
            info!("Building {} entries from {} files", format, files.len());

            if adapter == SourceAdapter::Native {
                merged.sites.extend(template_sites(config.json_dir(), &files, request).await);
            }

            let tasks: Vec<Task<Vec<SiteEntry>>> = files
                .into_iter()
                .map(|file| {
                    let id = format!("{}/{}", format, file.file_name);
                    Task::new(id, adapter.process(file, ctx.clone()))
                })
                .collect();

            let outcomes = run_batch(tasks, config.batch.max_concurrency).await;
            let (entries, failures) = partition_outcomes(outcomes);
            merged.sites.extend(entries.into_iter().flatten());
            merged.failures.extend(failures);
        }

        filter.retain_entries(&mut merged.sites);
        merged.sites = pinned_sort(merged.sites, |s| s.name.as_str(), &request.pinned);

        info!(
            "Catalog merged: {} sites, {} failed files",
            merged.sites.len(),
            merged.failures.len()
        );
        Ok(merged)
    }

    /// Sites plus parses, lives, and the player overlay.
    pub async fn build(&self, request: &BuildRequest) -> Result<CatalogBuild, CatalogError> {
        let merged = self.merge_sites(request).await?;
        let (parses, parse_failures) = build_parses(&self.config, self.interpreter.clone(), &request.host).await?;

        let mut build = CatalogBuild {
            host: request.host.clone(),
            merged,
            parses,
            lives: build_lives(&self.config.lives, &request.host),
            player: load_player(&self.config.paths.config_dir).await,
        };
        build.merged.failures.extend(parse_failures);
        Ok(build)
    }
}
