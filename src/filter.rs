//! Subscription and content-policy predicates.
//!
//! The same [`NameFilter`] runs twice per build: over raw plugin file names
//! before anything is extracted, and over final display names after merge,
//! which catches alias-generated names that did not exist beforehand.

use regex::Regex;

use crate::error::CatalogError;
use crate::models::{FilterMode, PluginFile, SiteEntry, Subscription};

/// Marks restricted content in file and display names.
pub const RESTRICTED_PATTERN: &str = r"\[[密]\]|密+";

#[derive(Debug, Clone, Default)]
pub struct NameFilter {
    subscription: Option<(FilterMode, Regex)>,
    restricted: Option<Regex>,
}

impl NameFilter {
    /// Build the filter for one request.
    ///
    /// A subscription with an unknown mode contributes nothing.
    pub fn new(subscription: Option<&Subscription>, hide_restricted: bool) -> Result<Self, CatalogError> {
        let subscription = match subscription {
            Some(sub) => match sub.filter_mode() {
                Some(mode) => Some((mode, compile(sub.pattern())?)),
                None => None,
            },
            None => None,
        };
        let restricted = if hide_restricted {
            Some(compile(RESTRICTED_PATTERN)?)
        } else {
            None
        };
        Ok(Self {
            subscription,
            restricted,
        })
    }

    pub fn is_noop(&self) -> bool {
        self.subscription.is_none() && self.restricted.is_none()
    }

    pub fn allows(&self, name: &str) -> bool {
        if let Some((mode, pattern)) = &self.subscription {
            let matched = pattern.is_match(name);
            let keep = match mode {
                FilterMode::Include => matched,
                FilterMode::Exclude => !matched,
            };
            if !keep {
                return false;
            }
        }
        match &self.restricted {
            Some(pattern) => !pattern.is_match(name),
            None => true,
        }
    }

    /// Pre-extraction pass, by file name including the extension.
    pub fn retain_files(&self, files: &mut Vec<PluginFile>) {
        if !self.is_noop() {
            files.retain(|f| self.allows(&f.file_name));
        }
    }

    /// Post-merge pass, by display name.
    pub fn retain_entries(&self, entries: &mut Vec<SiteEntry>) {
        if !self.is_noop() {
            entries.retain(|e| self.allows(&e.name));
        }
    }
}

fn compile(pattern: &str) -> Result<Regex, CatalogError> {
    Regex::new(pattern).map_err(|source| CatalogError::InvalidPattern {
        pattern: pattern.to_string(),
        source,
    })
}
