//! Catalog projections: the primary document and the compact one.
//!
//! Both are pure functions of a [`CatalogBuild`] and never re-run a source.
//! [`write_json`] persists either one.

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::path::Path;

use crate::aggregate::CatalogBuild;
use crate::models::{ParseDescriptor, SiteEntry, SourceFormat};

/// Entries whose name carries this marker are books, which compact
/// clients cannot play.
pub const BOOK_MARKER: &str = "[书]";
/// Entries whose name carries this marker are official sources.
pub const OFFICIAL_MARKER: &str = "[官]";

/// Site `type` in the compact schema.
const COMPACT_SITE_TYPE: u8 = 5;

/// `{sites_count, ...player, sites, spider?, parses, lives}`.
///
/// Player overlay fields are merged in first, so the catalog's own fields
/// always win over a same-named overlay field.
pub fn primary_document(build: &CatalogBuild) -> serde_json::Result<Value> {
    let mut doc = Map::new();
    doc.insert("sites_count".into(), Value::from(build.merged.sites.len()));
    for (key, value) in &build.player {
        if key != "sites_count" {
            doc.insert(key.clone(), value.clone());
        }
    }
    doc.insert("sites".into(), serde_json::to_value(&build.merged.sites)?);
    match build.spider() {
        Some(spider) => {
            doc.insert("spider".into(), Value::String(spider));
        }
        None => {
            doc.remove("spider");
        }
    }
    doc.insert("parses".into(), serde_json::to_value(&build.parses)?);
    doc.insert("lives".into(), serde_json::to_value(&build.lives)?);
    Ok(Value::Object(doc))
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompactSite {
    pub key: String,
    pub name: String,
    #[serde(rename = "type")]
    pub site_type: u8,
    pub searchable: u8,
    pub filter_class: String,
    pub first_class: String,
    pub filter_play: String,
    pub first_play: String,
    pub ext: String,
    pub flagable: u8,
    pub filter_play_file_keywords: String,
    pub keep_play_file_keywords: String,
    pub web_site: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompactParseExt {
    pub flag: Vec<String>,
    pub header: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompactParse {
    pub name: String,
    #[serde(rename = "type")]
    pub parse_type: u8,
    pub url: String,
    pub ext: CompactParseExt,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompactCatalog {
    pub sites: Vec<CompactSite>,
    pub parses: Vec<CompactParse>,
    pub flags: Vec<String>,
}

/// One-way key used by compact clients.
pub fn compact_key(key: &str) -> String {
    hex::encode(Sha256::digest(key.as_bytes()))
}

fn compact_site(site: &SiteEntry, host: &str) -> CompactSite {
    CompactSite {
        key: compact_key(&site.key),
        name: site.name.clone(),
        site_type: COMPACT_SITE_TYPE,
        searchable: u8::from(matches!(site.meta.searchable, 1 | 2)),
        filter_class: String::new(),
        first_class: String::new(),
        filter_play: String::new(),
        first_play: String::new(),
        ext: format!("{}/tbox/tbox.js", host),
        flagable: u8::from(site.name.contains(OFFICIAL_MARKER)),
        filter_play_file_keywords: String::new(),
        keep_play_file_keywords: String::new(),
        web_site: site.api.clone(),
    }
}

fn compact_parse(parse: &ParseDescriptor) -> CompactParse {
    let mut flag = parse.flags();
    if flag.is_empty() {
        flag.push(parse.name.clone());
    }
    let header = match &parse.header {
        Value::Null => Value::Object(Map::new()),
        other => other.clone(),
    };
    CompactParse {
        name: parse.name.clone(),
        parse_type: u8::from(parse.parse_type >= 1),
        url: parse.url.clone(),
        ext: CompactParseExt { flag, header },
    }
}

/// Derive the compact document.
///
/// Only native-type entries survive, minus books. `flags` collects every
/// parse's flag list in first-seen order without duplicates.
pub fn compact_document(build: &CatalogBuild) -> CompactCatalog {
    let native_type = SourceFormat::Native.site_type();
    let sites = build
        .merged
        .sites
        .iter()
        .filter(|s| s.site_type == native_type && !s.name.contains(BOOK_MARKER))
        .map(|s| compact_site(s, &build.host))
        .collect();

    let parses: Vec<CompactParse> = build.parses.iter().map(compact_parse).collect();

    let mut flags: Vec<String> = Vec::new();
    for flag in parses.iter().flat_map(|p| p.ext.flag.iter()) {
        if !flags.contains(flag) {
            flags.push(flag.clone());
        }
    }

    CompactCatalog { sites, parses, flags }
}

/// Write a document as pretty JSON, creating parent directories.
pub async fn write_json<T: Serialize>(path: &Path, document: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    let body = serde_json::to_string_pretty(document)?;
    tokio::fs::write(path, body)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))
}
