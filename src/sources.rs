use anyhow::Result;

use crate::adapter::SourceAdapter;
use crate::config::Config;
use crate::models::SourceFormat;

/// One row of `sitecat sources`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceStatus {
    pub format: SourceFormat,
    pub enabled: bool,
    pub location: String,
    /// Plugin files that would be built, or snapshot presence for linked.
    pub available: usize,
}

/// Inspect every source format without evaluating any plugin.
pub fn source_statuses(config: &Config) -> Result<Vec<SourceStatus>> {
    let mut rows = Vec::new();
    for format in SourceFormat::PRECEDENCE {
        let enabled = config.is_enabled(format);
        let row = match config.source_dir(format) {
            Some(dir) => SourceStatus {
                format,
                enabled,
                location: dir.display().to_string(),
                available: SourceAdapter::for_format(format).enumerate(config)?.len(),
            },
            None => SourceStatus {
                format,
                enabled,
                location: config.paths.link_snapshot.display().to_string(),
                available: usize::from(config.paths.link_snapshot.is_file()),
            },
        };
        rows.push(row);
    }
    Ok(rows)
}

pub fn list_sources(config: &Config) -> Result<()> {
    let rows = source_statuses(config)?;

    println!("{:<12} {:<9} {:<7} LOCATION", "SOURCE", "ENABLED", "FILES");
    for row in rows {
        println!(
            "{:<12} {:<9} {:<7} {}",
            row.format, row.enabled, row.available, row.location
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn counts_buildable_files_per_format() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        fs::create_dir_all(root.join("native")).unwrap();
        fs::write(root.join("native/a.lua"), "").unwrap();
        fs::write(root.join("native/b.lua"), "").unwrap();
        fs::write(root.join("native/_private.lua"), "").unwrap();
        fs::write(root.join("native/notes.txt"), "").unwrap();

        let body = format!(
            r#"
[paths]
native_dir = "{r}/native"
legacy_dir = "{r}/legacy"
secondary_dir = "{r}/py"
parse_dir = "{r}/parse"
config_dir = "{r}/config"
subscription_file = "{r}/config/sub.json"
link_snapshot = "{r}/link.json"

[cache]
path = "{r}/h.sqlite"

[features]
legacy = false
"#,
            r = root.display()
        );
        let config: Config = toml::from_str(&body).unwrap();

        let rows = source_statuses(&config).unwrap();
        assert_eq!(rows.len(), 4);
        assert_eq!(rows[0].format, SourceFormat::Native);
        assert_eq!(rows[0].available, 2);
        assert!(!rows[1].enabled);
        assert_eq!(rows[2].available, 0);
        assert_eq!(rows[3].format, SourceFormat::Linked);
        assert!(!rows[3].enabled);
        assert_eq!(rows[3].available, 0);
    }
}
