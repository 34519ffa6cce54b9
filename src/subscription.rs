//! Subscription lookup and pinned order files.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::error::CatalogError;
use crate::models::Subscription;

const DEFAULT_ORDER: &str = "order_common";

/// Read the subscription list. Unreadable or malformed files yield none.
pub async fn load_subscriptions(path: &Path) -> Vec<Subscription> {
    match read_subscriptions(path).await {
        Ok(subs) => subs,
        Err(e) => {
            warn!("Failed to read subscriptions: {:#}", e);
            Vec::new()
        }
    }
}

async fn read_subscriptions(path: &Path) -> Result<Vec<Subscription>> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
}

/// Look up `code`.
///
/// An unknown code means no subscription at all, so nothing is filtered.
/// A known but disabled code fails the whole request.
pub async fn resolve_subscription(path: &Path, code: &str) -> Result<Option<Subscription>, CatalogError> {
    let Some(sub) = load_subscriptions(path).await.into_iter().find(|s| s.code == code) else {
        info!("Unknown subscription code [{}], serving unfiltered", code);
        return Ok(None);
    };
    if !sub.is_enabled() {
        return Err(CatalogError::SubscriptionDisabled {
            code: code.to_string(),
        });
    }
    Ok(Some(sub))
}

/// Order file for `sub`: `{sort}.html` next to the subscription file, or
/// its `.example.html` variant. `sort` defaults to `order_common`.
pub async fn order_file(subscription_file: &Path, sub: &Subscription) -> Option<PathBuf> {
    let dir = subscription_file.parent().unwrap_or(Path::new("."));
    let name = sub
        .sort
        .as_deref()
        .filter(|s| !s.is_empty())
        .unwrap_or(DEFAULT_ORDER);
    for file in [format!("{}.html", name), format!("{}.example.html", name)] {
        let path = dir.join(file);
        if tokio::fs::metadata(&path).await.is_ok_and(|m| m.is_file()) {
            return Some(path);
        }
    }
    None
}

/// Pinned names for `sub`, one per non-blank line of its order file.
pub async fn load_pinned_order(subscription_file: &Path, sub: &Subscription) -> Vec<String> {
    let Some(path) = order_file(subscription_file, sub).await else {
        return Vec::new();
    };
    info!("sort_file: {}", path.display());
    match tokio::fs::read_to_string(&path).await {
        Ok(content) => content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect(),
        Err(e) => {
            warn!("Failed to read order file {}: {}", path.display(), e);
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const SUBS: &str = r#"[
        {"code": "all", "name": "Everything", "status": 1, "mode": 0, "reg": ".*"},
        {"code": "vip", "status": 1, "mode": 1, "reg": "密", "sort": "vip_order"},
        {"code": "off", "status": 0, "mode": 0, "reg": ".*"}
    ]"#;

    fn setup() -> (TempDir, PathBuf) {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("sub.json");
        fs::write(&path, SUBS).unwrap();
        (tmp, path)
    }

    #[tokio::test]
    async fn known_codes_resolve() {
        let (_tmp, path) = setup();
        let sub = resolve_subscription(&path, "all").await.unwrap().unwrap();
        assert_eq!(sub.name.as_deref(), Some("Everything"));
    }

    #[tokio::test]
    async fn unknown_codes_apply_no_filter() {
        let (_tmp, path) = setup();
        assert!(resolve_subscription(&path, "nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn codes_without_a_status_are_enabled() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("sub.json");
        fs::write(&path, r#"[{"code": "all", "mode": 0, "reg": ".*"}]"#).unwrap();
        let sub = resolve_subscription(&path, "all").await.unwrap().unwrap();
        assert!(sub.is_enabled());
    }

    #[tokio::test]
    async fn disabled_codes_abort() {
        let (_tmp, path) = setup();
        let err = resolve_subscription(&path, "off").await.unwrap_err();
        assert!(matches!(err, CatalogError::SubscriptionDisabled { ref code } if code == "off"));
    }

    #[tokio::test]
    async fn missing_subscription_file_is_empty() {
        assert!(load_subscriptions(Path::new("/no/such/sub.json")).await.is_empty());
    }

    #[tokio::test]
    async fn order_file_prefers_real_over_example() {
        let (tmp, path) = setup();
        let all = resolve_subscription(&path, "all").await.unwrap().unwrap();
        assert!(load_pinned_order(&path, &all).await.is_empty());

        fs::write(tmp.path().join("order_common.example.html"), "X\n").unwrap();
        assert_eq!(load_pinned_order(&path, &all).await, vec!["X"]);

        fs::write(tmp.path().join("order_common.html"), "  B \n\n A\n").unwrap();
        assert_eq!(load_pinned_order(&path, &all).await, vec!["B", "A"]);
    }

    #[tokio::test]
    async fn named_sort_does_not_fall_back_to_the_common_order() {
        let (tmp, path) = setup();
        fs::write(tmp.path().join("order_common.html"), "X\n").unwrap();
        let vip = resolve_subscription(&path, "vip").await.unwrap().unwrap();
        assert!(load_pinned_order(&path, &vip).await.is_empty());

        fs::write(tmp.path().join("vip_order.html"), "Z\n").unwrap();
        assert_eq!(load_pinned_order(&path, &vip).await, vec!["Z"]);
    }
}
