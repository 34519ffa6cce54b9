//! Error types for catalog builds.
//!
//! Most of the crate returns [`anyhow::Result`]; [`CatalogError`] exists for
//! the cases a caller has to tell apart, chiefly a disabled subscription,
//! which aborts the whole request instead of degrading.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CatalogError {
    /// The requested subscription exists but has `status = 0`.
    #[error("subscription code [{code}] is disabled")]
    SubscriptionDisabled { code: String },

    #[error("invalid filter pattern {pattern:?}: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    /// The rule interpreter could not evaluate a plugin script.
    #[error("failed to extract metadata from {file}: {message}")]
    Extraction { file: String, message: String },

    /// A batch task panicked or was cancelled by the runtime.
    #[error("task {id} aborted: {message}")]
    Task { id: String, message: String },

    #[error("failed to build catalog: {0}")]
    Build(#[from] anyhow::Error),
}

impl CatalogError {
    /// Stable machine-readable code used by the HTTP error contract.
    pub fn code(&self) -> &'static str {
        match self {
            CatalogError::SubscriptionDisabled { .. } => "subscription_disabled",
            CatalogError::InvalidPattern { .. } => "bad_request",
            CatalogError::Extraction { .. } | CatalogError::Task { .. } => "extraction_failed",
            CatalogError::Build(_) => "build_failed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_subscription_names_the_code() {
        let err = CatalogError::SubscriptionDisabled {
            code: "vip".to_string(),
        };
        assert_eq!(err.to_string(), "subscription code [vip] is disabled");
        assert_eq!(err.code(), "subscription_disabled");
    }

    #[test]
    fn build_errors_wrap_anyhow() {
        let err: CatalogError = anyhow::anyhow!("disk on fire").into();
        assert!(err.to_string().contains("disk on fire"));
        assert_eq!(err.code(), "build_failed");
    }
}
