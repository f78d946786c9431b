//! Error taxonomy shared by every smrt crate
//!
//! The service loop classifies these into stop / continue / fatal decisions,
//! so variants map to *kinds* of failure rather than to call sites.

use std::path::PathBuf;
use thiserror::Error;

/// Prefix that marks a runtime failure as a failed submission
pub const SUBMISSION_FAILED: &str = "submission failed";

/// Errors raised while loading rules, fetching, parsing or submitting
#[derive(Debug, Error)]
pub enum SmrtError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("unable to load plugin: {0}")]
    PluginNotFound(String),

    #[error("feed '{feed}' not found in rule {rule}")]
    FeedNotFound { rule: String, feed: String },

    #[error("invalid rule {path}: {message}")]
    Rule { path: PathBuf, message: String },

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("timeout: {0}")]
    Timeout(String),

    /// Generic runtime failure; see [`SUBMISSION_FAILED`]
    #[error("{0}")]
    Runtime(String),

    #[error("interrupted")]
    Interrupted,

    #[error("cannot coerce candidate: {0}")]
    Coerce(String),

    #[error("archive error: {0}")]
    Archive(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SmrtError {
    /// Runtime failure raised by a client that could not deliver indicators
    pub fn submission_failed(detail: impl std::fmt::Display) -> Self {
        SmrtError::Runtime(format!("{SUBMISSION_FAILED}: {detail}"))
    }

    pub fn is_submission_failure(&self) -> bool {
        matches!(self, SmrtError::Runtime(msg) if msg.starts_with(SUBMISSION_FAILED))
    }
}

/// Convenience result alias
pub type Result<T> = std::result::Result<T, SmrtError>;
