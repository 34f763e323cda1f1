//! Error types for Tabdrome.
//!
//! Library crates use [`TabdromeError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all Tabdrome operations.
#[derive(Debug, thiserror::Error)]
pub enum TabdromeError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Parsing of an external payload (event, spec, snapshot) failed.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Database or storage layer error.
    #[error("storage error: {0}")]
    Storage(String),

    /// An investigator round trip failed. Retryable.
    #[error("investigation error: {0}")]
    Investigation(String),

    /// An investigator did not answer within the eviction window. Retryable.
    #[error("investigation request {request_id} timed out")]
    Timeout { request_id: u64 },

    /// Arrangement wiring defect (e.g. a tab nobody bid on). Fatal.
    #[error("arrangement error: {message}")]
    Arrangement { message: String },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error.
    #[error("validation error: {message}")]
    Validation { message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, TabdromeError>;

impl TabdromeError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Create an arrangement error from any displayable message.
    pub fn arrangement(msg: impl Into<String>) -> Self {
        Self::Arrangement {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether the failure should clear suppression so a later dig retries.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Investigation(_) | Self::Timeout { .. })
    }
}
