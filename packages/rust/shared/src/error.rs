//! Error types for docvec.
//!
//! Library crates use [`PipelineError`] via `thiserror`.
//! The CLI app wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all pipeline operations.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Transport-level network error (connect, timeout, body read).
    #[error("network error: {0}")]
    Network(String),

    /// Non-success HTTP status from a fetched resource.
    #[error("HTTP {status} from {url}")]
    Http { status: u16, url: String },

    /// Sitemap XML that could not be parsed or traversed.
    #[error("malformed sitemap: {0}")]
    Sitemap(String),

    /// HTML content extraction error.
    #[error("extraction error: {message}")]
    Extraction { message: String },

    /// Embedding provider protocol error (shape or dimension mismatch).
    #[error("embedding provider error: {0}")]
    Provider(String),

    /// Vector store error that is not a plain HTTP status.
    #[error("vector store error: {0}")]
    Store(String),

    /// Data validation error (invariant violation on construction).
    #[error("validation error: {message}")]
    Validation { message: String },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, PipelineError>;

impl PipelineError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create an extraction error from any displayable message.
    pub fn extraction(msg: impl Into<String>) -> Self {
        Self::Extraction {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
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

    /// Whether a retry could plausibly succeed.
    ///
    /// Transport errors and throttling/server statuses are transient; client
    /// statuses, protocol mismatches, and local errors are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network(_) => true,
            Self::Http { status, .. } => matches!(status, 408 | 429 | 500..=599),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = PipelineError::config("COHERE_API_KEY is required");
        assert_eq!(err.to_string(), "config error: COHERE_API_KEY is required");

        let err = PipelineError::Http {
            status: 404,
            url: "https://example.com/missing".into(),
        };
        assert_eq!(err.to_string(), "HTTP 404 from https://example.com/missing");
    }

    #[test]
    fn retryable_classification() {
        assert!(PipelineError::Network("timeout".into()).is_retryable());
        assert!(
            PipelineError::Http {
                status: 503,
                url: "u".into()
            }
            .is_retryable()
        );
        assert!(
            PipelineError::Http {
                status: 429,
                url: "u".into()
            }
            .is_retryable()
        );

        assert!(
            !PipelineError::Http {
                status: 404,
                url: "u".into()
            }
            .is_retryable()
        );
        assert!(!PipelineError::Provider("bad dimension".into()).is_retryable());
        assert!(!PipelineError::validation("too short").is_retryable());
    }
}
