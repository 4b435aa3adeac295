use std::time::Duration;

use thiserror::Error;

use crate::types::{Metric, SkippedFile};

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Skipped {path}: {reason}")]
    LoadSkipped { path: String, reason: String },

    #[error("Embedding batch {batch} failed: {message}")]
    EmbeddingFailure { batch: usize, message: String },

    #[error("An ingestion or refresh is already in progress")]
    Busy,

    #[error("Index unavailable: {0}")]
    IndexUnavailable(String),

    #[error("Embedding call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Persisted index uses metric {stored}, configured metric is {configured}")]
    MetricMismatch { stored: Metric, configured: Metric },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Embedding provider error: {0}")]
    Provider(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Errors that are worth another attempt when raised by an embedding call.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Provider(_) | Self::Io(_))
    }
}

impl From<SkippedFile> for Error {
    fn from(skipped: SkippedFile) -> Self {
        Self::LoadSkipped {
            path: skipped.path,
            reason: skipped.reason,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_errors() {
        assert!(Error::Timeout(Duration::from_secs(1)).is_transient());
        assert!(Error::Provider("503".into()).is_transient());
        assert!(!Error::InvalidArgument("dim".into()).is_transient());
        assert!(!Error::Busy.is_transient());
    }

    #[test]
    fn skipped_file_message() {
        let err = Error::from(SkippedFile {
            path: "docs/a.pdf".into(),
            reason: "unsupported extension".into(),
        });
        assert_eq!(err.to_string(), "Skipped docs/a.pdf: unsupported extension");
    }
}
