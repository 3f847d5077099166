//! Error types for the fetch run.

use std::path::PathBuf;

use thiserror::Error;

use super::{MAX_CONCURRENCY, MIN_CONCURRENCY};
use crate::archive::ArchiveError;
use crate::catalog::CatalogError;
use crate::chapter::ChapterNumber;
use crate::download::DownloadError;

/// Run-level failures. Chapter failures are reported in results instead.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Invalid pool size provided.
    #[error(
        "invalid {name} value {value}: must be between {MIN_CONCURRENCY} and {MAX_CONCURRENCY}"
    )]
    InvalidConcurrency {
        /// Which pool the value was meant for.
        name: &'static str,
        /// The invalid value that was provided.
        value: usize,
    },

    /// The collection's catalog page could not be loaded.
    #[error("cannot check {collection}: {source}")]
    Resolution {
        /// Collection being checked.
        collection: String,
        /// The underlying catalog error.
        #[source]
        source: CatalogError,
    },

    /// A chapter failed while the run was set to stop on the first error.
    #[error("stopped after {collection} {chapter} failed: {reason}")]
    FailFast {
        collection: String,
        chapter: ChapterNumber,
        reason: String,
    },

    /// Semaphore was closed unexpectedly.
    #[error("semaphore closed unexpectedly")]
    SemaphoreClosed,
}

/// Why a single chapter failed.
#[derive(Debug, Error)]
pub(crate) enum TaskError {
    #[error(transparent)]
    Download(DownloadError),

    #[error(transparent)]
    Catalog(CatalogError),

    #[error(transparent)]
    Archive(ArchiveError),

    #[error("no download link for chapter")]
    NoLink,

    #[error("page count not found on {url}")]
    NoPageCount { url: String },

    #[error("page image not found on {url}")]
    NoPageImage { url: String },

    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl TaskError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_error_invalid_concurrency_names_pool_and_range() {
        let msg = FetchError::InvalidConcurrency {
            name: "page concurrency",
            value: 0,
        }
        .to_string();
        assert!(msg.contains("page concurrency"), "{msg}");
        assert!(msg.contains("between 1 and 100"), "{msg}");
    }

    #[test]
    fn test_fetch_error_fail_fast_mentions_chapter() {
        let msg = FetchError::FailFast {
            collection: "Naruto".to_string(),
            chapter: ChapterNumber::whole(7),
            reason: "HTTP 404".to_string(),
        }
        .to_string();
        assert_eq!(msg, "stopped after Naruto 7 failed: HTTP 404");
    }
}
