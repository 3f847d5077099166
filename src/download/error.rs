//! Transport errors.
//!
//! Every variant names the URL or path it concerns, so a failed chapter can
//! be reported without the surrounding task.

use std::path::PathBuf;

use thiserror::Error;

/// Failure of a single GET against the catalog, an archive or a page image.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// Connection, DNS, TLS or body stream failure.
    #[error("GET {url} failed: {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// The request did not finish within its deadline.
    #[error("GET {url} timed out")]
    Timeout { url: String },

    /// The server answered with a non-success status.
    #[error("GET {url} returned HTTP {status}")]
    HttpStatus { url: String, status: u16 },

    /// The response body could not be written locally.
    #[error("cannot write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed URL '{url}'")]
    InvalidUrl { url: String },
}

impl DownloadError {
    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Network {
            url: url.into(),
            source,
        }
    }

    pub fn http_status(url: impl Into<String>, status: u16) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
        }
    }

    pub fn timeout(url: impl Into<String>) -> Self {
        Self::Timeout { url: url.into() }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn invalid_url(url: impl Into<String>) -> Self {
        Self::InvalidUrl { url: url.into() }
    }

    /// Timeouts become [`DownloadError::Timeout`], anything else
    /// [`DownloadError::Network`].
    pub(crate) fn from_reqwest(url: &str, source: reqwest::Error) -> Self {
        if source.is_timeout() {
            Self::timeout(url)
        } else {
            Self::network(url, source)
        }
    }

    /// The URL the failed request was for, if the error concerns one.
    #[must_use]
    pub fn url(&self) -> Option<&str> {
        match self {
            Self::Network { url, .. }
            | Self::Timeout { url }
            | Self::HttpStatus { url, .. }
            | Self::InvalidUrl { url } => Some(url),
            Self::Io { .. } => None,
        }
    }
}
