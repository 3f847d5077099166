//! Error types for catalog access.

use thiserror::Error;

use crate::download::DownloadError;

/// Errors that can occur while loading or querying catalog pages.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// The page could not be fetched.
    #[error("failed to load catalog page {url}: {source}")]
    Load {
        /// Page URL.
        url: String,
        /// Underlying transport error.
        #[source]
        source: DownloadError,
    },

    /// A built-in CSS selector failed to compile.
    #[error("invalid catalog selector '{selector}': {reason}")]
    Selector {
        /// The selector text.
        selector: &'static str,
        /// Parser message.
        reason: String,
    },
}

impl CatalogError {
    /// Creates a page load error.
    pub fn load(url: impl Into<String>, source: DownloadError) -> Self {
        Self::Load {
            url: url.into(),
            source,
        }
    }

    /// Returns the transport error behind a load failure.
    #[must_use]
    pub fn download_error(&self) -> Option<&DownloadError> {
        match self {
            Self::Load { source, .. } => Some(source),
            Self::Selector { .. } => None,
        }
    }
}
