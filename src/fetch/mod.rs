//! Concurrent chapter fetching.
//!
//! [`FetchOrchestrator`] loads each job's catalog page, resolves chapter
//! links, then downloads chapters on a bounded task pool. The primary
//! strategy fetches a whole chapter archive; when an archive request times
//! out or the server answers 5xx, the run switches for good to fetching
//! pages one by one on a second, per-chapter pool.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use chapterdl_core::{
//!     ChapterNumber, FetchOptions, FetchOrchestrator, FetchRequest, HtmlChapterResolver,
//!     HttpClient, HttpPageLoader, JobPlanner, OutputLayout, TracingProgressSink, ZipCodec,
//! };
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = HttpClient::new();
//! let orchestrator = FetchOrchestrator::new(
//!     FetchOptions::default(),
//!     Arc::new(HttpPageLoader::new(client.clone())),
//!     Arc::new(HtmlChapterResolver::new()?),
//!     Arc::new(ZipCodec),
//!     client,
//! )?;
//! let request = FetchRequest::range("Naruto", ChapterNumber::whole(10), ChapterNumber::whole(12));
//! let job = JobPlanner::new().plan(&request, &OutputLayout::new("./library"))?;
//! let results = orchestrator.run(job, Arc::new(TracingProgressSink)).await?;
//! println!("{} chapters processed", results.len());
//! # Ok(())
//! # }
//! ```

mod error;
mod fallback;
mod orchestrator;

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::catalog::DEFAULT_CATALOG_BASE_URL;
use crate::chapter::ChapterNumber;
use crate::download::DEFAULT_ARCHIVE_TIMEOUT_MS;

pub use error::FetchError;
pub use fallback::FallbackSignal;
pub use orchestrator::FetchOrchestrator;

/// Minimum allowed pool size.
pub const MIN_CONCURRENCY: usize = 1;

/// Maximum allowed pool size.
pub const MAX_CONCURRENCY: usize = 100;

/// Default number of chapters fetched at once.
pub const DEFAULT_CONCURRENCY: usize = 5;

/// Default number of pages fetched at once per chapter during fallback.
pub const DEFAULT_PAGE_CONCURRENCY: usize = 5;

/// How a finished chapter is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Loose page files in the chapter directory.
    #[default]
    Folder,
    /// A single `<chapter>.zip` archive.
    Zip,
}

/// Run policy for the orchestrator.
#[derive(Debug, Clone)]
pub struct FetchOptions {
    /// Chapter task pool size.
    pub concurrency: usize,
    /// Per-chapter page pool size used by the fallback strategy.
    pub page_concurrency: usize,
    pub output_format: OutputFormat,
    /// Whether archive timeouts and 5xx answers switch the run to per-page fetch.
    pub fallback_to_pages: bool,
    /// Abort the run on the first chapter error.
    pub fail_fast: bool,
    /// Timeout of a whole-archive request.
    pub archive_timeout: Duration,
    pub catalog_base_url: String,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            page_concurrency: DEFAULT_PAGE_CONCURRENCY,
            output_format: OutputFormat::Folder,
            fallback_to_pages: true,
            fail_fast: false,
            archive_timeout: Duration::from_millis(DEFAULT_ARCHIVE_TIMEOUT_MS),
            catalog_base_url: DEFAULT_CATALOG_BASE_URL.to_string(),
        }
    }
}

/// Terminal state of one chapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChapterStatus {
    Ok,
    /// The catalog does not list the chapter.
    Missing,
    /// The catalog marks the chapter as taken down.
    Removed,
    Error,
}

/// Outcome of one chapter task.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChapterResult {
    pub collection_id: String,
    pub chapter: ChapterNumber,
    pub status: ChapterStatus,
    /// Chapter directory or archive, set when the status is `Ok`.
    pub output_path: Option<PathBuf>,
    /// Failure description, set when the status is `Error`.
    pub error: Option<String>,
    /// Whether the pages were fetched one by one.
    pub via_fallback: bool,
}

impl ChapterResult {
    pub(crate) fn settled(collection_id: &str, chapter: ChapterNumber, status: ChapterStatus) -> Self {
        Self {
            collection_id: collection_id.to_string(),
            chapter,
            status,
            output_path: None,
            error: None,
            via_fallback: false,
        }
    }

    /// Returns true if the chapter was stored successfully.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.status == ChapterStatus::Ok
    }
}
