//! Per-page fallback strategy.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures_util::stream::{self, StreamExt, TryStreamExt};
use tracing::{debug, instrument};
use url::Url;

use super::error::TaskError;
use crate::catalog::{ChapterResolver, PageLoader, page_reader_url};
use crate::download::{HttpClient, filename_from_url};

/// Run-global switch to the per-page strategy.
///
/// Clones share the flag. Once tripped it never resets, and every task
/// reads it before its next network operation.
#[derive(Debug, Clone, Default)]
pub struct FallbackSignal(Arc<AtomicBool>);

impl FallbackSignal {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true once any task has tripped the signal.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Trips the signal. Returns true only for the call that flipped it.
    pub fn trip(&self) -> bool {
        self.0
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// Collaborators of a per-page download.
pub(crate) struct PageFetch<'a> {
    pub loader: &'a dyn PageLoader,
    pub resolver: &'a dyn ChapterResolver,
    pub client: &'a HttpClient,
    pub concurrency: usize,
}

impl PageFetch<'_> {
    /// Downloads every page of the chapter read at `chapter_url` into `output_dir`.
    ///
    /// Returns the number of pages written. The first failing page fails the chapter.
    #[instrument(level = "debug", skip(self), fields(output_dir = %output_dir.display()))]
    pub(crate) async fn run(&self, chapter_url: &str, output_dir: &Path) -> Result<usize, TaskError> {
        tokio::fs::create_dir_all(output_dir)
            .await
            .map_err(|e| TaskError::io(output_dir, e))?;

        let chapter_page = self
            .loader
            .load(chapter_url)
            .await
            .map_err(TaskError::Catalog)?;
        let count = self
            .resolver
            .page_count(&chapter_page)
            .ok_or_else(|| TaskError::NoPageCount {
                url: chapter_url.to_string(),
            })?;
        debug!(pages = count, "fetching chapter page by page");

        let written: Vec<u64> = stream::iter(1..=count)
            .map(|page| self.fetch_page(chapter_url, page, output_dir))
            .buffer_unordered(self.concurrency.max(1))
            .try_collect()
            .await?;
        Ok(written.len())
    }

    async fn fetch_page(&self, chapter_url: &str, page: usize, output_dir: &Path) -> Result<u64, TaskError> {
        let reader_url = page_reader_url(chapter_url, page);
        let reader = self
            .loader
            .load(&reader_url)
            .await
            .map_err(TaskError::Catalog)?;
        let src = self
            .resolver
            .page_image_src(&reader)
            .ok_or_else(|| TaskError::NoPageImage {
                url: reader_url.clone(),
            })?;
        let image_url = reader.absolutize(&src);
        let filename = Url::parse(&image_url).map_or_else(
            |_| format!("page-{page}"),
            |url| filename_from_url(&url, &format!("page-{page}")),
        );

        self.client
            .download_to_path(&image_url, &output_dir.join(filename), None)
            .await
            .map_err(TaskError::Download)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fallback_signal_trips_once() {
        let signal = FallbackSignal::new();
        assert!(!signal.is_active());
        assert!(signal.trip());
        assert!(!signal.trip(), "second trip must not report a flip");
        assert!(signal.is_active());
    }

    #[test]
    fn test_fallback_signal_shared_between_clones() {
        let signal = FallbackSignal::new();
        let observer = signal.clone();
        signal.trip();
        assert!(observer.is_active());
    }

    #[tokio::test]
    async fn test_fallback_signal_single_flip_under_contention() {
        let signal = FallbackSignal::new();
        let mut handles = Vec::new();
        for _ in 0..16 {
            let signal = signal.clone();
            handles.push(tokio::spawn(async move { signal.trip() }));
        }
        let mut flips = 0;
        for handle in handles {
            if handle.await.unwrap_or(false) {
                flips += 1;
            }
        }
        assert_eq!(flips, 1);
    }
}
