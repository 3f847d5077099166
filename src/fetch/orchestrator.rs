//! Chapter task scheduling and the per-chapter state machine.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Semaphore;
use tracing::{debug, info, instrument, warn};

use super::error::TaskError;
use super::fallback::PageFetch;
use super::{
    ChapterResult, ChapterStatus, FallbackSignal, FetchError, FetchOptions, MAX_CONCURRENCY,
    MIN_CONCURRENCY, OutputFormat,
};
use crate::archive::ArchiveCodec;
use crate::catalog::{
    CatalogPage, ChapterListing, ChapterResolver, LinkLookup, PageLoader, catalog_url,
    chapter_reader_url,
};
use crate::chapter::ChapterNumber;
use crate::download::{FailureClass, HttpClient, classify_error};
use crate::plan::{ChapterList, ChapterTask, FetchJob};
use crate::progress::{ProgressAction, ProgressEvent, ProgressKind, ProgressSink};

/// Executes fetch jobs on a bounded chapter pool.
///
/// The fallback signal lives as long as the orchestrator: once one archive
/// request trips it, every later chapter of every later run goes page by page.
pub struct FetchOrchestrator {
    options: Arc<FetchOptions>,
    semaphore: Arc<Semaphore>,
    loader: Arc<dyn PageLoader>,
    resolver: Arc<dyn ChapterResolver>,
    codec: Arc<dyn ArchiveCodec>,
    client: HttpClient,
    signal: FallbackSignal,
}

impl std::fmt::Debug for FetchOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchOrchestrator")
            .field("options", &self.options)
            .field("fallback_active", &self.signal.is_active())
            .finish_non_exhaustive()
    }
}

/// Everything a spawned chapter task needs.
struct TaskContext {
    collection_id: String,
    catalog_url: String,
    options: Arc<FetchOptions>,
    loader: Arc<dyn PageLoader>,
    resolver: Arc<dyn ChapterResolver>,
    codec: Arc<dyn ArchiveCodec>,
    client: HttpClient,
    signal: FallbackSignal,
    sink: Arc<dyn ProgressSink>,
}

/// A job after its catalog page has been checked.
struct CheckedJob {
    context: Arc<TaskContext>,
    /// Chapters ending as missing or removed without a download.
    settled: Vec<ChapterResult>,
    /// Chapters with a known download link.
    ready: Vec<ChapterTask>,
}

impl FetchOrchestrator {
    /// Creates an orchestrator.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::InvalidConcurrency`] if either pool size is
    /// outside 1-100.
    pub fn new(
        options: FetchOptions,
        loader: Arc<dyn PageLoader>,
        resolver: Arc<dyn ChapterResolver>,
        codec: Arc<dyn ArchiveCodec>,
        client: HttpClient,
    ) -> Result<Self, FetchError> {
        for (name, value) in [
            ("concurrency", options.concurrency),
            ("page concurrency", options.page_concurrency),
        ] {
            if !(MIN_CONCURRENCY..=MAX_CONCURRENCY).contains(&value) {
                return Err(FetchError::InvalidConcurrency { name, value });
            }
        }

        debug!(
            concurrency = options.concurrency,
            page_concurrency = options.page_concurrency,
            format = ?options.output_format,
            fallback = options.fallback_to_pages,
            "creating fetch orchestrator"
        );

        Ok(Self {
            semaphore: Arc::new(Semaphore::new(options.concurrency)),
            options: Arc::new(options),
            loader,
            resolver,
            codec,
            client,
            signal: FallbackSignal::new(),
        })
    }

    /// Returns the run policy.
    #[must_use]
    pub fn options(&self) -> &FetchOptions {
        &self.options
    }

    /// Returns the shared fallback signal.
    #[must_use]
    pub fn fallback_signal(&self) -> &FallbackSignal {
        &self.signal
    }

    /// Runs a single job.
    ///
    /// # Errors
    ///
    /// See [`run_all`](Self::run_all).
    pub async fn run(
        &self,
        job: FetchJob,
        sink: Arc<dyn ProgressSink>,
    ) -> Result<Vec<ChapterResult>, FetchError> {
        self.run_all(vec![job], sink).await
    }

    /// Runs several jobs on one shared chapter pool.
    ///
    /// Catalog pages are checked one job after another; chapters are queued
    /// onto the pool as soon as their job has been checked. Results come
    /// back in completion order.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Resolution`] if a catalog page cannot be loaded,
    /// [`FetchError::FailFast`] if fail-fast is set and a chapter failed, and
    /// [`FetchError::SemaphoreClosed`] if the pool was closed.
    ///
    /// Note: without fail-fast, chapter failures do NOT cause this method to
    /// error. They are returned as results with [`ChapterStatus::Error`].
    #[instrument(skip(self, jobs, sink), fields(jobs = jobs.len()))]
    pub async fn run_all(
        &self,
        jobs: Vec<FetchJob>,
        sink: Arc<dyn ProgressSink>,
    ) -> Result<Vec<ChapterResult>, FetchError> {
        let failed = Arc::new(AtomicBool::new(false));
        let mut results = Vec::new();
        let mut handles = Vec::new();

        info!("starting fetch run");

        'jobs: for job in jobs {
            let checked = self.check(job, &sink).await?;
            results.extend(checked.settled);

            for task in checked.ready {
                if self.options.fail_fast && failed.load(Ordering::Acquire) {
                    debug!("fail-fast tripped, not scheduling remaining chapters");
                    break 'jobs;
                }

                let permit = self
                    .semaphore
                    .clone()
                    .acquire_owned()
                    .await
                    .map_err(|_| FetchError::SemaphoreClosed)?;

                let context = Arc::clone(&checked.context);
                let failed = Arc::clone(&failed);
                let collection_id = context.collection_id.clone();
                let chapter = task.chapter;

                let handle = tokio::spawn(async move {
                    // Permit is dropped when this block exits (RAII)
                    let _permit = permit;
                    let result = process_chapter(&context, task).await;
                    if result.status == ChapterStatus::Error {
                        failed.store(true, Ordering::Release);
                    }
                    result
                });
                handles.push((collection_id, chapter, handle));
            }
        }

        debug!(task_count = handles.len(), "waiting for chapters to complete");

        for (collection_id, chapter, handle) in handles {
            match handle.await {
                Ok(result) => results.push(result),
                Err(e) => {
                    warn!(collection = %collection_id, %chapter, error = %e, "chapter task panicked");
                    let mut result =
                        ChapterResult::settled(&collection_id, chapter, ChapterStatus::Error);
                    result.error = Some(e.to_string());
                    results.push(result);
                }
            }
        }

        let ok = results.iter().filter(|r| r.is_ok()).count();
        let errors = results
            .iter()
            .filter(|r| r.status == ChapterStatus::Error)
            .count();
        info!(
            ok,
            errors,
            total = results.len(),
            fallback = self.signal.is_active(),
            "fetch run complete"
        );

        if self.options.fail_fast
            && let Some(first) = results.iter().find(|r| r.status == ChapterStatus::Error)
        {
            return Err(FetchError::FailFast {
                collection: first.collection_id.clone(),
                chapter: first.chapter,
                reason: first.error.clone().unwrap_or_default(),
            });
        }

        Ok(results)
    }

    /// Loads the catalog page of `job`, binds pending chapter lists and
    /// resolves every chapter's download link.
    #[instrument(level = "debug", skip(self, job, sink), fields(collection = %job.collection_id()))]
    async fn check(
        &self,
        mut job: FetchJob,
        sink: &Arc<dyn ProgressSink>,
    ) -> Result<CheckedJob, FetchError> {
        let collection_id = job.collection_id().to_string();
        sink.notify(ProgressEvent::series(
            ProgressAction::Check,
            ProgressKind::Start,
            &collection_id,
        ));

        let url = catalog_url(
            &self.options.catalog_base_url,
            &collection_id,
            job.source_ref(),
        );
        let page = self
            .loader
            .load(&url)
            .await
            .map_err(|source| FetchError::Resolution {
                collection: collection_id.clone(),
                source,
            })?;

        if let ChapterList::UntilLatest { last_known } = *job.chapters() {
            let listings = self.newer_chapters(&page, last_known);
            job.bind_listings(listings);
        }

        sink.notify(ProgressEvent::series(
            ProgressAction::Check,
            ProgressKind::End,
            &collection_id,
        ));

        let (mut ready, unresolved): (Vec<ChapterTask>, Vec<ChapterTask>) = job
            .into_tasks()
            .into_iter()
            .partition(|task| task.link.is_some());
        let chapters: Vec<ChapterNumber> = unresolved.iter().map(|task| task.chapter).collect();
        let lookups = if chapters.is_empty() {
            Vec::new()
        } else {
            self.resolver.find_chapter_links(&page, &chapters)
        };

        let mut settled = Vec::new();
        for (mut task, lookup) in unresolved.into_iter().zip(lookups) {
            match lookup {
                LinkLookup::Found { url } => {
                    task.link = Some(url);
                    ready.push(task);
                }
                LinkLookup::Missing => {
                    debug!(chapter = %task.chapter, "chapter missing from catalog");
                    settled.push(settle(sink, &collection_id, task.chapter, ChapterStatus::Missing));
                }
                LinkLookup::Removed => {
                    debug!(chapter = %task.chapter, "chapter removed from catalog");
                    settled.push(settle(sink, &collection_id, task.chapter, ChapterStatus::Removed));
                }
            }
        }

        if !ready.is_empty() {
            sink.notify(ProgressEvent::queued(
                &collection_id,
                ready.iter().map(|t| t.chapter).collect(),
            ));
        }

        let context = Arc::new(TaskContext {
            collection_id,
            catalog_url: url,
            options: Arc::clone(&self.options),
            loader: Arc::clone(&self.loader),
            resolver: Arc::clone(&self.resolver),
            codec: Arc::clone(&self.codec),
            client: self.client.clone(),
            signal: self.signal.clone(),
            sink: Arc::clone(sink),
        });

        Ok(CheckedJob {
            context,
            settled,
            ready,
        })
    }

    /// Chapters the catalog lists after `last_known`.
    ///
    /// Catalogs without a download listing fall back to counting whole
    /// chapters up to the latest number on the page.
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    fn newer_chapters(&self, page: &CatalogPage, last_known: ChapterNumber) -> Vec<ChapterListing> {
        let listings = self.resolver.chapters_after(page, last_known);
        if !listings.is_empty() {
            return listings;
        }
        let Some(latest) = self.resolver.find_latest_chapter_number(page) else {
            return Vec::new();
        };

        let first = ChapterNumber::new(last_known.value().floor() + 1.0)
            .unwrap_or(ChapterNumber::whole(1))
            .max(ChapterNumber::whole(1));
        let mut chapters = Vec::new();
        let mut current = first;
        while current.value() <= latest as f64 && chapters.len() < crate::plan::MAX_RANGE_LEN {
            chapters.push(ChapterListing::new(current, None));
            current = current.next();
        }
        if current.value() <= latest as f64 {
            warn!(
                requested = latest.saturating_sub(first.value() as u64) + 1,
                kept = chapters.len(),
                "chapter range clipped"
            );
        }
        chapters
    }
}

/// Records a chapter that ends without a download.
fn settle(
    sink: &Arc<dyn ProgressSink>,
    collection_id: &str,
    chapter: ChapterNumber,
    status: ChapterStatus,
) -> ChapterResult {
    let kind = if status == ChapterStatus::Removed {
        ProgressKind::Removed
    } else {
        ProgressKind::Missing
    };
    sink.notify(ProgressEvent::chapter(
        ProgressAction::Download,
        kind,
        collection_id,
        chapter,
    ));
    ChapterResult::settled(collection_id, chapter, status)
}

/// Runs one chapter through download, fallback and unpack.
#[instrument(level = "debug", skip(ctx, task), fields(collection = %ctx.collection_id, chapter = %task.chapter))]
async fn process_chapter(ctx: &TaskContext, task: ChapterTask) -> ChapterResult {
    ctx.sink.notify(ProgressEvent::chapter(
        ProgressAction::Download,
        ProgressKind::Start,
        &ctx.collection_id,
        task.chapter,
    ));

    let mut result = ChapterResult::settled(&ctx.collection_id, task.chapter, ChapterStatus::Error);
    match download_chapter(ctx, &task).await {
        Ok((path, via_fallback)) => {
            info!(path = %path.display(), via_fallback, "chapter stored");
            result.status = ChapterStatus::Ok;
            result.output_path = Some(path);
            result.via_fallback = via_fallback;
        }
        Err(e) => {
            warn!(error = %e, "chapter failed");
            result.error = Some(e.to_string());
        }
    }
    result
}

async fn download_chapter(ctx: &TaskContext, task: &ChapterTask) -> Result<(PathBuf, bool), TaskError> {
    if ctx.signal.is_active() {
        return fetch_per_page(ctx, task).await.map(|path| (path, true));
    }

    let link = task.link.as_deref().ok_or(TaskError::NoLink)?;
    let outcome = ctx
        .client
        .download_to_path(link, &task.archive_path, Some(ctx.options.archive_timeout))
        .await;

    if let Err(e) = outcome {
        if ctx.options.fallback_to_pages && classify_error(&e) == FailureClass::FallbackTrigger {
            warn!(error = %e, "archive request unreliable, switching to per-page fetch");
            if ctx.signal.trip() {
                ctx.sink.notify(ProgressEvent::chapter(
                    ProgressAction::Download,
                    ProgressKind::Fallback,
                    &ctx.collection_id,
                    task.chapter,
                ));
            }
            return fetch_per_page(ctx, task).await.map(|path| (path, true));
        }
        return Err(TaskError::Download(e));
    }

    ctx.sink.notify(ProgressEvent::chapter(
        ProgressAction::Download,
        ProgressKind::End,
        &ctx.collection_id,
        task.chapter,
    ));

    if ctx.options.output_format == OutputFormat::Zip {
        return Ok((task.archive_path.clone(), false));
    }

    ctx.codec
        .extract(&task.archive_path, &task.output_dir)
        .await
        .map_err(TaskError::Archive)?;
    tokio::fs::remove_file(&task.archive_path)
        .await
        .map_err(|e| TaskError::io(&task.archive_path, e))?;
    Ok((task.output_dir.clone(), false))
}

async fn fetch_per_page(ctx: &TaskContext, task: &ChapterTask) -> Result<PathBuf, TaskError> {
    let chapter_url = chapter_reader_url(&ctx.catalog_url, task.chapter);
    let pages = PageFetch {
        loader: ctx.loader.as_ref(),
        resolver: ctx.resolver.as_ref(),
        client: &ctx.client,
        concurrency: ctx.options.page_concurrency,
    }
    .run(&chapter_url, &task.output_dir)
    .await?;
    debug!(pages, "pages fetched");

    ctx.sink.notify(ProgressEvent::chapter(
        ProgressAction::Download,
        ProgressKind::End,
        &ctx.collection_id,
        task.chapter,
    ));

    if ctx.options.output_format == OutputFormat::Zip {
        ctx.codec
            .compress(&task.output_dir, &task.archive_path)
            .await
            .map_err(TaskError::Archive)?;
        tokio::fs::remove_dir_all(&task.output_dir)
            .await
            .map_err(|e| TaskError::io(&task.output_dir, e))?;
        return Ok(task.archive_path.clone());
    }
    Ok(task.output_dir.clone())
}
