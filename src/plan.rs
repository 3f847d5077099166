//! Job planning: turning a fetch request into an ordered list of chapter tasks.
//!
//! Planning is a pure function over its inputs. No network or filesystem
//! access happens here; the only late-bound part of a job is the chapter list
//! of a "resume to latest" request, which is filled in by the orchestrator
//! once the catalog page has been loaded (see [`FetchJob::bind_listings`]).
//!
//! # Example
//!
//! ```
//! use chapterdl_core::plan::{FetchRequest, JobPlanner, OutputLayout};
//! use chapterdl_core::ChapterNumber;
//!
//! let request = FetchRequest::range("The Breaker", ChapterNumber::whole(15), ChapterNumber::whole(10));
//! let job = JobPlanner::new().plan(&request, &OutputLayout::new("./library")).unwrap();
//! let chapters: Vec<String> = job.tasks().iter().map(|t| t.chapter.to_string()).collect();
//! assert_eq!(chapters, ["10", "11", "12", "13", "14", "15"]);
//! ```

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, instrument};

use crate::catalog::ChapterListing;
use crate::chapter::ChapterNumber;

/// Upper bound on the number of chapters a single explicit range may expand to.
pub const MAX_RANGE_LEN: usize = 10_000;

/// Errors raised while planning a job. All of them are fatal to the run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanError {
    /// The request does not name a collection.
    #[error("fetch request has an empty collection id")]
    EmptyCollection,

    /// The explicit range expands to more tasks than allowed.
    #[error("chapter range {start}..={end} for '{collection}' exceeds {MAX_RANGE_LEN} chapters")]
    RangeTooLarge {
        /// Collection the request was for.
        collection: String,
        /// Normalized range start.
        start: ChapterNumber,
        /// Normalized range end.
        end: ChapterNumber,
    },
}

/// A request to fetch chapters of one collection.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchRequest {
    /// Collection (series) identifier, as named by the catalog.
    pub collection_id: String,
    /// First chapter of an explicit range, or the last known chapter in resume mode.
    pub start_chapter: ChapterNumber,
    /// Last chapter of an explicit range; ignored in resume mode.
    pub end_chapter: Option<ChapterNumber>,
    /// Fetch everything newer than `start_chapter`, resolved against the live catalog.
    pub resume_to_latest: bool,
    /// Catalog path override, used when the collection slug cannot be derived from its name.
    pub source_ref: Option<String>,
}

impl FetchRequest {
    /// Creates a request for an explicit, inclusive chapter range.
    pub fn range(collection_id: impl Into<String>, start: ChapterNumber, end: ChapterNumber) -> Self {
        Self {
            collection_id: collection_id.into(),
            start_chapter: start,
            end_chapter: Some(end),
            resume_to_latest: false,
            source_ref: None,
        }
    }

    /// Creates a request for a single chapter.
    pub fn single(collection_id: impl Into<String>, chapter: ChapterNumber) -> Self {
        Self {
            collection_id: collection_id.into(),
            start_chapter: chapter,
            end_chapter: None,
            resume_to_latest: false,
            source_ref: None,
        }
    }

    /// Creates a request for every chapter newer than `last_known`.
    pub fn resume(collection_id: impl Into<String>, last_known: ChapterNumber) -> Self {
        Self {
            collection_id: collection_id.into(),
            start_chapter: last_known,
            end_chapter: None,
            resume_to_latest: true,
            source_ref: None,
        }
    }

    /// Sets the catalog path override.
    #[must_use]
    pub fn with_source_ref(mut self, source_ref: Option<String>) -> Self {
        self.source_ref = source_ref;
        self
    }
}

/// Where chapters of a collection land on disk.
///
/// Each chapter materializes as `<root>/<collection>/<collection> <chapter>`,
/// with the archive form at the same path plus `.zip`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLayout {
    root: PathBuf,
}

impl OutputLayout {
    /// Creates a layout rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Returns the output root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding all chapters of a collection.
    #[must_use]
    pub fn collection_dir(&self, collection_id: &str) -> PathBuf {
        self.root.join(collection_id)
    }

    /// Unpacked chapter directory.
    #[must_use]
    pub fn chapter_dir(&self, collection_id: &str, chapter: ChapterNumber) -> PathBuf {
        self.collection_dir(collection_id)
            .join(format!("{collection_id} {chapter}"))
    }

    /// Chapter archive path.
    #[must_use]
    pub fn chapter_archive(&self, collection_id: &str, chapter: ChapterNumber) -> PathBuf {
        self.collection_dir(collection_id)
            .join(format!("{collection_id} {chapter}.zip"))
    }

    fn task(&self, collection_id: &str, chapter: ChapterNumber, link: Option<String>) -> ChapterTask {
        ChapterTask {
            chapter,
            archive_path: self.chapter_archive(collection_id, chapter),
            output_dir: self.chapter_dir(collection_id, chapter),
            link,
        }
    }
}

/// A single chapter to download.
#[derive(Debug, Clone, PartialEq)]
pub struct ChapterTask {
    /// Chapter number.
    pub chapter: ChapterNumber,
    /// Where the downloaded archive is written.
    pub archive_path: PathBuf,
    /// Where the unpacked pages end up.
    pub output_dir: PathBuf,
    /// Download link, when already known from a catalog listing.
    pub link: Option<String>,
}

/// Chapter list of a job: either materialized at planning time or pending.
#[derive(Debug, Clone, PartialEq)]
pub enum ChapterList {
    /// Tasks known up front, in request order.
    Planned(Vec<ChapterTask>),
    /// Resume mode: everything newer than `last_known`, bound once the catalog loads.
    UntilLatest {
        /// Most recent chapter already held locally.
        last_known: ChapterNumber,
    },
}

/// The plan for one run over one collection.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchJob {
    collection_id: String,
    source_ref: Option<String>,
    layout: OutputLayout,
    chapters: ChapterList,
}

impl FetchJob {
    /// Collection this job fetches.
    #[must_use]
    pub fn collection_id(&self) -> &str {
        &self.collection_id
    }

    /// Catalog path override, if any.
    #[must_use]
    pub fn source_ref(&self) -> Option<&str> {
        self.source_ref.as_deref()
    }

    /// Output layout used to build task paths.
    #[must_use]
    pub fn layout(&self) -> &OutputLayout {
        &self.layout
    }

    /// The job's chapter list.
    #[must_use]
    pub fn chapters(&self) -> &ChapterList {
        &self.chapters
    }

    /// Returns true while the chapter list still awaits the catalog page.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        matches!(self.chapters, ChapterList::UntilLatest { .. })
    }

    /// Materialized tasks; empty while the job is pending.
    #[must_use]
    pub fn tasks(&self) -> &[ChapterTask] {
        match &self.chapters {
            ChapterList::Planned(tasks) => tasks,
            ChapterList::UntilLatest { .. } => &[],
        }
    }

    /// Binds a pending job to the chapters the catalog lists after `last_known`.
    ///
    /// Listings at or below the last known chapter are dropped, the rest are
    /// sorted ascending and deduplicated. Listing links are carried into the
    /// tasks so the resolver does not have to look them up again. Calling this
    /// on an already planned job is a no-op.
    pub fn bind_listings(&mut self, listings: Vec<ChapterListing>) {
        let ChapterList::UntilLatest { last_known } = self.chapters else {
            return;
        };

        let mut fresh: Vec<ChapterListing> = listings
            .into_iter()
            .filter(|listing| listing.chapter > last_known)
            .collect();
        fresh.sort_by(|a, b| a.chapter.cmp(&b.chapter));
        fresh.dedup_by(|a, b| a.chapter == b.chapter);

        debug!(
            collection = %self.collection_id,
            %last_known,
            new_chapters = fresh.len(),
            "bound resume job to catalog listing"
        );

        let tasks = fresh
            .into_iter()
            .map(|listing| self.layout.task(&self.collection_id, listing.chapter, listing.url))
            .collect();
        self.chapters = ChapterList::Planned(tasks);
    }

    /// Consumes the job and returns its tasks.
    #[must_use]
    pub fn into_tasks(self) -> Vec<ChapterTask> {
        match self.chapters {
            ChapterList::Planned(tasks) => tasks,
            ChapterList::UntilLatest { .. } => Vec::new(),
        }
    }
}

/// Turns fetch requests into fetch jobs.
#[derive(Debug, Clone, Copy, Default)]
pub struct JobPlanner;

impl JobPlanner {
    /// Creates a planner.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Plans a job for `request`.
    ///
    /// Explicit ranges are normalized so start <= end and expanded one chapter
    /// at a time from the start; a missing end yields a single-task job. Resume
    /// requests produce a pending job carrying only the last known chapter.
    ///
    /// # Errors
    ///
    /// Returns [`PlanError::EmptyCollection`] when no collection is named and
    /// [`PlanError::RangeTooLarge`] for ranges beyond [`MAX_RANGE_LEN`].
    #[instrument(level = "debug", skip(self, layout), fields(collection = %request.collection_id))]
    pub fn plan(&self, request: &FetchRequest, layout: &OutputLayout) -> Result<FetchJob, PlanError> {
        let collection_id = request.collection_id.trim();
        if collection_id.is_empty() {
            return Err(PlanError::EmptyCollection);
        }

        let chapters = if request.resume_to_latest {
            ChapterList::UntilLatest {
                last_known: request.start_chapter,
            }
        } else {
            let end = request.end_chapter.unwrap_or(request.start_chapter);
            let (start, end) = if end < request.start_chapter {
                (end, request.start_chapter)
            } else {
                (request.start_chapter, end)
            };

            let mut tasks = Vec::new();
            let mut current = start;
            while current <= end {
                if tasks.len() == MAX_RANGE_LEN {
                    return Err(PlanError::RangeTooLarge {
                        collection: collection_id.to_string(),
                        start,
                        end,
                    });
                }
                tasks.push(layout.task(collection_id, current, None));
                current = current.next();
            }
            ChapterList::Planned(tasks)
        };

        Ok(FetchJob {
            collection_id: collection_id.to_string(),
            source_ref: request.source_ref.clone(),
            layout: layout.clone(),
            chapters,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn chapters_of(job: &FetchJob) -> Vec<String> {
        job.tasks().iter().map(|t| t.chapter.to_string()).collect()
    }

    fn layout() -> OutputLayout {
        OutputLayout::new("/library")
    }

    #[test]
    fn test_plan_explicit_range_is_inclusive_and_ordered() {
        let request = FetchRequest::range("X", ChapterNumber::whole(10), ChapterNumber::whole(15));
        let job = JobPlanner::new().plan(&request, &layout()).unwrap();
        assert_eq!(chapters_of(&job), ["10", "11", "12", "13", "14", "15"]);
        assert!(!job.is_pending());
    }

    #[test]
    fn test_plan_reversed_range_matches_swapped_range() {
        let planner = JobPlanner::new();
        let forward = planner
            .plan(
                &FetchRequest::range("X", ChapterNumber::whole(3), ChapterNumber::whole(7)),
                &layout(),
            )
            .unwrap();
        let reversed = planner
            .plan(
                &FetchRequest::range("X", ChapterNumber::whole(7), ChapterNumber::whole(3)),
                &layout(),
            )
            .unwrap();
        assert_eq!(forward.tasks(), reversed.tasks());
    }

    #[test]
    fn test_plan_single_chapter_produces_one_task() {
        let request = FetchRequest::single("X", ChapterNumber::whole(42));
        let job = JobPlanner::new().plan(&request, &layout()).unwrap();
        assert_eq!(chapters_of(&job), ["42"]);
    }

    #[test]
    fn test_plan_task_paths_follow_layout() {
        let request = FetchRequest::single("One Piece", ChapterNumber::whole(750));
        let job = JobPlanner::new().plan(&request, &layout()).unwrap();
        let task = &job.tasks()[0];
        assert_eq!(
            task.output_dir,
            PathBuf::from("/library/One Piece/One Piece 750")
        );
        assert_eq!(
            task.archive_path,
            PathBuf::from("/library/One Piece/One Piece 750.zip")
        );
        assert!(task.link.is_none());
    }

    #[test]
    fn test_plan_fractional_start_steps_by_one() {
        let request = FetchRequest::range(
            "X",
            ChapterNumber::new(10.5).unwrap(),
            ChapterNumber::whole(12),
        );
        let job = JobPlanner::new().plan(&request, &layout()).unwrap();
        assert_eq!(chapters_of(&job), ["10.5", "11.5"]);
    }

    #[test]
    fn test_plan_resume_is_pending_with_last_known() {
        let request = FetchRequest::resume("One Piece", ChapterNumber::whole(750));
        let job = JobPlanner::new().plan(&request, &layout()).unwrap();
        assert!(job.is_pending());
        assert!(job.tasks().is_empty());
        assert_eq!(
            job.chapters(),
            &ChapterList::UntilLatest {
                last_known: ChapterNumber::whole(750)
            }
        );
    }

    #[test]
    fn test_plan_resume_ignores_end_chapter() {
        let mut request = FetchRequest::resume("X", ChapterNumber::whole(5));
        request.end_chapter = Some(ChapterNumber::whole(6));
        let job = JobPlanner::new().plan(&request, &layout()).unwrap();
        assert!(job.is_pending());
    }

    #[test]
    fn test_plan_empty_collection_rejected() {
        let request = FetchRequest::single("  ", ChapterNumber::whole(1));
        assert_eq!(
            JobPlanner::new().plan(&request, &layout()),
            Err(PlanError::EmptyCollection)
        );
    }

    #[test]
    fn test_plan_huge_range_rejected() {
        let request = FetchRequest::range("X", ChapterNumber::whole(0), ChapterNumber::whole(20_000));
        let result = JobPlanner::new().plan(&request, &layout());
        assert!(matches!(result, Err(PlanError::RangeTooLarge { .. })));
    }

    #[test]
    fn test_bind_listings_keeps_only_newer_sorted_chapters() {
        let request = FetchRequest::resume("X", ChapterNumber::whole(10));
        let mut job = JobPlanner::new().plan(&request, &layout()).unwrap();
        job.bind_listings(vec![
            ChapterListing::new(ChapterNumber::whole(12), Some("http://c/12".to_string())),
            ChapterListing::new(ChapterNumber::whole(9), None),
            ChapterListing::new(ChapterNumber::whole(10), None),
            ChapterListing::new(ChapterNumber::new(11.5).unwrap(), None),
            ChapterListing::new(ChapterNumber::whole(11), None),
        ]);
        assert!(!job.is_pending());
        assert_eq!(chapters_of(&job), ["11", "11.5", "12"]);
        assert_eq!(job.tasks()[2].link.as_deref(), Some("http://c/12"));
    }

    #[test]
    fn test_bind_listings_when_current_yields_no_tasks() {
        let request = FetchRequest::resume("X", ChapterNumber::whole(20));
        let mut job = JobPlanner::new().plan(&request, &layout()).unwrap();
        job.bind_listings(vec![ChapterListing::new(ChapterNumber::whole(20), None)]);
        assert!(!job.is_pending());
        assert!(job.into_tasks().is_empty());
    }

    #[test]
    fn test_bind_listings_on_planned_job_is_noop() {
        let request = FetchRequest::single("X", ChapterNumber::whole(1));
        let mut job = JobPlanner::new().plan(&request, &layout()).unwrap();
        job.bind_listings(vec![ChapterListing::new(ChapterNumber::whole(99), None)]);
        assert_eq!(chapters_of(&job), ["1"]);
    }
}
