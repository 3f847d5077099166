//! End-to-end ingestion: plan, fetch, clean, rename.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::{info, instrument};

use crate::dedup::{CleanReport, DedupEngine, DedupError};
use crate::fetch::{ChapterResult, FetchError, FetchOrchestrator, OutputFormat};
use crate::plan::{FetchRequest, JobPlanner, OutputLayout, PlanError};
use crate::progress::{ProgressAction, ProgressEvent, ProgressKind, ProgressSink};
use crate::rename::{RenameNormalizer, RenameReport};

/// Errors that stop a pipeline run.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Plan(#[from] PlanError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Dedup(#[from] DedupError),
}

/// Post-processing switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineOptions {
    /// Run the dedup pass over fetched chapter directories.
    pub clean: bool,
    /// Renumber pages of fetched chapter directories.
    pub rename_pages: bool,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            clean: true,
            rename_pages: true,
        }
    }
}

/// Outcome of a pipeline run.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineReport {
    /// Per-chapter results, in completion order.
    pub chapters: Vec<ChapterResult>,
    pub clean: CleanReport,
    pub rename: RenameReport,
}

/// Runs fetch requests through every stage.
#[derive(Debug)]
pub struct Pipeline {
    planner: JobPlanner,
    layout: OutputLayout,
    orchestrator: FetchOrchestrator,
    dedup: DedupEngine,
    renamer: RenameNormalizer,
    options: PipelineOptions,
}

impl Pipeline {
    #[must_use]
    pub fn new(
        layout: OutputLayout,
        orchestrator: FetchOrchestrator,
        dedup: DedupEngine,
        options: PipelineOptions,
    ) -> Self {
        Self {
            planner: JobPlanner::new(),
            layout,
            orchestrator,
            dedup,
            renamer: RenameNormalizer::new(),
            options,
        }
    }

    /// Plans every request, fetches all jobs on one pool, then cleans and
    /// renames the chapter directories that were stored.
    ///
    /// Post-processing only applies to folder output.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Plan`] for a malformed request (before any
    /// network access), [`PipelineError::Fetch`] for run-level fetch failures
    /// and [`PipelineError::Dedup`] when cleaning cannot list or delete files.
    #[instrument(skip(self, requests, sink), fields(requests = requests.len()))]
    pub async fn run(
        &self,
        requests: &[FetchRequest],
        sink: Arc<dyn ProgressSink>,
    ) -> Result<PipelineReport, PipelineError> {
        let jobs = requests
            .iter()
            .map(|request| self.planner.plan(request, &self.layout))
            .collect::<Result<Vec<_>, _>>()?;

        let chapters = self.orchestrator.run_all(jobs, Arc::clone(&sink)).await?;
        let mut report = PipelineReport {
            chapters,
            ..PipelineReport::default()
        };

        if self.orchestrator.options().output_format != OutputFormat::Folder {
            return Ok(report);
        }
        let stored: Vec<PathBuf> = report
            .chapters
            .iter()
            .filter(|r| r.is_ok())
            .filter_map(|r| r.output_path.clone())
            .filter(|path| path.is_dir())
            .collect();
        if stored.is_empty() || !(self.options.clean || self.options.rename_pages) {
            return Ok(report);
        }

        let collections: BTreeSet<&str> = report
            .chapters
            .iter()
            .filter(|r| r.is_ok())
            .map(|r| r.collection_id.as_str())
            .collect();
        for collection in &collections {
            sink.notify(ProgressEvent::series(
                ProgressAction::Cleanup,
                ProgressKind::Start,
                collection,
            ));
        }

        if self.options.clean {
            report.clean = self.dedup.clean_folders(&stored).await?;
        }
        if self.options.rename_pages {
            report.rename = self.renamer.rename_tree(&stored, false).await;
        }

        for collection in &collections {
            sink.notify(ProgressEvent::series(
                ProgressAction::Cleanup,
                ProgressKind::End,
                collection,
            ));
        }

        info!(
            chapters = report.chapters.len(),
            cleaned = report.clean.total(),
            renamed = report.rename.renamed,
            "pipeline complete"
        );
        Ok(report)
    }
}
