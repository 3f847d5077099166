//! Lifecycle notifications pushed by the fetch run.
//!
//! Events are fire-and-forget: the run never reads anything back from a
//! [`ProgressSink`], so sinks must not block for long.

use std::sync::Mutex;

use serde::Serialize;
use tracing::info;

use crate::chapter::ChapterNumber;

/// What the run was doing when the event fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressAction {
    /// Looking up the catalog page.
    Check,
    /// Fetching a chapter.
    Download,
    /// Post-processing downloaded files.
    Cleanup,
    /// Scheduling chapters.
    Queue,
}

/// Whether the event concerns a whole collection or one chapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressTarget {
    Series,
    Chapter,
}

/// The transition being reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressKind {
    Start,
    End,
    Missing,
    Removed,
    /// The run switched to per-page fetching. Fired once per run.
    Fallback,
    Add,
}

/// One progress notification.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    pub action: ProgressAction,
    pub target: ProgressTarget,
    #[serde(rename = "type")]
    pub kind: ProgressKind,
    pub collection_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chapter: Option<ChapterNumber>,
    /// Chapters added to the queue (only set on `queue`/`add`).
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub new_chapters: Vec<ChapterNumber>,
}

impl ProgressEvent {
    /// Event about a whole collection.
    #[must_use]
    pub fn series(action: ProgressAction, kind: ProgressKind, collection_id: &str) -> Self {
        Self {
            action,
            target: ProgressTarget::Series,
            kind,
            collection_id: collection_id.to_string(),
            chapter: None,
            new_chapters: Vec::new(),
        }
    }

    /// Event about a single chapter.
    #[must_use]
    pub fn chapter(
        action: ProgressAction,
        kind: ProgressKind,
        collection_id: &str,
        chapter: ChapterNumber,
    ) -> Self {
        Self {
            action,
            target: ProgressTarget::Chapter,
            kind,
            collection_id: collection_id.to_string(),
            chapter: Some(chapter),
            new_chapters: Vec::new(),
        }
    }

    /// `queue`/`add` event listing the chapters scheduled for `collection_id`.
    #[must_use]
    pub fn queued(collection_id: &str, chapters: Vec<ChapterNumber>) -> Self {
        Self {
            new_chapters: chapters,
            ..Self::series(ProgressAction::Queue, ProgressKind::Add, collection_id)
        }
    }
}

/// Consumer of progress events.
pub trait ProgressSink: Send + Sync {
    /// Receives one event. Called concurrently from chapter tasks.
    fn notify(&self, event: ProgressEvent);
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullProgressSink;

impl ProgressSink for NullProgressSink {
    fn notify(&self, _event: ProgressEvent) {}
}

/// Logs every event as a structured `info` record.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingProgressSink;

impl ProgressSink for TracingProgressSink {
    fn notify(&self, event: ProgressEvent) {
        let chapter = event.chapter.map(|c| c.to_string());
        info!(
            action = ?event.action,
            target = ?event.target,
            kind = ?event.kind,
            collection = %event.collection_id,
            chapter = chapter.as_deref().unwrap_or("-"),
            queued = event.new_chapters.len(),
            "progress"
        );
    }
}

/// Records events in arrival order.
#[derive(Debug, Default)]
pub struct CollectingProgressSink {
    events: Mutex<Vec<ProgressEvent>>,
}

impl CollectingProgressSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the events received so far.
    #[must_use]
    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// Number of received events of the given kind.
    #[must_use]
    pub fn count(&self, kind: ProgressKind) -> usize {
        self.events
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .iter()
            .filter(|e| e.kind == kind)
            .count()
    }
}

impl ProgressSink for CollectingProgressSink {
    fn notify(&self, event: ProgressEvent) {
        self.events
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(event);
    }
}
