//! Chapter Downloader Core Library
//!
//! This library provides the ingestion pipeline behind the `chapterdl` tool,
//! which fetches serialized chapter releases from a catalog site, unpacks them
//! and normalizes the resulting local file tree.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`plan`] - Job planning: which chapters a request should fetch
//! - [`catalog`] - Catalog page loading and chapter link resolution
//! - [`download`] - HTTP transport with timeout and status classification
//! - [`archive`] - Chapter archive extraction and compression
//! - [`fetch`] - Bounded-concurrency fetch orchestrator with per-page fallback
//! - [`dedup`] - Content-hash based credits/duplicate removal
//! - [`rename`] - Natural-order, collision-safe page renaming
//! - [`subscriptions`] - Followed collections and update planning
//! - [`pipeline`] - End-to-end run: plan, fetch, clean, rename
//! - [`progress`] - Lifecycle events pushed to an external sink

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod archive;
pub mod catalog;
pub mod chapter;
pub mod dedup;
pub mod download;
pub mod fetch;
pub mod pipeline;
pub mod plan;
pub mod progress;
pub mod rename;
pub mod subscriptions;
mod user_agent;

// Re-export commonly used types
pub use archive::{ArchiveCodec, ArchiveError, ZipCodec};
pub use catalog::{
    CatalogError, CatalogPage, ChapterListing, ChapterResolver, DEFAULT_CATALOG_BASE_URL,
    HtmlChapterResolver, HttpPageLoader, LinkLookup, PageLoader, catalog_url,
};
pub use chapter::ChapterNumber;
pub use dedup::{CleanOptions, CleanPlan, CleanReport, ContentDigest, DedupEngine, DedupError};
pub use download::{DownloadError, FailureClass, HttpClient, classify_error};
pub use fetch::{
    ChapterResult, ChapterStatus, DEFAULT_CONCURRENCY, DEFAULT_PAGE_CONCURRENCY, FallbackSignal,
    FetchError, FetchOptions, FetchOrchestrator, OutputFormat,
};
pub use pipeline::{Pipeline, PipelineError, PipelineOptions, PipelineReport};
pub use plan::{ChapterList, ChapterTask, FetchJob, FetchRequest, JobPlanner, OutputLayout, PlanError};
pub use progress::{
    CollectingProgressSink, NullProgressSink, ProgressAction, ProgressEvent, ProgressKind,
    ProgressSink, ProgressTarget, TracingProgressSink,
};
pub use rename::{RenameEntry, RenameError, RenameFailure, RenameNormalizer, RenameReport};
pub use subscriptions::{Subscription, SubscriptionError, SubscriptionStore, latest_local_chapter};
