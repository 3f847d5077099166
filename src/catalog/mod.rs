//! Catalog access: loading catalog pages and resolving chapter links.
//!
//! The markup of the catalog site is not under our control, so everything
//! that depends on it sits behind the narrow [`ChapterResolver`] capability.
//! The orchestrator only ever asks "given this page, where is chapter N?" and
//! "which chapters does this page list?"; any markup library can answer.
//!
//! # Architecture
//!
//! - [`PageLoader`] - Async trait that fetches a page (network + decode)
//! - [`HttpPageLoader`] - Reference loader on top of [`HttpClient`](crate::download::HttpClient)
//! - [`ChapterResolver`] - Sync trait answering link/listing/page queries on a loaded page
//! - [`HtmlChapterResolver`] - CSS-selector implementation for the default catalog
//! - [`catalog_url`] - Derives a collection's catalog page URL

mod error;
mod html;
mod loader;

pub use error::CatalogError;
pub use html::HtmlChapterResolver;
pub use loader::HttpPageLoader;

use async_trait::async_trait;
use url::Url;

use crate::chapter::ChapterNumber;

/// Base URL of the default catalog.
pub const DEFAULT_CATALOG_BASE_URL: &str = "http://starkana.jp/manga/";

/// A loaded catalog page.
///
/// Only the raw markup is kept; resolvers parse it on demand so the page can
/// be shared across worker tasks.
#[derive(Debug, Clone)]
pub struct CatalogPage {
    url: String,
    html: String,
}

impl CatalogPage {
    /// Wraps markup fetched from `url`.
    pub fn new(url: impl Into<String>, html: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            html: html.into(),
        }
    }

    /// URL the page was loaded from.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Raw markup.
    #[must_use]
    pub fn html(&self) -> &str {
        &self.html
    }

    /// Resolves a possibly relative link found on this page.
    ///
    /// Returns the link unchanged when the page URL cannot serve as a base.
    #[must_use]
    pub fn absolutize(&self, link: &str) -> String {
        Url::parse(&self.url)
            .and_then(|base| base.join(link))
            .map_or_else(|_| link.to_string(), String::from)
    }
}

/// Outcome of looking a chapter up on the catalog page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkLookup {
    /// The chapter has a download link.
    Found {
        /// Absolute download URL.
        url: String,
    },
    /// The page does not list the chapter.
    Missing,
    /// The page explicitly marks the chapter as removed.
    Removed,
}

/// One chapter row of a catalog listing.
#[derive(Debug, Clone, PartialEq)]
pub struct ChapterListing {
    /// Chapter number.
    pub chapter: ChapterNumber,
    /// Download link, when the row carries one.
    pub url: Option<String>,
}

impl ChapterListing {
    /// Creates a listing entry.
    #[must_use]
    pub fn new(chapter: ChapterNumber, url: Option<String>) -> Self {
        Self { chapter, url }
    }
}

/// Loads pages from the catalog site.
#[async_trait]
pub trait PageLoader: Send + Sync {
    /// Fetches and decodes the page at `url`.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::Load`] when the page cannot be fetched.
    async fn load(&self, url: &str) -> Result<CatalogPage, CatalogError>;
}

/// Answers structural questions about loaded catalog pages.
pub trait ChapterResolver: Send + Sync {
    /// Finds the download link of `chapter` on a collection page.
    fn find_chapter_link(&self, page: &CatalogPage, chapter: ChapterNumber) -> LinkLookup;

    /// Highest chapter number listed on a collection page, if any.
    fn find_latest_chapter_number(&self, page: &CatalogPage) -> Option<u64>;

    /// Every chapter listed on a collection page, in page order.
    fn list_chapters(&self, page: &CatalogPage) -> Vec<ChapterListing>;

    /// Number of pages of a chapter, read from the chapter's reader page.
    fn page_count(&self, chapter_page: &CatalogPage) -> Option<usize>;

    /// Image source of a single reader page.
    fn page_image_src(&self, reader_page: &CatalogPage) -> Option<String>;

    /// Looks up every chapter of `chapters` on one collection page, in order.
    fn find_chapter_links(&self, page: &CatalogPage, chapters: &[ChapterNumber]) -> Vec<LinkLookup> {
        chapters
            .iter()
            .map(|&chapter| self.find_chapter_link(page, chapter))
            .collect()
    }

    /// Chapters listed after `last_known`, ascending.
    ///
    /// A collection with no progress yet (`last_known < 1`) gets every listed chapter.
    fn chapters_after(&self, page: &CatalogPage, last_known: ChapterNumber) -> Vec<ChapterListing> {
        let mut listings: Vec<ChapterListing> = self
            .list_chapters(page)
            .into_iter()
            .filter(|listing| last_known.value() < 1.0 || listing.chapter > last_known)
            .collect();
        listings.sort_by(|a, b| a.chapter.cmp(&b.chapter));
        listings
    }
}

/// Derives the catalog page URL of a collection.
///
/// An explicit source ref is appended to `base` verbatim. Otherwise the
/// catalog files collections under their upper-cased first letter (`0` for
/// anything that does not start with an ASCII letter), with whitespace turned
/// into `_` and apostrophes dropped: `One Piece` -> `O/One_Piece`.
#[must_use]
pub fn catalog_url(base: &str, collection_id: &str, source_ref: Option<&str>) -> String {
    let base = if base.ends_with('/') {
        base.to_string()
    } else {
        format!("{base}/")
    };

    if let Some(source_ref) = source_ref {
        return format!("{base}{}", source_ref.trim_start_matches('/'));
    }

    let category = match collection_id.chars().next() {
        Some(first) if first.is_ascii_alphabetic() => first.to_ascii_uppercase(),
        _ => '0',
    };

    let mut slug = String::with_capacity(collection_id.len());
    for ch in collection_id.chars() {
        match ch {
            '\'' => {}
            c if c.is_whitespace() => slug.push('_'),
            c => slug.push(c),
        }
    }

    format!("{base}{category}/{slug}")
}

/// Reader page URL of a chapter (`<catalog>/chapter/<n>`).
#[must_use]
pub fn chapter_reader_url(catalog_url: &str, chapter: ChapterNumber) -> String {
    format!("{}/chapter/{chapter}", catalog_url.trim_end_matches('/'))
}

/// Reader URL of a single page of a chapter (`<chapter reader>/<page>`).
#[must_use]
pub fn page_reader_url(chapter_reader_url: &str, page: usize) -> String {
    format!("{}/{page}", chapter_reader_url.trim_end_matches('/'))
}
