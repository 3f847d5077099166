//! CSS-selector chapter resolver for the default catalog markup.
//!
//! Page structure relied upon:
//! - chapter rows are table cells under `#inner_page` whose text ends with
//!   `chapter <n>`, with the download anchor in the following cell;
//! - a removed chapter has no row and the first `#inner_page span` reads `Removed`;
//! - listing rows carry an `a.download-link` (number) and an `a.odi` (link);
//! - reader pages expose the page count in `#bc2 > strong` and the image in `#pic img`.

use scraper::{ElementRef, Html, Selector};
use tracing::debug;

use super::{CatalogError, CatalogPage, ChapterListing, ChapterResolver, LinkLookup};
use crate::chapter::{ChapterNumber, parse_leading_number};

const CHAPTER_DELIMITER: &str = "chapter ";
const REMOVED_MARKER: &str = "Removed";

const CELL_SELECTOR: &str = "#inner_page td";
const ROW_SELECTOR: &str = "#inner_page tr";
const STATUS_SELECTOR: &str = "#inner_page span";
const ANCHOR_SELECTOR: &str = "a";
const LISTING_NUMBER_SELECTOR: &str = "td a.download-link";
const LISTING_LINK_SELECTOR: &str = "td a.odi";
const PAGE_COUNT_SELECTOR: &str = "#bc2 > strong";
const PAGE_IMAGE_SELECTOR: &str = "#pic img";

fn compile(selector: &'static str) -> Result<Selector, CatalogError> {
    Selector::parse(selector).map_err(|err| CatalogError::Selector {
        selector,
        reason: format!("{err:?}"),
    })
}

fn element_text(element: &ElementRef<'_>) -> String {
    element.text().collect::<String>().trim().to_string()
}

/// Chapter number following the last `chapter ` in `text`.
fn chapter_in_text(text: &str) -> Option<ChapterNumber> {
    let start = text.rfind(CHAPTER_DELIMITER)? + CHAPTER_DELIMITER.len();
    parse_leading_number(&text[start..])
}

/// [`ChapterResolver`] over the default catalog's HTML.
#[derive(Debug)]
pub struct HtmlChapterResolver {
    cell: Selector,
    row: Selector,
    status: Selector,
    anchor: Selector,
    listing_number: Selector,
    listing_link: Selector,
    page_count: Selector,
    page_image: Selector,
}

impl HtmlChapterResolver {
    /// Creates the resolver, compiling its selectors.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::Selector`] if a built-in selector fails to compile.
    pub fn new() -> Result<Self, CatalogError> {
        Ok(Self {
            cell: compile(CELL_SELECTOR)?,
            row: compile(ROW_SELECTOR)?,
            status: compile(STATUS_SELECTOR)?,
            anchor: compile(ANCHOR_SELECTOR)?,
            listing_number: compile(LISTING_NUMBER_SELECTOR)?,
            listing_link: compile(LISTING_LINK_SELECTOR)?,
            page_count: compile(PAGE_COUNT_SELECTOR)?,
            page_image: compile(PAGE_IMAGE_SELECTOR)?,
        })
    }

    fn is_removed(&self, document: &Html) -> bool {
        document
            .select(&self.status)
            .next()
            .is_some_and(|span| element_text(&span) == REMOVED_MARKER)
    }

    fn lookup(&self, document: &Html, page: &CatalogPage, chapter: ChapterNumber) -> LinkLookup {
        let label = format!("{CHAPTER_DELIMITER}{chapter}");

        let href = document
            .select(&self.cell)
            .find(|cell| element_text(cell).ends_with(&label))
            .and_then(|cell| cell.next_siblings().find_map(ElementRef::wrap))
            .and_then(|next| next.select(&self.anchor).next())
            .and_then(|anchor| anchor.value().attr("href").map(str::to_string));

        match href {
            Some(href) => LinkLookup::Found {
                url: page.absolutize(&href),
            },
            None if self.is_removed(document) => {
                debug!(%chapter, page = page.url(), "chapter marked removed");
                LinkLookup::Removed
            }
            None => {
                debug!(%chapter, page = page.url(), "chapter not listed");
                LinkLookup::Missing
            }
        }
    }
}

impl ChapterResolver for HtmlChapterResolver {
    fn find_chapter_link(&self, page: &CatalogPage, chapter: ChapterNumber) -> LinkLookup {
        let document = Html::parse_document(page.html());
        self.lookup(&document, page, chapter)
    }

    fn find_chapter_links(&self, page: &CatalogPage, chapters: &[ChapterNumber]) -> Vec<LinkLookup> {
        let document = Html::parse_document(page.html());
        chapters
            .iter()
            .map(|&chapter| self.lookup(&document, page, chapter))
            .collect()
    }

    fn find_latest_chapter_number(&self, page: &CatalogPage) -> Option<u64> {
        let document = Html::parse_document(page.html());
        let text = document
            .select(&self.cell)
            .map(|cell| element_text(&cell))
            .find(|text| text.contains(CHAPTER_DELIMITER.trim_end()))?;

        let start = text.find(CHAPTER_DELIMITER)? + CHAPTER_DELIMITER.len();
        let digits: String = text[start..]
            .chars()
            .take_while(char::is_ascii_digit)
            .collect();
        digits.parse().ok()
    }

    fn list_chapters(&self, page: &CatalogPage) -> Vec<ChapterListing> {
        let document = Html::parse_document(page.html());
        document
            .select(&self.row)
            .filter_map(|row| {
                let number = row.select(&self.listing_number).next()?;
                let chapter = chapter_in_text(&element_text(&number))?;
                let url = row
                    .select(&self.listing_link)
                    .next()
                    .and_then(|anchor| anchor.value().attr("href"))
                    .map(|href| page.absolutize(href));
                Some(ChapterListing::new(chapter, url))
            })
            .collect()
    }

    fn page_count(&self, chapter_page: &CatalogPage) -> Option<usize> {
        let document = Html::parse_document(chapter_page.html());
        let strong = document.select(&self.page_count).next()?;
        element_text(&strong).parse().ok()
    }

    fn page_image_src(&self, reader_page: &CatalogPage) -> Option<String> {
        let document = Html::parse_document(reader_page.html());
        document
            .select(&self.page_image)
            .next()
            .and_then(|img| img.value().attr("src"))
            .map(|src| reader_page.absolutize(src))
    }
}
