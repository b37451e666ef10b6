//! Site adapters: how to page through a tag search and turn results into media URLs.
//!
//! # Architecture
//!
//! - [`SiteAdapter`] - async trait each site implements
//! - [`Query`] - what the run is looking for
//! - [`Item`] - one listing entry (site-defined id)
//! - [`Locator`] - one downloadable media URL and the item it came from
//! - [`Listing`] - one page of discovered items
//!
//! Adapters never return errors to the pipeline. Any failure while discovering
//! or extracting is logged and surfaces as an empty result; an empty listing
//! ends the run.

mod danbooru;
mod pixiv;
mod zerochan;

pub use danbooru::{DanbooruAdapter, PAGE_LIMIT as DANBOORU_PAGE_LIMIT};
pub use pixiv::{PIXIV_COOKIE_DOMAIN, PIXIV_LOGIN_URL, PixivAdapter};
pub use zerochan::ZerochanAdapter;

use std::fmt;
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use url::Url;

/// What a run is searching for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    term: String,
    target_count: u32,
    start_page: u32,
}

/// Rejected [`Query`] construction.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueryError {
    /// Search term was empty or whitespace.
    #[error("search term must not be empty")]
    EmptyTerm,
    /// Target count was zero.
    #[error("target count must be greater than 0")]
    ZeroTarget,
    /// Start page was zero.
    #[error("start page must be 1 or greater")]
    ZeroStartPage,
}

impl Query {
    /// Creates a validated query.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError`] for an empty term, a zero target or a zero start page.
    pub fn new(
        term: impl Into<String>,
        target_count: u32,
        start_page: u32,
    ) -> Result<Self, QueryError> {
        let term = term.into().trim().to_string();
        if term.is_empty() {
            return Err(QueryError::EmptyTerm);
        }
        if target_count == 0 {
            return Err(QueryError::ZeroTarget);
        }
        if start_page == 0 {
            return Err(QueryError::ZeroStartPage);
        }
        Ok(Self {
            term,
            target_count,
            start_page,
        })
    }

    /// The search term, trimmed.
    #[must_use]
    pub fn term(&self) -> &str {
        &self.term
    }

    /// How many items the run should process in total.
    #[must_use]
    pub fn target_count(&self) -> u32 {
        self.target_count
    }

    /// First page to request on a fresh run.
    #[must_use]
    pub fn start_page(&self) -> u32 {
        self.start_page
    }

    /// The term percent-encoded for a URL path segment or query value.
    #[must_use]
    pub fn encoded_term(&self) -> String {
        urlencoding::encode(&self.term).into_owned()
    }
}

/// One listing entry, identified by its site-defined id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Item(String);

impl Item {
    /// Wraps a site id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The raw id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Item {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<u64> for Item {
    fn from(id: u64) -> Self {
        Self(id.to_string())
    }
}

impl From<&str> for Item {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// A downloadable media URL plus the item that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Locator {
    /// Absolute media URL.
    pub url: String,
    /// Item this locator was extracted from.
    pub item: Item,
}

impl Locator {
    /// Creates a locator.
    #[must_use]
    pub fn new(url: impl Into<String>, item: Item) -> Self {
        Self {
            url: url.into(),
            item,
        }
    }
}

/// One page of discovery results.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Listing {
    /// Items in server order, capped at the remaining budget.
    pub items: Vec<Item>,
    /// Distinct entries the page offered before capping.
    pub page_size: usize,
}

impl Listing {
    /// A listing that signals "no more content".
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Builds a listing from ids in server order: drops duplicates, then caps at `remaining`.
    #[must_use]
    pub fn from_ids<I>(ids: I, remaining: usize) -> Self
    where
        I: IntoIterator<Item = Item>,
    {
        let mut seen = std::collections::HashSet::new();
        let distinct: Vec<Item> = ids
            .into_iter()
            .filter(|item| seen.insert(item.clone()))
            .collect();
        let page_size = distinct.len();
        let items = distinct.into_iter().take(remaining).collect();
        Self { items, page_size }
    }

    /// True when the page yielded nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// True when every distinct entry on the page was taken.
    #[must_use]
    pub fn consumed_page(&self) -> bool {
        self.items.len() >= self.page_size
    }
}

/// Per-site discovery and extraction.
#[async_trait]
pub trait SiteAdapter: Send + Sync {
    /// Short site name for logs.
    fn name(&self) -> &'static str;

    /// Fetches listing page `page` (1-based) and returns its items, capped at `remaining`.
    async fn discover_page(&self, query: &Query, page: u32, remaining: usize) -> Listing;

    /// Resolves one item into zero or more media locators.
    async fn extract_locators(&self, item: &Item) -> Vec<Locator>;

    /// Referer sent when downloading this item's locators.
    fn referer_for(&self, item: &Item) -> Option<String>;

    /// Page to request next round.
    ///
    /// Advances once the whole page has been consumed; otherwise stays so a
    /// later resume picks up the unconsumed tail of the same page.
    fn next_page(&self, page: u32, listing: &Listing) -> u32 {
        if listing.consumed_page() {
            page.saturating_add(1)
        } else {
            page
        }
    }

    /// Whether discovery needs an authenticated session.
    fn requires_auth(&self) -> bool {
        false
    }
}

/// Compiles a regex at static init; panics on invalid pattern.
pub(crate) fn compile_static_regex(pattern: &str) -> Regex {
    Regex::new(pattern).unwrap_or_else(|e| panic!("invalid static regex '{pattern}': {e}"))
}

static SCHEME_RE: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r"^[A-Za-z][A-Za-z0-9+.\-]*:"));

/// Resolves a possibly relative URL string against `base`.
///
/// `//host/...` becomes `https://host/...`; absolute URLs pass through.
#[must_use]
pub(crate) fn absolutize_url(value: &str, base: &str) -> Option<String> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    if value.starts_with("//") {
        return Some(format!("https:{value}"));
    }
    if SCHEME_RE.is_match(value) {
        return Url::parse(value).ok().map(|u| u.to_string());
    }
    Url::parse(base).ok()?.join(value).ok().map(|u| u.to_string())
}

/// Trims a configured base URL so `format!("{base}/path")` never doubles slashes.
pub(crate) fn normalize_base_url(base_url: impl Into<String>) -> String {
    base_url.into().trim_end_matches('/').to_string()
}
