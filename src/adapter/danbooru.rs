//! Danbooru adapter: JSON listing, one media file per post.
//!
//! Listing: `GET {base}/posts.json?tags={tag}&page={page}&limit={PAGE_LIMIT}`.
//! Extraction reads `file_url` from `GET {base}/posts/{id}.json`. When a
//! [`SharedBrowser`] is attached, extraction renders the post page instead
//! and takes the `src` of `img#image`, holding the browser lease only for
//! the render itself.

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use tracing::{debug, instrument, warn};

use super::{
    Item, Listing, Locator, Query, SiteAdapter, absolutize_url, compile_static_regex,
    normalize_base_url,
};
use crate::download::{DownloadError, HttpClient};
use crate::session::{BrowserError, SharedBrowser};

const DEFAULT_BASE_URL: &str = "https://danbooru.donmai.us";

/// Posts requested per listing page.
pub const PAGE_LIMIT: u32 = 20;

const IMAGE_SELECTOR: &str = "#image";

static IMAGE_TAG_RE: LazyLock<Regex> = LazyLock::new(|| {
    compile_static_regex(r#"(?is)<img\b[^>]*\bid\s*=\s*["']image["'][^>]*>"#)
});
static SRC_ATTR_RE: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r#"(?is)\bsrc\s*=\s*["']([^"']+)["']"#));

#[derive(Debug, Deserialize)]
struct PostSummary {
    id: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct PostDetail {
    #[serde(default)]
    file_url: Option<String>,
}

#[derive(Debug, thiserror::Error)]
enum ExtractError {
    #[error(transparent)]
    Http(#[from] DownloadError),
    #[error(transparent)]
    Browser(#[from] BrowserError),
}

/// Tag-search adapter for danbooru.donmai.us.
#[derive(Debug, Clone)]
pub struct DanbooruAdapter {
    client: HttpClient,
    base_url: String,
    browser: Option<SharedBrowser>,
}

impl DanbooruAdapter {
    /// Adapter against the public site, extracting through the JSON API.
    #[must_use]
    pub fn new(client: HttpClient) -> Self {
        Self::with_base_url(client, DEFAULT_BASE_URL)
    }

    /// Adapter against a custom base URL (for tests).
    #[must_use]
    pub fn with_base_url(client: HttpClient, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: normalize_base_url(base_url),
            browser: None,
        }
    }

    /// Extract by rendering post pages in `browser`.
    #[must_use]
    pub fn with_browser(mut self, browser: SharedBrowser) -> Self {
        self.browser = Some(browser);
        self
    }

    fn listing_url(&self, query: &Query, page: u32) -> String {
        format!(
            "{}/posts.json?tags={}&page={page}&limit={PAGE_LIMIT}",
            self.base_url,
            query.encoded_term()
        )
    }

    fn post_url(&self, item: &Item) -> String {
        format!("{}/posts/{}", self.base_url, item.id())
    }

    async fn fetch_listing(
        &self,
        query: &Query,
        page: u32,
        remaining: usize,
    ) -> Result<Listing, DownloadError> {
        let posts: Vec<PostSummary> = self
            .client
            .get_json(&self.listing_url(query, page), None)
            .await?;
        let ids = posts.into_iter().filter_map(|p| p.id).map(Item::from);
        Ok(Listing::from_ids(ids, remaining))
    }

    async fn fetch_file_url(&self, item: &Item) -> Result<Option<String>, ExtractError> {
        let post_url = self.post_url(item);
        if let Some(browser) = &self.browser {
            let render_url = post_url.clone();
            let html = browser
                .with_session(move |s| {
                    Box::pin(async move { s.render(&render_url, IMAGE_SELECTOR).await })
                })
                .await?;
            return Ok(parse_image_src(&html).and_then(|src| absolutize_url(&src, &post_url)));
        }

        let detail: PostDetail = self
            .client
            .get_json(&format!("{post_url}.json"), None)
            .await?;
        Ok(detail
            .file_url
            .and_then(|raw| absolutize_url(&raw, &post_url)))
    }
}

#[async_trait]
impl SiteAdapter for DanbooruAdapter {
    fn name(&self) -> &'static str {
        "danbooru"
    }

    #[instrument(skip(self, query), fields(adapter = "danbooru", term = %query.term()))]
    async fn discover_page(&self, query: &Query, page: u32, remaining: usize) -> Listing {
        match self.fetch_listing(query, page, remaining).await {
            Ok(listing) => {
                debug!(found = listing.page_size, taken = listing.items.len(), "posts listed");
                listing
            }
            Err(e) => {
                warn!(error = %e, "posts listing failed");
                Listing::empty()
            }
        }
    }

    #[instrument(skip(self), fields(adapter = "danbooru", item = %item))]
    async fn extract_locators(&self, item: &Item) -> Vec<Locator> {
        match self.fetch_file_url(item).await {
            Ok(Some(url)) => vec![Locator::new(url, item.clone())],
            Ok(None) => {
                // Restricted or deleted posts have no file_url.
                debug!("post has no downloadable file");
                Vec::new()
            }
            Err(e) => {
                warn!(error = %e, "post lookup failed");
                Vec::new()
            }
        }
    }

    fn referer_for(&self, item: &Item) -> Option<String> {
        Some(self.post_url(item))
    }
}

fn parse_image_src(html: &str) -> Option<String> {
    let tag = IMAGE_TAG_RE.find(html)?;
    SRC_ATTR_RE
        .captures(tag.as_str())
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().replace("&amp;", "&"))
}
