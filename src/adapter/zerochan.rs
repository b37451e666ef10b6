//! Zerochan adapter: HTML tag listings, one image per entry.
//!
//! Listing: `GET {base}/{tag}` (page 1) or `{base}/{tag}?p={page}`; entry ids
//! are the `data-id` attributes inside the `medium-thumbs` list.
//! Entry: `GET {base}/{id}`; the full-size URL is `contentUrl` in the page's
//! `application/ld+json` block.

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;
use tracing::{debug, instrument, warn};

use super::{
    Item, Listing, Locator, Query, SiteAdapter, absolutize_url, compile_static_regex,
    normalize_base_url,
};
use crate::download::{DownloadError, HttpClient};

const DEFAULT_BASE_URL: &str = "https://www.zerochan.net";

static THUMBS_BLOCK_RE: LazyLock<Regex> = LazyLock::new(|| {
    compile_static_regex(
        r#"(?is)<ul[^>]*\bclass\s*=\s*["'][^"']*\bmedium-thumbs\b[^"']*["'][^>]*>(.*?)</ul>"#,
    )
});
static ENTRY_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r#"(?is)<li\b[^>]*\bdata-id\s*=\s*["']?(\d+)"#));
static LD_JSON_RE: LazyLock<Regex> = LazyLock::new(|| {
    compile_static_regex(
        r#"(?is)<script[^>]*\btype\s*=\s*["']application/ld\+json["'][^>]*>(.*?)</script>"#,
    )
});

/// Listing-based adapter for zerochan.net.
#[derive(Debug, Clone)]
pub struct ZerochanAdapter {
    client: HttpClient,
    base_url: String,
}

impl ZerochanAdapter {
    /// Adapter against the public site.
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
        }
    }

    fn listing_url(&self, query: &Query, page: u32) -> String {
        let tag = query
            .term()
            .split_whitespace()
            .map(|word| urlencoding::encode(word).into_owned())
            .collect::<Vec<_>>()
            .join("+");
        if page > 1 {
            format!("{}/{tag}?p={page}", self.base_url)
        } else {
            format!("{}/{tag}", self.base_url)
        }
    }

    fn entry_url(&self, item: &Item) -> String {
        format!("{}/{}", self.base_url, item.id())
    }

    async fn fetch_listing(
        &self,
        query: &Query,
        page: u32,
        remaining: usize,
    ) -> Result<Listing, DownloadError> {
        let html = self.client.get_text(&self.listing_url(query, page), None).await?;
        Ok(Listing::from_ids(parse_entry_ids(&html), remaining))
    }

    async fn fetch_locators(&self, item: &Item) -> Result<Vec<Locator>, DownloadError> {
        let url = self.entry_url(item);
        let html = self.client.get_text(&url, None).await?;
        Ok(parse_content_urls(&html)
            .into_iter()
            .filter_map(|raw| absolutize_url(&raw, &url))
            .take(1)
            .map(|media| Locator::new(media, item.clone()))
            .collect())
    }
}

#[async_trait]
impl SiteAdapter for ZerochanAdapter {
    fn name(&self) -> &'static str {
        "zerochan"
    }

    #[instrument(skip(self, query), fields(adapter = "zerochan", term = %query.term()))]
    async fn discover_page(&self, query: &Query, page: u32, remaining: usize) -> Listing {
        match self.fetch_listing(query, page, remaining).await {
            Ok(listing) => {
                debug!(found = listing.page_size, taken = listing.items.len(), "listing parsed");
                listing
            }
            Err(e) => {
                warn!(error = %e, "listing fetch failed");
                Listing::empty()
            }
        }
    }

    #[instrument(skip(self), fields(adapter = "zerochan", item = %item))]
    async fn extract_locators(&self, item: &Item) -> Vec<Locator> {
        match self.fetch_locators(item).await {
            Ok(locators) => {
                if locators.is_empty() {
                    warn!("no contentUrl on entry page");
                }
                locators
            }
            Err(e) => {
                warn!(error = %e, "entry fetch failed");
                Vec::new()
            }
        }
    }

    fn referer_for(&self, item: &Item) -> Option<String> {
        Some(self.entry_url(item))
    }
}

/// Entry ids in page order from the `medium-thumbs` list. Empty if the list is missing.
fn parse_entry_ids(html: &str) -> Vec<Item> {
    let Some(block) = THUMBS_BLOCK_RE.captures(html).and_then(|c| c.get(1)) else {
        return Vec::new();
    };
    ENTRY_ID_RE
        .captures_iter(block.as_str())
        .filter_map(|c| c.get(1))
        .map(|m| Item::from(m.as_str()))
        .collect()
}

/// Every `contentUrl` found in the page's JSON-LD blocks.
fn parse_content_urls(html: &str) -> Vec<String> {
    let mut urls = Vec::new();
    for caps in LD_JSON_RE.captures_iter(html) {
        let Some(raw) = caps.get(1) else { continue };
        let Ok(value) = serde_json::from_str::<Value>(raw.as_str().trim()) else {
            debug!("skipping unparseable ld+json block");
            continue;
        };
        collect_content_urls(&value, &mut urls);
    }
    urls
}

fn collect_content_urls(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::Object(map) => {
            if let Some(Value::String(url)) = map.get("contentUrl") {
                out.push(url.clone());
            }
        }
        Value::Array(entries) => {
            for entry in entries {
                collect_content_urls(entry, out);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::download::{HttpClientConfig, RetryPolicy};
    use crate::test_support::socket_guard::start_mock_server_or_skip;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, ResponseTemplate};

    const LISTING_HTML: &str = r#"
        <html><body>
        <ul class="pagination"><li data-id="1">ignored</li></ul>
        <ul id="thumbs2" class="medium-thumbs ">
            <li class="" data-id="3001"><a href="/3001">a</a></li>
            <li class="" data-id="3002"><a href="/3002">b</a></li>
            <li class="" data-id="3001"><a href="/3001">dup</a></li>
            <li class="" data-id="3003"><a href="/3003">c</a></li>
        </ul>
        </body></html>"#;

    fn client() -> HttpClient {
        HttpClient::new(HttpClientConfig::default().with_retry_policy(RetryPolicy::new(
            1,
            Duration::from_millis(1),
            Duration::from_millis(1),
            2.0,
        )))
        .unwrap()
    }

    fn entry_html(content_url: &str) -> String {
        format!(
            r#"<html><head><script type="application/ld+json">
            {{"@context":"https://schema.org","@type":"ImageObject","contentUrl":"{content_url}"}}
            </script></head></html>"#
        )
    }

    #[test]
    fn test_parse_entry_ids_scoped_to_thumbs_list() {
        let ids = parse_entry_ids(LISTING_HTML);
        let ids: Vec<&str> = ids.iter().map(Item::id).collect();
        assert_eq!(ids, vec!["3001", "3002", "3001", "3003"]);
    }

    #[test]
    fn test_parse_entry_ids_missing_list() {
        assert!(parse_entry_ids("<html><p>No entries found</p></html>").is_empty());
    }

    #[test]
    fn test_parse_content_urls_object_and_array() {
        assert_eq!(
            parse_content_urls(&entry_html("https://static.zerochan.net/a.full.1.jpg")),
            vec!["https://static.zerochan.net/a.full.1.jpg"]
        );
        let array = r#"<script type="application/ld+json">[{"contentUrl":"x.png"},{"name":"n"}]</script>"#;
        assert_eq!(parse_content_urls(array), vec!["x.png"]);
        assert!(parse_content_urls("<script type=\"application/ld+json\">{broken</script>").is_empty());
    }

    #[test]
    fn test_listing_url_paging_and_encoding() {
        let adapter = ZerochanAdapter::with_base_url(client(), "https://z.test/");
        let query = Query::new("Hatsune Miku", 5, 1).unwrap();
        assert_eq!(adapter.listing_url(&query, 1), "https://z.test/Hatsune+Miku");
        assert_eq!(adapter.listing_url(&query, 3), "https://z.test/Hatsune+Miku?p=3");
    }

    #[tokio::test]
    async fn test_discover_page_dedups_and_caps() {
        let Some(mock_server) = start_mock_server_or_skip().await else {
            return;
        };
        Mock::given(method("GET"))
            .and(path("/Landscape"))
            .and(query_param("p", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_string(LISTING_HTML))
            .mount(&mock_server)
            .await;

        let adapter = ZerochanAdapter::with_base_url(client(), mock_server.uri());
        let query = Query::new("Landscape", 10, 1).unwrap();
        let listing = adapter.discover_page(&query, 2, 2).await;
        assert_eq!(listing.items, vec![Item::from("3001"), Item::from("3002")]);
        assert_eq!(listing.page_size, 3);
        assert_eq!(adapter.next_page(2, &listing), 2);
    }

    #[tokio::test]
    async fn test_discover_page_error_is_empty() {
        let Some(mock_server) = start_mock_server_or_skip().await else {
            return;
        };
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&mock_server)
            .await;

        let adapter = ZerochanAdapter::with_base_url(client(), mock_server.uri());
        let query = Query::new("Nothing", 10, 1).unwrap();
        assert!(adapter.discover_page(&query, 1, 10).await.is_empty());
    }

    #[tokio::test]
    async fn test_extract_locators_reads_content_url() {
        let Some(mock_server) = start_mock_server_or_skip().await else {
            return;
        };
        Mock::given(method("GET"))
            .and(path("/3001"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string(entry_html("/full/3001.png")),
            )
            .mount(&mock_server)
            .await;

        let adapter = ZerochanAdapter::with_base_url(client(), mock_server.uri());
        let item = Item::from("3001");
        let locators = adapter.extract_locators(&item).await;
        assert_eq!(locators.len(), 1);
        assert_eq!(locators[0].url, format!("{}/full/3001.png", mock_server.uri()));
        assert_eq!(locators[0].item, item);
        assert_eq!(
            adapter.referer_for(&item),
            Some(format!("{}/3001", mock_server.uri()))
        );
    }

    #[tokio::test]
    async fn test_extract_locators_failure_is_empty() {
        let Some(mock_server) = start_mock_server_or_skip().await else {
            return;
        };
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html></html>"))
            .mount(&mock_server)
            .await;

        let adapter = ZerochanAdapter::with_base_url(client(), mock_server.uri());
        assert!(adapter.extract_locators(&Item::from("1")).await.is_empty());
    }
}
