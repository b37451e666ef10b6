//! Pixiv adapter: tag-search JSON API, several images per work, login required.
//!
//! Search: `GET {base}/ajax/search/illustrations/{tag}?word={tag}&p={page}`,
//! ids from `body.illust.data[].id` (ad slots carry no id and are skipped).
//! Work pages: `GET {base}/ajax/illust/{id}/pages`, one locator per
//! `body[].urls.original`. The image CDN rejects requests without a pixiv
//! referer, so downloads carry the work page as referer.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, instrument, warn};

use super::{Item, Listing, Locator, Query, SiteAdapter, normalize_base_url};
use crate::download::{DownloadError, HttpClient};

const DEFAULT_BASE_URL: &str = "https://www.pixiv.net";

/// Sign-in page for the interactive login flow.
pub const PIXIV_LOGIN_URL: &str = "https://accounts.pixiv.net/login";

/// Cookie domain for pixiv sessions.
pub const PIXIV_COOKIE_DOMAIN: &str = "pixiv.net";

#[derive(Debug, Deserialize)]
struct ApiEnvelope<T> {
    #[serde(default)]
    error: bool,
    #[serde(default)]
    message: String,
    body: Option<T>,
}

#[derive(Debug, Deserialize)]
struct SearchBody {
    illust: SearchSection,
}

#[derive(Debug, Deserialize)]
struct SearchSection {
    #[serde(default)]
    data: Vec<SearchEntry>,
}

#[derive(Debug, Deserialize)]
struct SearchEntry {
    #[serde(default)]
    id: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct WorkPage {
    urls: PageUrls,
}

#[derive(Debug, Deserialize)]
struct PageUrls {
    original: Option<String>,
}

/// Tag-search adapter for pixiv.net.
#[derive(Debug, Clone)]
pub struct PixivAdapter {
    client: HttpClient,
    base_url: String,
}

impl PixivAdapter {
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

    fn search_url(&self, query: &Query, page: u32) -> String {
        let tag = query.encoded_term();
        format!(
            "{}/ajax/search/illustrations/{tag}?word={tag}&order=date_d&mode=all&p={page}&s_mode=s_tag&type=illust_and_ugoira&lang=en",
            self.base_url
        )
    }

    fn search_referer(&self, query: &Query, page: u32) -> String {
        format!(
            "{}/en/tags/{}/illustrations?p={page}",
            self.base_url,
            query.encoded_term()
        )
    }

    fn work_url(&self, item: &Item) -> String {
        format!("{}/en/artworks/{}", self.base_url, item.id())
    }

    async fn fetch_listing(
        &self,
        query: &Query,
        page: u32,
        remaining: usize,
    ) -> Result<Listing, DownloadError> {
        let url = self.search_url(query, page);
        let envelope: ApiEnvelope<SearchBody> = self
            .client
            .get_json(&url, Some(&self.search_referer(query, page)))
            .await?;
        let body = unwrap_envelope(&url, envelope)?;
        let ids = body
            .illust
            .data
            .into_iter()
            .filter_map(|entry| entry.id.and_then(id_to_item));
        Ok(Listing::from_ids(ids, remaining))
    }

    async fn fetch_locators(&self, item: &Item) -> Result<Vec<Locator>, DownloadError> {
        let url = format!("{}/ajax/illust/{}/pages?lang=en", self.base_url, item.id());
        let envelope: ApiEnvelope<Vec<WorkPage>> = self
            .client
            .get_json(&url, Some(&self.work_url(item)))
            .await?;
        let pages = unwrap_envelope(&url, envelope)?;
        Ok(pages
            .into_iter()
            .filter_map(|page| page.urls.original)
            .map(|original| Locator::new(original, item.clone()))
            .collect())
    }
}

#[async_trait]
impl SiteAdapter for PixivAdapter {
    fn name(&self) -> &'static str {
        "pixiv"
    }

    #[instrument(skip(self, query), fields(adapter = "pixiv", term = %query.term()))]
    async fn discover_page(&self, query: &Query, page: u32, remaining: usize) -> Listing {
        match self.fetch_listing(query, page, remaining).await {
            Ok(listing) => {
                debug!(found = listing.page_size, taken = listing.items.len(), "search parsed");
                listing
            }
            Err(e) => {
                warn!(error = %e, "search request failed");
                Listing::empty()
            }
        }
    }

    #[instrument(skip(self), fields(adapter = "pixiv", item = %item))]
    async fn extract_locators(&self, item: &Item) -> Vec<Locator> {
        self.fetch_locators(item).await.unwrap_or_else(|e| {
            warn!(error = %e, "work pages request failed");
            Vec::new()
        })
    }

    fn referer_for(&self, item: &Item) -> Option<String> {
        Some(self.work_url(item))
    }

    fn requires_auth(&self) -> bool {
        true
    }
}

fn unwrap_envelope<T>(url: &str, envelope: ApiEnvelope<T>) -> Result<T, DownloadError> {
    if envelope.error {
        return Err(DownloadError::decode(url, format!("API error: {}", envelope.message)));
    }
    envelope
        .body
        .ok_or_else(|| DownloadError::decode(url, "missing body"))
}

fn id_to_item(id: Value) -> Option<Item> {
    match id {
        Value::String(s) if !s.is_empty() => Some(Item::new(s)),
        Value::Number(n) => n.as_u64().map(Item::from),
        _ => None,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::download::{HttpClientConfig, RetryPolicy};
    use crate::test_support::socket_guard::start_mock_server_or_skip;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, ResponseTemplate};

    fn client() -> HttpClient {
        HttpClient::new(HttpClientConfig::default().with_retry_policy(RetryPolicy::new(
            1,
            Duration::from_millis(1),
            Duration::from_millis(1),
            2.0,
        )))
        .unwrap()
    }

    #[test]
    fn test_id_to_item_accepts_string_and_number() {
        assert_eq!(id_to_item(json!("123")), Some(Item::from("123")));
        assert_eq!(id_to_item(json!(456)), Some(Item::from("456")));
        assert_eq!(id_to_item(json!("")), None);
        assert_eq!(id_to_item(json!(null)), None);
    }

    #[test]
    fn test_requires_auth() {
        assert!(PixivAdapter::new(client()).requires_auth());
    }

    #[tokio::test]
    async fn test_discover_page_skips_ads_and_sends_referer() {
        let Some(mock_server) = start_mock_server_or_skip().await else {
            return;
        };
        let referer = format!("{}/en/tags/cat/illustrations?p=1", mock_server.uri());
        Mock::given(method("GET"))
            .and(path("/ajax/search/illustrations/cat"))
            .and(query_param("p", "1"))
            .and(header("referer", referer.as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "error": false,
                "body": {"illust": {"data": [
                    {"id": "11"},
                    {"isAdContainer": true},
                    {"id": "12"},
                    {"id": "13"}
                ]}}
            })))
            .mount(&mock_server)
            .await;

        let adapter = PixivAdapter::with_base_url(client(), mock_server.uri());
        let query = Query::new("cat", 10, 1).unwrap();
        let listing = adapter.discover_page(&query, 1, 10).await;
        assert_eq!(
            listing.items,
            vec![Item::from("11"), Item::from("12"), Item::from("13")]
        );
        assert!(listing.consumed_page());
    }

    #[tokio::test]
    async fn test_discover_page_api_error_is_empty() {
        let Some(mock_server) = start_mock_server_or_skip().await else {
            return;
        };
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "error": true, "message": "login required", "body": []
            })))
            .mount(&mock_server)
            .await;

        let adapter = PixivAdapter::with_base_url(client(), mock_server.uri());
        let query = Query::new("cat", 10, 1).unwrap();
        assert!(adapter.discover_page(&query, 1, 10).await.is_empty());
    }

    #[tokio::test]
    async fn test_extract_locators_one_per_page() {
        let Some(mock_server) = start_mock_server_or_skip().await else {
            return;
        };
        Mock::given(method("GET"))
            .and(path("/ajax/illust/11/pages"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "error": false,
                "body": [
                    {"urls": {"original": "https://i.pximg.test/11_p0.png"}},
                    {"urls": {"original": "https://i.pximg.test/11_p1.png"}},
                    {"urls": {"original": null}}
                ]
            })))
            .mount(&mock_server)
            .await;

        let adapter = PixivAdapter::with_base_url(client(), mock_server.uri());
        let item = Item::from("11");
        let locators = adapter.extract_locators(&item).await;
        let urls: Vec<&str> = locators.iter().map(|l| l.url.as_str()).collect();
        assert_eq!(
            urls,
            vec!["https://i.pximg.test/11_p0.png", "https://i.pximg.test/11_p1.png"]
        );
        assert_eq!(
            adapter.referer_for(&item),
            Some(format!("{}/en/artworks/11", mock_server.uri()))
        );
    }

    #[tokio::test]
    async fn test_extract_locators_forbidden_is_empty() {
        let Some(mock_server) = start_mock_server_or_skip().await else {
            return;
        };
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&mock_server)
            .await;

        let adapter = PixivAdapter::with_base_url(client(), mock_server.uri());
        assert!(adapter.extract_locators(&Item::from("1")).await.is_empty());
    }
}
