//! HTTP client factory shared by every stage of a run.
//!
//! One [`HttpClient`] is built per run and cloned into every task; clones share
//! the same connection pool and cookie jar. All GET helpers retry transient
//! failures according to the configured [`RetryPolicy`].

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use reqwest::Response;
use reqwest::cookie::Jar;
use reqwest::header::{
    ACCEPT, ACCEPT_LANGUAGE, CONTENT_TYPE, HeaderMap, HeaderValue, REFERER, RETRY_AFTER,
};
use serde::de::DeserializeOwned;
use tracing::{debug, info, instrument};
use url::Url;

use super::constants::{CONNECT_TIMEOUT_SECS, READ_TIMEOUT_SECS};
use super::error::DownloadError;
use super::retry::{FailureType, RetryDecision, RetryPolicy, classify_error, parse_retry_after};
use crate::user_agent::{
    ACCEPT_LANGUAGE as ACCEPT_LANGUAGE_VALUE, BROWSER_USER_AGENT, HTML_ACCEPT, JSON_ACCEPT,
    MEDIA_ACCEPT,
};

/// Default idle-connection pool size per host.
pub const DEFAULT_POOL_SIZE: usize = 20;

/// Knobs for building an [`HttpClient`].
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// Idle connections kept per host. Size this to the largest worker pool.
    pub pool_size: usize,
    /// TCP/TLS connect timeout.
    pub connect_timeout: Duration,
    /// Per-read timeout on response bodies.
    pub read_timeout: Duration,
    /// User-Agent sent on every request.
    pub user_agent: String,
    /// Referer sent when a call does not supply its own.
    pub default_referer: Option<String>,
    /// Retry behavior for transient failures.
    pub retry_policy: RetryPolicy,
    /// Cookie jar for authenticated sessions.
    pub cookie_jar: Option<Arc<Jar>>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            pool_size: DEFAULT_POOL_SIZE,
            connect_timeout: Duration::from_secs(CONNECT_TIMEOUT_SECS),
            read_timeout: Duration::from_secs(READ_TIMEOUT_SECS),
            user_agent: BROWSER_USER_AGENT.to_string(),
            default_referer: None,
            retry_policy: RetryPolicy::default(),
            cookie_jar: None,
        }
    }
}

impl HttpClientConfig {
    /// Sets the pool size (never below 1).
    #[must_use]
    pub fn with_pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size.max(1);
        self
    }

    /// Sets connect and read timeouts.
    #[must_use]
    pub fn with_timeouts(mut self, connect_timeout: Duration, read_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self.read_timeout = read_timeout;
        self
    }

    /// Sets the fallback referer.
    #[must_use]
    pub fn with_default_referer(mut self, referer: impl Into<String>) -> Self {
        self.default_referer = Some(referer.into());
        self
    }

    /// Sets the retry policy.
    #[must_use]
    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    /// Attaches a cookie jar.
    #[must_use]
    pub fn with_cookie_jar(mut self, cookie_jar: Arc<Jar>) -> Self {
        self.cookie_jar = Some(cookie_jar);
        self
    }
}

/// A fully-read response body.
#[derive(Debug, Clone)]
pub struct FetchedBody {
    /// Raw body bytes.
    pub bytes: Vec<u8>,
    /// `Content-Type` header, if the server sent one.
    pub content_type: Option<String>,
}

/// Pooled, retrying HTTP client.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
    retry_policy: RetryPolicy,
    default_referer: Option<String>,
    pool_size: usize,
}

impl HttpClient {
    /// Builds a client from `config`.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::ClientBuild`] when reqwest rejects the
    /// configuration (e.g. an invalid User-Agent header value).
    #[instrument(level = "debug", skip(config), fields(pool_size = config.pool_size))]
    pub fn new(config: HttpClientConfig) -> Result<Self, DownloadError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT_LANGUAGE,
            HeaderValue::from_static(ACCEPT_LANGUAGE_VALUE),
        );

        let mut builder = Client::builder()
            .user_agent(config.user_agent.as_str())
            .default_headers(headers)
            .connect_timeout(config.connect_timeout)
            .read_timeout(config.read_timeout)
            .pool_max_idle_per_host(config.pool_size)
            .gzip(true);
        if let Some(jar) = config.cookie_jar {
            builder = builder.cookie_provider(jar);
        }
        let client = builder.build().map_err(DownloadError::ClientBuild)?;

        debug!(
            max_attempts = config.retry_policy.max_attempts(),
            "HTTP client ready"
        );
        Ok(Self {
            client,
            retry_policy: config.retry_policy,
            default_referer: config.default_referer,
            pool_size: config.pool_size,
        })
    }

    /// Returns the configured idle pool size.
    #[must_use]
    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Returns the retry policy used by every helper.
    #[must_use]
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    /// GETs `url` and returns the body as text.
    ///
    /// # Errors
    ///
    /// Returns the final [`DownloadError`] once retries are exhausted or the
    /// failure is not retryable.
    #[instrument(level = "debug", skip(self, referer), fields(url = %url))]
    pub async fn get_text(&self, url: &str, referer: Option<&str>) -> Result<String, DownloadError> {
        self.with_retry(url, move || async move {
            let response = self.send_once(url, HTML_ACCEPT, referer).await?;
            response
                .text()
                .await
                .map_err(|e| DownloadError::from_reqwest(url, e))
        })
        .await
    }

    /// GETs `url` and decodes the body as JSON.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::Decode`] when the body is not the expected
    /// shape, otherwise the final transport/status error.
    #[instrument(level = "debug", skip(self, referer), fields(url = %url))]
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        referer: Option<&str>,
    ) -> Result<T, DownloadError> {
        let bytes = self
            .with_retry(url, move || async move {
                let response = self.send_once(url, JSON_ACCEPT, referer).await?;
                response
                    .bytes()
                    .await
                    .map_err(|e| DownloadError::from_reqwest(url, e))
            })
            .await?;
        serde_json::from_slice(&bytes).map_err(|e| DownloadError::decode(url, e.to_string()))
    }

    /// GETs `url` as media and returns the raw body plus its content type.
    ///
    /// # Errors
    ///
    /// Returns the final [`DownloadError`] once retries are exhausted or the
    /// failure is not retryable.
    #[instrument(level = "debug", skip(self, referer), fields(url = %url))]
    pub async fn get_bytes(
        &self,
        url: &str,
        referer: Option<&str>,
    ) -> Result<FetchedBody, DownloadError> {
        self.with_retry(url, move || async move {
            let response = self.send_once(url, MEDIA_ACCEPT, referer).await?;
            let content_type = response
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            let bytes = response
                .bytes()
                .await
                .map_err(|e| DownloadError::from_reqwest(url, e))?;
            Ok(FetchedBody {
                bytes: bytes.to_vec(),
                content_type,
            })
        })
        .await
    }

    /// Sends one GET and maps non-success statuses onto [`DownloadError`].
    async fn send_once(
        &self,
        url: &str,
        accept: &'static str,
        referer: Option<&str>,
    ) -> Result<Response, DownloadError> {
        let mut request = self.client.get(url).header(ACCEPT, accept);
        if let Some(referer) = referer.or(self.default_referer.as_deref()) {
            request = request.header(REFERER, referer);
        }

        let response = request
            .send()
            .await
            .map_err(|e| DownloadError::from_reqwest(url, e))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let code = status.as_u16();
        if matches!(code, 401 | 403 | 407) {
            return Err(DownloadError::auth_required(url, code));
        }
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        Err(DownloadError::http_status_with_retry_after(
            url,
            code,
            retry_after,
        ))
    }

    /// Runs `op` until it succeeds, fails permanently, or attempts run out.
    async fn with_retry<T, F, Fut>(&self, url: &str, mut op: F) -> Result<T, DownloadError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, DownloadError>>,
    {
        if Url::parse(url).is_err() {
            return Err(DownloadError::invalid_url(url));
        }

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let error = match op().await {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };

            let failure_type = classify_error(&error);
            match self.retry_policy.should_retry(failure_type, attempt) {
                RetryDecision::Retry {
                    delay: backoff,
                    attempt: next_attempt,
                } => {
                    let server_delay = server_requested_delay(&error, failure_type);
                    let delay = server_delay.unwrap_or(backoff);
                    info!(
                        url,
                        attempt = next_attempt,
                        max_attempts = self.retry_policy.max_attempts(),
                        delay_ms = delay.as_millis(),
                        using_retry_after = server_delay.is_some(),
                        error = %error,
                        "retrying request"
                    );
                    tokio::time::sleep(delay).await;
                }
                RetryDecision::DoNotRetry { reason } => {
                    debug!(url, attempt, %reason, "not retrying request");
                    return Err(error);
                }
            }
        }
    }
}

/// Honors `Retry-After` on 429 and 503 responses.
fn server_requested_delay(error: &DownloadError, failure_type: FailureType) -> Option<Duration> {
    let DownloadError::HttpStatus {
        status,
        retry_after: Some(header),
        ..
    } = error
    else {
        return None;
    };
    if failure_type == FailureType::RateLimited || *status == 503 {
        parse_retry_after(header)
    } else {
        None
    }
}
