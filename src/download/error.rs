//! Error types for the download module.
//!
//! Every failure a single HTTP call or file write can produce. Pipeline code
//! treats all of these as task-local: they are logged and counted, never
//! propagated past the round.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while talking to a site or writing a file.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// Network-level error (DNS resolution, connection refused, TLS errors, etc.)
    #[error("network error fetching {url}: {source}")]
    Network {
        /// The URL that failed.
        url: String,
        /// The underlying network error.
        #[source]
        source: reqwest::Error,
    },

    /// Request timed out before completion.
    #[error("timeout fetching {url}")]
    Timeout {
        /// The URL that timed out.
        url: String,
    },

    /// Non-success HTTP response after retries were exhausted or not applicable.
    #[error("HTTP {status} fetching {url}")]
    HttpStatus {
        /// The URL that returned an error status.
        url: String,
        /// The HTTP status code.
        status: u16,
        /// The Retry-After header value, if present.
        retry_after: Option<String>,
    },

    /// File system error while writing a download.
    #[error("IO error writing to {path}: {source}")]
    Io {
        /// The file path where the error occurred.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The provided URL is malformed or invalid.
    #[error("invalid URL: {url}")]
    InvalidUrl {
        /// The invalid URL string.
        url: String,
    },

    /// The server answered with an authorization status.
    #[error("[AUTH] authentication required for {domain} (HTTP {status}) fetching {url}")]
    AuthRequired {
        /// The URL that requires authentication.
        url: String,
        /// The HTTP status code (401, 403 or 407).
        status: u16,
        /// The domain requiring authentication.
        domain: String,
    },

    /// The response body did not have the expected shape.
    #[error("unexpected response body from {url}: {reason}")]
    Decode {
        /// The URL whose body failed to decode.
        url: String,
        /// What was wrong with it.
        reason: String,
    },

    /// The HTTP client could not be constructed.
    #[error("failed to build HTTP client: {0}")]
    ClientBuild(#[source] reqwest::Error),
}

impl DownloadError {
    /// Creates a network error from a reqwest error.
    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Network {
            url: url.into(),
            source,
        }
    }

    /// Creates an HTTP status error.
    pub fn http_status(url: impl Into<String>, status: u16) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
            retry_after: None,
        }
    }

    /// Creates an HTTP status error with a Retry-After header value.
    pub fn http_status_with_retry_after(
        url: impl Into<String>,
        status: u16,
        retry_after: Option<String>,
    ) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
            retry_after,
        }
    }

    /// Creates a timeout error.
    pub fn timeout(url: impl Into<String>) -> Self {
        Self::Timeout { url: url.into() }
    }

    /// Creates an IO error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Creates an invalid URL error.
    pub fn invalid_url(url: impl Into<String>) -> Self {
        Self::InvalidUrl { url: url.into() }
    }

    /// Creates an authentication-required error, deriving the domain from the URL.
    pub fn auth_required(url: impl Into<String>, status: u16) -> Self {
        let url = url.into();
        let domain = url::Url::parse(&url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_default();
        Self::AuthRequired {
            url,
            status,
            domain,
        }
    }

    /// Creates a body decode error.
    pub fn decode(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Decode {
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// Maps a reqwest send/body error onto timeout or network.
    pub(crate) fn from_reqwest(url: &str, error: reqwest::Error) -> Self {
        if error.is_timeout() {
            Self::timeout(url)
        } else {
            Self::network(url, error)
        }
    }

    /// Returns the HTTP status for status-bearing variants.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::HttpStatus { status, .. } | Self::AuthRequired { status, .. } => Some(*status),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_status_display_includes_status_and_url() {
        let error = DownloadError::http_status("https://example.com/a.jpg", 404);
        let msg = error.to_string();
        assert!(msg.contains("404"));
        assert!(msg.contains("https://example.com/a.jpg"));
        assert_eq!(error.status(), Some(404));
    }

    #[test]
    fn test_auth_required_derives_domain() {
        let error = DownloadError::auth_required("https://www.pixiv.net/ajax/illust/1/pages", 403);
        match &error {
            DownloadError::AuthRequired { domain, status, .. } => {
                assert_eq!(domain, "www.pixiv.net");
                assert_eq!(*status, 403);
            }
            other => panic!("expected AuthRequired, got {other:?}"),
        }
        assert!(error.to_string().starts_with("[AUTH]"));
    }

    #[test]
    fn test_auth_required_with_unparseable_url_has_empty_domain() {
        let error = DownloadError::auth_required("not a url", 401);
        assert!(matches!(error, DownloadError::AuthRequired { ref domain, .. } if domain.is_empty()));
    }

    #[test]
    fn test_io_error_display_includes_path() {
        let error = DownloadError::io(
            "/tmp/out/file.jpg",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        assert!(error.to_string().contains("/tmp/out/file.jpg"));
        assert_eq!(error.status(), None);
    }
}
