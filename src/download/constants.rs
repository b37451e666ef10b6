//! Constants for the download module (timeouts, retryable statuses).

use std::time::Duration;

/// Default HTTP connect timeout (30 seconds).
pub const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default HTTP read timeout (60 seconds; media files are small).
pub const READ_TIMEOUT_SECS: u64 = 60;

/// Maximum Retry-After header value (1 hour) to prevent excessive delays.
pub const MAX_RETRY_AFTER: Duration = Duration::from_secs(3600);

/// HTTP statuses treated as transient. Everything else is final on first response.
pub const RETRYABLE_STATUSES: [u16; 5] = [429, 500, 502, 503, 504];

/// Extension used when neither the URL nor the response says what the file is.
pub const DEFAULT_EXTENSION: &str = ".jpg";
