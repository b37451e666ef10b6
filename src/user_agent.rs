//! Shared request identity for every outbound call.
//!
//! Image boards serve bot-looking clients a challenge page instead of content,
//! so all traffic presents as a desktop browser.

/// Desktop Chrome User-Agent sent on every request.
pub const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
    AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

/// Accept header for listing and item pages.
pub const HTML_ACCEPT: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8";

/// Accept header for JSON API calls.
pub const JSON_ACCEPT: &str = "application/json, text/plain, */*";

/// Accept header for media downloads.
pub const MEDIA_ACCEPT: &str = "image/avif,image/webp,image/apng,image/*,*/*;q=0.8";

/// Accept-Language header sent with every request.
pub const ACCEPT_LANGUAGE: &str = "en-US,en;q=0.9";
