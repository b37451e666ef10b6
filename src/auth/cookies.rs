//! Netscape cookie file reading and writing, and jar loading.
//!
//! Session cookies exported from a signed-in browser are cached on disk in the
//! Netscape HTTP cookie file format (7 TAB-separated fields per line) so later
//! runs can skip the sign-in flow.

use std::fmt;
use std::io::{BufRead, Write};
use std::path::Path;

use reqwest::cookie::Jar;
use tracing::{debug, instrument, warn};

/// Header line written at the top of every cookie file.
const NETSCAPE_HEADER: &str = "# Netscape HTTP Cookie File";

/// A single cookie in Netscape cookie-file form.
///
/// The value is redacted in `Debug` output so cookies never leak into logs.
#[derive(Clone, PartialEq, Eq)]
pub struct CookieLine {
    /// The domain the cookie belongs to (e.g., `.pixiv.net`).
    pub domain: String,
    /// Whether subdomains should match.
    pub tailmatch: bool,
    /// The URL path scope for the cookie.
    pub path: String,
    /// Whether the cookie should only be sent over HTTPS.
    pub secure: bool,
    /// Unix timestamp for expiry (0 = session cookie).
    pub expires: u64,
    /// Cookie name.
    pub name: String,
    value: String,
}

impl CookieLine {
    /// Creates a new cookie entry.
    #[must_use]
    pub fn new(
        domain: String,
        tailmatch: bool,
        path: String,
        secure: bool,
        expires: u64,
        name: String,
        value: String,
    ) -> Self {
        Self {
            domain,
            tailmatch,
            path,
            secure,
            expires,
            name,
            value,
        }
    }

    /// Returns the cookie value. Never log it.
    #[must_use]
    pub fn value(&self) -> &str {
        &self.value
    }

    /// True when this cookie is scoped to `domain` or one of its subdomains.
    #[must_use]
    pub fn matches_domain(&self, domain: &str) -> bool {
        let own = self.domain.trim_start_matches('.').to_ascii_lowercase();
        let wanted = domain.trim_start_matches('.').to_ascii_lowercase();
        own == wanted || own.ends_with(&format!(".{wanted}"))
    }

    fn to_netscape_line(&self) -> String {
        let flag = |b: bool| if b { "TRUE" } else { "FALSE" };
        format!(
            "{}\t{}\t{}\t{}\t{}\t{}\t{}",
            self.domain,
            flag(self.tailmatch),
            self.path,
            flag(self.secure),
            self.expires,
            self.name,
            self.value
        )
    }
}

impl fmt::Debug for CookieLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CookieLine")
            .field("domain", &self.domain)
            .field("tailmatch", &self.tailmatch)
            .field("path", &self.path)
            .field("secure", &self.secure)
            .field("expires", &self.expires)
            .field("name", &self.name)
            .field("value", &"[REDACTED]")
            .finish()
    }
}

/// Errors that can occur while reading or writing a cookie file.
#[derive(Debug, thiserror::Error)]
pub enum CookieError {
    /// A line in the cookie file has an invalid format.
    #[error("line {line_number}: {reason}")]
    InvalidLine {
        /// 1-based line number in the cookie file.
        line_number: usize,
        /// Description of what was wrong.
        reason: String,
    },

    /// I/O error reading or writing the cookie file.
    #[error("cookie file I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// No valid cookies found in a non-empty file.
    #[error("no valid cookies found in file ({malformed_count} lines failed to parse)")]
    NoCookiesFound {
        /// Number of malformed lines encountered.
        malformed_count: usize,
    },
}

/// Parses a Netscape-format cookie file.
///
/// Comment lines (`#...`) and blank lines are skipped. Malformed lines are
/// logged and skipped.
///
/// # Errors
///
/// Returns [`CookieError::Io`] on read failure, or
/// [`CookieError::NoCookiesFound`] when a non-empty file yields zero valid cookies.
#[instrument(level = "debug", skip(reader))]
pub fn parse_netscape_cookies(reader: impl BufRead) -> Result<Vec<CookieLine>, CookieError> {
    let mut cookies = Vec::new();
    let mut malformed_count = 0;
    let mut data_lines = 0;

    for (idx, line_result) in reader.lines().enumerate() {
        let line_number = idx + 1;
        let line = line_result?;
        let line = line.trim_end();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        data_lines += 1;

        match parse_cookie_line(line, line_number) {
            Ok(cookie) => cookies.push(cookie),
            Err(e) => {
                warn!(line = line_number, reason = %e, "skipping malformed cookie line");
                malformed_count += 1;
            }
        }
    }

    if cookies.is_empty() && data_lines > 0 {
        return Err(CookieError::NoCookiesFound { malformed_count });
    }
    Ok(cookies)
}

fn parse_cookie_line(line: &str, line_number: usize) -> Result<CookieLine, CookieError> {
    let invalid = |reason: String| CookieError::InvalidLine {
        line_number,
        reason,
    };

    let fields: Vec<&str> = line.split('\t').collect();
    let [domain, tailmatch, path, secure, expires, name, value] = fields[..] else {
        return Err(invalid(format!(
            "expected 7 TAB-separated fields, found {}",
            fields.len()
        )));
    };

    let parse_flag = |raw: &str, field: &str| match raw {
        "TRUE" => Ok(true),
        "FALSE" => Ok(false),
        _ => Err(invalid(format!("{field} must be TRUE or FALSE, got '{raw}'"))),
    };
    let tailmatch = parse_flag(tailmatch, "tailmatch")?;
    let secure = parse_flag(secure, "secure")?;
    let expires = expires
        .parse::<u64>()
        .map_err(|_| invalid(format!("expires must be a non-negative integer, got '{expires}'")))?;

    if domain.is_empty() {
        return Err(invalid("domain field is empty".to_string()));
    }
    if name.is_empty() {
        return Err(invalid("cookie name field is empty".to_string()));
    }

    Ok(CookieLine::new(
        domain.to_string(),
        tailmatch,
        path.to_string(),
        secure,
        expires,
        name.to_string(),
        value.to_string(),
    ))
}

/// Writes `cookies` to `path` in Netscape format, replacing the file atomically.
///
/// # Errors
///
/// Returns [`CookieError::Io`] when the temp file cannot be written or moved into place.
#[instrument(level = "debug", skip(cookies), fields(path = %path.display(), count = cookies.len()))]
pub fn write_netscape_cookies(path: &Path, cookies: &[CookieLine]) -> Result<(), CookieError> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent)?;

    let mut temp = tempfile::NamedTempFile::new_in(parent)?;
    writeln!(temp, "{NETSCAPE_HEADER}")?;
    for cookie in cookies {
        writeln!(temp, "{}", cookie.to_netscape_line())?;
    }
    temp.flush()?;
    temp.persist(path).map_err(|e| CookieError::Io(e.error))?;
    Ok(())
}

/// Adds cookies to an existing jar. Returns how many were accepted.
#[instrument(level = "debug", skip(jar, cookies))]
pub fn add_cookies_to_jar(jar: &Jar, cookies: &[CookieLine]) -> usize {
    let mut added = 0;
    for cookie in cookies {
        let origin = build_origin_url(cookie);
        if let Ok(url) = origin.parse::<url::Url>() {
            jar.add_cookie_str(&build_set_cookie_string(cookie), &url);
            debug!(domain = %cookie.domain, name = %cookie.name, "loaded cookie into jar");
            added += 1;
        } else {
            warn!(domain = %cookie.domain, name = %cookie.name, "skipping cookie with unparseable domain");
        }
    }
    added
}

fn build_set_cookie_string(cookie: &CookieLine) -> String {
    let mut parts = vec![
        format!("{}={}", cookie.name, cookie.value()),
        format!("Domain={}", cookie.domain),
        format!("Path={}", cookie.path),
    ];
    if cookie.secure {
        parts.push("Secure".to_string());
    }
    if cookie.expires > 0
        && let Some(expires) = unix_to_http_date(cookie.expires)
    {
        parts.push(format!("Expires={expires}"));
    }
    parts.join("; ")
}

fn build_origin_url(cookie: &CookieLine) -> String {
    let scheme = if cookie.secure { "https" } else { "http" };
    let domain = cookie.domain.trim_start_matches('.');
    format!("{scheme}://{domain}{}", cookie.path)
}

fn unix_to_http_date(timestamp: u64) -> Option<String> {
    use std::time::{Duration, UNIX_EPOCH};

    let time = UNIX_EPOCH.checked_add(Duration::from_secs(timestamp))?;
    Some(httpdate::fmt_http_date(time))
}
