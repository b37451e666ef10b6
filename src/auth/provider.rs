//! Session credentials for sites that gate search behind a login.
//!
//! [`SessionAuth`] reuses a cached cookie file when one exists. Otherwise it
//! drives an interactive sign-in through the shared browser, exports the
//! resulting cookies, installs them into the run's cookie jar, and caches them
//! for the next run.

use std::fmt;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use reqwest::cookie::Jar;
use tracing::{info, instrument, warn};

use super::cookies::{
    CookieError, CookieLine, add_cookies_to_jar, parse_netscape_cookies, write_netscape_cookies,
};
use crate::session::{BrowserError, SharedBrowser};

/// Authentication failures. Fatal to the run.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// No cached cookies and no browser to sign in with.
    #[error("no cached session for {domain} and no browser available to sign in")]
    NoBrowser {
        /// Site that needed credentials.
        domain: String,
    },

    /// The browser reported a failure during sign-in or cookie export.
    #[error("browser sign-in for {domain} failed: {source}")]
    Browser {
        /// Site being signed into.
        domain: String,
        /// Browser failure.
        #[source]
        source: BrowserError,
    },

    /// Sign-in finished but produced no cookies for the site.
    #[error("sign-in for {domain} produced no session cookies")]
    NoCookies {
        /// Site being signed into.
        domain: String,
    },

    /// The cookie cache could not be read or written.
    #[error("cookie cache {path}: {source}")]
    CookieCache {
        /// Cache file.
        path: PathBuf,
        /// Underlying failure.
        #[source]
        source: CookieError,
    },

    /// The pipeline needs credentials but no provider was configured.
    #[error("{site} requires authentication but no credential provider is configured")]
    NotConfigured {
        /// Adapter name.
        site: &'static str,
    },
}

/// Session cookies for one site.
#[derive(Clone)]
pub struct Credentials {
    /// Site the cookies belong to.
    pub domain: String,
    /// Cookie set, values redacted in `Debug`.
    pub cookies: Vec<CookieLine>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("domain", &self.domain)
            .field("cookies", &self.cookies.len())
            .finish()
    }
}

/// Produces credentials for a site on demand.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// True once credentials are installed for this run.
    fn is_authenticated(&self) -> bool;

    /// Obtains credentials and installs them where requests will use them.
    async fn obtain_credentials(&self) -> Result<Credentials, AuthError>;
}

/// Cookie-based session provider backed by an optional cache file and browser.
pub struct SessionAuth {
    domain: String,
    site_url: String,
    login_url: String,
    jar: Arc<Jar>,
    cookie_file: Option<PathBuf>,
    browser: Option<SharedBrowser>,
    authenticated: AtomicBool,
}

impl fmt::Debug for SessionAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionAuth")
            .field("domain", &self.domain)
            .field("login_url", &self.login_url)
            .field("cookie_file", &self.cookie_file)
            .field("has_browser", &self.browser.is_some())
            .field("authenticated", &self.is_authenticated())
            .finish_non_exhaustive()
    }
}

impl SessionAuth {
    /// Creates a provider that installs cookies for `domain` into `jar`.
    ///
    /// `site_url` is the page whose cookies are exported after sign-in.
    #[must_use]
    pub fn new(
        domain: impl Into<String>,
        site_url: impl Into<String>,
        login_url: impl Into<String>,
        jar: Arc<Jar>,
    ) -> Self {
        Self {
            domain: domain.into(),
            site_url: site_url.into(),
            login_url: login_url.into(),
            jar,
            cookie_file: None,
            browser: None,
            authenticated: AtomicBool::new(false),
        }
    }

    /// Caches cookies in `path` between runs.
    #[must_use]
    pub fn with_cookie_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.cookie_file = Some(path.into());
        self
    }

    /// Uses `browser` for interactive sign-in.
    #[must_use]
    pub fn with_browser(mut self, browser: SharedBrowser) -> Self {
        self.browser = Some(browser);
        self
    }

    /// Site these credentials are for.
    #[must_use]
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Loads cached cookies for this site, if any, into the jar.
    ///
    /// Returns `Ok(None)` when there is no cache file or it holds nothing for
    /// this site.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::CookieCache`] when the file exists but cannot be parsed.
    pub fn load_cached(&self) -> Result<Option<Credentials>, AuthError> {
        let Some(path) = self.cookie_file.as_deref() else {
            return Ok(None);
        };
        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(cache_error(path, CookieError::Io(e))),
        };
        let cookies: Vec<CookieLine> = parse_netscape_cookies(BufReader::new(file))
            .map_err(|e| cache_error(path, e))?
            .into_iter()
            .filter(|c| c.matches_domain(&self.domain))
            .collect();
        if cookies.is_empty() {
            return Ok(None);
        }

        Ok(Some(self.install(cookies)))
    }

    /// Forgets the cached session. Cookies already in this run's jar stay.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::CookieCache`] when the cache file exists but cannot be removed.
    pub fn sign_out(&self) -> Result<(), AuthError> {
        self.authenticated.store(false, Ordering::SeqCst);
        let Some(path) = self.cookie_file.as_deref() else {
            return Ok(());
        };
        match std::fs::remove_file(path) {
            Ok(()) => {
                info!(path = %path.display(), "removed cached session cookies");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(cache_error(path, CookieError::Io(e))),
        }
    }

    async fn sign_in_with_browser(&self) -> Result<Credentials, AuthError> {
        let Some(browser) = self.browser.as_ref() else {
            return Err(AuthError::NoBrowser {
                domain: self.domain.clone(),
            });
        };

        let login_url = self.login_url.clone();
        let site_url = self.site_url.clone();
        let exported = browser
            .with_session(move |session| {
                Box::pin(async move {
                    session.sign_in(&login_url).await?;
                    session.cookies(&site_url).await
                })
            })
            .await
            .map_err(|source| AuthError::Browser {
                domain: self.domain.clone(),
                source,
            })?;

        let cookies: Vec<CookieLine> = exported
            .into_iter()
            .filter(|c| c.matches_domain(&self.domain))
            .collect();
        if cookies.is_empty() {
            return Err(AuthError::NoCookies {
                domain: self.domain.clone(),
            });
        }

        if let Some(path) = self.cookie_file.as_deref() {
            match write_netscape_cookies(path, &cookies) {
                Ok(()) => info!(path = %path.display(), "cached session cookies"),
                Err(e) => warn!(path = %path.display(), error = %e, "failed to cache session cookies"),
            }
        }
        Ok(self.install(cookies))
    }

    fn install(&self, cookies: Vec<CookieLine>) -> Credentials {
        let added = add_cookies_to_jar(&self.jar, &cookies);
        self.authenticated.store(true, Ordering::SeqCst);
        info!(domain = %self.domain, cookies = added, "session cookies installed");
        Credentials {
            domain: self.domain.clone(),
            cookies,
        }
    }
}

#[async_trait]
impl CredentialProvider for SessionAuth {
    fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::SeqCst)
    }

    #[instrument(skip(self), fields(domain = %self.domain))]
    async fn obtain_credentials(&self) -> Result<Credentials, AuthError> {
        match self.load_cached() {
            Ok(Some(credentials)) => return Ok(credentials),
            Ok(None) => {}
            Err(e) => warn!(error = %e, "ignoring unreadable cookie cache"),
        }
        self.sign_in_with_browser().await
    }
}

fn cache_error(path: &Path, source: CookieError) -> AuthError {
    AuthError::CookieCache {
        path: path.to_path_buf(),
        source,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use reqwest::cookie::CookieStore;
    use tempfile::TempDir;

    use super::*;
    use crate::session::BrowsingSession;

    struct LoginBrowser {
        sign_ins: Arc<AtomicUsize>,
        cookies: Vec<CookieLine>,
        fail: bool,
    }

    #[async_trait]
    impl BrowsingSession for LoginBrowser {
        async fn render(&mut self, _url: &str, _ready: &str) -> Result<String, BrowserError> {
            Ok(String::new())
        }

        async fn sign_in(&mut self, login_url: &str) -> Result<(), BrowserError> {
            self.sign_ins.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(BrowserError::SignIn {
                    url: login_url.to_string(),
                    reason: "captcha".to_string(),
                });
            }
            Ok(())
        }

        async fn cookies(&mut self, _url: &str) -> Result<Vec<CookieLine>, BrowserError> {
            Ok(self.cookies.clone())
        }
    }

    fn session_cookie(domain: &str) -> CookieLine {
        CookieLine::new(
            domain.to_string(),
            true,
            "/".to_string(),
            true,
            0,
            "PHPSESSID".to_string(),
            "secret".to_string(),
        )
    }

    fn provider(jar: Arc<Jar>) -> SessionAuth {
        SessionAuth::new(
            "pixiv.net",
            "https://www.pixiv.net/",
            "https://accounts.pixiv.net/login",
            jar,
        )
    }

    #[tokio::test]
    async fn test_no_cache_no_browser_fails() {
        let auth = provider(Arc::new(Jar::default()));
        let result = auth.obtain_credentials().await;
        assert!(matches!(result, Err(AuthError::NoBrowser { .. })));
        assert!(!auth.is_authenticated());
    }

    #[tokio::test]
    async fn test_browser_sign_in_installs_and_caches_cookies() {
        let temp_dir = TempDir::new().unwrap();
        let cache = temp_dir.path().join("pixiv_cookies.txt");
        let jar = Arc::new(Jar::default());
        let sign_ins = Arc::new(AtomicUsize::new(0));
        let browser = SharedBrowser::new(LoginBrowser {
            sign_ins: Arc::clone(&sign_ins),
            cookies: vec![session_cookie(".pixiv.net"), session_cookie(".google.com")],
            fail: false,
        });

        let auth = provider(Arc::clone(&jar))
            .with_cookie_file(&cache)
            .with_browser(browser);
        let credentials = auth.obtain_credentials().await.unwrap();

        assert!(auth.is_authenticated());
        assert_eq!(credentials.cookies.len(), 1, "foreign cookies are dropped");
        assert_eq!(sign_ins.load(Ordering::SeqCst), 1);
        assert!(cache.exists());
        let url: url::Url = "https://www.pixiv.net/ajax".parse().unwrap();
        assert!(jar.cookies(&url).is_some());
        assert!(!format!("{credentials:?}").contains("secret"));
    }

    #[tokio::test]
    async fn test_cached_cookies_skip_sign_in() {
        let temp_dir = TempDir::new().unwrap();
        let cache = temp_dir.path().join("cookies.txt");
        write_netscape_cookies(&cache, &[session_cookie(".pixiv.net")]).unwrap();

        let sign_ins = Arc::new(AtomicUsize::new(0));
        let browser = SharedBrowser::new(LoginBrowser {
            sign_ins: Arc::clone(&sign_ins),
            cookies: Vec::new(),
            fail: false,
        });
        let auth = provider(Arc::new(Jar::default()))
            .with_cookie_file(&cache)
            .with_browser(browser);

        auth.obtain_credentials().await.unwrap();
        assert!(auth.is_authenticated());
        assert_eq!(sign_ins.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_sign_in_failure_is_auth_error() {
        let browser = SharedBrowser::new(LoginBrowser {
            sign_ins: Arc::new(AtomicUsize::new(0)),
            cookies: Vec::new(),
            fail: true,
        });
        let auth = provider(Arc::new(Jar::default())).with_browser(browser);
        let result = auth.obtain_credentials().await;
        assert!(matches!(
            result,
            Err(AuthError::Browser {
                source: BrowserError::SignIn { .. },
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_sign_in_without_site_cookies_fails() {
        let browser = SharedBrowser::new(LoginBrowser {
            sign_ins: Arc::new(AtomicUsize::new(0)),
            cookies: vec![session_cookie(".example.com")],
            fail: false,
        });
        let auth = provider(Arc::new(Jar::default())).with_browser(browser);
        let result = auth.obtain_credentials().await;
        assert!(matches!(result, Err(AuthError::NoCookies { .. })));
    }

    #[test]
    fn test_sign_out_removes_cache() {
        let temp_dir = TempDir::new().unwrap();
        let cache = temp_dir.path().join("cookies.txt");
        write_netscape_cookies(&cache, &[session_cookie(".pixiv.net")]).unwrap();
        let auth = provider(Arc::new(Jar::default())).with_cookie_file(&cache);

        assert!(auth.load_cached().unwrap().is_some());
        assert!(auth.is_authenticated());
        auth.sign_out().unwrap();
        assert!(!auth.is_authenticated());
        assert!(!cache.exists());
        auth.sign_out().unwrap();
    }
}
