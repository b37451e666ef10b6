//! Browsing-session capability and its exclusive lease.
//!
//! Some sites only expose media URLs after client-side rendering, and some
//! only hand out session cookies after an interactive sign-in. Both need a
//! real browser, which this crate does not ship: callers plug one in through
//! [`BrowsingSession`].
//!
//! A browser session is a single stateful resource. [`SharedBrowser`] wraps it
//! in an async mutex and hands out one lease at a time. This is the one
//! serialization point in an otherwise parallel pipeline: while a lease is
//! held, every other extraction task that needs the browser waits.

use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, trace};

use crate::auth::CookieLine;

/// Failures reported by a browsing session.
#[derive(Debug, thiserror::Error)]
pub enum BrowserError {
    /// The page could not be loaded.
    #[error("navigation to {url} failed: {reason}")]
    Navigation {
        /// Page that failed.
        url: String,
        /// What the browser reported.
        reason: String,
    },

    /// The ready selector never appeared.
    #[error("timed out waiting for `{selector}` on {url}")]
    Timeout {
        /// Page being rendered.
        url: String,
        /// Selector that never matched.
        selector: String,
    },

    /// Interactive sign-in did not complete.
    #[error("sign-in at {url} failed: {reason}")]
    SignIn {
        /// Login page.
        url: String,
        /// What went wrong.
        reason: String,
    },

    /// The underlying browser is gone.
    #[error("browser session is closed")]
    Closed,
}

/// A stateful, headless-or-not browser.
#[async_trait]
pub trait BrowsingSession: Send {
    /// Loads `url`, waits until `ready_selector` matches, and returns the rendered DOM.
    async fn render(&mut self, url: &str, ready_selector: &str) -> Result<String, BrowserError>;

    /// Drives the site's sign-in flow starting at `login_url`.
    async fn sign_in(&mut self, login_url: &str) -> Result<(), BrowserError>;

    /// Exports the cookies the browser holds for `url`.
    async fn cookies(&mut self, url: &str) -> Result<Vec<CookieLine>, BrowserError>;
}

/// Process-wide handle to one [`BrowsingSession`]; clones share the same session.
#[derive(Clone)]
pub struct SharedBrowser {
    inner: Arc<Mutex<Box<dyn BrowsingSession>>>,
}

impl std::fmt::Debug for SharedBrowser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedBrowser").finish_non_exhaustive()
    }
}

impl SharedBrowser {
    /// Wraps a session for shared, exclusive use.
    #[must_use]
    pub fn new(session: impl BrowsingSession + 'static) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Box::new(session))),
        }
    }

    /// Waits for exclusive access. The lease is released when it drops.
    pub async fn lease(&self) -> BrowserLease<'_> {
        let waiting_since = Instant::now();
        let guard = self.inner.lock().await;
        let waited = waiting_since.elapsed();
        debug!(waited_ms = waited.as_millis(), "browser lease acquired");
        BrowserLease {
            guard,
            acquired_at: Instant::now(),
        }
    }

    /// Runs `f` with exclusive access and releases the session afterwards,
    /// whether `f` succeeds or fails.
    pub async fn with_session<T, F>(&self, f: F) -> T
    where
        F: for<'s> FnOnce(&'s mut (dyn BrowsingSession + 'static)) -> BoxFuture<'s, T>,
    {
        let mut lease = self.lease().await;
        f(&mut *lease).await
    }
}

/// Exclusive access to the shared session.
pub struct BrowserLease<'a> {
    guard: MutexGuard<'a, Box<dyn BrowsingSession>>,
    acquired_at: Instant,
}

impl Deref for BrowserLease<'_> {
    type Target = dyn BrowsingSession;

    fn deref(&self) -> &Self::Target {
        &**self.guard
    }
}

impl DerefMut for BrowserLease<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut **self.guard
    }
}

impl Drop for BrowserLease<'_> {
    fn drop(&mut self) {
        trace!(
            held_ms = self.acquired_at.elapsed().as_millis(),
            "browser lease released"
        );
    }
}
