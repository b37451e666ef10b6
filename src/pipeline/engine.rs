//! The round loop: discover, extract, download, evaluate.
//!
//! Each round moves through [`Stage`] in order. Extraction and downloading
//! fan out onto two independent bounded pools; discovery and evaluation run
//! on the loop itself, so [`ProgressState`] is only ever mutated here.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use super::error::{
    DEFAULT_DOWNLOAD_CONCURRENCY, DEFAULT_EXTRACT_CONCURRENCY, MAX_CONCURRENCY, MIN_CONCURRENCY,
    PipelineError,
};
use super::progress::ProgressState;
use super::stats::{RunCounters, RunSummary, StopReason};
use crate::adapter::{Item, Listing, Locator, Query, SiteAdapter};
use crate::auth::{AuthError, CredentialProvider};
use crate::download::{Downloader, HttpClient};

/// Pool sizes for the two fan-out stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    extract_concurrency: usize,
    download_concurrency: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            extract_concurrency: DEFAULT_EXTRACT_CONCURRENCY,
            download_concurrency: DEFAULT_DOWNLOAD_CONCURRENCY,
        }
    }
}

impl EngineConfig {
    /// Validated pool sizes.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConcurrency`] if either value is
    /// outside 1..=100.
    pub fn new(extract_concurrency: usize, download_concurrency: usize) -> Result<Self, PipelineError> {
        for value in [extract_concurrency, download_concurrency] {
            if !(MIN_CONCURRENCY..=MAX_CONCURRENCY).contains(&value) {
                return Err(PipelineError::InvalidConcurrency { value });
            }
        }
        Ok(Self {
            extract_concurrency,
            download_concurrency,
        })
    }

    /// Extraction pool size.
    #[must_use]
    pub fn extract_concurrency(&self) -> usize {
        self.extract_concurrency
    }

    /// Download pool size.
    #[must_use]
    pub fn download_concurrency(&self) -> usize {
        self.download_concurrency
    }

    /// Connection pool size the HTTP client needs so neither stage starves.
    #[must_use]
    pub fn pool_size(&self) -> usize {
        self.extract_concurrency.max(self.download_concurrency)
    }
}

enum Stage {
    Discovering,
    Extracting {
        page: u32,
        listing: Listing,
    },
    Downloading {
        page: u32,
        listing: Listing,
        locators: Vec<Locator>,
    },
    Evaluating {
        items: usize,
        locators: usize,
        next_page: u32,
    },
    Done(StopReason),
}

/// Drives a tag search from discovery to files on disk.
pub struct PipelineEngine {
    adapter: Arc<dyn SiteAdapter>,
    client: HttpClient,
    downloader: Arc<Downloader>,
    config: EngineConfig,
    credentials: Option<Arc<dyn CredentialProvider>>,
    cancel: Arc<AtomicBool>,
    counters: Arc<RunCounters>,
    progress_path: Option<PathBuf>,
}

impl std::fmt::Debug for PipelineEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineEngine")
            .field("adapter", &self.adapter.name())
            .field("config", &self.config)
            .field("output_dir", &self.downloader.output_dir())
            .field("progress_path", &self.progress_path)
            .finish_non_exhaustive()
    }
}

impl PipelineEngine {
    /// Creates an engine. Downloads go through `client` into `downloader`'s directory.
    #[must_use]
    pub fn new(
        adapter: Arc<dyn SiteAdapter>,
        client: HttpClient,
        downloader: Downloader,
        config: EngineConfig,
    ) -> Self {
        Self {
            adapter,
            client,
            downloader: Arc::new(downloader),
            config,
            credentials: None,
            cancel: Arc::new(AtomicBool::new(false)),
            counters: Arc::new(RunCounters::new()),
            progress_path: None,
        }
    }

    /// Provider consulted before the first round when the adapter needs a session.
    #[must_use]
    pub fn with_credentials(mut self, provider: Arc<dyn CredentialProvider>) -> Self {
        self.credentials = Some(provider);
        self
    }

    /// Uses `flag` as the cancellation signal.
    #[must_use]
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = flag;
        self
    }

    /// Persists progress to `path` after every committed round.
    #[must_use]
    pub fn with_progress_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.progress_path = Some(path.into());
        self
    }

    /// Live counters for progress display.
    #[must_use]
    pub fn counters(&self) -> Arc<RunCounters> {
        Arc::clone(&self.counters)
    }

    /// The cancellation flag. Setting it stops the run at the next check.
    #[must_use]
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    /// Runs rounds until the target is reached, discovery comes back empty, or
    /// the run is cancelled.
    ///
    /// `resume` replaces the fresh state derived from `query`.
    ///
    /// Cancellation before a round's downloads start discards that round.
    /// Once downloads have started they drain and the round is committed.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Auth`] when the adapter needs credentials that
    /// cannot be obtained, or [`PipelineError::RoundFatal`] when round
    /// bookkeeping fails. Both carry the last committed progress.
    #[instrument(skip(self, query, resume), fields(adapter = self.adapter.name(), term = %query.term()))]
    pub async fn run(
        &self,
        query: &Query,
        resume: Option<ProgressState>,
    ) -> Result<RunSummary, PipelineError> {
        let started = Instant::now();
        let mut progress = resume.unwrap_or_else(|| ProgressState::fresh(query));
        info!(
            page = progress.page_index,
            next_slot = progress.next_slot,
            remaining = progress.remaining,
            extract_concurrency = self.config.extract_concurrency,
            download_concurrency = self.config.download_concurrency,
            "starting run"
        );

        self.authenticate(&progress).await?;

        let mut stage = Stage::Discovering;
        let stop_reason = loop {
            if self.is_cancelled()
                && matches!(
                    stage,
                    Stage::Discovering | Stage::Extracting { .. } | Stage::Downloading { .. }
                )
            {
                info!("cancellation requested, stopping before downloads");
                stage = Stage::Done(StopReason::Cancelled);
            }

            stage = match stage {
                Stage::Discovering => self.discover(query, &progress).await,
                Stage::Extracting { page, listing } => {
                    let locators = self.extract_all(&listing.items).await;
                    if locators.is_empty() {
                        if self.is_cancelled() {
                            Stage::Done(StopReason::Cancelled)
                        } else {
                            // Nothing to download, but the page still counts as processed.
                            info!(page, items = listing.items.len(), "no locators extracted");
                            Stage::Evaluating {
                                items: listing.items.len(),
                                locators: 0,
                                next_page: self.adapter.next_page(page, &listing),
                            }
                        }
                    } else {
                        Stage::Downloading {
                            page,
                            listing,
                            locators,
                        }
                    }
                }
                Stage::Downloading {
                    page,
                    listing,
                    locators,
                } => {
                    self.download_all(progress.next_slot, &locators).await;
                    Stage::Evaluating {
                        items: listing.items.len(),
                        locators: locators.len(),
                        next_page: self.adapter.next_page(page, &listing),
                    }
                }
                Stage::Evaluating {
                    items,
                    locators,
                    next_page,
                } => {
                    progress
                        .record_round(items, locators, next_page)
                        .map_err(|e| PipelineError::RoundFatal {
                            reason: e.to_string(),
                            progress,
                        })?;
                    self.counters.increment_rounds();
                    self.persist(&progress);
                    debug!(
                        page = progress.page_index,
                        next_slot = progress.next_slot,
                        remaining = progress.remaining,
                        "round committed"
                    );
                    if self.is_cancelled() {
                        Stage::Done(StopReason::Cancelled)
                    } else if progress.is_done() {
                        Stage::Done(StopReason::TargetReached)
                    } else {
                        Stage::Discovering
                    }
                }
                Stage::Done(reason) => break reason,
            };
        };

        let summary =
            RunSummary::from_counters(&self.counters, stop_reason, progress, started.elapsed());
        info!(
            downloaded = summary.downloaded,
            failed_downloads = summary.failed_downloads,
            failed_extractions = summary.failed_extractions,
            rounds = summary.rounds,
            stop_reason = %summary.stop_reason,
            page = summary.progress.page_index,
            next_slot = summary.progress.next_slot,
            elapsed_secs = summary.elapsed.as_secs_f64(),
            "run finished"
        );
        Ok(summary)
    }

    async fn authenticate(&self, progress: &ProgressState) -> Result<(), PipelineError> {
        if !self.adapter.requires_auth() {
            return Ok(());
        }
        let Some(provider) = &self.credentials else {
            return Err(PipelineError::Auth {
                source: AuthError::NotConfigured {
                    site: self.adapter.name(),
                },
                progress: *progress,
            });
        };
        if provider.is_authenticated() {
            debug!("session already authenticated");
            return Ok(());
        }
        match provider.obtain_credentials().await {
            Ok(credentials) => {
                info!(
                    domain = %credentials.domain,
                    cookies = credentials.cookies.len(),
                    "authenticated"
                );
                Ok(())
            }
            Err(source) => Err(PipelineError::Auth {
                source,
                progress: *progress,
            }),
        }
    }

    async fn discover(&self, query: &Query, progress: &ProgressState) -> Stage {
        if progress.is_done() {
            return Stage::Done(StopReason::TargetReached);
        }
        let page = progress.page_index;
        let listing = self
            .adapter
            .discover_page(query, page, progress.budget())
            .await;
        if listing.is_empty() {
            info!(page, "discovery returned no items");
            return Stage::Done(StopReason::Exhausted);
        }
        self.counters.add_discovered(listing.items.len());
        debug!(page, items = listing.items.len(), page_size = listing.page_size, "discovered");
        Stage::Extracting { page, listing }
    }

    /// Extracts every item on the extraction pool and merges the results in
    /// item order, keeping the first owner of each locator URL.
    async fn extract_all(&self, items: &[Item]) -> Vec<Locator> {
        let semaphore = Arc::new(Semaphore::new(self.config.extract_concurrency));
        let mut handles: Vec<JoinHandle<Option<Vec<Locator>>>> = Vec::with_capacity(items.len());

        for item in items {
            let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                warn!("extraction pool closed unexpectedly");
                break;
            };
            let adapter = Arc::clone(&self.adapter);
            let cancel = Arc::clone(&self.cancel);
            let item = item.clone();
            handles.push(tokio::spawn(async move {
                let _permit = permit;
                if cancel.load(Ordering::SeqCst) {
                    return None;
                }
                Some(adapter.extract_locators(&item).await)
            }));
        }

        let mut seen = HashSet::new();
        let mut merged = Vec::new();
        for (item, handle) in items.iter().zip(handles) {
            match handle.await {
                Ok(Some(locators)) => {
                    if locators.is_empty() {
                        warn!(item = %item, "item yielded no locators");
                        self.counters.increment_failed_extractions();
                    }
                    for locator in locators {
                        if seen.insert(locator.url.clone()) {
                            merged.push(locator);
                        } else {
                            debug!(item = %item, url = %locator.url, "duplicate locator dropped");
                        }
                    }
                }
                Ok(None) => debug!(item = %item, "extraction skipped after cancellation"),
                Err(e) => {
                    warn!(item = %item, error = %e, "extraction task panicked");
                    self.counters.increment_failed_extractions();
                }
            }
        }
        merged
    }

    /// Downloads every locator on the download pool. Slot `first_slot + i`
    /// belongs to `locators[i]` and is fixed before any task starts.
    async fn download_all(&self, first_slot: u64, locators: &[Locator]) {
        let semaphore = Arc::new(Semaphore::new(self.config.download_concurrency));
        let mut handles = Vec::with_capacity(locators.len());

        for (slot, locator) in (first_slot..).zip(locators) {
            let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                warn!("download pool closed unexpectedly");
                self.counters.increment_failed_downloads();
                continue;
            };
            let client = self.client.clone();
            let downloader = Arc::clone(&self.downloader);
            let counters = Arc::clone(&self.counters);
            let referer = self.adapter.referer_for(&locator.item);
            let locator = locator.clone();
            handles.push(tokio::spawn(async move {
                let _permit = permit;
                match downloader
                    .fetch(&client, slot, &locator, referer.as_deref())
                    .await
                {
                    Ok(path) => {
                        info!(slot, item = %locator.item, path = %path.display(), "downloaded");
                        counters.increment_downloaded();
                    }
                    Err(e) => {
                        warn!(slot, item = %locator.item, url = %locator.url, error = %e, "download failed");
                        counters.increment_failed_downloads();
                    }
                }
            }));
        }

        debug!(task_count = handles.len(), "waiting for downloads to complete");
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "download task panicked");
                self.counters.increment_failed_downloads();
            }
        }
    }

    fn persist(&self, progress: &ProgressState) {
        let Some(path) = &self.progress_path else {
            return;
        };
        if let Err(e) = progress.save(path) {
            warn!(path = %path.display(), error = %e, "failed to save progress");
        }
    }
}
