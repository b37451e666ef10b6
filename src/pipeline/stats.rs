//! Live run counters and the final run summary.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use super::progress::ProgressState;

/// Counters updated by pipeline tasks while a run is in flight.
///
/// Shared through an `Arc` so a progress display can poll them.
#[derive(Debug, Default)]
pub struct RunCounters {
    discovered: AtomicUsize,
    downloaded: AtomicUsize,
    failed_downloads: AtomicUsize,
    failed_extractions: AtomicUsize,
    rounds: AtomicUsize,
}

impl RunCounters {
    /// All counters at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Items returned by discovery so far.
    #[must_use]
    pub fn discovered(&self) -> usize {
        self.discovered.load(Ordering::SeqCst)
    }

    /// Files written so far.
    #[must_use]
    pub fn downloaded(&self) -> usize {
        self.downloaded.load(Ordering::SeqCst)
    }

    /// Downloads that failed after retries.
    #[must_use]
    pub fn failed_downloads(&self) -> usize {
        self.failed_downloads.load(Ordering::SeqCst)
    }

    /// Items that yielded no locators.
    #[must_use]
    pub fn failed_extractions(&self) -> usize {
        self.failed_extractions.load(Ordering::SeqCst)
    }

    /// Rounds committed.
    #[must_use]
    pub fn rounds(&self) -> usize {
        self.rounds.load(Ordering::SeqCst)
    }

    pub(crate) fn add_discovered(&self, count: usize) {
        self.discovered.fetch_add(count, Ordering::SeqCst);
    }

    pub(crate) fn increment_downloaded(&self) {
        self.downloaded.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_failed_downloads(&self) {
        self.failed_downloads.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_failed_extractions(&self) {
        self.failed_extractions.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_rounds(&self) {
        self.rounds.fetch_add(1, Ordering::SeqCst);
    }
}

/// Why a run ended without a fatal error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The remaining budget reached zero.
    TargetReached,
    /// Discovery returned an empty page.
    Exhausted,
    /// The cancellation flag was raised.
    Cancelled,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::TargetReached => "target reached",
            Self::Exhausted => "no more results",
            Self::Cancelled => "cancelled",
        };
        f.write_str(text)
    }
}

/// Outcome of a completed run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    /// Files written.
    pub downloaded: usize,
    /// Downloads that failed.
    pub failed_downloads: usize,
    /// Items that yielded no locators.
    pub failed_extractions: usize,
    /// Rounds committed.
    pub rounds: usize,
    /// Why the run stopped.
    pub stop_reason: StopReason,
    /// Final progress, ready to persist for a later resume.
    pub progress: ProgressState,
    /// Wall-clock run time.
    pub elapsed: Duration,
}

impl RunSummary {
    pub(crate) fn from_counters(
        counters: &RunCounters,
        stop_reason: StopReason,
        progress: ProgressState,
        elapsed: Duration,
    ) -> Self {
        Self {
            downloaded: counters.downloaded(),
            failed_downloads: counters.failed_downloads(),
            failed_extractions: counters.failed_extractions(),
            rounds: counters.rounds(),
            stop_reason,
            progress,
            elapsed,
        }
    }
}
