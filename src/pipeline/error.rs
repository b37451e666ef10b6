//! Errors that end a pipeline run.

use super::progress::ProgressState;
use crate::auth::AuthError;

/// Minimum allowed pool size.
pub const MIN_CONCURRENCY: usize = 1;

/// Maximum allowed pool size.
pub const MAX_CONCURRENCY: usize = 100;

/// Default number of concurrent extraction tasks.
pub const DEFAULT_EXTRACT_CONCURRENCY: usize = 10;

/// Default number of concurrent download tasks.
pub const DEFAULT_DOWNLOAD_CONCURRENCY: usize = 20;

/// Fatal pipeline failure.
///
/// Every run-time variant carries the last committed [`ProgressState`] so
/// the caller can report where the run stopped and resume from there.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Credentials were required and could not be obtained.
    #[error("authentication failed: {source}")]
    Auth {
        /// Why authentication failed.
        #[source]
        source: AuthError,
        /// Progress at the time of failure.
        progress: ProgressState,
    },

    /// Round bookkeeping failed.
    #[error("round bookkeeping failed: {reason}")]
    RoundFatal {
        /// What went wrong.
        reason: String,
        /// Last good progress.
        progress: ProgressState,
    },

    /// A pool size was out of range.
    #[error(
        "invalid concurrency value {value}: must be between {MIN_CONCURRENCY} and {MAX_CONCURRENCY}"
    )]
    InvalidConcurrency {
        /// The rejected value.
        value: usize,
    },
}

impl PipelineError {
    /// Progress at the point the run stopped, if the run had started.
    #[must_use]
    pub fn progress(&self) -> Option<&ProgressState> {
        match self {
            Self::Auth { progress, .. } | Self::RoundFatal { progress, .. } => Some(progress),
            Self::InvalidConcurrency { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_and_progress() {
        let progress = ProgressState {
            page_index: 4,
            next_slot: 9,
            remaining: 2,
        };
        let err = PipelineError::RoundFatal {
            reason: "slot counter overflow".to_string(),
            progress,
        };
        assert_eq!(err.to_string(), "round bookkeeping failed: slot counter overflow");
        assert_eq!(err.progress(), Some(&progress));

        let err = PipelineError::InvalidConcurrency { value: 0 };
        assert_eq!(
            err.to_string(),
            "invalid concurrency value 0: must be between 1 and 100"
        );
        assert!(err.progress().is_none());
    }

    #[test]
    fn test_auth_error_is_source() {
        let err = PipelineError::Auth {
            source: AuthError::NotConfigured { site: "pixiv" },
            progress: ProgressState {
                page_index: 1,
                next_slot: 0,
                remaining: 1,
            },
        };
        let source = std::error::Error::source(&err).map(ToString::to_string);
        assert_eq!(
            source.as_deref(),
            Some("pixiv requires authentication but no credential provider is configured")
        );
    }
}
