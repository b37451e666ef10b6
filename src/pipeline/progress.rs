//! Resumable progress state and its JSON persistence.

use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::debug;

use crate::adapter::Query;

/// Where a run stands: the page to fetch next, the next free download slot,
/// and how many items are still wanted.
///
/// Serialized as `{"pageIndex": .., "nextSlot": .., "remaining": ..}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressState {
    /// 1-based listing page to request next.
    pub page_index: u32,
    /// Slot for the next download. The file written for slot `n` is numbered `n + 1`.
    pub next_slot: u64,
    /// Items still wanted. Decremented by items processed, not files written.
    pub remaining: i64,
}

/// Progress bookkeeping or persistence failure.
#[derive(Debug, thiserror::Error)]
pub enum ProgressError {
    /// A round's counts would corrupt the state.
    #[error("invalid round: {reason}")]
    InvalidRound {
        /// What was wrong.
        reason: String,
    },

    /// Reading or writing the progress file failed.
    #[error("progress file {path}: {source}")]
    Io {
        /// Progress file.
        path: PathBuf,
        /// Underlying failure.
        #[source]
        source: std::io::Error,
    },

    /// The progress file is not valid progress JSON.
    #[error("progress file {path} is malformed: {source}")]
    Parse {
        /// Progress file.
        path: PathBuf,
        /// Decode failure.
        #[source]
        source: serde_json::Error,
    },

    /// The progress file parsed but holds impossible values.
    #[error("progress file {path} is invalid: {reason}")]
    Invalid {
        /// Progress file.
        path: PathBuf,
        /// What was wrong.
        reason: String,
    },
}

impl ProgressError {
    fn invalid_round(reason: impl Into<String>) -> Self {
        Self::InvalidRound {
            reason: reason.into(),
        }
    }

    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

impl ProgressState {
    /// Starting state for a fresh run of `query`.
    #[must_use]
    pub fn fresh(query: &Query) -> Self {
        Self {
            page_index: query.start_page(),
            next_slot: 0,
            remaining: i64::from(query.target_count()),
        }
    }

    /// True once no more items are wanted.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.remaining <= 0
    }

    /// Remaining budget as an item cap for discovery.
    #[must_use]
    pub fn budget(&self) -> usize {
        usize::try_from(self.remaining.max(0)).unwrap_or(usize::MAX)
    }

    /// Commits one finished round.
    ///
    /// Either every field is updated or none is.
    ///
    /// # Errors
    ///
    /// Returns [`ProgressError::InvalidRound`] if the page would move
    /// backwards or a counter would overflow.
    pub fn record_round(
        &mut self,
        items: usize,
        locators: usize,
        next_page: u32,
    ) -> Result<(), ProgressError> {
        if next_page < self.page_index {
            return Err(ProgressError::invalid_round(format!(
                "page index would move backwards ({} -> {next_page})",
                self.page_index
            )));
        }
        let remaining = i64::try_from(items)
            .ok()
            .and_then(|items| self.remaining.checked_sub(items))
            .ok_or_else(|| ProgressError::invalid_round("remaining count overflow"))?;
        let next_slot = u64::try_from(locators)
            .ok()
            .and_then(|locators| self.next_slot.checked_add(locators))
            .ok_or_else(|| ProgressError::invalid_round("slot counter overflow"))?;

        self.page_index = next_page;
        self.next_slot = next_slot;
        self.remaining = remaining;
        Ok(())
    }

    /// Reads a progress file.
    ///
    /// # Errors
    ///
    /// Returns [`ProgressError`] if the file cannot be read, is not progress
    /// JSON, or has `pageIndex` 0.
    pub fn load(path: &Path) -> Result<Self, ProgressError> {
        let raw = std::fs::read_to_string(path).map_err(|e| ProgressError::io(path, e))?;
        let state: Self = serde_json::from_str(&raw).map_err(|source| ProgressError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        if state.page_index == 0 {
            return Err(ProgressError::Invalid {
                path: path.to_path_buf(),
                reason: "pageIndex must be 1 or greater".to_string(),
            });
        }
        debug!(path = %path.display(), ?state, "loaded progress");
        Ok(state)
    }

    /// Writes the state atomically: temp file in the same directory, then rename.
    ///
    /// # Errors
    ///
    /// Returns [`ProgressError::Io`] if the directory or file cannot be written.
    pub fn save(&self, path: &Path) -> Result<(), ProgressError> {
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir).map_err(|e| ProgressError::io(dir, e))?;

        let json = serde_json::to_vec_pretty(self).map_err(|source| ProgressError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        let mut temp = NamedTempFile::new_in(dir).map_err(|e| ProgressError::io(dir, e))?;
        temp.write_all(&json)
            .and_then(|()| temp.flush())
            .map_err(|e| ProgressError::io(path, e))?;
        temp.persist(path)
            .map_err(|e| ProgressError::io(path, e.error))?;
        Ok(())
    }
}
