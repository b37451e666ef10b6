//! Multi-stage tag-search pipeline with resumable progress.
//!
//! # Overview
//!
//! A run repeats rounds of discover → extract → download → evaluate until the
//! target count is reached or a stage comes back empty:
//!
//! - **Discovering**: one listing page from the [`SiteAdapter`](crate::adapter::SiteAdapter)
//! - **Extracting**: every item resolved to media locators on a bounded pool,
//!   deduplicated by URL with the first owner kept
//! - **Downloading**: every locator written to its pre-assigned slot on a
//!   second bounded pool
//! - **Evaluating**: [`ProgressState`] committed and optionally persisted
//!
//! Per-task failures are logged and counted in [`RunCounters`]; only
//! authentication and bookkeeping failures end a run with [`PipelineError`].
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use std::sync::Arc;
//! use tagscrape_core::adapter::{Query, ZerochanAdapter};
//! use tagscrape_core::download::{Downloader, HttpClient, HttpClientConfig};
//! use tagscrape_core::pipeline::{EngineConfig, PipelineEngine};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = EngineConfig::new(10, 20)?;
//! let client = HttpClient::new(HttpClientConfig::default().with_pool_size(config.pool_size()))?;
//! let query = Query::new("Landscape", 30, 1)?;
//! let engine = PipelineEngine::new(
//!     Arc::new(ZerochanAdapter::new(client.clone())),
//!     client,
//!     Downloader::for_term(Path::new("downloads"), query.term()),
//!     config,
//! );
//! let summary = engine.run(&query, None).await?;
//! println!("{} files, stopped: {}", summary.downloaded, summary.stop_reason);
//! # Ok(())
//! # }
//! ```

mod engine;
mod error;
mod progress;
mod stats;

pub use engine::{EngineConfig, PipelineEngine};
pub use error::{
    DEFAULT_DOWNLOAD_CONCURRENCY, DEFAULT_EXTRACT_CONCURRENCY, MAX_CONCURRENCY, MIN_CONCURRENCY,
    PipelineError,
};
pub use progress::{ProgressError, ProgressState};
pub use stats::{RunCounters, RunSummary, StopReason};
