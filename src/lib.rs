//! tagscrape core library
//!
//! Finds every image posted under a tag on an image board and downloads it:
//! page through the site's tag search, resolve each result to its full-size
//! media, and write numbered files. Runs are resumable from a small progress
//! record.
//!
//! # Architecture
//!
//! - [`adapter`] - per-site discovery and locator extraction
//! - [`pipeline`] - the round loop, progress state and run statistics
//! - [`download`] - pooled retrying HTTP client and slot-numbered file output
//! - [`auth`] - session cookies for login-gated sites
//! - [`session`] - pluggable browser capability with an exclusive lease

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod adapter;
pub mod auth;
pub mod download;
pub mod pipeline;
pub mod session;
pub mod user_agent;

#[cfg(test)]
mod test_support;

// Re-export commonly used types
pub use adapter::{Item, Listing, Locator, Query, QueryError, SiteAdapter};
pub use download::{
    DEFAULT_MAX_RETRIES, DownloadError, Downloader, FailureType, HttpClient, HttpClientConfig,
    RetryDecision, RetryPolicy, classify_error,
};
pub use pipeline::{
    EngineConfig, PipelineEngine, PipelineError, ProgressState, RunCounters, RunSummary,
    StopReason,
};
