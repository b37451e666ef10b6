//! HTTP access and file output.
//!
//! - [`HttpClient`] - pooled, retrying client shared by every stage of a run
//! - [`RetryPolicy`] / [`classify_error`] - which failures are worth retrying
//! - [`Downloader`] - writes one locator to one slot-numbered file
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use tagscrape_core::adapter::{Item, Locator};
//! use tagscrape_core::download::{Downloader, HttpClient, HttpClientConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = HttpClient::new(HttpClientConfig::default())?;
//! let downloader = Downloader::for_term(Path::new("./downloads"), "landscape");
//! let locator = Locator::new("https://example.com/a.jpg", Item::from("1"));
//! let path = downloader.fetch(&client, 0, &locator, None).await?;
//! println!("Saved: {}", path.display());
//! # Ok(())
//! # }
//! ```

mod client;
pub mod constants;
mod downloader;
mod error;
pub mod filename;
mod retry;

pub use client::{DEFAULT_POOL_SIZE, FetchedBody, HttpClient, HttpClientConfig};
pub use downloader::Downloader;
pub use error::DownloadError;
pub use retry::{
    DEFAULT_MAX_RETRIES, FailureType, RetryDecision, RetryPolicy, classify_error,
    parse_retry_after,
};
