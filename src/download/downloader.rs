//! Slot-indexed media downloads.
//!
//! Bodies are written to a hidden temp file inside the output directory and
//! then linked into place without overwriting anything. A failed download
//! leaves nothing behind: the temp file is removed when it drops.

use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::Local;
use tempfile::Builder;
use tracing::{debug, instrument};

use super::client::HttpClient;
use super::error::DownloadError;
use super::filename::{
    collision_candidates, file_prefix_for, filename_timestamp, output_dir_for, pick_extension,
    slot_filename,
};
use crate::adapter::Locator;

/// Writes fetched media into one output directory under slot filenames.
#[derive(Debug, Clone)]
pub struct Downloader {
    output_dir: PathBuf,
    file_prefix: String,
}

impl Downloader {
    /// Creates a downloader writing `{file_prefix}_idx_...` files into `output_dir`.
    #[must_use]
    pub fn new(output_dir: impl Into<PathBuf>, file_prefix: impl Into<String>) -> Self {
        Self {
            output_dir: output_dir.into(),
            file_prefix: file_prefix.into(),
        }
    }

    /// Downloader for a search term: `<root>/<term>_scraped/<term>_idx_...`.
    #[must_use]
    pub fn for_term(root: &Path, term: &str) -> Self {
        Self::new(output_dir_for(root, term), file_prefix_for(term))
    }

    /// Directory files are written to.
    #[must_use]
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Prefix of every filename this downloader writes.
    #[must_use]
    pub fn file_prefix(&self) -> &str {
        &self.file_prefix
    }

    /// Fetches `locator` and stores it under `slot`.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::HttpStatus`] for a non-success response,
    /// [`DownloadError::Io`] when the file cannot be written, or the client's
    /// transport error once retries are exhausted.
    #[instrument(skip(self, client, locator, referer), fields(url = %locator.url, item = %locator.item))]
    pub async fn fetch(
        &self,
        client: &HttpClient,
        slot: u64,
        locator: &Locator,
        referer: Option<&str>,
    ) -> Result<PathBuf, DownloadError> {
        let body = client.get_bytes(&locator.url, referer).await?;
        let extension = pick_extension(&locator.url, body.content_type.as_deref());
        let filename = slot_filename(
            &self.file_prefix,
            slot,
            &filename_timestamp(Local::now()),
            &extension,
        );

        let dir = self.output_dir.clone();
        let join_dir = dir.clone();
        let path = tokio::task::spawn_blocking(move || {
            write_no_clobber(&dir, &filename, &body.bytes)
        })
        .await
        .map_err(|e| DownloadError::io(join_dir, io::Error::other(e)))??;

        debug!(path = %path.display(), "file written");
        Ok(path)
    }
}

/// Writes `bytes` to `dir/filename`, or the first free `_N` variant of it.
fn write_no_clobber(dir: &Path, filename: &str, bytes: &[u8]) -> Result<PathBuf, DownloadError> {
    std::fs::create_dir_all(dir).map_err(|e| DownloadError::io(dir, e))?;

    let mut temp = Builder::new()
        .prefix(".")
        .suffix(".part")
        .tempfile_in(dir)
        .map_err(|e| DownloadError::io(dir, e))?;
    if let Err(e) = temp.write_all(bytes).and_then(|()| temp.flush()) {
        return Err(DownloadError::io(temp.path(), e));
    }

    for candidate in collision_candidates(dir, filename) {
        match temp.persist_noclobber(&candidate) {
            Ok(_) => return Ok(candidate),
            Err(err) if err.error.kind() == io::ErrorKind::AlreadyExists => {
                debug!(path = %candidate.display(), "slot filename taken, trying next suffix");
                temp = err.file;
            }
            Err(err) => return Err(DownloadError::io(candidate, err.error)),
        }
    }

    Err(DownloadError::io(
        dir.join(filename),
        io::Error::new(io::ErrorKind::AlreadyExists, "no free filename variant"),
    ))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::adapter::Item;
    use crate::download::{HttpClientConfig, RetryPolicy};
    use crate::test_support::socket_guard::start_mock_server_or_skip;
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, ResponseTemplate};

    fn client() -> HttpClient {
        HttpClient::new(HttpClientConfig::default().with_retry_policy(RetryPolicy::new(
            2,
            Duration::from_millis(5),
            Duration::from_millis(10),
            2.0,
        )))
        .unwrap()
    }

    fn visible_files(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_for_term_layout() {
        let downloader = Downloader::for_term(Path::new("/data"), "blue sky");
        assert_eq!(downloader.output_dir(), Path::new("/data/blue_sky_scraped"));
        assert_eq!(downloader.file_prefix(), "blue_sky");
    }

    #[test]
    fn test_write_no_clobber_appends_suffix() {
        let temp_dir = TempDir::new().unwrap();
        let first = write_no_clobber(temp_dir.path(), "a_idx_0001_t.jpg", b"one").unwrap();
        let second = write_no_clobber(temp_dir.path(), "a_idx_0001_t.jpg", b"two").unwrap();
        assert_eq!(first, temp_dir.path().join("a_idx_0001_t.jpg"));
        assert_eq!(second, temp_dir.path().join("a_idx_0001_t_1.jpg"));
        assert_eq!(std::fs::read(&first).unwrap(), b"one");
        assert_eq!(std::fs::read(&second).unwrap(), b"two");
        assert_eq!(visible_files(temp_dir.path()).len(), 2);
    }

    #[tokio::test]
    async fn test_fetch_writes_slot_file() {
        let Some(mock_server) = start_mock_server_or_skip().await else {
            return;
        };
        Mock::given(method("GET"))
            .and(path("/img/7.png"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![9u8; 16]))
            .mount(&mock_server)
            .await;

        let temp_dir = TempDir::new().unwrap();
        let downloader = Downloader::new(temp_dir.path(), "cat");
        let locator = Locator::new(format!("{}/img/7.png", mock_server.uri()), Item::from("7"));

        let path = downloader.fetch(&client(), 4, &locator, None).await.unwrap();
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("cat_idx_0005_"), "{name}");
        assert!(name.ends_with(".png"), "{name}");
        assert_eq!(std::fs::read(&path).unwrap().len(), 16);
    }

    #[tokio::test]
    async fn test_fetch_bad_status_leaves_no_file() {
        let Some(mock_server) = start_mock_server_or_skip().await else {
            return;
        };
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&mock_server)
            .await;

        let temp_dir = TempDir::new().unwrap();
        let downloader = Downloader::new(temp_dir.path(), "cat");
        let locator = Locator::new(format!("{}/gone.jpg", mock_server.uri()), Item::from("1"));

        let result = downloader.fetch(&client(), 0, &locator, None).await;
        assert!(matches!(
            result,
            Err(DownloadError::HttpStatus { status: 404, .. })
        ));
        assert!(visible_files(temp_dir.path()).is_empty());
    }
}
