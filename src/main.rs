//! CLI entry point for tagscrape.

use std::io::{self, IsTerminal};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use reqwest::cookie::Jar;
use tagscrape_core::adapter::{
    DanbooruAdapter, PIXIV_COOKIE_DOMAIN, PIXIV_LOGIN_URL, PixivAdapter, Query, SiteAdapter,
    ZerochanAdapter,
};
use tagscrape_core::auth::SessionAuth;
use tagscrape_core::download::{
    DEFAULT_MAX_RETRIES, Downloader, HttpClient, HttpClientConfig, RetryPolicy,
    constants::{CONNECT_TIMEOUT_SECS, READ_TIMEOUT_SECS},
};
use tagscrape_core::pipeline::{
    DEFAULT_DOWNLOAD_CONCURRENCY, DEFAULT_EXTRACT_CONCURRENCY, EngineConfig, PipelineEngine,
    ProgressState, RunSummary,
};
use tracing::{debug, info, warn};

mod app_config;
mod cli;
mod progress_ui;

use app_config::{FileConfig, VerbositySetting, load_default_file_config};
use cli::{Args, Site};

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    let loaded = if args.no_config {
        None
    } else {
        Some(load_default_file_config()?)
    };
    let file_config = loaded.as_ref().map(app_config::LoadedConfig::values).unwrap_or_default();

    init_tracing(&args, file_config.verbosity);
    debug!(?args, "CLI arguments parsed");
    if let Some(loaded) = &loaded
        && loaded.config.is_some()
        && let Some(path) = &loaded.path
    {
        debug!(path = %path.display(), "loaded config file");
    }

    run(args, &file_config).await
}

/// Priority: `RUST_LOG` > `-q` > `-v` count > config verbosity > info.
fn init_tracing(args: &Args, configured: Option<VerbositySetting>) {
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => configured.map_or("info", VerbositySetting::default_filter),
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

async fn run(args: Args, file_config: &FileConfig) -> Result<ExitCode> {
    let engine_config = EngineConfig::new(
        args.extract_concurrency
            .map(usize::from)
            .or(file_config.extract_concurrency)
            .unwrap_or(DEFAULT_EXTRACT_CONCURRENCY),
        args.download_concurrency
            .map(usize::from)
            .or(file_config.download_concurrency)
            .unwrap_or(DEFAULT_DOWNLOAD_CONCURRENCY),
    )?;
    let query = Query::new(args.tag.as_str(), args.count, args.start_page)?;
    let resume = load_resume_state(args.progress_file.as_deref(), args.restart)?;

    let max_retries = args
        .max_retries
        .map(u32::from)
        .or(file_config.max_retries)
        .unwrap_or(DEFAULT_MAX_RETRIES);
    let jar = Arc::new(Jar::default());
    let client = HttpClient::new(
        HttpClientConfig::default()
            .with_pool_size(engine_config.pool_size())
            .with_timeouts(
                Duration::from_secs(file_config.connect_timeout_secs.unwrap_or(CONNECT_TIMEOUT_SECS)),
                Duration::from_secs(file_config.read_timeout_secs.unwrap_or(READ_TIMEOUT_SECS)),
            )
            .with_retry_policy(RetryPolicy::with_max_attempts(max_retries))
            .with_cookie_jar(Arc::clone(&jar)),
    )?;

    let adapter: Arc<dyn SiteAdapter> = match args.site {
        Site::Zerochan => Arc::new(ZerochanAdapter::new(client.clone())),
        Site::Pixiv => Arc::new(PixivAdapter::new(client.clone())),
        Site::Danbooru => Arc::new(DanbooruAdapter::new(client.clone())),
    };

    let cookie_file = args.cookies.clone().or_else(|| file_config.cookie_file.clone());
    let auth = session_auth(args.site, Arc::clone(&jar), cookie_file.as_deref());
    if args.sign_out {
        auth.sign_out()?;
    }

    let output_root = args
        .output_dir
        .clone()
        .or_else(|| file_config.output_dir.clone())
        .unwrap_or_else(|| PathBuf::from("."));
    let downloader = Downloader::for_term(&output_root, query.term());
    let output_dir = downloader.output_dir().to_path_buf();

    let mut engine = PipelineEngine::new(adapter, client, downloader, engine_config);
    if args.site == Site::Pixiv {
        engine = engine.with_credentials(Arc::new(auth));
    } else if cookie_file.is_some() {
        // Optional on open sites; a stale cache must not stop the run.
        match auth.load_cached() {
            Ok(Some(credentials)) => info!(cookies = credentials.cookies.len(), "using cached cookies"),
            Ok(None) => debug!("no cached cookies for this site"),
            Err(e) => warn!(error = %e, "ignoring unreadable cookie file"),
        }
    }
    if let Some(path) = &args.progress_file {
        engine = engine.with_progress_file(path);
    }

    let interrupted = Arc::new(AtomicBool::new(false));
    engine = engine.with_cancel_flag(Arc::clone(&interrupted));
    let interrupted_signal = Arc::clone(&interrupted);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            interrupted_signal.store(true, Ordering::SeqCst);
        }
    });

    let use_spinner = progress_ui::should_use_spinner(io::stderr().is_terminal(), args.quiet);
    let (progress_handle, progress_stop) =
        progress_ui::spawn_progress_ui(use_spinner, engine.counters(), query.target_count());

    info!(site = ?args.site, term = query.term(), output = %output_dir.display(), "tagscrape starting");
    let result = engine.run(&query, resume).await;

    progress_stop.store(true, Ordering::SeqCst);
    if let Some(handle) = progress_handle {
        let _ = handle.await;
    }

    match result {
        Ok(summary) => {
            print_summary(&summary, &output_dir);
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            eprintln!("error: {e}");
            if let Some(progress) = e.progress() {
                print_stop_point(progress, engine.counters().downloaded());
            }
            Ok(ExitCode::FAILURE)
        }
    }
}

fn load_resume_state(path: Option<&Path>, restart: bool) -> Result<Option<ProgressState>> {
    let Some(path) = path else {
        return Ok(None);
    };
    if restart || !path.exists() {
        return Ok(None);
    }
    let state = ProgressState::load(path)
        .with_context(|| format!("Failed to resume from '{}'", path.display()))?;
    info!(
        page = state.page_index,
        next_slot = state.next_slot,
        remaining = state.remaining,
        "resuming"
    );
    Ok(Some(state))
}

fn session_auth(site: Site, jar: Arc<Jar>, cookie_file: Option<&Path>) -> SessionAuth {
    let (domain, site_url, login_url) = match site {
        Site::Pixiv => (PIXIV_COOKIE_DOMAIN, "https://www.pixiv.net/", PIXIV_LOGIN_URL),
        Site::Zerochan => (
            "zerochan.net",
            "https://www.zerochan.net/",
            "https://www.zerochan.net/login",
        ),
        Site::Danbooru => (
            "donmai.us",
            "https://danbooru.donmai.us/",
            "https://danbooru.donmai.us/login",
        ),
    };
    let auth = SessionAuth::new(domain, site_url, login_url, jar);
    match cookie_file {
        Some(path) => auth.with_cookie_file(path),
        None => auth,
    }
}

fn print_summary(summary: &RunSummary, output_dir: &Path) {
    println!("Stopped: {}", summary.stop_reason);
    println!(
        "Downloaded {} file(s) to {} in {:.1}s ({} round(s))",
        summary.downloaded,
        output_dir.display(),
        summary.elapsed.as_secs_f64(),
        summary.rounds
    );
    if summary.failed_downloads > 0 || summary.failed_extractions > 0 {
        println!(
            "Failures: {} download(s), {} item(s) without media",
            summary.failed_downloads, summary.failed_extractions
        );
    }
    println!(
        "Next page {}, next slot {}, {} item(s) remaining",
        summary.progress.page_index,
        summary.progress.next_slot,
        summary.progress.remaining.max(0)
    );
}

fn print_stop_point(progress: &ProgressState, downloaded: usize) {
    eprintln!(
        "Stopped at page {}, slot {} after {downloaded} download(s); {} item(s) remaining",
        progress.page_index,
        progress.next_slot,
        progress.remaining.max(0)
    );
}
