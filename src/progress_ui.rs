//! Progress UI (spinner) for pipeline runs.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use tagscrape_core::pipeline::RunCounters;

/// Spawns the spinner when requested.
/// Returns (handle, stop) so the caller can signal stop and await the handle.
/// When `use_spinner` is false, returns (None, stop) with stop already true.
pub(crate) fn spawn_progress_ui(
    use_spinner: bool,
    counters: Arc<RunCounters>,
    target: u32,
) -> (Option<tokio::task::JoinHandle<()>>, Arc<AtomicBool>) {
    if !use_spinner {
        return (None, Arc::new(AtomicBool::new(true)));
    }
    let stop = Arc::new(AtomicBool::new(false));
    let handle = spawn_spinner_inner(counters, target, Arc::clone(&stop));
    (Some(handle), stop)
}

fn spawn_spinner_inner(
    counters: Arc<RunCounters>,
    target: u32,
    stop: Arc<AtomicBool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::with_template("{spinner} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        spinner.enable_steady_tick(Duration::from_millis(100));

        while !stop.load(Ordering::SeqCst) {
            spinner.set_message(status_line(&counters, target));
            tokio::time::sleep(Duration::from_millis(120)).await;
        }

        spinner.finish_and_clear();
    })
}

fn status_line(counters: &RunCounters, target: u32) -> String {
    let failed = counters.failed_downloads() + counters.failed_extractions();
    let mut line = format!(
        "[round {}] {}/{} items discovered, {} files saved",
        counters.rounds() + 1,
        counters.discovered().min(usize::try_from(target).unwrap_or(usize::MAX)),
        target,
        counters.downloaded()
    );
    if failed > 0 {
        line.push_str(&format!(", {failed} failed"));
    }
    line
}

/// Whether to draw the spinner: only on an interactive stderr and when not quiet.
pub(crate) fn should_use_spinner(stderr_is_terminal: bool, quiet: bool) -> bool {
    stderr_is_terminal && !quiet
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_should_use_spinner() {
        assert!(should_use_spinner(true, false));
        assert!(!should_use_spinner(true, true));
        assert!(!should_use_spinner(false, false));
    }

    #[test]
    fn test_status_line_fresh_counters() {
        let counters = RunCounters::new();
        assert_eq!(
            status_line(&counters, 30),
            "[round 1] 0/30 items discovered, 0 files saved"
        );
    }

    #[tokio::test]
    async fn spawn_progress_ui_when_disabled_returns_none_handle_and_stop_already_true() {
        let (handle, stop) = spawn_progress_ui(false, Arc::new(RunCounters::new()), 1);
        assert!(handle.is_none());
        assert!(stop.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn spawn_progress_ui_when_enabled_stops_on_signal() {
        let (handle, stop) = spawn_progress_ui(true, Arc::new(RunCounters::new()), 1);
        assert!(handle.is_some());
        assert!(!stop.load(Ordering::SeqCst));

        stop.store(true, Ordering::SeqCst);
        handle.unwrap().await.unwrap();
    }
}
