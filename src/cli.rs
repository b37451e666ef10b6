//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

/// Sites with a built-in adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Site {
    /// zerochan.net tag listings
    Zerochan,
    /// pixiv.net tag search (requires a signed-in session)
    Pixiv,
    /// danbooru.donmai.us post search
    Danbooru,
}

/// Download every image for a tag, resumably.
///
/// Pages through a site's tag search, resolves each result to its full-size
/// media, and writes numbered files into `<output-dir>/<tag>_scraped/`.
#[derive(Parser, Debug)]
#[command(name = "tagscrape")]
#[command(author, version, about)]
pub struct Args {
    /// Site to search
    #[arg(short, long, value_enum)]
    pub site: Site,

    /// Tag or search term
    #[arg(short, long)]
    pub tag: String,

    /// Number of items to process
    #[arg(short = 'n', long, value_parser = clap::value_parser!(u32).range(1..))]
    pub count: u32,

    /// First listing page (ignored when resuming)
    #[arg(short = 'p', long, default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..))]
    pub start_page: u32,

    /// Progress file: resumed from if present, rewritten after every round
    #[arg(long)]
    pub progress_file: Option<PathBuf>,

    /// Ignore an existing progress file and start fresh
    #[arg(long, requires = "progress_file")]
    pub restart: bool,

    /// Concurrent extraction tasks (1-100)
    #[arg(short = 'e', long, value_parser = clap::value_parser!(u8).range(1..=100))]
    pub extract_concurrency: Option<u8>,

    /// Concurrent downloads (1-100)
    #[arg(short = 'd', long, value_parser = clap::value_parser!(u8).range(1..=100))]
    pub download_concurrency: Option<u8>,

    /// Root directory for output folders [default: current directory]
    #[arg(short = 'o', long)]
    pub output_dir: Option<PathBuf>,

    /// Netscape cookie file for login-gated sites
    #[arg(long)]
    pub cookies: Option<PathBuf>,

    /// Delete the cached cookie file before starting
    #[arg(long, requires = "cookies")]
    pub sign_out: bool,

    /// Total attempts per request, first try included, for transient failures (1-10)
    #[arg(short = 'r', long, value_parser = clap::value_parser!(u8).range(1..=10))]
    pub max_retries: Option<u8>,

    /// Skip the config file
    #[arg(long)]
    pub no_config: bool,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    pub quiet: bool,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn parse(extra: &[&str]) -> Result<Args, clap::Error> {
        let mut argv = vec!["tagscrape", "--site", "zerochan", "--tag", "cat", "-n", "3"];
        argv.extend_from_slice(extra);
        Args::try_parse_from(argv)
    }

    #[test]
    fn test_cli_required_args_parse_with_defaults() {
        let args = parse(&[]).unwrap();
        assert_eq!(args.site, Site::Zerochan);
        assert_eq!(args.tag, "cat");
        assert_eq!(args.count, 3);
        assert_eq!(args.start_page, 1);
        assert!(args.progress_file.is_none());
        assert!(args.extract_concurrency.is_none());
        assert!(args.download_concurrency.is_none());
        assert!(args.max_retries.is_none());
        assert_eq!(args.verbose, 0);
        assert!(!args.quiet);
    }

    #[test]
    fn test_cli_missing_required_args() {
        let err = Args::try_parse_from(["tagscrape", "--tag", "cat"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn test_cli_site_values() {
        let args = Args::try_parse_from(["tagscrape", "-s", "pixiv", "-t", "x", "-n", "1"]).unwrap();
        assert_eq!(args.site, Site::Pixiv);
        let args =
            Args::try_parse_from(["tagscrape", "-s", "danbooru", "-t", "x", "-n", "1"]).unwrap();
        assert_eq!(args.site, Site::Danbooru);

        let err = Args::try_parse_from(["tagscrape", "-s", "gelbooru", "-t", "x", "-n", "1"])
            .unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::InvalidValue);
    }

    #[test]
    fn test_cli_count_and_start_page_must_be_positive() {
        let err = Args::try_parse_from(["tagscrape", "-s", "zerochan", "-t", "x", "-n", "0"])
            .unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
        let err = parse(&["--start-page", "0"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }

    #[test]
    fn test_cli_concurrency_bounds() {
        let args = parse(&["-e", "1", "-d", "100"]).unwrap();
        assert_eq!(args.extract_concurrency, Some(1));
        assert_eq!(args.download_concurrency, Some(100));

        let err = parse(&["--download-concurrency", "101"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
        let err = parse(&["--extract-concurrency", "0"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }

    #[test]
    fn test_cli_max_retries_range() {
        assert_eq!(parse(&["-r", "1"]).unwrap().max_retries, Some(1));
        assert_eq!(parse(&["-r", "10"]).unwrap().max_retries, Some(10));
        let err = parse(&["-r", "0"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
        let err = parse(&["-r", "11"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }

    #[test]
    fn test_cli_restart_requires_progress_file() {
        let err = parse(&["--restart"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
        let args = parse(&["--progress-file", "p.json", "--restart"]).unwrap();
        assert!(args.restart);
    }

    #[test]
    fn test_cli_sign_out_requires_cookies() {
        let err = parse(&["--sign-out"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
        let args = parse(&["--cookies", "c.txt", "--sign-out"]).unwrap();
        assert!(args.sign_out);
    }

    #[test]
    fn test_cli_verbose_and_quiet() {
        assert_eq!(parse(&["-vv"]).unwrap().verbose, 2);
        assert!(parse(&["-q"]).unwrap().quiet);
        let err = parse(&["-q", "-v"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict);
    }

    #[test]
    fn test_cli_help_flag_shows_usage() {
        let err = Args::try_parse_from(["tagscrape", "--help"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayHelp);
    }

    #[test]
    fn test_cli_version_flag_shows_version() {
        let err = Args::try_parse_from(["tagscrape", "--version"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayVersion);
    }

    #[test]
    fn test_cli_invalid_flag_returns_error() {
        let err = parse(&["--invalid-flag"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::UnknownArgument);
    }
}
