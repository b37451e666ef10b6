//! File configuration for CLI defaults.
//!
//! `key = value` lines, `#` comments, double-quoted strings. CLI flags win
//! over file values.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use tagscrape_core::pipeline::{MAX_CONCURRENCY, MIN_CONCURRENCY};

const APP_DIR: &str = "tagscrape";

/// Defaults read from `config.toml`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileConfig {
    /// Root directory for `<term>_scraped` folders.
    pub output_dir: Option<PathBuf>,
    /// Concurrent extraction tasks (1..=100).
    pub extract_concurrency: Option<usize>,
    /// Concurrent download tasks (1..=100).
    pub download_concurrency: Option<usize>,
    /// Attempts per request including the first (1..=10).
    pub max_retries: Option<u32>,
    /// Connect timeout in seconds (1..=3600).
    pub connect_timeout_secs: Option<u64>,
    /// Read timeout in seconds (1..=3600).
    pub read_timeout_secs: Option<u64>,
    /// Netscape cookie file for login-gated sites.
    pub cookie_file: Option<PathBuf>,
    /// Default verbosity.
    pub verbosity: Option<VerbositySetting>,
}

impl FileConfig {
    /// Checks every value against the ranges the CLI accepts.
    pub fn validate(&self) -> Result<()> {
        validate_concurrency("extract_concurrency", self.extract_concurrency)?;
        validate_concurrency("download_concurrency", self.download_concurrency)?;
        if let Some(max_retries) = self.max_retries
            && !(1..=10).contains(&max_retries)
        {
            bail!("Invalid config value for `max_retries`: {max_retries}. Expected range: 1..=10");
        }
        validate_timeout_secs("connect_timeout_secs", self.connect_timeout_secs)?;
        validate_timeout_secs("read_timeout_secs", self.read_timeout_secs)?;
        Ok(())
    }
}

fn validate_concurrency(field: &str, value: Option<usize>) -> Result<()> {
    let Some(value) = value else {
        return Ok(());
    };
    if !(MIN_CONCURRENCY..=MAX_CONCURRENCY).contains(&value) {
        bail!(
            "Invalid config value for `{field}`: {value}. Expected range: {MIN_CONCURRENCY}..={MAX_CONCURRENCY}"
        );
    }
    Ok(())
}

fn validate_timeout_secs(field: &str, value: Option<u64>) -> Result<()> {
    let Some(value) = value else {
        return Ok(());
    };
    if !(1..=3600).contains(&value) {
        bail!("Invalid config value for `{field}`: {value}. Expected range: 1..=3600");
    }
    Ok(())
}

/// Verbosity labels accepted in the config file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerbositySetting {
    Default,
    Verbose,
    Quiet,
    Debug,
}

impl VerbositySetting {
    /// Log filter used when neither `RUST_LOG` nor a CLI flag says otherwise.
    #[must_use]
    pub fn default_filter(self) -> &'static str {
        match self {
            Self::Default => "info",
            Self::Verbose => "debug",
            Self::Quiet => "error",
            Self::Debug => "trace",
        }
    }
}

/// Result of looking for the config file.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    /// Where the file was looked for, if a base directory is known.
    pub path: Option<PathBuf>,
    /// Parsed config when the file exists.
    pub config: Option<FileConfig>,
}

impl LoadedConfig {
    /// Parsed values, or all-`None` when no file was loaded.
    #[must_use]
    pub fn values(&self) -> FileConfig {
        self.config.clone().unwrap_or_default()
    }
}

/// Default config path.
///
/// Priority:
/// 1. `$XDG_CONFIG_HOME/tagscrape/config.toml`
/// 2. `$HOME/.config/tagscrape/config.toml`
#[must_use]
pub fn resolve_default_config_path() -> Option<PathBuf> {
    if let Some(xdg_config_home) = env_var_non_empty_os("XDG_CONFIG_HOME") {
        return Some(PathBuf::from(xdg_config_home).join(APP_DIR).join("config.toml"));
    }

    let home = env_var_non_empty_os("HOME")?;
    Some(
        PathBuf::from(home)
            .join(".config")
            .join(APP_DIR)
            .join("config.toml"),
    )
}

fn env_var_non_empty_os(name: &str) -> Option<std::ffi::OsString> {
    let value = env::var_os(name)?;
    if value.is_empty() { None } else { Some(value) }
}

/// Loads the config from the default path if the file exists.
pub fn load_default_file_config() -> Result<LoadedConfig> {
    let path = resolve_default_config_path();
    let config = match path.as_deref() {
        Some(path_ref) if path_ref.exists() => Some(load_file_config(path_ref)?),
        _ => None,
    };
    Ok(LoadedConfig { path, config })
}

fn load_file_config(path: &Path) -> Result<FileConfig> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file '{}'", path.display()))?;
    parse_config_str(&raw)
        .with_context(|| format!("Failed to parse config file '{}'", path.display()))
}

fn parse_config_str(raw: &str) -> Result<FileConfig> {
    let mut cfg = FileConfig::default();
    for (line_index, raw_line) in raw.lines().enumerate() {
        let line = strip_inline_comment(raw_line).trim();
        if line.is_empty() {
            continue;
        }
        let line_number = line_index + 1;

        let Some((raw_key, raw_value)) = line.split_once('=') else {
            bail!("Invalid config syntax on line {line_number}: expected key = value");
        };

        let key = raw_key.trim();
        let value = raw_value.trim();
        let context = || format!("Invalid `{key}` value on line {line_number}");

        match key {
            "output_dir" => {
                cfg.output_dir = Some(PathBuf::from(parse_string_literal(value).with_context(context)?));
            }
            "cookie_file" => {
                cfg.cookie_file = Some(PathBuf::from(parse_string_literal(value).with_context(context)?));
            }
            "extract_concurrency" => {
                cfg.extract_concurrency = Some(parse_usize(value).with_context(context)?);
            }
            "download_concurrency" => {
                cfg.download_concurrency = Some(parse_usize(value).with_context(context)?);
            }
            "max_retries" => {
                let parsed = parse_integer_u64(value).with_context(context)?;
                let n = u32::try_from(parsed)
                    .map_err(|_| anyhow::anyhow!("max_retries out of range for u32"))?;
                cfg.max_retries = Some(n);
            }
            "connect_timeout_secs" => {
                cfg.connect_timeout_secs = Some(parse_integer_u64(value).with_context(context)?);
            }
            "read_timeout_secs" => {
                cfg.read_timeout_secs = Some(parse_integer_u64(value).with_context(context)?);
            }
            "verbosity" => {
                let parsed = parse_string_literal(value).with_context(context)?;
                cfg.verbosity = Some(parse_verbosity(&parsed).with_context(|| {
                    format!("Invalid `verbosity` value '{parsed}' on line {line_number}")
                })?);
            }
            unknown => {
                bail!("Unknown configuration key: '{unknown}' on line {line_number}");
            }
        }
    }
    cfg.validate()?;
    Ok(cfg)
}

fn strip_inline_comment(line: &str) -> &str {
    let mut in_string = false;
    for (index, ch) in line.char_indices() {
        match ch {
            '"' => in_string = !in_string,
            '#' if !in_string => return &line[..index],
            _ => {}
        }
    }
    line
}

fn parse_string_literal(raw_value: &str) -> Result<String> {
    if raw_value.len() < 2 || !raw_value.starts_with('"') || !raw_value.ends_with('"') {
        bail!("Expected double-quoted string");
    }
    Ok(raw_value[1..raw_value.len() - 1].to_string())
}

fn parse_integer_u64(raw_value: &str) -> Result<u64> {
    let token = raw_value.trim();
    if token.is_empty() {
        bail!("Expected integer value");
    }
    let value = token.parse::<i128>()?;
    if value < 0 {
        bail!("Expected non-negative integer");
    }
    u64::try_from(value).map_err(|_| anyhow::anyhow!("Integer value out of range for u64"))
}

fn parse_usize(raw_value: &str) -> Result<usize> {
    let value = parse_integer_u64(raw_value)?;
    usize::try_from(value).map_err(|_| anyhow::anyhow!("Integer value out of range for usize"))
}

fn parse_verbosity(value: &str) -> Result<VerbositySetting> {
    match value {
        "default" => Ok(VerbositySetting::Default),
        "verbose" => Ok(VerbositySetting::Verbose),
        "quiet" => Ok(VerbositySetting::Quiet),
        "debug" => Ok(VerbositySetting::Debug),
        _ => bail!("Expected one of: default, verbose, quiet, debug"),
    }
}
