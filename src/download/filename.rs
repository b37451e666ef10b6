//! Slot filenames, sanitization, and collision-avoiding paths.
//!
//! Every downloaded file is named after its slot:
//! `{prefix}_idx_{NNNN}_{YYYYmmdd_HHMMSS}{.ext}` where `NNNN` is the 1-based,
//! zero-padded slot number. Slots are assigned before download starts, so the
//! number is stable no matter which download finishes first.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use url::Url;

use super::constants::DEFAULT_EXTENSION;

/// Maximum numeric suffix tried when a slot filename already exists.
pub const MAX_COLLISION_SUFFIX: usize = 1000;

/// Suffix appended to the sanitized search term to form the output folder name.
const OUTPUT_DIR_SUFFIX: &str = "_scraped";

/// Builds the slot filename for `slot` (0-based; written as `slot + 1`).
#[must_use]
pub fn slot_filename(prefix: &str, slot: u64, timestamp: &str, extension: &str) -> String {
    format!(
        "{prefix}_idx_{number:04}_{timestamp}{extension}",
        number = slot.saturating_add(1)
    )
}

/// Formats `now` the way slot filenames expect (`YYYYmmdd_HHMMSS`).
#[must_use]
pub fn filename_timestamp(now: DateTime<Local>) -> String {
    now.format("%Y%m%d_%H%M%S").to_string()
}

/// Output folder for a search term: `<root>/<sanitized term>_scraped`.
#[must_use]
pub fn output_dir_for(root: &Path, term: &str) -> PathBuf {
    root.join(format!("{}{OUTPUT_DIR_SUFFIX}", file_prefix_for(term)))
}

/// File prefix for a search term. Falls back to `item` when nothing survives sanitization.
#[must_use]
pub fn file_prefix_for(term: &str) -> String {
    let cleaned = sanitize_filename_component(term);
    if cleaned.is_empty() || cleaned.chars().all(|c| c == '.') {
        "item".to_string()
    } else {
        cleaned
    }
}

/// Picks the extension for a download: URL path, then `Content-Type`, then `.jpg`.
#[must_use]
pub fn pick_extension(url: &str, content_type: Option<&str>) -> String {
    extension_from_url(url)
        .or_else(|| content_type.and_then(extension_from_content_type).map(str::to_string))
        .unwrap_or_else(|| DEFAULT_EXTENSION.to_string())
}

pub(crate) fn extension_from_url(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let last_segment = parsed.path_segments()?.next_back()?;
    let dot_index = last_segment.rfind('.')?;
    let ext = &last_segment[dot_index..];
    if ext.len() <= 1 || ext.len() > 6 || !ext[1..].chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(ext.to_lowercase())
}

/// Guess a media extension from a `Content-Type` header.
pub(crate) fn extension_from_content_type(content_type: &str) -> Option<&'static str> {
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_lowercase();

    match mime.as_str() {
        "image/jpeg" | "image/jpg" => Some(".jpg"),
        "image/png" => Some(".png"),
        "image/gif" => Some(".gif"),
        "image/webp" => Some(".webp"),
        "image/avif" => Some(".avif"),
        "image/bmp" => Some(".bmp"),
        "video/mp4" => Some(".mp4"),
        "video/webm" => Some(".webm"),
        _ => None,
    }
}

/// Replaces anything that is not safe in a filename with `_`, collapsing runs.
pub(crate) fn sanitize_filename_component(value: &str) -> String {
    let mut out = String::new();
    let mut prev_sep = false;
    for ch in value.chars() {
        let mapped = match ch {
            c if c.is_alphanumeric() || matches!(c, '-' | '.') => c,
            _ => '_',
        };
        if mapped == '_' {
            if !prev_sep {
                out.push('_');
                prev_sep = true;
            }
        } else {
            out.push(mapped);
            prev_sep = false;
        }
    }
    out.trim_matches('_').to_string()
}

/// Candidate paths for `filename` in `dir`: the name itself, then `stem_1.ext`, `stem_2.ext`, ...
pub(crate) fn collision_candidates<'a>(
    dir: &'a Path,
    filename: &'a str,
) -> impl Iterator<Item = PathBuf> + 'a {
    let (stem, ext) = match filename.rfind('.') {
        Some(pos) if pos > 0 => (&filename[..pos], &filename[pos..]),
        _ => (filename, ""),
    };
    std::iter::once(dir.join(filename))
        .chain((1..MAX_COLLISION_SUFFIX).map(move |i| dir.join(format!("{stem}_{i}{ext}"))))
}
