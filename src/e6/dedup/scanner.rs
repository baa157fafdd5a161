use std::path::Path;

use anyhow::{Result, bail};
use once_cell::sync::Lazy;
use regex::Regex;
use walkdir::WalkDir;

use crate::e6::dedup::registry::PostRegistry;

/// A downloaded post's base name encodes `<ordinal> <post_id>.<ext>`: both
/// numbers are decimal digit runs, separated by a single space, with the id
/// immediately followed by a period. Only the id carries identity; the
/// ordinal exists for human browsing order.
static POST_FILE_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d+ (\d+)\.").expect("post file name pattern is valid"));

/// Extracts the post id from a file name matching the download convention.
/// Names that merely look post-like but fail the strict pattern are not an
/// error; download directories may contain unrelated files.
pub(crate) fn parse_post_id(file_name: &str) -> Option<i64> {
    POST_FILE_NAME
        .captures(file_name)
        .and_then(|captures| captures[1].parse().ok())
}

/// Recursively scans `root`, recording every file that matches the download
/// naming convention into the registry as either a regular copy or a
/// symbolic link. Returns the number of recorded paths.
///
/// Directories are followed, but a symbolic link is never dereferenced as a
/// directory, so link farms cannot cause re-traversal. The scan is purely
/// additive: no filesystem writes, and multiple roots may be scanned into
/// one shared registry.
pub(crate) fn scan_into(root: &Path, registry: &mut PostRegistry) -> Result<usize> {
    if !root.is_dir() {
        bail!("scan root {} is not a directory", root.display());
    }

    let mut recorded = 0;
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                warn!("Error accessing path under {}: {}", root.display(), err);
                continue;
            }
        };
        let file_type = entry.file_type();
        if file_type.is_dir() {
            continue;
        }
        let Some(name) = entry.file_name().to_str() else {
            continue;
        };
        let Some(post_id) = parse_post_id(name) else {
            trace!("Ignoring unrelated file {}", entry.path().display());
            continue;
        };
        if file_type.is_symlink() {
            registry.record_link(post_id, entry.into_path());
        } else {
            registry.record_copy(post_id, entry.into_path());
        }
        recorded += 1;
    }

    Ok(recorded)
}
