use std::io;
use std::path::PathBuf;

use anyhow::{Context, Result};
use thiserror::Error;

use crate::e6::fetcher::BulkFetcher;
use crate::e6::sender::RequestSender;

pub(crate) mod canonical;
pub(crate) mod registry;
pub(crate) mod repair;
pub(crate) mod scanner;

use self::registry::PostRegistry;

/// Failures that leave, or would leave, the on-disk link graph inconsistent.
/// These abort the run; a partially rewritten tree must never be silent.
#[derive(Debug, Error)]
pub(crate) enum DedupError {
    #[error("failed to replace {path} with a link to {target}: {source}")]
    FilesystemConflict {
        path: PathBuf,
        target: PathBuf,
        source: io::Error,
    },
    #[error("failed to remove broken link {path} while repairing post {id}: {source}")]
    PromoteFailed {
        id: i64,
        path: PathBuf,
        source: io::Error,
    },
}

/// The full deduplication workflow over one or more directory trees:
/// scan every root into a shared registry, re-download posts that survive
/// only as broken links, then rewrite all duplicates as relative symlinks.
///
/// Phases run strictly in sequence. The scan's view of copies versus links
/// is only valid while the tree is quiescent, so the repair fetch completes
/// before canonicalization touches anything, and callers must not download
/// into the same tree concurrently.
pub(crate) fn clean_directories(
    sender: &RequestSender,
    fetcher: &BulkFetcher,
    dirs: &[PathBuf],
    download_broken_symlinks: bool,
) -> Result<()> {
    let mut registry = PostRegistry::new();
    let mut tracked = 0;
    for dir in dirs {
        tracked += scanner::scan_into(dir, &mut registry)
            .with_context(|| format!("Failed to scan {}", dir.display()))?;
    }
    info!("Tracking {} files across {} posts", tracked, registry.len());
    if registry.is_empty() {
        return Ok(());
    }

    if download_broken_symlinks {
        repair_broken_links(sender, fetcher, &mut registry)?;
    }

    let rewritten = canonical::canonicalize_all(&registry)?;
    info!("Rewrote {} duplicate files as symlinks", rewritten);
    Ok(())
}

/// Promotes broken-link-only posts to fresh download targets and fetches
/// their content. Posts the server no longer knows about are dropped from
/// the registry with a warning, and their links stay on disk: the promoted
/// link is only cleared once pairing has produced a download item for it,
/// so canonicalization never points survivors at a file that will not exist.
fn repair_broken_links(
    sender: &RequestSender,
    fetcher: &BulkFetcher,
    registry: &mut PostRegistry,
) -> Result<()> {
    let pending = repair::plan_repairs(registry);
    if pending.is_empty() {
        return Ok(());
    }
    info!("{} posts survive only as broken links", pending.len());

    let ids: Vec<i64> = pending.iter().map(|target| target.post_id).collect();
    let records = sender
        .get_posts_by_ids(&ids)
        .context("Failed to look up posts for broken-link repair")?;

    let (paired, unpaired) = repair::pair_records(pending, records);
    for target in &unpaired {
        warn!(
            "Post {} is no longer available; leaving its links at {} untouched",
            target.post_id,
            target.dest.display()
        );
        registry.remove(target.post_id);
    }

    let mut items = Vec::with_capacity(paired.len());
    for (target, item) in paired {
        repair::clear_broken_link(&target)?;
        items.push(item);
    }

    // Overwrite unconditionally: the destinations were broken links moments
    // ago and must become regular files.
    fetcher.fetch(&items, true)?;
    Ok(())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::e6::io::Login;
    use std::fs;
    use std::os::unix::fs::symlink;
    use std::time::Duration;

    #[test]
    fn clean_without_broken_links_needs_no_network() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("1 100.jpg"), b"payload").unwrap();
        fs::write(dir.path().join("2 100.jpg"), b"payload").unwrap();
        fs::write(dir.path().join("notes.txt"), b"unrelated").unwrap();

        let sender = RequestSender::new(&Login::default(), Duration::from_secs(1)).unwrap();
        let fetcher = BulkFetcher::new(sender.clone(), 1);
        clean_directories(&sender, &fetcher, &[dir.path().to_path_buf()], true).unwrap();

        let canonical = dir.path().join("1 100.jpg");
        let duplicate = dir.path().join("2 100.jpg");
        assert!(fs::symlink_metadata(&canonical).unwrap().file_type().is_file());
        assert!(fs::symlink_metadata(&duplicate).unwrap().file_type().is_symlink());
        assert_eq!(fs::read(&duplicate).unwrap(), b"payload");
        // Unrelated files are never touched.
        assert_eq!(fs::read(dir.path().join("notes.txt")).unwrap(), b"unrelated");
    }

    #[test]
    fn broken_links_are_left_alone_when_repair_is_disabled() {
        let dir = tempfile::tempdir().unwrap();
        symlink("gone.jpg", dir.path().join("5 200.jpg")).unwrap();

        let sender = RequestSender::new(&Login::default(), Duration::from_secs(1)).unwrap();
        let fetcher = BulkFetcher::new(sender.clone(), 1);
        clean_directories(&sender, &fetcher, &[dir.path().to_path_buf()], false).unwrap();

        let link = dir.path().join("5 200.jpg");
        assert!(fs::symlink_metadata(&link).unwrap().file_type().is_symlink());
        assert_eq!(fs::read_link(&link).unwrap(), PathBuf::from("gone.jpg"));
    }

    #[test]
    fn scanning_multiple_roots_dedups_across_them() {
        let root_a = tempfile::tempdir().unwrap();
        let root_b = tempfile::tempdir().unwrap();
        fs::write(root_a.path().join("1 42.jpg"), b"payload").unwrap();
        fs::write(root_b.path().join("2 42.jpg"), b"payload").unwrap();

        let sender = RequestSender::new(&Login::default(), Duration::from_secs(1)).unwrap();
        let fetcher = BulkFetcher::new(sender.clone(), 1);
        clean_directories(
            &sender,
            &fetcher,
            &[root_a.path().to_path_buf(), root_b.path().to_path_buf()],
            true,
        )
        .unwrap();

        let a = root_a.path().join("1 42.jpg");
        let b = root_b.path().join("2 42.jpg");
        let a_is_link = fs::symlink_metadata(&a).unwrap().file_type().is_symlink();
        let b_is_link = fs::symlink_metadata(&b).unwrap().file_type().is_symlink();
        // Exactly one regular file survives per post id.
        assert_ne!(a_is_link, b_is_link);
        assert_eq!(fs::read(&a).unwrap(), b"payload");
        assert_eq!(fs::read(&b).unwrap(), b"payload");
    }
}
