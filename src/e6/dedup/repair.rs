use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::PathBuf;

use crate::e6::dedup::DedupError;
use crate::e6::dedup::registry::{PostRegistry, shortest_path_index};
use crate::e6::fetcher::DownloadItem;
use crate::e6::sender::entries::PostEntry;

/// A post whose canonical file was deleted out-of-band: one of its former
/// link locations has been promoted and must be re-downloaded.
#[derive(Debug)]
pub(crate) struct RepairTarget {
    pub(crate) post_id: i64,
    pub(crate) dest: PathBuf,
}

/// Finds every post with no surviving regular copy and promotes its shortest
/// link into the new canonical location. The promoted path moves from the
/// group's links into its copies, so a later canonicalization pass re-points
/// the siblings. The promotion is registry-only: the broken link stays on
/// disk until pairing confirms the post can actually be re-downloaded.
pub(crate) fn plan_repairs(registry: &mut PostRegistry) -> Vec<RepairTarget> {
    let mut pending = Vec::new();
    for group in registry.groups_mut() {
        if !group.copies.is_empty() || group.links.is_empty() {
            continue;
        }
        let Some(index) = shortest_path_index(&group.links) else {
            continue;
        };
        let promoted = group.links.remove(index);
        info!(
            "Post {} has only broken links; re-downloading into {}",
            group.id(),
            promoted.display()
        );
        group.copies.push(promoted.clone());
        pending.push(RepairTarget {
            post_id: group.id(),
            dest: promoted,
        });
    }
    pending
}

/// Clears a paired target's broken link from disk ahead of its re-download;
/// a broken symlink cannot be overwritten in place by a plain file write on
/// every platform. Must only run for targets with a download item, so an
/// unavailable post keeps every one of its links.
pub(crate) fn clear_broken_link(target: &RepairTarget) -> Result<(), DedupError> {
    match fs::remove_file(&target.dest) {
        Ok(()) => Ok(()),
        // Already gone: nothing on disk to clear before the download.
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(DedupError::PromoteFailed {
            id: target.post_id,
            path: target.dest.clone(),
            source,
        }),
    }
}

/// Pairs pending repairs with fetched post records by explicit id lookup.
/// Records come back in no guaranteed order and may omit ids that were
/// deleted remotely, so positional alignment is never trusted; unpaired
/// targets (missing record, or a record with no file) are returned separately
/// for the caller to surface and skip.
pub(crate) fn pair_records(
    pending: Vec<RepairTarget>,
    records: Vec<PostEntry>,
) -> (Vec<(RepairTarget, DownloadItem)>, Vec<RepairTarget>) {
    let mut by_id: HashMap<i64, PostEntry> = records
        .into_iter()
        .map(|record| (record.id, record))
        .collect();

    let mut paired = Vec::new();
    let mut unpaired = Vec::new();
    for target in pending {
        let record = by_id.remove(&target.post_id);
        match record.and_then(|record| {
            record
                .file
                .url
                .clone()
                .map(|url| (url, record.file.size))
        }) {
            Some((url, size)) => {
                let item = DownloadItem {
                    url,
                    dest: target.dest.clone(),
                    size,
                };
                paired.push((target, item));
            }
            None => unpaired.push(target),
        }
    }
    (paired, unpaired)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::e6::sender::entries::{FileEntry, FlagEntry, PostEntry};

    fn record(id: i64, url: Option<&str>, size: i64) -> PostEntry {
        PostEntry {
            id,
            file: FileEntry {
                url: url.map(str::to_string),
                ext: "jpg".to_string(),
                size,
            },
            flags: FlagEntry::default(),
        }
    }

    #[test]
    fn pairs_by_id_and_reports_the_rest() {
        let pending = vec![
            RepairTarget {
                post_id: 1,
                dest: PathBuf::from("a/1 1.jpg"),
            },
            RepairTarget {
                post_id: 2,
                dest: PathBuf::from("a/2 2.jpg"),
            },
            RepairTarget {
                post_id: 3,
                dest: PathBuf::from("a/3 3.jpg"),
            },
        ];
        // Out of order, id 2 missing, id 3 has no file.
        let records = vec![record(3, None, 0), record(1, Some("https://x/1.jpg"), 10)];

        let (paired, unpaired) = pair_records(pending, records);

        assert_eq!(paired.len(), 1);
        let (target, item) = &paired[0];
        assert_eq!(target.post_id, 1);
        assert_eq!(item.url, "https://x/1.jpg");
        assert_eq!(item.dest, PathBuf::from("a/1 1.jpg"));
        assert_eq!(item.size, 10);

        let mut missing: Vec<i64> = unpaired.iter().map(|t| t.post_id).collect();
        missing.sort_unstable();
        assert_eq!(missing, vec![2, 3]);
    }

    #[cfg(unix)]
    #[test]
    fn promotes_the_shortest_broken_link() {
        use crate::e6::dedup::scanner::scan_into;
        use std::os::unix::fs::symlink;

        let dir = tempfile::tempdir().unwrap();
        symlink("gone.jpg", dir.path().join("5 200.jpg")).unwrap();
        symlink("gone.jpg", dir.path().join("66 200.jpg")).unwrap();
        std::fs::write(dir.path().join("1 300.jpg"), b"x").unwrap();

        let mut registry = PostRegistry::new();
        scan_into(dir.path(), &mut registry).unwrap();

        let pending = plan_repairs(&mut registry);

        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].post_id, 200);
        assert_eq!(pending[0].dest, dir.path().join("5 200.jpg"));
        // Planning is registry-only; the link survives on disk until the
        // download is confirmed, then clearing removes it.
        assert!(std::fs::symlink_metadata(&pending[0].dest).is_ok());
        clear_broken_link(&pending[0]).unwrap();
        assert!(std::fs::symlink_metadata(&pending[0].dest).is_err());

        let group = registry.get(200).unwrap();
        assert_eq!(group.copies, vec![dir.path().join("5 200.jpg")]);
        assert_eq!(group.links, vec![dir.path().join("66 200.jpg")]);
        // Groups with a surviving copy are not repair candidates.
        assert!(registry.get(300).unwrap().copies.len() == 1);
    }

    #[cfg(unix)]
    #[test]
    fn unavailable_posts_keep_all_their_links() {
        use crate::e6::dedup::scanner::scan_into;
        use std::os::unix::fs::symlink;

        let dir = tempfile::tempdir().unwrap();
        symlink("gone.jpg", dir.path().join("5 200.jpg")).unwrap();
        symlink("gone.jpg", dir.path().join("66 200.jpg")).unwrap();

        let mut registry = PostRegistry::new();
        scan_into(dir.path(), &mut registry).unwrap();

        // The server returns no record for post 200.
        let pending = plan_repairs(&mut registry);
        let (paired, unpaired) = pair_records(pending, Vec::new());

        assert!(paired.is_empty());
        assert_eq!(unpaired.len(), 1);
        assert_eq!(unpaired[0].post_id, 200);
        for name in ["5 200.jpg", "66 200.jpg"] {
            let metadata = std::fs::symlink_metadata(dir.path().join(name)).unwrap();
            assert!(metadata.file_type().is_symlink());
        }
    }
}
