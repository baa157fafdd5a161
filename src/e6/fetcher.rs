use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use rayon::ThreadPoolBuilder;

use crate::e6::sender::RequestSender;

/// One unit of download work: where the bytes come from, where they land,
/// and the size the server reported for progress accounting.
#[derive(Debug)]
pub(crate) struct DownloadItem {
    pub(crate) url: String,
    pub(crate) dest: PathBuf,
    pub(crate) size: i64,
}

/// Outcome counts for one batch. `failed > 0` never aborts the batch; a
/// rerun resumes through the skip-if-exists rule.
#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct FetchSummary {
    pub(crate) downloaded: usize,
    pub(crate) skipped: usize,
    pub(crate) failed: usize,
}

/// Downloads batches of files over a bounded worker pool with aggregate
/// byte progress. Every item writes to a unique destination path, so
/// concurrent tasks never interleave writes to the same file.
pub(crate) struct BulkFetcher {
    sender: RequestSender,
    concurrency: usize,
}

impl BulkFetcher {
    pub(crate) fn new(sender: RequestSender, concurrency: usize) -> Self {
        BulkFetcher {
            sender,
            concurrency: concurrency.max(1),
        }
    }

    /// Fetches every item, skipping destinations that already exist unless
    /// `overwrite` is set. Skipped items advance the progress bar by their
    /// full expected size, so a resumed batch still reports completion
    /// against the whole byte total rather than only the bytes transferred.
    pub(crate) fn fetch(&self, items: &[DownloadItem], overwrite: bool) -> Result<FetchSummary> {
        if items.is_empty() {
            return Ok(FetchSummary::default());
        }

        let total_bytes: u64 = items.iter().map(|item| item.size.max(0) as u64).sum();
        let progress = ProgressBar::new(total_bytes);
        progress.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=>-"),
        );
        progress.enable_steady_tick(Duration::from_millis(200));

        let downloaded = AtomicUsize::new(0);
        let skipped = AtomicUsize::new(0);
        let failed = AtomicUsize::new(0);

        let pool = ThreadPoolBuilder::new()
            .num_threads(self.concurrency)
            .build()
            .context("Failed to create download thread pool")?;

        pool.scope(|scope| {
            for item in items {
                let progress = &progress;
                let downloaded = &downloaded;
                let skipped = &skipped;
                let failed = &failed;
                scope.spawn(move |_| {
                    let size = item.size.max(0) as u64;
                    if !overwrite && item.dest.exists() {
                        trace!("Skipping existing file {}", item.dest.display());
                        skipped.fetch_add(1, Ordering::Relaxed);
                        progress.inc(size);
                        return;
                    }
                    if let Some(name) = item.dest.file_name() {
                        progress.set_message(name.to_string_lossy().into_owned());
                    }
                    match self.sender.download_to_file(&item.url, &item.dest) {
                        Ok(_) => {
                            downloaded.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(err) => {
                            error!("Failed to download {}: {err:#}", item.dest.display());
                            failed.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                    progress.inc(size);
                });
            }
        });

        let summary = FetchSummary {
            downloaded: downloaded.into_inner(),
            skipped: skipped.into_inner(),
            failed: failed.into_inner(),
        };
        progress.finish_and_clear();

        info!(
            "Batch finished: {} downloaded, {} skipped, {} failed",
            summary.downloaded, summary.skipped, summary.failed
        );
        if summary.failed > 0 {
            warn!(
                "{} downloads failed; rerun the same command to retry them",
                summary.failed
            );
        }
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::e6::io::Login;
    use std::fs;

    fn fetcher() -> BulkFetcher {
        let sender = RequestSender::new(&Login::default(), Duration::from_secs(1)).unwrap();
        BulkFetcher::new(sender, 2)
    }

    #[test]
    fn empty_batch_is_a_no_op() {
        let summary = fetcher().fetch(&[], false).unwrap();
        assert_eq!(summary, FetchSummary::default());
    }

    #[test]
    fn existing_destinations_are_skipped_without_network() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("1 100.jpg");
        fs::write(&dest, b"already here").unwrap();

        let items = vec![DownloadItem {
            // Unroutable on purpose; the skip must short-circuit the request.
            url: "http://127.0.0.1:1/100.jpg".to_string(),
            dest: dest.clone(),
            size: 1000,
        }];
        let summary = fetcher().fetch(&items, false).unwrap();

        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.downloaded, 0);
        assert_eq!(summary.failed, 0);
        assert_eq!(fs::read(&dest).unwrap(), b"already here");
    }

    #[test]
    fn interrupted_downloads_leave_nothing_for_skip_to_mistake() {
        use std::io::{Read, Write};
        use std::net::TcpListener;
        use std::thread;

        // Claims a 100-byte body but sends five bytes and hangs up.
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = thread::spawn(move || {
            for _ in 0..2 {
                let (mut stream, _) = listener.accept().unwrap();
                let mut request = [0u8; 512];
                let _ = stream.read(&mut request);
                let _ = stream
                    .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 100\r\n\r\nhello");
            }
        });

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("1 7.jpg");
        let items = vec![DownloadItem {
            url: format!("http://{addr}/7.jpg"),
            dest: dest.clone(),
            size: 100,
        }];

        let first = fetcher().fetch(&items, false).unwrap();
        assert_eq!(first.failed, 1);
        assert_eq!(first.downloaded, 0);
        // Neither a truncated destination nor a stale staging file survives.
        assert!(fs::symlink_metadata(&dest).is_err());
        assert!(fs::symlink_metadata(dir.path().join("1 7.jpg.part")).is_err());

        // The rerun retries instead of skipping a corrupt file.
        let second = fetcher().fetch(&items, false).unwrap();
        assert_eq!(second.failed, 1);
        assert_eq!(second.skipped, 0);
        server.join().unwrap();
    }

    #[test]
    fn transfer_errors_do_not_abort_the_batch() {
        let dir = tempfile::tempdir().unwrap();
        let existing = dir.path().join("1 1.jpg");
        fs::write(&existing, b"x").unwrap();

        let items = vec![
            DownloadItem {
                url: "http://127.0.0.1:1/unreachable.jpg".to_string(),
                dest: dir.path().join("2 2.jpg"),
                size: 10,
            },
            DownloadItem {
                url: "http://127.0.0.1:1/unreachable.jpg".to_string(),
                dest: existing.clone(),
                size: 10,
            },
        ];
        let summary = fetcher().fetch(&items, false).unwrap();

        assert_eq!(summary.failed, 1);
        assert_eq!(summary.skipped, 1);
        assert_eq!(fs::read(&existing).unwrap(), b"x");
    }
}
