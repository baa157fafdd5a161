use std::fs::{copy, create_dir_all};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Error, Result, bail};
use dialoguer::{Input, Password};

use crate::cli::Command;
use crate::e6::dedup::registry::PostRegistry;
use crate::e6::dedup::{clean_directories, scanner};
use crate::e6::fetcher::{BulkFetcher, DownloadItem};
use crate::e6::io::{Config, LOGIN_NAME, Login};
use crate::e6::sender::RequestSender;
use crate::e6::sender::entries::PostEntry;
use crate::e6::tag::normalize_tags;

/// Executes parsed CLI commands, wiring the request sender and bulk fetcher
/// to the download and deduplication workflows.
pub(crate) struct Program {
    sender: RequestSender,
    fetcher: BulkFetcher,
}

impl Program {
    pub(crate) fn new() -> Result<Self, Error> {
        let config = Config::get();
        let sender = RequestSender::new(
            Login::get(),
            Duration::from_secs(config.request_timeout_secs()),
        )?;
        let fetcher = BulkFetcher::new(sender.clone(), config.download_concurrency());
        Ok(Program { sender, fetcher })
    }

    pub(crate) fn run(&self, command: Command) -> Result<(), Error> {
        match command {
            Command::Search {
                tags,
                max_posts,
                download_dir,
                save_space,
            } => self.search(&tags, max_posts, download_dir, save_space),
            Command::Get {
                post_id,
                download_dir,
            } => self.get(post_id, download_dir),
            Command::Pool {
                pool_id,
                download_dir,
                save_space,
            } => self.pool(pool_id, download_dir, save_space),
            Command::Clean {
                dirs,
                no_download_broken_symlinks,
            } => self.clean(dirs, !no_download_broken_symlinks),
            Command::Login => self.login(),
            Command::Logout => self.logout(),
        }
    }

    /// Downloads every post matching the tag query into a directory named
    /// after the normalized query, so equivalent queries share one library
    /// directory no matter how the tags were ordered or cased.
    fn search(
        &self,
        tags: &[String],
        max_posts: usize,
        download_dir: Option<PathBuf>,
        save_space: bool,
    ) -> Result<(), Error> {
        let query = normalize_tags(tags).join(" ");
        info!(
            "Searching for {}...",
            console::style(format!("\"{query}\"")).color256(39).italic()
        );
        let posts = self.sender.search(&query, max_posts)?;
        info!("{} posts found", posts.len());

        let root = self.download_root(download_dir);
        let directory = root.join(sanitize_directory_name(&query));
        create_dir_all(&directory)
            .with_context(|| format!("Failed to create {}", directory.display()))?;

        if save_space {
            self.seed_existing_copies(&root, &directory, &posts)?;
        }

        let items = enumerated_items(&posts, &directory);
        self.fetcher.fetch(&items, false)?;

        if save_space {
            clean_directories(&self.sender, &self.fetcher, &[root], true)?;
        }
        Ok(())
    }

    /// Downloads a single post as `<id>.<ext>`, outside the enumerated
    /// naming convention since it belongs to no search directory.
    fn get(&self, post_id: i64, download_dir: Option<PathBuf>) -> Result<(), Error> {
        let post = self.sender.get_post(post_id)?;
        let Some(url) = post.file.url.as_deref() else {
            bail!("Post {post_id} has no downloadable file");
        };
        let root = self.download_root(download_dir);
        create_dir_all(&root).with_context(|| format!("Failed to create {}", root.display()))?;
        let dest = root.join(format!("{}.{}", post.id, post.file.ext));
        self.sender.download_to_file(url, &dest)?;
        info!("Saved {}", dest.display());
        Ok(())
    }

    /// Downloads a whole pool into a directory named after the pool. Posts
    /// are enumerated in reverse pool order, matching the reading order the
    /// site presents.
    fn pool(
        &self,
        pool_id: i64,
        download_dir: Option<PathBuf>,
        save_space: bool,
    ) -> Result<(), Error> {
        let pool = self.sender.get_pool(pool_id)?;
        let mut posts = self.sender.get_posts_by_ids(&pool.post_ids)?;
        sort_into_pool_order(&pool.post_ids, &mut posts);
        posts.reverse();
        info!(
            "{} posts found in pool {}",
            posts.len(),
            console::style(format!("\"{}\"", pool.name))
                .color256(39)
                .italic()
        );

        let root = self.download_root(download_dir);
        let directory = root.join(sanitize_directory_name(&pool.name));
        create_dir_all(&directory)
            .with_context(|| format!("Failed to create {}", directory.display()))?;

        let items = enumerated_items(&posts, &directory);
        self.fetcher.fetch(&items, false)?;

        if save_space {
            clean_directories(&self.sender, &self.fetcher, &[root], true)?;
        }
        Ok(())
    }

    /// The deduplication workflow over explicit roots; defaults to the
    /// current directory.
    fn clean(&self, dirs: Vec<PathBuf>, download_broken_symlinks: bool) -> Result<(), Error> {
        let dirs = if dirs.is_empty() {
            vec![PathBuf::from(".")]
        } else {
            dirs
        };
        clean_directories(&self.sender, &self.fetcher, &dirs, download_broken_symlinks)?;
        Ok(())
    }

    fn login(&self) -> Result<(), Error> {
        let username: String = Input::new()
            .with_prompt("Username")
            .interact_text()
            .context("Terminal unable to read username")?;
        let api_key: String = Password::new()
            .with_prompt("API key")
            .interact()
            .context("Terminal unable to read API key")?;
        Login::save(&username, &api_key)?;
        info!("Credentials saved to {LOGIN_NAME}.");
        Ok(())
    }

    fn logout(&self) -> Result<(), Error> {
        Login::remove()?;
        info!("Credentials removed.");
        Ok(())
    }

    fn download_root(&self, download_dir: Option<PathBuf>) -> PathBuf {
        download_dir.unwrap_or_else(|| PathBuf::from(Config::get().download_directory()))
    }

    /// Before a save-space search run, copies posts that already exist
    /// somewhere under the download root into the target directory, so the
    /// fetch skips them and the subsequent clean collapses them into links.
    fn seed_existing_copies(
        &self,
        root: &Path,
        directory: &Path,
        posts: &[PostEntry],
    ) -> Result<(), Error> {
        let mut registry = PostRegistry::new();
        if root.is_dir() {
            scanner::scan_into(root, &mut registry)?;
        }

        let mut seeded = 0;
        for (index, post) in posts.iter().enumerate() {
            let Some(source) = registry.get(post.id).and_then(|group| group.copies.first())
            else {
                continue;
            };
            let dest = directory.join(post_file_name(post, index));
            if !dest.is_file() {
                copy(source, &dest).with_context(|| {
                    format!("Failed to copy {} to {}", source.display(), dest.display())
                })?;
            }
            seeded += 1;
        }
        if seeded > 0 {
            info!("{seeded} posts already downloaded");
        }
        Ok(())
    }
}

/// File name under the download convention: 1-based ordinal, post id, then
/// the extension. The path scanner parses exactly this shape, so this is a
/// protocol boundary for existing libraries.
fn post_file_name(post: &PostEntry, index: usize) -> String {
    format!("{} {}.{}", index + 1, post.id, post.file.ext)
}

fn enumerated_items(posts: &[PostEntry], directory: &Path) -> Vec<DownloadItem> {
    posts
        .iter()
        .enumerate()
        .filter_map(|(index, post)| {
            let url = post.file.url.clone()?;
            Some(DownloadItem {
                url,
                dest: directory.join(post_file_name(post, index)),
                size: post.file.size,
            })
        })
        .collect()
}

/// Orders fetched records to match the pool's own post ordering; the
/// batch-get endpoint returns them in arbitrary order.
fn sort_into_pool_order(post_ids: &[i64], posts: &mut [PostEntry]) {
    let position = |id: i64| {
        post_ids
            .iter()
            .position(|&pool_id| pool_id == id)
            .unwrap_or(usize::MAX)
    };
    posts.sort_by_key(|post| position(post.id));
}

/// Replaces characters that are unsafe in directory names on common
/// filesystems. Only the directory name is sanitized; the normalized query
/// itself stays the cache key. Distinct queries can collide after
/// replacement (`a:b` and `a_b` share a directory); the later run then
/// downloads into, and dedups against, the earlier one.
fn sanitize_directory_name(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            _ => c,
        })
        .collect()
}
