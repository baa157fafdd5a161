use std::fs::{self, File, create_dir_all};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::blocking::{Client, RequestBuilder};
use serde::de::DeserializeOwned;

use crate::e6::io::Login;
use crate::e6::sender::entries::{
    PoolEntry, PostEntry, PostListResponse, SinglePostResponse,
};

pub(crate) mod entries;

const USER_AGENT: &str = concat!("e6tools/", env!("CARGO_PKG_VERSION"), " (bulk downloader)");

/// Base address for all API calls.
const BASE_URL: &str = "https://e621.net";

/// The API serves at most this many posts per search page.
const POSTS_PER_PAGE: usize = 320;

/// Batch-get requests are expressed as `id:a,b,c` searches; keep the query
/// string well under the server's tag length limits.
const ID_BATCH_SIZE: usize = 100;

/// Shared HTTP client wrapper through which every API call and file transfer
/// goes. Cheap to clone; clones share the underlying connection pool.
#[derive(Clone)]
pub(crate) struct RequestSender {
    client: Client,
    auth: Option<(String, String)>,
}

impl RequestSender {
    /// Builds the sender with the configured per-request timeout so one
    /// stalled connection cannot hang a batch indefinitely.
    pub(crate) fn new(login: &Login, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        let auth = if login.is_empty() {
            None
        } else {
            Some((login.username().to_string(), login.api_key().to_string()))
        };
        Ok(RequestSender { client, auth })
    }

    fn apply_auth(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.auth {
            Some((username, api_key)) => request.basic_auth(username, Some(api_key)),
            None => request,
        }
    }

    fn get_json<T: DeserializeOwned>(&self, url: &str, query: &[(&str, String)]) -> Result<T> {
        let response = self
            .apply_auth(self.client.get(url).query(query))
            .send()
            .with_context(|| format!("Request to {url} failed"))?
            .error_for_status()
            .with_context(|| format!("Server rejected request to {url}"))?;
        response
            .json()
            .with_context(|| format!("Malformed response from {url}"))
    }

    /// Searches for posts matching `tags`, exhausting result pages until the
    /// server runs dry or `limit` posts have been collected. Deleted posts
    /// and posts without a downloadable file are filtered out.
    pub(crate) fn search(&self, tags: &str, limit: usize) -> Result<Vec<PostEntry>> {
        let mut posts: Vec<PostEntry> = Vec::new();
        let mut invalid = 0usize;
        let mut page = 1u16;

        while posts.len() < limit {
            let url = format!("{BASE_URL}/posts.json");
            let response: PostListResponse = self.get_json(
                &url,
                &[
                    ("tags", tags.to_string()),
                    ("limit", POSTS_PER_PAGE.to_string()),
                    ("page", page.to_string()),
                ],
            )?;
            if response.posts.is_empty() {
                break;
            }
            let mut page_posts = response.posts;
            invalid += remove_invalid_posts(&mut page_posts);
            posts.append(&mut page_posts);
            page += 1;
        }

        posts.truncate(limit);
        if invalid > 0 {
            trace!("Filtered {invalid} deleted or fileless posts from search results");
        }
        Ok(posts)
    }

    /// Fetches a single post by id.
    pub(crate) fn get_post(&self, post_id: i64) -> Result<PostEntry> {
        let url = format!("{BASE_URL}/posts/{post_id}.json");
        let response: SinglePostResponse = self.get_json(&url, &[])?;
        Ok(response.post)
    }

    /// Fetches post records for a set of ids via `id:` searches. The server
    /// returns records in no guaranteed order and silently omits ids that no
    /// longer exist; callers must pair results by id, never by position.
    pub(crate) fn get_posts_by_ids(&self, ids: &[i64]) -> Result<Vec<PostEntry>> {
        let mut posts = Vec::with_capacity(ids.len());
        for chunk in ids.chunks(ID_BATCH_SIZE) {
            let tag = format!(
                "id:{}",
                chunk
                    .iter()
                    .map(i64::to_string)
                    .collect::<Vec<_>>()
                    .join(",")
            );
            let url = format!("{BASE_URL}/posts.json");
            let response: PostListResponse = self.get_json(
                &url,
                &[("tags", tag), ("limit", chunk.len().to_string())],
            )?;
            posts.extend(response.posts);
        }
        Ok(posts)
    }

    /// Fetches a pool (name plus ordered post ids) by id.
    pub(crate) fn get_pool(&self, pool_id: i64) -> Result<PoolEntry> {
        let url = format!("{BASE_URL}/pools/{pool_id}.json");
        self.get_json(&url, &[])
    }

    /// Streams `url` into `dest`, creating parent directories as needed.
    /// Returns the number of bytes written. The body lands in a `.part`
    /// staging file that is renamed over `dest` only once the transfer
    /// completes, so an interrupted transfer never leaves a partial file
    /// that a later existence check could mistake for a finished download.
    pub(crate) fn download_to_file(&self, url: &str, dest: &Path) -> Result<u64> {
        if let Some(parent) = dest.parent() {
            create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }
        let part = partial_path(dest);
        match self.transfer(url, &part) {
            Ok(written) => {
                replace_file(&part, dest)?;
                Ok(written)
            }
            Err(err) => {
                let _ = fs::remove_file(&part);
                Err(err)
            }
        }
    }

    fn transfer(&self, url: &str, part: &Path) -> Result<u64> {
        let mut response = self
            .apply_auth(self.client.get(url))
            .send()
            .with_context(|| format!("Request to {url} failed"))?
            .error_for_status()
            .with_context(|| format!("Server rejected download from {url}"))?;
        let mut file = File::create(part)
            .with_context(|| format!("Failed to create {}", part.display()))?;
        response
            .copy_to(&mut file)
            .with_context(|| format!("Transfer from {url} to {} failed", part.display()))
    }
}

/// Staging path for an in-flight transfer, next to its destination.
fn partial_path(dest: &Path) -> PathBuf {
    let mut name = dest.as_os_str().to_os_string();
    name.push(".part");
    PathBuf::from(name)
}

/// Renames the completed staging file over `dest`, clearing whatever sits
/// there first; during overwrite runs `dest` may be an existing file or a
/// broken symbolic link, and rename cannot replace either on every platform.
fn replace_file(part: &Path, dest: &Path) -> Result<()> {
    match fs::remove_file(dest) {
        Ok(()) => {}
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => {
            return Err(err).with_context(|| format!("Failed to clear {}", dest.display()));
        }
    }
    fs::rename(part, dest)
        .with_context(|| format!("Failed to move {} into place", part.display()))
}

fn remove_invalid_posts(posts: &mut Vec<PostEntry>) -> usize {
    let before = posts.len();
    posts.retain(|post| !post.flags.deleted && post.file.url.is_some());
    before - posts.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::e6::sender::entries::{FileEntry, FlagEntry};

    fn post(id: i64, url: Option<&str>, deleted: bool) -> PostEntry {
        PostEntry {
            id,
            file: FileEntry {
                url: url.map(str::to_string),
                ext: "jpg".to_string(),
                size: 1,
            },
            flags: FlagEntry { deleted },
        }
    }

    #[test]
    fn invalid_posts_are_dropped() {
        let mut posts = vec![
            post(1, Some("https://x/1.jpg"), false),
            post(2, None, false),
            post(3, Some("https://x/3.jpg"), true),
        ];
        let removed = remove_invalid_posts(&mut posts);
        assert_eq!(removed, 2);
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].id, 1);
    }
}
