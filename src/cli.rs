use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "e6tools",
    version,
    about = "Bulk downloader and symlink deduplicator for e621"
)]
pub(crate) struct Cli {
    #[command(subcommand)]
    pub(crate) command: Command,
}

#[derive(Subcommand)]
pub(crate) enum Command {
    /// Download posts that match the given set of tags
    Search {
        /// Tags to search for
        #[arg(required = true)]
        tags: Vec<String>,
        /// Stop after grabbing this many posts
        #[arg(short = 'm', long = "max-posts", default_value_t = 10_000)]
        max_posts: usize,
        /// Path to the download directory (defaults to the configured one)
        #[arg(short = 'd', long = "download-dir")]
        download_dir: Option<PathBuf>,
        /// Save space by turning duplicates into symlinks afterwards
        #[arg(short = 's', long = "save-space")]
        save_space: bool,
    },
    /// Download a single post with a given id
    Get {
        post_id: i64,
        /// Path to the download directory (defaults to the configured one)
        #[arg(short = 'd', long = "download-dir")]
        download_dir: Option<PathBuf>,
    },
    /// Download all posts in a pool with a given id
    Pool {
        pool_id: i64,
        /// Path to the download directory (defaults to the configured one)
        #[arg(short = 'd', long = "download-dir")]
        download_dir: Option<PathBuf>,
        /// Save space by turning duplicates into symlinks afterwards
        #[arg(short = 's', long = "save-space")]
        save_space: bool,
    },
    /// Replace all post duplicates in the given directories with symlinks
    Clean {
        /// Directories to scan (defaults to the current directory)
        dirs: Vec<PathBuf>,
        /// Leave broken symlinks in place instead of re-downloading them
        #[arg(long = "no-download-broken-symlinks")]
        no_download_broken_symlinks: bool,
    },
    /// Save username and API key for authenticated requests
    Login,
    /// Remove stored credentials
    Logout,
}
