use std::fs::{read_to_string, remove_file, write};
use std::path::Path;

use anyhow::{Context, Error};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use serde_json::{from_str, to_string_pretty};

/// Name of the configuration file.
pub(crate) const CONFIG_NAME: &str = "config.json";

/// Name of the login file.
pub(crate) const LOGIN_NAME: &str = "login.json";

/// General setup read once at startup. A missing file is created with
/// defaults so users have something to edit.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub(crate) struct Config {
    /// The location of the download directory.
    #[serde(rename = "downloadDirectory")]
    download_directory: String,
    /// Number of files to download simultaneously.
    #[serde(rename = "downloadConcurrency", default = "default_download_concurrency")]
    download_concurrency: usize,
    /// Per-request timeout in seconds; a stalled transfer fails instead of
    /// hanging the whole batch.
    #[serde(rename = "requestTimeoutSeconds", default = "default_request_timeout")]
    request_timeout_secs: u64,
}

fn default_download_concurrency() -> usize {
    3
}

fn default_request_timeout() -> u64 {
    30
}

static CONFIG: OnceCell<Config> = OnceCell::new();

impl Config {
    pub(crate) fn download_directory(&self) -> &str {
        &self.download_directory
    }

    pub(crate) fn download_concurrency(&self) -> usize {
        self.download_concurrency.max(1)
    }

    pub(crate) fn request_timeout_secs(&self) -> u64 {
        self.request_timeout_secs
    }

    /// Gets the global instance of the [Config].
    pub(crate) fn get() -> &'static Self {
        CONFIG.get_or_init(|| {
            Self::load().unwrap_or_else(|e| {
                warn!("Unable to load `{CONFIG_NAME}`: {e}. Using default settings.");
                Config::default()
            })
        })
    }

    fn load() -> Result<Self, Error> {
        let path = Path::new(CONFIG_NAME);
        if !path.exists() {
            let config = Config::default();
            write(path, to_string_pretty(&config)?)
                .with_context(|| format!("Failed to create {CONFIG_NAME}"))?;
            info!("Created {CONFIG_NAME} with default settings.");
            return Ok(config);
        }
        let contents = read_to_string(path)
            .with_context(|| format!("Failed to read {CONFIG_NAME}"))?;
        Ok(from_str(&contents)?)
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            download_directory: String::from("downloads"),
            download_concurrency: default_download_concurrency(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

/// Stored credentials for authenticated API access. Anonymous use works;
/// authentication lifts rate limits and exposes otherwise hidden file URLs.
#[derive(Serialize, Deserialize, Clone, Default)]
pub(crate) struct Login {
    #[serde(rename = "Username")]
    username: String,
    /// The API key, treated like a password.
    #[serde(rename = "APIKey")]
    api_key: String,
}

static LOGIN: OnceCell<Login> = OnceCell::new();

impl Login {
    pub(crate) fn username(&self) -> &str {
        &self.username
    }

    pub(crate) fn api_key(&self) -> &str {
        &self.api_key
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.username.is_empty() || self.api_key.is_empty()
    }

    /// Gets the global instance of [Login]. Missing or unreadable files fall
    /// back to anonymous access.
    pub(crate) fn get() -> &'static Self {
        LOGIN.get_or_init(|| {
            Self::load().unwrap_or_else(|e| {
                warn!("Unable to load `{LOGIN_NAME}`: {e}. Continuing unauthenticated.");
                Login::default()
            })
        })
    }

    fn load() -> Result<Self, Error> {
        let path = Path::new(LOGIN_NAME);
        if !path.exists() {
            return Ok(Login::default());
        }
        let contents = read_to_string(path)
            .with_context(|| format!("Failed to read {LOGIN_NAME}"))?;
        Ok(from_str(&contents)?)
    }

    /// Persists credentials for future runs.
    pub(crate) fn save(username: &str, api_key: &str) -> Result<(), Error> {
        let login = Login {
            username: username.to_string(),
            api_key: api_key.to_string(),
        };
        write(LOGIN_NAME, to_string_pretty(&login)?)
            .with_context(|| format!("Failed to write {LOGIN_NAME}"))?;
        Ok(())
    }

    /// Removes stored credentials, if any.
    pub(crate) fn remove() -> Result<(), Error> {
        let path = Path::new(LOGIN_NAME);
        if path.exists() {
            remove_file(path).with_context(|| format!("Failed to remove {LOGIN_NAME}"))?;
        }
        Ok(())
    }
}
