//! Environment-driven settings for locating TUF metadata.
//!
//! A remote base URL, when configured, takes precedence over the local
//! metadata directory. Blank values are treated as unset.

use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::loader::{
    FilesystemLoader, HttpLoader, HttpLoaderOptions, LoadError, MetadataLoader,
    DEFAULT_HTTP_TIMEOUT,
};

/// Directory holding the repository metadata files.
pub const ENV_METADATA_DIR: &str = "TUF_VIEWER_METADATA_DIR";
/// Base URL of a remote repository; wins over the directory.
pub const ENV_REMOTE_URL: &str = "TUF_VIEWER_REMOTE_URL";
/// Permits `http://` base URLs.
pub const ENV_ALLOW_PLAINTEXT: &str = "TUF_VIEWER_ALLOW_PLAINTEXT";
/// Per-request timeout in seconds for remote repositories.
pub const ENV_HTTP_TIMEOUT_SECS: &str = "TUF_VIEWER_HTTP_TIMEOUT_SECS";
/// Log filter directive (`info`, `debug`, `tuf_viewer_core=trace`...).
pub const ENV_LOG_LEVEL: &str = "TUF_VIEWER_LOG_LEVEL";

/// Metadata directory used when none is supplied.
pub const DEFAULT_METADATA_DIR: &str = "public/metadata";
/// Log filter used when none is supplied.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Where metadata documents are read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetadataSource {
    Directory(PathBuf),
    Remote(String),
}

/// Environment-derived viewer settings.
#[derive(Debug, Clone)]
pub struct ViewerEnv {
    pub source: MetadataSource,
    /// When `true`, plaintext HTTP base URLs are accepted.
    pub allow_plaintext: bool,
    pub http_timeout: Duration,
    pub log_level: String,
}

impl Default for ViewerEnv {
    fn default() -> Self {
        Self::from_env_iter::<Vec<(String, String)>, _, _>(vec![])
    }
}

impl ViewerEnv {
    /// Builds settings from the current process environment.
    pub fn from_os_env() -> Self {
        Self::from_env_iter(env::vars())
    }

    /// Builds settings from an iterator of key/value pairs (typically for tests).
    pub fn from_env_iter<I, K, V>(iter: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let map: HashMap<String, String> = iter
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();

        let source = match map
            .get(ENV_REMOTE_URL)
            .and_then(|value| sanitize_non_empty(value))
        {
            Some(url) => MetadataSource::Remote(url),
            None => MetadataSource::Directory(PathBuf::from(
                map.get(ENV_METADATA_DIR)
                    .and_then(|value| sanitize_non_empty(value))
                    .unwrap_or_else(|| DEFAULT_METADATA_DIR.to_string()),
            )),
        };
        let allow_plaintext = parse_bool(map.get(ENV_ALLOW_PLAINTEXT).map(String::as_str), false);
        let http_timeout = map
            .get(ENV_HTTP_TIMEOUT_SECS)
            .and_then(|value| value.trim().parse::<u64>().ok())
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_HTTP_TIMEOUT);
        let log_level = map
            .get(ENV_LOG_LEVEL)
            .and_then(|value| sanitize_non_empty(value))
            .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string());

        Self {
            source,
            allow_plaintext,
            http_timeout,
            log_level,
        }
    }

    pub fn http_options(&self) -> HttpLoaderOptions {
        HttpLoaderOptions {
            allow_plaintext: self.allow_plaintext,
            timeout: self.http_timeout,
        }
    }

    /// Builds the loader for the configured source.
    pub fn build_loader(&self) -> Result<Box<dyn MetadataLoader>, LoadError> {
        match &self.source {
            MetadataSource::Directory(dir) => Ok(Box::new(FilesystemLoader::new(dir.clone()))),
            MetadataSource::Remote(url) => Ok(Box::new(HttpLoader::new(url, self.http_options())?)),
        }
    }
}

/// Trims a value, returning `None` when nothing is left.
fn sanitize_non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Parses boolean values from strings, falling back to the provided default.
fn parse_bool(value: Option<&str>, default: bool) -> bool {
    match value.map(|s| s.trim().to_ascii_lowercase()) {
        Some(ref v) if ["1", "true", "t", "yes", "y"].contains(&v.as_str()) => true,
        Some(ref v) if ["0", "false", "f", "no", "n"].contains(&v.as_str()) => false,
        _ => default,
    }
}
