//! Repository loader adapters.
//!
//! A [`MetadataLoader`] returns the raw bytes of a metadata document by name
//! (`root.json`, `3.root.json`, `registry.npmjs.org.json`) together with a
//! locator string the presentation layer can link back to. Parsing happens in
//! [`fetch_envelope`] so every adapter shares the same normalisation.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use indexmap::IndexMap;
use reqwest::{Client, StatusCode, Url};
use thiserror::Error;
use tracing::debug;

use crate::metadata::{parse_envelope, MetadataError, SignedEnvelope, SignedMetadata};

/// Request timeout applied by [`HttpLoader`] unless overridden.
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors surfaced while fetching or parsing a metadata document.
#[derive(Debug, Error)]
pub enum LoadError {
    /// The repository has no document with that name.
    #[error("metadata document '{0}' was not found")]
    NotFound(String),
    /// The remote responded with an unexpected status code.
    #[error("unexpected status {status} while fetching '{name}'")]
    Status { name: String, status: u16 },
    /// Networking or TLS errors bubbled up from the HTTP client.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    /// Local filesystem errors other than a missing file.
    #[error("failed to read '{name}': {source}")]
    Io {
        name: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid repository base url: {0}")]
    InvalidBaseUrl(String),
    /// The provided URL violates the required transport policy.
    #[error("insecure base url requires explicit opt-in: {0}")]
    InsecureUrl(String),
    /// Document names must stay inside the repository.
    #[error("invalid metadata document name '{0}'")]
    InvalidName(String),
    #[error("failed to parse '{name}': {source}")]
    Metadata {
        name: String,
        #[source]
        source: MetadataError,
    },
}

impl LoadError {
    /// Returns `true` when the document simply does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, LoadError::NotFound(_))
    }
}

/// Convenience alias for loader results.
pub type Result<T> = std::result::Result<T, LoadError>;

/// Source of raw metadata documents.
#[async_trait]
pub trait MetadataLoader: Send + Sync {
    /// Fetches the raw bytes of the named document.
    async fn fetch(&self, name: &str) -> Result<Vec<u8>>;

    /// Describes where the named document lives (path or URL).
    fn locator(&self, name: &str) -> String;
}

/// Fetches a document and parses it into the expected envelope type.
pub async fn fetch_envelope<T: SignedMetadata>(
    loader: &dyn MetadataLoader,
    name: &str,
) -> Result<SignedEnvelope<T>> {
    let bytes = loader.fetch(name).await?;
    parse_envelope(&bytes).map_err(|source| LoadError::Metadata {
        name: name.to_string(),
        source,
    })
}

/// Rejects names that would escape the repository root.
fn validate_name(name: &str) -> Result<()> {
    let escapes = name.is_empty()
        || name.starts_with('/')
        || name.contains('\\')
        || name.split('/').any(|segment| segment == ".." || segment == ".");
    if escapes {
        return Err(LoadError::InvalidName(name.to_string()));
    }
    Ok(())
}

/// Reads metadata from a local directory.
#[derive(Debug, Clone)]
pub struct FilesystemLoader {
    root: PathBuf,
}

impl FilesystemLoader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl MetadataLoader for FilesystemLoader {
    async fn fetch(&self, name: &str) -> Result<Vec<u8>> {
        validate_name(name)?;
        let path = self.root.join(name);
        match tokio::fs::read(&path).await {
            Ok(bytes) => {
                debug!("loader: read {} bytes from {}", bytes.len(), path.display());
                Ok(bytes)
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(LoadError::NotFound(name.to_string()))
            }
            Err(source) => Err(LoadError::Io {
                name: name.to_string(),
                source,
            }),
        }
    }

    fn locator(&self, name: &str) -> String {
        self.root.join(name).display().to_string()
    }
}

/// Options governing how the HTTP loader is constructed.
#[derive(Debug, Clone, Copy)]
pub struct HttpLoaderOptions {
    /// Whether plaintext (HTTP) base URLs are allowed.
    pub allow_plaintext: bool,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl Default for HttpLoaderOptions {
    fn default() -> Self {
        Self {
            allow_plaintext: false,
            timeout: DEFAULT_HTTP_TIMEOUT,
        }
    }
}

/// Reads metadata from a remote repository over HTTP(S).
#[derive(Debug, Clone)]
pub struct HttpLoader {
    http: Client,
    base_url: Url,
}

impl HttpLoader {
    /// Builds a loader rooted at `base_url` (a trailing slash is implied).
    pub fn new(base_url: &str, options: HttpLoaderOptions) -> Result<Self> {
        let trimmed = base_url.trim();
        // Plaintext endpoints need an explicit opt-in.
        if !options.allow_plaintext && trimmed.starts_with("http://") {
            return Err(LoadError::InsecureUrl(trimmed.to_string()));
        }
        let mut base_url =
            Url::parse(trimmed).map_err(|err| LoadError::InvalidBaseUrl(err.to_string()))?;
        if !matches!(base_url.scheme(), "http" | "https") {
            return Err(LoadError::InvalidBaseUrl(trimmed.to_string()));
        }
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        let http = Client::builder().timeout(options.timeout).build()?;
        Ok(Self { http, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn document_url(&self, name: &str) -> Result<Url> {
        validate_name(name)?;
        self.base_url
            .join(name)
            .map_err(|_| LoadError::InvalidName(name.to_string()))
    }
}

#[async_trait]
impl MetadataLoader for HttpLoader {
    async fn fetch(&self, name: &str) -> Result<Vec<u8>> {
        let url = self.document_url(name)?;
        debug!("loader: GET {url}");
        let response = self.http.get(url).send().await?;
        match response.status() {
            StatusCode::OK => Ok(response.bytes().await?.to_vec()),
            StatusCode::NOT_FOUND => Err(LoadError::NotFound(name.to_string())),
            status => Err(LoadError::Status {
                name: name.to_string(),
                status: status.as_u16(),
            }),
        }
    }

    fn locator(&self, name: &str) -> String {
        match self.document_url(name) {
            Ok(url) => url.to_string(),
            Err(_) => format!("{}{}", self.base_url, name),
        }
    }
}

/// Serves documents from memory; handy for embedding and tests.
#[derive(Debug, Clone, Default)]
pub struct MemoryLoader {
    documents: IndexMap<String, Vec<u8>>,
}

impl MemoryLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a document.
    pub fn with_document(mut self, name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        self.insert(name, bytes);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, bytes: impl Into<Vec<u8>>) {
        self.documents.insert(name.into(), bytes.into());
    }
}

#[async_trait]
impl MetadataLoader for MemoryLoader {
    async fn fetch(&self, name: &str) -> Result<Vec<u8>> {
        self.documents
            .get(name)
            .cloned()
            .ok_or_else(|| LoadError::NotFound(name.to_string()))
    }

    fn locator(&self, name: &str) -> String {
        format!("memory://{name}")
    }
}
