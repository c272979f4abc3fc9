//! Discovery of the historical root versions a repository still serves.

use futures_util::stream::{self, StreamExt};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::loader::{fetch_envelope, LoadError, MetadataLoader};
use crate::metadata::{versioned_file_name, Root, SignedEnvelope, META_ROOT};
use crate::roles::Loaded;

/// Upper bound on how many historical versions are probed.
pub const MAX_PROBED_VERSIONS: u64 = 1024;

/// Maximum number of probe requests in flight at once.
const PROBE_CONCURRENCY: usize = 16;

/// Errors raised while locating root versions.
#[derive(Debug, Error)]
pub enum VersionError {
    #[error("failed to load current root metadata: {0}")]
    CurrentRoot(#[source] LoadError),
    #[error("root version {version} could not be loaded: {source}")]
    Unavailable {
        version: u64,
        #[source]
        source: LoadError,
    },
    #[error("'{name}' declares version {actual}, expected {expected}")]
    VersionMismatch {
        name: String,
        expected: u64,
        actual: u64,
    },
}

/// Convenience alias for version discovery results.
pub type Result<T> = std::result::Result<T, VersionError>;

/// A root version available for comparison.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RootVersion {
    pub version: u64,
    pub locator: String,
}

/// Extracts `signed.version` without parsing the whole document.
fn meta_version(bytes: &[u8]) -> Option<u64> {
    serde_json::from_slice::<Value>(bytes)
        .ok()
        .and_then(|value| value.pointer("/signed/version").and_then(Value::as_u64))
}

/// Probes one versioned root; `None` when absent or inconsistent.
async fn probe(loader: &dyn MetadataLoader, version: u64) -> Option<RootVersion> {
    let name = versioned_file_name(version, META_ROOT);
    match loader.fetch(&name).await {
        Ok(bytes) if meta_version(&bytes) == Some(version) => Some(RootVersion {
            version,
            locator: loader.locator(&name),
        }),
        Ok(_) => {
            warn!("versions: {name} does not declare version {version}; skipping");
            None
        }
        Err(err) => {
            debug!("versions: {name} unavailable: {err}");
            None
        }
    }
}

/// Locates the newest root the repository publishes.
///
/// Starts from `root.json` (or version 1 when it is unavailable) and walks
/// `<n+1>.root.json`, `<n+2>.root.json`, ... until a document is missing or
/// declares a different version. `root.json` is only returned when no newer
/// versioned copy exists.
pub async fn latest_root(
    loader: &dyn MetadataLoader,
) -> std::result::Result<Loaded<Root>, LoadError> {
    let unversioned = fetch_envelope::<Root>(loader, META_ROOT)
        .await
        .map(|envelope| Loaded::new(envelope, loader.locator(META_ROOT)));
    let start = match &unversioned {
        Ok(root) => root.envelope.signed.header.version.saturating_add(1),
        Err(err) => {
            debug!("versions: {META_ROOT} unavailable ({err}); walking from version 1");
            1
        }
    };

    let mut latest = None;
    for version in start..start.saturating_add(MAX_PROBED_VERSIONS) {
        let name = versioned_file_name(version, META_ROOT);
        match fetch_envelope::<Root>(loader, &name).await {
            Ok(envelope) if envelope.signed.header.version == version => {
                latest = Some(Loaded::new(envelope, loader.locator(&name)));
            }
            Ok(envelope) => {
                warn!(
                    "versions: {name} declares version {}; stopping root walk",
                    envelope.signed.header.version
                );
                break;
            }
            Err(err) => {
                debug!("versions: root walk stops at {name}: {err}");
                break;
            }
        }
    }

    match latest {
        Some(root) => {
            if unversioned.is_ok() {
                warn!("versions: {META_ROOT} is older than {}", root.locator);
            }
            Ok(root)
        }
        None => unversioned,
    }
}

/// Lists root versions, newest first.
///
/// The current version is always present; older versions appear only when
/// `<n>.root.json` can be fetched and declares version `n`.
pub async fn list_root_versions(loader: &dyn MetadataLoader) -> Result<Vec<RootVersion>> {
    let current_root = latest_root(loader)
        .await
        .map_err(VersionError::CurrentRoot)?;
    let current = current_root.envelope.signed.header.version;

    let oldest = current.saturating_sub(MAX_PROBED_VERSIONS - 1).max(1);
    if oldest > 1 {
        warn!("versions: probing only versions {oldest}..={current}");
    }
    let probed: Vec<Option<RootVersion>> = stream::iter(oldest..=current)
        .map(|version| probe(loader, version))
        .buffered(PROBE_CONCURRENCY)
        .collect()
        .await;
    let mut versions: Vec<RootVersion> = probed.into_iter().flatten().collect();

    if !versions.iter().any(|found| found.version == current) {
        versions.push(RootVersion {
            version: current,
            locator: current_root.locator,
        });
    }
    versions.sort_by(|a, b| b.version.cmp(&a.version));
    debug!("versions: discovered {} root versions", versions.len());
    Ok(versions)
}

/// Loads a specific root version.
///
/// Falls back to `root.json` when `<version>.root.json` is missing but the
/// unversioned root is that version.
pub async fn load_root_by_version(
    loader: &dyn MetadataLoader,
    version: u64,
) -> Result<Loaded<Root>> {
    let name = versioned_file_name(version, META_ROOT);
    let err = match fetch_envelope::<Root>(loader, &name).await {
        Ok(envelope) => return checked(envelope, &name, version, loader),
        Err(err) => err,
    };
    debug!("versions: {name} unavailable ({err}); trying {META_ROOT}");
    match fetch_envelope::<Root>(loader, META_ROOT).await {
        Ok(envelope) if envelope.signed.header.version == version => {
            Ok(Loaded::new(envelope, loader.locator(META_ROOT)))
        }
        _ => Err(VersionError::Unavailable {
            version,
            source: err,
        }),
    }
}

fn checked(
    envelope: SignedEnvelope<Root>,
    name: &str,
    version: u64,
    loader: &dyn MetadataLoader,
) -> Result<Loaded<Root>> {
    let actual = envelope.signed.header.version;
    if actual != version {
        return Err(VersionError::VersionMismatch {
            name: name.to_string(),
            expected: version,
            actual,
        });
    }
    Ok(Loaded::new(envelope, loader.locator(name)))
}
