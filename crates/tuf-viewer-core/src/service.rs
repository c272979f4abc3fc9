//! Entry points consumed by the presentation layer.
//!
//! These functions never return `Err`: failures are rendered into the
//! `error` field of the produced record so callers can display them as-is.

use futures_util::future::join_all;
use indexmap::IndexMap;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::diff::{compare_root_envelopes, RootDiff, VersionAnomaly};
use crate::loader::{fetch_envelope, LoadError, MetadataLoader};
use crate::metadata::{
    delegated_file_name, versioned_file_name, MetaFile, SignedEnvelope, Snapshot, Targets,
    Timestamp, META_SNAPSHOT, META_TARGETS, META_TIMESTAMP,
};
use crate::roles::{extract_roles, Loaded, RepositorySnapshot, RoleInfo};
use crate::threshold::{evaluate_root_pair, RootVerification};
use crate::versions::{self, RootVersion, VersionError};

/// Errors raised by [`try_compare_root_versions`].
#[derive(Debug, Error)]
pub enum CompareError {
    #[error("Cannot compare a version to itself. Please select different versions.")]
    SameVersion(u64),
    #[error("Failed to load one of the root versions: {0}")]
    Load(#[from] VersionError),
}

/// Role listing or the reason none could be produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleListing {
    pub roles: Vec<RoleInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionListing {
    pub versions: Vec<RootVersion>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Result of comparing two root versions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompareOutcome {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diff: Option<RootDiff>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verification: Option<RootVerification>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CompareOutcome {
    fn failed(err: CompareError) -> Self {
        Self {
            diff: None,
            verification: None,
            error: Some(err.to_string()),
        }
    }
}

fn loaded<T>(
    loader: &dyn MetadataLoader,
    name: &str,
    result: Result<SignedEnvelope<T>, LoadError>,
) -> Result<Loaded<T>, LoadError> {
    result.map(|envelope| Loaded::new(envelope, loader.locator(name)))
}

/// Loads one delegated targets document, preferring the versioned name.
async fn load_delegated(
    loader: &dyn MetadataLoader,
    role: &str,
    meta: &MetaFile,
    consistent_snapshot: bool,
) -> Option<Loaded<Targets>> {
    let plain = delegated_file_name(role);
    let mut candidates = Vec::with_capacity(2);
    if consistent_snapshot {
        candidates.push(versioned_file_name(meta.version, &plain));
    }
    candidates.push(plain);

    for name in candidates {
        match fetch_envelope::<Targets>(loader, &name).await {
            Ok(envelope) => return Some(Loaded::new(envelope, loader.locator(&name))),
            Err(err) => debug!("service: delegated role '{role}' not loaded from {name}: {err}"),
        }
    }
    None
}

/// Loads the four mandatory documents and every delegated document the
/// snapshot lists. The root is the newest one published (see
/// [`versions::latest_root`]).
pub async fn load_repository(loader: &dyn MetadataLoader) -> Result<RepositorySnapshot, LoadError> {
    let (root, timestamp, snapshot, targets) = tokio::join!(
        versions::latest_root(loader),
        fetch_envelope::<Timestamp>(loader, META_TIMESTAMP),
        fetch_envelope::<Snapshot>(loader, META_SNAPSHOT),
        fetch_envelope::<Targets>(loader, META_TARGETS),
    );
    let root = root?;
    let timestamp = loaded(loader, META_TIMESTAMP, timestamp)?;
    let snapshot = loaded(loader, META_SNAPSHOT, snapshot)?;
    let targets = loaded(loader, META_TARGETS, targets)?;

    let consistent = root.envelope.signed.consistent_snapshot;
    let listed: Vec<(String, MetaFile)> = snapshot
        .envelope
        .signed
        .delegated_files()
        .map(|(role, meta)| (role.to_string(), meta.clone()))
        .collect();
    let fetched = join_all(
        listed
            .iter()
            .map(|(role, meta)| load_delegated(loader, role, meta, consistent)),
    )
    .await;
    let delegated: IndexMap<String, Loaded<Targets>> = listed
        .iter()
        .zip(fetched)
        .filter_map(|((role, _), document)| document.map(|document| (role.clone(), document)))
        .collect();
    debug!(
        "service: loaded {} of {} delegated documents",
        delegated.len(),
        listed.len()
    );

    Ok(RepositorySnapshot {
        root,
        timestamp,
        snapshot,
        targets,
        delegated,
    })
}

/// Describes every role of the repository.
pub async fn load_roles(loader: &dyn MetadataLoader) -> RoleListing {
    match load_repository(loader).await {
        Ok(repo) => {
            let roles = extract_roles(&repo, &|name| loader.locator(name));
            info!("service: extracted {} roles", roles.len());
            RoleListing { roles, error: None }
        }
        Err(err) => {
            warn!("service: failed to load repository: {err}");
            RoleListing {
                roles: Vec::new(),
                error: Some(format!("Failed to load TUF metadata files: {err}")),
            }
        }
    }
}

/// Lists the root versions available for comparison, newest first.
pub async fn list_root_versions(loader: &dyn MetadataLoader) -> VersionListing {
    match versions::list_root_versions(loader).await {
        Ok(versions) => VersionListing {
            versions,
            error: None,
        },
        Err(err) => {
            warn!("service: version discovery failed: {err}");
            VersionListing {
                versions: Vec::new(),
                error: Some(err.to_string()),
            }
        }
    }
}

/// Compares two root versions given in either order.
pub async fn try_compare_root_versions(
    loader: &dyn MetadataLoader,
    a: u64,
    b: u64,
) -> Result<(RootDiff, RootVerification), CompareError> {
    if a == b {
        return Err(CompareError::SameVersion(a));
    }
    let (older, newer) = (a.min(b), a.max(b));
    let (old, new) = tokio::join!(
        versions::load_root_by_version(loader, older),
        versions::load_root_by_version(loader, newer),
    );
    let (old, new) = (old?.envelope, new?.envelope);

    let diff = compare_root_envelopes(&old, &new);
    if let Some(VersionAnomaly::Jump { skipped }) = diff.version_anomaly {
        warn!(
            "service: root {} -> {} skips {skipped} intermediate versions",
            diff.old_version, diff.new_version
        );
    }
    let verification =
        evaluate_root_pair(&old.signed, &new.signed, &old.signatures, &new.signatures);
    Ok((diff, verification))
}

/// Compares two root versions, rendering failures into the outcome.
pub async fn compare_root_versions(loader: &dyn MetadataLoader, a: u64, b: u64) -> CompareOutcome {
    match try_compare_root_versions(loader, a, b).await {
        Ok((diff, verification)) => CompareOutcome {
            diff: Some(diff),
            verification: Some(verification),
            error: None,
        },
        Err(err) => {
            warn!("service: compare {a} and {b} failed: {err}");
            CompareOutcome::failed(err)
        }
    }
}
