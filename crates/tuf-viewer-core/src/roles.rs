//! Flattens a loaded repository into per-role display records.

use std::collections::{BTreeMap, HashSet, VecDeque};

use indexmap::IndexMap;
use serde::Serialize;
use tracing::debug;

use crate::metadata::{
    delegated_file_name, Delegations, Key, MetadataHeader, RoleKeys, RoleType, Root, SignedEnvelope,
    Snapshot, Targets, Timestamp,
};
use crate::threshold::{threshold_anomaly, ThresholdAnomaly};

/// A parsed document together with where it was loaded from.
#[derive(Debug, Clone, PartialEq)]
pub struct Loaded<T> {
    pub envelope: SignedEnvelope<T>,
    pub locator: String,
}

impl<T> Loaded<T> {
    pub fn new(envelope: SignedEnvelope<T>, locator: impl Into<String>) -> Self {
        Self {
            envelope,
            locator: locator.into(),
        }
    }
}

/// Every document needed to describe a repository.
#[derive(Debug, Clone)]
pub struct RepositorySnapshot {
    pub root: Loaded<Root>,
    pub timestamp: Loaded<Timestamp>,
    pub snapshot: Loaded<Snapshot>,
    pub targets: Loaded<Targets>,
    /// Delegated targets documents that could be loaded, by role name.
    pub delegated: IndexMap<String, Loaded<Targets>>,
}

/// Key id together with its display label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignerLabel {
    pub keyid: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    /// Owner label when known, the raw keyid otherwise.
    pub display: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignerSummary {
    pub required: u64,
    pub total: usize,
    pub keyids: Vec<SignerLabel>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetEntry {
    pub path: String,
    pub length: u64,
    pub hashes: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DelegationInfo {
    pub name: String,
    pub threshold: u64,
    pub keyids: Vec<SignerLabel>,
    pub paths: Vec<String>,
    pub terminating: bool,
}

/// Display record for one role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleInfo {
    pub role: String,
    /// Name of the delegating role; `None` for top-level roles.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delegated_by: Option<String>,
    pub version: u64,
    pub spec_version: String,
    pub expires: String,
    pub signers: SignerSummary,
    pub locator: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub targets: Option<Vec<TargetEntry>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delegations: Option<Vec<DelegationInfo>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threshold_anomaly: Option<ThresholdAnomaly>,
}

fn signer_labels(keyids: &[String], keys: &IndexMap<String, Key>) -> Vec<SignerLabel> {
    keyids
        .iter()
        .map(|keyid| {
            let owner = keys
                .get(keyid)
                .and_then(Key::owner_label)
                .map(|label| label.to_string());
            SignerLabel {
                keyid: keyid.clone(),
                display: owner.clone().unwrap_or_else(|| keyid.clone()),
                owner,
            }
        })
        .collect()
}

fn signer_summary(role: &RoleKeys, keys: &IndexMap<String, Key>) -> SignerSummary {
    SignerSummary {
        required: role.threshold,
        total: role.keyids.len(),
        keyids: signer_labels(&role.keyids, keys),
    }
}

fn target_table(targets: &Targets) -> Vec<TargetEntry> {
    targets
        .targets
        .iter()
        .map(|(path, file)| TargetEntry {
            path: path.clone(),
            length: file.length,
            hashes: file.hashes.clone(),
        })
        .collect()
}

fn delegation_table(delegations: &Delegations) -> Vec<DelegationInfo> {
    delegations
        .roles
        .iter()
        .map(|role| DelegationInfo {
            name: role.name.clone(),
            threshold: role.threshold,
            keyids: signer_labels(&role.keyids, &delegations.keys),
            paths: role.paths.clone(),
            terminating: role.terminating,
        })
        .collect()
}

fn top_level_header(repo: &RepositorySnapshot, role: RoleType) -> (&MetadataHeader, &str) {
    match role {
        RoleType::Root => (&repo.root.envelope.signed.header, &repo.root.locator),
        RoleType::Timestamp => (
            &repo.timestamp.envelope.signed.header,
            &repo.timestamp.locator,
        ),
        RoleType::Snapshot => (&repo.snapshot.envelope.signed.header, &repo.snapshot.locator),
        RoleType::Targets => (&repo.targets.envelope.signed.header, &repo.targets.locator),
    }
}

/// Builds the role listing: top-level roles first, then delegated roles in
/// discovery order.
///
/// `locate` names the document a delegated role would live in when that
/// document itself was not loaded.
pub fn extract_roles(repo: &RepositorySnapshot, locate: &dyn Fn(&str) -> String) -> Vec<RoleInfo> {
    let root = &repo.root.envelope.signed;
    let targets = &repo.targets.envelope.signed;
    let mut roles = Vec::new();

    for role_type in RoleType::ALL {
        let Some(role) = root.role(role_type) else {
            debug!("roles: root does not declare the {role_type} role");
            continue;
        };
        let (header, locator) = top_level_header(repo, role_type);
        let is_targets = role_type == RoleType::Targets;
        roles.push(RoleInfo {
            role: role_type.as_str().to_string(),
            delegated_by: None,
            version: header.version,
            spec_version: header.spec_version.clone(),
            expires: header.expires.clone(),
            signers: signer_summary(role, &root.keys),
            locator: locator.to_string(),
            targets: is_targets.then(|| target_table(targets)),
            delegations: if is_targets {
                targets.delegations.as_ref().map(delegation_table)
            } else {
                None
            },
            threshold_anomaly: threshold_anomaly(role.threshold, &role.keyids),
        });
    }

    roles.extend(delegated_roles(repo, locate));
    roles
}

fn delegated_roles(repo: &RepositorySnapshot, locate: &dyn Fn(&str) -> String) -> Vec<RoleInfo> {
    let snapshot = &repo.snapshot.envelope.signed;
    let mut pending: VecDeque<(&str, &Targets)> = VecDeque::new();
    pending.push_back((RoleType::Targets.as_str(), &repo.targets.envelope.signed));
    let mut seen: HashSet<&str> = HashSet::new();
    let mut roles = Vec::new();

    while let Some((parent_name, parent)) = pending.pop_front() {
        let Some(delegations) = parent.delegations.as_ref() else {
            continue;
        };
        for delegated in &delegations.roles {
            let name = delegated.name.as_str();
            if RoleType::from_tag(name).is_some() || !seen.insert(name) {
                continue;
            }
            let Some(meta) = snapshot.delegated_meta(name) else {
                debug!("roles: delegated role '{name}' is not listed in snapshot");
                continue;
            };
            let role_keys = delegated.role_keys();
            let signers = signer_summary(&role_keys, &delegations.keys);
            let anomaly = threshold_anomaly(role_keys.threshold, &role_keys.keyids);

            let info = match repo.delegated.get(name) {
                Some(loaded) => {
                    let document = &loaded.envelope.signed;
                    pending.push_back((name, document));
                    RoleInfo {
                        role: name.to_string(),
                        delegated_by: Some(parent_name.to_string()),
                        version: document.header.version,
                        spec_version: document.header.spec_version.clone(),
                        expires: document.header.expires.clone(),
                        signers,
                        locator: loaded.locator.clone(),
                        targets: Some(target_table(document)),
                        delegations: document.delegations.as_ref().map(delegation_table),
                        threshold_anomaly: anomaly,
                    }
                }
                None => {
                    debug!("roles: delegated role '{name}' not loaded; using snapshot version");
                    RoleInfo {
                        role: name.to_string(),
                        delegated_by: Some(parent_name.to_string()),
                        version: meta.version,
                        spec_version: parent.header.spec_version.clone(),
                        expires: parent.header.expires.clone(),
                        signers,
                        locator: locate(&delegated_file_name(name)),
                        targets: Some(Vec::new()),
                        delegations: None,
                        threshold_anomaly: anomaly,
                    }
                }
            };
            roles.push(info);
        }
    }
    roles
}
