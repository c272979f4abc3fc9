//! Structured comparison of two root metadata versions.
//!
//! [`compare_roots`] is pure: it trusts the caller's old/new ordering and
//! only annotates suspicious version transitions instead of refusing them.

use indexmap::{IndexMap, IndexSet};
use serde::Serialize;
use time::{format_description::well_known::Rfc3339, OffsetDateTime};

use crate::metadata::{Key, Root, SignedEnvelope, Signature};

/// How a key entry changed between versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyStatus {
    Added,
    Removed,
    Changed,
}

/// One changed entry of the `keys` map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyDiff {
    pub keyid: String,
    pub status: KeyStatus,
    /// Current type (the old one for removed keys).
    pub keytype: String,
    pub scheme: String,
    /// Previous type; only set for changed keys.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_keytype: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_scheme: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
}

/// Signer-set and threshold changes of one role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleDiff {
    pub role_name: String,
    pub added_keyids: Vec<String>,
    pub removed_keyids: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_threshold: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_threshold: Option<u64>,
}

/// A keyid whose signed status differs between the two envelopes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignatureDiff {
    pub keyid: String,
    pub old_signed: bool,
    pub new_signed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
}

/// Version transitions a TUF client would not accept as-is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum VersionAnomaly {
    /// Intermediate versions were skipped.
    Jump { skipped: u64 },
    /// The "new" version is not greater than the old one.
    NonIncreasing,
}

/// Calendar-day change of the expiry date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ExpiryChange {
    Extended { days: i64 },
    Shortened { days: i64 },
    Unchanged,
    /// One of the timestamps could not be parsed.
    Unknown,
}

/// Full comparison result, old → new.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RootDiff {
    pub old_version: u64,
    pub new_version: u64,
    pub old_expires: String,
    pub new_expires: String,
    pub key_diffs: Vec<KeyDiff>,
    pub role_diffs: Vec<RoleDiff>,
    pub signature_diffs: Vec<SignatureDiff>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version_anomaly: Option<VersionAnomaly>,
    pub expiry_change: ExpiryChange,
}

impl RootDiff {
    /// `true` when keys, roles and signatures are all unchanged.
    pub fn is_empty(&self) -> bool {
        self.key_diffs.is_empty() && self.role_diffs.is_empty() && self.signature_diffs.is_empty()
    }
}

/// Compares two root documents and their signature lists.
pub fn compare_roots(
    old: &Root,
    new: &Root,
    old_signatures: &[Signature],
    new_signatures: &[Signature],
) -> RootDiff {
    RootDiff {
        old_version: old.header.version,
        new_version: new.header.version,
        old_expires: old.header.expires.clone(),
        new_expires: new.header.expires.clone(),
        key_diffs: diff_keys(&old.keys, &new.keys),
        role_diffs: diff_roles(old, new),
        signature_diffs: diff_signatures(old, new, old_signatures, new_signatures),
        version_anomaly: version_anomaly(old.header.version, new.header.version),
        expiry_change: expiry_change(&old.header.expires, &new.header.expires),
    }
}

/// [`compare_roots`] over two parsed envelopes.
pub fn compare_root_envelopes(old: &SignedEnvelope<Root>, new: &SignedEnvelope<Root>) -> RootDiff {
    compare_roots(&old.signed, &new.signed, &old.signatures, &new.signatures)
}

fn owner_of(key: &Key) -> Option<String> {
    key.owner_label().map(|label| label.to_string())
}

fn diff_keys(old: &IndexMap<String, Key>, new: &IndexMap<String, Key>) -> Vec<KeyDiff> {
    let mut diffs = Vec::new();
    for (keyid, new_key) in new {
        match old.get(keyid) {
            None => diffs.push(KeyDiff {
                keyid: keyid.clone(),
                status: KeyStatus::Added,
                keytype: new_key.keytype.clone(),
                scheme: new_key.scheme.clone(),
                old_keytype: None,
                old_scheme: None,
                owner: owner_of(new_key),
            }),
            Some(old_key) if !old_key.same_material(new_key) => diffs.push(KeyDiff {
                keyid: keyid.clone(),
                status: KeyStatus::Changed,
                keytype: new_key.keytype.clone(),
                scheme: new_key.scheme.clone(),
                old_keytype: Some(old_key.keytype.clone()),
                old_scheme: Some(old_key.scheme.clone()),
                owner: owner_of(new_key).or_else(|| owner_of(old_key)),
            }),
            Some(_) => {}
        }
    }
    for (keyid, old_key) in old {
        if !new.contains_key(keyid) {
            diffs.push(KeyDiff {
                keyid: keyid.clone(),
                status: KeyStatus::Removed,
                keytype: old_key.keytype.clone(),
                scheme: old_key.scheme.clone(),
                old_keytype: None,
                old_scheme: None,
                owner: owner_of(old_key),
            });
        }
    }
    diffs
}

fn diff_roles(old: &Root, new: &Root) -> Vec<RoleDiff> {
    let names: IndexSet<&String> = old.roles.keys().chain(new.roles.keys()).collect();
    let mut diffs = Vec::new();
    for name in names {
        let diff = match (old.roles.get(name), new.roles.get(name)) {
            (None, Some(added)) => RoleDiff {
                role_name: name.clone(),
                added_keyids: distinct(&added.keyids).into_iter().cloned().collect(),
                removed_keyids: Vec::new(),
                old_threshold: None,
                new_threshold: Some(added.threshold),
            },
            (Some(removed), None) => RoleDiff {
                role_name: name.clone(),
                added_keyids: Vec::new(),
                removed_keyids: distinct(&removed.keyids).into_iter().cloned().collect(),
                old_threshold: Some(removed.threshold),
                new_threshold: None,
            },
            (Some(before), Some(after)) => {
                let before_ids = distinct(&before.keyids);
                let after_ids = distinct(&after.keyids);
                let added_keyids: Vec<String> = after_ids
                    .difference(&before_ids)
                    .map(|id| (*id).clone())
                    .collect();
                let removed_keyids: Vec<String> = before_ids
                    .difference(&after_ids)
                    .map(|id| (*id).clone())
                    .collect();
                let threshold_changed = before.threshold != after.threshold;
                if !threshold_changed && added_keyids.is_empty() && removed_keyids.is_empty() {
                    continue;
                }
                RoleDiff {
                    role_name: name.clone(),
                    added_keyids,
                    removed_keyids,
                    old_threshold: threshold_changed.then_some(before.threshold),
                    new_threshold: threshold_changed.then_some(after.threshold),
                }
            }
            (None, None) => continue,
        };
        diffs.push(diff);
    }
    diffs
}

fn distinct(keyids: &[String]) -> IndexSet<&String> {
    keyids.iter().collect()
}

/// Keyids in first-appearance order mapped to whether any entry signed.
fn signed_status(signatures: &[Signature]) -> IndexMap<&str, bool> {
    let mut status: IndexMap<&str, bool> = IndexMap::new();
    for signature in signatures {
        let signed = status.entry(signature.keyid.as_str()).or_insert(false);
        *signed |= signature.is_signed();
    }
    status
}

fn diff_signatures(
    old: &Root,
    new: &Root,
    old_signatures: &[Signature],
    new_signatures: &[Signature],
) -> Vec<SignatureDiff> {
    let before = signed_status(old_signatures);
    let after = signed_status(new_signatures);
    let keyids: IndexSet<&str> = before.keys().chain(after.keys()).copied().collect();

    keyids
        .into_iter()
        .filter_map(|keyid| {
            let old_signed = before.get(keyid).copied().unwrap_or(false);
            let new_signed = after.get(keyid).copied().unwrap_or(false);
            if old_signed == new_signed {
                return None;
            }
            let owner = old
                .keys
                .get(keyid)
                .and_then(owner_of)
                .or_else(|| new.keys.get(keyid).and_then(owner_of));
            Some(SignatureDiff {
                keyid: keyid.to_string(),
                old_signed,
                new_signed,
                owner,
            })
        })
        .collect()
}

fn version_anomaly(old_version: u64, new_version: u64) -> Option<VersionAnomaly> {
    if new_version <= old_version {
        Some(VersionAnomaly::NonIncreasing)
    } else if new_version - old_version > 1 {
        Some(VersionAnomaly::Jump {
            skipped: new_version - old_version - 1,
        })
    } else {
        None
    }
}

/// Classifies the change between the UTC calendar dates of two expiries.
pub fn expiry_change(old_expires: &str, new_expires: &str) -> ExpiryChange {
    let parse = |value: &str| OffsetDateTime::parse(value, &Rfc3339).ok();
    let (Some(old), Some(new)) = (parse(old_expires), parse(new_expires)) else {
        return ExpiryChange::Unknown;
    };
    let old_day = i64::from(old.to_offset(time::UtcOffset::UTC).date().to_julian_day());
    let new_day = i64::from(new.to_offset(time::UtcOffset::UTC).date().to_julian_day());
    match new_day - old_day {
        0 => ExpiryChange::Unchanged,
        days if days > 0 => ExpiryChange::Extended { days },
        days => ExpiryChange::Shortened { days: -days },
    }
}
