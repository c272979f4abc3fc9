//! Signature-threshold evaluation.
//!
//! "Verified" here means that enough authorised keys left a non-empty
//! signature string. Signatures are never checked cryptographically.

use indexmap::IndexSet;
use serde::Serialize;

use crate::metadata::{RoleKeys, RoleType, Root, Signature};

/// Returns `true` when `signed_count` meets `threshold`.
pub fn is_verified(signed_count: usize, threshold: u64) -> bool {
    u64::try_from(signed_count).map_or(true, |count| count >= threshold)
}

/// Counts distinct keyids authorised by `role` that carry a non-empty signature.
pub fn count_signatures(role: &RoleKeys, signatures: &[Signature]) -> usize {
    signatures
        .iter()
        .filter(|signature| signature.is_signed())
        .filter(|signature| role.keyids.contains(&signature.keyid))
        .map(|signature| signature.keyid.as_str())
        .collect::<IndexSet<_>>()
        .len()
}

/// Reasons a role's threshold cannot be met as declared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ThresholdAnomaly {
    /// A zero threshold is satisfied by no signatures at all.
    Zero,
    /// More signatures are required than there are distinct signers.
    ExceedsSigners,
}

/// Flags thresholds that are trivially met or impossible to meet.
pub fn threshold_anomaly(threshold: u64, keyids: &[String]) -> Option<ThresholdAnomaly> {
    let signers = keyids.iter().collect::<IndexSet<_>>().len();
    if threshold == 0 {
        Some(ThresholdAnomaly::Zero)
    } else if u64::try_from(signers).map_or(false, |signers| threshold > signers) {
        Some(ThresholdAnomaly::ExceedsSigners)
    } else {
        None
    }
}

/// Signature count against a threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ThresholdStatus {
    pub signed: usize,
    pub required: u64,
    pub verified: bool,
}

impl ThresholdStatus {
    pub fn evaluate(role: &RoleKeys, signatures: &[Signature]) -> Self {
        let signed = count_signatures(role, signatures);
        Self {
            signed,
            required: role.threshold,
            verified: is_verified(signed, role.threshold),
        }
    }

    /// Status for a root that declares no root role at all.
    fn missing_role() -> Self {
        Self {
            signed: 0,
            required: 0,
            verified: false,
        }
    }
}

/// Presence-count view of a root rotation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RootVerification {
    /// Old root signatures against the old root role.
    pub old: ThresholdStatus,
    /// New root signatures against the new root role.
    pub new: ThresholdStatus,
    /// New root signatures made by keys the old root role authorised.
    pub new_signed_by_old_keys: ThresholdStatus,
}

impl RootVerification {
    /// A rotation is chained when the new root meets both thresholds.
    pub fn is_chained(&self) -> bool {
        self.new.verified && self.new_signed_by_old_keys.verified
    }
}

fn root_status(root: &Root, signatures: &[Signature]) -> ThresholdStatus {
    root.role(RoleType::Root)
        .map(|role| ThresholdStatus::evaluate(role, signatures))
        .unwrap_or_else(ThresholdStatus::missing_role)
}

/// Evaluates both sides of a root rotation.
pub fn evaluate_root_pair(
    old_root: &Root,
    new_root: &Root,
    old_signatures: &[Signature],
    new_signatures: &[Signature],
) -> RootVerification {
    RootVerification {
        old: root_status(old_root, old_signatures),
        new: root_status(new_root, new_signatures),
        new_signed_by_old_keys: root_status(old_root, new_signatures),
    }
}
