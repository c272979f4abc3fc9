//! Core of the TUF metadata viewer.
//!
//! The crate parses TUF repository metadata into a canonical model, flattens
//! it into per-role display records, and computes structured diffs between
//! two versions of root metadata. The [`service`] functions are the entry
//! points a front end calls; they return records carrying either a result or
//! a displayable error.
//!
//! "Verified" throughout this crate means that a threshold of non-empty
//! signatures from authorised keys is present. No signature is checked
//! cryptographically, so a verified status is not evidence of authenticity.

pub mod config;
pub mod diff;
pub mod display;
pub mod loader;
pub mod metadata;
pub mod roles;
pub mod service;
pub mod threshold;
pub mod versions;

pub use config::{MetadataSource, ViewerEnv};
pub use diff::{
    compare_root_envelopes, compare_roots, ExpiryChange, KeyDiff, KeyStatus, RoleDiff, RootDiff,
    SignatureDiff, VersionAnomaly,
};
pub use loader::{
    fetch_envelope, FilesystemLoader, HttpLoader, HttpLoaderOptions, LoadError, MemoryLoader,
    MetadataLoader,
};
pub use metadata::{
    parse_document, parse_envelope, Key, MetadataError, OwnerLabel, RoleType, Root,
    SignedDocument, SignedEnvelope, Signature,
};
pub use roles::{extract_roles, RepositorySnapshot, RoleInfo};
pub use service::{
    compare_root_versions, list_root_versions, load_roles, CompareError, CompareOutcome,
    RoleListing, VersionListing,
};
pub use threshold::{count_signatures, evaluate_root_pair, is_verified, RootVerification};
pub use versions::{RootVersion, VersionError};
