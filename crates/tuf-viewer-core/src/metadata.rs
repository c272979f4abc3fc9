//! Canonical in-memory model for TUF metadata documents.
//!
//! Repositories in the wild disagree on a handful of shapes (camelCase field
//! names emitted by JS tooling, `delegations.roles` as a map instead of a
//! list, signature entries without a `sig`). Every such variant is folded
//! into a single representation here, at parse time, so the role extractor
//! and the diff engine only ever see one shape.
//!
//! All maps keep the insertion order of the source document ([`IndexMap`]),
//! which makes every derived listing deterministic for identical input.

use std::collections::BTreeMap;
use std::fmt;

use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use thiserror::Error;
use time::{format_description::well_known::Rfc3339, OffsetDateTime};
use tracing::warn;

/// File name for TUF root metadata.
pub const META_ROOT: &str = "root.json";
/// File name for TUF timestamp metadata.
pub const META_TIMESTAMP: &str = "timestamp.json";
/// File name for TUF snapshot metadata.
pub const META_SNAPSHOT: &str = "snapshot.json";
/// File name for TUF targets metadata.
pub const META_TARGETS: &str = "targets.json";

/// Canonical top-level metadata filenames that always exist in a repository.
pub const TOP_LEVEL_META_FILES: [&str; 4] = [META_ROOT, META_TIMESTAMP, META_SNAPSHOT, META_TARGETS];

/// Display label used for keys held by automated signers.
pub const ONLINE_KEY_LABEL: &str = "online key";

/// Errors emitted while normalising raw metadata.
#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("tuf metadata parse error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("expected '{expected}' metadata but document declares '{actual}'")]
    UnexpectedType {
        expected: &'static str,
        actual: String,
    },
    #[error("unknown metadata type '{0}'")]
    UnknownType(String),
    #[error("timestamp parse error: {0}")]
    Time(#[from] time::error::Parse),
}

/// Convenience alias for results emitted by the metadata helpers.
pub type Result<T> = std::result::Result<T, MetadataError>;

/// The four top-level TUF roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoleType {
    Root,
    Timestamp,
    Snapshot,
    Targets,
}

impl RoleType {
    /// Top-level roles in the order they are presented.
    pub const ALL: [RoleType; 4] = [
        RoleType::Root,
        RoleType::Timestamp,
        RoleType::Snapshot,
        RoleType::Targets,
    ];

    /// Role name as it appears in `root.roles` and in `_type`.
    pub fn as_str(&self) -> &'static str {
        match self {
            RoleType::Root => "root",
            RoleType::Timestamp => "timestamp",
            RoleType::Snapshot => "snapshot",
            RoleType::Targets => "targets",
        }
    }

    /// Unversioned document name for the role.
    pub fn file_name(&self) -> &'static str {
        match self {
            RoleType::Root => META_ROOT,
            RoleType::Timestamp => META_TIMESTAMP,
            RoleType::Snapshot => META_SNAPSHOT,
            RoleType::Targets => META_TARGETS,
        }
    }

    /// Resolves a `_type` tag, ignoring case (`Root` and `root` both occur).
    pub fn from_tag(tag: &str) -> Option<Self> {
        RoleType::ALL
            .into_iter()
            .find(|role| role.as_str().eq_ignore_ascii_case(tag.trim()))
    }
}

impl fmt::Display for RoleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fields shared by every signed document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataHeader {
    #[serde(rename = "_type", alias = "type")]
    pub type_tag: String,
    #[serde(default, alias = "specVersion", deserialize_with = "null_as_default")]
    pub spec_version: String,
    pub version: u64,
    /// ISO 8601 expiry, kept verbatim.
    pub expires: String,
}

impl MetadataHeader {
    /// Parses the expiry into a typed timestamp.
    pub fn expires_at(&self) -> Result<OffsetDateTime> {
        Ok(OffsetDateTime::parse(&self.expires, &Rfc3339)?)
    }
}

/// Treats an explicit `null` like an absent field.
fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Human-readable owner derived from vendor extension fields of a key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum OwnerLabel {
    /// Key held by a named person (`x-tuf-on-ci-keyowner`).
    Owner(String),
    /// Key used by an automated signer (`x-tuf-on-ci-online-uri`).
    OnlineKey,
}

impl OwnerLabel {
    pub fn as_str(&self) -> &str {
        match self {
            OwnerLabel::Owner(owner) => owner,
            OwnerLabel::OnlineKey => ONLINE_KEY_LABEL,
        }
    }
}

impl fmt::Display for OwnerLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Public key entry. Key material is opaque and only compared for equality.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Key {
    #[serde(default, deserialize_with = "null_as_default")]
    pub keytype: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub scheme: String,
    #[serde(default)]
    pub keyval: Value,
    #[serde(
        default,
        deserialize_with = "null_as_default",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub keyid_hash_algorithms: Vec<String>,
    /// Raw owner extension; any non-string value is ignored.
    #[serde(
        default,
        rename = "x-tuf-on-ci-keyowner",
        skip_serializing_if = "Option::is_none"
    )]
    pub keyowner: Option<Value>,
    #[serde(
        default,
        rename = "x-tuf-on-ci-online-uri",
        skip_serializing_if = "Option::is_none"
    )]
    pub online_uri: Option<Value>,
}

impl Key {
    /// Resolves the display owner of this key.
    ///
    /// The online-uri marker wins over an owner name. Malformed or blank
    /// owner values resolve to `None` (unknown owner).
    pub fn owner_label(&self) -> Option<OwnerLabel> {
        if self.online_uri.as_ref().is_some_and(|uri| !uri.is_null()) {
            return Some(OwnerLabel::OnlineKey);
        }
        self.keyowner
            .as_ref()
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|owner| !owner.is_empty())
            .map(|owner| OwnerLabel::Owner(owner.to_string()))
    }

    /// Returns `true` when type, scheme and key material all match.
    pub fn same_material(&self, other: &Key) -> bool {
        self.keytype == other.keytype && self.scheme == other.scheme && self.keyval == other.keyval
    }
}

/// Signer set and threshold for a role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleKeys {
    #[serde(default, alias = "keyIDs", deserialize_with = "null_as_default")]
    pub keyids: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub threshold: u64,
}

/// Signed payload of `root.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Root {
    #[serde(flatten)]
    pub header: MetadataHeader,
    #[serde(default, alias = "consistentSnapshot", deserialize_with = "null_as_default")]
    pub consistent_snapshot: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub keys: IndexMap<String, Key>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub roles: IndexMap<String, RoleKeys>,
}

impl Root {
    /// Returns the entry for one of the top-level roles.
    pub fn role(&self, role: RoleType) -> Option<&RoleKeys> {
        self.roles.get(role.as_str())
    }
}

/// Version/length/hashes advertised for a metadata file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaFile {
    pub version: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<u64>,
    #[serde(
        default,
        deserialize_with = "null_as_default",
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub hashes: BTreeMap<String, String>,
}

/// Signed payload of `timestamp.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Timestamp {
    #[serde(flatten)]
    pub header: MetadataHeader,
    #[serde(default, deserialize_with = "null_as_default")]
    pub meta: IndexMap<String, MetaFile>,
}

impl Timestamp {
    /// Snapshot version the timestamp points at.
    pub fn snapshot_version(&self) -> Option<u64> {
        self.meta.get(META_SNAPSHOT).map(|meta| meta.version)
    }
}

/// Signed payload of `snapshot.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(flatten)]
    pub header: MetadataHeader,
    #[serde(default, deserialize_with = "null_as_default")]
    pub meta: IndexMap<String, MetaFile>,
}

impl Snapshot {
    /// Meta entry for a delegated role (`<role>.json`).
    pub fn delegated_meta(&self, role: &str) -> Option<&MetaFile> {
        self.meta.get(&delegated_file_name(role))
    }

    /// Iterates the delegated metadata files listed by the snapshot.
    pub fn delegated_files(&self) -> impl Iterator<Item = (&str, &MetaFile)> {
        self.meta.iter().filter_map(|(file, meta)| {
            if TOP_LEVEL_META_FILES.contains(&file.as_str()) {
                return None;
            }
            file.strip_suffix(".json").map(|role| (role, meta))
        })
    }
}

/// Metadata describing an individual target entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetFile {
    #[serde(default, deserialize_with = "null_as_default")]
    pub length: u64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub hashes: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom: Option<Value>,
}

/// A role delegated by a targets document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelegatedRole {
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(default, alias = "keyIDs", deserialize_with = "null_as_default")]
    pub keyids: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub threshold: u64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub paths: Vec<String>,
    #[serde(
        default,
        alias = "pathHashPrefixes",
        deserialize_with = "null_as_default",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub path_hash_prefixes: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub terminating: bool,
}

impl DelegatedRole {
    /// Threshold and signer set, shaped like a top-level role entry.
    pub fn role_keys(&self) -> RoleKeys {
        RoleKeys {
            keyids: self.keyids.clone(),
            threshold: self.threshold,
        }
    }
}

/// Normalised delegation block of a targets document.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Delegations {
    pub keys: IndexMap<String, Key>,
    pub roles: Vec<DelegatedRole>,
}

impl Delegations {
    pub fn role(&self, name: &str) -> Option<&DelegatedRole> {
        self.roles.iter().find(|role| role.name == name)
    }
}

/// Shapes of `delegations` accepted on input.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawDelegations {
    Object {
        #[serde(default, deserialize_with = "null_as_default")]
        keys: IndexMap<String, Key>,
        #[serde(default, deserialize_with = "null_as_default")]
        roles: RawDelegatedRoles,
    },
    List(Vec<DelegatedRole>),
}

/// `delegations.roles` either as a list or as a `name -> role` map.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawDelegatedRoles {
    List(Vec<DelegatedRole>),
    Map(IndexMap<String, DelegatedRole>),
}

impl Default for RawDelegatedRoles {
    fn default() -> Self {
        RawDelegatedRoles::List(Vec::new())
    }
}

impl From<RawDelegations> for Delegations {
    fn from(raw: RawDelegations) -> Self {
        let (keys, roles) = match raw {
            RawDelegations::Object { keys, roles } => (keys, roles),
            RawDelegations::List(roles) => (IndexMap::new(), RawDelegatedRoles::List(roles)),
        };
        let roles = match roles {
            RawDelegatedRoles::List(roles) => roles,
            RawDelegatedRoles::Map(map) => map
                .into_iter()
                .map(|(name, mut role)| {
                    if role.name.is_empty() {
                        role.name = name;
                    }
                    role
                })
                .collect(),
        };
        let roles = roles
            .into_iter()
            .filter(|role| {
                if role.name.is_empty() {
                    warn!("metadata: dropping delegated role without a name");
                    return false;
                }
                true
            })
            .collect();
        Delegations { keys, roles }
    }
}

fn deserialize_delegations<'de, D>(
    deserializer: D,
) -> std::result::Result<Option<Delegations>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<RawDelegations>::deserialize(deserializer)?;
    Ok(raw.map(Delegations::from))
}

/// Signed payload of `targets.json` or of a delegated targets document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Targets {
    #[serde(flatten)]
    pub header: MetadataHeader,
    #[serde(default, deserialize_with = "null_as_default")]
    pub targets: IndexMap<String, TargetFile>,
    #[serde(
        default,
        deserialize_with = "deserialize_delegations",
        skip_serializing_if = "Option::is_none"
    )]
    pub delegations: Option<Delegations>,
}

/// One entry of a document's raw signature list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Signature {
    pub keyid: String,
    pub sig: String,
}

impl Signature {
    /// A signature counts only when the signature string is non-empty.
    pub fn is_signed(&self) -> bool {
        !self.sig.is_empty()
    }
}

#[derive(Deserialize)]
struct RawSignature {
    #[serde(default)]
    keyid: Option<String>,
    #[serde(default)]
    sig: Option<String>,
}

#[derive(Deserialize)]
struct RawEnvelope {
    signed: Value,
    #[serde(default, deserialize_with = "null_as_default")]
    signatures: Vec<RawSignature>,
}

/// Signed payload plus its unverified signature list.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SignedEnvelope<T> {
    pub signed: T,
    pub signatures: Vec<Signature>,
}

/// Implemented by the typed payloads of the four document kinds.
pub trait SignedMetadata: DeserializeOwned {
    /// Role whose `_type` the payload must declare.
    const ROLE: RoleType;

    fn header(&self) -> &MetadataHeader;
}

impl SignedMetadata for Root {
    const ROLE: RoleType = RoleType::Root;

    fn header(&self) -> &MetadataHeader {
        &self.header
    }
}

impl SignedMetadata for Timestamp {
    const ROLE: RoleType = RoleType::Timestamp;

    fn header(&self) -> &MetadataHeader {
        &self.header
    }
}

impl SignedMetadata for Snapshot {
    const ROLE: RoleType = RoleType::Snapshot;

    fn header(&self) -> &MetadataHeader {
        &self.header
    }
}

impl SignedMetadata for Targets {
    const ROLE: RoleType = RoleType::Targets;

    fn header(&self) -> &MetadataHeader {
        &self.header
    }
}

/// Parses raw bytes into a typed envelope, checking the `_type` tag.
pub fn parse_envelope<T: SignedMetadata>(bytes: &[u8]) -> Result<SignedEnvelope<T>> {
    let raw: RawEnvelope = serde_json::from_slice(bytes)?;
    into_typed(raw)
}

fn into_typed<T: SignedMetadata>(raw: RawEnvelope) -> Result<SignedEnvelope<T>> {
    let mut payload = raw.signed;
    // `_type` wins when a document carries both spellings of the tag.
    if let Value::Object(fields) = &mut payload {
        if fields.contains_key("_type") {
            fields.remove("type");
        }
    }
    let signed: T = serde_json::from_value(payload)?;
    let tag = &signed.header().type_tag;
    if RoleType::from_tag(tag) != Some(T::ROLE) {
        return Err(MetadataError::UnexpectedType {
            expected: T::ROLE.as_str(),
            actual: tag.clone(),
        });
    }
    Ok(SignedEnvelope {
        signed,
        signatures: normalise_signatures(raw.signatures),
    })
}

fn normalise_signatures(raw: Vec<RawSignature>) -> Vec<Signature> {
    raw.into_iter()
        .filter_map(|entry| match entry.keyid {
            Some(keyid) if !keyid.is_empty() => Some(Signature {
                keyid,
                sig: entry.sig.unwrap_or_default(),
            }),
            _ => {
                warn!("metadata: skipping signature entry without a keyid");
                None
            }
        })
        .collect()
}

/// Any of the four document kinds, selected by the `_type` tag.
#[derive(Debug, Clone, PartialEq)]
pub enum SignedDocument {
    Root(SignedEnvelope<Root>),
    Timestamp(SignedEnvelope<Timestamp>),
    Snapshot(SignedEnvelope<Snapshot>),
    Targets(SignedEnvelope<Targets>),
}

impl SignedDocument {
    pub fn role_type(&self) -> RoleType {
        match self {
            SignedDocument::Root(_) => RoleType::Root,
            SignedDocument::Timestamp(_) => RoleType::Timestamp,
            SignedDocument::Snapshot(_) => RoleType::Snapshot,
            SignedDocument::Targets(_) => RoleType::Targets,
        }
    }

    pub fn header(&self) -> &MetadataHeader {
        match self {
            SignedDocument::Root(doc) => &doc.signed.header,
            SignedDocument::Timestamp(doc) => &doc.signed.header,
            SignedDocument::Snapshot(doc) => &doc.signed.header,
            SignedDocument::Targets(doc) => &doc.signed.header,
        }
    }

    pub fn signatures(&self) -> &[Signature] {
        match self {
            SignedDocument::Root(doc) => &doc.signatures,
            SignedDocument::Timestamp(doc) => &doc.signatures,
            SignedDocument::Snapshot(doc) => &doc.signatures,
            SignedDocument::Targets(doc) => &doc.signatures,
        }
    }
}

/// Parses a document of any kind, dispatching on its `_type` tag.
pub fn parse_document(bytes: &[u8]) -> Result<SignedDocument> {
    let raw: RawEnvelope = serde_json::from_slice(bytes)?;
    let tag = raw
        .signed
        .get("_type")
        .or_else(|| raw.signed.get("type"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    match RoleType::from_tag(&tag) {
        Some(RoleType::Root) => into_typed(raw).map(SignedDocument::Root),
        Some(RoleType::Timestamp) => into_typed(raw).map(SignedDocument::Timestamp),
        Some(RoleType::Snapshot) => into_typed(raw).map(SignedDocument::Snapshot),
        Some(RoleType::Targets) => into_typed(raw).map(SignedDocument::Targets),
        None => Err(MetadataError::UnknownType(tag)),
    }
}

/// Document name of a delegated role.
pub fn delegated_file_name(role: &str) -> String {
    format!("{role}.json")
}

/// Version-prefixed document name (`3.root.json`).
pub fn versioned_file_name(version: u64, file: &str) -> String {
    format!("{version}.{file}")
}
