//! Builders for on-disk TUF repositories used by the integration tests.
use std::path::Path;

use serde_json::{json, Value};
use tempfile::TempDir;

/// Owner labels attached to the sample keys.
pub const ALICE: &str = "@alice";
pub const BOB: &str = "@bob";
pub const CAROL: &str = "@carol";

/// Builds a key entry with optional owner and online markers.
pub fn key(public: &str, owner: Option<&str>, online: bool) -> Value {
    let mut value = json!({
        "keytype": "ed25519",
        "scheme": "ed25519",
        "keyval": {"public": public}
    });
    if let Some(owner) = owner {
        value["x-tuf-on-ci-keyowner"] = json!(owner);
    }
    if online {
        value["x-tuf-on-ci-online-uri"] = json!("gcpkms:projects/example/keys/online");
    }
    value
}

/// Wraps a signed payload in an envelope with `(keyid, sig)` entries.
pub fn envelope(signed: Value, signatures: &[(&str, &str)]) -> Value {
    let signatures: Vec<Value> = signatures
        .iter()
        .map(|(keyid, sig)| json!({"keyid": keyid, "sig": sig}))
        .collect();
    json!({"signed": signed, "signatures": signatures})
}

/// Builds a root payload.
pub fn root(version: u64, expires: &str, keys: Value, roles: Value) -> Value {
    json!({
        "_type": "root",
        "spec_version": "1.0.31",
        "version": version,
        "expires": expires,
        "consistent_snapshot": true,
        "keys": keys,
        "roles": roles
    })
}

pub fn write_doc(dir: &Path, name: &str, doc: &Value) {
    let bytes = serde_json::to_vec_pretty(doc).expect("fixture serializes");
    std::fs::write(dir.join(name), bytes).expect("fixture written");
}

/// Root history of the sample repository.
///
/// * v1: A (alice) and B (bob) share the root role, threshold 1.
/// * v2: B removed, C (carol) added, threshold raised to 2.
/// * v4: D (online) added to timestamp; v3 was never published.
pub fn root_history() -> Vec<Value> {
    let roles_v1 = json!({
        "root": {"keyids": ["A", "B"], "threshold": 1},
        "timestamp": {"keyids": ["T"], "threshold": 1},
        "snapshot": {"keyids": ["T"], "threshold": 1},
        "targets": {"keyids": ["A", "B"], "threshold": 1}
    });
    let roles_v2 = json!({
        "root": {"keyids": ["A", "C"], "threshold": 2},
        "timestamp": {"keyids": ["T"], "threshold": 1},
        "snapshot": {"keyids": ["T"], "threshold": 1},
        "targets": {"keyids": ["A", "C"], "threshold": 1}
    });
    let roles_v4 = json!({
        "root": {"keyids": ["A", "C"], "threshold": 2},
        "timestamp": {"keyids": ["T", "D"], "threshold": 1},
        "snapshot": {"keyids": ["T"], "threshold": 1},
        "targets": {"keyids": ["A", "C"], "threshold": 1}
    });
    vec![
        envelope(
            root(
                1,
                "2030-01-01T00:00:00Z",
                json!({
                    "A": key("aa", Some(ALICE), false),
                    "B": key("bb", Some(BOB), false),
                    "T": key("tt", None, true)
                }),
                roles_v1,
            ),
            &[("A", "a1"), ("B", "b1")],
        ),
        envelope(
            root(
                2,
                "2030-07-01T00:00:00Z",
                json!({
                    "A": key("aa", Some(ALICE), false),
                    "T": key("tt", None, true),
                    "C": key("cc", Some(CAROL), false)
                }),
                roles_v2,
            ),
            &[("A", "a2"), ("B", "b2"), ("C", "c2")],
        ),
        envelope(
            root(
                4,
                "2030-06-01T00:00:00Z",
                json!({
                    "A": key("aa", Some(ALICE), false),
                    "T": key("tt", None, true),
                    "C": key("cc", Some(CAROL), false),
                    "D": key("dd", None, true)
                }),
                roles_v4,
            ),
            &[("A", "a4"), ("C", "")],
        ),
    ]
}

/// Writes the sample repository and returns its directory.
///
/// Historical roots are published as `<n>.root.json`; the current root (v4)
/// only exists as `root.json`. The `npm` delegation is published under its
/// consistent-snapshot name, `pypi` is listed in snapshot but missing.
pub fn sample_repository() -> TempDir {
    let dir = TempDir::new().expect("tempdir");
    let history = root_history();
    for doc in &history[..2] {
        let version = doc["signed"]["version"].as_u64().expect("fixture version");
        write_doc(dir.path(), &format!("{version}.root.json"), doc);
    }
    write_doc(dir.path(), "root.json", &history[2]);
    write_doc(
        dir.path(),
        "timestamp.json",
        &envelope(
            json!({
                "_type": "timestamp", "spec_version": "1.0.31", "version": 120,
                "expires": "2030-01-02T00:00:00Z",
                "meta": {"snapshot.json": {"version": 31}}
            }),
            &[("T", "t1")],
        ),
    );
    write_doc(
        dir.path(),
        "snapshot.json",
        &envelope(
            json!({
                "_type": "snapshot", "spec_version": "1.0.31", "version": 31,
                "expires": "2030-01-08T00:00:00Z",
                "meta": {
                    "targets.json": {"version": 7},
                    "npm.json": {"version": 3},
                    "pypi.json": {"version": 2}
                }
            }),
            &[("T", "s1")],
        ),
    );
    write_doc(
        dir.path(),
        "targets.json",
        &envelope(
            json!({
                "_type": "targets", "spec_version": "1.0.31", "version": 7,
                "expires": "2030-09-01T00:00:00Z",
                "targets": {
                    "trusted_root.json": {"length": 42, "hashes": {"sha256": "00ff"}}
                },
                "delegations": {
                    "keys": {"N": key("nn", Some("@npm-team"), false)},
                    "roles": [
                        {"name": "npm", "keyids": ["N"], "threshold": 1, "paths": ["npm/*"],
                         "terminating": true},
                        {"name": "pypi", "keyids": ["N"], "threshold": 1, "paths": ["pypi/*"],
                         "terminating": false}
                    ]
                }
            }),
            &[("A", "ta"), ("C", "tc")],
        ),
    );
    write_doc(
        dir.path(),
        "3.npm.json",
        &envelope(
            json!({
                "_type": "targets", "spec_version": "1.0.31", "version": 3,
                "expires": "2030-04-01T00:00:00Z",
                "targets": {"npm/registry-keys.json": {"length": 7, "hashes": {"sha256": "aa"}}}
            }),
            &[("N", "n3")],
        ),
    );
    dir
}
