//! Version discovery and root comparison over filesystem and HTTP loaders.

mod common;

use common::fixtures::{root_history, sample_repository, BOB, CAROL};
use httptest::{matchers::*, responders::*, Expectation, Server};
use tuf_viewer_core::diff::{ExpiryChange, KeyStatus, VersionAnomaly};
use tuf_viewer_core::loader::{FilesystemLoader, HttpLoader, HttpLoaderOptions};
use tuf_viewer_core::service::{compare_root_versions, list_root_versions};

/// Historical roots are listed newest first, current root included.
#[tokio::test]
async fn discovers_published_versions() {
    let dir = sample_repository();
    let listing = list_root_versions(&FilesystemLoader::new(dir.path())).await;
    assert!(listing.error.is_none());
    let versions: Vec<_> = listing.versions.iter().map(|v| v.version).collect();
    assert_eq!(versions, vec![4, 2, 1]);
    assert!(listing.versions[0].locator.ends_with("root.json"));
    assert!(!listing.versions[0].locator.ends_with("4.root.json"));
    assert!(listing.versions[2].locator.ends_with("1.root.json"));
}

/// Argument order is irrelevant; the older version is always "old".
#[tokio::test]
async fn compare_is_order_independent() {
    let dir = sample_repository();
    let loader = FilesystemLoader::new(dir.path());
    let forward = compare_root_versions(&loader, 2, 4).await;
    let backward = compare_root_versions(&loader, 4, 2).await;
    assert_eq!(forward, backward);
    assert_eq!(
        serde_json::to_string(&forward).expect("json"),
        serde_json::to_string(&backward).expect("json")
    );

    let diff = forward.diff.expect("diff present");
    assert_eq!((diff.old_version, diff.new_version), (2, 4));
    assert_eq!(diff.version_anomaly, Some(VersionAnomaly::Jump { skipped: 1 }));
    assert_eq!(diff.expiry_change, ExpiryChange::Shortened { days: 30 });

    assert_eq!(diff.key_diffs.len(), 1);
    assert_eq!(diff.key_diffs[0].keyid, "D");
    assert_eq!(diff.key_diffs[0].status, KeyStatus::Added);
    assert_eq!(diff.key_diffs[0].owner.as_deref(), Some("online key"));

    assert_eq!(diff.role_diffs.len(), 1);
    assert_eq!(diff.role_diffs[0].role_name, "timestamp");
    assert_eq!(diff.role_diffs[0].added_keyids, vec!["D"]);
    assert_eq!(diff.role_diffs[0].old_threshold, None);

    let flips: Vec<_> = diff
        .signature_diffs
        .iter()
        .map(|s| (s.keyid.as_str(), s.old_signed, s.new_signed, s.owner.as_deref()))
        .collect();
    assert_eq!(
        flips,
        vec![("B", true, false, None), ("C", true, false, Some(CAROL))]
    );

    let verification = forward.verification.expect("verification present");
    assert!(verification.old.verified);
    assert_eq!(verification.new.signed, 1);
    assert!(!verification.new.verified);
    assert!(!verification.new_signed_by_old_keys.verified);
}

/// Key rotation between consecutive versions.
#[tokio::test]
async fn compare_consecutive_versions() {
    let dir = sample_repository();
    let outcome = compare_root_versions(&FilesystemLoader::new(dir.path()), 1, 2).await;
    let diff = outcome.diff.expect("diff present");
    assert_eq!(diff.version_anomaly, None);
    assert_eq!(diff.expiry_change, ExpiryChange::Extended { days: 181 });

    let keys: Vec<_> = diff
        .key_diffs
        .iter()
        .map(|k| (k.keyid.as_str(), k.status))
        .collect();
    assert_eq!(keys, vec![("C", KeyStatus::Added), ("B", KeyStatus::Removed)]);
    assert_eq!(diff.key_diffs[1].owner.as_deref(), Some(BOB));

    let root_role = &diff.role_diffs[0];
    assert_eq!(root_role.role_name, "root");
    assert_eq!(root_role.added_keyids, vec!["C"]);
    assert_eq!(root_role.removed_keyids, vec!["B"]);
    assert_eq!(
        (root_role.old_threshold, root_role.new_threshold),
        (Some(1), Some(2))
    );
    let targets_role = &diff.role_diffs[1];
    assert_eq!(targets_role.role_name, "targets");
    assert_eq!(targets_role.old_threshold, None);

    assert_eq!(diff.signature_diffs.len(), 1);
    assert_eq!(diff.signature_diffs[0].keyid, "C");
    assert!(diff.signature_diffs[0].new_signed);

    let verification = outcome.verification.expect("verification present");
    assert!(verification.is_chained());
}

#[tokio::test]
async fn self_comparison_is_rejected() {
    let dir = sample_repository();
    let outcome = compare_root_versions(&FilesystemLoader::new(dir.path()), 4, 4).await;
    assert!(outcome.diff.is_none());
    assert!(outcome.verification.is_none());
    assert!(outcome.error.is_some());
}

/// Discovery and comparison behave the same over HTTP.
#[tokio::test]
async fn http_repository_versions_and_compare() {
    let history = root_history();
    let server = Server::run();
    let body = |index: usize| serde_json::to_vec(&history[index]).expect("fixture json");

    server.expect(
        Expectation::matching(all_of![
            request::method("GET"),
            request::path("/metadata/root.json"),
        ])
        .times(1..)
        .respond_with(status_code(200).body(body(2))),
    );
    server.expect(
        Expectation::matching(all_of![
            request::method("GET"),
            request::path("/metadata/1.root.json"),
        ])
        .times(1..)
        .respond_with(status_code(200).body(body(0))),
    );
    server.expect(
        Expectation::matching(all_of![
            request::method("GET"),
            request::path("/metadata/2.root.json"),
        ])
        .respond_with(status_code(200).body(body(1))),
    );
    for missing in [
        "/metadata/3.root.json",
        "/metadata/4.root.json",
        "/metadata/5.root.json",
    ] {
        server.expect(
            Expectation::matching(all_of![request::method("GET"), request::path(missing)])
                .times(1..)
                .respond_with(status_code(404)),
        );
    }

    let loader = HttpLoader::new(
        &server.url_str("/metadata/"),
        HttpLoaderOptions {
            allow_plaintext: true,
            ..HttpLoaderOptions::default()
        },
    )
    .expect("loader builds");

    let listing = list_root_versions(&loader).await;
    let versions: Vec<_> = listing.versions.iter().map(|v| v.version).collect();
    assert_eq!(versions, vec![4, 2, 1]);
    assert_eq!(
        listing.versions[0].locator,
        server.url_str("/metadata/root.json")
    );

    let outcome = compare_root_versions(&loader, 4, 1).await;
    let diff = outcome.diff.expect("diff present");
    assert_eq!((diff.old_version, diff.new_version), (1, 4));
    assert_eq!(diff.version_anomaly, Some(VersionAnomaly::Jump { skipped: 2 }));
}
