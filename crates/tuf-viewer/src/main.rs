// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};
use serde_json::json;
use tracing::{debug, error};
use tracing_subscriber::EnvFilter;

use tuf_viewer_core::config::{MetadataSource, ViewerEnv, DEFAULT_LOG_LEVEL};
use tuf_viewer_core::display::{describe_expiry_change, format_expiration, truncate_keyid};
use tuf_viewer_core::metadata::parse_document;
use tuf_viewer_core::service::{
    compare_root_versions, list_root_versions, load_roles, CompareOutcome, RoleListing,
    VersionListing,
};

/// Inspect TUF repository metadata and diff root versions.
#[derive(Parser, Debug)]
#[command(name = "tuf-viewer")]
struct Cli {
    /// Local metadata directory (overrides `TUF_VIEWER_METADATA_DIR`).
    #[arg(long, value_name = "DIR", global = true, conflicts_with = "url")]
    metadata_dir: Option<PathBuf>,
    /// Remote repository base URL (overrides `TUF_VIEWER_REMOTE_URL`).
    #[arg(long, value_name = "URL", global = true)]
    url: Option<String>,
    /// Accept `http://` repository URLs.
    #[arg(long, global = true)]
    allow_plaintext: bool,
    #[arg(long, value_enum, default_value_t = OutputFormat::Json, global = true)]
    format: OutputFormat,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Describe every role of the repository.
    Roles,
    /// List the root versions available for comparison.
    Versions,
    /// Compare two root versions (in either order).
    Diff { a: u64, b: u64 },
    /// Parse a single metadata file and summarise it.
    Inspect { file: PathBuf },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Json,
    Text,
}

/// Rendered command output.
struct Output {
    body: String,
    failed: bool,
}

impl Output {
    fn new(body: String, failed: bool) -> Self {
        Self { body, failed }
    }
}

/// Applies command-line overrides on top of the environment.
fn resolve_env(cli: &Cli, mut env: ViewerEnv) -> ViewerEnv {
    if let Some(url) = &cli.url {
        env.source = MetadataSource::Remote(url.clone());
    } else if let Some(dir) = &cli.metadata_dir {
        env.source = MetadataSource::Directory(dir.clone());
    }
    if cli.allow_plaintext {
        env.allow_plaintext = true;
    }
    env
}

fn to_json<T: serde::Serialize>(value: &T) -> String {
    serde_json::to_string_pretty(value)
        .unwrap_or_else(|err| json!({ "error": err.to_string() }).to_string())
}

fn render_roles(listing: &RoleListing) -> String {
    let mut out = String::new();
    if let Some(err) = &listing.error {
        let _ = writeln!(out, "error: {err}");
    }
    for role in &listing.roles {
        let signers: Vec<&str> = role
            .signers
            .keyids
            .iter()
            .map(|signer| match &signer.owner {
                Some(owner) => owner.as_str(),
                None => truncate_keyid(&signer.keyid),
            })
            .collect();
        let _ = writeln!(
            out,
            "{} v{} expires {} threshold {}/{} signers: {}",
            role.role,
            role.version,
            format_expiration(&role.expires),
            role.signers.required,
            role.signers.total,
            signers.join(", ")
        );
    }
    out
}

fn render_versions(listing: &VersionListing) -> String {
    let mut out = String::new();
    if let Some(err) = &listing.error {
        let _ = writeln!(out, "error: {err}");
    }
    for version in &listing.versions {
        let _ = writeln!(out, "{}\t{}", version.version, version.locator);
    }
    out
}

fn render_diff(outcome: &CompareOutcome) -> String {
    let mut out = String::new();
    if let Some(err) = &outcome.error {
        let _ = writeln!(out, "error: {err}");
    }
    let Some(diff) = &outcome.diff else {
        return out;
    };
    let _ = writeln!(out, "root v{} -> v{}", diff.old_version, diff.new_version);
    if let Some(anomaly) = &diff.version_anomaly {
        let _ = writeln!(out, "warning: {}", to_json(anomaly).replace('\n', " "));
    }
    let _ = writeln!(
        out,
        "expiry {} -> {} ({})",
        format_expiration(&diff.old_expires),
        format_expiration(&diff.new_expires),
        describe_expiry_change(&diff.expiry_change)
    );
    for key in &diff.key_diffs {
        let _ = writeln!(
            out,
            "key {} {:?} {}",
            truncate_keyid(&key.keyid),
            key.status,
            key.owner.as_deref().unwrap_or("-")
        );
    }
    for role in &diff.role_diffs {
        let _ = writeln!(
            out,
            "role {} +[{}] -[{}]",
            role.role_name,
            role.added_keyids.join(", "),
            role.removed_keyids.join(", ")
        );
    }
    for signature in &diff.signature_diffs {
        let _ = writeln!(
            out,
            "signature {} {} -> {}",
            truncate_keyid(&signature.keyid),
            signature.old_signed,
            signature.new_signed
        );
    }
    out
}

async fn inspect(file: &Path) -> Output {
    let parsed = tokio::fs::read(file)
        .await
        .map_err(|err| err.to_string())
        .and_then(|bytes| parse_document(&bytes).map_err(|err| err.to_string()));
    match parsed {
        Ok(document) => {
            let header = document.header();
            let signed = document
                .signatures()
                .iter()
                .filter(|signature| signature.is_signed())
                .count();
            let body = json!({
                "type": document.role_type(),
                "version": header.version,
                "specVersion": header.spec_version,
                "expires": header.expires,
                "signatures": document.signatures().len(),
                "signed": signed,
            });
            Output::new(to_json(&body), false)
        }
        Err(err) => Output::new(to_json(&json!({ "error": err })), true),
    }
}

async fn execute(cli: &Cli, env: &ViewerEnv) -> Output {
    if let Command::Inspect { file } = &cli.command {
        return inspect(file).await;
    }
    let loader = match env.build_loader() {
        Ok(loader) => loader,
        Err(err) => return Output::new(to_json(&json!({ "error": err.to_string() })), true),
    };
    let text = cli.format == OutputFormat::Text;
    match &cli.command {
        Command::Roles => {
            let listing = load_roles(loader.as_ref()).await;
            let body = if text { render_roles(&listing) } else { to_json(&listing) };
            Output::new(body, listing.error.is_some())
        }
        Command::Versions => {
            let listing = list_root_versions(loader.as_ref()).await;
            let body = if text { render_versions(&listing) } else { to_json(&listing) };
            Output::new(body, listing.error.is_some())
        }
        Command::Diff { a, b } => {
            let outcome = compare_root_versions(loader.as_ref(), *a, *b).await;
            let body = if text { render_diff(&outcome) } else { to_json(&outcome) };
            Output::new(body, outcome.error.is_some())
        }
        Command::Inspect { file } => inspect(file).await,
    }
}

#[tokio::main]
pub async fn main() -> ExitCode {
    let cli = Cli::parse();
    let env = resolve_env(&cli, ViewerEnv::from_os_env());

    let env_filter = format!("h2=off,hyper=off,rustls=off,{}", env.log_level.to_lowercase());
    let filter = EnvFilter::try_new(env_filter)
        .or_else(|_| EnvFilter::try_new(DEFAULT_LOG_LEVEL))
        .unwrap_or_default();
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .without_time()
        .finish();

    if let Err(err) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("failed to install log subscriber: {err}");
    }
    debug!("Logging subsystem enabled");

    let output = execute(&cli, &env).await;
    println!("{}", output.body.trim_end());
    if output.failed {
        error!("tuf-viewer: command finished with an error");
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tuf_viewer_core::diff::{ExpiryChange, RootDiff, VersionAnomaly};

    /// Flags override the environment, and the URL wins over the directory.
    #[test]
    fn cli_flags_override_environment() {
        let cli = Cli::try_parse_from([
            "tuf-viewer",
            "--url",
            "http://localhost:9000/metadata",
            "--allow-plaintext",
            "versions",
        ])
        .expect("cli parses");
        let env = resolve_env(&cli, ViewerEnv::default());
        assert_eq!(
            env.source,
            MetadataSource::Remote("http://localhost:9000/metadata".into())
        );
        assert!(env.allow_plaintext);

        let cli = Cli::try_parse_from(["tuf-viewer", "roles", "--metadata-dir", "/tmp/repo"])
            .expect("cli parses");
        let env = resolve_env(&cli, ViewerEnv::default());
        assert_eq!(env.source, MetadataSource::Directory("/tmp/repo".into()));
    }

    #[test]
    fn cli_rejects_conflicting_sources() {
        assert!(Cli::try_parse_from([
            "tuf-viewer",
            "--url",
            "https://example.com",
            "--metadata-dir",
            "/tmp/repo",
            "roles",
        ])
        .is_err());
        assert!(Cli::try_parse_from(["tuf-viewer", "diff", "3"]).is_err());
    }

    /// `inspect` summarises a single document and flags parse failures.
    #[tokio::test]
    async fn inspect_summarises_document() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let path = dir.path().join("timestamp.json");
        std::fs::write(
            &path,
            json!({
                "signed": {"_type": "timestamp", "version": 9, "expires": "2030-01-01T00:00:00Z"},
                "signatures": [{"keyid": "a", "sig": "00"}, {"keyid": "b", "sig": ""}]
            })
            .to_string(),
        )
        .expect("write");

        let cli = Cli::try_parse_from(["tuf-viewer", "inspect", path.to_str().expect("utf8")])
            .expect("cli parses");
        let output = execute(&cli, &ViewerEnv::default()).await;
        assert!(!output.failed);
        let value: serde_json::Value = serde_json::from_str(&output.body).expect("json output");
        assert_eq!(value["type"], "timestamp");
        assert_eq!(value["signatures"], 2);
        assert_eq!(value["signed"], 1);

        let missing = Cli::try_parse_from(["tuf-viewer", "inspect", "/nonexistent/root.json"])
            .expect("cli parses");
        assert!(execute(&missing, &ViewerEnv::default()).await.failed);
    }

    /// Diff errors are reported with a failing status.
    #[tokio::test]
    async fn self_diff_fails() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let cli = Cli::try_parse_from([
            "tuf-viewer",
            "--metadata-dir",
            dir.path().to_str().expect("utf8"),
            "diff",
            "2",
            "2",
        ])
        .expect("cli parses");
        let env = resolve_env(&cli, ViewerEnv::default());
        let output = execute(&cli, &env).await;
        assert!(output.failed);
        assert!(output.body.contains("Cannot compare a version to itself"));
    }

    #[test]
    fn text_diff_mentions_jump_and_expiry() {
        let outcome = CompareOutcome {
            diff: Some(RootDiff {
                old_version: 2,
                new_version: 5,
                old_expires: "2030-01-01T00:00:00Z".into(),
                new_expires: "2030-01-11T00:00:00Z".into(),
                key_diffs: Vec::new(),
                role_diffs: Vec::new(),
                signature_diffs: Vec::new(),
                version_anomaly: Some(VersionAnomaly::Jump { skipped: 2 }),
                expiry_change: ExpiryChange::Extended { days: 10 },
            }),
            verification: None,
            error: None,
        };
        let text = render_diff(&outcome);
        assert!(text.starts_with("root v2 -> v5"));
        assert!(text.contains("\"jump\""));
        assert!(text.contains("extended by 10 days"));
    }
}
