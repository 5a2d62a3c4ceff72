//! qtrack command-line front end.
//!
//! Runs the ingestion and metrics pipeline against a JSON snapshot file and
//! prints results as pretty JSON on stdout. Logs go to stderr (`RUST_LOG`).

#![forbid(unsafe_code)]

use std::io;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Parser;
use qtrack::cli::{Cli, Commands};
use qtrack::config::Config;
use qtrack::coverage::calculate_coverage_with;
use qtrack::junit_xml::{extract_test_result, parse_junit_xml_bounded};
use qtrack::quality_gate::{GateCatalog, GateRefreshHook, refresh_release_gates};
use qtrack::reconcile::Reconciler;
use qtrack::release_metrics::compute_release_metrics;
use qtrack::model::Version;
use qtrack::store::{InMemoryQualityStore, QualityStore, Snapshot};
use qtrack::webhook::WebhookHandler;
use qtrack::webhook_store::InMemoryWebhookStore;
use serde::Serialize;
use serde_json::Value;
use tracing_subscriber::EnvFilter;

fn main() {
    if let Err(err) = main_impl() {
        eprintln!("Error: {err:#}");
        std::process::exit(1);
    }
}

fn main_impl() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    let config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Ingest {
            payload,
            snapshot,
            write,
        } => handle_ingest(&config, &payload, &snapshot, write),
        Commands::Coverage { snapshot, release } => {
            handle_coverage(&config, &snapshot, release.as_deref())
        }
        Commands::Gates { snapshot, write } => handle_gates(&config, &snapshot, write),
        Commands::Metrics { snapshot, release } => handle_metrics(&config, &snapshot, &release),
        Commands::ParseJunit { report, id } => handle_parse_junit(&config, &report, id.as_deref()),
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn load_snapshot(path: &Path) -> Result<Snapshot> {
    Snapshot::load(path).with_context(|| format!("loading snapshot {}", path.display()))
}

fn handle_ingest(config: &Config, payload: &Path, snapshot_path: &Path, write: bool) -> Result<()> {
    let raw = std::fs::read_to_string(payload)
        .with_context(|| format!("reading payload {}", payload.display()))?;
    let payload: Value = serde_json::from_str(&raw)
        .with_context(|| format!("parsing payload {}", payload.display()))?;
    let snapshot = if snapshot_path.exists() {
        load_snapshot(snapshot_path)?
    } else {
        Snapshot::default()
    };

    let store = Arc::new(InMemoryQualityStore::new(snapshot));
    let gate_refresh = Arc::new(GateRefreshHook::new(
        Arc::new(GateCatalog::standard()),
        config.coverage_options(),
    ));
    let reconciler =
        Arc::new(Reconciler::new(store.clone(), store.events()).with_hook(gate_refresh));
    let handler =
        WebhookHandler::with_config(Arc::new(InMemoryWebhookStore::new()), reconciler, config);

    let is_bulk = payload
        .get("results")
        .and_then(Value::as_array)
        .is_some_and(|results| results.len() > 1);
    let succeeded = if is_bulk {
        let outcome = handler.process_test_results(&payload)?;
        print_json(&outcome)?;
        outcome.all_succeeded()
    } else {
        let response = handler.handle(&payload);
        print_json(&response)?;
        response.is_success()
    };

    if write {
        store.snapshot().save(snapshot_path)?;
        tracing::info!(
            event = "cli.snapshot_written",
            path = %snapshot_path.display(),
            "Wrote snapshot"
        );
    }
    if !succeeded {
        bail!("webhook payload was not fully accepted");
    }
    Ok(())
}

fn handle_coverage(config: &Config, snapshot_path: &Path, release: Option<&str>) -> Result<()> {
    let snapshot = load_snapshot(snapshot_path)?;
    let coverage = calculate_coverage_with(
        &snapshot.requirements,
        &snapshot.mapping,
        &snapshot.test_cases,
        release,
        &config.coverage_options(),
    );
    print_json(&coverage)
}

fn handle_gates(config: &Config, snapshot_path: &Path, write: bool) -> Result<()> {
    let store = InMemoryQualityStore::new(load_snapshot(snapshot_path)?);
    let versions = refresh_release_gates(
        &store,
        &GateCatalog::standard(),
        &config.coverage_options(),
    )?;
    print_json(&versions)?;
    if write {
        store.snapshot().save(snapshot_path)?;
    }
    Ok(())
}

fn handle_metrics(config: &Config, snapshot_path: &Path, release: &str) -> Result<()> {
    let store = InMemoryQualityStore::new(load_snapshot(snapshot_path)?);
    let version = store
        .get_versions()?
        .into_iter()
        .find(|version| version.id == release)
        .unwrap_or_else(|| {
            tracing::warn!(
                event = "cli.unknown_release",
                release,
                "Release is not defined in the snapshot; no gates to evaluate"
            );
            Version {
                id: release.to_string(),
                name: String::new(),
                status: String::new(),
                release_date: None,
                quality_gates: Vec::new(),
            }
        });
    let metrics = compute_release_metrics(
        &version,
        &store.get_requirements()?,
        &store.get_mapping()?,
        &store.get_test_cases()?,
        &GateCatalog::standard(),
        &config.metrics_settings(),
    );
    print_json(&metrics)
}

fn handle_parse_junit(config: &Config, report: &Path, id: Option<&str>) -> Result<()> {
    let xml = std::fs::read_to_string(report)
        .with_context(|| format!("reading report {}", report.display()))?;
    match id {
        Some(id) => print_json(&extract_test_result(&xml, id, config.max_junit_xml_bytes())?),
        None => print_json(&parse_junit_xml_bounded(&xml, config.max_junit_xml_bytes())?),
    }
}
