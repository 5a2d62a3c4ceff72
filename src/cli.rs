//! CLI argument parsing using Clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// qtrack - reconcile test results and compute release quality metrics
#[derive(Parser, Debug)]
#[command(name = "qtrack")]
#[command(version, about, long_about = None)]
#[command(after_help = "Examples:
  qtrack ingest webhook.json --snapshot data.json --write
  qtrack coverage --snapshot data.json --release v2.1
  qtrack gates --snapshot data.json
  qtrack metrics --snapshot data.json --release v2.1
  qtrack parse-junit report.xml --id test_login
")]
pub struct Cli {
    /// Settings file (overrides global and project settings)
    #[arg(long, global = true, env = "QTRACK_CONFIG_PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Ingest a webhook payload and reconcile it into a snapshot
    Ingest {
        /// Webhook JSON payload (single result or legacy bulk)
        payload: PathBuf,
        /// Snapshot file holding requirements, test cases, mapping and releases
        #[arg(long)]
        snapshot: PathBuf,
        /// Write the updated snapshot back
        #[arg(long)]
        write: bool,
    },

    /// Print per-requirement coverage
    Coverage {
        #[arg(long)]
        snapshot: PathBuf,
        /// Only requirements and test cases for this release
        #[arg(long)]
        release: Option<String>,
    },

    /// Evaluate every release's quality gates
    Gates {
        #[arg(long)]
        snapshot: PathBuf,
        /// Write the evaluated gates back
        #[arg(long)]
        write: bool,
    },

    /// Print aggregate metrics for one release
    Metrics {
        #[arg(long)]
        snapshot: PathBuf,
        #[arg(long)]
        release: String,
    },

    /// Parse a JUnit XML report
    ParseJunit {
        /// Report file
        report: PathBuf,
        /// Resolve and transform a single test by id
        #[arg(long)]
        id: Option<String>,
    },
}
