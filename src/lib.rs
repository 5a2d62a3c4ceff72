//! qtrack - test-result reconciliation and release quality metrics
//!
//! This library ingests per-test-case webhook deliveries (optionally carrying
//! a JUnit XML report), merges them into canonical test-case records, and
//! derives the coverage, quality-gate and health-score figures used to decide
//! whether a release is ready:
//! - [`webhook`]: envelope validation, enrichment, storage, bulk fan-out
//! - [`reconcile`]: per-id serialized merge into the [`store`]
//! - [`coverage`], [`quality_gate`], [`release_metrics`]: pure derivations
//!
//! The `qtrack` binary exposes the same pipeline over JSON snapshot files.

#![forbid(unsafe_code)]
#![cfg_attr(
    test,
    allow(
        clippy::float_cmp,
        clippy::too_many_lines,
        clippy::cast_possible_truncation
    )
)]
#![allow(
    clippy::must_use_candidate,
    clippy::doc_markdown,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::cast_precision_loss
)]

pub mod cli;
pub mod config;
pub mod coverage;
pub mod error;
pub mod events;
pub mod junit_xml;
pub mod model;
pub mod quality_gate;
pub mod reconcile;
pub mod release_metrics;
pub mod store;
pub mod webhook;
pub mod webhook_store;

pub use error::{Error, Result};
