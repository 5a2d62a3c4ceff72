//! Quality gate catalog and evaluation.
//!
//! A gate on a release is `{id, target}`; the catalog supplies how to compute
//! its actual value and whether lower is better. Each release is evaluated
//! against its own version-filtered requirements and coverage.

use crate::coverage::{CoverageOptions, RequirementCoverageStat, calculate_coverage_with, round_percent};
use crate::error::Result;
use crate::model::{GateStatus, Mapping, Priority, QualityGate, Requirement, TestCaseRecord, Version};
use crate::reconcile::PostCommitHook;
use crate::store::QualityStore;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

pub const REQUIREMENT_COVERAGE: &str = "requirement-coverage";
pub const CRITICAL_REQUIREMENT_COVERAGE: &str = "critical-requirement-coverage";
pub const TEST_PASS_RATE: &str = "test-pass-rate";
pub const AUTOMATION_COVERAGE: &str = "automation-coverage";
pub const DEFECT_DENSITY: &str = "defect-density";

/// Inputs a gate definition may draw on.
#[derive(Debug, Clone, Copy)]
pub struct GateContext<'a> {
    pub requirements: &'a [Requirement],
    pub test_cases: &'a [TestCaseRecord],
    pub mapping: &'a Mapping,
    pub coverage: &'a [RequirementCoverageStat],
}

type ActualFn = dyn Fn(&GateContext<'_>) -> f64 + Send + Sync;

pub struct GateDefinition {
    pub id: String,
    pub name: String,
    pub is_inverted: bool,
    calculate: Box<ActualFn>,
}

impl fmt::Debug for GateDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GateDefinition")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("is_inverted", &self.is_inverted)
            .finish_non_exhaustive()
    }
}

impl GateDefinition {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        is_inverted: bool,
        calculate: impl Fn(&GateContext<'_>) -> f64 + Send + Sync + 'static,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            is_inverted,
            calculate: Box::new(calculate),
        }
    }

    #[must_use]
    pub fn calculate_actual(&self, ctx: &GateContext<'_>) -> f64 {
        (self.calculate)(ctx)
    }
}

/// Gate definitions by id.
#[derive(Debug, Default)]
pub struct GateCatalog {
    definitions: BTreeMap<String, GateDefinition>,
}

impl GateCatalog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The gates the dashboard ships with.
    #[must_use]
    pub fn standard() -> Self {
        let mut catalog = Self::new();
        catalog.register(GateDefinition::new(
            REQUIREMENT_COVERAGE,
            "Requirements meeting minimum test count (%)",
            false,
            |ctx| sufficient_share(ctx.coverage.iter()),
        ));
        catalog.register(GateDefinition::new(
            CRITICAL_REQUIREMENT_COVERAGE,
            "High-priority requirements meeting minimum test count (%)",
            false,
            |ctx| {
                let critical: Vec<_> = ctx
                    .coverage
                    .iter()
                    .filter(|stat| stat.priority == Priority::High)
                    .collect();
                if critical.is_empty() {
                    100.0
                } else {
                    sufficient_share(critical.into_iter())
                }
            },
        ));
        catalog.register(GateDefinition::new(
            TEST_PASS_RATE,
            "Linked test cases passing (%)",
            false,
            |ctx| {
                let (passed, total) = ctx.coverage.iter().fold((0u32, 0u32), |(p, t), stat| {
                    (p + stat.passed_tests, t + stat.total_tests)
                });
                f64::from(round_percent(f64::from(passed), f64::from(total)))
            },
        ));
        catalog.register(GateDefinition::new(
            AUTOMATION_COVERAGE,
            "Linked test cases automated (%)",
            false,
            |ctx| {
                let (automated, total) = ctx.coverage.iter().fold((0u32, 0u32), |(a, t), stat| {
                    (a + stat.automated_tests, t + stat.total_tests)
                });
                f64::from(round_percent(f64::from(automated), f64::from(total)))
            },
        ));
        catalog.register(GateDefinition::new(
            DEFECT_DENSITY,
            "Failing linked test cases per requirement",
            true,
            |ctx| {
                if ctx.coverage.is_empty() {
                    return 0.0;
                }
                let failed: u32 = ctx.coverage.iter().map(|stat| stat.failed_tests).sum();
                let per_requirement = f64::from(failed) / ctx.coverage.len() as f64;
                (per_requirement * 100.0).round() / 100.0
            },
        ));
        catalog
    }

    pub fn register(&mut self, definition: GateDefinition) {
        self.definitions.insert(definition.id.clone(), definition);
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<&GateDefinition> {
        self.definitions.get(id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

fn sufficient_share<'a>(stats: impl Iterator<Item = &'a RequirementCoverageStat>) -> f64 {
    let (meeting, total) = stats.fold((0u32, 0u32), |(m, t), stat| {
        (m + u32::from(stat.meets_minimum), t + 1)
    });
    f64::from(round_percent(f64::from(meeting), f64::from(total)))
}

/// Inverted gates pass at or below target, all others at or above.
#[must_use]
pub fn gate_passes(actual: f64, target: f64, is_inverted: bool) -> bool {
    if is_inverted {
        actual <= target
    } else {
        actual >= target
    }
}

/// Evaluate `gates` against `ctx`. Gates with no catalog entry are returned
/// unchanged.
#[must_use]
pub fn evaluate_gates(
    gates: &[QualityGate],
    catalog: &GateCatalog,
    ctx: &GateContext<'_>,
) -> Vec<QualityGate> {
    gates
        .iter()
        .map(|gate| {
            let Some(definition) = catalog.get(&gate.id) else {
                tracing::debug!(
                    event = "gates.unknown",
                    gate_id = %gate.id,
                    "No definition for gate; leaving unchanged"
                );
                return gate.clone();
            };
            let actual = definition.calculate_actual(ctx);
            let status = if gate_passes(actual, gate.target, definition.is_inverted) {
                GateStatus::Passed
            } else {
                GateStatus::Failed
            };
            QualityGate {
                id: gate.id.clone(),
                name: if gate.name.is_empty() {
                    definition.name.clone()
                } else {
                    gate.name.clone()
                },
                target: gate.target,
                actual,
                status,
                is_inverted: definition.is_inverted,
            }
        })
        .collect()
}

/// Evaluate one release's gates using only that release's requirements and
/// applicable test cases.
#[must_use]
pub fn evaluate_release(
    version: &Version,
    requirements: &[Requirement],
    test_cases: &[TestCaseRecord],
    mapping: &Mapping,
    catalog: &GateCatalog,
    options: &CoverageOptions,
) -> Vec<QualityGate> {
    let scoped: Vec<Requirement> = requirements
        .iter()
        .filter(|req| req.targets_version(&version.id))
        .cloned()
        .collect();
    let coverage = calculate_coverage_with(&scoped, mapping, test_cases, Some(&version.id), options);
    let ctx = GateContext {
        requirements: &scoped,
        test_cases,
        mapping,
        coverage: &coverage,
    };
    evaluate_gates(&version.quality_gates, catalog, &ctx)
}

/// Recompute gates for every release in the store and write them back.
pub fn refresh_release_gates(
    store: &dyn QualityStore,
    catalog: &GateCatalog,
    options: &CoverageOptions,
) -> Result<Vec<Version>> {
    let requirements = store.get_requirements()?;
    let test_cases = store.get_test_cases()?;
    let mapping = store.get_mapping()?;

    let versions: Vec<Version> = store
        .get_versions()?
        .into_iter()
        .map(|version| {
            let quality_gates = evaluate_release(
                &version,
                &requirements,
                &test_cases,
                &mapping,
                catalog,
                options,
            );
            Version {
                quality_gates,
                ..version
            }
        })
        .collect();

    store.set_versions(versions.clone())?;
    tracing::info!(
        event = "gates.refreshed",
        releases = versions.len(),
        "Refreshed release quality gates"
    );
    Ok(versions)
}

/// Post-commit hook that refreshes every release's gates.
///
/// Refreshes are serialized: each one reads, recomputes and writes while
/// holding `refresh`, so a refresh that read an older snapshot can never
/// overwrite the result of one that started later.
#[derive(Debug)]
pub struct GateRefreshHook {
    catalog: Arc<GateCatalog>,
    options: CoverageOptions,
    refresh: Mutex<()>,
}

impl GateRefreshHook {
    #[must_use]
    pub const fn new(catalog: Arc<GateCatalog>, options: CoverageOptions) -> Self {
        Self {
            catalog,
            options,
            refresh: Mutex::new(()),
        }
    }
}

impl PostCommitHook for GateRefreshHook {
    fn name(&self) -> &'static str {
        "quality_gate_refresh"
    }

    fn after_commit(&self, store: &dyn QualityStore, _record: &TestCaseRecord) -> Result<()> {
        let _guard = self.refresh.lock().unwrap_or_else(PoisonError::into_inner);
        refresh_release_gates(store, &self.catalog, &self.options).map(|_| ())
    }
}
