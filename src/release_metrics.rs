//! Release-level aggregates: rates, evaluated gates, weighted health score and
//! ranked risk areas.

use crate::coverage::{CoverageOptions, RequirementCoverageStat, calculate_coverage_with, round_percent};
use crate::error::{Error, Result};
use crate::model::{Mapping, Priority, QualityGate, Requirement, TestCaseRecord, Version};
use crate::quality_gate::{GateCatalog, GateContext, evaluate_gates};
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;

pub const DEFAULT_RISK_MIN_BUSINESS_IMPACT: u8 = 4;
pub const DEFAULT_RISK_TOP_N: usize = 5;

const WEIGHT_TOLERANCE: f64 = 1e-6;

/// Weights of the health score components. Must sum to 1.0.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthWeights {
    pub pass_rate: f64,
    pub sufficient_coverage: f64,
    pub overall_coverage: f64,
    pub automation_rate: f64,
}

impl Default for HealthWeights {
    fn default() -> Self {
        Self {
            pass_rate: 0.30,
            sufficient_coverage: 0.25,
            overall_coverage: 0.25,
            automation_rate: 0.20,
        }
    }
}

impl HealthWeights {
    pub fn validate(&self) -> Result<()> {
        let parts = [
            self.pass_rate,
            self.sufficient_coverage,
            self.overall_coverage,
            self.automation_rate,
        ];
        if parts.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(Error::config(
                "health weights must be finite and non-negative",
            ));
        }
        let sum: f64 = parts.iter().sum();
        if (sum - 1.0).abs() > WEIGHT_TOLERANCE {
            return Err(Error::config(format!(
                "health weights must sum to 1.0, got {sum}"
            )));
        }
        Ok(())
    }
}

/// Knobs for [`compute_release_metrics`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricsSettings {
    pub weights: HealthWeights,
    pub risk_min_business_impact: u8,
    pub risk_top_n: usize,
    pub coverage: CoverageOptions,
}

impl Default for MetricsSettings {
    fn default() -> Self {
        Self {
            weights: HealthWeights::default(),
            risk_min_business_impact: DEFAULT_RISK_MIN_BUSINESS_IMPACT,
            risk_top_n: DEFAULT_RISK_TOP_N,
            coverage: CoverageOptions::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PriorityCounts {
    #[serde(rename = "High")]
    pub high: usize,
    #[serde(rename = "Medium")]
    pub medium: usize,
    #[serde(rename = "Low")]
    pub low: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RiskReason {
    #[serde(rename = "Failing Tests")]
    FailingTests,
    #[serde(rename = "Insufficient Coverage")]
    InsufficientCoverage,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskArea {
    pub req_id: String,
    pub name: String,
    pub business_impact: u8,
    pub pass_percentage: u32,
    pub meets_minimum: bool,
    pub reason: RiskReason,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseMetrics {
    pub version_id: String,
    pub total_requirements: usize,
    pub req_by_priority: PriorityCounts,
    pub sufficient_coverage_percentage: u32,
    pub pass_rate: u32,
    pub automation_rate: u32,
    pub manual_test_rate: u32,
    pub overall_test_case_coverage: u32,
    pub health_score: u32,
    pub risk_areas: Vec<RiskArea>,
    pub quality_gates: Vec<QualityGate>,
    pub coverage: Vec<RequirementCoverageStat>,
}

/// Weighted composite of four 0-100 quantities, rounded to a whole number.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn health_score(
    weights: &HealthWeights,
    pass_rate: u32,
    sufficient_coverage_percentage: u32,
    overall_test_case_coverage: u32,
    automation_rate: u32,
) -> u32 {
    let score = weights.pass_rate * f64::from(pass_rate)
        + weights.sufficient_coverage * f64::from(sufficient_coverage_percentage)
        + weights.overall_coverage * f64::from(overall_test_case_coverage)
        + weights.automation_rate * f64::from(automation_rate);
    score.round().max(0.0) as u32
}

/// High-impact requirements that are failing or under-tested, most severe first.
#[must_use]
pub fn rank_risk_areas(
    coverage: &[RequirementCoverageStat],
    min_business_impact: u8,
    top_n: usize,
) -> Vec<RiskArea> {
    let mut risky: Vec<&RequirementCoverageStat> = coverage
        .iter()
        .filter(|stat| stat.business_impact >= min_business_impact)
        .filter(|stat| stat.pass_percentage < 100 || !stat.meets_minimum)
        .collect();
    // Stable, so equal keys keep requirement order.
    risky.sort_by_key(|stat| (Reverse(stat.business_impact), stat.pass_percentage));

    risky
        .into_iter()
        .take(top_n)
        .map(|stat| RiskArea {
            req_id: stat.req_id.clone(),
            name: stat.name.clone(),
            business_impact: stat.business_impact,
            pass_percentage: stat.pass_percentage,
            meets_minimum: stat.meets_minimum,
            reason: if stat.pass_percentage < 100 {
                RiskReason::FailingTests
            } else {
                RiskReason::InsufficientCoverage
            },
        })
        .collect()
}

/// Metrics for one release, computed from the requirements tagged with it.
///
/// The release's gates are evaluated against the same version-scoped
/// coverage the rates are derived from.
#[must_use]
pub fn compute_release_metrics(
    version: &Version,
    requirements: &[Requirement],
    mapping: &Mapping,
    test_cases: &[TestCaseRecord],
    catalog: &GateCatalog,
    settings: &MetricsSettings,
) -> ReleaseMetrics {
    let scoped: Vec<Requirement> = requirements
        .iter()
        .filter(|req| req.targets_version(&version.id))
        .cloned()
        .collect();
    let coverage = calculate_coverage_with(
        &scoped,
        mapping,
        test_cases,
        Some(&version.id),
        &settings.coverage,
    );
    let quality_gates = evaluate_gates(
        &version.quality_gates,
        catalog,
        &GateContext {
            requirements: &scoped,
            test_cases,
            mapping,
            coverage: &coverage,
        },
    );
    metrics_from_coverage(&version.id, &scoped, coverage, quality_gates, settings)
}

/// Aggregate already-computed coverage and gates for `requirements`.
#[must_use]
pub fn metrics_from_coverage(
    version_id: &str,
    requirements: &[Requirement],
    coverage: Vec<RequirementCoverageStat>,
    quality_gates: Vec<QualityGate>,
    settings: &MetricsSettings,
) -> ReleaseMetrics {
    let req_by_priority = requirements
        .iter()
        .fold(PriorityCounts::default(), |mut counts, req| {
            match req.priority {
                Priority::High => counts.high += 1,
                Priority::Medium => counts.medium += 1,
                Priority::Low => counts.low += 1,
            }
            counts
        });

    let meeting = coverage.iter().filter(|stat| stat.meets_minimum).count();
    let total_tests: u32 = coverage.iter().map(|stat| stat.total_tests).sum();
    let passed_tests: u32 = coverage.iter().map(|stat| stat.passed_tests).sum();
    let automated_tests: u32 = coverage.iter().map(|stat| stat.automated_tests).sum();
    let min_required: u32 = coverage.iter().map(|stat| stat.min_test_cases).sum();

    let sufficient_coverage_percentage = round_percent(meeting as f64, coverage.len() as f64);
    let pass_rate = round_percent(f64::from(passed_tests), f64::from(total_tests));
    let automation_rate = round_percent(f64::from(automated_tests), f64::from(total_tests));
    let manual_test_rate = round_percent(
        f64::from(total_tests - automated_tests),
        f64::from(total_tests),
    );
    let overall_test_case_coverage =
        round_percent(f64::from(total_tests), f64::from(min_required));

    let health_score = health_score(
        &settings.weights,
        pass_rate,
        sufficient_coverage_percentage,
        overall_test_case_coverage,
        automation_rate,
    );
    let risk_areas = rank_risk_areas(
        &coverage,
        settings.risk_min_business_impact,
        settings.risk_top_n,
    );

    ReleaseMetrics {
        version_id: version_id.to_string(),
        total_requirements: requirements.len(),
        req_by_priority,
        sufficient_coverage_percentage,
        pass_rate,
        automation_rate,
        manual_test_rate,
        overall_test_case_coverage,
        health_score,
        risk_areas,
        quality_gates,
        coverage,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coverage::calculate_coverage;
    use crate::model::GateStatus;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn stat(req_id: &str, impact: u8, pass: u32, meets: bool) -> RequirementCoverageStat {
        RequirementCoverageStat {
            req_id: req_id.to_string(),
            name: format!("Requirement {req_id}"),
            total_tests: 2,
            automated_tests: 1,
            passed_tests: 1,
            failed_tests: 1,
            min_test_cases: 2,
            test_depth_factor: 1.0,
            meets_minimum: meets,
            coverage_ratio: 100,
            automation_percentage: 50,
            pass_percentage: pass,
            priority: Priority::High,
            business_impact: impact,
        }
    }

    #[test]
    fn perfect_components_score_one_hundred() {
        assert_eq!(
            health_score(&HealthWeights::default(), 100, 100, 100, 100),
            100
        );
        assert_eq!(health_score(&HealthWeights::default(), 0, 0, 0, 0), 0);
        // 0.3*50 + 0.25*100 + 0.25*80 + 0.2*25 = 65
        assert_eq!(
            health_score(&HealthWeights::default(), 50, 100, 80, 25),
            65
        );
    }

    #[test]
    fn default_weights_are_valid() {
        HealthWeights::default().validate().expect("valid");
        let skewed = HealthWeights {
            pass_rate: 0.5,
            ..HealthWeights::default()
        };
        assert!(matches!(skewed.validate(), Err(Error::Config(_))));
        let negative = HealthWeights {
            pass_rate: -0.1,
            sufficient_coverage: 0.65,
            ..HealthWeights::default()
        };
        assert!(negative.validate().is_err());
    }

    #[test]
    fn risk_areas_are_filtered_sorted_and_capped() {
        let coverage = vec![
            stat("LOW-IMPACT", 3, 0, false),
            stat("HEALTHY", 5, 100, true),
            stat("A", 4, 50, true),
            stat("B", 5, 80, true),
            stat("C", 5, 20, true),
            stat("D", 4, 100, false),
            stat("E", 4, 10, true),
            stat("F", 4, 90, true),
        ];
        let risks = rank_risk_areas(&coverage, 4, 5);
        let ids: Vec<&str> = risks.iter().map(|r| r.req_id.as_str()).collect();
        assert_eq!(ids, vec!["C", "B", "E", "A", "F"]);
        assert_eq!(risks[0].reason, RiskReason::FailingTests);

        let all = rank_risk_areas(&coverage, 4, 10);
        let d = all.iter().find(|r| r.req_id == "D").expect("D ranked");
        assert_eq!(d.reason, RiskReason::InsufficientCoverage);
    }

    #[test]
    fn risk_reason_wire_names() {
        assert_eq!(
            serde_json::to_value(RiskReason::FailingTests).expect("json"),
            json!("Failing Tests")
        );
        assert_eq!(
            serde_json::to_value(RiskReason::InsufficientCoverage).expect("json"),
            json!("Insufficient Coverage")
        );
    }

    #[test]
    fn release_metrics_aggregate_scoped_coverage() {
        let requirements: Vec<Requirement> = serde_json::from_value(json!([
            { "id": "REQ-1", "priority": "High", "businessImpact": 5, "minTestCases": 2, "versions": ["v1"] },
            { "id": "REQ-2", "priority": "Medium", "businessImpact": 4, "minTestCases": 2, "versions": ["v1"] },
            { "id": "REQ-3", "priority": "Low", "businessImpact": 2, "minTestCases": 1, "versions": ["v2"] }
        ]))
        .expect("requirements");
        let test_cases: Vec<TestCaseRecord> = serde_json::from_value(json!([
            { "id": "TC1", "status": "Passed", "automationStatus": "Automated" },
            { "id": "TC2", "status": "Passed", "automationStatus": "Manual" },
            { "id": "TC3", "status": "Failed", "automationStatus": "Automated" }
        ]))
        .expect("test cases");
        let mapping: Mapping = serde_json::from_value(json!({
            "REQ-1": ["TC1", "TC2"],
            "REQ-2": ["TC3"],
            "REQ-3": ["TC1"]
        }))
        .expect("mapping");

        let v1: Version = serde_json::from_value(json!({
            "id": "v1",
            "qualityGates": [
                { "id": "test-pass-rate", "target": 80 },
                { "id": "defect-density", "target": 1 }
            ]
        }))
        .expect("version");

        let metrics = compute_release_metrics(
            &v1,
            &requirements,
            &mapping,
            &test_cases,
            &GateCatalog::standard(),
            &MetricsSettings::default(),
        );

        assert_eq!(metrics.total_requirements, 2);
        assert_eq!(
            metrics.req_by_priority,
            PriorityCounts {
                high: 1,
                medium: 1,
                low: 0
            }
        );
        assert_eq!(metrics.sufficient_coverage_percentage, 50);
        assert_eq!(metrics.pass_rate, 67);
        assert_eq!(metrics.automation_rate, 67);
        assert_eq!(metrics.manual_test_rate, 33);
        assert_eq!(metrics.overall_test_case_coverage, 75);
        // 0.3*67 + 0.25*50 + 0.25*75 + 0.2*67 = 64.75
        assert_eq!(metrics.health_score, 65);
        let ids: Vec<&str> = metrics.risk_areas.iter().map(|r| r.req_id.as_str()).collect();
        assert_eq!(ids, vec!["REQ-2"]);
        assert_eq!(metrics.coverage.len(), 2);

        // Gates see only v1's requirements: REQ-3 and its passing TC1 link are out.
        let gates = &metrics.quality_gates;
        assert_eq!(gates.len(), 2);
        assert!((gates[0].actual - f64::from(metrics.pass_rate)).abs() < f64::EPSILON);
        assert_eq!(gates[0].status, GateStatus::Failed);
        assert!((gates[1].actual - 0.5).abs() < 1e-9);
        assert_eq!(gates[1].status, GateStatus::Passed);
        assert_eq!(
            serde_json::to_value(&metrics).expect("json")["qualityGates"][1]["isInverted"],
            json!(true)
        );
    }

    #[test]
    fn empty_release_is_zero_guarded() {
        let metrics = metrics_from_coverage(
            "v9",
            &[],
            Vec::new(),
            Vec::new(),
            &MetricsSettings::default(),
        );
        assert_eq!(metrics.total_requirements, 0);
        assert_eq!(metrics.sufficient_coverage_percentage, 0);
        assert_eq!(metrics.pass_rate, 0);
        assert_eq!(metrics.manual_test_rate, 0);
        assert_eq!(metrics.overall_test_case_coverage, 0);
        assert_eq!(metrics.health_score, 0);
        assert!(metrics.risk_areas.is_empty());
    }

    #[test]
    fn precomputed_coverage_matches_direct_computation() {
        let requirements: Vec<Requirement> = serde_json::from_value(json!([
            { "id": "REQ-1", "minTestCases": 1, "versions": ["v1"] }
        ]))
        .expect("requirements");
        let v1: Version = serde_json::from_value(json!({ "id": "v1" })).expect("version");
        let coverage = calculate_coverage(&requirements, &Mapping::new(), &[], Some("v1"));
        let settings = MetricsSettings::default();
        assert_eq!(
            metrics_from_coverage("v1", &requirements, coverage, Vec::new(), &settings),
            compute_release_metrics(
                &v1,
                &requirements,
                &Mapping::new(),
                &[],
                &GateCatalog::standard(),
                &settings
            )
        );
    }
}
