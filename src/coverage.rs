//! Per-requirement coverage, automation and pass statistics.
//!
//! Everything here is a pure function of a snapshot; stats are rebuilt from
//! scratch on every call.

use crate::model::{AutomationStatus, Mapping, Priority, Requirement, TestCaseRecord, TestStatus};
use serde::Serialize;
use std::collections::HashSet;

/// Coverage ratio reported for a requirement that asks for zero test cases.
pub const DEFAULT_ZERO_MINIMUM_COVERAGE_RATIO: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoverageOptions {
    pub zero_minimum_coverage_ratio: u32,
}

impl Default for CoverageOptions {
    fn default() -> Self {
        Self {
            zero_minimum_coverage_ratio: DEFAULT_ZERO_MINIMUM_COVERAGE_RATIO,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequirementCoverageStat {
    pub req_id: String,
    pub name: String,
    pub total_tests: u32,
    pub automated_tests: u32,
    pub passed_tests: u32,
    pub failed_tests: u32,
    pub min_test_cases: u32,
    pub test_depth_factor: f64,
    pub meets_minimum: bool,
    pub coverage_ratio: u32,
    pub automation_percentage: u32,
    pub pass_percentage: u32,
    pub priority: Priority,
    pub business_impact: u8,
}

/// `part / whole` as a whole-number percentage, 0 when `whole` is 0.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn round_percent(part: f64, whole: f64) -> u32 {
    if whole <= 0.0 {
        return 0;
    }
    (part / whole * 100.0).round().max(0.0) as u32
}

/// [`calculate_coverage_with`] using default options.
#[must_use]
pub fn calculate_coverage(
    requirements: &[Requirement],
    mapping: &Mapping,
    test_cases: &[TestCaseRecord],
    version_filter: Option<&str>,
) -> Vec<RequirementCoverageStat> {
    calculate_coverage_with(
        requirements,
        mapping,
        test_cases,
        version_filter,
        &CoverageOptions::default(),
    )
}

/// Coverage stats per requirement, in requirement order.
///
/// With a version filter, requirements not tagged with that version are
/// omitted and only test cases applicable to the version are counted.
/// Linked ids with no matching test case are ignored.
#[must_use]
pub fn calculate_coverage_with(
    requirements: &[Requirement],
    mapping: &Mapping,
    test_cases: &[TestCaseRecord],
    version_filter: Option<&str>,
    options: &CoverageOptions,
) -> Vec<RequirementCoverageStat> {
    requirements
        .iter()
        .filter(|req| version_filter.is_none_or(|version| req.targets_version(version)))
        .map(|req| {
            let linked: HashSet<&str> = mapping
                .get(&req.id)
                .map(|ids| ids.iter().map(String::as_str).collect())
                .unwrap_or_default();
            let tests: Vec<&TestCaseRecord> = test_cases
                .iter()
                .filter(|tc| linked.contains(tc.id.as_str()))
                .filter(|tc| version_filter.is_none_or(|version| tc.applies_to_version(version)))
                .collect();
            stat_for(req, &tests, options)
        })
        .collect()
}

#[allow(clippy::cast_possible_truncation)]
fn stat_for(
    req: &Requirement,
    tests: &[&TestCaseRecord],
    options: &CoverageOptions,
) -> RequirementCoverageStat {
    let total_tests = tests.len() as u32;
    let automated_tests = tests
        .iter()
        .filter(|tc| tc.automation_status == AutomationStatus::Automated)
        .count() as u32;
    let passed_tests = tests
        .iter()
        .filter(|tc| tc.status == TestStatus::Passed)
        .count() as u32;
    let failed_tests = tests
        .iter()
        .filter(|tc| tc.status == TestStatus::Failed)
        .count() as u32;

    let coverage_ratio = if req.min_test_cases == 0 {
        options.zero_minimum_coverage_ratio
    } else {
        round_percent(f64::from(total_tests), f64::from(req.min_test_cases))
    };

    RequirementCoverageStat {
        req_id: req.id.clone(),
        name: req.name.clone(),
        total_tests,
        automated_tests,
        passed_tests,
        failed_tests,
        min_test_cases: req.min_test_cases,
        test_depth_factor: req.test_depth_factor,
        meets_minimum: total_tests >= req.min_test_cases,
        coverage_ratio,
        automation_percentage: round_percent(f64::from(automated_tests), f64::from(total_tests)),
        pass_percentage: round_percent(f64::from(passed_tests), f64::from(total_tests)),
        priority: req.priority,
        business_impact: req.business_impact,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn requirement(id: &str, min: u32, versions: &[&str]) -> Requirement {
        serde_json::from_value(json!({
            "id": id,
            "name": format!("Requirement {id}"),
            "priority": "High",
            "businessImpact": 4,
            "minTestCases": min,
            "versions": versions,
        }))
        .expect("requirement")
    }

    fn test_case(id: &str, status: &str, automation: &str) -> TestCaseRecord {
        serde_json::from_value(json!({
            "id": id,
            "status": status,
            "automationStatus": automation,
        }))
        .expect("test case")
    }

    fn mapping(entries: &[(&str, &[&str])]) -> Mapping {
        entries
            .iter()
            .map(|(req, tcs)| {
                (
                    (*req).to_string(),
                    tcs.iter().map(|tc| (*tc).to_string()).collect(),
                )
            })
            .collect()
    }

    #[test]
    fn counts_linked_tests_by_status_and_automation() {
        let reqs = vec![requirement("REQ-1", 4, &[])];
        let tcs = vec![
            test_case("TC1", "Passed", "Automated"),
            test_case("TC2", "Failed", "Automated"),
            test_case("TC3", "Passed", "Manual"),
            test_case("TC4", "Passed", "Automated"),
        ];
        let map = mapping(&[("REQ-1", &["TC1", "TC2", "TC3"])]);

        let stats = calculate_coverage(&reqs, &map, &tcs, None);
        assert_eq!(stats.len(), 1);
        let stat = &stats[0];
        assert_eq!(stat.total_tests, 3);
        assert_eq!(stat.automated_tests, 2);
        assert_eq!(stat.passed_tests, 2);
        assert_eq!(stat.failed_tests, 1);
        assert!(!stat.meets_minimum);
        assert_eq!(stat.coverage_ratio, 75);
        assert_eq!(stat.automation_percentage, 67);
        assert_eq!(stat.pass_percentage, 67);
        assert_eq!(stat.business_impact, 4);
    }

    #[test]
    fn unknown_and_duplicate_links_are_not_double_counted() {
        let reqs = vec![requirement("REQ-1", 1, &[])];
        let tcs = vec![test_case("TC1", "Passed", "Automated")];
        let map = mapping(&[("REQ-1", &["TC1", "TC1", "TC-missing"])]);

        let stats = calculate_coverage(&reqs, &map, &tcs, None);
        assert_eq!(stats[0].total_tests, 1);
        assert!(stats[0].meets_minimum);
    }

    #[test]
    fn unmapped_requirement_has_zeroed_percentages() {
        let reqs = vec![requirement("REQ-1", 2, &[])];
        let stats = calculate_coverage(&reqs, &Mapping::new(), &[], None);
        assert_eq!(stats[0].total_tests, 0);
        assert_eq!(stats[0].automation_percentage, 0);
        assert_eq!(stats[0].pass_percentage, 0);
        assert_eq!(stats[0].coverage_ratio, 0);
    }

    #[test]
    fn zero_minimum_uses_configured_ratio() {
        let reqs = vec![requirement("REQ-0", 0, &[])];
        let stats = calculate_coverage(&reqs, &Mapping::new(), &[], None);
        assert_eq!(stats[0].coverage_ratio, DEFAULT_ZERO_MINIMUM_COVERAGE_RATIO);
        assert!(stats[0].meets_minimum);

        let options = CoverageOptions {
            zero_minimum_coverage_ratio: 0,
        };
        let stats = calculate_coverage_with(&reqs, &Mapping::new(), &[], None, &options);
        assert_eq!(stats[0].coverage_ratio, 0);
    }

    #[test]
    fn version_filter_drops_requirements_and_inapplicable_tests() {
        let reqs = vec![
            requirement("REQ-1", 1, &["v1"]),
            requirement("REQ-2", 1, &["v2"]),
            requirement("REQ-3", 1, &["v1", "v2"]),
        ];
        let mut tcs = vec![
            test_case("TC-legacy-v1", "Passed", "Automated"),
            test_case("TC-legacy-v2", "Passed", "Automated"),
            test_case("TC-all", "Failed", "Manual"),
            test_case("TC-list", "Passed", "Automated"),
        ];
        tcs[0].version = "v1".to_string();
        tcs[1].version = "v2".to_string();
        tcs[2].applicable_versions = Some(Vec::new());
        tcs[3].applicable_versions = Some(vec!["v2".to_string()]);

        let all_ids: &[&str] = &["TC-legacy-v1", "TC-legacy-v2", "TC-all", "TC-list"];
        let map = mapping(&[("REQ-1", all_ids), ("REQ-2", all_ids), ("REQ-3", all_ids)]);

        let stats = calculate_coverage(&reqs, &map, &tcs, Some("v1"));
        let ids: Vec<&str> = stats.iter().map(|s| s.req_id.as_str()).collect();
        assert_eq!(ids, vec!["REQ-1", "REQ-3"]);
        assert_eq!(stats[0].total_tests, 2);
        assert_eq!(stats[0].passed_tests, 1);

        let unfiltered = calculate_coverage(&reqs, &map, &tcs, None);
        assert_eq!(unfiltered.len(), 3);
        assert!(unfiltered.iter().all(|s| s.total_tests == 4));
    }

    #[test]
    fn round_percent_is_zero_guarded_and_rounds_half_up() {
        assert_eq!(round_percent(1.0, 0.0), 0);
        assert_eq!(round_percent(1.0, 8.0), 13);
        assert_eq!(round_percent(1.0, 3.0), 33);
        assert_eq!(round_percent(3.0, 2.0), 150);
    }
}
