//! Core data model shared by the webhook, reconciliation and metrics layers.
//!
//! Wire names are camelCase to match the dashboard's JSON documents.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Execution status of a test case.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub enum TestStatus {
    Passed,
    Failed,
    Skipped,
    #[serde(rename = "Not Started")]
    NotStarted,
    #[default]
    #[serde(rename = "Not Run")]
    NotRun,
    #[serde(other)]
    Unknown,
}

impl TestStatus {
    /// `Passed` and `Failed` are the only states that mean the test actually ran.
    #[must_use]
    pub const fn is_executed(self) -> bool {
        matches!(self, Self::Passed | Self::Failed)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Passed => "Passed",
            Self::Failed => "Failed",
            Self::Skipped => "Skipped",
            Self::NotStarted => "Not Started",
            Self::NotRun => "Not Run",
            Self::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for TestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AutomationStatus {
    #[default]
    Automated,
    Manual,
    Planned,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Priority {
    #[serde(alias = "high")]
    High,
    #[default]
    #[serde(alias = "medium")]
    Medium,
    #[serde(alias = "low")]
    Low,
}

/// Canonical test-case record owned by the external store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestCaseRecord {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub status: TestStatus,
    #[serde(default)]
    pub automation_status: AutomationStatus,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_executed: Option<DateTime<Utc>>,
    /// Milliseconds.
    #[serde(default)]
    pub execution_time: u64,
    #[serde(default)]
    pub logs: String,
    #[serde(default)]
    pub requirement_ids: Vec<String>,
    /// Legacy single-version tag. Only consulted when `applicable_versions` is absent.
    #[serde(default)]
    pub version: String,
    /// Versions this test case applies to; an empty list means every version.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub applicable_versions: Option<Vec<String>>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub assignee: String,
}

impl TestCaseRecord {
    /// Whether this test case counts toward `version`.
    #[must_use]
    pub fn applies_to_version(&self, version: &str) -> bool {
        match &self.applicable_versions {
            Some(versions) => versions.is_empty() || versions.iter().any(|v| v == version),
            None => self.version.is_empty() || self.version == version,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Requirement {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub priority: Priority,
    /// 1 (negligible) to 5 (critical).
    #[serde(default)]
    pub business_impact: u8,
    #[serde(default)]
    pub min_test_cases: u32,
    #[serde(default = "default_test_depth_factor")]
    pub test_depth_factor: f64,
    #[serde(default)]
    pub versions: Vec<String>,
}

const fn default_test_depth_factor() -> f64 {
    1.0
}

impl Requirement {
    #[must_use]
    pub fn targets_version(&self, version: &str) -> bool {
        self.versions.iter().any(|v| v == version)
    }
}

/// Requirement id to linked test-case ids.
pub type Mapping = BTreeMap<String, Vec<String>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GateStatus {
    Passed,
    Failed,
    #[default]
    Pending,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QualityGate {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub target: f64,
    #[serde(default)]
    pub actual: f64,
    #[serde(default)]
    pub status: GateStatus,
    /// Lower actual values are better (e.g. defect density).
    #[serde(default)]
    pub is_inverted: bool,
}

/// A release the dashboard gates on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Version {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_date: Option<String>,
    #[serde(default)]
    pub quality_gates: Vec<QualityGate>,
}

// ────────────────────────────────────────────────────────────────────────────
// Webhook payloads
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JunitXmlAttachment {
    #[serde(default)]
    pub available: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

/// One incoming result as delivered by the CI webhook.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestCaseResult {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub status: TestStatus,
    /// Milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logs: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub junit_xml: Option<JunitXmlAttachment>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ParsingSource {
    #[serde(rename = "junit-xml")]
    JunitXml,
    #[serde(rename = "junit-xml-error")]
    JunitXmlError,
    #[default]
    #[serde(rename = "none")]
    None,
}

impl ParsingSource {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::JunitXml => "junit-xml",
            Self::JunitXmlError => "junit-xml-error",
            Self::None => "none",
        }
    }
}

/// Structured failure details lifted from a `<failure>`/`<error>` element.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureInfo {
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
    pub stack_trace: String,
    pub file: String,
    pub classname: String,
    pub method: String,
    pub parsing_source: String,
    pub parsing_confidence: String,
}

/// An incoming result after optional JUnit enrichment, as kept by the webhook store.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrichedResult {
    #[serde(flatten)]
    pub result: TestCaseResult,
    pub enhanced: bool,
    pub parsing_source: ParsingSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub framework: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_output: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureInfo>,
    pub received_at: DateTime<Utc>,
}

impl EnrichedResult {
    /// Wrap a result that received no enrichment.
    #[must_use]
    pub fn plain(result: TestCaseResult, parsing_source: ParsingSource) -> Self {
        Self {
            result,
            enhanced: false,
            parsing_source,
            framework: None,
            file: None,
            raw_output: None,
            failure: None,
            received_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.result.id
    }

    #[must_use]
    pub fn has_logs(&self) -> bool {
        self.result.logs.as_deref().is_some_and(|logs| !logs.is_empty())
    }
}
