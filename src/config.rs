//! Configuration loading and management.

use crate::coverage::{CoverageOptions, DEFAULT_ZERO_MINIMUM_COVERAGE_RATIO};
use crate::error::{Error, Result};
use crate::release_metrics::{
    DEFAULT_RISK_MIN_BUSINESS_IMPACT, DEFAULT_RISK_TOP_N, HealthWeights, MetricsSettings,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Largest JUnit XML attachment that will be parsed.
pub const DEFAULT_MAX_JUNIT_XML_BYTES: usize = 5 * 1024 * 1024;

/// Main configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    #[serde(alias = "maxJunitXmlBytes")]
    pub max_junit_xml_bytes: Option<usize>,
    #[serde(alias = "healthWeights")]
    pub health_weights: Option<HealthWeightSettings>,
    #[serde(alias = "riskMinBusinessImpact")]
    pub risk_min_business_impact: Option<u8>,
    #[serde(alias = "riskTopN")]
    pub risk_top_n: Option<usize>,
    #[serde(alias = "zeroMinimumCoverageRatio")]
    pub zero_minimum_coverage_ratio: Option<u32>,
}

/// Partial health weights; unset components keep their defaults.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthWeightSettings {
    #[serde(alias = "passRate")]
    pub pass_rate: Option<f64>,
    #[serde(alias = "sufficientCoverage")]
    pub sufficient_coverage: Option<f64>,
    #[serde(alias = "overallCoverage")]
    pub overall_coverage: Option<f64>,
    #[serde(alias = "automationRate")]
    pub automation_rate: Option<f64>,
}

impl Config {
    /// Load configuration from global and project settings.
    ///
    /// An explicit `config_path` (or `QTRACK_CONFIG_PATH`) replaces both.
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        let env_path = std::env::var_os("QTRACK_CONFIG_PATH").map(PathBuf::from);
        Self::load_with_roots(
            config_path.or(env_path.as_deref()),
            &Self::global_dir(),
            &cwd,
        )
    }

    /// Get the global configuration directory.
    pub fn global_dir() -> PathBuf {
        global_dir_from_env(env_lookup)
    }

    /// Get the project configuration directory.
    pub fn project_dir() -> PathBuf {
        PathBuf::from(".qtrack")
    }

    /// Load settings from a specific path.
    fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        let config: Self = serde_json::from_str(&content).map_err(|e| {
            Error::config(format!(
                "Failed to parse settings file {}: {e}",
                path.display()
            ))
        })?;
        Ok(config)
    }

    pub fn load_with_roots(
        config_path: Option<&Path>,
        global_dir: &Path,
        cwd: &Path,
    ) -> Result<Self> {
        let config = if let Some(path) = config_path {
            Self::load_from_path(path)?
        } else {
            let global = Self::load_from_path(&global_dir.join("settings.json"))?;
            let project =
                Self::load_from_path(&cwd.join(Self::project_dir()).join("settings.json"))?;
            Self::merge(global, project)
        };
        config.health_weights().validate()?;
        tracing::debug!(event = "config.loaded", ?config, "Loaded settings");
        Ok(config)
    }

    /// Merge two configurations, with `other` taking precedence.
    pub fn merge(base: Self, other: Self) -> Self {
        Self {
            max_junit_xml_bytes: other.max_junit_xml_bytes.or(base.max_junit_xml_bytes),
            health_weights: merge_health_weights(base.health_weights, other.health_weights),
            risk_min_business_impact: other
                .risk_min_business_impact
                .or(base.risk_min_business_impact),
            risk_top_n: other.risk_top_n.or(base.risk_top_n),
            zero_minimum_coverage_ratio: other
                .zero_minimum_coverage_ratio
                .or(base.zero_minimum_coverage_ratio),
        }
    }

    pub fn max_junit_xml_bytes(&self) -> usize {
        self.max_junit_xml_bytes
            .unwrap_or(DEFAULT_MAX_JUNIT_XML_BYTES)
    }

    pub fn health_weights(&self) -> HealthWeights {
        let defaults = HealthWeights::default();
        let Some(weights) = self.health_weights else {
            return defaults;
        };
        HealthWeights {
            pass_rate: weights.pass_rate.unwrap_or(defaults.pass_rate),
            sufficient_coverage: weights
                .sufficient_coverage
                .unwrap_or(defaults.sufficient_coverage),
            overall_coverage: weights.overall_coverage.unwrap_or(defaults.overall_coverage),
            automation_rate: weights.automation_rate.unwrap_or(defaults.automation_rate),
        }
    }

    pub fn coverage_options(&self) -> CoverageOptions {
        CoverageOptions {
            zero_minimum_coverage_ratio: self
                .zero_minimum_coverage_ratio
                .unwrap_or(DEFAULT_ZERO_MINIMUM_COVERAGE_RATIO),
        }
    }

    pub fn metrics_settings(&self) -> MetricsSettings {
        MetricsSettings {
            weights: self.health_weights(),
            risk_min_business_impact: self
                .risk_min_business_impact
                .unwrap_or(DEFAULT_RISK_MIN_BUSINESS_IMPACT),
            risk_top_n: self.risk_top_n.unwrap_or(DEFAULT_RISK_TOP_N),
            coverage: self.coverage_options(),
        }
    }
}

fn env_lookup(var: &str) -> Option<String> {
    std::env::var(var).ok()
}

fn global_dir_from_env<F>(get_env: F) -> PathBuf
where
    F: Fn(&str) -> Option<String>,
{
    get_env("QTRACK_HOME").map_or_else(
        || {
            dirs::config_dir()
                .or_else(dirs::home_dir)
                .unwrap_or_else(|| PathBuf::from("."))
                .join("qtrack")
        },
        PathBuf::from,
    )
}

fn merge_health_weights(
    base: Option<HealthWeightSettings>,
    other: Option<HealthWeightSettings>,
) -> Option<HealthWeightSettings> {
    match (base, other) {
        (Some(base), Some(other)) => Some(HealthWeightSettings {
            pass_rate: other.pass_rate.or(base.pass_rate),
            sufficient_coverage: other.sufficient_coverage.or(base.sufficient_coverage),
            overall_coverage: other.overall_coverage.or(base.overall_coverage),
            automation_rate: other.automation_rate.or(base.automation_rate),
        }),
        (None, Some(other)) => Some(other),
        (Some(base), None) => Some(base),
        (None, None) => None,
    }
}
