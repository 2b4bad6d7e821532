//! Verification service configuration

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use verifier_lib::analysis::RiskThresholds;
use verifier_lib::RiskLevel;

/// Config file read from the working directory when present
pub const DEFAULT_CONFIG_FILE: &str = "verifier.toml";

/// Verification service configuration
#[derive(Debug, Clone, Deserialize)]
pub struct VerifierConfig {
    /// Service name attached to structured logs
    #[serde(default = "default_service_name")]
    pub service_name: String,

    /// API server port for health, metrics and the job API
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Manager endpoint for state validity checks and notifications
    #[serde(default = "default_manager_url")]
    pub manager_url: String,

    #[serde(default = "default_learning_engine_url")]
    pub learning_engine_url: String,

    /// Externally reachable base URL of this service, embedded in tasks
    #[serde(default = "default_service_base_url")]
    pub service_base_url: String,

    /// Seconds between scheduling passes
    #[serde(default = "default_tick_interval")]
    pub tick_interval_secs: u64,

    /// Collaborator request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Finished job snapshots kept for the jobs API
    #[serde(default = "default_finished_job_retention")]
    pub finished_job_retention: usize,

    #[serde(default)]
    pub analysis: AnalysisConfig,
}

/// Analysis defaults and risk thresholds
#[derive(Debug, Clone, Deserialize)]
pub struct AnalysisConfig {
    /// Tolerance applied to registrations that omit one
    #[serde(default = "default_tolerance")]
    pub tolerance: f64,

    /// Smoothing window applied to registrations that omit one
    #[serde(default = "default_smooth_window")]
    pub smooth_window: u32,

    #[serde(default = "default_medium_z")]
    pub medium_z: f64,

    #[serde(default = "default_high_z")]
    pub high_z: f64,

    #[serde(default = "default_critical_z")]
    pub critical_z: f64,

    /// Completed jobs at or above this risk end `failed`
    #[serde(default)]
    pub failure_risk_threshold: Option<RiskLevel>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            tolerance: default_tolerance(),
            smooth_window: default_smooth_window(),
            medium_z: default_medium_z(),
            high_z: default_high_z(),
            critical_z: default_critical_z(),
            failure_risk_threshold: None,
        }
    }
}

impl AnalysisConfig {
    pub fn thresholds(&self) -> RiskThresholds {
        RiskThresholds {
            medium_z: self.medium_z,
            high_z: self.high_z,
            critical_z: self.critical_z,
        }
    }
}

fn default_service_name() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "verifier".to_string())
}

fn default_api_port() -> u16 {
    8080
}

fn default_manager_url() -> String {
    "http://manager:9090".to_string()
}

fn default_learning_engine_url() -> String {
    "http://learning-engine:9091".to_string()
}

fn default_service_base_url() -> String {
    "http://verifier:8080".to_string()
}

fn default_tick_interval() -> u64 {
    60
}

fn default_request_timeout() -> u64 {
    30
}

fn default_finished_job_retention() -> usize {
    verifier_lib::scheduler::DEFAULT_FINISHED_RETENTION
}

fn default_tolerance() -> f64 {
    verifier_lib::models::DEFAULT_TOLERANCE
}

fn default_smooth_window() -> u32 {
    verifier_lib::models::DEFAULT_SMOOTH_WINDOW
}

fn default_medium_z() -> f64 {
    RiskThresholds::default().medium_z
}

fn default_high_z() -> f64 {
    RiskThresholds::default().high_z
}

fn default_critical_z() -> f64 {
    RiskThresholds::default().critical_z
}

impl VerifierConfig {
    /// Load configuration from `verifier.toml` (optional) and the environment
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new(DEFAULT_CONFIG_FILE))
    }

    /// Environment variables use the `VERIFIER_` prefix; nested keys are
    /// separated by `__`, e.g. `VERIFIER_ANALYSIS__HIGH_Z`.
    pub fn load_from(path: &Path) -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::from(path).required(false))
            .add_source(
                config::Environment::with_prefix("VERIFIER")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()
            .context("Failed to read configuration")?;

        let config: VerifierConfig = config
            .try_deserialize()
            .context("Invalid verifier configuration")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        let a = &self.analysis;
        if !(a.medium_z > 0.0 && a.medium_z <= a.high_z && a.high_z <= a.critical_z) {
            anyhow::bail!(
                "Risk thresholds must satisfy 0 < medium_z <= high_z <= critical_z (got {}, {}, {})",
                a.medium_z,
                a.high_z,
                a.critical_z
            );
        }
        if !(0.0..=1.0).contains(&a.tolerance) {
            anyhow::bail!("Analysis tolerance must be within [0, 1] (got {})", a.tolerance);
        }
        if self.tick_interval_secs == 0 {
            anyhow::bail!("tick_interval_secs must be positive");
        }
        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = VerifierConfig::load_from(&dir.path().join("absent.toml")).unwrap();

        assert_eq!(config.api_port, 8080);
        assert_eq!(config.tick_interval(), Duration::from_secs(60));
        assert_eq!(config.analysis.tolerance, 0.1);
        assert!(config.analysis.failure_risk_threshold.is_none());
        assert_eq!(config.finished_job_retention, 1000);
    }

    #[test]
    fn test_file_values_override_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
api_port = 9000
manager_url = "http://manager.internal:9090"

[analysis]
high_z = 4.0
failure_risk_threshold = "high"
"#
        )
        .unwrap();

        let config = VerifierConfig::load_from(file.path()).unwrap();
        assert_eq!(config.api_port, 9000);
        assert_eq!(config.manager_url, "http://manager.internal:9090");
        assert_eq!(config.analysis.thresholds().high_z, 4.0);
        assert_eq!(config.analysis.medium_z, 2.0);
        assert_eq!(config.analysis.failure_risk_threshold, Some(RiskLevel::High));
    }

    #[test]
    fn test_unordered_thresholds_rejected() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[analysis]\nmedium_z = 6.0").unwrap();

        let err = VerifierConfig::load_from(file.path()).unwrap_err();
        assert!(err.to_string().contains("Risk thresholds"));
    }
}
