//! Core data models for the verification service

use crate::error::RegistrationError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

/// Default relative tolerance applied when comparing test and control means
pub const DEFAULT_TOLERANCE: f64 = 0.1;

/// Default smoothing window (minutes) forwarded to the learning engine
pub const DEFAULT_SMOOTH_WINDOW: u32 = 3;

/// Name of the implicit metric group used when none is registered
pub const DEFAULT_GROUP_NAME: &str = "default";

/// Policy selecting the baseline dataset test data is evaluated against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonStrategy {
    /// Compare with the last successful execution of the same workflow
    CompareWithPrevious,
    /// Compare with control hosts running concurrently
    CompareWithCurrent,
    /// Predict expected values from history, no control hosts
    Predictive,
}

impl std::fmt::Display for ComparisonStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ComparisonStrategy::CompareWithPrevious => write!(f, "compare_with_previous"),
            ComparisonStrategy::CompareWithCurrent => write!(f, "compare_with_current"),
            ComparisonStrategy::Predictive => write!(f, "predictive"),
        }
    }
}

/// Analysis type tag carried by a metric group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisType {
    #[default]
    Comparative,
    Predictive,
}

/// Risk level of an analysis; lower is better
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    #[default]
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RiskLevel::Low => write!(f, "low"),
            RiskLevel::Medium => write!(f, "medium"),
            RiskLevel::High => write!(f, "high"),
            RiskLevel::Critical => write!(f, "critical"),
        }
    }
}

/// Lifecycle of a verification job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Success,
    Failed,
    Error,
}

impl JobStatus {
    /// Returns true once no further ticks will do any work
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Success | JobStatus::Failed | JobStatus::Error)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Queued => write!(f, "queued"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Success => write!(f, "success"),
            JobStatus::Failed => write!(f, "failed"),
            JobStatus::Error => write!(f, "error"),
        }
    }
}

/// Minutes of collected data the verification covers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisWindow {
    pub start_minute: i64,
    pub duration_minutes: i64,
}

impl AnalysisWindow {
    pub fn new(start_minute: i64, duration_minutes: i64) -> Self {
        Self {
            start_minute,
            duration_minutes,
        }
    }

    /// Last minute inside the window (inclusive)
    ///
    /// Saturates for windows that `is_representable` rejects.
    pub fn end_minute(&self) -> i64 {
        self.start_minute
            .saturating_add(self.duration_minutes)
            .saturating_sub(1)
    }

    /// True when the window and the minute before it fit in an `i64`
    pub fn is_representable(&self) -> bool {
        self.duration_minutes > 0
            && self.start_minute.checked_sub(1).is_some()
            && self.start_minute.checked_add(self.duration_minutes).is_some()
    }

    pub fn contains(&self, minute: i64) -> bool {
        minute >= self.start_minute && minute <= self.end_minute()
    }
}

/// Identifies one running verification instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionContext {
    pub account_id: String,
    pub app_id: String,
    pub workflow_id: String,
    pub workflow_execution_id: String,
    pub state_execution_id: String,
    #[serde(default)]
    pub service_id: String,
    /// Metric provider tag (e.g. "prometheus", "new_relic")
    pub state_type: String,
    pub comparison_strategy: ComparisonStrategy,
    pub test_nodes: BTreeSet<String>,
    #[serde(default)]
    pub control_nodes: BTreeSet<String>,
    pub window: AnalysisWindow,
    /// Last successful execution used as the baseline for compare-with-previous
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub baseline_execution_id: Option<String>,
    #[serde(default = "default_tolerance")]
    pub tolerance: f64,
    #[serde(default = "default_smooth_window")]
    pub smooth_window: u32,
}

fn default_tolerance() -> f64 {
    DEFAULT_TOLERANCE
}

fn default_smooth_window() -> u32 {
    DEFAULT_SMOOTH_WINDOW
}

impl ExecutionContext {
    /// Check the context is schedulable. Rejected contexts never reach a tick.
    pub fn validate(&self) -> Result<(), RegistrationError> {
        let required = [
            ("account_id", &self.account_id),
            ("app_id", &self.app_id),
            ("workflow_execution_id", &self.workflow_execution_id),
            ("state_execution_id", &self.state_execution_id),
            ("state_type", &self.state_type),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(RegistrationError::MissingField(field));
            }
        }

        if !self.window.is_representable() {
            return Err(RegistrationError::InvalidWindow {
                start_minute: self.window.start_minute,
                duration_minutes: self.window.duration_minutes,
            });
        }

        if self.test_nodes.is_empty() {
            return Err(RegistrationError::NoTestNodes);
        }

        if !(0.0..=1.0).contains(&self.tolerance) {
            return Err(RegistrationError::InvalidTolerance(self.tolerance));
        }

        if self.comparison_strategy == ComparisonStrategy::CompareWithCurrent
            && self.control_nodes.difference(&self.test_nodes).next().is_none()
        {
            return Err(RegistrationError::NoControlNodes);
        }

        Ok(())
    }

    /// Returns a copy whose control set excludes every test host when comparing
    /// against concurrent control hosts. Other strategies are returned unchanged.
    pub fn normalized(&self) -> Self {
        let mut context = self.clone();
        if context.comparison_strategy == ComparisonStrategy::CompareWithCurrent {
            context.control_nodes = self
                .control_nodes
                .difference(&self.test_nodes)
                .cloned()
                .collect();
        }
        context
    }

    /// Key used for job tables and scheduler entries
    pub fn job_key(&self) -> &str {
        &self.state_execution_id
    }
}

/// Named partition of monitored nodes with an analysis-type tag
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricGroup {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dependency_path: Option<String>,
    #[serde(default)]
    pub analysis_type: AnalysisType,
}

impl MetricGroup {
    pub fn new(name: impl Into<String>, analysis_type: AnalysisType) -> Self {
        Self {
            name: name.into(),
            dependency_path: None,
            analysis_type,
        }
    }

    /// The group used when a state execution registered none
    pub fn default_group() -> Self {
        Self::new(DEFAULT_GROUP_NAME, AnalysisType::Comparative)
    }
}

/// One raw time-series data point
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricDataRecord {
    pub state_execution_id: String,
    pub workflow_execution_id: String,
    #[serde(default = "default_group_name")]
    pub group_name: String,
    pub host: String,
    pub transaction: String,
    pub metric: String,
    pub value: f64,
    pub minute: i64,
}

fn default_group_name() -> String {
    DEFAULT_GROUP_NAME.to_string()
}

/// Sentinel meaning all data for `minute` has been collected for a group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatRecord {
    pub state_execution_id: String,
    #[serde(default = "default_group_name")]
    pub group_name: String,
    pub minute: i64,
}

/// Where an analysis record was produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisSource {
    Local,
    LearningEngine,
}

/// Analysis of a single (transaction, metric) pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricAnalysis {
    pub transaction: String,
    pub metric: String,
    pub risk: RiskLevel,
    pub test_mean: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub control_mean: Option<f64>,
    #[serde(default)]
    pub score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Output of a local comparison or a learning engine task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRecord {
    pub state_execution_id: String,
    pub workflow_execution_id: String,
    pub group_name: String,
    pub analysis_minute: i64,
    pub source: AnalysisSource,
    pub risk: RiskLevel,
    #[serde(default)]
    pub metrics: Vec<MetricAnalysis>,
    #[serde(default = "now_timestamp")]
    pub created_at: i64,
}

fn now_timestamp() -> i64 {
    chrono::Utc::now().timestamp()
}

impl AnalysisRecord {
    /// Highest per-metric risk, or `Low` when nothing was analyzed
    pub fn aggregated_risk(metrics: &[MetricAnalysis]) -> RiskLevel {
        metrics.iter().map(|m| m.risk).max().unwrap_or_default()
    }
}

/// Previously computed decision that further analysis is futile
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailFastRecord {
    pub state_execution_id: String,
    pub should_fail_fast: bool,
    #[serde(default)]
    pub message: String,
}

/// Terminal result delivered to the owning manager
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateNotification {
    pub account_id: String,
    pub app_id: String,
    pub workflow_execution_id: String,
    pub state_execution_id: String,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub risk: Option<RiskLevel>,
    pub timestamp: i64,
}

/// Task descriptor enqueued with the learning engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearningEngineTask {
    pub task_id: Uuid,
    pub account_id: String,
    pub app_id: String,
    pub workflow_id: String,
    pub workflow_execution_id: String,
    pub state_execution_id: String,
    pub service_id: String,
    pub state_type: String,
    pub group_name: String,
    pub analysis_type: AnalysisType,
    pub comparison_strategy: ComparisonStrategy,
    pub analysis_start_minute: i64,
    pub analysis_minute: i64,
    pub tolerance: f64,
    pub smooth_window: u32,
    pub test_nodes: BTreeSet<String>,
    pub control_nodes: BTreeSet<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub baseline_execution_id: Option<String>,
    pub test_input_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub control_input_url: Option<String>,
    pub metric_template_url: String,
    pub analysis_save_url: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context(strategy: ComparisonStrategy) -> ExecutionContext {
        ExecutionContext {
            account_id: "acct".to_string(),
            app_id: "app".to_string(),
            workflow_id: "wf".to_string(),
            workflow_execution_id: "wf-exec-1".to_string(),
            state_execution_id: "state-1".to_string(),
            service_id: "svc".to_string(),
            state_type: "prometheus".to_string(),
            comparison_strategy: strategy,
            test_nodes: ["host-a", "host-b"].iter().map(|s| s.to_string()).collect(),
            control_nodes: ["host-b", "host-c"].iter().map(|s| s.to_string()).collect(),
            window: AnalysisWindow::new(0, 30),
            baseline_execution_id: None,
            tolerance: DEFAULT_TOLERANCE,
            smooth_window: DEFAULT_SMOOTH_WINDOW,
        }
    }

    #[test]
    fn test_risk_level_ordering() {
        assert!(RiskLevel::Low < RiskLevel::Medium);
        assert!(RiskLevel::Medium < RiskLevel::High);
        assert!(RiskLevel::High < RiskLevel::Critical);
    }

    #[test]
    fn test_window_end_minute() {
        let window = AnalysisWindow::new(0, 30);
        assert_eq!(window.end_minute(), 29);
        assert!(window.contains(29));
        assert!(!window.contains(30));
    }

    #[test]
    fn test_normalized_removes_test_hosts_from_control() {
        let original = context(ComparisonStrategy::CompareWithCurrent);
        let normalized = original.normalized();

        assert_eq!(
            normalized.control_nodes.iter().collect::<Vec<_>>(),
            vec!["host-c"]
        );
        assert!(normalized.control_nodes.is_disjoint(&normalized.test_nodes));
        // Input is untouched
        assert!(original.control_nodes.contains("host-b"));
    }

    #[test]
    fn test_normalized_keeps_control_for_previous() {
        let original = context(ComparisonStrategy::CompareWithPrevious);
        assert_eq!(original.normalized(), original);
    }

    #[test]
    fn test_validate_rejects_overlapping_only_controls() {
        let mut ctx = context(ComparisonStrategy::CompareWithCurrent);
        ctx.control_nodes = ctx.test_nodes.clone();
        assert!(matches!(ctx.validate(), Err(RegistrationError::NoControlNodes)));
    }

    #[test]
    fn test_validate_rejects_empty_window() {
        let mut ctx = context(ComparisonStrategy::CompareWithPrevious);
        ctx.window.duration_minutes = 0;
        assert!(matches!(
            ctx.validate(),
            Err(RegistrationError::InvalidWindow { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_overflowing_windows() {
        for window in [
            AnalysisWindow::new(i64::MAX - 1, 5),
            AnalysisWindow::new(i64::MIN, 10),
        ] {
            let mut ctx = context(ComparisonStrategy::CompareWithPrevious);
            ctx.window = window;
            assert!(matches!(
                ctx.validate(),
                Err(RegistrationError::InvalidWindow { .. })
            ));
            // saturates instead of overflowing
            let _ = window.end_minute();
        }

        let mut ctx = context(ComparisonStrategy::CompareWithPrevious);
        ctx.window = AnalysisWindow::new(i64::MAX - 10, 10);
        assert!(ctx.validate().is_ok());
        assert_eq!(ctx.window.end_minute(), i64::MAX - 1);
    }

    #[test]
    fn test_validate_rejects_missing_ids() {
        let mut ctx = context(ComparisonStrategy::CompareWithPrevious);
        ctx.state_execution_id = " ".to_string();
        assert!(matches!(
            ctx.validate(),
            Err(RegistrationError::MissingField("state_execution_id"))
        ));
    }

    #[test]
    fn test_aggregated_risk_is_max() {
        let metric = |risk| MetricAnalysis {
            transaction: "t".to_string(),
            metric: "m".to_string(),
            risk,
            test_mean: 1.0,
            control_mean: None,
            score: 0.0,
            message: None,
        };
        let metrics = vec![metric(RiskLevel::Medium), metric(RiskLevel::High), metric(RiskLevel::Low)];
        assert_eq!(AnalysisRecord::aggregated_risk(&metrics), RiskLevel::High);
        assert_eq!(AnalysisRecord::aggregated_risk(&[]), RiskLevel::Low);
    }

    #[test]
    fn test_context_deserializes_with_defaults() {
        let json = r#"{
            "account_id": "a",
            "app_id": "b",
            "workflow_id": "c",
            "workflow_execution_id": "d",
            "state_execution_id": "e",
            "state_type": "prometheus",
            "comparison_strategy": "compare_with_current",
            "test_nodes": ["h1"],
            "control_nodes": ["h2"],
            "window": {"start_minute": 10, "duration_minutes": 15}
        }"#;
        let ctx: ExecutionContext = serde_json::from_str(json).unwrap();
        assert_eq!(ctx.tolerance, DEFAULT_TOLERANCE);
        assert_eq!(ctx.smooth_window, DEFAULT_SMOOTH_WINDOW);
        assert!(ctx.baseline_execution_id.is_none());
        assert!(ctx.validate().is_ok());
    }
}
