//! Local statistical comparison of test hosts against a baseline
//!
//! Used when a delegated learning engine task is not warranted, e.g. when
//! comparing with a previous execution that has no usable baseline data.

use super::stats::SampleStats;
use crate::models::{
    AnalysisRecord, AnalysisSource, ExecutionContext, MetricAnalysis, MetricDataRecord, RiskLevel,
};
use std::collections::BTreeMap;

/// z-score boundaries mapping a deviation to a risk level
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RiskThresholds {
    pub medium_z: f64,
    pub high_z: f64,
    pub critical_z: f64,
}

impl Default for RiskThresholds {
    fn default() -> Self {
        Self {
            medium_z: 2.0,
            high_z: 3.0,
            critical_z: 5.0,
        }
    }
}

impl RiskThresholds {
    pub fn risk_for(&self, z_score: f64) -> RiskLevel {
        let z = z_score.abs();
        if z >= self.critical_z {
            RiskLevel::Critical
        } else if z >= self.high_z {
            RiskLevel::High
        } else if z >= self.medium_z {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }
}

/// Relative deviation bands used when the baseline has no variance
fn risk_for_relative(deviation: f64) -> RiskLevel {
    if deviation > 1.0 {
        RiskLevel::High
    } else if deviation > 0.5 {
        RiskLevel::Medium
    } else {
        RiskLevel::Low
    }
}

type SeriesKey = (String, String);

fn group_by_series(records: &[MetricDataRecord]) -> BTreeMap<SeriesKey, Vec<f64>> {
    let mut series: BTreeMap<SeriesKey, Vec<f64>> = BTreeMap::new();
    for record in records {
        series
            .entry((record.transaction.clone(), record.metric.clone()))
            .or_default()
            .push(record.value);
    }
    series
}

/// Compares test data against control or baseline data per (transaction, metric)
#[derive(Debug, Clone, Default)]
pub struct LocalComparator {
    thresholds: RiskThresholds,
}

impl LocalComparator {
    pub fn new(thresholds: RiskThresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &RiskThresholds {
        &self.thresholds
    }

    /// Analyze one group up to `analysis_minute`
    ///
    /// Series present only in the control data are ignored. Series without
    /// control data are reported as `Low` with a note.
    pub fn compare(
        &self,
        context: &ExecutionContext,
        group_name: &str,
        analysis_minute: i64,
        test: &[MetricDataRecord],
        control: &[MetricDataRecord],
    ) -> AnalysisRecord {
        let test_series = group_by_series(test);
        let control_series = group_by_series(control);

        let metrics: Vec<MetricAnalysis> = test_series
            .into_iter()
            .map(|(key, values)| {
                let test_stats = SampleStats::from_values(values);
                let control_stats = control_series
                    .get(&key)
                    .map(|v| SampleStats::from_values(v.iter().copied()))
                    .unwrap_or_default();
                self.analyze_series(key, test_stats, control_stats, context.tolerance)
            })
            .collect();

        AnalysisRecord {
            state_execution_id: context.state_execution_id.clone(),
            workflow_execution_id: context.workflow_execution_id.clone(),
            group_name: group_name.to_string(),
            analysis_minute,
            source: AnalysisSource::Local,
            risk: AnalysisRecord::aggregated_risk(&metrics),
            metrics,
            created_at: chrono::Utc::now().timestamp(),
        }
    }

    fn analyze_series(
        &self,
        (transaction, metric): SeriesKey,
        test: SampleStats,
        control: SampleStats,
        tolerance: f64,
    ) -> MetricAnalysis {
        if control.is_empty() {
            return MetricAnalysis {
                transaction,
                metric,
                risk: RiskLevel::Low,
                test_mean: test.mean,
                control_mean: None,
                score: 0.0,
                message: Some("no baseline data".to_string()),
            };
        }

        let relative = control.relative_deviation(test.mean);
        let (risk, score) = if relative <= tolerance {
            (RiskLevel::Low, relative)
        } else if control.std_dev > f64::EPSILON {
            let z_score = (test.mean - control.mean) / control.std_dev;
            (self.thresholds.risk_for(z_score), z_score)
        } else {
            (risk_for_relative(relative), relative)
        };

        MetricAnalysis {
            transaction,
            metric,
            risk,
            test_mean: test.mean,
            control_mean: Some(control.mean),
            score,
            message: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AnalysisWindow, ComparisonStrategy};

    fn context() -> ExecutionContext {
        ExecutionContext {
            account_id: "acct".to_string(),
            app_id: "app".to_string(),
            workflow_id: "wf".to_string(),
            workflow_execution_id: "wf-exec".to_string(),
            state_execution_id: "state".to_string(),
            service_id: "svc".to_string(),
            state_type: "prometheus".to_string(),
            comparison_strategy: ComparisonStrategy::CompareWithPrevious,
            test_nodes: ["test-1".to_string()].into_iter().collect(),
            control_nodes: Default::default(),
            window: AnalysisWindow::new(0, 30),
            baseline_execution_id: None,
            tolerance: 0.1,
            smooth_window: 3,
        }
    }

    fn record(host: &str, metric: &str, minute: i64, value: f64) -> MetricDataRecord {
        MetricDataRecord {
            state_execution_id: "state".to_string(),
            workflow_execution_id: "wf-exec".to_string(),
            group_name: "default".to_string(),
            host: host.to_string(),
            transaction: "/checkout".to_string(),
            metric: metric.to_string(),
            value,
            minute,
        }
    }

    #[test]
    fn test_thresholds_map_to_risk() {
        let thresholds = RiskThresholds::default();
        assert_eq!(thresholds.risk_for(0.5), RiskLevel::Low);
        assert_eq!(thresholds.risk_for(-2.5), RiskLevel::Medium);
        assert_eq!(thresholds.risk_for(3.2), RiskLevel::High);
        assert_eq!(thresholds.risk_for(7.0), RiskLevel::Critical);
    }

    #[test]
    fn test_similar_data_is_low_risk() {
        let comparator = LocalComparator::default();
        let test: Vec<_> = (0..5).map(|m| record("test-1", "latency", m, 100.0 + m as f64)).collect();
        let control: Vec<_> = (0..5).map(|m| record("ctrl-1", "latency", m, 101.0 + m as f64)).collect();

        let analysis = comparator.compare(&context(), "default", 4, &test, &control);
        assert_eq!(analysis.risk, RiskLevel::Low);
        assert_eq!(analysis.source, AnalysisSource::Local);
        assert_eq!(analysis.metrics.len(), 1);
        assert_eq!(analysis.analysis_minute, 4);
    }

    #[test]
    fn test_large_deviation_is_high_risk() {
        let comparator = LocalComparator::default();
        let control: Vec<_> = [98.0, 100.0, 102.0, 99.0, 101.0]
            .iter()
            .enumerate()
            .map(|(m, v)| record("ctrl-1", "latency", m as i64, *v))
            .collect();
        let test: Vec<_> = (0..5).map(|m| record("test-1", "latency", m, 200.0)).collect();

        let analysis = comparator.compare(&context(), "default", 4, &test, &control);
        assert_eq!(analysis.risk, RiskLevel::Critical);
        assert!(analysis.metrics[0].score > 5.0);
    }

    #[test]
    fn test_missing_baseline_is_low_with_note() {
        let comparator = LocalComparator::default();
        let test = vec![record("test-1", "errors", 0, 12.0)];

        let analysis = comparator.compare(&context(), "default", 0, &test, &[]);
        assert_eq!(analysis.risk, RiskLevel::Low);
        assert_eq!(analysis.metrics[0].message.as_deref(), Some("no baseline data"));
        assert!(analysis.metrics[0].control_mean.is_none());
    }

    #[test]
    fn test_zero_variance_baseline_uses_relative_deviation() {
        let comparator = LocalComparator::default();
        let control: Vec<_> = (0..3).map(|m| record("ctrl-1", "errors", m, 10.0)).collect();
        let test: Vec<_> = (0..3).map(|m| record("test-1", "errors", m, 16.0)).collect();

        let analysis = comparator.compare(&context(), "default", 2, &test, &control);
        assert_eq!(analysis.risk, RiskLevel::Medium);
    }

    #[test]
    fn test_overall_risk_is_worst_metric() {
        let comparator = LocalComparator::default();
        let mut control: Vec<_> = (0..3).map(|m| record("ctrl-1", "errors", m, 10.0)).collect();
        control.extend((0..3).map(|m| record("ctrl-1", "latency", m, 100.0)));
        let mut test: Vec<_> = (0..3).map(|m| record("test-1", "errors", m, 30.0)).collect();
        test.extend((0..3).map(|m| record("test-1", "latency", m, 100.0)));

        let analysis = comparator.compare(&context(), "default", 2, &test, &control);
        assert_eq!(analysis.metrics.len(), 2);
        assert_eq!(analysis.risk, RiskLevel::High);
    }
}
