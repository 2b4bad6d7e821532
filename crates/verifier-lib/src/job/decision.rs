//! Local-versus-delegated analysis decision

use crate::models::{AnalysisType, ComparisonStrategy, ExecutionContext, MetricGroup};
use std::collections::BTreeSet;

/// How one group's analysis minute will be processed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnalysisDecision {
    /// Enqueue a task with the learning engine
    Delegate {
        analysis_type: AnalysisType,
        control_nodes: BTreeSet<String>,
        baseline_execution_id: Option<String>,
    },
    /// Compare locally against whatever baseline data exists
    Local {
        baseline_execution_id: Option<String>,
        reason: &'static str,
    },
}

fn predictive() -> AnalysisDecision {
    AnalysisDecision::Delegate {
        analysis_type: AnalysisType::Predictive,
        control_nodes: BTreeSet::new(),
        baseline_execution_id: None,
    }
}

/// Decide how to analyze `analysis_minute` for a group
///
/// `baseline_bounds` is the minute range with data in the baseline execution
/// and is only consulted for compare-with-previous.
pub fn decide(
    context: &ExecutionContext,
    group: &MetricGroup,
    analysis_minute: i64,
    baseline_bounds: Option<(i64, i64)>,
) -> AnalysisDecision {
    if group.analysis_type == AnalysisType::Predictive {
        return predictive();
    }

    match context.comparison_strategy {
        ComparisonStrategy::Predictive => predictive(),
        ComparisonStrategy::CompareWithCurrent => AnalysisDecision::Delegate {
            analysis_type: AnalysisType::Comparative,
            control_nodes: context.control_nodes.clone(),
            baseline_execution_id: None,
        },
        ComparisonStrategy::CompareWithPrevious => {
            let Some(baseline) = context.baseline_execution_id.clone() else {
                return AnalysisDecision::Local {
                    baseline_execution_id: None,
                    reason: "no baseline execution",
                };
            };
            match baseline_bounds {
                None => AnalysisDecision::Local {
                    baseline_execution_id: Some(baseline),
                    reason: "baseline has no data",
                },
                Some((_, max_minute)) if max_minute < analysis_minute => AnalysisDecision::Local {
                    baseline_execution_id: Some(baseline),
                    reason: "baseline data ends before analysis minute",
                },
                Some(_) => AnalysisDecision::Delegate {
                    analysis_type: AnalysisType::Comparative,
                    control_nodes: BTreeSet::new(),
                    baseline_execution_id: Some(baseline),
                },
            }
        }
    }
}
