//! Learning engine task descriptors

use super::decision::AnalysisDecision;
use super::JobSettings;
use crate::models::{ExecutionContext, LearningEngineTask, MetricGroup};
use std::collections::BTreeSet;
use url::Url;
use uuid::Uuid;

const RECORDS_PATH: &str = "api/v1/timeseries/records";
const ANALYSIS_PATH: &str = "api/v1/analysis";
const GROUPS_PATH: &str = "api/v1/timeseries/groups";

fn join_nodes(nodes: &BTreeSet<String>) -> String {
    nodes.iter().map(String::as_str).collect::<Vec<_>>().join(",")
}

fn records_url(
    settings: &JobSettings,
    scope: (&str, &str),
    group_name: &str,
    nodes: &BTreeSet<String>,
    start_minute: i64,
    end_minute: i64,
) -> Url {
    let mut url = settings.endpoint(RECORDS_PATH);
    {
        let mut query = url.query_pairs_mut();
        query.append_pair(scope.0, scope.1);
        query.append_pair("group_name", group_name);
        if !nodes.is_empty() {
            query.append_pair("nodes", &join_nodes(nodes));
        }
        query.append_pair("start_minute", &start_minute.to_string());
        query.append_pair("end_minute", &end_minute.to_string());
    }
    url
}

/// Build the task descriptor for a delegated analysis
///
/// Returns None for local decisions.
pub fn build_task(
    context: &ExecutionContext,
    group: &MetricGroup,
    analysis_minute: i64,
    decision: &AnalysisDecision,
    settings: &JobSettings,
) -> Option<LearningEngineTask> {
    let AnalysisDecision::Delegate {
        analysis_type,
        control_nodes,
        baseline_execution_id,
    } = decision
    else {
        return None;
    };

    let start_minute = context.window.start_minute;
    let test_input_url = records_url(
        settings,
        ("state_execution_id", &context.state_execution_id),
        &group.name,
        &context.test_nodes,
        start_minute,
        analysis_minute,
    );

    let control_input_url = match (baseline_execution_id, control_nodes.is_empty()) {
        (Some(baseline), _) => Some(records_url(
            settings,
            ("workflow_execution_id", baseline),
            &group.name,
            &BTreeSet::new(),
            start_minute,
            analysis_minute,
        )),
        (None, false) => Some(records_url(
            settings,
            ("state_execution_id", &context.state_execution_id),
            &group.name,
            control_nodes,
            start_minute,
            analysis_minute,
        )),
        (None, true) => None,
    };

    let mut metric_template_url = settings.endpoint(GROUPS_PATH);
    if let Ok(mut segments) = metric_template_url.path_segments_mut() {
        segments.push(&context.state_execution_id);
    }

    Some(LearningEngineTask {
        task_id: Uuid::new_v4(),
        account_id: context.account_id.clone(),
        app_id: context.app_id.clone(),
        workflow_id: context.workflow_id.clone(),
        workflow_execution_id: context.workflow_execution_id.clone(),
        state_execution_id: context.state_execution_id.clone(),
        service_id: context.service_id.clone(),
        state_type: context.state_type.clone(),
        group_name: group.name.clone(),
        analysis_type: *analysis_type,
        comparison_strategy: context.comparison_strategy,
        analysis_start_minute: start_minute,
        analysis_minute,
        tolerance: context.tolerance,
        smooth_window: context.smooth_window,
        test_nodes: context.test_nodes.clone(),
        control_nodes: control_nodes.clone(),
        baseline_execution_id: baseline_execution_id.clone(),
        test_input_url: test_input_url.to_string(),
        control_input_url: control_input_url.map(|u| u.to_string()),
        metric_template_url: metric_template_url.to_string(),
        analysis_save_url: settings.endpoint(ANALYSIS_PATH).to_string(),
    })
}
