//! External dependencies consumed by the verification job
//!
//! Each collaborator is an opaque RPC-style service. The job only talks to
//! them through the traits below; in-memory and HTTP implementations are
//! provided for the service binary and for tests.

mod http;
mod memory;


pub use http::{HttpLearningEngineClient, HttpManagerClient};
pub use memory::{InMemoryAnalysisStore, InMemoryMetricStore};

use crate::models::{
    AnalysisRecord, FailFastRecord, HeartbeatRecord, LearningEngineTask, MetricDataRecord,
    MetricGroup, RiskLevel, StateNotification,
};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

pub use async_trait::async_trait;

/// Decides whether a state execution still needs verification
#[async_trait]
pub trait StateValidityOracle: Send + Sync {
    async fn is_state_valid(&self, app_id: &str, state_execution_id: &str) -> Result<bool>;
}

/// Task queue of the external learning engine
#[async_trait]
pub trait LearningEngine: Send + Sync {
    /// Enqueue a task; returns false if the engine declined it
    async fn enqueue(&self, task: &LearningEngineTask) -> Result<bool>;

    async fn has_analysis_timed_out(
        &self,
        app_id: &str,
        workflow_execution_id: &str,
        state_execution_id: &str,
    ) -> Result<bool>;
}

/// Whose data a record query targets
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordScope {
    /// Data collected for the running state execution
    StateExecution(String),
    /// Data collected by any state of a (usually previous) workflow execution
    WorkflowExecution(String),
}

/// Time-series read request for one group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordQuery {
    pub scope: RecordScope,
    pub group_name: String,
    /// Hosts to include; empty selects every host
    #[serde(default)]
    pub nodes: BTreeSet<String>,
    pub start_minute: i64,
    pub end_minute: i64,
}

impl RecordQuery {
    pub fn matches(&self, record: &MetricDataRecord) -> bool {
        let scope_matches = match &self.scope {
            RecordScope::StateExecution(id) => &record.state_execution_id == id,
            RecordScope::WorkflowExecution(id) => &record.workflow_execution_id == id,
        };
        scope_matches
            && record.group_name == self.group_name
            && record.minute >= self.start_minute
            && record.minute <= self.end_minute
            && (self.nodes.is_empty() || self.nodes.contains(&record.host))
    }
}

/// Read and ingestion API for collected time-series data
#[async_trait]
pub trait MetricDataStore: Send + Sync {
    /// Groups registered for a state execution, possibly empty
    async fn metric_groups(&self, state_execution_id: &str) -> Result<Vec<MetricGroup>>;

    /// Heartbeat minutes in ascending order
    async fn heartbeat_minutes(&self, state_execution_id: &str, group_name: &str)
        -> Result<Vec<i64>>;

    async fn heartbeat_bounds(
        &self,
        state_execution_id: &str,
        group_name: &str,
    ) -> Result<Option<(i64, i64)>> {
        let minutes = self.heartbeat_minutes(state_execution_id, group_name).await?;
        Ok(minutes
            .first()
            .copied()
            .zip(minutes.last().copied()))
    }

    async fn records(&self, query: &RecordQuery) -> Result<Vec<MetricDataRecord>>;

    /// First and last minute with data for a workflow execution's group
    async fn execution_minute_bounds(
        &self,
        workflow_execution_id: &str,
        group_name: &str,
    ) -> Result<Option<(i64, i64)>>;

    async fn save_records(&self, records: Vec<MetricDataRecord>) -> Result<usize>;

    async fn save_heartbeat(&self, heartbeat: HeartbeatRecord) -> Result<()>;

    async fn save_metric_groups(
        &self,
        state_execution_id: &str,
        groups: Vec<MetricGroup>,
    ) -> Result<()>;
}

/// Persistence for analysis results and fail-fast decisions
#[async_trait]
pub trait AnalysisStore: Send + Sync {
    async fn save_analysis(&self, record: AnalysisRecord) -> Result<()>;

    async fn analyses(&self, state_execution_id: &str) -> Result<Vec<AnalysisRecord>>;

    /// Worst risk across every stored analysis of a state execution
    async fn max_risk(&self, state_execution_id: &str) -> Result<Option<RiskLevel>> {
        let analyses = self.analyses(state_execution_id).await?;
        Ok(analyses.iter().map(|a| a.risk).max())
    }

    async fn fail_fast_record(&self, state_execution_id: &str) -> Result<Option<FailFastRecord>>;

    async fn save_fail_fast(&self, record: FailFastRecord) -> Result<()>;
}

/// Fire-and-forget sink for terminal job results
#[async_trait]
pub trait ManagerNotifier: Send + Sync {
    async fn notify(&self, notification: &StateNotification) -> Result<()>;
}

/// Scheduler entry deletion hook
#[async_trait]
pub trait JobRegistry: Send + Sync {
    /// Remove the scheduler entry; returns false if none existed
    async fn delete_job(&self, job_key: &str) -> Result<bool>;
}
