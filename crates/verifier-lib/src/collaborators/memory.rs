//! In-memory collaborator implementations backed by `dashmap`

use super::{async_trait, AnalysisStore, MetricDataStore, RecordQuery};
use crate::models::{
    AnalysisRecord, FailFastRecord, HeartbeatRecord, MetricDataRecord, MetricGroup,
};
use anyhow::Result;
use dashmap::DashMap;
use std::collections::BTreeSet;

type GroupKey = (String, String);

/// Time-series store keyed by (state execution, group)
#[derive(Debug, Default)]
pub struct InMemoryMetricStore {
    records: DashMap<GroupKey, Vec<MetricDataRecord>>,
    heartbeats: DashMap<GroupKey, BTreeSet<i64>>,
    groups: DashMap<String, Vec<MetricGroup>>,
}

impl InMemoryMetricStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of stored data points
    pub fn record_count(&self) -> usize {
        self.records.iter().map(|entry| entry.value().len()).sum()
    }
}

#[async_trait]
impl MetricDataStore for InMemoryMetricStore {
    async fn metric_groups(&self, state_execution_id: &str) -> Result<Vec<MetricGroup>> {
        Ok(self
            .groups
            .get(state_execution_id)
            .map(|groups| groups.clone())
            .unwrap_or_default())
    }

    async fn heartbeat_minutes(
        &self,
        state_execution_id: &str,
        group_name: &str,
    ) -> Result<Vec<i64>> {
        let key = (state_execution_id.to_string(), group_name.to_string());
        Ok(self
            .heartbeats
            .get(&key)
            .map(|minutes| minutes.iter().copied().collect())
            .unwrap_or_default())
    }

    async fn records(&self, query: &RecordQuery) -> Result<Vec<MetricDataRecord>> {
        let mut matched: Vec<MetricDataRecord> = self
            .records
            .iter()
            .flat_map(|entry| {
                entry
                    .value()
                    .iter()
                    .filter(|r| query.matches(r))
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .collect();
        matched.sort_by(|a, b| {
            a.minute
                .cmp(&b.minute)
                .then_with(|| a.host.cmp(&b.host))
                .then_with(|| a.transaction.cmp(&b.transaction))
                .then_with(|| a.metric.cmp(&b.metric))
        });
        Ok(matched)
    }

    async fn execution_minute_bounds(
        &self,
        workflow_execution_id: &str,
        group_name: &str,
    ) -> Result<Option<(i64, i64)>> {
        let mut bounds: Option<(i64, i64)> = None;
        for entry in self.records.iter() {
            if entry.key().1 != group_name {
                continue;
            }
            for record in entry
                .value()
                .iter()
                .filter(|r| r.workflow_execution_id == workflow_execution_id)
            {
                bounds = Some(match bounds {
                    Some((min, max)) => (min.min(record.minute), max.max(record.minute)),
                    None => (record.minute, record.minute),
                });
            }
        }
        Ok(bounds)
    }

    async fn save_records(&self, records: Vec<MetricDataRecord>) -> Result<usize> {
        let count = records.len();
        for record in records {
            let key = (record.state_execution_id.clone(), record.group_name.clone());
            self.records.entry(key).or_default().push(record);
        }
        Ok(count)
    }

    async fn save_heartbeat(&self, heartbeat: HeartbeatRecord) -> Result<()> {
        let key = (heartbeat.state_execution_id, heartbeat.group_name);
        self.heartbeats.entry(key).or_default().insert(heartbeat.minute);
        Ok(())
    }

    async fn save_metric_groups(
        &self,
        state_execution_id: &str,
        groups: Vec<MetricGroup>,
    ) -> Result<()> {
        self.groups.insert(state_execution_id.to_string(), groups);
        Ok(())
    }
}

/// Analysis and fail-fast records keyed by state execution
#[derive(Debug, Default)]
pub struct InMemoryAnalysisStore {
    analyses: DashMap<String, Vec<AnalysisRecord>>,
    fail_fast: DashMap<String, FailFastRecord>,
}

impl InMemoryAnalysisStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AnalysisStore for InMemoryAnalysisStore {
    async fn save_analysis(&self, record: AnalysisRecord) -> Result<()> {
        self.analyses
            .entry(record.state_execution_id.clone())
            .or_default()
            .push(record);
        Ok(())
    }

    async fn analyses(&self, state_execution_id: &str) -> Result<Vec<AnalysisRecord>> {
        Ok(self
            .analyses
            .get(state_execution_id)
            .map(|records| records.clone())
            .unwrap_or_default())
    }

    async fn fail_fast_record(&self, state_execution_id: &str) -> Result<Option<FailFastRecord>> {
        Ok(self
            .fail_fast
            .get(state_execution_id)
            .map(|record| record.clone()))
    }

    async fn save_fail_fast(&self, record: FailFastRecord) -> Result<()> {
        self.fail_fast
            .insert(record.state_execution_id.clone(), record);
        Ok(())
    }
}
