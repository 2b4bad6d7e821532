//! Persisted execution snapshots the metadata graph is built from

use serde::{Deserialize, Serialize};

/// Status of an executed step, pipeline or workflow
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    #[default]
    Queued,
    Waiting,
    Running,
    Paused,
    Success,
    Skipped,
    Failed,
    Error,
    Aborted,
    #[serde(other)]
    Unknown,
}

impl ExecutionStatus {
    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Success
                | ExecutionStatus::Skipped
                | ExecutionStatus::Failed
                | ExecutionStatus::Error
                | ExecutionStatus::Aborted
        )
    }

    pub fn is_negative(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Failed | ExecutionStatus::Error | ExecutionStatus::Aborted
        )
    }

    /// Roll several element statuses up into one
    ///
    /// Any negative status wins, then anything still in flight, then success.
    pub fn aggregate<I>(statuses: I) -> ExecutionStatus
    where
        I: IntoIterator<Item = ExecutionStatus>,
    {
        let statuses: Vec<ExecutionStatus> = statuses.into_iter().collect();
        if statuses.is_empty() {
            return ExecutionStatus::Queued;
        }
        if let Some(negative) = statuses.iter().copied().filter(|s| s.is_negative()).max() {
            return negative;
        }
        if let Some(active) = statuses.iter().copied().find(|s| !s.is_finished()) {
            return active;
        }
        if statuses.iter().all(|s| *s == ExecutionStatus::Skipped) {
            ExecutionStatus::Skipped
        } else {
            ExecutionStatus::Success
        }
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ExecutionStatus::Queued => "queued",
            ExecutionStatus::Waiting => "waiting",
            ExecutionStatus::Running => "running",
            ExecutionStatus::Paused => "paused",
            ExecutionStatus::Success => "success",
            ExecutionStatus::Skipped => "skipped",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Error => "error",
            ExecutionStatus::Aborted => "aborted",
            ExecutionStatus::Unknown => "unknown",
        };
        write!(f, "{}", name)
    }
}

/// How the elements of a group were executed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    Parallel,
    #[default]
    Sequential,
}

/// Root of a persisted execution
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExecutionRecord {
    Pipeline(PipelineExecutionRecord),
    Workflow(WorkflowExecutionRecord),
}

impl ExecutionRecord {
    pub fn id(&self) -> &str {
        match self {
            ExecutionRecord::Pipeline(p) => &p.id,
            ExecutionRecord::Workflow(w) => &w.id,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineExecutionRecord {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub status: ExecutionStatus,
    #[serde(default)]
    pub started_at: Option<i64>,
    #[serde(default)]
    pub ended_at: Option<i64>,
    #[serde(default)]
    pub stages: Vec<PipelineStageRecord>,
}

/// A pipeline stage: its definition plus one execution per defined element
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineStageRecord {
    #[serde(default)]
    pub id: Option<String>,
    pub definition: StageDefinition,
    #[serde(default)]
    pub executions: Vec<StageElementExecution>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageDefinition {
    pub name: String,
    #[serde(default)]
    pub parallel: bool,
    #[serde(default)]
    pub elements: Vec<StageElementDefinition>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageElementDefinition {
    pub name: String,
    #[serde(default = "default_element_type")]
    pub element_type: String,
}

fn default_element_type() -> String {
    "env_state".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageElementExecution {
    pub id: String,
    #[serde(default)]
    pub status: ExecutionStatus,
    #[serde(default)]
    pub started_at: Option<i64>,
    #[serde(default)]
    pub ended_at: Option<i64>,
    #[serde(default)]
    pub workflow_execution: Option<Box<WorkflowExecutionRecord>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowExecutionRecord {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub status: ExecutionStatus,
    #[serde(default)]
    pub started_at: Option<i64>,
    #[serde(default)]
    pub ended_at: Option<i64>,
    #[serde(default)]
    pub graph: Option<GraphNodeRecord>,
}

/// One executed step as persisted; `next` links the following sibling
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphNodeRecord {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub node_type: String,
    #[serde(default)]
    pub status: ExecutionStatus,
    #[serde(default)]
    pub started_at: Option<i64>,
    #[serde(default)]
    pub ended_at: Option<i64>,
    #[serde(default)]
    pub group: Option<GraphGroupRecord>,
    #[serde(default)]
    pub next: Option<Box<GraphNodeRecord>>,
}

impl GraphNodeRecord {
    /// Iterate this node and every `next` sibling after it
    pub fn chain(&self) -> impl Iterator<Item = &GraphNodeRecord> {
        std::iter::successors(Some(self), |node| node.next.as_deref())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphGroupRecord {
    #[serde(default)]
    pub execution_mode: ExecutionMode,
    #[serde(default)]
    pub elements: Vec<GraphNodeRecord>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aggregate_prefers_negative() {
        let status = ExecutionStatus::aggregate([
            ExecutionStatus::Success,
            ExecutionStatus::Running,
            ExecutionStatus::Failed,
        ]);
        assert_eq!(status, ExecutionStatus::Failed);
    }

    #[test]
    fn test_aggregate_running_over_success() {
        let status = ExecutionStatus::aggregate([ExecutionStatus::Success, ExecutionStatus::Running]);
        assert_eq!(status, ExecutionStatus::Running);
    }

    #[test]
    fn test_aggregate_empty_is_queued() {
        assert_eq!(ExecutionStatus::aggregate([]), ExecutionStatus::Queued);
    }

    #[test]
    fn test_unknown_status_deserializes() {
        let status: ExecutionStatus = serde_json::from_str("\"discontinuing\"").unwrap();
        assert_eq!(status, ExecutionStatus::Unknown);
    }

    #[test]
    fn test_chain_follows_next() {
        let json = r#"{
            "id": "1", "name": "first",
            "next": {"id": "2", "name": "second", "next": {"id": "3", "name": "third"}}
        }"#;
        let node: GraphNodeRecord = serde_json::from_str(json).unwrap();
        let ids: Vec<&str> = node.chain().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2", "3"]);
    }
}
