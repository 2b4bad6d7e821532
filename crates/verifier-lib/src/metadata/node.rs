//! Serializable metadata tree produced for reporting

use super::record::{ExecutionMode, ExecutionStatus};
use serde::{Deserialize, Serialize};

/// One executed step; may own a nested group of sub-steps
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNodeMetadata {
    pub id: String,
    pub name: String,
    pub node_type: String,
    pub status: ExecutionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group: Option<GraphGroupMetadata>,
}

impl GraphNodeMetadata {
    /// Wall-clock duration in milliseconds when both bounds are known
    pub fn duration_ms(&self) -> Option<i64> {
        match (self.started_at, self.ended_at) {
            (Some(start), Some(end)) if end >= start => Some(end - start),
            _ => None,
        }
    }

    pub fn children(&self) -> &[GraphNodeMetadata] {
        self.group
            .as_ref()
            .map(|g| g.elements.as_slice())
            .unwrap_or_default()
    }
}

/// Ordered sub-elements of a node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphGroupMetadata {
    pub execution_mode: ExecutionMode,
    pub elements: Vec<GraphNodeMetadata>,
}

/// Kind of root execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionKind {
    Pipeline,
    Workflow,
}

/// Reporting projection of a whole execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionMetadata {
    pub id: String,
    pub name: String,
    pub kind: ExecutionKind,
    pub status: ExecutionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nodes: Option<Vec<GraphNodeMetadata>>,
}
