//! Execution history metadata
//!
//! Projects persisted pipeline and workflow executions into an ordered,
//! serializable tree for reporting, and exposes visitor traversal over it.

mod builder;
mod node;
mod record;
mod visitor;

pub use builder::{MetadataGraphBuilder, DEFAULT_MAX_DEPTH, STAGE_NODE_TYPE};
pub use node::{ExecutionKind, ExecutionMetadata, GraphGroupMetadata, GraphNodeMetadata};
pub use record::{
    ExecutionMode, ExecutionRecord, ExecutionStatus, GraphGroupRecord, GraphNodeRecord,
    PipelineExecutionRecord, PipelineStageRecord, StageDefinition, StageElementDefinition,
    StageElementExecution, WorkflowExecutionRecord,
};
pub use visitor::{FlatteningVisitor, GraphNodeVisitable, GraphNodeVisitor, StatusSummaryVisitor};
