//! Projection of persisted execution trees into metadata trees

use super::node::{ExecutionKind, ExecutionMetadata, GraphGroupMetadata, GraphNodeMetadata};
use super::record::{
    ExecutionMode, ExecutionRecord, ExecutionStatus, GraphNodeRecord, PipelineExecutionRecord,
    PipelineStageRecord, StageElementDefinition, StageElementExecution, WorkflowExecutionRecord,
};
use crate::error::MetadataError;
use tracing::debug;

/// Default nesting limit for pipelines embedding workflows
pub const DEFAULT_MAX_DEPTH: usize = 64;

/// Node type assigned to pipeline stages
pub const STAGE_NODE_TYPE: &str = "stage";

/// Builds ordered metadata trees from execution snapshots
#[derive(Debug, Clone)]
pub struct MetadataGraphBuilder {
    max_depth: usize,
}

impl Default for MetadataGraphBuilder {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

impl MetadataGraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Build the top-level metadata nodes for an execution
    ///
    /// # Returns
    /// * `Ok(None)` if the execution has no stages or no graph
    /// * `Ok(Some(nodes))` with stage and element order preserved
    /// * `Err(MetadataError::StageExecutionMismatch)` if a stage's definition
    ///   and execution counts differ
    pub fn build(
        &self,
        record: &ExecutionRecord,
    ) -> Result<Option<Vec<GraphNodeMetadata>>, MetadataError> {
        let nodes = match record {
            ExecutionRecord::Pipeline(pipeline) => self.build_pipeline(pipeline)?,
            ExecutionRecord::Workflow(workflow) => self.build_workflow(workflow, 0)?,
        };

        debug!(
            execution_id = %record.id(),
            top_level_nodes = nodes.len(),
            "Built execution metadata graph"
        );

        if nodes.is_empty() {
            Ok(None)
        } else {
            Ok(Some(nodes))
        }
    }

    /// Build the full reporting projection for an execution
    pub fn execution_metadata(
        &self,
        record: &ExecutionRecord,
    ) -> Result<ExecutionMetadata, MetadataError> {
        let nodes = self.build(record)?;
        let (id, name, kind, status, started_at, ended_at) = match record {
            ExecutionRecord::Pipeline(p) => (
                &p.id,
                &p.name,
                ExecutionKind::Pipeline,
                p.status,
                p.started_at,
                p.ended_at,
            ),
            ExecutionRecord::Workflow(w) => (
                &w.id,
                &w.name,
                ExecutionKind::Workflow,
                w.status,
                w.started_at,
                w.ended_at,
            ),
        };

        let duration_ms = match (started_at, ended_at) {
            (Some(start), Some(end)) if end >= start => Some(end - start),
            _ => None,
        };

        Ok(ExecutionMetadata {
            id: id.clone(),
            name: name.clone(),
            kind,
            status,
            started_at,
            ended_at,
            duration_ms,
            nodes,
        })
    }

    fn build_pipeline(
        &self,
        pipeline: &PipelineExecutionRecord,
    ) -> Result<Vec<GraphNodeMetadata>, MetadataError> {
        pipeline
            .stages
            .iter()
            .enumerate()
            .map(|(index, stage)| self.build_stage(&pipeline.id, index, stage))
            .collect()
    }

    fn build_stage(
        &self,
        pipeline_id: &str,
        index: usize,
        stage: &PipelineStageRecord,
    ) -> Result<GraphNodeMetadata, MetadataError> {
        let definitions = &stage.definition.elements;
        if definitions.len() != stage.executions.len() {
            return Err(MetadataError::StageExecutionMismatch {
                stage: stage.definition.name.clone(),
                definitions: definitions.len(),
                executions: stage.executions.len(),
            });
        }

        let elements = definitions
            .iter()
            .zip(&stage.executions)
            .map(|(definition, execution)| self.build_stage_element(definition, execution))
            .collect::<Result<Vec<_>, _>>()?;

        let execution_mode = if stage.definition.parallel && elements.len() > 1 {
            ExecutionMode::Parallel
        } else {
            ExecutionMode::Sequential
        };

        let status = ExecutionStatus::aggregate(elements.iter().map(|e| e.status));
        let started_at = elements.iter().filter_map(|e| e.started_at).min();
        let ended_at = if status.is_finished() {
            elements.iter().filter_map(|e| e.ended_at).max()
        } else {
            None
        };

        let id = stage
            .id
            .clone()
            .unwrap_or_else(|| format!("{}-stage-{}", pipeline_id, index));

        Ok(GraphNodeMetadata {
            id,
            name: stage.definition.name.clone(),
            node_type: STAGE_NODE_TYPE.to_string(),
            status,
            started_at,
            ended_at,
            group: Some(GraphGroupMetadata {
                execution_mode,
                elements,
            }),
        })
    }

    fn build_stage_element(
        &self,
        definition: &StageElementDefinition,
        execution: &StageElementExecution,
    ) -> Result<GraphNodeMetadata, MetadataError> {
        let group = match &execution.workflow_execution {
            Some(workflow) => {
                let nodes = self.build_workflow(workflow, 1)?;
                (!nodes.is_empty()).then_some(GraphGroupMetadata {
                    execution_mode: ExecutionMode::Sequential,
                    elements: nodes,
                })
            }
            None => None,
        };

        Ok(GraphNodeMetadata {
            id: execution.id.clone(),
            name: definition.name.clone(),
            node_type: definition.element_type.clone(),
            status: execution.status,
            started_at: execution.started_at,
            ended_at: execution.ended_at,
            group,
        })
    }

    fn build_workflow(
        &self,
        workflow: &WorkflowExecutionRecord,
        depth: usize,
    ) -> Result<Vec<GraphNodeMetadata>, MetadataError> {
        match &workflow.graph {
            Some(root) => self.build_chain(root, depth),
            None => Ok(Vec::new()),
        }
    }

    /// Flatten a node and its `next` siblings into an ordered list
    fn build_chain(
        &self,
        head: &GraphNodeRecord,
        depth: usize,
    ) -> Result<Vec<GraphNodeMetadata>, MetadataError> {
        if depth > self.max_depth {
            return Err(MetadataError::DepthExceeded {
                limit: self.max_depth,
            });
        }
        head.chain().map(|node| self.build_node(node, depth)).collect()
    }

    fn build_node(
        &self,
        node: &GraphNodeRecord,
        depth: usize,
    ) -> Result<GraphNodeMetadata, MetadataError> {
        let group = match &node.group {
            Some(group) => {
                let mut elements = Vec::with_capacity(group.elements.len());
                for element in &group.elements {
                    elements.extend(self.build_chain(element, depth + 1)?);
                }
                Some(GraphGroupMetadata {
                    execution_mode: group.execution_mode,
                    elements,
                })
            }
            None => None,
        };

        Ok(GraphNodeMetadata {
            id: node.id.clone(),
            name: node.name.clone(),
            node_type: node.node_type.clone(),
            status: node.status,
            started_at: node.started_at,
            ended_at: node.ended_at,
            group,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::record::{GraphGroupRecord, StageDefinition};
    use crate::metadata::visitor::{FlatteningVisitor, GraphNodeVisitable};

    fn node(id: &str) -> GraphNodeRecord {
        GraphNodeRecord {
            id: id.to_string(),
            name: format!("step {}", id),
            node_type: "command".to_string(),
            status: ExecutionStatus::Success,
            started_at: Some(1_000),
            ended_at: Some(2_000),
            group: None,
            next: None,
        }
    }

    fn linked(ids: &[&str]) -> GraphNodeRecord {
        let mut next: Option<Box<GraphNodeRecord>> = None;
        for id in ids.iter().rev() {
            let mut current = node(id);
            current.next = next.take();
            next = Some(Box::new(current));
        }
        *next.expect("at least one id")
    }

    fn workflow(graph: Option<GraphNodeRecord>) -> WorkflowExecutionRecord {
        WorkflowExecutionRecord {
            id: "wf-exec".to_string(),
            name: "deploy".to_string(),
            status: ExecutionStatus::Success,
            started_at: Some(1_000),
            ended_at: Some(5_000),
            graph,
        }
    }

    fn stage(name: &str, parallel: bool, elements: &[&str], executions: usize) -> PipelineStageRecord {
        PipelineStageRecord {
            id: None,
            definition: StageDefinition {
                name: name.to_string(),
                parallel,
                elements: elements
                    .iter()
                    .map(|e| StageElementDefinition {
                        name: e.to_string(),
                        element_type: "env_state".to_string(),
                    })
                    .collect(),
            },
            executions: (0..executions)
                .map(|i| StageElementExecution {
                    id: format!("{}-exec-{}", name, i),
                    status: ExecutionStatus::Success,
                    started_at: Some(i as i64 * 10),
                    ended_at: Some(i as i64 * 10 + 5),
                    workflow_execution: None,
                })
                .collect(),
        }
    }

    fn pipeline(stages: Vec<PipelineStageRecord>) -> ExecutionRecord {
        ExecutionRecord::Pipeline(PipelineExecutionRecord {
            id: "pipe".to_string(),
            name: "release".to_string(),
            status: ExecutionStatus::Running,
            started_at: Some(0),
            ended_at: None,
            stages,
        })
    }

    #[test]
    fn test_empty_workflow_returns_none() {
        let builder = MetadataGraphBuilder::new();
        let result = builder
            .build(&ExecutionRecord::Workflow(workflow(None)))
            .unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_empty_pipeline_returns_none() {
        let builder = MetadataGraphBuilder::new();
        assert!(builder.build(&pipeline(vec![])).unwrap().is_none());
    }

    #[test]
    fn test_workflow_chain_is_flattened_in_order() {
        let builder = MetadataGraphBuilder::new();
        let record = ExecutionRecord::Workflow(workflow(Some(linked(&["1", "2", "3"]))));

        let nodes = builder.build(&record).unwrap().unwrap();
        let ids: Vec<&str> = nodes.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2", "3"]);
    }

    #[test]
    fn test_parallel_group_order_preserved() {
        let mut fork = node("fork");
        fork.group = Some(GraphGroupRecord {
            execution_mode: ExecutionMode::Parallel,
            elements: vec![node("c"), node("a"), node("b")],
        });
        let mut root = node("start");
        root.next = Some(Box::new(fork));

        let builder = MetadataGraphBuilder::new();
        let nodes = builder
            .build(&ExecutionRecord::Workflow(workflow(Some(root))))
            .unwrap()
            .unwrap();

        let group = nodes[1].group.as_ref().unwrap();
        assert_eq!(group.execution_mode, ExecutionMode::Parallel);
        let ids: Vec<&str> = group.elements.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
    }

    #[test]
    fn test_pipeline_stage_order_preserved() {
        let builder = MetadataGraphBuilder::new();
        let record = pipeline(vec![
            stage("qa", false, &["qa-env"], 1),
            stage("prod", true, &["us", "eu", "ap"], 3),
            stage("verify", false, &["smoke"], 1),
        ]);

        let nodes = builder.build(&record).unwrap().unwrap();
        let names: Vec<&str> = nodes.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, vec!["qa", "prod", "verify"]);

        let prod = nodes[1].group.as_ref().unwrap();
        assert_eq!(prod.execution_mode, ExecutionMode::Parallel);
        let elements: Vec<&str> = prod.elements.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(elements, vec!["us", "eu", "ap"]);
        assert_eq!(nodes[1].id, "pipe-stage-1");
        assert_eq!(nodes[1].started_at, Some(0));
        assert_eq!(nodes[1].ended_at, Some(25));
    }

    #[test]
    fn test_single_element_parallel_stage_is_sequential() {
        let builder = MetadataGraphBuilder::new();
        let nodes = builder
            .build(&pipeline(vec![stage("only", true, &["one"], 1)]))
            .unwrap()
            .unwrap();
        assert_eq!(
            nodes[0].group.as_ref().unwrap().execution_mode,
            ExecutionMode::Sequential
        );
    }

    #[test]
    fn test_stage_count_mismatch_is_error() {
        let builder = MetadataGraphBuilder::new();
        let record = pipeline(vec![
            stage("qa", false, &["qa-env"], 1),
            stage("prod", true, &["us", "eu"], 1),
        ]);

        match builder.build(&record) {
            Err(MetadataError::StageExecutionMismatch {
                stage,
                definitions,
                executions,
            }) => {
                assert_eq!(stage, "prod");
                assert_eq!(definitions, 2);
                assert_eq!(executions, 1);
            }
            other => panic!("expected mismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_nested_workflow_becomes_group() {
        let mut prod = stage("prod", false, &["us"], 1);
        prod.executions[0].workflow_execution =
            Some(Box::new(workflow(Some(linked(&["w1", "w2"])))));

        let builder = MetadataGraphBuilder::new();
        let nodes = builder.build(&pipeline(vec![prod])).unwrap().unwrap();

        let mut visitor = FlatteningVisitor::new();
        nodes.accept(&mut visitor);
        assert_eq!(
            visitor.into_ids(),
            vec!["pipe-stage-0", "prod-exec-0", "w1", "w2"]
        );
    }

    #[test]
    fn test_depth_limit_enforced() {
        let mut inner = node("leaf");
        for level in 0..5 {
            let mut parent = node(&format!("level-{}", level));
            parent.group = Some(GraphGroupRecord {
                execution_mode: ExecutionMode::Sequential,
                elements: vec![inner],
            });
            inner = parent;
        }

        let builder = MetadataGraphBuilder::new().with_max_depth(3);
        let result = builder.build(&ExecutionRecord::Workflow(workflow(Some(inner))));
        assert!(matches!(result, Err(MetadataError::DepthExceeded { limit: 3 })));
    }

    #[test]
    fn test_execution_metadata_summary() {
        let builder = MetadataGraphBuilder::new();
        let record = ExecutionRecord::Workflow(workflow(Some(linked(&["1"]))));

        let metadata = builder.execution_metadata(&record).unwrap();
        assert_eq!(metadata.kind, ExecutionKind::Workflow);
        assert_eq!(metadata.duration_ms, Some(4_000));
        assert_eq!(metadata.nodes.unwrap().len(), 1);
    }
}
