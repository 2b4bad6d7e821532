//! Visitor traversal over the metadata tree
//!
//! Traversal is pre-order: a node is visited, then its group, then each
//! group element in order. `accept` returns only after every descendant
//! has been visited.

use super::node::{GraphGroupMetadata, GraphNodeMetadata};
use super::record::{ExecutionMode, ExecutionStatus};
use std::collections::BTreeMap;

/// Receives callbacks while a metadata tree is walked
pub trait GraphNodeVisitor {
    fn visit_node(&mut self, node: &GraphNodeMetadata, depth: usize);

    fn visit_group(&mut self, _group: &GraphGroupMetadata, _depth: usize) {}
}

/// Anything that can be walked by a [`GraphNodeVisitor`]
pub trait GraphNodeVisitable {
    fn accept_at(&self, visitor: &mut dyn GraphNodeVisitor, depth: usize);

    fn accept(&self, visitor: &mut dyn GraphNodeVisitor) {
        self.accept_at(visitor, 0);
    }
}

impl GraphNodeVisitable for GraphNodeMetadata {
    fn accept_at(&self, visitor: &mut dyn GraphNodeVisitor, depth: usize) {
        visitor.visit_node(self, depth);
        if let Some(group) = &self.group {
            group.accept_at(visitor, depth + 1);
        }
    }
}

impl GraphNodeVisitable for GraphGroupMetadata {
    fn accept_at(&self, visitor: &mut dyn GraphNodeVisitor, depth: usize) {
        visitor.visit_group(self, depth);
        for element in &self.elements {
            element.accept_at(visitor, depth);
        }
    }
}

impl GraphNodeVisitable for [GraphNodeMetadata] {
    fn accept_at(&self, visitor: &mut dyn GraphNodeVisitor, depth: usize) {
        for node in self {
            node.accept_at(visitor, depth);
        }
    }
}

impl GraphNodeVisitable for Vec<GraphNodeMetadata> {
    fn accept_at(&self, visitor: &mut dyn GraphNodeVisitor, depth: usize) {
        self.as_slice().accept_at(visitor, depth);
    }
}

/// Collects node ids in traversal order
#[derive(Debug, Default)]
pub struct FlatteningVisitor {
    pub ids: Vec<String>,
}

impl FlatteningVisitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_ids(self) -> Vec<String> {
        self.ids
    }
}

impl GraphNodeVisitor for FlatteningVisitor {
    fn visit_node(&mut self, node: &GraphNodeMetadata, _depth: usize) {
        self.ids.push(node.id.clone());
    }
}

/// Summary counts over a metadata tree
#[derive(Debug, Default, Clone, PartialEq)]
pub struct StatusSummaryVisitor {
    pub nodes: usize,
    pub parallel_groups: usize,
    pub max_depth: usize,
    pub by_status: BTreeMap<ExecutionStatus, usize>,
}

impl StatusSummaryVisitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self, status: ExecutionStatus) -> usize {
        self.by_status.get(&status).copied().unwrap_or(0)
    }
}

impl GraphNodeVisitor for StatusSummaryVisitor {
    fn visit_node(&mut self, node: &GraphNodeMetadata, depth: usize) {
        self.nodes += 1;
        self.max_depth = self.max_depth.max(depth);
        *self.by_status.entry(node.status).or_insert(0) += 1;
    }

    fn visit_group(&mut self, group: &GraphGroupMetadata, _depth: usize) {
        if group.execution_mode == ExecutionMode::Parallel {
            self.parallel_groups += 1;
        }
    }
}
