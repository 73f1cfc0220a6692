use crate::cluster::types::NodeId;
use crate::error::{Error, Result};
use crate::matrix::{MatrixFormat, MatrixLayout};
use crate::partition::{ColumnPartitioner, MatrixPartitioner, NoPartitioner, RowPartitioner};
use crate::sync::RecordFormat;

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Scope {
    /// One copy, on the first node of `at`.
    Singleton,
    /// A full copy on every node of `at`, or on every node.
    Replicated,
    /// One slice per node.
    Partitioned,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum PartitionStrategy {
    #[default]
    Row,
    Column,
}

/// A declared matrix state object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateDescriptor {
    pub name: String,
    pub scope: Scope,
    pub at: Vec<NodeId>,
    pub rows: u64,
    pub cols: u64,
    pub format: MatrixFormat,
    pub layout: MatrixLayout,
    pub strategy: PartitionStrategy,
    pub path: Option<PathBuf>,
    pub record_format: RecordFormat,
}

impl StateDescriptor {
    /// Whether `node` holds any part of the object.
    pub fn allocated_on(&self, node: NodeId) -> bool {
        match self.scope {
            Scope::Partitioned => true,
            Scope::Singleton => self.at.first().copied().unwrap_or(NodeId(0)) == node,
            Scope::Replicated => self.at.is_empty() || self.at.contains(&node),
        }
    }

    pub fn partitioner(&self, node: NodeId, num_nodes: usize) -> Result<Arc<dyn MatrixPartitioner>> {
        let partitioner: Arc<dyn MatrixPartitioner> = match (self.scope, self.strategy) {
            (Scope::Partitioned, PartitionStrategy::Row) => {
                Arc::new(RowPartitioner::new(self.rows, self.cols, node, num_nodes)?)
            }
            (Scope::Partitioned, PartitionStrategy::Column) => {
                Arc::new(ColumnPartitioner::new(self.rows, self.cols, node, num_nodes)?)
            }
            _ => Arc::new(NoPartitioner::new(self.rows, self.cols, node, num_nodes)?),
        };
        Ok(partitioner)
    }
}

/// Declares a state object. Defaults: replicated, row partitioning, dense, no input file.
#[derive(Debug, Clone)]
pub struct StateBuilder {
    descriptor: StateDescriptor,
}

impl StateBuilder {
    pub fn new(name: &str, rows: u64, cols: u64) -> Self {
        Self {
            descriptor: StateDescriptor {
                name: name.to_string(),
                scope: Scope::Replicated,
                at: Vec::new(),
                rows,
                cols,
                format: MatrixFormat::Dense,
                layout: MatrixLayout::RowMajor,
                strategy: PartitionStrategy::Row,
                path: None,
                record_format: RecordFormat::RowColVal,
            },
        }
    }

    pub fn scope(mut self, scope: Scope) -> Self {
        self.descriptor.scope = scope;
        self
    }

    pub fn at(mut self, nodes: &[NodeId]) -> Self {
        self.descriptor.at = nodes.to_vec();
        self
    }

    pub fn format(mut self, format: MatrixFormat) -> Self {
        self.descriptor.format = format;
        self
    }

    pub fn layout(mut self, layout: MatrixLayout) -> Self {
        self.descriptor.layout = layout;
        self
    }

    pub fn partitioned_by(mut self, strategy: PartitionStrategy) -> Self {
        self.descriptor.scope = Scope::Partitioned;
        self.descriptor.strategy = strategy;
        self
    }

    pub fn path(mut self, path: impl Into<PathBuf>) -> Self {
        self.descriptor.path = Some(path.into());
        self
    }

    pub fn record_format(mut self, format: RecordFormat) -> Self {
        self.descriptor.record_format = format;
        self
    }

    pub fn build(self) -> Result<StateDescriptor> {
        let descriptor = self.descriptor;
        if descriptor.name.is_empty() {
            return Err(Error::Precondition("state name is empty".to_string()));
        }
        if descriptor.rows == 0 || descriptor.cols == 0 {
            return Err(Error::Precondition(format!(
                "state '{}' has an empty {}x{} shape",
                descriptor.name, descriptor.rows, descriptor.cols
            )));
        }
        if descriptor.scope == Scope::Partitioned && !descriptor.at.is_empty() {
            return Err(Error::Precondition(format!(
                "partitioned state '{}' always spans every node",
                descriptor.name
            )));
        }
        // Every node streams a split of the file, so every node must hold the object
        if descriptor.path.is_some()
            && (descriptor.scope == Scope::Singleton || !descriptor.at.is_empty())
        {
            return Err(Error::Precondition(format!(
                "file-backed state '{}' must live on every node",
                descriptor.name
            )));
        }
        Ok(descriptor)
    }
}
