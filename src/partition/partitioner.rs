use super::types::{Axis, PartitionShape};
use crate::cluster::types::NodeId;
use crate::error::{Error, Result};

use std::fmt;
use std::sync::Arc;

/// Maps global coordinates to owning nodes and translates between global and
/// node-local coordinates.
///
/// Translation is relative to the partition of [`MatrixPartitioner::node_id`]; use
/// [`MatrixPartitioner::of_node`] to view the same partitioning from another node.
pub trait MatrixPartitioner: Send + Sync + fmt::Debug {
    fn global_rows(&self) -> u64;

    fn global_cols(&self) -> u64;

    fn node_id(&self) -> NodeId;

    fn num_nodes(&self) -> usize;

    /// Owner of `(row, col)`, or `None` when the object is not partitioned.
    fn partition_of_entry(&self, row: u64, col: u64) -> Result<Option<NodeId>>;

    fn shape_of(&self, node: NodeId) -> Result<PartitionShape>;

    /// Shape of the local partition.
    fn partition_shape(&self) -> PartitionShape;

    fn of_node(&self, node: NodeId) -> Result<Arc<dyn MatrixPartitioner>>;

    fn num_row_partitions(&self) -> usize;

    fn num_col_partitions(&self) -> usize;

    /// False for replicated or node-local objects.
    fn is_partitioned(&self) -> bool {
        true
    }

    /// Shapes of every node's partition, indexed by node id.
    fn shapes(&self) -> Result<Vec<PartitionShape>> {
        (0..self.num_nodes())
            .map(|i| self.shape_of(NodeId::new(i)))
            .collect()
    }

    fn global_to_local_row(&self, row: u64) -> Result<u64> {
        let shape = self.partition_shape();
        if shape.row_range().contains(&row) {
            Ok(row - shape.row_offset)
        } else {
            Err(invalid(Axis::Row, row, shape.row_offset, shape.row_offset + shape.rows))
        }
    }

    fn global_to_local_col(&self, col: u64) -> Result<u64> {
        let shape = self.partition_shape();
        if shape.col_range().contains(&col) {
            Ok(col - shape.col_offset)
        } else {
            Err(invalid(Axis::Col, col, shape.col_offset, shape.col_offset + shape.cols))
        }
    }

    fn local_to_global_row(&self, row: u64) -> Result<u64> {
        let shape = self.partition_shape();
        if row < shape.rows {
            Ok(row + shape.row_offset)
        } else {
            Err(invalid(Axis::Row, row, 0, shape.rows))
        }
    }

    fn local_to_global_col(&self, col: u64) -> Result<u64> {
        let shape = self.partition_shape();
        if col < shape.cols {
            Ok(col + shape.col_offset)
        } else {
            Err(invalid(Axis::Col, col, 0, shape.cols))
        }
    }
}

fn invalid(axis: Axis, value: u64, start: u64, end: u64) -> Error {
    Error::InvalidCoordinate {
        axis,
        value,
        start,
        end,
    }
}

fn check_coordinate(row: u64, col: u64, rows: u64, cols: u64) -> Result<()> {
    if row >= rows {
        return Err(invalid(Axis::Row, row, 0, rows));
    }
    if col >= cols {
        return Err(invalid(Axis::Col, col, 0, cols));
    }
    Ok(())
}

fn check_layout(node: NodeId, num_nodes: usize) -> Result<()> {
    if num_nodes == 0 {
        return Err(Error::Precondition("partitioner needs at least one node".to_string()));
    }
    if node.index() >= num_nodes {
        return Err(Error::UnknownNode(node));
    }
    Ok(())
}

/// `(length, offset)` of slice `index` when `extent` is cut into `parts` slices.
/// The last slice absorbs the remainder.
fn slice_of(extent: u64, parts: usize, index: usize) -> (u64, u64) {
    let per_part = extent / parts as u64;
    let offset = per_part * index as u64;
    if index + 1 == parts {
        (extent - offset, offset)
    } else {
        (per_part, offset)
    }
}

fn owner_of(coordinate: u64, extent: u64, parts: usize) -> NodeId {
    let per_part = extent / parts as u64;
    if per_part == 0 {
        return NodeId::new(parts - 1);
    }
    let slice = (coordinate / per_part).min(parts as u64 - 1);
    NodeId::new(slice as usize)
}

/// Contiguous row ranges, monotonically increasing by node id.
#[derive(Debug, Clone)]
pub struct RowPartitioner {
    rows: u64,
    cols: u64,
    node: NodeId,
    num_nodes: usize,
    shape: PartitionShape,
}

impl RowPartitioner {
    pub fn new(rows: u64, cols: u64, node: NodeId, num_nodes: usize) -> Result<Self> {
        check_layout(node, num_nodes)?;
        let (local_rows, row_offset) = slice_of(rows, num_nodes, node.index());

        Ok(Self {
            rows,
            cols,
            node,
            num_nodes,
            shape: PartitionShape::new(local_rows, cols, row_offset, 0),
        })
    }
}

impl MatrixPartitioner for RowPartitioner {
    fn global_rows(&self) -> u64 {
        self.rows
    }

    fn global_cols(&self) -> u64 {
        self.cols
    }

    fn node_id(&self) -> NodeId {
        self.node
    }

    fn num_nodes(&self) -> usize {
        self.num_nodes
    }

    fn partition_of_entry(&self, row: u64, col: u64) -> Result<Option<NodeId>> {
        check_coordinate(row, col, self.rows, self.cols)?;
        Ok(Some(owner_of(row, self.rows, self.num_nodes)))
    }

    fn shape_of(&self, node: NodeId) -> Result<PartitionShape> {
        check_layout(node, self.num_nodes)?;
        let (rows, offset) = slice_of(self.rows, self.num_nodes, node.index());
        Ok(PartitionShape::new(rows, self.cols, offset, 0))
    }

    fn partition_shape(&self) -> PartitionShape {
        self.shape
    }

    fn of_node(&self, node: NodeId) -> Result<Arc<dyn MatrixPartitioner>> {
        Ok(Arc::new(Self::new(self.rows, self.cols, node, self.num_nodes)?))
    }

    fn num_row_partitions(&self) -> usize {
        self.num_nodes
    }

    fn num_col_partitions(&self) -> usize {
        1
    }
}

/// Contiguous column ranges, monotonically increasing by node id.
#[derive(Debug, Clone)]
pub struct ColumnPartitioner {
    rows: u64,
    cols: u64,
    node: NodeId,
    num_nodes: usize,
    shape: PartitionShape,
}

impl ColumnPartitioner {
    pub fn new(rows: u64, cols: u64, node: NodeId, num_nodes: usize) -> Result<Self> {
        check_layout(node, num_nodes)?;
        let (local_cols, col_offset) = slice_of(cols, num_nodes, node.index());

        Ok(Self {
            rows,
            cols,
            node,
            num_nodes,
            shape: PartitionShape::new(rows, local_cols, 0, col_offset),
        })
    }
}

impl MatrixPartitioner for ColumnPartitioner {
    fn global_rows(&self) -> u64 {
        self.rows
    }

    fn global_cols(&self) -> u64 {
        self.cols
    }

    fn node_id(&self) -> NodeId {
        self.node
    }

    fn num_nodes(&self) -> usize {
        self.num_nodes
    }

    fn partition_of_entry(&self, row: u64, col: u64) -> Result<Option<NodeId>> {
        check_coordinate(row, col, self.rows, self.cols)?;
        Ok(Some(owner_of(col, self.cols, self.num_nodes)))
    }

    fn shape_of(&self, node: NodeId) -> Result<PartitionShape> {
        check_layout(node, self.num_nodes)?;
        let (cols, offset) = slice_of(self.cols, self.num_nodes, node.index());
        Ok(PartitionShape::new(self.rows, cols, 0, offset))
    }

    fn partition_shape(&self) -> PartitionShape {
        self.shape
    }

    fn of_node(&self, node: NodeId) -> Result<Arc<dyn MatrixPartitioner>> {
        Ok(Arc::new(Self::new(self.rows, self.cols, node, self.num_nodes)?))
    }

    fn num_row_partitions(&self) -> usize {
        1
    }

    fn num_col_partitions(&self) -> usize {
        self.num_nodes
    }
}

/// Replicated or node-local objects: no entry has an owner and every node holds
/// the full global shape.
#[derive(Debug, Clone)]
pub struct NoPartitioner {
    rows: u64,
    cols: u64,
    node: NodeId,
    num_nodes: usize,
}

impl NoPartitioner {
    pub fn new(rows: u64, cols: u64, node: NodeId, num_nodes: usize) -> Result<Self> {
        check_layout(node, num_nodes)?;
        Ok(Self {
            rows,
            cols,
            node,
            num_nodes,
        })
    }
}

impl MatrixPartitioner for NoPartitioner {
    fn global_rows(&self) -> u64 {
        self.rows
    }

    fn global_cols(&self) -> u64 {
        self.cols
    }

    fn node_id(&self) -> NodeId {
        self.node
    }

    fn num_nodes(&self) -> usize {
        self.num_nodes
    }

    fn partition_of_entry(&self, row: u64, col: u64) -> Result<Option<NodeId>> {
        check_coordinate(row, col, self.rows, self.cols)?;
        Ok(None)
    }

    fn is_partitioned(&self) -> bool {
        false
    }

    fn shape_of(&self, node: NodeId) -> Result<PartitionShape> {
        check_layout(node, self.num_nodes)?;
        Ok(PartitionShape::full(self.rows, self.cols))
    }

    fn partition_shape(&self) -> PartitionShape {
        PartitionShape::full(self.rows, self.cols)
    }

    fn of_node(&self, node: NodeId) -> Result<Arc<dyn MatrixPartitioner>> {
        Ok(Arc::new(Self::new(self.rows, self.cols, node, self.num_nodes)?))
    }

    fn num_row_partitions(&self) -> usize {
        1
    }

    fn num_col_partitions(&self) -> usize {
        1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slice_of_gives_remainder_to_last() {
        assert_eq!(slice_of(10, 3, 0), (3, 0));
        assert_eq!(slice_of(10, 3, 1), (3, 3));
        assert_eq!(slice_of(10, 3, 2), (4, 6));
    }

    #[test]
    fn test_owner_of_with_fewer_rows_than_nodes() {
        // Every row lands on the last node when rows / nodes rounds down to zero
        assert_eq!(owner_of(0, 2, 4), NodeId(3));
        assert_eq!(owner_of(1, 2, 4), NodeId(3));
    }
}
