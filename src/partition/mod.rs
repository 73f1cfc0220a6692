//! Matrix Partitioning Module
//!
//! Maps global matrix coordinates onto owning nodes and describes the slice of the
//! global coordinate space each node allocates locally.
//!
//! ## Strategies
//! - **`RowPartitioner`**: contiguous row ranges ordered by node id. Every node gets
//!   `rows / n` rows and the last node also takes the `rows % n` remainder.
//! - **`ColumnPartitioner`**: the same scheme applied to columns.
//! - **`NoPartitioner`**: replicated or node-local objects. Entries have no owner and every
//!   node holds the full shape.
//!
//! Owner lookup is closed-form, never a scan, because it runs once per loaded entry.

pub mod partitioner;
pub mod types;

pub use partitioner::{ColumnPartitioner, MatrixPartitioner, NoPartitioner, RowPartitioner};
pub use types::{Axis, MatrixEntry, MutableMatrixEntry, PartitionShape};

#[cfg(test)]
mod tests;
