use super::{Matrix, MatrixBuilder, MatrixFormat, MatrixLayout};
use crate::error::{Error, Result};
use crate::partition::{MatrixEntry, PartitionShape};

use serde::{Deserialize, Serialize};

/// A node's local slice of a matrix, read and written with global coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatrixPartition {
    shape: PartitionShape,
    matrix: Matrix,
}

impl MatrixPartition {
    pub fn new(shape: PartitionShape, format: MatrixFormat, layout: MatrixLayout) -> Result<Self> {
        let matrix = MatrixBuilder::new(shape.rows, shape.cols)
            .format(format)
            .layout(layout)
            .build()?;
        Ok(Self { shape, matrix })
    }

    pub fn from_matrix(shape: PartitionShape, matrix: Matrix) -> Result<Self> {
        if matrix.rows() != shape.rows || matrix.cols() != shape.cols {
            return Err(Error::Precondition(format!(
                "matrix is {}x{} but the partition shape is {}x{}",
                matrix.rows(),
                matrix.cols(),
                shape.rows,
                shape.cols
            )));
        }
        Ok(Self { shape, matrix })
    }

    pub fn shape(&self) -> PartitionShape {
        self.shape
    }

    pub fn matrix(&self) -> &Matrix {
        &self.matrix
    }

    pub fn matrix_mut(&mut self) -> &mut Matrix {
        &mut self.matrix
    }

    pub fn owns(&self, row: u64, col: u64) -> bool {
        self.shape.contains(row, col)
    }

    /// Value at a global coordinate, or `None` when this node does not hold it.
    pub fn get(&self, row: u64, col: u64) -> Option<f64> {
        if !self.owns(row, col) {
            return None;
        }
        self.matrix
            .get(row - self.shape.row_offset, col - self.shape.col_offset)
            .ok()
    }

    pub fn set(&mut self, row: u64, col: u64, value: f64) -> Result<()> {
        if !self.owns(row, col) {
            return Err(Error::Precondition(format!(
                "({}, {}) is outside the local partition {:?}",
                row, col, self.shape
            )));
        }
        self.matrix
            .set(row - self.shape.row_offset, col - self.shape.col_offset, value)
    }

    /// Non-zero entries in global coordinates.
    pub fn entries(&self) -> Vec<MatrixEntry> {
        self.matrix
            .entries()
            .into_iter()
            .map(|e| {
                MatrixEntry::new(
                    e.row + self.shape.row_offset,
                    e.col + self.shape.col_offset,
                    e.value,
                )
            })
            .collect()
    }
}
