//! Matrix Storage
//!
//! Minimal dense and sparse matrices used as the storage behind state objects, plus
//! `MatrixPartition`, a node's local slice addressed with global coordinates. Linear
//! algebra beyond element access and element-wise addition is out of scope.

pub mod partition;

pub use partition::MatrixPartition;

/// How matrix state objects are stored in the directory: shared between worker
/// instances and transaction handlers behind a read/write lock.
pub type MatrixState = parking_lot::RwLock<MatrixPartition>;

use crate::error::{Error, Result};
use crate::partition::{Axis, MatrixEntry};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum MatrixFormat {
    #[default]
    Dense,
    Sparse,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum MatrixLayout {
    #[default]
    RowMajor,
    ColumnMajor,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Matrix {
    Dense {
        rows: u64,
        cols: u64,
        layout: MatrixLayout,
        data: Vec<f64>,
    },
    Sparse {
        rows: u64,
        cols: u64,
        entries: BTreeMap<(u64, u64), f64>,
    },
}

impl Matrix {
    pub fn rows(&self) -> u64 {
        match self {
            Matrix::Dense { rows, .. } | Matrix::Sparse { rows, .. } => *rows,
        }
    }

    pub fn cols(&self) -> u64 {
        match self {
            Matrix::Dense { cols, .. } | Matrix::Sparse { cols, .. } => *cols,
        }
    }

    pub fn format(&self) -> MatrixFormat {
        match self {
            Matrix::Dense { .. } => MatrixFormat::Dense,
            Matrix::Sparse { .. } => MatrixFormat::Sparse,
        }
    }

    fn check(&self, row: u64, col: u64) -> Result<()> {
        if row >= self.rows() {
            return Err(Error::InvalidCoordinate {
                axis: Axis::Row,
                value: row,
                start: 0,
                end: self.rows(),
            });
        }
        if col >= self.cols() {
            return Err(Error::InvalidCoordinate {
                axis: Axis::Col,
                value: col,
                start: 0,
                end: self.cols(),
            });
        }
        Ok(())
    }

    fn dense_index(rows: u64, cols: u64, layout: MatrixLayout, row: u64, col: u64) -> usize {
        match layout {
            MatrixLayout::RowMajor => (row * cols + col) as usize,
            MatrixLayout::ColumnMajor => (col * rows + row) as usize,
        }
    }

    pub fn get(&self, row: u64, col: u64) -> Result<f64> {
        self.check(row, col)?;
        Ok(match self {
            Matrix::Dense {
                rows,
                cols,
                layout,
                data,
            } => data[Self::dense_index(*rows, *cols, *layout, row, col)],
            Matrix::Sparse { entries, .. } => entries.get(&(row, col)).copied().unwrap_or(0.0),
        })
    }

    pub fn set(&mut self, row: u64, col: u64, value: f64) -> Result<()> {
        self.check(row, col)?;
        match self {
            Matrix::Dense {
                rows,
                cols,
                layout,
                data,
            } => {
                let index = Self::dense_index(*rows, *cols, *layout, row, col);
                data[index] = value;
            }
            Matrix::Sparse { entries, .. } => {
                if value == 0.0 {
                    entries.remove(&(row, col));
                } else {
                    entries.insert((row, col), value);
                }
            }
        }
        Ok(())
    }

    /// Non-zero entries in row-major order.
    pub fn entries(&self) -> Vec<MatrixEntry> {
        match self {
            Matrix::Dense { rows, cols, layout, data } => {
                let mut out = Vec::new();
                for row in 0..*rows {
                    for col in 0..*cols {
                        let value = data[Self::dense_index(*rows, *cols, *layout, row, col)];
                        if value != 0.0 {
                            out.push(MatrixEntry::new(row, col, value));
                        }
                    }
                }
                out
            }
            Matrix::Sparse { entries, .. } => entries
                .iter()
                .map(|(&(row, col), &value)| MatrixEntry::new(row, col, value))
                .collect(),
        }
    }

    /// Element-wise `self += other`.
    pub fn add_assign(&mut self, other: &Matrix) -> Result<()> {
        if self.rows() != other.rows() || self.cols() != other.cols() {
            return Err(Error::Precondition(format!(
                "cannot add a {}x{} matrix to a {}x{} matrix",
                other.rows(),
                other.cols(),
                self.rows(),
                self.cols()
            )));
        }
        for entry in other.entries() {
            let current = self.get(entry.row, entry.col)?;
            self.set(entry.row, entry.col, current + entry.value)?;
        }
        Ok(())
    }
}

/// Builds an all-zero matrix of the requested dimensions, format and layout.
#[derive(Debug, Clone)]
pub struct MatrixBuilder {
    rows: u64,
    cols: u64,
    format: MatrixFormat,
    layout: MatrixLayout,
}

impl MatrixBuilder {
    pub fn new(rows: u64, cols: u64) -> Self {
        Self {
            rows,
            cols,
            format: MatrixFormat::default(),
            layout: MatrixLayout::default(),
        }
    }

    pub fn format(mut self, format: MatrixFormat) -> Self {
        self.format = format;
        self
    }

    pub fn layout(mut self, layout: MatrixLayout) -> Self {
        self.layout = layout;
        self
    }

    /// Fails when a dense matrix of this shape cannot be addressed on this platform.
    pub fn build(self) -> Result<Matrix> {
        match self.format {
            MatrixFormat::Dense => {
                let len = self
                    .rows
                    .checked_mul(self.cols)
                    .and_then(|len| usize::try_from(len).ok())
                    .ok_or_else(|| {
                        Error::Precondition(format!(
                            "dense {}x{} matrix is too large to allocate",
                            self.rows, self.cols
                        ))
                    })?;
                Ok(Matrix::Dense {
                    rows: self.rows,
                    cols: self.cols,
                    layout: self.layout,
                    data: vec![0.0; len],
                })
            }
            MatrixFormat::Sparse => Ok(Matrix::Sparse {
                rows: self.rows,
                cols: self.cols,
                entries: BTreeMap::new(),
            }),
        }
    }
}
