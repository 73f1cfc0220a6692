use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Range;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Axis {
    Row,
    Col,
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Axis::Row => write!(f, "row"),
            Axis::Col => write!(f, "col"),
        }
    }
}

/// A node's local allocation size and its position in the global coordinate space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionShape {
    pub rows: u64,
    pub cols: u64,
    pub row_offset: u64,
    pub col_offset: u64,
}

impl PartitionShape {
    pub fn new(rows: u64, cols: u64, row_offset: u64, col_offset: u64) -> Self {
        Self {
            rows,
            cols,
            row_offset,
            col_offset,
        }
    }

    /// Shape covering a whole `rows x cols` matrix.
    pub fn full(rows: u64, cols: u64) -> Self {
        Self::new(rows, cols, 0, 0)
    }

    pub fn row_range(&self) -> Range<u64> {
        self.row_offset..self.row_offset + self.rows
    }

    pub fn col_range(&self) -> Range<u64> {
        self.col_offset..self.col_offset + self.cols
    }

    pub fn contains(&self, row: u64, col: u64) -> bool {
        self.row_range().contains(&row) && self.col_range().contains(&col)
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0 || self.cols == 0
    }
}

/// Immutable `(row, col, value)` triple, the form placed on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MatrixEntry {
    pub row: u64,
    pub col: u64,
    pub value: f64,
}

impl MatrixEntry {
    pub fn new(row: u64, col: u64, value: f64) -> Self {
        Self { row, col, value }
    }

    /// True when the entry lies inside a `rows x cols` matrix.
    pub fn is_within(&self, rows: u64, cols: u64) -> bool {
        self.row < rows && self.col < cols
    }
}

/// Reusable entry for the parsing hot path; one instance is overwritten per record.
#[derive(Debug, Default, Clone)]
pub struct MutableMatrixEntry {
    row: u64,
    col: u64,
    value: f64,
}

impl MutableMatrixEntry {
    pub fn set(&mut self, row: u64, col: u64, value: f64) -> &mut Self {
        self.row = row;
        self.col = col;
        self.value = value;
        self
    }

    pub fn row(&self) -> u64 {
        self.row
    }

    pub fn col(&self) -> u64 {
        self.col
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn freeze(&self) -> MatrixEntry {
        MatrixEntry::new(self.row, self.col, self.value)
    }
}
