//! Input files for the loading pipeline.

use crate::cluster::types::NodeId;
use crate::error::{Error, Result};
use crate::partition::{MatrixEntry, MutableMatrixEntry};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::ops::Range;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum RecordFormat {
    /// One `row,col,value` triple per line.
    #[default]
    RowColVal,
    /// One matrix row per line; the row index is the line number.
    Row,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    Entry(MatrixEntry),
    Row { row: u64, values: Vec<f64> },
}

impl Record {
    /// Number of matrix entries the record carries.
    pub fn len(&self) -> usize {
        match self {
            Record::Entry(_) => 1,
            Record::Row { values, .. } => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Writes entry `i` into `entry`, reusing it across the record.
    pub fn fill(&self, i: usize, entry: &mut MutableMatrixEntry) -> bool {
        match self {
            Record::Entry(e) if i == 0 => {
                entry.set(e.row, e.col, e.value);
                true
            }
            Record::Row { row, values } => match values.get(i) {
                Some(value) => {
                    entry.set(*row, i as u64, *value);
                    true
                }
                None => false,
            },
            _ => false,
        }
    }

    pub fn parse(line: &str, line_no: u64, format: RecordFormat) -> Result<Record> {
        let fields: Vec<&str> = line
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|field| !field.is_empty())
            .collect();

        let parse_error = |message: String| Error::Parse {
            line: line_no,
            message,
        };

        match format {
            RecordFormat::RowColVal => {
                if fields.len() != 3 {
                    return Err(parse_error(format!(
                        "expected 'row,col,value', found {} fields",
                        fields.len()
                    )));
                }
                let row = fields[0]
                    .parse::<u64>()
                    .map_err(|e| parse_error(format!("row '{}': {}", fields[0], e)))?;
                let col = fields[1]
                    .parse::<u64>()
                    .map_err(|e| parse_error(format!("column '{}': {}", fields[1], e)))?;
                let value = fields[2]
                    .parse::<f64>()
                    .map_err(|e| parse_error(format!("value '{}': {}", fields[2], e)))?;
                Ok(Record::Entry(MatrixEntry::new(row, col, value)))
            }
            RecordFormat::Row => {
                let values = fields
                    .iter()
                    .map(|field| {
                        field
                            .parse::<f64>()
                            .map_err(|e| parse_error(format!("value '{}': {}", field, e)))
                    })
                    .collect::<Result<Vec<f64>>>()?;
                Ok(Record::Row {
                    row: line_no,
                    values,
                })
            }
        }
    }
}

pub type RecordIterator = Box<dyn Iterator<Item = Result<Record>> + Send>;

/// File access used by the loader. Each node only reads its own split of every
/// registered file.
pub trait FileSystemManager: Send + Sync {
    fn register_file(&self, path: &Path, format: RecordFormat) -> Result<()>;

    fn compute_input_splits_for_registered_files(&self) -> Result<()>;

    /// Iterates the local split of `path`.
    fn create_file_iterator(&self, path: &Path, format: RecordFormat) -> Result<RecordIterator>;
}

/// Files on a file system every node can see. Each file's lines are cut into one
/// contiguous range per node; the last node reads the remainder.
pub struct LocalFileSystemManager {
    node: NodeId,
    num_nodes: usize,
    files: parking_lot::Mutex<Vec<(PathBuf, RecordFormat)>>,
    splits: DashMap<PathBuf, Range<u64>>,
}

impl LocalFileSystemManager {
    pub fn new(node: NodeId, num_nodes: usize) -> Self {
        Self {
            node,
            num_nodes: num_nodes.max(1),
            files: parking_lot::Mutex::new(Vec::new()),
            splits: DashMap::new(),
        }
    }

    pub fn split_of(&self, path: &Path) -> Option<Range<u64>> {
        self.splits.get(path).map(|range| range.clone())
    }

    fn count_lines(path: &Path) -> Result<u64> {
        let reader = BufReader::new(File::open(path)?);
        let mut lines = 0;
        for line in reader.lines() {
            line?;
            lines += 1;
        }
        Ok(lines)
    }
}

impl FileSystemManager for LocalFileSystemManager {
    fn register_file(&self, path: &Path, format: RecordFormat) -> Result<()> {
        let mut files = self.files.lock();
        if !files.iter().any(|(registered, _)| registered == path) {
            files.push((path.to_path_buf(), format));
        }
        Ok(())
    }

    fn compute_input_splits_for_registered_files(&self) -> Result<()> {
        let files: Vec<PathBuf> = self.files.lock().iter().map(|(path, _)| path.clone()).collect();

        for path in files {
            let lines = Self::count_lines(&path)?;
            let per_node = lines / self.num_nodes as u64;
            let start = per_node * self.node.index() as u64;
            let end = if self.node.index() + 1 == self.num_nodes {
                lines
            } else {
                start + per_node
            };

            tracing::debug!(
                "Node {} reads lines {}..{} of {}",
                self.node,
                start,
                end,
                path.display()
            );
            self.splits.insert(path, start..end);
        }
        Ok(())
    }

    fn create_file_iterator(&self, path: &Path, format: RecordFormat) -> Result<RecordIterator> {
        let split = self.split_of(path).ok_or_else(|| {
            Error::Precondition(format!("no input split computed for {}", path.display()))
        })?;

        let reader = BufReader::new(File::open(path)?);
        let records = reader
            .lines()
            .enumerate()
            .skip(split.start as usize)
            .take((split.end - split.start) as usize)
            .filter_map(move |(line_no, line)| match line {
                Ok(line) if line.trim().is_empty() => None,
                Ok(line) => Some(Record::parse(&line, line_no as u64, format)),
                Err(e) => Some(Err(Error::Io(e))),
            });

        Ok(Box::new(records))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_row_col_val() {
        let record = Record::parse("7, 2, 1.5", 0, RecordFormat::RowColVal).unwrap();

        assert_eq!(record, Record::Entry(MatrixEntry::new(7, 2, 1.5)));
    }

    #[test]
    fn test_parse_row_uses_line_number() {
        let record = Record::parse("1 2 3", 4, RecordFormat::Row).unwrap();
        let mut entry = MutableMatrixEntry::default();

        assert_eq!(record.len(), 3);
        assert!(record.fill(2, &mut entry));
        assert_eq!((entry.row(), entry.col(), entry.value()), (4, 2, 3.0));
        assert!(!record.fill(3, &mut entry));
    }

    #[test]
    fn test_parse_error_carries_line() {
        let result = Record::parse("1,x,2", 9, RecordFormat::RowColVal);

        assert!(matches!(result, Err(Error::Parse { line: 9, .. })));
    }
}
