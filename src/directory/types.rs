use crate::cluster::types::{MachineDescriptor, NodeId};
use crate::error::{Error, Result};
use crate::partition::PartitionShape;

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DistributionMode {
    /// Held only by the node that registered it.
    Local,
    /// Split across nodes; the partition directory says who owns what.
    Distributed,
}

/// One node's contiguous share of a distributed object.
///
/// Offsets and sizes count rows. Segments are fixed-size row blocks numbered
/// consecutively across partitions in node order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionDescriptor {
    pub partition_index: u32,
    pub partition_size: u64,
    pub global_offset: u64,
    pub segment_base_index: u64,
    pub number_of_segments: u64,
    pub segment_size: u64,
    pub owner: MachineDescriptor,
}

impl PartitionDescriptor {
    /// Descriptors for every partition of an object, in node order.
    ///
    /// `shapes` and `owners` are indexed by node id. Every node computes the same
    /// layout from the same partitioner.
    pub fn layout(
        shapes: &[PartitionShape],
        owners: &[MachineDescriptor],
        segment_size: u64,
    ) -> Result<Vec<PartitionDescriptor>> {
        if shapes.len() != owners.len() {
            return Err(Error::Precondition(format!(
                "{} partition shapes for {} owners",
                shapes.len(),
                owners.len()
            )));
        }
        if segment_size == 0 {
            return Err(Error::Precondition("segment size must be positive".to_string()));
        }

        let mut next_segment = 0;
        let descriptors = shapes
            .iter()
            .zip(owners)
            .enumerate()
            .map(|(index, (shape, owner))| {
                let number_of_segments = shape.rows.div_ceil(segment_size);
                let descriptor = PartitionDescriptor {
                    partition_index: index as u32,
                    partition_size: shape.rows,
                    global_offset: shape.row_offset,
                    segment_base_index: next_segment,
                    number_of_segments,
                    segment_size,
                    owner: owner.clone(),
                };
                next_segment += number_of_segments;
                descriptor
            })
            .collect();

        Ok(descriptors)
    }

    pub fn contains_segment(&self, segment: u64) -> bool {
        segment >= self.segment_base_index
            && segment < self.segment_base_index + self.number_of_segments
    }

    pub fn contains_row(&self, row: u64) -> bool {
        row >= self.global_offset && row < self.global_offset + self.partition_size
    }
}

/// Globally unique handle of a named object plus its partition directory.
///
/// Equality and ordering use `uid` only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryKey {
    pub uid: Uuid,
    pub name: String,
    pub mode: DistributionMode,
    partition_directory: BTreeMap<NodeId, PartitionDescriptor>,
}

impl DirectoryKey {
    pub fn new(name: &str, mode: DistributionMode) -> Self {
        Self {
            uid: Uuid::new_v4(),
            name: name.to_string(),
            mode,
            partition_directory: BTreeMap::new(),
        }
    }

    /// Appends a partition. A node may only be entered once.
    pub fn add_partition_directory_entry(
        &mut self,
        node: NodeId,
        descriptor: PartitionDescriptor,
    ) -> Result<()> {
        if self.partition_directory.contains_key(&node) {
            return Err(Error::DuplicatePartition {
                name: self.name.clone(),
                node,
            });
        }
        if let Some(existing) = self
            .partition_directory
            .values()
            .find(|d| d.partition_index == descriptor.partition_index)
        {
            return Err(Error::Protocol(format!(
                "partition index {} of '{}' is already owned by {}",
                descriptor.partition_index, self.name, existing.owner
            )));
        }
        self.partition_directory.insert(node, descriptor);
        Ok(())
    }

    pub fn partition_descriptor(&self, node: NodeId) -> Option<&PartitionDescriptor> {
        self.partition_directory.get(&node)
    }

    pub fn partition_directory(&self) -> &BTreeMap<NodeId, PartitionDescriptor> {
        &self.partition_directory
    }

    pub fn owner_of_segment(&self, segment: u64) -> Result<&MachineDescriptor> {
        self.partition_directory
            .values()
            .find(|descriptor| descriptor.contains_segment(segment))
            .map(|descriptor| &descriptor.owner)
            .ok_or(Error::UnknownSegment(segment))
    }

    pub fn segment_of_row(&self, row: u64) -> Result<u64> {
        self.partition_directory
            .values()
            .find(|descriptor| descriptor.contains_row(row))
            .map(|d| d.segment_base_index + (row - d.global_offset) / d.segment_size)
            .ok_or_else(|| {
                Error::Protocol(format!("no partition of '{}' holds row {}", self.name, row))
            })
    }

    /// True when the partitions cover `0..rows` without gaps or overlaps.
    pub fn covers_rows(&self, rows: u64) -> bool {
        let mut ranges: Vec<(u64, u64)> = self
            .partition_directory
            .values()
            .map(|d| (d.global_offset, d.partition_size))
            .collect();
        ranges.sort();

        let mut next = 0;
        for (offset, size) in ranges {
            if offset != next {
                return false;
            }
            next += size;
        }
        next == rows
    }
}

impl PartialEq for DirectoryKey {
    fn eq(&self, other: &Self) -> bool {
        self.uid == other.uid
    }
}

impl Eq for DirectoryKey {}

impl PartialOrd for DirectoryKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DirectoryKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.uid.cmp(&other.uid)
    }
}
