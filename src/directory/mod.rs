//! Directory / Distributed Object Table
//!
//! Maps logical object names to globally unique keys, and each key to its partition
//! directory (`NodeId -> PartitionDescriptor`). The directory also stores the values
//! that back each name.
//!
//! ## Storage Model
//! - **Local slot**: `put`/`get`/`delete` only touch the partition owned by the local node.
//! - **Published slots**: values other nodes announced through the synchronization core.
//!   They are read by `pull_from` without a network round-trip.
//!
//! Cross-node reads never go through the directory directly; the synchronization core
//! decides what is mirrored here.

pub mod store;
pub mod types;

pub use store::{Directory, StateValue};
pub use types::{DirectoryKey, DistributionMode, PartitionDescriptor};

#[cfg(test)]
mod tests;
