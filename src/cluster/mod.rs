//! Cluster Membership Registry
//!
//! Holds the fixed, ordered list of machines taking part in a job and maps each
//! machine onto a dense node id in `[0, N)`. The node id is the addressing unit used by
//! every synchronization primitive, so the registry is built once at bootstrap and
//! shared read-only afterwards.
//!
//! ## Submodules
//! - **`types`**: `NodeId` and `MachineDescriptor`.
//! - **`registry`**: `ClusterRegistry`, the descriptor <-> node id mapping.

pub mod registry;
pub mod types;
