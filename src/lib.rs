//! Distributed Parameter Server Runtime
//!
//! A bulk-synchronous-parallel runtime for iterative matrix workloads. Every node
//! runs the same program over its partition of the shared state; nodes exchange
//! values through named push/pull primitives and align at global barriers.
//!
//! ## Architecture Modules
//!
//! - **`cluster`**: the ordered machine list and the dense `NodeId` space derived from it.
//! - **`partition`**: maps global matrix coordinates to owning nodes and translates
//!   between global and local coordinates.
//! - **`matrix`**: dense and sparse storage behind state objects.
//! - **`transport`**: framed TCP channels between nodes with event dispatch by type tag.
//! - **`directory`**: logical names, partition directories and the locally held values.
//! - **`sync`**: push/pull, listeners, BSP barriers and the partitioned loader.
//! - **`txn`**: declarative push/pull transactions bound to named state.
//! - **`program`**: state declarations and the runner that drives worker units.
//! - **`node`**: wiring of one runtime node.

pub mod cluster;
pub mod config;
pub mod directory;
pub mod error;
pub mod matrix;
pub mod node;
pub mod partition;
pub mod program;
pub mod sync;
pub mod transport;
pub mod txn;

pub use error::{Error, Result};
pub use node::RuntimeNode;

#[cfg(test)]
pub(crate) mod testing;
