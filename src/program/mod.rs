//! Program Model
//!
//! A program is a set of declared state objects plus one worker unit. Setup code
//! assembles it with builders; the [`ProgramRunner`] links the states on the local
//! node and drives `parallelism` instances of the unit.
//!
//! ## Lifecycle
//! 1. **Link**: allocate singleton, replicated and partitioned matrices, and register
//!    load tasks for file-backed ones.
//! 2. **Load**: instance 0 runs the loading pipeline.
//! 3. **Run**: every instance crosses the prologue barrier, runs the unit and crosses
//!    the epilogue barrier.

pub mod runner;
pub mod state;

pub use runner::{Program, ProgramRunner, UnitFn};
pub use state::{PartitionStrategy, Scope, StateBuilder, StateDescriptor};

#[cfg(test)]
mod tests;
