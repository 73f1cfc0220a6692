//! Synchronization Core
//!
//! The operational heart of a node. Every primitive a worker unit uses to exchange
//! state with the rest of the cluster lives here, keyed by a logical name that all
//! nodes agree on through program structure.
//!
//! ## Primitives
//! - **Push/pull**: `push_to` sends values as `push__<name>` events. `pull_request` asks
//!   remote pull handlers for values. `pull_from` reads values already published into
//!   the directory.
//! - **Merge**: `pull_merge` folds pulled values in node id order, so the result does not
//!   depend on network arrival order.
//! - **Listeners**: persistent data listeners and counted one-shot `await_event` waits.
//! - **Barriers**: `global_sync` runs the BSP barrier, with optional bounded staleness.
//!   `local_sync` aligns the worker instances of one node.
//! - **Loading**: the partitioned file loader that fills matrix state objects before a
//!   job starts.
//!
//! Blocking primitives are `async` and suspend only the calling task. They must not be
//! awaited from inside an event handler: handlers run on the transport's reader tasks,
//! so a handler that waits for another event would stall the channel that delivers it.

pub mod aggregator;
pub mod barrier;
pub mod filesystem;
pub mod latch;
pub mod loading;
pub mod manager;
pub mod types;

pub use aggregator::Aggregator;
pub use filesystem::{FileSystemManager, LocalFileSystemManager, Record, RecordFormat};
pub use loading::LoadTask;
pub use manager::{DataManager, EventAwait};
pub use types::{CallType, InstanceContext, JobContext};
