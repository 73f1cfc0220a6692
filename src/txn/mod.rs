//! Transaction Protocol
//!
//! Declarative synchronization rules bound to named state objects. A transaction
//! is declared once on every node with a [`TransactionBuilder`] and a
//! [`TransactionDefinition`], registered with the [`TransactionManager`], and
//! committed by name from worker units.
//!
//! ## Transaction Types
//! - **Push**: the committing node sends the current value of its source states to
//!   the participating nodes, which fold it into their destination states with
//!   `update` and acknowledge. A failed remote `update` fails the commit.
//! - **Pull**: the committing node asks the participating nodes for their source
//!   states. Each remote optionally reduces its values with `combine` before
//!   replying; the replies, ordered by node id, are folded into the local
//!   destination states with `update`. With caching enabled, commits within the
//!   observer period reuse the last replies.
//!
//! State objects are stored in the directory as `Arc<parking_lot::RwLock<T>>`.

pub mod builder;
pub mod controller;
pub mod manager;
pub mod types;

pub use builder::{TransactionBuilder, TransactionDefinition};
pub use controller::{Transaction, TransactionController};
pub use manager::TransactionManager;
pub use types::{TransactionDescriptor, TransactionType};
