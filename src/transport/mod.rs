//! Message Transport Module
//!
//! Asynchronous peer-to-peer messaging between cluster nodes over TCP.
//!
//! ## Architecture Overview
//! - **Connection table**: `NodeId -> channel`. Each channel has a single writer task,
//!   so events between an ordered pair of nodes arrive in send order. If both nodes
//!   connect to each other at the same time, the channel registered first wins and
//!   every later send uses it.
//! - **Framing**: every `NetEvent` is sent as a 4-byte little-endian length followed by
//!   its `bincode` encoding.
//! - **Dispatch**: inbound events are demultiplexed by their string type tag onto the
//!   handlers registered in the `EventDispatcher`. Handlers run on the transport's reader
//!   tasks, one event at a time per channel, so they must not wait on other network
//!   events.
//! - **Handshake**: the first frame on a new connection is the reserved channel-connected
//!   event. The transport consumes it to register the peer, and it never reaches
//!   user handlers.
//!
//! ## Submodules
//! - **`event`**: the `NetEvent` envelope and outbound `Message`.
//! - **`codec`**: length-prefixed frame encoding.
//! - **`dispatcher`**: the type-tag -> handler registry.
//! - **`manager`**: `Transport`, the connection table plus send/broadcast operations.

pub mod codec;
pub mod dispatcher;
pub mod event;
pub mod manager;

pub use dispatcher::{EventDispatcher, ListenerId};
pub use event::{Message, NetEvent};
pub use manager::{RetryPolicy, Transport};

#[cfg(test)]
mod tests;
