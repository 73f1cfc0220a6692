//! Error taxonomy shared by every runtime component.
//!
//! Precondition violations are programmer errors and fail fast. Protocol-state
//! violations abort the operation that observed them. Network and I/O failures are
//! surfaced to the caller instead of being retried behind its back.

use crate::cluster::types::NodeId;
use crate::partition::types::Axis;

use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("precondition violated: {0}")]
    Precondition(String),

    #[error("invalid {axis} coordinate {value}, valid range is {start}..{end}")]
    InvalidCoordinate {
        axis: Axis,
        value: u64,
        start: u64,
        end: u64,
    },

    #[error("unknown node {0}")]
    UnknownNode(NodeId),

    #[error("node {0} is not connected")]
    NotConnected(NodeId),

    #[error("channel to node {0} is closed")]
    ChannelClosed(NodeId),

    #[error("failed to connect to {address}: {source}")]
    Connect {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("frame of {0} bytes exceeds the frame limit")]
    FrameTooLarge(usize),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Codec(#[from] bincode::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("line {line}: {message}")]
    Parse { line: u64, message: String },

    #[error("name '{0}' is already registered")]
    NameTaken(String),

    #[error("unknown name '{0}'")]
    UnknownName(String),

    #[error("'{name}' already has a partition directory entry for node {node}")]
    DuplicatePartition { name: String, node: NodeId },

    #[error("no partition of '{name}' is published by node {node}")]
    MissingPartition { name: String, node: NodeId },

    #[error("no partition covers segment {0}")]
    UnknownSegment(u64),

    #[error("object '{0}' is stored with a different type")]
    TypeMismatch(String),

    #[error("merge of '{0}' received no source values")]
    MergeOverNothing(String),

    #[error("barrier of job {job} woke up with {remaining} arrivals missing")]
    BarrierInconsistent { job: Uuid, remaining: usize },

    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("timed out after {0:?} waiting for {1}")]
    Timeout(Duration, String),

    #[error("transaction '{name}' failed on node {node}: {message}")]
    TransactionFailed {
        name: String,
        node: NodeId,
        message: String,
    },

    #[error("callback failed: {0:#}")]
    Callback(anyhow::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("worker {thread} failed: {message}")]
    Worker { thread: usize, message: String },
}

pub type Result<T> = std::result::Result<T, Error>;

/// Runs `future` under an optional deadline, mapping expiry to [`Error::Timeout`].
pub(crate) async fn with_timeout<F, T>(
    timeout: Option<Duration>,
    what: impl FnOnce() -> String,
    future: F,
) -> Result<T>
where
    F: std::future::Future<Output = Result<T>>,
{
    match timeout {
        Some(limit) => match tokio::time::timeout(limit, future).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(limit, what())),
        },
        None => future.await,
    }
}
