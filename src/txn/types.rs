use crate::cluster::types::NodeId;

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionType {
    Push,
    Pull,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionDescriptor {
    pub name: String,
    pub source_states: Vec<String>,
    pub dest_states: Vec<String>,
    pub kind: TransactionType,
    /// Reuse pulled values for `observer_period`.
    pub cache: bool,
    pub observer_period: Duration,
    /// Only this node may commit, when set.
    pub owner_node: Option<NodeId>,
    /// Push targets or pull sources. Empty means every remote node.
    pub participating_nodes: Vec<NodeId>,
}

pub(crate) fn push_event(name: &str) -> String {
    format!("txn_push__{}", name)
}

pub(crate) fn ack_event(name: &str) -> String {
    format!("txn_ack__{}", name)
}

pub(crate) fn pull_event(name: &str) -> String {
    format!("txn_pull__{}", name)
}

pub(crate) fn response_event(name: &str) -> String {
    format!("txn_resp__{}", name)
}

/// Acknowledgement of a push, carrying the remote `update` error if there was one.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct PushAck {
    pub commit: u64,
    pub error: Option<String>,
}
