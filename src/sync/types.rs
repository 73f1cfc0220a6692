use super::barrier::GlobalBarrier;
use crate::cluster::types::NodeId;

use serde::{Deserialize, Serialize};
use std::ops::Range;
use std::sync::Arc;
use uuid::Uuid;

/// Barrier-arrival token tag.
pub const BSP_SYNC_BARRIER_EVENT: &str = "bsp_sync_barrier_event";
/// A batch of loaded entries forwarded to the owning node.
pub const MATRIX_ENTRY_PARTITION_EVENT: &str = "MATRIX_ENTRY_PARTITION_EVENT";
/// A node finished streaming one load task.
pub const FINISHED_LOADING_FILE_EVENT: &str = "FINISHED_LOADING_FILE_EVENT";

pub fn push_event(name: &str) -> String {
    format!("push__{}", name)
}

pub fn pull_event(name: &str) -> String {
    format!("pull__{}", name)
}

pub fn publish_event(name: &str) -> String {
    format!("publish__{}", name)
}

pub fn aggregate_event(name: &str) -> String {
    format!("aggregate__{}", name)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallType {
    /// Block until every expected event has been handled.
    Sync,
    /// Return right away; the listener keeps counting in the background.
    Async,
}

/// Payload of a barrier-arrival token.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BarrierToken {
    pub job_uid: Uuid,
    pub superstep: u64,
}

/// One running program instance on this node.
#[derive(Debug)]
pub struct JobContext {
    pub job_uid: Uuid,
    pub per_node_parallelism: usize,
    pub(crate) global_barrier: Arc<GlobalBarrier>,
    pub(crate) local_barrier: tokio::sync::Barrier,
}

impl JobContext {
    pub(crate) fn new(job_uid: Uuid, per_node_parallelism: usize, global_barrier: Arc<GlobalBarrier>) -> Self {
        Self {
            job_uid,
            per_node_parallelism,
            global_barrier,
            local_barrier: tokio::sync::Barrier::new(per_node_parallelism),
        }
    }

    pub fn global_barrier(&self) -> &GlobalBarrier {
        &self.global_barrier
    }

    pub fn instance(self: &Arc<Self>, thread_id: usize) -> InstanceContext {
        InstanceContext {
            thread_id,
            job: self.clone(),
        }
    }
}

/// Binds one worker instance to its job. Passed explicitly into every
/// synchronization call.
#[derive(Debug, Clone)]
pub struct InstanceContext {
    pub thread_id: usize,
    pub job: Arc<JobContext>,
}

impl InstanceContext {
    pub fn job_uid(&self) -> Uuid {
        self.job.job_uid
    }

    /// Instance 0 does the node's network work at barriers and during loading.
    pub fn is_leader(&self) -> bool {
        self.thread_id == 0
    }

    /// This instance's share of `total_rows`. The last instance takes the remainder.
    pub fn row_range(&self, total_rows: u64) -> Range<u64> {
        let instances = self.job.per_node_parallelism.max(1) as u64;
        let per_instance = total_rows / instances;
        let start = per_instance * self.thread_id as u64;
        if self.thread_id as u64 + 1 == instances {
            start..total_rows
        } else {
            start..start + per_instance
        }
    }
}

/// Tags a value with the node that produced it.
pub type Tagged<T> = (NodeId, T);
