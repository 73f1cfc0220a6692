use crate::cluster::types::NodeId;
use crate::error::{Error, Result, with_timeout};

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Notify;
use uuid::Uuid;

/// Cross-node barrier state of one job.
///
/// Supersteps are numbered from 1. Each peer's tokens arrive over one ordered
/// channel, so the highest superstep seen per peer grows by exactly one per token.
#[derive(Debug)]
pub struct GlobalBarrier {
    job_uid: Uuid,
    participants: Vec<NodeId>,
    arrivals: parking_lot::Mutex<HashMap<NodeId, u64>>,
    superstep: AtomicU64,
    notify: Notify,
}

impl GlobalBarrier {
    pub fn new(job_uid: Uuid, participants: Vec<NodeId>) -> Self {
        Self {
            job_uid,
            participants,
            arrivals: parking_lot::Mutex::new(HashMap::new()),
            superstep: AtomicU64::new(0),
            notify: Notify::new(),
        }
    }

    /// Supersteps this node has entered so far.
    pub fn superstep(&self) -> u64 {
        self.superstep.load(Ordering::SeqCst)
    }

    pub(crate) fn enter(&self) -> u64 {
        self.superstep.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Highest superstep `node` has announced.
    pub fn arrived(&self, node: NodeId) -> u64 {
        self.arrivals.lock().get(&node).copied().unwrap_or(0)
    }

    pub fn record_arrival(&self, node: NodeId, superstep: u64) -> Result<()> {
        if !self.participants.contains(&node) {
            return Err(Error::Protocol(format!(
                "node {} is not a participant of job {}",
                node, self.job_uid
            )));
        }

        {
            let mut arrivals = self.arrivals.lock();
            let last = arrivals.entry(node).or_insert(0);
            if superstep != *last + 1 {
                return Err(Error::Protocol(format!(
                    "barrier token of node {} for job {} jumped from superstep {} to {}",
                    node, self.job_uid, *last, superstep
                )));
            }
            *last = superstep;
        }

        self.notify.notify_waiters();
        Ok(())
    }

    /// Participants that have not reached `superstep` yet.
    pub fn remaining(&self, superstep: u64) -> usize {
        let arrivals = self.arrivals.lock();
        self.participants
            .iter()
            .filter(|node| arrivals.get(node).copied().unwrap_or(0) < superstep)
            .count()
    }

    /// Waits until every participant has reached `superstep`.
    pub async fn wait_for(&self, superstep: u64, timeout: Option<Duration>) -> Result<()> {
        if superstep == 0 {
            return Ok(());
        }

        with_timeout(
            timeout,
            || {
                format!(
                    "{} nodes at the barrier of job {} (superstep {})",
                    self.remaining(superstep),
                    self.job_uid,
                    superstep
                )
            },
            async {
                loop {
                    let notified = self.notify.notified();
                    tokio::pin!(notified);
                    notified.as_mut().enable();

                    if self.remaining(superstep) == 0 {
                        return Ok(());
                    }
                    notified.await;
                }
            },
        )
        .await?;

        let remaining = self.remaining(superstep);
        if remaining != 0 {
            return Err(Error::BarrierInconsistent {
                job: self.job_uid,
                remaining,
            });
        }
        Ok(())
    }
}
