use super::types::aggregate_event;
use crate::cluster::types::NodeId;
use crate::error::{Error, Result, with_timeout};
use crate::transport::{ListenerId, Message, NetEvent, Transport};

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::debug;

struct RoundTable<T> {
    /// Highest round that completed or timed out locally.
    settled: u64,
    partials: HashMap<u64, Vec<(NodeId, T)>>,
}

struct Rounds<T> {
    table: parking_lot::Mutex<RoundTable<T>>,
    notify: Notify,
}

impl<T> Rounds<T> {
    /// Returns false when `round` is already settled and the partial was dropped.
    fn record(&self, round: u64, node: NodeId, value: T) -> bool {
        {
            let mut table = self.table.lock();
            if round <= table.settled {
                return false;
            }
            table.partials.entry(round).or_default().push((node, value));
        }
        self.notify.notify_waiters();
        true
    }

    fn collected(&self, round: u64) -> usize {
        self.table
            .lock()
            .partials
            .get(&round)
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Closes `round` and hands back whatever was collected for it.
    fn settle(&self, round: u64) -> Vec<(NodeId, T)> {
        let mut table = self.table.lock();
        table.settled = table.settled.max(round);
        table.partials.remove(&round).unwrap_or_default()
    }

    fn open_rounds(&self) -> usize {
        self.table.lock().partials.len()
    }
}

/// All-to-all reduction under a fixed name.
///
/// Each node contributes one partial value per round; every node then folds all
/// partials in node id order, so all nodes compute the same result. Rounds are
/// numbered locally, so exactly one caller per node may drive `apply`.
pub struct Aggregator<T> {
    name: String,
    transport: Arc<Transport>,
    rounds: Arc<Rounds<T>>,
    round: AtomicU64,
    timeout: Option<Duration>,
    listener: ListenerId,
}

impl<T> Aggregator<T>
where
    T: Serialize + DeserializeOwned + Send + 'static,
{
    pub(crate) fn new(transport: Arc<Transport>, name: &str, timeout: Option<Duration>) -> Self {
        let rounds: Arc<Rounds<T>> = Arc::new(Rounds {
            table: parking_lot::Mutex::new(RoundTable {
                settled: 0,
                partials: HashMap::new(),
            }),
            notify: Notify::new(),
        });

        let listener_rounds = rounds.clone();
        let listener = transport.add_listener(&aggregate_event(name), move |event: NetEvent| {
            let rounds = listener_rounds.clone();
            async move {
                let (round, value): (u64, T) = event.decode()?;
                if !rounds.record(round, event.src_node, value) {
                    debug!("Dropping late partial of round {} from node {}", round, event.src_node);
                }
                Ok(())
            }
        });

        Self {
            name: name.to_string(),
            transport,
            rounds,
            round: AtomicU64::new(0),
            timeout,
            listener,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Rounds holding partials that no local `apply` has settled yet.
    pub fn open_rounds(&self) -> usize {
        self.rounds.open_rounds()
    }

    /// Contributes `partial` to the next round and applies `reduce` to every node's
    /// partial, sorted by node id.
    pub async fn apply<R, F>(&self, partial: T, reduce: F) -> Result<R>
    where
        F: FnOnce(Vec<T>) -> anyhow::Result<R>,
    {
        let round = self.round.fetch_add(1, Ordering::SeqCst) + 1;
        let nodes = self.transport.registry().num_nodes();

        self.transport.broadcast(&Message::with_payload(
            aggregate_event(&self.name),
            &(round, &partial),
        )?)?;
        self.rounds
            .record(round, self.transport.local_node_id(), partial);

        let waited = with_timeout(
            self.timeout,
            || {
                format!(
                    "{} of {} partials of '{}' round {}",
                    nodes.saturating_sub(self.rounds.collected(round)),
                    nodes,
                    self.name,
                    round
                )
            },
            async {
                loop {
                    let notified = self.rounds.notify.notified();
                    tokio::pin!(notified);
                    notified.as_mut().enable();

                    if self.rounds.collected(round) >= nodes {
                        return Ok(());
                    }
                    notified.await;
                }
            },
        )
        .await;

        let mut partials = self.rounds.settle(round);
        waited?;
        partials.sort_by_key(|(node, _)| *node);

        reduce(partials.into_iter().map(|(_, value)| value).collect()).map_err(Error::Callback)
    }
}

impl<T> Drop for Aggregator<T> {
    fn drop(&mut self) {
        self.transport
            .remove_listener(&aggregate_event(&self.name), self.listener);
    }
}
