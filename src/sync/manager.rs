use super::aggregator::Aggregator;
use super::barrier::GlobalBarrier;
use super::filesystem::FileSystemManager;
use super::latch::CountDownLatch;
use super::loading::{LoadTask, Loader};
use super::types::{
    BSP_SYNC_BARRIER_EVENT, BarrierToken, CallType, InstanceContext, JobContext, Tagged,
    pull_event, publish_event, push_event,
};
use crate::cluster::types::NodeId;
use crate::config::SyncConfig;
use crate::directory::{Directory, DirectoryKey, DistributionMode, store::downcast};
use crate::error::{Error, Result, with_timeout};
use crate::transport::{EventDispatcher, ListenerId, Message, NetEvent, Transport};

use anyhow::anyhow;
use dashmap::DashMap;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::any::Any;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

/// The synchronization core of one node.
///
/// Owns the job table, the per-job barrier state and the loading pipeline, and
/// implements every data-plane primitive on top of the transport and the directory.
pub struct DataManager {
    transport: Arc<Transport>,
    directory: Arc<Directory>,
    config: SyncConfig,
    jobs: DashMap<Uuid, Arc<JobContext>>,
    barriers: Arc<DashMap<Uuid, Arc<GlobalBarrier>>>,
    loader: Arc<Loader>,
    barrier_listener: ListenerId,
    requests: AtomicU64,
}

impl DataManager {
    pub fn new(
        transport: Arc<Transport>,
        directory: Arc<Directory>,
        fs: Arc<dyn FileSystemManager>,
        config: SyncConfig,
    ) -> Arc<Self> {
        let barriers: Arc<DashMap<Uuid, Arc<GlobalBarrier>>> = Arc::new(DashMap::new());
        let participants = transport.registry().remote_node_ids();

        // Tokens may arrive before the job is registered here; the barrier state is
        // created by whichever side touches it first.
        let listener_barriers = barriers.clone();
        let barrier_listener = transport.add_listener(BSP_SYNC_BARRIER_EVENT, move |event: NetEvent| {
            let barriers = listener_barriers.clone();
            let participants = participants.clone();
            async move {
                let token: BarrierToken = event.decode()?;
                let barrier = barriers
                    .entry(token.job_uid)
                    .or_insert_with(|| Arc::new(GlobalBarrier::new(token.job_uid, participants)))
                    .value()
                    .clone();
                barrier.record_arrival(event.src_node, token.superstep)?;
                debug!(
                    "Barrier token of job {} superstep {} from node {}",
                    token.job_uid, token.superstep, event.src_node
                );
                Ok(())
            }
        });

        let loader = Loader::new(transport.clone(), directory.clone(), fs, config.clone());

        Arc::new(Self {
            transport,
            directory,
            config,
            jobs: DashMap::new(),
            barriers,
            loader,
            barrier_listener,
            requests: AtomicU64::new(0),
        })
    }

    // ------------------------------------------------------------------
    // Cluster view
    // ------------------------------------------------------------------

    pub fn node_id(&self) -> NodeId {
        self.transport.local_node_id()
    }

    pub fn remote_node_ids(&self) -> Vec<NodeId> {
        self.transport.registry().remote_node_ids()
    }

    pub fn node_ids(&self) -> Vec<NodeId> {
        self.transport.registry().node_ids()
    }

    pub fn number_of_nodes(&self) -> usize {
        self.transport.registry().num_nodes()
    }

    pub fn transport(&self) -> &Arc<Transport> {
        &self.transport
    }

    pub fn directory(&self) -> &Arc<Directory> {
        &self.directory
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    // ------------------------------------------------------------------
    // Jobs
    // ------------------------------------------------------------------

    /// Creates the context of a job with `parallelism` instances on this node.
    pub fn register_job(&self, job_uid: Uuid, parallelism: usize) -> Result<Arc<JobContext>> {
        if parallelism == 0 {
            return Err(Error::Precondition("a job needs at least one instance".to_string()));
        }
        if self.jobs.contains_key(&job_uid) {
            return Err(Error::Precondition(format!("job {} is already registered", job_uid)));
        }

        let participants = self.remote_node_ids();
        let barrier = self
            .barriers
            .entry(job_uid)
            .or_insert_with(|| Arc::new(GlobalBarrier::new(job_uid, participants)))
            .value()
            .clone();
        let job = Arc::new(JobContext::new(job_uid, parallelism, barrier));
        self.jobs.insert(job_uid, job.clone());

        info!("Registered job {} with {} instances", job_uid, parallelism);
        Ok(job)
    }

    pub fn get_job(&self, job_uid: &Uuid) -> Option<Arc<JobContext>> {
        self.jobs.get(job_uid).map(|job| job.value().clone())
    }

    /// Drops the job and its barrier state.
    pub fn unregister_job(&self, job_uid: &Uuid) -> bool {
        self.barriers.remove(job_uid);
        let removed = self.jobs.remove(job_uid).is_some();
        if removed {
            info!("Unregistered job {}", job_uid);
        }
        removed
    }

    pub fn job_count(&self) -> usize {
        self.jobs.len()
    }

    // ------------------------------------------------------------------
    // Typed local state
    // ------------------------------------------------------------------

    pub fn put_object<T: Any + Send + Sync>(&self, name: &str, object: Arc<T>) -> DirectoryKey {
        self.directory.put_object(name, object)
    }

    pub fn get_object<T: Any + Send + Sync>(&self, name: &str) -> Result<Arc<T>> {
        self.directory.get_object(name)
    }

    pub fn remove_object(&self, name: &str) -> bool {
        match self.directory.resolve(name) {
            Some(key) => self.directory.delete(&key),
            None => false,
        }
    }

    // ------------------------------------------------------------------
    // Listeners
    // ------------------------------------------------------------------

    /// Persistent listener for values pushed under `name`.
    pub fn add_data_event_listener<T, F>(&self, name: &str, handler: F) -> ListenerId
    where
        T: DeserializeOwned + Send + 'static,
        F: Fn(NodeId, T) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let handler = Arc::new(handler);
        self.transport.add_listener(&push_event(name), move |event: NetEvent| {
            let handler = handler.clone();
            async move {
                let value: T = event.decode()?;
                handler(event.src_node, value)
            }
        })
    }

    pub fn remove_data_event_listener(&self, name: &str, id: ListenerId) -> bool {
        self.transport.remove_listener(&push_event(name), id)
    }

    /// Runs `handler` on the next `count` values pushed under `name`, then removes it.
    ///
    /// With [`CallType::Sync`] the call returns once all `count` values were
    /// handled; with [`CallType::Async`] it returns right away and the returned
    /// [`EventAwait`] can be waited on later. Values pushed before this call are
    /// not seen.
    pub async fn await_event<T, F>(
        &self,
        call: CallType,
        count: usize,
        name: &str,
        handler: F,
    ) -> Result<EventAwait>
    where
        T: DeserializeOwned + Send + 'static,
        F: Fn(NodeId, T) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let waiter = self.expect_events(&push_event(name), count, move |event: NetEvent| {
            let value: T = event.decode()?;
            handler(event.src_node, value)
        });

        if call == CallType::Sync {
            waiter.wait(self.config.sync_timeout()).await?;
        }
        Ok(waiter)
    }

    /// One-shot listener on a raw event type that removes itself after `count` events.
    pub(crate) fn expect_events<F>(&self, event_type: &str, count: usize, handler: F) -> EventAwait
    where
        F: Fn(NetEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let reserved = AtomicUsize::new(0);
        self.install_await(event_type, count, move |state: &AwaitState, event: NetEvent| {
            if reserved.fetch_add(1, Ordering::SeqCst) >= count {
                return false;
            }
            if let Err(e) = handler(event) {
                state.failure.lock().get_or_insert(e);
            }
            true
        })
    }

    /// One-shot listener that waits for one reply from each node in `from`.
    ///
    /// `handler` returns `Ok(false)` for events that belong to another request;
    /// those are dropped without being counted. Events from nodes outside `from`, or
    /// from nodes that already replied, never reach `handler`.
    pub(crate) fn expect_replies<F>(&self, event_type: &str, from: &[NodeId], handler: F) -> EventAwait
    where
        F: Fn(NetEvent) -> anyhow::Result<bool> + Send + Sync + 'static,
    {
        let pending: HashSet<NodeId> = from.iter().copied().collect();
        let count = pending.len();
        let pending = parking_lot::Mutex::new(pending);

        self.install_await(event_type, count, move |state: &AwaitState, event: NetEvent| {
            let src = event.src_node;
            if !pending.lock().contains(&src) {
                return false;
            }
            match handler(event) {
                Ok(false) => return false,
                Ok(true) => {}
                Err(e) => {
                    state.failure.lock().get_or_insert(e);
                }
            }
            pending.lock().remove(&src)
        })
    }

    /// Registers a listener that counts down once per event `accept` takes.
    fn install_await<A>(&self, event_type: &str, count: usize, accept: A) -> EventAwait
    where
        A: Fn(&AwaitState, NetEvent) -> bool + Send + Sync + 'static,
    {
        let state = Arc::new(AwaitState {
            event_type: event_type.to_string(),
            expected: count,
            latch: CountDownLatch::new(count),
            failure: parking_lot::Mutex::new(None),
            listener: OnceLock::new(),
        });
        let dispatcher = Arc::downgrade(self.transport.dispatcher());

        if count == 0 {
            return EventAwait { state, dispatcher };
        }

        let accept = Arc::new(accept);
        let listener_state = state.clone();
        let listener_dispatcher = dispatcher.clone();
        let id = self.transport.add_listener(event_type, move |event: NetEvent| {
            let state = listener_state.clone();
            let accept = accept.clone();
            let dispatcher = listener_dispatcher.clone();
            async move {
                if accept(&*state, event) && state.latch.count_down() == Some(0) {
                    state.detach(&dispatcher);
                }
                Ok(())
            }
        });

        let _ = state.listener.set(id);
        // The last event may have been handled before the id was stored
        if state.latch.count() == 0 {
            state.detach(&dispatcher);
        }
        EventAwait { state, dispatcher }
    }

    // ------------------------------------------------------------------
    // Push / pull
    // ------------------------------------------------------------------

    /// Sends `value` as a push event for `name` to every target, the local node included.
    pub fn push_to<T: Serialize>(&self, name: &str, value: &T, targets: &[NodeId]) -> Result<()> {
        let message = Message::with_payload(push_event(name), value)?;
        self.transport.send_many(targets, &message)
    }

    pub fn push_to_remotes<T: Serialize>(&self, name: &str, value: &T) -> Result<()> {
        self.push_to(name, value, &self.remote_node_ids())
    }

    /// Answers pull requests for `name` with the value `handler` computes for the
    /// requesting node.
    pub fn register_pull_request_handler<T, F>(&self, name: &str, handler: F) -> ListenerId
    where
        T: Serialize + Send + 'static,
        F: Fn(NodeId) -> anyhow::Result<T> + Send + Sync + 'static,
    {
        let handler = Arc::new(handler);
        let transport = Arc::downgrade(&self.transport);
        let reply_type = push_event(name);

        self.transport.add_listener(&pull_event(name), move |event: NetEvent| {
            let handler = handler.clone();
            let transport = transport.clone();
            let reply_type = reply_type.clone();
            async move {
                let transport = transport
                    .upgrade()
                    .ok_or_else(|| anyhow!("transport shut down before answering a pull"))?;
                let request: u64 = event.decode()?;
                let value = handler(event.src_node)?;
                transport.send(
                    event.src_node,
                    &Message::with_payload(reply_type, &(request, value))?,
                )?;
                Ok(())
            }
        })
    }

    pub fn remove_pull_request_handler(&self, name: &str, id: ListenerId) -> bool {
        self.transport.remove_listener(&pull_event(name), id)
    }

    /// Requests `name` from every node in `nodes` and returns the responses, tagged
    /// with the responding node, in arrival order.
    ///
    /// Each request carries a fresh id that the responder echoes back. Replies to
    /// earlier requests, and plain pushes under `name`, are not counted.
    pub async fn pull_request_tagged<T>(&self, name: &str, nodes: &[NodeId]) -> Result<Vec<Tagged<T>>>
    where
        T: DeserializeOwned + Send + 'static,
    {
        if nodes.is_empty() {
            return Ok(Vec::new());
        }

        let request = self.requests.fetch_add(1, Ordering::SeqCst) + 1;
        let collected: Arc<parking_lot::Mutex<Vec<Tagged<T>>>> =
            Arc::new(parking_lot::Mutex::new(Vec::with_capacity(nodes.len())));
        let sink = collected.clone();
        let waiter = self.expect_replies(&push_event(name), nodes, move |event: NetEvent| {
            match event.decode::<(u64, T)>() {
                Ok((id, value)) if id == request => {
                    sink.lock().push((event.src_node, value));
                    Ok(true)
                }
                Ok((id, _)) => {
                    debug!("Dropping reply to pull request {} (waiting for {})", id, request);
                    Ok(false)
                }
                // Not a pull reply, e.g. a concurrent push_to under the same name
                Err(_) => Ok(false),
            }
        });

        let message = Message::with_payload(pull_event(name), &request)?;
        if let Err(e) = self.transport.send_many(nodes, &message) {
            waiter.cancel();
            return Err(e);
        }
        waiter.wait(self.config.sync_timeout()).await?;

        let responses = std::mem::take(&mut *collected.lock());
        Ok(responses)
    }

    /// Like [`DataManager::pull_request_tagged`] without the tags.
    pub async fn pull_request<T>(&self, name: &str, nodes: &[NodeId]) -> Result<Vec<T>>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let tagged = self.pull_request_tagged(name, nodes).await?;
        Ok(tagged.into_iter().map(|(_, value)| value).collect())
    }

    /// Pulls `name` from `nodes` and folds the values into `dst`, ordered by node id.
    pub async fn pull_merge<T, D, F>(&self, name: &str, nodes: &[NodeId], dst: &mut D, merge: F) -> Result<()>
    where
        T: DeserializeOwned + Send + 'static,
        F: FnOnce(&mut D, Vec<T>) -> anyhow::Result<()>,
    {
        if nodes.is_empty() {
            return Err(Error::MergeOverNothing(name.to_string()));
        }

        let mut tagged = self.pull_request_tagged::<T>(name, nodes).await?;
        if tagged.is_empty() {
            return Err(Error::MergeOverNothing(name.to_string()));
        }
        tagged.sort_by_key(|(node, _)| *node);

        let sources = tagged.into_iter().map(|(_, value)| value).collect();
        merge(dst, sources).map_err(Error::Callback)
    }

    // ------------------------------------------------------------------
    // Publication
    // ------------------------------------------------------------------

    /// Stores `value` as the local partition of `name` and mirrors it to peers that
    /// subscribed to `name`.
    pub fn publish<T>(&self, name: &str, value: T) -> Result<DirectoryKey>
    where
        T: Serialize + Any + Send + Sync,
    {
        let message = Message::with_payload(publish_event(name), &value)?;
        let key = self.directory.resolve_or_register(name, DistributionMode::Distributed);
        self.directory.put(&key, Arc::new(value));
        self.transport.broadcast(&message)?;
        Ok(key)
    }

    /// Records peer publications of `name` in the local directory.
    pub fn subscribe<T>(&self, name: &str) -> ListenerId
    where
        T: DeserializeOwned + Any + Send + Sync,
    {
        let directory = self.directory.clone();
        let name = name.to_string();

        self.transport.add_listener(&publish_event(&name), move |event: NetEvent| {
            let directory = directory.clone();
            let name = name.clone();
            async move {
                let value: T = event.decode()?;
                let key = directory.resolve_or_register(&name, DistributionMode::Distributed);
                directory.put_partition(&key, event.src_node, Arc::new(value));
                Ok(())
            }
        })
    }

    /// Values of `name` already published by `nodes`, in the order of `nodes`.
    pub fn pull_from<T: Any + Send + Sync>(&self, name: &str, nodes: &[NodeId]) -> Result<Vec<Arc<T>>> {
        let key = self
            .directory
            .resolve(name)
            .ok_or_else(|| Error::UnknownName(name.to_string()))?;

        nodes
            .iter()
            .map(|node| {
                let value = self.directory.get_partition(&key, *node).ok_or_else(|| {
                    Error::MissingPartition {
                        name: name.to_string(),
                        node: *node,
                    }
                })?;
                downcast(name, value)
            })
            .collect()
    }

    pub fn pull_from_all<T: Any + Send + Sync>(&self, name: &str) -> Result<Vec<Arc<T>>> {
        self.pull_from(name, &self.node_ids())
    }

    /// Sets up an all-to-all reduction under `name`. Every node must create it.
    pub fn aggregator<T>(&self, name: &str) -> Aggregator<T>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
    {
        Aggregator::new(self.transport.clone(), name, self.config.sync_timeout())
    }

    // ------------------------------------------------------------------
    // Barriers
    // ------------------------------------------------------------------

    /// BSP barrier across all nodes, entered by every instance of the job.
    ///
    /// `staleness` of -1 returns immediately. Otherwise the node waits until every
    /// peer has reached at least `superstep - staleness`, so 0 is a strict barrier.
    pub async fn global_sync(&self, ctx: &InstanceContext, staleness: i64) -> Result<()> {
        if staleness == -1 {
            return Ok(());
        }
        if staleness < -1 {
            return Err(Error::Precondition(format!("invalid staleness {}", staleness)));
        }

        self.local_sync(ctx).await?;

        let mut outcome = Ok(());
        if ctx.is_leader() {
            outcome = self.cross_global_barrier(&ctx.job, staleness as u64).await;
        }

        self.local_sync(ctx).await?;
        outcome
    }

    async fn cross_global_barrier(&self, job: &JobContext, staleness: u64) -> Result<()> {
        let barrier = &job.global_barrier;
        let superstep = barrier.enter();
        let token = BarrierToken {
            job_uid: job.job_uid,
            superstep,
        };
        self.transport
            .broadcast(&Message::with_payload(BSP_SYNC_BARRIER_EVENT, &token)?)?;

        barrier
            .wait_for(superstep.saturating_sub(staleness), self.config.sync_timeout())
            .await?;

        debug!(
            "Node {} crossed superstep {} of job {}",
            self.node_id(),
            superstep,
            job.job_uid
        );
        Ok(())
    }

    /// Barrier among the instances of the job on this node.
    pub async fn local_sync(&self, ctx: &InstanceContext) -> Result<()> {
        with_timeout(
            self.config.sync_timeout(),
            || format!("local barrier of job {}", ctx.job.job_uid),
            async {
                ctx.job.local_barrier.wait().await;
                Ok(())
            },
        )
        .await
    }

    // ------------------------------------------------------------------
    // Loading
    // ------------------------------------------------------------------

    pub fn register_load_task(&self, task: LoadTask) -> Result<()> {
        self.loader.register_task(task)
    }

    /// Streams every registered load task and returns once each resulting
    /// partition is published in the local directory.
    pub async fn load_files_into_dht(&self) -> Result<()> {
        self.loader.load_files_into_dht().await
    }
}

impl Drop for DataManager {
    fn drop(&mut self) {
        self.transport
            .remove_listener(BSP_SYNC_BARRIER_EVENT, self.barrier_listener);
    }
}

struct AwaitState {
    event_type: String,
    expected: usize,
    latch: CountDownLatch,
    failure: parking_lot::Mutex<Option<anyhow::Error>>,
    listener: OnceLock<ListenerId>,
}

impl AwaitState {
    fn detach(&self, dispatcher: &Weak<EventDispatcher>) -> bool {
        match (self.listener.get(), dispatcher.upgrade()) {
            (Some(id), Some(dispatcher)) => dispatcher.remove_listener(&self.event_type, *id),
            _ => false,
        }
    }
}

/// Handle on a counted one-shot listener.
pub struct EventAwait {
    state: Arc<AwaitState>,
    dispatcher: Weak<EventDispatcher>,
}

impl EventAwait {
    /// Waits for the remaining events. On timeout the listener is removed.
    pub async fn wait(&self, timeout: Option<Duration>) -> Result<()> {
        let outcome = with_timeout(
            timeout,
            || {
                format!(
                    "{} of {} '{}' events",
                    self.state.latch.count(),
                    self.state.expected,
                    self.state.event_type
                )
            },
            async {
                self.state.latch.wait().await;
                Ok(())
            },
        )
        .await;

        if let Err(e) = outcome {
            self.cancel();
            return Err(e);
        }

        match self.state.failure.lock().take() {
            Some(e) => Err(Error::Callback(e)),
            None => Ok(()),
        }
    }

    /// Removes the listener before the count is reached.
    pub fn cancel(&self) -> bool {
        self.state.detach(&self.dispatcher)
    }

    pub fn remaining(&self) -> usize {
        self.state.latch.count()
    }

    pub fn is_complete(&self) -> bool {
        self.remaining() == 0
    }
}
