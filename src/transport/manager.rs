use super::codec::{read_frame, write_frame};
use super::dispatcher::{EventDispatcher, ListenerId};
use super::event::{CHANNEL_CONNECTED_EVENT, Message, NetEvent};
use crate::cluster::registry::ClusterRegistry;
use crate::cluster::types::{MachineDescriptor, NodeId};
use crate::error::{Error, Result, with_timeout};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Notify, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// How `connect_to` retries a peer that is not reachable yet.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub attempts: usize,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub connect_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 10,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

struct PeerChannel {
    tx: mpsc::UnboundedSender<NetEvent>,
}

struct Shared {
    registry: Arc<ClusterRegistry>,
    dispatcher: Arc<EventDispatcher>,
    peers: DashMap<NodeId, PeerChannel>,
    peer_change: Notify,
}

impl Shared {
    fn register_inbound(&self, src: NodeId, writer: OwnedWriteHalf) {
        if !self.registry.contains(src) {
            warn!("Ignoring handshake from unknown node {}", src);
            return;
        }

        match self.peers.entry(src) {
            Entry::Occupied(_) => {
                debug!("Channel to node {} already registered, keeping it", src);
            }
            Entry::Vacant(slot) => {
                slot.insert(spawn_writer(src, writer));
                info!("Node {} connected", src);
            }
        }
        self.peer_change.notify_waiters();
    }
}

/// The node's endpoint: connection table, outbound sends and inbound dispatch.
pub struct Transport {
    shared: Arc<Shared>,
    local_tx: mpsc::UnboundedSender<NetEvent>,
    retry: RetryPolicy,
    local_addr: SocketAddr,
    tasks: parking_lot::Mutex<Vec<JoinHandle<()>>>,
}

impl Transport {
    /// Binds the local machine's `host:port` and starts accepting peers.
    pub async fn bind(registry: Arc<ClusterRegistry>, retry: RetryPolicy) -> Result<Arc<Self>> {
        let machine = registry.local_machine().clone();
        let listener = TcpListener::bind((machine.host.as_str(), machine.port)).await?;
        Self::with_listener(registry, listener, retry)
    }

    /// Starts the transport on an already bound listener.
    pub fn with_listener(
        registry: Arc<ClusterRegistry>,
        listener: TcpListener,
        retry: RetryPolicy,
    ) -> Result<Arc<Self>> {
        let local_addr = listener.local_addr()?;
        let shared = Arc::new(Shared {
            registry,
            dispatcher: EventDispatcher::new(),
            peers: DashMap::new(),
            peer_change: Notify::new(),
        });

        let (local_tx, local_rx) = mpsc::unbounded_channel();
        let accept_handle = tokio::spawn(accept_loop(listener, shared.clone()));
        let local_handle = tokio::spawn(local_loop(local_rx, shared.dispatcher.clone()));

        info!(
            "Node {} listening on {}",
            shared.registry.local_node_id(),
            local_addr
        );

        Ok(Arc::new(Self {
            shared,
            local_tx,
            retry,
            local_addr,
            tasks: parking_lot::Mutex::new(vec![accept_handle, local_handle]),
        }))
    }

    pub fn local_node_id(&self) -> NodeId {
        self.shared.registry.local_node_id()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn registry(&self) -> &Arc<ClusterRegistry> {
        &self.shared.registry
    }

    pub fn dispatcher(&self) -> &Arc<EventDispatcher> {
        &self.shared.dispatcher
    }

    pub fn add_listener<F, Fut>(&self, event_type: &str, handler: F) -> ListenerId
    where
        F: Fn(NetEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.shared.dispatcher.add_listener(event_type, handler)
    }

    pub fn remove_listener(&self, event_type: &str, id: ListenerId) -> bool {
        self.shared.dispatcher.remove_listener(event_type, id)
    }

    /// Opens a channel to `node` and returns once it is in the connection table.
    ///
    /// Returns immediately when a channel already exists, whichever side opened it.
    pub async fn connect_to(&self, node: NodeId) -> Result<()> {
        let local = self.local_node_id();
        if node == local {
            return Err(Error::Precondition(format!(
                "node {} cannot connect to itself",
                node
            )));
        }
        let machine = self
            .shared
            .registry
            .machine(node)
            .cloned()
            .ok_or(Error::UnknownNode(node))?;

        if self.shared.peers.contains_key(&node) {
            debug!("Already connected to node {}", node);
            return Ok(());
        }

        let stream = self.connect_with_retry(&machine).await?;
        stream.set_nodelay(true)?;
        let (reader, writer) = stream.into_split();

        let channel = spawn_writer(node, writer);
        let handshake = Message::new(CHANNEL_CONNECTED_EVENT).addressed(local, node);
        channel
            .tx
            .send(handshake)
            .map_err(|_| Error::ChannelClosed(node))?;
        tokio::spawn(read_loop(reader, None, self.shared.clone()));

        match self.shared.peers.entry(node) {
            Entry::Occupied(_) => {
                debug!("Node {} connected first, keeping its channel", node);
            }
            Entry::Vacant(slot) => {
                slot.insert(channel);
                info!("Connected to node {} at {}", node, machine.address());
            }
        }
        self.shared.peer_change.notify_waiters();
        Ok(())
    }

    /// Connects to every remote node in the registry.
    pub async fn connect_all(&self) -> Result<()> {
        for node in self.shared.registry.remote_node_ids() {
            self.connect_to(node).await?;
        }
        Ok(())
    }

    /// Waits until every node in `nodes` has a registered channel.
    pub async fn await_connected(&self, nodes: &[NodeId], timeout: Option<Duration>) -> Result<()> {
        with_timeout(
            timeout,
            || format!("channels to nodes {:?}", nodes),
            async {
                loop {
                    let notified = self.shared.peer_change.notified();
                    tokio::pin!(notified);
                    notified.as_mut().enable();

                    if nodes.iter().all(|node| self.shared.peers.contains_key(node)) {
                        return Ok(());
                    }
                    notified.await;
                }
            },
        )
        .await
    }

    async fn connect_with_retry(&self, machine: &MachineDescriptor) -> Result<TcpStream> {
        let address = machine.address();
        let attempts = self.retry.attempts.max(1);
        let mut delay = self.retry.initial_delay;

        for attempt in 1..=attempts {
            let outcome =
                tokio::time::timeout(self.retry.connect_timeout, TcpStream::connect(address.as_str()))
                    .await;
            let error = match outcome {
                Ok(Ok(stream)) => return Ok(stream),
                Ok(Err(e)) => e,
                Err(_) => std::io::Error::new(std::io::ErrorKind::TimedOut, "connect timed out"),
            };

            if attempt == attempts {
                return Err(Error::Connect {
                    address,
                    source: error,
                });
            }

            debug!(
                "Connect to {} failed (attempt {}/{}): {}",
                address, attempt, attempts, error
            );
            let jitter = Duration::from_millis(rand::random::<u64>() % 50);
            tokio::time::sleep(delay + jitter).await;
            delay = (delay * 2).min(self.retry.max_delay);
        }

        Err(Error::Connect {
            address,
            source: std::io::Error::other("retry attempts exhausted"),
        })
    }

    /// Queues `message` for `node`. Sending to the local node goes through the
    /// local dispatch queue instead of the network.
    pub fn send(&self, node: NodeId, message: &Message) -> Result<()> {
        let local = self.local_node_id();
        if !self.shared.registry.contains(node) {
            return Err(Error::UnknownNode(node));
        }

        let event = message.addressed(local, node);
        if node == local {
            return self
                .local_tx
                .send(event)
                .map_err(|_| Error::ChannelClosed(node));
        }

        let peer = self
            .shared
            .peers
            .get(&node)
            .ok_or(Error::NotConnected(node))?;
        peer.tx.send(event).map_err(|_| Error::ChannelClosed(node))
    }

    pub fn send_many(&self, nodes: &[NodeId], message: &Message) -> Result<()> {
        for node in nodes {
            self.send(*node, message)?;
        }
        Ok(())
    }

    /// Sends to every node except the local one.
    pub fn broadcast(&self, message: &Message) -> Result<()> {
        self.send_many(&self.shared.registry.remote_node_ids(), message)
    }

    /// Drops the channel to `node`. Disconnecting an absent peer is an error.
    pub fn disconnect(&self, node: NodeId) -> Result<()> {
        match self.shared.peers.remove(&node) {
            Some(_) => {
                info!("Disconnected from node {}", node);
                self.shared.peer_change.notify_waiters();
                Ok(())
            }
            None => Err(Error::NotConnected(node)),
        }
    }

    pub fn is_connected(&self, node: NodeId) -> bool {
        self.shared.peers.contains_key(&node)
    }

    pub fn connected_peers(&self) -> Vec<NodeId> {
        let mut peers: Vec<NodeId> = self.shared.peers.iter().map(|entry| *entry.key()).collect();
        peers.sort();
        peers
    }

    /// Drops every channel and stops accepting connections.
    pub fn shutdown(&self) {
        self.shared.peers.clear();
        for handle in self.tasks.lock().drain(..) {
            handle.abort();
        }
        info!("Transport of node {} shut down", self.local_node_id());
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        for handle in self.tasks.lock().drain(..) {
            handle.abort();
        }
    }
}

fn spawn_writer(node: NodeId, mut writer: OwnedWriteHalf) -> PeerChannel {
    let (tx, mut rx) = mpsc::unbounded_channel::<NetEvent>();

    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            if let Err(e) = write_frame(&mut writer, &event).await {
                warn!("Write to node {} failed: {}", node, e);
                break;
            }
        }
        if let Err(e) = writer.shutdown().await {
            debug!("Shutdown of channel to node {} failed: {}", node, e);
        }
    });

    PeerChannel { tx }
}

async fn accept_loop(listener: TcpListener, shared: Arc<Shared>) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                debug!("Accepted connection from {}", addr);
                if let Err(e) = stream.set_nodelay(true) {
                    warn!("Failed to set TCP_NODELAY for {}: {}", addr, e);
                }
                let (reader, writer) = stream.into_split();
                tokio::spawn(read_loop(reader, Some(writer), shared.clone()));
            }
            Err(e) => {
                warn!("Failed to accept connection: {}", e);
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }
    }
}

async fn read_loop(
    mut reader: OwnedReadHalf,
    mut pending_writer: Option<OwnedWriteHalf>,
    shared: Arc<Shared>,
) {
    let local = shared.registry.local_node_id();

    loop {
        let event = match read_frame(&mut reader).await {
            Ok(Some(event)) => event,
            Ok(None) => {
                debug!("Channel closed by peer");
                break;
            }
            Err(e) => {
                warn!("Dropping channel after read failure: {}", e);
                break;
            }
        };

        if event.is_control() {
            if let Some(writer) = pending_writer.take() {
                shared.register_inbound(event.src_node, writer);
            }
            continue;
        }

        if event.dst_node != local {
            warn!(
                "Event '{}' addressed to node {} arrived at node {}",
                event.event_type, event.dst_node, local
            );
        }
        shared.dispatcher.dispatch(event).await;
    }
}

async fn local_loop(mut rx: mpsc::UnboundedReceiver<NetEvent>, dispatcher: Arc<EventDispatcher>) {
    while let Some(event) = rx.recv().await {
        dispatcher.dispatch(event).await;
    }
}
