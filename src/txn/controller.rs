use super::builder::TransactionDefinition;
use super::types::{
    PushAck, TransactionDescriptor, TransactionType, ack_event, pull_event, push_event,
    response_event,
};
use crate::cluster::types::NodeId;
use crate::directory::Directory;
use crate::error::{Error, Result};
use crate::sync::DataManager;
use crate::transport::{ListenerId, Message, NetEvent};

use anyhow::anyhow;
use parking_lot::RwLock;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::{debug, warn};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A registered transaction, independent of the state type it moves.
pub trait Transaction: Send + Sync {
    fn descriptor(&self) -> &TransactionDescriptor;

    fn commit(&self) -> BoxFuture<'_, Result<()>>;
}

type PullResponse<T> = (u64, std::result::Result<Vec<T>, String>);

/// Live state of one declared transaction on this node.
pub struct TransactionController<T> {
    descriptor: Arc<TransactionDescriptor>,
    definition: TransactionDefinition<T>,
    data: Arc<DataManager>,
    commits: AtomicU64,
    commit_lock: tokio::sync::Mutex<()>,
    cache: parking_lot::Mutex<Option<(Instant, Vec<T>)>>,
    listeners: Vec<(String, ListenerId)>,
}

impl<T> TransactionController<T>
where
    T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    /// Resolves the participating nodes and starts serving remote commits.
    pub(crate) fn new(
        mut descriptor: TransactionDescriptor,
        definition: TransactionDefinition<T>,
        data: Arc<DataManager>,
    ) -> Result<Self> {
        for node in &descriptor.participating_nodes {
            if !data.transport().registry().contains(*node) {
                return Err(Error::UnknownNode(*node));
            }
        }
        if descriptor.participating_nodes.is_empty() {
            descriptor.participating_nodes = data.remote_node_ids();
        }

        let descriptor = Arc::new(descriptor);
        let listeners = vec![
            (
                push_event(&descriptor.name),
                serve_pushes(&data, descriptor.clone(), definition.clone()),
            ),
            (
                pull_event(&descriptor.name),
                serve_pulls(&data, descriptor.clone(), definition.clone()),
            ),
        ];

        Ok(Self {
            descriptor,
            definition,
            data,
            commits: AtomicU64::new(0),
            commit_lock: tokio::sync::Mutex::new(()),
            cache: parking_lot::Mutex::new(None),
            listeners,
        })
    }

    async fn commit_push(&self, commit: u64) -> Result<()> {
        let name = &self.descriptor.name;
        let targets = &self.descriptor.participating_nodes;
        let values = outgoing(self.data.directory(), &self.descriptor, &self.definition)?;
        let message = Message::with_payload(push_event(name), &(commit, &values))?;

        let failures: Arc<parking_lot::Mutex<Vec<(NodeId, String)>>> =
            Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = failures.clone();
        let waiter = self
            .data
            .expect_replies(&ack_event(name), targets, move |event: NetEvent| {
                let ack: PushAck = event.decode()?;
                if ack.commit != commit {
                    debug!("Dropping stale ack of commit {} (waiting for {})", ack.commit, commit);
                    return Ok(false);
                }
                if let Some(error) = ack.error {
                    sink.lock().push((event.src_node, error));
                }
                Ok(true)
            });

        if let Err(e) = self.data.transport().send_many(targets, &message) {
            waiter.cancel();
            return Err(e);
        }
        waiter.wait(self.data.config().sync_timeout()).await?;

        let mut failures = std::mem::take(&mut *failures.lock());
        failures.sort();
        match failures.into_iter().next() {
            Some((node, message)) => Err(Error::TransactionFailed {
                name: name.clone(),
                node,
                message,
            }),
            None => {
                debug!("Pushed '{}' (commit {}) to {:?}", name, commit, targets);
                Ok(())
            }
        }
    }

    async fn commit_pull(&self, commit: u64) -> Result<()> {
        let cached = {
            let cache = self.cache.lock();
            match cache.as_ref() {
                Some((fetched, values))
                    if self.descriptor.cache
                        && fetched.elapsed() < self.descriptor.observer_period =>
                {
                    Some(values.clone())
                }
                _ => None,
            }
        };

        let values = match cached {
            Some(values) => {
                debug!("Reusing cached values of '{}'", self.descriptor.name);
                values
            }
            None => {
                let values = self.fetch(commit).await?;
                if self.descriptor.cache {
                    *self.cache.lock() = Some((Instant::now(), values.clone()));
                }
                values
            }
        };

        apply_update(
            self.data.directory(),
            &self.descriptor,
            &self.definition,
            values,
        )
    }

    async fn fetch(&self, commit: u64) -> Result<Vec<T>> {
        let name = &self.descriptor.name;
        let sources = &self.descriptor.participating_nodes;
        let message = Message::with_payload(pull_event(name), &commit)?;

        let responses: Arc<parking_lot::Mutex<Vec<(NodeId, std::result::Result<Vec<T>, String>)>>> =
            Arc::new(parking_lot::Mutex::new(Vec::with_capacity(sources.len())));
        let sink = responses.clone();
        let waiter = self
            .data
            .expect_replies(&response_event(name), sources, move |event: NetEvent| {
                let (answered, reply): PullResponse<T> = event.decode()?;
                if answered != commit {
                    debug!("Dropping stale response to commit {} (waiting for {})", answered, commit);
                    return Ok(false);
                }
                sink.lock().push((event.src_node, reply));
                Ok(true)
            });

        if let Err(e) = self.data.transport().send_many(sources, &message) {
            waiter.cancel();
            return Err(e);
        }
        waiter.wait(self.data.config().sync_timeout()).await?;

        let mut responses = std::mem::take(&mut *responses.lock());
        responses.sort_by_key(|(node, _)| *node);

        let mut values = Vec::new();
        for (node, reply) in responses {
            match reply {
                Ok(remote) => values.extend(remote),
                Err(message) => {
                    return Err(Error::TransactionFailed {
                        name: name.clone(),
                        node,
                        message,
                    });
                }
            }
        }
        Ok(values)
    }
}

impl<T> Transaction for TransactionController<T>
where
    T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    fn descriptor(&self) -> &TransactionDescriptor {
        &self.descriptor
    }

    fn commit(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let local = self.data.node_id();
            if let Some(owner) = self.descriptor.owner_node {
                if owner != local {
                    return Err(Error::Precondition(format!(
                        "transaction '{}' is owned by node {}, not {}",
                        self.descriptor.name, owner, local
                    )));
                }
            }

            let _serial = self.commit_lock.lock().await;
            let commit = self.commits.fetch_add(1, Ordering::SeqCst) + 1;
            match self.descriptor.kind {
                TransactionType::Push => self.commit_push(commit).await,
                TransactionType::Pull => self.commit_pull(commit).await,
            }
        })
    }
}

impl<T> Drop for TransactionController<T> {
    fn drop(&mut self) {
        for (event_type, id) in &self.listeners {
            self.data.transport().remove_listener(event_type, *id);
        }
    }
}

fn state_object<T: Send + Sync + 'static>(directory: &Directory, name: &str) -> Result<Arc<RwLock<T>>> {
    directory.get_object::<RwLock<T>>(name)
}

/// Values of the source states as this node sends them.
fn outgoing<T>(
    directory: &Directory,
    descriptor: &TransactionDescriptor,
    definition: &TransactionDefinition<T>,
) -> Result<Vec<T>>
where
    T: Clone + Send + Sync + 'static,
{
    let mut values = Vec::with_capacity(descriptor.source_states.len());
    for state in &descriptor.source_states {
        let object = state_object::<T>(directory, state)?;
        let guard = object.read();
        let value = match &definition.prepare {
            Some(prepare) => prepare(&*guard).map_err(Error::Callback)?,
            None => guard.clone(),
        };
        values.push(value);
    }

    match &definition.combine {
        Some(combine) => Ok(vec![combine(values).map_err(Error::Callback)?]),
        None => Ok(values),
    }
}

fn apply_update<T>(
    directory: &Directory,
    descriptor: &TransactionDescriptor,
    definition: &TransactionDefinition<T>,
    values: Vec<T>,
) -> Result<()>
where
    T: Clone + Send + Sync + 'static,
{
    for state in &descriptor.dest_states {
        let object = state_object::<T>(directory, state)?;
        let mut guard = object.write();
        (definition.update)(values.clone(), &mut *guard).map_err(Error::Callback)?;
    }
    Ok(())
}

fn serve_pushes<T>(
    data: &DataManager,
    descriptor: Arc<TransactionDescriptor>,
    definition: TransactionDefinition<T>,
) -> ListenerId
where
    T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    let directory = data.directory().clone();
    let transport = Arc::downgrade(data.transport());
    let event_type = push_event(&descriptor.name);

    data.transport().add_listener(&event_type, move |event: NetEvent| {
        let directory = directory.clone();
        let transport = transport.clone();
        let descriptor = descriptor.clone();
        let definition = definition.clone();
        async move {
            let (commit, values): (u64, Vec<T>) = event.decode()?;
            let outcome = apply_update(&directory, &descriptor, &definition, values);
            if let Err(e) = &outcome {
                warn!("Update of '{}' from node {} failed: {}", descriptor.name, event.src_node, e);
            }

            let ack = PushAck {
                commit,
                error: outcome.err().map(|e| e.to_string()),
            };
            let transport = transport
                .upgrade()
                .ok_or_else(|| anyhow!("transport shut down before acknowledging a push"))?;
            transport.send(
                event.src_node,
                &Message::with_payload(ack_event(&descriptor.name), &ack)?,
            )?;
            Ok(())
        }
    })
}

fn serve_pulls<T>(
    data: &DataManager,
    descriptor: Arc<TransactionDescriptor>,
    definition: TransactionDefinition<T>,
) -> ListenerId
where
    T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    let directory = data.directory().clone();
    let transport = Arc::downgrade(data.transport());
    let event_type = pull_event(&descriptor.name);

    data.transport().add_listener(&event_type, move |event: NetEvent| {
        let directory = directory.clone();
        let transport = transport.clone();
        let descriptor = descriptor.clone();
        let definition = definition.clone();
        async move {
            let commit: u64 = event.decode()?;
            let reply = outgoing(&directory, &descriptor, &definition).map_err(|e| e.to_string());
            let response: PullResponse<T> = (commit, reply);

            let transport = transport
                .upgrade()
                .ok_or_else(|| anyhow!("transport shut down before answering a pull"))?;
            transport.send(
                event.src_node,
                &Message::with_payload(response_event(&descriptor.name), &response)?,
            )?;
            Ok(())
        }
    })
}
