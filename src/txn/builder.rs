use super::types::{TransactionDescriptor, TransactionType};
use crate::cluster::types::NodeId;
use crate::error::{Error, Result};

use std::sync::Arc;
use std::time::Duration;

pub type PrepareFn<T> = Arc<dyn Fn(&T) -> anyhow::Result<T> + Send + Sync>;
pub type CombineFn<T> = Arc<dyn Fn(Vec<T>) -> anyhow::Result<T> + Send + Sync>;
pub type UpdateFn<T> = Arc<dyn Fn(Vec<T>, &mut T) -> anyhow::Result<()> + Send + Sync>;

/// Callbacks bound to a transaction.
///
/// `prepare` filters each outgoing state value, `combine` reduces a node's outgoing
/// values to one, `update` folds received values into a destination state.
pub struct TransactionDefinition<T> {
    pub(crate) prepare: Option<PrepareFn<T>>,
    pub(crate) combine: Option<CombineFn<T>>,
    pub(crate) update: UpdateFn<T>,
}

impl<T> TransactionDefinition<T> {
    pub fn new<F>(update: F) -> Self
    where
        F: Fn(Vec<T>, &mut T) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self {
            prepare: None,
            combine: None,
            update: Arc::new(update),
        }
    }

    pub fn with_prepare<F>(mut self, prepare: F) -> Self
    where
        F: Fn(&T) -> anyhow::Result<T> + Send + Sync + 'static,
    {
        self.prepare = Some(Arc::new(prepare));
        self
    }

    pub fn with_combine<F>(mut self, combine: F) -> Self
    where
        F: Fn(Vec<T>) -> anyhow::Result<T> + Send + Sync + 'static,
    {
        self.combine = Some(Arc::new(combine));
        self
    }
}

impl<T> Clone for TransactionDefinition<T> {
    fn clone(&self) -> Self {
        Self {
            prepare: self.prepare.clone(),
            combine: self.combine.clone(),
            update: self.update.clone(),
        }
    }
}

/// Assembles a [`TransactionDescriptor`].
#[derive(Debug, Clone)]
pub struct TransactionBuilder {
    name: String,
    source_states: Vec<String>,
    dest_states: Vec<String>,
    kind: TransactionType,
    cache: bool,
    observer_period: Duration,
    owner_node: Option<NodeId>,
    participating_nodes: Vec<NodeId>,
}

impl TransactionBuilder {
    pub fn new(name: &str, kind: TransactionType) -> Self {
        Self {
            name: name.to_string(),
            source_states: Vec::new(),
            dest_states: Vec::new(),
            kind,
            cache: false,
            observer_period: Duration::ZERO,
            owner_node: None,
            participating_nodes: Vec::new(),
        }
    }

    pub fn push(name: &str) -> Self {
        Self::new(name, TransactionType::Push)
    }

    pub fn pull(name: &str) -> Self {
        Self::new(name, TransactionType::Pull)
    }

    /// Uses `state` both as source and destination.
    pub fn state(self, state: &str) -> Self {
        self.source(state).dest(state)
    }

    pub fn source(mut self, state: &str) -> Self {
        self.source_states.push(state.to_string());
        self
    }

    pub fn dest(mut self, state: &str) -> Self {
        self.dest_states.push(state.to_string());
        self
    }

    pub fn at(mut self, nodes: &[NodeId]) -> Self {
        self.participating_nodes = nodes.to_vec();
        self
    }

    pub fn owner(mut self, node: NodeId) -> Self {
        self.owner_node = Some(node);
        self
    }

    pub fn cache(mut self, period: Duration) -> Self {
        self.cache = true;
        self.observer_period = period;
        self
    }

    pub fn build(self) -> Result<TransactionDescriptor> {
        if self.name.is_empty() {
            return Err(Error::Precondition("transaction name is empty".to_string()));
        }
        if self.source_states.is_empty() || self.dest_states.is_empty() {
            return Err(Error::Precondition(format!(
                "transaction '{}' needs source and destination states",
                self.name
            )));
        }
        if self.cache && self.kind == TransactionType::Push {
            return Err(Error::Precondition(format!(
                "push transaction '{}' cannot cache",
                self.name
            )));
        }

        let mut participating_nodes = self.participating_nodes;
        participating_nodes.sort();
        participating_nodes.dedup();

        Ok(TransactionDescriptor {
            name: self.name,
            source_states: self.source_states,
            dest_states: self.dest_states,
            kind: self.kind,
            cache: self.cache,
            observer_period: self.observer_period,
            owner_node: self.owner_node,
            participating_nodes,
        })
    }
}
