use super::types::{DirectoryKey, DistributionMode, PartitionDescriptor};
use crate::cluster::types::NodeId;
use crate::error::{Error, Result};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::any::Any;
use std::sync::Arc;
use uuid::Uuid;

/// A stored object. Callers recover the concrete type with [`Directory::get_object`].
pub type StateValue = Arc<dyn Any + Send + Sync>;

pub struct Directory {
    local_node: NodeId,
    keys: DashMap<String, DirectoryKey>,
    values: DashMap<Uuid, DashMap<NodeId, StateValue>>,
}

impl Directory {
    pub fn new(local_node: NodeId) -> Arc<Self> {
        Arc::new(Self {
            local_node,
            keys: DashMap::new(),
            values: DashMap::new(),
        })
    }

    pub fn local_node(&self) -> NodeId {
        self.local_node
    }

    /// Allocates a fresh key with an empty partition directory.
    pub fn register_name(&self, name: &str, mode: DistributionMode) -> Result<DirectoryKey> {
        match self.keys.entry(name.to_string()) {
            Entry::Occupied(_) => Err(Error::NameTaken(name.to_string())),
            Entry::Vacant(slot) => {
                let key = DirectoryKey::new(name, mode);
                slot.insert(key.clone());
                tracing::debug!("Registered '{}' as {} ({:?})", name, key.uid, mode);
                Ok(key)
            }
        }
    }

    pub fn resolve(&self, name: &str) -> Option<DirectoryKey> {
        self.keys.get(name).map(|entry| entry.value().clone())
    }

    pub fn resolve_or_register(&self, name: &str, mode: DistributionMode) -> DirectoryKey {
        self.keys
            .entry(name.to_string())
            .or_insert_with(|| DirectoryKey::new(name, mode))
            .value()
            .clone()
    }

    pub fn add_partition_directory_entry(
        &self,
        name: &str,
        node: NodeId,
        descriptor: PartitionDescriptor,
    ) -> Result<()> {
        let mut key = self
            .keys
            .get_mut(name)
            .ok_or_else(|| Error::UnknownName(name.to_string()))?;
        key.add_partition_directory_entry(node, descriptor)
    }

    /// Stores `value` as the local node's partition of `key`.
    pub fn put(&self, key: &DirectoryKey, value: StateValue) {
        self.put_partition(key, self.local_node, value);
    }

    /// Values of the partition(s) owned by the local node.
    pub fn get(&self, key: &DirectoryKey) -> Vec<StateValue> {
        self.get_partition(key, self.local_node).into_iter().collect()
    }

    /// Removes the local partition of `key`. Returns false when nothing was stored.
    pub fn delete(&self, key: &DirectoryKey) -> bool {
        let removed = match self.values.get(&key.uid) {
            Some(slots) => slots.remove(&self.local_node).is_some(),
            None => false,
        };
        self.values.remove_if(&key.uid, |_, slots| slots.is_empty());
        removed
    }

    /// Records the value published by `node` for `key`.
    pub(crate) fn put_partition(&self, key: &DirectoryKey, node: NodeId, value: StateValue) {
        self.values
            .entry(key.uid)
            .or_default()
            .insert(node, value);
    }

    pub fn get_partition(&self, key: &DirectoryKey, node: NodeId) -> Option<StateValue> {
        let slots = self.values.get(&key.uid)?;
        let value = slots.get(&node)?.value().clone();
        Some(value)
    }

    /// Every stored partition of `key`, sorted by node id.
    pub fn partitions(&self, key: &DirectoryKey) -> Vec<(NodeId, StateValue)> {
        let mut partitions: Vec<(NodeId, StateValue)> = Vec::new();
        if let Some(slots) = self.values.get(&key.uid) {
            for entry in slots.iter() {
                partitions.push((*entry.key(), entry.value().clone()));
            }
        }
        partitions.sort_by_key(|(node, _)| *node);
        partitions
    }

    /// Stores a typed object under `name` as the local partition, registering the
    /// name as a local key when it is new.
    pub fn put_object<T: Any + Send + Sync>(&self, name: &str, object: Arc<T>) -> DirectoryKey {
        let key = self.resolve_or_register(name, DistributionMode::Local);
        self.put(&key, object);
        key
    }

    pub fn get_object<T: Any + Send + Sync>(&self, name: &str) -> Result<Arc<T>> {
        let key = self
            .resolve(name)
            .ok_or_else(|| Error::UnknownName(name.to_string()))?;
        let value = self.get_partition(&key, self.local_node).ok_or_else(|| {
            Error::MissingPartition {
                name: name.to_string(),
                node: self.local_node,
            }
        })?;
        downcast(name, value)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.keys.iter().map(|entry| entry.key().clone()).collect();
        names.sort();
        names
    }
}

pub(crate) fn downcast<T: Any + Send + Sync>(name: &str, value: StateValue) -> Result<Arc<T>> {
    value
        .downcast::<T>()
        .map_err(|_| Error::TypeMismatch(name.to_string()))
}
