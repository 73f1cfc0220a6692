use super::builder::TransactionDefinition;
use super::controller::{Transaction, TransactionController};
use super::types::TransactionDescriptor;
use crate::error::{Error, Result};
use crate::sync::DataManager;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tracing::info;

/// Registry of the transactions declared on this node, keyed by name.
pub struct TransactionManager {
    data: Arc<DataManager>,
    transactions: DashMap<String, Arc<dyn Transaction>>,
}

impl TransactionManager {
    pub fn new(data: Arc<DataManager>) -> Arc<Self> {
        Arc::new(Self {
            data,
            transactions: DashMap::new(),
        })
    }

    /// Declares a transaction. Every participating node must register it before
    /// the first commit.
    pub fn register<T>(
        &self,
        descriptor: TransactionDescriptor,
        definition: TransactionDefinition<T>,
    ) -> Result<()>
    where
        T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
    {
        let name = descriptor.name.clone();
        match self.transactions.entry(name.clone()) {
            Entry::Occupied(_) => Err(Error::NameTaken(name)),
            Entry::Vacant(slot) => {
                let controller = TransactionController::new(descriptor, definition, self.data.clone())?;
                info!(
                    "Registered {:?} transaction '{}' with nodes {:?}",
                    controller.descriptor().kind,
                    name,
                    controller.descriptor().participating_nodes
                );
                slot.insert(Arc::new(controller));
                Ok(())
            }
        }
    }

    pub fn commit_handle(&self, name: &str) -> Result<Arc<dyn Transaction>> {
        self.transactions
            .get(name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| Error::UnknownName(name.to_string()))
    }

    /// Runs one commit of transaction `name`.
    pub async fn commit(&self, name: &str) -> Result<()> {
        let transaction = self.commit_handle(name)?;
        transaction.commit().await
    }

    pub fn descriptor(&self, name: &str) -> Option<TransactionDescriptor> {
        self.transactions
            .get(name)
            .map(|entry| entry.value().descriptor().clone())
    }

    pub fn unregister(&self, name: &str) -> bool {
        self.transactions.remove(name).is_some()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .transactions
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        names.sort();
        names
    }
}
