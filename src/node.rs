//! Runtime Node
//!
//! Wires one node together: cluster registry, transport, directory,
//! synchronization core, transactions and the program runner. Every component is
//! handed its collaborators explicitly; there is no process-wide state.

use crate::cluster::registry::ClusterRegistry;
use crate::cluster::types::NodeId;
use crate::config::NodeConfig;
use crate::directory::Directory;
use crate::error::Result;
use crate::program::{Program, ProgramRunner};
use crate::sync::{DataManager, LocalFileSystemManager};
use crate::transport::Transport;
use crate::txn::TransactionManager;

use axum::{Extension, Json, http::StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::net::TcpListener;
use uuid::Uuid;

/// Snapshot served by `GET /status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeStatus {
    pub node_id: NodeId,
    pub address: String,
    pub num_nodes: usize,
    pub connected_peers: Vec<NodeId>,
    pub objects: Vec<String>,
    pub transactions: Vec<String>,
    pub running_jobs: usize,
}

pub struct RuntimeNode {
    config: NodeConfig,
    transport: Arc<Transport>,
    directory: Arc<Directory>,
    data: Arc<DataManager>,
    transactions: Arc<TransactionManager>,
    runner: Arc<ProgramRunner>,
}

impl RuntimeNode {
    /// Binds the configured address of this node.
    pub async fn start(config: NodeConfig) -> Result<Arc<Self>> {
        config.validate()?;
        let registry = Self::registry(&config)?;
        let transport = Transport::bind(registry, config.transport.retry_policy()).await?;
        Ok(Self::assemble(config, transport))
    }

    /// Starts on an already bound listener.
    pub fn with_listener(config: NodeConfig, listener: TcpListener) -> Result<Arc<Self>> {
        config.validate()?;
        let registry = Self::registry(&config)?;
        let transport = Transport::with_listener(registry, listener, config.transport.retry_policy())?;
        Ok(Self::assemble(config, transport))
    }

    fn registry(config: &NodeConfig) -> Result<Arc<ClusterRegistry>> {
        Ok(Arc::new(ClusterRegistry::with_local_index(
            config.machine_descriptors(),
            config.node_index,
        )?))
    }

    fn assemble(config: NodeConfig, transport: Arc<Transport>) -> Arc<Self> {
        let registry = transport.registry().clone();
        let directory = Directory::new(registry.local_node_id());
        let fs = Arc::new(LocalFileSystemManager::new(
            registry.local_node_id(),
            registry.num_nodes(),
        ));
        let data = DataManager::new(
            transport.clone(),
            directory.clone(),
            fs,
            config.sync.clone(),
        );
        let transactions = TransactionManager::new(data.clone());
        let runner = ProgramRunner::new(data.clone(), config.parallelism);

        Arc::new(Self {
            config,
            transport,
            directory,
            data,
            transactions,
            runner,
        })
    }

    /// Opens a channel to every peer and waits until all peers are connected.
    pub async fn connect(&self) -> Result<()> {
        self.transport.connect_all().await?;
        let remotes = self.transport.registry().remote_node_ids();
        self.transport
            .await_connected(&remotes, Some(self.config.transport.handshake_timeout()))
            .await?;
        tracing::info!(
            "Node {} connected to {} peers",
            self.node_id(),
            remotes.len()
        );
        Ok(())
    }

    pub fn node_id(&self) -> NodeId {
        self.transport.local_node_id()
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn transport(&self) -> &Arc<Transport> {
        &self.transport
    }

    pub fn directory(&self) -> &Arc<Directory> {
        &self.directory
    }

    pub fn data(&self) -> &Arc<DataManager> {
        &self.data
    }

    pub fn transactions(&self) -> &Arc<TransactionManager> {
        &self.transactions
    }

    pub fn runner(&self) -> &Arc<ProgramRunner> {
        &self.runner
    }

    /// Runs `program` on this node. Every node must run the same program.
    pub async fn run(&self, program: &Program) -> Result<Uuid> {
        self.runner.run(program).await
    }

    pub fn status(&self) -> NodeStatus {
        NodeStatus {
            node_id: self.node_id(),
            address: self.transport.registry().local_machine().address(),
            num_nodes: self.transport.registry().num_nodes(),
            connected_peers: self.transport.connected_peers(),
            objects: self.directory.names(),
            transactions: self.transactions.names(),
            running_jobs: self.data.job_count(),
        }
    }

    pub fn shutdown(&self) {
        self.transport.shutdown();
    }
}

pub async fn handle_status(
    Extension(node): Extension<Arc<RuntimeNode>>,
) -> (StatusCode, Json<NodeStatus>) {
    (StatusCode::OK, Json(node.status()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::cluster;

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_status_reports_peers_and_objects() {
        // ARRANGE
        let nodes = cluster(2).await;
        nodes[1].data().put_object("counter", Arc::new(7u64));

        // ACT
        let (code, Json(status)) = handle_status(Extension(nodes[1].clone())).await;

        // ASSERT
        assert_eq!(code, StatusCode::OK);
        assert_eq!(status.node_id, NodeId(1));
        assert_eq!(status.num_nodes, 2);
        assert_eq!(status.connected_peers, vec![NodeId(0)]);
        assert_eq!(status.objects, vec!["counter".to_string()]);
        assert_eq!(status.running_jobs, 0);
    }
}
