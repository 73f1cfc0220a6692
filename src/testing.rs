//! In-process cluster harness shared by the module tests.
//!
//! Every node gets a real loopback TCP listener on an ephemeral port, so tests
//! exercise the same transport code as a deployed cluster.

use crate::cluster::registry::ClusterRegistry;
use crate::cluster::types::MachineDescriptor;
use crate::config::{NodeConfig, SyncConfig};
use crate::node::RuntimeNode;
use crate::transport::{RetryPolicy, Transport};

use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

pub const TEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Binds `n` loopback listeners and the machine list that describes them.
pub async fn bind_listeners(n: usize) -> (Vec<MachineDescriptor>, Vec<TcpListener>) {
    let mut machines = Vec::with_capacity(n);
    let mut listeners = Vec::with_capacity(n);
    for _ in 0..n {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        machines.push(MachineDescriptor::derived("127.0.0.1", port));
        listeners.push(listener);
    }
    (machines, listeners)
}

/// `n` transports that are not connected to each other yet.
pub async fn transports(n: usize) -> Vec<Arc<Transport>> {
    let (machines, listeners) = bind_listeners(n).await;
    listeners
        .into_iter()
        .enumerate()
        .map(|(i, listener)| {
            let registry = Arc::new(ClusterRegistry::with_local_index(machines.clone(), i).unwrap());
            Transport::with_listener(registry, listener, RetryPolicy::default()).unwrap()
        })
        .collect()
}

/// `n` transports with a channel between every pair.
pub async fn connected_transports(n: usize) -> Vec<Arc<Transport>> {
    let transports = transports(n).await;
    for transport in &transports {
        transport.connect_all().await.unwrap();
    }
    for transport in &transports {
        let remotes = transport.registry().remote_node_ids();
        transport
            .await_connected(&remotes, Some(TEST_TIMEOUT))
            .await
            .unwrap();
    }
    transports
}

pub fn test_config(node_index: usize, machines: &[MachineDescriptor]) -> NodeConfig {
    NodeConfig {
        node_index,
        machines: machines.iter().map(Into::into).collect(),
        sync: SyncConfig {
            sync_timeout_ms: Some(TEST_TIMEOUT.as_millis() as u64),
            ..SyncConfig::default()
        },
        ..NodeConfig::default()
    }
}

/// `n` fully wired runtime nodes with every channel established.
pub async fn cluster(n: usize) -> Vec<Arc<RuntimeNode>> {
    cluster_with(n, |_| {}).await
}

pub async fn cluster_with<F>(n: usize, adjust: F) -> Vec<Arc<RuntimeNode>>
where
    F: Fn(&mut NodeConfig),
{
    let (machines, listeners) = bind_listeners(n).await;
    let mut nodes = Vec::with_capacity(n);
    for (i, listener) in listeners.into_iter().enumerate() {
        let mut config = test_config(i, &machines);
        adjust(&mut config);
        nodes.push(RuntimeNode::with_listener(config, listener).unwrap());
    }
    for node in &nodes {
        node.connect().await.unwrap();
    }
    nodes
}

/// Polls `condition` until it holds or the test timeout expires.
pub async fn wait_until<F>(condition: F)
where
    F: Fn() -> bool,
{
    let deadline = tokio::time::Instant::now() + TEST_TIMEOUT;
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached within {:?}",
            TEST_TIMEOUT
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
