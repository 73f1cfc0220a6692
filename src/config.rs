//! Node configuration.
//!
//! A node reads one JSON document describing the whole cluster plus its own position
//! in it. Every node must see the same machine list in the same order, since list
//! position becomes the node id.

use crate::cluster::types::MachineDescriptor;
use crate::error::{Error, Result};
use crate::transport::RetryPolicy;

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use uuid::Uuid;

/// Default number of foreign entries buffered per destination before a flush.
pub const DEFAULT_BATCH_THRESHOLD: usize = 2048;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MachineConfig {
    pub host: String,
    pub port: u16,
    /// Derived from `host:port` when absent.
    #[serde(default)]
    pub id: Option<Uuid>,
}

impl MachineConfig {
    pub fn descriptor(&self) -> MachineDescriptor {
        match self.id {
            Some(id) => MachineDescriptor {
                id,
                host: self.host.clone(),
                port: self.port,
            },
            None => MachineDescriptor::derived(&self.host, self.port),
        }
    }
}

impl From<&MachineDescriptor> for MachineConfig {
    fn from(machine: &MachineDescriptor) -> Self {
        Self {
            host: machine.host.clone(),
            port: machine.port,
            id: Some(machine.id),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub connect_attempts: usize,
    pub connect_initial_delay_ms: u64,
    pub connect_max_delay_ms: u64,
    pub connect_timeout_ms: u64,
    /// How long bootstrap waits for every peer channel to appear.
    pub handshake_timeout_ms: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_attempts: 20,
            connect_initial_delay_ms: 100,
            connect_max_delay_ms: 2000,
            connect_timeout_ms: 5000,
            handshake_timeout_ms: 30_000,
        }
    }
}

impl TransportConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.connect_attempts,
            initial_delay: Duration::from_millis(self.connect_initial_delay_ms),
            max_delay: Duration::from_millis(self.connect_max_delay_ms),
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
        }
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub batch_threshold: usize,
    /// Upper bound for every blocking wait; `None` waits forever.
    pub sync_timeout_ms: Option<u64>,
    /// Rows per directory segment.
    pub segment_rows: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            batch_threshold: DEFAULT_BATCH_THRESHOLD,
            sync_timeout_ms: Some(300_000),
            segment_rows: 1024,
        }
    }
}

impl SyncConfig {
    pub fn sync_timeout(&self) -> Option<Duration> {
        self.sync_timeout_ms.map(Duration::from_millis)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub machines: Vec<MachineConfig>,
    pub node_index: usize,
    pub parallelism: usize,
    pub transport: TransportConfig,
    pub sync: SyncConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            machines: vec![MachineConfig {
                host: "127.0.0.1".to_string(),
                port: 7400,
                id: None,
            }],
            node_index: 0,
            parallelism: 1,
            transport: TransportConfig::default(),
            sync: SyncConfig::default(),
        }
    }
}

impl NodeConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config: NodeConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.machines.is_empty() {
            return Err(Error::Config("machine list is empty".to_string()));
        }
        if self.node_index >= self.machines.len() {
            return Err(Error::Config(format!(
                "node index {} out of range for {} machines",
                self.node_index,
                self.machines.len()
            )));
        }
        if self.parallelism == 0 {
            return Err(Error::Config("parallelism must be at least 1".to_string()));
        }
        if self.sync.batch_threshold == 0 {
            return Err(Error::Config("batch threshold must be at least 1".to_string()));
        }
        if self.sync.segment_rows == 0 {
            return Err(Error::Config("segment size must be at least 1 row".to_string()));
        }
        Ok(())
    }

    pub fn machine_descriptors(&self) -> Vec<MachineDescriptor> {
        self.machines.iter().map(MachineConfig::descriptor).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = NodeConfig::default();

        assert!(config.validate().is_ok());
        assert_eq!(config.sync.batch_threshold, DEFAULT_BATCH_THRESHOLD);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let json = r#"{
            "machines": [
                {"host": "10.0.0.1", "port": 7400},
                {"host": "10.0.0.2", "port": 7400}
            ],
            "node_index": 1,
            "sync": {"batch_threshold": 16}
        }"#;

        let config: NodeConfig = serde_json::from_str(json).unwrap();

        assert!(config.validate().is_ok());
        assert_eq!(config.parallelism, 1);
        assert_eq!(config.sync.batch_threshold, 16);
        assert_eq!(config.sync.segment_rows, 1024);
        assert_eq!(config.transport.connect_attempts, 20);
    }

    #[test]
    fn test_descriptors_agree_across_nodes() {
        let json = r#"{"machines": [{"host": "a", "port": 1}, {"host": "b", "port": 2}]}"#;
        let first: NodeConfig = serde_json::from_str(json).unwrap();
        let second: NodeConfig = serde_json::from_str(json).unwrap();

        assert_eq!(first.machine_descriptors(), second.machine_descriptors());
    }

    #[test]
    fn test_invalid_index_is_rejected() {
        let config = NodeConfig {
            node_index: 3,
            ..NodeConfig::default()
        };

        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }
}
