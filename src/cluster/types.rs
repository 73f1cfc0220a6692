use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Dense index of a machine inside the ordered cluster list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u32);

impl NodeId {
    pub fn new(index: usize) -> Self {
        Self(index as u32)
    }

    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity and network address of one physical (or simulated) node.
///
/// Immutable once the cluster topology is fixed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MachineDescriptor {
    pub id: Uuid,
    pub host: String,
    pub port: u16,
}

impl MachineDescriptor {
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            id: Uuid::new_v4(),
            host: host.to_string(),
            port,
        }
    }

    /// Descriptor whose id is derived from `host:port`, so every node that reads the
    /// same machine list computes the same ids.
    pub fn derived(host: &str, port: u16) -> Self {
        let address = format!("{}:{}", host, port);
        Self {
            id: Uuid::new_v5(&Uuid::NAMESPACE_URL, address.as_bytes()),
            host: host.to_string(),
            port,
        }
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for MachineDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.id, self.host, self.port)
    }
}
