use super::types::{MachineDescriptor, NodeId};
use crate::error::{Error, Result};

use std::collections::HashSet;
use uuid::Uuid;

/// The ordered machine list plus the identity of the local node.
///
/// Position in the list is the node id, so all nodes must be started with the same
/// list in the same order.
#[derive(Debug, Clone)]
pub struct ClusterRegistry {
    machines: Vec<MachineDescriptor>,
    local: NodeId,
}

impl ClusterRegistry {
    pub fn new(machines: Vec<MachineDescriptor>, local_machine: Uuid) -> Result<Self> {
        let index = machines
            .iter()
            .position(|machine| machine.id == local_machine)
            .ok_or_else(|| {
                Error::Precondition(format!(
                    "local machine {} is not part of the cluster",
                    local_machine
                ))
            })?;

        Self::with_local_index(machines, index)
    }

    pub fn with_local_index(machines: Vec<MachineDescriptor>, local_index: usize) -> Result<Self> {
        if machines.is_empty() {
            return Err(Error::Precondition("cluster has no machines".to_string()));
        }
        if local_index >= machines.len() {
            return Err(Error::Precondition(format!(
                "local index {} out of range for {} machines",
                local_index,
                machines.len()
            )));
        }

        let mut seen = HashSet::new();
        for machine in &machines {
            if !seen.insert(machine.id) {
                return Err(Error::Precondition(format!(
                    "machine id {} appears twice",
                    machine.id
                )));
            }
        }

        Ok(Self {
            machines,
            local: NodeId::new(local_index),
        })
    }

    pub fn local_node_id(&self) -> NodeId {
        self.local
    }

    pub fn local_machine(&self) -> &MachineDescriptor {
        &self.machines[self.local.index()]
    }

    pub fn num_nodes(&self) -> usize {
        self.machines.len()
    }

    pub fn machine(&self, node: NodeId) -> Option<&MachineDescriptor> {
        self.machines.get(node.index())
    }

    pub fn machines(&self) -> &[MachineDescriptor] {
        &self.machines
    }

    pub fn node_id_of(&self, machine: &Uuid) -> Option<NodeId> {
        self.machines
            .iter()
            .position(|m| &m.id == machine)
            .map(NodeId::new)
    }

    pub fn contains(&self, node: NodeId) -> bool {
        node.index() < self.machines.len()
    }

    pub fn node_ids(&self) -> Vec<NodeId> {
        (0..self.machines.len()).map(NodeId::new).collect()
    }

    /// Every node id except the local one, in ascending order.
    pub fn remote_node_ids(&self) -> Vec<NodeId> {
        self.node_ids()
            .into_iter()
            .filter(|node| *node != self.local)
            .collect()
    }
}
