use crate::cluster::types::NodeId;
use crate::error::Result;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Reserved tag of the handshake frame that registers a new channel.
pub const CHANNEL_CONNECTED_EVENT: &str = "__channel_connected__";

/// An event as it travels between nodes.
///
/// Source and destination are stamped by the sending transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetEvent {
    pub event_type: String,
    pub src_node: NodeId,
    pub dst_node: NodeId,
    pub payload: Vec<u8>,
}

impl NetEvent {
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(bincode::deserialize(&self.payload)?)
    }

    pub fn is_control(&self) -> bool {
        self.event_type == CHANNEL_CONNECTED_EVENT
    }
}

/// An outbound event before the transport has addressed it.
#[derive(Debug, Clone)]
pub struct Message {
    pub event_type: String,
    pub payload: Vec<u8>,
}

impl Message {
    /// Message with an empty payload.
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            payload: Vec::new(),
        }
    }

    pub fn with_payload<T: Serialize>(event_type: impl Into<String>, value: &T) -> Result<Self> {
        Ok(Self {
            event_type: event_type.into(),
            payload: bincode::serialize(value)?,
        })
    }

    pub(crate) fn addressed(&self, src: NodeId, dst: NodeId) -> NetEvent {
        NetEvent {
            event_type: self.event_type.clone(),
            src_node: src,
            dst_node: dst,
            payload: self.payload.clone(),
        }
    }
}
