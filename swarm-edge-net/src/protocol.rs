//! Message protocol and framing
//!
//! This module defines the wire format for consensus traffic. Every message
//! travels inside a [`MessageEnvelope`]; the payload is the postcard encoding
//! of the type named by [`MessageType`].

use alloc::vec::Vec;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use swarm_edge_core::consensus::RoundId;
use swarm_edge_core::traits::{MetricId, NodeId};

use crate::{Error, Result};

/// Message envelope for all swarm communications
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageEnvelope {
    /// Protocol version (major, minor)
    pub version: (u8, u8),
    /// Message type discriminator
    pub message_type: MessageType,
    /// Sender's node ID
    pub sender: [u8; 32],
    /// Monotonic per-sender sequence number
    pub sequence: u64,
    /// Unix timestamp (seconds)
    pub timestamp: u32,
    /// Payload bytes; reports carry their own signature inside
    pub payload: Vec<u8>,
}

impl MessageEnvelope {
    /// Current protocol version
    pub const CURRENT_VERSION: (u8, u8) = (0, 1);

    /// Create a new message envelope
    pub fn new(sender: NodeId, message_type: MessageType, payload: Vec<u8>) -> Self {
        Self {
            version: Self::CURRENT_VERSION,
            message_type,
            sender: *sender.as_bytes(),
            sequence: 0,
            timestamp: 0,
            payload,
        }
    }

    /// Encode `body` as the payload of a new envelope
    pub fn wrap<T: Serialize>(sender: NodeId, message_type: MessageType, body: &T) -> Result<Self> {
        let payload = postcard::to_allocvec(body)?;
        Ok(Self::new(sender, message_type, payload))
    }

    /// Set the sequence number
    pub fn with_sequence(mut self, seq: u64) -> Self {
        self.sequence = seq;
        self
    }

    /// Set the timestamp
    pub fn with_timestamp(mut self, ts: u32) -> Self {
        self.timestamp = ts;
        self
    }

    /// Sender as a node id
    pub fn sender_id(&self) -> NodeId {
        NodeId::new(self.sender)
    }

    /// Decode the payload, checking version and message type first
    pub fn open<T: DeserializeOwned>(&self, expected: MessageType) -> Result<T> {
        if self.version.0 != Self::CURRENT_VERSION.0 {
            return Err(Error::UnsupportedVersion(self.version.0, self.version.1));
        }
        if self.message_type != expected {
            return Err(Error::InvalidMessage);
        }
        Ok(postcard::from_bytes(&self.payload)?)
    }

    /// Serialize the envelope to bytes
    pub fn serialize(&self) -> Result<Vec<u8>> {
        Ok(postcard::to_allocvec(self)?)
    }

    /// Deserialize from bytes
    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        Ok(postcard::from_bytes(bytes)?)
    }
}

/// Message type discriminator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageType {
    /// A node's proposed value for a round ([`swarm_edge_core::consensus::NodeReport`])
    NodeReport = 0x01,
    /// Round start announcement
    RoundStart = 0x02,
    /// Round outcome announcement
    RoundResult = 0x03,
    /// Heartbeat for liveness
    Heartbeat = 0x04,
}

/// Heartbeat message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatMessage {
    /// Sender's latest round
    pub current_round: RoundId,
    /// Battery level (0-255)
    pub battery: u8,
    /// Load indicator (0-255)
    pub load: u8,
}

impl HeartbeatMessage {
    /// Quantize unit-interval readings into a heartbeat
    pub fn from_levels(current_round: RoundId, battery: f64, load: f64) -> Self {
        let q = |v: f64| (v.clamp(0.0, 1.0) * 255.0) as u8;
        Self {
            current_round,
            battery: q(battery),
            load: q(load),
        }
    }
}

/// Round start announcement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundStartMessage {
    /// Round identifier
    pub round_id: RoundId,
    /// Metric being agreed on
    pub metric: MetricId,
    /// Expected participants
    pub expected: Vec<NodeId>,
    /// Declared fault tolerance f
    pub faults: u32,
    /// Collection deadline (unix millis)
    pub deadline_ms: u64,
}

/// Round outcome announcement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundResultMessage {
    /// Round identifier
    pub round_id: RoundId,
    /// Metric agreed on
    pub metric: MetricId,
    /// Accepted value, `None` if the round failed
    pub value: Option<f64>,
    /// Nodes whose values were clipped
    pub flagged: Vec<NodeId>,
}
