//! Transport traits and types
//!
//! This module defines the core transport abstraction.

#[cfg(feature = "std")]
use crate::Result;
#[cfg(feature = "std")]
use swarm_edge_core::traits::NodeId;
#[cfg(feature = "std")]
use alloc::vec::Vec;

/// Reliability classification for transports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReliabilityClass {
    /// No delivery guarantees (LoRa, BLE)
    BestEffort,
    /// At least once delivery with retries (UDP with ACK)
    AtLeastOnce,
    /// Reliable ordered delivery (TCP, in-memory)
    Reliable,
}

/// Bandwidth classification for transports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BandwidthClass {
    /// < 10 kbps (LoRa)
    UltraLow,
    /// 10 - 1000 kbps (BLE)
    Low,
    /// 1 - 100 Mbps (WiFi)
    Medium,
    /// > 100 Mbps (Ethernet, in-memory)
    High,
}

/// Transport capabilities
#[derive(Debug, Clone)]
pub struct TransportCapabilities {
    /// Reliability class of the transport
    pub reliability: ReliabilityClass,
    /// Bandwidth class of the transport
    pub bandwidth_class: BandwidthClass,
    /// Maximum message size in bytes
    pub max_message_size: usize,
    /// Whether the transport supports multicast/broadcast
    pub supports_multicast: bool,
}

/// Statistics from a broadcast operation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastStats {
    /// Number of peers the message was sent to
    pub peers_sent: usize,
    /// Number of failed sends
    pub failed: usize,
}

impl BroadcastStats {
    /// Whether at least one peer got the message
    pub fn reached_any(&self) -> bool {
        self.peers_sent > self.failed
    }
}

/// Core transport trait for swarm communication
///
/// Messages are opaque bytes; framing is [`crate::protocol::MessageEnvelope`].
#[cfg(feature = "std")]
#[async_trait::async_trait]
pub trait SwarmTransport: Send + Sync {
    /// This endpoint's node id
    fn local_id(&self) -> NodeId;

    /// Send a message to a specific peer
    async fn send(&self, peer: NodeId, msg: &[u8]) -> Result<()>;

    /// Receive the next message (waits until one is available)
    async fn recv(&self) -> Result<(NodeId, Vec<u8>)>;

    /// Broadcast a message to all known peers except self (best-effort)
    async fn broadcast(&self, msg: &[u8]) -> Result<BroadcastStats>;

    /// Peers currently reachable
    async fn discover(&self) -> Result<Vec<NodeId>>;

    /// Get transport capabilities
    fn capabilities(&self) -> TransportCapabilities;
}

impl TransportCapabilities {
    /// Whether a message of `len` bytes fits in one frame
    pub fn fits(&self, len: usize) -> bool {
        len <= self.max_message_size
    }
}
