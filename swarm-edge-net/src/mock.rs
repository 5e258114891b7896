//! In-memory transport for tests and simulation
//!
//! A [`MockNetwork`] is a hub of unbounded channels, one inbox per joined
//! node. Nodes can be taken offline to simulate partitions; sends to or from
//! an offline node fail.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use swarm_edge_core::traits::NodeId;
use tokio::sync::{mpsc, Mutex};

use crate::traits::{
    BandwidthClass, BroadcastStats, ReliabilityClass, SwarmTransport, TransportCapabilities,
};
use crate::{Error, Result};

type Frame = (NodeId, Vec<u8>);

const MAX_MESSAGE_SIZE: usize = 65536;

#[derive(Debug, Default)]
struct Hub {
    inboxes: HashMap<NodeId, mpsc::UnboundedSender<Frame>>,
    offline: HashSet<NodeId>,
}

/// A network of interconnected mock transports
#[derive(Debug, Clone, Default)]
pub struct MockNetwork {
    hub: Arc<RwLock<Hub>>,
    latency: Duration,
}

impl MockNetwork {
    /// Create an empty network
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every send by `latency_ms` (transports joined afterwards)
    pub fn with_latency(mut self, latency_ms: u64) -> Self {
        self.latency = Duration::from_millis(latency_ms);
        self
    }

    /// Attach `node`, returning its transport. Rejoining replaces the old inbox.
    pub fn join(&self, node: NodeId) -> MockTransport {
        let (tx, rx) = mpsc::unbounded_channel();
        self.hub
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .inboxes
            .insert(node, tx);
        MockTransport {
            node,
            network: self.clone(),
            inbox: Mutex::new(rx),
        }
    }

    /// Take a node off the network (or bring it back)
    pub fn set_offline(&self, node: NodeId, offline: bool) {
        let mut hub = self.hub.write().unwrap_or_else(PoisonError::into_inner);
        if offline {
            hub.offline.insert(node);
        } else {
            hub.offline.remove(&node);
        }
    }

    /// All joined nodes, online or not, in id order
    pub fn peers(&self) -> Vec<NodeId> {
        let hub = self.hub.read().unwrap_or_else(PoisonError::into_inner);
        let mut peers: Vec<NodeId> = hub.inboxes.keys().copied().collect();
        peers.sort();
        peers
    }

    fn online_peers(&self, except: NodeId) -> Vec<NodeId> {
        let hub = self.hub.read().unwrap_or_else(PoisonError::into_inner);
        let mut peers: Vec<NodeId> = hub
            .inboxes
            .keys()
            .filter(|id| **id != except && !hub.offline.contains(id))
            .copied()
            .collect();
        peers.sort();
        peers
    }

    fn deliver(&self, from: NodeId, to: NodeId, msg: &[u8]) -> Result<()> {
        let hub = self.hub.read().unwrap_or_else(PoisonError::into_inner);
        if hub.offline.contains(&from) || hub.offline.contains(&to) {
            return Err(Error::SendFailed);
        }
        let inbox = hub.inboxes.get(&to).ok_or(Error::PeerNotFound)?;
        inbox
            .send((from, msg.to_vec()))
            .map_err(|_| Error::SendFailed)
    }
}

/// One node's endpoint on a [`MockNetwork`]
#[derive(Debug)]
pub struct MockTransport {
    node: NodeId,
    network: MockNetwork,
    inbox: Mutex<mpsc::UnboundedReceiver<Frame>>,
}

impl MockTransport {
    /// The network this transport is attached to
    pub fn network(&self) -> &MockNetwork {
        &self.network
    }

    async fn delay(&self) {
        if !self.network.latency.is_zero() {
            tokio::time::sleep(self.network.latency).await;
        }
    }
}

#[async_trait::async_trait]
impl SwarmTransport for MockTransport {
    fn local_id(&self) -> NodeId {
        self.node
    }

    async fn send(&self, peer: NodeId, msg: &[u8]) -> Result<()> {
        if !self.capabilities().fits(msg.len()) {
            return Err(Error::InvalidMessage);
        }
        self.delay().await;
        self.network.deliver(self.node, peer, msg)
    }

    async fn recv(&self) -> Result<(NodeId, Vec<u8>)> {
        self.inbox.lock().await.recv().await.ok_or(Error::ReceiveFailed)
    }

    async fn broadcast(&self, msg: &[u8]) -> Result<BroadcastStats> {
        if !self.capabilities().fits(msg.len()) {
            return Err(Error::InvalidMessage);
        }
        self.delay().await;
        let mut stats = BroadcastStats::default();
        for peer in self.network.peers() {
            if peer == self.node {
                continue;
            }
            stats.peers_sent += 1;
            if let Err(e) = self.network.deliver(self.node, peer, msg) {
                tracing::debug!(from = %self.node, to = %peer, error = %e, "mock delivery failed");
                stats.failed += 1;
            }
        }
        Ok(stats)
    }

    async fn discover(&self) -> Result<Vec<NodeId>> {
        Ok(self.network.online_peers(self.node))
    }

    fn capabilities(&self) -> TransportCapabilities {
        TransportCapabilities {
            reliability: ReliabilityClass::Reliable,
            bandwidth_class: BandwidthClass::High,
            max_message_size: MAX_MESSAGE_SIZE,
            supports_multicast: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: u8) -> NodeId {
        NodeId::new([id; 32])
    }

    #[tokio::test]
    async fn point_to_point_delivery() {
        let net = MockNetwork::new();
        let a = net.join(node(1));
        let b = net.join(node(2));

        a.send(node(2), b"hello").await.unwrap();
        let (from, msg) = b.recv().await.unwrap();
        assert_eq!(from, node(1));
        assert_eq!(msg, b"hello");
        assert_eq!(a.send(node(9), b"x").await, Err(Error::PeerNotFound));
    }

    #[tokio::test]
    async fn broadcast_skips_self_and_counts_offline() {
        let net = MockNetwork::new();
        let a = net.join(node(1));
        let b = net.join(node(2));
        let _c = net.join(node(3));
        net.set_offline(node(3), true);

        let stats = a.broadcast(b"ping").await.unwrap();
        assert_eq!(stats, BroadcastStats { peers_sent: 2, failed: 1 });
        assert!(stats.reached_any());
        assert_eq!(b.recv().await.unwrap().1, b"ping");
        assert_eq!(a.discover().await.unwrap(), vec![node(2)]);
    }

    #[tokio::test]
    async fn oversized_message_is_rejected() {
        let net = MockNetwork::new();
        let a = net.join(node(1));
        let _b = net.join(node(2));
        let big = vec![0u8; MAX_MESSAGE_SIZE + 1];
        assert_eq!(a.send(node(2), &big).await, Err(Error::InvalidMessage));
    }

    #[tokio::test(start_paused = true)]
    async fn latency_delays_send() {
        let net = MockNetwork::new().with_latency(40);
        let a = net.join(node(1));
        let _b = net.join(node(2));
        let start = tokio::time::Instant::now();
        a.send(node(2), b"x").await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(40));
    }
}
