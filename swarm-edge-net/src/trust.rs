//! Report trust layer
//!
//! Sits between the wire and the aggregator: a [`ReportVerifier`] decides
//! whether a decoded [`NodeReport`] is authentic before it is submitted.

use alloc::collections::BTreeMap;

use swarm_edge_core::consensus::NodeReport;
use swarm_edge_core::crypto::ReportAuth;
use swarm_edge_core::traits::NodeId;

use crate::{Error, Result};

/// Decides whether a report may be handed to the aggregator
pub trait ReportVerifier: Send + Sync {
    /// `Ok(())` if the report is authentic
    fn verify(&self, report: &NodeReport) -> Result<()>;
}

/// Trusts every report. For closed test networks only.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll;

impl ReportVerifier for AcceptAll {
    fn verify(&self, _report: &NodeReport) -> Result<()> {
        Ok(())
    }
}

/// Checks Ed25519 report signatures against a registry of node keys
#[derive(Debug, Clone, Default)]
pub struct Ed25519ReportVerifier {
    keys: BTreeMap<NodeId, [u8; 32]>,
}

impl Ed25519ReportVerifier {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a public key; returns the node id it belongs to
    pub fn register(&mut self, public_key: [u8; 32]) -> NodeId {
        let node = NodeId::from_public_key(&public_key);
        self.keys.insert(node, public_key);
        node
    }

    /// Forget a node's key
    pub fn revoke(&mut self, node: &NodeId) -> bool {
        self.keys.remove(node).is_some()
    }

    /// Number of registered keys
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether no keys are registered
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl ReportVerifier for Ed25519ReportVerifier {
    fn verify(&self, report: &NodeReport) -> Result<()> {
        let key = self.keys.get(&report.node).ok_or(Error::UnknownSigner)?;
        ReportAuth::verify(key, report).map_err(|e| {
            tracing::warn!(node = %report.node, round = %report.round_id, error = %e, "report signature rejected");
            Error::Untrusted(e)
        })
    }
}
