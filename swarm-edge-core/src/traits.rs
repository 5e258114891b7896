//! Core identifiers and traits for SwarmEdge
//!
//! These types are shared by every decision component and by the wire protocol.

use core::fmt;

use serde::{Deserialize, Serialize};

/// Fleet node identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub [u8; 32]);

impl NodeId {
    /// Create a new NodeId from bytes
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Create a NodeId from a public key (SHA-256 hash)
    pub fn from_public_key(public_key: &[u8]) -> Self {
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        hasher.update(public_key);
        let result = hasher.finalize();
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&result);
        Self(bytes)
    }

    /// Get the raw bytes
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl AsRef<[u8]> for NodeId {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Short hex form (first 4 bytes), used in logs.
impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0[..4] {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

/// Observation source (camera, loop detector, ...) on a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceId(pub u32);

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "source-{}", self.0)
    }
}

/// Shared metric that rounds reach agreement on (e.g. vehicles/minute at a junction)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetricId(pub u32);

impl fmt::Display for MetricId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "metric-{}", self.0)
    }
}

/// Caller-assigned task identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

/// Local hardware readings behind the resource sampler.
///
/// Each reading is a fraction in `[0, 1]`. `None` means the sensor could not be
/// read; out-of-range and non-finite values are tolerated and corrected by the
/// sampler.
pub trait ResourceProbe: Send + Sync {
    /// Remaining battery fraction
    fn battery(&self) -> Option<f64>;

    /// Network quality (1.0 = best)
    fn network_quality(&self) -> Option<f64>;

    /// CPU load fraction
    fn cpu_load(&self) -> Option<f64>;
}

/// Probe returning fixed readings. Useful for tests and mains-powered nodes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StaticProbe {
    /// Battery reading
    pub battery: Option<f64>,
    /// Network quality reading
    pub network: Option<f64>,
    /// CPU load reading
    pub cpu_load: Option<f64>,
}

impl StaticProbe {
    /// Create a probe with all readings present
    pub const fn new(battery: f64, network: f64, cpu_load: f64) -> Self {
        Self {
            battery: Some(battery),
            network: Some(network),
            cpu_load: Some(cpu_load),
        }
    }
}

impl ResourceProbe for StaticProbe {
    fn battery(&self) -> Option<f64> {
        self.battery
    }

    fn network_quality(&self) -> Option<f64> {
        self.network
    }

    fn cpu_load(&self) -> Option<f64> {
        self.cpu_load
    }
}
