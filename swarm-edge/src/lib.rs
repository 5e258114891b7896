//! # SwarmEdge
//!
//! **Resource-aware edge fleets: admit work under pressure, transmit only what
//! matters, and agree on shared values despite Byzantine nodes.**
//!
//! The top-level `swarm-edge` crate is `std`-only and Tokio-based; the
//! decision primitives themselves live in `swarm-edge-core` and run on
//! `no_std` + `alloc` targets.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use swarm_edge::prelude::*;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run(nodes: Vec<NodeId>) -> Result<(), Box<dyn std::error::Error>> {
//! let config = EdgeConfig::builder().fault_tolerance(1).build()?;
//! let aggregator = ConsensusAggregator::new(config.consensus)?;
//!
//! aggregator.open_round(RoundId(1), MetricId(0), nodes.clone())?;
//! for node in &nodes {
//!     aggregator
//!         .submit_report(&NodeReport::new(RoundId(1), *node, 42.0))
//!         .await?;
//! }
//! let result = aggregator.await_round(RoundId(1), CancellationToken::new()).await?;
//! println!("{:?} -> {:?}", result.status, result.value);
//! # Ok(())
//! # }
//! ```
//!
//! ## Feature Flags
//!
//! - `std` (default): Standard library support
//!
//! ## Crate Structure
//!
//! - [`swarm_edge_core`]: Scheduler, transmission controller, consensus rounds (no_std compatible)
//! - [`swarm_edge_net`]: Wire protocol, transports and report trust layer
//! - [`swarm_edge_runtime`]: Async runtime glue (Tokio/mock)

#![cfg_attr(not(feature = "std"), no_std)]
#![forbid(unsafe_code)]

#[cfg(not(feature = "std"))]
compile_error!(
    "`swarm-edge` requires the `std` feature. Use `swarm-edge-core` for no_std targets."
);

// Re-export sub-crates
pub use swarm_edge_core as core;
pub use swarm_edge_net as net;
pub use swarm_edge_runtime as runtime;

pub use async_trait::async_trait;

// Re-export commonly used items at the top level
pub use swarm_edge_core::{
    consensus::{FailureReason, NodeReport, RoundId, RoundStatus},
    queue::TaskQueue,
    resource::{ResourceSampler, ResourceSnapshot},
    scheduler::{AdaptiveScheduler, Decision, SchedulerConfig, Task, TaskPriority},
    traits::{MetricId, NodeId, SourceId},
    transmission::{ObservationSample, TransmissionConfig, TransmitDecision},
};

pub use swarm_edge_net::{
    protocol::{MessageEnvelope, MessageType},
    traits::{SwarmTransport, TransportCapabilities},
};

/// Async consensus aggregator and fault tally.
pub mod aggregator;

/// Node configuration (builder + JSON).
pub mod config;

/// Concurrent transmission controller.
pub mod controller;

/// Report gossip over a transport.
pub mod network;

/// Cross-round state snapshot.
pub mod persistence;

/// Periodic resource sampler driver.
pub mod sampler;

pub use aggregator::{
    AggregatorError, Confidence, ConsensusAggregator, ConsensusResult, Fallback, FaultTally,
    RoundHandle,
};
pub use config::{ConfigError, ConsensusConfig, DeltaPolicy, EdgeConfig, EdgeConfigBuilder};
pub use controller::SharedTransmissionController;
pub use network::{
    broadcast_heartbeat, broadcast_report, broadcast_round_result, broadcast_round_start,
    run_report_pump, GossipError, PumpStats,
};
pub use persistence::{PersistError, PersistedState};
pub use sampler::{spawn_sampler, SnapshotHandle};

/// Prelude module for convenient imports
///
/// ```rust,ignore
/// use swarm_edge::prelude::*;
/// ```
pub mod prelude {
    pub use crate::core::prelude::*;
    pub use crate::net::prelude::*;

    pub use crate::{
        ConsensusAggregator, ConsensusConfig, ConsensusResult, DeltaPolicy, EdgeConfig,
        SharedTransmissionController, SnapshotHandle,
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = EdgeConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.consensus.fault_tolerance, 1);
        assert_eq!(config.transmission.window_size, 30);
    }

    #[test]
    fn node_id_round_trip() {
        let bytes = [1u8; 32];
        let node = NodeId::new(bytes);
        assert_eq!(node.as_bytes(), &bytes);
    }
}
