//! # SwarmEdge Core
//!
//! Decision primitives for fleets of resource-constrained edge nodes.
//!
//! This crate is `no_std` compatible (it needs an allocator) and provides:
//! - Resource snapshots and a fail-safe sampler
//! - Adaptive multi-constraint admission scheduling and a fair task queue
//! - Anomaly-gated transmission with per-source sliding baselines
//! - Byzantine-tolerant consensus rounds over scalar node reports
//! - Robust scalar aggregation (median, clipping, trimmed mean)
//! - Ed25519 report signing
//!
//! ## Feature Flags
//!
//! - `std` (default): Enable standard library support
//! - `alloc`: Enable allocator for dynamic memory (included with `std`, required)

#![cfg_attr(not(feature = "std"), no_std)]

#[cfg(not(feature = "alloc"))]
compile_error!("`swarm-edge-core` requires the `alloc` feature.");

extern crate alloc;

pub mod aggregation;
pub mod consensus;
pub mod crypto;
pub mod queue;
pub mod resource;
pub mod scheduler;
pub mod traits;
pub mod transmission;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::aggregation::*;
    pub use crate::consensus::{
        ConsensusRound, FailureReason, NodeReport, RoundId, RoundOutcome, RoundStatus,
    };
    pub use crate::queue::TaskQueue;
    pub use crate::resource::{ResourceSampler, ResourceSnapshot};
    pub use crate::scheduler::{
        Action, AdaptiveScheduler, Decision, SchedulerConfig, Task, TaskPriority, TaskState,
    };
    pub use crate::traits::*;
    pub use crate::transmission::{
        ObservationSample, TransmissionConfig, TransmissionController, TransmitDecision,
    };
}

/// Result type for SwarmEdge core operations
pub type Result<T> = core::result::Result<T, Error>;

/// Error type for SwarmEdge core operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Round created with fewer than `3f + 1` participants
    InvalidFaultTolerance {
        /// Participants in the expected set
        nodes: usize,
        /// Declared fault tolerance
        faults: usize,
    },
    /// Aggregation requested below quorum
    InsufficientReports {
        /// Distinct reports collected
        have: usize,
        /// Quorum (`2f + 1`)
        need: usize,
    },
    /// Round no longer accepts reports
    RoundClosed,
    /// Report from a node outside the round's expected set
    UnexpectedNode,
    /// Report carried a non-finite value or the wrong round id
    InvalidReport,
    /// Configuration value out of range
    InvalidConfig(&'static str),
    /// Serialization/deserialization error
    Serialization,
    /// Cryptographic verification failed
    VerificationFailed,
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Error::InvalidFaultTolerance { nodes, faults } => write!(
                f,
                "invalid fault tolerance: n={} requires n >= 3f+1 with f={}",
                nodes, faults
            ),
            Error::InsufficientReports { have, need } => {
                write!(f, "insufficient reports: have {}, need {}", have, need)
            }
            Error::RoundClosed => write!(f, "round is not collecting reports"),
            Error::UnexpectedNode => write!(f, "node is not part of the round"),
            Error::InvalidReport => write!(f, "invalid report"),
            Error::InvalidConfig(what) => write!(f, "invalid configuration: {}", what),
            Error::Serialization => write!(f, "serialization error"),
            Error::VerificationFailed => write!(f, "cryptographic verification failed"),
        }
    }
}
