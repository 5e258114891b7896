//! Node configuration
//!
//! One [`EdgeConfig`] carries every tunable of the three decision components.
//! It deserializes from JSON with per-field defaults, so a config file only
//! needs the values it overrides.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use swarm_edge_core::scheduler::SchedulerConfig;
use swarm_edge_core::transmission::TransmissionConfig;
use thiserror::Error;

use swarm_edge_core::aggregation::mean_and_std;

/// Default clip half-width Δ
pub const DEFAULT_DELTA: f64 = 10.0;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("failed to read config {path}: {source}")]
    Io {
        /// File that failed
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },
    /// Config file is not valid JSON for [`EdgeConfig`]
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    /// A value is out of range
    #[error("invalid configuration: {0}")]
    Invalid(&'static str),
}

impl From<swarm_edge_core::Error> for ConfigError {
    fn from(e: swarm_edge_core::Error) -> Self {
        match e {
            swarm_edge_core::Error::InvalidConfig(what) => ConfigError::Invalid(what),
            _ => ConfigError::Invalid("rejected by core validation"),
        }
    }
}

/// How the clip half-width Δ is chosen for a round
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum DeltaPolicy {
    /// Constant Δ
    Fixed {
        /// Clip half-width
        delta: f64,
    },
    /// Δ = max(floor, multiplier × σ) over the last `window` committed values
    /// of the metric; `floor` until two values exist.
    Adaptive {
        /// Multiple of the historical standard deviation
        multiplier: f64,
        /// Lower bound on Δ
        floor: f64,
        /// Committed values remembered per metric
        window: usize,
    },
}

impl Default for DeltaPolicy {
    fn default() -> Self {
        DeltaPolicy::Fixed {
            delta: DEFAULT_DELTA,
        }
    }
}

impl DeltaPolicy {
    /// Δ for a metric whose committed values so far are `history` (oldest first)
    pub fn resolve(&self, history: &[f64]) -> f64 {
        match *self {
            DeltaPolicy::Fixed { delta } => delta,
            DeltaPolicy::Adaptive {
                multiplier,
                floor,
                window,
            } => {
                if history.len() < 2 {
                    return floor;
                }
                let recent = &history[history.len().saturating_sub(window)..];
                match mean_and_std(recent) {
                    Some((_, std)) => (multiplier * std).max(floor),
                    None => floor,
                }
            }
        }
    }

    /// Committed values worth keeping per metric
    pub fn history_len(&self) -> usize {
        match *self {
            DeltaPolicy::Fixed { .. } => 1,
            DeltaPolicy::Adaptive { window, .. } => window.max(1),
        }
    }

    /// Check ranges
    pub fn validate(&self) -> Result<(), ConfigError> {
        match *self {
            DeltaPolicy::Fixed { delta } => {
                if !(delta.is_finite() && delta >= 0.0) {
                    return Err(ConfigError::Invalid("delta must be finite and non-negative"));
                }
            }
            DeltaPolicy::Adaptive {
                multiplier,
                floor,
                window,
            } => {
                if !(multiplier.is_finite() && multiplier > 0.0) {
                    return Err(ConfigError::Invalid("delta multiplier must be positive"));
                }
                if !(floor.is_finite() && floor >= 0.0) {
                    return Err(ConfigError::Invalid("delta floor must be finite and non-negative"));
                }
                if window < 2 {
                    return Err(ConfigError::Invalid("delta window must be at least 2"));
                }
            }
        }
        Ok(())
    }
}

/// Consensus aggregator tunables
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsensusConfig {
    /// Byzantine nodes tolerated per round (f)
    pub fault_tolerance: usize,
    /// Clip bound policy
    pub delta: DeltaPolicy,
    /// Upper bound on report collection
    pub collection_timeout_ms: u64,
    /// Extra wait for stragglers once quorum is reached
    pub quorum_grace_ms: u64,
    /// Flags a node may accumulate before it is excluded
    pub exclusion_threshold: u32,
    /// Finished rounds kept for `get_result`
    pub result_history: usize,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            fault_tolerance: 1,
            delta: DeltaPolicy::default(),
            collection_timeout_ms: 5_000,
            quorum_grace_ms: 250,
            exclusion_threshold: 3,
            result_history: 256,
        }
    }
}

impl ConsensusConfig {
    /// Collection timeout as a duration
    pub fn collection_timeout(&self) -> Duration {
        Duration::from_millis(self.collection_timeout_ms)
    }

    /// Quorum grace as a duration
    pub fn quorum_grace(&self) -> Duration {
        Duration::from_millis(self.quorum_grace_ms)
    }

    /// Check ranges
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.delta.validate()?;
        if self.collection_timeout_ms == 0 {
            return Err(ConfigError::Invalid("collection_timeout_ms must be positive"));
        }
        if self.result_history == 0 {
            return Err(ConfigError::Invalid("result_history must be positive"));
        }
        Ok(())
    }
}

/// Complete node configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EdgeConfig {
    /// Admission scheduler
    pub scheduler: SchedulerConfig,
    /// Transmission controller
    pub transmission: TransmissionConfig,
    /// Consensus aggregator
    pub consensus: ConsensusConfig,
}

impl EdgeConfig {
    /// Create a new builder
    pub fn builder() -> EdgeConfigBuilder {
        EdgeConfigBuilder::new()
    }

    /// Check every section
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.scheduler.validate()?;
        self.transmission.validate()?;
        self.consensus.validate()
    }

    /// Parse and validate a JSON document
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: EdgeConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON config file
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&json)
    }
}

/// Builder for EdgeConfig
#[derive(Debug, Default)]
pub struct EdgeConfigBuilder {
    config: EdgeConfig,
}

impl EdgeConfigBuilder {
    /// Create a new builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the scheduler section
    pub fn scheduler(mut self, scheduler: SchedulerConfig) -> Self {
        self.config.scheduler = scheduler;
        self
    }

    /// Replace the transmission section
    pub fn transmission(mut self, transmission: TransmissionConfig) -> Self {
        self.config.transmission = transmission;
        self
    }

    /// Replace the consensus section
    pub fn consensus(mut self, consensus: ConsensusConfig) -> Self {
        self.config.consensus = consensus;
        self
    }

    /// Set the battery floor for non-high tasks
    pub fn min_battery(mut self, min_battery: f64) -> Self {
        self.config.scheduler.min_battery = min_battery;
        self
    }

    /// Set the network floor for low-priority tasks
    pub fn min_network(mut self, min_network: f64) -> Self {
        self.config.scheduler.min_network = min_network;
        self
    }

    /// Set the admission cost threshold
    pub fn admission_threshold(mut self, threshold: f64) -> Self {
        self.config.scheduler.admission_threshold = threshold;
        self
    }

    /// Set the baseline window size
    pub fn window_size(mut self, window_size: usize) -> Self {
        self.config.transmission.window_size = window_size;
        self
    }

    /// Set the anomaly z-threshold
    pub fn z_threshold(mut self, z_threshold: f64) -> Self {
        self.config.transmission.z_threshold = z_threshold;
        self
    }

    /// Set the Byzantine fault tolerance f
    pub fn fault_tolerance(mut self, faults: usize) -> Self {
        self.config.consensus.fault_tolerance = faults;
        self
    }

    /// Set the clip bound policy
    pub fn delta(mut self, delta: DeltaPolicy) -> Self {
        self.config.consensus.delta = delta;
        self
    }

    /// Set the collection timeout
    pub fn collection_timeout(mut self, timeout: Duration) -> Self {
        self.config.consensus.collection_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Set the post-quorum grace period
    pub fn quorum_grace(mut self, grace: Duration) -> Self {
        self.config.consensus.quorum_grace_ms = grace.as_millis() as u64;
        self
    }

    /// Set the fault-tally exclusion threshold
    pub fn exclusion_threshold(mut self, threshold: u32) -> Self {
        self.config.consensus.exclusion_threshold = threshold;
        self
    }

    /// Validate and build the configuration
    pub fn build(self) -> Result<EdgeConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}
