//! Aggregator state snapshot (std-only).
//!
//! Only the cross-round state is persisted: fault tallies, exclusions and the
//! last committed value (plus Δ history) per metric. Live rounds are not; a
//! restarted node opens fresh rounds.
//!
//! The file is pretty JSON written via a `.tmp` sibling and a rename, so a
//! crash mid-write leaves the previous snapshot intact.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use swarm_edge_core::consensus::RoundId;
use swarm_edge_core::traits::{MetricId, NodeId};
use thiserror::Error;

/// Current snapshot schema
pub const STATE_SCHEMA_VERSION: u32 = 1;

/// Persistence errors
#[derive(Debug, Error)]
pub enum PersistError {
    /// Filesystem failure
    #[error("state file {path}: {source}")]
    Io {
        /// File involved
        path: PathBuf,
        /// Underlying error
        #[source]
        source: io::Error,
    },
    /// Snapshot could not be encoded or decoded
    #[error("state encoding: {0}")]
    Encoding(#[from] serde_json::Error),
    /// Snapshot written by an incompatible version
    #[error("unsupported state schema version {0}")]
    UnsupportedVersion(u32),
}

/// One node's fault count
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TallyEntry {
    /// Node
    pub node: NodeId,
    /// Rounds in which the node was flagged
    pub count: u32,
}

/// Last committed state of one metric
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricEntry {
    /// Metric
    pub metric: MetricId,
    /// Round and value of the last commit, if any
    pub last_committed: Option<(RoundId, f64)>,
    /// Whether the most recent round for this metric failed
    pub last_round_failed: bool,
    /// Recent committed values, oldest first
    pub history: Vec<f64>,
}

/// Everything the aggregator carries across rounds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedState {
    /// Schema version
    pub schema_version: u32,
    /// Per-node fault tallies
    pub fault_tallies: Vec<TallyEntry>,
    /// Nodes excluded from future rounds
    pub excluded: Vec<NodeId>,
    /// Per-metric commit history
    pub metrics: Vec<MetricEntry>,
}

impl Default for PersistedState {
    fn default() -> Self {
        Self {
            schema_version: STATE_SCHEMA_VERSION,
            fault_tallies: Vec::new(),
            excluded: Vec::new(),
            metrics: Vec::new(),
        }
    }
}

impl PersistedState {
    /// Write the snapshot atomically
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), PersistError> {
        let path = path.as_ref();
        let json = serde_json::to_vec_pretty(self)?;
        atomic_write(path, &json).map_err(|source| PersistError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Read a snapshot, rejecting unknown schema versions
    pub fn load(path: impl AsRef<Path>) -> Result<Self, PersistError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| PersistError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let state: PersistedState = serde_json::from_reader(io::BufReader::new(file))?;
        if state.schema_version != STATE_SCHEMA_VERSION {
            return Err(PersistError::UnsupportedVersion(state.schema_version));
        }
        Ok(state)
    }
}

fn atomic_write(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let file_name = path
        .file_name()
        .and_then(|s| s.to_str())
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "invalid file name"))?;

    let tmp_path = path.with_file_name(format!("{file_name}.tmp"));

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    {
        let mut f = File::create(&tmp_path)?;
        f.write_all(bytes)?;
        f.flush()?;
        let _ = f.sync_all();
    }

    fs::rename(&tmp_path, path)
}
