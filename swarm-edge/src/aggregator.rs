//! Async Byzantine consensus aggregator
//!
//! Wraps [`ConsensusRound`] state machines with the parts that need a clock:
//! waiting for reports, timeouts, cancellation, and the cross-round fault
//! tally that escalates repeat offenders to exclusion.
//!
//! Each round sits behind its own async mutex with a [`Notify`] for report
//! arrival, so unrelated rounds never contend. The round map, the tally and
//! the per-metric history use short-lived `std` locks that are never held
//! across an `.await`.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use swarm_edge_core::consensus::{
    ConsensusRound, FailureReason, NodeReport, RoundId, RoundOutcome, RoundStatus, SubmitOutcome,
};
use swarm_edge_core::traits::{MetricId, NodeId};
use thiserror::Error;
use tokio::sync::{Mutex, Notify};
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;

use crate::config::{ConfigError, ConsensusConfig};
use crate::persistence::{MetricEntry, PersistedState, TallyEntry, STATE_SCHEMA_VERSION};

/// Aggregator errors
#[derive(Debug, Error)]
pub enum AggregatorError {
    /// A round with this id is live or archived
    #[error("{0} already exists")]
    DuplicateRound(RoundId),
    /// No round with this id
    #[error("{0} is not known")]
    UnknownRound(RoundId),
    /// Round finished before the report arrived
    #[error("{0} is closed")]
    RoundClosed(RoundId),
    /// Reporting node is excluded by its fault tally
    #[error("node {0} is excluded")]
    ExcludedNode(NodeId),
    /// Rejected by the round state machine
    #[error(transparent)]
    Round(#[from] swarm_edge_core::Error),
}

/// Externally visible state of a round
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusResult {
    /// Round
    pub round_id: RoundId,
    /// Metric
    pub metric: MetricId,
    /// Accepted value, present only once committed
    pub value: Option<f64>,
    /// Nodes clipped in this round
    pub flagged_nodes: BTreeSet<NodeId>,
    /// Nodes excluded from future rounds as of this result
    pub excluded_nodes: BTreeSet<NodeId>,
    /// Round status
    pub status: RoundStatus,
    /// Failure cause, when `status` is `Failed`
    pub failure: Option<FailureReason>,
    /// Duplicate reports that replaced an earlier value
    pub changed_mind: u64,
}

impl ConsensusResult {
    /// Whether the round committed a value
    pub fn is_committed(&self) -> bool {
        self.status == RoundStatus::Committed
    }
}

/// What `open_round` actually created
#[derive(Debug, Clone, PartialEq)]
pub struct RoundHandle {
    /// Round
    pub round_id: RoundId,
    /// Metric
    pub metric: MetricId,
    /// Effective expected set
    pub expected: BTreeSet<NodeId>,
    /// Requested nodes dropped because they are excluded
    pub excluded: BTreeSet<NodeId>,
    /// Distinct reports needed to commit
    pub quorum: usize,
}

/// Trust level of a fallback value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Confidence {
    /// The most recent round for the metric committed this value
    Current,
    /// A later round failed; the value is stale
    Degraded,
}

/// Last committed value of a metric, for callers whose round failed
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Fallback {
    /// Metric
    pub metric: MetricId,
    /// Round that committed `value`
    pub round_id: RoundId,
    /// Committed value
    pub value: f64,
    /// How much to trust it
    pub confidence: Confidence,
}

/// Cross-round count of flags per node
///
/// Each node's counter is its own atomic; the map lock is only taken to find
/// or create the counter.
#[derive(Debug)]
pub struct FaultTally {
    counts: RwLock<HashMap<NodeId, Arc<AtomicU32>>>,
    threshold: u32,
}

impl FaultTally {
    /// Nodes whose count exceeds `threshold` are excluded
    pub fn new(threshold: u32) -> Self {
        Self {
            counts: RwLock::new(HashMap::new()),
            threshold,
        }
    }

    /// Record one flag for `node`; returns the new count
    pub fn flag(&self, node: NodeId) -> u32 {
        let existing = self
            .counts
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&node)
            .cloned();
        let counter = match existing {
            Some(counter) => counter,
            None => self
                .counts
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .entry(node)
                .or_default()
                .clone(),
        };
        counter.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Current count for `node`
    pub fn count(&self, node: &NodeId) -> u32 {
        self.counts
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(node)
            .map(|c| c.load(Ordering::Acquire))
            .unwrap_or(0)
    }

    /// Exclusion threshold
    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    /// Whether `node` is excluded
    pub fn is_excluded(&self, node: &NodeId) -> bool {
        self.count(node) > self.threshold
    }

    /// All excluded nodes
    pub fn excluded(&self) -> BTreeSet<NodeId> {
        self.counts
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(_, c)| c.load(Ordering::Acquire) > self.threshold)
            .map(|(node, _)| *node)
            .collect()
    }

    /// Clear a node's record
    pub fn reset(&self, node: &NodeId) -> bool {
        self.counts
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(node)
            .is_some()
    }

    /// Counts in node order
    pub fn entries(&self) -> Vec<TallyEntry> {
        let counts = self.counts.read().unwrap_or_else(PoisonError::into_inner);
        let mut entries: Vec<TallyEntry> = counts
            .iter()
            .map(|(node, c)| TallyEntry {
                node: *node,
                count: c.load(Ordering::Acquire),
            })
            .collect();
        entries.sort_by(|a, b| a.node.cmp(&b.node));
        entries
    }

    fn replace(&self, entries: impl IntoIterator<Item = (NodeId, u32)>) {
        let mut counts = self.counts.write().unwrap_or_else(PoisonError::into_inner);
        counts.clear();
        for (node, count) in entries {
            counts.insert(node, Arc::new(AtomicU32::new(count)));
        }
    }
}

#[derive(Debug, Default)]
struct MetricState {
    last_committed: Option<(RoundId, f64)>,
    last_round_failed: bool,
    history: VecDeque<f64>,
}

#[derive(Debug)]
struct RoundSlot {
    round: Mutex<ConsensusRound>,
    arrivals: Notify,
    // fixed at open; shared by every awaiter
    deadline: Instant,
}

/// Async front end for consensus rounds; share it behind an `Arc`.
#[derive(Debug)]
pub struct ConsensusAggregator {
    config: ConsensusConfig,
    live: RwLock<HashMap<RoundId, Arc<RoundSlot>>>,
    finished: RwLock<BTreeMap<RoundId, ConsensusResult>>,
    metrics: RwLock<HashMap<MetricId, MetricState>>,
    tally: FaultTally,
}

impl ConsensusAggregator {
    /// Create an aggregator, rejecting out-of-range configuration
    pub fn new(config: ConsensusConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            tally: FaultTally::new(config.exclusion_threshold),
            config,
            live: RwLock::new(HashMap::new()),
            finished: RwLock::new(BTreeMap::new()),
            metrics: RwLock::new(HashMap::new()),
        })
    }

    /// Active configuration
    pub fn config(&self) -> &ConsensusConfig {
        &self.config
    }

    /// Shared fault tally
    pub fn fault_tally(&self) -> &FaultTally {
        &self.tally
    }

    /// Rounds still collecting
    pub fn live_rounds(&self) -> usize {
        self.live.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Start collecting for a new round.
    ///
    /// Excluded nodes are dropped from `expected` first; the remaining set must
    /// still satisfy `n ≥ 3f + 1`.
    pub fn open_round(
        &self,
        round_id: RoundId,
        metric: MetricId,
        expected: impl IntoIterator<Item = NodeId>,
    ) -> Result<RoundHandle, AggregatorError> {
        let mut excluded = BTreeSet::new();
        let effective: BTreeSet<NodeId> = expected
            .into_iter()
            .filter(|node| {
                if self.tally.is_excluded(node) {
                    excluded.insert(*node);
                    false
                } else {
                    true
                }
            })
            .collect();

        let remaining = effective.len();
        let faults = self.config.fault_tolerance;
        let mut round = match ConsensusRound::new(round_id, metric, effective, faults) {
            Ok(round) => round,
            Err(e) => {
                if !excluded.is_empty() {
                    tracing::warn!(
                        round = %round_id,
                        remaining,
                        excluded = excluded.len(),
                        faults,
                        "exclusions leave too few nodes for the fault tolerance"
                    );
                }
                return Err(e.into());
            }
        };
        round.start_collecting()?;

        let handle = RoundHandle {
            round_id,
            metric,
            expected: round.expected().clone(),
            excluded,
            quorum: round.quorum(),
        };

        {
            let mut live = self.live.write().unwrap_or_else(PoisonError::into_inner);
            let archived = self
                .finished
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .contains_key(&round_id);
            if archived || live.contains_key(&round_id) {
                return Err(AggregatorError::DuplicateRound(round_id));
            }
            live.insert(
                round_id,
                Arc::new(RoundSlot {
                    round: Mutex::new(round),
                    arrivals: Notify::new(),
                    deadline: Instant::now() + self.config.collection_timeout(),
                }),
            );
        }

        tracing::info!(
            round = %round_id,
            metric = %metric,
            nodes = handle.expected.len(),
            excluded = handle.excluded.len(),
            quorum = handle.quorum,
            "round opened"
        );
        Ok(handle)
    }

    /// Hand a report to its round and wake anyone waiting on it
    pub async fn submit_report(&self, report: &NodeReport) -> Result<SubmitOutcome, AggregatorError> {
        if self.tally.is_excluded(&report.node) {
            tracing::warn!(round = %report.round_id, node = %report.node, "report from excluded node dropped");
            return Err(AggregatorError::ExcludedNode(report.node));
        }
        let slot = self.live_slot(report.round_id)?;
        if Instant::now() >= slot.deadline {
            tracing::debug!(round = %report.round_id, node = %report.node, "report after collection deadline");
            self.settle(&slot, None).await;
            return Err(AggregatorError::RoundClosed(report.round_id));
        }

        let outcome = slot.round.lock().await.submit(report);
        match outcome {
            Ok(outcome) => {
                tracing::debug!(round = %report.round_id, node = %report.node, ?outcome, "report accepted");
                slot.arrivals.notify_waiters();
                Ok(outcome)
            }
            Err(swarm_edge_core::Error::RoundClosed) => {
                Err(AggregatorError::RoundClosed(report.round_id))
            }
            Err(e) => {
                tracing::warn!(round = %report.round_id, node = %report.node, error = %e, "report rejected");
                Err(e.into())
            }
        }
    }

    /// Wait for a round to finish collecting, then settle it.
    ///
    /// Returns once every expected node has reported, or `quorum_grace` after
    /// quorum was first seen, or at the round's collection deadline
    /// (`collection_timeout` after `open_round`), whichever is first.
    /// Below quorum at the timeout the round fails with `Timeout`; a fired
    /// `cancel` fails it with `Cancelled`.
    pub async fn await_round(
        &self,
        round_id: RoundId,
        cancel: CancellationToken,
    ) -> Result<ConsensusResult, AggregatorError> {
        let slot = match self.live_slot(round_id) {
            Ok(slot) => slot,
            Err(AggregatorError::RoundClosed(_)) => {
                return self
                    .archived(round_id)
                    .ok_or(AggregatorError::UnknownRound(round_id))
            }
            Err(e) => return Err(e),
        };

        let deadline = slot.deadline;
        let mut wake_at = deadline;
        let mut quorum_seen = false;

        loop {
            let arrival = slot.arrivals.notified();
            tokio::pin!(arrival);
            arrival.as_mut().enable();

            {
                let round = slot.round.lock().await;
                if round.status().is_terminal() || round.is_complete() {
                    break;
                }
                if !quorum_seen && round.has_quorum() {
                    quorum_seen = true;
                    wake_at = (Instant::now() + self.config.quorum_grace()).min(deadline);
                    tracing::debug!(round = %round_id, reports = round.report_count(), "quorum reached");
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    return Ok(self.settle(&slot, Some(FailureReason::Cancelled)).await);
                }
                _ = &mut arrival => {}
                _ = sleep_until(wake_at) => break,
            }
        }

        Ok(self.settle(&slot, None).await)
    }

    /// Current view of a round: live, or archived once finished.
    ///
    /// A live round past its collection deadline is settled first.
    pub async fn get_result(&self, round_id: RoundId) -> Option<ConsensusResult> {
        if let Some(done) = self.archived(round_id) {
            return Some(done);
        }
        let slot = self.live_slot(round_id).ok()?;
        if Instant::now() >= slot.deadline {
            return Some(self.settle(&slot, None).await);
        }
        let round = slot.round.lock().await;
        Some(self.result_of(&round))
    }

    /// Settle every live round whose collection deadline has passed, whether
    /// or not anyone is awaiting it. Returns the settled results.
    pub async fn expire_overdue(&self) -> Vec<ConsensusResult> {
        let now = Instant::now();
        let overdue: Vec<Arc<RoundSlot>> = self
            .live
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|slot| slot.deadline <= now)
            .cloned()
            .collect();

        let mut settled = Vec::with_capacity(overdue.len());
        for slot in overdue {
            settled.push(self.settle(&slot, None).await);
        }
        settled
    }

    /// Last committed value for `metric`, degraded if a later round failed
    pub fn last_committed(&self, metric: MetricId) -> Option<Fallback> {
        let metrics = self.metrics.read().unwrap_or_else(PoisonError::into_inner);
        let state = metrics.get(&metric)?;
        let (round_id, value) = state.last_committed?;
        Some(Fallback {
            metric,
            round_id,
            value,
            confidence: if state.last_round_failed {
                Confidence::Degraded
            } else {
                Confidence::Current
            },
        })
    }

    /// Δ the next round for `metric` would use
    pub fn current_delta(&self, metric: MetricId) -> f64 {
        let metrics = self.metrics.read().unwrap_or_else(PoisonError::into_inner);
        let history: Vec<f64> = metrics
            .get(&metric)
            .map(|s| s.history.iter().copied().collect())
            .unwrap_or_default();
        self.config.delta.resolve(&history)
    }

    /// Clear a node's fault record so it may take part again
    pub fn reinstate(&self, node: &NodeId) -> bool {
        let cleared = self.tally.reset(node);
        if cleared {
            tracing::info!(node = %node, "node reinstated");
        }
        cleared
    }

    /// Cross-round state for persistence
    pub fn snapshot_state(&self) -> PersistedState {
        let metrics = self.metrics.read().unwrap_or_else(PoisonError::into_inner);
        let mut entries: Vec<MetricEntry> = metrics
            .iter()
            .map(|(metric, state)| MetricEntry {
                metric: *metric,
                last_committed: state.last_committed,
                last_round_failed: state.last_round_failed,
                history: state.history.iter().copied().collect(),
            })
            .collect();
        entries.sort_by_key(|e| e.metric);

        PersistedState {
            schema_version: STATE_SCHEMA_VERSION,
            fault_tallies: self.tally.entries(),
            excluded: self.tally.excluded().into_iter().collect(),
            metrics: entries,
        }
    }

    /// Replace cross-round state with a snapshot.
    ///
    /// Nodes listed as excluded stay excluded even if this aggregator's
    /// threshold is higher than the one that excluded them.
    pub fn restore_state(&self, state: &PersistedState) {
        let mut counts: BTreeMap<NodeId, u32> = state
            .fault_tallies
            .iter()
            .map(|e| (e.node, e.count))
            .collect();
        for node in &state.excluded {
            let count = counts.entry(*node).or_insert(0);
            *count = (*count).max(self.tally.threshold().saturating_add(1));
        }
        self.tally.replace(counts);

        let cap = self.config.delta.history_len();
        let mut metrics = self.metrics.write().unwrap_or_else(PoisonError::into_inner);
        metrics.clear();
        for entry in &state.metrics {
            let skip = entry.history.len().saturating_sub(cap);
            metrics.insert(
                entry.metric,
                MetricState {
                    last_committed: entry.last_committed,
                    last_round_failed: entry.last_round_failed,
                    history: entry.history.iter().skip(skip).copied().collect(),
                },
            );
        }
        tracing::info!(
            tallies = state.fault_tallies.len(),
            excluded = state.excluded.len(),
            metrics = state.metrics.len(),
            "aggregator state restored"
        );
    }

    fn live_slot(&self, round_id: RoundId) -> Result<Arc<RoundSlot>, AggregatorError> {
        if let Some(slot) = self
            .live
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&round_id)
        {
            return Ok(slot.clone());
        }
        if self
            .finished
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&round_id)
        {
            return Err(AggregatorError::RoundClosed(round_id));
        }
        Err(AggregatorError::UnknownRound(round_id))
    }

    fn archived(&self, round_id: RoundId) -> Option<ConsensusResult> {
        self.finished
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&round_id)
            .cloned()
    }

    fn result_of(&self, round: &ConsensusRound) -> ConsensusResult {
        ConsensusResult {
            round_id: round.round_id(),
            metric: round.metric(),
            value: round.accepted(),
            flagged_nodes: round.flagged().clone(),
            excluded_nodes: self.tally.excluded(),
            status: round.status(),
            failure: round.failure(),
            changed_mind: round.changed_mind(),
        }
    }

    /// Drive a round to a terminal state (once) and archive its result.
    async fn settle(&self, slot: &RoundSlot, cancelled: Option<FailureReason>) -> ConsensusResult {
        let mut round = slot.round.lock().await;
        if round.status().is_terminal() {
            if let Some(done) = self.archived(round.round_id()) {
                return done;
            }
            return self.result_of(&round);
        }

        match cancelled {
            Some(reason) => {
                round.fail(reason);
            }
            None if round.has_quorum() => {
                let delta = self.current_delta(round.metric());
                match round.aggregate(delta) {
                    Ok(outcome) => self.record_commit(&outcome),
                    Err(e) => {
                        tracing::warn!(round = %round.round_id(), error = %e, "aggregation failed");
                    }
                }
            }
            None => {
                round.fail(FailureReason::Timeout);
            }
        }

        if round.status() == RoundStatus::Failed {
            self.record_failure(round.metric());
        }

        let result = self.result_of(&round);
        self.archive(result.clone());
        slot.arrivals.notify_waiters();
        result
    }

    fn record_commit(&self, outcome: &RoundOutcome) {
        for node in &outcome.flagged {
            let count = self.tally.flag(*node);
            if count == self.tally.threshold().saturating_add(1) {
                tracing::warn!(node = %node, count, "node excluded from future rounds");
            }
        }

        let cap = self.config.delta.history_len();
        let mut metrics = self.metrics.write().unwrap_or_else(PoisonError::into_inner);
        let state = metrics.entry(outcome.metric).or_default();
        state.last_committed = Some((outcome.round_id, outcome.value));
        state.last_round_failed = false;
        state.history.push_back(outcome.value);
        while state.history.len() > cap {
            state.history.pop_front();
        }
    }

    fn record_failure(&self, metric: MetricId) {
        self.metrics
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(metric)
            .or_default()
            .last_round_failed = true;
    }

    fn archive(&self, result: ConsensusResult) {
        let round_id = result.round_id;
        {
            let mut finished = self.finished.write().unwrap_or_else(PoisonError::into_inner);
            finished.insert(round_id, result);
            while finished.len() > self.config.result_history {
                finished.pop_first();
            }
        }
        self.live
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&round_id);
    }
}
