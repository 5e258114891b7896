//! Byzantine-tolerant consensus rounds over scalar node reports
//!
//! A [`ConsensusRound`] is the synchronous state machine behind one round:
//!
//! ```text
//! INIT ──start_collecting──▶ COLLECTING ──aggregate──▶ AGGREGATING ──▶ COMMITTED
//!                                 │
//!                                 └──fail / aggregate below quorum──▶ FAILED
//! ```
//!
//! Rounds require `n ≥ 3f + 1` expected participants and commit only with at
//! least `2f + 1` distinct reports. Aggregation clips every value to
//! `[median − Δ, median + Δ]`, takes the trimmed mean (f dropped from each end)
//! and flags every node whose raw value fell outside the clip bound.
//!
//! Waiting, timeouts and cancellation are the caller's business; see the
//! facade crate's async aggregator.

use alloc::collections::{BTreeMap, BTreeSet};
use alloc::vec::Vec;
use core::fmt;

use serde::{Deserialize, Serialize};

use crate::aggregation::clip_and_trim;
use crate::traits::{MetricId, NodeId};
use crate::{Error, Result};

/// Round identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoundId(pub u64);

impl fmt::Display for RoundId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "round-{}", self.0)
    }
}

/// State of a consensus round
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RoundStatus {
    /// Created, not yet accepting reports
    Init,
    /// Accepting reports
    Collecting,
    /// Computing the accepted value
    Aggregating,
    /// Value agreed
    Committed,
    /// Round abandoned
    Failed,
}

impl RoundStatus {
    /// Whether the round has finished
    pub const fn is_terminal(self) -> bool {
        matches!(self, RoundStatus::Committed | RoundStatus::Failed)
    }
}

/// Why a round failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureReason {
    /// Collection timeout elapsed below quorum
    Timeout,
    /// Caller cancelled the round
    Cancelled,
    /// Aggregation attempted below quorum
    InsufficientReports,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Timeout => write!(f, "collection timeout"),
            FailureReason::Cancelled => write!(f, "cancelled"),
            FailureReason::InsufficientReports => write!(f, "insufficient reports"),
        }
    }
}

/// One node's proposed value for a round
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeReport {
    /// Round this report belongs to
    pub round_id: RoundId,
    /// Reporting node
    pub node: NodeId,
    /// Proposed value
    pub value: f64,
    /// Optional Ed25519 signature (checked by the trust layer, not here)
    pub signature: Option<Vec<u8>>,
}

impl NodeReport {
    /// Create an unsigned report
    pub fn new(round_id: RoundId, node: NodeId, value: f64) -> Self {
        Self {
            round_id,
            node,
            value,
            signature: None,
        }
    }

    /// Attach a signature
    pub fn with_signature(mut self, sig: Vec<u8>) -> Self {
        self.signature = Some(sig);
        self
    }

    /// Serialize to compact postcard bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        postcard::to_allocvec(self).map_err(|_| Error::Serialization)
    }

    /// Deserialize from postcard bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        postcard::from_bytes(bytes).map_err(|_| Error::Serialization)
    }
}

/// How a submitted report was taken
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// First report from this node
    Accepted,
    /// Node changed its mind; previous value replaced
    Replaced,
}

/// Committed result of a round
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundOutcome {
    /// Round
    pub round_id: RoundId,
    /// Metric agreed on
    pub metric: MetricId,
    /// Accepted value
    pub value: f64,
    /// Median of raw reports
    pub median: f64,
    /// Clip half-width used
    pub delta: f64,
    /// Nodes whose raw value fell outside the clip bound
    pub flagged: BTreeSet<NodeId>,
    /// Reports aggregated
    pub reports_used: usize,
}

/// Synchronous state machine for one round
#[derive(Debug, Clone)]
pub struct ConsensusRound {
    round_id: RoundId,
    metric: MetricId,
    expected: BTreeSet<NodeId>,
    faults: usize,
    reports: BTreeMap<NodeId, f64>,
    status: RoundStatus,
    accepted: Option<f64>,
    flagged: BTreeSet<NodeId>,
    changed_mind: u64,
    failure: Option<FailureReason>,
}

impl ConsensusRound {
    /// Create a round in `Init`, rejecting `n < 3f + 1`.
    pub fn new(
        round_id: RoundId,
        metric: MetricId,
        expected: impl IntoIterator<Item = NodeId>,
        faults: usize,
    ) -> Result<Self> {
        let expected: BTreeSet<NodeId> = expected.into_iter().collect();
        let nodes = expected.len();
        if nodes < 3 * faults + 1 {
            return Err(Error::InvalidFaultTolerance { nodes, faults });
        }
        Ok(Self {
            round_id,
            metric,
            expected,
            faults,
            reports: BTreeMap::new(),
            status: RoundStatus::Init,
            accepted: None,
            flagged: BTreeSet::new(),
            changed_mind: 0,
            failure: None,
        })
    }

    /// `Init → Collecting`
    pub fn start_collecting(&mut self) -> Result<()> {
        if self.status != RoundStatus::Init {
            return Err(Error::RoundClosed);
        }
        self.status = RoundStatus::Collecting;
        Ok(())
    }

    /// Record a report. A second report from the same node replaces the first.
    pub fn submit(&mut self, report: &NodeReport) -> Result<SubmitOutcome> {
        if self.status != RoundStatus::Collecting {
            return Err(Error::RoundClosed);
        }
        if report.round_id != self.round_id || !report.value.is_finite() {
            return Err(Error::InvalidReport);
        }
        if !self.expected.contains(&report.node) {
            return Err(Error::UnexpectedNode);
        }

        match self.reports.insert(report.node, report.value) {
            Some(previous) => {
                self.changed_mind += 1;
                tracing::debug!(
                    round = %self.round_id,
                    node = %report.node,
                    previous,
                    value = report.value,
                    "node changed its report"
                );
                Ok(SubmitOutcome::Replaced)
            }
            None => Ok(SubmitOutcome::Accepted),
        }
    }

    /// Distinct reports required to commit (`2f + 1`)
    pub fn quorum(&self) -> usize {
        2 * self.faults + 1
    }

    /// Whether quorum is present
    pub fn has_quorum(&self) -> bool {
        self.reports.len() >= self.quorum()
    }

    /// Whether every expected node has reported
    pub fn is_complete(&self) -> bool {
        self.reports.len() == self.expected.len()
    }

    /// Move to `Failed` unless already terminal. Returns whether it changed.
    pub fn fail(&mut self, reason: FailureReason) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        tracing::info!(
            round = %self.round_id,
            metric = %self.metric,
            reports = self.reports.len(),
            quorum = self.quorum(),
            %reason,
            "consensus round failed"
        );
        self.status = RoundStatus::Failed;
        self.failure = Some(reason);
        true
    }

    /// Aggregate collected reports with clip half-width `delta` and commit.
    ///
    /// Below quorum the round fails and `InsufficientReports` is returned.
    pub fn aggregate(&mut self, delta: f64) -> Result<RoundOutcome> {
        if self.status != RoundStatus::Collecting {
            return Err(Error::RoundClosed);
        }
        if !self.has_quorum() {
            let have = self.reports.len();
            self.fail(FailureReason::InsufficientReports);
            return Err(Error::InsufficientReports {
                have,
                need: self.quorum(),
            });
        }

        self.status = RoundStatus::Aggregating;
        let (nodes, values): (Vec<NodeId>, Vec<f64>) =
            self.reports.iter().map(|(n, v)| (*n, *v)).unzip();

        let agg = match clip_and_trim(&values, delta, self.faults) {
            Ok(agg) => agg,
            Err(e) => {
                self.fail(FailureReason::InsufficientReports);
                return Err(e);
            }
        };

        self.flagged = agg.outliers.iter().map(|&i| nodes[i]).collect();
        for node in &self.flagged {
            tracing::warn!(
                round = %self.round_id,
                node = %node,
                value = self.reports.get(node).copied().unwrap_or(f64::NAN),
                lower = agg.lower,
                upper = agg.upper,
                "report outside clip bound"
            );
        }

        self.accepted = Some(agg.value);
        self.status = RoundStatus::Committed;
        tracing::info!(
            round = %self.round_id,
            metric = %self.metric,
            value = agg.value,
            median = agg.median,
            reports = values.len(),
            flagged = self.flagged.len(),
            "consensus round committed"
        );

        Ok(RoundOutcome {
            round_id: self.round_id,
            metric: self.metric,
            value: agg.value,
            median: agg.median,
            delta: agg.upper - agg.median,
            flagged: self.flagged.clone(),
            reports_used: values.len(),
        })
    }

    /// Round identifier
    pub fn round_id(&self) -> RoundId {
        self.round_id
    }

    /// Metric this round agrees on
    pub fn metric(&self) -> MetricId {
        self.metric
    }

    /// Expected participants
    pub fn expected(&self) -> &BTreeSet<NodeId> {
        &self.expected
    }

    /// Declared fault tolerance f
    pub fn faults(&self) -> usize {
        self.faults
    }

    /// Current status
    pub fn status(&self) -> RoundStatus {
        self.status
    }

    /// Accepted value once committed
    pub fn accepted(&self) -> Option<f64> {
        self.accepted
    }

    /// Nodes flagged out-of-bound this round
    pub fn flagged(&self) -> &BTreeSet<NodeId> {
        &self.flagged
    }

    /// Number of replaced reports
    pub fn changed_mind(&self) -> u64 {
        self.changed_mind
    }

    /// Distinct reports collected
    pub fn report_count(&self) -> usize {
        self.reports.len()
    }

    /// Collected reports by node
    pub fn reports(&self) -> &BTreeMap<NodeId, f64> {
        &self.reports
    }

    /// Why the round failed, if it did
    pub fn failure(&self) -> Option<FailureReason> {
        self.failure
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ROUND: RoundId = RoundId(7);
    const METRIC: MetricId = MetricId(1);

    fn node(id: u8) -> NodeId {
        NodeId::new([id; 32])
    }

    fn round(n: u8, f: usize) -> ConsensusRound {
        let mut r = ConsensusRound::new(ROUND, METRIC, (1..=n).map(node), f).unwrap();
        r.start_collecting().unwrap();
        r
    }

    #[test]
    fn rejects_insufficient_participants() {
        let result = ConsensusRound::new(ROUND, METRIC, (1..=3).map(node), 1);
        assert_eq!(
            result.err(),
            Some(Error::InvalidFaultTolerance { nodes: 3, faults: 1 })
        );
        assert!(ConsensusRound::new(ROUND, METRIC, (1..=4).map(node), 1).is_ok());
    }

    #[test]
    fn byzantine_value_is_clipped_and_flagged() {
        let mut r = round(5, 1);
        for (id, v) in [(1, 42.0), (2, 43.0), (3, 41.0), (4, 44.0), (5, 500.0)] {
            r.submit(&NodeReport::new(ROUND, node(id), v)).unwrap();
        }
        assert!(r.is_complete());

        let outcome = r.aggregate(10.0).unwrap();
        assert!((outcome.value - 42.5).abs() / 42.5 < 0.02, "value {}", outcome.value);
        assert_eq!(outcome.flagged.len(), 1);
        assert!(outcome.flagged.contains(&node(5)));
        assert_eq!(r.status(), RoundStatus::Committed);
        assert_eq!(r.accepted(), Some(outcome.value));
    }

    #[test]
    fn below_quorum_fails() {
        let mut r = round(5, 1);
        r.submit(&NodeReport::new(ROUND, node(1), 10.0)).unwrap();
        r.submit(&NodeReport::new(ROUND, node(2), 11.0)).unwrap();
        assert!(!r.has_quorum());

        let err = r.aggregate(5.0).unwrap_err();
        assert_eq!(err, Error::InsufficientReports { have: 2, need: 3 });
        assert_eq!(r.status(), RoundStatus::Failed);
        assert_eq!(r.failure(), Some(FailureReason::InsufficientReports));
    }

    #[test]
    fn duplicate_report_replaces_and_counts() {
        let mut r = round(4, 1);
        let first = r.submit(&NodeReport::new(ROUND, node(1), 10.0)).unwrap();
        let second = r.submit(&NodeReport::new(ROUND, node(1), 12.0)).unwrap();
        assert_eq!(first, SubmitOutcome::Accepted);
        assert_eq!(second, SubmitOutcome::Replaced);
        assert_eq!(r.changed_mind(), 1);
        assert_eq!(r.report_count(), 1);
        assert_eq!(r.reports().get(&node(1)), Some(&12.0));
    }

    #[test]
    fn rejects_foreign_and_invalid_reports() {
        let mut r = round(4, 1);
        assert_eq!(
            r.submit(&NodeReport::new(ROUND, node(9), 1.0)),
            Err(Error::UnexpectedNode)
        );
        assert_eq!(
            r.submit(&NodeReport::new(RoundId(8), node(1), 1.0)),
            Err(Error::InvalidReport)
        );
        assert_eq!(
            r.submit(&NodeReport::new(ROUND, node(1), f64::INFINITY)),
            Err(Error::InvalidReport)
        );
    }

    #[test]
    fn closed_round_rejects_reports() {
        let mut r = ConsensusRound::new(ROUND, METRIC, (1..=4).map(node), 1).unwrap();
        assert_eq!(
            r.submit(&NodeReport::new(ROUND, node(1), 1.0)),
            Err(Error::RoundClosed)
        );
        r.start_collecting().unwrap();
        assert!(r.fail(FailureReason::Cancelled));
        assert!(!r.fail(FailureReason::Timeout));
        assert_eq!(r.failure(), Some(FailureReason::Cancelled));
        assert_eq!(
            r.submit(&NodeReport::new(ROUND, node(1), 1.0)),
            Err(Error::RoundClosed)
        );
    }

    #[test]
    fn quorum_without_full_participation_commits() {
        let mut r = round(7, 2);
        for (id, v) in [(1, 100.0), (2, 101.0), (3, 99.0), (4, 100.5), (5, 98.5)] {
            r.submit(&NodeReport::new(ROUND, node(id), v)).unwrap();
        }
        assert!(r.has_quorum());
        assert!(!r.is_complete());
        let outcome = r.aggregate(5.0).unwrap();
        assert_eq!(outcome.reports_used, 5);
        assert!(outcome.flagged.is_empty());
        assert!((outcome.value - 100.0).abs() < 1.0);
    }

    #[test]
    fn report_wire_encoding_round_trips_signature() {
        let report = NodeReport::new(ROUND, node(9), -3.25).with_signature(vec![7u8; 64]);
        let bytes = report.to_bytes().unwrap();
        assert_eq!(NodeReport::from_bytes(&bytes).unwrap(), report);
        assert_eq!(NodeReport::from_bytes(&bytes[..4]), Err(Error::Serialization));
    }
}
