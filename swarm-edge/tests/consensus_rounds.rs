//! End-to-end consensus rounds over the in-memory network.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use swarm_edge::core::crypto::{KeyPair, ReportAuth};
use swarm_edge::net::trust::Ed25519ReportVerifier;
use swarm_edge::net::{MockNetwork, MockTransport};
use swarm_edge::{
    broadcast_heartbeat, broadcast_report, broadcast_round_start, run_report_pump, RoundHandle, ConsensusAggregator, ConsensusConfig, FailureReason,
    MessageEnvelope, MessageType, MetricId, NodeId, NodeReport, PersistedState, PumpStats, RoundId,
    RoundStatus, SwarmTransport,
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const METRIC: MetricId = MetricId(7);

struct Fleet {
    keys: Vec<KeyPair>,
    transports: Vec<Arc<MockTransport>>,
    aggregator: Arc<ConsensusAggregator>,
    pump: JoinHandle<PumpStats>,
    cancel: CancellationToken,
}

impl Fleet {
    /// `n` nodes; node 0 hosts the aggregator and runs the report pump.
    fn new(n: u8, config: ConsensusConfig) -> Self {
        let keys: Vec<KeyPair> = (1..=n).map(|s| KeyPair::from_seed([s; 32])).collect();
        let network = MockNetwork::new();
        let transports: Vec<Arc<MockTransport>> = keys
            .iter()
            .map(|k| Arc::new(network.join(k.node_id())))
            .collect();

        let mut verifier = Ed25519ReportVerifier::new();
        for k in &keys {
            verifier.register(k.public);
        }

        let aggregator = Arc::new(ConsensusAggregator::new(config).unwrap());
        let cancel = CancellationToken::new();
        let pump = {
            let transport = transports[0].clone();
            let aggregator = aggregator.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                run_report_pump(transport.as_ref(), &verifier, &aggregator, cancel).await
            })
        };

        Self {
            keys,
            transports,
            aggregator,
            pump,
            cancel,
        }
    }

    fn ids(&self) -> Vec<NodeId> {
        self.keys.iter().map(KeyPair::node_id).collect()
    }

    /// Node `i` (1-based, never 0) gossips `value` for `round`.
    async fn report(&self, i: usize, round: u64, value: f64) {
        let key = &self.keys[i];
        broadcast_report(
            self.transports[i].as_ref(),
            &ReportAuth::new(key.clone()),
            NodeReport::new(RoundId(round), key.node_id(), value),
            round,
        )
        .await
        .unwrap();
    }

    /// Node 0 submits its own report directly.
    async fn report_local(&self, round: u64, value: f64) {
        let key = &self.keys[0];
        let signed = ReportAuth::new(key.clone())
            .sign_report(NodeReport::new(RoundId(round), key.node_id(), value));
        self.aggregator.submit_report(&signed).await.unwrap();
    }

    async fn shutdown(self) -> PumpStats {
        self.cancel.cancel();
        self.pump.await.unwrap()
    }
}

#[tokio::test]
async fn byzantine_node_is_clipped_and_flagged() {
    let fleet = Fleet::new(5, ConsensusConfig::default());
    fleet.aggregator.open_round(RoundId(1), METRIC, fleet.ids()).unwrap();

    fleet.report_local(1, 42.0).await;
    for (i, v) in [(1, 43.0), (2, 41.0), (3, 44.0), (4, 500.0)] {
        fleet.report(i, 1, v).await;
    }

    let result = fleet
        .aggregator
        .await_round(RoundId(1), CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(result.status, RoundStatus::Committed);
    let value = result.value.unwrap();
    assert!((value - 42.5).abs() / 42.5 < 0.02, "committed {value}");
    assert_eq!(
        result.flagged_nodes,
        BTreeSet::from([fleet.keys[4].node_id()])
    );

    let stats = fleet.shutdown().await;
    assert_eq!(stats.accepted, 4);
    assert_eq!(stats.untrusted, 0);
}

#[tokio::test(start_paused = true)]
async fn two_of_five_reports_fail_the_round() {
    let fleet = Fleet::new(5, ConsensusConfig::default());
    fleet.aggregator.open_round(RoundId(2), METRIC, fleet.ids()).unwrap();
    fleet.report_local(2, 42.0).await;
    fleet.report(1, 2, 43.0).await;

    let result = fleet
        .aggregator
        .await_round(RoundId(2), CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(result.status, RoundStatus::Failed);
    assert_eq!(result.failure, Some(FailureReason::Timeout));
    assert_eq!(result.value, None);
    fleet.shutdown().await;
}

#[tokio::test]
async fn forged_report_never_reaches_the_aggregator() {
    let fleet = Fleet::new(4, ConsensusConfig::default());
    fleet.aggregator.open_round(RoundId(3), METRIC, fleet.ids()).unwrap();

    // node 3 claims to be node 2, signing with its own key
    let forged = ReportAuth::new(fleet.keys[3].clone())
        .sign_report(NodeReport::new(RoundId(3), fleet.keys[2].node_id(), 1e9));
    let bytes = MessageEnvelope::wrap(fleet.keys[3].node_id(), MessageType::NodeReport, &forged)
        .unwrap()
        .serialize()
        .unwrap();
    fleet.transports[3]
        .send(fleet.keys[0].node_id(), &bytes)
        .await
        .unwrap();
    fleet.transports[3]
        .send(fleet.keys[0].node_id(), b"garbage")
        .await
        .unwrap();

    fleet.report_local(3, 10.0).await;
    for i in 1..=3 {
        fleet.report(i, 3, 10.0 + i as f64 * 0.1).await;
    }
    let result = fleet
        .aggregator
        .await_round(RoundId(3), CancellationToken::new())
        .await
        .unwrap();
    assert!(result.is_committed());
    assert!(result.value.unwrap() < 11.0);

    let stats = fleet.shutdown().await;
    assert_eq!(stats.untrusted, 1);
    assert_eq!(stats.malformed, 1);
    assert_eq!(stats.accepted, 3);
}

#[tokio::test(start_paused = true)]
async fn unrelated_rounds_do_not_block_each_other() {
    let fleet = Fleet::new(4, ConsensusConfig::default());
    let slow = RoundId(10);
    let fast = RoundId(11);
    fleet.aggregator.open_round(slow, METRIC, fleet.ids()).unwrap();
    fleet.aggregator.open_round(fast, MetricId(8), fleet.ids()).unwrap();

    let slow_wait = {
        let aggregator = fleet.aggregator.clone();
        tokio::spawn(async move { aggregator.await_round(slow, CancellationToken::new()).await })
    };

    fleet.report_local(11, 5.0).await;
    for i in 1..=3 {
        fleet.report(i, 11, 5.0).await;
    }
    let start = tokio::time::Instant::now();
    let fast_result = fleet
        .aggregator
        .await_round(fast, CancellationToken::new())
        .await
        .unwrap();
    assert!(fast_result.is_committed());
    assert!(start.elapsed() < Duration::from_secs(1));
    assert!(!slow_wait.is_finished());

    let slow_result = slow_wait.await.unwrap().unwrap();
    assert_eq!(slow_result.failure, Some(FailureReason::Timeout));
    fleet.shutdown().await;
}

#[tokio::test]
async fn repeat_offender_is_excluded_and_exclusion_survives_restart() {
    let config = ConsensusConfig {
        exclusion_threshold: 1,
        ..ConsensusConfig::default()
    };
    let fleet = Fleet::new(5, config.clone());
    let liar = fleet.keys[4].node_id();

    for round in 1..=2u64 {
        let handle = fleet
            .aggregator
            .open_round(RoundId(round), METRIC, fleet.ids())
            .unwrap();
        assert_eq!(handle.expected.len(), 5);
        fleet.report_local(round, 20.0).await;
        for i in 1..=3 {
            fleet.report(i, round, 20.0 + i as f64).await;
        }
        fleet.report(4, round, -1_000.0).await;
        let result = fleet
            .aggregator
            .await_round(RoundId(round), CancellationToken::new())
            .await
            .unwrap();
        assert!(result.flagged_nodes.contains(&liar));
    }
    assert!(fleet.aggregator.fault_tally().is_excluded(&liar));

    let handle = fleet
        .aggregator
        .open_round(RoundId(3), METRIC, fleet.ids())
        .unwrap();
    assert_eq!(handle.expected.len(), 4);
    assert!(handle.excluded.contains(&liar));

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("aggregator-state.json");
    fleet.aggregator.snapshot_state().save(&path).unwrap();
    fleet.shutdown().await;

    let restarted = ConsensusAggregator::new(config).unwrap();
    restarted.restore_state(&PersistedState::load(&path).unwrap());
    assert!(restarted.fault_tally().is_excluded(&liar));
    let fallback = restarted.last_committed(METRIC).unwrap();
    assert_eq!(fallback.round_id, RoundId(2));
}

#[tokio::test]
async fn announced_round_is_opened_by_the_pump() {
    let fleet = Fleet::new(5, ConsensusConfig::default());
    let round = RoundId(20);
    let handle = RoundHandle {
        round_id: round,
        metric: METRIC,
        expected: fleet.ids()[1..].iter().copied().collect(),
        excluded: BTreeSet::new(),
        quorum: 3,
    };
    broadcast_round_start(fleet.transports[1].as_ref(), &handle, 1, 0, 1)
        .await
        .unwrap();

    // node 1 is not a participant of this one
    let foreign = RoundHandle {
        round_id: RoundId(21),
        expected: [0, 2, 3, 4].iter().map(|&i| fleet.keys[i].node_id()).collect(),
        ..handle.clone()
    };
    broadcast_round_start(fleet.transports[1].as_ref(), &foreign, 1, 0, 2)
        .await
        .unwrap();
    broadcast_heartbeat(fleet.transports[2].as_ref(), round, 0.7, 0.2, 1)
        .await
        .unwrap();

    for i in 1..=4 {
        fleet.report(i, 20, 12.0).await;
    }
    tokio::time::timeout(Duration::from_secs(5), async {
        while fleet.aggregator.get_result(round).await.is_none() {
            tokio::task::yield_now().await;
        }
    })
    .await
    .unwrap();

    let result = fleet
        .aggregator
        .await_round(round, CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(result.value, Some(12.0));
    assert!(fleet.aggregator.get_result(RoundId(21)).await.is_none());

    let stats = fleet.shutdown().await;
    assert_eq!(stats.rounds_opened, 1);
    assert_eq!(stats.untrusted, 1);
    assert_eq!(stats.heartbeats, 1);
    assert_eq!(stats.accepted, 4);
}
