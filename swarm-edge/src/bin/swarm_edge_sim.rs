//! In-memory fleet simulation.
//!
//! Every node samples its resources, admits a detection task, gates the
//! observation through its transmission controller and gossips a signed
//! report. Each node runs its own aggregator, so every node reaches its own
//! verdict; the last node lies about every value when `f > 0`.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use swarm_edge::core::crypto::{KeyPair, ReportAuth};
use swarm_edge::core::scheduler::Action;
use swarm_edge::core::traits::StaticProbe;
use swarm_edge::net::trust::Ed25519ReportVerifier;
use swarm_edge::net::{MockNetwork, MockTransport};
use swarm_edge::runtime::tokio_runtime::{unix_millis, TokioRuntime};
use swarm_edge::{
    broadcast_heartbeat, broadcast_report, broadcast_round_result, broadcast_round_start,
    run_report_pump, spawn_sampler, AdaptiveScheduler, AggregatorError, ConsensusAggregator, EdgeConfig, MetricId, NodeId, NodeReport, ObservationSample,
    ResourceSampler, RoundId, SharedTransmissionController, SnapshotHandle, SourceId, Task,
    TaskPriority,
};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

const VEHICLE_COUNT: MetricId = MetricId(0);
const BYZANTINE_FACTOR: f64 = 12.0;

struct Args {
    nodes: usize,
    faults: Option<usize>,
    rounds: u64,
    config: Option<PathBuf>,
}

fn usage() -> ! {
    eprintln!("Usage: swarm_edge_sim [--nodes N] [--faults F] [--rounds R] [--config PATH]");
    eprintln!();
    eprintln!("Example:");
    eprintln!("  RUST_LOG=debug swarm_edge_sim --nodes 7 --faults 2 --rounds 20");
    std::process::exit(2);
}

fn parse_args() -> Args {
    let mut args = Args {
        nodes: 5,
        faults: None,
        rounds: 10,
        config: None,
    };
    let mut it = std::env::args().skip(1);
    while let Some(flag) = it.next() {
        let Some(value) = it.next() else { usage() };
        match flag.as_str() {
            "--nodes" => args.nodes = value.parse().unwrap_or_else(|_| usage()),
            "--faults" => args.faults = Some(value.parse().unwrap_or_else(|_| usage())),
            "--rounds" => args.rounds = value.parse().unwrap_or_else(|_| usage()),
            "--config" => args.config = Some(PathBuf::from(value)),
            _ => usage(),
        }
    }
    args
}

struct SimNode {
    index: usize,
    id: NodeId,
    auth: ReportAuth,
    transport: Arc<MockTransport>,
    aggregator: Arc<ConsensusAggregator>,
    scheduler: AdaptiveScheduler,
    controller: SharedTransmissionController,
    snapshots: SnapshotHandle,
    byzantine: bool,
    sequence: u64,
}

fn seed_for(index: usize) -> [u8; 32] {
    let mut seed = [0u8; 32];
    seed[..8].copy_from_slice(&(index as u64 + 1).to_le_bytes());
    seed
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if let Err(e) = run(parse_args()).await {
        error!(error = %e, "simulation failed");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = match &args.config {
        Some(path) => EdgeConfig::from_json_file(path)?,
        None => EdgeConfig::default(),
    };
    if let Some(faults) = args.faults {
        config.consensus.fault_tolerance = faults;
    }
    config.validate()?;

    let n = args.nodes;
    let f = config.consensus.fault_tolerance;
    info!(nodes = n, faults = f, rounds = args.rounds, "starting simulation");

    let network = MockNetwork::new();
    let runtime = Arc::new(TokioRuntime::new());
    let cancel = CancellationToken::new();

    let keys: Vec<KeyPair> = (0..n).map(|i| KeyPair::from_seed(seed_for(i))).collect();
    let mut verifier = Ed25519ReportVerifier::new();
    for key in &keys {
        verifier.register(key.public);
    }
    let verifier = Arc::new(verifier);
    let ids: Vec<NodeId> = keys.iter().map(KeyPair::node_id).collect();

    let mut nodes = Vec::with_capacity(n);
    let mut pumps = JoinSet::new();
    for (index, key) in keys.into_iter().enumerate() {
        let id = key.node_id();
        let transport = Arc::new(network.join(id));
        let aggregator = Arc::new(ConsensusAggregator::new(config.consensus.clone())?);

        let battery = 0.3 + 0.7 * (index as f64 / n.max(1) as f64);
        let sampler = Arc::new(ResourceSampler::new(
            StaticProbe::new(battery, 0.8, 0.3),
            unix_millis,
        ));
        let snapshots = spawn_sampler(
            runtime.clone(),
            sampler,
            Duration::from_millis(500),
            cancel.clone(),
        );

        {
            let transport = transport.clone();
            let verifier = verifier.clone();
            let aggregator = aggregator.clone();
            let cancel = cancel.clone();
            pumps.spawn(async move {
                let stats =
                    run_report_pump(transport.as_ref(), verifier.as_ref(), &aggregator, cancel)
                        .await;
                (index, stats)
            });
        }

        nodes.push(SimNode {
            index,
            id,
            auth: ReportAuth::new(key),
            transport,
            aggregator,
            scheduler: AdaptiveScheduler::new(config.scheduler.clone())?,
            controller: SharedTransmissionController::new(config.transmission.clone())?,
            snapshots,
            byzantine: f > 0 && index + 1 == n,
            sequence: 0,
        });
    }

    let mut committed = 0u64;
    for round in 1..=args.rounds {
        let round_id = RoundId(round);
        let truth = 40.0 + 10.0 * (round as f64 / 3.0).sin();

        for node in &nodes {
            for stale in node.aggregator.expire_overdue().await {
                warn!(node = %node.id, round = %stale.round_id, "overdue round expired");
            }
        }

        // followers open on the announcement or below, whichever comes first
        let leader = &nodes[0];
        let handle = match leader.aggregator.open_round(round_id, VEHICLE_COUNT, ids.iter().copied()) {
            Ok(handle) => handle,
            Err(e) => {
                warn!(round = %round_id, error = %e, "cannot open round");
                break;
            }
        };
        let deadline_ms = unix_millis() + config.consensus.collection_timeout_ms;
        broadcast_round_start(leader.transport.as_ref(), &handle, f, deadline_ms, round).await?;

        let mut open = true;
        for node in &nodes[1..] {
            match node.aggregator.open_round(round_id, VEHICLE_COUNT, ids.iter().copied()) {
                Ok(_) | Err(AggregatorError::DuplicateRound(_)) => {}
                Err(e) => {
                    warn!(round = %round_id, node = %node.id, error = %e, "cannot open round");
                    open = false;
                }
            }
        }
        if !open {
            break;
        }

        for node in nodes.iter_mut() {
            let snapshot = node.snapshots.latest();
            node.sequence += 1;
            broadcast_heartbeat(
                node.transport.as_ref(),
                round_id,
                snapshot.battery,
                snapshot.cpu_load,
                node.sequence,
            )
            .await?;
            let mut task = Task::new(round, TaskPriority::Normal, 2.0, 0.2);
            let decision = node.scheduler.admit(&mut task, &snapshot);
            if decision.action != Action::Execute {
                debug!(node = %node.id, reason = decision.reason.as_str(), "detection not admitted");
                continue;
            }

            let observed = truth + (node.index as f64 * 0.37).sin();
            let gate = node.controller.evaluate(ObservationSample::new(
                SourceId(node.index as u32),
                observed,
                snapshot.timestamp_ms,
            ));
            debug!(node = %node.id, observed, z = gate.z_score, forward = gate.transmit, "observation gated");

            let value = if node.byzantine {
                observed * BYZANTINE_FACTOR
            } else {
                observed
            };
            node.sequence += 1;
            let (signed, _) = broadcast_report(
                node.transport.as_ref(),
                &node.auth,
                NodeReport::new(round_id, node.id, value),
                node.sequence,
            )
            .await?;
            if let Err(e) = node.aggregator.submit_report(&signed).await {
                debug!(node = %node.id, error = %e, "own report not taken");
            }
        }

        let mut waits = JoinSet::new();
        for node in &nodes {
            let aggregator = node.aggregator.clone();
            let token = cancel.child_token();
            let index = node.index;
            waits.spawn(async move { (index, aggregator.await_round(round_id, token).await) });
        }

        let mut verdicts = Vec::with_capacity(n);
        while let Some(joined) = waits.join_next().await {
            let (index, result) = joined?;
            verdicts.push((index, result?));
        }
        verdicts.sort_by_key(|(index, _)| *index);

        let Some((_, reference)) = verdicts.first() else {
            break;
        };
        let agreeing = verdicts
            .iter()
            .filter(|(_, r)| r.value == reference.value)
            .count();
        if reference.is_committed() {
            committed += 1;
        }
        info!(
            round = %round_id,
            truth,
            value = ?reference.value,
            status = ?reference.status,
            flagged = reference.flagged_nodes.len(),
            excluded = reference.excluded_nodes.len(),
            agreeing,
            "round finished"
        );

        let leader = &nodes[0];
        broadcast_round_result(leader.transport.as_ref(), reference, round).await?;
    }

    for node in &nodes {
        let sched = node.scheduler.stats();
        let tx = node.controller.stats();
        info!(
            node = %node.id,
            byzantine = node.byzantine,
            executed = sched.executed,
            skipped = sched.skipped,
            forwarded = tx.frames_transmitted,
            bytes_saved = tx.bytes_saved,
            "node summary"
        );
    }
    if let Some(first) = nodes.first() {
        for entry in first.aggregator.fault_tally().entries() {
            info!(node = %entry.node, flags = entry.count, "fault tally");
        }
        if let Some(fallback) = first.aggregator.last_committed(VEHICLE_COUNT) {
            info!(value = fallback.value, confidence = ?fallback.confidence, "last committed");
        }
    }
    info!(committed, rounds = args.rounds, "simulation complete");

    cancel.cancel();
    while let Some(joined) = pumps.join_next().await {
        if let Ok((index, stats)) = joined {
            debug!(index, ?stats, "report pump");
        }
    }
    Ok(())
}
