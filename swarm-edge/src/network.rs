//! Report gossip over a [`SwarmTransport`].
//!
//! [`broadcast_report`] signs, frames and broadcasts a node's own report;
//! [`run_report_pump`] is the receive loop that turns inbound envelopes into
//! `submit_report` calls, after the trust layer has vouched for them. Round
//! announcements and heartbeats ride the same transport.

use swarm_edge_core::consensus::{NodeReport, RoundId};
use swarm_edge_core::crypto::ReportAuth;
use swarm_edge_core::traits::NodeId;
use swarm_edge_net::protocol::{
    HeartbeatMessage, MessageEnvelope, MessageType, RoundResultMessage, RoundStartMessage,
};
use swarm_edge_net::traits::{BroadcastStats, SwarmTransport};
use swarm_edge_net::trust::ReportVerifier;
use swarm_edge_runtime::tokio_runtime::unix_millis;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::aggregator::{AggregatorError, ConsensusAggregator, ConsensusResult, RoundHandle};

/// Gossip errors
#[derive(Debug, Error)]
pub enum GossipError {
    /// Framing or transport failure
    #[error("network: {0}")]
    Net(#[from] swarm_edge_net::Error),
    /// Report is not this node's to send
    #[error("report node {report} does not match transport node {local}")]
    ForeignReport {
        /// Node named in the report
        report: NodeId,
        /// Node owning the transport
        local: NodeId,
    },
}

fn now_secs() -> u32 {
    (unix_millis() / 1000) as u32
}

/// Sign `report` with `auth`, frame it and broadcast it to every peer.
///
/// Returns the signed report so the caller can also submit it locally.
pub async fn broadcast_report<T>(
    transport: &T,
    auth: &ReportAuth,
    report: NodeReport,
    sequence: u64,
) -> Result<(NodeReport, BroadcastStats), GossipError>
where
    T: SwarmTransport + ?Sized,
{
    let local = transport.local_id();
    if report.node != local {
        return Err(GossipError::ForeignReport {
            report: report.node,
            local,
        });
    }

    let signed = auth.sign_report(report);
    let bytes = MessageEnvelope::wrap(local, MessageType::NodeReport, &signed)?
        .with_sequence(sequence)
        .with_timestamp(now_secs())
        .serialize()?;
    let stats = transport.broadcast(&bytes).await?;
    tracing::debug!(
        round = %signed.round_id,
        node = %local,
        peers = stats.peers_sent,
        failed = stats.failed,
        "report broadcast"
    );
    Ok((signed, stats))
}

/// Announce a finished round to every peer
pub async fn broadcast_round_result<T>(
    transport: &T,
    result: &ConsensusResult,
    sequence: u64,
) -> Result<BroadcastStats, GossipError>
where
    T: SwarmTransport + ?Sized,
{
    let message = RoundResultMessage {
        round_id: result.round_id,
        metric: result.metric,
        value: result.value,
        flagged: result.flagged_nodes.iter().copied().collect(),
    };
    let bytes = MessageEnvelope::wrap(transport.local_id(), MessageType::RoundResult, &message)?
        .with_sequence(sequence)
        .with_timestamp(now_secs())
        .serialize()?;
    Ok(transport.broadcast(&bytes).await?)
}

/// Announce a round opened locally so peers open it too.
///
/// `deadline_ms` is the announcer's collection deadline in unix millis; peers
/// keep their own configured timeout.
pub async fn broadcast_round_start<T>(
    transport: &T,
    handle: &RoundHandle,
    faults: usize,
    deadline_ms: u64,
    sequence: u64,
) -> Result<BroadcastStats, GossipError>
where
    T: SwarmTransport + ?Sized,
{
    let message = RoundStartMessage {
        round_id: handle.round_id,
        metric: handle.metric,
        expected: handle.expected.iter().copied().collect(),
        faults: faults as u32,
        deadline_ms,
    };
    let bytes = MessageEnvelope::wrap(transport.local_id(), MessageType::RoundStart, &message)?
        .with_sequence(sequence)
        .with_timestamp(now_secs())
        .serialize()?;
    Ok(transport.broadcast(&bytes).await?)
}

/// Broadcast a liveness beat carrying quantized battery and load
pub async fn broadcast_heartbeat<T>(
    transport: &T,
    current_round: RoundId,
    battery: f64,
    load: f64,
    sequence: u64,
) -> Result<BroadcastStats, GossipError>
where
    T: SwarmTransport + ?Sized,
{
    let message = HeartbeatMessage::from_levels(current_round, battery, load);
    let bytes = MessageEnvelope::wrap(transport.local_id(), MessageType::Heartbeat, &message)?
        .with_sequence(sequence)
        .with_timestamp(now_secs())
        .serialize()?;
    Ok(transport.broadcast(&bytes).await?)
}

/// What a report pump did before it stopped
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PumpStats {
    /// Frames received
    pub received: u64,
    /// Reports accepted by the aggregator
    pub accepted: u64,
    /// Reports the trust layer refused
    pub untrusted: u64,
    /// Reports the aggregator refused
    pub rejected: u64,
    /// Frames that failed to decode
    pub malformed: u64,
    /// Rounds opened from a peer's announcement
    pub rounds_opened: u64,
    /// Heartbeats seen
    pub heartbeats: u64,
    /// Valid frames needing no action (round results, rounds already open)
    pub ignored: u64,
}

/// Receive, decode, verify and submit reports until `cancel` fires or the
/// transport closes.
///
/// Round announcements from a participant open the round locally; heartbeats
/// are counted.
pub async fn run_report_pump<T, V>(
    transport: &T,
    verifier: &V,
    aggregator: &ConsensusAggregator,
    cancel: CancellationToken,
) -> PumpStats
where
    T: SwarmTransport + ?Sized,
    V: ReportVerifier + ?Sized,
{
    let mut stats = PumpStats::default();
    let local = transport.local_id();

    loop {
        let (from, bytes) = tokio::select! {
            _ = cancel.cancelled() => break,
            frame = transport.recv() => match frame {
                Ok(frame) => frame,
                Err(e) => {
                    tracing::warn!(node = %local, error = %e, "transport closed, report pump stopping");
                    break;
                }
            },
        };
        stats.received += 1;

        let envelope = match MessageEnvelope::deserialize(&bytes) {
            Ok(envelope) => envelope,
            Err(e) => {
                stats.malformed += 1;
                tracing::warn!(node = %local, %from, error = %e, "dropping undecodable frame");
                continue;
            }
        };
        match envelope.message_type {
            MessageType::NodeReport => {}
            MessageType::RoundStart => {
                handle_round_start(&envelope, from, aggregator, &mut stats);
                continue;
            }
            MessageType::Heartbeat => {
                match envelope.open::<HeartbeatMessage>(MessageType::Heartbeat) {
                    Ok(beat) => {
                        stats.heartbeats += 1;
                        tracing::trace!(
                            node = %local,
                            %from,
                            round = %beat.current_round,
                            battery = beat.battery,
                            load = beat.load,
                            "heartbeat"
                        );
                    }
                    Err(e) => {
                        stats.malformed += 1;
                        tracing::warn!(node = %local, %from, error = %e, "dropping malformed heartbeat");
                    }
                }
                continue;
            }
            MessageType::RoundResult => {
                stats.ignored += 1;
                tracing::trace!(node = %local, %from, "ignoring round result");
                continue;
            }
        }
        let report: NodeReport = match envelope.open(MessageType::NodeReport) {
            Ok(report) => report,
            Err(e) => {
                stats.malformed += 1;
                tracing::warn!(node = %local, %from, error = %e, "dropping malformed report");
                continue;
            }
        };

        if report.node != from || envelope.sender_id() != from {
            stats.untrusted += 1;
            tracing::warn!(node = %local, %from, claimed = %report.node, "report relayed for another node");
            continue;
        }
        if let Err(e) = verifier.verify(&report) {
            stats.untrusted += 1;
            tracing::warn!(node = %local, %from, error = %e, "untrusted report");
            continue;
        }

        match aggregator.submit_report(&report).await {
            Ok(_) => stats.accepted += 1,
            Err(e) => {
                stats.rejected += 1;
                tracing::debug!(node = %local, %from, round = %report.round_id, error = %e, "report not taken");
            }
        }
    }

    tracing::debug!(node = %local, ?stats, "report pump stopped");
    stats
}

fn handle_round_start(
    envelope: &MessageEnvelope,
    from: NodeId,
    aggregator: &ConsensusAggregator,
    stats: &mut PumpStats,
) {
    let start: RoundStartMessage = match envelope.open(MessageType::RoundStart) {
        Ok(start) => start,
        Err(e) => {
            stats.malformed += 1;
            tracing::warn!(%from, error = %e, "dropping malformed round start");
            return;
        }
    };
    if envelope.sender_id() != from || !start.expected.contains(&from) {
        stats.untrusted += 1;
        tracing::warn!(%from, round = %start.round_id, "round start from a non-participant");
        return;
    }
    let faults = aggregator.config().fault_tolerance;
    if start.faults as usize != faults {
        stats.rejected += 1;
        tracing::warn!(%from, round = %start.round_id, announced = start.faults, local = faults, "fault tolerance mismatch");
        return;
    }

    match aggregator.open_round(start.round_id, start.metric, start.expected) {
        Ok(_) => {
            stats.rounds_opened += 1;
            tracing::debug!(%from, round = %start.round_id, deadline_ms = start.deadline_ms, "round opened from announcement");
        }
        Err(AggregatorError::DuplicateRound(_)) => stats.ignored += 1,
        Err(e) => {
            stats.rejected += 1;
            tracing::warn!(%from, round = %start.round_id, error = %e, "announced round not opened");
        }
    }
}
