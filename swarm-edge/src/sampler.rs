//! Periodic resource sampling.
//!
//! [`spawn_sampler`] runs a [`ResourceSampler`] on a fixed period and publishes
//! each snapshot through a `watch` channel; consumers pull the most recent one
//! with [`SnapshotHandle::latest`] and never block on the probe.

use std::sync::Arc;
use std::time::Duration;

use swarm_edge_core::resource::{ResourceSampler, ResourceSnapshot};
use swarm_edge_core::traits::ResourceProbe;
use swarm_edge_runtime::SwarmRuntime;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Read side of a running sampler
#[derive(Debug, Clone)]
pub struct SnapshotHandle {
    rx: watch::Receiver<ResourceSnapshot>,
}

impl SnapshotHandle {
    /// Most recent snapshot
    pub fn latest(&self) -> ResourceSnapshot {
        *self.rx.borrow()
    }

    /// Wait for the next snapshot; `false` once the sampler has stopped
    pub async fn changed(&mut self) -> bool {
        self.rx.changed().await.is_ok()
    }
}

/// Sample once immediately, then every `period` until `cancel` fires.
pub fn spawn_sampler<P, R>(
    runtime: Arc<R>,
    sampler: Arc<ResourceSampler<P>>,
    period: Duration,
    cancel: CancellationToken,
) -> SnapshotHandle
where
    P: ResourceProbe + 'static,
    R: SwarmRuntime,
{
    let (tx, rx) = watch::channel(sampler.sample());
    let rt = runtime.clone();

    runtime.spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = rt.sleep(period) => {}
            }
            if tx.send(sampler.sample()).is_err() {
                break;
            }
        }
        tracing::debug!(samples = sampler.samples_taken(), "resource sampler stopped");
    });

    SnapshotHandle { rx }
}
