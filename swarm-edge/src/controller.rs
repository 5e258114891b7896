//! Thread-safe transmission controller.
//!
//! Same decisions as [`TransmissionController`](swarm_edge_core::transmission::TransmissionController),
//! but callable through `&self` from many tasks. Each source's baseline has
//! its own mutex, so two sources never wait on each other; calls for one
//! source are applied in the order they take that mutex.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use swarm_edge_core::traits::SourceId;
use swarm_edge_core::transmission::{
    rejected_decision, Baseline, ObservationSample, TransmissionConfig, TransmissionStats,
    TransmitDecision,
};

use crate::config::ConfigError;

#[derive(Debug, Default)]
struct Counters {
    seen: AtomicU64,
    transmitted: AtomicU64,
    rejected: AtomicU64,
    bytes_saved: AtomicU64,
}

/// Concurrent anomaly-gated transmission controller
#[derive(Debug)]
pub struct SharedTransmissionController {
    config: TransmissionConfig,
    baselines: RwLock<HashMap<SourceId, Arc<Mutex<Baseline>>>>,
    counters: Counters,
}

impl SharedTransmissionController {
    /// Create a controller, rejecting out-of-range configuration
    pub fn new(config: TransmissionConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            baselines: RwLock::new(HashMap::new()),
            counters: Counters::default(),
        })
    }

    /// Active configuration
    pub fn config(&self) -> &TransmissionConfig {
        &self.config
    }

    fn baseline_for(&self, source: SourceId) -> Arc<Mutex<Baseline>> {
        if let Some(b) = self
            .baselines
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&source)
        {
            return b.clone();
        }
        self.baselines
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(source)
            .or_insert_with(|| Arc::new(Mutex::new(Baseline::new(self.config.window_size))))
            .clone()
    }

    /// Decide whether `sample` leaves the node, then fold it into its baseline.
    pub fn evaluate(&self, sample: ObservationSample) -> TransmitDecision {
        self.counters.seen.fetch_add(1, Ordering::Relaxed);
        let baseline = self.baseline_for(sample.source);
        let mut baseline = baseline.lock().unwrap_or_else(PoisonError::into_inner);

        match baseline.evaluate(sample, self.config.z_threshold) {
            Some(decision) => {
                if decision.transmit {
                    self.counters.transmitted.fetch_add(1, Ordering::Relaxed);
                } else {
                    self.counters
                        .bytes_saved
                        .fetch_add(self.config.bytes_per_frame, Ordering::Relaxed);
                }
                decision
            }
            None => {
                self.counters.rejected.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(source = %sample.source, value = sample.value, "rejected non-finite observation");
                rejected_decision(&baseline)
            }
        }
    }

    /// Copy of a source's baseline
    pub fn baseline(&self, source: SourceId) -> Option<Baseline> {
        let slot = self
            .baselines
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&source)
            .cloned()?;
        let baseline = slot.lock().unwrap_or_else(PoisonError::into_inner).clone();
        Some(baseline)
    }

    /// Forget a source's history
    pub fn reset_source(&self, source: SourceId) -> bool {
        self.baselines
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&source)
            .is_some()
    }

    /// Number of sources tracked
    pub fn source_count(&self) -> usize {
        self.baselines
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Counters since construction
    pub fn stats(&self) -> TransmissionStats {
        TransmissionStats {
            frames_seen: self.counters.seen.load(Ordering::Relaxed),
            frames_transmitted: self.counters.transmitted.load(Ordering::Relaxed),
            frames_rejected: self.counters.rejected.load(Ordering::Relaxed),
            bytes_saved: self.counters.bytes_saved.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn sources_are_independent_across_threads() {
        let controller = Arc::new(SharedTransmissionController::new(TransmissionConfig::default()).unwrap());

        let handles: Vec<_> = (0..4u32)
            .map(|s| {
                let controller = controller.clone();
                thread::spawn(move || {
                    let base = 10.0 * (s + 1) as f64;
                    for i in 0..40u64 {
                        let jitter = if i % 2 == 0 { 0.5 } else { -0.5 };
                        controller.evaluate(ObservationSample::new(SourceId(s), base + jitter, i));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(controller.source_count(), 4);
        let stats = controller.stats();
        assert_eq!(stats.frames_seen, 160);
        // 30 warm-up transmits per source, steady samples suppressed afterwards
        assert_eq!(stats.frames_transmitted, 120);
        assert_eq!(stats.bytes_saved, 40 * 512);

        let b = controller.baseline(SourceId(2)).unwrap();
        assert!(b.is_ready());
        assert!((b.mean() - 30.0).abs() < 0.5);
    }

    #[test]
    fn spike_after_warm_up_transmits() {
        let controller = SharedTransmissionController::new(TransmissionConfig::default()).unwrap();
        for i in 0..30u64 {
            let v = if i % 2 == 0 { 9.0 } else { 11.0 };
            assert!(controller.evaluate(ObservationSample::new(SourceId(0), v, i)).transmit);
        }
        let spike = controller.evaluate(ObservationSample::new(SourceId(0), 25.0, 30));
        assert!(spike.transmit);
        assert!(spike.z_score > 2.0);

        let nan = controller.evaluate(ObservationSample::new(SourceId(0), f64::NAN, 31));
        assert!(!nan.transmit);
        assert_eq!(controller.stats().frames_rejected, 1);
        assert!(controller.reset_source(SourceId(0)));
        assert!(controller.baseline(SourceId(0)).is_none());
    }
}
