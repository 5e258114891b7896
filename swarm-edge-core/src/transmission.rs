//! Anomaly-gated transmission
//!
//! Each observation source keeps a sliding [`Baseline`] of its recent values.
//! A sample is forwarded upstream only when it deviates from that baseline by
//! more than `z_threshold` standard deviations; everything else is suppressed
//! locally to save bandwidth.
//!
//! ## Policy
//!
//! - **Warm-up**: until the window is full no statistical judgment is possible,
//!   so every sample is transmitted.
//! - **Adaptation**: every accepted sample enters the window whether or not it
//!   was transmitted, so a sustained shift (a traffic surge that persists)
//!   becomes the new normal instead of alerting forever.
//! - **Rejection**: non-finite values are neither transmitted nor added.

use alloc::collections::{BTreeMap, VecDeque};

use serde::{Deserialize, Serialize};

use crate::aggregation::sqrt_f64;
use crate::traits::SourceId;
use crate::{Error, Result};

/// Floor for σ so a perfectly flat window never divides by zero
pub const MIN_STD_DEV: f64 = 1e-6;

/// Default window capacity
pub const DEFAULT_WINDOW_SIZE: usize = 30;

/// One scalar observation from a source
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ObservationSample {
    /// Producing source
    pub source: SourceId,
    /// Observed value (e.g. vehicle count per frame)
    pub value: f64,
    /// Capture time (unix millis)
    pub timestamp_ms: u64,
}

impl ObservationSample {
    /// Create a sample
    pub const fn new(source: SourceId, value: f64, timestamp_ms: u64) -> Self {
        Self {
            source,
            value,
            timestamp_ms,
        }
    }
}

/// Transmit/suppress outcome for one sample
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TransmitDecision {
    /// Forward upstream?
    pub transmit: bool,
    /// Deviation in baseline standard deviations (0 during warm-up)
    pub z_score: f64,
    /// Baseline mean the sample was judged against
    pub baseline_mean: f64,
    /// Baseline standard deviation the sample was judged against
    pub baseline_std: f64,
    /// Whether the baseline window was full
    pub baseline_ready: bool,
}

/// Fixed-capacity FIFO window with derived mean and standard deviation
#[derive(Debug, Clone)]
pub struct Baseline {
    window: VecDeque<ObservationSample>,
    capacity: usize,
    mean: f64,
    std_dev: f64,
}

impl Baseline {
    /// Create an empty baseline. A capacity of 0 is treated as 1.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            window: VecDeque::with_capacity(capacity),
            capacity,
            mean: 0.0,
            std_dev: MIN_STD_DEV,
        }
    }

    /// Insert a sample, evicting the oldest once full.
    pub fn push(&mut self, sample: ObservationSample) {
        if self.window.len() == self.capacity {
            self.window.pop_front();
        }
        self.window.push_back(sample);
        self.recompute();
    }

    fn recompute(&mut self) {
        let n = self.window.len() as f64;
        let mean = self.window.iter().map(|s| s.value).sum::<f64>() / n;
        let var = self
            .window
            .iter()
            .map(|s| {
                let d = s.value - mean;
                d * d
            })
            .sum::<f64>()
            / n;
        self.mean = mean;
        self.std_dev = sqrt_f64(var).max(MIN_STD_DEV);
    }

    /// Window mean μ
    pub fn mean(&self) -> f64 {
        self.mean
    }

    /// Population standard deviation σ, floored at [`MIN_STD_DEV`]
    pub fn std_dev(&self) -> f64 {
        self.std_dev
    }

    /// Ready once the window is full
    pub fn is_ready(&self) -> bool {
        self.window.len() == self.capacity
    }

    /// Samples currently held
    pub fn len(&self) -> usize {
        self.window.len()
    }

    /// Whether the window is empty
    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    /// Window capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Samples oldest-first
    pub fn samples(&self) -> impl Iterator<Item = &ObservationSample> {
        self.window.iter()
    }

    /// `(value − μ) / σ` against the current window
    pub fn z_score(&self, value: f64) -> f64 {
        (value - self.mean) / self.std_dev
    }

    /// Judge `sample` against the window, then add it.
    ///
    /// Returns `None` (and leaves the window untouched) for non-finite values.
    pub fn evaluate(&mut self, sample: ObservationSample, z_threshold: f64) -> Option<TransmitDecision> {
        if !sample.value.is_finite() {
            return None;
        }

        let decision = if self.is_ready() {
            let z = self.z_score(sample.value);
            let magnitude = if z < 0.0 { -z } else { z };
            TransmitDecision {
                transmit: magnitude > z_threshold,
                z_score: z,
                baseline_mean: self.mean,
                baseline_std: self.std_dev,
                baseline_ready: true,
            }
        } else {
            TransmitDecision {
                transmit: true,
                z_score: 0.0,
                baseline_mean: self.mean,
                baseline_std: self.std_dev,
                baseline_ready: false,
            }
        };

        self.push(sample);
        Some(decision)
    }
}

/// Transmission controller tunables
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransmissionConfig {
    /// Baseline window capacity per source
    pub window_size: usize,
    /// |z| above which a sample is transmitted
    pub z_threshold: f64,
    /// Estimated payload size of one forwarded record
    pub bytes_per_frame: u64,
}

impl Default for TransmissionConfig {
    fn default() -> Self {
        Self {
            window_size: DEFAULT_WINDOW_SIZE,
            z_threshold: 2.0,
            bytes_per_frame: 512,
        }
    }
}

impl TransmissionConfig {
    /// Check ranges
    pub fn validate(&self) -> Result<()> {
        if self.window_size < 2 {
            return Err(Error::InvalidConfig("window_size must be at least 2"));
        }
        if !(self.z_threshold.is_finite() && self.z_threshold > 0.0) {
            return Err(Error::InvalidConfig("z_threshold must be positive"));
        }
        Ok(())
    }
}

/// Running transmission counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransmissionStats {
    /// Samples evaluated (including rejected)
    pub frames_seen: u64,
    /// Samples forwarded
    pub frames_transmitted: u64,
    /// Non-finite samples dropped
    pub frames_rejected: u64,
    /// `bytes_per_frame` × suppressed samples
    pub bytes_saved: u64,
}

impl TransmissionStats {
    /// Fraction of seen frames that were suppressed
    pub fn suppression_ratio(&self) -> f64 {
        if self.frames_seen == 0 {
            return 0.0;
        }
        1.0 - (self.frames_transmitted as f64 / self.frames_seen as f64)
    }
}

/// Single-owner controller holding one baseline per source.
///
/// For multi-threaded callers see the facade crate's shared controller, which
/// puts each source's baseline behind its own lock.
#[derive(Debug)]
pub struct TransmissionController {
    config: TransmissionConfig,
    baselines: BTreeMap<SourceId, Baseline>,
    stats: TransmissionStats,
}

impl TransmissionController {
    /// Create a controller, rejecting out-of-range configuration
    pub fn new(config: TransmissionConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            baselines: BTreeMap::new(),
            stats: TransmissionStats::default(),
        })
    }

    /// Active configuration
    pub fn config(&self) -> &TransmissionConfig {
        &self.config
    }

    /// Decide whether `sample` leaves the node, then fold it into its baseline.
    pub fn evaluate(&mut self, sample: ObservationSample) -> TransmitDecision {
        self.stats.frames_seen += 1;
        let window_size = self.config.window_size;
        let baseline = self
            .baselines
            .entry(sample.source)
            .or_insert_with(|| Baseline::new(window_size));

        match baseline.evaluate(sample, self.config.z_threshold) {
            Some(decision) => {
                if decision.transmit {
                    self.stats.frames_transmitted += 1;
                } else {
                    self.stats.bytes_saved += self.config.bytes_per_frame;
                }
                tracing::trace!(
                    source = %sample.source,
                    value = sample.value,
                    z = decision.z_score,
                    transmit = decision.transmit,
                    ready = decision.baseline_ready,
                    "transmission decision"
                );
                decision
            }
            None => {
                self.stats.frames_rejected += 1;
                tracing::warn!(source = %sample.source, value = sample.value, "rejected non-finite observation");
                rejected_decision(baseline)
            }
        }
    }

    /// Baseline for a source, if one exists
    pub fn baseline(&self, source: SourceId) -> Option<&Baseline> {
        self.baselines.get(&source)
    }

    /// Forget a source's history (e.g. camera re-aimed)
    pub fn reset_source(&mut self, source: SourceId) -> bool {
        self.baselines.remove(&source).is_some()
    }

    /// Number of sources tracked
    pub fn source_count(&self) -> usize {
        self.baselines.len()
    }

    /// Counters since construction
    pub fn stats(&self) -> TransmissionStats {
        self.stats
    }
}

/// Decision returned for a rejected sample: suppressed, baseline unchanged.
pub fn rejected_decision(baseline: &Baseline) -> TransmitDecision {
    TransmitDecision {
        transmit: false,
        z_score: 0.0,
        baseline_mean: baseline.mean(),
        baseline_std: baseline.std_dev(),
        baseline_ready: baseline.is_ready(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec::Vec;

    const SRC: SourceId = SourceId(1);

    fn sample(value: f64, ts: u64) -> ObservationSample {
        ObservationSample::new(SRC, value, ts)
    }

    fn controller() -> TransmissionController {
        TransmissionController::new(TransmissionConfig::default()).unwrap()
    }

    /// 15 values at μ+σ and 15 at μ−σ: population mean μ, std σ exactly.
    fn fill_with(c: &mut TransmissionController, mean: f64, std: f64) {
        for i in 0..30u64 {
            let v = if i % 2 == 0 { mean + std } else { mean - std };
            c.evaluate(sample(v, i));
        }
    }

    #[test]
    fn warm_up_transmits_everything() {
        let mut c = controller();
        for i in 0..29u64 {
            let d = c.evaluate(sample(10.0, i));
            assert!(d.transmit);
            assert!(!d.baseline_ready);
        }
        let d = c.evaluate(sample(10.0, 29));
        assert!(!d.baseline_ready, "30th sample is judged against 29");
        assert!(c.baseline(SRC).unwrap().is_ready());
    }

    #[test]
    fn surge_sample_is_transmitted_with_expected_z() {
        let mut c = controller();
        fill_with(&mut c, 9.20, 3.12);

        let b = c.baseline(SRC).unwrap();
        assert!((b.mean() - 9.20).abs() < 1e-9);
        assert!((b.std_dev() - 3.12).abs() < 1e-9);

        let d = c.evaluate(sample(28.0, 100));
        assert!(d.transmit);
        assert!(d.baseline_ready);
        assert!((d.z_score - 6.03).abs() < 0.01, "z = {}", d.z_score);
    }

    #[test]
    fn stable_stream_is_suppressed_while_window_moves() {
        let mut c = controller();
        fill_with(&mut c, 20.0, 2.0);

        let mut previous: Vec<u64> = c.baseline(SRC).unwrap().samples().map(|s| s.timestamp_ms).collect();
        for i in 0..100u64 {
            let v = 20.0 + if i % 3 == 0 { 1.5 } else { -1.0 };
            let d = c.evaluate(sample(v, 1_000 + i));
            assert!(!d.transmit, "sample {} with z {} transmitted", i, d.z_score);

            let current: Vec<u64> = c.baseline(SRC).unwrap().samples().map(|s| s.timestamp_ms).collect();
            assert_ne!(previous, current);
            previous = current;
        }
    }

    #[test]
    fn persistent_shift_becomes_new_normal() {
        let mut c = controller();
        fill_with(&mut c, 10.0, 1.0);

        let mut transmitted = 0;
        for i in 0..60u64 {
            let v = if i % 2 == 0 { 41.0 } else { 39.0 };
            if c.evaluate(sample(v, 100 + i)).transmit {
                transmitted += 1;
            }
        }
        assert!(transmitted > 0);
        // after a full window of the new regime nothing is anomalous
        assert!(!c.evaluate(sample(40.0, 500)).transmit);
    }

    #[test]
    fn non_finite_samples_are_rejected() {
        let mut c = controller();
        let d = c.evaluate(sample(f64::NAN, 0));
        assert!(!d.transmit);
        assert_eq!(c.baseline(SRC).map(|b| b.len()), Some(0));
        assert_eq!(c.stats().frames_rejected, 1);
        assert_eq!(c.stats().frames_seen, 1);
    }

    #[test]
    fn sources_are_independent() {
        let mut c = controller();
        fill_with(&mut c, 5.0, 1.0);
        let other = ObservationSample::new(SourceId(2), 500.0, 0);
        let d = c.evaluate(other);
        assert!(d.transmit);
        assert!(!d.baseline_ready);
        assert_eq!(c.source_count(), 2);
        assert!(c.reset_source(SourceId(2)));
        assert_eq!(c.source_count(), 1);
    }

    #[test]
    fn stats_count_bytes_saved() {
        let mut c = controller();
        fill_with(&mut c, 20.0, 2.0);
        for i in 0..10u64 {
            c.evaluate(sample(20.0, 100 + i));
        }
        let stats = c.stats();
        assert_eq!(stats.frames_seen, 40);
        assert_eq!(stats.frames_transmitted, 30);
        assert_eq!(stats.bytes_saved, 10 * 512);
        assert!((stats.suppression_ratio() - 0.25).abs() < 1e-12);
    }

    #[test]
    fn flat_window_uses_std_floor() {
        let mut b = Baseline::new(4);
        for i in 0..4 {
            b.push(sample(3.0, i));
        }
        assert_eq!(b.std_dev(), MIN_STD_DEV);
        assert!(b.z_score(3.0).abs() < 1e-12);
    }

    #[test]
    fn config_validation() {
        let bad = TransmissionConfig {
            window_size: 1,
            ..TransmissionConfig::default()
        };
        assert!(TransmissionController::new(bad).is_err());
    }
}
