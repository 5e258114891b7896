//! Resource state sampling
//!
//! The sampler turns raw hardware readings into an immutable
//! [`ResourceSnapshot`]. Bad readings never surface as errors: out-of-range
//! values are clamped to the nearest boundary, and missing or non-finite values
//! degrade to the conservative reading (empty battery, no network, full load)
//! so downstream decisions become more restrictive, not less.

use core::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::traits::ResourceProbe;

/// Immutable view of local resources at one sampling tick.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResourceSnapshot {
    /// Battery fraction in `[0, 1]`
    pub battery: f64,
    /// Network quality in `[0, 1]`, higher is better
    pub network: f64,
    /// CPU load in `[0, 1]`
    pub cpu_load: f64,
    /// Sampling time (unix millis)
    pub timestamp_ms: u64,
}

impl ResourceSnapshot {
    /// Build a snapshot, correcting invalid readings.
    pub fn new(battery: f64, network: f64, cpu_load: f64, timestamp_ms: u64) -> Self {
        Self {
            battery: sanitize("battery", Some(battery), 0.0).0,
            network: sanitize("network", Some(network), 0.0).0,
            cpu_load: sanitize("cpu_load", Some(cpu_load), 1.0).0,
            timestamp_ms,
        }
    }

    /// The fail-safe snapshot: no battery, no network, saturated CPU.
    pub const fn conservative(timestamp_ms: u64) -> Self {
        Self {
            battery: 0.0,
            network: 0.0,
            cpu_load: 1.0,
            timestamp_ms,
        }
    }
}

/// Correct one reading. Returns the value and whether it had to be corrected.
fn sanitize(name: &'static str, raw: Option<f64>, conservative: f64) -> (f64, bool) {
    match raw {
        Some(v) if v.is_finite() && (0.0..=1.0).contains(&v) => (v, false),
        Some(v) if v.is_finite() => {
            let clamped = v.clamp(0.0, 1.0);
            tracing::warn!(reading = name, raw = v, clamped, "resource reading out of range");
            (clamped, true)
        }
        Some(v) => {
            tracing::warn!(reading = name, raw = v, fallback = conservative, "non-finite resource reading");
            (conservative, true)
        }
        None => {
            tracing::warn!(reading = name, fallback = conservative, "resource reading unavailable");
            (conservative, true)
        }
    }
}

/// Samples a [`ResourceProbe`] into snapshots.
///
/// `sample()` is non-blocking; the caller drives it on a fixed period.
pub struct ResourceSampler<P> {
    probe: P,
    clock_ms: fn() -> u64,
    samples: AtomicU64,
    invalid_readings: AtomicU64,
}

impl<P: ResourceProbe> ResourceSampler<P> {
    /// Create a sampler with an injectable clock (unix millis).
    pub fn new(probe: P, clock_ms: fn() -> u64) -> Self {
        Self {
            probe,
            clock_ms,
            samples: AtomicU64::new(0),
            invalid_readings: AtomicU64::new(0),
        }
    }

    /// Take one snapshot.
    pub fn sample(&self) -> ResourceSnapshot {
        let timestamp_ms = (self.clock_ms)();
        let (battery, b_bad) = sanitize("battery", self.probe.battery(), 0.0);
        let (network, n_bad) = sanitize("network", self.probe.network_quality(), 0.0);
        let (cpu_load, c_bad) = sanitize("cpu_load", self.probe.cpu_load(), 1.0);

        let corrected = b_bad as u64 + n_bad as u64 + c_bad as u64;
        if corrected > 0 {
            self.invalid_readings.fetch_add(corrected, Ordering::Relaxed);
        }
        self.samples.fetch_add(1, Ordering::Relaxed);

        ResourceSnapshot {
            battery,
            network,
            cpu_load,
            timestamp_ms,
        }
    }

    /// Number of snapshots taken
    pub fn samples_taken(&self) -> u64 {
        self.samples.load(Ordering::Relaxed)
    }

    /// Number of individual readings that had to be corrected
    pub fn invalid_readings(&self) -> u64 {
        self.invalid_readings.load(Ordering::Relaxed)
    }

    /// Access the underlying probe
    pub fn probe(&self) -> &P {
        &self.probe
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::StaticProbe;

    fn clock() -> u64 {
        1_000
    }

    #[test]
    fn valid_readings_pass_through() {
        let sampler = ResourceSampler::new(StaticProbe::new(0.8, 0.6, 0.3), clock);
        let snap = sampler.sample();
        assert_eq!(snap, ResourceSnapshot::new(0.8, 0.6, 0.3, 1_000));
        assert_eq!(sampler.invalid_readings(), 0);
        assert_eq!(sampler.samples_taken(), 1);
    }

    #[test]
    fn out_of_range_readings_clamp_to_boundary() {
        let sampler = ResourceSampler::new(StaticProbe::new(1.4, -0.2, 7.0), clock);
        let snap = sampler.sample();
        assert_eq!(snap.battery, 1.0);
        assert_eq!(snap.network, 0.0);
        assert_eq!(snap.cpu_load, 1.0);
        assert_eq!(sampler.invalid_readings(), 3);
    }

    #[test]
    fn nan_and_missing_readings_degrade_to_conservative() {
        let probe = StaticProbe {
            battery: Some(f64::NAN),
            network: None,
            cpu_load: Some(f64::INFINITY),
        };
        let sampler = ResourceSampler::new(probe, clock);
        let snap = sampler.sample();
        assert_eq!(snap, ResourceSnapshot::conservative(1_000));
        assert_eq!(sampler.invalid_readings(), 3);
    }

    #[test]
    fn snapshot_constructor_sanitizes() {
        let snap = ResourceSnapshot::new(f64::NAN, 2.0, 0.5, 7);
        assert_eq!(snap.battery, 0.0);
        assert_eq!(snap.network, 1.0);
        assert_eq!(snap.cpu_load, 0.5);
        assert_eq!(snap.timestamp_ms, 7);
    }

    #[test]
    fn snapshot_json_shape() {
        let snap = ResourceSnapshot::new(0.25, 0.5, 0.75, 42);
        let json = serde_json::to_value(snap).unwrap();
        assert_eq!(json["battery"], 0.25);
        assert_eq!(json["timestamp_ms"], 42);
        let back: ResourceSnapshot = serde_json::from_value(json).unwrap();
        assert_eq!(back, snap);
    }
}
