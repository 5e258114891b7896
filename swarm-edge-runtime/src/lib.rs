//! # SwarmEdge Runtime
//!
//! Async runtime abstractions for SwarmEdge.
//!
//! Components that need a clock, a timer or a task spawner take a
//! [`SwarmRuntime`] instead of calling Tokio directly, so they can run against
//! [`mock_runtime::MockRuntime`] in tests.
//!
//! ## Feature Flags
//!
//! - `tokio` (default): Use Tokio runtime

#![cfg_attr(not(feature = "std"), no_std)]

use core::future::Future;
use core::time::Duration;

/// Runtime trait for async operations
pub trait SwarmRuntime: Send + Sync + 'static {
    /// Current time in milliseconds
    fn now(&self) -> u64;

    /// Sleep for the specified duration
    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send;

    /// Spawn a task (if supported by the runtime)
    fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static;
}

#[cfg(feature = "tokio")]
pub mod tokio_runtime {
    //! Tokio-based runtime implementation

    use super::*;

    /// Milliseconds since the Unix epoch, `0` if the system clock is before it.
    ///
    /// Usable wherever a plain `fn() -> u64` clock is expected.
    pub fn unix_millis() -> u64 {
        use std::time::{SystemTime, UNIX_EPOCH};
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64
    }

    /// Tokio runtime wrapper
    #[derive(Debug, Clone, Default)]
    pub struct TokioRuntime;

    impl TokioRuntime {
        /// Create a new Tokio runtime wrapper
        pub fn new() -> Self {
            Self
        }
    }

    impl SwarmRuntime for TokioRuntime {
        fn now(&self) -> u64 {
            unix_millis()
        }

        async fn sleep(&self, duration: Duration) {
            tokio::time::sleep(duration).await;
        }

        fn spawn<F>(&self, future: F)
        where
            F: Future<Output = ()> + Send + 'static,
        {
            tokio::spawn(future);
        }
    }
}

/// Mock runtime for testing
pub mod mock_runtime {
    use super::*;
    use core::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

    /// Deterministic runtime: the clock only moves when told to.
    ///
    /// `sleep` advances the clock by the requested duration and returns at once;
    /// `spawn` drops the future and only counts it.
    #[derive(Debug, Default)]
    pub struct MockRuntime {
        current_time_ms: AtomicU64,
        spawned: AtomicUsize,
    }

    impl MockRuntime {
        /// Create a new mock runtime starting at `start_ms`
        pub fn new(start_ms: u64) -> Self {
            Self {
                current_time_ms: AtomicU64::new(start_ms),
                spawned: AtomicUsize::new(0),
            }
        }

        /// Advance the mock clock
        pub fn advance(&self, duration: Duration) {
            self.current_time_ms
                .fetch_add(duration.as_millis() as u64, Ordering::SeqCst);
        }

        /// Number of futures handed to `spawn`
        pub fn spawned(&self) -> usize {
            self.spawned.load(Ordering::SeqCst)
        }
    }

    impl SwarmRuntime for MockRuntime {
        fn now(&self) -> u64 {
            self.current_time_ms.load(Ordering::SeqCst)
        }

        async fn sleep(&self, duration: Duration) {
            self.advance(duration);
        }

        fn spawn<F>(&self, _future: F)
        where
            F: Future<Output = ()> + Send + 'static,
        {
            self.spawned.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Get the default runtime based on features
#[cfg(feature = "tokio")]
pub fn default_runtime() -> tokio_runtime::TokioRuntime {
    tokio_runtime::TokioRuntime::new()
}

#[cfg(test)]
mod tests {
    use super::mock_runtime::MockRuntime;
    use super::*;

    #[tokio::test]
    async fn mock_sleep_advances_clock() {
        let rt = MockRuntime::new(1_000);
        rt.sleep(Duration::from_millis(250)).await;
        rt.advance(Duration::from_secs(1));
        assert_eq!(rt.now(), 2_250);
    }

    #[test]
    fn mock_spawn_counts() {
        let rt = MockRuntime::default();
        rt.spawn(async {});
        rt.spawn(async {});
        assert_eq!(rt.spawned(), 2);
        assert_eq!(rt.now(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn tokio_runtime_sleep_respects_paused_clock() {
        let rt = default_runtime();
        let start = tokio::time::Instant::now();
        rt.sleep(Duration::from_secs(5)).await;
        assert_eq!(start.elapsed(), Duration::from_secs(5));
        assert!(rt.now() > 0);
    }

    #[tokio::test]
    async fn tokio_runtime_spawns_onto_tokio() {
        let rt = default_runtime();
        let (tx, rx) = tokio::sync::oneshot::channel();
        rt.spawn(async move {
            let _ = tx.send(7u8);
        });
        assert_eq!(rx.await.ok(), Some(7));
    }
}
