//! # usage-lens runtime
//!
//! Async runtime abstraction for usage-lens.
//!
//! The trace ingestor sleeps between fetch attempts and stamps query windows
//! with the current time. Both go through [`LensRuntime`] so tests can use
//! [`mock_runtime::MockRuntime`], which never waits and records every sleep.
//!
//! ## Feature Flags
//!
//! - `tokio` (default): Use Tokio runtime

use core::future::Future;
use core::time::Duration;

/// Runtime trait for async operations
pub trait LensRuntime: Send + Sync + 'static {
    /// Current wall-clock time in microseconds since the Unix epoch
    fn now_unix_micros(&self) -> u64;

    /// Sleep for the specified duration
    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send;
}

#[cfg(feature = "tokio")]
pub mod tokio_runtime {
    //! Tokio-based runtime implementation

    use super::*;

    /// Tokio runtime wrapper
    #[derive(Debug, Clone, Default)]
    pub struct TokioRuntime;

    impl TokioRuntime {
        /// Create a new Tokio runtime wrapper
        pub fn new() -> Self {
            Self
        }
    }

    impl LensRuntime for TokioRuntime {
        fn now_unix_micros(&self) -> u64 {
            use std::time::{SystemTime, UNIX_EPOCH};
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_micros() as u64
        }

        async fn sleep(&self, duration: Duration) {
            tokio::time::sleep(duration).await;
        }
    }
}

/// Mock runtime for testing
pub mod mock_runtime {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Mutex;

    /// Mock runtime for testing without real waiting.
    ///
    /// Sleeping advances the mock clock by the requested duration and returns
    /// immediately.
    #[derive(Debug, Default)]
    pub struct MockRuntime {
        current_time_us: AtomicU64,
        sleeps: Mutex<Vec<Duration>>,
    }

    impl MockRuntime {
        /// Create a new mock runtime starting at the epoch
        pub fn new() -> Self {
            Self::starting_at(0)
        }

        /// Create a mock runtime whose clock starts at `unix_micros`
        pub fn starting_at(unix_micros: u64) -> Self {
            Self {
                current_time_us: AtomicU64::new(unix_micros),
                sleeps: Mutex::new(Vec::new()),
            }
        }

        /// Advance the mock clock
        pub fn advance(&self, duration: Duration) {
            self.current_time_us
                .fetch_add(duration.as_micros() as u64, Ordering::SeqCst);
        }

        /// Every sleep requested so far, in order
        pub fn sleeps(&self) -> Vec<Duration> {
            match self.sleeps.lock() {
                Ok(guard) => guard.clone(),
                Err(poisoned) => poisoned.into_inner().clone(),
            }
        }
    }

    impl LensRuntime for MockRuntime {
        fn now_unix_micros(&self) -> u64 {
            self.current_time_us.load(Ordering::SeqCst)
        }

        async fn sleep(&self, duration: Duration) {
            match self.sleeps.lock() {
                Ok(mut guard) => guard.push(duration),
                Err(poisoned) => poisoned.into_inner().push(duration),
            }
            self.advance(duration);
        }
    }
}

/// Get the default runtime based on features
#[cfg(feature = "tokio")]
pub fn default_runtime() -> tokio_runtime::TokioRuntime {
    tokio_runtime::TokioRuntime::new()
}
