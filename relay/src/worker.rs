//! # Worker Lifecycle
//!
//! Each long-running relay context is a [`Worker`]: an initialisation phase
//! that may fail, followed by an endless sequence of steps. A worker whose
//! initialisation fails never starts stepping; that is the only error class
//! that stops a component. Failures inside a step are reported by the step
//! itself and the loop moves on.

use core::convert::Infallible;
use core::future::Future;

use crate::error::Result;

/// A long-running relay loop.
pub trait Worker {
    /// Name used in log lines.
    fn name(&self) -> &'static str;

    /// One-time setup. An error here keeps the worker from running.
    fn init(&mut self) -> impl Future<Output = Result<()>>;

    /// One iteration of the loop. Blocks only on the worker's own input.
    fn step(&mut self) -> impl Future<Output = ()>;
}

/// Initialise `worker` and step it forever.
///
/// Returns only if initialisation fails, with the initialisation error.
pub async fn run<W: Worker>(mut worker: W) -> Result<Infallible> {
    if let Err(e) = worker.init().await {
        log::error!("[{}] init failed: {}", worker.name(), e);
        return Err(e);
    }

    log::info!("[{}] starting", worker.name());
    loop {
        worker.step().await;
    }
}

#[cfg(test)]
mod tests {
    use core::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::error::RelayError;

    struct Counting {
        fail_init: bool,
        steps: &'static AtomicU32,
    }

    impl Counting {
        fn new(fail_init: bool) -> (Self, &'static AtomicU32) {
            let steps: &'static AtomicU32 = Box::leak(Box::new(AtomicU32::new(0)));
            (Self { fail_init, steps }, steps)
        }
    }

    impl Worker for Counting {
        fn name(&self) -> &'static str {
            "counting"
        }

        async fn init(&mut self) -> Result<()> {
            if self.fail_init {
                Err(RelayError::DeviceNotReady)
            } else {
                Ok(())
            }
        }

        async fn step(&mut self) {
            self.steps.fetch_add(1, Ordering::Relaxed);
            futures_lite::future::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_failed_init_never_steps() {
        let (worker, steps) = Counting::new(true);
        assert_eq!(run(worker).await.unwrap_err(), RelayError::DeviceNotReady);
        assert_eq!(steps.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn test_successful_init_keeps_running() {
        let (worker, steps) = Counting::new(false);
        let outcome = tokio::time::timeout(std::time::Duration::from_millis(20), run(worker)).await;
        assert!(outcome.is_err(), "worker loop must not return");
        assert!(steps.load(Ordering::Relaxed) > 0);
    }
}
