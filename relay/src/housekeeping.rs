//! Periodic heartbeat that keeps the relay diagnostics visible.
//!
//! The board runs this loop next to the relay workers. Every
//! `housekeeping_period_ms` it logs a heartbeat counter and a one-line
//! [`RelayStats`] summary.

use embassy_time::{Duration, Timer};
use log::info;

use crate::config::RelayConfig;
use crate::error::Result;
use crate::relay::{Relay, RelayStats};
use crate::worker::Worker;

/// Heartbeat and diagnostics loop.
pub struct HousekeepingWorker {
    relay: &'static Relay,
    period: Duration,
    beats: u64,
    last: Option<RelayStats>,
}

impl HousekeepingWorker {
    pub fn new(relay: &'static Relay, config: RelayConfig) -> Self {
        Self {
            relay,
            period: Duration::from_millis(u64::from(config.housekeeping_period_ms)),
            beats: 0,
            last: None,
        }
    }

    /// Heartbeats completed since start.
    pub fn beats(&self) -> u64 {
        self.beats
    }

    /// Snapshot taken on the most recent heartbeat.
    pub fn last_stats(&self) -> Option<RelayStats> {
        self.last
    }
}

impl Worker for HousekeepingWorker {
    fn name(&self) -> &'static str {
        "main"
    }

    async fn init(&mut self) -> Result<()> {
        info!("nus-relay {} begin", crate::VERSION);
        Ok(())
    }

    async fn step(&mut self) {
        Timer::after(self.period).await;
        self.beats += 1;
        info!("[main] heartbeat {}", self.beats);
        self.last = Some(self.relay.log_stats());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionState;

    fn fast() -> RelayConfig {
        RelayConfig {
            housekeeping_period_ms: 1,
            ..RelayConfig::default()
        }
    }

    #[tokio::test]
    async fn test_step_snapshots_relay_stats() {
        let relay: &'static Relay = Box::leak(Box::new(Relay::new()));
        relay.to_serial.try_write(b"queued", 1);
        let held = relay.pool.try_alloc().unwrap();

        let mut worker = HousekeepingWorker::new(relay, fast());
        worker.init().await.unwrap();
        assert_eq!(worker.last_stats(), None);

        worker.step().await;
        assert_eq!(worker.beats(), 1);

        let stats = worker.last_stats().unwrap();
        assert_eq!(stats.frames_in_use, 1);
        assert_eq!(stats.to_serial.buffered, 6);
        assert_eq!(stats.session, SessionState::Uninitialized);
        drop(held);
    }

    #[tokio::test]
    async fn test_heartbeat_counts_up() {
        let relay: &'static Relay = Box::leak(Box::new(Relay::new()));
        let mut worker = HousekeepingWorker::new(relay, fast());

        worker.step().await;
        worker.step().await;
        worker.step().await;
        assert_eq!(worker.beats(), 3);
        assert_eq!(worker.last_stats(), Some(relay.stats()));
    }
}
