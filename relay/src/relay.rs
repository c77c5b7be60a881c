//! # Relay Context
//!
//! [`Relay`] owns every piece of state shared between driver callbacks and
//! worker loops. It is `const`-constructible so the firmware keeps one in a
//! `static`, and every component receives `&'static Relay` explicitly instead
//! of reaching for a global.
//!
//! ```text
//! ┌──────────────────────────────── Relay ────────────────────────────────┐
//! │                                                                       │
//! │  UART RX ──► rx_queue ──► SerialWorker ──► to_wireless ──► BLE send   │
//! │                                                                       │
//! │  UART TX ◄── to_serial ◄── WirelessInbound ◄── BLE receive            │
//! │      ▲                          │                                     │
//! │      └──────── tx_pending ◄─────┘                                     │
//! │                                                                       │
//! │  pool (frames)    gate (BLE bring-up)    session (peer state)         │
//! └───────────────────────────────────────────────────────────────────────┘
//! ```

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use embassy_sync::signal::Signal;

use crate::channel::{ChannelStats, RelayChannel};
use crate::config::RX_QUEUE_DEPTH;
use crate::pool::{Frame, FramePool};
use crate::session::{Session, SessionGate, SessionState};

/// Completed receive frames on their way from the UART driver to the serial
/// worker.
pub type RxQueue = Channel<CriticalSectionRawMutex, Frame, RX_QUEUE_DEPTH>;

/// Shared state of the relay pipeline.
pub struct Relay {
    /// Frame buffers for UART RX/TX and inbound BLE fragmentation.
    pub pool: FramePool,
    /// UART driver -> serial worker.
    pub rx_queue: RxQueue,
    /// Serial worker -> BLE worker.
    pub to_wireless: RelayChannel,
    /// BLE receive callback -> UART transmitter.
    pub to_serial: RelayChannel,
    /// Raised when `to_serial` gains bytes, to start an idle transmitter.
    pub tx_pending: Signal<CriticalSectionRawMutex, ()>,
    /// BLE bring-up sequencing.
    pub gate: SessionGate,
    /// Current BLE peer.
    pub session: Session,
}

impl Relay {
    pub const fn new() -> Self {
        Self {
            pool: FramePool::new(),
            rx_queue: Channel::new(),
            to_wireless: RelayChannel::new("uart->ble"),
            to_serial: RelayChannel::new("ble->uart"),
            tx_pending: Signal::new(),
            gate: SessionGate::new(),
            session: Session::new(),
        }
    }

    /// Drop every byte in flight in both directions.
    ///
    /// Called on connect and disconnect so nothing addressed to a former peer
    /// survives into the next session.
    pub fn flush_channels(&self) {
        self.to_wireless.clear();
        self.to_serial.clear();
    }

    /// Snapshot of the relay counters.
    pub fn stats(&self) -> RelayStats {
        RelayStats {
            frames_in_use: self.pool.in_use(),
            frame_alloc_failures: self.pool.failures(),
            rx_queued: self.rx_queue.len(),
            to_wireless: self.to_wireless.stats(),
            to_serial: self.to_serial.stats(),
            session: self.session.state(),
        }
    }

    /// Log a one-line summary of [`Relay::stats`] and return the snapshot.
    pub fn log_stats(&self) -> RelayStats {
        let stats = self.stats();
        log::info!(
            "relay: frames {} in use ({} alloc failures), rx queue {}, \
             uart->ble {}B buffered/{} short, ble->uart {}B buffered/{} short, {:?}",
            stats.frames_in_use,
            stats.frame_alloc_failures,
            stats.rx_queued,
            stats.to_wireless.buffered,
            stats.to_wireless.short_writes,
            stats.to_serial.buffered,
            stats.to_serial.short_writes,
            stats.session,
        );
        stats
    }
}

impl Default for Relay {
    fn default() -> Self {
        Self::new()
    }
}

/// Counters across the whole relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RelayStats {
    pub frames_in_use: usize,
    pub frame_alloc_failures: u32,
    pub rx_queued: usize,
    pub to_wireless: ChannelStats,
    pub to_serial: ChannelStats,
    pub session: SessionState,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_relay_is_idle() {
        let relay: &'static Relay = Box::leak(Box::new(Relay::new()));
        let stats = relay.stats();
        assert_eq!(stats.frames_in_use, 0);
        assert_eq!(stats.rx_queued, 0);
        assert_eq!(stats.session, SessionState::Uninitialized);
    }

    #[test]
    fn test_flush_empties_both_directions() {
        let relay: &'static Relay = Box::leak(Box::new(Relay::new()));
        relay.to_wireless.try_write(b"to peer", 1);
        relay.to_serial.try_write(b"to uart", 1);

        relay.flush_channels();
        assert!(relay.to_wireless.is_empty());
        assert!(relay.to_serial.is_empty());
    }
}
