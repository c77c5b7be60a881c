//! # UART <-> BLE Relay
//!
//! This crate moves bytes between a UART and a single BLE peer (Nordic UART
//! Service) on a small MCU with a fixed set of execution contexts:
//!
//! - **Frame Pool**: fixed-capacity buffers with single ownership and
//!   release-on-drop
//! - **Serial Transport**: event-driven, double-buffered UART state machine
//!   that never blocks in driver-callback context
//! - **Relay Channels**: one bounded byte pipe per direction
//! - **Workers**: the serial worker, the BLE relay worker, the UART TX kick
//!   and the housekeeping heartbeat
//!
//! ## Architecture
//!
//! ```text
//! UART RX ──► SerialTransport ──► rx_queue ──► SerialWorker ──► to_wireless ──► WirelessWorker ──► BLE
//!
//! UART TX ◄── SerialTransport ◄── to_serial ◄── WirelessInbound ◄── BLE
//!                    ▲                               │
//!                    └────── TxKickWorker ◄──────────┘ tx_pending
//! ```
//!
//! ## Bring-up
//!
//! 1. [`wireless::bring_up`] enables Bluetooth, raises the session gate and
//!    starts advertising.
//! 2. [`wireless::WirelessWorker`] waits on the gate, registers the service
//!    and starts relaying.
//! 3. [`serial_worker::SerialWorker`] initialises the UART; if the device is
//!    not ready the worker never runs.

#![cfg_attr(not(feature = "std"), no_std)]

pub mod channel;
pub mod config;
pub mod error;
pub mod housekeeping;
pub mod pool;
pub mod relay;
pub mod serial;
pub mod serial_worker;
pub mod session;
pub mod wireless;
pub mod worker;

// Re-export main types for convenience
pub use channel::{ChannelStats, RelayChannel};
pub use config::{RelayConfig, ShortWritePolicy, CHANNEL_CAPACITY, FRAME_CAPACITY};
pub use error::{DeviceError, LinkError, RelayError, Result};
pub use housekeeping::HousekeepingWorker;
pub use pool::{Frame, FrameId, FramePool, PoolError};
pub use relay::{Relay, RelayStats};
pub use serial::{RetryTimer, SerialDevice, SerialEvent, SerialTransport};
pub use serial_worker::{SerialWorker, SharedSerial, TxKickWorker};
pub use session::{PeerId, SessionGate, SessionState};
pub use wireless::{WirelessInbound, WirelessLink, WirelessWorker};
pub use worker::{run, Worker};

/// Library version, logged at boot.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
