//! # Relay Errors
//!
//! Every fallible relay operation funnels into [`RelayError`]. All types are
//! `Copy` so they can be returned from driver callbacks and logged without
//! allocation.
//!
//! Only initialisation errors stop a component. Everything else is reported
//! for the single operation that failed and the loop carries on.

use thiserror::Error;

use crate::pool::PoolError;

/// Error reported by the UART driver collaborator.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DeviceError {
    #[error("UART device not ready")]
    NotReady,
    #[error("UART busy")]
    Busy,
    #[error("UART driver error {0}")]
    Driver(i32),
}

/// Error reported by the BLE collaborator.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LinkError {
    #[error("Bluetooth enable failed ({0})")]
    Enable(i32),
    #[error("Advertising failed to start ({0})")]
    Advertising(i32),
    #[error("NUS service registration failed ({0})")]
    Service(i32),
    #[error("No peer connected")]
    NotConnected,
    #[error("Send timed out")]
    Timeout,
    #[error("Send failed ({0})")]
    Send(i32),
}

/// Invalid or unreadable [`RelayConfig`](crate::config::RelayConfig).
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    #[error("min_chunk {0} outside 1..=frame capacity")]
    MinChunk(usize),
    #[error("alloc retry delay must be non-zero")]
    RetryDelay,
    #[error("housekeeping period must be non-zero")]
    HousekeepingPeriod,
    #[error("config blob does not fit")]
    Encode,
    #[error("config blob is corrupt")]
    Decode,
}

/// Top-level relay error.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RelayError {
    /// The UART never became ready.
    #[error("UART device not ready")]
    DeviceNotReady,
    /// The UART driver rejected a request.
    #[error("UART: {0}")]
    Device(#[from] DeviceError),
    /// The frame pool is exhausted.
    #[error("frame pool: {0}")]
    Pool(#[from] PoolError),
    /// The BLE stack rejected a request.
    #[error("BLE: {0}")]
    Link(#[from] LinkError),
    /// Configuration rejected.
    #[error("config: {0}")]
    Config(#[from] ConfigError),
}

/// Relay-wide `Result` alias.
pub type Result<T> = core::result::Result<T, RelayError>;
