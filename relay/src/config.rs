//! # Relay Configuration
//!
//! Capacities are compile-time constants because every buffer and pipe in the
//! relay is statically sized. Timing and backpressure knobs live in
//! [`RelayConfig`], which the board can persist as a small `postcard` blob in
//! its settings partition and load back at boot.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Bytes per frame buffer.
///
/// Matches the default ATT payload of a BLE 4.x link (23 byte MTU minus the
/// 3 byte ATT header), so one frame always fits one notification.
pub const FRAME_CAPACITY: usize = 20;

/// Payload bytes per inbound wireless frame; the last byte is kept free for
/// an appended line feed.
pub const FRAME_PAYLOAD: usize = FRAME_CAPACITY - 1;

/// Bytes buffered per direction in each relay channel.
pub const CHANNEL_CAPACITY: usize = 1024;

/// Number of frame buffers in the pool. Occupancy is tracked in a `u32`
/// bitmap, so this must not exceed 32.
pub const POOL_SLOTS: usize = 16;

/// Depth of the completed-receive queue between the UART driver and the
/// serial worker.
pub const RX_QUEUE_DEPTH: usize = 8;

/// Frames the UART driver may own at once: the current one and the next one
/// handed over on a buffer request.
pub const RX_FRAMES_IN_FLIGHT: usize = 2;

/// Size of a serialized [`RelayConfig`] blob.
pub const CONFIG_BLOB_SIZE: usize = 32;

const _: () = assert!(POOL_SLOTS <= 32);
const _: () = assert!(FRAME_CAPACITY >= 2);

/// What a producer does when a relay channel accepts fewer bytes than asked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ShortWritePolicy {
    /// Forward what fit and drop the rest of the frame.
    Truncate,
    /// Retry the remainder, yielding to the executor between attempts.
    Retry {
        /// Additional attempts after the first one.
        attempts: u8,
    },
}

/// Runtime configuration for the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RelayConfig {
    /// Silence on the UART RX line before the driver reports pending bytes.
    pub rx_idle_timeout_ms: u32,
    /// Delay before retrying a failed receive-buffer allocation.
    pub alloc_retry_delay_ms: u32,
    /// Deadline handed to the driver for each transmit (`None` = no deadline).
    pub tx_deadline_ms: Option<u32>,
    /// Minimum contiguous write into a relay channel.
    pub min_chunk: usize,
    /// Policy for short writes on the serial -> wireless channel.
    pub short_write: ShortWritePolicy,
    /// Interval between housekeeping heartbeats.
    pub housekeeping_period_ms: u32,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            rx_idle_timeout_ms: 50,
            alloc_retry_delay_ms: 50,
            tx_deadline_ms: None,
            min_chunk: 4,
            short_write: ShortWritePolicy::Truncate,
            housekeeping_period_ms: 2000,
        }
    }
}

impl RelayConfig {
    /// Check the knobs against the compiled-in capacities.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_chunk == 0 || self.min_chunk > FRAME_CAPACITY {
            return Err(ConfigError::MinChunk(self.min_chunk));
        }
        if self.alloc_retry_delay_ms == 0 {
            return Err(ConfigError::RetryDelay);
        }
        if self.housekeeping_period_ms == 0 {
            return Err(ConfigError::HousekeepingPeriod);
        }
        Ok(())
    }

    /// Serialize into `buf`, returning the used prefix.
    pub fn encode<'b>(&self, buf: &'b mut [u8]) -> Result<&'b mut [u8], ConfigError> {
        postcard::to_slice(self, buf).map_err(|_| ConfigError::Encode)
    }

    /// Decode and validate a blob written by [`RelayConfig::encode`].
    pub fn decode(bytes: &[u8]) -> Result<Self, ConfigError> {
        let config: Self = postcard::from_bytes(bytes).map_err(|_| ConfigError::Decode)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a persisted blob, falling back to defaults when it is missing or
    /// unreadable.
    pub fn load_or_default(blob: Option<&[u8]>) -> Self {
        match blob.map(Self::decode) {
            Some(Ok(config)) => config,
            Some(Err(e)) => {
                log::warn!("Ignoring stored relay config: {}", e);
                Self::default()
            }
            None => Self::default(),
        }
    }
}
