//! # Wireless Relay
//!
//! The BLE side of the relay, built on the Nordic UART Service.
//!
//! ## Outbound (UART -> BLE)
//!
//! [`WirelessWorker`] blocks on the serial -> wireless channel, reads at most
//! one frame and notifies it to the connected peer. With no peer the bytes
//! are dropped and the failure is reported; nothing is retried.
//!
//! ## Inbound (BLE -> UART)
//!
//! [`WirelessInbound::on_receive`] runs in the BLE stack's callback context.
//! It cuts the payload into frames of at most [`FRAME_PAYLOAD`] bytes,
//! keeping the last byte of each frame free so a line feed can follow a
//! trailing carriage return:
//!
//! ```text
//!   payload  "....................................\r"   (37 bytes)
//!   frame 0  [ 19 bytes                          ]
//!   frame 1  [ 18 bytes                      \r\n]     LF appended
//! ```
//!
//! Each frame goes into the wireless -> serial channel with a non-blocking
//! write, then the UART transmitter is kicked.

use core::future::Future;

use log::{debug, error, info, warn};

use crate::config::{RelayConfig, FRAME_CAPACITY, FRAME_PAYLOAD};
use crate::error::{LinkError, Result};
use crate::relay::Relay;
use crate::session::{PeerId, SessionState};
use crate::worker::Worker;

/// BLE stack collaborator.
pub trait WirelessLink {
    /// Enable the Bluetooth controller and host.
    fn enable(&mut self) -> core::result::Result<(), LinkError>;

    /// Start connectable advertising.
    fn start_advertising(&mut self) -> core::result::Result<(), LinkError>;

    /// Register the NUS service and its receive callback.
    fn init_service(&mut self) -> core::result::Result<(), LinkError>;

    /// Notify `data` to `peer` (or every connected peer for `None`). The
    /// stack bounds the wait and reports [`LinkError::Timeout`].
    fn send(
        &mut self,
        peer: Option<PeerId>,
        data: &[u8],
    ) -> impl Future<Output = core::result::Result<(), LinkError>>;
}

/// Bring the BLE transport up: enable it, open the session gate for the
/// relay worker, and start advertising.
pub fn bring_up<L: WirelessLink>(relay: &Relay, link: &mut L) -> Result<()> {
    if let Err(e) = link.enable() {
        error!("Bluetooth init failed: {}", e);
        return Err(e.into());
    }
    info!("Bluetooth initialized");
    relay.gate.raise();

    if let Err(e) = link.start_advertising() {
        error!("Advertising failed to start: {}", e);
        return Err(e.into());
    }
    relay.session.set(SessionState::Advertising);
    info!("Advertising successfully started");
    Ok(())
}

/// Splits an inbound payload into UART frames.
///
/// Yields `(chunk, append_lf)`: `append_lf` is set only on the final chunk
/// of a payload that ends in `\r`.
pub struct Fragments<'a> {
    payload: &'a [u8],
    pos: usize,
}

impl<'a> Fragments<'a> {
    pub fn new(payload: &'a [u8]) -> Self {
        Self { payload, pos: 0 }
    }
}

impl<'a> Iterator for Fragments<'a> {
    type Item = (&'a [u8], bool);

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.payload.len() {
            return None;
        }
        let end = (self.pos + FRAME_PAYLOAD).min(self.payload.len());
        let chunk = &self.payload[self.pos..end];
        self.pos = end;
        let last = end == self.payload.len();
        Some((chunk, last && self.payload.last() == Some(&b'\r')))
    }
}

/// BLE callbacks. Every method is non-blocking and takes `&self`, so the
/// stack may call them from its own context.
#[derive(Clone, Copy)]
pub struct WirelessInbound {
    relay: &'static Relay,
    config: RelayConfig,
}

impl WirelessInbound {
    pub fn new(relay: &'static Relay, config: RelayConfig) -> Self {
        Self { relay, config }
    }

    /// Data written by the peer to the NUS RX characteristic.
    ///
    /// Returns the number of bytes queued for the UART, line feeds included.
    pub fn on_receive(&self, peer: PeerId, data: &[u8]) -> usize {
        debug!("Received {} bytes from peer {}", data.len(), peer.0);
        let channel = &self.relay.to_serial;
        let mut queued = 0;

        for (chunk, append_lf) in Fragments::new(data) {
            let mut frame = match self.relay.pool.try_alloc() {
                Ok(frame) => frame,
                Err(e) => {
                    warn!("Not able to allocate UART send data buffer: {}", e);
                    break;
                }
            };
            frame.extend_from_slice(chunk);
            if append_lf {
                frame.push(b'\n');
            }

            let written = channel.try_write(frame.as_slice(), self.config.min_chunk);
            if written < frame.len() {
                warn!(
                    "NUS put to {} incomplete: {} of {} bytes written",
                    channel.name(),
                    written,
                    frame.len()
                );
            }
            queued += written;
        }

        if queued > 0 {
            self.relay.tx_pending.signal(());
        }
        queued
    }

    /// A peer connected. Only one peer is served at a time.
    pub fn on_connected(&self, peer: PeerId) {
        if let SessionState::Connected(current) = self.relay.session.state() {
            warn!("Peer {} connected while {} is active, ignoring", peer.0, current.0);
            return;
        }
        self.relay.flush_channels();
        self.relay.session.set(SessionState::Connected(peer));
        info!("Connected to peer {}", peer.0);
    }

    /// The active peer disconnected. Everything in flight for it is dropped
    /// and the session goes back to advertising.
    pub fn on_disconnected(&self, peer: PeerId, reason: u8) {
        if self.relay.session.peer() != Some(peer) {
            debug!("Disconnect of inactive peer {} (reason {})", peer.0, reason);
            return;
        }
        info!("Disconnected: peer {} (reason {})", peer.0, reason);
        self.relay.flush_channels();
        self.relay.session.set(SessionState::Advertising);
    }
}

/// Drains the serial -> wireless channel to the connected peer.
pub struct WirelessWorker<L> {
    relay: &'static Relay,
    link: L,
}

impl<L: WirelessLink> WirelessWorker<L> {
    pub fn new(relay: &'static Relay, link: L) -> Self {
        Self { relay, link }
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    /// Read up to one frame and send it. Returns the number of bytes sent.
    pub async fn forward_one(&mut self) -> Result<usize> {
        let mut buf = [0u8; FRAME_CAPACITY];
        let n = self.relay.to_wireless.read(&mut buf).await;

        let Some(peer) = self.relay.session.peer() else {
            return Err(LinkError::NotConnected.into());
        };
        self.link.send(Some(peer), &buf[..n]).await?;
        debug!("relay -> BLE: {} bytes to peer {}", n, peer.0);
        Ok(n)
    }
}

impl<L: WirelessLink> Worker for WirelessWorker<L> {
    fn name(&self) -> &'static str {
        "nus"
    }

    async fn init(&mut self) -> Result<()> {
        // Don't register the service until Bluetooth is enabled.
        self.relay.gate.wait().await;

        if let Err(e) = self.link.init_service() {
            error!("Failed to initialize NUS service: {}", e);
            return Err(e.into());
        }
        info!("NUS module initialized");
        self.relay.gate.raise();
        Ok(())
    }

    async fn step(&mut self) {
        if let Err(e) = self.forward_one().await {
            warn!("Failed to send data over BLE connection: {}", e);
        }
    }
}
