//! # Serial Transport State Machine
//!
//! Drives an asynchronous UART driver: double-buffered receive with line
//! terminator detection, and a transmit path that drains the
//! wireless -> serial relay channel one frame at a time.
//!
//! Every handler here runs in driver-callback context. None of them block,
//! and on every failure path they either release the frame they hold or keep
//! it owned by this handle; a failed allocation schedules a deferred retry
//! instead of waiting.
//!
//! ## Receive
//!
//! ```text
//!            init / rearm ok
//!   Idle ─────────────────────► Armed ◄──────────────┐
//!                                 │ RxDisabled        │ retry timer,
//!                                 ▼                   │ alloc ok
//!                             (alloc) ──fail──► Rearming
//! ```
//!
//! `RxReady` appends to the armed frame and requests a disable as soon as
//! the latest byte is `\n` or `\r`. The driver then releases the frame
//! (`RxBufReleased`), which queues it for the serial worker, and reports
//! `RxDisabled`, which re-arms with a fresh frame.
//!
//! ## Transmit
//!
//! ```text
//!   Idle ──pull ok──► InFlight ──TxAborted──► Aborted
//!    ▲                  │  ▲                    │
//!    └──TxDone, empty───┘  └────TxDone (pull)───┘
//! ```

use embassy_sync::channel::TrySendError;
use heapless::Vec;
use log::{debug, error, info, warn};

use crate::config::{RelayConfig, FRAME_CAPACITY, RX_FRAMES_IN_FLIGHT};
use crate::error::{DeviceError, RelayError, Result};
use crate::pool::{Frame, FrameId};
use crate::relay::Relay;

/// UART driver collaborator.
///
/// Buffers are identified by [`FrameId`]; the frame memory stays owned by
/// [`SerialTransport`] while the hardware works on it, and the driver echoes
/// the id back in its [`SerialEvent`]s.
pub trait SerialDevice {
    /// Whether the peripheral finished its own initialisation.
    fn is_ready(&self) -> bool;

    /// Start receiving into `frame`, reporting pending bytes after
    /// `idle_timeout_ms` of line silence.
    fn rx_enable(
        &mut self,
        frame: FrameId,
        capacity: usize,
        idle_timeout_ms: u32,
    ) -> core::result::Result<(), DeviceError>;

    /// Stop receiving. The driver releases its buffers and then reports
    /// [`SerialEvent::RxDisabled`].
    fn rx_disable(&mut self) -> core::result::Result<(), DeviceError>;

    /// Answer a [`SerialEvent::RxBufRequest`] with the next buffer.
    fn rx_buffer_response(
        &mut self,
        frame: FrameId,
        capacity: usize,
    ) -> core::result::Result<(), DeviceError>;

    /// Transmit `data` from `frame`. Completion is reported with
    /// [`SerialEvent::TxDone`] or [`SerialEvent::TxAborted`].
    fn tx(
        &mut self,
        frame: FrameId,
        data: &[u8],
        deadline_ms: Option<u32>,
    ) -> core::result::Result<(), DeviceError>;
}

/// One-shot delayed work used to retry a failed receive-buffer allocation.
/// Expiry is delivered to [`SerialTransport::on_retry_timer`].
pub trait RetryTimer {
    /// (Re)schedule the timer `delay_ms` from now.
    fn schedule(&mut self, delay_ms: u32);
}

/// Asynchronous UART driver events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SerialEvent<'a> {
    /// Transmission of `frame` finished; `len` bytes went out.
    TxDone { frame: FrameId, len: usize },
    /// Transmission of `frame` stopped after `sent` bytes.
    TxAborted { frame: FrameId, sent: usize },
    /// `data` was received into `frame`.
    RxReady { frame: FrameId, data: &'a [u8] },
    /// The driver wants the next buffer for gapless capture.
    RxBufRequest,
    /// The driver no longer uses `frame`.
    RxBufReleased { frame: FrameId },
    /// Reception stopped; all buffers have been released.
    RxDisabled,
}

/// Receive side of the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RxState {
    /// Not initialised.
    Idle,
    /// The hardware owns a receive frame.
    Armed,
    /// Waiting for a frame to re-arm with.
    Rearming,
}

/// Transmit side of the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TxState {
    Idle,
    /// The hardware owns a transmit frame.
    InFlight,
    /// A partial transmit is being resumed from the recorded offset.
    Aborted,
}

/// Per-device UART handle.
pub struct SerialTransport<D, T> {
    relay: &'static Relay,
    device: D,
    retry: T,
    config: RelayConfig,
    rx: RxState,
    rx_frames: Vec<Frame, RX_FRAMES_IN_FLIGHT>,
    disable_requested: bool,
    tx: TxState,
    tx_frame: Option<Frame>,
    tx_sent: usize,
}

impl<D: SerialDevice, T: RetryTimer> SerialTransport<D, T> {
    pub fn new(relay: &'static Relay, device: D, retry: T, config: RelayConfig) -> Self {
        Self {
            relay,
            device,
            retry,
            config,
            rx: RxState::Idle,
            rx_frames: Vec::new(),
            disable_requested: false,
            tx: TxState::Idle,
            tx_frame: None,
            tx_sent: 0,
        }
    }

    /// Check the device and arm reception with the first frame.
    pub fn init(&mut self) -> Result<()> {
        if !self.device.is_ready() {
            error!("UART device not ready");
            return Err(RelayError::DeviceNotReady);
        }

        let frame = self.relay.pool.try_alloc()?;
        if let Err(e) =
            self.device
                .rx_enable(frame.id(), FRAME_CAPACITY, self.config.rx_idle_timeout_ms)
        {
            error!("Cannot enable UART reception: {}", e);
            return Err(e.into());
        }
        self.hold_rx(frame);
        self.rx = RxState::Armed;

        info!("UART initialized");
        Ok(())
    }

    pub fn rx_state(&self) -> RxState {
        self.rx
    }

    pub fn tx_state(&self) -> TxState {
        self.tx
    }

    /// Bytes of the current transmit frame already sent before an abort.
    pub fn tx_offset(&self) -> usize {
        self.tx_sent
    }

    /// Frames this handle currently owns (hardware RX frames plus the
    /// transmit frame).
    pub fn frames_held(&self) -> usize {
        self.rx_frames.len() + usize::from(self.tx_frame.is_some())
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    /// Dispatch one driver event.
    pub fn on_event(&mut self, event: SerialEvent<'_>) {
        match event {
            SerialEvent::TxDone { frame, len } => self.on_tx_done(frame, len),
            SerialEvent::TxAborted { frame, sent } => self.on_tx_aborted(frame, sent),
            SerialEvent::RxReady { frame, data } => self.on_rx_ready(frame, data),
            SerialEvent::RxBufRequest => self.on_rx_buf_request(),
            SerialEvent::RxBufReleased { frame } => self.on_rx_buf_released(frame),
            SerialEvent::RxDisabled => self.on_rx_disabled(),
        }
    }

    /// The allocation-retry timer expired.
    pub fn on_retry_timer(&mut self) {
        if self.rx == RxState::Rearming {
            self.rearm();
        }
    }

    /// The wireless -> serial channel gained bytes. Starts a transmit if the
    /// transmitter is idle; otherwise the next `TxDone` picks them up.
    pub fn on_tx_pending(&mut self) {
        if self.tx == TxState::Idle {
            self.start_tx();
        }
    }

    // ── Transmit ─────────────────────────────────────────────

    fn on_tx_done(&mut self, frame: FrameId, len: usize) {
        debug!("UART_TX_DONE {} ({} bytes)", frame, len);
        match self.tx_frame.take() {
            Some(done) if done.id() == frame => drop(done),
            other => {
                debug!("TX done for {} which is not in flight", frame);
                self.tx_frame = other;
                return;
            }
        }
        self.tx_sent = 0;
        self.tx = TxState::Idle;
        self.start_tx();
    }

    fn on_tx_aborted(&mut self, frame: FrameId, sent: usize) {
        debug!("UART_TX_ABORTED {} after {} bytes", frame, sent);
        let len = match self.tx_frame.as_ref() {
            Some(aborted) if aborted.id() == frame => aborted.len(),
            Some(aborted) => {
                warn!("TX abort for {} while {} is in flight", frame, aborted.id());
                return;
            }
            None => {
                warn!("TX abort for {} with nothing in flight", frame);
                return;
            }
        };

        self.tx_sent = (self.tx_sent + sent).min(len);
        if self.tx_sent == len {
            self.on_tx_done(frame, len);
            return;
        }

        self.tx = TxState::Aborted;
        let Some(aborted) = self.tx_frame.as_ref() else {
            return;
        };
        if let Err(e) = self
            .device
            .tx(frame, aborted.tail(self.tx_sent), self.config.tx_deadline_ms)
        {
            warn!("Failed to resume aborted UART TX: {}", e);
            self.tx_frame = None;
            self.tx_sent = 0;
            self.tx = TxState::Idle;
        }
    }

    /// Pull up to one frame from the wireless -> serial channel and send it.
    fn start_tx(&mut self) {
        if self.relay.to_serial.is_empty() {
            return;
        }
        let mut frame = match self.relay.pool.try_alloc() {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Not able to allocate UART transmit buffer: {}", e);
                return;
            }
        };

        let n = self.relay.to_serial.try_read(frame.spare_mut());
        if n == 0 {
            return;
        }
        frame.commit(n);

        match self
            .device
            .tx(frame.id(), frame.as_slice(), self.config.tx_deadline_ms)
        {
            Ok(()) => {
                self.tx_frame = Some(frame);
                self.tx = TxState::InFlight;
            }
            Err(e) => warn!("Failed to send {} bytes over UART: {}", n, e),
        }
    }

    // ── Receive ──────────────────────────────────────────────

    fn on_rx_ready(&mut self, frame: FrameId, data: &[u8]) {
        debug!("UART_RX_RDY {} (+{} bytes)", frame, data.len());
        let Some(rx) = self.rx_frames.iter_mut().find(|f| f.id() == frame) else {
            warn!("RX data for unknown buffer {}", frame);
            return;
        };

        let stored = rx.extend_from_slice(data);
        if stored < data.len() {
            warn!("UART RX overrun, {} bytes lost", data.len() - stored);
        }

        if self.disable_requested {
            return;
        }

        // A terminator counts even if the overrun kept it out of the frame.
        if matches!(data.last(), Some(b'\n' | b'\r')) {
            self.disable_requested = true;
            if let Err(e) = self.device.rx_disable() {
                warn!("UART RX disable failed: {}", e);
                self.disable_requested = false;
            }
        }
    }

    fn on_rx_buf_request(&mut self) {
        debug!("UART_RX_BUF_REQUEST");
        if self.rx_frames.is_full() {
            warn!("UART requested a third RX buffer");
            return;
        }
        let frame = match self.relay.pool.try_alloc() {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Not able to allocate UART receive buffer on request: {}", e);
                return;
            }
        };
        match self.device.rx_buffer_response(frame.id(), FRAME_CAPACITY) {
            Ok(()) => self.hold_rx(frame),
            Err(e) => warn!("UART refused next RX buffer: {}", e),
        }
    }

    fn on_rx_buf_released(&mut self, frame: FrameId) {
        debug!("UART_RX_BUF_RELEASED {}", frame);
        let Some(pos) = self.rx_frames.iter().position(|f| f.id() == frame) else {
            warn!("Release of unknown RX buffer {}", frame);
            return;
        };
        let released = self.rx_frames.remove(pos);
        self.retire(released);
    }

    fn on_rx_disabled(&mut self) {
        debug!("UART_RX_DISABLED");
        self.disable_requested = false;
        while let Some(stale) = self.rx_frames.pop() {
            self.retire(stale);
        }
        self.rearm();
    }

    /// Hand a finished receive frame to the serial worker, or back to the
    /// pool if it carries no data.
    fn retire(&mut self, frame: Frame) {
        if frame.is_empty() {
            return;
        }
        if let Err(TrySendError::Full(frame)) = self.relay.rx_queue.try_send(frame) {
            warn!("UART RX queue full, dropping {} bytes", frame.len());
        }
    }

    fn rearm(&mut self) {
        let frame = match self.relay.pool.try_alloc() {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Not able to allocate UART receive buffer: {}", e);
                self.schedule_rearm();
                return;
            }
        };

        match self
            .device
            .rx_enable(frame.id(), FRAME_CAPACITY, self.config.rx_idle_timeout_ms)
        {
            Ok(()) => {
                self.hold_rx(frame);
                self.rx = RxState::Armed;
            }
            Err(e) => {
                warn!("UART RX enable failed: {}", e);
                self.schedule_rearm();
            }
        }
    }

    fn schedule_rearm(&mut self) {
        self.rx = RxState::Rearming;
        self.retry.schedule(self.config.alloc_retry_delay_ms);
    }

    fn hold_rx(&mut self, frame: Frame) {
        // Capacity was checked by the caller or the vector is empty.
        if let Err(frame) = self.rx_frames.push(frame) {
            warn!("RX buffer slots full, releasing {}", frame.id());
        }
    }
}
