//! Serial-side worker loops.
//!
//! - [`SerialWorker`] drains completed receive frames into the
//!   serial -> wireless channel.
//! - [`TxKickWorker`] starts the UART transmitter when inbound wireless data
//!   arrives while it is idle.
//!
//! The [`SerialTransport`] itself lives in a [`SharedSerial`] critical-section
//! mutex. The board's UART callback, its retry-timer expiry and the TX kick
//! all enter the state machine through that one lock, so its in-flight
//! buffer references are never touched concurrently.

use core::cell::RefCell;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use log::{debug, warn};

use crate::config::RelayConfig;
use crate::error::Result;
use crate::relay::Relay;
use crate::serial::{RetryTimer, SerialDevice, SerialEvent, SerialTransport};
use crate::worker::Worker;

/// A [`SerialTransport`] shareable between driver callbacks and workers.
pub type SharedSerial<D, T> = Mutex<CriticalSectionRawMutex, RefCell<SerialTransport<D, T>>>;

/// Entry point for the board's UART event callback.
pub fn dispatch<D: SerialDevice, T: RetryTimer>(serial: &SharedSerial<D, T>, event: SerialEvent<'_>) {
    serial.lock(|uart| uart.borrow_mut().on_event(event));
}

/// Entry point for the board's retry-timer expiry.
pub fn retry_expired<D: SerialDevice, T: RetryTimer>(serial: &SharedSerial<D, T>) {
    serial.lock(|uart| uart.borrow_mut().on_retry_timer());
}

/// Forwards completed UART receive frames into the serial -> wireless
/// channel.
pub struct SerialWorker<D: 'static, T: 'static> {
    relay: &'static Relay,
    serial: &'static SharedSerial<D, T>,
    config: RelayConfig,
}

impl<D: SerialDevice, T: RetryTimer> SerialWorker<D, T> {
    pub fn new(
        relay: &'static Relay,
        serial: &'static SharedSerial<D, T>,
        config: RelayConfig,
    ) -> Self {
        Self {
            relay,
            serial,
            config,
        }
    }

    /// Forward one completed frame. Returns the number of bytes the channel
    /// accepted.
    pub async fn forward_one(&mut self) -> usize {
        let frame = self.relay.rx_queue.receive().await;
        let written = self
            .relay
            .to_wireless
            .write(frame.as_slice(), self.config.min_chunk, self.config.short_write)
            .await;

        if written < frame.len() {
            warn!(
                "UART put to {} incomplete: {} of {} bytes written",
                self.relay.to_wireless.name(),
                written,
                frame.len()
            );
        } else {
            debug!("UART -> relay: {} bytes", written);
        }
        written
    }
}

impl<D: SerialDevice, T: RetryTimer> Worker for SerialWorker<D, T> {
    fn name(&self) -> &'static str {
        "uart"
    }

    async fn init(&mut self) -> Result<()> {
        self.serial.lock(|uart| uart.borrow_mut().init())
    }

    async fn step(&mut self) {
        self.forward_one().await;
    }
}

/// Starts an idle UART transmitter when the wireless -> serial channel gains
/// bytes.
pub struct TxKickWorker<D: 'static, T: 'static> {
    relay: &'static Relay,
    serial: &'static SharedSerial<D, T>,
}

impl<D: SerialDevice, T: RetryTimer> TxKickWorker<D, T> {
    pub fn new(relay: &'static Relay, serial: &'static SharedSerial<D, T>) -> Self {
        Self { relay, serial }
    }
}

impl<D: SerialDevice, T: RetryTimer> Worker for TxKickWorker<D, T> {
    fn name(&self) -> &'static str {
        "uart-tx"
    }

    async fn init(&mut self) -> Result<()> {
        Ok(())
    }

    async fn step(&mut self) {
        self.relay.tx_pending.wait().await;
        self.serial.lock(|uart| uart.borrow_mut().on_tx_pending());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ShortWritePolicy;
    use crate::serial::tests::{MockTimer, MockUart};
    use crate::serial::TxState;

    type Shared = SharedSerial<MockUart, MockTimer>;

    fn setup(config: RelayConfig) -> (&'static Relay, &'static Shared) {
        let relay: &'static Relay = Box::leak(Box::new(Relay::new()));
        let serial: &'static Shared = Box::leak(Box::new(Mutex::new(RefCell::new(
            SerialTransport::new(relay, MockUart::ready(), MockTimer::default(), config),
        ))));
        (relay, serial)
    }

    fn queue_frame(relay: &'static Relay, bytes: &[u8]) {
        let mut frame = relay.pool.try_alloc().unwrap();
        frame.extend_from_slice(bytes);
        relay.rx_queue.try_send(frame).unwrap();
    }

    #[tokio::test]
    async fn test_init_arms_receiver() {
        let (relay, serial) = setup(RelayConfig::default());
        let mut worker = SerialWorker::new(relay, serial, RelayConfig::default());
        worker.init().await.unwrap();
        assert_eq!(relay.pool.in_use(), 1);
    }

    #[tokio::test]
    async fn test_forward_releases_frame() {
        let (relay, serial) = setup(RelayConfig::default());
        let mut worker = SerialWorker::new(relay, serial, RelayConfig::default());
        queue_frame(relay, b"hello\n");

        assert_eq!(worker.forward_one().await, 6);
        assert_eq!(relay.pool.in_use(), 0);

        let mut buf = [0u8; 16];
        let n = relay.to_wireless.try_read(&mut buf);
        assert_eq!(&buf[..n], b"hello\n");
    }

    #[tokio::test]
    async fn test_backpressure_truncates_without_leaking() {
        let (relay, serial) = setup(RelayConfig::default());
        let mut worker = SerialWorker::new(relay, serial, RelayConfig::default());

        let filler = [0u8; crate::config::CHANNEL_CAPACITY - 5];
        relay.to_wireless.try_write(&filler, 1);
        queue_frame(relay, b"0123456789");

        assert_eq!(worker.forward_one().await, 5);
        assert_eq!(relay.pool.in_use(), 0);
        assert_eq!(relay.to_wireless.stats().short_writes, 1);
    }

    #[tokio::test]
    async fn test_full_channel_drops_frame() {
        let config = RelayConfig {
            short_write: ShortWritePolicy::Retry { attempts: 2 },
            ..RelayConfig::default()
        };
        let (relay, serial) = setup(config);
        let mut worker = SerialWorker::new(relay, serial, config);

        let filler = [0u8; crate::config::CHANNEL_CAPACITY];
        relay.to_wireless.try_write(&filler, 1);
        queue_frame(relay, b"lost\n");

        assert_eq!(worker.forward_one().await, 0);
        assert_eq!(relay.pool.in_use(), 0);
    }

    #[tokio::test]
    async fn test_tx_kick_starts_idle_transmitter() {
        let (relay, serial) = setup(RelayConfig::default());
        let mut kick = TxKickWorker::new(relay, serial);

        relay.to_serial.try_write(b"world\r\n", 1);
        relay.tx_pending.signal(());
        kick.step().await;

        serial.lock(|uart| {
            let uart = uart.borrow();
            assert_eq!(uart.tx_state(), TxState::InFlight);
            assert_eq!(uart.device().transmitted()[0].1, b"world\r\n");
        });
    }

    #[test]
    fn test_dispatch_reaches_state_machine() {
        let (relay, serial) = setup(RelayConfig::default());
        serial.lock(|uart| uart.borrow_mut().init()).unwrap();
        let frame = serial.lock(|uart| uart.borrow().device().last_rx_enable().unwrap());

        dispatch(serial, SerialEvent::RxReady { frame, data: b"ok\n" });
        dispatch(serial, SerialEvent::RxBufReleased { frame });
        dispatch(serial, SerialEvent::RxDisabled);
        retry_expired(serial);

        assert_eq!(relay.rx_queue.len(), 1);
        assert_eq!(relay.pool.in_use(), 2);
    }
}
