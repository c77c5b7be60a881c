//! Random driver event sequences never leak or double-own a frame.

use nus_relay::config::POOL_SLOTS;
use nus_relay::{
    DeviceError, FrameId, PeerId, Relay, RelayConfig, RetryTimer, SerialDevice, SerialEvent,
    SerialTransport, WirelessInbound,
};
use proptest::prelude::*;

/// A UART that tracks which frames it was handed, like the real driver.
#[derive(Default)]
struct ModelUart {
    rx: Vec<FrameId>,
    tx: Option<(FrameId, usize)>,
}

impl SerialDevice for ModelUart {
    fn is_ready(&self) -> bool {
        true
    }

    fn rx_enable(&mut self, frame: FrameId, _: usize, _: u32) -> Result<(), DeviceError> {
        self.rx.push(frame);
        Ok(())
    }

    fn rx_disable(&mut self) -> Result<(), DeviceError> {
        Ok(())
    }

    fn rx_buffer_response(&mut self, frame: FrameId, _: usize) -> Result<(), DeviceError> {
        self.rx.push(frame);
        Ok(())
    }

    fn tx(&mut self, frame: FrameId, data: &[u8], _: Option<u32>) -> Result<(), DeviceError> {
        self.tx = Some((frame, data.len()));
        Ok(())
    }
}

#[derive(Default)]
struct ModelTimer;

impl RetryTimer for ModelTimer {
    fn schedule(&mut self, _: u32) {}
}

#[derive(Debug, Clone)]
enum Op {
    Receive(Vec<u8>),
    BufRequest,
    Release,
    Disable,
    RetryTimer,
    Drain,
    Inbound(Vec<u8>),
    TxDone,
    TxAbort(usize),
}

fn line_bytes() -> impl Strategy<Value = Vec<u8>> {
    proptest::collection::vec(
        prop::sample::select(vec![b'a', b'z', b'0', b'\n', b'\r']),
        1..24,
    )
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => line_bytes().prop_map(Op::Receive),
        2 => Just(Op::BufRequest),
        2 => Just(Op::Release),
        1 => Just(Op::Disable),
        1 => Just(Op::RetryTimer),
        2 => Just(Op::Drain),
        3 => proptest::collection::vec(any::<u8>(), 1..48).prop_map(Op::Inbound),
        2 => Just(Op::TxDone),
        1 => (0usize..24).prop_map(Op::TxAbort),
    ]
}

fn apply(
    relay: &'static Relay,
    inbound: &WirelessInbound,
    uart: &mut SerialTransport<ModelUart, ModelTimer>,
    op: Op,
) {
    match op {
        Op::Receive(bytes) => {
            if let Some(&frame) = uart.device().rx.first() {
                uart.on_event(SerialEvent::RxReady { frame, data: &bytes });
            }
        }
        Op::BufRequest => uart.on_event(SerialEvent::RxBufRequest),
        Op::Release => {
            if !uart.device().rx.is_empty() {
                let frame = uart.device_mut().rx.remove(0);
                uart.on_event(SerialEvent::RxBufReleased { frame });
            }
        }
        Op::Disable => {
            let held = std::mem::take(&mut uart.device_mut().rx);
            for frame in held {
                uart.on_event(SerialEvent::RxBufReleased { frame });
            }
            uart.on_event(SerialEvent::RxDisabled);
        }
        Op::RetryTimer => uart.on_retry_timer(),
        Op::Drain => {
            let _ = relay.rx_queue.try_receive();
        }
        Op::Inbound(bytes) => {
            if inbound.on_receive(PeerId(1), &bytes) > 0 {
                uart.on_tx_pending();
            }
        }
        Op::TxDone => {
            if let Some((frame, len)) = uart.device_mut().tx.take() {
                uart.on_event(SerialEvent::TxDone { frame, len });
            }
        }
        Op::TxAbort(sent) => {
            if let Some((frame, len)) = uart.device_mut().tx.take() {
                uart.on_event(SerialEvent::TxAborted {
                    frame,
                    sent: sent.min(len),
                });
            }
        }
    }
}

proptest! {
    #[test]
    fn frames_are_conserved(ops in proptest::collection::vec(op(), 1..64)) {
        let relay: &'static Relay = Box::leak(Box::new(Relay::new()));
        let config = RelayConfig::default();
        let inbound = WirelessInbound::new(relay, config);
        inbound.on_connected(PeerId(1));

        let mut uart =
            SerialTransport::new(relay, ModelUart::default(), ModelTimer::default(), config);
        uart.init().unwrap();

        for op in ops {
            apply(relay, &inbound, &mut uart, op);

            prop_assert_eq!(
                relay.pool.in_use(),
                uart.frames_held() + relay.rx_queue.len()
            );
            prop_assert!(relay.pool.in_use() <= POOL_SLOTS);
        }

        drop(uart);
        while relay.rx_queue.try_receive().is_ok() {}
        prop_assert_eq!(relay.pool.in_use(), 0);
    }
}
