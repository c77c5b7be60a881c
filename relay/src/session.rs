//! Wireless session state and the session gate.

use core::cell::Cell;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::signal::Signal;

/// Handle of a connected BLE peer, as assigned by the stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PeerId(pub u16);

/// Lifecycle of the single wireless session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SessionState {
    /// Bluetooth not yet enabled.
    Uninitialized,
    /// Enabled and advertising, no peer.
    Advertising,
    /// Exactly one peer connected.
    Connected(PeerId),
}

/// Session state shared between BLE callbacks and the relay worker.
pub struct Session {
    state: Mutex<CriticalSectionRawMutex, Cell<SessionState>>,
}

impl Session {
    pub const fn new() -> Self {
        Self {
            state: Mutex::new(Cell::new(SessionState::Uninitialized)),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state.lock(Cell::get)
    }

    /// The connected peer, if any.
    pub fn peer(&self) -> Option<PeerId> {
        match self.state() {
            SessionState::Connected(peer) => Some(peer),
            _ => None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.peer().is_some()
    }

    pub(crate) fn set(&self, state: SessionState) {
        self.state.lock(|cell| cell.set(state));
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

/// Reusable binary signal sequencing BLE bring-up.
///
/// Raised once the Bluetooth stack is enabled, consumed by the relay worker
/// before it registers the NUS service, and raised again afterwards for any
/// downstream waiter.
pub struct SessionGate {
    signal: Signal<CriticalSectionRawMutex, ()>,
}

impl SessionGate {
    pub const fn new() -> Self {
        Self {
            signal: Signal::new(),
        }
    }

    /// Open the gate. Raising an already raised gate is a no-op.
    pub fn raise(&self) {
        self.signal.signal(());
    }

    /// Wait until the gate is raised, consuming the raise.
    pub async fn wait(&self) {
        self.signal.wait().await;
    }

    /// Whether a raise is pending.
    pub fn is_raised(&self) -> bool {
        self.signal.signaled()
    }
}

impl Default for SessionGate {
    fn default() -> Self {
        Self::new()
    }
}
