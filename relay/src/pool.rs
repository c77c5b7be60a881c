//! # Frame Buffer Pool
//!
//! Fixed-capacity frame buffers handed out from a statically sized pool.
//!
//! ## Ownership Model
//!
//! A [`Frame`] is an owning lease on one pool slot. It moves, by value, from
//! the UART driver to the receive queue to a worker, and its slot goes back
//! to the pool exactly once, when the value is dropped. There is no explicit
//! `free`: every exit path (forwarded, dropped on backpressure, abandoned on
//! error) releases the slot through `Drop`.
//!
//! ## Memory Layout
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │ FramePool                                            │
//! │   occupied: AtomicU32   bit n set = slot n leased    │
//! │   allocations / failures: AtomicU32 counters         │
//! └──────────────────────────────────────────────────────┘
//!                  │ try_alloc()
//!                  ▼
//! ┌──────────┬─────────┬──────────────────────────────────┐
//! │ id (u8)  │ len     │ data: [u8; FRAME_CAPACITY]       │
//! └──────────┴─────────┴──────────────────────────────────┘
//! ```
//!
//! Allocation and release are single atomic read-modify-write operations, so
//! both are safe from driver callbacks and worker loops alike and neither
//! ever blocks.

use core::fmt;
use core::sync::atomic::{AtomicU32, Ordering};

use thiserror::Error;

use crate::config::{FRAME_CAPACITY, POOL_SLOTS};

/// Pool slot identity of a frame. Handed to the UART driver in place of a raw
/// buffer pointer and echoed back in its events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FrameId(u8);

impl FrameId {
    /// Slot index inside the pool.
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for FrameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Errors specific to pool operations
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PoolError {
    /// Every slot is currently leased.
    #[error("no free frame buffers")]
    Exhausted,
}

const ALL_SLOTS: u32 = if POOL_SLOTS == 32 {
    u32::MAX
} else {
    (1u32 << POOL_SLOTS) - 1
};

/// Lock-free pool of frame buffer slots.
pub struct FramePool {
    occupied: AtomicU32,
    allocations: AtomicU32,
    failures: AtomicU32,
}

impl FramePool {
    /// Create an empty pool. `const` so it can live in a `static`.
    pub const fn new() -> Self {
        Self {
            occupied: AtomicU32::new(0),
            allocations: AtomicU32::new(0),
            failures: AtomicU32::new(0),
        }
    }

    /// Lease a zero-length frame.
    ///
    /// Fails with [`PoolError::Exhausted`] when every slot is leased; callers
    /// treat this as transient and retry later.
    pub fn try_alloc(&'static self) -> Result<Frame, PoolError> {
        let mut current = self.occupied.load(Ordering::Acquire);
        loop {
            let free = !current & ALL_SLOTS;
            if free == 0 {
                self.failures.fetch_add(1, Ordering::Relaxed);
                return Err(PoolError::Exhausted);
            }
            let slot = free.trailing_zeros();
            match self.occupied.compare_exchange_weak(
                current,
                current | (1 << slot),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    self.allocations.fetch_add(1, Ordering::Relaxed);
                    return Ok(Frame {
                        id: FrameId(slot as u8),
                        len: 0,
                        data: [0; FRAME_CAPACITY],
                        pool: self,
                    });
                }
                Err(actual) => current = actual,
            }
        }
    }

    /// Number of frames currently leased.
    pub fn in_use(&self) -> usize {
        self.occupied.load(Ordering::Acquire).count_ones() as usize
    }

    /// Number of frames that could be leased right now.
    pub fn available(&self) -> usize {
        POOL_SLOTS - self.in_use()
    }

    /// Total successful allocations since boot.
    pub fn allocations(&self) -> u32 {
        self.allocations.load(Ordering::Relaxed)
    }

    /// Total failed allocations since boot.
    pub fn failures(&self) -> u32 {
        self.failures.load(Ordering::Relaxed)
    }

    fn release(&self, id: FrameId) {
        let bit = 1u32 << id.0;
        let previous = self.occupied.fetch_and(!bit, Ordering::AcqRel);
        debug_assert!(previous & bit != 0, "frame {} released twice", id);
    }
}

impl Default for FramePool {
    fn default() -> Self {
        Self::new()
    }
}

/// An owned frame buffer leased from a [`FramePool`].
///
/// `len() <= FRAME_CAPACITY` always holds; every mutator clamps to the
/// capacity and reports how much it accepted.
pub struct Frame {
    id: FrameId,
    len: usize,
    data: [u8; FRAME_CAPACITY],
    pool: &'static FramePool,
}

impl Frame {
    /// Pool slot of this frame.
    #[inline]
    pub fn id(&self) -> FrameId {
        self.id
    }

    /// Bytes currently held.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub const fn capacity(&self) -> usize {
        FRAME_CAPACITY
    }

    /// Room left before the frame is full.
    #[inline]
    pub fn remaining(&self) -> usize {
        FRAME_CAPACITY - self.len
    }

    /// The held bytes.
    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.len]
    }

    /// Most recently appended byte.
    #[inline]
    pub fn last(&self) -> Option<u8> {
        self.as_slice().last().copied()
    }

    /// Held bytes from `offset` onwards (empty if `offset >= len`).
    pub fn tail(&self, offset: usize) -> &[u8] {
        &self.data[offset.min(self.len)..self.len]
    }

    /// Append as much of `bytes` as fits; returns the number appended.
    pub fn extend_from_slice(&mut self, bytes: &[u8]) -> usize {
        let n = bytes.len().min(self.remaining());
        self.data[self.len..self.len + n].copy_from_slice(&bytes[..n]);
        self.len += n;
        n
    }

    /// Append one byte; returns `false` if the frame is full.
    pub fn push(&mut self, byte: u8) -> bool {
        if self.len == FRAME_CAPACITY {
            return false;
        }
        self.data[self.len] = byte;
        self.len += 1;
        true
    }

    /// Unused tail of the buffer, for callers that fill it in place.
    /// Follow with [`Frame::commit`].
    pub fn spare_mut(&mut self) -> &mut [u8] {
        &mut self.data[self.len..]
    }

    /// Mark `n` bytes written through [`Frame::spare_mut`] as held.
    pub fn commit(&mut self, n: usize) {
        self.len = (self.len + n).min(FRAME_CAPACITY);
    }

    /// Shorten the frame to at most `len` bytes.
    pub fn truncate(&mut self, len: usize) {
        self.len = self.len.min(len);
    }
}

impl Drop for Frame {
    fn drop(&mut self) {
        self.pool.release(self.id);
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("id", &self.id)
            .field("len", &self.len)
            .finish()
    }
}
