//! # Relay Channels
//!
//! A bounded, ordered byte pipe between one producer and one consumer. Two
//! instances exist, one per direction, and they are never cross-connected:
//!
//! ```text
//!   UART worker ──► RelayChannel (serial → wireless) ──► BLE worker
//!   BLE callback ──► RelayChannel (wireless → serial) ──► UART TX
//! ```
//!
//! Producers never block in callback context: [`RelayChannel::try_write`]
//! accepts what fits and reports the count. A short write is an accepted
//! data-loss condition; it is counted here and logged by the caller.

use core::convert::Infallible;
use core::sync::atomic::{AtomicU32, Ordering};

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::pipe::Pipe;

use crate::config::{ShortWritePolicy, CHANNEL_CAPACITY};

/// Per-channel counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ChannelStats {
    /// Bytes accepted by producers.
    pub accepted: u32,
    /// Bytes producers offered but the channel refused.
    pub dropped: u32,
    /// Writes that accepted fewer bytes than offered.
    pub short_writes: u32,
    /// Bytes currently buffered.
    pub buffered: usize,
}

/// Bounded byte pipe with a minimum contiguous-write granularity.
pub struct RelayChannel {
    name: &'static str,
    pipe: Pipe<CriticalSectionRawMutex, CHANNEL_CAPACITY>,
    accepted: AtomicU32,
    dropped: AtomicU32,
    short_writes: AtomicU32,
}

impl RelayChannel {
    /// Create an empty channel. `name` only appears in log lines.
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            pipe: Pipe::new(),
            accepted: AtomicU32::new(0),
            dropped: AtomicU32::new(0),
            short_writes: AtomicU32::new(0),
        }
    }

    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        CHANNEL_CAPACITY
    }

    /// Bytes waiting for the consumer.
    #[inline]
    pub fn len(&self) -> usize {
        self.pipe.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.pipe.is_empty()
    }

    /// Bytes a producer could write right now.
    #[inline]
    pub fn free_capacity(&self) -> usize {
        self.pipe.free_capacity()
    }

    /// Non-blocking write. Returns the number of bytes accepted, which may be
    /// fewer than `data.len()`.
    ///
    /// Nothing is written when the free space is smaller than
    /// `min(min_chunk, data.len())`, so a consumer never sees a sliver of a
    /// frame shorter than the granularity.
    pub fn try_write(&self, data: &[u8], min_chunk: usize) -> usize {
        let accepted = self.push(data, min_chunk);
        self.account(data.len(), accepted);
        accepted
    }

    /// Producer write for worker context, following `policy` on short writes.
    ///
    /// `Retry` yields to the executor between attempts so the consumer can
    /// drain; it never waits beyond the configured number of attempts. The
    /// counters see the whole write once, not each attempt.
    pub async fn write(&self, data: &[u8], min_chunk: usize, policy: ShortWritePolicy) -> usize {
        let mut written = self.push(data, min_chunk);
        if let ShortWritePolicy::Retry { attempts } = policy {
            for _ in 0..attempts {
                if written == data.len() {
                    break;
                }
                futures_lite::future::yield_now().await;
                written += self.push(&data[written..], min_chunk);
            }
        }
        self.account(data.len(), written);
        written
    }

    /// Wait for at least one byte, then read up to `buf.len()` bytes.
    pub async fn read(&self, buf: &mut [u8]) -> usize {
        if buf.is_empty() {
            return 0;
        }
        self.pipe.read(buf).await
    }

    /// Non-blocking read; returns 0 when the channel is empty.
    pub fn try_read(&self, buf: &mut [u8]) -> usize {
        if buf.is_empty() {
            return 0;
        }
        self.pipe.try_read(buf).unwrap_or(0)
    }

    /// Discard everything buffered.
    pub fn clear(&self) {
        let stale = self.pipe.len();
        self.pipe.clear();
        if stale > 0 {
            log::debug!("{}: discarded {} stale bytes", self.name, stale);
        }
    }

    /// Consumer handle implementing [`embedded_io_async::Read`].
    pub fn reader(&self) -> ChannelReader<'_> {
        ChannelReader { channel: self }
    }

    pub fn stats(&self) -> ChannelStats {
        ChannelStats {
            accepted: self.accepted.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            short_writes: self.short_writes.load(Ordering::Relaxed),
            buffered: self.pipe.len(),
        }
    }

    /// Uncounted write of as much of `data` as the min-chunk rule allows.
    fn push(&self, data: &[u8], min_chunk: usize) -> usize {
        if data.is_empty() || self.pipe.free_capacity() < min_chunk.min(data.len()) {
            return 0;
        }
        let mut accepted = 0;
        // The pipe only fills up to the ring's wrap point per call.
        while accepted < data.len() {
            match self.pipe.try_write(&data[accepted..]) {
                Ok(n) if n > 0 => accepted += n,
                _ => break,
            }
        }
        accepted
    }

    fn account(&self, offered: usize, accepted: usize) {
        self.accepted.fetch_add(accepted as u32, Ordering::Relaxed);
        if accepted < offered {
            self.dropped
                .fetch_add((offered - accepted) as u32, Ordering::Relaxed);
            self.short_writes.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Read half of a [`RelayChannel`].
pub struct ChannelReader<'a> {
    channel: &'a RelayChannel,
}

impl embedded_io::ErrorType for ChannelReader<'_> {
    type Error = Infallible;
}

impl embedded_io_async::Read for ChannelReader<'_> {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        Ok(self.channel.read(buf).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_channel_is_empty() {
        let channel = RelayChannel::new("test");
        assert!(channel.is_empty());
        assert_eq!(channel.free_capacity(), CHANNEL_CAPACITY);
        assert_eq!(channel.stats(), ChannelStats::default());
    }

    #[test]
    fn test_write_and_read_preserve_order() {
        let channel = RelayChannel::new("test");
        assert_eq!(channel.try_write(b"hello ", 4), 6);
        assert_eq!(channel.try_write(b"world", 4), 5);

        let mut buf = [0u8; 32];
        let n = channel.try_read(&mut buf);
        assert_eq!(&buf[..n], b"hello world");
        assert_eq!(channel.try_read(&mut buf), 0);
    }

    #[test]
    fn test_short_write_accepts_free_space() {
        let channel = RelayChannel::new("test");
        let filler = [0u8; CHANNEL_CAPACITY - 10];
        assert_eq!(channel.try_write(&filler, 4), filler.len());

        // 10 bytes free, 16 requested
        assert_eq!(channel.try_write(&[1u8; 16], 4), 10);
        let stats = channel.stats();
        assert_eq!(stats.short_writes, 1);
        assert_eq!(stats.dropped, 6);
        assert_eq!(stats.buffered, CHANNEL_CAPACITY);
    }

    #[test]
    fn test_min_chunk_rejects_slivers() {
        let channel = RelayChannel::new("test");
        let filler = [0u8; CHANNEL_CAPACITY - 3];
        channel.try_write(&filler, 4);

        assert_eq!(channel.try_write(b"abcdef", 4), 0);
        // A write smaller than the granularity still goes through.
        assert_eq!(channel.try_write(b"ab", 4), 2);
    }

    #[test]
    fn test_clear_discards_buffered_bytes() {
        let channel = RelayChannel::new("test");
        channel.try_write(b"stale data", 1);
        channel.clear();
        assert!(channel.is_empty());
        assert_eq!(channel.free_capacity(), CHANNEL_CAPACITY);
    }

    #[tokio::test]
    async fn test_retry_policy_completes_after_drain() {
        let channel = RelayChannel::new("test");
        let filler = [0u8; CHANNEL_CAPACITY - 2];
        channel.try_write(&filler, 1);

        let mut sink = [0u8; CHANNEL_CAPACITY];
        let write = channel.write(b"abcd", 1, ShortWritePolicy::Retry { attempts: 4 });
        let drain = async {
            futures_lite::future::yield_now().await;
            channel.try_read(&mut sink)
        };
        let (written, drained) = futures_lite::future::zip(write, drain).await;

        assert_eq!(drained, CHANNEL_CAPACITY);
        assert_eq!(written, 4);
    }

    #[tokio::test]
    async fn test_completed_retry_counts_no_loss() {
        let channel = RelayChannel::new("test");
        let filler = [0u8; CHANNEL_CAPACITY - 2];
        channel.try_write(&filler, 1);

        let mut sink = [0u8; CHANNEL_CAPACITY];
        let write = channel.write(b"abcd", 1, ShortWritePolicy::Retry { attempts: 4 });
        let drain = async {
            futures_lite::future::yield_now().await;
            channel.try_read(&mut sink)
        };
        let (written, _) = futures_lite::future::zip(write, drain).await;
        assert_eq!(written, 4);

        let stats = channel.stats();
        assert_eq!(stats.dropped, 0);
        assert_eq!(stats.short_writes, 0);
        assert_eq!(stats.accepted as usize, filler.len() + 4);
    }

    #[tokio::test]
    async fn test_exhausted_retry_counts_one_short_write() {
        let channel = RelayChannel::new("test");
        let filler = [0u8; CHANNEL_CAPACITY - 2];
        channel.try_write(&filler, 1);

        let written = channel
            .write(b"abcd", 1, ShortWritePolicy::Retry { attempts: 3 })
            .await;
        assert_eq!(written, 2);

        let stats = channel.stats();
        assert_eq!(stats.dropped, 2);
        assert_eq!(stats.short_writes, 1);
    }

    #[tokio::test]
    async fn test_truncate_policy_does_not_wait() {
        let channel = RelayChannel::new("test");
        let filler = [0u8; CHANNEL_CAPACITY - 2];
        channel.try_write(&filler, 1);

        let written = channel.write(b"abcd", 1, ShortWritePolicy::Truncate).await;
        assert_eq!(written, 2);
    }

    #[tokio::test]
    async fn test_reader_implements_embedded_io() {
        use embedded_io_async::Read;

        let channel = RelayChannel::new("test");
        channel.try_write(b"ping", 1);

        let mut reader = channel.reader();
        let mut buf = [0u8; 2];
        assert_eq!(reader.read(&mut buf).await.unwrap(), 2);
        assert_eq!(&buf, b"pi");
    }
}
