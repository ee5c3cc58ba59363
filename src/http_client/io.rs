//! Byte tap
//!
//! `TapStream` interposes on a stream and records every successful read and
//! write with a timestamp relative to the tap's creation. The recorded
//! entries outlive the connection: they are shared behind an `Arc` so the
//! response can carry them after the stream is gone.

use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

/// Wire direction of a tap entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Send,
    Recv,
}

/// One recorded chunk.
#[derive(Debug, Clone)]
pub struct TapEntry {
    /// Time since the owning tap was created.
    pub elapsed: Duration,
    pub direction: Direction,
    pub bytes: Vec<u8>,
}

#[derive(Debug)]
struct TapInner {
    start: Instant,
    entries: Mutex<Vec<TapEntry>>,
}

/// Shared, append-only record of one connection's traffic.
#[derive(Debug, Clone)]
pub struct Tap {
    inner: Arc<TapInner>,
}

impl Tap {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(TapInner {
                start: Instant::now(),
                entries: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn start(&self) -> Instant {
        self.inner.start
    }

    /// Append one chunk. The lock is held only for the push.
    pub fn record(&self, direction: Direction, bytes: &[u8]) {
        let entry = TapEntry {
            elapsed: self.inner.start.elapsed(),
            direction,
            bytes: bytes.to_vec(),
        };
        if let Ok(mut entries) = self.inner.entries.lock() {
            entries.push(entry);
        }
    }

    /// Snapshot of everything recorded so far.
    pub fn entries(&self) -> Vec<TapEntry> {
        self.inner
            .entries
            .lock()
            .map(|entries| entries.clone())
            .unwrap_or_default()
    }
}

impl Default for Tap {
    fn default() -> Self {
        Self::new()
    }
}

/// Merge entries from several taps onto one clock. Each tap's entries are
/// shifted by its start offset from the earliest tap, then stably sorted,
/// so same-tick entries keep their source order.
pub fn merge_taps(taps: &[Tap]) -> Vec<TapEntry> {
    let Some(base) = taps.iter().map(|tap| tap.start()).min() else {
        return Vec::new();
    };

    let mut merged = Vec::new();
    for tap in taps {
        let offset = tap
            .start()
            .checked_duration_since(base)
            .unwrap_or(Duration::ZERO);
        for mut entry in tap.entries() {
            entry.elapsed += offset;
            merged.push(entry);
        }
    }
    merged.sort_by_key(|entry| entry.elapsed);
    merged
}

/// A stream wrapper feeding a [`Tap`].
#[derive(Debug)]
pub struct TapStream<S> {
    inner: S,
    tap: Tap,
}

impl<S> TapStream<S> {
    pub fn new(inner: S, tap: Tap) -> Self {
        Self { inner, tap }
    }

    pub fn tap(&self) -> Tap {
        self.tap.clone()
    }

    pub fn get_ref(&self) -> &S {
        &self.inner
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for TapStream<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        let result = Pin::new(&mut this.inner).poll_read(cx, buf);
        if let Poll::Ready(Ok(())) = result {
            let filled = buf.filled();
            if filled.len() > before {
                this.tap.record(Direction::Recv, &filled[before..]);
            }
        }
        result
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for TapStream<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        let result = Pin::new(&mut this.inner).poll_write(cx, buf);
        if let Poll::Ready(Ok(written)) = result {
            if written > 0 {
                this.tap.record(Direction::Send, &buf[..written]);
            }
        }
        result
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_tap_records_both_directions() {
        let (client, mut server) = tokio::io::duplex(1024);
        let tap = Tap::new();
        let mut tapped = TapStream::new(client, tap.clone());

        tapped.write_all(b"hello").await.unwrap();
        server.write_all(b"world!").await.unwrap();
        let mut buf = [0u8; 6];
        tapped.read_exact(&mut buf).await.unwrap();

        let entries = tap.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].direction, Direction::Send);
        assert_eq!(entries[0].bytes, b"hello");
        assert_eq!(entries[1].direction, Direction::Recv);
        assert_eq!(entries[1].bytes, b"world!");
        assert!(entries[0].elapsed <= entries[1].elapsed);
    }

    #[tokio::test]
    async fn test_entries_snapshot_is_independent() {
        let (client, _server) = tokio::io::duplex(64);
        let tap = Tap::new();
        let mut tapped = TapStream::new(client, tap.clone());
        tapped.write_all(b"x").await.unwrap();

        let mut copy = tap.entries();
        copy.clear();
        assert_eq!(tap.entries().len(), 1);
    }

    #[test]
    fn test_merge_taps_shifts_and_sorts() {
        let first = Tap::new();
        first.record(Direction::Send, b"a");
        std::thread::sleep(Duration::from_millis(5));
        let second = Tap::new();
        second.record(Direction::Recv, b"b");

        let merged = merge_taps(&[first, second]);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].bytes, b"a");
        assert_eq!(merged[1].bytes, b"b");
        assert!(merged[1].elapsed >= Duration::from_millis(5));
    }

    #[test]
    fn test_merge_empty() {
        assert!(merge_taps(&[]).is_empty());
    }
}
