//! Per-request timing
//!
//! One tracker per `execute` call. The dialer marks TCP, the TLS engine
//! marks the handshake, the transports mark first byte, and the engine
//! marks body completion. DNS time is folded into the TCP phase: the
//! platform dial is a single opaque operation here.

use std::time::Instant;

use serde::{Deserialize, Serialize};

/// Millisecond timing breakdown attached to a response.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimingData {
    pub tcp_ms: u64,
    pub tls_ms: u64,
    pub ttfb_ms: u64,
    pub download_ms: u64,
    pub total_ms: u64,
}

/// Instant collector for a single request.
#[derive(Debug, Clone)]
pub struct TimingTracker {
    request_start: Instant,
    tcp_start: Option<Instant>,
    tcp_done: Option<Instant>,
    tls_start: Option<Instant>,
    tls_done: Option<Instant>,
    first_byte: Option<Instant>,
    body_done: Option<Instant>,
}

impl TimingTracker {
    pub fn new() -> Self {
        Self {
            request_start: Instant::now(),
            tcp_start: None,
            tcp_done: None,
            tls_start: None,
            tls_done: None,
            first_byte: None,
            body_done: None,
        }
    }

    pub fn request_start(&self) -> Instant {
        self.request_start
    }

    pub fn mark_tcp_start(&mut self) {
        self.tcp_start = Some(Instant::now());
    }

    pub fn mark_tcp_done(&mut self) {
        self.tcp_done = Some(Instant::now());
    }

    pub fn mark_tls_start(&mut self) {
        self.tls_start = Some(Instant::now());
    }

    pub fn mark_tls_done(&mut self) {
        self.tls_done = Some(Instant::now());
    }

    /// First response bytes observed. Later calls win so the value always
    /// reflects the hop that produced the returned response.
    pub fn mark_first_byte(&mut self) {
        self.first_byte = Some(Instant::now());
    }

    pub fn mark_body_done(&mut self) {
        self.body_done = Some(Instant::now());
    }

    /// Compute the deltas. Spans with an unset endpoint report zero.
    pub fn data(&self) -> TimingData {
        TimingData {
            tcp_ms: span_ms(self.tcp_start, self.tcp_done),
            tls_ms: span_ms(self.tls_start, self.tls_done),
            ttfb_ms: span_ms(Some(self.request_start), self.first_byte),
            download_ms: span_ms(self.first_byte, self.body_done),
            total_ms: span_ms(Some(self.request_start), self.body_done),
        }
    }
}

impl Default for TimingTracker {
    fn default() -> Self {
        Self::new()
    }
}

fn span_ms(start: Option<Instant>, end: Option<Instant>) -> u64 {
    match (start, end) {
        (Some(start), Some(end)) if end >= start => {
            end.duration_since(start).as_millis() as u64
        }
        _ => 0,
    }
}
