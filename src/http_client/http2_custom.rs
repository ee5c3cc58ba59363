//! Wire-controlled HTTP/2 transport
//!
//! Executes one request on stream 1 with complete control over the client
//! bytes: the 24-byte preface, a SETTINGS frame whose parameters appear in
//! exactly the order the Akamai fingerprint gives, an optional
//! connection-level WINDOW_UPDATE, a HEADERS frame with pseudo-headers in
//! the fingerprint's order, and DATA frames capped at 16384 bytes. All
//! client frames are flushed as one write.
//!
//! The read loop honours SETTINGS (ACKs them), PING (echoes), GOAWAY,
//! RST_STREAM and flow control, and tolerates EOF after headers.

use std::time::Instant;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::akamai::AkamaiSpec;
use crate::error::{EngineError, Result};
use crate::http_client::hpack;
use crate::http_client::response::{status_text, RawResponse};
use crate::request::AssembledRequest;
use crate::timing::TimingTracker;

/// The fixed client connection preface.
pub const HTTP2_PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

/// Response bodies larger than this fail the request.
pub const MAX_RESPONSE_BODY: usize = 100 * 1024 * 1024;

/// Largest DATA payload we emit per frame.
const DATA_CHUNK: usize = 16_384;


/// Frame type codes (RFC 9113 §6).
pub mod frame_types {
    pub const DATA: u8 = 0x0;
    pub const HEADERS: u8 = 0x1;
    pub const PRIORITY: u8 = 0x2;
    pub const RST_STREAM: u8 = 0x3;
    pub const SETTINGS: u8 = 0x4;
    pub const PUSH_PROMISE: u8 = 0x5;
    pub const PING: u8 = 0x6;
    pub const GOAWAY: u8 = 0x7;
    pub const WINDOW_UPDATE: u8 = 0x8;
    pub const CONTINUATION: u8 = 0x9;
}

/// Frame flags.
pub mod flags {
    pub const END_STREAM: u8 = 0x1;
    pub const ACK: u8 = 0x1;
    pub const END_HEADERS: u8 = 0x4;
    pub const PADDED: u8 = 0x8;
    pub const PRIORITY: u8 = 0x20;
}

/// The 9-byte frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub length: usize,
    pub kind: u8,
    pub flags: u8,
    pub stream_id: u32,
}

impl FrameHeader {
    pub fn parse(bytes: &[u8; 9]) -> Self {
        Self {
            length: u32::from_be_bytes([0, bytes[0], bytes[1], bytes[2]]) as usize,
            kind: bytes[3],
            flags: bytes[4],
            stream_id: u32::from_be_bytes([bytes[5], bytes[6], bytes[7], bytes[8]]) & 0x7fff_ffff,
        }
    }

    pub fn encode(length: usize, kind: u8, flags: u8, stream_id: u32) -> [u8; 9] {
        [
            ((length >> 16) & 0xff) as u8,
            ((length >> 8) & 0xff) as u8,
            (length & 0xff) as u8,
            kind,
            flags,
            ((stream_id >> 24) & 0x7f) as u8,
            ((stream_id >> 16) & 0xff) as u8,
            ((stream_id >> 8) & 0xff) as u8,
            (stream_id & 0xff) as u8,
        ]
    }
}

/// Append one frame to a buffer.
pub fn put_frame(out: &mut Vec<u8>, kind: u8, frame_flags: u8, stream_id: u32, payload: &[u8]) {
    out.extend_from_slice(&FrameHeader::encode(payload.len(), kind, frame_flags, stream_id));
    out.extend_from_slice(payload);
}

/// Serialize the ordered SETTINGS payload of an Akamai spec.
pub fn settings_payload(akamai: &AkamaiSpec) -> Vec<u8> {
    let mut payload = Vec::with_capacity(akamai.settings.len() * 6);
    for (id, value) in &akamai.settings {
        payload.extend_from_slice(&id.to_be_bytes());
        payload.extend_from_slice(&value.to_be_bytes());
    }
    payload
}

/// The complete ordered header list for a request: pseudo-headers in the
/// fingerprint's order, then regular headers lowercased in caller order.
pub fn h2_header_list(akamai: &AkamaiSpec, request: &AssembledRequest) -> Vec<(String, String)> {
    let mut list = Vec::with_capacity(4 + request.headers.len());
    for pseudo in &akamai.pseudo_header_order {
        let value = match pseudo {
            crate::akamai::PseudoHeader::Method => request.method.as_str().to_string(),
            crate::akamai::PseudoHeader::Authority => request.authority.clone(),
            crate::akamai::PseudoHeader::Scheme => request.scheme.clone(),
            crate::akamai::PseudoHeader::Path => request.path_and_query.clone(),
        };
        list.push((pseudo.as_str().to_string(), value));
    }
    for (name, value) in &request.headers {
        let lower = name.to_ascii_lowercase();
        // Connection-specific headers are illegal in HTTP/2; the authority
        // pseudo-header already carries the host.
        if matches!(
            lower.as_str(),
            "host" | "connection" | "proxy-connection" | "keep-alive" | "transfer-encoding" | "upgrade"
        ) {
            continue;
        }
        list.push((lower, value.clone()));
    }
    list
}

/// Serialize every client frame of the request into one buffer: preface,
/// ordered SETTINGS, optional WINDOW_UPDATE, HEADERS (+ CONTINUATION), DATA.
pub fn client_frames(akamai: &AkamaiSpec, request: &AssembledRequest) -> Vec<u8> {
    let mut out = Vec::with_capacity(1024 + request.body.len());
    out.extend_from_slice(HTTP2_PREFACE);

    put_frame(&mut out, frame_types::SETTINGS, 0, 0, &settings_payload(akamai));

    if akamai.window_update > 0 {
        put_frame(
            &mut out,
            frame_types::WINDOW_UPDATE,
            0,
            0,
            &akamai.window_update.to_be_bytes(),
        );
    }

    let block = hpack::encode_block(&h2_header_list(akamai, request));
    let end_stream = if request.body.is_empty() {
        flags::END_STREAM
    } else {
        0
    };
    if block.len() <= DATA_CHUNK {
        put_frame(
            &mut out,
            frame_types::HEADERS,
            flags::END_HEADERS | end_stream,
            1,
            &block,
        );
    } else {
        // Oversized blocks continue in CONTINUATION frames.
        let mut chunks = block.chunks(DATA_CHUNK).peekable();
        let first = chunks.next().unwrap_or(&[]);
        put_frame(&mut out, frame_types::HEADERS, end_stream, 1, first);
        while let Some(chunk) = chunks.next() {
            let last = chunks.peek().is_none();
            let continuation_flags = if last { flags::END_HEADERS } else { 0 };
            put_frame(&mut out, frame_types::CONTINUATION, continuation_flags, 1, chunk);
        }
    }

    if !request.body.is_empty() {
        let mut sent = 0;
        for chunk in request.body.chunks(DATA_CHUNK) {
            sent += chunk.len();
            let last = sent == request.body.len() && chunk.len() < DATA_CHUNK;
            let data_flags = if last { flags::END_STREAM } else { 0 };
            put_frame(&mut out, frame_types::DATA, data_flags, 1, chunk);
        }
        if request.body.len() % DATA_CHUNK == 0 {
            // Body ended exactly on a frame boundary: close the stream with
            // an empty DATA frame.
            put_frame(&mut out, frame_types::DATA, flags::END_STREAM, 1, &[]);
        }
    }

    out
}

async fn read_frame<S>(io: &mut S, deadline: Instant) -> Result<(FrameHeader, Vec<u8>)>
where
    S: AsyncRead + Unpin,
{
    let mut head = [0u8; 9];
    read_exact_deadline(io, &mut head, deadline).await?;
    let header = FrameHeader::parse(&head);
    // The 24-bit length field bounds a single frame; body accumulation is
    // capped separately by MAX_RESPONSE_BODY.
    let mut payload = vec![0u8; header.length];
    read_exact_deadline(io, &mut payload, deadline).await?;
    Ok((header, payload))
}

async fn read_exact_deadline<S>(io: &mut S, buf: &mut [u8], deadline: Instant) -> Result<()>
where
    S: AsyncRead + Unpin,
{
    let remaining = deadline.saturating_duration_since(Instant::now());
    if remaining.is_zero() {
        return Err(EngineError::timeout("http2 read"));
    }
    tokio::time::timeout(remaining, io.read_exact(buf))
        .await
        .map_err(|_| EngineError::timeout("http2 read"))??;
    Ok(())
}

/// Strip PADDED / PRIORITY decoration from a HEADERS or DATA payload.
fn strip_padding_and_priority(kind: u8, frame_flags: u8, payload: Vec<u8>) -> Result<Vec<u8>> {
    let mut start = 0;
    let mut end = payload.len();

    if frame_flags & flags::PADDED != 0 {
        if payload.is_empty() {
            return Err(EngineError::Protocol("padded frame without pad length".to_string()));
        }
        let pad = payload[0] as usize;
        start = 1;
        if pad + 1 > payload.len() {
            return Err(EngineError::Protocol("pad length exceeds frame".to_string()));
        }
        end = payload.len() - pad;
    }

    if kind == frame_types::HEADERS && frame_flags & flags::PRIORITY != 0 {
        start += 5;
        if start > end {
            return Err(EngineError::Protocol("priority fields exceed frame".to_string()));
        }
    }

    Ok(payload[start..end].to_vec())
}

/// Execute one request over `io` with full wire control. `io` is typically
/// the TLS stream (ALPN must have selected h2); tests drive it over plain
/// pipes.
pub async fn round_trip<S>(
    io: &mut S,
    akamai: &AkamaiSpec,
    request: &AssembledRequest,
    timing: &mut TimingTracker,
    deadline: Instant,
) -> Result<RawResponse>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let out = client_frames(akamai, request);
    log::debug!(
        "h2 custom: sending {} bytes ({} settings, window_update={})",
        out.len(),
        akamai.settings.len(),
        akamai.window_update
    );
    io.write_all(&out).await?;
    io.flush().await?;

    let mut decoder = hpack::ResponseDecoder::new();
    let mut status: Option<u16> = None;
    let mut response_headers: Vec<(String, String)> = Vec::new();
    let mut body: Vec<u8> = Vec::new();

    loop {
        let (header, payload) = match read_frame(io, deadline).await {
            Ok(frame) => frame,
            Err(EngineError::Io(ref e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof && status.is_some() =>
            {
                // EOF after headers: return what we have.
                log::debug!("h2 custom: eof after headers, finalising with partial body");
                break;
            }
            Err(other) => return Err(other),
        };

        match header.kind {
            frame_types::HEADERS if header.stream_id == 1 => {
                if status.is_none() {
                    timing.mark_first_byte();
                }
                let end_stream = header.flags & flags::END_STREAM != 0;
                let mut block =
                    strip_padding_and_priority(header.kind, header.flags, payload)?;

                // Collect CONTINUATION frames until the block is complete.
                let mut end_headers = header.flags & flags::END_HEADERS != 0;
                while !end_headers {
                    let (cont, cont_payload) = read_frame(io, deadline).await?;
                    if cont.kind != frame_types::CONTINUATION || cont.stream_id != 1 {
                        return Err(EngineError::Protocol(
                            "expected CONTINUATION while reading header block".to_string(),
                        ));
                    }
                    block.extend_from_slice(&cont_payload);
                    end_headers = cont.flags & flags::END_HEADERS != 0;
                }

                for (name, value) in decoder.decode(&block)? {
                    if name == ":status" {
                        let code = value.parse::<u16>().map_err(|_| {
                            EngineError::Protocol(format!("bad :status value {:?}", value))
                        })?;
                        status = Some(code);
                    } else if !name.starts_with(':') {
                        response_headers.push((name, value));
                    }
                }

                if end_stream {
                    break;
                }
            }
            frame_types::DATA if header.stream_id == 1 => {
                let end_stream = header.flags & flags::END_STREAM != 0;
                let data = strip_padding_and_priority(header.kind, header.flags, payload)?;

                if body.len() + data.len() > MAX_RESPONSE_BODY {
                    return Err(EngineError::Protocol(format!(
                        "response body exceeds {} bytes",
                        MAX_RESPONSE_BODY
                    )));
                }
                if !data.is_empty() {
                    // Replenish both flow-control windows.
                    let mut update = Vec::with_capacity(26);
                    let increment = (data.len() as u32).to_be_bytes();
                    put_frame(&mut update, frame_types::WINDOW_UPDATE, 0, 0, &increment);
                    put_frame(&mut update, frame_types::WINDOW_UPDATE, 0, 1, &increment);
                    io.write_all(&update).await?;
                    io.flush().await?;
                    body.extend_from_slice(&data);
                }

                if end_stream {
                    break;
                }
            }
            frame_types::SETTINGS => {
                if header.flags & flags::ACK == 0 {
                    let mut ack = Vec::with_capacity(9);
                    put_frame(&mut ack, frame_types::SETTINGS, flags::ACK, 0, &[]);
                    io.write_all(&ack).await?;
                    io.flush().await?;
                }
            }
            frame_types::PING => {
                if header.flags & flags::ACK == 0 {
                    let mut pong = Vec::with_capacity(17);
                    put_frame(&mut pong, frame_types::PING, flags::ACK, 0, &payload);
                    io.write_all(&pong).await?;
                    io.flush().await?;
                }
            }
            frame_types::WINDOW_UPDATE => {}
            frame_types::GOAWAY => {
                if payload.len() < 8 {
                    return Err(EngineError::Protocol("short GOAWAY frame".to_string()));
                }
                let last_stream_id =
                    u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]])
                        & 0x7fff_ffff;
                let error_code =
                    u32::from_be_bytes([payload[4], payload[5], payload[6], payload[7]]);

                if status.is_some() {
                    break;
                }
                if error_code == 0 && last_stream_id >= 1 {
                    // Graceful shutdown that still covers our stream.
                    continue;
                }
                return Err(EngineError::Protocol(format!(
                    "GOAWAY error_code={} last_stream_id={}",
                    error_code, last_stream_id
                )));
            }
            frame_types::RST_STREAM if header.stream_id == 1 => {
                let code = if payload.len() >= 4 {
                    u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]])
                } else {
                    0
                };
                if status.is_some() {
                    break;
                }
                return Err(EngineError::Protocol(format!(
                    "RST_STREAM error_code={} before headers",
                    code
                )));
            }
            frame_types::PRIORITY | frame_types::PUSH_PROMISE | frame_types::CONTINUATION => {}
            _ => {}
        }
    }

    let status = status
        .ok_or_else(|| EngineError::Protocol("stream closed before headers".to_string()))?;

    Ok(RawResponse {
        status,
        status_text: status_text(status).to_string(),
        http_version: "HTTP/2.0".to_string(),
        headers: response_headers,
        body,
    })
}
