//! TLS record parser for the connection timeline
//!
//! Turns the raw chunks captured by the byte tap into a human-readable event
//! list: one event per TLS record, with handshake subtype names, alert
//! descriptions and certificate summaries. Parsing is tolerant: bytes that
//! do not look like TLS still produce a generic event, and certificate
//! parse failures are silently dropped.

use serde::{Deserialize, Serialize};

use crate::http_client::io::{Direction, TapEntry};

/// One annotated wire event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnEvent {
    /// Milliseconds since the first tap was created.
    pub time_ms: f64,
    pub direction: Direction,
    /// Bytes on the wire this event covers (record header included).
    pub size: usize,
    /// E.g. `"ClientHello (517 bytes)"`.
    pub summary: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// Full lowercase hex of the source chunk.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hex: Option<String>,
}

/// The captured-connection report attached to a response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnTrace {
    pub events: Vec<ConnEvent>,
    pub target_addr: String,
    pub remote_addr: String,
    pub local_addr: String,
}

/// Annotate merged tap entries into a timeline. Each chunk is interpreted
/// as a sequence of TLS records; every resulting event carries the chunk's
/// timestamp and full hex.
pub fn annotate_entries(entries: &[TapEntry]) -> Vec<ConnEvent> {
    let mut events = Vec::new();
    for entry in entries {
        if entry.bytes.is_empty() {
            continue;
        }
        let time_ms = entry.elapsed.as_secs_f64() * 1000.0;
        let chunk_hex = hex::encode(&entry.bytes);
        let before = events.len();
        annotate_chunk(&entry.bytes, entry.direction, time_ms, &chunk_hex, &mut events);
        if events.len() == before {
            // Nothing parseable in the chunk; still surface it.
            events.push(ConnEvent {
                time_ms,
                direction: entry.direction,
                size: entry.bytes.len(),
                summary: format!("TLS Record (type={}) ({} bytes)", entry.bytes[0], entry.bytes.len()),
                detail: None,
                hex: Some(chunk_hex.clone()),
            });
        }
    }
    events
}

fn annotate_chunk(
    bytes: &[u8],
    direction: Direction,
    time_ms: f64,
    chunk_hex: &str,
    events: &mut Vec<ConnEvent>,
) {
    let mut offset = 0;
    while offset + 5 <= bytes.len() {
        let content_type = bytes[offset];
        if !(20..=23).contains(&content_type) {
            events.push(ConnEvent {
                time_ms,
                direction,
                size: bytes.len() - offset,
                summary: format!(
                    "TLS Record (type={}) ({} bytes)",
                    content_type,
                    bytes.len() - offset
                ),
                detail: None,
                hex: Some(chunk_hex.to_string()),
            });
            return;
        }

        let version = u16::from_be_bytes([bytes[offset + 1], bytes[offset + 2]]);
        let declared = u16::from_be_bytes([bytes[offset + 3], bytes[offset + 4]]) as usize;
        // Bound the payload to what the chunk actually holds.
        let end = (offset + 5 + declared).min(bytes.len());
        let payload = &bytes[offset + 5..end];
        let wire_size = 5 + payload.len();

        let (name, detail) = describe_record(content_type, version, payload);
        events.push(ConnEvent {
            time_ms,
            direction,
            size: wire_size,
            summary: format!("{} ({} bytes)", name, wire_size),
            detail,
            hex: Some(chunk_hex.to_string()),
        });

        offset += 5 + declared;
    }
}

fn describe_record(content_type: u8, version: u16, payload: &[u8]) -> (String, Option<String>) {
    match content_type {
        20 => (
            "ChangeCipherSpec".to_string(),
            Some(version_string(version)),
        ),
        21 => ("Alert".to_string(), alert_detail(payload)),
        22 => describe_handshake(version, payload),
        23 => ("Application Data".to_string(), None),
        other => (format!("TLS Record (type={})", other), None),
    }
}

fn alert_detail(payload: &[u8]) -> Option<String> {
    if payload.len() < 2 {
        return None;
    }
    let level = match payload[0] {
        1 => "warning",
        2 => "fatal",
        _ => "unknown",
    };
    Some(format!("{}: {}", level, alert_description(payload[1])))
}

fn alert_description(code: u8) -> String {
    match code {
        0 => "close_notify".to_string(),
        10 => "unexpected_message".to_string(),
        20 => "bad_record_mac".to_string(),
        22 => "record_overflow".to_string(),
        40 => "handshake_failure".to_string(),
        42 => "bad_certificate".to_string(),
        43 => "unsupported_certificate".to_string(),
        44 => "certificate_revoked".to_string(),
        45 => "certificate_expired".to_string(),
        46 => "certificate_unknown".to_string(),
        47 => "illegal_parameter".to_string(),
        48 => "unknown_ca".to_string(),
        49 => "access_denied".to_string(),
        50 => "decode_error".to_string(),
        51 => "decrypt_error".to_string(),
        70 => "protocol_version".to_string(),
        71 => "insufficient_security".to_string(),
        80 => "internal_error".to_string(),
        86 => "inappropriate_fallback".to_string(),
        90 => "user_canceled".to_string(),
        109 => "missing_extension".to_string(),
        110 => "unsupported_extension".to_string(),
        112 => "unrecognized_name".to_string(),
        113 => "bad_certificate_status_response".to_string(),
        115 => "unknown_psk_identity".to_string(),
        116 => "certificate_required".to_string(),
        120 => "no_application_protocol".to_string(),
        other => format!("alert_{}", other),
    }
}

fn describe_handshake(record_version: u16, payload: &[u8]) -> (String, Option<String>) {
    if payload.is_empty() {
        return ("Handshake".to_string(), None);
    }
    match payload[0] {
        0x01 => ("ClientHello".to_string(), client_hello_detail(payload)),
        0x02 => ("ServerHello".to_string(), server_hello_detail(payload)),
        0x0b => ("Certificate".to_string(), certificate_detail(payload)),
        0x0c => ("ServerKeyExchange".to_string(), None),
        0x0d => ("CertificateRequest".to_string(), None),
        0x0e => ("ServerHelloDone".to_string(), None),
        0x0f => ("CertificateVerify".to_string(), None),
        0x10 => ("ClientKeyExchange".to_string(), None),
        0x14 => ("Finished".to_string(), None),
        other => (
            format!("Handshake (type={})", other),
            Some(version_string(record_version)),
        ),
    }
}

/// ClientHello detail: negotiation version, cipher and extension counts,
/// SNI when present.
fn client_hello_detail(payload: &[u8]) -> Option<String> {
    let body = handshake_body(payload)?;
    if body.len() < 38 {
        return None;
    }

    let version = u16::from_be_bytes([body[0], body[1]]);
    let mut offset = 2 + 32; // version + random

    let session_id_len = *body.get(offset)? as usize;
    offset += 1 + session_id_len;

    let cipher_len = read_u16(body, offset)? as usize;
    offset += 2;
    let cipher_count = cipher_len / 2;
    offset += cipher_len;

    let compression_len = *body.get(offset)? as usize;
    offset += 1 + compression_len;

    let mut extension_count = 0;
    let mut sni = None;
    if let Some(ext_total) = read_u16(body, offset) {
        offset += 2;
        let ext_end = (offset + ext_total as usize).min(body.len());
        while offset + 4 <= ext_end {
            let ext_type = read_u16(body, offset)?;
            let ext_len = read_u16(body, offset + 2)? as usize;
            offset += 4;
            extension_count += 1;
            if ext_type == 0 && offset + ext_len <= body.len() {
                sni = parse_sni(&body[offset..offset + ext_len]);
            }
            offset += ext_len;
        }
    }

    let mut detail = format!(
        "{}, Ciphers: {}, Extensions: {}",
        version_string(version),
        cipher_count,
        extension_count
    );
    if let Some(sni) = sni {
        detail.push_str(&format!(", SNI: {}", sni));
    }
    Some(detail)
}

/// ServerHello detail: the actual negotiated version (read from the
/// supported_versions extension so TLS 1.3 shows correctly) plus the
/// selected cipher.
fn server_hello_detail(payload: &[u8]) -> Option<String> {
    let body = handshake_body(payload)?;
    if body.len() < 38 {
        return None;
    }

    let mut version = u16::from_be_bytes([body[0], body[1]]);
    let mut offset = 2 + 32;

    let session_id_len = *body.get(offset)? as usize;
    offset += 1 + session_id_len;

    let cipher = read_u16(body, offset)?;
    offset += 2;
    offset += 1; // compression method

    // supported_versions (43) carries the true version in TLS 1.3.
    if let Some(ext_total) = read_u16(body, offset) {
        offset += 2;
        let ext_end = (offset + ext_total as usize).min(body.len());
        while offset + 4 <= ext_end {
            let ext_type = read_u16(body, offset)?;
            let ext_len = read_u16(body, offset + 2)? as usize;
            offset += 4;
            if ext_type == 43 && ext_len == 2 {
                if let Some(selected) = read_u16(body, offset) {
                    version = selected;
                }
            }
            offset += ext_len;
        }
    }

    Some(format!(
        "{}, Cipher: 0x{:04X}",
        version_string(version),
        cipher
    ))
}

/// Certificate detail: summaries of up to the first three certificates.
/// Unparseable certificates are skipped without comment.
fn certificate_detail(payload: &[u8]) -> Option<String> {
    let body = handshake_body(payload)?;
    if body.len() < 3 {
        return None;
    }

    let total = read_u24(body, 0)? as usize;
    let mut offset = 3;
    let end = (3 + total).min(body.len());

    let mut summaries = Vec::new();
    let mut index = 0;
    while offset + 3 <= end && index < 3 {
        let cert_len = read_u24(body, offset)? as usize;
        offset += 3;
        if offset + cert_len > body.len() {
            break;
        }
        let der = &body[offset..offset + cert_len];
        offset += cert_len;

        if let Some(summary) = summarize_certificate(der, index == 0) {
            summaries.push(summary);
        }
        index += 1;
    }

    if summaries.is_empty() {
        None
    } else {
        Some(summaries.join("; "))
    }
}

fn summarize_certificate(der: &[u8], leaf: bool) -> Option<String> {
    let (_, cert) = x509_parser::parse_x509_certificate(der).ok()?;

    let subject_cn = cert
        .subject()
        .iter_common_name()
        .next()
        .and_then(|attr| attr.as_str().ok())
        .unwrap_or("?");

    if !leaf {
        return Some(format!("CA: {}", subject_cn));
    }

    let issuer_cn = cert
        .issuer()
        .iter_common_name()
        .next()
        .and_then(|attr| attr.as_str().ok())
        .unwrap_or("?");

    let expires = chrono::DateTime::from_timestamp(cert.validity().not_after.timestamp(), 0)
        .map(|dt| dt.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| "?".to_string());

    Some(format!(
        "CN={}, Issuer={}, Expires={}",
        subject_cn, issuer_cn, expires
    ))
}

fn handshake_body(payload: &[u8]) -> Option<&[u8]> {
    if payload.len() < 4 {
        return None;
    }
    let declared = read_u24(payload, 1)? as usize;
    let end = (4 + declared).min(payload.len());
    Some(&payload[4..end])
}

fn parse_sni(data: &[u8]) -> Option<String> {
    // server_name_list: u16 len, then type(1) + u16 len + name
    if data.len() < 5 || data[2] != 0 {
        return None;
    }
    let name_len = u16::from_be_bytes([data[3], data[4]]) as usize;
    if data.len() < 5 + name_len {
        return None;
    }
    String::from_utf8(data[5..5 + name_len].to_vec()).ok()
}

fn read_u16(data: &[u8], offset: usize) -> Option<u16> {
    if offset + 2 > data.len() {
        return None;
    }
    Some(u16::from_be_bytes([data[offset], data[offset + 1]]))
}

fn read_u24(data: &[u8], offset: usize) -> Option<u32> {
    if offset + 3 > data.len() {
        return None;
    }
    Some(u32::from_be_bytes([
        0,
        data[offset],
        data[offset + 1],
        data[offset + 2],
    ]))
}

/// Human name of a TLS version code point.
pub fn version_string(version: u16) -> String {
    match version {
        0x0300 => "SSL 3.0".to_string(),
        0x0301 => "TLS 1.0".to_string(),
        0x0302 => "TLS 1.1".to_string(),
        0x0303 => "TLS 1.2".to_string(),
        0x0304 => "TLS 1.3".to_string(),
        other => format!("0x{:04X}", other),
    }
}
