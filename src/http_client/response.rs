//! Response assembly
//!
//! Turns a transport's raw response into the record handed back to the
//! caller: flattened headers, transparently decompressed body, text/binary
//! classification with base64 for binary, raw size and the advisory
//! content-encoding tag.

use std::collections::BTreeMap;
use std::io::Read;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::http_client::tls::TlsInfo;
use crate::timing::TimingData;
use crate::tls_parser::ConnTrace;

/// What a transport returns before assembly.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub status_text: String,
    pub http_version: String,
    /// Header fields in wire order, possibly repeated names.
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

/// One recorded redirect hop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedirectHop {
    /// The URL that produced the Location header.
    pub url: String,
    pub status: u16,
    pub status_text: String,
    pub headers: BTreeMap<String, String>,
}

/// The fully materialised response record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseRecord {
    pub status: u16,
    pub status_text: String,
    pub http_version: String,
    /// Canonical name -> value; multi-value headers joined by `\n`.
    pub headers: BTreeMap<String, String>,
    /// UTF-8 text, or base64 when `is_base64` is set.
    pub body: String,
    pub is_base64: bool,
    /// Advisory: the original Content-Encoding, kept even when
    /// decompression failed and `body` still carries the compressed bytes.
    pub content_encoding: String,
    /// Raw byte count before decompression.
    pub size: u64,
    pub timing: TimingData,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tls: Option<TlsInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ja4: Option<String>,
    pub redirects: Vec<RedirectHop>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace: Option<ConnTrace>,
}

/// Canonical reason phrase for a status code; HTTP/2 carries none.
pub fn status_text(code: u16) -> &'static str {
    match code {
        100 => "Continue",
        101 => "Switching Protocols",
        200 => "OK",
        201 => "Created",
        202 => "Accepted",
        204 => "No Content",
        206 => "Partial Content",
        301 => "Moved Permanently",
        302 => "Found",
        303 => "See Other",
        304 => "Not Modified",
        307 => "Temporary Redirect",
        308 => "Permanent Redirect",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        408 => "Request Timeout",
        409 => "Conflict",
        410 => "Gone",
        412 => "Precondition Failed",
        413 => "Payload Too Large",
        415 => "Unsupported Media Type",
        418 => "I'm a teapot",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",
        505 => "HTTP Version Not Supported",
        _ => "",
    }
}

/// Flatten wire headers into canonical-name form, multi-values joined by
/// newline.
pub fn flatten_headers(raw: &[(String, String)]) -> BTreeMap<String, String> {
    let mut flat: BTreeMap<String, String> = BTreeMap::new();
    for (name, value) in raw {
        let canonical = canonical_header_name(name);
        flat.entry(canonical)
            .and_modify(|existing| {
                existing.push('\n');
                existing.push_str(value);
            })
            .or_insert_with(|| value.clone());
    }
    flat
}

/// `content-type` -> `Content-Type`.
fn canonical_header_name(name: &str) -> String {
    name.split('-')
        .map(|segment| {
            let mut chars = segment.chars();
            match chars.next() {
                Some(first) => {
                    first.to_ascii_uppercase().to_string() + &chars.as_str().to_ascii_lowercase()
                }
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join("-")
}

/// The assembled body: text or base64, plus the classification flag.
pub struct AssembledBody {
    pub body: String,
    pub is_base64: bool,
    pub size: u64,
    pub content_encoding: String,
}

/// Assemble a body per the engine rules: record raw size, attempt
/// decompression for gzip/deflate/br (keeping raw bytes on failure),
/// classify text vs binary, base64 binary payloads.
pub fn assemble_body(raw: &[u8], content_encoding: &str) -> AssembledBody {
    let content_encoding = content_encoding.trim().to_ascii_lowercase();
    let size = raw.len() as u64;

    let bytes = match content_encoding.as_str() {
        "gzip" => decompress_gzip(raw),
        "deflate" => decompress_deflate(raw),
        "br" => decompress_brotli(raw),
        _ => None,
    }
    .unwrap_or_else(|| raw.to_vec());

    let (body, is_base64) = classify_body(&bytes);
    AssembledBody {
        body,
        is_base64,
        size,
        content_encoding,
    }
}

/// Text iff valid UTF-8 with no NUL byte; binary bodies come back base64'd.
pub fn classify_body(bytes: &[u8]) -> (String, bool) {
    if !bytes.contains(&0) {
        if let Ok(text) = std::str::from_utf8(bytes) {
            return (text.to_string(), false);
        }
    }
    (BASE64.encode(bytes), true)
}

fn decompress_gzip(data: &[u8]) -> Option<Vec<u8>> {
    let mut decoder = flate2::read::GzDecoder::new(data);
    let mut out = Vec::new();
    match decoder.read_to_end(&mut out) {
        Ok(_) => Some(out),
        Err(e) => {
            log::debug!("gzip decompression failed, keeping raw bytes: {}", e);
            None
        }
    }
}

fn decompress_deflate(data: &[u8]) -> Option<Vec<u8>> {
    // Servers disagree on whether "deflate" means zlib-wrapped or raw;
    // try zlib first, then raw.
    let mut out = Vec::new();
    if flate2::read::ZlibDecoder::new(data)
        .read_to_end(&mut out)
        .is_ok()
    {
        return Some(out);
    }
    let mut out = Vec::new();
    match flate2::read::DeflateDecoder::new(data).read_to_end(&mut out) {
        Ok(_) => Some(out),
        Err(e) => {
            log::debug!("deflate decompression failed, keeping raw bytes: {}", e);
            None
        }
    }
}

fn decompress_brotli(data: &[u8]) -> Option<Vec<u8>> {
    let mut decoder = brotli_decompressor::Decompressor::new(data, 4096);
    let mut out = Vec::new();
    match decoder.read_to_end(&mut out) {
        Ok(_) => Some(out),
        Err(e) => {
            log::debug!("brotli decompression failed, keeping raw bytes: {}", e);
            None
        }
    }
}

/// First value of a header in a raw (wire-order) list, case-insensitive.
pub fn header_value<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_flatten_joins_multi_values() {
        let raw = vec![
            ("set-cookie".to_string(), "a=1".to_string()),
            ("content-type".to_string(), "text/html".to_string()),
            ("set-cookie".to_string(), "b=2".to_string()),
        ];
        let flat = flatten_headers(&raw);
        assert_eq!(flat.get("Set-Cookie").unwrap(), "a=1\nb=2");
        assert_eq!(flat.get("Content-Type").unwrap(), "text/html");
    }

    #[test]
    fn test_canonical_names() {
        assert_eq!(canonical_header_name("content-type"), "Content-Type");
        assert_eq!(canonical_header_name("X-CUSTOM-HEADER"), "X-Custom-Header");
        assert_eq!(canonical_header_name("etag"), "Etag");
    }

    #[test]
    fn test_classify_text_and_binary() {
        let (body, is_base64) = classify_body("hello world".as_bytes());
        assert!(!is_base64);
        assert_eq!(body, "hello world");

        let (body, is_base64) = classify_body(&[0xff, 0xfe, 0x00, 0x01]);
        assert!(is_base64);
        assert_eq!(BASE64.decode(body).unwrap(), vec![0xff, 0xfe, 0x00, 0x01]);

        // Valid UTF-8 containing NUL is still binary.
        let (_, is_base64) = classify_body("a\0b".as_bytes());
        assert!(is_base64);
    }

    #[test]
    fn test_gzip_round_trip() {
        let mut encoder =
            flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(b"compressed payload").unwrap();
        let compressed = encoder.finish().unwrap();

        let assembled = assemble_body(&compressed, "gzip");
        assert_eq!(assembled.body, "compressed payload");
        assert!(!assembled.is_base64);
        // Size reports the raw (compressed) byte count.
        assert_eq!(assembled.size, compressed.len() as u64);
        assert_eq!(assembled.content_encoding, "gzip");
    }

    #[test]
    fn test_deflate_zlib_round_trip() {
        let mut encoder =
            flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(b"zlib payload").unwrap();
        let compressed = encoder.finish().unwrap();

        let assembled = assemble_body(&compressed, "deflate");
        assert_eq!(assembled.body, "zlib payload");
    }

    #[test]
    fn test_failed_decompression_keeps_raw_and_tag() {
        let not_gzip = b"definitely not gzip".to_vec();
        let assembled = assemble_body(&not_gzip, "gzip");
        // Raw bytes kept, advisory encoding still reported.
        assert_eq!(assembled.body, "definitely not gzip");
        assert_eq!(assembled.content_encoding, "gzip");
    }

    #[test]
    fn test_status_text() {
        assert_eq!(status_text(200), "OK");
        assert_eq!(status_text(302), "Found");
        assert_eq!(status_text(999), "");
    }

    #[test]
    fn test_header_value_lookup() {
        let raw = vec![("Content-Encoding".to_string(), "GZIP".to_string())];
        assert_eq!(header_value(&raw, "content-encoding"), Some("GZIP"));
        assert_eq!(header_value(&raw, "x-missing"), None);
    }
}
