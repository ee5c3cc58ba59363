//! Order-preserving HPACK encoding
//!
//! The request header block is what anti-bot systems fingerprint, so the
//! encoder must emit fields in exactly the order it is handed them. Every
//! field is encoded as "literal header field without indexing, new name"
//! (RFC 7541 §6.2.2) with plain string literals: stateless, order-exact and
//! legal towards any decoder. Response blocks are decoded with the `hpack`
//! crate, which handles indexing and Huffman in full.

use crate::error::{EngineError, Result};

/// Decoder for response header blocks, backed by the `hpack` crate. The
/// dynamic table is sized to match the 65536 we advertise in SETTINGS.
pub struct ResponseDecoder {
    inner: ::hpack::Decoder<'static>,
}

impl ResponseDecoder {
    pub fn new() -> Self {
        let mut inner = ::hpack::Decoder::new();
        inner.set_max_table_size(65536);
        Self { inner }
    }

    /// Decode one complete header block into name/value strings.
    pub fn decode(&mut self, block: &[u8]) -> Result<Vec<(String, String)>> {
        let fields = self
            .inner
            .decode(block)
            .map_err(|e| EngineError::Protocol(format!("hpack decode: {:?}", e)))?;
        let mut headers = Vec::with_capacity(fields.len());
        for (name, value) in fields {
            let name = String::from_utf8(name)
                .map_err(|_| EngineError::Protocol("non-utf8 header name".to_string()))?;
            let value = String::from_utf8_lossy(&value).to_string();
            headers.push((name, value));
        }
        Ok(headers)
    }
}

impl Default for ResponseDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Stateless HPACK encoder for one header block.
#[derive(Debug, Default)]
pub struct HpackEncoder {
    buf: Vec<u8>,
}

impl HpackEncoder {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    /// Append one field. Names are emitted as given; HTTP/2 requires them
    /// lowercased, which the transport takes care of.
    pub fn emit(&mut self, name: &str, value: &str) {
        // Literal without indexing, new name: 0000 prefix.
        self.buf.push(0x00);
        encode_string(&mut self.buf, name.as_bytes());
        encode_string(&mut self.buf, value.as_bytes());
    }

    pub fn finish(self) -> Vec<u8> {
        self.buf
    }
}

/// Encode one ordered header list into a block.
pub fn encode_block(headers: &[(String, String)]) -> Vec<u8> {
    let mut encoder = HpackEncoder::new();
    for (name, value) in headers {
        encoder.emit(name, value);
    }
    encoder.finish()
}

/// String literal: length with a 7-bit prefix, Huffman bit clear.
fn encode_string(buf: &mut Vec<u8>, data: &[u8]) {
    encode_integer(buf, data.len(), 7, 0x00);
    buf.extend_from_slice(data);
}

/// HPACK prefixed integer (RFC 7541 §5.1).
fn encode_integer(buf: &mut Vec<u8>, mut value: usize, prefix_bits: u8, flags: u8) {
    let max_prefix = (1usize << prefix_bits) - 1;
    if value < max_prefix {
        buf.push(flags | value as u8);
        return;
    }
    buf.push(flags | max_prefix as u8);
    value -= max_prefix;
    while value >= 128 {
        buf.push((value % 128 + 128) as u8);
        value /= 128;
    }
    buf.push(value as u8);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(block: &[u8]) -> Vec<(String, String)> {
        let mut decoder = ::hpack::Decoder::new();
        decoder
            .decode(block)
            .unwrap()
            .into_iter()
            .map(|(name, value)| {
                (
                    String::from_utf8(name).unwrap(),
                    String::from_utf8(value).unwrap(),
                )
            })
            .collect()
    }

    #[test]
    fn test_round_trip_preserves_order() {
        let headers = vec![
            (":method".to_string(), "GET".to_string()),
            (":authority".to_string(), "example.com".to_string()),
            (":scheme".to_string(), "https".to_string()),
            (":path".to_string(), "/api?q=1".to_string()),
            ("x-custom-header".to_string(), "test-value".to_string()),
            ("user-agent".to_string(), "JiemianTest/1.0".to_string()),
        ];
        let block = encode_block(&headers);
        assert_eq!(decode(&block), headers);
    }

    #[test]
    fn test_long_values_use_multibyte_length() {
        let long = "v".repeat(300);
        let headers = vec![("x-long".to_string(), long.clone())];
        let block = encode_block(&headers);
        assert_eq!(decode(&block), vec![("x-long".to_string(), long)]);
    }

    #[test]
    fn test_integer_encoding_boundaries() {
        let mut buf = Vec::new();
        encode_integer(&mut buf, 10, 5, 0);
        assert_eq!(buf, vec![10]);

        // RFC 7541 §C.1.2: 1337 with 5-bit prefix.
        let mut buf = Vec::new();
        encode_integer(&mut buf, 1337, 5, 0);
        assert_eq!(buf, vec![31, 154, 10]);

        // Exactly the prefix max spills into a continuation byte.
        let mut buf = Vec::new();
        encode_integer(&mut buf, 127, 7, 0);
        assert_eq!(buf, vec![127, 0]);
    }

    #[test]
    fn test_empty_block() {
        assert!(encode_block(&[]).is_empty());
    }
}
