//! JA3 fingerprint text handling
//!
//! JA3 is the Salesforce TLS-client fingerprint format:
//! `TLSVersion,Ciphers,Extensions,EllipticCurves,EllipticCurvePointFormats`
//! where each list is `-`-separated decimal ids and the final two lists are
//! optional. The MD5 of the text is the JA3 hash.
//!
//! Reference: https://github.com/salesforce/ja3

use crate::error::{EngineError, Result};

/// A parsed JA3 text. Field order matches the wire format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ja3Spec {
    /// Negotiation version from the ClientHello header (e.g. 771 = TLS 1.2).
    pub tls_version: u16,
    /// Cipher suite ids in offer order.
    pub cipher_suites: Vec<u16>,
    /// Extension ids in offer order.
    pub extensions: Vec<u16>,
    /// Named groups; empty when the text carried only three fields.
    pub curves: Vec<u16>,
    /// EC point formats; empty when absent from the text.
    pub point_formats: Vec<u8>,
}

impl Ja3Spec {
    /// Parse a JA3 text. Three to five comma-separated fields are accepted;
    /// trailing curve and point-format lists may be omitted or empty.
    pub fn parse(text: &str) -> Result<Self> {
        let fields: Vec<&str> = text.trim().split(',').collect();
        if fields.len() < 3 || fields.len() > 5 {
            return Err(EngineError::Config(format!(
                "ja3: expected 3..5 comma-separated fields, got {}",
                fields.len()
            )));
        }

        let tls_version = fields[0]
            .trim()
            .parse::<u16>()
            .map_err(|_| EngineError::Config(format!("ja3: bad tls version {:?}", fields[0])))?;

        let cipher_suites = parse_u16_list(fields[1], "cipher")?;
        let extensions = parse_u16_list(fields[2], "extension")?;
        let curves = match fields.get(3) {
            Some(f) => parse_u16_list(f, "curve")?,
            None => Vec::new(),
        };
        let point_formats = match fields.get(4) {
            Some(f) => parse_u8_list(f, "point format")?,
            None => Vec::new(),
        };

        Ok(Self {
            tls_version,
            cipher_suites,
            extensions,
            curves,
            point_formats,
        })
    }

    /// Re-emit the canonical five-field text.
    pub fn to_text(&self) -> String {
        format!(
            "{},{},{},{},{}",
            self.tls_version,
            join_ids(&self.cipher_suites),
            join_ids(&self.extensions),
            join_ids(&self.curves),
            self.point_formats
                .iter()
                .map(|v| v.to_string())
                .collect::<Vec<_>>()
                .join("-"),
        )
    }

    /// MD5 of the canonical text, lowercase hex. This is "the JA3" most
    /// tooling reports.
    pub fn hash(&self) -> String {
        format!("{:x}", md5::compute(self.to_text()))
    }
}

fn parse_u16_list(field: &str, what: &str) -> Result<Vec<u16>> {
    let field = field.trim();
    if field.is_empty() {
        return Ok(Vec::new());
    }
    field
        .split('-')
        .map(|part| {
            part.trim()
                .parse::<u16>()
                .map_err(|_| EngineError::Config(format!("ja3: bad {} id {:?}", what, part)))
        })
        .collect()
}

fn parse_u8_list(field: &str, what: &str) -> Result<Vec<u8>> {
    let field = field.trim();
    if field.is_empty() {
        return Ok(Vec::new());
    }
    field
        .split('-')
        .map(|part| {
            part.trim()
                .parse::<u8>()
                .map_err(|_| EngineError::Config(format!("ja3: bad {} {:?}", what, part)))
        })
        .collect()
}

fn join_ids(ids: &[u16]) -> String {
    ids.iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join("-")
}
