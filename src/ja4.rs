//! JA4 advisory digest
//!
//! JA4 is the successor fingerprint to JA3. The engine carries it as
//! advisory metadata only: it never drives the handshake, it just lets the
//! caller label a spec the way fingerprint services report it.
//!
//! Format: `t<ver><sni><cc><ec><alpn>_<cipher hash>_<extension hash>` with
//! sha256 digests truncated to 12 hex chars.

use sha2::{Digest, Sha256};

use crate::dicttls::{
    EXT_TYPE_APPLICATION_LAYER_PROTOCOL_NEGOTIATION, EXT_TYPE_SERVER_NAME, VERSION_TLS13,
};
use crate::tls_config::{is_grease_value, ClientHelloSpec, Extension};

/// Compute the JA4 string of a spec.
pub fn ja4_string(spec: &ClientHelloSpec) -> String {
    let ciphers = sorted_hex_ids(
        spec.cipher_suites
            .iter()
            .copied()
            .filter(|id| !is_grease_value(*id)),
    );

    let mut extension_ids: Vec<u16> = spec
        .extensions
        .iter()
        .map(|e| e.id())
        .filter(|id| {
            !is_grease_value(*id)
                && *id != EXT_TYPE_SERVER_NAME
                && *id != EXT_TYPE_APPLICATION_LAYER_PROTOCOL_NEGOTIATION
        })
        .collect();
    extension_ids.sort_unstable();

    let sigalgs: Vec<u16> = spec
        .extensions
        .iter()
        .find_map(|e| match e {
            Extension::SignatureAlgorithms(algs) => Some(algs.clone()),
            _ => None,
        })
        .unwrap_or_default();

    let mut ext_input = extension_ids
        .iter()
        .map(|id| format!("{:04x}", id))
        .collect::<Vec<_>>()
        .join(",");
    if !sigalgs.is_empty() {
        ext_input.push('_');
        ext_input.push_str(
            &sigalgs
                .iter()
                .map(|id| format!("{:04x}", id))
                .collect::<Vec<_>>()
                .join(","),
        );
    }

    let version = if spec
        .supported_versions()
        .iter()
        .any(|v| *v == VERSION_TLS13)
    {
        "13"
    } else {
        "12"
    };

    let sni = if spec
        .extensions
        .iter()
        .any(|e| matches!(e, Extension::ServerName))
    {
        'd'
    } else {
        'i'
    };

    let cipher_count = spec
        .cipher_suites
        .iter()
        .filter(|id| !is_grease_value(**id))
        .count()
        .min(99);
    let extension_count = spec
        .extensions
        .iter()
        .filter(|e| !is_grease_value(e.id()))
        .count()
        .min(99);

    let alpn = spec
        .alpn_protocols()
        .first()
        .map(|p| {
            let bytes = p.as_bytes();
            if bytes.len() >= 2 {
                format!("{}{}", bytes[0] as char, bytes[bytes.len() - 1] as char)
            } else {
                "00".to_string()
            }
        })
        .unwrap_or_else(|| "00".to_string());

    format!(
        "t{}{}{:02}{:02}{}_{}_{}",
        version,
        sni,
        cipher_count,
        extension_count,
        alpn,
        truncated_sha256(&ciphers),
        truncated_sha256(&ext_input),
    )
}

fn sorted_hex_ids<I: Iterator<Item = u16>>(ids: I) -> String {
    let mut ids: Vec<u16> = ids.collect();
    ids.sort_unstable();
    ids.iter()
        .map(|id| format!("{:04x}", id))
        .collect::<Vec<_>>()
        .join(",")
}

fn truncated_sha256(input: &str) -> String {
    if input.is_empty() {
        return "000000000000".to_string();
    }
    let digest = Sha256::digest(input.as_bytes());
    hex::encode(digest)[..12].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::presets::BrowserPreset;

    #[test]
    fn test_ja4_shape() {
        let spec = BrowserPreset::Chrome131.client_hello_spec();
        let ja4 = ja4_string(&spec);
        assert!(ja4.starts_with("t13d"));
        let sections: Vec<&str> = ja4.split('_').collect();
        assert_eq!(sections.len(), 3);
        assert_eq!(sections[1].len(), 12);
        assert_eq!(sections[2].len(), 12);
        assert!(sections[0].ends_with("h2")); // alpn "h2" -> first+last char
    }

    #[test]
    fn test_ja4_differs_between_presets() {
        let chrome = ja4_string(&BrowserPreset::Chrome131.client_hello_spec());
        let firefox = ja4_string(&BrowserPreset::Firefox133.client_hello_spec());
        assert_ne!(chrome, firefox);
    }

    #[test]
    fn test_ja4_stable() {
        let spec = BrowserPreset::Safari18.client_hello_spec();
        assert_eq!(ja4_string(&spec), ja4_string(&spec));
    }
}
