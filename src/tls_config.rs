//! TLS ClientHello configuration
//!
//! `ClientHelloSpec` is the complete description of a ClientHello we intend
//! to emit: cipher order, version range and a typed, ordered extension list.
//! Specs come from the built-in browser presets or are derived from a JA3
//! text by [`build_from_ja3`]; `tls_handshake` turns a spec into bytes.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::dicttls::{
    extension_types::*, signature_schemes::DEFAULT_SIGNATURE_ALGORITHMS,
    supported_groups::GREASE_PLACEHOLDER, CURVE_P256, CURVE_P384, PSK_MODE_DHE, VERSION_TLS12,
    VERSION_TLS13, X25519, X25519_MLKEM768,
};
use crate::error::Result;
use crate::ja3::Ja3Spec;

/// The GREASE values of RFC 8701. Real clients draw from this set for
/// cipher, extension, group and version placeholders.
pub const TLS_GREASE_VALUES: [u16; 16] = [
    0x0a0a, 0x1a1a, 0x2a2a, 0x3a3a, 0x4a4a, 0x5a5a, 0x6a6a, 0x7a7a, 0x8a8a, 0x9a9a, 0xaaaa,
    0xbaba, 0xcaca, 0xdada, 0xeaea, 0xfafa,
];

/// True for any RFC 8701 GREASE code point.
pub fn is_grease_value(value: u16) -> bool {
    value & 0x0f0f == 0x0a0a
}

/// Remove GREASE code points, keeping relative order.
pub fn remove_grease_values(values: &[u16]) -> Vec<u16> {
    values
        .iter()
        .copied()
        .filter(|v| !is_grease_value(*v))
        .collect()
}

/// Draw a random GREASE value.
pub fn random_grease_value<R: Rng>(rng: &mut R) -> u16 {
    TLS_GREASE_VALUES[rng.gen_range(0..TLS_GREASE_VALUES.len())]
}

/// One key_share entry. `data` is left empty for real groups and filled
/// with a fresh public key at marshal time; GREASE entries carry the single
/// zero byte BoringSSL emits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyShareEntry {
    pub group: u16,
    pub data: Vec<u8>,
}

impl KeyShareEntry {
    pub fn new(group: u16) -> Self {
        Self {
            group,
            data: Vec::new(),
        }
    }
}

/// A typed ClientHello extension. Ids not covered by a variant are carried
/// as [`Extension::Opaque`], which preserves their position on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extension {
    Grease,
    ServerName,
    StatusRequest,
    StatusRequestV2,
    SupportedCurves(Vec<u16>),
    SupportedPoints(Vec<u8>),
    SignatureAlgorithms(Vec<u16>),
    Alpn(Vec<String>),
    Sct,
    Padding,
    ExtendedMasterSecret,
    CompressCertificate(Vec<u16>),
    RecordSizeLimit(u16),
    SessionTicket,
    SupportedVersions(Vec<u16>),
    PskKeyExchangeModes(Vec<u8>),
    KeyShare(Vec<KeyShareEntry>),
    RenegotiationInfo,
    ApplicationSettings(Vec<String>),
    ApplicationSettingsNew(Vec<String>),
    GreaseEch,
    Opaque { id: u16, data: Vec<u8> },
}

impl Extension {
    /// The wire extension id. For [`Extension::Grease`] this is the
    /// placeholder; the marshaller substitutes a concrete RFC 8701 value.
    pub fn id(&self) -> u16 {
        match self {
            Extension::Grease => GREASE_PLACEHOLDER,
            Extension::ServerName => EXT_TYPE_SERVER_NAME,
            Extension::StatusRequest => EXT_TYPE_STATUS_REQUEST,
            Extension::StatusRequestV2 => EXT_TYPE_STATUS_REQUEST_V2,
            Extension::SupportedCurves(_) => EXT_TYPE_SUPPORTED_GROUPS,
            Extension::SupportedPoints(_) => EXT_TYPE_EC_POINT_FORMATS,
            Extension::SignatureAlgorithms(_) => EXT_TYPE_SIGNATURE_ALGORITHMS,
            Extension::Alpn(_) => EXT_TYPE_APPLICATION_LAYER_PROTOCOL_NEGOTIATION,
            Extension::Sct => EXT_TYPE_SIGNED_CERTIFICATE_TIMESTAMP,
            Extension::Padding => EXT_TYPE_PADDING,
            Extension::ExtendedMasterSecret => EXT_TYPE_EXTENDED_MASTER_SECRET,
            Extension::CompressCertificate(_) => EXT_TYPE_COMPRESS_CERTIFICATE,
            Extension::RecordSizeLimit(_) => EXT_TYPE_RECORD_SIZE_LIMIT,
            Extension::SessionTicket => EXT_TYPE_SESSION_TICKET,
            Extension::SupportedVersions(_) => EXT_TYPE_SUPPORTED_VERSIONS,
            Extension::PskKeyExchangeModes(_) => EXT_TYPE_PSK_KEY_EXCHANGE_MODES,
            Extension::KeyShare(_) => EXT_TYPE_KEY_SHARE,
            Extension::RenegotiationInfo => EXT_TYPE_RENEGOTIATION_INFO,
            Extension::ApplicationSettings(_) => EXT_TYPE_APPLICATION_SETTINGS,
            Extension::ApplicationSettingsNew(_) => EXT_TYPE_APPLICATION_SETTINGS_NEW,
            Extension::GreaseEch => EXT_TYPE_ECH,
            Extension::Opaque { id, .. } => *id,
        }
    }

    fn is_shuffle_pinned(&self) -> bool {
        // Chrome keeps padding and pre_shared_key at the tail; everything
        // else takes part in the extension permutation.
        matches!(self.id(), EXT_TYPE_PADDING | EXT_TYPE_PRE_SHARED_KEY)
    }
}

/// A complete ClientHello description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientHelloSpec {
    pub tls_vers_min: u16,
    pub tls_vers_max: u16,
    /// Cipher suites in offer order, GREASE included.
    pub cipher_suites: Vec<u16>,
    pub compression_methods: Vec<u8>,
    /// Extensions in emission order.
    pub extensions: Vec<Extension>,
    /// Seed of the extension permutation, when one was applied. Stored so a
    /// spec re-marshals identically and the permutation can be inverted.
    pub shuffle_seed: Option<u64>,
}

impl ClientHelloSpec {
    pub fn new() -> Self {
        Self {
            tls_vers_min: VERSION_TLS12,
            tls_vers_max: VERSION_TLS13,
            cipher_suites: Vec::new(),
            compression_methods: vec![0],
            extensions: Vec::new(),
            shuffle_seed: None,
        }
    }

    /// ALPN protocols offered by this spec; empty when no ALPN extension is
    /// present.
    pub fn alpn_protocols(&self) -> Vec<String> {
        for ext in &self.extensions {
            if let Extension::Alpn(protocols) = ext {
                return protocols.clone();
            }
        }
        Vec::new()
    }

    /// Named groups offered by this spec, GREASE included.
    pub fn curves(&self) -> Vec<u16> {
        for ext in &self.extensions {
            if let Extension::SupportedCurves(curves) = ext {
                return curves.clone();
            }
        }
        Vec::new()
    }

    /// Supported versions offered by this spec, GREASE included.
    pub fn supported_versions(&self) -> Vec<u16> {
        for ext in &self.extensions {
            if let Extension::SupportedVersions(versions) = ext {
                return versions.clone();
            }
        }
        Vec::new()
    }

    /// Derive the JA3 view of this spec: GREASE stripped from every list,
    /// extension ids in the current emission order.
    pub fn ja3(&self) -> Ja3Spec {
        let point_formats = self
            .extensions
            .iter()
            .find_map(|ext| match ext {
                Extension::SupportedPoints(formats) => Some(formats.clone()),
                _ => None,
            })
            .unwrap_or_default();
        Ja3Spec {
            tls_version: 771,
            cipher_suites: remove_grease_values(&self.cipher_suites),
            extensions: self
                .extensions
                .iter()
                .map(|e| e.id())
                .filter(|id| !is_grease_value(*id))
                .collect(),
            curves: remove_grease_values(&self.curves()),
            point_formats,
        }
    }
}

impl Default for ClientHelloSpec {
    fn default() -> Self {
        crate::presets::BrowserPreset::Chrome131.client_hello_spec()
    }
}

/// Map one JA3 extension id to its typed extension, per the builder table.
/// Unknown non-GREASE ids come back as empty opaque placeholders so their
/// position survives.
pub fn extension_from_id(id: u16, curves: &[u16]) -> Extension {
    match id {
        EXT_TYPE_SERVER_NAME => Extension::ServerName,
        EXT_TYPE_STATUS_REQUEST => Extension::StatusRequest,
        EXT_TYPE_STATUS_REQUEST_V2 => Extension::StatusRequestV2,
        EXT_TYPE_SUPPORTED_GROUPS => {
            let mut list = vec![GREASE_PLACEHOLDER];
            list.extend_from_slice(curves);
            Extension::SupportedCurves(list)
        }
        EXT_TYPE_EC_POINT_FORMATS => Extension::SupportedPoints(vec![0]),
        EXT_TYPE_SIGNATURE_ALGORITHMS => {
            Extension::SignatureAlgorithms(DEFAULT_SIGNATURE_ALGORITHMS.to_vec())
        }
        EXT_TYPE_APPLICATION_LAYER_PROTOCOL_NEGOTIATION => {
            Extension::Alpn(vec!["h2".to_string(), "http/1.1".to_string()])
        }
        EXT_TYPE_SIGNED_CERTIFICATE_TIMESTAMP => Extension::Sct,
        EXT_TYPE_PADDING => Extension::Padding,
        EXT_TYPE_EXTENDED_MASTER_SECRET => Extension::ExtendedMasterSecret,
        EXT_TYPE_COMPRESS_CERTIFICATE => {
            Extension::CompressCertificate(vec![crate::dicttls::CERT_COMPRESSION_BROTLI])
        }
        EXT_TYPE_SESSION_TICKET => Extension::SessionTicket,
        EXT_TYPE_SUPPORTED_VERSIONS => Extension::SupportedVersions(vec![
            GREASE_PLACEHOLDER,
            VERSION_TLS13,
            VERSION_TLS12,
        ]),
        EXT_TYPE_PSK_KEY_EXCHANGE_MODES => Extension::PskKeyExchangeModes(vec![PSK_MODE_DHE]),
        EXT_TYPE_KEY_SHARE => {
            let mut shares = vec![KeyShareEntry {
                group: GREASE_PLACEHOLDER,
                data: vec![0],
            }];
            if curves.contains(&X25519_MLKEM768) {
                shares.push(KeyShareEntry::new(X25519_MLKEM768));
            }
            shares.push(KeyShareEntry::new(X25519));
            Extension::KeyShare(shares)
        }
        EXT_TYPE_RENEGOTIATION_INFO => Extension::RenegotiationInfo,
        EXT_TYPE_APPLICATION_SETTINGS => Extension::ApplicationSettings(vec!["h2".to_string()]),
        EXT_TYPE_APPLICATION_SETTINGS_NEW => {
            Extension::ApplicationSettingsNew(vec!["h2".to_string()])
        }
        EXT_TYPE_ECH => Extension::GreaseEch,
        other => Extension::Opaque {
            id: other,
            data: Vec::new(),
        },
    }
}

/// Build a [`ClientHelloSpec`] from a parsed JA3 with a random permutation
/// seed.
pub fn build_from_ja3(ja3: &Ja3Spec) -> Result<ClientHelloSpec> {
    build_from_ja3_seeded(ja3, rand::thread_rng().gen())
}

/// Build a [`ClientHelloSpec`] from a parsed JA3:
///
/// 1. a GREASE cipher is prepended to the (GREASE-stripped) JA3 ciphers;
/// 2. each JA3 extension id maps to a typed extension, JA3-listed GREASE
///    ids are dropped, unknown ids become positioned opaque placeholders;
/// 3. one GREASE extension is prepended and one appended, then the
///    Chrome-style seeded permutation is applied;
/// 4. the version range is always [1.2, 1.3] (1.3 negotiation happens via
///    supported_versions).
pub fn build_from_ja3_seeded(ja3: &Ja3Spec, seed: u64) -> Result<ClientHelloSpec> {
    let mut spec = ClientHelloSpec::new();

    spec.cipher_suites = vec![GREASE_PLACEHOLDER];
    spec.cipher_suites
        .extend(remove_grease_values(&ja3.cipher_suites));

    let curves = if ja3.curves.is_empty() {
        vec![X25519, CURVE_P256, CURVE_P384]
    } else {
        remove_grease_values(&ja3.curves)
    };

    let mut extensions = vec![Extension::Grease];
    for id in &ja3.extensions {
        if is_grease_value(*id) {
            continue;
        }
        let mut ext = extension_from_id(*id, &curves);
        if let Extension::SupportedPoints(ref mut formats) = ext {
            if !ja3.point_formats.is_empty() {
                *formats = ja3.point_formats.clone();
            }
        }
        extensions.push(ext);
    }
    extensions.push(Extension::Grease);

    chrome_shuffle_extensions(&mut extensions, seed);
    spec.extensions = extensions;
    spec.shuffle_seed = Some(seed);

    Ok(spec)
}

/// The swap schedule of the seeded permutation over `movable` positions.
fn shuffle_swaps(seed: u64, movable: usize) -> Vec<(usize, usize)> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut swaps = Vec::with_capacity(movable.saturating_sub(1));
    for i in (1..movable).rev() {
        let j = rng.gen_range(0..=i);
        swaps.push((i, j));
    }
    swaps
}

fn movable_positions(extensions: &[Extension]) -> Vec<usize> {
    extensions
        .iter()
        .enumerate()
        .filter(|(_, ext)| !ext.is_shuffle_pinned())
        .map(|(idx, _)| idx)
        .collect()
}

/// Apply the Chrome 106+ style extension permutation: a seeded
/// Fisher-Yates over every extension except padding and pre_shared_key,
/// which keep their positions.
pub fn chrome_shuffle_extensions(extensions: &mut [Extension], seed: u64) {
    let movable = movable_positions(extensions);
    for (i, j) in shuffle_swaps(seed, movable.len()) {
        extensions.swap(movable[i], movable[j]);
    }
}

/// Invert [`chrome_shuffle_extensions`] for the same seed.
pub fn chrome_unshuffle_extensions(extensions: &mut [Extension], seed: u64) {
    let movable = movable_positions(extensions);
    for (i, j) in shuffle_swaps(seed, movable.len()).into_iter().rev() {
        extensions.swap(movable[i], movable[j]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const JA3: &str =
        "771,4865-4866-4867-49195-49199,0-23-65281-10-11-35-16-13-43-45-51,29-23-24,0";

    #[test]
    fn test_grease_detection() {
        assert!(is_grease_value(0x0a0a));
        assert!(is_grease_value(0xfafa));
        assert!(!is_grease_value(0x1301));
        for v in TLS_GREASE_VALUES {
            assert!(is_grease_value(v));
        }
    }

    #[test]
    fn test_build_prepends_grease_cipher() {
        let ja3 = Ja3Spec::parse(JA3).unwrap();
        let spec = build_from_ja3_seeded(&ja3, 7).unwrap();
        assert!(is_grease_value(spec.cipher_suites[0]));
        assert_eq!(&spec.cipher_suites[1..], &ja3.cipher_suites[..]);
    }

    #[test]
    fn test_build_is_deterministic_per_seed() {
        let ja3 = Ja3Spec::parse(JA3).unwrap();
        let a = build_from_ja3_seeded(&ja3, 42).unwrap();
        let b = build_from_ja3_seeded(&ja3, 42).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_shuffle_roundtrip_restores_ja3_order() {
        let ja3 = Ja3Spec::parse(JA3).unwrap();
        let spec = build_from_ja3_seeded(&ja3, 1234).unwrap();

        let mut extensions = spec.extensions.clone();
        chrome_unshuffle_extensions(&mut extensions, 1234);

        // After inverting the permutation the list is GREASE, the ja3 ids
        // in order, GREASE again.
        assert!(matches!(extensions.first(), Some(Extension::Grease)));
        assert!(matches!(extensions.last(), Some(Extension::Grease)));
        let ids: Vec<u16> = extensions[1..extensions.len() - 1]
            .iter()
            .map(|e| e.id())
            .collect();
        assert_eq!(ids, ja3.extensions);
    }

    #[test]
    fn test_ja3_grease_ids_dropped() {
        let ja3 = Ja3Spec::parse("771,4865,2570-0-13-2570,29,0").unwrap();
        let spec = build_from_ja3_seeded(&ja3, 9).unwrap();
        // 2570 == 0x0a0a: stripped, then one GREASE prepended and appended.
        let grease_count = spec
            .extensions
            .iter()
            .filter(|e| matches!(e, Extension::Grease))
            .count();
        assert_eq!(grease_count, 2);
        assert_eq!(spec.extensions.len(), 4);
    }

    #[test]
    fn test_unknown_id_becomes_opaque() {
        let ja3 = Ja3Spec::parse("771,4865,0-62222,29,0").unwrap();
        let spec = build_from_ja3_seeded(&ja3, 3).unwrap();
        assert!(spec
            .extensions
            .iter()
            .any(|e| matches!(e, Extension::Opaque { id: 62222, .. })));
    }

    #[test]
    fn test_default_curves_and_points() {
        let ja3 = Ja3Spec::parse("771,4865,10-11").unwrap();
        let spec = build_from_ja3_seeded(&ja3, 5).unwrap();
        let curves = spec.curves();
        assert!(is_grease_value(curves[0]));
        assert_eq!(&curves[1..], &[X25519, CURVE_P256, CURVE_P384]);
        assert!(spec
            .extensions
            .iter()
            .any(|e| matches!(e, Extension::SupportedPoints(f) if f == &vec![0])));
    }

    #[test]
    fn test_keyshare_mlkem_insertion() {
        let ja3 = Ja3Spec::parse("771,4865,51,4588-29-23-24,0").unwrap();
        let spec = build_from_ja3_seeded(&ja3, 11).unwrap();
        let shares = spec
            .extensions
            .iter()
            .find_map(|e| match e {
                Extension::KeyShare(s) => Some(s.clone()),
                _ => None,
            })
            .unwrap();
        assert!(is_grease_value(shares[0].group));
        assert_eq!(shares[1].group, X25519_MLKEM768);
        assert_eq!(shares[2].group, X25519);
    }

    #[test]
    fn test_ja3_derivation_strips_grease() {
        let ja3 = Ja3Spec::parse(JA3).unwrap();
        let spec = build_from_ja3_seeded(&ja3, 21).unwrap();
        let derived = spec.ja3();
        assert_eq!(derived.cipher_suites, ja3.cipher_suites);
        let mut sorted_in = ja3.extensions.clone();
        sorted_in.sort_unstable();
        let mut sorted_out = derived.extensions.clone();
        sorted_out.sort_unstable();
        assert_eq!(sorted_in, sorted_out);
    }
}
