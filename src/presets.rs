//! Built-in browser fingerprint presets
//!
//! One template per supported browser id. A preset bundles everything the
//! engine needs to impersonate that client: the ClientHello spec, the
//! documented Akamai HTTP/2 fingerprint and the matching User-Agent.
//!
//! Preset extension orders are fixed (no per-session permutation) so a
//! preset re-marshals to identical bytes across requests.

use serde::{Deserialize, Serialize};

use crate::akamai::{AkamaiSpec, PseudoHeader};
use crate::dicttls::cipher_suites as cs;
use crate::dicttls::cipher_suites::GREASE_PLACEHOLDER as GREASE_CS;
use crate::dicttls::signature_schemes as ss;
use crate::dicttls::supported_groups::GREASE_PLACEHOLDER as GREASE_SG;
use crate::dicttls::{
    CERT_COMPRESSION_BROTLI, CERT_COMPRESSION_ZLIB, CURVE_P256, CURVE_P384, PSK_MODE_DHE,
    SECP521R1, VERSION_TLS10, VERSION_TLS11, VERSION_TLS12, VERSION_TLS13, X25519,
    X25519_MLKEM768,
};
use crate::error::Result;
use crate::tls_config::{
    build_from_ja3, ClientHelloSpec, Extension, KeyShareEntry,
};
use crate::{akamai, ja3::Ja3Spec, ja4};

/// Caller-facing fingerprint selection: a named preset or a custom
/// JA3 (+ optional JA4 / Akamai) specification.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum TlsFingerprintSpec {
    Preset {
        id: String,
    },
    Custom {
        ja3: String,
        #[serde(default)]
        ja4: Option<String>,
        #[serde(default)]
        akamai: Option<String>,
    },
}

impl Default for TlsFingerprintSpec {
    fn default() -> Self {
        TlsFingerprintSpec::Preset {
            id: BrowserPreset::Chrome131.id().to_string(),
        }
    }
}

/// A fingerprint spec resolved into engine inputs.
#[derive(Debug, Clone)]
pub struct ResolvedFingerprint {
    pub hello: ClientHelloSpec,
    /// Present only for custom specs that carry an Akamai text; it routes
    /// the request onto the wire-controlled HTTP/2 transport.
    pub akamai: Option<AkamaiSpec>,
    /// Applied when the caller set no User-Agent of their own.
    pub default_user_agent: Option<String>,
    /// Advisory JA4: caller-supplied for custom specs, derived otherwise.
    pub ja4: Option<String>,
}

impl TlsFingerprintSpec {
    /// Resolve into a ClientHello spec plus transport hints. Unknown preset
    /// ids fall back to Chrome.
    pub fn resolve(&self) -> Result<ResolvedFingerprint> {
        match self {
            TlsFingerprintSpec::Preset { id } => {
                let preset = BrowserPreset::from_id(id);
                let hello = preset.client_hello_spec();
                let ja4 = ja4::ja4_string(&hello);
                Ok(ResolvedFingerprint {
                    hello,
                    akamai: None,
                    default_user_agent: Some(preset.user_agent().to_string()),
                    ja4: Some(ja4),
                })
            }
            TlsFingerprintSpec::Custom { ja3, ja4, akamai } => {
                let parsed = Ja3Spec::parse(ja3)?;
                let hello = build_from_ja3(&parsed)?;
                let akamai = match akamai {
                    Some(text) if !text.trim().is_empty() => Some(AkamaiSpec::parse(text)?),
                    _ => None,
                };
                let ja4 = ja4
                    .clone()
                    .filter(|s| !s.trim().is_empty())
                    .unwrap_or_else(|| ja4::ja4_string(&hello));
                Ok(ResolvedFingerprint {
                    hello,
                    akamai,
                    default_user_agent: None,
                    ja4: Some(ja4),
                })
            }
        }
    }
}

/// The fixed preset set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrowserPreset {
    Chrome131,
    Firefox133,
    Safari18,
    Edge131,
    Ios18,
    Android14,
}

impl BrowserPreset {
    pub fn all() -> [BrowserPreset; 6] {
        [
            BrowserPreset::Chrome131,
            BrowserPreset::Firefox133,
            BrowserPreset::Safari18,
            BrowserPreset::Edge131,
            BrowserPreset::Ios18,
            BrowserPreset::Android14,
        ]
    }

    /// Look up a preset by id, falling back to Chrome for unknown ids.
    pub fn from_id(id: &str) -> Self {
        match id.trim().to_ascii_lowercase().as_str() {
            "chrome_131" => BrowserPreset::Chrome131,
            "firefox_133" => BrowserPreset::Firefox133,
            "safari_18" => BrowserPreset::Safari18,
            "edge_131" => BrowserPreset::Edge131,
            "ios_18" => BrowserPreset::Ios18,
            "android_14" => BrowserPreset::Android14,
            other => {
                log::warn!("unknown fingerprint preset {:?}, using chrome_131", other);
                BrowserPreset::Chrome131
            }
        }
    }

    pub fn id(&self) -> &'static str {
        match self {
            BrowserPreset::Chrome131 => "chrome_131",
            BrowserPreset::Firefox133 => "firefox_133",
            BrowserPreset::Safari18 => "safari_18",
            BrowserPreset::Edge131 => "edge_131",
            BrowserPreset::Ios18 => "ios_18",
            BrowserPreset::Android14 => "android_14",
        }
    }

    /// The preset's User-Agent, applied when the caller sets none.
    pub fn user_agent(&self) -> &'static str {
        match self {
            BrowserPreset::Chrome131 => {
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36"
            }
            BrowserPreset::Firefox133 => {
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:133.0) Gecko/20100101 Firefox/133.0"
            }
            BrowserPreset::Safari18 => {
                "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/18.0 Safari/605.1.15"
            }
            BrowserPreset::Edge131 => {
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36 Edg/131.0.0.0"
            }
            BrowserPreset::Ios18 => {
                "Mozilla/5.0 (iPhone; CPU iPhone OS 18_0 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/18.0 Mobile/15E148 Safari/604.1"
            }
            BrowserPreset::Android14 => "okhttp/4.12.0",
        }
    }

    /// The preset's documented Akamai HTTP/2 fingerprint.
    pub fn akamai_spec(&self) -> AkamaiSpec {
        use akamai::setting_ids::*;
        use PseudoHeader::*;
        match self {
            BrowserPreset::Chrome131 | BrowserPreset::Edge131 => AkamaiSpec {
                settings: vec![
                    (SETTINGS_HEADER_TABLE_SIZE, 65536),
                    (SETTINGS_ENABLE_PUSH, 0),
                    (SETTINGS_INITIAL_WINDOW_SIZE, 6291456),
                    (SETTINGS_MAX_HEADER_LIST_SIZE, 262144),
                ],
                window_update: 15663105,
                priority: "0".to_string(),
                pseudo_header_order: vec![Method, Authority, Scheme, Path],
            },
            BrowserPreset::Firefox133 => AkamaiSpec {
                settings: vec![
                    (SETTINGS_HEADER_TABLE_SIZE, 65536),
                    (SETTINGS_ENABLE_PUSH, 0),
                    (SETTINGS_INITIAL_WINDOW_SIZE, 131072),
                    (SETTINGS_MAX_FRAME_SIZE, 16384),
                ],
                window_update: 12517377,
                priority: "3:0:0:201,5:0:0:101,7:0:0:1,9:0:7:1,11:0:3:1,13:0:0:241"
                    .to_string(),
                pseudo_header_order: vec![Method, Path, Authority, Scheme],
            },
            BrowserPreset::Safari18 => AkamaiSpec {
                settings: vec![
                    (SETTINGS_INITIAL_WINDOW_SIZE, 4194304),
                    (SETTINGS_MAX_CONCURRENT_STREAMS, 100),
                ],
                window_update: 10485760,
                priority: "0".to_string(),
                pseudo_header_order: vec![Method, Scheme, Path, Authority],
            },
            BrowserPreset::Ios18 => AkamaiSpec {
                settings: vec![
                    (SETTINGS_INITIAL_WINDOW_SIZE, 2097152),
                    (SETTINGS_MAX_CONCURRENT_STREAMS, 100),
                ],
                window_update: 10485760,
                priority: "0".to_string(),
                pseudo_header_order: vec![Method, Scheme, Path, Authority],
            },
            BrowserPreset::Android14 => AkamaiSpec {
                settings: vec![(SETTINGS_INITIAL_WINDOW_SIZE, 16777216)],
                window_update: 16711681,
                priority: "0".to_string(),
                pseudo_header_order: vec![Method, Path, Authority, Scheme],
            },
        }
    }

    /// The preset's ClientHello template.
    pub fn client_hello_spec(&self) -> ClientHelloSpec {
        match self {
            BrowserPreset::Chrome131 | BrowserPreset::Edge131 => chrome_131_spec(),
            BrowserPreset::Firefox133 => firefox_133_spec(),
            BrowserPreset::Safari18 | BrowserPreset::Ios18 => safari_18_spec(),
            BrowserPreset::Android14 => android_14_spec(),
        }
    }

    /// The preset's JA3 text (GREASE stripped, as JA3 defines).
    pub fn ja3_text(&self) -> String {
        self.client_hello_spec().ja3().to_text()
    }
}

fn chrome_131_spec() -> ClientHelloSpec {
    let mut spec = ClientHelloSpec::new();

    spec.cipher_suites = vec![
        GREASE_CS,
        cs::TLS_AES_128_GCM_SHA256,
        cs::TLS_AES_256_GCM_SHA384,
        cs::TLS_CHACHA20_POLY1305_SHA256,
        cs::TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256,
        cs::TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256,
        cs::TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384,
        cs::TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384,
        cs::TLS_ECDHE_ECDSA_WITH_CHACHA20_POLY1305_SHA256,
        cs::TLS_ECDHE_RSA_WITH_CHACHA20_POLY1305_SHA256,
        cs::TLS_ECDHE_RSA_WITH_AES_128_CBC_SHA,
        cs::TLS_ECDHE_RSA_WITH_AES_256_CBC_SHA,
        cs::TLS_RSA_WITH_AES_128_GCM_SHA256,
        cs::TLS_RSA_WITH_AES_256_GCM_SHA384,
        cs::TLS_RSA_WITH_AES_128_CBC_SHA,
        cs::TLS_RSA_WITH_AES_256_CBC_SHA,
    ];

    let curves = vec![GREASE_SG, X25519_MLKEM768, X25519, CURVE_P256, CURVE_P384];

    spec.extensions = vec![
        Extension::Grease,
        Extension::ServerName,
        Extension::ExtendedMasterSecret,
        Extension::RenegotiationInfo,
        Extension::SupportedCurves(curves),
        Extension::SupportedPoints(vec![0]),
        Extension::SessionTicket,
        Extension::Alpn(vec!["h2".to_string(), "http/1.1".to_string()]),
        Extension::StatusRequest,
        Extension::SignatureAlgorithms(ss::DEFAULT_SIGNATURE_ALGORITHMS.to_vec()),
        Extension::Sct,
        Extension::KeyShare(vec![
            KeyShareEntry {
                group: GREASE_SG,
                data: vec![0],
            },
            KeyShareEntry::new(X25519_MLKEM768),
            KeyShareEntry::new(X25519),
        ]),
        Extension::PskKeyExchangeModes(vec![PSK_MODE_DHE]),
        Extension::SupportedVersions(vec![GREASE_SG, VERSION_TLS13, VERSION_TLS12]),
        Extension::CompressCertificate(vec![CERT_COMPRESSION_BROTLI]),
        Extension::ApplicationSettingsNew(vec!["h2".to_string()]),
        Extension::GreaseEch,
        Extension::Grease,
    ];

    spec
}

fn firefox_133_spec() -> ClientHelloSpec {
    let mut spec = ClientHelloSpec::new();

    spec.cipher_suites = vec![
        cs::TLS_AES_128_GCM_SHA256,
        cs::TLS_CHACHA20_POLY1305_SHA256,
        cs::TLS_AES_256_GCM_SHA384,
        cs::TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256,
        cs::TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256,
        cs::TLS_ECDHE_ECDSA_WITH_CHACHA20_POLY1305_SHA256,
        cs::TLS_ECDHE_RSA_WITH_CHACHA20_POLY1305_SHA256,
        cs::TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384,
        cs::TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384,
        cs::TLS_ECDHE_ECDSA_WITH_AES_256_CBC_SHA,
        cs::TLS_ECDHE_ECDSA_WITH_AES_128_CBC_SHA,
        cs::TLS_ECDHE_RSA_WITH_AES_128_CBC_SHA,
        cs::TLS_ECDHE_RSA_WITH_AES_256_CBC_SHA,
        cs::TLS_RSA_WITH_AES_128_GCM_SHA256,
        cs::TLS_RSA_WITH_AES_256_GCM_SHA384,
        cs::TLS_RSA_WITH_AES_128_CBC_SHA,
        cs::TLS_RSA_WITH_AES_256_CBC_SHA,
    ];

    let firefox_sigalgs = vec![
        ss::ECDSA_SECP256R1_SHA256,
        ss::ECDSA_SECP384R1_SHA384,
        ss::ECDSA_SECP521R1_SHA512,
        ss::RSA_PSS_RSAE_SHA256,
        ss::RSA_PSS_RSAE_SHA384,
        ss::RSA_PSS_RSAE_SHA512,
        ss::RSA_PKCS1_SHA256,
        ss::RSA_PKCS1_SHA384,
        ss::RSA_PKCS1_SHA512,
        ss::ECDSA_SHA1,
        ss::RSA_PKCS1_SHA1,
    ];

    spec.extensions = vec![
        Extension::ServerName,
        Extension::ExtendedMasterSecret,
        Extension::RenegotiationInfo,
        Extension::SupportedCurves(vec![
            X25519,
            CURVE_P256,
            CURVE_P384,
            SECP521R1,
            0x0100, // ffdhe2048
            0x0101, // ffdhe3072
        ]),
        Extension::SupportedPoints(vec![0]),
        Extension::SessionTicket,
        Extension::Alpn(vec!["h2".to_string(), "http/1.1".to_string()]),
        Extension::StatusRequest,
        Extension::CompressCertificate(vec![CERT_COMPRESSION_ZLIB, CERT_COMPRESSION_BROTLI]),
        Extension::KeyShare(vec![
            KeyShareEntry::new(X25519),
            KeyShareEntry::new(CURVE_P256),
        ]),
        Extension::SupportedVersions(vec![VERSION_TLS13, VERSION_TLS12]),
        Extension::SignatureAlgorithms(firefox_sigalgs),
        Extension::PskKeyExchangeModes(vec![PSK_MODE_DHE]),
        Extension::RecordSizeLimit(0x4001),
        Extension::GreaseEch,
        Extension::Padding,
    ];

    spec
}

fn safari_18_spec() -> ClientHelloSpec {
    let mut spec = ClientHelloSpec::new();

    spec.cipher_suites = vec![
        GREASE_CS,
        cs::TLS_AES_128_GCM_SHA256,
        cs::TLS_AES_256_GCM_SHA384,
        cs::TLS_CHACHA20_POLY1305_SHA256,
        cs::TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384,
        cs::TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256,
        cs::TLS_ECDHE_ECDSA_WITH_CHACHA20_POLY1305_SHA256,
        cs::TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384,
        cs::TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256,
        cs::TLS_ECDHE_RSA_WITH_CHACHA20_POLY1305_SHA256,
        cs::TLS_ECDHE_ECDSA_WITH_AES_256_CBC_SHA,
        cs::TLS_ECDHE_ECDSA_WITH_AES_128_CBC_SHA,
        cs::TLS_ECDHE_RSA_WITH_AES_256_CBC_SHA,
        cs::TLS_ECDHE_RSA_WITH_AES_128_CBC_SHA,
        cs::TLS_RSA_WITH_AES_256_GCM_SHA384,
        cs::TLS_RSA_WITH_AES_128_GCM_SHA256,
        cs::TLS_RSA_WITH_AES_256_CBC_SHA,
        cs::TLS_RSA_WITH_AES_128_CBC_SHA,
        cs::TLS_ECDHE_ECDSA_WITH_3DES_EDE_CBC_SHA,
        cs::TLS_ECDHE_RSA_WITH_3DES_EDE_CBC_SHA,
        cs::TLS_RSA_WITH_3DES_EDE_CBC_SHA,
    ];

    let safari_sigalgs = vec![
        ss::ECDSA_SECP256R1_SHA256,
        ss::RSA_PSS_RSAE_SHA256,
        ss::RSA_PKCS1_SHA256,
        ss::ECDSA_SECP384R1_SHA384,
        ss::ECDSA_SHA1,
        ss::RSA_PSS_RSAE_SHA384,
        ss::RSA_PKCS1_SHA384,
        ss::RSA_PSS_RSAE_SHA512,
        ss::RSA_PKCS1_SHA512,
        ss::RSA_PKCS1_SHA1,
    ];

    spec.extensions = vec![
        Extension::Grease,
        Extension::ServerName,
        Extension::ExtendedMasterSecret,
        Extension::RenegotiationInfo,
        Extension::SupportedCurves(vec![GREASE_SG, X25519, CURVE_P256, CURVE_P384, SECP521R1]),
        Extension::SupportedPoints(vec![0]),
        Extension::Alpn(vec!["h2".to_string(), "http/1.1".to_string()]),
        Extension::StatusRequest,
        Extension::SignatureAlgorithms(safari_sigalgs),
        Extension::Sct,
        Extension::KeyShare(vec![
            KeyShareEntry {
                group: GREASE_SG,
                data: vec![0],
            },
            KeyShareEntry::new(X25519),
        ]),
        Extension::PskKeyExchangeModes(vec![PSK_MODE_DHE]),
        Extension::SupportedVersions(vec![
            GREASE_SG,
            VERSION_TLS13,
            VERSION_TLS12,
            VERSION_TLS11,
            VERSION_TLS10,
        ]),
        Extension::CompressCertificate(vec![CERT_COMPRESSION_ZLIB]),
        Extension::Grease,
        Extension::Padding,
    ];

    spec.tls_vers_min = VERSION_TLS10;
    spec
}

fn android_14_spec() -> ClientHelloSpec {
    let mut spec = ClientHelloSpec::new();

    spec.cipher_suites = vec![
        cs::TLS_AES_128_GCM_SHA256,
        cs::TLS_AES_256_GCM_SHA384,
        cs::TLS_CHACHA20_POLY1305_SHA256,
        cs::TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256,
        cs::TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256,
        cs::TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384,
        cs::TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384,
        cs::TLS_ECDHE_ECDSA_WITH_CHACHA20_POLY1305_SHA256,
        cs::TLS_ECDHE_RSA_WITH_CHACHA20_POLY1305_SHA256,
        cs::TLS_ECDHE_RSA_WITH_AES_128_CBC_SHA,
        cs::TLS_ECDHE_RSA_WITH_AES_256_CBC_SHA,
        cs::TLS_RSA_WITH_AES_128_GCM_SHA256,
        cs::TLS_RSA_WITH_AES_256_GCM_SHA384,
        cs::TLS_RSA_WITH_AES_128_CBC_SHA,
        cs::TLS_RSA_WITH_AES_256_CBC_SHA,
        cs::TLS_RSA_WITH_3DES_EDE_CBC_SHA,
    ];

    let mut okhttp_sigalgs = ss::DEFAULT_SIGNATURE_ALGORITHMS.to_vec();
    okhttp_sigalgs.push(ss::RSA_PKCS1_SHA1);

    spec.extensions = vec![
        Extension::ServerName,
        Extension::ExtendedMasterSecret,
        Extension::RenegotiationInfo,
        Extension::SupportedCurves(vec![X25519, CURVE_P256, CURVE_P384]),
        Extension::SupportedPoints(vec![0]),
        Extension::SessionTicket,
        Extension::Alpn(vec!["h2".to_string(), "http/1.1".to_string()]),
        Extension::StatusRequest,
        Extension::SignatureAlgorithms(okhttp_sigalgs),
        Extension::KeyShare(vec![KeyShareEntry::new(X25519)]),
        Extension::PskKeyExchangeModes(vec![PSK_MODE_DHE]),
        Extension::SupportedVersions(vec![VERSION_TLS13, VERSION_TLS12]),
    ];

    spec
}
