//! # httpcall
//!
//! Fingerprint-controlled HTTP client engine for web reverse-engineering
//! and API debugging. The bytes emitted during the TLS handshake and the
//! HTTP/2 connection preface reproduce a named browser (Chrome, Firefox,
//! Safari, Edge, iOS, Android/OkHttp) or a caller-supplied JA3 + Akamai
//! fingerprint.
//!
//! One request = one `execute` call:
//!
//! - proxy-aware dialing (direct / HTTP CONNECT / SOCKS5)
//! - a fingerprinted TLS client built from presets or parsed JA3 texts,
//!   GREASE and extension permutation included
//! - a wire-controlled HTTP/2 transport honouring the Akamai SETTINGS
//!   order, window update and pseudo-header order, with an HTTP/1.1
//!   fallback
//! - redirect following with hop records
//! - a byte tap on every TLS connection, annotated into a handshake event
//!   timeline
//! - response assembly: decompression, text/binary classification, header
//!   flattening and a timing breakdown

pub mod akamai;
pub mod dicttls;
pub mod error;
pub mod http_client;
pub mod ja3;
pub mod ja4;
pub mod presets;
pub mod request;
pub mod storage;
pub mod timing;
pub mod tls_config;
pub mod tls_handshake;
pub mod tls_parser;

pub use akamai::{AkamaiSpec, PseudoHeader};
pub use error::{EngineError, Result};
pub use http_client::proxy::ProxySpec;
pub use http_client::response::{RedirectHop, ResponseRecord};
pub use http_client::tls::TlsInfo;
pub use http_client::{Engine, EngineConfig};
pub use ja3::Ja3Spec;
pub use presets::{BrowserPreset, TlsFingerprintSpec};
pub use request::{
    ApiKeyLocation, AuthSpec, BodyType, HttpMethod, KvEntry, RequestSpec,
};
pub use timing::TimingData;
pub use tls_config::{
    build_from_ja3, build_from_ja3_seeded, chrome_shuffle_extensions,
    chrome_unshuffle_extensions, is_grease_value, remove_grease_values, ClientHelloSpec,
    Extension, KeyShareEntry, TLS_GREASE_VALUES,
};
pub use tls_handshake::ClientHelloMessage;
pub use tls_parser::{ConnEvent, ConnTrace};
