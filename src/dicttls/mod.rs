//! TLS dictionary constants
//!
//! IANA-registered code points that JA3 texts, presets and the ClientHello
//! builder refer to. Source: IANA TLS Parameters registry.

pub mod cipher_suites;
pub mod extensions;
pub mod signature_schemes;
pub mod supported_groups;

pub use cipher_suites::*;
pub use extensions::*;
pub use signature_schemes::*;
// GREASE_PLACEHOLDER lives in both cipher_suites and supported_groups;
// re-export the group constants by name to avoid the clash.
pub use supported_groups::{CURVE_P256, CURVE_P384, SECP521R1, X25519, X25519_MLKEM768, X448};
