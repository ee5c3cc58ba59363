//! TLS supported group (named curve) constants
//!
//! Source: https://www.iana.org/assignments/tls-parameters/tls-parameters.xhtml#tls-parameters-8

/// Supported group code points.
#[allow(clippy::module_inception)]
pub mod supported_groups {
    pub const SECP256R1: u16 = 0x0017; // 23
    pub const SECP384R1: u16 = 0x0018; // 24
    pub const SECP521R1: u16 = 0x0019; // 25
    pub const X448: u16 = 0x001e; // 30
    pub const X25519: u16 = 0x001d; // 29
    pub const FFDHE2048: u16 = 0x0100; // 256
    pub const FFDHE3072: u16 = 0x0101; // 257

    /// Hybrid post-quantum group shipped by Chrome 131+.
    pub const X25519_MLKEM768: u16 = 0x11ec; // 4588

    // GREASE placeholder
    pub const GREASE_PLACEHOLDER: u16 = 0x0a0a;
}

pub use supported_groups::*;

/// Named-group id, as carried in JA3 curve lists.
pub type CurveID = u16;

pub const CURVE_P256: u16 = supported_groups::SECP256R1;
pub const CURVE_P384: u16 = supported_groups::SECP384R1;
