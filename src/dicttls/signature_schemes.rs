//! TLS signature scheme constants
//!
//! Source: https://www.iana.org/assignments/tls-parameters/tls-signaturescheme.csv

/// Signature scheme code points.
#[allow(clippy::module_inception)]
pub mod signature_schemes {
    // RSA PKCS1
    pub const RSA_PKCS1_SHA256: u16 = 0x0401;
    pub const RSA_PKCS1_SHA384: u16 = 0x0501;
    pub const RSA_PKCS1_SHA512: u16 = 0x0601;
    pub const RSA_PKCS1_SHA1: u16 = 0x0201;

    // RSA PSS
    pub const RSA_PSS_RSAE_SHA256: u16 = 0x0804;
    pub const RSA_PSS_RSAE_SHA384: u16 = 0x0805;
    pub const RSA_PSS_RSAE_SHA512: u16 = 0x0806;

    // ECDSA
    pub const ECDSA_SECP256R1_SHA256: u16 = 0x0403;
    pub const ECDSA_SECP384R1_SHA384: u16 = 0x0503;
    pub const ECDSA_SECP521R1_SHA512: u16 = 0x0603;
    pub const ECDSA_SHA1: u16 = 0x0203;

    // EdDSA
    pub const ED25519: u16 = 0x0807;
    pub const ED448: u16 = 0x0808;
}

pub use signature_schemes::*;

/// Signature scheme id.
pub type SignatureScheme = u16;

/// The Chrome-style default set installed when JA3 lists extension 13 but a
/// text format cannot carry the algorithms themselves.
pub const DEFAULT_SIGNATURE_ALGORITHMS: [u16; 8] = [
    ECDSA_SECP256R1_SHA256,
    RSA_PSS_RSAE_SHA256,
    RSA_PKCS1_SHA256,
    ECDSA_SECP384R1_SHA384,
    RSA_PSS_RSAE_SHA384,
    RSA_PKCS1_SHA384,
    RSA_PSS_RSAE_SHA512,
    RSA_PKCS1_SHA512,
];
