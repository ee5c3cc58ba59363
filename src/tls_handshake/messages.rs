//! TLS ClientHello message construction
//!
//! ClientHello layout (RFC 8446 §4.1.2):
//! ```text
//! struct {
//!     ProtocolVersion legacy_version;
//!     Random random;
//!     opaque legacy_session_id<0..32>;
//!     CipherSuite cipher_suites<2..2^16-2>;
//!     opaque legacy_compression_methods<1..2^8-1>;
//!     Extension extensions<8..2^16-1>;
//! } ClientHello;
//! ```
//!
//! GREASE placeholders in the spec are resolved to concrete RFC 8701 values
//! here; key_share entries get real public keys.

use rand::Rng;
use ring::agreement;
use ring::rand::{self as ring_rand, SecureRandom};

use crate::dicttls::{CURVE_P256, CURVE_P384, VERSION_TLS12, X25519, X25519_MLKEM768};
use crate::error::{EngineError, Result};
use crate::tls_config::{
    is_grease_value, random_grease_value, ClientHelloSpec, Extension, KeyShareEntry,
    TLS_GREASE_VALUES,
};

/// Client share length of the X25519MLKEM768 hybrid group: a 1184-byte
/// ML-KEM-768 encapsulation key followed by a 32-byte X25519 share.
const X25519_MLKEM768_SHARE_LEN: usize = 1216;

/// The GREASE values one ClientHello instantiates.
#[derive(Debug, Clone, Copy)]
struct GreaseValues {
    cipher: u16,
    ext_first: u16,
    ext_second: u16,
    group: u16,
    version: u16,
}

impl GreaseValues {
    fn draw<R: Rng>(rng: &mut R) -> Self {
        let ext_first = random_grease_value(rng);
        let mut ext_second = random_grease_value(rng);
        while ext_second == ext_first {
            ext_second = random_grease_value(rng);
        }
        Self {
            cipher: random_grease_value(rng),
            ext_first,
            ext_second,
            group: random_grease_value(rng),
            version: TLS_GREASE_VALUES[rng.gen_range(0..TLS_GREASE_VALUES.len())],
        }
    }
}

/// A fully materialised ClientHello.
#[derive(Debug, Clone)]
pub struct ClientHelloMessage {
    pub client_version: u16,
    pub random: [u8; 32],
    pub session_id: Vec<u8>,
    pub cipher_suites: Vec<u16>,
    pub compression_methods: Vec<u8>,
    /// Serialized extension block, ids and length prefixes included.
    pub extensions: Vec<u8>,
}

impl ClientHelloMessage {
    /// Materialise a spec for `server_name`. Randoms, session id, GREASE
    /// values and key shares are freshly drawn.
    pub fn from_spec(spec: &ClientHelloSpec, server_name: &str) -> Result<Self> {
        let ring_rng = ring_rand::SystemRandom::new();
        let mut rng = rand::thread_rng();
        let grease = GreaseValues::draw(&mut rng);

        let mut random = [0u8; 32];
        ring_rng
            .fill(&mut random)
            .map_err(|_| EngineError::Tls("rng failure while drawing client random".to_string()))?;

        // TLS 1.3 compatibility mode requires a non-empty legacy session id.
        let mut session_id = vec![0u8; 32];
        ring_rng
            .fill(&mut session_id)
            .map_err(|_| EngineError::Tls("rng failure while drawing session id".to_string()))?;

        let cipher_suites: Vec<u16> = spec
            .cipher_suites
            .iter()
            .map(|&id| if is_grease_value(id) { grease.cipher } else { id })
            .collect();

        let compression_methods = if spec.compression_methods.is_empty() {
            vec![0]
        } else {
            spec.compression_methods.clone()
        };

        // Base length: everything before the extension block, minus the
        // 2-byte extensions length field itself. Needed for padding.
        let base_len = 2
            + 32
            + 1
            + session_id.len()
            + 2
            + cipher_suites.len() * 2
            + 1
            + compression_methods.len();

        // First pass with an empty padding payload to learn the total,
        // second pass with the boring-style padding applied.
        let unpadded =
            serialize_extensions(spec, server_name, &grease, &ring_rng, &mut rng, 0)?;
        let unpadded_len = 4 + base_len + 2 + unpadded.len();
        let (padding_len, will_pad) = boring_padding_style(unpadded_len);
        let extensions = if will_pad
            && spec
                .extensions
                .iter()
                .any(|e| matches!(e, Extension::Padding))
        {
            serialize_extensions(spec, server_name, &grease, &ring_rng, &mut rng, padding_len)?
        } else {
            unpadded
        };

        Ok(Self {
            client_version: spec.tls_vers_max.min(VERSION_TLS12),
            random,
            session_id,
            cipher_suites,
            compression_methods,
            extensions,
        })
    }

    /// Serialize the ClientHello body.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(128 + self.extensions.len());

        bytes.extend_from_slice(&self.client_version.to_be_bytes());
        bytes.extend_from_slice(&self.random);

        bytes.push(self.session_id.len() as u8);
        bytes.extend_from_slice(&self.session_id);

        let cs_len = (self.cipher_suites.len() * 2) as u16;
        bytes.extend_from_slice(&cs_len.to_be_bytes());
        for cs in &self.cipher_suites {
            bytes.extend_from_slice(&cs.to_be_bytes());
        }

        bytes.push(self.compression_methods.len() as u8);
        bytes.extend_from_slice(&self.compression_methods);

        bytes.extend_from_slice(&(self.extensions.len() as u16).to_be_bytes());
        bytes.extend_from_slice(&self.extensions);

        bytes
    }

    /// Serialize as a handshake message: type + 24-bit length + body.
    pub fn to_handshake_bytes(&self) -> Vec<u8> {
        let body = self.to_bytes();
        let mut bytes = Vec::with_capacity(4 + body.len());
        bytes.push(0x01);
        bytes.push(((body.len() >> 16) & 0xff) as u8);
        bytes.push(((body.len() >> 8) & 0xff) as u8);
        bytes.push((body.len() & 0xff) as u8);
        bytes.extend_from_slice(&body);
        bytes
    }

    /// Serialize as a full TLS record, the way it appears on the wire.
    pub fn to_record_bytes(&self) -> Vec<u8> {
        let handshake = self.to_handshake_bytes();
        let mut bytes = Vec::with_capacity(5 + handshake.len());
        bytes.push(0x16);
        bytes.extend_from_slice(&[0x03, 0x01]);
        bytes.extend_from_slice(&(handshake.len() as u16).to_be_bytes());
        bytes.extend_from_slice(&handshake);
        bytes
    }
}

/// BoringSSL's padding length function: pad ClientHellos that would land in
/// (0xff, 0x200) up to 0x200 bytes.
pub fn boring_padding_style(unpadded_len: usize) -> (usize, bool) {
    if unpadded_len > 0xff && unpadded_len < 0x200 {
        let mut padding_len = 0x200 - unpadded_len;
        if padding_len > 4 {
            padding_len -= 4;
        } else {
            padding_len = 1;
        }
        return (padding_len, true);
    }
    (0, false)
}

fn serialize_extensions<R: Rng>(
    spec: &ClientHelloSpec,
    server_name: &str,
    grease: &GreaseValues,
    ring_rng: &ring_rand::SystemRandom,
    rng: &mut R,
    padding_len: usize,
) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    let mut grease_seen = false;

    for ext in &spec.extensions {
        match ext {
            Extension::Grease => {
                // Boring style: the first GREASE extension is empty, the
                // second carries a single zero byte.
                let (id, payload): (u16, &[u8]) = if grease_seen {
                    (grease.ext_second, &[0u8])
                } else {
                    (grease.ext_first, &[])
                };
                grease_seen = true;
                put_extension(&mut out, id, payload);
            }
            Extension::ServerName => {
                put_extension(&mut out, ext.id(), &sni_payload(server_name));
            }
            Extension::StatusRequest => {
                // status_type ocsp + empty responder ids + empty extensions
                put_extension(&mut out, ext.id(), &[0x01, 0x00, 0x00, 0x00, 0x00]);
            }
            Extension::StatusRequestV2 => {
                put_extension(&mut out, ext.id(), &[]);
            }
            Extension::SupportedCurves(curves) => {
                let mut payload = Vec::with_capacity(2 + curves.len() * 2);
                payload.extend_from_slice(&((curves.len() * 2) as u16).to_be_bytes());
                for &curve in curves {
                    let curve = if is_grease_value(curve) {
                        grease.group
                    } else {
                        curve
                    };
                    payload.extend_from_slice(&curve.to_be_bytes());
                }
                put_extension(&mut out, ext.id(), &payload);
            }
            Extension::SupportedPoints(formats) => {
                let mut payload = Vec::with_capacity(1 + formats.len());
                payload.push(formats.len() as u8);
                payload.extend_from_slice(formats);
                put_extension(&mut out, ext.id(), &payload);
            }
            Extension::SignatureAlgorithms(algs) => {
                let mut payload = Vec::with_capacity(2 + algs.len() * 2);
                payload.extend_from_slice(&((algs.len() * 2) as u16).to_be_bytes());
                for alg in algs {
                    payload.extend_from_slice(&alg.to_be_bytes());
                }
                put_extension(&mut out, ext.id(), &payload);
            }
            Extension::Alpn(protocols) => {
                put_extension(&mut out, ext.id(), &protocol_list_payload(protocols));
            }
            Extension::Sct => put_extension(&mut out, ext.id(), &[]),
            Extension::Padding => {
                put_extension(&mut out, ext.id(), &vec![0u8; padding_len]);
            }
            Extension::ExtendedMasterSecret => put_extension(&mut out, ext.id(), &[]),
            Extension::CompressCertificate(algs) => {
                let mut payload = Vec::with_capacity(1 + algs.len() * 2);
                payload.push((algs.len() * 2) as u8);
                for alg in algs {
                    payload.extend_from_slice(&alg.to_be_bytes());
                }
                put_extension(&mut out, ext.id(), &payload);
            }
            Extension::RecordSizeLimit(limit) => {
                put_extension(&mut out, ext.id(), &limit.to_be_bytes());
            }
            Extension::SessionTicket => put_extension(&mut out, ext.id(), &[]),
            Extension::SupportedVersions(versions) => {
                let mut payload = Vec::with_capacity(1 + versions.len() * 2);
                payload.push((versions.len() * 2) as u8);
                for &version in versions {
                    let version = if is_grease_value(version) {
                        grease.version
                    } else {
                        version
                    };
                    payload.extend_from_slice(&version.to_be_bytes());
                }
                put_extension(&mut out, ext.id(), &payload);
            }
            Extension::PskKeyExchangeModes(modes) => {
                let mut payload = Vec::with_capacity(1 + modes.len());
                payload.push(modes.len() as u8);
                payload.extend_from_slice(modes);
                put_extension(&mut out, ext.id(), &payload);
            }
            Extension::KeyShare(shares) => {
                let payload = key_share_payload(shares, grease, ring_rng, rng)?;
                put_extension(&mut out, ext.id(), &payload);
            }
            Extension::RenegotiationInfo => {
                // Initial handshake: empty renegotiated_connection.
                put_extension(&mut out, ext.id(), &[0x00]);
            }
            Extension::ApplicationSettings(protocols)
            | Extension::ApplicationSettingsNew(protocols) => {
                put_extension(&mut out, ext.id(), &protocol_list_payload(protocols));
            }
            Extension::GreaseEch => {
                put_extension(&mut out, ext.id(), &grease_ech_payload(ring_rng, rng)?);
            }
            Extension::Opaque { id, data } => {
                put_extension(&mut out, *id, data);
            }
        }
    }

    Ok(out)
}

fn put_extension(out: &mut Vec<u8>, id: u16, payload: &[u8]) {
    out.extend_from_slice(&id.to_be_bytes());
    out.extend_from_slice(&(payload.len() as u16).to_be_bytes());
    out.extend_from_slice(payload);
}

fn sni_payload(server_name: &str) -> Vec<u8> {
    let mut payload = Vec::with_capacity(5 + server_name.len());
    payload.extend_from_slice(&((3 + server_name.len()) as u16).to_be_bytes());
    payload.push(0); // name_type host_name
    payload.extend_from_slice(&(server_name.len() as u16).to_be_bytes());
    payload.extend_from_slice(server_name.as_bytes());
    payload
}

fn protocol_list_payload(protocols: &[String]) -> Vec<u8> {
    let list_len: usize = protocols.iter().map(|p| p.len() + 1).sum();
    let mut payload = Vec::with_capacity(2 + list_len);
    payload.extend_from_slice(&(list_len as u16).to_be_bytes());
    for protocol in protocols {
        payload.push(protocol.len() as u8);
        payload.extend_from_slice(protocol.as_bytes());
    }
    payload
}

fn key_share_payload<R: Rng>(
    shares: &[KeyShareEntry],
    grease: &GreaseValues,
    ring_rng: &ring_rand::SystemRandom,
    rng: &mut R,
) -> Result<Vec<u8>> {
    let mut entries = Vec::new();
    for share in shares {
        let group = if is_grease_value(share.group) {
            grease.group
        } else {
            share.group
        };
        let data = if !share.data.is_empty() {
            share.data.clone()
        } else {
            generate_key_share(share.group, ring_rng, rng)?
        };
        entries.extend_from_slice(&group.to_be_bytes());
        entries.extend_from_slice(&(data.len() as u16).to_be_bytes());
        entries.extend_from_slice(&data);
    }

    let mut payload = Vec::with_capacity(2 + entries.len());
    payload.extend_from_slice(&(entries.len() as u16).to_be_bytes());
    payload.extend_from_slice(&entries);
    Ok(payload)
}

fn generate_key_share<R: Rng>(
    group: u16,
    ring_rng: &ring_rand::SystemRandom,
    rng: &mut R,
) -> Result<Vec<u8>> {
    let algorithm = match group {
        X25519 => Some(&agreement::X25519),
        CURVE_P256 => Some(&agreement::ECDH_P256),
        CURVE_P384 => Some(&agreement::ECDH_P384),
        _ => None,
    };

    if let Some(algorithm) = algorithm {
        let private = agreement::EphemeralPrivateKey::generate(algorithm, ring_rng)
            .map_err(|_| EngineError::Tls(format!("key generation failed for group {}", group)))?;
        let public = private
            .compute_public_key()
            .map_err(|_| EngineError::Tls(format!("public key derivation failed for group {}", group)))?;
        return Ok(public.as_ref().to_vec());
    }

    // No local implementation for this group (ML-KEM hybrids and the like):
    // emit a correctly sized random share so the template stays plausible.
    let len = if group == X25519_MLKEM768 {
        X25519_MLKEM768_SHARE_LEN
    } else {
        32
    };
    let mut data = vec![0u8; len];
    rng.fill(&mut data[..]);
    Ok(data)
}

fn grease_ech_payload<R: Rng>(
    ring_rng: &ring_rand::SystemRandom,
    rng: &mut R,
) -> Result<Vec<u8>> {
    // GREASE ECH the way BoringSSL builds it: outer client hello type, a
    // real-looking HPKE suite, random config id, random X25519 enc and a
    // random payload.
    let mut enc = [0u8; 32];
    ring_rng
        .fill(&mut enc)
        .map_err(|_| EngineError::Tls("rng failure while drawing ech enc".to_string()))?;
    let mut inner = vec![0u8; 128];
    rng.fill(&mut inner[..]);

    let mut payload = Vec::with_capacity(10 + enc.len() + inner.len());
    payload.push(0x00); // outer
    payload.extend_from_slice(&[0x00, 0x01]); // kdf hkdf-sha256
    payload.extend_from_slice(&[0x00, 0x01]); // aead aes-128-gcm
    payload.push(rng.gen()); // config id
    payload.extend_from_slice(&(enc.len() as u16).to_be_bytes());
    payload.extend_from_slice(&enc);
    payload.extend_from_slice(&(inner.len() as u16).to_be_bytes());
    payload.extend_from_slice(&inner);
    Ok(payload)
}
