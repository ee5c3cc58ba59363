//! Fingerprinted TLS dialing
//!
//! Applies as much of a [`ClientHelloSpec`] as rustls exposes (cipher
//! order, key-exchange groups, protocol versions, ALPN) and performs the
//! handshake over the byte tap. Host verification against the SNI name is
//! on by default; the Mozilla root set comes from webpki-roots.

use std::sync::Arc;
use std::time::Duration;

use rustls::{ClientConfig, OwnedTrustAnchor, RootCertStore, ServerName};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_rustls::{client::TlsStream, TlsConnector};

use crate::error::{EngineError, Result};
use crate::tls_config::{is_grease_value, ClientHelloSpec};

/// Negotiated connection parameters, reported on the response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlsInfo {
    pub version: String,
    pub cipher_suite: String,
    pub alpn: String,
}

/// Mozilla root store.
pub fn build_root_store() -> RootCertStore {
    let mut root_store = RootCertStore::empty();
    root_store.add_trust_anchors(webpki_roots::TLS_SERVER_ROOTS.iter().map(|ta| {
        OwnedTrustAnchor::from_subject_spki_name_constraints(
            ta.subject,
            ta.spki,
            ta.name_constraints,
        )
    }));
    root_store
}

/// Build a rustls config for a spec. The ordered cipher/kx/version subsets
/// rustls supports are applied; anything it cannot express falls back to
/// the safe defaults so the handshake still completes.
pub fn build_client_config(
    spec: &ClientHelloSpec,
    alpn_protocols: Vec<Vec<u8>>,
    verify_tls: bool,
) -> ClientConfig {
    let mut config = try_build_config_from_spec(spec).unwrap_or_else(|| {
        ClientConfig::builder()
            .with_safe_defaults()
            .with_root_certificates(build_root_store())
            .with_no_client_auth()
    });

    config.alpn_protocols = alpn_protocols;
    apply_verify_tls(&mut config, verify_tls);
    config
}

fn try_build_config_from_spec(spec: &ClientHelloSpec) -> Option<ClientConfig> {
    // Cipher suites: the rustls-supported subset, in spec order.
    let mut cipher_suites: Vec<rustls::SupportedCipherSuite> = Vec::new();
    for id in spec
        .cipher_suites
        .iter()
        .copied()
        .filter(|id| !is_grease_value(*id))
    {
        if let Some(suite) = rustls::ALL_CIPHER_SUITES
            .iter()
            .copied()
            .find(|suite| suite.suite().get_u16() == id)
        {
            cipher_suites.push(suite);
        }
    }
    if cipher_suites.is_empty() {
        return None;
    }

    // Key exchange groups, in spec order, rustls-supported subset.
    let mut kx_groups: Vec<&'static rustls::SupportedKxGroup> = Vec::new();
    let mut seen: Vec<u16> = Vec::new();
    for id in spec.curves() {
        let group = match id {
            crate::dicttls::X25519 => Some(&rustls::kx_group::X25519),
            crate::dicttls::CURVE_P256 => Some(&rustls::kx_group::SECP256R1),
            crate::dicttls::CURVE_P384 => Some(&rustls::kx_group::SECP384R1),
            _ => None, // GREASE, hybrids and exotic groups have no rustls impl
        };
        if let Some(group) = group {
            if !seen.contains(&id) {
                kx_groups.push(group);
                seen.push(id);
            }
        }
    }
    if kx_groups.is_empty() {
        return None;
    }

    // Protocol versions, in spec order.
    let mut versions: Vec<&'static rustls::SupportedProtocolVersion> = Vec::new();
    for v in spec.supported_versions() {
        let version = match v {
            crate::dicttls::VERSION_TLS13 => Some(&rustls::version::TLS13),
            crate::dicttls::VERSION_TLS12 => Some(&rustls::version::TLS12),
            _ => None,
        };
        if let Some(version) = version {
            if !versions.contains(&version) {
                versions.push(version);
            }
        }
    }
    if versions.is_empty() {
        versions.push(&rustls::version::TLS13);
        versions.push(&rustls::version::TLS12);
    }

    let builder = ClientConfig::builder()
        .with_cipher_suites(&cipher_suites)
        .with_kx_groups(&kx_groups)
        .with_protocol_versions(&versions)
        .ok()?;

    Some(
        builder
            .with_root_certificates(build_root_store())
            .with_no_client_auth(),
    )
}

/// Install an accept-everything verifier when verification is disabled.
fn apply_verify_tls(config: &mut ClientConfig, verify_tls: bool) {
    if verify_tls {
        return;
    }

    use rustls::client::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
    use rustls::{Certificate, DigitallySignedStruct, Error as RustlsError};
    use std::time::SystemTime;

    #[derive(Debug)]
    struct NoCertificateVerification;

    impl ServerCertVerifier for NoCertificateVerification {
        fn verify_server_cert(
            &self,
            _end_entity: &Certificate,
            _intermediates: &[Certificate],
            _server_name: &ServerName,
            _scts: &mut dyn Iterator<Item = &[u8]>,
            _ocsp_response: &[u8],
            _now: SystemTime,
        ) -> std::result::Result<ServerCertVerified, RustlsError> {
            Ok(ServerCertVerified::assertion())
        }

        fn verify_tls12_signature(
            &self,
            _message: &[u8],
            _cert: &Certificate,
            _dss: &DigitallySignedStruct,
        ) -> std::result::Result<HandshakeSignatureValid, RustlsError> {
            Ok(HandshakeSignatureValid::assertion())
        }

        fn verify_tls13_signature(
            &self,
            _message: &[u8],
            _cert: &Certificate,
            _dss: &DigitallySignedStruct,
        ) -> std::result::Result<HandshakeSignatureValid, RustlsError> {
            Ok(HandshakeSignatureValid::assertion())
        }
    }

    config
        .dangerous()
        .set_certificate_verifier(Arc::new(NoCertificateVerification));
}

/// Handshake over `io` and report the negotiated parameters.
pub async fn connect<S>(
    io: S,
    server_name: &str,
    config: Arc<ClientConfig>,
    timeout: Duration,
) -> Result<(TlsStream<S>, TlsInfo)>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let name = ServerName::try_from(server_name)
        .map_err(|_| EngineError::Tls(format!("invalid server name {:?}", server_name)))?;

    let connector = TlsConnector::from(config);
    let stream = tokio::time::timeout(timeout, connector.connect(name, io))
        .await
        .map_err(|_| EngineError::timeout("tls handshake"))?
        .map_err(|e| EngineError::Tls(format!("handshake with {}: {}", server_name, e)))?;

    let info = {
        let (_, connection) = stream.get_ref();
        let version = match connection.protocol_version() {
            Some(rustls::ProtocolVersion::TLSv1_3) => "TLS 1.3".to_string(),
            Some(rustls::ProtocolVersion::TLSv1_2) => "TLS 1.2".to_string(),
            Some(other) => format!("{:?}", other),
            None => String::new(),
        };
        let cipher_suite = connection
            .negotiated_cipher_suite()
            .map(|suite| format!("{:?}", suite.suite()))
            .unwrap_or_default();
        let alpn = connection
            .alpn_protocol()
            .map(|proto| String::from_utf8_lossy(proto).to_string())
            .unwrap_or_default();
        TlsInfo {
            version,
            cipher_suite,
            alpn,
        }
    };

    log::debug!(
        "tls established with {}: {} {} alpn={}",
        server_name,
        info.version,
        info.cipher_suite,
        info.alpn
    );
    Ok((stream, info))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::presets::BrowserPreset;

    #[test]
    fn test_config_from_chrome_spec() {
        let spec = BrowserPreset::Chrome131.client_hello_spec();
        let config = build_client_config(&spec, vec![b"h2".to_vec()], true);
        assert_eq!(config.alpn_protocols, vec![b"h2".to_vec()]);
    }

    #[test]
    fn test_config_survives_unsupported_spec() {
        // A spec with only exotic ciphers cannot be mapped; the safe
        // defaults must kick in.
        let mut spec = ClientHelloSpec::new();
        spec.cipher_suites = vec![0x0a0a, 0x00ff];
        let _config = build_client_config(&spec, Vec::new(), true);
    }

    #[test]
    fn test_spec_mappable_presets() {
        // Every preset must map onto rustls without hitting the fallback:
        // they all carry at least one rustls suite, group and version.
        for preset in BrowserPreset::all() {
            let spec = preset.client_hello_spec();
            assert!(try_build_config_from_spec(&spec).is_some(), "{}", preset.id());
        }
    }
}
