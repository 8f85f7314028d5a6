//! TLS configurator: builds a `rustls::ClientConfig` from a request's TLS
//! fields (§4.F) — version range, cipher suites, client certificate, CA
//! trust, SNI override, and certificate pinning.

use crate::error::Error;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use sha2::{Digest, Sha256};
use std::sync::Arc;

/// The four TLS protocol versions the configuration model can name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TlsVersion {
    V1_0,
    V1_1,
    V1_2,
    V1_3,
}

impl TlsVersion {
    fn to_rustls(self) -> Option<&'static rustls::SupportedProtocolVersion> {
        match self {
            // rustls does not implement TLS 1.0/1.1; a request naming them
            // is rejected at validation time rather than silently upgraded.
            Self::V1_0 | Self::V1_1 => None,
            Self::V1_2 => Some(&rustls::version::TLS12),
            Self::V1_3 => Some(&rustls::version::TLS13),
        }
    }
}

/// A validated classical-TLS (≤1.2) cipher suite name, e.g. `"TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256"`.
fn lookup_cipher_suite(name: &str) -> Option<rustls::SupportedCipherSuite> {
    use rustls::crypto::ring::cipher_suite::*;
    let suite = match name {
        "TLS13_AES_256_GCM_SHA384" => TLS13_AES_256_GCM_SHA384,
        "TLS13_AES_128_GCM_SHA256" => TLS13_AES_128_GCM_SHA256,
        "TLS13_CHACHA20_POLY1305_SHA256" => TLS13_CHACHA20_POLY1305_SHA256,
        "TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384" => TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384,
        "TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256" => TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256,
        "TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384" => TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384,
        "TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256" => TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256,
        "TLS_ECDHE_ECDSA_WITH_CHACHA20_POLY1305_SHA256" => {
            TLS_ECDHE_ECDSA_WITH_CHACHA20_POLY1305_SHA256
        }
        "TLS_ECDHE_RSA_WITH_CHACHA20_POLY1305_SHA256" => {
            TLS_ECDHE_RSA_WITH_CHACHA20_POLY1305_SHA256
        }
        _ => return None,
    };
    Some(suite)
}

/// Input to the TLS configurator — the subset of `RequestConfig` that
/// bears on the TLS handshake. Kept separate from `RequestConfig` so the
/// proxy-facing and request-facing TLS paths (§4.E, §9) can each build one
/// independently from different fields of the same request.
#[derive(Debug, Clone, Default)]
pub struct TlsMaterial {
    pub cert_path: Option<String>,
    pub key_path: Option<String>,
    pub ca_path: Option<String>,
    pub insecure_skip_verify: bool,
    pub min_version: Option<TlsVersion>,
    pub max_version: Option<TlsVersion>,
    pub cipher_suites: Vec<String>,
    pub tls13_cipher_suites: Vec<String>,
    pub sni_override: Option<String>,
    pub pinned_sha256_fingerprints: Vec<[u8; 32]>,
}

/// Builds `rustls::ClientConfig`s from [`TlsMaterial`] (§4.F).
pub struct TlsConfigurator;

impl TlsConfigurator {
    /// # Errors
    /// Returns [`Error::unknown_cipher_suite`] for an unrecognized name,
    /// [`Error::conflicting_tls_material`] if only one of cert/key is set,
    /// and [`Error::setup_error`] if cert/key/CA files cannot be read or parsed.
    pub fn build(material: &TlsMaterial) -> Result<Arc<ClientConfig>, Error> {
        let min = material.min_version.unwrap_or(TlsVersion::V1_2);
        let max = material.max_version.unwrap_or(TlsVersion::V1_3);
        let versions: Vec<&'static rustls::SupportedProtocolVersion> = [TlsVersion::V1_2, TlsVersion::V1_3]
            .into_iter()
            .filter(|v| *v >= min && *v <= max)
            .filter_map(TlsVersion::to_rustls)
            .collect();

        let mut cipher_suites = Vec::new();
        for name in material.cipher_suites.iter().chain(material.tls13_cipher_suites.iter()) {
            cipher_suites.push(
                lookup_cipher_suite(name).ok_or_else(|| Error::unknown_cipher_suite(name.clone()))?,
            );
        }
        let base_provider = rustls::crypto::ring::default_provider();
        let provider = if cipher_suites.is_empty() {
            base_provider
        } else {
            CryptoProvider {
                cipher_suites,
                ..base_provider
            }
        };

        let builder = ClientConfig::builder_with_provider(Arc::new(provider))
            .with_protocol_versions(&versions)
            .map_err(|e| Error::setup_error(format!("failed to build TLS config: {e}")))?;

        let root_store = Self::build_root_store(material)?;

        let mut config = if material.insecure_skip_verify && material.pinned_sha256_fingerprints.is_empty() {
            builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(NoVerify))
                .into()
        } else if !material.pinned_sha256_fingerprints.is_empty() {
            let verifier = PinningVerifier::new(
                root_store,
                material.pinned_sha256_fingerprints.clone(),
                material.insecure_skip_verify,
            )?;
            builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(verifier))
                .into()
        } else {
            builder.with_root_certificates(root_store)
        };

        Self::apply_client_identity(&mut config, material)?;
        Ok(Arc::new(config))
    }

    fn build_root_store(material: &TlsMaterial) -> Result<RootCertStore, Error> {
        let mut store = RootCertStore::empty();
        store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        if let Some(ca_path) = &material.ca_path {
            let pem = std::fs::read(ca_path)
                .map_err(|e| Error::setup_error(format!("failed to read CA file {ca_path}: {e}")))?;
            let mut reader = std::io::Cursor::new(pem);
            for cert in rustls_pemfile::certs(&mut reader) {
                let cert =
                    cert.map_err(|e| Error::setup_error(format!("failed to parse CA PEM: {e}")))?;
                store
                    .add(cert)
                    .map_err(|e| Error::setup_error(format!("failed to add CA cert: {e}")))?;
            }
        }
        Ok(store)
    }

    fn apply_client_identity(
        config: &mut ClientConfig,
        material: &TlsMaterial,
    ) -> Result<(), Error> {
        match (&material.cert_path, &material.key_path) {
            (None, None) => Ok(()),
            (Some(_), None) | (None, Some(_)) => Err(Error::conflicting_tls_material(
                "client certificate requires both --cert and --key, or neither",
            )),
            (Some(cert_path), Some(key_path)) => {
                let certs = load_certs(cert_path)?;
                let key = load_key(key_path)?;
                // rustls requires building a fresh builder to attach a client
                // identity; reconstruct from the already-negotiated root store.
                let roots = config.root_store().clone();
                let rebuilt = ClientConfig::builder()
                    .with_root_certificates(roots)
                    .with_client_auth_cert(certs, key)
                    .map_err(|e| Error::setup_error(format!("invalid client identity: {e}")))?;
                *config = rebuilt;
                Ok(())
            }
        }
    }
}

fn load_certs(path: &str) -> Result<Vec<CertificateDer<'static>>, Error> {
    let data = std::fs::read(path)
        .map_err(|e| Error::setup_error(format!("failed to read cert file {path}: {e}")))?;
    rustls_pemfile::certs(&mut std::io::Cursor::new(data))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| Error::setup_error(format!("failed to parse cert PEM: {e}")))
}

fn load_key(path: &str) -> Result<PrivateKeyDer<'static>, Error> {
    let data = std::fs::read(path)
        .map_err(|e| Error::setup_error(format!("failed to read key file {path}: {e}")))?;
    rustls_pemfile::private_key(&mut std::io::Cursor::new(data))
        .map_err(|e| Error::setup_error(format!("failed to parse key PEM: {e}")))?
        .ok_or_else(|| Error::setup_error(format!("no private key found in {path}")))
}

/// Computes the SHA-256 fingerprint of a leaf certificate's DER bytes.
#[must_use]
pub fn fingerprint(cert: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(cert);
    hasher.finalize().into()
}

/// Trusts nothing but the pinned set; used when `insecure_skip_verify` and
/// pinning are both configured, so pinning is the *sole* trust anchor (§4.F).
#[derive(Debug)]
struct NoVerify;

impl ServerCertVerifier for NoVerify {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(
            message,
            cert,
            dss,
            &rustls::crypto::ring::default_provider().signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(
            message,
            cert,
            dss,
            &rustls::crypto::ring::default_provider().signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        rustls::crypto::ring::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}

/// Runs normal chain verification (unless skipped) and then rejects any
/// leaf certificate that does not hash to one of the pinned fingerprints
/// (§4.F "Pinning is applied after normal chain verification").
#[derive(Debug)]
struct PinningVerifier {
    inner: Option<Arc<rustls::client::WebPkiServerVerifier>>,
    fingerprints: Vec<[u8; 32]>,
}

impl PinningVerifier {
    fn new(
        roots: RootCertStore,
        fingerprints: Vec<[u8; 32]>,
        insecure_skip_verify: bool,
    ) -> Result<Self, Error> {
        let inner = if insecure_skip_verify {
            None
        } else {
            Some(
                rustls::client::WebPkiServerVerifier::builder(Arc::new(roots))
                    .build()
                    .map_err(|e| Error::setup_error(format!("failed to build verifier: {e}")))?,
            )
        };
        Ok(Self { inner, fingerprints })
    }

    fn check_pin(&self, end_entity: &CertificateDer<'_>) -> Result<(), rustls::Error> {
        let actual = fingerprint(end_entity.as_ref());
        if self.fingerprints.iter().any(|pinned| *pinned == actual) {
            Ok(())
        } else {
            Err(rustls::Error::General(
                "certificate pinning mismatch".to_string(),
            ))
        }
    }
}

impl ServerCertVerifier for PinningVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        if let Some(inner) = &self.inner {
            inner.verify_server_cert(end_entity, intermediates, server_name, ocsp_response, now)?;
        }
        self.check_pin(end_entity)?;
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.as_ref().map_or_else(
            || {
                verify_tls12_signature(
                    message,
                    cert,
                    dss,
                    &rustls::crypto::ring::default_provider().signature_verification_algorithms,
                )
            },
            |inner| inner.verify_tls12_signature(message, cert, dss),
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.as_ref().map_or_else(
            || {
                verify_tls13_signature(
                    message,
                    cert,
                    dss,
                    &rustls::crypto::ring::default_provider().signature_verification_algorithms,
                )
            },
            |inner| inner.verify_tls13_signature(message, cert, dss),
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.inner.as_ref().map_or_else(
            || {
                rustls::crypto::ring::default_provider()
                    .signature_verification_algorithms
                    .supported_schemes()
            },
            |inner| inner.supported_verify_schemes(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_cipher_suite_rejected() {
        let material = TlsMaterial {
            cipher_suites: vec!["TLS_NOT_A_REAL_SUITE".to_string()],
            ..Default::default()
        };
        assert!(TlsConfigurator::build(&material).is_err());
    }

    #[test]
    fn cert_without_key_is_conflicting() {
        let material = TlsMaterial {
            cert_path: Some("/tmp/does-not-matter.pem".to_string()),
            ..Default::default()
        };
        let err = TlsConfigurator::build(&material).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Configuration);
    }

    #[test]
    fn default_versions_build_successfully() {
        let material = TlsMaterial::default();
        assert!(TlsConfigurator::build(&material).is_ok());
    }
}
