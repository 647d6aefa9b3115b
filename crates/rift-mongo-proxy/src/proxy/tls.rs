//! TLS utilities for upstream connections.
//!
//! Builds the rustls client configuration from the target connection
//! string's TLS options, and provides a no-op certificate verifier for
//! `tlsInsecure` targets.

use crate::config::ConnectionString;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use std::sync::Arc;
use tracing::warn;

/// No-op certificate verifier for development/testing with self-signed certificates.
///
/// # Warning
/// This disables all TLS security checks - use only in development!
#[derive(Debug)]
pub struct NoVerifier {
    schemes: Vec<SignatureScheme>,
}

impl NoVerifier {
    pub fn new(provider: &CryptoProvider) -> Self {
        Self {
            schemes: provider
                .signature_verification_algorithms
                .supported_schemes(),
        }
    }
}

impl ServerCertVerifier for NoVerifier {
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
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.schemes.clone()
    }
}

/// Build the client TLS configuration for `target`, or `None` for plain TCP.
pub fn client_config(target: &ConnectionString) -> Result<Option<Arc<ClientConfig>>, anyhow::Error> {
    if !target.tls_enabled() {
        return Ok(None);
    }

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let builder = ClientConfig::builder_with_provider(Arc::clone(&provider))
        .with_safe_default_protocol_versions()
        .map_err(|e| anyhow::anyhow!("Failed to select TLS protocol versions: {e}"))?;

    let builder = if target.tls_insecure() {
        warn!("TLS certificate verification DISABLED for upstream (development/testing only)");
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(NoVerifier::new(&provider)))
    } else {
        builder.with_root_certificates(load_root_store(target.tls_ca_file())?)
    };

    let config = match target.tls_certificate_key_file() {
        Some(path) => {
            let (certs, key) = load_certificate_key(path)?;
            builder
                .with_client_auth_cert(certs, key)
                .map_err(|e| anyhow::anyhow!("Invalid client certificate in '{path}': {e}"))?
        }
        None => builder.with_no_client_auth(),
    };

    Ok(Some(Arc::new(config)))
}

/// Trust roots from the CA file, or the bundled web PKI roots.
fn load_root_store(ca_file: Option<&str>) -> Result<RootCertStore, anyhow::Error> {
    let mut roots = RootCertStore::empty();
    let Some(ca_path) = ca_file else {
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        return Ok(roots);
    };

    let pem = std::fs::read(ca_path)
        .map_err(|e| anyhow::anyhow!("Failed to open CA file '{ca_path}': {e}"))?;
    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut pem.as_slice())
        .collect::<Result<_, _>>()
        .map_err(|e| anyhow::anyhow!("Failed to parse CA file: {e}"))?;

    if certs.is_empty() {
        anyhow::bail!("No certificates found in CA file: {ca_path}");
    }
    for cert in certs {
        roots
            .add(cert)
            .map_err(|e| anyhow::anyhow!("Invalid CA certificate in '{ca_path}': {e}"))?;
    }
    Ok(roots)
}

/// Certificate chain and private key from one PEM file.
fn load_certificate_key(
    path: &str,
) -> Result<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>), anyhow::Error> {
    let pem = std::fs::read(path)
        .map_err(|e| anyhow::anyhow!("Failed to open certificate key file '{path}': {e}"))?;

    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut pem.as_slice())
        .collect::<Result<_, _>>()
        .map_err(|e| anyhow::anyhow!("Failed to parse certificate key file: {e}"))?;
    if certs.is_empty() {
        anyhow::bail!("No certificates found in certificate key file: {path}");
    }

    // Try reading as PKCS8, RSA, or EC private key
    let key = rustls_pemfile::private_key(&mut pem.as_slice())
        .map_err(|e| anyhow::anyhow!("Failed to parse private key: {e}"))?
        .ok_or_else(|| anyhow::anyhow!("No private key found in certificate key file: {path}"))?;

    Ok((certs, key))
}

/// SNI name for a `host:port` address.
pub fn server_name(addr: &str) -> Result<ServerName<'static>, anyhow::Error> {
    let host = match addr.rsplit_once(':') {
        Some((host, port)) if port.parse::<u16>().is_ok() => host,
        _ => addr,
    };
    let host = host.trim_start_matches('[').trim_end_matches(']');
    ServerName::try_from(host.to_string())
        .map_err(|e| anyhow::anyhow!("Invalid TLS server name '{host}': {e}"))
}
