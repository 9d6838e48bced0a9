//! Loads the client's TLS trust material into a
//! [`kvm_core::connection::TlsClientConfig`].
//!
//! Grounded on `CLI/src/main.rs`'s rustls 0.23 builder usage, including
//! its opt-in dangerous `ServerCertVerifier` for the insecure mode — kept
//! as an explicit, logged escape hatch rather than a default.

use crate::config::TlsEntry;
use anyhow::{Context, Result};
use kvm_core::connection::TlsClientConfig;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use rustls_pemfile::certs;
use std::fs::File;
use std::io::BufReader;
use std::sync::Arc;

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
        vec![SignatureScheme::ECDSA_NISTP256_SHA256, SignatureScheme::ED25519, SignatureScheme::RSA_PKCS1_SHA256]
    }
}

pub fn load(entry: Option<&TlsEntry>, server_name: &str) -> Result<TlsClientConfig> {
    let Some(entry) = entry else { return Ok(TlsClientConfig::Plain) };

    let name = ServerName::try_from(server_name.to_string()).context("invalid TLS server name")?;

    if entry.insecure {
        log::warn!("TLS certificate verification is disabled (insecure = true in config.toml)");
        let config = ClientConfig::builder().dangerous().with_custom_certificate_verifier(Arc::new(NoVerify)).with_no_client_auth();
        return Ok(TlsClientConfig::Tls(Arc::new(config), name));
    }

    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    if let Some(certfile) = &entry.certfile {
        let file = File::open(certfile).with_context(|| format!("failed to open {certfile}"))?;
        for cert in certs(&mut BufReader::new(file)) {
            roots.add(cert.context("failed to parse certfile")?)?;
        }
    }

    let config = ClientConfig::builder().with_root_certificates(roots).with_no_client_auth();
    Ok(TlsClientConfig::Tls(Arc::new(config), name))
}
