//! Loads the server's TLS material into a [`kvm_core::connection::TlsServerConfig`].
//!
//! Grounded on the rustls 0.23 builder API used by the CLI's WebSocket
//! connector (`CLI/src/main.rs`), adapted here to the server side: a cert
//! chain plus private key loaded with `rustls-pemfile`, no client auth.

use crate::config::TlsEntry;
use anyhow::{Context, Result};
use kvm_core::connection::TlsServerConfig;
use rustls_pemfile::{certs, private_key};
use std::fs::File;
use std::io::BufReader;
use std::sync::Arc;

pub fn load(entry: Option<&TlsEntry>) -> Result<TlsServerConfig> {
    let Some(entry) = entry else { return Ok(TlsServerConfig::Plain) };

    let cert_file = File::open(&entry.certfile).with_context(|| format!("failed to open {}", entry.certfile))?;
    let cert_chain = certs(&mut BufReader::new(cert_file))
        .collect::<Result<Vec<_>, _>>()
        .context("failed to parse certfile")?;

    let key_file = File::open(&entry.keyfile).with_context(|| format!("failed to open {}", entry.keyfile))?;
    let key = private_key(&mut BufReader::new(key_file))
        .context("failed to parse keyfile")?
        .ok_or_else(|| anyhow::anyhow!("no private key found in {}", entry.keyfile))?;

    let config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(cert_chain, key)
        .context("failed to build TLS server config")?;

    Ok(TlsServerConfig::Tls(Arc::new(config)))
}
