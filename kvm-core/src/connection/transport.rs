//! Plain-TCP/TLS transport setup. Everything above this layer only ever
//! sees a boxed `AsyncRead`/`AsyncWrite` pair, so handshake and framing
//! code is identical whether or not TLS is configured (spec.md §6).

use crate::error::CoreResult;
use rustls::pki_types::ServerName;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::{TlsAcceptor, TlsConnector};

pub type DynReader = Box<dyn AsyncRead + Unpin + Send>;
pub type DynWriter = Box<dyn AsyncWrite + Unpin + Send>;

#[derive(Clone, Default)]
pub enum TlsServerConfig {
    #[default]
    Plain,
    Tls(Arc<rustls::ServerConfig>),
}

#[derive(Clone, Default)]
pub enum TlsClientConfig {
    #[default]
    Plain,
    Tls(Arc<rustls::ClientConfig>, ServerName<'static>),
}

pub async fn accept(listener: &TcpListener, tls: &TlsServerConfig) -> CoreResult<(DynReader, DynWriter, SocketAddr)> {
    let (stream, addr) = listener.accept().await?;
    let _ = stream.set_nodelay(true);
    match tls {
        TlsServerConfig::Plain => {
            let (r, w) = tokio::io::split(stream);
            Ok((Box::new(r), Box::new(w), addr))
        }
        TlsServerConfig::Tls(config) => {
            let acceptor = TlsAcceptor::from(Arc::clone(config));
            let tls_stream = acceptor.accept(stream).await?;
            let (r, w) = tokio::io::split(tls_stream);
            Ok((Box::new(r), Box::new(w), addr))
        }
    }
}

pub async fn connect(addr: SocketAddr, tls: &TlsClientConfig) -> CoreResult<(DynReader, DynWriter, SocketAddr)> {
    let stream = TcpStream::connect(addr).await?;
    let _ = stream.set_nodelay(true);
    match tls {
        TlsClientConfig::Plain => {
            let (r, w) = tokio::io::split(stream);
            Ok((Box::new(r), Box::new(w), addr))
        }
        TlsClientConfig::Tls(config, server_name) => {
            let connector = TlsConnector::from(Arc::clone(config));
            let tls_stream = connector.connect(server_name.clone(), stream).await?;
            let (r, w) = tokio::io::split(tls_stream);
            Ok((Box::new(r), Box::new(w), addr))
        }
    }
}
